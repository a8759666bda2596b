use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// A release token was invoked after it had already released its reference.
    #[error("release token invoked more than once")]
    DoubleRelease,
    /// A factory or cleanup initiator asked for the key it is still working on.
    #[error("registry re-entered for a key its collaborator is working on")]
    Reentrant,
    #[error("factory failed: {0:#}")]
    Create(anyhow::Error),
    #[error("cleanup initiator failed: {0:#}")]
    Cleanup(anyhow::Error),
    #[error("abort handle failed: {0:#}")]
    Abort(anyhow::Error),
}
