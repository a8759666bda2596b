//! Reference counted resource registry with deferred, cancellable cleanup.
//!
//! [`Registry::obtain`] hands out a value together with a single use [`Release`] token.
//! Releasing the last token starts a cleanup round through the [`Cleanup`] initiator given
//! at construction. If the key is obtained again before the round completes the round is
//! aborted and its completion becomes a no-op, so a resource that is quickly reclaimed is
//! never torn down.
//!
//! The registry is single threaded: it is neither `Send` nor `Sync`, and every state
//! transition happens synchronously inside `obtain`, `release`, or a completion.
mod cleanup;
mod entry;
mod error;
mod registry;
mod release;
mod store;
pub use cleanup::{AbortHandle, Cleanup, Completion};
pub use entry::{Entry, RoundState};
pub use error::RegistryError;
pub use registry::Registry;
pub use release::Release;
pub use store::Store;
