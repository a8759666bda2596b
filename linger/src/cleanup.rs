use anyhow::Result;
use std::fmt;

/// Signals that a cleanup round has finished tearing its resource down.
///
/// Completing consumes the handle, so a round can be completed at most once. A
/// completion that is dropped without being completed leaves its round pending until a
/// later `obtain` aborts it.
pub struct Completion {
    finish: Box<dyn FnOnce()>,
}
impl Completion {
    pub fn new<F: FnOnce() + 'static>(finish: F) -> Self {
        Self {
            finish: Box::new(finish),
        }
    }
    pub fn complete(self) {
        (self.finish)()
    }
}
impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish()
    }
}

/// Cancels a cleanup round that is still in flight.
pub struct AbortHandle {
    abort: Box<dyn FnOnce() -> Result<()>>,
}
impl AbortHandle {
    pub fn new<F: FnOnce() -> Result<()> + 'static>(abort: F) -> Self {
        Self {
            abort: Box::new(abort),
        }
    }
    /// Handle for teardown that has nothing to cancel
    pub fn noop() -> Self {
        Self::new(|| Ok(()))
    }
    pub fn abort(self) -> Result<()> {
        (self.abort)()
    }
}
impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle").finish()
    }
}

/// Begins tearing down the resource stored under a key.
///
/// The initiator must eventually call [`Completion::complete`] unless the returned
/// [`AbortHandle`] is invoked first. Completing before `begin` returns removes the key
/// immediately. `begin` may be entered again for other keys while it runs, since the
/// initiator is free to obtain or release other keys.
pub trait Cleanup<K> {
    fn begin(&self, key: &K, done: Completion) -> Result<AbortHandle>;
}
impl<K, F> Cleanup<K> for F
where
    F: Fn(&K, Completion) -> Result<AbortHandle>,
{
    fn begin(&self, key: &K, done: Completion) -> Result<AbortHandle> {
        self(key, done)
    }
}
