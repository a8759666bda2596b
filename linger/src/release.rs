use super::error::RegistryError;
use super::registry::Registry;
use super::store::Store;
use std::fmt::Debug;

/// Single use token returned by [`Registry::obtain`].
///
/// Releasing gives up the reference taken by the matching `obtain`. Dropping a token
/// without releasing it keeps the key resident.
pub struct Release<K, V, S> {
    registry: Registry<K, V, S>,
    key: K,
    released: bool,
}
impl<K, V, S> Release<K, V, S>
where
    K: PartialEq + Clone + Debug + 'static,
    V: Clone + 'static,
    S: Store<K, V> + 'static,
{
    pub(crate) fn new(registry: Registry<K, V, S>, key: K) -> Self {
        Self {
            registry,
            key,
            released: false,
        }
    }
    pub fn key(&self) -> &K {
        &self.key
    }
    pub fn is_released(&self) -> bool {
        self.released
    }
    /// Releases the reference. Starts a cleanup round if this was the last one.
    ///
    /// Errors from the cleanup initiator are returned after the reference has been
    /// released. A second call fails with [`RegistryError::DoubleRelease`] and changes
    /// nothing.
    pub fn release(&mut self) -> Result<(), RegistryError> {
        if self.released {
            return Err(RegistryError::DoubleRelease);
        }
        self.released = true;
        self.registry.release_key(&self.key)
    }
}
