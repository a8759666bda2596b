use super::cleanup::{Cleanup, Completion};
use super::entry::{Entry, RoundState};
use super::error::RegistryError;
use super::release::Release;
use super::store::Store;
use anyhow::Result;
use log::{debug, trace};
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

struct Shared<K, V, S> {
    store: RefCell<S>,
    create: Rc<dyn Fn(&K) -> Result<V>>,
    cleanup: Rc<dyn Cleanup<K>>,
    /// keys whose factory call has not returned yet
    creating: RefCell<Vec<K>>,
    /// last epoch handed to a cleanup round, shared by every key
    epoch: Cell<u64>,
}

/// Reference counted registry that lets a resource linger after its last release.
///
/// When the last reference to a key is released a cleanup round starts. The round removes
/// the key once it completes, unless the key was obtained again in the meantime, in which
/// case the round is aborted. Cloning a registry clones the handle, not the entries.
/// ```
/// # use linger::{AbortHandle, Completion, Registry};
/// let registry = Registry::with_hash_map(
///     |key: &String| Ok(key.len()),
///     |_key: &String, done: Completion| -> anyhow::Result<AbortHandle> {
///         done.complete();
///         Ok(AbortHandle::noop())
///     },
/// );
/// let (len, mut release) = registry.obtain("decoder".to_string()).unwrap();
/// assert_eq!(len, 7);
/// assert_eq!(registry.len(), 1);
/// release.release().unwrap();
/// assert!(registry.is_empty());
/// ```
pub struct Registry<K, V, S = HashMap<K, Entry<V>>> {
    shared: Rc<Shared<K, V, S>>,
}
impl<K, V, S> Clone for Registry<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
impl<K, V> Registry<K, V, HashMap<K, Entry<V>>>
where
    K: Eq + Hash + Clone + Debug + 'static,
    V: Clone + 'static,
{
    pub fn with_hash_map<F, C>(create: F, cleanup: C) -> Self
    where
        F: Fn(&K) -> Result<V> + 'static,
        C: Cleanup<K> + 'static,
    {
        Self::new(HashMap::new(), create, cleanup)
    }
}
impl<K, V, S> Registry<K, V, S>
where
    K: PartialEq + Clone + Debug + 'static,
    V: Clone + 'static,
    S: Store<K, V> + 'static,
{
    /// Builds a registry over `store`.
    ///
    /// `create` and `cleanup` may obtain and release other keys of the same registry.
    /// Asking for the key they are working on fails with [`RegistryError::Reentrant`].
    pub fn new<F, C>(store: S, create: F, cleanup: C) -> Self
    where
        F: Fn(&K) -> Result<V> + 'static,
        C: Cleanup<K> + 'static,
    {
        Self {
            shared: Rc::new(Shared {
                store: RefCell::new(store),
                create: Rc::new(create),
                cleanup: Rc::new(cleanup),
                creating: RefCell::new(Vec::new()),
                epoch: Cell::new(0),
            }),
        }
    }
    /// Gets the value stored under `key`, creating it if the key is not resident.
    ///
    /// A cleanup round pending for the key is aborted before the value is returned.
    pub fn obtain(&self, key: K) -> Result<(V, Release<K, V, S>), RegistryError> {
        let value = match self.revive(&key)? {
            Some(value) => value,
            None => self.create(&key)?,
        };
        self.check_state(&key);
        Ok((value, Release::new(self.clone(), key)))
    }
    pub fn len(&self) -> usize {
        self.shared.store.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.shared.store.borrow().is_empty()
    }
    pub fn contains(&self, key: &K) -> bool {
        self.shared.store.borrow().get(key).is_some()
    }
    pub fn ref_count(&self, key: &K) -> Option<usize> {
        self.shared.store.borrow().get(key).map(|entry| entry.ref_count())
    }
    pub fn round_state(&self, key: &K) -> Option<RoundState> {
        self.shared
            .store
            .borrow()
            .get(key)
            .map(|entry| entry.round_state())
    }
    /// Takes a reference on a resident entry. Returns `None` if the key is not resident.
    fn revive(&self, key: &K) -> Result<Option<V>, RegistryError> {
        let abort = {
            let mut store = self.shared.store.borrow_mut();
            let entry = match store.get_mut(key) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            if entry.ref_count() > 0 {
                entry.share();
                trace!("{:?} now has {} references", key, entry.ref_count());
                return Ok(Some(entry.value().clone()));
            }
            match entry.take_abort()? {
                Some(abort) => abort,
                None => {
                    entry.revive();
                    trace!("{:?} revived", key);
                    return Ok(Some(entry.value().clone()));
                }
            }
        };
        debug!("aborting pending cleanup of {:?}", key);
        abort.abort().map_err(RegistryError::Abort)?;
        // the round is cleared, so the next pass revives the entry directly
        self.revive(key)
    }
    fn create(&self, key: &K) -> Result<V, RegistryError> {
        if self.shared.creating.borrow().contains(key) {
            return Err(RegistryError::Reentrant);
        }
        self.shared.creating.borrow_mut().push(key.clone());
        let create = self.shared.create.clone();
        let value = (*create)(key);
        self.shared
            .creating
            .borrow_mut()
            .retain(|pending| pending != key);
        let value = value.map_err(RegistryError::Create)?;
        self.shared
            .store
            .borrow_mut()
            .set(key.clone(), Entry::new(value.clone()));
        debug!("created {:?}", key);
        Ok(value)
    }
    pub(crate) fn release_key(&self, key: &K) -> Result<(), RegistryError> {
        let epoch = {
            let mut store = self.shared.store.borrow_mut();
            let entry = match store.get_mut(key) {
                Some(entry) => entry,
                None => panic!("released key {:?} is not resident", key),
            };
            if !entry.drop_reference() {
                trace!("{:?} now has {} references", key, entry.ref_count());
                return Ok(());
            }
            let epoch = self.next_epoch();
            entry.begin_round(epoch);
            epoch
        };
        debug!("starting cleanup round {} for {:?}", epoch, key);
        let cleanup = self.shared.cleanup.clone();
        let result = cleanup.begin(key, self.completion(key.clone(), epoch));
        let mut store = self.shared.store.borrow_mut();
        let entry = store.get_mut(key);
        let result = match (result, entry) {
            (Err(err), entry) => {
                if let Some(entry) = entry {
                    entry.stall(epoch);
                }
                Err(RegistryError::Cleanup(err))
            }
            (Ok(abort), Some(entry)) => {
                match entry.publish_abort(epoch, abort) {
                    Ok(()) => debug!("cleanup round {} for {:?} in flight", epoch, key),
                    Err(_) => debug!("cleanup round {} for {:?} superseded", epoch, key),
                }
                Ok(())
            }
            (Ok(_), None) => {
                debug!("cleanup round {} for {:?} completed synchronously", epoch, key);
                Ok(())
            }
        };
        drop(store);
        self.check_state(key);
        result
    }
    fn completion(&self, key: K, epoch: u64) -> Completion {
        let shared = Rc::downgrade(&self.shared);
        Completion::new(move || {
            if let Some(shared) = shared.upgrade() {
                Registry { shared }.finish_round(&key, epoch);
            }
        })
    }
    /// Removes `key` if round `epoch` is still its current cleanup round.
    fn finish_round(&self, key: &K, epoch: u64) {
        let mut store = self.shared.store.borrow_mut();
        let current = store
            .get(key)
            .map_or(false, |entry| entry.is_current_round(epoch));
        if current {
            store.delete(key);
            debug!("cleanup round {} removed {:?}", epoch, key);
        } else {
            debug!("ignoring completion of stale round {} for {:?}", epoch, key);
        }
        drop(store);
        self.check_state(key);
    }
    fn next_epoch(&self) -> u64 {
        let epoch = self.shared.epoch.get() + 1;
        self.shared.epoch.set(epoch);
        epoch
    }
    /// Checks state. If state validation feature is enabled
    fn check_state(&self, key: &K) {
        cfg_if::cfg_if! {
            if #[cfg(feature = "state_validation")] {
                if let Some(entry) = self.shared.store.borrow().get(key) {
                    entry.check_state();
                }
            } else {
                let _ = key;
            }
        }
    }
}
