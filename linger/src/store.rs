use super::entry::Entry;
use std::{
    collections::{BTreeMap, HashMap},
    hash::{BuildHasher, Hash},
};

/// Backing storage for registry entries.
pub trait Store<K, V> {
    fn get(&self, key: &K) -> Option<&Entry<V>>;
    fn get_mut(&mut self, key: &K) -> Option<&mut Entry<V>>;
    fn set(&mut self, key: K, entry: Entry<V>);
    /// Removes the entry under `key`, returning whether one was present
    fn delete(&mut self, key: &K) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl<K: Eq + Hash, V, H: BuildHasher> Store<K, V> for HashMap<K, Entry<V>, H> {
    fn get(&self, key: &K) -> Option<&Entry<V>> {
        HashMap::get(self, key)
    }
    fn get_mut(&mut self, key: &K) -> Option<&mut Entry<V>> {
        HashMap::get_mut(self, key)
    }
    fn set(&mut self, key: K, entry: Entry<V>) {
        self.insert(key, entry);
    }
    fn delete(&mut self, key: &K) -> bool {
        self.remove(key).is_some()
    }
    fn len(&self) -> usize {
        HashMap::len(self)
    }
}
impl<K: Ord, V> Store<K, V> for BTreeMap<K, Entry<V>> {
    fn get(&self, key: &K) -> Option<&Entry<V>> {
        BTreeMap::get(self, key)
    }
    fn get_mut(&mut self, key: &K) -> Option<&mut Entry<V>> {
        BTreeMap::get_mut(self, key)
    }
    fn set(&mut self, key: K, entry: Entry<V>) {
        self.insert(key, entry);
    }
    fn delete(&mut self, key: &K) -> bool {
        self.remove(key).is_some()
    }
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}
