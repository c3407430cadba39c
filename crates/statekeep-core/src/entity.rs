/// Keyed entity access for stores whose state is a collection.
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// State made of entities addressed by id.
///
/// This is the minimal surface the keyed history tracker needs to read and
/// restore individual entities; it is not a CRUD API.
pub trait EntityState {
    type Id: Clone + Eq + Hash + Ord + Debug + 'static;
    type Entity: Clone + PartialEq + 'static;

    /// Ids of all entities currently present, in a stable order.
    fn ids(&self) -> Vec<Self::Id>;

    fn entity(&self, id: &Self::Id) -> Option<&Self::Entity>;

    fn upsert(&mut self, id: Self::Id, entity: Self::Entity);

    fn remove(&mut self, id: &Self::Id) -> Option<Self::Entity>;

    /// Writes `entity` under `id`, or removes the id when `entity` is `None`.
    fn put(&mut self, id: Self::Id, entity: Option<Self::Entity>) {
        match entity {
            Some(entity) => self.upsert(id, entity),
            None => {
                self.remove(&id);
            }
        }
    }
}

impl<K, V> EntityState for BTreeMap<K, V>
where
    K: Clone + Eq + Hash + Ord + Debug + 'static,
    V: Clone + PartialEq + 'static,
{
    type Id = K;
    type Entity = V;

    fn ids(&self) -> Vec<K> {
        self.keys().cloned().collect()
    }

    fn entity(&self, id: &K) -> Option<&V> {
        self.get(id)
    }

    fn upsert(&mut self, id: K, entity: V) {
        self.insert(id, entity);
    }

    fn remove(&mut self, id: &K) -> Option<V> {
        BTreeMap::remove(self, id)
    }
}

impl<K, V> EntityState for HashMap<K, V>
where
    K: Clone + Eq + Hash + Ord + Debug + 'static,
    V: Clone + PartialEq + 'static,
{
    type Id = K;
    type Entity = V;

    /// Sorted so fan-out order does not depend on hashing.
    fn ids(&self) -> Vec<K> {
        let mut ids: Vec<K> = self.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn entity(&self, id: &K) -> Option<&V> {
        self.get(id)
    }

    fn upsert(&mut self, id: K, entity: V) {
        self.insert(id, entity);
    }

    fn remove(&mut self, id: &K) -> Option<V> {
        HashMap::remove(self, id)
    }
}
