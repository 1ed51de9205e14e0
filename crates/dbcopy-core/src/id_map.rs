//! Session-scoped translation of source ids to destination ids.
//!
//! An [`IdMap`] lives for exactly one top-level copy and is dropped with it.
//! It only knows entities copied earlier in the same session; anything
//! else is resolved by natural key.

use std::collections::HashMap;
use std::hash::Hash;

use model_store::{RunId, SetId};

#[derive(Debug, Clone)]
pub struct IdMap<K, V> {
    map: HashMap<K, V>,
}

impl<K, V> Default for IdMap<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Copy> IdMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a translation. A later `put` for the same source id wins.
    pub fn put(&mut self, source: K, dest: V) {
        self.map.insert(source, dest);
    }

    pub fn get(&self, source: &K) -> Option<V> {
        self.map.get(source).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Id maps of one copy session.
#[derive(Debug, Clone, Default)]
pub struct SessionIds {
    pub runs: IdMap<RunId, RunId>,
    pub sets: IdMap<SetId, SetId>,
}

impl SessionIds {
    /// Destination run for an optional source id.
    pub fn run(&self, source: Option<RunId>) -> Option<RunId> {
        source.and_then(|id| self.runs.get(&id))
    }

    pub fn set(&self, source: Option<SetId>) -> Option<SetId> {
        source.and_then(|id| self.sets.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let mut ids = SessionIds::default();
        assert!(ids.runs.is_empty());
        ids.runs.put(RunId(11), RunId(101));
        ids.sets.put(SetId(3), SetId(7));

        assert_eq!(ids.run(Some(RunId(11))), Some(RunId(101)));
        assert_eq!(ids.run(Some(RunId(12))), None);
        assert_eq!(ids.run(None), None);
        assert_eq!(ids.set(Some(SetId(3))), Some(SetId(7)));
        assert_eq!(ids.runs.len(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let mut map: IdMap<RunId, RunId> = IdMap::new();
        map.put(RunId(1), RunId(2));
        map.put(RunId(1), RunId(3));
        assert_eq!(map.get(&RunId(1)), Some(RunId(3)));
        assert_eq!(map.len(), 1);
    }
}
