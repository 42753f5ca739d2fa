//! Source registry — what is exposed right now.

use std::collections::HashMap;

use super::Source;
use crate::object::ObjectKey;
use crate::types::{ConnectionId, ObjectName};

/// Mapping from exposed name to Source, plus object identity → name.
///
/// NOT a separate actor - owned by the broker and called via &mut self.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: HashMap<ObjectName, Source>,
    by_object: HashMap<ObjectKey, ObjectName>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Source> {
        self.sources.get_mut(name)
    }

    /// Name under which `key` is currently exposed.
    pub fn name_of(&self, key: ObjectKey) -> Option<&ObjectName> {
        self.by_object.get(&key)
    }

    /// Insert `source`, returning the Source it replaced under the same name.
    pub fn insert(&mut self, source: Source) -> Option<Source> {
        let name = source.name().clone();
        let replaced = self.remove(name.as_str());
        self.by_object.insert(source.key(), name.clone());
        self.sources.insert(name, source);
        replaced
    }

    pub fn remove(&mut self, name: &str) -> Option<Source> {
        let source = self.sources.remove(name)?;
        let key = source.key();
        if self.by_object.get(&key).is_some_and(|n| n.as_str() == name) {
            self.by_object.remove(&key);
        }
        Some(source)
    }

    pub fn remove_by_object(&mut self, key: ObjectKey) -> Option<Source> {
        let name = self.by_object.get(&key)?.clone();
        self.remove(name.as_str())
    }

    /// Exposed names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    /// Remove `connection` from every Source it listens to.
    ///
    /// Returns `(name, remaining listeners)` for each Source it was removed from.
    pub fn remove_listener_everywhere(&mut self, connection: ConnectionId) -> Vec<(ObjectName, usize)> {
        let mut removed = Vec::new();
        for (name, source) in self.sources.iter_mut() {
            if source.has_listener(connection) {
                let remaining = source.remove_listener(connection);
                removed.push((name.clone(), remaining));
            }
        }
        removed
    }

    /// Number of Sources `connection` listens to.
    pub fn subscriptions_of(&self, connection: ConnectionId) -> usize {
        self.sources
            .values()
            .filter(|s| s.has_listener(connection))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Take every Source out, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<Source> {
        self.by_object.clear();
        let mut sources: Vec<Source> = self.sources.drain().map(|(_, s)| s).collect();
        sources.sort_by(|a, b| a.name().cmp(b.name()));
        sources
    }
}
