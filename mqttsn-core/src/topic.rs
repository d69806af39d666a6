//! Topic Registry: bidirectional topic-name <-> topic-id mapping.
//!
//! Predefined ids are resolved through the static table seeded at
//! construction and are never touched by `upsert`; everything else is
//! populated by REGISTER/REGACK exchanges and cleared on a clean-session
//! reconnect.

use std::collections::HashMap;

use crate::types::TopicIdType;

/// A registered topic: its id and the wire representation it was assigned under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicEntry {
    pub id: u16,
    pub kind: TopicIdType,
}

#[derive(Debug)]
pub struct TopicRegistry {
    by_name: HashMap<String, TopicEntry>,
    by_id: HashMap<(TopicIdType, u16), String>,
    predefined: &'static [(u16, &'static str)],
}

impl TopicRegistry {
    pub fn new(predefined: &'static [(u16, &'static str)]) -> Self {
        TopicRegistry {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            predefined,
        }
    }

    fn predefined_id(&self, name: &str) -> Option<u16> {
        self.predefined
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(id, _)| *id)
    }

    fn predefined_name(&self, id: u16) -> Option<&'static str> {
        self.predefined
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, n)| *n)
    }

    /// Resolve `name` to its topic id, checking the predefined table first.
    pub fn lookup_id(&self, name: &str) -> Option<u16> {
        self.predefined_id(name)
            .or_else(|| self.by_name.get(name).map(|e| e.id))
    }

    /// Resolve `(kind, id)` back to the name it was registered under.
    pub fn lookup_name(&self, kind: TopicIdType, id: u16) -> Option<&str> {
        if kind == TopicIdType::Predefined {
            return self.predefined_name(id);
        }
        self.by_id.get(&(kind, id)).map(String::as_str)
    }

    /// Record that `name` now resolves to `(id, kind)`. A no-op for ids that
    /// belong to the predefined table: those are immutable after construction.
    pub fn upsert(&mut self, name: &str, id: u16, kind: TopicIdType) {
        if kind == TopicIdType::Predefined {
            return;
        }

        if let Some(prev) = self.by_name.get(name).copied() {
            if prev.id != id || prev.kind != kind {
                self.by_id.remove(&(prev.kind, prev.id));
            }
        }
        if let Some(prev_name) = self.by_id.get(&(kind, id)).cloned() {
            if prev_name != name {
                self.by_name.remove(&prev_name);
            }
        }

        self.by_name.insert(name.to_owned(), TopicEntry { id, kind });
        self.by_id.insert((kind, id), name.to_owned());
    }

    /// Drop all dynamically registered entries. The predefined table survives.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
    }
}
