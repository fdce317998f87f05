use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::cube::ProcVar;
use crate::terms::Term;

/// A unique identifier for a memory-access event. Events are referenced by
/// id everywhere; the owning `EventStructure` is the only place the event
/// itself lives.
pub type EventId = usize;

/// Kind of a memory-access event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Read,
    Write,
    Fence,
}

/// A single memory access issued by one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub id: EventId,
    pub proc: ProcVar,
    pub kind: EventKind,
    pub location: String,
    /// Observed (read) or stored (write) value; fences carry none.
    pub value: Option<Term>,
}

/// Arena of events indexed by id, with the per-process issue order.
///
/// The structure exclusively owns its events. Mutation is append-only
/// within one check: fresh events are merged in before the check runs,
/// never while one is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStructure {
    events: IndexMap<EventId, Event>,
    issue_order: IndexMap<ProcVar, Vec<EventId>>,
}

impl EventStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Insert an event and append it to its process's issue sequence.
    /// Ids are issued uniquely upstream; reusing one replaces the event
    /// but still appends to the issue order, which derives a program-order
    /// cycle the encoder will reject.
    pub fn insert(&mut self, event: Event) {
        self.issue_order
            .entry(event.proc)
            .or_default()
            .push(event.id);
        self.events.insert(event.id, event);
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    /// Per-process issue sequences (program order, one sequence each).
    pub fn issue_sequences(&self) -> impl Iterator<Item = (ProcVar, &[EventId])> {
        self.issue_order.iter().map(|(p, ids)| (*p, ids.as_slice()))
    }

    /// Union by event id; `other`'s issue sequences are appended to this
    /// structure's. Id collisions must not occur (ids are issued uniquely).
    pub fn merge(&mut self, other: &EventStructure) {
        for event in other.events.values() {
            self.events.insert(event.id, event.clone());
        }
        for (proc, ids) in &other.issue_order {
            self.issue_order
                .entry(*proc)
                .or_default()
                .extend(ids.iter().copied());
        }
    }

    /// Stable content fingerprint, used as part of the formula-cache key.
    /// Hashes events in id order plus the issue sequences, so structures
    /// with the same events and program order agree.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut ids: Vec<EventId> = self.events.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.events[&id].hash(&mut hasher);
        }
        let mut procs: Vec<ProcVar> = self.issue_order.keys().copied().collect();
        procs.sort_unstable();
        for proc in procs {
            proc.hash(&mut hasher);
            self.issue_order[&proc].hash(&mut hasher);
        }
        hasher.finish()
    }
}
