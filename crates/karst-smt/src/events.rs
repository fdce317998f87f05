use indexmap::IndexMap;

use karst_ir::events::{EventId, EventKind, EventStructure};

use crate::builder::{term_of, EncodeError};
use crate::profile;
use crate::terms::SmtTerm;

/// Solver symbol carrying the value observed by event `id`; the lowering
/// target of `Term::EventValue`.
pub fn event_value_name(id: EventId) -> String {
    format!("_val{id}")
}

/// Solver symbol for event `id`'s ordering point. All derived relations
/// constrain these shared integer points, so acyclicity of their union
/// follows from transitivity of `<`.
pub fn event_ord_name(id: EventId) -> String {
    format!("_ord{id}")
}

fn ord(id: EventId) -> SmtTerm {
    SmtTerm::cnst(event_ord_name(id))
}

fn val(id: EventId) -> SmtTerm {
    SmtTerm::cnst(event_value_name(id))
}

/// Semantic tag of a derived ordering relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelKind {
    ProgramOrder,
    Coherence,
    Fence,
}

/// A derived relation: ordered pairs of event ids under one tag. Derived
/// from the event structure at check time, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelKind,
    pub pairs: Vec<(EventId, EventId)>,
}

/// Derive program order, coherence order and fence relations from an
/// event structure.
pub fn derive_relations(events: &EventStructure) -> Vec<Relation> {
    vec![
        Relation {
            kind: RelKind::ProgramOrder,
            pairs: program_order(events),
        },
        Relation {
            kind: RelKind::Coherence,
            pairs: coherence_order(events),
        },
        Relation {
            kind: RelKind::Fence,
            pairs: fence_order(events),
        },
    ]
}

/// Consecutive pairs of each process's issue sequence.
fn program_order(events: &EventStructure) -> Vec<(EventId, EventId)> {
    let mut pairs = Vec::new();
    for (_, seq) in events.issue_sequences() {
        for w in seq.windows(2) {
            pairs.push((w[0], w[1]));
        }
    }
    pairs
}

/// Every pair of writes to one location. The pair stands for "the solver
/// must pick one of the two orders", lowered as a disjunction.
fn coherence_order(events: &EventStructure) -> Vec<(EventId, EventId)> {
    let mut by_location: IndexMap<&str, Vec<EventId>> = IndexMap::new();
    for event in events.events() {
        if event.kind == EventKind::Write {
            by_location
                .entry(event.location.as_str())
                .or_default()
                .push(event.id);
        }
    }
    let mut pairs = Vec::new();
    for writes in by_location.values() {
        for i in 0..writes.len() {
            for j in (i + 1)..writes.len() {
                pairs.push((writes[i], writes[j]));
            }
        }
    }
    pairs
}

/// Sequential-barrier fences: a fence is ordered after every program-order
/// predecessor and before every program-order successor in its process.
fn fence_order(events: &EventStructure) -> Vec<(EventId, EventId)> {
    let mut pairs = Vec::new();
    for (_, seq) in events.issue_sequences() {
        for (pos, &id) in seq.iter().enumerate() {
            let is_fence = events.get(id).map(|e| e.kind) == Some(EventKind::Fence);
            if !is_fence {
                continue;
            }
            for &before in &seq[..pos] {
                pairs.push((before, id));
            }
            for &after in &seq[pos + 1..] {
                pairs.push((id, after));
            }
        }
    }
    pairs
}

/// Lower the event structure into formula obligations: per-event
/// descriptors, the three relations, read-from candidates, and the
/// acyclicity obligation over the relation union.
///
/// Recomputed on every check: event structures differ per discovered node
/// even when atom sets coincide, so none of this is cached.
pub fn event_obligations(events: &EventStructure) -> Result<Vec<SmtTerm>, EncodeError> {
    profile::record_event_encode();
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for event in events.events() {
        out.push(SmtTerm::cnst(format!("_ekind{}", event.id)).eq(SmtTerm::int(kind_code(
            event.kind,
        ))));
        out.push(
            SmtTerm::cnst(format!("_eloc{}", event.id))
                .eq(SmtTerm::cnst(event.location.clone())),
        );
        if let Some(value) = &event.value {
            out.push(val(event.id).eq(term_of(value)?));
        }
    }

    let mut must_edges = Vec::new();
    for relation in derive_relations(events) {
        match relation.kind {
            RelKind::ProgramOrder | RelKind::Fence => {
                for (a, b) in &relation.pairs {
                    out.push(ord(*a).lt(ord(*b)));
                    must_edges.push((*a, *b));
                }
            }
            RelKind::Coherence => {
                for (a, b) in &relation.pairs {
                    out.push(SmtTerm::or(vec![
                        ord(*a).lt(ord(*b)),
                        ord(*b).lt(ord(*a)),
                    ]));
                }
            }
        }
    }

    out.extend(read_from_candidates(events));

    // Coherence edges share the ordering points above, so any orientation
    // closing a cycle with po/fence is already unsatisfiable; a cycle
    // among the must edges alone is decided here, over plain ids.
    if has_cycle(&must_edges) {
        out.push(SmtTerm::bool(false));
    }

    Ok(out)
}

/// Each read must observe the value of some same-location write ordered
/// before it. A location with no writes leaves its reads unconstrained:
/// they observe the initial value.
fn read_from_candidates(events: &EventStructure) -> Vec<SmtTerm> {
    let mut out = Vec::new();
    for read in events.events() {
        if read.kind != EventKind::Read {
            continue;
        }
        let candidates: Vec<SmtTerm> = events
            .events()
            .filter(|w| w.kind == EventKind::Write && w.location == read.location)
            .map(|w| {
                SmtTerm::and(vec![
                    val(read.id).eq(val(w.id)),
                    ord(w.id).lt(ord(read.id)),
                ])
            })
            .collect();
        if !candidates.is_empty() {
            out.push(SmtTerm::or(candidates));
        }
    }
    out
}

/// Depth-first cycle detection over the event-id edge list.
fn has_cycle(edges: &[(EventId, EventId)]) -> bool {
    let mut adjacency: IndexMap<EventId, Vec<EventId>> = IndexMap::new();
    for (a, b) in edges {
        adjacency.entry(*a).or_default().push(*b);
        adjacency.entry(*b).or_default();
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }
    let mut marks: IndexMap<EventId, Mark> =
        adjacency.keys().map(|&id| (id, Mark::White)).collect();

    for &start in adjacency.keys() {
        if marks[&start] != Mark::White {
            continue;
        }
        // (node, next child index) stack; grey on entry, black on exit.
        let mut stack = vec![(start, 0usize)];
        marks.insert(start, Mark::Grey);
        while let Some((node, child)) = stack.pop() {
            if child < adjacency[&node].len() {
                let next = adjacency[&node][child];
                stack.push((node, child + 1));
                match marks[&next] {
                    Mark::Grey => return true,
                    Mark::White => {
                        marks.insert(next, Mark::Grey);
                        stack.push((next, 0));
                    }
                    Mark::Black => {}
                }
            } else {
                marks.insert(node, Mark::Black);
            }
        }
    }
    false
}

fn kind_code(kind: EventKind) -> i64 {
    match kind {
        EventKind::Read => 0,
        EventKind::Write => 1,
        EventKind::Fence => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_ir::cube::ProcVar;
    use karst_ir::events::Event;
    use karst_ir::terms::Term;

    fn event(id: EventId, proc: usize, kind: EventKind, loc: &str, value: Option<i64>) -> Event {
        Event {
            id,
            proc: ProcVar(proc),
            kind,
            location: loc.into(),
            value: value.map(Term::int),
        }
    }

    fn relation(relations: &[Relation], kind: RelKind) -> &Relation {
        relations
            .iter()
            .find(|r| r.kind == kind)
            .expect("relation kind missing")
    }

    #[test]
    fn program_order_chains_consecutive_pairs_per_process() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        es.insert(event(1, 0, EventKind::Write, "x", Some(2)));
        es.insert(event(2, 1, EventKind::Write, "y", Some(3)));
        let rels = derive_relations(&es);
        assert_eq!(relation(&rels, RelKind::ProgramOrder).pairs, vec![(0, 1)]);
    }

    #[test]
    fn coherence_pairs_only_same_location_writes() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        es.insert(event(1, 1, EventKind::Write, "x", Some(2)));
        es.insert(event(2, 1, EventKind::Write, "y", Some(3)));
        es.insert(event(3, 0, EventKind::Read, "x", Some(1)));
        let rels = derive_relations(&es);
        assert_eq!(relation(&rels, RelKind::Coherence).pairs, vec![(0, 1)]);
    }

    #[test]
    fn fence_orders_across_predecessors_and_successors() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        es.insert(event(1, 0, EventKind::Fence, "", None));
        es.insert(event(2, 0, EventKind::Read, "x", Some(1)));
        let rels = derive_relations(&es);
        assert_eq!(relation(&rels, RelKind::Fence).pairs, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn must_edge_cycle_collapses_to_false() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        es.insert(event(1, 0, EventKind::Write, "x", Some(2)));
        // Re-issuing id 0 appends it to the sequence again: po edges
        // (0,1) and (1,0).
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        let obligations = event_obligations(&es).unwrap();
        assert!(obligations.contains(&SmtTerm::bool(false)));
    }

    #[test]
    fn acyclic_structure_has_no_false_obligation() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        es.insert(event(1, 0, EventKind::Write, "x", Some(2)));
        let obligations = event_obligations(&es).unwrap();
        assert!(!obligations.contains(&SmtTerm::bool(false)));
    }

    #[test]
    fn reads_are_constrained_by_candidate_writes() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Write, "x", Some(1)));
        es.insert(event(1, 1, EventKind::Read, "x", Some(1)));
        let obligations = event_obligations(&es).unwrap();
        let expected = SmtTerm::or(vec![SmtTerm::and(vec![
            val(1).eq(val(0)),
            ord(0).lt(ord(1)),
        ])]);
        assert!(obligations.contains(&expected));
    }

    #[test]
    fn reads_without_writes_observe_the_initial_value() {
        let mut es = EventStructure::new();
        es.insert(event(0, 0, EventKind::Read, "x", Some(7)));
        let obligations = event_obligations(&es).unwrap();
        assert!(!obligations.iter().any(|f| matches!(f, SmtTerm::Or(_))));
    }

    #[test]
    fn empty_structure_has_no_obligations() {
        assert!(event_obligations(&EventStructure::new()).unwrap().is_empty());
    }

    #[test]
    fn descriptor_binds_event_value() {
        let mut es = EventStructure::new();
        es.insert(event(3, 0, EventKind::Write, "x", Some(9)));
        let obligations = event_obligations(&es).unwrap();
        let expected = val(3).eq(SmtTerm::int(0).add(SmtTerm::int(9)));
        assert!(obligations.contains(&expected));
    }
}
