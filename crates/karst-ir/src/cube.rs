use std::collections::BTreeSet;
use std::fmt;

use crate::events::EventStructure;
use crate::terms::Atom;

/// A symbolic process variable, standing for an arbitrary anonymous
/// process. Variables are drawn from a fixed global pool; the `i`-th
/// variable has the solver name `#<i+1>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcVar(pub usize);

impl ProcVar {
    /// Solver-level symbol for this variable.
    pub fn name(&self) -> String {
        format!("#{}", self.0 + 1)
    }
}

impl fmt::Display for ProcVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0 + 1)
    }
}

/// The first `n` process variables.
pub fn proc_vars(n: usize) -> Vec<ProcVar> {
    (0..n).map(ProcVar).collect()
}

/// A tagged conjunction of atoms over a list of free process variables,
/// with an attached weak-memory event structure.
///
/// Atoms are held both with set semantics (insertion order irrelevant,
/// duplicates merged) and as a canonical ordered, deduplicated array. Two
/// cubes with equal canonical arrays are encoding-equivalent and share one
/// cached formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cube {
    tag: u32,
    vars: Vec<ProcVar>,
    atoms: BTreeSet<Atom>,
    canon: Vec<Atom>,
    events: EventStructure,
}

impl Cube {
    pub fn new(
        tag: u32,
        vars: Vec<ProcVar>,
        atoms: impl IntoIterator<Item = Atom>,
        events: EventStructure,
    ) -> Self {
        let atoms: BTreeSet<Atom> = atoms.into_iter().collect();
        let canon: Vec<Atom> = atoms.iter().cloned().collect();
        Self {
            tag,
            vars,
            atoms,
            canon,
            events,
        }
    }

    /// Identifier used to label this cube's assumptions in the solver.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Free process variables quantified by this cube.
    pub fn vars(&self) -> &[ProcVar] {
        &self.vars
    }

    pub fn atoms(&self) -> &BTreeSet<Atom> {
        &self.atoms
    }

    /// Canonical ordered, deduplicated atom array; the cache key.
    pub fn canonical_atoms(&self) -> &[Atom] {
        &self.canon
    }

    pub fn events(&self) -> &EventStructure {
        &self.events
    }

    /// Merge freshly-introduced events into this cube's event structure.
    /// Append-only; must not run while a check on this cube is in flight.
    pub fn merge_events(&mut self, fresh: &EventStructure) {
        self.events.merge(fresh);
    }
}
