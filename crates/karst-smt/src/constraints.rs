use karst_ir::cube::ProcVar;

use crate::builder::proc_term;
use crate::terms::SmtTerm;

/// Which structural side-constraint to impose on the instantiated process
/// variables of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Structural {
    /// Pairwise distinctness: sound over anonymous processes, permutation
    /// symmetry left to the solver.
    #[default]
    Distinct,
    /// Strict total order: symmetry-breaking alternative, one
    /// representative per permutation class.
    TotalOrder,
}

/// Precomputed structural constraints, one per process count `0..=max`.
///
/// Two textually distinct process variables may legally denote the same
/// concrete process; without the distinctness conjunction the solver could
/// satisfy a cube by aliasing them, turning unreachable states reachable.
/// Both families are pure functions of the count, so they are built once
/// and memoized for the life of the verifier process.
#[derive(Debug, Clone)]
pub struct ConstraintTables {
    max_procs: usize,
    distinct: Vec<SmtTerm>,
    order: Vec<SmtTerm>,
}

impl ConstraintTables {
    pub fn new(max_procs: usize) -> Self {
        let distinct = (0..=max_procs).map(distinct_formula).collect();
        let order = (0..=max_procs).map(order_formula).collect();
        Self {
            max_procs,
            distinct,
            order,
        }
    }

    pub fn max_procs(&self) -> usize {
        self.max_procs
    }

    /// Pairwise distinctness over the first `n` process variables.
    /// `None` when `n` exceeds the table bound.
    pub fn distinct(&self, n: usize) -> Option<&SmtTerm> {
        self.distinct.get(n)
    }

    /// Strict total order over the first `n` process variables.
    pub fn total_order(&self, n: usize) -> Option<&SmtTerm> {
        self.order.get(n)
    }

    pub fn structural(&self, kind: Structural, n: usize) -> Option<&SmtTerm> {
        match kind {
            Structural::Distinct => self.distinct(n),
            Structural::TotalOrder => self.total_order(n),
        }
    }
}

fn distinct_formula(n: usize) -> SmtTerm {
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push(proc_term(ProcVar(i)).neq(proc_term(ProcVar(j))));
        }
    }
    collapse(pairs)
}

fn order_formula(n: usize) -> SmtTerm {
    let mut links = Vec::new();
    for i in 1..n {
        links.push(proc_term(ProcVar(i - 1)).lt(proc_term(ProcVar(i))));
    }
    collapse(links)
}

fn collapse(mut parts: Vec<SmtTerm>) -> SmtTerm {
    match parts.len() {
        0 => SmtTerm::bool(true),
        1 => parts.remove(0),
        _ => SmtTerm::and(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_one_process_constraints_are_true() {
        let tables = ConstraintTables::new(3);
        assert_eq!(tables.distinct(0), Some(&SmtTerm::bool(true)));
        assert_eq!(tables.distinct(1), Some(&SmtTerm::bool(true)));
        assert_eq!(tables.total_order(0), Some(&SmtTerm::bool(true)));
        assert_eq!(tables.total_order(1), Some(&SmtTerm::bool(true)));
    }

    #[test]
    fn distinctness_covers_every_pair() {
        let tables = ConstraintTables::new(4);
        match tables.distinct(4) {
            Some(SmtTerm::And(pairs)) => assert_eq!(pairs.len(), 6),
            other => panic!("expected a pair conjunction, got {other:?}"),
        }
    }

    #[test]
    fn two_process_distinctness_is_a_single_disequality() {
        let tables = ConstraintTables::new(2);
        let expected = proc_term(ProcVar(0)).neq(proc_term(ProcVar(1)));
        assert_eq!(tables.distinct(2), Some(&expected));
    }

    #[test]
    fn total_order_chains_consecutive_variables() {
        let tables = ConstraintTables::new(3);
        let expected = SmtTerm::and(vec![
            proc_term(ProcVar(0)).lt(proc_term(ProcVar(1))),
            proc_term(ProcVar(1)).lt(proc_term(ProcVar(2))),
        ]);
        assert_eq!(tables.total_order(3), Some(&expected));
    }

    #[test]
    fn lookups_beyond_the_bound_are_none() {
        let tables = ConstraintTables::new(2);
        assert_eq!(tables.distinct(3), None);
        assert_eq!(tables.total_order(3), None);
    }
}
