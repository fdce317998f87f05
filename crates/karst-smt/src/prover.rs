use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::{debug, info};

use karst_ir::cube::{Cube, ProcVar};
use karst_ir::events::EventStructure;
use karst_ir::terms::Atom;

use crate::builder::{conjunction_of, EncodeError};
use crate::cache::FormulaCache;
use crate::constraints::{ConstraintTables, Structural};
use crate::events::event_obligations;
use crate::profile;
use crate::solver::{AssumptionLabel, SatAnswer, Solver};
use crate::terms::SmtTerm;

/// Failure of a safety check. No retries, no recovery: every failure
/// surfaces to the caller, and a corrupted backend session is never
/// reused.
#[derive(Debug, Error)]
pub enum CheckError<E: std::error::Error> {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("solver backend failure: {0}")]
    Backend(E),
    #[error("no initial-state instances registered for {count} processes")]
    MissingInitInstances { count: usize },
    #[error("cube quantifies {count} process variables but the constraint tables stop at {max}")]
    ProcCountExceeded { count: usize, max: usize },
}

/// Outcome of a safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The candidate is unreachable from every initial-state disjunct;
    /// `core` is the ordered, deduplicated union of the per-disjunct
    /// unsat cores.
    Unreachable { core: Vec<AssumptionLabel> },
    /// Some disjunct reaches the candidate. Terminates the calling search
    /// branch; no core accompanies it.
    Reachable,
}

/// Initial states and invariants for one process count: a conjunction of
/// DNFs (every DNF must be refuted) plus the invariants applicable at
/// that count. Produced upstream, consumed here.
#[derive(Debug, Clone, Default)]
pub struct InitEntry {
    pub cdnf: Vec<Vec<SmtTerm>>,
    pub invariants: Vec<SmtTerm>,
}

/// Per-process-count table of initial-state instances.
#[derive(Debug, Clone, Default)]
pub struct InitInstances {
    by_count: IndexMap<usize, InitEntry>,
}

impl InitInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, count: usize, entry: InitEntry) {
        self.by_count.insert(count, entry);
    }

    pub fn entry(&self, count: usize) -> Option<&InitEntry> {
        self.by_count.get(&count)
    }
}

/// Lower one init disjunct (an atom conjunction) for table construction.
pub fn encode_disjunct<'a>(
    atoms: impl IntoIterator<Item = &'a Atom>,
) -> Result<SmtTerm, EncodeError> {
    conjunction_of(atoms, &[])
}

/// The safety-check protocol: drives the solver session through
/// `Idle → Loaded → Decided` for each query. Owns nothing itself: the
/// session, constraint tables and formula cache are passed in by the
/// verifier context that owns them, with single-writer discipline left to
/// that host.
pub struct Prover<'a, S: Solver> {
    solver: &'a mut S,
    tables: &'a ConstraintTables,
    cache: &'a mut FormulaCache,
    structural: Structural,
}

impl<'a, S: Solver> Prover<'a, S> {
    pub fn new(
        solver: &'a mut S,
        tables: &'a ConstraintTables,
        cache: &'a mut FormulaCache,
    ) -> Self {
        Self {
            solver,
            tables,
            cache,
            structural: Structural::Distinct,
        }
    }

    /// Use the symmetry-breaking total order instead of plain
    /// distinctness for cube checks.
    pub fn with_structural(mut self, structural: Structural) -> Self {
        self.structural = structural;
        self
    }

    /// Prove the candidate `node` unreachable from every disjunct of one
    /// initial-state DNF, or report reachability. Fresh events are merged
    /// into the node before anything is encoded.
    pub fn unsafe_dnf(
        &mut self,
        node: &mut Cube,
        fresh: &EventStructure,
        invariants: &[SmtTerm],
        dnf: &[SmtTerm],
    ) -> Result<Verdict, CheckError<S::Error>> {
        node.merge_events(fresh);
        self.check_dnf(node, invariants, dnf)
    }

    /// Prove the candidate unreachable at its instantiated process count:
    /// one `unsafe_dnf` pass per DNF registered for that count, with the
    /// count's invariants. Reachability short-circuits; cores union.
    pub fn unsafe_cdnf(
        &mut self,
        node: &mut Cube,
        fresh: &EventStructure,
        inits: &InitInstances,
    ) -> Result<Verdict, CheckError<S::Error>> {
        let count = node.vars().len();
        let entry = inits
            .entry(count)
            .ok_or(CheckError::MissingInitInstances { count })?;
        node.merge_events(fresh);

        let mut core: IndexSet<AssumptionLabel> = IndexSet::new();
        for dnf in &entry.cdnf {
            match self.check_dnf(node, &entry.invariants, dnf)? {
                Verdict::Reachable => {
                    info!(tag = node.tag(), count, "candidate state is reachable");
                    return Ok(Verdict::Reachable);
                }
                Verdict::Unreachable { core: part } => core.extend(part),
            }
        }
        info!(tag = node.tag(), count, "candidate state proved unreachable");
        Ok(Verdict::Unreachable {
            core: core.into_iter().collect(),
        })
    }

    fn check_dnf(
        &mut self,
        node: &Cube,
        invariants: &[SmtTerm],
        dnf: &[SmtTerm],
    ) -> Result<Verdict, CheckError<S::Error>> {
        let tag = node.tag();
        let structural = self.structural_for(node.vars().len())?;
        let obligations = event_obligations(node.events())?;
        let formula = self.cache.get_or_build(node, &obligations)?;

        let mut core: IndexSet<AssumptionLabel> = IndexSet::new();
        for (idx, disjunct) in dnf.iter().enumerate() {
            debug!(tag, disjunct = idx, "checking candidate against init disjunct");
            self.solver.clear().map_err(CheckError::Backend)?;
            self.solver
                .assume(Some(tag), &structural)
                .map_err(CheckError::Backend)?;
            for invariant in invariants {
                self.solver
                    .assume(None, invariant)
                    .map_err(CheckError::Backend)?;
            }
            self.solver
                .assume_with_events(node.events(), Some(tag), &formula)
                .map_err(CheckError::Backend)?;
            self.solver
                .assume(None, disjunct)
                .map_err(CheckError::Backend)?;

            match self.decide()? {
                SatAnswer::Sat => {
                    debug!(tag, disjunct = idx, "init disjunct reaches the candidate");
                    return Ok(Verdict::Reachable);
                }
                SatAnswer::Unsat(part) => core.extend(part),
            }
        }
        Ok(Verdict::Unreachable {
            core: core.into_iter().collect(),
        })
    }

    /// Is `region`, unioned with the reference state's atoms, satisfiable
    /// under distinctness for the given variable count?
    pub fn reached(
        &mut self,
        vars: &[ProcVar],
        region: &[Atom],
        state: &Cube,
    ) -> Result<bool, CheckError<S::Error>> {
        let distinct = self
            .tables
            .distinct(vars.len())
            .cloned()
            .ok_or(CheckError::ProcCountExceeded {
                count: vars.len(),
                max: self.tables.max_procs(),
            })?;
        let formula = conjunction_of(region.iter().chain(state.atoms().iter()), &[])?;
        self.one_shot(&distinct, &formula)
    }

    /// Is the requirement, conjoined with the region's atoms, satisfiable?
    pub fn check_guard(
        &mut self,
        vars: &[ProcVar],
        state: &[Atom],
        requirement: &[Atom],
    ) -> Result<bool, CheckError<S::Error>> {
        let distinct = self
            .tables
            .distinct(vars.len())
            .cloned()
            .ok_or(CheckError::ProcCountExceeded {
                count: vars.len(),
                max: self.tables.max_procs(),
            })?;
        let formula = conjunction_of(requirement.iter().chain(state.iter()), &[])?;
        self.one_shot(&distinct, &formula)
    }

    fn one_shot(
        &mut self,
        distinct: &SmtTerm,
        formula: &SmtTerm,
    ) -> Result<bool, CheckError<S::Error>> {
        self.solver.clear().map_err(CheckError::Backend)?;
        self.solver
            .assume(None, distinct)
            .map_err(CheckError::Backend)?;
        self.solver
            .assume(None, formula)
            .map_err(CheckError::Backend)?;
        Ok(matches!(self.decide()?, SatAnswer::Sat))
    }

    /// Clear and reseed the session with the goal's structural constraint
    /// and event-aware formula, deferring the decision. The returned
    /// handle is the only way to `check`: a session can only be decided
    /// once populated.
    pub fn assume_goal<'p>(
        &'p mut self,
        goal: &mut Cube,
        fresh: &EventStructure,
    ) -> Result<GoalSession<'p, 'a, S>, CheckError<S::Error>> {
        goal.merge_events(fresh);
        let tag = goal.tag();
        let structural = self.structural_for(goal.vars().len())?;
        let obligations = event_obligations(goal.events())?;
        let formula = self.cache.get_or_build(goal, &obligations)?;

        debug!(tag, "loading goal into session");
        self.solver.clear().map_err(CheckError::Backend)?;
        self.solver
            .assume(Some(tag), &structural)
            .map_err(CheckError::Backend)?;
        self.solver
            .assume_with_events(goal.events(), Some(tag), &formula)
            .map_err(CheckError::Backend)?;
        Ok(GoalSession { prover: self })
    }

    /// Load a goal, then fold in already-known nodes as negated side
    /// constraints: one session build for a multi-constraint query.
    pub fn assume_goal_nodes<'p>(
        &'p mut self,
        goal: &mut Cube,
        fresh: &EventStructure,
        nodes: &[Cube],
    ) -> Result<GoalSession<'p, 'a, S>, CheckError<S::Error>> {
        let mut session = self.assume_goal(goal, fresh)?;
        for node in nodes {
            session.assume_node(node)?;
        }
        Ok(session)
    }

    fn structural_for(&self, count: usize) -> Result<SmtTerm, CheckError<S::Error>> {
        self.tables
            .structural(self.structural, count)
            .cloned()
            .ok_or(CheckError::ProcCountExceeded {
                count,
                max: self.tables.max_procs(),
            })
    }

    fn decide(&mut self) -> Result<SatAnswer, CheckError<S::Error>> {
        let started = Instant::now();
        let answer = self.solver.check().map_err(CheckError::Backend);
        profile::record_check(started.elapsed().as_micros());
        answer
    }
}

/// A populated incremental session: the goal is loaded, further node
/// constraints may be folded in, and the decision is deferred to the
/// caller.
pub struct GoalSession<'p, 'a, S: Solver> {
    prover: &'p mut Prover<'a, S>,
}

impl<S: Solver> GoalSession<'_, '_, S> {
    /// Assume the negation of a previously-discovered node's formula into
    /// the live session (no clear), ruling out an already-covered region.
    pub fn assume_node(&mut self, node: &Cube) -> Result<(), CheckError<S::Error>> {
        let obligations = event_obligations(node.events())?;
        let formula = self.prover.cache.get_or_build(node, &obligations)?;
        self.prover
            .solver
            .assume(Some(node.tag()), &(*formula).clone().not())
            .map_err(CheckError::Backend)
    }

    /// Decide the session as populated so far.
    pub fn check(&mut self) -> Result<SatAnswer, CheckError<S::Error>> {
        self.prover.decide()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    use karst_ir::cube::proc_vars;
    use karst_ir::terms::Term;

    use crate::builder::proc_term;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Clear,
        Assume {
            label: Option<AssumptionLabel>,
            formula: SmtTerm,
        },
        AssumeEvents {
            label: Option<AssumptionLabel>,
            formula: SmtTerm,
        },
        Check,
    }

    /// Records the full op sequence and replays scripted answers.
    struct ScriptedSolver {
        ops: Vec<Op>,
        answers: VecDeque<SatAnswer>,
    }

    impl ScriptedSolver {
        fn new(answers: impl IntoIterator<Item = SatAnswer>) -> Self {
            Self {
                ops: Vec::new(),
                answers: answers.into_iter().collect(),
            }
        }

        fn checks(&self) -> usize {
            self.ops.iter().filter(|op| **op == Op::Check).count()
        }
    }

    impl Solver for ScriptedSolver {
        type Error = io::Error;

        fn clear(&mut self) -> Result<(), Self::Error> {
            self.ops.push(Op::Clear);
            Ok(())
        }

        fn assume(
            &mut self,
            label: Option<AssumptionLabel>,
            formula: &SmtTerm,
        ) -> Result<(), Self::Error> {
            self.ops.push(Op::Assume {
                label,
                formula: formula.clone(),
            });
            Ok(())
        }

        fn assume_with_events(
            &mut self,
            _events: &EventStructure,
            label: Option<AssumptionLabel>,
            formula: &SmtTerm,
        ) -> Result<(), Self::Error> {
            self.ops.push(Op::AssumeEvents {
                label,
                formula: formula.clone(),
            });
            Ok(())
        }

        fn check(&mut self) -> Result<SatAnswer, Self::Error> {
            self.ops.push(Op::Check);
            self.answers.pop_front().ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted")
            })
        }
    }

    fn atom(name: &str, k: i64) -> Atom {
        Atom::eq(Term::elem(name), Term::int(k))
    }

    fn node(tag: u32, procs: usize, atoms: Vec<Atom>) -> Cube {
        Cube::new(tag, proc_vars(procs), atoms, EventStructure::new())
    }

    fn disjunct(name: &str, k: i64) -> SmtTerm {
        encode_disjunct([&atom(name, k)]).unwrap()
    }

    #[test]
    fn unsafe_dnf_aggregates_cores_across_disjuncts() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([
            SatAnswer::Unsat(vec![1, 2]),
            SatAnswer::Unsat(vec![2, 3]),
        ]);
        let mut prover = Prover::new(&mut solver, &tables, &mut cache);

        let mut cube = node(1, 1, vec![atom("x", 0)]);
        let verdict = prover
            .unsafe_dnf(
                &mut cube,
                &EventStructure::new(),
                &[],
                &[disjunct("x", 1), disjunct("x", 2)],
            )
            .unwrap();
        assert_eq!(verdict, Verdict::Unreachable { core: vec![1, 2, 3] });
        assert_eq!(solver.checks(), 2);
    }

    #[test]
    fn unsafe_dnf_short_circuits_on_reachability() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([SatAnswer::Unsat(vec![1]), SatAnswer::Sat]);
        let mut prover = Prover::new(&mut solver, &tables, &mut cache);

        let mut cube = node(1, 1, vec![atom("x", 0)]);
        let verdict = prover
            .unsafe_dnf(
                &mut cube,
                &EventStructure::new(),
                &[],
                &[disjunct("x", 1), disjunct("x", 2), disjunct("x", 3)],
            )
            .unwrap();
        assert_eq!(verdict, Verdict::Reachable);
        // The third disjunct is never evaluated.
        assert_eq!(solver.checks(), 2);
    }

    #[test]
    fn disjunct_loop_labels_only_the_cube() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([SatAnswer::Unsat(vec![7])]);
        let mut prover = Prover::new(&mut solver, &tables, &mut cache);

        let invariant = SmtTerm::cnst("inv").le(SmtTerm::int(5));
        let mut cube = node(7, 2, vec![atom("x", 0)]);
        prover
            .unsafe_dnf(
                &mut cube,
                &EventStructure::new(),
                std::slice::from_ref(&invariant),
                &[disjunct("x", 1)],
            )
            .unwrap();

        let labels: Vec<Option<AssumptionLabel>> = solver
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Assume { label, .. } | Op::AssumeEvents { label, .. } => Some(*label),
                _ => None,
            })
            .collect();
        // structural (labeled), invariant (permanent), cube formula
        // (labeled), init disjunct (permanent).
        assert_eq!(labels, vec![Some(7), None, Some(7), None]);
    }

    #[test]
    fn unsafe_cdnf_requires_an_init_entry() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([]);
        let mut prover = Prover::new(&mut solver, &tables, &mut cache);

        let mut cube = node(1, 2, vec![atom("x", 0)]);
        let err = prover
            .unsafe_cdnf(&mut cube, &EventStructure::new(), &InitInstances::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::MissingInitInstances { count: 2 }
        ));
    }

    #[test]
    fn unsafe_cdnf_unions_cores_over_the_cdnf() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([
            SatAnswer::Unsat(vec![4]),
            SatAnswer::Unsat(vec![4, 9]),
        ]);
        let mut prover = Prover::new(&mut solver, &tables, &mut cache);

        let mut inits = InitInstances::new();
        inits.insert(
            1,
            InitEntry {
                cdnf: vec![vec![disjunct("x", 1)], vec![disjunct("x", 2)]],
                invariants: Vec::new(),
            },
        );

        let mut cube = node(4, 1, vec![atom("x", 0)]);
        let verdict = prover
            .unsafe_cdnf(&mut cube, &EventStructure::new(), &inits)
            .unwrap();
        assert_eq!(verdict, Verdict::Unreachable { core: vec![4, 9] });
    }

    #[test]
    fn proc_count_beyond_tables_is_an_error() {
        let tables = ConstraintTables::new(1);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([]);
        let mut prover = Prover::new(&mut solver, &tables, &mut cache);

        let mut cube = node(1, 3, vec![atom("x", 0)]);
        let err = prover
            .unsafe_dnf(&mut cube, &EventStructure::new(), &[], &[disjunct("x", 1)])
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::ProcCountExceeded { count: 3, max: 1 }
        ));
    }

    #[test]
    fn assume_goal_is_idempotent_across_clears() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([]);

        let mut goal = node(3, 2, vec![atom("x", 1)]);
        {
            let mut prover = Prover::new(&mut solver, &tables, &mut cache);
            prover
                .assume_goal(&mut goal, &EventStructure::new())
                .unwrap();
            prover
                .assume_goal(&mut goal, &EventStructure::new())
                .unwrap();
        }
        let half = solver.ops.len() / 2;
        assert_eq!(solver.ops[..half], solver.ops[half..]);
    }

    #[test]
    fn assume_goal_nodes_folds_in_negated_nodes() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([SatAnswer::Unsat(vec![3, 8])]);

        let mut goal = node(3, 1, vec![atom("x", 1)]);
        let known = node(8, 1, vec![atom("x", 2)]);
        let expected_negation = {
            let mut probe = FormulaCache::new();
            let formula = probe.get_or_build(&known, &[]).unwrap();
            (*formula).clone().not()
        };

        {
            let mut prover = Prover::new(&mut solver, &tables, &mut cache);
            let mut session = prover
                .assume_goal_nodes(&mut goal, &EventStructure::new(), &[known])
                .unwrap();
            let answer = session.check().unwrap();
            assert_eq!(answer, SatAnswer::Unsat(vec![3, 8]));
        }

        assert!(solver.ops.contains(&Op::Assume {
            label: Some(8),
            formula: expected_negation,
        }));
        assert_eq!(solver.checks(), 1);
    }

    #[test]
    fn reached_runs_a_single_clear_assume_check_cycle() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([SatAnswer::Sat]);

        let state = node(1, 1, vec![atom("x", 1)]);
        let sat = {
            let mut prover = Prover::new(&mut solver, &tables, &mut cache);
            prover.reached(&proc_vars(1), &[], &state).unwrap()
        };
        assert!(sat);

        assert_eq!(solver.ops[0], Op::Clear);
        assert_eq!(
            solver.ops[1],
            Op::Assume {
                label: None,
                formula: SmtTerm::bool(true),
            }
        );
        assert!(matches!(solver.ops[2], Op::Assume { label: None, .. }));
        assert_eq!(solver.ops[3], Op::Check);
        assert_eq!(solver.ops.len(), 4);
    }

    #[test]
    fn check_guard_reports_unsat_as_false() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([SatAnswer::Unsat(vec![])]);

        let sat = {
            let mut prover = Prover::new(&mut solver, &tables, &mut cache);
            prover
                .check_guard(&proc_vars(2), &[atom("x", 1)], &[atom("x", 2)])
                .unwrap()
        };
        assert!(!sat);
    }

    #[test]
    fn total_order_structural_is_selectable() {
        let tables = ConstraintTables::new(2);
        let mut cache = FormulaCache::new();
        let mut solver = ScriptedSolver::new([SatAnswer::Unsat(vec![])]);

        let mut cube = node(1, 2, vec![atom("x", 0)]);
        {
            let mut prover = Prover::new(&mut solver, &tables, &mut cache)
                .with_structural(Structural::TotalOrder);
            prover
                .unsafe_dnf(&mut cube, &EventStructure::new(), &[], &[disjunct("x", 1)])
                .unwrap();
        }
        let expected = proc_term(karst_ir::cube::ProcVar(0))
            .lt(proc_term(karst_ir::cube::ProcVar(1)));
        assert!(solver.ops.contains(&Op::Assume {
            label: Some(1),
            formula: expected,
        }));
    }
}
