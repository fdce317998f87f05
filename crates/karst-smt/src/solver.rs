use karst_ir::events::EventStructure;

use crate::terms::SmtTerm;

/// Label attached to a removable assumption; the tag of the cube the
/// assumption encodes. Unsat cores are ordered lists of these labels.
pub type AssumptionLabel = u32;

/// Answer of a satisfiability check.
///
/// `Unsat` carries the justifying core: an ordered subset of the labeled
/// assumptions sufficient to derive unsatisfiability. A backend that cannot
/// decide (timeout, resource limit, incompleteness) must report an error;
/// treating `unknown` as either verdict would be unsound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatAnswer {
    Sat,
    Unsat(Vec<AssumptionLabel>),
}

/// Abstract incremental solver session.
///
/// One session exists per verifier process; the safety-check protocol is
/// its only driver. A session is cleared, populated with assumptions, then
/// asked to decide; assumptions added after a `clear` persist until the
/// next `clear`. Backends must support incremental assumption (no
/// re-elaboration of prior assumptions) and unsat-core extraction over the
/// labeled subset.
pub trait Solver {
    type Error: std::error::Error;

    /// Drop every assumption and start a fresh session.
    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Add an assumption. `Some(label)` makes it core-eligible; `None`
    /// marks it permanent for the session (invariants, init disjuncts).
    fn assume(&mut self, label: Option<AssumptionLabel>, formula: &SmtTerm)
        -> Result<(), Self::Error>;

    /// Same as [`assume`](Solver::assume), but also registers the event
    /// structure the formula's event-indexed terms refer to, so the
    /// backend can pre-declare or otherwise track them. The default
    /// ignores the context.
    fn assume_with_events(
        &mut self,
        _events: &EventStructure,
        label: Option<AssumptionLabel>,
        formula: &SmtTerm,
    ) -> Result<(), Self::Error> {
        self.assume(label, formula)
    }

    /// Decide satisfiability of the current session.
    fn check(&mut self) -> Result<SatAnswer, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FixedSolver {
        answer: SatAnswer,
        assumed: usize,
        event_contexts: usize,
    }

    impl FixedSolver {
        fn new(answer: SatAnswer) -> Self {
            Self {
                answer,
                assumed: 0,
                event_contexts: 0,
            }
        }
    }

    impl Solver for FixedSolver {
        type Error = io::Error;

        fn clear(&mut self) -> Result<(), Self::Error> {
            self.assumed = 0;
            Ok(())
        }

        fn assume(
            &mut self,
            _label: Option<AssumptionLabel>,
            _formula: &SmtTerm,
        ) -> Result<(), Self::Error> {
            self.assumed += 1;
            Ok(())
        }

        fn check(&mut self) -> Result<SatAnswer, Self::Error> {
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn default_assume_with_events_delegates_to_assume() {
        let mut solver = FixedSolver::new(SatAnswer::Sat);
        solver
            .assume_with_events(
                &EventStructure::new(),
                Some(7),
                &SmtTerm::bool(true),
            )
            .expect("assume should succeed");
        assert_eq!(solver.assumed, 1);
        assert_eq!(solver.event_contexts, 0);
    }

    #[test]
    fn unsat_answer_carries_ordered_core() {
        let mut solver = FixedSolver::new(SatAnswer::Unsat(vec![3, 1]));
        let answer = solver.check().expect("check should succeed");
        assert_eq!(answer, SatAnswer::Unsat(vec![3, 1]));
    }
}
