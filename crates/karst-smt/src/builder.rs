use std::time::Instant;

use num::rational::Rational64;
use num::Zero;
use thiserror::Error;

use karst_ir::cube::ProcVar;
use karst_ir::terms::{Atom, CmpOp, ConstBase, LinCombo, Term};

use crate::events::event_value_name;
use crate::profile;
use crate::terms::SmtTerm;

/// Encoding failures. These are invariant violations in the caller, fatal
/// to the current check; nothing here is recovered from or coerced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A memory read reached the encoder without having been rewritten to
    /// an event-value term upstream.
    #[error("unconverted read of {location} by {proc} reached the encoder")]
    UnexpectedReadTerm { proc: ProcVar, location: String },
}

/// Solver term for a process variable. Process variables lower to
/// zero-argument applications of the process sort, declared once per
/// verifier process by the backend.
pub fn proc_term(p: ProcVar) -> SmtTerm {
    SmtTerm::cnst(p.name())
}

/// Lower a system term to a solver term.
pub fn term_of(term: &Term) -> Result<SmtTerm, EncodeError> {
    match term {
        Term::Elem(name) => Ok(SmtTerm::cnst(name.clone())),
        Term::Const(combo) => Ok(combo_term(combo)),
        Term::Access { array, indices } => Ok(SmtTerm::app(
            array.clone(),
            indices.iter().map(|p| proc_term(*p)).collect(),
        )),
        Term::Arith(inner, combo) => Ok(fold_combo(term_of(inner)?, combo)),
        Term::Read { proc, location } => Err(EncodeError::UnexpectedReadTerm {
            proc: *proc,
            location: location.clone(),
        }),
        Term::EventValue(id) => Ok(SmtTerm::cnst(event_value_name(*id))),
    }
}

/// Lower an atom to a solver formula.
pub fn atom_of(atom: &Atom) -> Result<SmtTerm, EncodeError> {
    match atom {
        Atom::True => Ok(SmtTerm::bool(true)),
        Atom::False => Ok(SmtTerm::bool(false)),
        Atom::Comp { lhs, op, rhs } => {
            let l = term_of(lhs)?;
            let r = term_of(rhs)?;
            Ok(match op {
                CmpOp::Eq => l.eq(r),
                CmpOp::Neq => l.neq(r),
                CmpOp::Lt => l.lt(r),
                CmpOp::Le => l.le(r),
            })
        }
        // The condition conjunction gets no event-relation extras; those
        // are folded in once at the cube level.
        Atom::Ite { cond, then, els } => {
            let cond_f = plain_conjunction(cond.iter())?;
            let then_f = atom_of(then)?;
            let els_f = atom_of(els)?;
            Ok(SmtTerm::and(vec![
                cond_f.clone().implies(then_f),
                cond_f.not().implies(els_f),
            ]))
        }
    }
}

/// Lower a set of atoms, folded with already-lowered extra formulas, into
/// one conjunction. Every invocation accrues into the process-wide encode
/// profile.
pub fn conjunction_of<'a>(
    atoms: impl IntoIterator<Item = &'a Atom>,
    extra: &[SmtTerm],
) -> Result<SmtTerm, EncodeError> {
    let started = Instant::now();
    let mut parts = Vec::new();
    for atom in atoms {
        parts.push(atom_of(atom)?);
    }
    parts.extend(extra.iter().cloned());
    let out = collapse(parts);
    profile::record_build(started.elapsed().as_micros());
    Ok(out)
}

fn plain_conjunction<'a>(
    atoms: impl IntoIterator<Item = &'a Atom>,
) -> Result<SmtTerm, EncodeError> {
    let mut parts = Vec::new();
    for atom in atoms {
        parts.push(atom_of(atom)?);
    }
    Ok(collapse(parts))
}

fn collapse(mut parts: Vec<SmtTerm>) -> SmtTerm {
    match parts.len() {
        0 => SmtTerm::bool(true),
        1 => parts.remove(0),
        _ => SmtTerm::and(parts),
    }
}

fn unit_term(base: &ConstBase) -> SmtTerm {
    match base {
        ConstBase::Int(k) => SmtTerm::int(*k),
        ConstBase::Real(r) => SmtTerm::real(*r),
        ConstBase::Name(name) => SmtTerm::cnst(name.clone()),
    }
}

/// `Σ coefᵢ·baseᵢ`, seeded at a zero typed by the first base. The logic
/// has no multiplication over variables, so coefficients unroll into
/// repeated addition, and negative coefficients into repeated subtraction
/// from the running sum.
fn combo_term(combo: &LinCombo) -> SmtTerm {
    let seed = match combo.first_base() {
        Some(base) if base.is_real() => SmtTerm::real(Rational64::zero()),
        _ => SmtTerm::int(0),
    };
    fold_combo(seed, combo)
}

fn fold_combo(seed: SmtTerm, combo: &LinCombo) -> SmtTerm {
    let mut acc = seed;
    for (base, coef) in combo.iter() {
        let unit = unit_term(base);
        for _ in 0..coef.unsigned_abs() {
            acc = if coef > 0 {
                acc.add(unit.clone())
            } else {
                acc.sub(unit.clone())
            };
        }
    }
    acc
}
