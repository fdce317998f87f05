use std::collections::BTreeMap;
use std::fmt;

use num::rational::Rational64;

use crate::cube::ProcVar;
use crate::events::EventId;

/// Base of one summand in a linear combination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstBase {
    /// Integer literal base.
    Int(i64),
    /// Real (rational) literal base.
    Real(Rational64),
    /// Named symbolic constant.
    Name(String),
}

impl ConstBase {
    /// Whether this base is real-valued. Named constants count as integer.
    pub fn is_real(&self) -> bool {
        matches!(self, ConstBase::Real(_))
    }
}

/// A linear combination of constant bases with integer coefficients,
/// interpreted as `Σ coefᵢ·baseᵢ`. Bases are kept in a deterministic order
/// so that the encoder's type seed (integer vs real) is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinCombo {
    coefs: BTreeMap<ConstBase, i64>,
}

impl LinCombo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The combination `1·k` for an integer literal `k`.
    pub fn int(k: i64) -> Self {
        let mut c = Self::new();
        c.add(ConstBase::Int(k), 1);
        c
    }

    /// The combination `1·r` for a real literal `r`.
    pub fn real(r: Rational64) -> Self {
        let mut c = Self::new();
        c.add(ConstBase::Real(r), 1);
        c
    }

    /// The combination `coef·name` for a named constant.
    pub fn named(name: impl Into<String>, coef: i64) -> Self {
        let mut c = Self::new();
        c.add(ConstBase::Name(name.into()), coef);
        c
    }

    /// Add `coef` to the coefficient of `base`; zero coefficients are
    /// dropped so structural equality sees through cancellation.
    pub fn add(&mut self, base: ConstBase, coef: i64) {
        use std::collections::btree_map::Entry;
        match self.coefs.entry(base) {
            Entry::Occupied(mut e) => {
                *e.get_mut() += coef;
                if *e.get() == 0 {
                    e.remove();
                }
            }
            Entry::Vacant(e) => {
                if coef != 0 {
                    e.insert(coef);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coefs.is_empty()
    }

    /// First base in combination order; determines the encoder's seed type.
    pub fn first_base(&self) -> Option<&ConstBase> {
        self.coefs.keys().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConstBase, i64)> {
        self.coefs.iter().map(|(b, c)| (b, *c))
    }
}

impl FromIterator<(ConstBase, i64)> for LinCombo {
    fn from_iter<I: IntoIterator<Item = (ConstBase, i64)>>(iter: I) -> Self {
        let mut c = Self::new();
        for (base, coef) in iter {
            c.add(base, coef);
        }
        c
    }
}

/// A system term. Immutable tree; equality and ordering are structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    /// Named element (state variable, enum value, abstract constant).
    Elem(String),
    /// Linear combination of constants.
    Const(LinCombo),
    /// Array access indexed by process variables.
    Access { array: String, indices: Vec<ProcVar> },
    /// A term plus a linear combination of constants.
    Arith(Box<Term>, LinCombo),
    /// A memory read not yet resolved to an event. Must be rewritten to
    /// `EventValue` before encoding; the builder rejects it.
    Read { proc: ProcVar, location: String },
    /// The value observed by a specific memory-access event.
    EventValue(EventId),
}

impl Term {
    pub fn elem(name: impl Into<String>) -> Self {
        Term::Elem(name.into())
    }

    pub fn int(k: i64) -> Self {
        Term::Const(LinCombo::int(k))
    }

    pub fn access(array: impl Into<String>, indices: Vec<ProcVar>) -> Self {
        Term::Access {
            array: array.into(),
            indices,
        }
    }
}

/// Comparison operator of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmpOp::Eq => write!(f, "="),
            CmpOp::Neq => write!(f, "<>"),
            CmpOp::Lt => write!(f, "<"),
            CmpOp::Le => write!(f, "<="),
        }
    }
}

/// An atom of the cube language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Atom {
    True,
    False,
    /// Comparison of two terms.
    Comp { lhs: Term, op: CmpOp, rhs: Term },
    /// If-then-else lowered by the encoder to
    /// `(cond → then) ∧ (¬cond → else)`. The condition is a conjunction,
    /// canonicalized (sorted, deduplicated) at construction.
    Ite {
        cond: Vec<Atom>,
        then: Box<Atom>,
        els: Box<Atom>,
    },
}

impl Atom {
    pub fn comp(lhs: Term, op: CmpOp, rhs: Term) -> Self {
        Atom::Comp { lhs, op, rhs }
    }

    pub fn eq(lhs: Term, rhs: Term) -> Self {
        Atom::comp(lhs, CmpOp::Eq, rhs)
    }

    pub fn neq(lhs: Term, rhs: Term) -> Self {
        Atom::comp(lhs, CmpOp::Neq, rhs)
    }

    /// Build an `Ite` atom, canonicalizing the condition conjunction.
    pub fn ite(cond: impl IntoIterator<Item = Atom>, then: Atom, els: Atom) -> Self {
        let mut cond: Vec<Atom> = cond.into_iter().collect();
        cond.sort();
        cond.dedup();
        Atom::Ite {
            cond,
            then: Box::new(then),
            els: Box::new(els),
        }
    }
}
