use num::rational::Rational64;

use crate::sorts::Sort;
use crate::terms::SmtTerm;

/// Print an SmtTerm as SMT-LIB2 format.
pub fn to_smtlib(term: &SmtTerm) -> String {
    match term {
        SmtTerm::App(name, args) => {
            if args.is_empty() {
                quote_symbol(name)
            } else {
                let inner: Vec<String> = args.iter().map(to_smtlib).collect();
                format!("({} {})", quote_symbol(name), inner.join(" "))
            }
        }
        SmtTerm::IntLit(n) => {
            if *n < 0 {
                format!("(- {})", -n)
            } else {
                n.to_string()
            }
        }
        SmtTerm::RealLit(r) => rational_to_smtlib(r),
        SmtTerm::BoolLit(b) => {
            if *b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        SmtTerm::Add(lhs, rhs) => format!("(+ {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Sub(lhs, rhs) => format!("(- {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Eq(lhs, rhs) => format!("(= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Lt(lhs, rhs) => format!("(< {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Le(lhs, rhs) => format!("(<= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::And(terms) => {
            if terms.is_empty() {
                "true".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
                format!("(and {})", inner.join(" "))
            }
        }
        SmtTerm::Or(terms) => {
            if terms.is_empty() {
                "false".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
                format!("(or {})", inner.join(" "))
            }
        }
        SmtTerm::Not(inner) => format!("(not {})", to_smtlib(inner)),
        SmtTerm::Implies(lhs, rhs) => {
            format!("(=> {} {})", to_smtlib(lhs), to_smtlib(rhs))
        }
        SmtTerm::Ite(cond, then, els) => {
            format!(
                "(ite {} {} {})",
                to_smtlib(cond),
                to_smtlib(then),
                to_smtlib(els)
            )
        }
    }
}

/// Print a sort as SMT-LIB2 format. `Proc` and `Event` map to `Int`: both
/// need the backend's linear order for the total-order and acyclicity
/// encodings.
pub fn sort_to_smtlib(sort: &Sort) -> &'static str {
    match sort {
        Sort::Bool => "Bool",
        Sort::Int => "Int",
        Sort::Real => "Real",
        Sort::Proc => "Int",
        Sort::Event => "Int",
    }
}

fn rational_to_smtlib(r: &Rational64) -> String {
    let numer = *r.numer();
    let denom = *r.denom();
    let body = if denom == 1 {
        format!("{}.0", numer.abs())
    } else {
        format!("(/ {}.0 {}.0)", numer.abs(), denom)
    };
    if numer < 0 {
        format!("(- {body})")
    } else {
        body
    }
}

/// Quote a symbol with `|...|` when it is not a simple SMT-LIB symbol
/// (process variables like `#1` need this).
pub fn quote_symbol(name: &str) -> String {
    if is_simple_symbol(name) {
        name.to_string()
    } else {
        format!("|{name}|")
    }
}

fn is_simple_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let simple = |c: char| c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c);
    (first.is_ascii_alphabetic() || (simple(first) && !first.is_ascii_digit()))
        && name.chars().all(simple)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_simple_term() {
        let term = SmtTerm::cnst("x").add(SmtTerm::int(1)).le(SmtTerm::int(0));
        assert_eq!(to_smtlib(&term), "(<= (+ x 1) 0)");
    }

    #[test]
    fn print_and_term() {
        let term = SmtTerm::and(vec![
            SmtTerm::cnst("a").lt(SmtTerm::int(10)),
            SmtTerm::cnst("b").eq(SmtTerm::int(2)),
        ]);
        assert_eq!(to_smtlib(&term), "(and (< a 10) (= b 2))");
    }

    #[test]
    fn print_application() {
        let term = SmtTerm::app("flag", vec![SmtTerm::cnst("#1")]);
        assert_eq!(to_smtlib(&term), "(flag |#1|)");
    }

    #[test]
    fn process_variables_are_quoted() {
        assert_eq!(quote_symbol("#1"), "|#1|");
        assert_eq!(quote_symbol("state"), "state");
    }

    #[test]
    fn print_negative_int() {
        assert_eq!(to_smtlib(&SmtTerm::int(-3)), "(- 3)");
    }

    #[test]
    fn print_rationals() {
        assert_eq!(to_smtlib(&SmtTerm::real(Rational64::new(1, 2))), "(/ 1.0 2.0)");
        assert_eq!(to_smtlib(&SmtTerm::real(Rational64::new(-3, 1))), "(- 3.0)");
        assert_eq!(to_smtlib(&SmtTerm::real(Rational64::new(2, 1))), "2.0");
    }

    #[test]
    fn empty_conjunction_and_disjunction_are_literals() {
        assert_eq!(to_smtlib(&SmtTerm::and(vec![])), "true");
        assert_eq!(to_smtlib(&SmtTerm::or(vec![])), "false");
    }

    #[test]
    fn proc_and_event_sorts_print_as_int() {
        assert_eq!(sort_to_smtlib(&Sort::Proc), "Int");
        assert_eq!(sort_to_smtlib(&Sort::Event), "Int");
        assert_eq!(sort_to_smtlib(&Sort::Real), "Real");
    }
}
