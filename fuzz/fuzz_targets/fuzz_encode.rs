#![no_main]
use libfuzzer_sys::fuzz_target;

use karst_ir::cube::{proc_vars, Cube, ProcVar};
use karst_ir::events::EventStructure;
use karst_ir::terms::{Atom, CmpOp, LinCombo, Term};

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

fn term_from(bytes: &[u8]) -> Term {
    match bytes[0] % 4 {
        0 => Term::elem(NAMES[(bytes[1] % 4) as usize]),
        1 => Term::Const(LinCombo::int((bytes[1] % 32) as i64 - 16)),
        2 => Term::access(NAMES[(bytes[1] % 4) as usize], vec![ProcVar((bytes[2] % 3) as usize)]),
        _ => Term::Arith(
            Box::new(Term::elem(NAMES[(bytes[1] % 4) as usize])),
            LinCombo::named("n", (bytes[2] % 8) as i64 - 4),
        ),
    }
}

fn atom_from(bytes: &[u8]) -> Atom {
    let op = match bytes[0] % 4 {
        0 => CmpOp::Eq,
        1 => CmpOp::Neq,
        2 => CmpOp::Lt,
        _ => CmpOp::Le,
    };
    Atom::comp(term_from(&bytes[1..4]), op, term_from(&bytes[4..7]))
}

fuzz_target!(|data: &[u8]| {
    let atoms: Vec<Atom> = data.chunks_exact(7).take(64).map(atom_from).collect();
    let cube = Cube::new(0, proc_vars(3), atoms, EventStructure::new());
    // Encoding byte-derived cubes must never panic; errors are fine.
    let _ = karst_smt::builder::conjunction_of(cube.canonical_atoms(), &[]);
});
