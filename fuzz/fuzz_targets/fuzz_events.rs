#![no_main]
use libfuzzer_sys::fuzz_target;

use karst_ir::cube::ProcVar;
use karst_ir::events::{Event, EventKind, EventStructure};
use karst_ir::terms::Term;

const LOCATIONS: [&str; 3] = ["x", "y", "z"];

fuzz_target!(|data: &[u8]| {
    let mut es = EventStructure::new();
    for chunk in data.chunks_exact(4).take(48) {
        let kind = match chunk[0] % 3 {
            0 => EventKind::Read,
            1 => EventKind::Write,
            _ => EventKind::Fence,
        };
        // Colliding ids are deliberately possible: the derived program
        // order may then contain cycles, which the encoder must lower to
        // `false` instead of diverging or panicking.
        es.insert(Event {
            id: (chunk[1] % 16) as usize,
            proc: ProcVar((chunk[2] % 3) as usize),
            kind,
            location: LOCATIONS[(chunk[3] % 3) as usize].into(),
            value: Some(Term::int((chunk[3] / 3) as i64)),
        });
    }
    let _ = karst_smt::events::event_obligations(&es);
});
