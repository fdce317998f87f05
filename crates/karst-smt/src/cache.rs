use std::collections::HashMap;
use std::sync::Arc;

use karst_ir::cube::Cube;
use karst_ir::terms::Atom;

use crate::builder::{conjunction_of, EncodeError};
use crate::profile;
use crate::terms::SmtTerm;

/// Content-addressed key: the cube's canonical atom array plus a
/// fingerprint of its event structure. Keying on the fingerprint removes
/// the assumption that a canonical atom array determines its event-derived
/// extra formulas; identical atoms under a different event context simply
/// miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    canon: Vec<Atom>,
    events_fp: u64,
}

/// Process-wide memo of encoded cubes.
///
/// Grows monotonically and is never evicted: candidate cubes are drawn
/// from the finite universe the outer search can construct. Append-only;
/// a parallelized host must impose single-writer discipline so one key
/// never maps to divergent formulas.
#[derive(Debug, Default)]
pub struct FormulaCache {
    entries: HashMap<CacheKey, Arc<SmtTerm>>,
}

impl FormulaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached formula for `cube`, building and storing it on a
    /// miss. On a hit the stored formula is returned unchanged and `extra`
    /// is ignored; the event fingerprint in the key guarantees a given key
    /// always saw the same extra set.
    pub fn get_or_build(
        &mut self,
        cube: &Cube,
        extra: &[SmtTerm],
    ) -> Result<Arc<SmtTerm>, EncodeError> {
        let key = CacheKey {
            canon: cube.canonical_atoms().to_vec(),
            events_fp: cube.events().fingerprint(),
        };
        if let Some(found) = self.entries.get(&key) {
            profile::record_cache_hit();
            return Ok(Arc::clone(found));
        }
        let formula = Arc::new(conjunction_of(cube.canonical_atoms(), extra)?);
        self.entries.insert(key, Arc::clone(&formula));
        profile::record_cache_miss();
        Ok(formula)
    }
}
