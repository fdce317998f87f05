use std::cell::RefCell;

use serde::Serialize;

/// Aggregated encode/check profiling for one verifier run.
///
/// Observability plumbing only: nothing in the semantic contract reads
/// these counters. Thread-local because the host is single-threaded per
/// worker; a parallel host gets one profile per worker thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EncodeProfile {
    pub build_calls: u64,
    pub build_elapsed_us: u128,
    pub event_encode_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub check_calls: u64,
    pub check_elapsed_us: u128,
}

thread_local! {
    static ENCODE_PROFILE: RefCell<EncodeProfile> = RefCell::new(EncodeProfile::default());
}

pub fn reset_profile() {
    ENCODE_PROFILE.with(|cell| {
        *cell.borrow_mut() = EncodeProfile::default();
    });
}

pub fn current_profile() -> EncodeProfile {
    ENCODE_PROFILE.with(|cell| cell.borrow().clone())
}

pub fn take_profile() -> EncodeProfile {
    ENCODE_PROFILE.with(|cell| std::mem::take(&mut *cell.borrow_mut()))
}

pub(crate) fn record_build(elapsed_us: u128) {
    ENCODE_PROFILE.with(|cell| {
        let mut p = cell.borrow_mut();
        p.build_calls = p.build_calls.saturating_add(1);
        p.build_elapsed_us = p.build_elapsed_us.saturating_add(elapsed_us);
    });
}

pub(crate) fn record_event_encode() {
    ENCODE_PROFILE.with(|cell| {
        let mut p = cell.borrow_mut();
        p.event_encode_calls = p.event_encode_calls.saturating_add(1);
    });
}

pub(crate) fn record_cache_hit() {
    ENCODE_PROFILE.with(|cell| {
        let mut p = cell.borrow_mut();
        p.cache_hits = p.cache_hits.saturating_add(1);
    });
}

pub(crate) fn record_cache_miss() {
    ENCODE_PROFILE.with(|cell| {
        let mut p = cell.borrow_mut();
        p.cache_misses = p.cache_misses.saturating_add(1);
    });
}

pub(crate) fn record_check(elapsed_us: u128) {
    ENCODE_PROFILE.with(|cell| {
        let mut p = cell.borrow_mut();
        p.check_calls = p.check_calls.saturating_add(1);
        p.check_elapsed_us = p.check_elapsed_us.saturating_add(elapsed_us);
    });
}
