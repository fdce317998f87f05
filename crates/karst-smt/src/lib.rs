#![doc = include_str!("../README.md")]

//! SMT encoding and check protocol for parameterized-system safety
//! verification.
//!
//! This crate provides the term/formula builder, the structural constraint
//! generator for anonymous process variables, the formula cache, the
//! weak-memory event-relation encoder, and the safety-check protocol over
//! pluggable SMT-LIB backends.

pub mod backends;
pub mod builder;
pub mod cache;
pub mod constraints;
pub mod events;
pub mod profile;
pub mod prover;
pub mod solver;
pub mod sorts;
pub mod terms;
