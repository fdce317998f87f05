#![doc = include_str!("../README.md")]

//! Karst symbolic-state representation.
//!
//! This crate defines the term/atom language over anonymous process
//! variables, cubes (tagged, canonicalized atom conjunctions), and the
//! weak-memory event arena attached to a cube. Everything here is plain
//! data with structural equality; encoding lives in `karst-smt`.

pub mod cube;
pub mod events;
pub mod terms;
