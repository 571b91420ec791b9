//! Optimization strategies
//!
//! - MILP: per-stage linear program, optionally with binary flow-direction indicators

pub mod milp;

pub use milp::*;
