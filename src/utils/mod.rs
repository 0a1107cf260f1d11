//! Numeric helpers for the engine backends

pub mod math;
