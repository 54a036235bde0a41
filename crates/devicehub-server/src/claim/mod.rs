//! Binding devices to their owners with one-time claim codes.

mod flow;

pub use flow::{ClaimFlow, ClaimOutcome};
