//! Fee computation for marketplace orders

pub mod calculator;
pub mod schedule;

pub use calculator::*;
pub use schedule::*;
