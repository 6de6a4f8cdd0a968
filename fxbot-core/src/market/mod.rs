//! Market data types and tick sources

pub mod clock;
pub mod types;

pub use clock::{ReplayTickSource, TickSource};
pub use types::{BarSnapshot, Direction, Instrument, TickEvent};
