pub mod unit_ctx;
pub mod unit_flow;

pub use unit_ctx::UnitCtx;
pub use unit_flow::{select_timecode, TimeCursor, UnitFlow, UnitOutcome};
