//! db — высокоуровневый фасад: open/write/flush/query/latest/snapshot/info.

pub mod builder;
pub mod core;
pub mod open;
pub mod scan;
pub mod write;

pub use builder::{BlockBuilder, FinishedBlock};
pub use core::{Db, Stats};
pub use open::workspace_needed;
pub use scan::RangeIter;
