//! Run orchestration: the state machine, the driver loop, the fallback ladder and the
//! worker pool runs are scheduled on.

pub mod driver;
pub mod fallback;
pub mod opts;
pub mod pool;
pub mod preview;
pub mod state;
