pub mod common;
pub mod report;
pub mod status;
pub mod sync;
pub mod task;
pub mod watch;
