//! Polling of long-running server-side tasks (database learn-sync, report
//! generation, file ingestion) until they complete or fail.
pub mod source;
pub mod status;
pub mod task_monitor;

pub use source::{ClientStatusSource, DEFAULT_STATUS_PATH, TaskStatusSource};
pub use status::{TaskSnapshot, TaskState, TaskStatusDocument};
pub use task_monitor::{
    CompleteCallback, ErrorCallback, MonitorOptions, ProgressCallback, TaskMonitor,
};
