pub mod clock;
pub mod command;
pub mod config;
pub mod exclusion;
pub mod lock;
pub mod model;
pub mod operation;
pub mod operation_pull;
pub mod operation_push;
pub mod oplog;
pub mod orchestrator;
pub mod paths;
pub mod scan;
pub mod scan_paths;
pub mod scheduler;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;
