pub mod runner;

pub use runner::{CancelToken, DagRunner, RunReport, RunRequest, TaskReport, Trigger};
