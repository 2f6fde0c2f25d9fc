pub mod alloc;
pub mod config;
pub mod driver;
pub mod error;
pub mod shutdown;
pub mod state;
pub mod structs;
pub mod task_runner;

pub use error::{NomadError, Result};
pub use task_runner::{TaskRunner, TaskRunnerHandle};
