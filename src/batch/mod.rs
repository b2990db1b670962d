pub mod scheduler;
pub mod types;


pub use scheduler::{BatchRunner, BatchScheduler};
pub use types::*;
