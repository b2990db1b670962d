pub mod executor;
pub mod orchestrator;
pub mod types;


pub use executor::RemoteExecutor;
pub use orchestrator::RequestPipeline;
pub use types::*;
