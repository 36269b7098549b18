pub mod batch;
pub mod error;
pub mod events;
pub mod filename;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod results;
pub mod retry;
