pub mod core;
pub mod fs_paths;
pub mod models;
pub mod platforms;

pub use crate::core::batch::BatchRunner;
pub use crate::core::results::{BatchResult, Summary};
