pub mod config;
pub mod error;
pub mod google_drive;
pub mod types;
pub mod viewer;

pub use error::{DriveError, Result};
