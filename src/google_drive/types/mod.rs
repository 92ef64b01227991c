mod config;
mod drive_file;
mod token;
mod upload;

pub use config::*;
pub use drive_file::*;
pub use token::*;
pub use upload::*;
