mod api;
pub mod oauth;
mod res;
mod search;
pub mod store;
mod types;
mod utils;

pub use api::*;
pub use oauth::{parse_callback_url, AuthRedirect, TokenManager};
pub use search::*;
pub use store::{FileStore, MemoryStore, TokenStore};
pub use types::*;
