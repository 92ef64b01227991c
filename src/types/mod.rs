mod file;

pub use file::{get_mime, UploadSource};

use std::pin::Pin;

use tokio::io::AsyncRead;

pub type BoxedAsyncRead<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;
