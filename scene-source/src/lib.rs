mod error;
mod filesystem;
mod source;

pub use error::{Result, SceneSourceError};
pub use filesystem::Filesystem;
pub use source::*;
