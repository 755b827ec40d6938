pub mod magnet;
pub mod media;
pub mod metainfo;
pub mod spawn_utils;

mod error;
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
