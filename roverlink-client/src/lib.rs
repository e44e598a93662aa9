pub mod client;
pub mod configs;
pub mod discovery;
pub mod error;
pub mod radio;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
