pub mod base;
pub mod build;
pub mod constants;
pub mod error;
pub mod logging;
pub mod namer;
pub mod oci;
pub mod options;
pub mod publish;
pub mod registry;
pub mod resolve;
pub mod resource;
pub mod retry;

pub use error::{Error, Result};
