pub mod config;
pub mod dropout;
pub mod error;
pub(crate) mod linear;

pub use config::Config;
pub use error::FindModuleError;
