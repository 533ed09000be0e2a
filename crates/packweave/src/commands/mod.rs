mod config;
mod library;

pub use config::*;
pub use library::*;
