pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod profiles;
pub mod routing;
pub mod runtime;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::Config;
pub use error::{BackplaneError, BackplaneResult};
pub use types::*;
