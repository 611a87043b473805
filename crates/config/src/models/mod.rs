pub mod app_config;
pub mod logging;
pub mod relay;

pub use app_config::*;
pub use logging::*;
pub use relay::*;
