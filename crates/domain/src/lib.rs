pub mod entities;
pub mod ports;
pub mod value_objects;

pub use entities::*;
pub use ports::*;
pub use relay_errors::{RelayError, RelayResult};
pub use value_objects::*;
