pub mod error;
pub mod types;
pub mod value;

pub use error::{EngineError, ErrorKind, Result};
pub use types::{EntityIdentity, Params, Row};
pub use value::Value;
