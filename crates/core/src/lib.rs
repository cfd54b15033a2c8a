//! Core types, validation and storage ports for the clickstream engine.

pub mod error;
pub mod events;
pub mod funnel;
pub mod limits;
pub mod partition;
pub mod ports;
pub mod quota;

pub use error::{Error, Result, ValidationErrorCode};
pub use events::*;
pub use funnel::*;
pub use partition::*;
pub use ports::*;
pub use quota::*;
