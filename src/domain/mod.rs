//! Domain types and ports
//!
//! Storage object handles and the capability traits the workflows call.

pub mod object;
pub mod ports;

pub use object::StorageObject;
pub use ports::*;
