//! Request handlers.

pub mod generation;
pub mod health;

pub use generation::*;
pub use health::*;
