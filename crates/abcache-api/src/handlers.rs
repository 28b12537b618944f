//! Request handlers.

pub mod cache;
pub mod health;

pub use cache::*;
pub use health::*;
