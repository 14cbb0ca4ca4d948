//! rusty-board/crates/rb-core/src/lib.rs
//!
//! The central domain types and interface definitions for the Rusty-Board
//! storage engine. Nothing in here knows which database sits behind the ports.

pub mod error;
pub mod models;
pub mod pagination;
pub mod scheduler;
pub mod short_name;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use scheduler::{CacheScheduler, TickReport};
pub use short_name::ShortName;
pub use traits::*;
