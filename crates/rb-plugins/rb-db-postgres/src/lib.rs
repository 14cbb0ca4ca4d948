//! # rb-db-postgres
//!
//! PostgreSQL storage for Rusty-Board. Every board gets its own LIST
//! partition of `threads`, `messages`, `attachments` and `message_replies`,
//! plus a materialized preview cache that the board listing reads from.
//!
//! Storage functions are written against [`Querier`], so they run on the
//! pool for plain reads and on a transaction for mutations (or for tests
//! that roll back). [`PgBoardStore`] wires them to the `rb-core` ports.

pub mod boards;
pub mod cache;
pub mod enrich;
pub mod naming;
pub mod pool;
pub mod querier;
pub mod reader;
pub mod schema;
pub mod store;
pub mod writer;

pub use naming::{BoardTables, PartitionedTable};
pub use pool::create_pool;
pub use querier::{with_transaction, Querier};
pub use schema::bootstrap;
pub use store::{PgBoardStore, StoreSettings};
