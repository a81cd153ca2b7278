//! Persistence layer: job records and the pending-job queue.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::InMemoryStore;
pub use traits::{JobQueue, JobStore, ZOMBIE_ERROR};
