//! Persistence layer: the `WorkerStore` trait and its backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlWorkerStore;
pub use memory::InMemoryWorkerStore;
pub use traits::WorkerStore;
