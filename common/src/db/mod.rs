// Database layer module

pub mod memory;
pub mod pool;
pub mod repositories;
pub mod store;

pub use memory::{FaultPoint, MemoryJobStore};
pub use pool::DbPool;
pub use repositories::PgJobStore;
pub use store::JobStore;
