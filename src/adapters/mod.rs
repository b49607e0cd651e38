pub mod memory;
pub mod postgres;
mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::PhotoStore;
