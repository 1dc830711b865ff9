pub mod models;
mod queries;
mod sqlite;

pub use queries::BATCH_SIZE;
pub use sqlite::Store;
