pub mod database;
pub mod error;
pub mod groups;
pub mod messages;
pub mod online;
pub mod row_helpers;
pub mod schema;
pub mod sqlite;

pub use database::Database;
pub use error::StoreError;
pub use sqlite::SqliteMessageStore;
