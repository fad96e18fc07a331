//! Storage providers
//!
//! - `memory`: in-process map with watchers
//! - `filesystem`: one file per URI, OS-notified watchers
//! - `sqlite`: one row per URI, plus named queries
//! - `schema`: DDL generation from type metadata

pub mod filesystem;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use filesystem::FileProvider;
pub use memory::MemoryProvider;
pub use schema::create_table_sql;
pub use sqlite::{SqlConfig, SqliteProvider};
