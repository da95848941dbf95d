//! SQLite backend for the Waypoint metadata and audit stores.

mod schema;
mod store;

pub use store::SqliteStore;
