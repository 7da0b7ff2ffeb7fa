//! MySQL backup target.

pub mod client;
pub mod sink;

pub use client::{ensure_database, select_database, test_connection, MySqlOpts};
pub use sink::{prune_orphans, upsert_rows, upsert_with_image_fallback};
