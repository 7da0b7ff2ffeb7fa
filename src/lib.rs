//! On-demand relational backup for a university LMS.
//!
//! The LMS keeps its live data in MongoDB. This crate mirrors those
//! collections into a MySQL database, giving the institution a relational
//! copy it can query and retain independently of the document store.
//!
//! A backup run snapshots each collection, flattens the documents into
//! rows (nested data becomes JSON text), upserts them by document id, and
//! prunes rows whose documents have disappeared. Profile image blobs get a
//! dedicated path that retries without the image when a row is too large
//! for the server to accept.
//!
//! Everything is driven over HTTP:
//!
//! ```text
//! POST /data/backup-nosql-to-sql    run a full backup (creates the schema)
//! POST /data/backup-images-only     refresh just the image tables
//! GET  /data/backup-status          row counts per table, with a summary
//! GET  /data/image-backup-status    image coverage of the image tables
//! GET  /data/test-mysql-connection  connectivity probe
//! ```

pub mod api;
pub mod backup;
pub mod convert;
pub mod mongodb;
pub mod mysql;
pub mod schema;
pub mod types;

pub use backup::{BackupStats, TableBackup};
pub use convert::document_to_row;
pub use mongodb::MongoOpts;
pub use mysql::client::MySqlOpts;
pub use types::{SqlRow, SqlValue};
