//! MongoDB source access.

use anyhow::{Context, Result};
use bson::{doc, Document};
use clap::Parser;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use std::time::Duration;

/// Source database connection settings.
#[derive(Parser, Clone, Debug)]
pub struct MongoOpts {
    /// MongoDB connection URI
    #[arg(long, default_value = "mongodb://localhost:27017", env = "MONGO_URI")]
    pub mongo_uri: String,

    /// Source database name (falls back to the database named in the URI)
    #[arg(long, env = "MONGO_DATABASE")]
    pub mongo_database: Option<String>,
}

/// Connect to the source database.
pub async fn connect(uri: &str, database: Option<&str>) -> Result<Database> {
    let mut options = ClientOptions::parse(uri)
        .await
        .context("Failed to parse MongoDB URI")?;
    // Timeouts prevent hanging when the source is unreachable.
    options.connect_timeout = Some(Duration::from_secs(10));
    options.server_selection_timeout = Some(Duration::from_secs(10));

    let client = Client::with_options(options).context("Failed to create MongoDB client")?;
    match database {
        Some(name) => Ok(client.database(name)),
        None => client.default_database().ok_or_else(|| {
            anyhow::anyhow!(
                "No MongoDB database specified; set MONGO_DATABASE or name one in the URI"
            )
        }),
    }
}

/// Fetch the full snapshot of a collection.
pub async fn fetch_all(db: &Database, collection: &str) -> Result<Vec<Document>> {
    fetch(db, collection, doc! {}).await
}

/// Fetch only the documents carrying a profile image payload. Both the
/// current and the legacy field name count as carrying one.
pub async fn fetch_with_images(db: &Database, collection: &str) -> Result<Vec<Document>> {
    let filter = doc! {
        "$or": [
            { "profileImageData": { "$exists": true, "$ne": null } },
            { "profileImage": { "$exists": true, "$ne": null } },
        ]
    };
    fetch(db, collection, filter).await
}

async fn fetch(db: &Database, collection: &str, filter: Document) -> Result<Vec<Document>> {
    let handle = db.collection::<Document>(collection);
    let mut cursor = handle
        .find(filter)
        .await
        .with_context(|| format!("Failed to query collection {collection}"))?;

    let mut documents = Vec::new();
    while cursor.advance().await? {
        let doc: Document = cursor.current().try_into()?;
        documents.push(doc);
    }
    tracing::debug!("Fetched {} documents from {collection}", documents.len());
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opts_defaults() {
        let opts = MongoOpts::try_parse_from(["test"]).unwrap();
        assert_eq!(opts.mongo_uri, "mongodb://localhost:27017");
        assert_eq!(opts.mongo_database, None);
    }

    #[test]
    fn test_opts_database_flag() {
        let opts =
            MongoOpts::try_parse_from(["test", "--mongo-database", "university_lms"]).unwrap();
        assert_eq!(opts.mongo_database.as_deref(), Some("university_lms"));
    }
}
