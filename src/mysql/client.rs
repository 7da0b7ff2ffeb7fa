//! Connection settings and bootstrap for the backup database.
//!
//! Pools are created against the server alone. Each run selects the backup
//! database on its own connection, so a missing database is an error only
//! for the paths that refuse to create it.

use anyhow::{Context, Result};
use clap::Parser;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Pool};

/// Backup target connection settings.
#[derive(Parser, Clone, Debug)]
pub struct MySqlOpts {
    /// MySQL server host
    #[arg(long, default_value = "localhost", env = "MYSQL_HOST")]
    pub mysql_host: String,

    /// MySQL server port
    #[arg(long, default_value = "3306", env = "MYSQL_PORT")]
    pub mysql_port: u16,

    /// MySQL user
    #[arg(long, default_value = "root", env = "MYSQL_USER")]
    pub mysql_user: String,

    /// MySQL password
    #[arg(long, default_value = "", env = "MYSQL_PASSWORD")]
    pub mysql_password: String,

    /// Backup database name
    #[arg(long, default_value = "university_lms_backup", env = "MYSQL_DATABASE")]
    pub mysql_database: String,
}

impl MySqlOpts {
    /// Build a pool against the server without selecting a database.
    pub fn to_pool(&self) -> Pool {
        let opts = OptsBuilder::default()
            .ip_or_hostname(self.mysql_host.clone())
            .tcp_port(self.mysql_port)
            .user(Some(self.mysql_user.clone()))
            .pass(if self.mysql_password.is_empty() {
                None
            } else {
                Some(self.mysql_password.clone())
            });
        Pool::new(opts)
    }
}

/// Probe server connectivity with a single ping.
pub async fn test_connection(pool: &Pool) -> Result<()> {
    let mut conn = pool
        .get_conn()
        .await
        .context("Failed to acquire MySQL connection")?;
    conn.ping().await.context("MySQL ping failed")?;
    Ok(())
}

/// Create the backup database if needed and switch the connection to it.
pub async fn ensure_database(conn: &mut Conn, database: &str) -> Result<()> {
    conn.query_drop(format!("CREATE DATABASE IF NOT EXISTS `{database}`"))
        .await
        .with_context(|| format!("Failed to create database {database}"))?;
    select_database(conn, database).await
}

/// Switch the connection to an existing database. Status paths use this so
/// that asking about a backup never creates one.
pub async fn select_database(conn: &mut Conn, database: &str) -> Result<()> {
    conn.query_drop(format!("USE `{database}`"))
        .await
        .with_context(|| format!("Failed to select database {database}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_opts_defaults() {
        let opts = MySqlOpts::try_parse_from(["test"]).unwrap();
        assert_eq!(opts.mysql_host, "localhost");
        assert_eq!(opts.mysql_port, 3306);
        assert_eq!(opts.mysql_user, "root");
        assert_eq!(opts.mysql_password, "");
        assert_eq!(opts.mysql_database, "university_lms_backup");
    }

    #[test]
    fn test_opts_flags_override_defaults() {
        let opts = MySqlOpts::try_parse_from([
            "test",
            "--mysql-host",
            "db.internal",
            "--mysql-port",
            "3307",
            "--mysql-database",
            "lms_backup_staging",
        ])
        .unwrap();
        assert_eq!(opts.mysql_host, "db.internal");
        assert_eq!(opts.mysql_port, 3307);
        assert_eq!(opts.mysql_database, "lms_backup_staging");
    }

    #[test]
    fn test_opts_command_is_well_formed() {
        MySqlOpts::command().debug_assert();
    }
}
