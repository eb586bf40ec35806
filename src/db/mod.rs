mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// The actual pool, hidden behind the enabled backend features.
enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(sqlx::PgPool),
    /// Unconstructable placeholder so the enum is never empty when built
    /// without database features.
    #[allow(dead_code)]
    _None(std::convert::Infallible),
}

/// Repository trait objects, created once at startup.
struct CachedRepos {
    change_requests: Arc<dyn ChangeRequestRepo>,
}

/// Database handle shared across the service.
///
/// Owns the connection pool and the repository objects built on it.
pub struct DbPool {
    storage: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            change_requests: Arc::new(sqlite::SqliteChangeRequestRepo::new(pool.clone())),
        };
        Self {
            storage: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(pool: sqlx::PgPool) -> Self {
        let repos = CachedRepos {
            change_requests: Arc::new(postgres::PostgresChangeRequestRepo::new(pool.clone())),
        };
        Self {
            storage: PoolStorage::Postgres(pool),
            repos,
        }
    }

    /// Connect to the configured database, running migrations if enabled.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),

            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let journal_mode = if cfg.wal_mode {
                    sqlx::sqlite::SqliteJournalMode::Wal
                } else {
                    sqlx::sqlite::SqliteJournalMode::Delete
                };
                // Deletes must cascade to attachment and audit rows, so
                // foreign key enforcement is always on.
                let options = sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&cfg.path)
                    .create_if_missing(cfg.create_if_missing)
                    .foreign_keys(true)
                    .journal_mode(journal_mode)
                    .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms));

                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(options)
                    .await?;

                tracing::info!(path = %cfg.path, "Connected to SQLite database");

                let db = Self::from_sqlite(pool);
                if cfg.run_migrations {
                    db.run_migrations().await?;
                }
                Ok(db)
            }

            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                use crate::config::PostgresSslMode;

                let ssl_mode = match cfg.ssl_mode {
                    PostgresSslMode::Disable => sqlx::postgres::PgSslMode::Disable,
                    PostgresSslMode::Prefer => sqlx::postgres::PgSslMode::Prefer,
                    PostgresSslMode::Require => sqlx::postgres::PgSslMode::Require,
                    PostgresSslMode::VerifyCa => sqlx::postgres::PgSslMode::VerifyCa,
                    PostgresSslMode::VerifyFull => sqlx::postgres::PgSslMode::VerifyFull,
                };
                let options = cfg
                    .url
                    .parse::<sqlx::postgres::PgConnectOptions>()?
                    .ssl_mode(ssl_mode);

                let pool = sqlx::postgres::PgPoolOptions::new()
                    .min_connections(cfg.min_connections)
                    .max_connections(cfg.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                    .idle_timeout(std::time::Duration::from_secs(cfg.idle_timeout_secs))
                    .connect_with(options)
                    .await?;

                tracing::info!("Connected to PostgreSQL database");

                let db = Self::from_postgres(pool);
                if cfg.run_migrations {
                    db.run_migrations().await?;
                }
                Ok(db)
            }
        }
    }

    /// Apply any pending schema migrations for the active backend.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.storage {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pool) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(pool)
                    .await?;
            }
            PoolStorage::_None(infallible) => match *infallible {},
        }
        Ok(())
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.storage {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => "sqlite",
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(_) => "postgres",
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    pub fn change_requests(&self) -> Arc<dyn ChangeRequestRepo> {
        self.repos.change_requests.clone()
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.storage {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            PoolStorage::_None(infallible) => match *infallible {},
        }
        Ok(())
    }
}
