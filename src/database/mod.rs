use std::time::Duration;

use chrono::{NaiveDateTime, SubsecRound, Utc};
use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, PooledConnection};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub mod deletions;
pub mod requests;
pub mod rewards;
pub mod uploads;
pub mod users;
pub mod voting;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type Connection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    pub fn new(database_url: &str, pool_size: u32) -> Result<Database, anyhow::Error> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = r2d2::Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: Duration::from_secs(10),
            }))
            .build(manager)?;

        let db = Database { pool };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.pool.get()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        for version in applied {
            info!("Applied migration {}", version);
        }
        Ok(())
    }

    pub fn connection(&self) -> Result<Connection, r2d2::PoolError> {
        self.pool.get()
    }
}

/// Wall-clock time as stored in the database: UTC, whole seconds.
pub fn current_time() -> NaiveDateTime {
    Utc::now().naive_utc().round_subsecs(0)
}
