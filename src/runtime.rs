use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use tracing::info;

use crate::config::{self, Config};
use crate::s3::ObjectStore;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// The engine shares its database with the operational workload; two
/// connections is the deliberate ceiling on the pressure it may add.
const MAX_DB_CONNECTIONS: u32 = 2;

/// Every session the pool hands out is pinned to UTC; the interval
/// arithmetic in the planner and the exporters depends on it.
#[derive(Debug, Clone, Copy)]
struct UtcSession;

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for UtcSession {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        use diesel::connection::SimpleConnection;
        conn.batch_execute("SET TIME ZONE 'UTC'")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Everything a pass needs, wired once at startup and passed by explicit
/// parameter. There is no ambient singleton.
pub struct Runtime {
    pub pool: PgPool,
    pub store: ObjectStore,
    pub config: Config,
}

impl Runtime {
    /// Validate configuration and probe every shared resource. Any failure
    /// here is startup-fatal; nothing is retried.
    pub async fn create(config: Config) -> Result<Runtime> {
        config.validate()?;
        config::probe_temp_dir(&config.temp_dir)?;
        crate::writer::sweep_staging_dir(&config.temp_dir)?;

        let manager = ConnectionManager::<PgConnection>::new(&config.db);
        let pool = Pool::builder()
            .max_size(MAX_DB_CONNECTIONS)
            .connection_customizer(Box::new(UtcSession))
            .build(manager)
            .context("failed to connect to the database")?;

        let store = ObjectStore::new(&config).await?;
        store.probe().await?;

        info!(
            bucket = %config.s3_bucket,
            temp_dir = %config.temp_dir.display(),
            retention_days = config.retention_days,
            "runtime ready"
        );

        Ok(Runtime {
            pool,
            store,
            config,
        })
    }
}
