use std::sync::{Arc, LazyLock};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::db::memory::MemoryPointStore;
use crate::db::models::member::UserId;
use crate::db::pg::PgPointStore;
use crate::db::repositories::PointStore;
use crate::util::env::{self, Env, StorageBackend};
use crate::var;

pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;

pub mod prelude {
    pub use crate::db::{db_pool, store_from_env};
    pub use crate::db::{StorageError, StoreResult};

    pub use crate::db::models::aggregate::UserPointsAggregate;
    pub use crate::db::models::leaderboard::{
        LeaderboardEntry, LeaderboardView, Rank, Standing, StandingsQuery, Window,
    };
    pub use crate::db::models::member::{Member, Role, UserId};
    pub use crate::db::models::points::{ActionKind, EventId, NewPointEvent, PointEvent};

    pub use crate::db::memory::MemoryPointStore;
    pub use crate::db::pg::PgPointStore;
    pub use crate::db::repositories::Tx;
    pub use crate::db::repositories::{PointStore, PointTx};
}

/// Builds the storage backend selected by `STORAGE_BACKEND`
#[instrument(skip(env), fields(backend = ?env.storage_backend))]
pub async fn store_from_env(env: &Env) -> StoreResult<Arc<dyn PointStore>> {
    match env.storage_backend {
        StorageBackend::Postgres => Ok(Arc::new(PgPointStore::new(db_pool().await?))),
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory store, nothing will survive a restart");

            let store = MemoryPointStore::new();
            match env.memory_seed_file.as_deref() {
                Some(path) => {
                    let loaded = store.load_members(path).await?;
                    tracing::info!(path, loaded, "seeded members");
                }
                None => tracing::warn!("MEMORY_SEED_FILE not set, every award will be rejected"),
            }

            Ok(Arc::new(store))
        }
    }
}

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> StoreResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    #[instrument]
    pub async fn new_pool() -> StoreResult<Self> {
        let db_url = var!(database_url)
            .await?
            .as_deref()
            .ok_or(StorageError::MissingDatabaseUrl)?;
        let max_connections = *var!(db_max_connections).await?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        if *var!(run_migrations).await? {
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("database migrations applied");
        }

        Ok(Self { pool })
    }
}

pub type StoreResult<T> = core::result::Result<T, StorageError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    EnvError(#[from] env::EnvErr),

    #[error("DATABASE_URL must be set for the postgres storage backend")]
    MissingDatabaseUrl,

    #[error("no points aggregate row for user '{0}'")]
    MissingAggregate(UserId),

    #[error("point total for user '{0}' would overflow")]
    TotalOverflow(UserId),

    #[error("unable to read member seed file: {0}")]
    SeedRead(#[from] std::io::Error),

    #[error("malformed member seed file: {0}")]
    SeedParse(#[from] serde_json::Error),
}
