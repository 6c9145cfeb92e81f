mod budget;
mod pricing;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use stallplass_core::types::Horse;
use stallplass_core::YearMonth;

pub use budget::{
    BudgetItemError, BudgetItemRepository, BudgetOverrideError, BudgetOverrideRepository,
};
pub use pricing::{
    BasePriceError, BasePriceRepository, DiscountTierError, DiscountTierRepository, TierWrite,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for interacting with horses and their owners.
    pub fn horses(&self) -> HorseRepository {
        HorseRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for budget item definitions.
    pub fn budget_items(&self) -> BudgetItemRepository {
        BudgetItemRepository::new(self.pool.clone())
    }

    /// Returns a handle for per-month budget overrides.
    pub fn budget_overrides(&self) -> BudgetOverrideRepository {
        BudgetOverrideRepository::new(self.pool.clone())
    }

    /// Returns a handle for discount tier administration.
    pub fn discount_tiers(&self) -> DiscountTierRepository {
        DiscountTierRepository::new(self.pool.clone())
    }

    /// Returns a handle for category base prices.
    pub fn base_prices(&self) -> BasePriceRepository {
        BasePriceRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A stored value that no longer parses into its domain type.
#[derive(Debug, Error)]
#[error("column {column} holds an invalid value {value:?}")]
pub struct DecodeError {
    pub column: &'static str,
    pub value: String,
}

impl DecodeError {
    fn new(column: &'static str, value: impl Into<String>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

pub(crate) fn decode_decimal(column: &'static str, raw: &str) -> Result<Decimal, DecodeError> {
    Decimal::from_str(raw).map_err(|_| DecodeError::new(column, raw))
}

pub(crate) fn decode_month(column: &'static str, raw: &str) -> Result<YearMonth, DecodeError> {
    raw.parse().map_err(|_| DecodeError::new(column, raw))
}

pub(crate) fn decode_u32(column: &'static str, raw: i64) -> Result<u32, DecodeError> {
    u32::try_from(raw).map_err(|_| DecodeError::new(column, raw.to_string()))
}

pub(crate) fn decode_enum<T: FromStr>(column: &'static str, raw: &str) -> Result<T, DecodeError> {
    raw.parse().map_err(|_| DecodeError::new(column, raw))
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Repository used to register horses and scope lookups to their owner.
#[derive(Clone)]
pub struct HorseRepository {
    pool: SqlitePool,
}

impl HorseRepository {
    /// Registers a new horse for `owner_id`.
    pub async fn create(
        &self,
        owner_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Horse, HorseError> {
        let horse = Horse {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO horses (id, owner_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&horse.id)
        .bind(&horse.owner_id)
        .bind(&horse.name)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;

        Ok(horse)
    }

    /// Lists the horses owned by `owner_id`, oldest first.
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Horse>, HorseError> {
        let rows = sqlx::query_as::<_, HorseRow>(
            "SELECT id, owner_id, name, created_at, updated_at FROM horses WHERE owner_id = ? ORDER BY created_at, id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HorseRow::into_domain).collect())
    }

    /// Loads a horse only when it belongs to `owner_id`.
    ///
    /// Unknown horses and horses of other owners both yield `None`.
    pub async fn fetch_owned(
        &self,
        horse_id: &str,
        owner_id: &str,
    ) -> Result<Option<Horse>, HorseError> {
        let row = sqlx::query_as::<_, HorseRow>(
            "SELECT id, owner_id, name, created_at, updated_at FROM horses WHERE id = ? AND owner_id = ?",
        )
        .bind(horse_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HorseRow::into_domain))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HorseRow {
    id: String,
    owner_id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl HorseRow {
    fn into_domain(self) -> Horse {
        Horse {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Errors that can occur while reading or writing horses.
#[derive(Debug, Error)]
pub enum HorseError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_db;
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn migrations_apply() {
        let (db, _dir) = setup_db().await;

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '_sqlx%'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert_eq!(tables.0, 5, "expected core tables to be created");
    }

    #[tokio::test]
    async fn fetch_owned_hides_other_owners() {
        let (db, _dir) = setup_db().await;
        let repo = db.horses();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let horse = repo.create("owner-1", "Blakken", now).await.expect("create");

        let own = repo.fetch_owned(&horse.id, "owner-1").await.expect("fetch");
        assert_eq!(own.map(|h| h.name), Some("Blakken".to_string()));

        let foreign = repo.fetch_owned(&horse.id, "owner-2").await.expect("fetch");
        assert!(foreign.is_none());

        let missing = repo.fetch_owned("missing", "owner-1").await.expect("fetch");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn list_for_owner_returns_only_own_horses() {
        let (db, _dir) = setup_db().await;
        let repo = db.horses();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        repo.create("owner-1", "Blakken", now).await.expect("create");
        repo.create("owner-1", "Svarten", now + chrono::Duration::minutes(1))
            .await
            .expect("create");
        repo.create("owner-2", "Fjordgutten", now).await.expect("create");

        let names: Vec<String> = repo
            .list_for_owner("owner-1")
            .await
            .expect("list")
            .into_iter()
            .map(|horse| horse.name)
            .collect();
        assert_eq!(names, ["Blakken", "Svarten"]);
    }

    #[test]
    fn decode_helpers_report_column() {
        let err = decode_month("start_month", "2024-13").unwrap_err();
        assert_eq!(err.column, "start_month");
        assert!(decode_decimal("amount", "12.50").is_ok());
        assert!(decode_u32("anchor_day", -1).is_err());
    }
}
