use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use stallplass_core::pricing::{find_overlap, TierDefinition};
use stallplass_core::types::{BasePrice, DiscountTier, PricingCategory};

use crate::{decode_decimal, decode_enum, decode_u32, new_id, to_rfc3339, DecodeError};

const TIER_COLUMNS: &str =
    "id, category, min_value, max_value, discount_percentage, is_active, created_at, updated_at";

/// Repository backing discount tier administration and lookups.
#[derive(Clone)]
pub struct DiscountTierRepository {
    pool: SqlitePool,
}

impl DiscountTierRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a tier unless it overlaps an active tier of the same category.
    ///
    /// The overlap check and the insert share one transaction.
    pub async fn create(
        &self,
        definition: &TierDefinition,
        now: DateTime<Utc>,
    ) -> Result<TierWrite, DiscountTierError> {
        let mut tx = self.pool.begin().await?;
        if let Some(conflict) = overlapping_tier(&mut tx, definition, None).await? {
            return Ok(TierWrite::Overlaps(conflict));
        }

        let id = new_id();
        sqlx::query(
            "INSERT INTO discount_tiers \
             (id, category, min_value, max_value, discount_percentage, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(definition.category.as_str())
        .bind(definition.min_value)
        .bind(definition.max_value)
        .bind(definition.discount_percentage.to_string())
        .bind(definition.is_active)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&mut *tx)
        .await
        .map_err(DiscountTierError::from_write)?;
        tx.commit().await.map_err(DiscountTierError::from_write)?;

        Ok(TierWrite::Stored(DiscountTier {
            id,
            category: definition.category,
            min_value: definition.min_value,
            max_value: definition.max_value,
            discount_percentage: definition.discount_percentage,
            is_active: definition.is_active,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Replaces a tier definition.
    ///
    /// Unknown ids report [`TierWrite::Missing`] before any overlap is considered.
    pub async fn update(
        &self,
        tier_id: &str,
        definition: &TierDefinition,
        now: DateTime<Utc>,
    ) -> Result<TierWrite, DiscountTierError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query_scalar::<_, String>("SELECT id FROM discount_tiers WHERE id = ?")
            .bind(tier_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(TierWrite::Missing);
        }
        if let Some(conflict) = overlapping_tier(&mut tx, definition, Some(tier_id)).await? {
            return Ok(TierWrite::Overlaps(conflict));
        }

        let row = sqlx::query_as::<_, DiscountTierRow>(&format!(
            "UPDATE discount_tiers \
             SET category = ?, min_value = ?, max_value = ?, discount_percentage = ?, is_active = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING {TIER_COLUMNS}"
        ))
        .bind(definition.category.as_str())
        .bind(definition.min_value)
        .bind(definition.max_value)
        .bind(definition.discount_percentage.to_string())
        .bind(definition.is_active)
        .bind(to_rfc3339(now))
        .bind(tier_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DiscountTierError::from_write)?;
        tx.commit().await.map_err(DiscountTierError::from_write)?;

        Ok(TierWrite::Stored(row.into_domain()?))
    }

    pub async fn delete(&self, tier_id: &str) -> Result<bool, DiscountTierError> {
        let result = sqlx::query("DELETE FROM discount_tiers WHERE id = ?")
            .bind(tier_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lists tiers, optionally restricted to one category, ordered by floor.
    pub async fn list(
        &self,
        category: Option<PricingCategory>,
    ) -> Result<Vec<DiscountTier>, DiscountTierError> {
        let rows = match category {
            Some(category) => {
                sqlx::query_as::<_, DiscountTierRow>(&format!(
                    "SELECT {TIER_COLUMNS} FROM discount_tiers WHERE category = ? ORDER BY min_value, id"
                ))
                .bind(category.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DiscountTierRow>(&format!(
                    "SELECT {TIER_COLUMNS} FROM discount_tiers ORDER BY category, min_value, id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| row.into_domain().map_err(DiscountTierError::from))
            .collect()
    }

    /// Lists only the active tiers of `category`.
    pub async fn list_active(
        &self,
        category: PricingCategory,
    ) -> Result<Vec<DiscountTier>, DiscountTierError> {
        let rows = sqlx::query_as::<_, DiscountTierRow>(&format!(
            "SELECT {TIER_COLUMNS} FROM discount_tiers WHERE category = ? AND is_active = 1 ORDER BY min_value, id"
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(DiscountTierError::from))
            .collect()
    }
}

async fn overlapping_tier(
    tx: &mut Transaction<'_, Sqlite>,
    definition: &TierDefinition,
    exclude_id: Option<&str>,
) -> Result<Option<DiscountTier>, DiscountTierError> {
    let rows = sqlx::query_as::<_, DiscountTierRow>(&format!(
        "SELECT {TIER_COLUMNS} FROM discount_tiers WHERE category = ? AND is_active = 1"
    ))
    .bind(definition.category.as_str())
    .fetch_all(&mut **tx)
    .await?;

    let active = rows
        .into_iter()
        .map(DiscountTierRow::into_domain)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(find_overlap(definition, &active, exclude_id).cloned())
}

/// Outcome of a checked tier write.
#[derive(Debug)]
pub enum TierWrite {
    Stored(DiscountTier),
    /// An active tier of the same category already covers part of the range.
    Overlaps(DiscountTier),
    Missing,
}

#[derive(Debug, sqlx::FromRow)]
struct DiscountTierRow {
    id: String,
    category: String,
    min_value: i64,
    max_value: Option<i64>,
    discount_percentage: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DiscountTierRow {
    fn into_domain(self) -> Result<DiscountTier, DecodeError> {
        Ok(DiscountTier {
            category: decode_enum("category", &self.category)?,
            min_value: decode_u32("min_value", self.min_value)?,
            max_value: self
                .max_value
                .map(|raw| decode_u32("max_value", raw))
                .transpose()?,
            discount_percentage: decode_decimal("discount_percentage", &self.discount_percentage)?,
            id: self.id,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or writing discount tiers.
#[derive(Debug, Error)]
pub enum DiscountTierError {
    #[error("failed to decode discount tier: {0}")]
    Decode(#[from] DecodeError),
    #[error("another tier write committed first")]
    Contended,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DiscountTierError {
    /// A write that lost the race against a concurrent tier write surfaces as
    /// `SQLITE_BUSY` or `SQLITE_BUSY_SNAPSHOT`.
    fn from_write(err: sqlx::Error) -> Self {
        let busy = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "5" || code == "517");
        if busy {
            Self::Contended
        } else {
            Self::Database(err)
        }
    }
}

/// Repository for the per-category base prices.
#[derive(Clone)]
pub struct BasePriceRepository {
    pool: SqlitePool,
}

impl BasePriceRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch(
        &self,
        category: PricingCategory,
    ) -> Result<Option<BasePrice>, BasePriceError> {
        let row = sqlx::query_as::<_, BasePriceRow>(
            "SELECT category, amount, updated_at FROM base_prices WHERE category = ?",
        )
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(BasePriceRow::into_domain)
            .transpose()
            .map_err(BasePriceError::from)
    }

    pub async fn list(&self) -> Result<Vec<BasePrice>, BasePriceError> {
        let rows = sqlx::query_as::<_, BasePriceRow>(
            "SELECT category, amount, updated_at FROM base_prices ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(BasePriceError::from))
            .collect()
    }

    /// Sets the base price of `category`, replacing any previous value.
    pub async fn upsert(
        &self,
        category: PricingCategory,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<BasePrice, BasePriceError> {
        sqlx::query(
            "INSERT INTO base_prices (category, amount, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(category) DO UPDATE SET amount = excluded.amount, updated_at = excluded.updated_at",
        )
        .bind(category.as_str())
        .bind(amount.to_string())
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;

        Ok(BasePrice {
            category,
            amount,
            updated_at: now,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BasePriceRow {
    category: String,
    amount: String,
    updated_at: DateTime<Utc>,
}

impl BasePriceRow {
    fn into_domain(self) -> Result<BasePrice, DecodeError> {
        Ok(BasePrice {
            category: decode_enum("category", &self.category)?,
            amount: decode_decimal("amount", &self.amount)?,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or writing base prices.
#[derive(Debug, Error)]
pub enum BasePriceError {
    #[error("failed to decode base price: {0}")]
    Decode(#[from] DecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
