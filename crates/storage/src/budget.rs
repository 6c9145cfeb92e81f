use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use stallplass_core::budget::{BudgetItemDraft, BudgetOverrideDraft};
use stallplass_core::types::{BudgetItem, BudgetOverride};
use stallplass_core::YearMonth;

use crate::{
    decode_decimal, decode_enum, decode_month, decode_u32, new_id, to_rfc3339, DecodeError,
};

const ITEM_COLUMNS: &str = "id, horse_id, title, category, emoji, amount, is_recurring, \
     start_month, end_month, interval_months, anchor_day, created_at, updated_at";

const OVERRIDE_COLUMNS: &str =
    "id, budget_item_id, month, override_amount, skip, note, created_at, updated_at";

/// Repository for recurring and one-off budget item definitions.
#[derive(Clone)]
pub struct BudgetItemRepository {
    pool: SqlitePool,
}

impl BudgetItemRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists a validated draft for `horse_id`.
    pub async fn create(
        &self,
        horse_id: &str,
        draft: &BudgetItemDraft,
        now: DateTime<Utc>,
    ) -> Result<BudgetItem, BudgetItemError> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO budget_items \
             (id, horse_id, title, category, emoji, amount, is_recurring, start_month, end_month, interval_months, anchor_day, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(horse_id)
        .bind(&draft.title)
        .bind(draft.category.as_str())
        .bind(&draft.emoji)
        .bind(draft.amount.to_string())
        .bind(draft.is_recurring)
        .bind(draft.start_month.to_string())
        .bind(draft.end_month.map(|month| month.to_string()))
        .bind(draft.interval_months)
        .bind(draft.anchor_day)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;

        Ok(BudgetItem {
            id,
            horse_id: horse_id.to_string(),
            title: draft.title.clone(),
            category: draft.category,
            emoji: draft.emoji.clone(),
            amount: draft.amount,
            is_recurring: draft.is_recurring,
            start_month: draft.start_month,
            end_month: draft.end_month,
            interval_months: draft.interval_months,
            anchor_day: draft.anchor_day,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces every editable field; `None` when the item is not on this horse.
    pub async fn update(
        &self,
        horse_id: &str,
        item_id: &str,
        draft: &BudgetItemDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<BudgetItem>, BudgetItemError> {
        let row = sqlx::query_as::<_, BudgetItemRow>(&format!(
            "UPDATE budget_items \
             SET title = ?, category = ?, emoji = ?, amount = ?, is_recurring = ?, start_month = ?, \
                 end_month = ?, interval_months = ?, anchor_day = ?, updated_at = ? \
             WHERE id = ? AND horse_id = ? \
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(&draft.title)
        .bind(draft.category.as_str())
        .bind(&draft.emoji)
        .bind(draft.amount.to_string())
        .bind(draft.is_recurring)
        .bind(draft.start_month.to_string())
        .bind(draft.end_month.map(|month| month.to_string()))
        .bind(draft.interval_months)
        .bind(draft.anchor_day)
        .bind(to_rfc3339(now))
        .bind(item_id)
        .bind(horse_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BudgetItemRow::into_domain)
            .transpose()
            .map_err(BudgetItemError::from)
    }

    /// Deletes the item and, through the foreign key, its overrides.
    pub async fn delete(&self, horse_id: &str, item_id: &str) -> Result<bool, BudgetItemError> {
        let result = sqlx::query("DELETE FROM budget_items WHERE id = ? AND horse_id = ?")
            .bind(item_id)
            .bind(horse_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch(
        &self,
        horse_id: &str,
        item_id: &str,
    ) -> Result<Option<BudgetItem>, BudgetItemError> {
        let row = sqlx::query_as::<_, BudgetItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM budget_items WHERE id = ? AND horse_id = ?"
        ))
        .bind(item_id)
        .bind(horse_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BudgetItemRow::into_domain)
            .transpose()
            .map_err(BudgetItemError::from)
    }

    /// Lists all items of a horse ordered by start month.
    pub async fn list_for_horse(&self, horse_id: &str) -> Result<Vec<BudgetItem>, BudgetItemError> {
        let rows = sqlx::query_as::<_, BudgetItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM budget_items WHERE horse_id = ? ORDER BY start_month, created_at, id"
        ))
        .bind(horse_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(BudgetItemError::from))
            .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BudgetItemRow {
    id: String,
    horse_id: String,
    title: String,
    category: String,
    emoji: Option<String>,
    amount: String,
    is_recurring: bool,
    start_month: String,
    end_month: Option<String>,
    interval_months: Option<i64>,
    anchor_day: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BudgetItemRow {
    fn into_domain(self) -> Result<BudgetItem, DecodeError> {
        Ok(BudgetItem {
            category: decode_enum("category", &self.category)?,
            amount: decode_decimal("amount", &self.amount)?,
            start_month: decode_month("start_month", &self.start_month)?,
            end_month: self
                .end_month
                .as_deref()
                .map(|raw| decode_month("end_month", raw))
                .transpose()?,
            interval_months: self
                .interval_months
                .map(|raw| decode_u32("interval_months", raw))
                .transpose()?,
            anchor_day: self
                .anchor_day
                .map(|raw| decode_u32("anchor_day", raw))
                .transpose()?,
            id: self.id,
            horse_id: self.horse_id,
            title: self.title,
            emoji: self.emoji,
            is_recurring: self.is_recurring,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or writing budget items.
#[derive(Debug, Error)]
pub enum BudgetItemError {
    #[error("failed to decode budget item: {0}")]
    Decode(#[from] DecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for per-month overrides, unique on `(budget_item_id, month)`.
#[derive(Clone)]
pub struct BudgetOverrideRepository {
    pool: SqlitePool,
}

impl BudgetOverrideRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the override or replaces the existing one for the same item and month.
    ///
    /// A replaced override keeps its id and `created_at`.
    pub async fn upsert(
        &self,
        draft: &BudgetOverrideDraft,
        now: DateTime<Utc>,
    ) -> Result<BudgetOverride, BudgetOverrideError> {
        let row = sqlx::query_as::<_, BudgetOverrideRow>(&format!(
            "INSERT INTO budget_overrides \
             (id, budget_item_id, month, override_amount, skip, note, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(budget_item_id, month) DO UPDATE \
             SET override_amount = excluded.override_amount, \
                 skip = excluded.skip, \
                 note = excluded.note, \
                 updated_at = excluded.updated_at \
             RETURNING {OVERRIDE_COLUMNS}"
        ))
        .bind(new_id())
        .bind(&draft.budget_item_id)
        .bind(draft.month.to_string())
        .bind(draft.override_amount.map(|amount| amount.to_string()))
        .bind(draft.skip)
        .bind(&draft.note)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_domain()?)
    }

    /// Removes the override for `(budget_item_id, month)`, reporting whether one existed.
    pub async fn delete(
        &self,
        budget_item_id: &str,
        month: YearMonth,
    ) -> Result<bool, BudgetOverrideError> {
        let result =
            sqlx::query("DELETE FROM budget_overrides WHERE budget_item_id = ? AND month = ?")
                .bind(budget_item_id)
                .bind(month.to_string())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lists overrides of every item of `horse_id` falling in `[from, to]`.
    pub async fn list_for_horse_in_range(
        &self,
        horse_id: &str,
        from: YearMonth,
        to: YearMonth,
    ) -> Result<Vec<BudgetOverride>, BudgetOverrideError> {
        let rows = sqlx::query_as::<_, BudgetOverrideRow>(
            "SELECT o.id, o.budget_item_id, o.month, o.override_amount, o.skip, o.note, o.created_at, o.updated_at \
               FROM budget_overrides AS o \
               JOIN budget_items AS i ON i.id = o.budget_item_id \
              WHERE i.horse_id = ? \
                AND o.month >= ? \
                AND o.month <= ? \
              ORDER BY o.month, o.budget_item_id",
        )
        .bind(horse_id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(BudgetOverrideError::from))
            .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BudgetOverrideRow {
    id: String,
    budget_item_id: String,
    month: String,
    override_amount: Option<String>,
    skip: bool,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BudgetOverrideRow {
    fn into_domain(self) -> Result<BudgetOverride, DecodeError> {
        Ok(BudgetOverride {
            month: decode_month("month", &self.month)?,
            override_amount: self
                .override_amount
                .as_deref()
                .map(|raw| decode_decimal("override_amount", raw))
                .transpose()?,
            id: self.id,
            budget_item_id: self.budget_item_id,
            skip: self.skip,
            note: self.note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or writing overrides.
#[derive(Debug, Error)]
pub enum BudgetOverrideError {
    #[error("failed to decode budget override: {0}")]
    Decode(#[from] DecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
