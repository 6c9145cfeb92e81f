//! Budget item validation and the month-by-month occurrence projection.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::month::YearMonth;
use crate::types::{BudgetCategory, BudgetItem, BudgetMonth, BudgetOccurrence, BudgetOverride};
use crate::validation::{self, ValidationError};

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_EMOJI_CHARS: usize = 16;
pub const MAX_NOTE_CHARS: usize = 500;
pub const MAX_INTERVAL_MONTHS: u32 = 60;

/// Body accepted when creating or replacing a budget item.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BudgetItemDraft {
    pub title: String,
    pub category: BudgetCategory,
    #[serde(default)]
    pub emoji: Option<String>,
    pub amount: Decimal,
    pub is_recurring: bool,
    pub start_month: YearMonth,
    #[serde(default)]
    pub end_month: Option<YearMonth>,
    #[serde(default)]
    pub interval_months: Option<u32>,
    #[serde(default)]
    pub anchor_day: Option<u32>,
}

impl BudgetItemDraft {
    /// Validates the draft and returns it normalized for storage.
    ///
    /// Recurring items without an interval are stored as monthly.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let title = validation::required_text("title", &self.title, MAX_TITLE_CHARS)?;
        let emoji = validation::optional_text("emoji", self.emoji.as_deref(), MAX_EMOJI_CHARS)?;
        let amount = validation::amount("amount", self.amount, false)?;

        if let Some(day) = self.anchor_day {
            if !(1..=31).contains(&day) {
                return Err(ValidationError::new("anchorDay", "must be between 1 and 31"));
            }
        }

        let interval_months = if self.is_recurring {
            let interval = self.interval_months.unwrap_or(1);
            if !(1..=MAX_INTERVAL_MONTHS).contains(&interval) {
                return Err(ValidationError::new(
                    "intervalMonths",
                    format!("must be between 1 and {MAX_INTERVAL_MONTHS}"),
                ));
            }
            if let Some(end) = self.end_month {
                if end < self.start_month {
                    return Err(ValidationError::new(
                        "endMonth",
                        "must not be before startMonth",
                    ));
                }
            }
            Some(interval)
        } else {
            if self.interval_months.is_some() {
                return Err(ValidationError::new(
                    "intervalMonths",
                    "is only allowed on recurring items",
                ));
            }
            if self.end_month.is_some() {
                return Err(ValidationError::new(
                    "endMonth",
                    "is only allowed on recurring items",
                ));
            }
            None
        };

        Ok(Self {
            title,
            emoji,
            amount,
            interval_months,
            ..self
        })
    }
}

/// Body accepted when upserting an override.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BudgetOverrideDraft {
    pub budget_item_id: String,
    pub month: YearMonth,
    #[serde(default)]
    pub override_amount: Option<Decimal>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl BudgetOverrideDraft {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.budget_item_id.trim().is_empty() {
            return Err(ValidationError::new("budgetItemId", "must not be empty"));
        }
        let note = validation::optional_text("note", self.note.as_deref(), MAX_NOTE_CHARS)?;
        let override_amount = self
            .override_amount
            .map(|value| validation::amount("overrideAmount", value, true))
            .transpose()?;

        if self.skip && override_amount.is_some() {
            return Err(ValidationError::new(
                "overrideAmount",
                "cannot be combined with skip",
            ));
        }
        if !self.skip && override_amount.is_none() && note.is_none() {
            return Err(ValidationError::new(
                "skip",
                "an override must set skip, overrideAmount or note",
            ));
        }

        Ok(Self {
            note,
            override_amount,
            ..self
        })
    }
}

/// Identifies a single override for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OverrideKey {
    pub budget_item_id: String,
    pub month: YearMonth,
}

/// Inclusive month range for a budget read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetRange {
    from: YearMonth,
    to: YearMonth,
}

impl BudgetRange {
    pub fn new(from: YearMonth, to: YearMonth, max_months: u32) -> Result<Self, ValidationError> {
        if to < from {
            return Err(ValidationError::new("to", "must not be before from"));
        }
        let len = from.months_until(to) + 1;
        if len > i64::from(max_months) {
            return Err(ValidationError::new(
                "to",
                format!("range may span at most {max_months} months"),
            ));
        }
        Ok(Self { from, to })
    }

    /// Parses raw `from`/`to` query values.
    pub fn parse(from: &str, to: &str, max_months: u32) -> Result<Self, ValidationError> {
        let from = from
            .parse::<YearMonth>()
            .map_err(|err| ValidationError::new("from", err.to_string()))?;
        let to = to
            .parse::<YearMonth>()
            .map_err(|err| ValidationError::new("to", err.to_string()))?;
        Self::new(from, to, max_months)
    }

    pub fn from(&self) -> YearMonth {
        self.from
    }

    pub fn to(&self) -> YearMonth {
        self.to
    }

    pub fn contains(&self, month: YearMonth) -> bool {
        self.from <= month && month <= self.to
    }

    pub fn months(&self) -> impl Iterator<Item = YearMonth> {
        self.from.through(self.to)
    }
}

/// Months in `range` on which `item` is scheduled, in ascending order.
pub fn occurrence_months(item: &BudgetItem, range: &BudgetRange) -> Vec<YearMonth> {
    if !item.is_recurring {
        return if range.contains(item.start_month) {
            vec![item.start_month]
        } else {
            Vec::new()
        };
    }

    let last = item.end_month.map_or(range.to(), |end| end.min(range.to()));
    if item.start_month > last {
        return Vec::new();
    }

    let step = item.step_months();
    let mut current = first_on_or_after(item.start_month, step, range.from());
    let mut months = Vec::new();
    while let Some(month) = current {
        if month > last {
            break;
        }
        months.push(month);
        current = month.checked_add_months(step);
    }
    months
}

/// Whether `item` has an occurrence in `month`, ignoring overrides.
pub fn is_scheduled(item: &BudgetItem, month: YearMonth) -> bool {
    if month < item.start_month {
        return false;
    }
    if !item.is_recurring {
        return month == item.start_month;
    }
    if item.end_month.is_some_and(|end| month > end) {
        return false;
    }
    item.start_month.months_until(month) % i64::from(item.step_months()) == 0
}

fn first_on_or_after(start: YearMonth, step: u32, floor: YearMonth) -> Option<YearMonth> {
    let gap = start.months_until(floor);
    if gap <= 0 {
        return Some(start);
    }
    let step = i64::from(step);
    let jumps = (gap + step - 1) / step;
    let offset = u32::try_from(jumps * step).ok()?;
    start.checked_add_months(offset)
}

/// Day of month the item falls on, clamped to the month's length.
pub fn resolve_day(item: &BudgetItem, month: YearMonth) -> u32 {
    item.anchor_day
        .unwrap_or(1)
        .clamp(1, month.days_in_month())
}

/// Expands items into one [`BudgetMonth`] per month of `range`.
///
/// Skipped occurrences are dropped; override amounts replace the displayed
/// amount while `base_amount` keeps the item's own amount.
pub fn expand(
    items: &[BudgetItem],
    overrides: &[BudgetOverride],
    range: &BudgetRange,
) -> Vec<BudgetMonth> {
    let by_key: HashMap<(&str, YearMonth), &BudgetOverride> = overrides
        .iter()
        .map(|entry| ((entry.budget_item_id.as_str(), entry.month), entry))
        .collect();

    let mut per_month: HashMap<YearMonth, Vec<BudgetOccurrence>> = HashMap::new();
    for item in items {
        for month in occurrence_months(item, range) {
            let found = by_key.get(&(item.id.as_str(), month)).copied();
            if found.is_some_and(|entry| entry.skip) {
                continue;
            }
            per_month
                .entry(month)
                .or_default()
                .push(build_occurrence(item, month, found));
        }
    }

    range
        .months()
        .map(|month| {
            let mut occurrences = per_month.remove(&month).unwrap_or_default();
            occurrences.sort_by(|a, b| {
                a.day
                    .cmp(&b.day)
                    .then_with(|| a.title.cmp(&b.title))
                    .then_with(|| a.budget_item_id.cmp(&b.budget_item_id))
            });
            BudgetMonth {
                month,
                total: occurrences.iter().map(|entry| entry.amount).sum(),
                items: occurrences,
            }
        })
        .collect()
}

fn build_occurrence(
    item: &BudgetItem,
    month: YearMonth,
    found: Option<&BudgetOverride>,
) -> BudgetOccurrence {
    let override_amount = found.and_then(|entry| entry.override_amount);
    BudgetOccurrence {
        budget_item_id: item.id.clone(),
        month,
        day: resolve_day(item, month),
        title: item.title.clone(),
        category: item.category,
        emoji: item.emoji().to_string(),
        amount: override_amount.unwrap_or(item.amount),
        base_amount: item.amount,
        is_recurring: item.is_recurring,
        is_overridden: override_amount.is_some(),
        override_id: found.map(|entry| entry.id.clone()),
        note: found.and_then(|entry| entry.note.clone()),
    }
}

/// Sum of every month total.
pub fn grand_total(months: &[BudgetMonth]) -> Decimal {
    months.iter().map(|month| month.total).sum()
}
