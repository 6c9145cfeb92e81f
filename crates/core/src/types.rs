use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::month::YearMonth;
use crate::validation::ValidationError;

/// A horse registered by an owner; budgets hang off horses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Horse {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Expense category of a budget item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCategory {
    Feed,
    Stable,
    Farrier,
    Veterinary,
    Insurance,
    Equipment,
    Training,
    Competition,
    Transport,
    Other,
}

impl BudgetCategory {
    pub const ALL: [BudgetCategory; 10] = [
        Self::Feed,
        Self::Stable,
        Self::Farrier,
        Self::Veterinary,
        Self::Insurance,
        Self::Equipment,
        Self::Training,
        Self::Competition,
        Self::Transport,
        Self::Other,
    ];

    /// Returns the canonical database representation for the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Stable => "stable",
            Self::Farrier => "farrier",
            Self::Veterinary => "veterinary",
            Self::Insurance => "insurance",
            Self::Equipment => "equipment",
            Self::Training => "training",
            Self::Competition => "competition",
            Self::Transport => "transport",
            Self::Other => "other",
        }
    }

    /// Emoji shown for occurrences whose item has none of its own.
    pub fn default_emoji(self) -> &'static str {
        match self {
            Self::Feed => "🌾",
            Self::Stable => "🏠",
            Self::Farrier => "🔨",
            Self::Veterinary => "🩺",
            Self::Insurance => "🛡️",
            Self::Equipment => "🧰",
            Self::Training => "🏇",
            Self::Competition => "🏆",
            Self::Transport => "🚚",
            Self::Other => "📌",
        }
    }
}

impl FromStr for BudgetCategory {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| ValidationError::new("category", format!("unknown category {value:?}")))
    }
}

/// A planned expense for a horse, either one-off or recurring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetItem {
    pub id: String,
    pub horse_id: String,
    pub title: String,
    pub category: BudgetCategory,
    pub emoji: Option<String>,
    pub amount: Decimal,
    pub is_recurring: bool,
    pub start_month: YearMonth,
    pub end_month: Option<YearMonth>,
    pub interval_months: Option<u32>,
    pub anchor_day: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetItem {
    pub fn emoji(&self) -> &str {
        self.emoji
            .as_deref()
            .unwrap_or_else(|| self.category.default_emoji())
    }

    /// Number of months between occurrences; one-off items report 1.
    pub fn step_months(&self) -> u32 {
        self.interval_months.unwrap_or(1).max(1)
    }
}

/// Per-month exception layered over a budget item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetOverride {
    pub id: String,
    pub budget_item_id: String,
    pub month: YearMonth,
    pub override_amount: Option<Decimal>,
    pub skip: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection of a budget item onto one month, with any override applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetOccurrence {
    pub budget_item_id: String,
    pub month: YearMonth,
    pub day: u32,
    pub title: String,
    pub category: BudgetCategory,
    pub emoji: String,
    pub amount: Decimal,
    pub base_amount: Decimal,
    pub is_recurring: bool,
    pub is_overridden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// All occurrences falling in one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetMonth {
    pub month: YearMonth,
    pub total: Decimal,
    pub items: Vec<BudgetOccurrence>,
}

/// Pricing category a discount tier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingCategory {
    Box,
    Boost,
    Service,
}

/// What a tier's `[min, max)` range measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountBasis {
    /// Number of boxes advertised together.
    Quantity,
    /// Length of a boost or service period.
    Duration,
}

impl PricingCategory {
    pub const ALL: [PricingCategory; 3] = [Self::Box, Self::Boost, Self::Service];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Box => "box",
            Self::Boost => "boost",
            Self::Service => "service",
        }
    }

    pub fn basis(self) -> DiscountBasis {
        match self {
            Self::Box => DiscountBasis::Quantity,
            Self::Boost | Self::Service => DiscountBasis::Duration,
        }
    }
}

impl fmt::Display for PricingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PricingCategory {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| {
                ValidationError::new(
                    "category",
                    format!("unknown pricing category {value:?}, expected box, boost or service"),
                )
            })
    }
}

/// Quantity or duration based price reduction rule.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountTier {
    pub id: String,
    pub category: PricingCategory,
    pub min_value: u32,
    /// Exclusive upper bound; `None` is unbounded.
    pub max_value: Option<u32>,
    pub discount_percentage: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscountTier {
    pub fn contains(&self, value: u32) -> bool {
        value >= self.min_value && self.max_value.map_or(true, |max| value < max)
    }
}

/// Admin configured base price for a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasePrice {
    pub category: PricingCategory,
    pub amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Result of resolving a discount for a base price.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub category: PricingCategory,
    pub value: u32,
    pub base_price: Decimal,
    pub discount_percentage: Decimal,
    pub tier_id: Option<String>,
    pub effective_price: Decimal,
}
