//! Discount tier validation and price resolution.

use std::cmp::Ordering;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::types::{DiscountBasis, DiscountTier, PriceQuote, PricingCategory};
use crate::validation::{self, ValidationError};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Admin payload for creating or replacing a discount tier.
///
/// Box tiers are expressed in boxes, boost and service tiers in duration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiscountTierDraft {
    pub category: PricingCategory,
    #[serde(default)]
    pub min_boxes: Option<u32>,
    #[serde(default)]
    pub max_boxes: Option<u32>,
    #[serde(default)]
    pub min_duration: Option<u32>,
    #[serde(default)]
    pub max_duration: Option<u32>,
    pub discount_percentage: Decimal,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A validated tier definition ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TierDefinition {
    pub category: PricingCategory,
    pub min_value: u32,
    pub max_value: Option<u32>,
    pub discount_percentage: Decimal,
    pub is_active: bool,
}

impl DiscountTierDraft {
    pub fn validate(self) -> Result<TierDefinition, ValidationError> {
        let (min, max, min_field, max_field, floor) = match self.category.basis() {
            DiscountBasis::Quantity => {
                if self.min_duration.is_some() || self.max_duration.is_some() {
                    return Err(ValidationError::new(
                        "minDuration",
                        "box tiers use minBoxes/maxBoxes",
                    ));
                }
                (self.min_boxes, self.max_boxes, "minBoxes", "maxBoxes", 1)
            }
            DiscountBasis::Duration => {
                if self.min_boxes.is_some() || self.max_boxes.is_some() {
                    return Err(ValidationError::new(
                        "minBoxes",
                        "duration tiers use minDuration/maxDuration",
                    ));
                }
                (
                    self.min_duration,
                    self.max_duration,
                    "minDuration",
                    "maxDuration",
                    0,
                )
            }
        };

        let min_value = min.ok_or_else(|| ValidationError::new(min_field, "is required"))?;
        if min_value < floor {
            return Err(ValidationError::new(
                min_field,
                format!("must be at least {floor}"),
            ));
        }
        if let Some(max_value) = max {
            if max_value <= min_value {
                return Err(ValidationError::new(
                    max_field,
                    format!("must be greater than {min_field}"),
                ));
            }
        }

        Ok(TierDefinition {
            category: self.category,
            min_value,
            max_value: max,
            discount_percentage: validate_percentage(self.discount_percentage)?,
            is_active: self.is_active,
        })
    }
}

/// Percentages must lie in `(0, 100]` with at most two decimals.
pub fn validate_percentage(value: Decimal) -> Result<Decimal, ValidationError> {
    const FIELD: &str = "discountPercentage";
    if value <= Decimal::ZERO {
        return Err(ValidationError::new(FIELD, "must be greater than 0"));
    }
    if value > HUNDRED {
        return Err(ValidationError::new(FIELD, "must be at most 100"));
    }
    if value.normalize().scale() > 2 {
        return Err(ValidationError::new(FIELD, "must have at most two decimals"));
    }
    Ok(value)
}

impl TierDefinition {
    fn overlaps(&self, tier: &DiscountTier) -> bool {
        let starts_before_other_ends = tier.max_value.map_or(true, |max| self.min_value < max);
        let other_starts_before_end = self.max_value.map_or(true, |max| tier.min_value < max);
        starts_before_other_ends && other_starts_before_end
    }
}

/// Returns an active tier of the same category whose range overlaps `definition`.
///
/// Inactive definitions never conflict. `exclude_id` skips the tier being replaced.
pub fn find_overlap<'a>(
    definition: &TierDefinition,
    existing: &'a [DiscountTier],
    exclude_id: Option<&str>,
) -> Option<&'a DiscountTier> {
    if !definition.is_active {
        return None;
    }
    existing.iter().find(|tier| {
        tier.is_active
            && tier.category == definition.category
            && Some(tier.id.as_str()) != exclude_id
            && definition.overlaps(tier)
    })
}

/// Picks the tier applied to `value`.
///
/// Among active tiers of `category` containing `value`, the highest floor
/// wins; ties go to the larger percentage, then the smallest id.
pub fn select_tier<'a>(
    tiers: &'a [DiscountTier],
    category: PricingCategory,
    value: u32,
) -> Option<&'a DiscountTier> {
    tiers
        .iter()
        .filter(|tier| tier.is_active && tier.category == category && tier.contains(value))
        .max_by(|a, b| compare_precedence(a, b))
}

fn compare_precedence(a: &DiscountTier, b: &DiscountTier) -> Ordering {
    a.min_value
        .cmp(&b.min_value)
        .then_with(|| a.discount_percentage.cmp(&b.discount_percentage))
        .then_with(|| b.id.cmp(&a.id))
}

/// `base * (1 - percentage / 100)`, rounded to øre with midpoints away from zero.
pub fn apply_discount(base_price: Decimal, percentage: Decimal) -> Decimal {
    let factor = Decimal::ONE - percentage / HUNDRED;
    (base_price * factor).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Base prices are non-negative amounts with at most two decimals.
pub fn validate_base_price(
    field: &'static str,
    value: Decimal,
) -> Result<Decimal, ValidationError> {
    validation::amount(field, value, true)
}

/// Resolves the effective price for `value` units of `category`.
pub fn quote(
    tiers: &[DiscountTier],
    category: PricingCategory,
    value: u32,
    base_price: Decimal,
) -> Result<PriceQuote, ValidationError> {
    let base_price = validate_base_price("basePrice", base_price)?;
    let tier = select_tier(tiers, category, value);
    let discount_percentage = tier.map_or(Decimal::ZERO, |tier| tier.discount_percentage);

    Ok(PriceQuote {
        category,
        value,
        base_price,
        discount_percentage,
        tier_id: tier.map(|tier| tier.id.clone()),
        effective_price: apply_discount(base_price, discount_percentage),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal")
    }

    fn tier(
        id: &str,
        category: PricingCategory,
        min: u32,
        max: Option<u32>,
        pct: &str,
    ) -> DiscountTier {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        DiscountTier {
            id: id.to_string(),
            category,
            min_value: min,
            max_value: max,
            discount_percentage: dec(pct),
            is_active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn box_draft(min: Option<u32>, max: Option<u32>, pct: &str) -> DiscountTierDraft {
        DiscountTierDraft {
            category: PricingCategory::Box,
            min_boxes: min,
            max_boxes: max,
            min_duration: None,
            max_duration: None,
            discount_percentage: dec(pct),
            is_active: true,
        }
    }

    #[test]
    fn twenty_percent_off_for_four_boxes() {
        let tiers = [tier("t-1", PricingCategory::Box, 3, Some(5), "20")];
        let quote = quote(&tiers, PricingCategory::Box, 4, dec("1000")).expect("quote");
        assert_eq!(quote.effective_price, dec("800"));
        assert_eq!(quote.discount_percentage, dec("20"));
        assert_eq!(quote.tier_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn upper_bound_is_exclusive() {
        let tiers = [tier("t-1", PricingCategory::Box, 3, Some(5), "20")];
        assert!(select_tier(&tiers, PricingCategory::Box, 5).is_none());
        assert!(select_tier(&tiers, PricingCategory::Box, 3).is_some());
        assert!(select_tier(&tiers, PricingCategory::Box, 2).is_none());
    }

    #[test]
    fn unbounded_tier_matches_everything_above_floor() {
        let tiers = [tier("t-1", PricingCategory::Boost, 30, None, "15")];
        assert!(select_tier(&tiers, PricingCategory::Boost, 365).is_some());
        assert!(select_tier(&tiers, PricingCategory::Service, 365).is_none());
    }

    #[test]
    fn highest_floor_wins_among_overlaps() {
        let tiers = [
            tier("wide", PricingCategory::Box, 2, None, "30"),
            tier("narrow", PricingCategory::Box, 5, Some(10), "10"),
        ];
        let chosen = select_tier(&tiers, PricingCategory::Box, 6).expect("tier");
        assert_eq!(chosen.id, "narrow");
    }

    #[test]
    fn equal_floors_prefer_larger_percentage_then_smaller_id() {
        let tiers = [
            tier("b", PricingCategory::Box, 2, None, "10"),
            tier("c", PricingCategory::Box, 2, None, "25"),
            tier("a", PricingCategory::Box, 2, None, "25"),
        ];
        let chosen = select_tier(&tiers, PricingCategory::Box, 3).expect("tier");
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn inactive_tiers_are_ignored() {
        let mut inactive = tier("t-1", PricingCategory::Box, 1, None, "50");
        inactive.is_active = false;
        let quote = quote(&[inactive], PricingCategory::Box, 3, dec("1000")).expect("quote");
        assert_eq!(quote.effective_price, dec("1000"));
        assert_eq!(quote.tier_id, None);
        assert_eq!(quote.discount_percentage, Decimal::ZERO);
    }

    #[test]
    fn discount_rounds_to_two_decimals() {
        assert_eq!(apply_discount(dec("99.99"), dec("33")), dec("66.99"));
        assert_eq!(apply_discount(dec("0.05"), dec("50")), dec("0.03"));
        assert_eq!(apply_discount(dec("250"), dec("100")), Decimal::ZERO);
    }

    #[test]
    fn percentage_bounds() {
        assert!(validate_percentage(Decimal::ZERO).is_err());
        assert!(validate_percentage(dec("100")).is_ok());
        assert!(validate_percentage(dec("100.01")).is_err());
        assert!(validate_percentage(dec("12.5")).is_ok());
        assert!(validate_percentage(dec("12.555")).is_err());
    }

    #[test]
    fn box_draft_requires_positive_floor_and_larger_max() {
        assert_eq!(box_draft(Some(0), None, "10").validate().unwrap_err().field, "minBoxes");
        assert_eq!(box_draft(None, None, "10").validate().unwrap_err().field, "minBoxes");
        assert_eq!(box_draft(Some(3), Some(3), "10").validate().unwrap_err().field, "maxBoxes");

        let definition = box_draft(Some(3), Some(5), "20").validate().expect("valid");
        assert_eq!(definition.min_value, 3);
        assert_eq!(definition.max_value, Some(5));
    }

    #[test]
    fn duration_draft_allows_zero_floor_and_rejects_box_fields() {
        let draft = DiscountTierDraft {
            category: PricingCategory::Boost,
            min_boxes: None,
            max_boxes: None,
            min_duration: Some(0),
            max_duration: Some(7),
            discount_percentage: dec("5"),
            is_active: true,
        };
        assert!(draft.clone().validate().is_ok());

        let mixed = DiscountTierDraft {
            min_boxes: Some(2),
            ..draft
        };
        assert_eq!(mixed.validate().unwrap_err().field, "minBoxes");
    }

    #[test]
    fn draft_defaults_to_active() {
        let body = r#"{"category":"box","minBoxes":2,"discountPercentage":10}"#;
        let draft: DiscountTierDraft = serde_json::from_str(body).expect("parse");
        assert!(draft.is_active);
        let extra = r#"{"category":"box","minBoxes":2,"discountPercentage":10,"priority":1}"#;
        assert!(serde_json::from_str::<DiscountTierDraft>(extra).is_err());
    }

    #[test]
    fn overlap_detection_respects_category_activity_and_exclusion() {
        let existing = [
            tier("t-1", PricingCategory::Box, 3, Some(5), "20"),
            tier("t-2", PricingCategory::Boost, 0, None, "10"),
        ];

        let touching = box_draft(Some(5), Some(10), "25").validate().unwrap();
        assert!(find_overlap(&touching, &existing, None).is_none());

        let clashing = box_draft(Some(4), None, "25").validate().unwrap();
        assert_eq!(find_overlap(&clashing, &existing, None).map(|t| t.id.as_str()), Some("t-1"));
        assert!(find_overlap(&clashing, &existing, Some("t-1")).is_none());

        let mut inactive = clashing.clone();
        inactive.is_active = false;
        assert!(find_overlap(&inactive, &existing, None).is_none());
    }
}
