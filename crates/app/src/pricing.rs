use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stallplass_core::pricing::{self, DiscountTierDraft};
use stallplass_core::types::{BasePrice, DiscountBasis, DiscountTier, PriceQuote, PricingCategory};
use stallplass_storage::{DiscountTierError, TierWrite};
use tracing::{debug, error, info};

use crate::auth::AdminCaller;
use crate::extract::ApiJson;
use crate::problem::{internal_error, not_found, ProblemResponse};
use crate::router::AppState;

/// Tier as exposed over HTTP, with range keys named after the category's basis.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountTierView {
    id: String,
    category: PricingCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_boxes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_boxes: Option<Option<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_duration: Option<Option<u32>>,
    discount_percentage: Decimal,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DiscountTier> for DiscountTierView {
    fn from(tier: DiscountTier) -> Self {
        let (min_boxes, max_boxes, min_duration, max_duration) = match tier.category.basis() {
            DiscountBasis::Quantity => (Some(tier.min_value), Some(tier.max_value), None, None),
            DiscountBasis::Duration => (None, None, Some(tier.min_value), Some(tier.max_value)),
        };
        Self {
            id: tier.id,
            category: tier.category,
            min_boxes,
            max_boxes,
            min_duration,
            max_duration,
            discount_percentage: tier.discount_percentage,
            is_active: tier.is_active,
            created_at: tier.created_at,
            updated_at: tier.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuoteRequest {
    category: PricingCategory,
    value: u32,
    #[serde(default)]
    base_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasePriceBody {
    amount: Decimal,
}

fn parse_category(raw: &str) -> Result<PricingCategory, ProblemResponse> {
    raw.parse::<PricingCategory>().map_err(ProblemResponse::from)
}

fn tier_not_found() -> ProblemResponse {
    not_found("discount_tier_not_found", "discount tier not found")
}

fn storage_failure(err: impl std::fmt::Display, what: &'static str) -> ProblemResponse {
    error!(stage = "pricing", error = %err, "failed to {what}");
    internal_error(format!("failed to {what}"))
}

async fn load_active(
    state: &AppState,
    category: PricingCategory,
) -> Result<Vec<DiscountTier>, ProblemResponse> {
    state
        .storage()
        .discount_tiers()
        .list_active(category)
        .await
        .map_err(|err| storage_failure(err, "load discount tiers"))
}

pub async fn list_active_discounts(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<DiscountTierView>>, ProblemResponse> {
    let category = parse_category(&category)?;
    let tiers = load_active(&state, category).await?;
    Ok(Json(tiers.into_iter().map(DiscountTierView::from).collect()))
}

pub async fn quote(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<QuoteRequest>,
) -> Result<Json<PriceQuote>, ProblemResponse> {
    let base_price = match body.base_price {
        Some(amount) => amount,
        None => state
            .storage()
            .base_prices()
            .fetch(body.category)
            .await
            .map_err(|err| storage_failure(err, "load base price"))?
            .map(|price| price.amount)
            .ok_or_else(|| {
                ProblemResponse::new(
                    StatusCode::BAD_REQUEST,
                    "base_price_missing",
                    format!("no base price configured for {}", body.category),
                )
            })?,
    };

    let tiers = load_active(&state, body.category).await?;
    let quote = pricing::quote(&tiers, body.category, body.value, base_price)?;

    let matched = if quote.tier_id.is_some() { "true" } else { "false" };
    counter!(
        "pricing_quotes_total",
        "category" => body.category.as_str(),
        "matched" => matched
    )
    .increment(1);
    debug!(
        stage = "pricing",
        category = %quote.category,
        value = quote.value,
        tier_id = ?quote.tier_id,
        effective_price = %quote.effective_price,
        "resolved price quote"
    );
    Ok(Json(quote))
}

pub async fn list_tiers(
    State(state): State<AppState>,
    _admin: AdminCaller,
) -> Result<Json<Vec<DiscountTierView>>, ProblemResponse> {
    let tiers = state
        .storage()
        .discount_tiers()
        .list(None)
        .await
        .map_err(|err| storage_failure(err, "list discount tiers"))?;
    Ok(Json(tiers.into_iter().map(DiscountTierView::from).collect()))
}

fn tier_overlap(conflict: &DiscountTier) -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::CONFLICT,
        "tier_overlap",
        format!("range overlaps active {} tier {}", conflict.category, conflict.id),
    )
}

fn tier_write_failure(err: DiscountTierError, what: &'static str) -> ProblemResponse {
    match err {
        DiscountTierError::Contended => ProblemResponse::new(
            StatusCode::CONFLICT,
            "tier_write_conflict",
            "another discount tier change landed first; retry the request",
        ),
        other => storage_failure(other, what),
    }
}

pub async fn create_tier(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    ApiJson(draft): ApiJson<DiscountTierDraft>,
) -> Result<(StatusCode, Json<DiscountTierView>), ProblemResponse> {
    let definition = draft.validate()?;

    let write = state
        .storage()
        .discount_tiers()
        .create(&definition, state.now())
        .await
        .map_err(|err| tier_write_failure(err, "create discount tier"))?;
    let tier = match write {
        TierWrite::Stored(tier) => tier,
        TierWrite::Overlaps(conflict) => return Err(tier_overlap(&conflict)),
        TierWrite::Missing => return Err(tier_not_found()),
    };

    counter!("discount_tier_writes_total", "op" => "create").increment(1);
    info!(
        stage = "pricing",
        admin = %admin.user_id,
        tier_id = %tier.id,
        category = %tier.category,
        "discount tier created"
    );
    Ok((StatusCode::CREATED, Json(tier.into())))
}

pub async fn update_tier(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Path(tier_id): Path<String>,
    ApiJson(draft): ApiJson<DiscountTierDraft>,
) -> Result<Json<DiscountTierView>, ProblemResponse> {
    let definition = draft.validate()?;

    let write = state
        .storage()
        .discount_tiers()
        .update(&tier_id, &definition, state.now())
        .await
        .map_err(|err| tier_write_failure(err, "update discount tier"))?;
    let tier = match write {
        TierWrite::Stored(tier) => tier,
        TierWrite::Overlaps(conflict) => return Err(tier_overlap(&conflict)),
        TierWrite::Missing => return Err(tier_not_found()),
    };

    counter!("discount_tier_writes_total", "op" => "update").increment(1);
    info!(stage = "pricing", admin = %admin.user_id, tier_id = %tier.id, "discount tier updated");
    Ok(Json(tier.into()))
}

pub async fn delete_tier(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Path(tier_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .discount_tiers()
        .delete(&tier_id)
        .await
        .map_err(|err| storage_failure(err, "delete discount tier"))?;
    if !deleted {
        return Err(tier_not_found());
    }

    counter!("discount_tier_writes_total", "op" => "delete").increment(1);
    info!(stage = "pricing", admin = %admin.user_id, %tier_id, "discount tier deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_base_prices(
    State(state): State<AppState>,
    _admin: AdminCaller,
) -> Result<Json<Vec<BasePrice>>, ProblemResponse> {
    state
        .storage()
        .base_prices()
        .list()
        .await
        .map(Json)
        .map_err(|err| storage_failure(err, "list base prices"))
}

pub async fn set_base_price(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Path(category): Path<String>,
    ApiJson(body): ApiJson<BasePriceBody>,
) -> Result<Json<BasePrice>, ProblemResponse> {
    let category = parse_category(&category)?;
    let amount = pricing::validate_base_price("amount", body.amount)?;

    let price = state
        .storage()
        .base_prices()
        .upsert(category, amount, state.now())
        .await
        .map_err(|err| storage_failure(err, "store base price"))?;

    info!(
        stage = "pricing",
        admin = %admin.user_id,
        %category,
        amount = %price.amount,
        "base price updated"
    );
    Ok(Json(price))
}
