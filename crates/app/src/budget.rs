use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stallplass_core::budget::{
    self, BudgetItemDraft, BudgetOverrideDraft, BudgetRange, OverrideKey,
};
use stallplass_core::types::{BudgetItem, BudgetMonth, BudgetOverride, Horse};
use stallplass_core::{ValidationError, YearMonth};
use tracing::{debug, error, info};

use crate::auth::Caller;
use crate::extract::{ApiJson, ApiQuery};
use crate::horses::ensure_owned_horse;
use crate::problem::{internal_error, not_found, ProblemResponse};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeQuery {
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
pub struct BudgetRangeView {
    from: YearMonth,
    to: YearMonth,
    total: Decimal,
    months: Vec<BudgetMonth>,
}

fn item_not_found() -> ProblemResponse {
    not_found("budget_item_not_found", "budget item not found or access denied")
}

fn storage_failure(
    err: impl std::fmt::Display,
    horse: &Horse,
    what: &'static str,
) -> ProblemResponse {
    error!(stage = "budget", horse_id = %horse.id, error = %err, "failed to {what}");
    internal_error(format!("failed to {what}"))
}

pub async fn read_range(
    State(state): State<AppState>,
    caller: Caller,
    Path(horse_id): Path<String>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> Result<Json<BudgetRangeView>, ProblemResponse> {
    let range = BudgetRange::parse(&query.from, &query.to, state.budget_max_range_months())
        .map_err(|err| {
            counter!("budget_range_requests_total", "result" => "invalid").increment(1);
            ProblemResponse::from(err)
        })?;
    let horse = ensure_owned_horse(&state, &caller, &horse_id)
        .await
        .inspect_err(|_| {
            counter!("budget_range_requests_total", "result" => "rejected").increment(1);
        })?;

    let items = state
        .storage()
        .budget_items()
        .list_for_horse(&horse.id)
        .await
        .map_err(|err| storage_failure(err, &horse, "load budget items"))?;
    let overrides = state
        .storage()
        .budget_overrides()
        .list_for_horse_in_range(&horse.id, range.from(), range.to())
        .await
        .map_err(|err| storage_failure(err, &horse, "load budget overrides"))?;

    let months = budget::expand(&items, &overrides, &range);
    let total = budget::grand_total(&months);

    counter!("budget_range_requests_total", "result" => "ok").increment(1);
    histogram!("budget_range_months").record(months.len() as f64);
    debug!(
        stage = "budget",
        horse_id = %horse.id,
        from = %range.from(),
        to = %range.to(),
        items = items.len(),
        overrides = overrides.len(),
        "expanded budget range"
    );

    Ok(Json(BudgetRangeView {
        from: range.from(),
        to: range.to(),
        total,
        months,
    }))
}

pub async fn list_items(
    State(state): State<AppState>,
    caller: Caller,
    Path(horse_id): Path<String>,
) -> Result<Json<Vec<BudgetItem>>, ProblemResponse> {
    let horse = ensure_owned_horse(&state, &caller, &horse_id).await?;
    state
        .storage()
        .budget_items()
        .list_for_horse(&horse.id)
        .await
        .map(Json)
        .map_err(|err| storage_failure(err, &horse, "list budget items"))
}

pub async fn create_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(horse_id): Path<String>,
    ApiJson(draft): ApiJson<BudgetItemDraft>,
) -> Result<(StatusCode, Json<BudgetItem>), ProblemResponse> {
    let horse = ensure_owned_horse(&state, &caller, &horse_id).await?;
    let draft = draft.validate()?;

    let item = state
        .storage()
        .budget_items()
        .create(&horse.id, &draft, state.now())
        .await
        .map_err(|err| storage_failure(err, &horse, "create budget item"))?;

    counter!("budget_writes_total", "entity" => "item", "op" => "create").increment(1);
    info!(stage = "budget", horse_id = %horse.id, item_id = %item.id, "budget item created");
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((horse_id, item_id)): Path<(String, String)>,
    ApiJson(draft): ApiJson<BudgetItemDraft>,
) -> Result<Json<BudgetItem>, ProblemResponse> {
    let horse = ensure_owned_horse(&state, &caller, &horse_id).await?;
    let draft = draft.validate()?;

    let item = state
        .storage()
        .budget_items()
        .update(&horse.id, &item_id, &draft, state.now())
        .await
        .map_err(|err| storage_failure(err, &horse, "update budget item"))?
        .ok_or_else(item_not_found)?;

    counter!("budget_writes_total", "entity" => "item", "op" => "update").increment(1);
    info!(stage = "budget", horse_id = %horse.id, item_id = %item.id, "budget item updated");
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((horse_id, item_id)): Path<(String, String)>,
) -> Result<StatusCode, ProblemResponse> {
    let horse = ensure_owned_horse(&state, &caller, &horse_id).await?;
    let deleted = state
        .storage()
        .budget_items()
        .delete(&horse.id, &item_id)
        .await
        .map_err(|err| storage_failure(err, &horse, "delete budget item"))?;
    if !deleted {
        return Err(item_not_found());
    }

    counter!("budget_writes_total", "entity" => "item", "op" => "delete").increment(1);
    info!(stage = "budget", horse_id = %horse.id, %item_id, "budget item deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn owned_item(
    state: &AppState,
    horse: &Horse,
    item_id: &str,
) -> Result<BudgetItem, ProblemResponse> {
    state
        .storage()
        .budget_items()
        .fetch(&horse.id, item_id)
        .await
        .map_err(|err| storage_failure(err, horse, "load budget item"))?
        .ok_or_else(item_not_found)
}

pub async fn upsert_override(
    State(state): State<AppState>,
    caller: Caller,
    Path(horse_id): Path<String>,
    ApiJson(draft): ApiJson<BudgetOverrideDraft>,
) -> Result<Json<BudgetOverride>, ProblemResponse> {
    let horse = ensure_owned_horse(&state, &caller, &horse_id).await?;
    let draft = draft.validate()?;
    let item = owned_item(&state, &horse, &draft.budget_item_id).await?;

    if !budget::is_scheduled(&item, draft.month) {
        return Err(ValidationError::new(
            "month",
            format!("{} is not a scheduled month of this item", draft.month),
        )
        .into());
    }

    let stored = state
        .storage()
        .budget_overrides()
        .upsert(&draft, state.now())
        .await
        .map_err(|err| storage_failure(err, &horse, "store budget override"))?;

    counter!("budget_writes_total", "entity" => "override", "op" => "upsert").increment(1);
    info!(
        stage = "budget",
        horse_id = %horse.id,
        item_id = %item.id,
        month = %stored.month,
        skip = stored.skip,
        "budget override stored"
    );
    Ok(Json(stored))
}

pub async fn delete_override(
    State(state): State<AppState>,
    caller: Caller,
    Path(horse_id): Path<String>,
    ApiJson(key): ApiJson<OverrideKey>,
) -> Result<StatusCode, ProblemResponse> {
    let horse = ensure_owned_horse(&state, &caller, &horse_id).await?;
    let item = owned_item(&state, &horse, &key.budget_item_id).await?;

    let deleted = state
        .storage()
        .budget_overrides()
        .delete(&item.id, key.month)
        .await
        .map_err(|err| storage_failure(err, &horse, "delete budget override"))?;
    if !deleted {
        return Err(not_found("override_not_found", "no override for this item and month"));
    }

    counter!("budget_writes_total", "entity" => "override", "op" => "delete").increment(1);
    info!(
        stage = "budget",
        horse_id = %horse.id,
        item_id = %item.id,
        month = %key.month,
        "budget override deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};

    use crate::router::app_router;
    use crate::test_support::{bearer, request, send, setup_state};

    async fn horse_for(app: &Router, token: &str) -> String {
        let (status, body) = send(
            app,
            request(
                Method::POST,
                "/api/horses",
                Some(token),
                Some(json!({ "name": "Blakken" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().expect("id").to_string()
    }

    async fn monthly_item(app: &Router, token: &str, horse_id: &str) -> String {
        let (status, body) = send(
            app,
            request(
                Method::POST,
                &format!("/api/horses/{horse_id}/budget/items"),
                Some(token),
                Some(json!({
                    "title": "Stall rent",
                    "category": "stable",
                    "amount": 500,
                    "isRecurring": true,
                    "intervalMonths": 1,
                    "startMonth": "2024-01"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().expect("id").to_string()
    }

    async fn read(
        app: &Router,
        token: &str,
        horse_id: &str,
        from: &str,
        to: &str,
    ) -> (StatusCode, Value) {
        send(
            app,
            request(
                Method::GET,
                &format!("/api/horses/{horse_id}/budget?from={from}&to={to}"),
                Some(token),
                None,
            ),
        )
        .await
    }

    fn amounts(body: &Value) -> Vec<f64> {
        body["months"]
            .as_array()
            .expect("months")
            .iter()
            .flat_map(|month| month["items"].as_array().expect("items").iter())
            .map(|item| item["amount"].as_f64().expect("amount"))
            .collect()
    }

    #[tokio::test]
    async fn monthly_item_projects_every_month() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;
        monthly_item(&app, &token, &horse_id).await;

        let (status, body) = read(&app, &token, &horse_id, "2024-01", "2024-03").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(amounts(&body), vec![500.0, 500.0, 500.0]);
        assert_eq!(body["total"].as_f64(), Some(1500.0));
        assert_eq!(body["months"][0]["month"], "2024-01");
        assert_eq!(body["months"][0]["items"][0]["emoji"], "🏠");
        assert_eq!(body["months"][2]["total"].as_f64(), Some(500.0));
    }

    #[tokio::test]
    async fn override_amount_replaces_displayed_amount() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;
        let item_id = monthly_item(&app, &token, &horse_id).await;

        let (status, stored) = send(
            &app,
            request(
                Method::PUT,
                &format!("/api/horses/{horse_id}/budget/overrides"),
                Some(&token),
                Some(json!({
                    "budgetItemId": item_id,
                    "month": "2024-02",
                    "overrideAmount": 300,
                    "note": "shared with neighbour"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{stored}");

        let (_, body) = read(&app, &token, &horse_id, "2024-01", "2024-03").await;
        assert_eq!(amounts(&body), vec![500.0, 300.0, 500.0]);
        assert_eq!(body["total"].as_f64(), Some(1300.0));
        let february = &body["months"][1]["items"][0];
        assert_eq!(february["baseAmount"].as_f64(), Some(500.0));
        assert_eq!(february["isOverridden"], true);
        assert_eq!(february["note"], "shared with neighbour");
        assert_eq!(february["overrideId"], stored["id"]);
    }

    #[tokio::test]
    async fn skip_override_drops_month_until_deleted() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;
        let item_id = monthly_item(&app, &token, &horse_id).await;
        let overrides = format!("/api/horses/{horse_id}/budget/overrides");

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &overrides,
                Some(&token),
                Some(json!({ "budgetItemId": item_id, "month": "2024-02", "skip": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = read(&app, &token, &horse_id, "2024-01", "2024-03").await;
        assert_eq!(amounts(&body), vec![500.0, 500.0]);
        assert_eq!(body["months"][1]["items"].as_array().map(Vec::len), Some(0));
        assert_eq!(body["months"][1]["total"].as_f64(), Some(0.0));

        let key = json!({ "budgetItemId": item_id, "month": "2024-02" });
        let (status, _) = send(
            &app,
            request(Method::DELETE, &overrides, Some(&token), Some(key.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(
            &app,
            request(Method::DELETE, &overrides, Some(&token), Some(key)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "override_not_found");

        let (_, body) = read(&app, &token, &horse_id, "2024-01", "2024-03").await;
        assert_eq!(body["total"].as_f64(), Some(1500.0));
    }

    #[tokio::test]
    async fn override_rejects_unscheduled_month_and_skip_with_amount() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;
        let item_id = monthly_item(&app, &token, &horse_id).await;
        let overrides = format!("/api/horses/{horse_id}/budget/overrides");

        let (status, body) = send(
            &app,
            request(
                Method::PUT,
                &overrides,
                Some(&token),
                Some(json!({ "budgetItemId": item_id, "month": "2023-12", "skip": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "month");

        let (status, body) = send(
            &app,
            request(
                Method::PUT,
                &overrides,
                Some(&token),
                Some(json!({
                    "budgetItemId": item_id,
                    "month": "2024-02",
                    "skip": true,
                    "overrideAmount": 10
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "overrideAmount");
    }

    #[tokio::test]
    async fn item_update_and_delete_are_scoped_to_the_horse() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;
        let other_horse = horse_for(&app, &token).await;
        let item_id = monthly_item(&app, &token, &horse_id).await;

        let replacement = json!({
            "title": "Farrier",
            "category": "farrier",
            "amount": 1200.5,
            "isRecurring": true,
            "intervalMonths": 2,
            "startMonth": "2024-01",
            "anchorDay": 31
        });

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &format!("/api/horses/{other_horse}/budget/items/{item_id}"),
                Some(&token),
                Some(replacement.clone()),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, updated) = send(
            &app,
            request(
                Method::PUT,
                &format!("/api/horses/{horse_id}/budget/items/{item_id}"),
                Some(&token),
                Some(replacement),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["intervalMonths"], 2);

        let (_, body) = read(&app, &token, &horse_id, "2024-01", "2024-04").await;
        assert_eq!(amounts(&body), vec![1200.5, 1200.5]);
        assert_eq!(body["months"][2]["items"][0]["day"], 31);
        assert_eq!(body["months"][0]["items"][0]["emoji"], "🔨");

        let (status, _) = send(
            &app,
            request(
                Method::DELETE,
                &format!("/api/horses/{horse_id}/budget/items/{item_id}"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, listed) = send(
            &app,
            request(
                Method::GET,
                &format!("/api/horses/{horse_id}/budget/items"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(listed.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn override_follows_item_schedule_edits() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;
        let item_id = monthly_item(&app, &token, &horse_id).await;
        let item_uri = format!("/api/horses/{horse_id}/budget/items/{item_id}");

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &format!("/api/horses/{horse_id}/budget/overrides"),
                Some(&token),
                Some(json!({ "budgetItemId": item_id, "month": "2024-02", "overrideAmount": 300 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let with_interval = |interval: u32| {
            json!({
                "title": "Stall rent",
                "category": "stable",
                "amount": 500,
                "isRecurring": true,
                "intervalMonths": interval,
                "startMonth": "2024-01"
            })
        };
        let totals = |body: &Value| -> Vec<f64> {
            body["months"]
                .as_array()
                .expect("months")
                .iter()
                .map(|month| month["total"].as_f64().expect("total"))
                .collect()
        };

        let (status, _) = send(
            &app,
            request(Method::PUT, &item_uri, Some(&token), Some(with_interval(2))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = read(&app, &token, &horse_id, "2024-01", "2024-04").await;
        assert_eq!(totals(&body), vec![500.0, 0.0, 500.0, 0.0]);
        assert_eq!(body["months"][1]["items"].as_array().map(Vec::len), Some(0));

        let (status, _) = send(
            &app,
            request(Method::PUT, &item_uri, Some(&token), Some(with_interval(1))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = read(&app, &token, &horse_id, "2024-01", "2024-04").await;
        assert_eq!(totals(&body), vec![500.0, 300.0, 500.0, 500.0]);
        assert_eq!(body["months"][1]["items"][0]["isOverridden"], true);
    }

    #[tokio::test]
    async fn foreign_horse_budget_is_not_found() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let owner = bearer("owner-1", false);
        let horse_id = horse_for(&app, &owner).await;
        monthly_item(&app, &owner, &horse_id).await;

        let (status, body) =
            read(&app, &bearer("owner-2", false), &horse_id, "2024-01", "2024-03").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "horse_not_found");
    }

    #[tokio::test]
    async fn range_validation_errors_are_bad_requests() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);
        let token = bearer("owner-1", false);
        let horse_id = horse_for(&app, &token).await;

        let (status, body) = read(&app, &token, &horse_id, "2024-03", "2024-01").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "to");

        let (status, _) = read(&app, &token, &horse_id, "2024-01", "2029-12").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = read(&app, &token, &horse_id, "2024-1", "2024-02").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "from");

        let (status, body) = send(
            &app,
            request(
                Method::GET,
                &format!("/api/horses/{horse_id}/budget?from=2024-01"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_query");
    }
}
