// =============================================================================
// HTTP surface — compliance review endpoint + health
// =============================================================================
//
// POST /compliance/review re-runs resolution and evaluation against a
// caller-supplied snapshot; it is stateless and never touches the supervisor
// or any account's anchor. GET /health reports the supervisor status view
// when running in combined mode.
//
// When PROPWATCH_API_TOKEN is set, the review endpoint demands a matching
// Bearer token (compared in constant time). Unset means the API runs open;
// this is logged once at router construction.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::errors::ResolveError;
use crate::evaluator::evaluate;
use crate::resolver::{Resolver, RuleSource};
use crate::rules::RuleBreach;
use crate::snapshot::{AccountSnapshot, Position};
use crate::supervisor::StatusView;
use crate::types::{Platform, Side};

/// Shared state for the HTTP handlers.
pub struct ApiState {
    pub resolver: Arc<Resolver>,
    /// Present in combined mode (`monitor --serve`), absent for `review`.
    pub status: Option<StatusView>,
}

/// Build the router with CORS and shared state.
pub fn router(state: Arc<ApiState>) -> Router {
    if std::env::var("PROPWATCH_API_TOKEN").is_err() {
        warn!("PROPWATCH_API_TOKEN is not set — the review API runs unauthenticated");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/compliance/review", post(review))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Authentication
// =============================================================================

/// Compare two byte slices in constant time; every byte is examined even
/// after a mismatch so timing reveals nothing about the expected token.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Enforce the Bearer token when one is configured.
fn check_auth(headers: &HeaderMap) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let Ok(expected) = std::env::var("PROPWATCH_API_TOKEN") else {
        return Ok(());
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => {
            warn!("review request rejected: missing or invalid token");
            Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "missing or invalid authorization token" })),
            ))
        }
    }
}

// =============================================================================
// Request / response shapes
// =============================================================================

/// Position as supplied by a review caller. Leaner than the platform model:
/// bookkeeping fields the evaluator ignores are optional.
#[derive(Debug, Deserialize)]
pub struct ReviewPosition {
    #[serde(default)]
    pub id: Option<String>,
    pub symbol: String,
    #[serde(default = "default_side")]
    pub side: Side,
    pub volume_lots: f64,
    #[serde(default)]
    pub open_price: f64,
    pub current_price: f64,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub take_profit_price: Option<f64>,
    #[serde(default)]
    pub unrealized_pl: f64,
    #[serde(default)]
    pub contract_size: Option<f64>,
}

fn default_side() -> Side {
    Side::Long
}

#[derive(Debug, Deserialize)]
pub struct ReviewAccount {
    pub balance: f64,
    pub equity: f64,
    pub starting_balance: f64,
    #[serde(default)]
    pub day_start_balance: Option<f64>,
    #[serde(default)]
    pub day_start_equity: Option<f64>,
    #[serde(default)]
    pub margin_used: f64,
    #[serde(default)]
    pub margin_available: f64,
    #[serde(default)]
    pub leverage: Option<f64>,
    #[serde(default)]
    pub positions: Vec<ReviewPosition>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub firm: String,
    #[serde(default)]
    pub program_id: Option<String>,
    pub account_id: String,
    #[serde(default)]
    pub platform: Option<Platform>,
    pub account: ReviewAccount,
    #[serde(default)]
    pub include_soft_rules: bool,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub firm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    pub source_tag: RuleSource,
    pub rules_name: String,
    pub breaches: Vec<RuleBreach>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_rules: Option<Vec<String>>,
}

/// Build the evaluator's snapshot from the caller-supplied account state.
/// The request carries no broker clock, so the receive time (UTC) stands in
/// for `observed_at_server`.
fn snapshot_from_request(request: &ReviewRequest) -> AccountSnapshot {
    let now = Utc::now();
    let positions = request
        .account
        .positions
        .iter()
        .enumerate()
        .map(|(index, p)| Position {
            id: p.id.clone().unwrap_or_else(|| format!("review-{index}")),
            symbol: p.symbol.clone(),
            side: p.side,
            volume_lots: p.volume_lots,
            open_price: p.open_price,
            current_price: p.current_price,
            stop_loss_price: p.stop_loss_price,
            take_profit_price: p.take_profit_price,
            unrealized_pl: p.unrealized_pl,
            open_time: now,
            commission: 0.0,
            swap: 0.0,
            contract_size: p.contract_size,
        })
        .collect();

    AccountSnapshot {
        account_id: request.account_id.clone(),
        platform: request.platform.unwrap_or(Platform::Mt5),
        currency: "USD".to_string(),
        balance: request.account.balance,
        equity: request.account.equity,
        margin_used: request.account.margin_used,
        margin_free: request.account.margin_available,
        day_start_balance: request.account.day_start_balance,
        day_start_equity: request.account.day_start_equity,
        leverage: request.account.leverage,
        positions,
        observed_at_server: now.fixed_offset(),
        observed_at_wall: now,
    }
}

/// Resolution + evaluation, shared between the handler and tests.
pub async fn run_review(
    resolver: &Resolver,
    request: &ReviewRequest,
) -> Result<ReviewResponse, ResolveError> {
    let (rules, source_tag) = resolver
        .resolve(&request.firm, request.program_id.as_deref(), None)
        .await?;

    let snapshot = snapshot_from_request(request);
    let breaches = evaluate(&rules, &snapshot, request.account.starting_balance);

    let soft_rules = if request.include_soft_rules {
        Some(
            resolver
                .soft_rules(&request.firm, request.program_id.as_deref())
                .await,
        )
    } else {
        None
    };

    Ok(ReviewResponse {
        firm: request.firm.clone(),
        program_id: request.program_id.clone(),
        source_tag,
        rules_name: rules.name,
        breaches,
        soft_rules,
    })
}

// =============================================================================
// Handlers
// =============================================================================

async fn review(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<ReviewRequest>,
) -> impl IntoResponse {
    if let Err(rejection) = check_auth(&headers) {
        return rejection.into_response();
    }

    match run_review(&state.resolver, &request).await {
        Ok(response) => {
            info!(
                firm = %request.firm,
                account = %request.account_id,
                breaches = response.breaches.len(),
                source = %response.source_tag,
                "compliance review served"
            );
            Json(response).into_response()
        }
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match &state.status {
        Some(view) => Json(serde_json::json!({
            "status": "ok",
            "server_time": Utc::now().timestamp_millis(),
            "accounts": view.snapshot(),
        }))
        .into_response(),
        None => Json(serde_json::json!({
            "status": "ok",
            "server_time": Utc::now().timestamp_millis(),
        }))
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::errors::StoreError;
    use crate::presets::PresetRegistry;
    use crate::resolver::RuleStore;
    use crate::rules::Rules;
    use crate::taxonomy::ProgramTaxonomy;
    use crate::types::{BreachCode, BreachLevel};

    struct SoftOnlyStore;

    #[async_trait]
    impl RuleStore for SoftOnlyStore {
        async fn lookup_rules(
            &self,
            _firm: &str,
            _program_id: &str,
        ) -> Result<Option<Rules>, StoreError> {
            Ok(None)
        }

        async fn soft_rules(
            &self,
            _firm: &str,
            _program_id: Option<&str>,
        ) -> Result<Vec<String>, StoreError> {
            Ok(vec!["avoid holding through red-folder news".to_string()])
        }
    }

    fn resolver(with_store: bool) -> Resolver {
        Resolver::new(
            if with_store {
                Some(Arc::new(SoftOnlyStore))
            } else {
                None
            },
            Arc::new(PresetRegistry::builtin()),
            Arc::new(ProgramTaxonomy::builtin()),
        )
    }

    fn request(firm: &str, equity: f64) -> ReviewRequest {
        ReviewRequest {
            firm: firm.to_string(),
            program_id: Some("stellar_1step".to_string()),
            account_id: "10012345".to_string(),
            platform: None,
            account: ReviewAccount {
                balance: 100_000.0,
                equity,
                starting_balance: 100_000.0,
                day_start_balance: Some(100_000.0),
                day_start_equity: Some(100_000.0),
                margin_used: 0.0,
                margin_available: equity,
                leverage: None,
                positions: Vec::new(),
            },
            include_soft_rules: false,
        }
    }

    #[tokio::test]
    async fn review_reports_breaches_from_preset_rules() {
        let resolver = resolver(false);
        // 5% daily loss against the FundedNext preset's 5% limit.
        let response = run_review(&resolver, &request("FundedNext", 95_000.0))
            .await
            .unwrap();

        assert_eq!(response.source_tag, RuleSource::Preset);
        assert_eq!(response.breaches.len(), 1);
        assert_eq!(response.breaches[0].code, BreachCode::DailyDd);
        assert_eq!(response.breaches[0].level, BreachLevel::Hard);
        assert!(response.soft_rules.is_none());
    }

    #[tokio::test]
    async fn review_of_clean_account_is_empty() {
        let resolver = resolver(false);
        let response = run_review(&resolver, &request("FundedNext", 99_500.0))
            .await
            .unwrap();
        assert!(response.breaches.is_empty());
    }

    #[tokio::test]
    async fn unknown_firm_is_a_resolve_error() {
        let resolver = resolver(false);
        let err = run_review(&resolver, &request("Nobody Capital", 99_500.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::RuleSourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn soft_rules_included_on_request() {
        let resolver = resolver(true);
        let mut req = request("FundedNext", 99_500.0);
        req.include_soft_rules = true;

        let response = run_review(&resolver, &req).await.unwrap();
        assert_eq!(
            response.soft_rules,
            Some(vec!["avoid holding through red-folder news".to_string()])
        );
    }

    #[tokio::test]
    async fn review_positions_feed_exposure_checks() {
        let resolver = resolver(false);
        // The5ers preset enforces 2% risk per trade and stop losses.
        let mut req = request("The5ers", 100_000.0);
        req.program_id = None;
        req.account.positions.push(ReviewPosition {
            id: None,
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            volume_lots: 0.5,
            open_price: 1.08,
            current_price: 1.08,
            stop_loss_price: None,
            take_profit_price: None,
            unrealized_pl: 0.0,
            contract_size: Some(100_000.0),
        });

        let response = run_review(&resolver, &req).await.unwrap();
        let codes: Vec<BreachCode> = response.breaches.iter().map(|b| b.code).collect();
        // 54% of equity in one trade plus a missing stop loss.
        assert!(codes.contains(&BreachCode::RiskPerTrade));
        assert!(codes.contains(&BreachCode::MissingStopLoss));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"Token"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn request_body_shape_parses() {
        let body = r#"{
            "firm": "FundedNext",
            "program_id": "stellar_1step",
            "account_id": "10012345",
            "include_soft_rules": true,
            "account": {
                "balance": 100000.0,
                "equity": 97250.5,
                "starting_balance": 100000.0,
                "day_start_balance": 100000.0,
                "day_start_equity": 100400.0,
                "margin_used": 1500.0,
                "margin_available": 95750.5,
                "positions": [
                    { "symbol": "EURUSD", "side": "short", "volume_lots": 0.3,
                      "current_price": 1.0812, "contract_size": 100000.0 }
                ]
            }
        }"#;
        let request: ReviewRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.account.positions.len(), 1);
        assert_eq!(request.account.positions[0].side, Side::Short);
        assert!(request.include_soft_rules);
    }
}
