// =============================================================================
// cTrader adapter — cloud account stream feeding a latest-snapshot cell
// =============================================================================
//
// The cTrader Open API pushes account events over a WebSocket. A background
// reader task authenticates, consumes events, and writes the newest one into
// a shared cell; `snapshot()` reads the cell so the monitor loop never sees
// callback control flow. A cell older than the staleness budget is treated as
// a transient failure — a silently dead stream must not feed old equity into
// the evaluator.
//
// Token validation happens over REST at connect time so that bad credentials
// surface as an auth failure rather than a reconnect loop.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{AdapterError, ConfigError};
use crate::platform::{detect_offset, PlatformAdapter};
use crate::snapshot::{AccountSnapshot, Position};
use crate::types::{Platform, Side};

const DEFAULT_WS_URL: &str = "wss://live.ctraderapi.com:5036/json";
const DEFAULT_REST_URL: &str = "https://api.ctrader.com";

/// How long `connect` waits for the first account event.
const FIRST_EVENT_WAIT: Duration = Duration::from_secs(8);

// =============================================================================
// Event payloads
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPosition {
    id: i64,
    symbol: String,
    /// "buy" or "sell".
    side: String,
    volume_lots: f64,
    entry_price: f64,
    current_price: f64,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    unrealized_pnl: f64,
    /// Server epoch milliseconds.
    open_timestamp: i64,
    #[serde(default)]
    commission: f64,
    #[serde(default)]
    swap: f64,
    #[serde(default)]
    contract_size: Option<f64>,
}

/// One full account event from the stream ("accountSnapshot" on subscribe,
/// "accountUpdate" thereafter; both carry the complete state).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountEvent {
    /// Server epoch milliseconds at event emission.
    timestamp: i64,
    currency: String,
    balance: f64,
    equity: f64,
    margin_used: f64,
    margin_free: f64,
    #[serde(default)]
    leverage: Option<f64>,
    #[serde(default)]
    positions: Vec<EventPosition>,
}

/// Parse one stream message; non-account events (heartbeats, acks) yield None.
fn parse_account_event(text: &str) -> anyhow::Result<Option<AccountEvent>> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    match root.get("type").and_then(|t| t.as_str()) {
        Some("accountSnapshot") | Some("accountUpdate") => {
            let event: AccountEvent = serde_json::from_value(root["data"].clone())?;
            Ok(Some(event))
        }
        _ => Ok(None),
    }
}

fn build_snapshot(
    account_id: &str,
    event: &AccountEvent,
    offset: FixedOffset,
    wall: DateTime<Utc>,
) -> AccountSnapshot {
    let offset_ms = i64::from(offset.local_minus_utc()) * 1000;
    let to_utc = |server_ms: i64| {
        Utc.timestamp_millis_opt(server_ms - offset_ms)
            .single()
            .unwrap_or(wall)
    };

    let positions = event
        .positions
        .iter()
        .map(|p| Position {
            id: p.id.to_string(),
            symbol: p.symbol.clone(),
            side: if p.side.eq_ignore_ascii_case("sell") {
                Side::Short
            } else {
                Side::Long
            },
            volume_lots: p.volume_lots,
            open_price: p.entry_price,
            current_price: p.current_price,
            stop_loss_price: p.stop_loss,
            take_profit_price: p.take_profit,
            unrealized_pl: p.unrealized_pnl,
            open_time: to_utc(p.open_timestamp),
            commission: p.commission,
            swap: p.swap,
            contract_size: p.contract_size,
        })
        .collect();

    AccountSnapshot {
        account_id: account_id.to_string(),
        platform: Platform::Ctrader,
        currency: event.currency.clone(),
        balance: event.balance,
        equity: event.equity,
        margin_used: event.margin_used,
        margin_free: event.margin_free,
        day_start_balance: None,
        day_start_equity: None,
        leverage: event.leverage,
        positions,
        observed_at_server: to_utc(event.timestamp).with_timezone(&offset),
        observed_at_wall: wall,
    }
}

// =============================================================================
// Background reader
// =============================================================================

struct CellState {
    event: AccountEvent,
    received_at: Instant,
}

type Cell = Arc<RwLock<Option<CellState>>>;
type OffsetCell = Arc<RwLock<Option<FixedOffset>>>;

/// Consume the event stream once; returns when the stream ends or errors so
/// the outer loop can reconnect.
async fn run_event_stream(
    ws_url: &str,
    access_token: &str,
    account_id: &str,
    cell: &Cell,
    offset: &OffsetCell,
) -> anyhow::Result<()> {
    let (ws_stream, _response) = connect_async(ws_url).await?;
    info!(account = %account_id, "cTrader event stream connected");

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({
        "type": "subscribe",
        "accessToken": access_token,
        "accountId": account_id,
    });
    write.send(Message::Text(subscribe.to_string())).await?;

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_account_event(&text) {
                Ok(Some(event)) => {
                    // Offset is detected once, from the first server-stamped
                    // event, and cached for the life of the adapter.
                    if offset.read().is_none() {
                        match detect_offset(event.timestamp, Utc::now()) {
                            Ok(detected) => {
                                *offset.write() = Some(detected);
                                debug!(
                                    account = %account_id,
                                    offset_secs = detected.local_minus_utc(),
                                    "broker clock offset detected from account event"
                                );
                            }
                            Err(e) => {
                                warn!(account = %account_id, error = %e,
                                      "broker offset detection failed");
                            }
                        }
                    }

                    *cell.write() = Some(CellState {
                        event,
                        received_at: Instant::now(),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(account = %account_id, error = %e, "unparseable stream message"),
            },
            Some(Ok(_)) => {
                // Ping/Pong/Binary frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                error!(account = %account_id, error = %e, "event stream read error");
                return Err(e.into());
            }
            None => {
                warn!(account = %account_id, "event stream ended");
                return Ok(());
            }
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Adapter for cTrader cloud accounts.
pub struct CtraderAdapter {
    account_id: String,
    ws_url: String,
    rest_url: String,
    access_token: String,
    staleness: Duration,
    client: reqwest::Client,
    cell: Cell,
    offset: OffsetCell,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl CtraderAdapter {
    /// Build from `PROPWATCH_CTRADER_TOKEN` (required) and the optional
    /// `PROPWATCH_CTRADER_WS_URL` / `PROPWATCH_CTRADER_REST_URL` overrides.
    /// `staleness` bounds how old the latest event may be before `snapshot`
    /// reports a transient failure.
    pub fn from_env_with_staleness(
        account_id: &str,
        staleness: Duration,
    ) -> Result<Self, ConfigError> {
        let access_token =
            std::env::var("PROPWATCH_CTRADER_TOKEN").map_err(|_| ConfigError::MissingEnv {
                name: "PROPWATCH_CTRADER_TOKEN".to_string(),
            })?;

        let ws_url = std::env::var("PROPWATCH_CTRADER_WS_URL")
            .unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        let rest_url = std::env::var("PROPWATCH_CTRADER_REST_URL")
            .unwrap_or_else(|_| DEFAULT_REST_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidEnv {
                name: "PROPWATCH_CTRADER_REST_URL".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            account_id: account_id.to_string(),
            ws_url,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            access_token,
            staleness,
            client,
            cell: Arc::new(RwLock::new(None)),
            offset: Arc::new(RwLock::new(None)),
            reader: None,
        })
    }

    /// Validate the access token against the REST API so that bad credentials
    /// fail fast instead of looping in the stream reader.
    async fn validate_token(&self) -> Result<(), AdapterError> {
        let url = format!(
            "{}/v1/accounts/{}?access_token={}",
            self.rest_url, self.account_id, self.access_token
        );
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AdapterError::Auth(format!(
                "cTrader rejected the access token ({status})"
            )));
        }
        if !status.is_success() {
            return Err(AdapterError::Transient(format!(
                "cTrader account endpoint returned {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for CtraderAdapter {
    fn platform(&self) -> Platform {
        Platform::Ctrader
    }

    #[instrument(skip(self), fields(account = %self.account_id))]
    async fn connect(&mut self) -> Result<(), AdapterError> {
        self.validate_token().await?;

        if self.reader.is_none() {
            let ws_url = self.ws_url.clone();
            let token = self.access_token.clone();
            let account_id = self.account_id.clone();
            let cell = self.cell.clone();
            let offset = self.offset.clone();

            self.reader = Some(tokio::spawn(async move {
                loop {
                    if let Err(e) =
                        run_event_stream(&ws_url, &token, &account_id, &cell, &offset).await
                    {
                        error!(account = %account_id, error = %e,
                               "event stream error — reconnecting in 5s");
                    }
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }));
        }

        // Wait for the stream to deliver its initial account snapshot.
        let deadline = Instant::now() + FIRST_EVENT_WAIT;
        while Instant::now() < deadline {
            if self.cell.read().is_some() && self.offset.read().is_some() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        Err(AdapterError::Transient(
            "no account event received after connect".to_string(),
        ))
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        *self.cell.write() = None;
    }

    async fn server_time(&self) -> Result<DateTime<FixedOffset>, AdapterError> {
        let offset = self.offset.read().ok_or_else(|| {
            AdapterError::Transient("broker clock offset not yet detected".to_string())
        })?;
        Ok(Utc::now().with_timezone(&offset))
    }

    async fn snapshot(&self) -> Result<AccountSnapshot, AdapterError> {
        let offset = self.offset.read().ok_or_else(|| {
            AdapterError::Transient("broker clock offset not yet detected".to_string())
        })?;

        let cell = self.cell.read();
        let Some(state) = cell.as_ref() else {
            return Err(AdapterError::Transient(
                "no account event received yet".to_string(),
            ));
        };

        let age = state.received_at.elapsed();
        if age > self.staleness {
            return Err(AdapterError::Transient(format!(
                "latest account event is {}s old (budget {}s)",
                age.as_secs(),
                self.staleness.as_secs()
            )));
        }

        Ok(build_snapshot(
            &self.account_id,
            &state.event,
            offset,
            Utc::now(),
        ))
    }

    async fn leverage(&self) -> Result<Option<f64>, AdapterError> {
        Ok(self.cell.read().as_ref().and_then(|s| s.event.leverage))
    }
}
