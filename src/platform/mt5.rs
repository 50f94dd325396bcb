// =============================================================================
// MT5 bridge adapter — HTTP client for a local MetaTrader 5 terminal bridge
// =============================================================================
//
// The bridge is an Expert Advisor running inside the local MT5 terminal that
// exposes account state over loopback HTTP. Requests may be HMAC-SHA256
// signed (key + secret pair) when the bridge is configured to demand it; the
// secret is only ever used for signing and never logged.
//
// MT5 reports SL/TP of 0.0 for "not set" and stamps times in server-local
// epoch seconds; both conventions are normalized here.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::errors::{AdapterError, ConfigError};
use crate::platform::{detect_offset, PlatformAdapter};
use crate::snapshot::{AccountSnapshot, Position};
use crate::types::{Platform, Side};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:6542";

// =============================================================================
// Bridge payloads
// =============================================================================

#[derive(Debug, Deserialize)]
struct BridgeAccount {
    login: i64,
    currency: String,
    balance: f64,
    equity: f64,
    margin: f64,
    margin_free: f64,
    #[serde(default)]
    leverage: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BridgePosition {
    ticket: i64,
    symbol: String,
    /// "buy" or "sell".
    #[serde(rename = "type")]
    position_type: String,
    volume: f64,
    price_open: f64,
    price_current: f64,
    #[serde(default)]
    sl: f64,
    #[serde(default)]
    tp: f64,
    profit: f64,
    #[serde(default)]
    swap: f64,
    #[serde(default)]
    commission: f64,
    /// Open time in server-local epoch seconds.
    time: i64,
    #[serde(default)]
    contract_size: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BridgeTick {
    /// Latest tick time in server-local epoch milliseconds.
    time_msc: i64,
}

fn side_from_type(position_type: &str) -> Side {
    if position_type.eq_ignore_ascii_case("sell") {
        Side::Short
    } else {
        Side::Long
    }
}

/// MT5 uses 0.0 for "no SL/TP set".
fn price_or_none(price: f64) -> Option<f64> {
    if price > 0.0 {
        Some(price)
    } else {
        None
    }
}

fn build_snapshot(
    account_id: &str,
    account: BridgeAccount,
    positions: Vec<BridgePosition>,
    offset: FixedOffset,
    wall: DateTime<Utc>,
) -> AccountSnapshot {
    let positions = positions
        .into_iter()
        .map(|p| Position {
            id: p.ticket.to_string(),
            symbol: p.symbol,
            side: side_from_type(&p.position_type),
            volume_lots: p.volume,
            open_price: p.price_open,
            current_price: p.price_current,
            stop_loss_price: price_or_none(p.sl),
            take_profit_price: price_or_none(p.tp),
            unrealized_pl: p.profit,
            // Server-local epoch seconds → UTC instant.
            open_time: Utc
                .timestamp_opt(p.time - i64::from(offset.local_minus_utc()), 0)
                .single()
                .unwrap_or(wall),
            commission: p.commission,
            swap: p.swap,
            contract_size: p.contract_size,
        })
        .collect();

    AccountSnapshot {
        account_id: account_id.to_string(),
        platform: Platform::Mt5,
        currency: account.currency,
        balance: account.balance,
        equity: account.equity,
        margin_used: account.margin,
        margin_free: account.margin_free,
        day_start_balance: None,
        day_start_equity: None,
        leverage: account.leverage,
        positions,
        observed_at_server: wall.with_timezone(&offset),
        observed_at_wall: wall,
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Adapter for a local MT5 terminal bridge.
pub struct Mt5BridgeAdapter {
    account_id: String,
    base_url: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
    offset: RwLock<Option<FixedOffset>>,
}

impl Mt5BridgeAdapter {
    /// Build from `PROPWATCH_MT5_BRIDGE_URL` (optional, loopback default) and
    /// the `PROPWATCH_MT5_BRIDGE_KEY` / `PROPWATCH_MT5_BRIDGE_SECRET` pair
    /// (optional, but must be set together).
    pub fn from_env(account_id: &str) -> Result<Self, ConfigError> {
        let base_url = std::env::var("PROPWATCH_MT5_BRIDGE_URL")
            .unwrap_or_else(|_| DEFAULT_BRIDGE_URL.to_string());

        let key = std::env::var("PROPWATCH_MT5_BRIDGE_KEY").ok();
        let secret = std::env::var("PROPWATCH_MT5_BRIDGE_SECRET").ok();
        let credentials = match (key, secret) {
            (Some(k), Some(s)) => Some((k, s)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidEnv {
                    name: "PROPWATCH_MT5_BRIDGE_KEY".to_string(),
                    reason: "bridge key and secret must be set together".to_string(),
                })
            }
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidEnv {
                name: "PROPWATCH_MT5_BRIDGE_URL".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            account_id: account_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
            offset: RwLock::new(None),
        })
    }

    /// HMAC-SHA256 hex signature over `query`.
    fn sign(secret: &str, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Issue a GET against the bridge, signing when credentials are present.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, AdapterError> {
        let url = match &self.credentials {
            Some((key, secret)) => {
                let ts = Utc::now().timestamp_millis();
                let query = format!("key={key}&timestamp={ts}");
                let sig = Self::sign(secret, &query);
                format!("{}{path}?{query}&signature={sig}", self.base_url)
            }
            None => format!("{}{path}", self.base_url),
        };

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AdapterError::Auth(format!(
                "bridge rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            return Err(AdapterError::Transient(format!(
                "bridge returned {status} for {path}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AdapterError::Transient(format!("malformed bridge response: {e}")))
    }

    /// Detect and cache the broker offset from the latest tick timestamp.
    async fn ensure_offset(&self) -> Result<FixedOffset, AdapterError> {
        if let Some(offset) = *self.offset.read() {
            return Ok(offset);
        }

        let tick: BridgeTick = self.get_json("/tick").await?;
        let offset = detect_offset(tick.time_msc, Utc::now())?;
        *self.offset.write() = Some(offset);
        debug!(
            account = %self.account_id,
            offset_secs = offset.local_minus_utc(),
            "broker clock offset detected from latest tick"
        );
        Ok(offset)
    }
}

#[async_trait]
impl PlatformAdapter for Mt5BridgeAdapter {
    fn platform(&self) -> Platform {
        Platform::Mt5
    }

    #[instrument(skip(self), fields(account = %self.account_id))]
    async fn connect(&mut self) -> Result<(), AdapterError> {
        // A successful account read both validates credentials and confirms
        // the terminal is logged in.
        let account: BridgeAccount = self.get_json("/account").await?;
        if account.login.to_string() != self.account_id {
            return Err(AdapterError::Auth(format!(
                "bridge is logged into account {}, expected {}",
                account.login, self.account_id
            )));
        }
        self.ensure_offset().await?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        // Stateless HTTP client; nothing to tear down.
        *self.offset.write() = None;
    }

    async fn server_time(&self) -> Result<DateTime<FixedOffset>, AdapterError> {
        let offset = self.ensure_offset().await?;
        Ok(Utc::now().with_timezone(&offset))
    }

    #[instrument(skip(self), fields(account = %self.account_id))]
    async fn snapshot(&self) -> Result<AccountSnapshot, AdapterError> {
        let offset = self.ensure_offset().await?;
        let account: BridgeAccount = self.get_json("/account").await?;
        let positions: Vec<BridgePosition> = self.get_json("/positions").await?;

        if account.login.to_string() != self.account_id {
            warn!(
                bridge_login = account.login,
                expected = %self.account_id,
                "bridge login changed mid-session"
            );
            return Err(AdapterError::Auth(
                "bridge switched to a different account".to_string(),
            ));
        }

        Ok(build_snapshot(
            &self.account_id,
            account,
            positions,
            offset,
            Utc::now(),
        ))
    }

    async fn leverage(&self) -> Result<Option<f64>, AdapterError> {
        let account: BridgeAccount = self.get_json("/account").await?;
        Ok(account.leverage)
    }
}
