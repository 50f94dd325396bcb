// =============================================================================
// Platform adapters — uniform read-only view of a trading account
// =============================================================================
//
// Both adapters present the same synchronous-looking interface to the monitor
// loop. The MT5 adapter polls a local terminal bridge over HTTP; the cTrader
// adapter keeps a background WebSocket reader feeding a latest-snapshot cell.
// Monetary values are in account currency as plain decimal units, volumes in
// lots, `observed_at_server` in broker-local time.
//
// Broker offset detection: each adapter compares one server-stamped event
// (MT5: the latest tick; cTrader: a recent account event) against our wall
// clock on first use, rounds to the nearest quarter hour, and caches the
// result. Detection failure is surfaced as a transient error, never guessed.
// =============================================================================

pub mod ctrader;
pub mod mt5;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::config::AccountConfig;
use crate::errors::{AdapterError, ConfigError};
use crate::snapshot::AccountSnapshot;
use crate::types::Platform;

/// Default per-operation timeout applied by the monitor loop around every
/// adapter call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only account access implemented per platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Establish the session and detect the broker clock offset.
    async fn connect(&mut self) -> Result<(), AdapterError>;

    /// Tear down the session. Infallible by design; errors are logged inside.
    async fn disconnect(&mut self);

    /// Current instant in the broker-local timezone.
    async fn server_time(&self) -> Result<DateTime<FixedOffset>, AdapterError>;

    /// Full account observation. Day-start fields are left unset; the anchor
    /// tracker fills them downstream.
    async fn snapshot(&self) -> Result<AccountSnapshot, AdapterError>;

    /// Account leverage, when the platform exposes it.
    async fn leverage(&self) -> Result<Option<f64>, AdapterError>;
}

/// Construct the adapter for an account's configured platform. Credentials
/// come from the environment, never from the config file.
pub fn build_adapter(account: &AccountConfig) -> Result<Box<dyn PlatformAdapter>, ConfigError> {
    match account.platform {
        Platform::Mt5 => Ok(Box::new(mt5::Mt5BridgeAdapter::from_env(
            &account.account_id,
        )?)),
        Platform::Ctrader => {
            // A dead stream should fail fast relative to the account's own
            // cadence: three missed checks marks the cell stale.
            let staleness = Duration::from_secs(account.check_interval.max(1) * 3);
            Ok(Box::new(ctrader::CtraderAdapter::from_env_with_staleness(
                &account.account_id,
                staleness,
            )?))
        }
    }
}

/// Seconds per quarter hour; broker UTC offsets are whole multiples of this.
const OFFSET_GRANULARITY_SECS: i64 = 15 * 60;

/// Largest plausible broker offset (UTC±14:00, the real-world extreme).
const MAX_OFFSET_SECS: i64 = 14 * 3600;

/// Derive the broker's UTC offset by comparing a server-stamped epoch (in
/// milliseconds of server-local time) with our wall clock, rounded to the
/// nearest quarter hour.
pub(crate) fn detect_offset(
    server_epoch_ms: i64,
    wall: DateTime<Utc>,
) -> Result<FixedOffset, AdapterError> {
    let diff_secs = server_epoch_ms / 1000 - wall.timestamp();
    let rounded = ((diff_secs as f64) / OFFSET_GRANULARITY_SECS as f64).round() as i64
        * OFFSET_GRANULARITY_SECS;

    if rounded.abs() > MAX_OFFSET_SECS {
        return Err(AdapterError::Transient(format!(
            "implausible broker clock offset {rounded}s detected"
        )));
    }

    FixedOffset::east_opt(rounded as i32).ok_or_else(|| {
        AdapterError::Transient(format!("broker offset {rounded}s out of chrono range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn detect_offset_rounds_to_quarter_hour() {
        let wall = Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap();

        // Server three hours ahead, with 40 s of clock skew.
        let server_ms = (wall.timestamp() + 3 * 3600 + 40) * 1000;
        let offset = detect_offset(server_ms, wall).unwrap();
        assert_eq!(offset.local_minus_utc(), 3 * 3600);

        // Half-hour timezone (UTC+5:30), skewed 20 s behind.
        let server_ms = (wall.timestamp() + 5 * 3600 + 1800 - 20) * 1000;
        let offset = detect_offset(server_ms, wall).unwrap();
        assert_eq!(offset.local_minus_utc(), 5 * 3600 + 1800);

        // Server clock equal to ours.
        let offset = detect_offset(wall.timestamp() * 1000, wall).unwrap();
        assert_eq!(offset.local_minus_utc(), 0);
    }

    #[test]
    fn implausible_offset_is_rejected() {
        let wall = Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap();
        let server_ms = (wall.timestamp() + 20 * 3600) * 1000;
        assert!(detect_offset(server_ms, wall).is_err());
    }

    #[test]
    fn negative_offsets_supported() {
        let wall = Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap();
        let server_ms = (wall.timestamp() - 5 * 3600) * 1000;
        let offset = detect_offset(server_ms, wall).unwrap();
        assert_eq!(offset.local_minus_utc(), -5 * 3600);
    }
}
