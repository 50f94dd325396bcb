// =============================================================================
// Day-anchor tracker — per-account day-start state, broker-local midnight
// =============================================================================
//
// Owned exclusively by one monitor task; no interior locking. The anchor is
// set on the first observation after process start and re-set only when the
// broker-local calendar date advances. It never rolls backward: a snapshot
// whose server date is earlier than the current anchor date is evaluated
// against the existing anchor and logged.
//
// The anchor lives in memory only. A restart mid-day re-anchors at the next
// observation's balance/equity, which under-reports daily drawdown until the
// next broker midnight.
// =============================================================================

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::snapshot::AccountSnapshot;

/// Audit event emitted whenever a new day-start anchor is recorded.
#[derive(Debug, Clone, Serialize)]
pub struct DayStartAnchored {
    pub id: Uuid,
    pub account_id: String,
    /// Broker-local calendar date the anchor belongs to.
    pub date: NaiveDate,
    pub day_start_balance: f64,
    pub day_start_equity: f64,
    /// Wall-clock time the anchor was recorded.
    pub recorded_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct AnchorState {
    current_date: NaiveDate,
    day_start_balance: f64,
    day_start_equity: f64,
}

/// Per-account day-start anchor state machine.
#[derive(Debug)]
pub struct DayAnchor {
    account_id: String,
    state: Option<AnchorState>,
}

impl DayAnchor {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            state: None,
        }
    }

    /// Broker-local date of the current anchor, if one has been recorded.
    pub fn current_date(&self) -> Option<NaiveDate> {
        self.state.map(|s| s.current_date)
    }

    /// Process one incoming snapshot: roll the anchor when the broker-local
    /// date advanced (or on first observation), then write the day-start
    /// fields into the snapshot before it flows downstream.
    ///
    /// Returns the audit event when a new anchor was recorded.
    pub fn observe(&mut self, snapshot: &mut AccountSnapshot) -> Option<DayStartAnchored> {
        let observed_date = snapshot.observed_at_server.date_naive();

        let event = match self.state {
            None => Some(self.anchor_to(snapshot, observed_date)),
            Some(state) if observed_date > state.current_date => {
                info!(
                    account = %self.account_id,
                    old_date = %state.current_date,
                    new_date = %observed_date,
                    "broker-local date rolled"
                );
                Some(self.anchor_to(snapshot, observed_date))
            }
            Some(state) if observed_date < state.current_date => {
                // Anchor dates are monotonic; evaluate against the existing
                // anchor and leave the state untouched.
                warn!(
                    account = %self.account_id,
                    anchor_date = %state.current_date,
                    snapshot_date = %observed_date,
                    "snapshot server date is behind the anchor date"
                );
                None
            }
            Some(_) => None,
        };

        let state = self.state.expect("anchor state set above");
        snapshot.day_start_balance = Some(state.day_start_balance);
        snapshot.day_start_equity = Some(state.day_start_equity);

        event
    }

    fn anchor_to(&mut self, snapshot: &AccountSnapshot, date: NaiveDate) -> DayStartAnchored {
        self.state = Some(AnchorState {
            current_date: date,
            day_start_balance: snapshot.balance,
            day_start_equity: snapshot.equity,
        });

        debug!(
            account = %self.account_id,
            date = %date,
            balance = snapshot.balance,
            equity = snapshot.equity,
            "day-start anchor recorded"
        );

        DayStartAnchored {
            id: Uuid::new_v4(),
            account_id: self.account_id.clone(),
            date,
            day_start_balance: snapshot.balance,
            day_start_equity: snapshot.equity,
            recorded_at: Utc::now(),
        }
    }
}
