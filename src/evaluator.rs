// =============================================================================
// Rule evaluator — pure function over (Rules, Snapshot) → breaches
// =============================================================================
//
// No I/O, no clock reads: all time comes from `snapshot.observed_at_server`.
// Checks run in a fixed order and the returned list preserves it:
//
//   1. Daily drawdown   (whichever of balance/equity decline is worse)
//   2. Total drawdown   (from the account's starting balance)
//   3. Risk per trade   (notional vs equity, per position)
//   4. Max open lots
//   5. Max positions    (HARD only)
//   6. Margin level
//   7. Missing stop loss
//   8. Leverage         (HARD only)
//
// Boundary semantics: drawdown checks emit HARD at exactly the limit and WARN
// at exactly warn_buffer × limit. Margin emits HARD at exactly the critical
// level and WARN at exactly the warn level.
// =============================================================================

use chrono::{Datelike, Weekday};

use crate::rules::{RuleBreach, Rules};
use crate::snapshot::AccountSnapshot;
use crate::types::{BreachCode, BreachLevel};

/// Evaluate `rules` against one observed snapshot.
///
/// `starting_balance` is the account's initial funded balance from its
/// configuration; the total-drawdown check measures from it. The function is
/// total: every input yields a (possibly empty) breach list.
pub fn evaluate(
    rules: &Rules,
    snapshot: &AccountSnapshot,
    starting_balance: f64,
) -> Vec<RuleBreach> {
    let mut breaches = Vec::new();

    check_daily_drawdown(rules, snapshot, &mut breaches);
    check_total_drawdown(rules, snapshot, starting_balance, &mut breaches);
    check_risk_per_trade(rules, snapshot, &mut breaches);
    check_max_lots(rules, snapshot, &mut breaches);
    check_max_positions(rules, snapshot, &mut breaches);
    check_margin_level(rules, snapshot, &mut breaches);
    check_missing_stop_loss(rules, snapshot, &mut breaches);
    check_leverage(rules, snapshot, &mut breaches);

    breaches
}

fn breach(
    snapshot: &AccountSnapshot,
    code: BreachCode,
    level: BreachLevel,
    message: String,
    value: Option<f64>,
    threshold: Option<f64>,
) -> RuleBreach {
    RuleBreach {
        code,
        level,
        message,
        value,
        threshold,
        account_id: snapshot.account_id.clone(),
        observed_at: snapshot.observed_at_server,
    }
}

fn is_weekend(snapshot: &AccountSnapshot) -> bool {
    matches!(
        snapshot.observed_at_server.weekday(),
        Weekday::Sat | Weekday::Sun
    )
}

// -----------------------------------------------------------------------------
// 1. Daily drawdown — the "whichever is worse" rule
// -----------------------------------------------------------------------------

fn check_daily_drawdown(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    let Some(limit) = rules.max_daily_drawdown_pct else {
        return;
    };
    if rules.trading_days_only && is_weekend(snapshot) {
        return;
    }
    let Some(anchor) = snapshot.day_start_anchor() else {
        return;
    };
    if anchor <= 0.0 {
        return;
    }

    let loss_by_equity = (anchor - snapshot.equity).max(0.0);
    let loss_by_balance = (anchor - snapshot.balance).max(0.0);
    let loss = loss_by_equity.max(loss_by_balance);
    let pct = 100.0 * loss / anchor;

    if pct >= limit {
        out.push(breach(
            snapshot,
            BreachCode::DailyDd,
            BreachLevel::Hard,
            format!(
                "daily drawdown {pct:.2}% breached the {limit:.2}% limit \
                 (anchor {anchor:.2}, equity {:.2}, balance {:.2})",
                snapshot.equity, snapshot.balance
            ),
            Some(pct),
            Some(limit),
        ));
    } else if pct >= rules.warn_buffer_pct * limit {
        out.push(breach(
            snapshot,
            BreachCode::DailyDd,
            BreachLevel::Warn,
            format!("daily drawdown {pct:.2}% is approaching the {limit:.2}% limit"),
            Some(pct),
            Some(limit),
        ));
    }
}

// -----------------------------------------------------------------------------
// 2. Total drawdown — from the initial funded balance
// -----------------------------------------------------------------------------

fn check_total_drawdown(
    rules: &Rules,
    snapshot: &AccountSnapshot,
    starting_balance: f64,
    out: &mut Vec<RuleBreach>,
) {
    let Some(limit) = rules.max_total_drawdown_pct else {
        return;
    };
    if starting_balance <= 0.0 {
        return;
    }

    let pct = 100.0 * (starting_balance - snapshot.equity).max(0.0) / starting_balance;

    if pct >= limit {
        out.push(breach(
            snapshot,
            BreachCode::TotalDd,
            BreachLevel::Hard,
            format!(
                "total drawdown {pct:.2}% breached the {limit:.2}% limit \
                 (starting balance {starting_balance:.2}, equity {:.2})",
                snapshot.equity
            ),
            Some(pct),
            Some(limit),
        ));
    } else if pct >= rules.warn_buffer_pct * limit {
        out.push(breach(
            snapshot,
            BreachCode::TotalDd,
            BreachLevel::Warn,
            format!("total drawdown {pct:.2}% is approaching the {limit:.2}% limit"),
            Some(pct),
            Some(limit),
        ));
    }
}

// -----------------------------------------------------------------------------
// 3. Risk per trade — notional vs equity, per offending position
// -----------------------------------------------------------------------------

fn check_risk_per_trade(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    let Some(limit) = rules.max_risk_per_trade_pct else {
        return;
    };
    if snapshot.equity <= 0.0 {
        return;
    }

    let mut unknown_notional = 0usize;
    for position in &snapshot.positions {
        let Some(notional) = position.notional() else {
            unknown_notional += 1;
            continue;
        };
        let pct = 100.0 * notional / snapshot.equity;
        if pct >= limit {
            out.push(breach(
                snapshot,
                BreachCode::RiskPerTrade,
                BreachLevel::Hard,
                format!(
                    "position {} ({}) risks {pct:.2}% of equity, limit {limit:.2}%",
                    position.id, position.symbol
                ),
                Some(pct),
                Some(limit),
            ));
        } else if pct >= rules.warn_buffer_pct * limit {
            out.push(breach(
                snapshot,
                BreachCode::RiskPerTrade,
                BreachLevel::Warn,
                format!(
                    "position {} ({}) risks {pct:.2}% of equity, approaching the {limit:.2}% limit",
                    position.id, position.symbol
                ),
                Some(pct),
                Some(limit),
            ));
        }
    }

    // Degraded mode: one advisory, no numeric claim.
    if unknown_notional > 0 {
        out.push(breach(
            snapshot,
            BreachCode::RiskPerTrade,
            BreachLevel::Warn,
            format!(
                "contract size unknown for {unknown_notional} position(s); \
                 per-trade risk could not be fully verified"
            ),
            None,
            None,
        ));
    }
}

// -----------------------------------------------------------------------------
// 4. Max open lots
// -----------------------------------------------------------------------------

fn check_max_lots(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    let Some(limit) = rules.max_open_lots else {
        return;
    };

    let total = snapshot.total_open_lots();
    if total > limit {
        out.push(breach(
            snapshot,
            BreachCode::MaxLots,
            BreachLevel::Hard,
            format!("open volume {total:.2} lots exceeds the {limit:.2} lot limit"),
            Some(total),
            Some(limit),
        ));
    } else if total >= rules.warn_buffer_pct * limit && total > 0.0 {
        out.push(breach(
            snapshot,
            BreachCode::MaxLots,
            BreachLevel::Warn,
            format!("open volume {total:.2} lots is approaching the {limit:.2} lot limit"),
            Some(total),
            Some(limit),
        ));
    }
}

// -----------------------------------------------------------------------------
// 5. Max positions — HARD only
// -----------------------------------------------------------------------------

fn check_max_positions(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    let Some(limit) = rules.max_positions else {
        return;
    };

    let count = snapshot.positions.len() as u32;
    if count > limit {
        out.push(breach(
            snapshot,
            BreachCode::MaxPositions,
            BreachLevel::Hard,
            format!("{count} open positions exceed the limit of {limit}"),
            Some(f64::from(count)),
            Some(f64::from(limit)),
        ));
    }
}

// -----------------------------------------------------------------------------
// 6. Margin level
// -----------------------------------------------------------------------------

fn check_margin_level(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    // No margin in use means an infinite level; nothing to check.
    let Some(level) = snapshot.margin_level_pct() else {
        return;
    };

    if level <= rules.margin_critical_level_pct {
        out.push(breach(
            snapshot,
            BreachCode::MarginLevel,
            BreachLevel::Hard,
            format!(
                "margin level {level:.1}% is at or below the critical {:.1}% threshold",
                rules.margin_critical_level_pct
            ),
            Some(level),
            Some(rules.margin_critical_level_pct),
        ));
    } else if level <= rules.margin_warn_level_pct {
        out.push(breach(
            snapshot,
            BreachCode::MarginLevel,
            BreachLevel::Warn,
            format!(
                "margin level {level:.1}% is at or below the {:.1}% warning threshold",
                rules.margin_warn_level_pct
            ),
            Some(level),
            Some(rules.margin_warn_level_pct),
        ));
    }
}

// -----------------------------------------------------------------------------
// 7. Missing stop loss
// -----------------------------------------------------------------------------

fn check_missing_stop_loss(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    if !rules.require_stop_loss {
        return;
    }

    for position in &snapshot.positions {
        if !position.has_stop_loss() {
            out.push(breach(
                snapshot,
                BreachCode::MissingStopLoss,
                BreachLevel::Warn,
                format!(
                    "position {} ({}) has no stop loss",
                    position.id, position.symbol
                ),
                None,
                None,
            ));
        }
    }
}

// -----------------------------------------------------------------------------
// 8. Leverage — HARD only, when the platform exposes it
// -----------------------------------------------------------------------------

fn check_leverage(rules: &Rules, snapshot: &AccountSnapshot, out: &mut Vec<RuleBreach>) {
    let (Some(limit), Some(leverage)) = (rules.max_leverage, snapshot.leverage) else {
        return;
    };

    if leverage > limit {
        out.push(breach(
            snapshot,
            BreachCode::Leverage,
            BreachLevel::Hard,
            format!("account leverage 1:{leverage:.0} exceeds the allowed 1:{limit:.0}"),
            Some(leverage),
            Some(limit),
        ));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};

    use crate::snapshot::Position;
    use crate::types::{Platform, Side};

    const STARTING_BALANCE: f64 = 100_000.0;

    fn rules() -> Rules {
        Rules {
            name: "Test 100k".to_string(),
            program_id: None,
            max_daily_drawdown_pct: Some(5.0),
            max_total_drawdown_pct: Some(10.0),
            max_risk_per_trade_pct: None,
            max_open_lots: None,
            max_positions: None,
            margin_warn_level_pct: 100.0,
            margin_critical_level_pct: 50.0,
            trading_days_only: false,
            require_stop_loss: false,
            max_leverage: None,
            warn_buffer_pct: 0.8,
        }
    }

    /// Snapshot on a Wednesday with the day-start fields filled in.
    fn snapshot(
        day_start_balance: f64,
        day_start_equity: f64,
        balance: f64,
        equity: f64,
    ) -> AccountSnapshot {
        let server = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 12, 14, 30, 0)
            .unwrap();
        AccountSnapshot {
            account_id: "10012345".to_string(),
            platform: Platform::Mt5,
            currency: "USD".to_string(),
            balance,
            equity,
            margin_used: 0.0,
            margin_free: equity,
            day_start_balance: Some(day_start_balance),
            day_start_equity: Some(day_start_equity),
            leverage: None,
            positions: Vec::new(),
            observed_at_server: server,
            observed_at_wall: Utc::now(),
        }
    }

    fn position(id: &str, volume: f64, price: f64, contract_size: Option<f64>) -> Position {
        Position {
            id: id.to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            volume_lots: volume,
            open_price: price,
            current_price: price,
            stop_loss_price: Some(price * 0.99),
            take_profit_price: None,
            unrealized_pl: 0.0,
            open_time: Utc::now(),
            commission: 0.0,
            swap: 0.0,
            contract_size,
        }
    }

    fn find(breaches: &[RuleBreach], code: BreachCode) -> Vec<&RuleBreach> {
        breaches.iter().filter(|b| b.code == code).collect()
    }

    // --- Daily drawdown scenarios (100k account, 5% daily, 10% total) --------

    #[test]
    fn floating_loss_dominates() {
        let snap = snapshot(100_000.0, 100_000.0, 100_000.0, 95_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let daily = find(&breaches, BreachCode::DailyDd);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].level, BreachLevel::Hard);
        assert!((daily[0].value.unwrap() - 5.0).abs() < 1e-9);
        assert!((daily[0].threshold.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn realized_loss_dominates_despite_floating_profit() {
        // balance fell 5 000 but a floating profit lifts equity back up:
        // the worse of the two declines governs.
        let snap = snapshot(100_000.0, 100_000.0, 95_000.0, 97_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let daily = find(&breaches, BreachCode::DailyDd);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].level, BreachLevel::Hard);
        assert!((daily[0].value.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn combined_losses() {
        let snap = snapshot(100_000.0, 100_000.0, 96_000.0, 94_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let daily = find(&breaches, BreachCode::DailyDd);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].level, BreachLevel::Hard);
        assert!((daily[0].value.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn anchor_uses_higher_of_day_start_balance_and_equity() {
        let snap = snapshot(98_000.0, 100_000.0, 98_000.0, 95_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let daily = find(&breaches, BreachCode::DailyDd);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].level, BreachLevel::Hard);
        assert!((daily[0].value.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn warning_zone() {
        let snap = snapshot(100_000.0, 100_000.0, 100_000.0, 95_500.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let daily = find(&breaches, BreachCode::DailyDd);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].level, BreachLevel::Warn);
        assert!((daily[0].value.unwrap() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn clean_account_emits_nothing() {
        let snap = snapshot(100_000.0, 100_000.0, 99_000.0, 99_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        assert!(breaches.is_empty());
    }

    // --- Boundary behaviour ---------------------------------------------------

    #[test]
    fn exactly_at_limit_is_hard_not_warn() {
        // 5 000 / 100 000 = exactly 5.00%
        let snap = snapshot(100_000.0, 100_000.0, 100_000.0, 95_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        assert_eq!(find(&breaches, BreachCode::DailyDd)[0].level, BreachLevel::Hard);
    }

    #[test]
    fn exactly_at_warn_buffer_is_warn() {
        // 4 000 / 100 000 = exactly 4.00% = 0.8 × 5.0
        let snap = snapshot(100_000.0, 100_000.0, 100_000.0, 96_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let daily = find(&breaches, BreachCode::DailyDd);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].level, BreachLevel::Warn);
    }

    #[test]
    fn just_below_warn_buffer_emits_nothing() {
        let snap = snapshot(100_000.0, 100_000.0, 100_000.0, 96_000.01);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        assert!(find(&breaches, BreachCode::DailyDd).is_empty());
    }

    #[test]
    fn total_drawdown_hard_and_warn() {
        // equity 90 000 → exactly 10% total drawdown
        let snap = snapshot(100_000.0, 100_000.0, 90_000.0, 90_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let total = find(&breaches, BreachCode::TotalDd);
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].level, BreachLevel::Hard);

        // equity 92 000 → 8% = 0.8 × 10 → WARN
        let snap = snapshot(100_000.0, 100_000.0, 92_000.0, 92_000.0);
        let breaches = evaluate(&rules(), &snap, STARTING_BALANCE);
        let total = find(&breaches, BreachCode::TotalDd);
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].level, BreachLevel::Warn);
    }

    #[test]
    fn margin_boundaries() {
        let mut r = rules();
        r.max_daily_drawdown_pct = None;
        r.max_total_drawdown_pct = None;

        // Exactly critical → HARD. equity 25 000, margin_used 50 000 → 50%.
        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 25_000.0);
        snap.margin_used = 50_000.0;
        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        let margin = find(&breaches, BreachCode::MarginLevel);
        assert_eq!(margin.len(), 1);
        assert_eq!(margin[0].level, BreachLevel::Hard);

        // Exactly warn → WARN. equity 50 000, margin_used 50 000 → 100%.
        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 50_000.0);
        snap.margin_used = 50_000.0;
        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        let margin = find(&breaches, BreachCode::MarginLevel);
        assert_eq!(margin.len(), 1);
        assert_eq!(margin[0].level, BreachLevel::Warn);

        // Comfortably above warn → nothing.
        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 100_000.0);
        snap.margin_used = 50_000.0;
        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        assert!(find(&breaches, BreachCode::MarginLevel).is_empty());
    }

    // --- Exposure checks ------------------------------------------------------

    #[test]
    fn risk_per_trade_per_position_and_advisory() {
        let mut r = rules();
        r.max_risk_per_trade_pct = Some(50.0);

        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 100_000.0);
        // 1.0 lot × 100 000 × 1.0 = 100 000 notional = 100% of equity → HARD
        snap.positions.push(position("t1", 1.0, 1.0, Some(100_000.0)));
        // 0.45 lot → 45% → WARN (buffer 0.8 × 50 = 40)
        snap.positions.push(position("t2", 0.45, 1.0, Some(100_000.0)));
        // unknown contract size → advisory
        snap.positions.push(position("t3", 0.1, 1.0, None));

        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        let risk = find(&breaches, BreachCode::RiskPerTrade);
        assert_eq!(risk.len(), 3);
        assert_eq!(risk[0].level, BreachLevel::Hard);
        assert_eq!(risk[1].level, BreachLevel::Warn);
        // Advisory last, no numeric claim.
        assert_eq!(risk[2].level, BreachLevel::Warn);
        assert!(risk[2].value.is_none());
        assert!(risk[2].threshold.is_none());
    }

    #[test]
    fn max_lots_and_positions() {
        let mut r = rules();
        r.max_daily_drawdown_pct = None;
        r.max_total_drawdown_pct = None;
        r.max_open_lots = Some(2.0);
        r.max_positions = Some(2);

        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 100_000.0);
        snap.positions.push(position("t1", 1.0, 1.0, Some(100_000.0)));
        snap.positions.push(position("t2", 1.0, 1.0, Some(100_000.0)));
        snap.positions.push(position("t3", 0.5, 1.0, Some(100_000.0)));

        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        let lots = find(&breaches, BreachCode::MaxLots);
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].level, BreachLevel::Hard);
        assert!((lots[0].value.unwrap() - 2.5).abs() < 1e-9);

        let count = find(&breaches, BreachCode::MaxPositions);
        assert_eq!(count.len(), 1);
        assert_eq!(count[0].level, BreachLevel::Hard);
    }

    #[test]
    fn max_positions_at_limit_is_clean() {
        let mut r = rules();
        r.max_positions = Some(2);
        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 100_000.0);
        snap.positions.push(position("t1", 0.1, 1.0, Some(100_000.0)));
        snap.positions.push(position("t2", 0.1, 1.0, Some(100_000.0)));
        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        assert!(find(&breaches, BreachCode::MaxPositions).is_empty());
    }

    #[test]
    fn missing_stop_loss_per_position() {
        let mut r = rules();
        r.require_stop_loss = true;
        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 100_000.0);
        let mut naked = position("t1", 0.1, 1.0, Some(100_000.0));
        naked.stop_loss_price = None;
        snap.positions.push(naked);
        snap.positions.push(position("t2", 0.1, 1.0, Some(100_000.0)));

        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        let sl = find(&breaches, BreachCode::MissingStopLoss);
        assert_eq!(sl.len(), 1);
        assert!(sl[0].message.contains("t1"));
    }

    #[test]
    fn leverage_hard_only_when_exposed() {
        let mut r = rules();
        r.max_leverage = Some(100.0);

        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 100_000.0);
        // Leverage unknown → no check.
        assert!(find(&evaluate(&r, &snap, STARTING_BALANCE), BreachCode::Leverage).is_empty());

        snap.leverage = Some(200.0);
        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        let lev = find(&breaches, BreachCode::Leverage);
        assert_eq!(lev.len(), 1);
        assert_eq!(lev[0].level, BreachLevel::Hard);

        // At the cap exactly — allowed.
        snap.leverage = Some(100.0);
        assert!(find(&evaluate(&r, &snap, STARTING_BALANCE), BreachCode::Leverage).is_empty());
    }

    // --- Calendar & purity ----------------------------------------------------

    #[test]
    fn weekend_suppresses_daily_dd_when_trading_days_only() {
        let mut r = rules();
        r.trading_days_only = true;
        r.max_total_drawdown_pct = None;

        let mut snap = snapshot(100_000.0, 100_000.0, 100_000.0, 94_000.0);
        // Move the observation to Saturday 2025-03-15.
        snap.observed_at_server = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 15, 10, 0, 0)
            .unwrap();

        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        assert!(find(&breaches, BreachCode::DailyDd).is_empty());

        // Same losses on a weekday fire as usual.
        snap.observed_at_server = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 17, 10, 0, 0)
            .unwrap();
        let breaches = evaluate(&r, &snap, STARTING_BALANCE);
        assert_eq!(find(&breaches, BreachCode::DailyDd).len(), 1);
    }

    #[test]
    fn evaluation_is_pure() {
        let snap = snapshot(100_000.0, 100_000.0, 96_000.0, 94_000.0);
        let r = rules();
        let a = evaluate(&r, &snap, STARTING_BALANCE);
        let b = evaluate(&r, &snap, STARTING_BALANCE);
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn breach_order_matches_check_order() {
        let mut r = rules();
        r.max_open_lots = Some(0.5);
        r.require_stop_loss = true;

        let mut snap = snapshot(100_000.0, 100_000.0, 94_000.0, 89_000.0);
        let mut naked = position("t1", 1.0, 1.0, Some(100_000.0));
        naked.stop_loss_price = None;
        snap.positions.push(naked);

        let codes: Vec<BreachCode> = evaluate(&r, &snap, STARTING_BALANCE)
            .iter()
            .map(|b| b.code)
            .collect();
        assert_eq!(
            codes,
            vec![
                BreachCode::DailyDd,
                BreachCode::TotalDd,
                BreachCode::MaxLots,
                BreachCode::MissingStopLoss,
            ]
        );
    }
}
