//! Metrics engine
//!
//! Computes the dashboard's financial aggregates over a completed-only
//! filtered subset, keeping unrounded running sums throughout. Every
//! divide-by-zero or empty-input case yields 0 - never NaN, never a panic.

use itertools::Itertools;
use statrs::statistics::Statistics;

use crate::{MetricsSnapshot, Outcome, RecordKind, TradeRecord};

/// Price-delta threshold below which the reverse-quantity derivation is
/// considered unstable and the recorded quantity is trusted instead.
pub const QTY_DERIVE_EPS: f64 = 1e-3;

/// Effective traded quantity for investment/recovery sums.
///
/// Recorded quantities can be partial; realized P&L is the more
/// trustworthy signal, so quantity is back-solved from
/// `realized_pnl / (exit - entry)` whenever the price delta is usable.
fn effective_quantity(record: &TradeRecord) -> f64 {
    match (record.exit_price, record.realized_pnl) {
        (Some(exit), Some(pnl)) if (exit - record.entry_price).abs() > QTY_DERIVE_EPS => {
            pnl / (exit - record.entry_price)
        }
        _ => record.quantity,
    }
}

/// Compute a fresh snapshot from a filtered subset.
///
/// `records` may mix kinds; completed records drive every statistic while
/// active records only contribute to the active count.
pub fn compute(records: &[TradeRecord]) -> MetricsSnapshot {
    let completed: Vec<&TradeRecord> = records
        .iter()
        .filter(|r| r.kind == RecordKind::Completed)
        .collect();
    let active_trades = records
        .iter()
        .filter(|r| r.kind == RecordKind::Active)
        .count();

    if completed.is_empty() {
        return MetricsSnapshot {
            active_trades,
            ..Default::default()
        };
    }

    let mut total_investment = 0.0;
    let mut total_recovery = 0.0;
    let mut net_pnl = 0.0;
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    let mut wins = 0usize;
    let mut losses = 0usize;

    for record in &completed {
        let qty = effective_quantity(record);
        total_investment += record.entry_price * qty;
        if let Some(exit) = record.exit_price {
            total_recovery += exit * qty;
        }

        let pnl = record.realized_pnl.unwrap_or(0.0);
        net_pnl += pnl;

        match record.outcome {
            Outcome::Win => {
                wins += 1;
                gross_profit += pnl;
            }
            Outcome::Loss => {
                losses += 1;
                gross_loss += pnl.abs();
            }
            Outcome::Open => {}
        }
    }

    let total_trades = completed.len();
    let win_rate = wins as f64 / total_trades as f64 * 100.0;

    let returns: Vec<f64> = completed.iter().map(|r| r.return_pct()).collect();
    let average_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let (best_trade, worst_trade) = match returns.iter().minmax().into_option() {
        Some((min, max)) => (*max, *min),
        None => (0.0, 0.0),
    };

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    MetricsSnapshot {
        total_investment,
        total_recovery,
        net_pnl,
        win_rate,
        average_return,
        best_trade,
        worst_trade,
        profit_factor,
        sharpe_ratio: sharpe_ratio(&returns),
        max_drawdown: max_drawdown(&completed),
        total_trades,
        winning_trades: wins,
        losing_trades: losses,
        active_trades,
    }
}

/// Simplified Sharpe: mean over standard deviation of percentage returns.
///
/// 0 with fewer than 2 data points or zero deviation.
fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.mean();
    let std_dev = returns.std_dev();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

/// Maximum peak-to-trough drawdown of cumulative P&L, in percent.
///
/// Trades are walked in ascending chronological order; the running peak is
/// tracked and `(peak - cumulative) / |peak| * 100` evaluated at each step,
/// guarded against a zero peak.
fn max_drawdown(completed: &[&TradeRecord]) -> f64 {
    let mut ordered: Vec<&TradeRecord> = completed.to_vec();
    ordered.sort_by(|a, b| a.trade_date.cmp(&b.trade_date).then(a.id.cmp(&b.id)));

    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_dd = 0.0;

    for record in ordered {
        cumulative += record.realized_pnl.unwrap_or(0.0);
        if cumulative > peak {
            peak = cumulative;
        } else if peak.abs() > f64::EPSILON {
            let dd = (peak - cumulative) / peak.abs() * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}
