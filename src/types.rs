//! Core data types used across the analytics system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for trade records
#[derive(Debug, Error)]
pub enum TradeValidationError {
    #[error("quantity ({0}) must be > 0")]
    NonPositiveQuantity(f64),

    #[error("entry price ({0}) must be > 0")]
    NonPositiveEntryPrice(f64),

    #[error("completed record is missing exit fields")]
    MissingExitFields,

    #[error("active record carries exit fields")]
    UnexpectedExitFields,

    #[error("record id must not be empty")]
    EmptyId,
}

/// Record kind: whether the trade has been closed out or is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Completed,
    Active,
}

/// Trade outcome tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Open,
}

/// Ticker symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned on every lookup and filter pass. Using Arc<str>
/// instead of String reduces heap allocations from O(n) to O(1) per clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single portfolio trade as held by the record store.
///
/// Records are immutable once stored: a re-seen id during an incremental
/// merge is ignored, and only a full reload may replace existing ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: Symbol,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub realized_pnl: Option<f64>,
    pub profit_pct: Option<f64>,
    pub outcome: Outcome,
    pub trade_date: DateTime<Utc>,
    pub exit_date: Option<DateTime<Utc>>,
    pub confidence: Option<f64>,
    pub kind: RecordKind,
}

impl TradeRecord {
    /// Validate the record invariants
    ///
    /// Exit fields must be present if and only if the record is completed.
    pub fn validate(&self) -> Result<(), TradeValidationError> {
        if self.id.is_empty() {
            return Err(TradeValidationError::EmptyId);
        }
        if self.quantity <= 0.0 {
            return Err(TradeValidationError::NonPositiveQuantity(self.quantity));
        }
        if self.entry_price <= 0.0 {
            return Err(TradeValidationError::NonPositiveEntryPrice(self.entry_price));
        }
        match self.kind {
            RecordKind::Completed => {
                if self.exit_price.is_none() || self.realized_pnl.is_none() {
                    return Err(TradeValidationError::MissingExitFields);
                }
            }
            RecordKind::Active => {
                if self.exit_price.is_some() {
                    return Err(TradeValidationError::UnexpectedExitFields);
                }
            }
        }
        Ok(())
    }

    /// Check if the record is valid without returning detailed error
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Percentage return, preferring the recorded value
    pub fn return_pct(&self) -> f64 {
        if let Some(pct) = self.profit_pct {
            return pct;
        }
        match self.exit_price {
            Some(exit) if self.entry_price != 0.0 => {
                (exit - self.entry_price) / self.entry_price * 100.0
            }
            _ => 0.0,
        }
    }
}

/// Raw trade row as returned by the remote datastore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTradeRow {
    pub id: String,
    pub symbol: String,
    pub entry_price: f64,
    #[serde(default)]
    pub exit_price: Option<f64>,
    pub quantity: f64,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub profit_percentage: Option<f64>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub trade_date: DateTime<Utc>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_date: Option<DateTime<Utc>>,
}

impl RawTradeRow {
    /// Convert a wire row into a stored record.
    ///
    /// The outcome tag is optional on the wire; for completed rows it is
    /// inferred from the sign of realized P&L, active rows are always Open.
    pub fn into_record(self, kind: RecordKind) -> TradeRecord {
        let outcome = match kind {
            RecordKind::Active => Outcome::Open,
            RecordKind::Completed => self.outcome.unwrap_or_else(|| {
                if self.realized_pnl.unwrap_or(0.0) > 0.0 {
                    Outcome::Win
                } else {
                    Outcome::Loss
                }
            }),
        };

        TradeRecord {
            id: self.id,
            symbol: Symbol::new(&self.symbol),
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            quantity: self.quantity,
            realized_pnl: self.realized_pnl,
            profit_pct: self.profit_percentage,
            outcome,
            trade_date: self.trade_date,
            exit_date: self.exit_date,
            confidence: self.confidence,
            kind,
        }
    }
}

/// Aggregate statistics over a filtered record subset.
///
/// Snapshots are transient: computed fresh per call, never mutated.
/// Every divide-by-zero or empty-input case yields 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_investment: f64,
    pub total_recovery: f64,
    pub net_pnl: f64,
    pub win_rate: f64,
    pub average_return: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub active_trades: usize,
}
