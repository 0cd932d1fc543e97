//! Filter engine
//!
//! Resolves a period selector into a concrete date interval and applies
//! predicates in a fixed precedence: date range first, then symbol, then
//! outcome. Read-only and synchronous; never mutates the record store.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnhancedError;
use crate::{Outcome, TradeRecord};

/// Period selector for the dashboard views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Today,
    #[serde(rename = "7d")]
    SevenDay,
    #[default]
    #[serde(rename = "30d")]
    ThirtyDay,
    Custom,
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Period::Today),
            "7d" => Ok(Period::SevenDay),
            "30d" => Ok(Period::ThirtyDay),
            "custom" => Ok(Period::Custom),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

/// Predicate bundle describing which records to include.
///
/// An absent dimension matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    pub period: Period,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl FilterSpec {
    pub fn for_period(period: Period) -> Self {
        FilterSpec {
            period,
            ..Default::default()
        }
    }

    /// Explicit dates are required when the period is custom.
    ///
    /// An inverted custom range is NOT a validation failure; it resolves to
    /// the empty sequence by contract.
    pub fn validate(&self) -> Result<(), EnhancedError> {
        if self.period == Period::Custom && (self.start.is_none() || self.end.is_none()) {
            return Err(EnhancedError::validation(
                "apply_filter",
                "custom period requires explicit start and end dates",
            ));
        }
        Ok(())
    }

    /// Resolve the period into a concrete [start, end] interval
    pub fn resolve_range(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self.period {
            Period::Today => {
                let day = now.date_naive();
                let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?);
                Some((start, now))
            }
            Period::SevenDay => Some((now - chrono::Duration::days(7), now)),
            Period::ThirtyDay => Some((now - chrono::Duration::days(30), now)),
            Period::Custom => {
                let start = Utc.from_utc_datetime(&self.start?.and_hms_opt(0, 0, 0)?);
                let end = Utc.from_utc_datetime(&self.end?.and_hms_opt(23, 59, 59)?);
                Some((start, end))
            }
        }
    }
}

/// Apply a filter spec over a record iterator.
///
/// Predicates run in fixed precedence: date range (most selective,
/// cheapest) -> case-insensitive symbol equality -> outcome equality.
/// Output is ordered by (trade_date, id) so equal specs over an unchanged
/// store return identical sequences.
pub fn filter_records<'a, I>(records: I, spec: &FilterSpec, now: DateTime<Utc>) -> Vec<TradeRecord>
where
    I: Iterator<Item = &'a TradeRecord>,
{
    let range = spec.resolve_range(now);

    // an inverted custom range is a defined empty result, not an error
    if let Some((start, end)) = range {
        if start > end {
            return Vec::new();
        }
    }

    let mut matched: Vec<TradeRecord> = records
        .filter(|r| match range {
            Some((start, end)) => r.trade_date >= start && r.trade_date <= end,
            None => true,
        })
        .filter(|r| match &spec.symbol {
            Some(symbol) => r.symbol.as_str().eq_ignore_ascii_case(symbol),
            None => true,
        })
        .filter(|r| match spec.outcome {
            Some(outcome) => r.outcome == outcome,
            None => true,
        })
        .cloned()
        .collect();

    matched.sort_by(|a, b| a.trade_date.cmp(&b.trade_date).then(a.id.cmp(&b.id)));
    matched
}
