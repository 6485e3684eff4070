//! Per-instance summary statistics.
//!
//! One [`InstanceSummary`] is produced per instance when a batch completes. It
//! carries the headline numbers a scheduler ranks on (AD score, annualized
//! return, drawdowns, trade counts) and the full ordered journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use botlab_core::account::{AbortReason, SimulatedAccount, TradeCounts};
use botlab_core::bot::{BotParams, InstanceSpec};
use botlab_core::domain::Precision;
use botlab_core::journal::JournalEntry;

use crate::config::BatchId;

const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct InstanceSummary<P> {
    pub batch_id: BatchId,
    pub instance: String,
    pub market: String,
    pub params: BotParams,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    pub starting_balance: P,
    pub final_balance: P,
    pub final_equity: P,
    pub realized_profit: P,
    pub unrealized_profit: P,

    pub annualized_return: f64,
    /// Annualized return per unit of max equity drawdown.
    pub ad_score: f64,
    pub trades: TradeCounts,

    pub max_balance_drawdown: P,
    pub max_balance_drawdown_pct: P,
    pub max_equity_drawdown: P,
    pub max_equity_drawdown_pct: P,

    pub aborted: bool,
    pub abort_reason: Option<AbortReason>,
    pub aborted_at: Option<DateTime<Utc>>,

    pub journal: Vec<JournalEntry<P>>,
}

impl<P: Precision> InstanceSummary<P> {
    /// Snapshot `account` after finalization.
    pub fn from_account(
        batch_id: &str,
        spec: &InstanceSpec,
        account: &SimulatedAccount<P>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let balance_dd = account.balance_drawdown();
        let equity_dd = account.equity_drawdown();
        let years = (end - start).num_seconds() as f64 / SECONDS_PER_YEAR;
        let annualized = annualized_return(account.starting_balance().to_f64(), account.equity().to_f64(), years);

        Self {
            batch_id: batch_id.to_string(),
            instance: spec.name.clone(),
            market: spec.market.key(),
            params: spec.params.clone(),
            start,
            end,
            starting_balance: account.starting_balance(),
            final_balance: account.balance(),
            final_equity: account.equity(),
            realized_profit: account.realized_profit(),
            unrealized_profit: account.unrealized_profit(),
            annualized_return: annualized,
            ad_score: ad_score(annualized, equity_dd.max_pct.to_f64()),
            trades: account.trade_counts(),
            max_balance_drawdown: balance_dd.max_abs,
            max_balance_drawdown_pct: balance_dd.max_pct,
            max_equity_drawdown: equity_dd.max_abs,
            max_equity_drawdown_pct: equity_dd.max_pct,
            aborted: account.is_aborted(),
            abort_reason: account.abort_reason(),
            aborted_at: account.aborted_at(),
            journal: account.journal().entries().to_vec(),
        }
    }
}

/// Compound annual growth from `initial` to `last` over `years`.
///
/// Returns 0.0 for a non-positive start or duration and -1.0 when the
/// account ended with nothing.
pub fn annualized_return(initial: f64, last: f64, years: f64) -> f64 {
    if initial <= 0.0 || years <= 0.0 || !initial.is_finite() || !last.is_finite() {
        return 0.0;
    }
    if last <= 0.0 {
        return -1.0;
    }
    (last / initial).powf(1.0 / years) - 1.0
}

/// Annualized return divided by max equity drawdown (as a fraction).
///
/// Returns 0.0 when there was no drawdown to speak of.
pub fn ad_score(annualized: f64, max_drawdown_pct: f64) -> f64 {
    if max_drawdown_pct.abs() < 1e-12 || !max_drawdown_pct.is_finite() {
        return 0.0;
    }
    annualized / max_drawdown_pct
}
