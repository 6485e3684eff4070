//! Simulated account: balance, holdings, positions and the order engine.
//!
//! Accounting rules:
//! - balance = starting balance + realized profit (no fees)
//! - equity = balance + Σ quantity × (mark − entry) over open positions
//! - profit on a decreasing delta is booked to the position and the balance
//!   before the quantity is mutated, and exactly one journal entry records
//!   each nonzero quantity change

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Bar, PositionId, Precision, TransactionId};
use crate::journal::{EntryType, Journal, JournalEntry};

use super::{
    Direction, OrderError, OrderFlags, OrderResult, OrderStatus, Position, PositionState,
    ProtectionUpdate,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// At most one open position per symbol; opposing orders net against it.
    #[default]
    Netting,
    /// Every open order creates its own position.
    Hedging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Live,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    BalanceDrawdown,
    EquityDrawdown,
    Bankrupt,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::BalanceDrawdown => "balance drawdown limit",
            AbortReason::EquityDrawdown => "equity drawdown limit",
            AbortReason::Bankrupt => "bankrupt",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct AccountConfig<P> {
    pub starting_balance: P,
    pub currency: String,
    /// Fraction of the balance peak, e.g. 0.5 aborts at a 50% drawdown.
    pub max_balance_drawdown: Option<P>,
    /// Fraction of the equity peak.
    pub max_equity_drawdown: Option<P>,
    pub position_mode: PositionMode,
    pub can_position_change_directions: bool,
}

impl<P: Precision> Default for AccountConfig<P> {
    fn default() -> Self {
        Self {
            starting_balance: P::from_i64(10_000),
            currency: "USD".into(),
            max_balance_drawdown: None,
            max_equity_drawdown: None,
            position_mode: PositionMode::Netting,
            can_position_change_directions: false,
        }
    }
}

/// Running peak and worst drawdown of one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct Drawdown<P> {
    pub peak: P,
    pub max_abs: P,
    /// Worst drawdown as a fraction of the peak at the time.
    pub max_pct: P,
}

impl<P: Precision> Drawdown<P> {
    fn new(start: P) -> Self {
        Self {
            peak: start,
            max_abs: P::zero(),
            max_pct: P::zero(),
        }
    }

    /// Record a new value and return the current drawdown fraction.
    fn update(&mut self, value: P) -> P {
        if value > self.peak {
            self.peak = value;
        }
        let abs = self.peak - value;
        let pct = if self.peak.is_positive() {
            abs / self.peak
        } else {
            P::zero()
        };
        self.max_abs = self.max_abs.max_of(abs);
        self.max_pct = self.max_pct.max_of(pct);
        pct
    }
}

/// Trade outcome counts. A trade is one position from open to close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCounts {
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    /// Positions still open, outcome undetermined.
    pub unknown: usize,
}

impl TradeCounts {
    pub fn total(&self) -> usize {
        self.wins + self.losses + self.breakeven + self.unknown
    }
}

#[derive(Debug, Clone)]
struct Holding<P> {
    mark: P,
}

#[derive(Debug, Clone)]
pub struct SimulatedAccount<P> {
    config: AccountConfig<P>,
    balance: P,
    status: AccountStatus,
    abort: Option<(AbortReason, DateTime<Utc>)>,
    clock: DateTime<Utc>,
    holdings: BTreeMap<String, Holding<P>>,
    open: BTreeMap<PositionId, Position<P>>,
    closed: Vec<Position<P>>,
    journal: Journal<P>,
    next_position: u64,
    next_transaction: i64,
    balance_drawdown: Drawdown<P>,
    equity_drawdown: Drawdown<P>,
}

impl<P: Precision> SimulatedAccount<P> {
    pub fn new(config: AccountConfig<P>, start: DateTime<Utc>) -> Self {
        let balance = config.starting_balance;
        Self {
            config,
            balance,
            status: AccountStatus::Live,
            abort: None,
            clock: start,
            holdings: BTreeMap::new(),
            open: BTreeMap::new(),
            closed: Vec::new(),
            journal: Journal::new(),
            next_position: 1,
            next_transaction: 1,
            balance_drawdown: Drawdown::new(balance),
            equity_drawdown: Drawdown::new(balance),
        }
    }

    // ─── Read access ─────────────────────────────────────────────────

    pub fn config(&self) -> &AccountConfig<P> {
        &self.config
    }

    pub fn starting_balance(&self) -> P {
        self.config.starting_balance
    }

    pub fn balance(&self) -> P {
        self.balance
    }

    pub fn realized_profit(&self) -> P {
        self.balance - self.config.starting_balance
    }

    pub fn unrealized_profit(&self) -> P {
        self.open.values().fold(P::zero(), |acc, pos| {
            let mark = self.mark(&pos.symbol).unwrap_or(pos.entry_price);
            acc + pos.unrealized_profit(mark)
        })
    }

    pub fn equity(&self) -> P {
        self.balance + self.unrealized_profit()
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn is_aborted(&self) -> bool {
        self.status == AccountStatus::Aborted
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort.map(|(reason, _)| reason)
    }

    pub fn aborted_at(&self) -> Option<DateTime<Utc>> {
        self.abort.map(|(_, at)| at)
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    pub fn mark(&self, symbol: &str) -> Option<P> {
        self.holdings.get(symbol).map(|h| h.mark)
    }

    pub fn position(&self, id: PositionId) -> Option<&Position<P>> {
        self.open.get(&id)
    }

    /// Open positions in id order.
    pub fn positions(&self) -> impl Iterator<Item = &Position<P>> {
        self.open.values()
    }

    pub fn positions_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Position<P>> + 'a {
        self.open.values().filter(move |p| p.symbol == symbol)
    }

    pub fn closed_positions(&self) -> &[Position<P>] {
        &self.closed
    }

    /// Net signed quantity held in `symbol`.
    pub fn net_quantity(&self, symbol: &str) -> P {
        self.positions_for(symbol)
            .fold(P::zero(), |acc, p| acc + p.quantity)
    }

    pub fn journal(&self) -> &Journal<P> {
        &self.journal
    }

    pub fn balance_drawdown(&self) -> Drawdown<P> {
        self.balance_drawdown
    }

    pub fn equity_drawdown(&self) -> Drawdown<P> {
        self.equity_drawdown
    }

    pub fn trade_counts(&self) -> TradeCounts {
        let mut counts = TradeCounts {
            unknown: self.open.len(),
            ..TradeCounts::default()
        };
        for pos in &self.closed {
            if pos.realized_profit.is_positive() {
                counts.wins += 1;
            } else if pos.realized_profit.is_negative() {
                counts.losses += 1;
            } else {
                counts.breakeven += 1;
            }
        }
        counts
    }

    // ─── Market updates ──────────────────────────────────────────────

    pub fn set_clock(&mut self, time: DateTime<Utc>) {
        if time > self.clock {
            self.clock = time;
        }
    }

    pub fn set_mark(&mut self, symbol: &str, price: P) {
        self.holdings
            .entry(symbol.to_string())
            .and_modify(|h| h.mark = price)
            .or_insert(Holding { mark: price });
    }

    /// Apply one bar of `symbol`: stop-loss and take-profit checks (stop
    /// first), then the mark update, then drawdown tracking and risk limits.
    /// Filler bars skip trigger checks and leave the mark alone.
    ///
    /// Returns the results of positions closed by triggers or liquidation.
    pub fn on_bar(&mut self, time: DateTime<Utc>, symbol: &str, bar: &Bar<P>, is_filler: bool) -> Vec<OrderResult<P>> {
        if self.is_aborted() {
            return Vec::new();
        }
        self.set_clock(time);
        let mut results = Vec::new();

        if !is_filler {
            let ids: Vec<PositionId> = self.positions_for(symbol).map(|p| p.id).collect();
            for id in ids {
                let Some(pos) = self.open.get(&id) else { continue };
                let trigger = pos
                    .stop_hit(bar.low, bar.high)
                    .map(|price| (price, OrderFlags::STOP_LOSS))
                    .or_else(|| {
                        pos.target_hit(bar.low, bar.high)
                            .map(|price| (price, OrderFlags::TAKE_PROFIT))
                    });
                if let Some((price, cause)) = trigger {
                    let tx = self.new_transaction();
                    results.push(self.close_whole(tx, id, price, OrderFlags::CLOSE | cause));
                }
            }
            self.set_mark(symbol, bar.close);
        }

        results.extend(self.check_risk(symbol));
        results
    }

    fn check_risk(&mut self, symbol: &str) -> Vec<OrderResult<P>> {
        let equity = self.equity();
        let balance_dd = self.balance_drawdown.update(self.balance);
        let equity_dd = self.equity_drawdown.update(equity);

        let reason = if !equity.is_positive() {
            Some(AbortReason::Bankrupt)
        } else if self.config.max_balance_drawdown.is_some_and(|limit| balance_dd >= limit) {
            Some(AbortReason::BalanceDrawdown)
        } else if self.config.max_equity_drawdown.is_some_and(|limit| equity_dd >= limit) {
            Some(AbortReason::EquityDrawdown)
        } else {
            None
        };
        match reason {
            Some(reason) => self.abort(reason, symbol),
            None => Vec::new(),
        }
    }

    /// Liquidate every open position at its mark and freeze the account.
    fn abort(&mut self, reason: AbortReason, symbol: &str) -> Vec<OrderResult<P>> {
        let tx = self.new_transaction();
        let results = self.liquidate(tx, OrderFlags::CLOSE | OrderFlags::LIQUIDATION);
        self.journal.append(JournalEntry {
            transaction_id: tx,
            time: self.clock,
            entry_type: EntryType::Abort,
            flags: OrderFlags::LIQUIDATION,
            symbol: symbol.to_string(),
            position_id: None,
            quantity_change: P::zero(),
            price: None,
            realized_profit: None,
        });
        self.status = AccountStatus::Aborted;
        self.abort = Some((reason, self.clock));
        warn!(%reason, time = %self.clock, balance = %self.balance, "account aborted");
        results
    }

    // ─── Orders ──────────────────────────────────────────────────────

    /// Execute a market order at the current mark of `symbol`.
    ///
    /// `quantity` is signed: positive buys, negative sells. `direction`
    /// names the side of the position the order acts on; `Unspecified` is
    /// resolved from the flags and the quantity sign.
    pub fn execute_market_order(
        &mut self,
        symbol: &str,
        direction: Direction,
        quantity: P,
        flags: OrderFlags,
        position_id: Option<PositionId>,
    ) -> OrderResult<P> {
        if self.is_aborted() {
            return OrderResult::rejected(quantity, OrderError::AccountAborted);
        }
        if quantity.is_zero() {
            return OrderResult::noop(quantity);
        }
        let Some(price) = self.mark(symbol) else {
            return OrderResult::rejected(
                quantity,
                OrderError::NoMarketPrice {
                    symbol: symbol.to_string(),
                },
            );
        };
        let side = match self.resolve_direction(symbol, direction, quantity, flags, position_id) {
            Ok(side) => side,
            Err(e) => return OrderResult::rejected(quantity, e),
        };

        if flags.contains(OrderFlags::RESIZE_EXISTING_POSITION) {
            self.resize(symbol, side, quantity, flags, position_id, price)
        } else if flags.contains(OrderFlags::CLOSE) {
            self.reduce_side(symbol, side, quantity, flags, position_id, price)
        } else {
            self.open_order(symbol, side, quantity, flags, price)
        }
    }

    /// Close one position in full at the current mark.
    pub fn close_position(&mut self, id: PositionId) -> OrderResult<P> {
        let Some(pos) = self.open.get(&id) else {
            return OrderResult::rejected(P::zero(), OrderError::PositionNotFound);
        };
        let requested = -pos.quantity;
        if self.is_aborted() {
            return OrderResult::rejected(requested, OrderError::AccountAborted);
        }
        let Some(price) = self.mark(&pos.symbol) else {
            return OrderResult::rejected(
                requested,
                OrderError::NoMarketPrice {
                    symbol: pos.symbol.clone(),
                },
            );
        };
        let tx = self.new_transaction();
        self.close_whole(tx, id, price, OrderFlags::CLOSE)
    }

    /// Close every open position at its mark under one transaction.
    pub fn close_all(&mut self, flags: OrderFlags) -> Vec<OrderResult<P>> {
        if self.open.is_empty() {
            return Vec::new();
        }
        let tx = self.new_transaction();
        self.liquidate(tx, OrderFlags::CLOSE | flags)
    }

    pub fn set_stop_loss(&mut self, symbol: &str, direction: Direction, trigger: P, tighten_only: bool) -> ProtectionUpdate {
        self.protect(symbol, direction, trigger, tighten_only, true)
    }

    pub fn set_take_profit(&mut self, symbol: &str, direction: Direction, trigger: P, tighten_only: bool) -> ProtectionUpdate {
        self.protect(symbol, direction, trigger, tighten_only, false)
    }

    fn protect(&mut self, symbol: &str, direction: Direction, trigger: P, tighten_only: bool, stop: bool) -> ProtectionUpdate {
        let mut update = ProtectionUpdate::default();
        for pos in self.open.values_mut() {
            if pos.symbol != symbol || (direction != Direction::Unspecified && pos.direction() != direction) {
                continue;
            }
            let long = pos.is_long();
            let slot = if stop { &mut pos.stop_loss } else { &mut pos.take_profit };
            // Tighter means closer to the market: a long stop moves up, a long
            // target moves down, and shorts mirror both.
            let tighter = match *slot {
                None => true,
                Some(current) => match (stop, long) {
                    (true, true) | (false, false) => trigger > current,
                    (true, false) | (false, true) => trigger < current,
                },
            };
            if tighten_only && !tighter {
                update.skipped += 1;
            } else {
                *slot = Some(trigger);
                update.applied += 1;
            }
        }
        update
    }

    fn resolve_direction(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: P,
        flags: OrderFlags,
        position_id: Option<PositionId>,
    ) -> Result<Direction, OrderError> {
        let buying = Direction::of_sign(quantity.is_negative());
        let expected = if flags.contains(OrderFlags::RESIZE_EXISTING_POSITION) {
            match position_id {
                Some(id) => self
                    .open
                    .get(&id)
                    .filter(|p| p.symbol == symbol)
                    .map(|p| p.direction())
                    .ok_or(OrderError::PositionNotFound)?,
                None if direction != Direction::Unspecified => return Ok(direction),
                None => self.held_side(symbol)?,
            }
        } else if flags.contains(OrderFlags::CLOSE) {
            buying.opposite()
        } else if flags.contains(OrderFlags::OPEN) {
            buying
        } else {
            return Err(OrderError::InvalidDirection);
        };

        match direction {
            Direction::Unspecified => Ok(expected),
            d if d == expected => Ok(d),
            _ => Err(OrderError::InvalidDirection),
        }
    }

    /// Side of the open positions in `symbol`; ambiguous under hedging.
    fn held_side(&self, symbol: &str) -> Result<Direction, OrderError> {
        let mut side = None;
        for pos in self.positions_for(symbol) {
            match side {
                None => side = Some(pos.direction()),
                Some(d) if d != pos.direction() => return Err(OrderError::InvalidDirection),
                Some(_) => {}
            }
        }
        side.ok_or(OrderError::PositionNotFound)
    }

    fn targets(&self, symbol: &str, side: Direction, position_id: Option<PositionId>) -> Vec<PositionId> {
        self.open
            .values()
            .filter(|p| p.symbol == symbol && p.direction() == side)
            .filter(|p| position_id.map_or(true, |id| p.id == id))
            .map(|p| p.id)
            .collect()
    }

    fn open_order(&mut self, symbol: &str, side: Direction, quantity: P, flags: OrderFlags, price: P) -> OrderResult<P> {
        let netting = self.config.position_mode == PositionMode::Netting;
        if netting && !self.targets(symbol, side.opposite(), None).is_empty() {
            if flags.contains(OrderFlags::ALLOW_CLOSE_AND_OPEN_AT_ONCE) {
                return self.resize(symbol, side.opposite(), quantity, flags, None, price);
            }
            return OrderResult::rejected(
                quantity,
                OrderError::OppositePositionOpen {
                    symbol: symbol.to_string(),
                },
            );
        }
        let tx = self.new_transaction();
        self.open_leg(tx, symbol, side, quantity, flags, price)
    }

    /// Add `quantity` on `side`: grows the existing position under netting,
    /// otherwise opens a new one.
    fn open_leg(&mut self, tx: TransactionId, symbol: &str, side: Direction, quantity: P, flags: OrderFlags, price: P) -> OrderResult<P> {
        let existing = match self.config.position_mode {
            PositionMode::Netting => self.targets(symbol, side, None).first().copied(),
            PositionMode::Hedging => None,
        };
        let id = match existing {
            Some(id) => {
                self.increase(tx, id, quantity, price, flags);
                id
            }
            None => self.open_new(tx, symbol, quantity, price, flags),
        };
        OrderResult {
            transaction_id: Some(tx),
            status: OrderStatus::Filled,
            position_id: Some(id),
            requested: quantity,
            filled: quantity,
            price: Some(price),
            realized_profit: P::zero(),
            error: None,
            inner_results: Vec::new(),
        }
    }

    fn resize(
        &mut self,
        symbol: &str,
        side: Direction,
        quantity: P,
        flags: OrderFlags,
        position_id: Option<PositionId>,
        price: P,
    ) -> OrderResult<P> {
        let targets = self.targets(symbol, side, position_id);
        let Some(&first) = targets.first() else {
            return OrderResult::rejected(quantity, OrderError::PositionNotFound);
        };

        if Direction::of_sign(quantity.is_negative()) == side {
            let tx = self.new_transaction();
            self.increase(tx, first, quantity, price, flags);
            return OrderResult {
                transaction_id: Some(tx),
                status: OrderStatus::Filled,
                position_id: Some(first),
                requested: quantity,
                filled: quantity,
                price: Some(price),
                realized_profit: P::zero(),
                error: None,
                inner_results: Vec::new(),
            };
        }

        let available = targets
            .iter()
            .filter_map(|id| self.open.get(id))
            .fold(P::zero(), |acc, p| acc + p.quantity.abs());
        let overflow = quantity.abs() > available;
        let reduce_only = flags.contains(OrderFlags::REDUCE_ONLY) || flags.contains(OrderFlags::CLOSE);
        let reverse = flags.contains(OrderFlags::ALLOW_CLOSE_AND_OPEN_AT_ONCE);
        if overflow && !reduce_only && !reverse {
            let err = if self.config.can_position_change_directions {
                OrderError::DirectionChangeUnsupported
            } else {
                OrderError::DirectionChangeDisallowed
            };
            return OrderResult::rejected(quantity, err);
        }

        let tx = self.new_transaction();
        let mut result = self.reduce_targets(tx, &targets, quantity, flags, price);
        if overflow {
            let remainder = (quantity.abs() - available).with_sign_of(quantity);
            if reduce_only {
                result.status = OrderStatus::Partial;
            } else {
                let leg = self.open_leg(tx, symbol, side.opposite(), remainder, flags, price);
                result.inner_results.push(leg);
            }
        }
        result
    }

    fn reduce_side(
        &mut self,
        symbol: &str,
        side: Direction,
        quantity: P,
        flags: OrderFlags,
        position_id: Option<PositionId>,
        price: P,
    ) -> OrderResult<P> {
        let targets = self.targets(symbol, side, position_id);
        if targets.is_empty() {
            return OrderResult::rejected(quantity, OrderError::PositionNotFound);
        }
        let tx = self.new_transaction();
        let mut result = self.reduce_targets(tx, &targets, quantity, flags, price);
        if result.filled.abs() < quantity.abs() {
            result.status = OrderStatus::Partial;
        }
        result
    }

    /// Reduce `targets` in order by up to `|quantity|` in total.
    fn reduce_targets(&mut self, tx: TransactionId, targets: &[PositionId], quantity: P, flags: OrderFlags, price: P) -> OrderResult<P> {
        let mut remaining = quantity.abs();
        let mut realized = P::zero();
        let mut last = None;
        for &id in targets {
            if !remaining.is_positive() {
                break;
            }
            let Some(held) = self.open.get(&id).map(|p| p.quantity.abs()) else {
                continue;
            };
            let delta = remaining.min_of(held);
            realized += self.reduce(tx, id, delta, price, flags);
            remaining -= delta;
            last = Some(id);
        }
        let filled = (quantity.abs() - remaining).with_sign_of(quantity);
        OrderResult {
            transaction_id: Some(tx),
            status: OrderStatus::Filled,
            position_id: last,
            requested: quantity,
            filled,
            price: Some(price),
            realized_profit: realized,
            error: None,
            inner_results: Vec::new(),
        }
    }

    fn close_whole(&mut self, tx: TransactionId, id: PositionId, price: P, flags: OrderFlags) -> OrderResult<P> {
        let requested = self.open.get(&id).map_or(P::zero(), |p| -p.quantity);
        self.reduce_targets(tx, &[id], requested, flags, price)
    }

    fn liquidate(&mut self, tx: TransactionId, flags: OrderFlags) -> Vec<OrderResult<P>> {
        let ids: Vec<PositionId> = self.open.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| {
                let pos = self.open.get(&id)?;
                let price = self.mark(&pos.symbol).unwrap_or(pos.entry_price);
                Some(self.close_whole(tx, id, price, flags))
            })
            .collect()
    }

    // ─── Position primitives (one journal entry each) ────────────────

    fn new_transaction(&mut self) -> TransactionId {
        let tx = TransactionId(self.next_transaction);
        self.next_transaction += 1;
        tx
    }

    fn open_new(&mut self, tx: TransactionId, symbol: &str, quantity: P, price: P, flags: OrderFlags) -> PositionId {
        let id = PositionId(self.next_position);
        self.next_position += 1;
        let mut pos = Position {
            id,
            symbol: symbol.to_string(),
            quantity,
            entry_price: price,
            realized_profit: P::zero(),
            stop_loss: None,
            take_profit: None,
            opened_at: self.clock,
            closed_at: None,
            state: PositionState::Opening,
        };
        self.journal.append(JournalEntry {
            transaction_id: tx,
            time: self.clock,
            entry_type: EntryType::Open,
            flags,
            symbol: symbol.to_string(),
            position_id: Some(id),
            quantity_change: quantity,
            price: Some(price),
            realized_profit: None,
        });
        pos.state = PositionState::Open;
        self.open.insert(id, pos);
        id
    }

    /// Same-sign growth with a re-averaged entry price.
    fn increase(&mut self, tx: TransactionId, id: PositionId, delta: P, price: P, flags: OrderFlags) {
        let Some(pos) = self.open.get_mut(&id) else {
            unreachable!("increase on unknown position {id}");
        };
        pos.state = PositionState::Resizing;
        let held = pos.quantity.abs();
        let added = delta.abs();
        pos.entry_price = (pos.entry_price * held + price * added) / (held + added);
        pos.quantity += delta;
        pos.state = PositionState::Open;
        let symbol = pos.symbol.clone();
        self.journal.append(JournalEntry {
            transaction_id: tx,
            time: self.clock,
            entry_type: EntryType::Modify,
            flags,
            symbol,
            position_id: Some(id),
            quantity_change: delta,
            price: Some(price),
            realized_profit: None,
        });
    }

    /// Reduce by the unsigned `delta`, booking profit before the quantity moves.
    /// Reaching zero closes the position.
    fn reduce(&mut self, tx: TransactionId, id: PositionId, delta: P, price: P, flags: OrderFlags) -> P {
        let Some(pos) = self.open.get_mut(&id) else {
            unreachable!("reduce on unknown position {id}");
        };
        let profit = pos.profit_on_reduce(delta, price);
        pos.realized_profit += profit;
        self.balance += profit;

        let change = if pos.is_long() { -delta } else { delta };
        let closing = delta >= pos.quantity.abs();
        pos.state = if closing {
            PositionState::Closing
        } else {
            PositionState::Resizing
        };
        let change = if closing { -pos.quantity } else { change };
        pos.quantity += change;
        let symbol = pos.symbol.clone();

        self.journal.append(JournalEntry {
            transaction_id: tx,
            time: self.clock,
            entry_type: if closing { EntryType::Close } else { EntryType::Modify },
            flags,
            symbol,
            position_id: Some(id),
            quantity_change: change,
            price: Some(price),
            realized_profit: Some(profit),
        });

        if closing {
            if let Some(mut pos) = self.open.remove(&id) {
                pos.quantity = P::zero();
                pos.state = PositionState::Closed;
                pos.closed_at = Some(self.clock);
                self.closed.push(pos);
            }
        } else if let Some(pos) = self.open.get_mut(&id) {
            pos.state = PositionState::Open;
        }
        profit
    }
}
