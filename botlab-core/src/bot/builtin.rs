//! Built-in bots.

use crate::account::{Direction, OrderFlags};
use crate::domain::Precision;
use crate::window::WindowHandle;

use super::indicators::{highest, sma};
use super::{BarContext, Bot, BotError};

// ─── SmaCross ────────────────────────────────────────────────────────

/// Holds `+quantity` while the fast SMA is above the slow one and
/// `-quantity` while it is below. Trades only on a cross.
pub struct SmaCross<P> {
    closes: WindowHandle,
    fast: usize,
    slow: usize,
    quantity: P,
    fast_above: Option<bool>,
}

impl<P: Precision> SmaCross<P> {
    pub fn new(closes: WindowHandle, fast: usize, slow: usize, quantity: P) -> Self {
        Self {
            closes,
            fast,
            slow,
            quantity,
            fast_above: None,
        }
    }
}

impl<P: Precision> Bot<P> for SmaCross<P> {
    fn kind(&self) -> &'static str {
        "sma_cross"
    }

    fn on_bar(&mut self, ctx: &mut BarContext<'_, P>) -> Result<(), BotError> {
        let Some(window) = ctx.arena.values(self.closes) else {
            return Ok(());
        };
        if window.len() < self.slow || window.latest_is_filler() {
            return Ok(());
        }
        let (Some(fast), Some(slow)) = (sma(window.tail(self.fast)), sma(window.tail(self.slow))) else {
            return Ok(());
        };
        if fast == slow {
            return Ok(());
        }
        let above = fast > slow;
        let crossed = self.fast_above.is_some_and(|prev| prev != above);
        self.fast_above = Some(above);
        if !crossed {
            return Ok(());
        }

        let symbol = ctx.market.symbol.as_str();
        let target = if above { self.quantity } else { -self.quantity };
        let delta = target - ctx.account.net_quantity(symbol);
        if !delta.is_zero() {
            ctx.account.execute_market_order(
                symbol,
                Direction::Unspecified,
                delta,
                OrderFlags::OPEN | OrderFlags::ALLOW_CLOSE_AND_OPEN_AT_ONCE,
                None,
            );
        }
        Ok(())
    }
}

// ─── Breakout ────────────────────────────────────────────────────────

/// Buys when the close clears the highest high of the previous `lookback`
/// bars; exits only through its stop-loss and take-profit.
pub struct Breakout<P> {
    bars: WindowHandle,
    lookback: usize,
    quantity: P,
    stop_loss_pct: P,
    take_profit_pct: P,
}

impl<P: Precision> Breakout<P> {
    pub fn new(bars: WindowHandle, lookback: usize, quantity: P, stop_loss_pct: P, take_profit_pct: P) -> Self {
        Self {
            bars,
            lookback,
            quantity,
            stop_loss_pct,
            take_profit_pct,
        }
    }
}

impl<P: Precision> Bot<P> for Breakout<P> {
    fn kind(&self) -> &'static str {
        "breakout"
    }

    fn on_bar(&mut self, ctx: &mut BarContext<'_, P>) -> Result<(), BotError> {
        let Some(window) = ctx.arena.bars(self.bars) else {
            return Ok(());
        };
        let symbol = ctx.market.symbol.as_str();
        if window.len() <= self.lookback || window.latest_is_filler() {
            return Ok(());
        }
        if !ctx.account.net_quantity(symbol).is_zero() {
            return Ok(());
        }
        let (Some(last), Some(bar)) = (window.last_timestamp(), window.latest()) else {
            return Ok(());
        };

        let bars = i32::try_from(self.lookback).map_err(|_| BotError::InvalidParams {
            kind: "breakout",
            reason: format!("lookback {} does not fit a bar count", self.lookback),
        })?;
        let span = window.timeframe().span();
        let prior = window.values(last - span * bars, last - span)?;
        let Some(ceiling) = highest(prior.iter().map(|b| b.high)) else {
            return Ok(());
        };
        if bar.close <= ceiling {
            return Ok(());
        }

        let result = ctx.account.execute_market_order(symbol, Direction::Long, self.quantity, OrderFlags::OPEN, None);
        if result.is_success() {
            let one = P::one();
            let entry = bar.close;
            ctx.account
                .set_stop_loss(symbol, Direction::Long, entry * (one - self.stop_loss_pct), false);
            ctx.account
                .set_take_profit(symbol, Direction::Long, entry * (one + self.take_profit_pct), false);
        }
        Ok(())
    }
}

// ─── HoldLong ────────────────────────────────────────────────────────

/// Buys `quantity` on the first real bar and never trades again.
pub struct HoldLong<P> {
    closes: WindowHandle,
    quantity: P,
    entered: bool,
}

impl<P: Precision> HoldLong<P> {
    pub fn new(closes: WindowHandle, quantity: P) -> Self {
        Self {
            closes,
            quantity,
            entered: false,
        }
    }
}

impl<P: Precision> Bot<P> for HoldLong<P> {
    fn kind(&self) -> &'static str {
        "hold_long"
    }

    fn on_bar(&mut self, ctx: &mut BarContext<'_, P>) -> Result<(), BotError> {
        if self.entered {
            return Ok(());
        }
        let ready = ctx
            .arena
            .values(self.closes)
            .is_some_and(|w| !w.is_empty() && !w.latest_is_filler());
        if !ready {
            return Ok(());
        }
        let result = ctx.account.execute_market_order(
            &ctx.market.symbol,
            Direction::Long,
            self.quantity,
            OrderFlags::OPEN,
            None,
        );
        self.entered = result.is_success();
        Ok(())
    }
}
