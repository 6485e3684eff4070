//! Bots: strategy instances driven once per bar.
//!
//! A bot never owns data. At setup its [`BotBlueprint`] declares the inputs it
//! reads; the aggregator turns those declarations into arena windows and the
//! blueprint builds the bot from the resulting handles. During the run the bot
//! reads windows through `&WindowArena` and trades through its own account.

pub mod builtin;
pub mod indicators;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::SimulatedAccount;
use crate::domain::Precision;
use crate::input::{InputDecl, MarketRef};
use crate::window::{WindowArena, WindowError, WindowHandle};

pub use builtin::{Breakout, HoldLong, SmaCross};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BotError {
    #[error("{kind} expects {expected} input handles, got {got}")]
    InputCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid {kind} parameters: {reason}")]
    InvalidParams { kind: &'static str, reason: String },

    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Everything a bot sees for one bar.
pub struct BarContext<'a, P> {
    /// Open time of the batch bar just completed.
    pub time: DateTime<Utc>,
    pub market: &'a MarketRef,
    pub arena: &'a WindowArena<P>,
    pub account: &'a mut SimulatedAccount<P>,
}

pub trait Bot<P>: Send {
    fn kind(&self) -> &'static str;

    fn on_bar(&mut self, ctx: &mut BarContext<'_, P>) -> Result<(), BotError>;
}

/// Declares a bot's inputs and builds it once handles exist.
pub trait BotBlueprint<P>: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Inputs in the order `build` expects their handles.
    fn inputs(&self) -> Vec<InputDecl>;

    fn validate(&self) -> Result<(), BotError>;

    fn build(&self, handles: &[WindowHandle]) -> Result<Box<dyn Bot<P>>, BotError>;
}

/// Registry of built-in bots, selected by the `type` tag in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotParams {
    /// Go long when the fast SMA of closes crosses above the slow one and
    /// short when it crosses below.
    SmaCross { fast: usize, slow: usize, quantity: f64 },
    /// Buy a close above the highest high of the previous `lookback` bars,
    /// protected by percentage stop-loss and take-profit.
    Breakout {
        lookback: usize,
        quantity: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    },
    /// Buy once and hold.
    HoldLong { quantity: f64 },
}

impl BotParams {
    pub fn kind(&self) -> &'static str {
        match self {
            BotParams::SmaCross { .. } => "sma_cross",
            BotParams::Breakout { .. } => "breakout",
            BotParams::HoldLong { .. } => "hold_long",
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> BotError {
        BotError::InvalidParams {
            kind: self.kind(),
            reason: reason.into(),
        }
    }

    fn quantity<P: Precision>(&self, value: f64) -> Result<P, BotError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(self.invalid(format!("quantity must be positive, got {value}")));
        }
        P::from_f64(value).ok_or_else(|| self.invalid(format!("quantity {value} is not representable")))
    }

    fn fraction<P: Precision>(&self, name: &str, value: f64) -> Result<P, BotError> {
        if !(value > 0.0 && value < 1.0) {
            return Err(self.invalid(format!("{name} must be in (0, 1), got {value}")));
        }
        P::from_f64(value).ok_or_else(|| self.invalid(format!("{name} {value} is not representable")))
    }

    fn expect_handles(&self, handles: &[WindowHandle], expected: usize) -> Result<(), BotError> {
        if handles.len() != expected {
            return Err(BotError::InputCount {
                kind: self.kind(),
                expected,
                got: handles.len(),
            });
        }
        Ok(())
    }
}

impl<P: Precision> BotBlueprint<P> for BotParams {
    fn kind(&self) -> &'static str {
        BotParams::kind(self)
    }

    fn inputs(&self) -> Vec<InputDecl> {
        use crate::input::FieldKind;
        match *self {
            BotParams::SmaCross { slow, .. } => vec![InputDecl::own(FieldKind::Close, slow)],
            BotParams::Breakout { lookback, .. } => vec![InputDecl::own(FieldKind::Ohlcv, lookback.saturating_add(1))],
            BotParams::HoldLong { .. } => vec![InputDecl::own(FieldKind::Close, 1)],
        }
    }

    fn validate(&self) -> Result<(), BotError> {
        match *self {
            BotParams::SmaCross { fast, slow, quantity } => {
                if fast == 0 || fast >= slow {
                    return Err(self.invalid(format!("need 0 < fast < slow, got fast={fast} slow={slow}")));
                }
                self.quantity::<P>(quantity).map(|_| ())
            }
            BotParams::Breakout {
                lookback,
                quantity,
                stop_loss_pct,
                take_profit_pct,
            } => {
                if lookback == 0 {
                    return Err(self.invalid("lookback must be at least 1"));
                }
                if i32::try_from(lookback).is_err() {
                    return Err(self.invalid(format!("lookback {lookback} is too large")));
                }
                self.quantity::<P>(quantity)?;
                self.fraction::<P>("stop_loss_pct", stop_loss_pct)?;
                self.fraction::<P>("take_profit_pct", take_profit_pct).map(|_| ())
            }
            BotParams::HoldLong { quantity } => self.quantity::<P>(quantity).map(|_| ()),
        }
    }

    fn build(&self, handles: &[WindowHandle]) -> Result<Box<dyn Bot<P>>, BotError> {
        BotBlueprint::<P>::validate(self)?;
        self.expect_handles(handles, 1)?;
        let handle = handles[0];
        let bot: Box<dyn Bot<P>> = match *self {
            BotParams::SmaCross { fast, slow, quantity } => {
                Box::new(SmaCross::new(handle, fast, slow, self.quantity(quantity)?))
            }
            BotParams::Breakout {
                lookback,
                quantity,
                stop_loss_pct,
                take_profit_pct,
            } => Box::new(Breakout::new(
                handle,
                lookback,
                self.quantity(quantity)?,
                self.fraction("stop_loss_pct", stop_loss_pct)?,
                self.fraction("take_profit_pct", take_profit_pct)?,
            )),
            BotParams::HoldLong { quantity } => Box::new(HoldLong::new(handle, self.quantity(quantity)?)),
        };
        Ok(bot)
    }
}

/// One strategy instance of a batch: a named bot on its own market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub market: MarketRef,
    pub params: BotParams,
}

impl InstanceSpec {
    pub fn new(name: impl Into<String>, market: MarketRef, params: BotParams) -> Self {
        Self {
            name: name.into(),
            market,
            params,
        }
    }
}
