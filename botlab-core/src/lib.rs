//! botlab core: the engine that steps many simulated bots through history.
//!
//! This crate contains:
//! - Domain types (bars, timeframes, ids) and the `Precision` number trait
//! - Sliding input windows and the arena that owns them
//! - Input identities and the aggregator that deduplicates windows
//! - Chunk planning and the prefetching range loader
//! - Simulated accounts, positions and the journal
//! - The bot trait and the built-in bot registry

pub mod account;
pub mod bot;
pub mod data;
pub mod domain;
pub mod input;
pub mod journal;
pub mod loader;
pub mod window;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    /// Compile-time check: everything the preload thread or a scheduler may
    /// move across threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar<f64>>();
        require_sync::<domain::Bar<Decimal>>();
        require_send::<domain::Observation<domain::Bar<Decimal>>>();
        require_sync::<domain::TimeFrame>();

        // Windows
        require_send::<window::WindowArena<f64>>();
        require_sync::<window::WindowArena<Decimal>>();

        // Loader
        require_send::<loader::RangeLoader<f64>>();
        require_send::<loader::PreloadHandle<Decimal>>();
        require_send::<loader::ChunkPlan>();
        require_sync::<loader::ChunkPlan>();

        // Accounts
        require_send::<account::SimulatedAccount<f64>>();
        require_sync::<account::SimulatedAccount<Decimal>>();
        require_send::<journal::Journal<Decimal>>();
        require_sync::<journal::Journal<f64>>();

        // Bots
        require_send::<Box<dyn bot::Bot<f64>>>();
        require_send::<bot::BotParams>();
        require_sync::<bot::BotParams>();
        require_send::<data::MemoryResolver<Decimal>>();
        require_sync::<data::MemoryResolver<f64>>();
    }

    /// Bots receive the arena by shared reference only; the loader is the
    /// single writer.
    #[test]
    fn bots_read_windows_through_shared_arena() {
        fn _check(bot: &mut dyn bot::Bot<f64>, ctx: &mut bot::BarContext<'_, f64>) -> Result<(), bot::BotError> {
            let _: &window::WindowArena<f64> = ctx.arena;
            bot.on_bar(ctx)
        }
    }
}
