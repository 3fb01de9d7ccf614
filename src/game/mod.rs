//! Game Logic Module
//!
//! The authoritative crash game simulation. Deterministic given a seed and
//! a sequence of timestamps and player actions.
//!
//! ## Module Structure
//!
//! - `state`: Round state, player ledger, history
//! - `autobet`: Bet sizing strategies and stop conditions
//! - `engine`: Time-injected round state machine and action handlers
//! - `events`: Events emitted per update, consumed by the gateway

pub mod autobet;
pub mod engine;
pub mod events;
pub mod state;

// Re-export key types
pub use autobet::{Autobet, AutobetSettings, BetOutcome, StopReason, Strategy};
pub use engine::{ActionError, CrashEngine, EngineConfig};
pub use events::GameEvent;
pub use state::{Bet, GameState, Phase, Player, PlayerId, RoundId, RoundRecord, RoundSnapshot};
