//! # STELLARUSH Game Server
//!
//! Server-authoritative engine for a real-time multiplayer crash game:
//! a multiplier climbs on a fixed tick, players cash out before a hidden,
//! provably fair crash point is reached, and everything left on the table
//! at the crash is settled as a loss.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    STELLARUSH SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fair.rs     - Provably fair crash point generator       │
//! │  └── curve.rs    - Elapsed-time -> multiplier growth curve   │
//! │                                                              │
//! │  game/           - Game logic (transport-free)               │
//! │  ├── state.rs    - Round, player and history state           │
//! │  ├── autobet.rs  - Bet strategy evaluation and stop rules    │
//! │  ├── engine.rs   - Round lifecycle state machine + ledger    │
//! │  └── events.rs   - Events emitted toward the gateway         │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket gateway + tick driver           │
//! │  └── protocol.rs - Wire message types                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! Crash points are a pure function of a secret per-process seed and a
//! strictly increasing nonce, combined through HMAC-SHA256. Once the seed
//! is disclosed, any round can be re-derived and audited with
//! [`core::fair::CrashPointGenerator::verify`]. The drawn crash point never
//! leaves the engine before the round has crashed.
//!
//! The `game/` module never reads the clock; every entry point takes the
//! current time in milliseconds, so round behavior is reproducible from a
//! recorded timeline.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::curve::{multiplier_at, GROWTH_BASE};
pub use crate::core::fair::CrashPointGenerator;
pub use crate::game::engine::{ActionError, CrashEngine, EngineConfig};
pub use crate::game::state::{GameState, Phase, Player, PlayerId, RoundRecord};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine tick interval (milliseconds)
pub const TICK_INTERVAL_MS: u64 = 50;

/// Duration of the waiting phase (milliseconds)
pub const WAITING_TIME_MS: u64 = 3_000;

/// Duration of the betting phase (milliseconds)
pub const BETTING_TIME_MS: u64 = 5_000;

/// Pause after a crash before the next round opens (milliseconds)
pub const CRASH_PAUSE_MS: u64 = 3_000;

/// Minimum interval between multiplier broadcasts (milliseconds)
pub const BROADCAST_INTERVAL_MS: u64 = 100;

/// Number of finished rounds retained in history
pub const HISTORY_CAP: usize = 100;
