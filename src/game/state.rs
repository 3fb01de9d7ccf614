//! Game State Definitions
//!
//! Round, player and history state for the crash game.
//! Players live in a BTreeMap so every per-tick sweep (autobet placement,
//! auto cash-outs, settlement) visits them in a stable order.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::game::autobet::Autobet;
use crate::HISTORY_CAP;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a fresh random identifier for a new connection.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Unique round identifier, minted when a round is constructed.
pub type RoundId = uuid::Uuid;

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Lifecycle phase of the current round.
///
/// `Waiting -> Betting -> Flying -> Crashed -> (Waiting)`. All transitions
/// are time-triggered except `Flying -> Crashed`, which fires on the first
/// multiplier sample at or above the hidden crash point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum Phase {
    /// Idle dwell between rounds.
    #[default]
    Waiting,
    /// Bets are accepted; the crash point has already been drawn.
    Betting,
    /// Multiplier is climbing; cash-outs are accepted.
    Flying,
    /// Round is over; losses settled, next round pending.
    Crashed,
}

// =============================================================================
// BET
// =============================================================================

/// A player's position in the current round. At most one per round.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    /// Stake debited when the bet was placed.
    pub amount: f64,
    /// Multiplier realized at cash-out, if the player cashed out.
    pub multiplier: Option<f64>,
    /// Whether the bet has been resolved by a cash-out.
    pub cashed_out: bool,
    /// Placement timestamp (engine milliseconds).
    pub placed_at_ms: u64,
}

impl Bet {
    /// Create an unresolved bet.
    pub fn new(amount: f64, placed_at_ms: u64) -> Self {
        Self {
            amount,
            multiplier: None,
            cashed_out: false,
            placed_at_ms,
        }
    }

    /// Payout credited at cash-out, if resolved.
    pub fn payout(&self) -> Option<f64> {
        self.multiplier
            .filter(|_| self.cashed_out)
            .map(|m| self.amount * m)
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Per-connection ledger entry: balance, live bet and lifetime stats.
///
/// The balance is the single source of truth for funds. It is mutated only
/// by `place_bet`, `cash_out` and settlement in the engine, and can never
/// go negative because stakes are validated against it first.
#[derive(Clone, Debug)]
pub struct Player {
    /// Stable identifier.
    pub id: PlayerId,
    /// Authoritative balance.
    pub balance: f64,
    /// Bet in the current round, if any.
    pub bet: Option<Bet>,
    /// Autobet configuration, if enabled.
    pub autobet: Option<Autobet>,
    /// Lifetime amount wagered.
    pub total_wagered: f64,
    /// Lifetime amount won.
    pub total_won: f64,
    /// Lifetime rounds with a bet placed.
    pub games_played: u32,
    /// Highest multiplier ever realized at cash-out.
    pub best_multiplier: f64,
}

impl Player {
    /// Create a player with a balance seeded from the funding collaborator.
    pub fn new(id: PlayerId, balance: f64) -> Self {
        Self {
            id,
            balance,
            bet: None,
            autobet: None,
            total_wagered: 0.0,
            total_won: 0.0,
            games_played: 0,
            best_multiplier: 0.0,
        }
    }

    /// Whether the player holds an unresolved bet this round.
    pub fn has_open_bet(&self) -> bool {
        self.bet.map(|b| !b.cashed_out).unwrap_or(false)
    }
}

// =============================================================================
// ROUND HISTORY
// =============================================================================

/// Immutable record of a finished round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round identifier.
    pub round_id: RoundId,
    /// Multiplier sample that crossed the hidden target.
    pub crash_point: f64,
    /// When the round crashed (engine milliseconds).
    pub timestamp_ms: u64,
    /// Connected players at crash time.
    pub player_count: u32,
    /// Sum of stakes in the round.
    pub total_wagered: f64,
    /// Sum of payouts in the round.
    pub total_won: f64,
    /// Flight duration (milliseconds).
    pub duration_ms: u64,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Snapshot of the current round, broadcast on every phase transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round identifier.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: Phase,
    /// Current public multiplier.
    pub multiplier: f64,
    /// Phase start timestamp (engine milliseconds).
    pub start_time_ms: Option<u64>,
    /// Crash timestamp, once crashed.
    pub end_time_ms: Option<u64>,
    /// Connected players.
    pub player_count: u32,
}

/// Complete mutable state of the one live table.
///
/// Exactly one round exists at a time; a new `GameState` round is stamped
/// out by the engine after the crash pause, carrying players and history
/// forward.
#[derive(Debug)]
pub struct GameState {
    /// Identifier of the current round.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: Phase,
    /// Public multiplier (1.0 outside of flight).
    pub multiplier: f64,
    /// Hidden crash target, drawn at betting entry. Never broadcast
    /// before the crash.
    pub crash_point: Option<f64>,
    /// Start of the current phase / flight (engine milliseconds).
    pub start_time_ms: Option<u64>,
    /// Crash timestamp of this round, once crashed.
    pub end_time_ms: Option<u64>,
    /// Connected players, keyed for ordered iteration.
    pub players: BTreeMap<PlayerId, Player>,
    /// Finished rounds, newest first, capped at [`HISTORY_CAP`].
    pub history: VecDeque<RoundRecord>,
}

impl GameState {
    /// Fresh state with an empty table.
    pub fn new() -> Self {
        Self {
            round_id: uuid::Uuid::new_v4(),
            phase: Phase::Waiting,
            multiplier: 1.0,
            crash_point: None,
            start_time_ms: None,
            end_time_ms: None,
            players: BTreeMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Reset round fields for the next cycle, keeping players and history.
    pub fn begin_next_round(&mut self) {
        self.round_id = uuid::Uuid::new_v4();
        self.phase = Phase::Waiting;
        self.multiplier = 1.0;
        self.crash_point = None;
        self.start_time_ms = None;
        self.end_time_ms = None;
    }

    /// Sum of stakes placed in the current round.
    pub fn round_wagered(&self) -> f64 {
        self.players
            .values()
            .filter_map(|p| p.bet.map(|b| b.amount))
            .sum()
    }

    /// Sum of payouts realized in the current round.
    pub fn round_won(&self) -> f64 {
        self.players
            .values()
            .filter_map(|p| p.bet.and_then(|b| b.payout()))
            .sum()
    }

    /// Append a finished round, newest first, evicting beyond the cap.
    pub fn push_history(&mut self, record: RoundRecord) {
        self.history.push_front(record);
        self.history.truncate(HISTORY_CAP);
    }

    /// Snapshot of the current round for broadcasting.
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round_id,
            phase: self.phase,
            multiplier: self.multiplier,
            start_time_ms: self.start_time_ms,
            end_time_ms: self.end_time_ms,
            player_count: self.players.len() as u32,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
