//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Messages
//! are JSON with a `type` tag; player ids travel as UUID strings.

use serde::{Deserialize, Serialize};

use crate::game::autobet::{AutobetSettings, AutobetState, StopReason};
use crate::game::engine::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{RoundId, RoundRecord, RoundSnapshot};

/// Most finished rounds a history response will carry, regardless of the
/// requested limit.
pub const HISTORY_RESPONSE_CAP: usize = 50;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the table. A known id resumes the existing ledger entry.
    Join {
        /// UUID string from a previous session, if reconnecting.
        player_id: Option<String>,
    },

    /// Place a stake for the current round.
    PlaceBet { amount: f64 },

    /// Cash out the open bet at the current multiplier.
    CashOut,

    /// Enable autobet with the given settings.
    StartAutobet { settings: AutobetSettings },

    /// Disable autobet.
    StopAutobet,

    /// Request recent round history.
    RequestHistory {
        /// Rounds wanted; capped at [`HISTORY_RESPONSE_CAP`].
        limit: Option<usize>,
    },

    /// Recompute a disclosed round and check a claimed crash point.
    VerifyFairness {
        /// Hex-encoded server seed.
        seed: String,
        /// Round nonce.
        nonce: u64,
        /// Claimed crash point.
        crash_point: f64,
    },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join succeeded.
    Welcome {
        /// Assigned or resumed player id.
        player_id: String,
        /// Current balance.
        balance: f64,
        /// Current round snapshot.
        snapshot: RoundSnapshot,
        /// Server version.
        server_version: String,
    },

    /// Round snapshot, sent on every phase transition.
    GameState { snapshot: RoundSnapshot },

    /// Throttled multiplier sample during flight.
    MultiplierUpdate { round_id: RoundId, multiplier: f64 },

    /// Someone placed a bet (fans out to everyone).
    BetPlaced {
        player_id: String,
        amount: f64,
        auto: bool,
    },

    /// Your bet was accepted (acting player only).
    BetConfirmed { amount: f64, balance: f64 },

    /// Someone cashed out (fans out to everyone).
    PlayerCashedOut {
        player_id: String,
        multiplier: f64,
        payout: f64,
        auto: bool,
    },

    /// Your cash-out settled (acting player only).
    CashOutConfirmed {
        multiplier: f64,
        payout: f64,
        balance: f64,
    },

    /// Someone's open bet was forfeited at the crash.
    BetLost { player_id: String, amount: f64 },

    /// The round crashed.
    GameCrashed {
        round_id: RoundId,
        crash_point: f64,
        /// Fairness nonce the round was drawn with.
        nonce: u64,
    },

    /// Recent round history, newest first.
    GameHistory { rounds: Vec<RoundRecord> },

    /// Autobet is now running (acting player only).
    AutobetStarted,

    /// Autobet stopped placing bets.
    AutobetStopped {
        reason: StopReason,
        /// Final strategy state for the session summary.
        state: AutobetState,
    },

    /// Result of a fairness verification request.
    FairnessResult {
        nonce: u64,
        crash_point: f64,
        valid: bool,
    },

    /// Connected player count changed.
    PlayersOnline { count: u32 },

    /// A request was rejected.
    Error { code: ErrorCode, message: String },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The player is not connected to the table.
    UnknownPlayer,
    /// The action is not allowed in the current phase.
    WrongPhase,
    /// The amount is not a positive finite number.
    InvalidAmount,
    /// The stake exceeds the balance.
    InsufficientBalance,
    /// A bet was already placed this round.
    DuplicateBet,
    /// No bet to cash out.
    NoActiveBet,
    /// The bet was already cashed out.
    AlreadyCashedOut,
    /// A request arrived before `join`.
    NotJoined,
    /// The message could not be parsed.
    BadMessage,
    /// The fairness seed was not 32 hex-encoded bytes.
    BadSeed,
    /// The table is at its connection limit.
    ServerFull,
    /// Internal error.
    InternalError,
}

impl From<ActionError> for ErrorCode {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::UnknownPlayer => Self::UnknownPlayer,
            ActionError::WrongPhase => Self::WrongPhase,
            ActionError::InvalidAmount => Self::InvalidAmount,
            ActionError::InsufficientBalance => Self::InsufficientBalance,
            ActionError::DuplicateBet => Self::DuplicateBet,
            ActionError::NoActiveBet => Self::NoActiveBet,
            ActionError::AlreadyCashedOut => Self::AlreadyCashedOut,
        }
    }
}

impl ServerMessage {
    /// Rejection carrying the engine's reason code and message.
    pub fn rejection(err: ActionError) -> Self {
        Self::Error {
            code: err.into(),
            message: err.to_string(),
        }
    }

    /// Error with an explicit code and message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Translate an engine event into its wire form.
    ///
    /// `RoundRecorded` has no wire form; history travels on request.
    pub fn from_event(event: &GameEvent) -> Option<Self> {
        match event {
            GameEvent::PhaseChanged { snapshot } => Some(Self::GameState {
                snapshot: snapshot.clone(),
            }),
            GameEvent::MultiplierUpdate {
                round_id,
                multiplier,
            } => Some(Self::MultiplierUpdate {
                round_id: *round_id,
                multiplier: *multiplier,
            }),
            GameEvent::BetPlaced {
                player_id,
                amount,
                auto,
                ..
            } => Some(Self::BetPlaced {
                player_id: player_id.to_uuid_string(),
                amount: *amount,
                auto: *auto,
            }),
            GameEvent::CashedOut {
                player_id,
                multiplier,
                payout,
                auto,
                ..
            } => Some(Self::PlayerCashedOut {
                player_id: player_id.to_uuid_string(),
                multiplier: *multiplier,
                payout: *payout,
                auto: *auto,
            }),
            GameEvent::BetLost {
                player_id, amount, ..
            } => Some(Self::BetLost {
                player_id: player_id.to_uuid_string(),
                amount: *amount,
            }),
            GameEvent::RoundCrashed {
                round_id,
                crash_point,
                nonce,
            } => Some(Self::GameCrashed {
                round_id: *round_id,
                crash_point: *crash_point,
                nonce: *nonce,
            }),
            GameEvent::RoundRecorded { .. } => None,
            GameEvent::AutobetStopped { reason, state, .. } => Some(Self::AutobetStopped {
                reason: *reason,
                state: state.clone(),
            }),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
