//! Game Events
//!
//! Events emitted by the engine during an update, in the order they
//! occurred. The gateway consumes them to drive broadcasts; most events go
//! to every connected client, a few are addressed to one player.

use serde::{Deserialize, Serialize};

use crate::game::autobet::{AutobetState, StopReason};
use crate::game::state::{PlayerId, RoundId, RoundRecord, RoundSnapshot};

/// A single simulation event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// The round entered a new phase.
    PhaseChanged {
        /// Round snapshot taken right after the transition.
        snapshot: RoundSnapshot,
    },

    /// Throttled multiplier sample during flight.
    MultiplierUpdate {
        /// Round being flown.
        round_id: RoundId,
        /// Current public multiplier.
        multiplier: f64,
    },

    /// A stake was accepted and debited.
    BetPlaced {
        /// Betting player.
        player_id: PlayerId,
        /// Stake amount.
        amount: f64,
        /// Balance after the debit.
        balance: f64,
        /// Placed by the autobet sweep rather than a direct request.
        auto: bool,
    },

    /// A bet was resolved by a cash-out.
    CashedOut {
        /// Cashing-out player.
        player_id: PlayerId,
        /// Multiplier locked in.
        multiplier: f64,
        /// Amount credited.
        payout: f64,
        /// Balance after the credit.
        balance: f64,
        /// Triggered by the auto cash-out sweep.
        auto: bool,
    },

    /// An open bet was forfeited at the crash.
    BetLost {
        /// Losing player.
        player_id: PlayerId,
        /// Forfeited stake.
        amount: f64,
        /// Balance after settlement (unchanged; the stake was debited at
        /// placement).
        balance: f64,
    },

    /// The multiplier crossed the hidden target.
    RoundCrashed {
        /// Crashed round.
        round_id: RoundId,
        /// Final multiplier.
        crash_point: f64,
        /// Fairness nonce the round was drawn with.
        nonce: u64,
    },

    /// A finished round was appended to history.
    RoundRecorded {
        /// The history record.
        record: RoundRecord,
    },

    /// An autobet configuration stopped placing bets.
    AutobetStopped {
        /// Owning player.
        player_id: PlayerId,
        /// Why it stopped.
        reason: StopReason,
        /// Final strategy state, for the player's session summary.
        state: AutobetState,
    },
}

impl GameEvent {
    /// Create a phase change event.
    pub fn phase_changed(snapshot: RoundSnapshot) -> Self {
        Self::PhaseChanged { snapshot }
    }

    /// Create a multiplier update event.
    pub fn multiplier_update(round_id: RoundId, multiplier: f64) -> Self {
        Self::MultiplierUpdate {
            round_id,
            multiplier,
        }
    }

    /// Create a bet placed event.
    pub fn bet_placed(player_id: PlayerId, amount: f64, balance: f64, auto: bool) -> Self {
        Self::BetPlaced {
            player_id,
            amount,
            balance,
            auto,
        }
    }

    /// Create a cash-out event.
    pub fn cashed_out(
        player_id: PlayerId,
        multiplier: f64,
        payout: f64,
        balance: f64,
        auto: bool,
    ) -> Self {
        Self::CashedOut {
            player_id,
            multiplier,
            payout,
            balance,
            auto,
        }
    }

    /// Create a bet lost event.
    pub fn bet_lost(player_id: PlayerId, amount: f64, balance: f64) -> Self {
        Self::BetLost {
            player_id,
            amount,
            balance,
        }
    }

    /// Create a round crashed event.
    pub fn round_crashed(round_id: RoundId, crash_point: f64, nonce: u64) -> Self {
        Self::RoundCrashed {
            round_id,
            crash_point,
            nonce,
        }
    }

    /// Create a round recorded event.
    pub fn round_recorded(record: RoundRecord) -> Self {
        Self::RoundRecorded { record }
    }

    /// Create an autobet stopped event.
    pub fn autobet_stopped(player_id: PlayerId, reason: StopReason, state: AutobetState) -> Self {
        Self::AutobetStopped {
            player_id,
            reason,
            state,
        }
    }

    /// The single player this event is addressed to, if it is not a
    /// table-wide broadcast.
    pub fn private_recipient(&self) -> Option<PlayerId> {
        match self {
            Self::AutobetStopped { player_id, .. } => Some(*player_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_vs_private_routing() {
        let id = PlayerId::new([3; 16]);

        let public = GameEvent::bet_placed(id, 1.0, 9.0, false);
        assert_eq!(public.private_recipient(), None);

        let private = GameEvent::autobet_stopped(
            id,
            StopReason::ConditionsMet,
            crate::game::autobet::Autobet::new(Default::default()).state,
        );
        assert_eq!(private.private_recipient(), Some(id));
    }
}
