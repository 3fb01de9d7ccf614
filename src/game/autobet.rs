//! Autobet Strategy Evaluation
//!
//! A player's autobet configuration auto-places a bet at every betting
//! phase entry and auto-cashes out at a configured multiplier. After every
//! settled bet the strategy computes the next stake from the prior outcome
//! and the stop conditions are re-checked.

use serde::{Deserialize, Serialize};

/// Bet sizing strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Always the configured base amount.
    Fixed,
    /// Multiply the stake after a loss, reset/hold after a win.
    Martingale,
    /// Multiply the stake after a win, reset/hold after a loss.
    ReverseMartingale,
    /// Walk a Fibonacci sequence: forward on loss, back on win.
    Fibonacci,
}

/// Outcome of a settled bet, as seen by the strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BetOutcome {
    /// The player cashed out before the crash.
    Won,
    /// The stake was forfeited at the crash.
    Lost,
}

/// Player-supplied autobet configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutobetSettings {
    /// Sizing strategy.
    pub strategy: Strategy,
    /// Base stake.
    pub bet_amount: f64,
    /// Multiplier at which the bet is cashed out automatically.
    pub auto_cash_out: f64,
    /// Stake multiplier applied by the martingale strategies.
    pub martingale_multiplier: f64,
    /// Lower stake clamp.
    pub min_bet_amount: f64,
    /// Upper stake clamp.
    pub max_bet_amount: f64,
    /// Return to the base stake after a favorable outcome
    /// (win for martingale, loss for reverse-martingale);
    /// otherwise hold the current stake.
    pub reset_to_base: bool,
    /// Stop after this many bets (0 = unlimited).
    pub number_of_bets: u32,
    /// Stop once cumulative profit reaches `stop_win_amount`.
    pub stop_on_win: bool,
    /// Profit threshold for `stop_on_win`.
    pub stop_win_amount: f64,
    /// Stop once cumulative profit falls to `-stop_loss_amount`.
    pub stop_on_loss: bool,
    /// Loss threshold for `stop_on_loss`.
    pub stop_loss_amount: f64,
}

impl Default for AutobetSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fixed,
            bet_amount: 0.1,
            auto_cash_out: 2.0,
            martingale_multiplier: 2.0,
            min_bet_amount: 0.01,
            max_bet_amount: 10.0,
            reset_to_base: true,
            number_of_bets: 0,
            stop_on_win: false,
            stop_win_amount: 0.0,
            stop_on_loss: false,
            stop_loss_amount: 0.0,
        }
    }
}

/// Mutable strategy state, updated after every settled bet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutobetState {
    /// Stake the next auto-placed bet will use.
    pub current_bet: f64,
    /// Bets placed since the configuration was enabled.
    pub total_bets: u32,
    /// Settled wins.
    pub total_wins: u32,
    /// Settled losses.
    pub total_losses: u32,
    /// Cumulative profit (payouts minus stakes).
    pub profit: f64,
    /// Lazily extended Fibonacci multipliers, seeded `[1, 1]`.
    pub fib_sequence: Vec<f64>,
    /// Cursor into `fib_sequence`.
    pub fib_index: usize,
}

impl AutobetState {
    fn new(settings: &AutobetSettings) -> Self {
        Self {
            current_bet: settings.bet_amount,
            total_bets: 0,
            total_wins: 0,
            total_losses: 0,
            profit: 0.0,
            fib_sequence: vec![1.0, 1.0],
            fib_index: 0,
        }
    }
}

/// Why an autobet configuration stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Player disabled it.
    Manual,
    /// A configured stop condition fired.
    ConditionsMet,
    /// The computed stake exceeded balance or the configured maximum.
    StakeUnaffordable,
}

/// A player's live autobet: settings plus running state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Autobet {
    /// Still placing bets.
    pub enabled: bool,
    /// Configuration as supplied on enable.
    pub settings: AutobetSettings,
    /// Running strategy state.
    pub state: AutobetState,
}

impl Autobet {
    /// Enable autobet with the given settings.
    pub fn new(settings: AutobetSettings) -> Self {
        Self {
            enabled: true,
            state: AutobetState::new(&settings),
            settings,
        }
    }

    /// Record a placed bet.
    pub fn on_bet_placed(&mut self, amount: f64) {
        self.state.total_bets += 1;
        self.state.current_bet = amount;
    }

    /// Record a settled bet and compute the next stake from the outcome.
    ///
    /// `net` is the profit delta: `payout - stake` on a win, `-stake` on a
    /// loss.
    pub fn on_bet_settled(&mut self, outcome: BetOutcome, net: f64) {
        self.state.profit += net;
        match outcome {
            BetOutcome::Won => self.state.total_wins += 1,
            BetOutcome::Lost => self.state.total_losses += 1,
        }
        self.state.current_bet = self.next_bet(outcome);
    }

    /// Evaluate the sizing strategy for the given prior outcome.
    ///
    /// The result is clamped to `[min_bet_amount, max_bet_amount]`.
    fn next_bet(&mut self, outcome: BetOutcome) -> f64 {
        let s = &self.settings;
        let raw = match s.strategy {
            Strategy::Fixed => s.bet_amount,
            Strategy::Martingale => match outcome {
                BetOutcome::Lost => self.state.current_bet * s.martingale_multiplier,
                BetOutcome::Won if s.reset_to_base => s.bet_amount,
                BetOutcome::Won => self.state.current_bet,
            },
            Strategy::ReverseMartingale => match outcome {
                BetOutcome::Won => self.state.current_bet * s.martingale_multiplier,
                BetOutcome::Lost if s.reset_to_base => s.bet_amount,
                BetOutcome::Lost => self.state.current_bet,
            },
            Strategy::Fibonacci => {
                match outcome {
                    BetOutcome::Lost => {
                        self.state.fib_index += 1;
                        while self.state.fib_sequence.len() <= self.state.fib_index {
                            let n = self.state.fib_sequence.len();
                            let next =
                                self.state.fib_sequence[n - 1] + self.state.fib_sequence[n - 2];
                            self.state.fib_sequence.push(next);
                        }
                    }
                    BetOutcome::Won => {
                        self.state.fib_index = self.state.fib_index.saturating_sub(1);
                    }
                }
                s.bet_amount * self.state.fib_sequence[self.state.fib_index]
            }
        };
        raw.clamp(s.min_bet_amount, s.max_bet_amount)
    }

    /// Check the stop conditions against the running totals.
    pub fn should_stop(&self) -> bool {
        let s = &self.settings;

        if s.number_of_bets > 0 && self.state.total_bets >= s.number_of_bets {
            return true;
        }
        if s.stop_on_win && self.state.profit >= s.stop_win_amount {
            return true;
        }
        if s.stop_on_loss && self.state.profit <= -s.stop_loss_amount {
            return true;
        }
        false
    }
}
