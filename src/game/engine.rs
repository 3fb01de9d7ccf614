//! Authoritative Round State Machine
//!
//! The engine owns the round lifecycle, the player ledger and the fairness
//! generator. It never reads the clock or the network: callers feed it
//! timestamps through [`CrashEngine::update`] and player actions through
//! the phase-gated handlers, and it answers with events. Feeding the same
//! seed, timestamps and actions replays the same rounds.

use crate::core::curve::{multiplier_at, GROWTH_BASE};
use crate::core::fair::CrashPointGenerator;
use crate::game::autobet::{Autobet, AutobetSettings, AutobetState, BetOutcome, StopReason};
use crate::game::events::GameEvent;
use crate::game::state::{
    Bet, GameState, Phase, Player, PlayerId, RoundRecord, RoundSnapshot,
};
use crate::{
    BETTING_TIME_MS, BROADCAST_INTERVAL_MS, CRASH_PAUSE_MS, TICK_INTERVAL_MS, WAITING_TIME_MS,
};

/// Engine timing and table parameters.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Interval the driver is expected to call `update` at.
    pub tick_interval_ms: u64,
    /// Idle dwell before betting opens.
    pub waiting_time_ms: u64,
    /// How long bets are accepted.
    pub betting_time_ms: u64,
    /// Dwell on the crash screen before the next round.
    pub crash_pause_ms: u64,
    /// Minimum spacing between multiplier update events.
    pub broadcast_interval_ms: u64,
    /// Per-millisecond multiplier growth base.
    pub growth_base: f64,
    /// Balance credited to a newly connected player.
    pub initial_balance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            waiting_time_ms: WAITING_TIME_MS,
            betting_time_ms: BETTING_TIME_MS,
            crash_pause_ms: CRASH_PAUSE_MS,
            broadcast_interval_ms: BROADCAST_INTERVAL_MS,
            growth_base: GROWTH_BASE,
            initial_balance: 10.0,
        }
    }
}

/// Why a player action was rejected. The state is untouched on rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The player is not connected to the table.
    #[error("Unknown player")]
    UnknownPlayer,
    /// The action is not allowed in the current phase.
    #[error("Action not allowed in the current phase")]
    WrongPhase,
    /// The stake is not a positive finite amount.
    #[error("Invalid bet amount")]
    InvalidAmount,
    /// The stake exceeds the player's balance.
    #[error("Insufficient balance")]
    InsufficientBalance,
    /// The player already has a bet in this round.
    #[error("Bet already placed this round")]
    DuplicateBet,
    /// The player has no bet in this round.
    #[error("No active bet")]
    NoActiveBet,
    /// The player's bet was already cashed out.
    #[error("Bet already cashed out")]
    AlreadyCashedOut,
}

/// What a successful cash-out credited.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CashOutReceipt {
    /// Multiplier locked in.
    pub multiplier: f64,
    /// Amount credited.
    pub payout: f64,
    /// Balance after the credit.
    pub balance: f64,
}

/// The one live crash table.
pub struct CrashEngine {
    config: EngineConfig,
    state: GameState,
    generator: CrashPointGenerator,
    /// Nonce the current round's crash point was drawn with.
    round_nonce: u64,
    /// When the current phase was entered. `None` until the first update.
    phase_since_ms: Option<u64>,
    /// Last multiplier event timestamp, for throttling.
    last_broadcast_ms: u64,
    /// Lifetime rounds completed.
    rounds_completed: u64,
    /// Lifetime sum of stakes across all rounds.
    lifetime_wagered: f64,
    /// Events accumulated since the last `update` drain.
    events: Vec<GameEvent>,
}

impl CrashEngine {
    /// Create an engine around an injected fairness generator.
    pub fn new(config: EngineConfig, generator: CrashPointGenerator) -> Self {
        Self {
            config,
            state: GameState::new(),
            generator,
            round_nonce: 0,
            phase_since_ms: None,
            last_broadcast_ms: 0,
            rounds_completed: 0,
            lifetime_wagered: 0.0,
            events: Vec::new(),
        }
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance the round state machine to `now_ms` and drain events.
    ///
    /// Timestamps must be non-decreasing across calls. One call performs at
    /// most one phase transition; the driver's tick rate bounds transition
    /// latency, not correctness.
    pub fn update(&mut self, now_ms: u64) -> Vec<GameEvent> {
        let since = match self.phase_since_ms {
            Some(t) => t,
            None => {
                // First update ever: announce the boot round's waiting
                // phase so the event stream starts with a snapshot.
                self.phase_since_ms = Some(now_ms);
                self.events
                    .push(GameEvent::phase_changed(self.state.snapshot()));
                now_ms
            }
        };

        match self.state.phase {
            Phase::Waiting => {
                if now_ms.saturating_sub(since) >= self.config.waiting_time_ms {
                    self.enter_betting(now_ms);
                }
            }
            Phase::Betting => {
                if now_ms.saturating_sub(since) >= self.config.betting_time_ms {
                    self.enter_flying(now_ms);
                }
            }
            Phase::Flying => {
                self.tick_flight(now_ms);
            }
            Phase::Crashed => {
                if now_ms.saturating_sub(since) >= self.config.crash_pause_ms {
                    self.enter_next_round(now_ms);
                }
            }
        }

        std::mem::take(&mut self.events)
    }

    /// Open betting: draw the hidden crash point and run the autobet
    /// placement sweep.
    fn enter_betting(&mut self, now_ms: u64) {
        self.round_nonce = self.generator.nonce();
        self.state.crash_point = Some(self.generator.next_crash_point());
        self.state.phase = Phase::Betting;
        self.phase_since_ms = Some(now_ms);
        self.events
            .push(GameEvent::phase_changed(self.state.snapshot()));

        self.run_autobet_placement(now_ms);
    }

    /// Start the flight: reset the public multiplier and stamp the start.
    fn enter_flying(&mut self, now_ms: u64) {
        self.state.phase = Phase::Flying;
        self.state.multiplier = 1.0;
        self.state.start_time_ms = Some(now_ms);
        self.phase_since_ms = Some(now_ms);
        self.last_broadcast_ms = now_ms;
        self.events
            .push(GameEvent::phase_changed(self.state.snapshot()));
    }

    /// One flying tick: sample the curve, sweep auto cash-outs, then check
    /// for the crash.
    fn tick_flight(&mut self, now_ms: u64) {
        let start = self.state.start_time_ms.unwrap_or(now_ms);
        let crash_point = self.state.crash_point.unwrap_or(f64::MAX);
        let sampled = multiplier_at(now_ms.saturating_sub(start), self.config.growth_base);
        self.state.multiplier = sampled;

        // Auto cash-outs settle before the crash check, so a player whose
        // threshold is reached on the crash tick itself is still paid.
        self.run_auto_cash_outs(now_ms);

        if sampled >= crash_point {
            // The round crashes at the sample that crossed the hidden
            // target; the sample, not the target, is what gets revealed.
            self.crash(now_ms);
            return;
        }

        if now_ms.saturating_sub(self.last_broadcast_ms) >= self.config.broadcast_interval_ms {
            self.last_broadcast_ms = now_ms;
            self.events.push(GameEvent::multiplier_update(
                self.state.round_id,
                self.state.multiplier,
            ));
        }
    }

    /// Settle the round at the crash multiplier.
    fn crash(&mut self, now_ms: u64) {
        let crash_point = self.state.multiplier;
        self.state.phase = Phase::Crashed;
        self.state.end_time_ms = Some(now_ms);
        self.phase_since_ms = Some(now_ms);

        // Every open bet is forfeited. Stakes were debited at placement,
        // so settlement only records the loss.
        let losers: Vec<PlayerId> = self
            .state
            .players
            .iter()
            .filter(|(_, p)| p.has_open_bet())
            .map(|(id, _)| *id)
            .collect();
        for id in losers {
            if let Some(player) = self.state.players.get_mut(&id) {
                let amount = player.bet.map(|b| b.amount).unwrap_or(0.0);
                let balance = player.balance;
                self.events.push(GameEvent::bet_lost(id, amount, balance));
            }
            self.settle_autobet(id, BetOutcome::Lost);
        }

        let start = self.state.start_time_ms.unwrap_or(now_ms);
        let record = RoundRecord {
            round_id: self.state.round_id,
            crash_point,
            timestamp_ms: now_ms,
            player_count: self.state.players.len() as u32,
            total_wagered: self.state.round_wagered(),
            total_won: self.state.round_won(),
            duration_ms: now_ms.saturating_sub(start),
        };

        self.rounds_completed += 1;
        self.events.push(GameEvent::round_crashed(
            self.state.round_id,
            crash_point,
            self.round_nonce,
        ));
        self.events.push(GameEvent::round_recorded(record.clone()));
        self.state.push_history(record);
        self.events
            .push(GameEvent::phase_changed(self.state.snapshot()));
    }

    /// Leave the crash screen: clear bets and stamp out the next round.
    fn enter_next_round(&mut self, now_ms: u64) {
        for player in self.state.players.values_mut() {
            player.bet = None;
        }
        self.state.begin_next_round();
        self.phase_since_ms = Some(now_ms);
        self.events
            .push(GameEvent::phase_changed(self.state.snapshot()));
    }

    // =========================================================================
    // AUTOBET SWEEPS
    // =========================================================================

    /// Place bets for every enabled autobet at betting entry.
    fn run_autobet_placement(&mut self, now_ms: u64) {
        let ids: Vec<PlayerId> = self.state.players.keys().copied().collect();
        for id in ids {
            let Some(player) = self.state.players.get_mut(&id) else {
                continue;
            };
            let Some(autobet) = player.autobet.as_mut() else {
                continue;
            };
            if !autobet.enabled || player.bet.is_some() {
                continue;
            }

            if autobet.should_stop() {
                self.stop_player_autobet(id, StopReason::ConditionsMet);
                continue;
            }

            let stake = autobet.state.current_bet;
            if !(stake > 0.0) || stake > player.balance {
                self.stop_player_autobet(id, StopReason::StakeUnaffordable);
                continue;
            }

            player.balance -= stake;
            player.bet = Some(Bet::new(stake, now_ms));
            player.total_wagered += stake;
            player.games_played += 1;
            autobet.on_bet_placed(stake);
            self.lifetime_wagered += stake;

            let balance = player.balance;
            self.events
                .push(GameEvent::bet_placed(id, stake, balance, true));
        }
    }

    /// Cash out every open bet whose auto cash-out threshold the current
    /// multiplier has reached, at the current multiplier.
    fn run_auto_cash_outs(&mut self, now_ms: u64) {
        let reached = self.state.multiplier;
        let due: Vec<PlayerId> = self
            .state
            .players
            .iter()
            .filter(|(_, p)| p.has_open_bet())
            .filter(|(_, p)| {
                p.autobet
                    .as_ref()
                    .filter(|a| a.enabled)
                    .map(|a| a.settings.auto_cash_out <= reached)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            // Cannot fail for an open bet, but the sweep must not abort
            // the tick if it does.
            if self.settle_cash_out(id, reached, now_ms, true).is_err() {
                tracing::warn!(player = %id.to_uuid_string(), "auto cash-out sweep skipped a bet");
            }
        }
    }

    /// Record a settled bet with the player's autobet and stop it if a
    /// stop condition fired.
    fn settle_autobet(&mut self, id: PlayerId, outcome: BetOutcome) {
        let Some(player) = self.state.players.get_mut(&id) else {
            return;
        };
        let Some(autobet) = player.autobet.as_mut() else {
            return;
        };
        if !autobet.enabled {
            return;
        }

        let bet = player.bet.unwrap_or(Bet::new(0.0, 0));
        let net = match outcome {
            BetOutcome::Won => bet.payout().unwrap_or(0.0) - bet.amount,
            BetOutcome::Lost => -bet.amount,
        };
        autobet.on_bet_settled(outcome, net);

        if autobet.should_stop() {
            self.stop_player_autobet(id, StopReason::ConditionsMet);
        }
    }

    /// Disable a player's autobet and emit the notification.
    fn stop_player_autobet(&mut self, id: PlayerId, reason: StopReason) {
        if let Some(autobet) = self
            .state
            .players
            .get_mut(&id)
            .and_then(|p| p.autobet.as_mut())
            .filter(|a| a.enabled)
        {
            autobet.enabled = false;
            let state = autobet.state.clone();
            self.events
                .push(GameEvent::autobet_stopped(id, reason, state));
        }
    }

    // =========================================================================
    // PLAYER ACTIONS
    // =========================================================================

    /// Seat a player at the table, crediting the supplied starting
    /// balance. A reconnect with a known id keeps the existing ledger
    /// entry, ignoring the new seed amount.
    pub fn connect_player(&mut self, id: PlayerId, initial_balance: f64) -> &Player {
        self.state
            .players
            .entry(id)
            .or_insert_with(|| Player::new(id, initial_balance))
    }

    /// Remove a player. An open bet is forfeited with its stake.
    pub fn disconnect_player(&mut self, id: PlayerId) -> Option<Player> {
        self.state.players.remove(&id)
    }

    /// Place a stake for the current round. Betting phase only.
    pub fn place_bet(
        &mut self,
        id: PlayerId,
        amount: f64,
        now_ms: u64,
    ) -> Result<f64, ActionError> {
        if self.state.phase != Phase::Betting {
            return Err(ActionError::WrongPhase);
        }
        let player = self
            .state
            .players
            .get_mut(&id)
            .ok_or(ActionError::UnknownPlayer)?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ActionError::InvalidAmount);
        }
        if amount > player.balance {
            return Err(ActionError::InsufficientBalance);
        }
        if player.bet.is_some() {
            return Err(ActionError::DuplicateBet);
        }

        player.balance -= amount;
        player.bet = Some(Bet::new(amount, now_ms));
        player.total_wagered += amount;
        player.games_played += 1;
        self.lifetime_wagered += amount;

        let balance = player.balance;
        self.events
            .push(GameEvent::bet_placed(id, amount, balance, false));
        Ok(balance)
    }

    /// Cash out the player's open bet at the current multiplier. Flying
    /// phase only.
    pub fn cash_out(&mut self, id: PlayerId, now_ms: u64) -> Result<CashOutReceipt, ActionError> {
        if self.state.phase != Phase::Flying {
            return Err(ActionError::WrongPhase);
        }
        let multiplier = self.state.multiplier;
        self.settle_cash_out(id, multiplier, now_ms, false)
    }

    /// Shared cash-out path for the manual action and the auto sweep.
    fn settle_cash_out(
        &mut self,
        id: PlayerId,
        multiplier: f64,
        _now_ms: u64,
        auto: bool,
    ) -> Result<CashOutReceipt, ActionError> {
        let player = self
            .state
            .players
            .get_mut(&id)
            .ok_or(ActionError::UnknownPlayer)?;
        let bet = player.bet.as_mut().ok_or(ActionError::NoActiveBet)?;
        if bet.cashed_out {
            return Err(ActionError::AlreadyCashedOut);
        }

        bet.cashed_out = true;
        bet.multiplier = Some(multiplier);
        let payout = bet.amount * multiplier;

        player.balance += payout;
        player.total_won += payout;
        if multiplier > player.best_multiplier {
            player.best_multiplier = multiplier;
        }

        let receipt = CashOutReceipt {
            multiplier,
            payout,
            balance: player.balance,
        };
        self.events
            .push(GameEvent::cashed_out(id, multiplier, payout, receipt.balance, auto));
        self.settle_autobet(id, BetOutcome::Won);
        Ok(receipt)
    }

    /// Enable autobet for a player. The first bet goes in at the next
    /// betting entry.
    pub fn start_autobet(
        &mut self,
        id: PlayerId,
        settings: AutobetSettings,
    ) -> Result<(), ActionError> {
        let player = self
            .state
            .players
            .get_mut(&id)
            .ok_or(ActionError::UnknownPlayer)?;

        let valid = settings.bet_amount.is_finite()
            && settings.bet_amount > 0.0
            && settings.auto_cash_out.is_finite()
            && settings.auto_cash_out > 1.0
            && settings.martingale_multiplier.is_finite()
            && settings.martingale_multiplier > 1.0
            && settings.min_bet_amount > 0.0
            && settings.min_bet_amount <= settings.max_bet_amount;
        if !valid {
            return Err(ActionError::InvalidAmount);
        }

        player.autobet = Some(Autobet::new(settings));
        Ok(())
    }

    /// Disable a player's autobet, returning its final state if it was
    /// running. The caller answers the player directly, so no event is
    /// emitted; sweep-driven stops go through the event queue instead.
    pub fn stop_autobet(&mut self, id: PlayerId) -> Result<Option<AutobetState>, ActionError> {
        let player = self
            .state
            .players
            .get_mut(&id)
            .ok_or(ActionError::UnknownPlayer)?;
        match player.autobet.as_mut().filter(|a| a.enabled) {
            Some(autobet) => {
                autobet.enabled = false;
                Ok(Some(autobet.state.clone()))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Snapshot of the current round.
    pub fn snapshot(&self) -> RoundSnapshot {
        self.state.snapshot()
    }

    /// The most recent `limit` finished rounds, newest first.
    pub fn history(&self, limit: usize) -> Vec<RoundRecord> {
        self.state.history.iter().take(limit).cloned().collect()
    }

    /// A player's ledger entry.
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.state.players.get(&id)
    }

    /// Connected players.
    pub fn player_count(&self) -> usize {
        self.state.players.len()
    }

    /// Lifetime rounds completed.
    pub fn games_played(&self) -> u64 {
        self.rounds_completed
    }

    /// Lifetime sum of stakes.
    pub fn total_wagered(&self) -> f64 {
        self.lifetime_wagered
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Balance credited to players the gateway seats with default funding.
    pub fn initial_balance(&self) -> f64 {
        self.config.initial_balance
    }

    /// Override the hidden crash target of the current round.
    #[cfg(test)]
    fn force_crash_point(&mut self, crash_point: f64) {
        self.state.crash_point = Some(crash_point);
    }

    /// Hex server seed, for fairness disclosure.
    pub fn seed_hex(&self) -> String {
        self.generator.seed_hex()
    }

    /// Recompute a disclosed round and check a claimed crash point.
    ///
    /// Returns `None` when the seed is not 32 hex-encoded bytes.
    pub fn verify_crash_point(seed_hex: &str, nonce: u64, claimed: f64) -> Option<bool> {
        let bytes = hex::decode(seed_hex).ok()?;
        let seed: [u8; 32] = bytes.try_into().ok()?;
        Some(CrashPointGenerator::verify(&seed, nonce, claimed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::curve::ms_to_multiplier;
    use crate::game::autobet::Strategy;

    const SEED: [u8; 32] = [11u8; 32];

    fn engine() -> CrashEngine {
        CrashEngine::new(EngineConfig::default(), CrashPointGenerator::from_seed(SEED))
    }

    /// Crash point the first round will draw from SEED.
    fn first_crash_point() -> f64 {
        CrashPointGenerator::from_seed(SEED).next_crash_point()
    }

    /// Drive updates from `from` to `to` in tick-sized steps, inclusive.
    fn advance(engine: &mut CrashEngine, from: u64, to: u64) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let mut t = from;
        while t <= to {
            events.extend(engine.update(t));
            t += TICK_INTERVAL_MS;
        }
        events
    }

    /// Run the engine from boot to the betting phase of round one.
    /// Returns the timestamp betting opened at.
    fn open_betting(engine: &mut CrashEngine) -> u64 {
        engine.update(0);
        let open = engine.config.waiting_time_ms;
        engine.update(open);
        assert_eq!(engine.phase(), Phase::Betting);
        open
    }

    /// Advance a betting-phase engine into flight. Returns lift-off time.
    fn lift_off(engine: &mut CrashEngine, betting_open: u64) -> u64 {
        let start = betting_open + engine.config.betting_time_ms;
        engine.update(start);
        assert_eq!(engine.phase(), Phase::Flying);
        start
    }

    #[test]
    fn test_first_update_announces_waiting_phase() {
        let mut engine = engine();
        let events = engine.update(0);
        assert!(matches!(
            events.as_slice(),
            [GameEvent::PhaseChanged { snapshot }] if snapshot.phase == Phase::Waiting
        ));
        // Announced once, not on every idle tick.
        assert!(engine.update(TICK_INTERVAL_MS).is_empty());
    }

    #[test]
    fn test_full_round_lifecycle() {
        let mut engine = engine();
        let crash_point = first_crash_point();

        let open = open_betting(&mut engine);
        let start = lift_off(&mut engine, open);

        let flight = ms_to_multiplier(crash_point, GROWTH_BASE);
        let events = advance(&mut engine, start, start + flight + TICK_INTERVAL_MS);

        assert_eq!(engine.phase(), Phase::Crashed);
        assert_eq!(engine.games_played(), 1);
        // The revealed value is the sample that crossed the hidden target.
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::RoundCrashed { crash_point: cp, nonce: 0, .. } if *cp >= crash_point
        )));

        // After the crash pause, a fresh round is waiting.
        let crashed_at = start + flight + 2 * TICK_INTERVAL_MS;
        let resume = crashed_at + engine.config.crash_pause_ms;
        advance(&mut engine, crashed_at, resume);
        assert_eq!(engine.phase(), Phase::Waiting);
        assert_eq!(engine.history(10).len(), 1);
    }

    #[test]
    fn test_cash_out_before_crash_pays_and_crash_forfeits_open_bets() {
        let mut engine = engine();
        let crash_point = first_crash_point();

        let winner = PlayerId::new([1; 16]);
        let loser = PlayerId::new([2; 16]);
        engine.connect_player(winner, 10.0);
        engine.connect_player(loser, 10.0);

        let open = open_betting(&mut engine);
        engine.place_bet(winner, 1.0, open).unwrap();
        engine.place_bet(loser, 2.0, open).unwrap();
        let start = lift_off(&mut engine, open);

        // Cash the winner out partway to the crash point.
        let target = 1.0 + (crash_point - 1.0) / 2.0;
        let at = start + ms_to_multiplier(target, GROWTH_BASE);
        engine.update(at);
        let receipt = engine.cash_out(winner, at).unwrap();
        assert!(receipt.multiplier >= target && receipt.multiplier <= crash_point);
        assert_eq!(receipt.balance, 9.0 + receipt.payout);

        // Fly to the crash.
        let flight = ms_to_multiplier(crash_point, GROWTH_BASE);
        let events = advance(&mut engine, at, start + flight + TICK_INTERVAL_MS);
        assert_eq!(engine.phase(), Phase::Crashed);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::BetLost { player_id, .. } if *player_id == loser)));

        // The loser's stake stays debited; the winner keeps the payout.
        assert_eq!(engine.player(loser).unwrap().balance, 8.0);
        assert_eq!(engine.player(winner).unwrap().balance, receipt.balance);
        assert_eq!(engine.player(winner).unwrap().best_multiplier, receipt.multiplier);
    }

    #[test]
    fn test_actions_are_phase_gated() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);

        // Waiting: no bets yet.
        engine.update(0);
        assert_eq!(engine.place_bet(id, 1.0, 0), Err(ActionError::WrongPhase));
        assert_eq!(engine.cash_out(id, 0), Err(ActionError::WrongPhase));

        let open = open_betting(&mut engine);
        assert_eq!(engine.cash_out(id, open), Err(ActionError::WrongPhase));

        // The flip to flying rejects late bets.
        let start = lift_off(&mut engine, open);
        assert_eq!(
            engine.place_bet(id, 1.0, start),
            Err(ActionError::WrongPhase)
        );
    }

    #[test]
    fn test_bet_validation_rejects_without_mutating() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);
        let open = open_betting(&mut engine);

        assert_eq!(
            engine.place_bet(PlayerId::new([9; 16]), 1.0, open),
            Err(ActionError::UnknownPlayer)
        );
        assert_eq!(
            engine.place_bet(id, 0.0, open),
            Err(ActionError::InvalidAmount)
        );
        assert_eq!(
            engine.place_bet(id, f64::NAN, open),
            Err(ActionError::InvalidAmount)
        );
        assert_eq!(
            engine.place_bet(id, 10.5, open),
            Err(ActionError::InsufficientBalance)
        );
        assert_eq!(engine.player(id).unwrap().balance, 10.0);

        engine.place_bet(id, 1.0, open).unwrap();
        assert_eq!(
            engine.place_bet(id, 1.0, open),
            Err(ActionError::DuplicateBet)
        );
        assert_eq!(engine.player(id).unwrap().balance, 9.0);
    }

    #[test]
    fn test_double_cash_out_is_rejected() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);

        let open = open_betting(&mut engine);
        engine.place_bet(id, 1.0, open).unwrap();
        let start = lift_off(&mut engine, open);

        let at = start + TICK_INTERVAL_MS;
        engine.update(at);
        engine.cash_out(id, at).unwrap();
        assert_eq!(engine.cash_out(id, at), Err(ActionError::AlreadyCashedOut));
    }

    #[test]
    fn test_cash_out_without_bet_is_rejected() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);

        let open = open_betting(&mut engine);
        let start = lift_off(&mut engine, open);
        engine.update(start + TICK_INTERVAL_MS);
        assert_eq!(
            engine.cash_out(id, start + TICK_INTERVAL_MS),
            Err(ActionError::NoActiveBet)
        );
    }

    #[test]
    fn test_auto_cashout_paid_on_crash_tick() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);
        // Target below the crash point: must pay even if the crash lands
        // on the same tick.
        let target = 2.0;
        engine
            .start_autobet(
                id,
                AutobetSettings {
                    strategy: Strategy::Fixed,
                    bet_amount: 1.0,
                    auto_cash_out: target,
                    ..Default::default()
                },
            )
            .unwrap();

        let open = open_betting(&mut engine);
        assert!(engine.player(id).unwrap().bet.is_some(), "autobet placed");

        engine.force_crash_point(2.5);
        let start = lift_off(&mut engine, open);
        // Jump straight past both the target and the crash point in a
        // single coarse tick: the sweep runs before the crash check.
        let flight = ms_to_multiplier(2.5, GROWTH_BASE);
        let events: Vec<GameEvent> = engine.update(start + flight + 1);

        assert_eq!(engine.phase(), Phase::Crashed);
        let paid = events.iter().find_map(|e| match e {
            GameEvent::CashedOut { player_id, multiplier, auto: true, .. }
                if *player_id == id => Some(*multiplier),
            _ => None,
        });
        let revealed = events.iter().find_map(|e| match e {
            GameEvent::RoundCrashed { crash_point, .. } => Some(*crash_point),
            _ => None,
        });
        let paid = paid.expect("threshold reached on the crash tick still pays");
        assert!(paid >= target);
        assert_eq!(
            Some(paid),
            revealed,
            "auto cash-out pays at the current multiplier"
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, GameEvent::BetLost { player_id, .. } if *player_id == id)));
    }

    #[test]
    fn test_auto_cashout_above_crash_point_loses() {
        let mut engine = engine();

        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);
        engine
            .start_autobet(
                id,
                AutobetSettings {
                    strategy: Strategy::Fixed,
                    bet_amount: 1.0,
                    auto_cash_out: 2.6,
                    ..Default::default()
                },
            )
            .unwrap();

        let open = open_betting(&mut engine);
        engine.force_crash_point(2.5);
        let start = lift_off(&mut engine, open);

        // At tick-sized steps the crossing sample overshoots 2.5 by well
        // under 0.1, so the 2.6 threshold is never reached.
        let flight = ms_to_multiplier(2.5, GROWTH_BASE);
        let events = advance(&mut engine, start, start + flight + TICK_INTERVAL_MS);

        assert_eq!(engine.phase(), Phase::Crashed);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::BetLost { player_id, .. } if *player_id == id)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, GameEvent::CashedOut { player_id, .. } if *player_id == id)));
    }

    #[test]
    fn test_autobet_stops_after_bet_limit() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);
        engine
            .start_autobet(
                id,
                AutobetSettings {
                    strategy: Strategy::Fixed,
                    bet_amount: 0.1,
                    auto_cash_out: 1.5,
                    number_of_bets: 1,
                    ..Default::default()
                },
            )
            .unwrap();

        let open = open_betting(&mut engine);
        assert!(engine.player(id).unwrap().bet.is_some());

        // Drive through the crash, the pause, the next waiting dwell and
        // into the next betting entry. The one allowed bet settles (win or
        // loss depending on the drawn crash point), the limit fires, and no
        // second bet goes in.
        let crash_point = first_crash_point();
        let start = lift_off(&mut engine, open);
        let flight = ms_to_multiplier(crash_point, GROWTH_BASE);
        let next_open = start
            + flight
            + engine.config.crash_pause_ms
            + engine.config.waiting_time_ms
            + 4 * TICK_INTERVAL_MS;
        let events = advance(&mut engine, start, next_open);

        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::AutobetStopped { player_id, reason: StopReason::ConditionsMet, .. }
                if *player_id == id
        )));
        assert_eq!(engine.phase(), Phase::Betting);
        assert!(engine.player(id).unwrap().bet.is_none());
        let auto_bets = events
            .iter()
            .filter(|e| matches!(e, GameEvent::BetPlaced { auto: true, .. }))
            .count();
        assert_eq!(auto_bets, 0, "no bet after the limit");
    }

    #[test]
    fn test_autobet_stops_when_stake_unaffordable() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 0.5);
        engine
            .start_autobet(
                id,
                AutobetSettings {
                    strategy: Strategy::Fixed,
                    bet_amount: 1.0,
                    auto_cash_out: 2.0,
                    ..Default::default()
                },
            )
            .unwrap();

        engine.update(0);
        let events = engine.update(engine.config.waiting_time_ms);
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::AutobetStopped { reason: StopReason::StakeUnaffordable, .. }
        )));
        assert!(engine.player(id).unwrap().bet.is_none());
        assert_eq!(engine.player(id).unwrap().balance, 0.5);
    }

    #[test]
    fn test_balance_is_conserved_across_a_round() {
        let mut engine = engine();
        let crash_point = first_crash_point();
        let ids: Vec<PlayerId> = (1..=4u8).map(|i| PlayerId::new([i; 16])).collect();
        for id in &ids {
            engine.connect_player(*id, 10.0);
        }

        let open = open_betting(&mut engine);
        for id in &ids {
            engine.place_bet(*id, 1.0, open).unwrap();
        }
        let start = lift_off(&mut engine, open);

        // First two cash out below the crash point.
        let target = 1.0 + (crash_point - 1.0) / 3.0;
        let at = start + ms_to_multiplier(target, GROWTH_BASE);
        engine.update(at);
        let r0 = engine.cash_out(ids[0], at).unwrap();
        let r1 = engine.cash_out(ids[1], at).unwrap();

        let flight = ms_to_multiplier(crash_point, GROWTH_BASE);
        advance(&mut engine, at, start + flight + TICK_INTERVAL_MS);
        assert_eq!(engine.phase(), Phase::Crashed);

        // Total funds = starting funds - stakes + payouts.
        let total: f64 = ids
            .iter()
            .map(|id| engine.player(*id).unwrap().balance)
            .sum();
        let expected = 4.0 * 10.0 - 4.0 * 1.0 + r0.payout + r1.payout;
        assert!((total - expected).abs() < 1e-9);
    }

    #[test]
    fn test_multiplier_updates_are_throttled() {
        // A near-flat curve keeps the flight alive for the whole window no
        // matter what crash point the seed draws.
        let mut engine = CrashEngine::new(
            EngineConfig {
                growth_base: 1.000_000_1,
                ..Default::default()
            },
            CrashPointGenerator::from_seed(SEED),
        );
        let open = open_betting(&mut engine);
        let start = lift_off(&mut engine, open);

        // One second of 50ms ticks at a 100ms broadcast interval.
        let events = advance(&mut engine, start + TICK_INTERVAL_MS, start + 1_000);
        assert_eq!(engine.phase(), Phase::Flying);
        let updates = events
            .iter()
            .filter(|e| matches!(e, GameEvent::MultiplierUpdate { .. }))
            .count();
        assert!(updates <= 10, "got {} updates in one second", updates);
        assert!(updates >= 9);
    }

    #[test]
    fn test_revealed_crash_is_the_first_crossing_sample() {
        let mut engine = engine();
        let open = open_betting(&mut engine);
        engine.force_crash_point(2.0);
        let start = lift_off(&mut engine, open);

        let flight = ms_to_multiplier(2.0, GROWTH_BASE);
        let events = advance(&mut engine, start, start + flight + TICK_INTERVAL_MS);

        let revealed = events
            .iter()
            .find_map(|e| match e {
                GameEvent::RoundCrashed { crash_point, .. } => Some(*crash_point),
                _ => None,
            })
            .expect("round crashed");
        assert!(revealed >= 2.0);
        // One tick of growth bounds the overshoot.
        assert!(revealed < 2.0 * GROWTH_BASE.powf(TICK_INTERVAL_MS as f64));
        assert_eq!(engine.snapshot().multiplier, revealed);

        // Public updates stop short of the hidden target.
        for e in &events {
            if let GameEvent::MultiplierUpdate { multiplier, .. } = e {
                assert!(*multiplier < 2.0);
            }
        }
    }

    #[test]
    fn test_history_and_nonce_verify_after_disclosure() {
        let mut engine = engine();
        let open = open_betting(&mut engine);
        let start = lift_off(&mut engine, open);
        let crash_point = first_crash_point();
        let flight = ms_to_multiplier(crash_point, GROWTH_BASE);
        advance(&mut engine, start, start + flight + TICK_INTERVAL_MS);

        // Auditors recompute the derived point; the recorded value is the
        // crossing sample, at or above it.
        let record = &engine.history(1)[0];
        assert!(record.crash_point >= crash_point);
        let verified = CrashEngine::verify_crash_point(&engine.seed_hex(), 0, crash_point);
        assert_eq!(verified, Some(true));
        assert_eq!(CrashEngine::verify_crash_point("zz", 0, crash_point), None);
    }

    #[test]
    fn test_scenario_cash_out_midflight_locks_payout() {
        let mut engine = engine();
        let id = PlayerId::new([7; 16]);
        engine.connect_player(id, 10.0);

        let open = open_betting(&mut engine);
        engine.force_crash_point(2.5);
        engine.place_bet(id, 1.0, open).unwrap();
        let start = lift_off(&mut engine, open);

        // Cash out when the display reads about 2.10x.
        let at = start + ms_to_multiplier(2.10, GROWTH_BASE);
        engine.update(at);
        let receipt = engine.cash_out(id, at).unwrap();
        assert!((receipt.multiplier - 2.10).abs() < 0.01);
        assert!((receipt.payout - receipt.multiplier).abs() < 1e-9);
        assert!((receipt.balance - (9.0 + receipt.payout)).abs() < 1e-9);

        // The eventual crash leaves the settled player untouched.
        let flight = ms_to_multiplier(2.5, GROWTH_BASE);
        let events = advance(&mut engine, at, start + flight + TICK_INTERVAL_MS);
        assert_eq!(engine.phase(), Phase::Crashed);
        assert!(!events
            .iter()
            .any(|e| matches!(e, GameEvent::BetLost { player_id, .. } if *player_id == id)));
        assert_eq!(engine.player(id).unwrap().balance, receipt.balance);
    }

    #[test]
    fn test_scenario_open_bet_forfeited_at_crash() {
        let mut engine = engine();
        let id = PlayerId::new([8; 16]);
        engine.connect_player(id, 10.0);

        let open = open_betting(&mut engine);
        engine.force_crash_point(1.8);
        engine.place_bet(id, 1.0, open).unwrap();
        assert_eq!(engine.player(id).unwrap().balance, 9.0);

        let start = lift_off(&mut engine, open);
        let flight = ms_to_multiplier(1.8, GROWTH_BASE);
        let events = advance(&mut engine, start, start + flight + TICK_INTERVAL_MS);

        assert_eq!(engine.phase(), Phase::Crashed);
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::BetLost { player_id, amount, balance }
                if *player_id == id && *amount == 1.0 && *balance == 9.0
        )));
        assert_eq!(engine.player(id).unwrap().balance, 9.0);
    }

    #[test]
    fn test_reconnect_keeps_ledger_entry() {
        let mut engine = engine();
        let id = PlayerId::new([1; 16]);
        engine.connect_player(id, 10.0);

        let open = open_betting(&mut engine);
        engine.place_bet(id, 2.5, open).unwrap();
        let balance = engine.player(id).unwrap().balance;

        let again = engine.connect_player(id, 10.0);
        assert_eq!(again.balance, balance);
        assert!(again.bet.is_some());
    }
}
