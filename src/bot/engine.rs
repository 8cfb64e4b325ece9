//! Bot execution engine
//!
//! One run drives a sequential loop: check limits, price a contract, buy it,
//! wait for settlement, record the result and size the next stake. The loop
//! runs on its own task and is steered through [`BotRun`].

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::{ContractKind, TradeConfig};
use super::indicators::TickHistory;
use super::intent::TradeProgram;
use super::stats::{RunStats, TradeHistory};
use super::traits::ExecutionVenue;
use crate::common::channels::StreamReceiver;
use crate::common::errors::{ClientError, Result};
use crate::common::traits::BotObserver;
use crate::common::types::{BotState, Outcome, Tick, Trade};
use crate::config::types::EngineConfig;
use crate::venue::messages::OpenContract;
use crate::venue::subscription::StreamKey;

/// Loop pacing, resolved from [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub inter_trade_delay: Duration,
    pub error_backoff: Duration,
    pub pause_poll: Duration,
    pub tick_poll: Duration,
    pub trade_history_capacity: usize,
    pub tick_history_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            inter_trade_delay: Duration::from_millis(config.inter_trade_delay_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            pause_poll: Duration::from_millis(config.pause_poll_ms),
            tick_poll: Duration::from_millis(config.tick_poll_ms),
            trade_history_capacity: config.trade_history_capacity,
            tick_history_capacity: config.tick_history_capacity,
        }
    }
}

/// Builder for a single bot run
pub struct BotEngine {
    venue: Arc<dyn ExecutionVenue>,
    observer: Arc<dyn BotObserver>,
    settings: EngineSettings,
    program: Option<TradeProgram>,
}

impl BotEngine {
    pub fn new(venue: Arc<dyn ExecutionVenue>, observer: Arc<dyn BotObserver>) -> Self {
        Self {
            venue,
            observer,
            settings: EngineSettings::default(),
            program: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Let a trade-intent program choose contracts instead of the configured kind
    pub fn with_program(mut self, program: TradeProgram) -> Self {
        self.program = Some(program);
        self
    }

    /// Validate `config` and spawn the trading loop
    ///
    /// Consumes the engine: a stopped run cannot be restarted.
    pub fn start(self, config: TradeConfig) -> Result<BotRun> {
        config.validate()?;
        if let Some(program) = &self.program {
            program.validate(self.settings.tick_history_capacity)?;
        }

        let (state, state_rx) = watch::channel(BotState::Running);
        let shared = Arc::new(RunShared {
            state,
            stats: Mutex::new(RunStats::default()),
            history: Mutex::new(TradeHistory::new(self.settings.trade_history_capacity)),
            observer: self.observer,
        });
        shared.observer.on_state_change(BotState::Running);

        let span = info_span!("bot_run", symbol = %config.symbol);
        let run_loop = RunLoop {
            venue: self.venue,
            shared: shared.clone(),
            state_rx,
            history: TickHistory::new(self.settings.tick_history_capacity),
            settings: self.settings,
            program: self.program,
            current_stake: config.initial_stake,
            consecutive_losses: 0,
            ticks: None,
            config,
        };
        let task = tokio::spawn(run_loop.run().instrument(span));

        Ok(BotRun { shared, task })
    }
}

struct RunShared {
    state: watch::Sender<BotState>,
    stats: Mutex<RunStats>,
    history: Mutex<TradeHistory>,
    observer: Arc<dyn BotObserver>,
}

impl RunShared {
    fn state(&self) -> BotState {
        *self.state.borrow()
    }

    fn pause(&self) -> Result<()> {
        let mut result = Ok(());
        let changed = self.state.send_if_modified(|state| match state {
            BotState::Running => {
                *state = BotState::Paused;
                true
            }
            BotState::Paused => false,
            other => {
                result = Err(ClientError::InvalidState(format!("cannot pause a {} run", other)));
                false
            }
        });
        if changed {
            info!("Bot paused");
            self.observer.on_state_change(BotState::Paused);
        }
        result
    }

    fn resume(&self) -> Result<()> {
        let mut result = Ok(());
        let changed = self.state.send_if_modified(|state| match state {
            BotState::Paused => {
                *state = BotState::Running;
                true
            }
            BotState::Running => false,
            other => {
                result = Err(ClientError::InvalidState(format!("cannot resume a {} run", other)));
                false
            }
        });
        if changed {
            info!("Bot resumed");
            self.observer.on_state_change(BotState::Running);
        }
        result
    }

    fn stop(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == BotState::Stopped {
                return false;
            }
            *state = BotState::Stopped;
            true
        });
        if changed {
            info!("Bot stopped");
            self.observer.on_state_change(BotState::Stopped);
        }
    }
}

/// Handle to a running bot loop
pub struct BotRun {
    shared: Arc<RunShared>,
    task: JoinHandle<RunStats>,
}

impl BotRun {
    pub fn state(&self) -> BotState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<BotState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the run's statistics
    pub fn stats(&self) -> RunStats {
        self.shared.stats.lock().clone()
    }

    /// Recent trades, most recent first
    pub fn history(&self) -> Vec<Trade> {
        self.shared.history.lock().snapshot()
    }

    /// Suspend before the next trade; subscriptions stay open
    pub fn pause(&self) -> Result<()> {
        self.shared.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.shared.resume()
    }

    /// Ask the loop to stop at its next check point; idempotent
    ///
    /// A trade already bought is still settled and recorded.
    pub fn stop(&self) {
        self.shared.stop()
    }

    /// True once the loop task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit and return the final statistics
    pub async fn join(self) -> Result<RunStats> {
        self.task
            .await
            .map_err(|e| ClientError::Internal(format!("bot loop failed: {}", e)))
    }
}

enum SettlementEvent {
    Update(Option<Result<OpenContract>>),
    Tick(Option<Result<Tick>>),
}

struct RunLoop {
    venue: Arc<dyn ExecutionVenue>,
    shared: Arc<RunShared>,
    state_rx: watch::Receiver<BotState>,
    settings: EngineSettings,
    program: Option<TradeProgram>,
    config: TradeConfig,
    current_stake: Decimal,
    consecutive_losses: u32,
    ticks: Option<StreamReceiver<Tick>>,
    history: TickHistory,
}

impl RunLoop {
    async fn run(mut self) -> RunStats {
        info!(
            stake = %self.current_stake,
            contract = %self.config.contract,
            staking = %self.config.staking,
            "Bot run started"
        );

        loop {
            if !self.checkpoint().await {
                break;
            }
            if let Some(reason) = self.limit_reached() {
                info!("{}", reason);
                self.shared.stop();
                break;
            }

            self.drain_ticks();
            let Some(kind) = self.choose_contract() else {
                self.nap(self.settings.tick_poll).await;
                continue;
            };

            match self.attempt(kind).await {
                Ok(()) => self.nap(self.settings.inter_trade_delay).await,
                Err(e) => {
                    if e.is_transport() {
                        warn!("Venue unreachable, backing off: {}", e);
                    } else {
                        warn!(code = ?e.venue_code(), "Trade rejected: {}", e);
                    }
                    self.shared.observer.on_error(&e);
                    self.nap(self.settings.error_backoff).await;
                }
            }
        }

        if self.ticks.take().is_some() {
            if let Err(e) = self.venue.release(&StreamKey::ticks(&self.config.symbol)) {
                debug!("Failed to release tick stream: {}", e);
            }
        }
        self.shared.stop();

        let stats = self.shared.stats.lock().clone();
        info!(runs = stats.runs, won = stats.won, lost = stats.lost, profit = %stats.profit(), "Bot run finished");
        stats
    }

    /// Wait out a pause; false once the run is stopped
    async fn checkpoint(&mut self) -> bool {
        loop {
            let state = *self.state_rx.borrow_and_update();
            match state {
                BotState::Running | BotState::Idle => return true,
                BotState::Stopped => return false,
                BotState::Paused => {
                    tokio::select! {
                        _ = sleep(self.settings.pause_poll) => {}
                        _ = self.state_rx.changed() => {}
                    }
                }
            }
        }
    }

    /// Sleep that ends early when the run is stopped
    async fn nap(&mut self, duration: Duration) {
        let state_rx = &mut self.state_rx;
        let stopped = async {
            loop {
                let stopped = *state_rx.borrow_and_update() == BotState::Stopped;
                if stopped || state_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::select! {
            _ = sleep(duration) => {}
            _ = stopped => {}
        }
    }

    fn limit_reached(&self) -> Option<String> {
        let stats = self.shared.stats.lock();
        let profit = stats.profit();
        if let Some(stop_loss) = self.config.stop_loss {
            if profit <= -stop_loss {
                return Some(format!("Stop loss reached (profit {})", profit));
            }
        }
        if let Some(take_profit) = self.config.take_profit {
            if profit >= take_profit {
                return Some(format!("Take profit reached (profit {})", profit));
            }
        }
        if let Some(max_runs) = self.config.max_runs {
            if stats.runs >= max_runs {
                return Some(format!("Run limit reached ({} runs)", stats.runs));
            }
        }
        None
    }

    fn needs_ticks(&self) -> bool {
        self.program.as_ref().map_or(false, TradeProgram::needs_ticks)
    }

    /// Pull every queued tick into the history, opening the stream if needed
    fn drain_ticks(&mut self) {
        if !self.needs_ticks() {
            return;
        }
        if self.ticks.is_none() {
            match self.venue.watch_ticks(&self.config.symbol) {
                Ok(rx) => self.ticks = Some(rx),
                Err(e) => {
                    warn!("Cannot stream ticks: {}", e);
                    return;
                }
            }
        }
        let Some(rx) = self.ticks.as_mut() else { return };
        loop {
            match rx.try_recv() {
                Ok(Ok(tick)) => self.history.push(tick),
                Ok(Err(e)) => debug!("Tick stream error: {}", e),
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    debug!("Tick stream closed");
                    self.ticks = None;
                    break;
                }
            }
        }
    }

    fn choose_contract(&self) -> Option<ContractKind> {
        match &self.program {
            Some(program) => program.next_purchase(&self.history),
            None => Some(self.config.contract),
        }
    }

    /// Price, buy and settle one contract
    async fn attempt(&mut self, kind: ContractKind) -> Result<()> {
        let params = self.config.contract_parameters(kind, self.current_stake);
        let proposal = self.venue.proposal(&params).await?;
        debug!(id = %proposal.id, ask = %proposal.ask_price, payout = %proposal.payout, "Got proposal");

        let receipt = self.venue.buy(&proposal.id, proposal.ask_price).await?;
        info!(contract_id = receipt.contract_id, stake = %receipt.buy_price, "Contract bought");

        let trade = Trade {
            contract_id: receipt.contract_id,
            contract_type: kind.contract_type().to_string(),
            symbol: self.config.symbol.clone(),
            stake: receipt.buy_price,
            payout: Decimal::ZERO,
            outcome: Outcome::Pending,
            timestamp: Utc::now(),
        };
        self.shared.history.lock().upsert(trade.clone());

        match self.await_settlement(receipt.contract_id).await {
            Some(contract) => self.settle(trade, &contract),
            None => warn!(
                contract_id = receipt.contract_id,
                "Run stopped before the contract settled; it stays pending"
            ),
        }
        Ok(())
    }

    /// Follow the contract stream until sold, polling if the stream ends first
    async fn await_settlement(&mut self, contract_id: u64) -> Option<OpenContract> {
        let key = StreamKey::open_contract(contract_id);
        match self.venue.watch_contract(contract_id) {
            Ok(updates) => {
                if let Some(contract) = self.follow_contract(contract_id, updates).await {
                    self.release(&key);
                    return Some(contract);
                }
                debug!(contract_id, "Contract stream ended before settlement");
            }
            Err(e) => warn!(contract_id, "Cannot watch contract: {}", e),
        }
        self.release(&key);
        self.poll_settlement(contract_id).await
    }

    async fn follow_contract(
        &mut self,
        contract_id: u64,
        mut updates: StreamReceiver<OpenContract>,
    ) -> Option<OpenContract> {
        let sell_rules = self
            .program
            .as_ref()
            .map_or(false, TradeProgram::has_sell_rules);
        let mut sell_requested = false;

        loop {
            let watch_ticks = sell_rules && !sell_requested && self.ticks.is_some();
            let event = tokio::select! {
                update = updates.recv() => SettlementEvent::Update(update),
                tick = next_tick(&mut self.ticks), if watch_ticks => SettlementEvent::Tick(tick),
            };

            match event {
                SettlementEvent::Update(Some(Ok(contract))) if contract.is_sold => {
                    return Some(contract);
                }
                SettlementEvent::Update(Some(Ok(contract))) => {
                    debug!(contract_id, spot = ?contract.current_spot, "Contract update");
                }
                SettlementEvent::Update(Some(Err(e))) => {
                    warn!(contract_id, "Contract stream error: {}", e);
                }
                SettlementEvent::Update(None) => return None,
                SettlementEvent::Tick(Some(Ok(tick))) => {
                    self.history.push(tick);
                    let should_sell = self
                        .program
                        .as_ref()
                        .map_or(false, |program| program.should_sell(&self.history));
                    if should_sell {
                        sell_requested = true;
                        info!(contract_id, "Sell rule triggered");
                        if let Err(e) = self.venue.sell(contract_id, Decimal::ZERO).await {
                            warn!(contract_id, "Early sell failed: {}", e);
                            self.shared.observer.on_error(&e);
                        }
                    }
                }
                SettlementEvent::Tick(Some(Err(e))) => debug!("Tick stream error: {}", e),
                SettlementEvent::Tick(None) => self.ticks = None,
            }
        }
    }

    async fn poll_settlement(&mut self, contract_id: u64) -> Option<OpenContract> {
        loop {
            if self.shared.state() == BotState::Stopped {
                return None;
            }
            self.nap(self.settings.error_backoff).await;
            match self.venue.contract_status(contract_id).await {
                Ok(contract) if contract.is_sold => return Some(contract),
                Ok(_) => debug!(contract_id, "Contract still open"),
                Err(e) => {
                    warn!(contract_id, "Settlement poll failed: {}", e);
                    self.shared.observer.on_error(&e);
                }
            }
        }
    }

    fn release(&self, key: &StreamKey) {
        if let Err(e) = self.venue.release(key) {
            debug!(stream = %key, "Failed to release stream: {}", e);
        }
    }

    /// Record a settled contract and size the next stake
    fn settle(&mut self, mut trade: Trade, contract: &OpenContract) {
        trade.payout = contract.settled_payout();
        trade.outcome = Outcome::from_profit(trade.profit());
        trade.timestamp = Utc::now();

        let snapshot = {
            let mut stats = self.shared.stats.lock();
            stats.record(&trade);
            stats.clone()
        };
        self.shared.history.lock().upsert(trade.clone());
        info!(
            contract_id = trade.contract_id,
            outcome = %trade.outcome,
            profit = %trade.profit(),
            total = %snapshot.profit(),
            "Contract settled"
        );
        self.shared.observer.on_trade(&trade);
        self.shared.observer.on_stats_update(&snapshot);

        let won = trade.outcome == Outcome::Won;
        let decision = self.config.staking.next_stake(
            self.config.initial_stake,
            self.current_stake,
            won,
            self.consecutive_losses,
        );
        if decision.capped {
            warn!(
                requested = %decision.requested,
                capped = %decision.stake,
                "Stake clamped at safety cap"
            );
        }
        self.current_stake = decision.stake;
        self.consecutive_losses = if won { 0 } else { self.consecutive_losses + 1 };
    }
}

async fn next_tick(ticks: &mut Option<StreamReceiver<Tick>>) -> Option<Result<Tick>> {
    match ticks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
