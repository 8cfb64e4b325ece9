//! End-to-end bot runs against a scripted execution venue
//!
//! Time is paused, so delays between trades cost nothing:
//! ```
//! cargo test --test engine_scenarios
//! ```

mod common;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use common::ScriptedVenue;
use stream_trader::{
    BotEngine, BotObserver, BotSession, BotState, ClientError, Outcome, RunStats, StakingStrategy,
    StreamKey, Trade, TradeConfig, TradeProgram,
};

/// Observer keeping everything it is told
#[derive(Default)]
struct Recorder {
    trades: Mutex<Vec<Trade>>,
    states: Mutex<Vec<BotState>>,
    errors: Mutex<Vec<String>>,
    updates: Mutex<usize>,
}

impl BotObserver for Recorder {
    fn on_stats_update(&self, _stats: &RunStats) {
        *self.updates.lock() += 1;
    }

    fn on_trade(&self, trade: &Trade) {
        self.trades.lock().push(trade.clone());
    }

    fn on_state_change(&self, state: BotState) {
        self.states.lock().push(state);
    }

    fn on_error(&self, error: &ClientError) {
        self.errors.lock().push(error.to_string());
    }
}

fn config(stake: Decimal) -> TradeConfig {
    TradeConfig::new("R_100", stake)
}

async fn run_to_end(venue: &Arc<ScriptedVenue>, config: TradeConfig) -> (RunStats, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let run = BotEngine::new(venue.clone(), recorder.clone())
        .start(config)
        .unwrap();
    let stats = run.join().await.unwrap();
    (stats, recorder)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

fn rising_quotes(count: usize) -> Vec<Decimal> {
    (0..count).map(|i| dec!(100) + Decimal::from(i)).collect()
}

// ============================================================================
// Limits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_loss_ends_run() {
    let venue = Arc::new(ScriptedVenue::new([]));
    let (stats, recorder) = run_to_end(
        &venue,
        config(dec!(10))
            .with_staking(StakingStrategy::OscarsGrind)
            .with_stop_loss(dec!(15)),
    )
    .await;

    assert_eq!(stats.runs, 2);
    assert_eq!(stats.lost, 2);
    assert_eq!(stats.profit(), dec!(-20));
    assert_eq!(venue.stakes(), vec![dec!(10), dec!(10)]);
    assert_eq!(recorder.states.lock().last(), Some(&BotState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_take_profit_ends_run() {
    // Lose 10, win 19 on the doubled stake, win 9.5 on the reset stake
    let venue = Arc::new(ScriptedVenue::new([dec!(0), dec!(39), dec!(19.5), dec!(19.5)]));
    let (stats, _) = run_to_end(&venue, config(dec!(10)).with_take_profit(dec!(15))).await;

    assert_eq!(stats.runs, 3);
    assert_eq!(stats.won, 2);
    assert_eq!(stats.lost, 1);
    assert_eq!(stats.profit(), dec!(18.5));
    assert_eq!(venue.stakes(), vec![dec!(10), dec!(20), dec!(10)]);
}

#[tokio::test(start_paused = true)]
async fn test_run_limit_counts_settled_contracts() {
    let venue = Arc::new(ScriptedVenue::new([dec!(19.5); 5]));
    let (stats, recorder) = run_to_end(&venue, config(dec!(10)).with_max_runs(3)).await;

    assert_eq!(stats.runs, 3);
    assert_eq!(stats.won, 3);
    assert_eq!(stats.total_stake, dec!(30));
    assert_eq!(stats.total_payout, dec!(58.5));
    assert_eq!(venue.buy_count(), 3);
    assert_eq!(*recorder.updates.lock(), 3);

    let trades = recorder.trades.lock();
    assert!(trades.iter().all(|t| t.outcome == Outcome::Won));
    let ids: Vec<u64> = trades.iter().map(|t| t.contract_id).collect();
    assert_eq!(ids, vec![1000, 1001, 1002]);
}

// ============================================================================
// Staking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_martingale_doubles_then_resets() {
    let venue = Arc::new(ScriptedVenue::new([dec!(0), dec!(0), dec!(78), dec!(0)]));
    let (stats, _) = run_to_end(&venue, config(dec!(10)).with_max_runs(4)).await;

    assert_eq!(venue.stakes(), vec![dec!(10), dec!(20), dec!(40), dec!(10)]);
    assert_eq!(stats.profit(), dec!(-2));
}

#[tokio::test(start_paused = true)]
async fn test_stake_never_exceeds_cap() {
    let venue = Arc::new(ScriptedVenue::new([]));
    let (_, _) = run_to_end(&venue, config(dec!(10)).with_max_runs(6)).await;

    assert_eq!(
        venue.stakes(),
        vec![dec!(10), dec!(20), dec!(40), dec!(80), dec!(100), dec!(100)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dalembert_adds_one_unit_per_loss() {
    let venue = Arc::new(ScriptedVenue::new([dec!(0), dec!(0), dec!(58.5), dec!(0)]));
    let (_, _) = run_to_end(
        &venue,
        config(dec!(10))
            .with_staking(StakingStrategy::DAlembert)
            .with_max_runs(4),
    )
    .await;

    assert_eq!(venue.stakes(), vec![dec!(10), dec!(20), dec!(30), dec!(10)]);
}

// ============================================================================
// Failures and control
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_buys_are_retried() {
    let venue = Arc::new(ScriptedVenue::new([dec!(19.5)]).with_buy_failures(2));
    let (stats, recorder) = run_to_end(&venue, config(dec!(10)).with_max_runs(1)).await;

    assert_eq!(stats.runs, 1);
    assert_eq!(venue.proposal_count(), 3);
    assert_eq!(venue.buy_count(), 3);
    let errors = recorder.errors.lock();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("InvalidContractProposal"));
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_next_trade_until_resume() {
    let gate = Arc::new(Semaphore::new(0));
    let venue = Arc::new(ScriptedVenue::new([dec!(19.5), dec!(19.5)]).with_gate(gate.clone()));
    let recorder = Arc::new(Recorder::default());
    let run = BotEngine::new(venue.clone(), recorder.clone())
        .start(config(dec!(10)).with_max_runs(2))
        .unwrap();

    // Let the loop reach the gated proposal before pausing
    sleep(Duration::from_millis(10)).await;
    assert_eq!(venue.proposal_count(), 0);
    run.pause().unwrap();
    assert_eq!(run.state(), BotState::Paused);

    // The in-flight trade still completes
    gate.add_permits(1);
    eventually(|| run.stats().runs == 1).await;

    gate.add_permits(1);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(venue.proposal_count(), 1);
    assert_eq!(run.state(), BotState::Paused);

    run.resume().unwrap();
    let stats = run.join().await.unwrap();
    assert_eq!(stats.runs, 2);
    assert_eq!(
        *recorder.states.lock(),
        vec![BotState::Running, BotState::Paused, BotState::Running, BotState::Stopped]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_paused() {
    let venue = Arc::new(ScriptedVenue::new([]));
    let run = BotEngine::new(venue.clone(), Arc::new(Recorder::default()))
        .start(config(dec!(10)))
        .unwrap();

    run.pause().unwrap();
    sleep(Duration::from_secs(5)).await;
    run.stop();
    run.stop();
    assert!(run.resume().is_err());

    let history = run.history();
    let stats = run.join().await.unwrap();
    assert!(stats.runs <= 1);
    assert!(history.len() <= 1);
}

// ============================================================================
// Trade programs
// ============================================================================

const RSI_PROGRAM: &str = r#"{
    "statements": [
        {"action": "purchase", "contract": {"kind": "fall"},
         "when": {"indicator": "rsi", "period": 14, "op": "above", "value": 70}},
        {"action": "purchase", "contract": {"kind": "rise"},
         "when": {"indicator": "rsi", "period": 14, "op": "below", "value": 30}}
    ]
}"#;

#[tokio::test(start_paused = true)]
async fn test_program_buys_put_on_overbought_rsi() {
    let venue = Arc::new(ScriptedVenue::new([dec!(19.5)]).with_ticks(&rising_quotes(20)));
    let program = TradeProgram::from_json(RSI_PROGRAM).unwrap();
    let run = BotEngine::new(venue.clone(), Arc::new(Recorder::default()))
        .with_program(program)
        .start(config(dec!(10)).with_max_runs(1))
        .unwrap();
    let stats = run.join().await.unwrap();

    assert_eq!(stats.runs, 1);
    assert_eq!(venue.contract_types(), vec!["PUT".to_string()]);
    assert_eq!(*venue.released.lock(), vec![
        StreamKey::open_contract(1000),
        StreamKey::ticks("R_100"),
    ]);
}

#[tokio::test(start_paused = true)]
async fn test_program_waits_when_nothing_matches() {
    let only_oversold = r#"{
        "statements": [
            {"action": "purchase", "contract": {"kind": "rise"},
             "when": {"indicator": "rsi", "period": 14, "op": "below", "value": 30}}
        ]
    }"#;
    let venue = Arc::new(ScriptedVenue::new([]).with_ticks(&rising_quotes(20)));
    let run = BotEngine::new(venue.clone(), Arc::new(Recorder::default()))
        .with_program(TradeProgram::from_json(only_oversold).unwrap())
        .start(config(dec!(10)))
        .unwrap();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(run.state(), BotState::Running);
    run.stop();
    let stats = run.join().await.unwrap();

    assert_eq!(stats.runs, 0);
    assert_eq!(venue.proposal_count(), 0);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_allows_one_active_run() {
    let venue = Arc::new(ScriptedVenue::new([]));
    let mut session = BotSession::new(venue.clone(), Arc::new(Recorder::default()));
    assert_eq!(session.state(), BotState::Idle);

    session.start(config(dec!(10)), None).unwrap();
    let err = session.start(config(dec!(5)), None).unwrap_err();
    assert!(matches!(err, ClientError::RunConflict));

    let stats = session.shutdown().await.unwrap();
    assert!(stats.is_some());
    assert_eq!(session.state(), BotState::Idle);

    session.start(config(dec!(5)).with_max_runs(1), None).unwrap();
    eventually(|| session.state() == BotState::Stopped).await;
    assert_eq!(venue.stakes().last(), Some(&dec!(5)));
}
