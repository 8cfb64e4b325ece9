//! One user session: at most one active bot run at a time

use std::sync::Arc;
use tracing::{info, warn};

use super::config::TradeConfig;
use super::engine::{BotEngine, BotRun, EngineSettings};
use super::intent::TradeProgram;
use super::stats::RunStats;
use super::traits::ExecutionVenue;
use crate::common::errors::{ClientError, Result};
use crate::common::traits::BotObserver;
use crate::common::types::BotState;

/// Owns the session's current run and rejects a second concurrent one
pub struct BotSession {
    venue: Arc<dyn ExecutionVenue>,
    observer: Arc<dyn BotObserver>,
    settings: EngineSettings,
    current: Option<BotRun>,
}

impl BotSession {
    pub fn new(venue: Arc<dyn ExecutionVenue>, observer: Arc<dyn BotObserver>) -> Self {
        Self {
            venue,
            observer,
            settings: EngineSettings::default(),
            current: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start a run; fails with [`ClientError::RunConflict`] while another is active
    ///
    /// A stopped run stays active until its loop has exited, which may take
    /// until its open contract settles.
    pub fn start(&mut self, config: TradeConfig, program: Option<TradeProgram>) -> Result<()> {
        if self.has_live_run() {
            warn!(state = %self.state(), "Refusing to start a second bot run");
            return Err(ClientError::RunConflict);
        }

        let mut engine = BotEngine::new(self.venue.clone(), self.observer.clone())
            .with_settings(self.settings.clone());
        if let Some(program) = program {
            engine = engine.with_program(program);
        }
        let run = engine.start(config)?;
        info!("Bot run started in session");
        self.current = Some(run);
        Ok(())
    }

    /// State of the current run, `Idle` if none was started
    pub fn state(&self) -> BotState {
        self.current
            .as_ref()
            .map(BotRun::state)
            .unwrap_or(BotState::Idle)
    }

    pub fn stats(&self) -> Option<RunStats> {
        self.current.as_ref().map(BotRun::stats)
    }

    pub fn run(&self) -> Option<&BotRun> {
        self.current.as_ref()
    }

    pub fn pause(&self) -> Result<()> {
        self.active_run()?.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.active_run()?.resume()
    }

    pub fn stop(&self) {
        if let Some(run) = &self.current {
            run.stop();
        }
    }

    /// Stop the current run and wait for its loop to finish
    pub async fn shutdown(&mut self) -> Result<Option<RunStats>> {
        match self.current.take() {
            Some(run) => {
                run.stop();
                Ok(Some(run.join().await?))
            }
            None => Ok(None),
        }
    }

    /// True while the current run's loop is still executing
    pub fn has_live_run(&self) -> bool {
        self.current.as_ref().map_or(false, |run| !run.is_finished())
    }

    fn active_run(&self) -> Result<&BotRun> {
        self.current
            .as_ref()
            .ok_or_else(|| ClientError::InvalidState("no bot run in this session".to_string()))
    }
}
