//! Autonomous trading control loop.
//!
//! One tokio task runs the cycle: snapshot the scanner config, run the entry policy
//! (unless auto-trading is off or the controller is paused), evaluate exits, then sleep
//! for the configured interval. The sleep is cancellable; an in-flight cycle is not.

use crate::events::{EventSink, TradingEvent};
use crate::persistence::PositionLedger;
use crate::risk::{CloseReason, ExitStrategyEvaluator};
use crate::strategy::{EntryOutcome, EntryPolicy};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Invalid controller transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("trading loop is already running")]
    AlreadyRunning,
    #[error("trading loop is not running")]
    NotRunning,
}

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub is_running: bool,
    pub is_paused: bool,
}

struct Inner {
    ledger: Arc<dyn PositionLedger>,
    entry: EntryPolicy,
    exits: ExitStrategyEvaluator,
    events: Arc<dyn EventSink>,
    running: AtomicBool,
    paused: AtomicBool,
    error_backoff: Duration,
}

/// Owns the control loop task and its lifecycle.
pub struct TradingController {
    inner: Arc<Inner>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl TradingController {
    pub fn new(
        ledger: Arc<dyn PositionLedger>,
        entry: EntryPolicy,
        exits: ExitStrategyEvaluator,
        events: Arc<dyn EventSink>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                entry,
                exits,
                events,
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                error_backoff,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ControllerStatus {
        self.inner.status()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Spawn the control loop. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_loop(shutdown_rx).await });
        *task = Some((shutdown_tx, handle));

        info!("[CONTROL] Trading loop started");
        self.inner.emit_status();
        Ok(())
    }

    /// Cancel the sleep and wait for any in-flight cycle to finish.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let taken = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some((shutdown_tx, handle)) = taken else {
            return Err(ControllerError::NotRunning);
        };

        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Trading loop task failed");
        }

        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);

        info!("[CONTROL] Trading loop stopped");
        self.inner.emit_status();
        Ok(())
    }

    /// Suppress new entries. Exit monitoring continues.
    pub fn pause(&self) -> Result<(), ControllerError> {
        if !self.is_running() {
            return Err(ControllerError::NotRunning);
        }
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("[CONTROL] Trading paused");
            self.inner.emit_status();
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ControllerError> {
        if !self.is_running() {
            return Err(ControllerError::NotRunning);
        }
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("[CONTROL] Trading resumed");
            self.inner.emit_status();
        }
        Ok(())
    }

    /// Stop the loop, disable auto-trading and close every ACTIVE position.
    ///
    /// Runs to completion in the caller. Returns the number of positions closed.
    pub async fn panic_close(&self) -> Result<usize> {
        warn!("[PANIC] Emergency close requested");

        if self.stop().await.is_err() {
            // Already stopped; still report the transition
            self.inner.emit_status();
        }

        let mut config = self
            .inner
            .ledger
            .load_scanner_config()
            .context("Failed to load scanner config")?;
        config.auto_trading_enabled = false;
        self.inner
            .ledger
            .save_scanner_config(&config)
            .context("Failed to disable auto-trading")?;

        let closed = self.inner.exits.close_all(CloseReason::Panic).await?;

        warn!(closed, "[PANIC] All positions closed, auto-trading disabled");
        Ok(closed)
    }

    /// Run a single cycle in the caller, without sleeping.
    pub async fn run_once(&self) -> Result<()> {
        self.inner.run_cycle().await.map(|_| ())
    }
}

impl Inner {
    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            is_running: self.running.load(Ordering::SeqCst),
            is_paused: self.paused.load(Ordering::SeqCst),
        }
    }

    fn emit_status(&self) {
        let status = self.status();
        self.events.emit(TradingEvent::TradingStatus {
            is_running: status.is_running,
            is_paused: status.is_paused,
        });
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle().await {
                Ok(interval) => interval,
                Err(e) => {
                    error!(error = %format!("{:#}", e), backoff_secs = self.error_backoff.as_secs(), "Trading cycle failed, backing off");
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Trading loop exited");
    }

    /// One iteration. Returns the delay before the next one.
    async fn run_cycle(&self) -> Result<Duration> {
        let config = self
            .ledger
            .load_scanner_config()
            .context("Failed to load scanner config")?;

        let mut entry_error = None;
        let mut entered = Vec::new();

        if config.auto_trading_enabled && !self.paused.load(Ordering::SeqCst) {
            match self.entry.run(&config).await {
                Ok(EntryOutcome::Entered(position)) => entered.push(position.id),
                Ok(outcome) => debug!(?outcome, "No entry this cycle"),
                Err(e) => entry_error = Some(e.context("Entry policy failed")),
            }
        }

        // Positions opened this cycle are first evaluated on the next one
        let exit_result = self
            .exits
            .evaluate(&config, &entered)
            .await
            .context("Exit evaluation failed");

        match (entry_error, exit_result) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e),
            (None, Ok(_)) => Ok(config.scan_interval()),
        }
    }
}
