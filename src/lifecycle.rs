//! Process Lifecycle Controller
//!
//! Starts every harvester, then waits for SIGINT/SIGTERM or a panic anywhere
//! in the process. Either one runs the shutdown sequence exactly once:
//!   1. Notify (with the panic message when error-triggered)
//!   2. Stop all harvesters concurrently
//!   3. Exit 0 for signals, 1 for panics
//!
//! Created: 2026-10-05

use crate::harvest::Harvester;
use crate::notify::Notifier;
use anyhow::{Context, Result};
use futures::future::join_all;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

/// Panic messages forwarded from the panic hook
static FATAL_TX: OnceCell<UnboundedSender<String>> = OnceCell::new();

/// Route every panic (including ones inside spawned tasks) to the supervisor.
///
/// Keeps the default hook so the panic is still printed.
pub fn install_panic_hook() -> Result<UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    FATAL_TX
        .set(tx)
        .map_err(|_| anyhow::anyhow!("panic hook already installed"))?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = info
            .location()
            .map(|l| format!(" at {}:{}", l.file(), l.line()))
            .unwrap_or_default();
        if let Some(tx) = FATAL_TX.get() {
            let _ = tx.send(format!("{}{}", message, location));
        }
    }));
    Ok(rx)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Signal(&'static str),
    Panic(String),
}

impl ShutdownTrigger {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownTrigger::Signal(_) => 0,
            ShutdownTrigger::Panic(_) => 1,
        }
    }

    /// Reason attached to the shutdown notification
    pub fn reason(&self) -> Option<String> {
        match self {
            ShutdownTrigger::Signal(_) => None,
            ShutdownTrigger::Panic(message) => Some(format!("Uncaught panic: {}", message)),
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShutdownTrigger::Signal(name) => write!(f, "{}", name),
            ShutdownTrigger::Panic(_) => write!(f, "panic"),
        }
    }
}

pub struct Supervisor {
    harvesters: Vec<Arc<Harvester>>,
    notifier: Arc<Notifier>,
    shutting_down: AtomicBool,
}

impl Supervisor {
    pub fn new(harvesters: Vec<Arc<Harvester>>, notifier: Arc<Notifier>) -> Self {
        Self {
            harvesters,
            notifier,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub async fn start(&self) {
        for harvester in &self.harvesters {
            harvester.start().await;
        }
        info!("Started {} bots", self.harvesters.len());
        self.notifier.notify_startup().await;
    }

    /// Block until a signal or panic arrives, shut down, and return the exit code.
    pub async fn run_until_shutdown(&self, mut fatal: UnboundedReceiver<String>) -> Result<i32> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
        let handle = signals.handle();

        let mut exit_code = None;
        while exit_code.is_none() {
            let trigger = tokio::select! {
                Some(signal) = signals.next() => ShutdownTrigger::Signal(signal_name(signal)),
                Some(message) = fatal.recv() => {
                    error!("Uncaught panic: {}", message);
                    ShutdownTrigger::Panic(message)
                }
                else => ShutdownTrigger::Panic("signal and panic channels closed".to_string()),
            };
            exit_code = self.shutdown(trigger).await;
        }

        handle.close();
        Ok(exit_code.unwrap_or(1))
    }

    /// Run the shutdown sequence. `None` if one is already under way.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> Option<i32> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Already shutting down, ignoring {}", trigger);
            return None;
        }

        info!("{} - stopping bots...", trigger);
        let reason = trigger.reason();
        self.notifier.notify_shutdown(reason.as_deref()).await;
        join_all(self.harvesters.iter().map(|h| h.stop())).await;
        info!("Shutdown complete");
        Some(trigger.exit_code())
    }
}

fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        _ => "signal",
    }
}
