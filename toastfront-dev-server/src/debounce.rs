//! Change coalescing for the dev loop.
//!
//! The first change event opens a window; each further event pushes the
//! deadline back. When the deadline passes with no new event, exactly one
//! rebuild runs and one reload is published.

use std::{path::PathBuf, time::Duration};

use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, error, info};

use crate::broker::{ReloadBroker, ReloadEvent};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Coalescing { deadline: Instant },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Coalescing { deadline } => Some(deadline),
        }
    }

    /// A change was seen at `now`: open the window or push it back.
    pub fn event(&mut self, now: Instant) {
        self.state = DebounceState::Coalescing {
            deadline: now + self.window,
        };
    }

    /// Whether a rebuild is due at `now`. Firing returns to idle.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Coalescing { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                true
            }
            _ => false,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

/// Drive `debouncer` from `changes` until the channel closes.
///
/// `rebuild` runs on the blocking pool, one call at a time. A failed rebuild
/// is logged and publishes nothing; the loop keeps going.
pub async fn run<F>(
    mut changes: mpsc::Receiver<PathBuf>,
    mut debouncer: Debouncer,
    mut rebuild: F,
    broker: ReloadBroker,
) where
    F: FnMut() -> anyhow::Result<()> + Send + 'static,
{
    loop {
        let change = match debouncer.deadline() {
            None => changes.recv().await,
            Some(deadline) => tokio::select! {
                change = changes.recv() => change,
                _ = sleep_until(deadline) => {
                    if debouncer.poll(Instant::now()) {
                        let (returned, result) = match tokio::task::spawn_blocking(move || {
                            let result = rebuild();
                            (rebuild, result)
                        })
                        .await
                        {
                            Ok(done) => done,
                            Err(e) => {
                                error!(err = %e, "rebuild task failed, stopping watch loop");
                                return;
                            }
                        };
                        rebuild = returned;

                        match result {
                            Ok(()) => {
                                let clients = broker.publish(ReloadEvent);
                                info!(clients, "rebuilt, reload sent");
                            }
                            Err(e) => error!(err = %e, "rebuild failed"),
                        }
                    }
                    continue;
                }
            },
        };

        let Some(path) = change else {
            debug!("change channel closed, stopping watch loop");
            return;
        };

        debug!(path = %path.display(), "change detected");
        debouncer.event(Instant::now());
    }
}
