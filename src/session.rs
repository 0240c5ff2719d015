//! One agent session: the PTY child, its virtual screen, and the tasks that
//! turn raw output into transcript and status events.
//!
//! Ownership layout: the pump task is the only writer of the screen; every
//! other task sees it through immutable snapshots. Transcript and status
//! share one mutex, and publications to the bus happen under that lock so
//! subscribers bootstrap without missing or reordering events. No await
//! point runs under either lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::bus::{BusEvent, EventBus, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::format::{rules_for, AgentType, FormatRules};
use crate::pty::PtyProcess;
use crate::screen::{Screen, ScreenSnapshot};
use crate::tracker::{AgentStatus, ScreenTracker, TrackerParams};
use crate::transcript::{Message, Transcript};

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub agent: AgentType,
    pub program: String,
    pub args: Vec<String>,
    pub rows: u16,
    pub cols: u16,
    pub tracker: TrackerParams,
    /// Accept user submissions while the screen is still changing instead of
    /// rejecting them with a conflict.
    pub allow_busy_submissions: bool,
}

impl SessionConfig {
    pub fn new(agent: AgentType, program: impl Into<String>) -> Self {
        Self {
            agent,
            program: program.into(),
            args: Vec::new(),
            rows: 30,
            cols: 120,
            tracker: TrackerParams::default(),
            allow_busy_submissions: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("agent is busy; retry after the next stable status")]
    Busy,
    #[error("agent has terminated")]
    Terminated,
}

struct SessionState {
    transcript: Transcript,
    status: AgentStatus,
}

pub struct AgentSession {
    pty: PtyProcess,
    screen: Mutex<Screen>,
    state: Mutex<SessionState>,
    bus: EventBus,
    rules: FormatRules,
    tracker_params: TrackerParams,
    allow_busy_submissions: bool,
    resized: AtomicBool,
    // Serializes user submissions so PTY write order matches transcript
    // order.
    submit_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl AgentSession {
    /// Spawn the agent and start the pump task that feeds the screen.
    /// The snapshot loop is started separately via [`run_snapshot_loop`].
    ///
    /// [`run_snapshot_loop`]: Self::run_snapshot_loop
    pub fn start(config: SessionConfig) -> Result<Arc<Self>> {
        let (pty, mut output_rx) =
            PtyProcess::spawn(&config.program, &config.args, config.rows, config.cols)?;
        let (shutdown_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            pty,
            screen: Mutex::new(Screen::new(config.rows, config.cols)),
            state: Mutex::new(SessionState {
                transcript: Transcript::new(),
                status: AgentStatus::Initializing,
            }),
            bus: EventBus::new(DEFAULT_SUBSCRIBER_CAPACITY),
            rules: rules_for(config.agent),
            tracker_params: config.tracker,
            allow_busy_submissions: config.allow_busy_submissions,
            resized: AtomicBool::new(false),
            submit_lock: Mutex::new(()),
            shutdown_tx,
        });

        let pump = Arc::clone(&session);
        tokio::spawn(async move {
            while let Some(chunk) = output_rx.recv().await {
                pump.screen.lock().process(&chunk);
            }
            tracing::debug!(
                target = "agent_console::session",
                "pty output stream closed"
            );
        });

        tracing::info!(
            target = "agent_console::session",
            program = %config.program,
            rows = config.rows,
            cols = config.cols,
            "agent session started"
        );
        Ok(session)
    }

    /// Drive the tracker at the sampling period until shutdown or child exit.
    /// Deduped samples flow into the segmenter; status transitions and
    /// message updates are published to the bus.
    pub async fn run_snapshot_loop(self: Arc<Self>) {
        let mut tracker = ScreenTracker::new(self.tracker_params);
        let mut interval = tokio::time::interval(self.tracker_params.sampling_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            if self.pty.has_exited() {
                if tracker.mark_terminated() {
                    let mut state = self.state.lock();
                    state.status = AgentStatus::Terminated;
                    self.bus.publish(&BusEvent::StatusChange(AgentStatus::Terminated));
                }
                tracing::info!(
                    target = "agent_console::session",
                    "agent exited, closing event streams"
                );
                self.bus.close_all();
                break;
            }

            if self.resized.swap(false, Ordering::Relaxed) {
                tracker.note_resize();
            }

            let snapshot = self.screen.lock().snapshot();
            let tick = tracker.observe(&snapshot, Instant::now());

            if tick.text_changed && tick.status != AgentStatus::Initializing {
                let mut state = self.state.lock();
                if let Some(message) = state.transcript.apply_snapshot(&snapshot.text, &self.rules)
                {
                    self.bus.publish(&BusEvent::MessageUpdate(message));
                }
            }

            if tick.status_changed {
                let mut state = self.state.lock();
                state.status = tick.status;
                self.bus.publish(&BusEvent::StatusChange(tick.status));
            }
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    /// Point-in-time copy of the transcript, raw input excluded by
    /// construction.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().transcript.to_vec()
    }

    pub fn screen_snapshot(&self) -> ScreenSnapshot {
        self.screen.lock().snapshot()
    }

    /// Submission protocol for a user turn: conflict check, the content plus
    /// CR down the PTY, then the transcript append. The write goes first so
    /// a child that died between snapshot ticks cannot leave a user message
    /// in the transcript (and on subscriber streams) that the agent never
    /// received.
    pub fn submit_user(&self, content: &str) -> Result<Message, SubmitError> {
        let _turn = self.submit_lock.lock();

        match self.status() {
            AgentStatus::Terminated => return Err(SubmitError::Terminated),
            AgentStatus::Changing if !self.allow_busy_submissions => {
                return Err(SubmitError::Busy)
            }
            _ => {}
        }

        let mut bytes = content.as_bytes().to_vec();
        bytes.push(b'\r');
        if let Err(error) = self.pty.write_all(&bytes) {
            // A failed write means the child is gone even if the tracker has
            // not ticked yet.
            tracing::warn!(
                target = "agent_console::session",
                %error,
                "user submission write failed"
            );
            return Err(SubmitError::Terminated);
        }

        let mut state = self.state.lock();
        let message = state.transcript.push_user(content);
        self.bus.publish(&BusEvent::MessageUpdate(message.clone()));
        Ok(message)
    }

    /// Keystroke passthrough: bytes go to the PTY verbatim, nothing is
    /// appended, and the transcript is untouched.
    pub fn write_raw(&self, content: &str) -> Result<()> {
        self.pty.write_all(content.as_bytes())
    }

    /// Atomically resize the PTY and the virtual screen. The tracker ring is
    /// invalidated on the next tick.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.pty.resize(rows, cols)?;
        self.screen.lock().resize(rows, cols);
        self.resized.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Attach a subscriber: current transcript and status first, live events
    /// after.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<BusEvent>) {
        let state = self.state.lock();
        let mut bootstrap: Vec<BusEvent> = state
            .transcript
            .messages()
            .iter()
            .cloned()
            .map(BusEvent::MessageUpdate)
            .collect();
        bootstrap.push(BusEvent::StatusChange(state.status));
        self.bus.subscribe(bootstrap)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.bus.remove(id);
    }

    /// Teardown in reverse of construction: stop the snapshot loop, end the
    /// event streams, then close the PTY child within the grace period.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        self.bus.close_all();
        self.pty.close(grace).await;
    }
}
