//! Feed-assist parking supervision
//!
//! Parking pushes filament from a slot until it reaches the toolhead. The
//! device has no sensor for that, so arrival is inferred from its
//! feed-assist counter: the counter climbs while filament moves and stops
//! once it is blocked at the toolhead. A session completes after the counter
//! has risen at least once and then stayed put for `park_hit_count`
//! consecutive telemetry updates.
//!
//! ```text
//! Idle -> Requesting -> Monitoring -> Completed | Failed -> Idle
//! ```

use super::commands::AceCommand;
use crate::communication::{RequestDispatcher, ResponseReceiver};
use acelink_core::{DeviceTelemetry, OperationError, RequestError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

/// A session with no counter progress fails after this long
pub const NO_PROGRESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay of the re-check armed while a session waits for telemetry
pub const RECHECK_DELAY: Duration = Duration::from_millis(700);

/// Phase of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkingPhase {
    /// No session
    Idle,
    /// `start_feed_assist` sent, waiting for the acknowledgement
    Requesting,
    /// Watching the feed-assist counter
    Monitoring,
}

/// Why a session failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParkingFailure {
    /// The device rejected `start_feed_assist`
    #[error("feed assist rejected ({code}): {message}")]
    Rejected {
        /// Response code.
        code: i64,
        /// Device message.
        message: String,
    },

    /// `start_feed_assist` was never acknowledged
    #[error("feed assist not acknowledged: {0}")]
    NoAck(RequestError),

    /// The counter never moved within the progress window
    #[error("no feed progress after {elapsed_ms}ms")]
    NoProgress {
        /// Time since the session started.
        elapsed_ms: u64,
    },

    /// The counter settled without ever having moved
    #[error("counter stayed at {count}")]
    Stagnant {
        /// Counter value.
        count: i64,
    },

    /// The session was cancelled locally
    #[error("aborted")]
    Aborted,
}

/// Result of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParkingOutcome {
    /// Filament reached the toolhead
    Completed {
        /// Parked slot
        slot: u8,
    },
    /// The session gave up
    Failed {
        /// Slot that was being parked
        slot: u8,
        /// Failure reason
        reason: ParkingFailure,
    },
}

impl ParkingOutcome {
    /// Slot the session was for
    pub fn slot(&self) -> u8 {
        match self {
            ParkingOutcome::Completed { slot } | ParkingOutcome::Failed { slot, .. } => *slot,
        }
    }
}

/// State of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkingSession {
    /// Slot being parked
    pub slot: u8,
    /// Last counter value seen
    pub baseline_count: i64,
    /// Consecutive updates without a counter change
    pub stagnant_polls: u32,
    /// Whether the counter has risen since monitoring began
    pub progress_seen: bool,
    /// When the session started
    pub started_at: Instant,
}

/// Parking state machine
#[derive(Debug)]
pub struct ParkingSupervisor {
    hit_threshold: u32,
    phase: ParkingPhase,
    session: Option<ParkingSession>,
    ack: Option<ResponseReceiver>,
    recheck_at: Option<Instant>,
    failed: bool,
    last_outcome: Option<ParkingOutcome>,
}

impl ParkingSupervisor {
    /// Create an idle supervisor
    pub fn new(hit_threshold: u32) -> Self {
        Self {
            hit_threshold: hit_threshold.max(1),
            phase: ParkingPhase::Idle,
            session: None,
            ack: None,
            recheck_at: None,
            failed: false,
            last_outcome: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ParkingPhase {
        self.phase
    }

    /// True while a session is in progress
    pub fn is_active(&self) -> bool {
        self.phase != ParkingPhase::Idle
    }

    /// True when the most recent session failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// The session in progress
    pub fn session(&self) -> Option<&ParkingSession> {
        self.session.as_ref()
    }

    /// How the most recent session ended
    pub fn last_outcome(&self) -> Option<&ParkingOutcome> {
        self.last_outcome.as_ref()
    }

    /// Pending re-check deadline
    pub fn recheck_at(&self) -> Option<Instant> {
        self.recheck_at
    }

    /// Start parking `slot`
    pub fn start(
        &mut self,
        slot: u8,
        now: Instant,
        dispatcher: &mut RequestDispatcher,
    ) -> Result<(), OperationError> {
        if let Some(session) = &self.session {
            return Err(OperationError::Busy { slot: session.slot });
        }

        tracing::info!("Starting parking for slot {}", slot);
        self.session = Some(ParkingSession {
            slot,
            baseline_count: 0,
            stagnant_polls: 0,
            progress_seen: false,
            started_at: now,
        });
        self.phase = ParkingPhase::Requesting;
        self.failed = false;
        self.last_outcome = None;
        self.recheck_at = None;

        let (_, ack) = dispatcher.submit_reply(AceCommand::StartFeedAssist { index: slot }.into());
        self.ack = Some(ack);
        Ok(())
    }

    /// Feed a telemetry update
    pub fn on_update(
        &mut self,
        now: Instant,
        telemetry: &DeviceTelemetry,
        dispatcher: &mut RequestDispatcher,
    ) -> Option<ParkingOutcome> {
        match self.phase {
            ParkingPhase::Idle => None,
            ParkingPhase::Requesting => self.poll_ack(telemetry),
            ParkingPhase::Monitoring => self.inspect(now, telemetry.feed_assist_count, dispatcher),
        }
    }

    /// Advance without new telemetry: check the acknowledgement and any due
    /// re-check
    pub fn on_tick(&mut self, now: Instant, telemetry: &DeviceTelemetry) -> Option<ParkingOutcome> {
        match self.phase {
            ParkingPhase::Idle => None,
            ParkingPhase::Requesting => self.poll_ack(telemetry),
            ParkingPhase::Monitoring => {
                let due = self.recheck_at.is_some_and(|at| now >= at);
                if !due {
                    return None;
                }
                self.recheck_at = None;
                let session = self.session.as_ref()?;
                let elapsed = now.saturating_duration_since(session.started_at);
                if elapsed > NO_PROGRESS_TIMEOUT && !session.progress_seen {
                    return Some(self.fail(ParkingFailure::NoProgress {
                        elapsed_ms: elapsed.as_millis() as u64,
                    }));
                }
                None
            }
        }
    }

    /// Cancel the active session
    pub fn abort(&mut self) -> Option<ParkingOutcome> {
        if !self.is_active() {
            return None;
        }
        Some(self.fail(ParkingFailure::Aborted))
    }

    fn poll_ack(&mut self, telemetry: &DeviceTelemetry) -> Option<ParkingOutcome> {
        let received = self.ack.as_mut()?.try_recv();
        let response = match received {
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => {
                return Some(self.fail(ParkingFailure::NoAck(RequestError::Cancelled)))
            }
            Ok(Err(e)) => return Some(self.fail(ParkingFailure::NoAck(e))),
            Ok(Ok(response)) => response,
        };
        self.ack = None;

        if !response.is_ok() {
            let message = response.error_message();
            tracing::error!("Error starting feed assist: {}", message);
            return Some(self.fail(ParkingFailure::Rejected {
                code: response.code,
                message,
            }));
        }

        let baseline = response
            .result_i64("feed_assist_count")
            .unwrap_or(telemetry.feed_assist_count);
        let session = self.session.as_mut()?;
        session.baseline_count = baseline;
        session.stagnant_polls = 0;
        session.progress_seen = false;
        self.phase = ParkingPhase::Monitoring;
        tracing::info!(
            "Feed assist started for slot {}, count: {}",
            session.slot,
            baseline
        );
        None
    }

    fn inspect(
        &mut self,
        now: Instant,
        count: i64,
        dispatcher: &mut RequestDispatcher,
    ) -> Option<ParkingOutcome> {
        let threshold = self.hit_threshold;
        let session = self.session.as_mut()?;

        if count != session.baseline_count {
            session.stagnant_polls = 0;
            session.baseline_count = count;
            if count > 0 {
                if !session.progress_seen {
                    tracing::info!("Feed assist working for slot {}, count: {}", session.slot, count);
                }
                session.progress_seen = true;
            }
        } else {
            session.stagnant_polls += 1;
            tracing::debug!(
                "Parking slot {}: count {} unchanged ({}/{})",
                session.slot,
                count,
                session.stagnant_polls,
                threshold
            );
        }

        let elapsed = now.saturating_duration_since(session.started_at);
        if elapsed > NO_PROGRESS_TIMEOUT && !session.progress_seen {
            return Some(self.fail(ParkingFailure::NoProgress {
                elapsed_ms: elapsed.as_millis() as u64,
            }));
        }

        if session.stagnant_polls >= threshold {
            if session.progress_seen {
                return Some(self.complete(dispatcher));
            }
            return Some(self.fail(ParkingFailure::Stagnant { count }));
        }

        if self.recheck_at.is_none() {
            self.recheck_at = Some(now + RECHECK_DELAY);
        }
        None
    }

    fn complete(&mut self, dispatcher: &mut RequestDispatcher) -> ParkingOutcome {
        let slot = self.reset();
        dispatcher.submit_detached(AceCommand::StopFeedAssist { index: slot }.into());
        tracing::info!("Parking completed for slot {}", slot);

        let outcome = ParkingOutcome::Completed { slot };
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn fail(&mut self, reason: ParkingFailure) -> ParkingOutcome {
        let slot = self.reset();
        self.failed = true;
        tracing::error!("Parking failed for slot {}: {}", slot, reason);

        let outcome = ParkingOutcome::Failed { slot, reason };
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn reset(&mut self) -> u8 {
        let slot = self.session.take().map(|s| s.slot).unwrap_or_default();
        self.phase = ParkingPhase::Idle;
        self.ack = None;
        self.recheck_at = None;
        slot
    }
}
