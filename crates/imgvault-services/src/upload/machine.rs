//! Upload state machine.
//!
//! ```text
//! Pending -> Optimizing -> Writing -> Succeeded
//!                             |  ^
//!                             v  |
//!                          RetryWait
//!                             |
//!                             v
//!                           Failed
//! ```
//!
//! The machine only decides; it never sleeps or writes. The coordinator performs the
//! side effect each state asks for and reports back.

use imgvault_core::{EngineError, RetrySettings, UploadAttempt};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    Optimizing,
    /// Write attempt `attempt` (1-based) is in flight.
    Writing { attempt: u32 },
    /// Attempt `attempt` failed transiently; wait `delay` before the next one.
    RetryWait { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Pending => "pending",
            UploadState::Optimizing => "optimizing",
            UploadState::Writing { .. } => "writing",
            UploadState::RetryWait { .. } => "retry_wait",
            UploadState::Succeeded { .. } => "succeeded",
            UploadState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Succeeded { .. } | UploadState::Failed { .. }
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid upload transition: {event} while {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl From<InvalidTransition> for EngineError {
    fn from(err: InvalidTransition) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

/// Per-upload state with a bounded attempt counter.
#[derive(Debug)]
pub struct UploadMachine {
    correlation_id: Uuid,
    retry: RetrySettings,
    state: UploadState,
    attempts: Vec<UploadAttempt>,
}

impl UploadMachine {
    pub fn new(correlation_id: Uuid, retry: RetrySettings) -> Self {
        Self {
            correlation_id,
            retry,
            state: UploadState::Pending,
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Attempts made so far, in order.
    pub fn attempts(&self) -> &[UploadAttempt] {
        &self.attempts
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    fn invalid(&self, event: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.state.name(),
            event,
        }
    }

    pub fn start_optimizing(&mut self) -> Result<&UploadState, InvalidTransition> {
        match self.state {
            UploadState::Pending => {
                self.state = UploadState::Optimizing;
                Ok(&self.state)
            }
            _ => Err(self.invalid("start_optimizing")),
        }
    }

    pub fn start_writing(&mut self) -> Result<&UploadState, InvalidTransition> {
        match self.state {
            UploadState::Optimizing => {
                self.state = UploadState::Writing { attempt: 1 };
                Ok(&self.state)
            }
            _ => Err(self.invalid("start_writing")),
        }
    }

    pub fn write_succeeded(&mut self) -> Result<&UploadState, InvalidTransition> {
        match self.state {
            UploadState::Writing { attempt } => {
                self.attempts
                    .push(UploadAttempt::succeeded(self.correlation_id, attempt));
                self.state = UploadState::Succeeded { attempts: attempt };
                Ok(&self.state)
            }
            _ => Err(self.invalid("write_succeeded")),
        }
    }

    /// Record a failed write. Transient failures move to `RetryWait` while attempts
    /// remain; everything else is terminal.
    pub fn write_failed(
        &mut self,
        transient: bool,
        error_kind: &str,
    ) -> Result<&UploadState, InvalidTransition> {
        let attempt = match self.state {
            UploadState::Writing { attempt } => attempt,
            _ => return Err(self.invalid("write_failed")),
        };
        self.attempts.push(UploadAttempt::failed(
            self.correlation_id,
            attempt,
            transient,
            error_kind,
        ));
        self.state = if transient && attempt < self.retry.max_attempts {
            UploadState::RetryWait {
                attempt,
                delay: self.retry.delay_after(attempt),
            }
        } else {
            UploadState::Failed { attempts: attempt }
        };
        Ok(&self.state)
    }

    pub fn resume(&mut self) -> Result<&UploadState, InvalidTransition> {
        match self.state {
            UploadState::RetryWait { attempt, .. } => {
                self.state = UploadState::Writing {
                    attempt: attempt + 1,
                };
                Ok(&self.state)
            }
            _ => Err(self.invalid("resume")),
        }
    }
}
