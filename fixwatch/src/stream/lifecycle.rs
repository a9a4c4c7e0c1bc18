//! Fix lifecycle state machine driven by stream control events.

use fixwatch_proto::fix::{ExecutionState, FixStatus};
use fixwatch_proto::stream::ControlEvent;

/// Notification emitted by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The preview server reported ready.
    ServerStarted { url: String },
    /// A fix attempt began.
    FixStarted { attempt: u32 },
    /// The current fix succeeded.
    FixCompleted,
    /// The current fix failed. `exhausted` is set once no attempts remain.
    FixFailed { reason: String, exhausted: bool },
    /// The container's health check failed. No state changes.
    HealthCheckFailed { reason: String },
}

/// Client-side view of a project's execution and remediation.
///
/// `max_fix_attempts` is informational. It decides whether a failed fix is
/// shown as `failed` or `exhausted`; the backend decides whether another
/// attempt actually happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixLifecycle {
    pub fix_status: FixStatus,
    pub execution_state: ExecutionState,
    pub fix_attempt: u32,
    pub max_fix_attempts: u32,
    pub server_started: bool,
    pub preview_url: Option<String>,
    pub last_failure: Option<String>,
}

impl Default for FixLifecycle {
    fn default() -> Self {
        Self::new(3)
    }
}

impl FixLifecycle {
    #[must_use]
    pub const fn new(max_fix_attempts: u32) -> Self {
        Self {
            fix_status: FixStatus::Idle,
            execution_state: ExecutionState::Pending,
            fix_attempt: 0,
            max_fix_attempts,
            server_started: false,
            preview_url: None,
            last_failure: None,
        }
    }

    /// Applies one control event and returns the notification it raises.
    pub fn apply(&mut self, event: ControlEvent) -> Option<LifecycleEvent> {
        match event {
            ControlEvent::PreviewReady(url) => {
                self.server_started = true;
                self.execution_state = ExecutionState::Success;
                self.set_preview_url(&url);
                Some(LifecycleEvent::ServerStarted { url })
            }
            ControlEvent::ServerStarted(url) | ControlEvent::PreviewUrl(url) => {
                self.set_preview_url(&url);
                None
            }
            ControlEvent::FixStarting => {
                self.fix_status = FixStatus::Fixing;
                self.execution_state = ExecutionState::Fixing;
                self.fix_attempt = self.fix_attempt.saturating_add(1);
                Some(LifecycleEvent::FixStarted {
                    attempt: self.fix_attempt,
                })
            }
            ControlEvent::FixSuccess => {
                self.fix_status = FixStatus::Success;
                self.execution_state = ExecutionState::Fixed;
                self.last_failure = None;
                Some(LifecycleEvent::FixCompleted)
            }
            ControlEvent::FixFailed(reason) => {
                let exhausted = self.fix_attempt >= self.max_fix_attempts;
                self.fix_status = FixStatus::Failed;
                self.execution_state = if exhausted {
                    ExecutionState::Exhausted
                } else {
                    ExecutionState::Failed
                };
                self.last_failure = Some(reason.clone());
                Some(LifecycleEvent::FixFailed { reason, exhausted })
            }
            ControlEvent::FixExhausted => {
                self.fix_status = FixStatus::Exhausted;
                self.execution_state = ExecutionState::Exhausted;
                let reason = "fix attempts exhausted".to_string();
                self.last_failure = Some(reason.clone());
                Some(LifecycleEvent::FixFailed {
                    reason,
                    exhausted: true,
                })
            }
            ControlEvent::ValidationFailed(files) => {
                self.fix_status = FixStatus::Failed;
                self.execution_state = ExecutionState::Failed;
                let reason = if files.is_empty() {
                    "validation failed".to_string()
                } else {
                    format!("validation failed: {files}")
                };
                self.last_failure = Some(reason.clone());
                Some(LifecycleEvent::FixFailed {
                    reason,
                    exhausted: false,
                })
            }
            ControlEvent::HealthCheckFailed(reason) => {
                Some(LifecycleEvent::HealthCheckFailed { reason })
            }
            ControlEvent::Error(message) => {
                self.execution_state = ExecutionState::Failed;
                self.last_failure = Some(message);
                None
            }
        }
    }

    /// Marks a new execution as running.
    pub const fn begin_execution(&mut self) {
        self.execution_state = ExecutionState::Running;
        self.server_started = false;
    }

    /// Clears fix counters and execution state. `max_fix_attempts` is kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_fix_attempts);
    }

    fn set_preview_url(&mut self, url: &str) {
        if !url.is_empty() {
            self.preview_url = Some(url.to_string());
        }
    }
}
