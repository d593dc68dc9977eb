//! Process-wide listen and trigger state

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::Error;

/// Which action a trigger routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Speak the remainder back verbatim
    Say,
    /// Send the remainder to the completion provider and speak the reply
    Completion,
    /// Store the remainder for later retrieval
    Command,
}

impl TriggerKind {
    /// All kinds in dispatch-priority order (Say > Completion > Command)
    pub const ALL: [Self; 3] = [Self::Say, Self::Completion, Self::Command];

    /// Tie-break rank; lower wins
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Say => 0,
            Self::Completion => 1,
            Self::Command => 2,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Say => "say",
            Self::Completion => "completion",
            Self::Command => "command",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "say" => Ok(Self::Say),
            "completion" => Ok(Self::Completion),
            "command" => Ok(Self::Command),
            other => Err(Error::InvalidRequest(format!(
                "unknown trigger kind: {other}"
            ))),
        }
    }
}

/// A one-shot trigger waiting for the next transcript
#[derive(Debug, Clone, Copy)]
struct PendingTrigger {
    kind: TriggerKind,
    armed_at: Instant,
}

/// Listen-mode state: background flag plus at most one pending one-shot
///
/// Arming while a one-shot is already pending overwrites it; one-shots
/// never queue.
#[derive(Debug)]
pub struct ListenState {
    background_enabled: bool,
    pending: Option<PendingTrigger>,
    one_shot_timeout: Duration,
}

/// Shared handle to [`ListenState`]
///
/// The single mutual-exclusion boundary for all trigger-state updates:
/// the dispatcher consumes pending triggers and the `listen_trigger` /
/// reconfigure entry points arm and reconfigure through the same lock,
/// so a consume can never race a concurrent arm.
#[derive(Debug, Clone)]
pub struct SharedListenState {
    inner: Arc<Mutex<ListenState>>,
}

impl SharedListenState {
    #[must_use]
    pub fn new(background_enabled: bool, one_shot_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenState {
                background_enabled,
                pending: None,
                one_shot_timeout,
            })),
        }
    }

    /// Arm a one-shot trigger for the next transcript, replacing any pending one
    pub fn arm(&self, kind: TriggerKind) {
        let mut state = self.lock();
        if let Some(prev) = state.pending.replace(PendingTrigger {
            kind,
            armed_at: Instant::now(),
        }) {
            tracing::debug!(previous = %prev.kind, new = %kind, "replaced pending one-shot trigger");
        } else {
            tracing::debug!(kind = %kind, "armed one-shot trigger");
        }
    }

    /// Consume the pending one-shot trigger, if one is armed and fresh
    ///
    /// An expired pending trigger is dropped here rather than firing on
    /// stale speech.
    pub fn take_pending(&self) -> Option<TriggerKind> {
        let mut state = self.lock();
        let timeout = state.one_shot_timeout;
        match state.pending.take() {
            Some(p) if p.armed_at.elapsed() > timeout => {
                tracing::debug!(kind = %p.kind, "pending one-shot trigger expired");
                None
            }
            Some(p) => Some(p.kind),
            None => None,
        }
    }

    /// Whether a fresh one-shot trigger is pending
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let state = self.lock();
        state
            .pending
            .is_some_and(|p| p.armed_at.elapsed() <= state.one_shot_timeout)
    }

    /// Whether transcripts should be produced at all right now
    #[must_use]
    pub fn is_active(&self) -> bool {
        let state = self.lock();
        state.background_enabled
            || state
                .pending
                .is_some_and(|p| p.armed_at.elapsed() <= state.one_shot_timeout)
    }

    #[must_use]
    pub fn background_enabled(&self) -> bool {
        self.lock().background_enabled
    }

    /// Apply reconfigured listen parameters
    pub fn reconfigure(&self, background_enabled: bool, one_shot_timeout: Duration) {
        let mut state = self.lock();
        state.background_enabled = background_enabled;
        state.one_shot_timeout = one_shot_timeout;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenState> {
        // A panic while holding this lock is a bug in this module;
        // recover the state rather than poisoning the whole pipeline.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_overwrites_pending() {
        let state = SharedListenState::new(false, Duration::from_secs(30));
        state.arm(TriggerKind::Command);
        state.arm(TriggerKind::Say);

        assert_eq!(state.take_pending(), Some(TriggerKind::Say));
        assert_eq!(state.take_pending(), None);
    }

    #[test]
    fn expired_pending_is_dropped() {
        let state = SharedListenState::new(false, Duration::ZERO);
        state.arm(TriggerKind::Say);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(state.take_pending(), None);
        assert!(!state.is_active());
    }

    #[test]
    fn active_while_background_or_pending() {
        let state = SharedListenState::new(false, Duration::from_secs(30));
        assert!(!state.is_active());

        state.arm(TriggerKind::Completion);
        assert!(state.is_active());
        state.take_pending();
        assert!(!state.is_active());

        state.reconfigure(true, Duration::from_secs(30));
        assert!(state.is_active());
    }
}
