//! The per-session state machine shared by search and match fallback:
//! `idle -> running -> completed` (terminal) or `running -> failed`
//! (terminal). `running` sessions expose a synthetic, time-based
//! progress to pollers rather than a real completion percentage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress is capped below 100% while running so a poller never
/// mistakes "still working" for "done" before the session transitions.
const RUNNING_PROGRESS_CAP: u8 = 95;

/// How long an in-flight session takes to approach the progress cap;
/// progress is derived from elapsed wall-clock time, not real work units.
const ASSUMED_DURATION_SECS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Completed,
    Failed,
}

/// A cached fallback session, keyed by `(token, query-hash)` for search
/// or by `(title, season, episode)` for match dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSession<T> {
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> FallbackSession<T> {
    pub fn running() -> Self {
        Self {
            state: SessionState::Running,
            started_at: Utc::now(),
            result: None,
            error: None,
        }
    }

    pub fn completed(result: T) -> Self {
        Self {
            state: SessionState::Completed,
            started_at: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: SessionState::Failed,
            started_at: Utc::now(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Synthetic progress for a `running` session: elapsed-time-based,
    /// capped so pollers never see 100% before the real transition.
    pub fn synthetic_progress(&self) -> u8 {
        if self.state != SessionState::Running {
            return 100;
        }
        let elapsed = (Utc::now() - self.started_at).num_seconds().max(0);
        let fraction = (elapsed as f64 / ASSUMED_DURATION_SECS as f64).min(1.0);
        (fraction * RUNNING_PROGRESS_CAP as f64) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_session_progress_never_reaches_cap_instantly() {
        let session: FallbackSession<()> = FallbackSession::running();
        assert!(session.synthetic_progress() < RUNNING_PROGRESS_CAP);
    }

    #[test]
    fn completed_session_reports_full_progress() {
        let session = FallbackSession::completed(42u32);
        assert_eq!(session.synthetic_progress(), 100);
    }

    #[test]
    fn progress_is_capped_even_long_after_start() {
        let mut session: FallbackSession<()> = FallbackSession::running();
        session.started_at = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(session.synthetic_progress(), RUNNING_PROGRESS_CAP);
    }
}
