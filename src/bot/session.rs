use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

use crate::bot::messages::PollKind;
use crate::bot::state::Session;

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

fn lock_map<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-chat sessions, each behind its own async lock so one chat's events run one at a time.
#[derive(Default)]
pub struct SessionStore {
  sessions: Mutex<HashMap<i64, SessionHandle>>,
}

impl SessionStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_or_create(&self, chat_id: i64) -> SessionHandle {
    lock_map(&self.sessions)
      .entry(chat_id)
      .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::new(chat_id))))
      .clone()
  }

  pub fn get(&self, chat_id: i64) -> Option<SessionHandle> {
    lock_map(&self.sessions).get(&chat_id).cloned()
  }

  pub fn len(&self) -> usize {
    lock_map(&self.sessions).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Evicts sessions idle for longer than `ttl`. Sessions that are locked or whose handle is
  /// held elsewhere are in use and stay.
  pub fn sweep_idle(&self, now: Instant, ttl: Duration) -> usize {
    let mut sessions = lock_map(&self.sessions);
    let before = sessions.len();
    sessions.retain(|chat_id, handle| {
      if Arc::strong_count(handle) > 1 {
        return true;
      }
      let Ok(session) = handle.try_lock() else {
        return true;
      };
      let keep = now.saturating_duration_since(session.last_activity) <= ttl;
      if !keep {
        debug!(chat_id, stage = %session.stage, "evicting idle session");
      }
      keep
    });
    before - sessions.len()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPoll {
  pub chat_id: i64,
  pub kind: PollKind,
  pub sent_at: Instant,
}

/// Poll answers arrive without a chat, so every sent poll is remembered until it is answered.
#[derive(Default)]
pub struct PollIndex {
  polls: Mutex<HashMap<String, PendingPoll>>,
}

impl PollIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, poll_id: impl Into<String>, chat_id: i64, kind: PollKind) {
    lock_map(&self.polls).insert(
      poll_id.into(),
      PendingPoll {
        chat_id,
        kind,
        sent_at: Instant::now(),
      },
    );
  }

  /// Removes and returns the entry; an answered poll is never looked up again.
  pub fn take(&self, poll_id: &str) -> Option<PendingPoll> {
    lock_map(&self.polls).remove(poll_id)
  }

  pub fn len(&self) -> usize {
    lock_map(&self.polls).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn sweep(&self, now: Instant, ttl: Duration) -> usize {
    let mut polls = lock_map(&self.polls);
    let before = polls.len();
    polls.retain(|_, poll| now.saturating_duration_since(poll.sent_at) <= ttl);
    before - polls.len()
  }
}
