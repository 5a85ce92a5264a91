//! In-memory store of completed registrations that still await delivery.
//!
//! Records are keyed by id; a per-chat index keeps the ids in insertion order so retries
//! deliver a chat's registrations in the order they were made.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::models::Registration;

pub trait Keyed {
  fn key(&self) -> &str;
}

impl Keyed for Registration {
  fn key(&self) -> &str {
    &self.id
  }
}

/// Serializable copy of the store used for on-disk persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot<R> {
  pub records: Vec<R>,
  pub pending: BTreeMap<i64, Vec<String>>,
}

impl<R> Default for Snapshot<R> {
  fn default() -> Self {
    Self {
      records: Vec::new(),
      pending: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  pub delivered: usize,
  pub remaining: usize,
}

struct Inner<R> {
  records: HashMap<String, R>,
  pending: BTreeMap<i64, Vec<String>>,
  revision: u64,
}

pub struct PendingStore<R> {
  inner: Mutex<Inner<R>>,
}

impl<R> Default for PendingStore<R> {
  fn default() -> Self {
    Self {
      inner: Mutex::new(Inner {
        records: HashMap::new(),
        pending: BTreeMap::new(),
        revision: 0,
      }),
    }
  }
}

impl<R: Keyed + Clone> PendingStore<R> {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner<R>> {
    // A panic while holding the lock cannot leave the maps half-updated, so keep going.
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Stores the record (overwriting any record with the same id) and queues its id for the chat.
  pub fn put(&self, chat_id: i64, record: R) {
    let mut inner = self.lock();
    let id = record.key().to_string();
    inner.records.insert(id.clone(), record);
    inner.pending.entry(chat_id).or_default().push(id);
    inner.revision += 1;
  }

  pub fn get(&self, id: &str) -> Option<R> {
    self.lock().records.get(id).cloned()
  }

  /// Replaces a record that is still stored without touching any queue.
  ///
  /// Returns `false` when the record is gone, e.g. delivered or cleared in the meantime.
  pub fn update(&self, record: R) -> bool {
    let mut inner = self.lock();
    let Some(stored) = inner.records.get_mut(record.key()) else {
      return false;
    };
    *stored = record;
    inner.revision += 1;
    true
  }

  /// Removes one occurrence of `id` from the chat's queue (if it is there) and then the record.
  ///
  /// No-op returning `false` when the chat has nothing queued. The record survives only while
  /// another chat still queues the same id, so every queued id keeps its record.
  pub fn delete(&self, id: &str, chat_id: i64) -> bool {
    let mut inner = self.lock();
    let Some(ids) = inner.pending.get_mut(&chat_id) else {
      return false;
    };
    if let Some(position) = ids.iter().position(|queued| queued == id) {
      ids.remove(position);
    }
    if ids.is_empty() {
      inner.pending.remove(&chat_id);
    }
    let still_queued = inner.pending.values().any(|ids| ids.iter().any(|queued| queued == id));
    if !still_queued {
      inner.records.remove(id);
    }
    inner.revision += 1;
    true
  }

  pub fn list_pending_by_chat(&self) -> BTreeMap<i64, Vec<String>> {
    self.lock().pending.clone()
  }

  pub fn pending_for(&self, chat_id: i64) -> Vec<String> {
    self.lock().pending.get(&chat_id).cloned().unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.lock().records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().records.is_empty()
  }

  /// Bumped on every mutation; lets the snapshot task skip unchanged stores.
  pub fn revision(&self) -> u64 {
    self.lock().revision
  }

  /// Drops every record and queue. Returns how many records were dropped.
  pub fn clear(&self) -> usize {
    let mut inner = self.lock();
    let dropped = inner.records.len();
    inner.records.clear();
    inner.pending.clear();
    inner.revision += 1;
    dropped
  }

  /// Delivers one chat's queue in order, stopping at the first failure.
  pub async fn flush_chat<F, Fut>(&self, chat_id: i64, mut deliver: F) -> FlushReport
  where
    F: FnMut(R) -> Fut,
    Fut: Future<Output = bool>,
  {
    let ids = self.pending_for(chat_id);
    let mut report = FlushReport::default();
    for (index, id) in ids.iter().enumerate() {
      let Some(record) = self.get(id) else {
        warn!(chat_id, registration_id = %id, "queued id has no record, dropping it");
        self.delete(id, chat_id);
        continue;
      };
      if deliver(record).await {
        self.delete(id, chat_id);
        report.delivered += 1;
      } else {
        report.remaining = ids.len() - index;
        info!(chat_id, registration_id = %id, remaining = report.remaining, "delivery failed, keeping the rest queued");
        break;
      }
    }
    report
  }

  /// Runs [`Self::flush_chat`] for every chat with queued records.
  pub async fn flush_all<F, Fut>(&self, mut deliver: F) -> FlushReport
  where
    F: FnMut(R) -> Fut,
    Fut: Future<Output = bool>,
  {
    let mut total = FlushReport::default();
    let chats: Vec<i64> = self.list_pending_by_chat().into_keys().collect();
    for chat_id in chats {
      let report = self.flush_chat(chat_id, &mut deliver).await;
      total.delivered += report.delivered;
      total.remaining += report.remaining;
    }
    total
  }

  pub fn snapshot(&self) -> Snapshot<R> {
    let inner = self.lock();
    Snapshot {
      records: inner.records.values().cloned().collect(),
      pending: inner.pending.clone(),
    }
  }

  /// Replaces the contents with `snapshot`, discarding entries that break the index invariant.
  pub fn restore(&self, snapshot: Snapshot<R>) {
    let mut records: HashMap<String, R> = snapshot
      .records
      .into_iter()
      .map(|record| (record.key().to_string(), record))
      .collect();
    let mut pending = BTreeMap::new();
    for (chat_id, ids) in snapshot.pending {
      let (known, orphaned): (Vec<String>, Vec<String>) = ids.into_iter().partition(|id| records.contains_key(id));
      for id in orphaned {
        warn!(chat_id, registration_id = %id, "snapshot queue references a missing record");
      }
      if !known.is_empty() {
        pending.insert(chat_id, known);
      }
    }
    records.retain(|id, _| {
      let queued = pending.values().any(|ids: &Vec<String>| ids.contains(id));
      if !queued {
        warn!(registration_id = %id, "snapshot record is not queued for any chat, dropping it");
      }
      queued
    });

    let mut inner = self.lock();
    inner.records = records;
    inner.pending = pending;
    inner.revision += 1;
  }
}
