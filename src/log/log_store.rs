//! Channel tree over a shared [LogBuffer].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use super::{LogBuffer, LogLevel, LogLine};

#[derive(Debug)]
struct ChannelNode {
  name: String,
  parent: Option<Uuid>,
  children: Vec<Uuid>,
  discarded: Arc<AtomicBool>,
}

#[derive(Debug)]
struct StoreInner {
  buffer: LogBuffer,
  level: LogLevel,
  channels: Mutex<HashMap<Uuid, ChannelNode>>,
}

impl StoreInner {
  fn channels(&self) -> MutexGuard<'_, HashMap<Uuid, ChannelNode>> {
    self.channels.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn register(&self, name: String, parent: Option<Uuid>) -> (Uuid, Arc<AtomicBool>) {
    let id = Uuid::new_v4();
    let discarded = Arc::new(AtomicBool::new(false));
    let mut channels = self.channels();
    if let Some(pid) = parent {
      match channels.get_mut(&pid) {
        Some(p) => p.children.push(id),
        // Parent already discarded: the child is born discarded.
        None => discarded.store(true, Ordering::SeqCst),
      }
    }
    if !discarded.load(Ordering::SeqCst) {
      channels.insert(
        id,
        ChannelNode {
          name,
          parent,
          children: Vec::new(),
          discarded: Arc::clone(&discarded),
        },
      );
    }
    (id, discarded)
  }

  fn subtree(channels: &HashMap<Uuid, ChannelNode>, id: Uuid) -> HashSet<Uuid> {
    let mut out = HashSet::new();
    let mut stack = vec![id];
    while let Some(cur) = stack.pop() {
      if let Some(node) = channels.get(&cur)
        && out.insert(cur)
      {
        stack.extend(node.children.iter().copied());
      }
    }
    out
  }
}

/// Owner of one run's log channels and their buffer.
#[derive(Debug, Clone)]
pub struct LogStore {
  inner: Arc<StoreInner>,
}

impl LogStore {
  /// A store buffering lines up to [LogLevel::Basic].
  pub fn new(capacity: usize) -> Self {
    Self::with_level(capacity, LogLevel::Basic)
  }

  /// A store buffering lines at `level` or less verbose.
  pub fn with_level(capacity: usize, level: LogLevel) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        buffer: LogBuffer::new(capacity),
        level,
        channels: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn level(&self) -> LogLevel {
    self.inner.level
  }

  pub fn buffer(&self) -> &LogBuffer {
    &self.inner.buffer
  }

  /// Registers a top-level channel.
  pub fn root(&self, name: impl Into<String>) -> LogChannel {
    LogChannel::register(&self.inner, name.into(), None)
  }

  /// Live (not discarded) channels.
  pub fn channel_count(&self) -> usize {
    self.inner.channels().len()
  }

  /// Name a live channel was registered under.
  pub fn channel_name(&self, id: Uuid) -> Option<String> {
    self.inner.channels().get(&id).map(|n| n.name.clone())
  }

  /// Ids of live channels registered under `name`.
  pub fn find_channels(&self, name: &str) -> Vec<Uuid> {
    self
      .inner
      .channels()
      .iter()
      .filter(|(_, n)| n.name == name)
      .map(|(id, _)| *id)
      .collect()
  }

  pub fn contains(&self, id: Uuid) -> bool {
    self.inner.channels().contains_key(&id)
  }

  /// Child channel ids of `id`, in registration order.
  pub fn children_of(&self, id: Uuid) -> Vec<Uuid> {
    self
      .inner
      .channels()
      .get(&id)
      .map(|n| n.children.clone())
      .unwrap_or_default()
  }

  /// Buffered lines of `id`, optionally including all its descendants.
  pub fn channel_lines(&self, id: Uuid, include_children: bool) -> Vec<LogLine> {
    let ids = {
      let channels = self.inner.channels();
      if include_children {
        StoreInner::subtree(&channels, id)
      } else {
        HashSet::from([id])
      }
    };
    self.inner.buffer.lines_for(&ids)
  }

  /// Discards a channel and its descendants together with their buffered
  /// lines. Lines of other channels are untouched. Returns the number of
  /// lines removed.
  pub fn discard(&self, id: Uuid) -> usize {
    let ids = {
      let mut channels = self.inner.channels();
      let parent = channels.get(&id).and_then(|n| n.parent);
      let ids = StoreInner::subtree(&channels, id);
      for cid in &ids {
        if let Some(node) = channels.remove(cid) {
          node.discarded.store(true, Ordering::SeqCst);
        }
      }
      if let Some(p) = parent.and_then(|p| channels.get_mut(&p)) {
        p.children.retain(|c| *c != id);
      }
      ids
    };
    // Flags are set before the buffer lock is taken, so no line of these
    // channels can be appended after the removal below.
    self.inner.buffer.remove_channels(&ids)
  }

  /// Drops every channel and line. Handles stay usable but no longer buffer.
  pub fn dispose(&self) {
    let mut channels = self.inner.channels();
    for node in channels.values() {
      node.discarded.store(true, Ordering::SeqCst);
    }
    channels.clear();
    drop(channels);
    self.inner.buffer.clear();
  }
}

/// Cheap, cloneable logging handle for one channel.
#[derive(Debug, Clone)]
pub struct LogChannel {
  id: Uuid,
  name: String,
  discarded: Arc<AtomicBool>,
  store: Arc<StoreInner>,
}

impl LogChannel {
  fn register(store: &Arc<StoreInner>, name: String, parent: Option<Uuid>) -> Self {
    let (id, discarded) = store.register(name.clone(), parent);
    Self {
      id,
      name,
      discarded,
      store: Arc::clone(store),
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Registers a child channel under this one.
  pub fn child(&self, name: impl Into<String>) -> LogChannel {
    LogChannel::register(&self.store, name.into(), Some(self.id))
  }

  pub fn is_discarded(&self) -> bool {
    self.discarded.load(Ordering::SeqCst)
  }

  /// Whether a line at `level` would be buffered.
  pub fn is_enabled(&self, level: LogLevel) -> bool {
    level <= self.store.level
  }

  /// Mirrors the line to `tracing` and buffers it unless the channel was
  /// discarded or `level` is more verbose than the store level.
  pub fn log(&self, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    match level {
      LogLevel::Error => error!(channel = %self.name, "{}", message),
      LogLevel::Minimal | LogLevel::Basic => info!(channel = %self.name, "{}", message),
      LogLevel::Detailed | LogLevel::Debug => debug!(channel = %self.name, "{}", message),
      LogLevel::RowLevel => trace!(channel = %self.name, "{}", message),
    }
    if !self.is_enabled(level) {
      return;
    }
    let line = LogLine {
      nr: 0,
      channel_id: self.id,
      channel: self.name.clone(),
      level,
      timestamp: Utc::now(),
      message,
    };
    let discarded = &self.discarded;
    self
      .store
      .buffer
      .push_if(line, || !discarded.load(Ordering::SeqCst));
  }

  pub fn error(&self, message: impl Into<String>) {
    self.log(LogLevel::Error, message);
  }

  pub fn minimal(&self, message: impl Into<String>) {
    self.log(LogLevel::Minimal, message);
  }

  pub fn basic(&self, message: impl Into<String>) {
    self.log(LogLevel::Basic, message);
  }

  pub fn detailed(&self, message: impl Into<String>) {
    self.log(LogLevel::Detailed, message);
  }

  pub fn debug(&self, message: impl Into<String>) {
    self.log(LogLevel::Debug, message);
  }

  pub fn row_level(&self, message: impl Into<String>) {
    self.log(LogLevel::RowLevel, message);
  }

  /// Buffered lines of this channel only.
  pub fn lines(&self) -> Vec<LogLine> {
    self.store.buffer.lines_for(&HashSet::from([self.id]))
  }
}
