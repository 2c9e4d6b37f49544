//! Font identity cache: stable small ids for font face handles.
//!
//! Rendering and IPC want a compact `u32` per font rather than a shared
//! handle. This cache hands out ids on first sight of a face, answers
//! lookups in both directions, and retires entries that have not been
//! touched for a configurable number of frames and seconds.
//!
//! Recency is a doubly-linked list threaded through a slab, so promotion
//! and eviction are O(1). Promotion is idempotent within a frame: the
//! first touch moves an entry to the head, further touches in the same
//! frame are no-ops. All state sits behind a single mutex; subscription
//! callbacks run inside the critical section and must not call back into
//! the cache.

use crate::text::backend::{FaceKey, FontFace};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Stable identity of a cached font face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontId(pub u32);

/// Lifecycle notification delivered to subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontEvent {
  Added(FontId),
  Expired(FontId),
}

pub type FontEventCallback = Box<dyn FnMut(FontEvent) + Send>;

/// Minimum frame-count eviction threshold. A face always survives at
/// least this many frames after its last use.
const MIN_EXPIRE_FRAMES: u64 = 4;

const DEFAULT_EXPIRE_FRAMES: u64 = 60;
const DEFAULT_EXPIRE_SECONDS: f64 = 10.0;

struct Entry {
  id: FontId,
  face: FontFace,
  last_frame: u64,
  last_time: f64,
  newer: Option<usize>,
  older: Option<usize>,
}

struct Inner {
  entries: Vec<Option<Entry>>,
  free: Vec<usize>,
  by_face: FxHashMap<FaceKey, usize>,
  by_id: FxHashMap<u32, usize>,
  newest: Option<usize>,
  oldest: Option<usize>,
  next_id: u32,
  frame: u64,
  now: f64,
  bootstrapped: bool,
  expire_frames: u64,
  expire_seconds: f64,
  subscriptions: Vec<(String, FontEventCallback)>,
}

impl Inner {
  fn unlink(&mut self, idx: usize) {
    let (newer, older) = {
      let e = self.entries[idx].as_ref().expect("linked entry is live");
      (e.newer, e.older)
    };
    match newer {
      Some(n) => self.entries[n].as_mut().expect("live").older = older,
      None => self.newest = older,
    }
    match older {
      Some(o) => self.entries[o].as_mut().expect("live").newer = newer,
      None => self.oldest = newer,
    }
  }

  fn link_newest(&mut self, idx: usize) {
    let old_head = self.newest;
    {
      let e = self.entries[idx].as_mut().expect("live");
      e.newer = None;
      e.older = old_head;
    }
    if let Some(h) = old_head {
      self.entries[h].as_mut().expect("live").newer = Some(idx);
    }
    self.newest = Some(idx);
    if self.oldest.is_none() {
      self.oldest = Some(idx);
    }
  }

  /// Moves an entry to the recency head, at most once per frame.
  fn make_newest(&mut self, idx: usize) {
    let (frame, now) = (self.frame, self.now);
    {
      let e = self.entries[idx].as_mut().expect("live");
      if e.last_frame == frame && self.bootstrapped {
        return;
      }
      e.last_frame = frame;
      e.last_time = now;
    }
    if self.newest == Some(idx) {
      return;
    }
    self.unlink(idx);
    self.link_newest(idx);
  }

  fn notify(&mut self, event: FontEvent) {
    for (_, cb) in self.subscriptions.iter_mut() {
      cb(event);
    }
  }

  fn insert(&mut self, face: FontFace) -> FontId {
    let id = FontId(self.next_id);
    self.next_id = self.next_id.wrapping_add(1);
    let entry = Entry {
      id,
      face: face.clone(),
      last_frame: self.frame,
      last_time: self.now,
      newer: None,
      older: None,
    };
    let idx = match self.free.pop() {
      Some(i) => {
        self.entries[i] = Some(entry);
        i
      }
      None => {
        self.entries.push(Some(entry));
        self.entries.len() - 1
      }
    };
    self.by_face.insert(face.key(), idx);
    self.by_id.insert(id.0, idx);
    self.link_newest(idx);
    self.notify(FontEvent::Added(id));
    id
  }

  fn evict(&mut self, idx: usize) {
    self.unlink(idx);
    let entry = self.entries[idx].take().expect("evicting a live entry");
    self.by_face.remove(&entry.face.key());
    self.by_id.remove(&entry.id.0);
    self.free.push(idx);
    self.notify(FontEvent::Expired(entry.id));
  }
}

/// The id <-> face mapping with recency-driven retirement.
pub struct FontIdCache {
  inner: Mutex<Inner>,
}

impl Default for FontIdCache {
  fn default() -> Self {
    Self::new()
  }
}

impl FontIdCache {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        entries: Vec::new(),
        free: Vec::new(),
        by_face: FxHashMap::default(),
        by_id: FxHashMap::default(),
        newest: None,
        oldest: None,
        next_id: 1,
        frame: 0,
        now: 0.0,
        bootstrapped: false,
        expire_frames: DEFAULT_EXPIRE_FRAMES,
        expire_seconds: DEFAULT_EXPIRE_SECONDS,
        subscriptions: Vec::new(),
      }),
    }
  }

  /// Returns the id of `face`, allocating one on first sight. Touching an
  /// existing entry promotes its recency (once per frame).
  pub fn font_face_to_id(&self, face: &FontFace) -> FontId {
    let mut inner = self.inner.lock();
    if let Some(&idx) = inner.by_face.get(&face.key()) {
      inner.make_newest(idx);
      return inner.entries[idx].as_ref().expect("live").id;
    }
    inner.insert(face.clone())
  }

  /// Resolves an id back to its face handle, promoting recency on hit.
  /// Returns `None` for unknown or already-expired ids.
  pub fn id_to_font_face(&self, id: FontId) -> Option<FontFace> {
    let mut inner = self.inner.lock();
    let idx = *inner.by_id.get(&id.0)?;
    inner.make_newest(idx);
    Some(inner.entries[idx].as_ref().expect("live").face.clone())
  }

  /// Sets the frame-count retirement threshold, clamped to the floor of
  /// [`MIN_EXPIRE_FRAMES`].
  pub fn set_expire_frames(&self, frames: u64) {
    self.inner.lock().expire_frames = frames.max(MIN_EXPIRE_FRAMES);
  }

  /// Sets the wall-clock retirement threshold in seconds.
  pub fn set_expire_seconds(&self, seconds: f64) {
    self.inner.lock().expire_seconds = seconds.max(0.0);
  }

  /// Advances the frame counter and retires stale entries.
  ///
  /// The very first call only latches `now` as the time base and sweeps
  /// nothing. Afterward, an entry expires when its last touch is older
  /// than both the frame and the time threshold; sweeping walks from the
  /// recency tail and stops at the first survivor.
  pub fn update(&self, now: f64) {
    let mut inner = self.inner.lock();
    if !inner.bootstrapped {
      inner.bootstrapped = true;
      inner.now = now;
      return;
    }
    inner.frame += 1;
    inner.now = now;

    while let Some(idx) = inner.oldest {
      let (last_frame, last_time) = {
        let e = inner.entries[idx].as_ref().expect("live");
        (e.last_frame, e.last_time)
      };
      let stale_frames = inner.frame.saturating_sub(last_frame) > inner.expire_frames;
      let stale_time = now - last_time > inner.expire_seconds;
      if stale_frames && stale_time {
        inner.evict(idx);
      } else {
        break;
      }
    }
  }

  /// Registers a named lifecycle subscription. A second registration
  /// under the same name replaces the first. Callbacks run under the
  /// cache lock and must not call back into the cache.
  pub fn attach_subscription(&self, name: &str, callback: FontEventCallback) {
    let mut inner = self.inner.lock();
    if let Some(slot) = inner.subscriptions.iter_mut().find(|(n, _)| n == name) {
      slot.1 = callback;
    } else {
      inner.subscriptions.push((name.to_string(), callback));
    }
  }

  /// Removes a named subscription; unknown names are ignored.
  pub fn detach_subscription(&self, name: &str) {
    self.inner.lock().subscriptions.retain(|(n, _)| n != name);
  }

  /// Number of live entries.
  pub fn len(&self) -> usize {
    let inner = self.inner.lock();
    inner.by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  #[cfg(test)]
  fn recency_ids(&self) -> Vec<FontId> {
    let inner = self.inner.lock();
    let mut out = Vec::new();
    let mut cursor = inner.newest;
    while let Some(idx) = cursor {
      let e = inner.entries[idx].as_ref().expect("live");
      out.push(e.id);
      cursor = e.older;
    }
    out
  }
}
