use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::animation::AnimationRequest;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
  #[error("animation '{0}' is already registered")]
  DuplicateIdentifier(String),
}

/// The cooperative stop flag shared between the registry entry and its loop
/// task. The flag only ever moves from "run" to "stop"; a canceled identifier
/// can be reused only through a brand-new handle.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
  flag: Arc<AtomicBool>,
}

impl CancelHandle {
  pub fn new() -> Self {
    CancelHandle::default()
  }

  pub fn running(&self) -> bool {
    !self.flag.load(Ordering::SeqCst)
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  /// Whether two handles share the same underlying flag.
  pub fn is_same(&self, other: &CancelHandle) -> bool {
    Arc::ptr_eq(&self.flag, &other.flag)
  }
}

#[derive(Debug, Clone)]
struct Entry {
  handle: CancelHandle,
  request: AnimationRequest,
  started: chrono::DateTime<chrono::Utc>,
}

/// A point-in-time description of one running animation, as handed out by
/// `snapshot` for administrative queries.
#[derive(Debug, Clone)]
pub struct RunningInfo {
  pub request: AnimationRequest,
  pub started: chrono::DateTime<chrono::Utc>,
}

/// The single source of truth for which continuous animations are currently
/// running. All mutation goes through the atomic operations below; nothing
/// else touches the underlying map.
#[derive(Clone, Default)]
pub struct Registry {
  entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Registry {
  pub fn new() -> Self {
    Registry::default()
  }

  fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().unwrap_or_else(|poison| poison.into_inner())
  }

  /// Inserts a new entry, rejecting identifiers that are already live.
  pub fn register(&self, id: &str, handle: CancelHandle, request: AnimationRequest) -> Result<(), RegistryError> {
    let mut entries = self.locked();

    if entries.contains_key(id) {
      return Err(RegistryError::DuplicateIdentifier(id.to_string()));
    }

    entries.insert(
      id.to_string(),
      Entry {
        handle,
        request,
        started: chrono::Utc::now(),
      },
    );

    Ok(())
  }

  pub fn lookup(&self, id: &str) -> Option<CancelHandle> {
    self.locked().get(id).map(|entry| entry.handle.clone())
  }

  /// Signals the handle and removes the entry in one step. Returns false when
  /// the identifier was absent, which is a documented no-op.
  pub fn cancel_and_remove(&self, id: &str) -> bool {
    match self.locked().remove(id) {
      Some(entry) => {
        entry.handle.cancel();
        true
      }
      None => false,
    }
  }

  /// Sweeps every current entry. Entries registered while the sweep runs are
  /// not guaranteed to be included (best-effort snapshot semantics).
  pub fn cancel_all(&self) {
    let ids = self.locked().keys().cloned().collect::<Vec<_>>();

    for id in ids {
      self.cancel_and_remove(&id);
    }
  }

  /// Removal used by a loop task exiting on its own. The entry is only
  /// removed while it still belongs to that task's handle, so an identifier
  /// canceled and re-registered before the old task wakes is left untouched.
  pub fn discard(&self, id: &str, handle: &CancelHandle) {
    let mut entries = self.locked();

    if entries.get(id).map(|entry| entry.handle.is_same(handle)) == Some(true) {
      entries.remove(id);
    }
  }

  /// A point-in-time copy for introspection; never a live view.
  pub fn snapshot(&self) -> HashMap<String, RunningInfo> {
    self
      .locked()
      .iter()
      .map(|(id, entry)| {
        (
          id.clone(),
          RunningInfo {
            request: entry.request.clone(),
            started: entry.started,
          },
        )
      })
      .collect()
  }

  pub fn len(&self) -> usize {
    self.locked().len()
  }

  pub fn is_empty(&self) -> bool {
    self.locked().is_empty()
  }
}
