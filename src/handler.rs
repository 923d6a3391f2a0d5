use std::io::{Error, ErrorKind, Result};
use std::sync::Arc;

use async_std::channel::Sender;

use crate::animation::{AnimationRequest, Effect, Family, Mode};
use crate::connections::SessionId;
use crate::persist::Store;
use crate::registry::{CancelHandle, Registry, RegistryError};
use crate::strip::Strip;

/// One accepted request on its way to the broadcast fan-out, tagged with the
/// session it came from so mirrors never echo back to the origin.
pub type BroadcastEvent = (Option<SessionId>, AnimationRequest);

#[derive(Default)]
pub struct HandlerBuilder {
  registry: Option<Registry>,
  strip: Option<Arc<dyn Strip>>,
  broadcast: Option<Sender<BroadcastEvent>>,
  store: Option<Store>,
}

impl HandlerBuilder {
  pub fn registry(mut self, registry: Registry) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn strip(mut self, strip: Arc<dyn Strip>) -> Self {
    self.strip = Some(strip);
    self
  }

  pub fn broadcast(mut self, chan: Sender<BroadcastEvent>) -> Self {
    self.broadcast = Some(chan);
    self
  }

  pub fn store(mut self, store: Store) -> Self {
    self.store = Some(store);
    self
  }

  pub fn build(self) -> Result<Handler> {
    let registry = self.registry.ok_or(Error::new(ErrorKind::Other, "missing registry"))?;
    let strip = self.strip.ok_or(Error::new(ErrorKind::Other, "missing strip"))?;

    Ok(Handler {
      registry,
      strip,
      broadcast: self.broadcast,
      store: self.store,
    })
  }
}

/// The animation dispatcher. `submit` classifies each request and either runs
/// a bounded operation on a fresh task, launches a registered continuous loop
/// task, or signals a cancellation; the caller never blocks on render work.
#[derive(Clone)]
pub struct Handler {
  registry: Registry,
  strip: Arc<dyn Strip>,
  broadcast: Option<Sender<BroadcastEvent>>,
  store: Option<Store>,
}

impl Handler {
  pub fn builder() -> HandlerBuilder {
    HandlerBuilder::default()
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub async fn submit(&self, request: AnimationRequest) -> std::result::Result<(), RegistryError> {
    self.submit_from(None, request).await
  }

  /// Classifies and applies one request originating from `origin` (or the
  /// server itself). Only a duplicate continuous identifier is surfaced as an
  /// error; unsupported combinations are logged and dropped.
  pub async fn submit_from(
    &self,
    origin: Option<SessionId>,
    request: AnimationRequest,
  ) -> std::result::Result<(), RegistryError> {
    if request.mode == Mode::Cancel {
      self.apply_cancel(origin, request).await;
      return Ok(());
    }

    let effect = match request.effect.clone() {
      Some(effect) => effect,
      None => {
        log::warn!("request with mode {:?} names no effect, dropping", request.mode);
        return Ok(());
      }
    };

    // bounded effects run once regardless of the requested mode; loopable
    // effects without a continuous mode run a single iteration the same way
    if effect.family() == Family::Bounded || request.mode != Mode::Continuous {
      self.mirror(origin, &request).await;
      self.spawn_once(effect);
      return Ok(());
    }

    let id = request
      .id
      .clone()
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_simple().to_string());

    let handle = CancelHandle::new();
    let mut accepted = request;
    accepted.id = Some(id.clone());

    self.registry.register(&id, handle.clone(), accepted.clone())?;
    log::info!("registered continuous '{}' animation as '{}'", effect.kind(), id);

    self.remember(&id, &accepted).await;
    self.mirror(origin, &accepted).await;

    async_std::task::spawn(run_loop(id, effect, handle, self.registry.clone(), self.strip.clone()));
    Ok(())
  }

  /// Cancels every registered animation and clears their persisted records.
  pub async fn cancel_all(&self) {
    let ids = self.registry.snapshot().into_keys().collect::<Vec<_>>();
    self.registry.cancel_all();

    for id in ids {
      self.forget(&id).await;
    }
  }

  async fn apply_cancel(&self, origin: Option<SessionId>, request: AnimationRequest) {
    let id = match request.id.as_deref() {
      Some(id) => id.to_string(),
      None => {
        log::warn!("cancel request without an identifier, dropping");
        return;
      }
    };

    if self.registry.cancel_and_remove(&id) {
      log::info!("canceled animation '{}'", id);
      self.forget(&id).await;
      self.mirror(origin, &request).await;
    } else {
      log::info!("cancel for unknown animation '{}', ignoring", id);
    }
  }

  fn spawn_once(&self, effect: Effect) {
    let strip = self.strip.clone();

    async_std::task::spawn(async move {
      log::debug!("running bounded '{}' effect", effect.kind());

      if let Err(error) = strip.run(&effect) {
        log::warn!("bounded '{}' render failed - {}", effect.kind(), error);
      }
    });
  }

  async fn mirror(&self, origin: Option<SessionId>, request: &AnimationRequest) {
    if let Some(chan) = &self.broadcast {
      if let Err(error) = chan.send((origin, request.clone())).await {
        log::warn!("unable to queue request for broadcast - {}", error);
      }
    }
  }

  async fn remember(&self, id: &str, request: &AnimationRequest) {
    if let Some(store) = &self.store {
      if let Err(error) = store.save(id, request).await {
        log::warn!("unable to persist animation '{}' - {}", id, error);
      }
    }
  }

  async fn forget(&self, id: &str) {
    if let Some(store) = &self.store {
      if let Err(error) = store.remove(id).await {
        log::warn!("unable to remove persisted animation '{}' - {}", id, error);
      }
    }
  }
}

/// The continuous loop task. Cancellation is polled between iterations only;
/// a render call in flight always completes. Recoverable render failures are
/// logged and the loop keeps going, fatal ones end it.
async fn run_loop(id: String, effect: Effect, handle: CancelHandle, registry: Registry, strip: Arc<dyn Strip>) {
  let delay = effect.frame_delay();
  log::debug!("'{}' loop starting with {:?} frame delay", id, delay);

  while handle.running() {
    if let Err(error) = strip.run(&effect) {
      if error.is_fatal() {
        log::error!("fatal render failure in '{}', stopping - {}", id, error);
        registry.discard(&id, &handle);
        return;
      }

      log::warn!("render call failed in '{}' - {}", id, error);
    }

    async_std::task::sleep(delay).await;
  }

  registry.discard(&id, &handle);
  log::debug!("'{}' observed cancellation and exited", id);
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  use super::*;
  use crate::strip::RenderError;

  /// A strip whose next render results can be scripted; once the script is
  /// exhausted every call succeeds.
  struct ScriptedStrip {
    calls: AtomicUsize,
    script: Mutex<VecDeque<std::result::Result<(), RenderError>>>,
  }

  impl ScriptedStrip {
    fn new(script: Vec<std::result::Result<(), RenderError>>) -> Arc<Self> {
      Arc::new(ScriptedStrip {
        calls: AtomicUsize::new(0),
        script: Mutex::new(script.into()),
      })
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl Strip for ScriptedStrip {
    fn run(&self, _effect: &Effect) -> std::result::Result<(), RenderError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .script
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .pop_front()
        .unwrap_or(Ok(()))
    }

    fn set_all(&self, _color: u64) -> std::result::Result<(), RenderError> {
      Ok(())
    }
  }

  fn handler_with(strip: Arc<ScriptedStrip>) -> Handler {
    Handler::builder()
      .registry(Registry::new())
      .strip(strip)
      .build()
      .expect("buildable")
  }

  fn sparkle(id: &str) -> AnimationRequest {
    AnimationRequest::continuous(
      Effect::Sparkle {
        color: 0xFF0000,
        delay: Some(1),
      },
      Some(id),
    )
  }

  async fn eventually<F>(condition: F) -> bool
  where
    F: Fn() -> bool,
  {
    for _ in 0..250 {
      if condition() {
        return true;
      }
      async_std::task::sleep(Duration::from_millis(10)).await;
    }
    condition()
  }

  #[async_std::test]
  async fn continuous_submit_registers_and_cancel_removes() {
    let strip = ScriptedStrip::new(vec![]);
    let handler = handler_with(strip.clone());

    handler.submit(sparkle("a1")).await.expect("accepted");
    assert!(handler.registry().lookup("a1").is_some());

    handler.submit(AnimationRequest::cancel("a1")).await.expect("accepted");
    assert!(eventually(|| handler.registry().lookup("a1").is_none()).await);
    assert!(strip.calls() >= 1);
  }

  #[async_std::test]
  async fn duplicate_identifier_rejected() {
    let handler = handler_with(ScriptedStrip::new(vec![]));

    handler.submit(sparkle("dup")).await.expect("first accepted");
    let error = handler.submit(sparkle("dup")).await.expect_err("second must fail");

    assert_eq!(error, RegistryError::DuplicateIdentifier("dup".to_string()));
    assert_eq!(handler.registry().len(), 1);

    handler.cancel_all().await;
  }

  #[async_std::test]
  async fn server_assigns_missing_identifier() {
    let handler = handler_with(ScriptedStrip::new(vec![]));

    handler
      .submit(AnimationRequest::continuous::<String>(
        Effect::Sparkle {
          color: 0xFF0000,
          delay: Some(1),
        },
        None,
      ))
      .await
      .expect("accepted");

    let snapshot = handler.registry().snapshot();
    assert_eq!(snapshot.len(), 1);

    let (id, info) = snapshot.iter().next().expect("one entry");
    assert!(!id.is_empty());
    assert_eq!(info.request.id.as_deref(), Some(id.as_str()));

    handler.cancel_all().await;
  }

  #[async_std::test]
  async fn one_shot_never_registers() {
    let strip = ScriptedStrip::new(vec![]);
    let handler = handler_with(strip.clone());

    handler
      .submit(AnimationRequest::one_shot(Effect::Color { color: 0xFF0000 }))
      .await
      .expect("accepted");

    // loopable kind with a one-shot mode runs a single iteration, unregistered
    handler
      .submit(AnimationRequest {
        mode: Mode::OneShot,
        id: None,
        effect: Some(Effect::Sparkle {
          color: 0xFF0000,
          delay: Some(1),
        }),
      })
      .await
      .expect("accepted");

    assert!(eventually(|| strip.calls() >= 2).await);
    assert!(handler.registry().is_empty());
  }

  #[async_std::test]
  async fn bounded_effect_ignores_continuous_mode() {
    let strip = ScriptedStrip::new(vec![]);
    let handler = handler_with(strip.clone());

    handler
      .submit(AnimationRequest::continuous(
        Effect::Color { color: 0xFF0000 },
        Some("ignored"),
      ))
      .await
      .expect("accepted");

    assert!(eventually(|| strip.calls() >= 1).await);
    assert!(handler.registry().is_empty());
  }

  #[async_std::test]
  async fn cancel_for_unknown_identifier_is_noop() {
    let handler = handler_with(ScriptedStrip::new(vec![]));
    handler.submit(AnimationRequest::cancel("ghost")).await.expect("accepted");
    assert!(handler.registry().is_empty());
  }

  #[async_std::test]
  async fn recoverable_render_error_keeps_loop_alive() {
    let strip = ScriptedStrip::new(vec![Err(RenderError::Recoverable("flicker".to_string()))]);
    let handler = handler_with(strip.clone());

    handler.submit(sparkle("flaky")).await.expect("accepted");

    // the loop must survive the scripted failure and keep rendering
    assert!(eventually(|| strip.calls() >= 3).await);
    assert!(handler.registry().lookup("flaky").is_some());

    handler.cancel_all().await;
    assert!(eventually(|| handler.registry().is_empty()).await);
  }

  #[async_std::test]
  async fn fatal_render_error_removes_entry() {
    let strip = ScriptedStrip::new(vec![Err(RenderError::Fatal("device gone".to_string()))]);
    let handler = handler_with(strip.clone());

    handler.submit(sparkle("doomed")).await.expect("accepted");

    assert!(eventually(|| handler.registry().lookup("doomed").is_none()).await);

    // the task exited; no further renders happen
    let settled = strip.calls();
    async_std::task::sleep(Duration::from_millis(50)).await;
    assert_eq!(strip.calls(), settled);
  }

  #[async_std::test]
  async fn identifier_reuse_survives_stale_task_exit() {
    let strip = ScriptedStrip::new(vec![]);
    let handler = handler_with(strip.clone());

    let slow = AnimationRequest::continuous(
      Effect::Sparkle {
        color: 0xFF0000,
        delay: Some(300),
      },
      Some("a1"),
    );

    // cancel and re-register the identifier while the first task is still
    // parked in its frame delay
    handler.submit(slow.clone()).await.expect("accepted");
    handler.submit(AnimationRequest::cancel("a1")).await.expect("accepted");
    handler.submit(slow).await.expect("accepted");

    // once the stale task wakes and exits it must not take the replacement
    // entry with it
    async_std::task::sleep(Duration::from_millis(450)).await;
    assert!(handler.registry().lookup("a1").is_some());

    let before = strip.calls();
    assert!(eventually(|| strip.calls() > before).await, "replacement loop must keep rendering");

    handler.cancel_all().await;
    assert!(eventually(|| handler.registry().is_empty()).await);
  }

  #[async_std::test]
  async fn cancel_all_sweeps_every_entry() {
    let handler = handler_with(ScriptedStrip::new(vec![]));

    for id in ["x", "y", "z"] {
      handler.submit(sparkle(id)).await.expect("accepted");
    }
    assert_eq!(handler.registry().len(), 3);

    handler.cancel_all().await;
    assert!(eventually(|| handler.registry().is_empty()).await);
  }
}
