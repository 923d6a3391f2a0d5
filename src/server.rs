use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_std::channel::{Receiver, Sender};
use async_std::net::TcpListener;

use crate::animation::{AnimationRequest, Effect};
use crate::config::Config;
use crate::connections::{self, Peers};
use crate::handler::{BroadcastEvent, Handler};
use crate::persist::Store;
use crate::registry::Registry;
use crate::strip::{EmulatedStrip, Strip};

/// Color submitted by the startup self-test animation.
const SELF_TEST_COLOR: u64 = 0x0000FF;

/// How long the strip is given to settle on its idle color during shutdown.
const SHUTDOWN_SETTLE: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct ServerBuilder {
  config: Option<Config>,
  strip: Option<Arc<dyn Strip>>,
}

impl ServerBuilder {
  pub fn config(mut self, config: Config) -> Self {
    self.config = Some(config);
    self
  }

  /// Wires in a hardware strip driver; tests and bare startups fall back to
  /// the emulated strip.
  pub fn strip(mut self, strip: Arc<dyn Strip>) -> Self {
    self.strip = Some(strip);
    self
  }

  pub fn build(self) -> Result<Server> {
    let config = self.config.ok_or(Error::new(ErrorKind::Other, "missing config"))?;
    let strip = self
      .strip
      .unwrap_or_else(|| Arc::new(EmulatedStrip::new(config.led_count)));

    let registry = Registry::new();
    let peers = Peers::new();
    let (sender, receiver) = async_std::channel::unbounded::<BroadcastEvent>();

    let store = config.persist.then(|| Store::new(config.animation_dir.clone()));

    let mut builder = Handler::builder()
      .registry(registry.clone())
      .strip(strip.clone())
      .broadcast(sender);

    if let Some(store) = store.clone() {
      builder = builder.store(store);
    }

    let handler = builder.build()?;
    let (stop_tx, stop_rx) = async_std::channel::bounded::<()>(1);

    Ok(Server {
      config,
      handler,
      registry,
      strip,
      peers,
      store,
      events: receiver,
      stop_tx,
      stop_rx,
      running: Arc::new(AtomicBool::new(false)),
      primary_addr: Arc::new(Mutex::new(None)),
      admin_addr: Arc::new(Mutex::new(None)),
    })
  }
}

/// The service control surface: owns the listeners, the dispatcher, and the
/// running flag. Cheap to clone; all clones share one service.
#[derive(Clone)]
pub struct Server {
  config: Config,
  handler: Handler,
  registry: Registry,
  strip: Arc<dyn Strip>,
  peers: Peers,
  store: Option<Store>,
  events: Receiver<BroadcastEvent>,
  stop_tx: Sender<()>,
  stop_rx: Receiver<()>,
  running: Arc<AtomicBool>,
  primary_addr: Arc<Mutex<Option<SocketAddr>>>,
  admin_addr: Arc<Mutex<Option<SocketAddr>>>,
}

impl Server {
  pub fn builder() -> ServerBuilder {
    ServerBuilder::default()
  }

  pub fn handler(&self) -> &Handler {
    &self.handler
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub fn peers(&self) -> &Peers {
    &self.peers
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Where the primary animation listener actually bound, once started.
  pub fn primary_addr(&self) -> Option<SocketAddr> {
    *self.primary_addr.lock().unwrap_or_else(|poison| poison.into_inner())
  }

  /// Where the admin console listener actually bound, once started.
  pub fn admin_addr(&self) -> Option<SocketAddr> {
    *self.admin_addr.lock().unwrap_or_else(|poison| poison.into_inner())
  }

  /// Opens every configured listener, restores persisted animations, and
  /// (optionally) submits the startup self-test. Calling `start` on a running
  /// server is a logged no-op.
  pub async fn start(&self) -> Result<()> {
    if self.running.swap(true, Ordering::SeqCst) {
      log::warn!("server already running, ignoring start");
      return Ok(());
    }

    log::info!("starting animation server");

    if let Some(store) = &self.store {
      store.prepare().await?;

      match store.load().await {
        Ok(saved) => {
          log::info!("restoring {} persisted animation(s)", saved.len());

          for request in saved {
            if let Err(error) = self.handler.submit(request).await {
              log::warn!("unable to restore persisted animation - {}", error);
            }
          }
        }
        Err(error) => log::warn!("unable to load persisted animations - {}", error),
      }
    }

    let peers = self.peers.clone();
    let events = self.events.clone();

    async_std::task::spawn(async move {
      while let Ok((origin, request)) = events.recv().await {
        peers.broadcast(origin, &request).await;
      }
    });

    let primary = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
    *self.primary_addr.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(primary.local_addr()?);

    async_std::task::spawn(connections::listen(
      primary,
      true,
      self.peers.clone(),
      self.handler.clone(),
      self.stop_rx.clone(),
    ));

    for port in &self.config.extra_ports {
      let listener = TcpListener::bind((self.config.host.as_str(), *port)).await?;

      async_std::task::spawn(connections::listen(
        listener,
        false,
        self.peers.clone(),
        self.handler.clone(),
        self.stop_rx.clone(),
      ));
    }

    let admin = TcpListener::bind((self.config.host.as_str(), self.config.local_port)).await?;
    *self.admin_addr.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(admin.local_addr()?);

    async_std::task::spawn(connections::listen_admin(admin, self.clone(), self.stop_rx.clone()));

    if self.config.test_animation {
      log::info!("submitting startup self-test animation");

      let request = AnimationRequest::one_shot(Effect::Color { color: SELF_TEST_COLOR });

      if let Err(error) = self.handler.submit(request).await {
        log::warn!("self-test animation rejected - {}", error);
      }
    }

    Ok(())
  }

  /// Cancels every animation, drives the strip to its idle color, and closes
  /// all open sessions. Safe to call more than once.
  pub async fn stop(&self) {
    if !self.running.swap(false, Ordering::SeqCst) {
      log::info!("server already stopped");
      return;
    }

    log::info!("stopping animation server");
    self.stop_tx.close();
    self.handler.cancel_all().await;

    if let Err(error) = self.strip.set_all(0x0) {
      log::warn!("unable to idle the strip - {}", error);
    }

    async_std::task::sleep(SHUTDOWN_SETTLE).await;
    self.peers.close_all();
    log::info!("animation server stopped");
  }
}
