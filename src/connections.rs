use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_std::channel::Receiver;
use async_std::io::prelude::*;
use async_std::io::BufReader;
use async_std::net::{TcpListener, TcpStream};
use async_std::stream::StreamExt;
use futures::future::{select, Either};

use crate::animation::AnimationRequest;
use crate::codec;
use crate::handler::Handler;

/// Identifies one accepted session for the lifetime of its connection.
pub type SessionId = u64;

struct Peer {
  stream: TcpStream,
  mirror: bool,
}

/// The set of currently open sessions across every listener. Sessions on the
/// primary port are `mirror` peers and receive broadcast copies of accepted
/// requests; admin and extra-port sessions are tracked only so shutdown can
/// close them.
#[derive(Clone, Default)]
pub struct Peers {
  sessions: Arc<Mutex<HashMap<SessionId, Peer>>>,
  counter: Arc<AtomicU64>,
}

impl Peers {
  pub fn new() -> Self {
    Peers::default()
  }

  fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Peer>> {
    self.sessions.lock().unwrap_or_else(|poison| poison.into_inner())
  }

  fn join(&self, stream: TcpStream, mirror: bool) -> SessionId {
    let id = self.counter.fetch_add(1, Ordering::SeqCst);
    self.locked().insert(id, Peer { stream, mirror });
    id
  }

  fn leave(&self, id: SessionId) {
    self.locked().remove(&id);
  }

  pub fn count(&self) -> usize {
    self.locked().len()
  }

  /// Writes an accepted request to every mirror peer other than its origin.
  /// A failed peer is logged and dropped; the rest still receive the frame.
  pub async fn broadcast(&self, origin: Option<SessionId>, request: &AnimationRequest) {
    let frame = match codec::encode(request) {
      Ok(frame) => frame,
      Err(error) => {
        log::warn!("unable to encode request for broadcast - {}", error);
        return;
      }
    };

    let targets = self
      .locked()
      .iter()
      .filter(|(id, peer)| peer.mirror && Some(**id) != origin)
      .map(|(id, peer)| (*id, peer.stream.clone()))
      .collect::<Vec<_>>();

    for (id, stream) in targets {
      if let Err(error) = codec::write_frame(&mut &stream, &frame).await {
        log::warn!("broadcast to session {} failed, dropping peer - {}", id, error);
        let _ = stream.shutdown(std::net::Shutdown::Both);
        self.leave(id);
      }
    }
  }

  /// Shuts down every open session; their tasks observe the close and exit.
  pub fn close_all(&self) {
    let mut sessions = self.locked();

    for (id, peer) in sessions.drain() {
      log::debug!("closing session {}", id);
      let _ = peer.stream.shutdown(std::net::Shutdown::Both);
    }
  }
}

/// Accept loop for one animation port. Each accepted connection gets its own
/// session task; a session failing never affects the listener or its peers.
/// Dropping out of the loop on shutdown releases the bound port.
pub async fn listen(listener: TcpListener, mirror: bool, peers: Peers, handler: Handler, shutdown: Receiver<()>) {
  let described = listener
    .local_addr()
    .map(|addr| addr.to_string())
    .unwrap_or_else(|_| "unknown".to_string());

  log::info!("listening for animation clients on {}", described);

  loop {
    let next = select(Box::pin(listener.accept()), Box::pin(shutdown.recv())).await;

    let (stream, address) = match next {
      Either::Left((Ok(accepted), _)) => accepted,
      Either::Left((Err(error), _)) => {
        log::warn!("accept failed on {} - {}", described, error);
        continue;
      }
      Either::Right(_) => {
        log::info!("listener on {} observed shutdown", described);
        break;
      }
    };

    log::info!("accepted animation client from {}", address);
    async_std::task::spawn(session(stream, mirror, peers.clone(), handler.clone()));
  }
}

async fn session(stream: TcpStream, mirror: bool, peers: Peers, handler: Handler) {
  let id = peers.join(stream.clone(), mirror);
  let mut reader = stream.clone();

  loop {
    let payload = match codec::read_frame(&mut reader).await {
      Ok(Some(payload)) => payload,
      Ok(None) => {
        log::info!("session {} disconnected", id);
        break;
      }
      Err(error) => {
        log::warn!("session {} read failed - {}", id, error);
        break;
      }
    };

    let request = match codec::decode(&payload) {
      Ok(request) => request,
      Err(error) if error.poisons_session() => {
        log::warn!("session {} sent a malformed frame, closing - {}", id, error);
        break;
      }
      Err(error) => {
        log::warn!("session {} request dropped - {}", id, error);
        continue;
      }
    };

    log::debug!("session {} submitted a {:?} request", id, request.mode);

    if let Err(error) = handler.submit_from(Some(id), request).await {
      log::warn!("session {} request rejected - {}", id, error);
    }
  }

  peers.leave(id);
  let _ = stream.shutdown(std::net::Shutdown::Both);
}

/// Accept loop for the local administrative console.
pub async fn listen_admin(listener: TcpListener, server: crate::server::Server, shutdown: Receiver<()>) {
  let described = listener
    .local_addr()
    .map(|addr| addr.to_string())
    .unwrap_or_else(|_| "unknown".to_string());

  log::info!("admin console listening on {}", described);

  loop {
    let next = select(Box::pin(listener.accept()), Box::pin(shutdown.recv())).await;

    let (stream, address) = match next {
      Either::Left((Ok(accepted), _)) => accepted,
      Either::Left((Err(error), _)) => {
        log::warn!("admin accept failed on {} - {}", described, error);
        continue;
      }
      Either::Right(_) => {
        log::info!("admin listener on {} observed shutdown", described);
        break;
      }
    };

    log::info!("admin session opened from {}", address);
    async_std::task::spawn(admin_session(stream, server.clone()));
  }
}

/// One admin session: newline-terminated commands in, reply lines out.
async fn admin_session(stream: TcpStream, server: crate::server::Server) {
  let id = server.peers().join(stream.clone(), false);
  let reader = BufReader::new(stream.clone());
  let mut lines = reader.lines();
  let mut writer = stream.clone();

  'session: while let Some(line) = lines.next().await {
    let line = match line {
      Ok(line) => line,
      Err(error) => {
        log::warn!("admin session {} read failed - {}", id, error);
        break;
      }
    };

    let reply = crate::command::interpret(&line, &server).await;

    for text in reply.lines() {
      if let Err(error) = writer.write_all(format!("{}\n", text).as_bytes()).await {
        log::warn!("admin session {} write failed - {}", id, error);
        break 'session;
      }
    }

    if let Err(error) = writer.flush().await {
      log::warn!("admin session {} flush failed - {}", id, error);
      break;
    }

    // the reply is already on the wire, so stopping now cannot eat it
    if reply.quits() {
      server.stop().await;
      break;
    }
  }

  server.peers().leave(id);
  let _ = stream.shutdown(std::net::Shutdown::Both);
  log::info!("admin session {} closed", id);
}
