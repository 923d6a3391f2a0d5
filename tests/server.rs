use std::time::Duration;

use async_std::io::prelude::*;
use async_std::io::BufReader;
use async_std::net::TcpStream;
use async_std::stream::StreamExt;

use strand::animation::{AnimationRequest, Effect};
use strand::codec;
use strand::config::Config;
use strand::server::Server;

fn test_config() -> Config {
  Config {
    host: "127.0.0.1".to_string(),
    port: 0,
    local_port: 0,
    led_count: 16,
    ..Config::default()
  }
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
  for _ in 0..500 {
    if condition() {
      return true;
    }
    async_std::task::sleep(Duration::from_millis(10)).await;
  }
  condition()
}

async fn started() -> Server {
  let server = Server::builder().config(test_config()).build().expect("buildable");
  server.start().await.expect("starts");
  server
}

async fn send(stream: &mut TcpStream, request: &AnimationRequest) {
  let frame = codec::encode(request).expect("encodable");
  codec::write_frame(stream, &frame).await.expect("writable");
}

#[async_std::test]
async fn submit_and_cancel_over_the_wire() {
  let server = started().await;
  let address = server.primary_addr().expect("bound");

  let mut client = TcpStream::connect(address).await.expect("connects");

  send(&mut client, &sparkle("a1")).await;
  assert!(eventually(|| server.registry().lookup("a1").is_some()).await);

  send(&mut client, &AnimationRequest::cancel("a1")).await;
  assert!(eventually(|| server.registry().lookup("a1").is_none()).await);

  server.stop().await;
}

#[async_std::test]
async fn accepted_requests_mirror_to_other_peers() {
  let server = started().await;
  let address = server.primary_addr().expect("bound");

  let mut monitor = TcpStream::connect(address).await.expect("connects");
  let mut submitter = TcpStream::connect(address).await.expect("connects");

  assert!(eventually(|| server.peers().count() == 2).await);

  let request = sparkle("mirrored");
  send(&mut submitter, &request).await;

  let payload = codec::read_frame(&mut monitor)
    .await
    .expect("readable")
    .expect("mirrored frame arrives");
  let mirrored = codec::decode(&payload).expect("decodable");

  assert_eq!(mirrored, request);

  server.stop().await;
}

#[async_std::test]
async fn malformed_frame_ends_only_that_session() {
  let server = started().await;
  let address = server.primary_addr().expect("bound");

  let mut healthy = TcpStream::connect(address).await.expect("connects");
  let mut hostile = TcpStream::connect(address).await.expect("connects");
  assert!(eventually(|| server.peers().count() == 2).await);

  let mut garbage = (9u32).to_be_bytes().to_vec();
  garbage.extend_from_slice(b"{not json");
  codec::write_frame(&mut hostile, &garbage).await.expect("writable");

  assert!(eventually(|| server.peers().count() == 1).await);

  // the surviving session still works
  send(&mut healthy, &sparkle("alive")).await;
  assert!(eventually(|| server.registry().lookup("alive").is_some()).await);

  server.stop().await;
}

#[async_std::test]
async fn unsupported_kind_does_not_poison_the_session() {
  let server = started().await;
  let address = server.primary_addr().expect("bound");

  let mut client = TcpStream::connect(address).await.expect("connects");
  assert!(eventually(|| server.peers().count() == 1).await);

  let payload = br#"{"mode":"continuous","id":"a1","kind":"lava-lamp"}"#;
  let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
  frame.extend_from_slice(payload);
  codec::write_frame(&mut client, &frame).await.expect("writable");

  // same session submits a valid request afterwards
  send(&mut client, &sparkle("a2")).await;

  assert!(eventually(|| server.registry().lookup("a2").is_some()).await);
  assert!(server.registry().lookup("a1").is_none());
  assert_eq!(server.peers().count(), 1);

  server.stop().await;
}

#[async_std::test]
async fn admin_console_round_trip() {
  let server = started().await;
  let address = server.admin_addr().expect("bound");

  for id in ["x", "y", "z"] {
    server.handler().submit(sparkle(id)).await.expect("accepted");
  }

  let stream = TcpStream::connect(address).await.expect("connects");
  let mut writer = stream.clone();
  let mut lines = BufReader::new(stream.clone()).lines();

  writer.write_all(b"SHOW q1\n").await.expect("writable");
  let reply = lines.next().await.expect("reply").expect("readable");
  assert_eq!(reply, "q1: NOT FOUND");

  writer.write_all(b"END ALL\n").await.expect("writable");
  let reply = lines.next().await.expect("reply").expect("readable");
  assert_eq!(reply, "ended all animations");
  assert!(eventually(|| server.registry().is_empty()).await);

  writer.write_all(b"SHOW\n").await.expect("writable");
  let reply = lines.next().await.expect("reply").expect("readable");
  assert_eq!(reply, "running animations: []");

  server.stop().await;
}

#[async_std::test]
async fn broadcast_survives_a_dead_peer() {
  let server = started().await;
  let address = server.primary_addr().expect("bound");

  let dead = TcpStream::connect(address).await.expect("connects");
  let mut healthy = TcpStream::connect(address).await.expect("connects");
  let mut submitter = TcpStream::connect(address).await.expect("connects");
  assert!(eventually(|| server.peers().count() == 3).await);

  // kill one mirror peer without telling the server first
  dead.shutdown(std::net::Shutdown::Both).expect("shutdown");

  let request = sparkle("resilient");
  send(&mut submitter, &request).await;

  // the healthy peer still receives the mirrored frame
  let payload = codec::read_frame(&mut healthy)
    .await
    .expect("readable")
    .expect("mirrored frame arrives");
  let mirrored = codec::decode(&payload).expect("decodable");
  assert_eq!(mirrored, request);

  assert!(eventually(|| server.registry().lookup("resilient").is_some()).await);

  server.stop().await;
}

#[async_std::test]
async fn quit_command_replies_before_shutdown() {
  let server = started().await;
  let address = server.admin_addr().expect("bound");

  let stream = TcpStream::connect(address).await.expect("connects");
  let mut writer = stream.clone();
  let mut lines = BufReader::new(stream.clone()).lines();

  writer.write_all(b"QUIT\n").await.expect("writable");

  // the acknowledgement arrives even though the server is shutting down
  let reply = lines.next().await.expect("reply").expect("readable");
  assert_eq!(reply, "shutting down");

  assert!(eventually(|| !server.is_running()).await);
  assert!(server.registry().is_empty());
}

#[async_std::test]
async fn stop_releases_listening_ports() {
  let server = started().await;
  let primary = server.primary_addr().expect("bound");
  let admin = server.admin_addr().expect("bound");

  // no clients connect, so the ports cannot linger in TIME_WAIT
  server.stop().await;

  let mut released = false;

  for _ in 0..200 {
    let primary_free = async_std::net::TcpListener::bind(primary).await.is_ok();
    let admin_free = async_std::net::TcpListener::bind(admin).await.is_ok();

    if primary_free && admin_free {
      released = true;
      break;
    }

    async_std::task::sleep(Duration::from_millis(10)).await;
  }

  assert!(released, "listeners still hold their ports after stop");
}

#[async_std::test]
async fn stop_closes_sessions_and_is_idempotent() {
  let server = started().await;
  let address = server.primary_addr().expect("bound");

  let mut client = TcpStream::connect(address).await.expect("connects");
  send(&mut client, &sparkle("a1")).await;
  assert!(eventually(|| server.registry().lookup("a1").is_some()).await);

  server.stop().await;

  assert!(!server.is_running());
  assert!(server.registry().is_empty());
  assert_eq!(server.peers().count(), 0);

  // the client observes the close on its next read
  let closed = matches!(codec::read_frame(&mut client).await, Ok(None) | Err(_));
  assert!(closed);

  // calling stop again must not crash
  server.stop().await;
}
