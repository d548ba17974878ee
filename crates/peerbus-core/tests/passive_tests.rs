//! Listening and Passive peers against raw loopback clients.

mod common;

use common::{events, listen, read_frame, write_frame, Seen};
use peerbus::{LifecycleState, MethodRegistry, PeerRole, Reactor, ReactorConfig, Reply};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

fn echo_reactor() -> Reactor {
    let registry = MethodRegistry::builder().echo().build().unwrap();
    Reactor::start(ReactorConfig::default(), registry).unwrap()
}

#[tokio::test]
async fn test_passive_peer_answers_echo_and_leaves_directory() {
    let reactor = echo_reactor();
    let (handler, mut events) = events();
    let (_listener, addr) = listen(&reactor, handler);
    assert_eq!(reactor.directory().count(PeerRole::Listening), 1);

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);

    let (passive, _) = events
        .wait_for(PeerRole::Passive, |seen| *seen == Seen::Connected)
        .await;
    assert_eq!(reactor.directory().count(PeerRole::Passive), 1);

    write_frame(&mut write, &json!({"id": 42, "method": "echo", "params": "hi"})).await;
    let reply = read_frame(&mut read).await.unwrap();
    assert_eq!(reply, json!({"id": 42, "result": "hi"}));

    drop(write);
    drop(read);

    let (destroyed, _) = events
        .wait_for(PeerRole::Passive, |seen| *seen == Seen::Destroyed)
        .await;
    assert_eq!(destroyed, passive);
    assert_eq!(reactor.directory().count(PeerRole::Passive), 0);
    assert_eq!(reactor.directory().count(PeerRole::Listening), 1);
}

#[tokio::test]
async fn test_unknown_method_keeps_connection_usable() {
    let reactor = echo_reactor();
    let (handler, _events) = events();
    let (_listener, addr) = listen(&reactor, handler);

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut read = BufReader::new(read);

    write_frame(&mut write, &json!({"id": 1, "method": "frobnicate", "params": {}})).await;
    let reply = read_frame(&mut read).await.unwrap();
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["code"], -32601);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .contains("frobnicate"));

    write_frame(&mut write, &json!({"id": 2, "method": "echo", "params": [1, 2]})).await;
    let reply = read_frame(&mut read).await.unwrap();
    assert_eq!(reply, json!({"id": 2, "result": [1, 2]}));
}

#[tokio::test]
async fn test_malformed_frame_only_closes_that_connection() {
    let reactor = echo_reactor();
    let (handler, mut events) = events();
    let (_listener, addr) = listen(&reactor, handler);

    let (bad_read, mut bad_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut bad_read = BufReader::new(bad_read);
    let (good_read, mut good_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut good_read = BufReader::new(good_read);

    events
        .wait_for(PeerRole::Passive, |seen| *seen == Seen::Connected)
        .await;
    events
        .wait_for(PeerRole::Passive, |seen| *seen == Seen::Connected)
        .await;

    tokio::io::AsyncWriteExt::write_all(&mut bad_write, b"{this is not json}\0")
        .await
        .unwrap();
    assert!(read_frame(&mut bad_read).await.is_none());

    events
        .wait_for(PeerRole::Passive, |seen| *seen == Seen::Destroyed)
        .await;
    assert_eq!(reactor.directory().count(PeerRole::Passive), 1);

    write_frame(&mut good_write, &json!({"id": "x", "method": "echo", "params": null})).await;
    let reply = read_frame(&mut good_read).await.unwrap();
    assert_eq!(reply, json!({"id": "x", "result": null}));
}

#[tokio::test]
async fn test_message_without_id_is_a_protocol_error() {
    let reactor = echo_reactor();
    let (handler, _events) = events();
    let (_listener, addr) = listen(&reactor, handler);

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut read = BufReader::new(read);

    write_frame(&mut write, &json!({"method": "echo", "params": "hi"})).await;
    assert!(read_frame(&mut read).await.is_none());
}

#[tokio::test]
async fn test_deferred_reply_through_peer_handle() {
    let registry = MethodRegistry::builder()
        .request_fn("policy_resolve", |peer, request| {
            let peer = peer.clone();
            let id = request.id.clone();
            std::thread::spawn(move || {
                peer.respond_result(&id, json!({"resolved": true})).unwrap();
            });
            Reply::None
        })
        .build()
        .unwrap();
    let reactor = Reactor::start(ReactorConfig::default(), registry).unwrap();
    let (handler, _events) = events();
    let (_listener, addr) = listen(&reactor, handler);

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut read = BufReader::new(read);

    write_frame(
        &mut write,
        &json!({"id": ["policy_resolve", 5], "method": "policy_resolve", "params": {}}),
    )
    .await;
    let reply = read_frame(&mut read).await.unwrap();
    assert_eq!(
        reply,
        json!({"id": ["policy_resolve", 5], "result": {"resolved": true}})
    );
}

#[tokio::test]
async fn test_destroying_listener_stops_accepting() {
    let reactor = echo_reactor();
    let (handler, mut events) = events();
    let (listener, addr) = listen(&reactor, handler);

    listener.disconnect();
    let (destroyed, _) = events
        .wait_for(PeerRole::Listening, |seen| *seen == Seen::Destroyed)
        .await;
    assert_eq!(destroyed, listener);
    assert!(reactor.directory().is_empty());

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_listener_destroy_escalates_while_close_pending() {
    let reactor = echo_reactor();
    let (handler, mut events) = events();
    let (listener, addr) = listen(&reactor, handler);

    listener.disconnect();
    listener.disconnect();
    listener.destroy_now();
    listener.disconnect();

    let (destroyed, _) = events
        .wait_for(PeerRole::Listening, |seen| *seen == Seen::Destroyed)
        .await;
    assert_eq!(destroyed, listener);
    assert_eq!(listener.state(), LifecycleState::Destroyed);

    let late = events.collect_for(Duration::from_millis(200)).await;
    assert!(late.iter().all(|(_, seen)| *seen != Seen::Destroyed), "{:?}", late);
    assert!(reactor.directory().is_empty());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_long_run_of_empty_frames_is_skipped() {
    let reactor = echo_reactor();
    let (handler, _events) = events();
    let (_listener, addr) = listen(&reactor, handler);

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut read = BufReader::new(read);

    write.write_all(&vec![0u8; 256 * 1024]).await.unwrap();
    write_frame(&mut write, &json!({"id": 3, "method": "echo", "params": "still here"})).await;

    let reply = read_frame(&mut read).await.unwrap();
    assert_eq!(reply, json!({"id": 3, "result": "still here"}));
    assert_eq!(reactor.directory().count(PeerRole::Passive), 1);
}

#[test]
fn test_invalid_listen_arguments_fail_synchronously() {
    let reactor = echo_reactor();

    assert!(reactor.listen_passive("127.0.0.1", 0, |_, _| {}).is_err());
    assert!(reactor.listen_passive("127.0.0.1", 70000, |_, _| {}).is_err());
    let err = reactor
        .listen_passive("not an address", 8009, |_, _| {})
        .unwrap_err();
    assert!(err.is_config());
    assert!(reactor.directory().is_empty());
}

#[test]
fn test_bind_conflict_fails_synchronously() {
    let reactor = echo_reactor();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let err = reactor
        .listen_passive("127.0.0.1", u32::from(port), |_, _| {})
        .unwrap_err();
    assert!(matches!(err, peerbus::CommsError::Io { .. }));
}
