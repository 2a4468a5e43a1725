mod common;

use common::{
    DEADLINE, EchoServer, blocking_connect, blocking_send, init_tracing, wait_for_disconnect,
};
use netmux::frame::{self, FrameError, HEADER_SIZE};
use netmux::{NetworkSend, Selector, SelectorBuilder};

use bytes::Bytes;
use std::io::Write;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_encode_prefixes_total_length() {
    let encoded = frame::encode(b"payload");

    assert_eq!(encoded.len(), HEADER_SIZE + 7);
    assert_eq!(&encoded[..HEADER_SIZE], &15u64.to_be_bytes());
    assert_eq!(&encoded[HEADER_SIZE..], b"payload");
}

#[test]
fn test_decode_size_bounds() {
    assert_eq!(frame::decode_size(8u64.to_be_bytes(), 64), Ok(0));
    assert_eq!(frame::decode_size(64u64.to_be_bytes(), 64), Ok(56));
    assert_eq!(
        frame::decode_size(0u64.to_be_bytes(), 64),
        Err(FrameError::TooShort(0))
    );
    assert_eq!(
        frame::decode_size(65u64.to_be_bytes(), 64),
        Err(FrameError::TooLarge { size: 65, max: 64 })
    );
}

#[test]
fn test_send_exposes_payload_and_frame() {
    let send = NetworkSend::new("id", b"abc");

    assert_eq!(send.connection_id(), "id");
    assert_eq!(&send.payload()[..], b"abc");
    assert_eq!(send.frame().len(), 11);
}

#[test]
fn test_header_only_frame_round_trip() {
    init_tracing();
    let server = EchoServer::start();
    let mut selector = Selector::new().expect("Failed to create selector");

    let id = "header_only";
    blocking_connect(&mut selector, id, server.addr());

    let frame = Bytes::copy_from_slice(&8u64.to_be_bytes());
    let echoed = blocking_send(&mut selector, NetworkSend::from_frame(id, frame));

    assert!(echoed.is_empty());
    assert!(selector.is_connected(id));
}

#[test]
fn test_undersized_frame_disconnects() {
    init_tracing();
    let mut selector = Selector::new().expect("Failed to create selector");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let id = "undersized";
    blocking_connect(&mut selector, id, listener.local_addr().unwrap());

    let (mut peer, _) = listener.accept().expect("Failed to accept");
    peer.write_all(&4u64.to_be_bytes()).expect("Failed to write to stream");

    wait_for_disconnect(&mut selector, id);
    assert!(selector.completed_receives().is_empty());
}

#[test]
fn test_oversized_frame_disconnects() {
    init_tracing();
    let mut selector = SelectorBuilder::new()
        .max_frame_size(1024)
        .build()
        .expect("Failed to create selector");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let id = "oversized";
    blocking_connect(&mut selector, id, listener.local_addr().unwrap());

    let (mut peer, _) = listener.accept().expect("Failed to accept");
    peer.write_all(&(1u64 << 40).to_be_bytes()).expect("Failed to write to stream");

    wait_for_disconnect(&mut selector, id);
}

#[test]
fn test_trickled_frame_reassembles() {
    init_tracing();
    let mut selector = Selector::new().expect("Failed to create selector");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let id = "trickle";
    blocking_connect(&mut selector, id, listener.local_addr().unwrap());

    let (mut peer, _) = listener.accept().expect("Failed to accept");
    peer.set_nodelay(true).expect("Failed to set nodelay");

    let writer = thread::spawn(move || {
        let wire = frame::encode(b"one byte at a time");
        for byte in wire.iter() {
            peer.write_all(&[*byte]).expect("Failed to write to stream");
            thread::sleep(Duration::from_millis(2));
        }
        peer
    });

    let started = Instant::now();
    let received = loop {
        assert!(started.elapsed() < DEADLINE, "trickled frame never completed");
        selector
            .poll(Duration::from_millis(50))
            .expect("Failed to poll");

        if let Some(receive) = selector.drain_completed_receives().pop() {
            break receive;
        }
    };

    let (from, payload) = received.into_parts();
    assert_eq!(from, id);
    assert_eq!(&payload[..], b"one byte at a time");

    let _peer = writer.join().expect("Writer panicked");
}

#[test]
fn test_back_to_back_frames_arrive_in_order() {
    init_tracing();
    let mut selector = Selector::new().expect("Failed to create selector");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let id = "ordered";
    blocking_connect(&mut selector, id, listener.local_addr().unwrap());

    let (mut peer, _) = listener.accept().expect("Failed to accept");
    let mut wire = Vec::new();
    for i in 0..20 {
        wire.extend_from_slice(&frame::encode(format!("message-{i}").as_bytes()));
    }
    peer.write_all(&wire).expect("Failed to write to stream");

    let mut received = Vec::new();
    let started = Instant::now();
    while received.len() < 20 {
        assert!(started.elapsed() < DEADLINE, "frames never arrived");
        selector
            .poll(Duration::from_millis(50))
            .expect("Failed to poll");

        assert!(
            selector.completed_receives().len() <= 1,
            "At most one frame per connection per poll"
        );
        received.extend(selector.drain_completed_receives());
    }

    for (i, receive) in received.iter().enumerate() {
        assert_eq!(&receive.payload()[..], format!("message-{i}").as_bytes());
    }
}
