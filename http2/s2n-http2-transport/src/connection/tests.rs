// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of the connection core
//!
//! Two engines are wired back to back and frames are shuttled between them
//! by hand, so every test controls time and interleaving exactly.

use super::*;
use bytes::Bytes;
use futures_test::task::new_count_waker;
use http::{HeaderMap, Method, StatusCode};
use s2n_http2_core::settings::{Setting, SettingId};

fn start() -> Timestamp {
    Timestamp::from_duration(Duration::from_secs(1))
}

fn pair() -> (Connection, Connection) {
    let client = Connection::new(Config::new(endpoint::Type::Client), start());
    let server = Connection::new(Config::new(endpoint::Type::Server), start());
    (client, server)
}

/// Moves every queued frame from one engine into the other
fn pump(from: &Connection, to: &Connection, at: Timestamp) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = from.shared.queue.try_pop() {
        frames.push(frame.clone());
        to.recv_frame(frame, at).unwrap();
    }
    frames
}

/// Completes the opening SETTINGS exchange in both directions
fn handshake(client: &Connection, server: &Connection) {
    let at = start();
    pump(client, server, at);
    pump(server, client, at);
    pump(client, server, at);
    pump(server, client, at);
}

fn request() -> Pseudo {
    Pseudo::request(Method::GET, "https://example.com/".parse().unwrap())
}

fn accept_one(connection: &Connection) -> Stream {
    let (waker, _count) = new_count_waker();
    match connection.poll_accept(&mut Context::from_waker(&waker)) {
        Poll::Ready(Some(stream)) => stream,
        other => panic!("expected an accepted stream, got {:?}", other.is_ready()),
    }
}

fn poll_write(write: &mut crate::stream::Write<'_>) -> Poll<Result<(), Error>> {
    let (waker, _count) = new_count_waker();
    Pin::new(write).poll(&mut Context::from_waker(&waker))
}

/// Reads until the stream runs dry, returning the number of octets consumed
fn read_available(stream: &Stream) -> usize {
    let (waker, _count) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let mut total = 0;
    loop {
        let mut read = stream.read();
        match Pin::new(&mut read).poll(&mut cx) {
            Poll::Ready(Ok(Some(chunk))) => total += chunk.len(),
            Poll::Ready(Ok(None)) | Poll::Pending => return total,
            Poll::Ready(Err(error)) => panic!("read failed: {error}"),
        }
    }
}

fn data_len(frames: &[Frame]) -> usize {
    frames
        .iter()
        .map(|frame| match frame {
            Frame::Data(data) => data.len(),
            _ => 0,
        })
        .sum()
}

#[test]
fn settings_exchange_round_trips() {
    let mut config = Config::new(endpoint::Type::Client);
    config.local_settings.apply(&[
        Setting::new(SettingId::MAX_CONCURRENT_STREAMS, 128),
        Setting::new(SettingId::INITIAL_WINDOW_SIZE, 1 << 20),
    ])
    .unwrap();

    let client = Connection::new(config, start());
    let server = Connection::new(Config::new(endpoint::Type::Server), start());
    handshake(&client, &server);

    // the server observes exactly the announced snapshot
    assert_eq!(server.remote_settings(), config.local_settings);
    // and the acknowledgment promoted the pending local snapshot
    assert_eq!(client.local_settings(), config.local_settings);
    assert_eq!(server.local_settings(), Settings::default());
}

#[test]
fn simple_exchange() {
    let (client, server) = pair();
    handshake(&client, &server);

    let requester = client
        .open_stream(request(), HeaderMap::new(), true, start())
        .unwrap();
    assert_eq!(requester.id().as_u32(), 1);
    assert_eq!(requester.state(), State::HalfClosedLocal);

    pump(&client, &server, start());

    let responder = accept_one(&server);
    assert_eq!(responder.state(), State::HalfClosedRemote);
    assert_eq!(server.last_peer_stream_id(), requester.id());

    let (pseudo, _fields) = futures::executor::block_on(responder.fields()).unwrap();
    assert_eq!(pseudo.method, Some(Method::GET));

    responder
        .send_headers(Pseudo::response(StatusCode::OK), HeaderMap::new(), true, start())
        .unwrap();
    assert_eq!(responder.state(), State::Closed);

    pump(&server, &client, start());
    assert_eq!(requester.state(), State::Closed);

    let (pseudo, _fields) = futures::executor::block_on(requester.fields()).unwrap();
    assert_eq!(pseudo.status, Some(StatusCode::OK));
}

#[test]
fn flow_controlled_large_write() {
    let (client, server) = pair();
    handshake(&client, &server);

    let requester = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());
    let responder = accept_one(&server);

    let payload = Bytes::from(vec![0x5a; 200_000]);
    let mut write = requester.write(payload, true, start());

    // the first grant is bounded by the 65_535 initial windows
    assert!(poll_write(&mut write).is_pending());
    let frames = pump(&client, &server, start());
    assert_eq!(data_len(&frames), 65_535);

    let mut total_read = 0;
    let mut rounds = 0;
    loop {
        total_read += read_available(&responder);
        let updates = pump(&server, &client, start());

        if total_read >= 100_000 && rounds == 0 {
            // both levels re-extended credit with increments >= 32_768
            for id in [responder.id(), StreamId::CONNECTION] {
                let increment = updates
                    .iter()
                    .find_map(|frame| match frame {
                        Frame::WindowUpdate(update) if update.stream_id == id => {
                            Some(update.increment)
                        }
                        _ => None,
                    })
                    .expect("a WINDOW_UPDATE per level");
                assert!(increment >= 32_768, "increment {increment}");
            }
            rounds += 1;
        }

        match poll_write(&mut write) {
            Poll::Ready(Ok(())) => break,
            Poll::Ready(Err(error)) => panic!("write failed: {error}"),
            Poll::Pending => {}
        }
        pump(&client, &server, start());
    }

    total_read += read_available(&responder);
    pump(&client, &server, start());
    total_read += read_available(&responder);
    assert_eq!(total_read, 200_000);
    assert_eq!(requester.state(), State::HalfClosedLocal);
}

#[test]
fn concurrent_streams_share_the_connection_window() {
    let (client, server) = pair();
    handshake(&client, &server);

    let first = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    let second = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());
    let first_peer = accept_one(&server);
    let second_peer = accept_one(&server);

    // the first stream swallows the entire connection window
    let mut slow = first.write(Bytes::from(vec![1u8; 150_000]), false, start());
    assert!(poll_write(&mut slow).is_pending());
    let frames = pump(&client, &server, start());
    assert_eq!(data_len(&frames), 65_535);

    // the second stream has stream credit but no connection credit
    let mut fast = second.write(Bytes::from(vec![2u8; 10_000]), true, start());
    assert!(poll_write(&mut fast).is_pending());

    // the server consumes the first stream's payload, re-opening the
    // connection window
    assert_eq!(read_available(&first_peer), 65_535);
    pump(&server, &client, start());

    // the second stream proceeds even though the first is still blocked
    assert!(poll_write(&mut fast).is_ready());
    let frames = pump(&client, &server, start());
    assert_eq!(data_len(&frames), 10_000);
    assert_eq!(read_available(&second_peer), 10_000);

    // and the first stream is also able to continue on the remainder
    assert!(poll_write(&mut slow).is_pending());
    let frames = pump(&client, &server, start());
    assert!(data_len(&frames) > 0);
}

#[test]
fn reset_grace_window() {
    let (client, server) = pair();
    handshake(&client, &server);

    let requester = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());
    let responder = accept_one(&server);

    responder.reset(ErrorCode::CANCEL, start()).unwrap();
    assert_eq!(responder.state(), State::Closed);
    pump(&server, &client, start());
    assert_eq!(requester.error().map(|error| error.code), Some(ErrorCode::CANCEL));

    // a WINDOW_UPDATE racing the reset is silently dropped
    let late = frame::WindowUpdate::new(responder.id(), 1024);
    server
        .recv_frame(late.into(), start() + Duration::from_secs(2))
        .unwrap();
    assert!(server.error().is_none());

    // once the tolerance lapses the same frame kills the connection
    let too_late = frame::WindowUpdate::new(responder.id(), 1024);
    let error = server
        .recv_frame(too_late.into(), start() + Duration::from_secs(6))
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::PROTOCOL_ERROR);

    // the teardown announced itself with a GOAWAY
    let goaway = server.shared.queue.try_pop().expect("a queued frame");
    assert_eq!(goaway.kind(), Kind::GoAway);
}

#[test]
fn initial_window_shrink_applies_the_delta() {
    let (client, server) = pair();
    handshake(&client, &server);

    let requester = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());

    // an untouched stream lands exactly on the new initial size
    client
        .recv_frame(
            frame::Settings::new(vec![Setting::new(SettingId::INITIAL_WINDOW_SIZE, 1024)]).into(),
            start(),
        )
        .unwrap();
    let inner = client.shared.streams.lookup(requester.id()).unwrap();
    assert_eq!(inner.send_flow.window(), 1024);

    // a stream with octets in flight goes negative by the same delta
    let second = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    let mut write = second.write(Bytes::from(vec![0u8; 600]), false, start());
    assert!(poll_write(&mut write).is_ready());
    drop(write);

    client
        .recv_frame(
            frame::Settings::new(vec![Setting::new(SettingId::INITIAL_WINDOW_SIZE, 512)]).into(),
            start(),
        )
        .unwrap();
    let inner = client.shared.streams.lookup(second.id()).unwrap();
    // 1024 window, 600 consumed, then shifted by (512 - 1024)
    assert_eq!(inner.send_flow.window(), 1024 - 600 + (512 - 1024));
}

#[test]
fn goaway_refuses_new_streams_and_drains_old_ones() {
    let (client, server) = pair();
    handshake(&client, &server);

    let survivor = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());
    let responder = accept_one(&server);

    server.close(ErrorCode::NO_ERROR, server.last_peer_stream_id(), start());
    pump(&server, &client, start());

    // opening after GOAWAY fails locally
    let error = client
        .open_stream(request(), HeaderMap::new(), true, start())
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::REFUSED_STREAM);

    // the surviving stream still completes
    let mut write = survivor.write(Bytes::from_static(b"tail"), true, start());
    assert!(poll_write(&mut write).is_ready());
    pump(&client, &server, start());
    assert_eq!(read_available(&responder), 4);
    responder
        .send_headers(Pseudo::response(StatusCode::OK), HeaderMap::new(), true, start())
        .unwrap();
    pump(&server, &client, start());
    assert_eq!(survivor.state(), State::Closed);

    // with every stream finished the drain completes before its deadline
    server.on_timeout(start() + Duration::from_secs(1));
    let (waker, _count) = new_count_waker();
    assert!(server
        .poll_closed(&mut Context::from_waker(&waker))
        .is_ready());
}

#[test]
fn ping_round_trips_byte_exact() {
    let (client, server) = pair();
    handshake(&client, &server);

    let payload = [0x0b, 0x7b, 0xa2, 0xf0, 0x8b, 0x9b, 0xfe, 0x54];
    let mut round_trip = client.ping(payload, start());

    let frames = pump(&client, &server, start());
    match &frames[0] {
        Frame::Ping(ping) => {
            assert_eq!(ping.payload(), &payload);
            assert!(!ping.is_ack());
        }
        other => panic!("unexpected frame {other:?}"),
    }

    let frames = pump(&server, &client, start() + Duration::from_millis(150));
    match &frames[0] {
        Frame::Ping(ping) => {
            assert_eq!(ping.payload(), &payload);
            assert!(ping.is_ack());
        }
        other => panic!("unexpected frame {other:?}"),
    }

    let (waker, _count) = new_count_waker();
    match Pin::new(&mut round_trip).poll(&mut Context::from_waker(&waker)) {
        Poll::Ready(Ok(rtt)) => assert_eq!(rtt, Duration::from_millis(150)),
        other => panic!("unexpected poll result {other:?}"),
    }
}

#[test]
fn data_frames_respect_the_negotiated_frame_size() {
    let (client, server) = pair();
    handshake(&client, &server);

    let requester = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());
    accept_one(&server);

    let mut write = requester.write(Bytes::from(vec![0u8; 40_000]), false, start());
    assert!(poll_write(&mut write).is_ready());

    let frames = pump(&client, &server, start());
    let data_frames: Vec<_> = frames
        .iter()
        .filter(|frame| frame.kind() == Kind::Data)
        .collect();

    // ceil(40_000 / 16_384) frames, none larger than the limit
    assert_eq!(data_frames.len(), 3);
    for frame in &data_frames {
        match frame {
            Frame::Data(data) => assert!(data.len() <= 16_384),
            _ => {}
        }
    }
}

#[test]
fn concurrency_limit_is_enforced_locally() {
    let mut config = Config::new(endpoint::Type::Server);
    config
        .local_settings
        .apply(&[Setting::new(SettingId::MAX_CONCURRENT_STREAMS, 2)])
        .unwrap();

    let client = Connection::new(Config::new(endpoint::Type::Client), start());
    let server = Connection::new(config, start());
    handshake(&client, &server);

    client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();

    // the peer's announced cap applies before anything hits the wire
    let error = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::REFUSED_STREAM);
}

#[test]
fn settings_ack_timeout_is_fatal() {
    let client = Connection::new(Config::new(endpoint::Type::Client), start());

    // nothing acknowledged the opening SETTINGS
    client.on_timeout(start() + Duration::from_secs(11));

    assert_eq!(
        client.error().map(|error| error.code),
        Some(ErrorCode::SETTINGS_TIMEOUT)
    );

    // the queue ends with SETTINGS then GOAWAY and is then done
    let mut kinds = Vec::new();
    while let Some(frame) = client.shared.queue.try_pop() {
        kinds.push(frame.kind());
    }
    assert_eq!(kinds, vec![Kind::Settings, Kind::GoAway]);
}

#[test]
fn pushed_streams_are_reserved_then_promoted() {
    let client = Connection::new(Config::new(endpoint::Type::Client), start());
    client
        .recv_frame(frame::Settings::new(Vec::new()).into(), start())
        .unwrap();

    let carrier = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();

    let promise = frame::PushPromise::new(
        carrier.id(),
        StreamId::new(2).unwrap(),
        request(),
        HeaderMap::new(),
    );
    client.recv_frame(promise.into(), start()).unwrap();

    let promised = accept_one(&client);
    assert_eq!(promised.id().as_u32(), 2);
    assert_eq!(promised.state(), State::ReservedRemote);

    // the pushed request rode the promise
    let (pseudo, _fields) = futures::executor::block_on(promised.fields()).unwrap();
    assert_eq!(pseudo.method, Some(Method::GET));

    let mut response = frame::Headers::new(
        StreamId::new(2).unwrap(),
        Pseudo::response(StatusCode::OK),
        HeaderMap::new(),
    );
    response.end_stream = true;
    client.recv_frame(response.into(), start()).unwrap();
    assert_eq!(promised.state(), State::Closed);
}

#[test]
fn cancelled_writes_return_their_credit() {
    let (client, server) = pair();
    handshake(&client, &server);

    let first = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    let second = client
        .open_stream(request(), HeaderMap::new(), false, start())
        .unwrap();
    pump(&client, &server, start());
    accept_one(&server);
    accept_one(&server);

    // the first stream drains the connection window completely
    let mut write = first.write(Bytes::from(vec![0u8; 65_535]), false, start());
    assert!(poll_write(&mut write).is_ready());
    drop(write);

    let inner = client.shared.streams.lookup(second.id()).unwrap();
    {
        let mut write = second.write(Bytes::from(vec![0u8; 10_000]), false, start());
        // parked on connection credit while holding the whole stream claim
        assert!(poll_write(&mut write).is_pending());
        assert_eq!(inner.send_flow.window(), 0);
    }

    // dropping the await handed the claim back intact
    assert_eq!(inner.send_flow.window(), 65_535);
}

#[test]
fn reader_stops_after_a_connection_error() {
    let (client, server) = pair();
    handshake(&client, &server);

    // DATA on the connection stream is fatal
    let bogus = frame::Data::new(StreamId::CONNECTION, Bytes::from_static(b"x"), false);
    let error = server.recv_frame(bogus.into(), start()).unwrap_err();
    assert_eq!(error.code, ErrorCode::PROTOCOL_ERROR);

    // every later frame is refused with the same error
    let late = frame::Ping::new([0; 8]);
    let error = server.recv_frame(late.into(), start()).unwrap_err();
    assert_eq!(error.code, ErrorCode::PROTOCOL_ERROR);

    let (waker, _count) = new_count_waker();
    assert!(server
        .poll_closed(&mut Context::from_waker(&waker))
        .is_ready());
}
