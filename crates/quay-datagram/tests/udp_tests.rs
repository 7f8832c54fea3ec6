//! End-to-end tests for UDP endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use quay_core::{Context, EventLoop};
use quay_datagram::network_info::multicast_capable_v4;
use quay_datagram::{
    AsyncResult, DatagramClient, DatagramError, DatagramFactory, DatagramPacket, DatagramServer,
    ErrorKind, Handler, Phase, ProtocolFamily, handler,
};
use rand::Rng;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    event_loop: EventLoop,
    factory: DatagramFactory,
}

impl Harness {
    fn new(name: &str) -> Self {
        let event_loop = EventLoop::new(name);
        let factory = DatagramFactory::new(event_loop.context().clone());
        Self {
            event_loop,
            factory,
        }
    }

    fn context(&self) -> Context {
        self.event_loop.context().clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.event_loop.stop_and_join();
    }
}

/// A handler that forwards its result, and whether it ran on `context`.
fn completion<T: Send + 'static>(
    context: &Context,
) -> (Option<Handler<T>>, Receiver<(AsyncResult<T>, bool)>) {
    let context = context.clone();
    let (tx, rx) = crossbeam_channel::unbounded();
    let handler = handler(move |result: AsyncResult<T>| {
        let _ = tx.send((result, context.is_current()));
    });
    (handler, rx)
}

fn wait<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(TIMEOUT).expect("timed out waiting for callback")
}

fn listen_on(server: &DatagramServer, host: &str, port: u16) -> AsyncResult<SocketAddr> {
    let (handler, rx) = completion(server.context());
    server.listen_on(host, port, handler);
    let (result, _) = wait(&rx);
    result.map(|server| server.local_address().expect("bound server has a local address"))
}

fn collect_packets(server: &DatagramServer) -> Receiver<(DatagramPacket, bool)> {
    let context = server.context().clone();
    let (tx, rx) = crossbeam_channel::unbounded();
    server.data_handler(move |packet| {
        let _ = tx.send((packet, context.is_current()));
    });
    rx
}

fn send(client: &DatagramClient, data: Vec<u8>, host: &str, port: u16) -> AsyncResult<()> {
    let (handler, rx) = completion(client.context());
    client.send(data, host, port, handler);
    wait(&rx).0.map(|_| ())
}

fn random_payload() -> Vec<u8> {
    let mut payload = vec![0u8; 128];
    rand::thread_rng().fill(&mut payload[..]);
    payload
}

#[test]
fn test_send_receive() {
    let harness = Harness::new("udp-send-receive");
    let server = harness.factory.create_server(None);
    let packets = collect_packets(&server);
    let addr = listen_on(&server, "127.0.0.1", 0).unwrap();

    let client = harness.factory.create_client();
    let payload = random_payload();
    let (handler, sent) = completion(client.context());
    client.send(payload.clone(), "127.0.0.1", addr.port(), handler);

    let (result, on_context) = wait(&sent);
    assert!(result.unwrap().same_endpoint(&client));
    assert!(on_context);

    let (packet, on_context) = wait(&packets);
    assert_eq!(packet.data().as_ref(), payload.as_slice());
    assert!(on_context);
    assert!(packets.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_bind_conflict_fails_with_addr_in_use() {
    let harness = Harness::new("udp-bind-conflict");
    let first = harness.factory.create_server(None);
    let (handler, rx) = completion(first.context());
    first.listen(0, handler);
    let port = wait(&rx).0.unwrap().local_address().unwrap().port();

    let second = harness.factory.create_server(None);
    let (handler, rx) = completion(second.context());
    second.listen(port, handler);

    let (result, on_context) = wait(&rx);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::AddrInUse);
    assert!(on_context);
}

#[test]
fn test_echo() {
    let harness = Harness::new("udp-echo");
    let peer = harness.factory.create_server(None);
    let echo = harness.factory.create_server(None);

    let peer_addr = listen_on(&peer, "127.0.0.1", 0).unwrap();
    let echo_addr = listen_on(&echo, "127.0.0.1", 0).unwrap();

    let (seen_tx, seen) = crossbeam_channel::unbounded();
    let replier = echo.clone();
    echo.data_handler(move |packet| {
        let sender = packet.sender();
        replier.send(packet.data().clone(), &sender.ip().to_string(), sender.port(), None);
        let _ = seen_tx.send(sender);
    });
    let replies = collect_packets(&peer);

    let payload = random_payload();
    peer.send(payload.clone(), "127.0.0.1", echo_addr.port(), None);

    assert_eq!(wait(&seen), peer_addr);
    let (reply, _) = wait(&replies);
    assert_eq!(reply.sender(), echo_addr);
    assert_eq!(reply.data().as_ref(), payload.as_slice());

    echo.close(None);
    peer.close(None);
}

#[test]
fn test_send_after_close_fails() {
    let harness = Harness::new("udp-closed");
    let client = harness.factory.create_client();

    let (handler, closed) = completion(client.context());
    client.close(handler);
    let (result, on_context) = wait(&closed);
    assert!(result.is_ok());
    assert!(on_context);
    assert_eq!(client.phase(), Phase::Closed);

    let result = send(&client, b"late".to_vec(), "127.0.0.1", 9);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::ClosedEndpoint);
}

#[test]
fn test_second_close_is_a_no_op() {
    let harness = Harness::new("udp-close-twice");
    let server = harness.factory.create_server(None);
    listen_on(&server, "127.0.0.1", 0).unwrap();

    let (first, first_rx) = completion::<()>(server.context());
    let (second, second_rx) = completion::<()>(server.context());
    server.close(first);
    server.close(second);

    assert!(wait(&first_rx).0.is_ok());
    assert!(first_rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(second_rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_send_pending_at_close_fails_with_closed_endpoint() {
    let harness = Harness::new("udp-close-pending");
    let server = harness.factory.create_server(None);
    let addr = listen_on(&server, "127.0.0.1", 0).unwrap();
    let client = harness.factory.create_client();

    let (sent_tx, sent) = crossbeam_channel::unbounded();
    let (closed_handler, closed) = completion::<()>(client.context());
    let issuer = client.clone();
    harness
        .context()
        .schedule(move || {
            issuer.send(
                b"pending".to_vec(),
                "127.0.0.1",
                addr.port(),
                handler(move |result| {
                    let _ = sent_tx.send(result.map(|_| ()).map_err(|e| e.kind()));
                }),
            );
            issuer.close(closed_handler);
        })
        .unwrap();

    assert_eq!(wait(&sent), Err(ErrorKind::ClosedEndpoint));
    assert!(wait(&closed).0.is_ok());
    assert!(sent.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_close_drops_handlers_holding_the_endpoint() {
    let harness = Harness::new("udp-close-handlers");
    let server = harness.factory.create_server(None);
    let sentinel = Arc::new(());

    let replier = server.clone();
    let held = sentinel.clone();
    server.data_handler(move |packet: DatagramPacket| {
        let _held = &held;
        let sender = packet.sender();
        replier.send(packet.data().clone(), &sender.ip().to_string(), sender.port(), None);
    });
    let held = sentinel.clone();
    server.exception_handler(move |_: DatagramError| {
        let _held = &held;
    });
    listen_on(&server, "127.0.0.1", 0).unwrap();

    let (handler, closed) = completion::<()>(server.context());
    server.close(handler);
    assert!(wait(&closed).0.is_ok());
    drop(server);

    let deadline = Instant::now() + TIMEOUT;
    while Arc::strong_count(&sentinel) > 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(Arc::strong_count(&sentinel), 1);
}

#[test]
fn test_close_releases_port() {
    let harness = Harness::new("udp-close-release");
    let first = harness.factory.create_server(None);
    let addr = listen_on(&first, "127.0.0.1", 0).unwrap();

    let (handler, closed) = completion::<()>(first.context());
    first.close(handler);
    assert!(wait(&closed).0.is_ok());

    let second = harness.factory.create_server(None);
    assert_eq!(listen_on(&second, "127.0.0.1", addr.port()).unwrap(), addr);
}

#[test]
fn test_broadcast_requires_option() {
    let harness = Harness::new("udp-broadcast");
    let receiver = harness.factory.create_server(None);
    let packets = collect_packets(&receiver);
    let (handler, rx) = completion(receiver.context());
    receiver.listen(0, handler);
    let port = wait(&rx).0.unwrap().local_address().unwrap().port();

    let guarded = harness.factory.create_client();
    let err = send(&guarded, b"test".to_vec(), "255.255.255.255", port).unwrap_err();
    #[cfg(target_os = "linux")]
    assert_eq!(err.kind(), ErrorKind::PermissionDenied, "{err}");
    #[cfg(not(target_os = "linux"))]
    assert!(matches!(err.kind(), ErrorKind::PermissionDenied | ErrorKind::Io));

    let broadcaster = harness.factory.create_client();
    broadcaster.set_broadcast(true).unwrap();
    match send(&broadcaster, b"test".to_vec(), "255.255.255.255", port) {
        Ok(()) => {
            let (packet, on_context) = wait(&packets);
            assert_eq!(packet.data().as_ref(), b"test");
            assert!(on_context);
        }
        // Hosts without a broadcast route refuse the send outright.
        Err(e) => assert_ne!(e.kind(), ErrorKind::PermissionDenied, "{e}"),
    }
}

#[test]
fn test_multicast_join_and_leave() {
    let Some(iface) = multicast_capable_v4() else {
        eprintln!("no multicast-capable interface, skipping");
        return;
    };
    let harness = Harness::new("udp-multicast");
    let server = harness.factory.create_server(Some(ProtocolFamily::Inet));
    let packets = collect_packets(&server);

    let (handler, rx) = completion(server.context());
    server.listen(0, handler);
    let port = wait(&rx).0.unwrap().local_address().unwrap().port();

    let (handler, joined) = completion(server.context());
    server.join_group("230.0.0.1", handler);
    if let Err(e) = wait(&joined).0 {
        eprintln!("cannot join 230.0.0.1 on this host ({e}), skipping");
        return;
    }

    let client = harness.factory.create_client();
    client.set_interface(iface.ipv4_addresses[0].into()).unwrap();
    let payload = random_payload();
    send(&client, payload.clone(), "230.0.0.1", port).unwrap();

    let Ok((packet, on_context)) = packets.recv_timeout(Duration::from_secs(2)) else {
        eprintln!("multicast loopback not delivered on {}, skipping", iface.name);
        return;
    };
    assert_eq!(packet.data().as_ref(), payload.as_slice());
    assert!(on_context);

    let (handler, left) = completion(server.context());
    server.leave_group("230.0.0.1", handler);
    assert!(wait(&left).0.is_ok());

    send(&client, payload, "230.0.0.1", port).unwrap();

    let (timer_tx, timer_rx) = crossbeam_channel::bounded(1);
    harness.context().set_timer(Duration::from_secs(1), move || {
        let _ = timer_tx.send(());
    });
    wait(&timer_rx);
    assert!(packets.try_recv().is_err());
}

#[test]
fn test_options_frozen_after_listen() {
    let harness = Harness::new("udp-frozen-listen");
    let server = harness.factory.create_server(None);
    server.set_receive_buffer_size(1 << 16).unwrap();
    listen_on(&server, "127.0.0.1", 0).unwrap();

    assert_eq!(server.phase(), Phase::Active);
    let err = server.set_broadcast(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert!(!server.broadcast());
    assert_eq!(server.set_time_to_live(4).unwrap_err().kind(), ErrorKind::IllegalState);
    assert_eq!(server.set_reuse_address(true).unwrap_err().kind(), ErrorKind::IllegalState);
    assert_eq!(server.receive_buffer_size(), Some(1 << 16));
}

#[test]
fn test_options_frozen_even_when_send_fails() {
    let harness = Harness::new("udp-frozen-send");
    let client = harness.factory.create_client();

    let (handler, rx) = completion(client.context());
    client.send_str("hello", "nowhere.invalid", 1234, handler);
    assert_eq!(client.phase(), Phase::Active);
    assert_eq!(client.set_traffic_class(0x10).unwrap_err().kind(), ErrorKind::IllegalState);

    let (result, on_context) = wait(&rx);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::UnknownHost);
    assert!(on_context);
    assert_eq!(client.set_broadcast(true).unwrap_err().kind(), ErrorKind::IllegalState);
}

#[test]
fn test_option_setters_before_activation() {
    let harness = Harness::new("udp-setters");
    let server = harness.factory.create_server(None);

    server
        .set_broadcast(true)
        .and_then(|s| s.set_time_to_live(8))
        .and_then(|s| s.set_traffic_class(0x20))
        .and_then(|s| s.set_loopback_mode_disabled(true))
        .unwrap();
    assert!(server.broadcast());
    assert_eq!(server.time_to_live(), Some(8));
    assert_eq!(server.traffic_class(), Some(0x20));
    assert!(server.loopback_mode_disabled());

    assert_eq!(server.set_send_buffer_size(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(server.send_buffer_size(), None);
    assert_eq!(
        server.set_network_interface("quay-no-such-if0").unwrap_err().kind(),
        ErrorKind::NoSuchInterface
    );
    assert_eq!(server.network_interface(), None);
    assert_eq!(server.phase(), Phase::Configurable);
}

#[test]
fn test_second_listen_is_illegal_state() {
    let harness = Harness::new("udp-listen-twice");
    let server = harness.factory.create_server(None);
    let addr = listen_on(&server, "127.0.0.1", 0).unwrap();

    let err = listen_on(&server, "127.0.0.1", 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert_eq!(server.local_address(), Some(addr));
}

#[test]
fn test_client_local_address_after_send() {
    let harness = Harness::new("udp-client-address");
    let server = harness.factory.create_server(None);
    let packets = collect_packets(&server);
    let addr = listen_on(&server, "127.0.0.1", 0).unwrap();

    let client = harness.factory.create_client();
    assert_eq!(client.local_address(), None);
    send(&client, b"ping".to_vec(), "127.0.0.1", addr.port()).unwrap();

    let local = client.local_address().expect("client is bound after sending");
    let (packet, _) = wait(&packets);
    assert_eq!(packet.sender().port(), local.port());
}

#[test]
fn test_unhandled_failure_goes_to_exception_handler() {
    let harness = Harness::new("udp-exception-handler");
    let client = harness.factory.create_client();
    let context = harness.context();
    let (tx, rx) = crossbeam_channel::unbounded();
    client.exception_handler(move |error: DatagramError| {
        let _ = tx.send((error.kind(), context.is_current()));
    });

    client.send_str("hello", "nowhere.invalid", 1234, None);
    assert_eq!(wait(&rx), (ErrorKind::UnknownHost, true));
}

#[test]
fn test_unsupported_encoding() {
    let harness = Harness::new("udp-encoding");
    let client = harness.factory.create_client();

    let (handler, rx) = completion(client.context());
    client.send_str_with_encoding("hello", "EBCDIC", "127.0.0.1", 9, handler);
    assert_eq!(wait(&rx).0.unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(client.phase(), Phase::Active);
}

#[test]
fn test_latin1_payload() {
    let harness = Harness::new("udp-latin1");
    let server = harness.factory.create_server(None);
    let packets = collect_packets(&server);
    let addr = listen_on(&server, "127.0.0.1", 0).unwrap();

    let client = harness.factory.create_client();
    client.send_str_with_encoding("café", "ISO-8859-1", "127.0.0.1", addr.port(), None);

    let (packet, _) = wait(&packets);
    assert_eq!(packet.data().as_ref(), &[b'c', b'a', b'f', 0xE9]);
}

#[test]
fn test_membership_argument_errors() {
    let harness = Harness::new("udp-membership-errors");
    let server = harness.factory.create_server(Some(ProtocolFamily::Inet));

    let (handler, rx) = completion(server.context());
    server.join_group("192.168.1.1", handler);
    assert_eq!(wait(&rx).0.unwrap_err().kind(), ErrorKind::InvalidArgument);

    let (handler, rx) = completion(server.context());
    server.join_source_group("232.1.1.1", "quay-no-such-if0", "10.0.0.1", handler);
    assert_eq!(wait(&rx).0.unwrap_err().kind(), ErrorKind::NoSuchInterface);

    let (handler, rx) = completion(server.context());
    server.block_source("232.1.1.1", "nowhere.invalid", handler);
    assert_eq!(wait(&rx).0.unwrap_err().kind(), ErrorKind::UnknownHost);

    let (handler, rx) = completion(server.context());
    server.block_source_on("232.1.1.1", "quay-no-such-if0", "10.0.0.1", handler);
    assert_eq!(wait(&rx).0.unwrap_err().kind(), ErrorKind::NoSuchInterface);

    assert_eq!(server.phase(), Phase::Active);
}

#[cfg(target_os = "linux")]
#[test]
fn test_source_specific_membership_on_loopback() {
    let harness = Harness::new("udp-ssm");
    let server = harness.factory.create_server(Some(ProtocolFamily::Inet));
    listen_on(&server, "0.0.0.0", 0).unwrap();

    let (handler, rx) = completion(server.context());
    server.join_source_group("232.1.1.1", "lo", "127.0.0.1", handler);
    let (result, on_context) = wait(&rx);
    assert!(result.is_ok(), "{:?}", result.err());
    assert!(on_context);

    let (handler, rx) = completion(server.context());
    server.leave_source_group("232.1.1.1", "lo", "127.0.0.1", handler);
    assert!(wait(&rx).0.is_ok());

    let (handler, rx) = completion(server.context());
    server.join_group("230.0.0.9", handler);
    if let Err(e) = wait(&rx).0 {
        eprintln!("cannot join 230.0.0.9 on this host ({e}), skipping block");
        return;
    }
    let (handler, rx) = completion(server.context());
    server.block_source("230.0.0.9", "10.0.0.1", handler);
    assert!(wait(&rx).0.is_ok());
}

#[test]
fn test_completions_follow_issue_order() {
    let harness = Harness::new("udp-order");
    let server = harness.factory.create_server(None);
    let addr = listen_on(&server, "127.0.0.1", 0).unwrap();
    let client = harness.factory.create_client();

    let (tx, rx) = crossbeam_channel::unbounded();
    let issuer = client.clone();
    harness
        .context()
        .schedule(move || {
            for i in 0..5 {
                let tx = tx.clone();
                issuer.send(
                    vec![i as u8],
                    "127.0.0.1",
                    addr.port(),
                    handler(move |result| {
                        let _ = tx.send((i, result.is_ok()));
                    }),
                );
            }
        })
        .unwrap();

    let order: Vec<(i32, bool)> = (0..5).map(|_| wait(&rx)).collect();
    assert_eq!(order, (0..5).map(|i| (i, true)).collect::<Vec<_>>());
}
