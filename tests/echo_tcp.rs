//! Echo round trip and connect-fail-timeout scenarios (spec.md §8,
//! "Echo TCP" and "Connect fail") driven through a real [`Reactor`].

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corevent::net::{Connector, Listener};
use corevent::{Interest, Reactor};

fn run_until(reactor: &mut Reactor, deadline: Duration, mut done: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !done() && start.elapsed() < deadline {
        reactor.tick().unwrap();
    }
}

#[test]
fn client_sends_hello_and_observes_it_echoed_back() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let disconnects = Arc::new(AtomicUsize::new(0));
    let disc_for_listener = disconnects.clone();

    let mut listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr();
    listener.set_on_new_conn(move |conn, handle| {
        let echo_handle = handle.clone();
        let mut guard = conn.lock().unwrap();
        guard.set_min_packet_size(1);
        guard.set_on_message(move |conn, bytes| {
            conn.send_packet(bytes, &echo_handle).ok();
            bytes.len()
        });
        let disc = disc_for_listener.clone();
        guard.set_on_disconnect(move |_conn, _handle| {
            disc.fetch_add(1, Ordering::SeqCst);
        });
    });
    let server_shared = Arc::new(Mutex::new(listener));
    handle.register(server_shared, Interest::READ).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));

    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(3)).unwrap();
    let recv_for_then = received.clone();
    let handle_for_then = handle.clone();
    let connected = connect.then(move |conn| {
        let recv_for_cb = recv_for_then.clone();
        conn.lock().unwrap().set_on_message(move |_conn, bytes| {
            recv_for_cb.lock().unwrap().extend_from_slice(bytes);
            bytes.len()
        });
        conn.lock().unwrap().send_packet(b"hello", &handle_for_then).unwrap();
        conn
    });

    run_until(&mut reactor, Duration::from_secs(2), || received.lock().unwrap().len() >= 5);
    assert_eq!(&*received.lock().unwrap(), b"hello");

    // Client closes; the server's `on_disconnect` must fire exactly once.
    let conn = connected.wait().unwrap();
    conn.lock().unwrap().active_close(&handle);
    run_until(&mut reactor, Duration::from_secs(2), || disconnects.load(Ordering::SeqCst) >= 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn connecting_to_a_closed_port_fails_within_the_timeout() {
    let probe = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let connected = Arc::new(AtomicUsize::new(0));
    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(3)).unwrap();
    let connected_flag = connected.clone();
    let watched = connect.then(move |conn| {
        connected_flag.fetch_add(1, Ordering::SeqCst);
        conn
    });

    run_until(&mut reactor, Duration::from_secs(3), || watched.is_ready());
    assert!(watched.is_ready());
    assert_eq!(connected.load(Ordering::SeqCst), 0, "on_connect must never fire for a refused connect");
    assert!(watched.wait().is_err());
}
