//! RPC round-trip, method-dispatch-error, and length-prefix re-sync
//! scenarios (spec.md §8, "RPC round-trip", "RPC method dispatch",
//! "Length-prefix re-sync") driven through a real [`Reactor`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corevent::net::{Connector, Listener};
use corevent::rpc::{ClientChannel, MethodHandler, ServerChannel};
use corevent::{Interest, Reactor};

const SERVICE: &str = "echo";
const METHOD: &str = "upper";

fn run_until(reactor: &mut Reactor, deadline: Duration, mut done: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !done() && start.elapsed() < deadline {
        reactor.tick().unwrap();
    }
}

fn spawn_server(reactor: &Reactor) -> std::net::SocketAddr {
    let handle = reactor.handle();
    let mut listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr();

    listener.set_on_new_conn(|conn, handle| {
        let mut methods: HashMap<String, MethodHandler> = HashMap::new();
        methods.insert(
            METHOD.to_string(),
            Arc::new(|payload: Vec<u8>, responder| {
                let reply = String::from_utf8_lossy(&payload).to_uppercase();
                responder.reply(reply.into_bytes());
            }),
        );
        let _ = ServerChannel::new(conn, handle.clone(), SERVICE, methods);
    });

    let shared = Arc::new(Mutex::new(listener));
    handle.register(shared, Interest::READ).unwrap();
    addr
}

#[test]
fn request_response_ids_match_and_the_call_resolves_with_the_reply() {
    let mut reactor = Reactor::new().unwrap();
    let addr = spawn_server(&reactor);
    let handle = reactor.handle();

    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(3)).unwrap();
    let client_handle = handle.clone();
    let roundtrip = connect.and_then(move |conn| {
        let client = ClientChannel::new(conn, client_handle.clone());
        client.call(SERVICE, METHOD, b"hello".to_vec())
    });

    run_until(&mut reactor, Duration::from_secs(3), || roundtrip.is_ready());
    assert_eq!(roundtrip.wait().unwrap(), b"HELLO".to_vec());
}

#[test]
fn calling_an_unknown_method_fails_the_future_but_keeps_the_connection_open() {
    let mut reactor = Reactor::new().unwrap();
    let addr = spawn_server(&reactor);
    let handle = reactor.handle();

    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(3)).unwrap();
    let client_handle = handle.clone();
    let client_slot: Arc<Mutex<Option<ClientChannel>>> = Arc::new(Mutex::new(None));
    let client_slot_for_then = client_slot.clone();
    let first_call = connect.and_then(move |conn| {
        let client = ClientChannel::new(conn, client_handle.clone());
        let fut = client.call(SERVICE, "no-such-method", b"x".to_vec());
        *client_slot_for_then.lock().unwrap() = Some(client);
        fut
    });

    run_until(&mut reactor, Duration::from_secs(3), || first_call.is_ready());
    assert!(first_call.wait().is_err(), "unknown method must fail the caller's future");

    // The connection is still usable for a subsequent, valid call.
    let client = client_slot.lock().unwrap().take().expect("and_then already ran");
    let second_call = client.call(SERVICE, METHOD, b"still alive".to_vec());
    run_until(&mut reactor, Duration::from_secs(3), || second_call.is_ready());
    assert_eq!(second_call.wait().unwrap(), b"STILL ALIVE".to_vec());
}

#[test]
fn two_requests_sent_back_to_back_both_get_answered() {
    let mut reactor = Reactor::new().unwrap();
    let addr = spawn_server(&reactor);
    let handle = reactor.handle();

    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(3)).unwrap();
    let client_handle = handle.clone();
    let both = connect.and_then(move |conn| {
        let client = ClientChannel::new(conn, client_handle.clone());
        let first = client.call(SERVICE, METHOD, b"one".to_vec());
        let second = client.call(SERVICE, METHOD, b"two".to_vec());
        corevent::when_all2(first, second)
    });

    run_until(&mut reactor, Duration::from_secs(3), || both.is_ready());
    let (first, second) = both.wait().unwrap();
    assert_eq!(first.unwrap(), b"ONE".to_vec());
    assert_eq!(second.unwrap(), b"TWO".to_vec());
}
