//! Smallest possible RPC round trip: a "ping" service with one method,
//! served and called over the length-prefixed protobuf framing (spec
//! component C12).
//!
//! Run a server in one terminal and a client in another:
//! `cargo run --features rpc --bin rpc_ping -- server 127.0.0.1:7080`
//! `cargo run --features rpc --bin rpc_ping -- client 127.0.0.1:7080 hello`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use corevent::net::{Connector, Listener};
use corevent::rpc::{ClientChannel, MethodHandler, ServerChannel};
use corevent::Reactor;

const SERVICE: &str = "ping";
const METHOD: &str = "echo";

fn run_server(addr: std::net::SocketAddr) {
    let mut reactor = Reactor::new().expect("failed to build the reactor");
    let handle = reactor.handle();

    let mut listener = Listener::bind(addr).expect("failed to bind the listener");
    tracing::info!(addr = %listener.local_addr(), "rpc_ping server listening");

    listener.set_on_new_conn(|conn, handle| {
        let mut methods: HashMap<String, MethodHandler> = HashMap::new();
        methods.insert(
            METHOD.to_string(),
            Arc::new(|payload: Vec<u8>, responder| {
                tracing::debug!(bytes = payload.len(), "echoing ping payload back");
                responder.reply(payload);
            }),
        );
        // `ServerChannel` is just the builder for the `on_message` hook it
        // installs on `conn`; the hook's own captured clones keep the
        // dispatch table alive, so the returned value can be dropped right
        // away.
        let _ = ServerChannel::new(conn, handle.clone(), SERVICE, methods);
    });

    let shared = std::sync::Arc::new(std::sync::Mutex::new(listener));
    handle.register(shared, corevent::Interest::READ).expect("failed to register the listener");

    reactor.run().expect("reactor loop exited with an error");
}

fn run_client(addr: std::net::SocketAddr, message: String) {
    let mut reactor = Reactor::new().expect("failed to build the reactor");
    let handle = reactor.handle();

    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(5))
        .expect("failed to start the connect");

    let client_handle = handle.clone();
    let roundtrip = connect.and_then(move |conn| {
        let client = ClientChannel::new(conn, client_handle.clone());
        client.call(SERVICE, METHOD, message.into_bytes())
    });

    let reactor_thread = std::thread::spawn(move || reactor.run());

    match roundtrip.wait() {
        corevent::Try::Ok(reply) => println!("{}", String::from_utf8_lossy(&reply)),
        corevent::Try::Err(err) => eprintln!("rpc call failed: {err}"),
    }
    handle.stop();
    reactor_thread.join().expect("reactor thread panicked").expect("reactor loop exited with an error");
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "server".to_string());
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7080".to_string());
    let addr = addr.parse().expect("invalid address");

    match mode.as_str() {
        "server" => run_server(addr),
        "client" => {
            let message = args.next().unwrap_or_else(|| "ping".to_string());
            run_client(addr, message);
        }
        other => eprintln!("unknown mode {other:?}, expected \"server\" or \"client\""),
    }
}
