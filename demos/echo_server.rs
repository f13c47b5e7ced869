//! Minimal echo server: binds a [`Listener`], echoes every line back to
//! its sender. Run with `cargo run --bin echo_server -- 127.0.0.1:7070`.

use corevent::net::Listener;
use corevent::Reactor;

fn main() {
    tracing_subscriber::fmt::init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7070".to_string());
    let addr = addr.parse().expect("invalid listen address");

    let mut reactor = Reactor::new().expect("failed to build the reactor");
    let handle = reactor.handle();

    let mut listener = Listener::bind(addr).expect("failed to bind the listener");
    tracing::info!(addr = %listener.local_addr(), "echo server listening");

    listener.set_on_new_conn(|conn, handle| {
        let mut guard = conn.lock().unwrap();
        guard.set_min_packet_size(1);
        let handle = handle.clone();
        guard.set_on_message(move |conn, bytes| {
            let Some(newline) = bytes.iter().position(|&b| b == b'\n') else {
                return 0;
            };
            let line = &bytes[..=newline];
            tracing::debug!(peer = %conn.peer(), bytes = line.len(), "echoing line");
            if let Err(err) = conn.send_packet(line, &handle) {
                tracing::warn!(error = %err, "failed to echo line back");
            }
            line.len()
        });
    });

    let shared = std::sync::Arc::new(std::sync::Mutex::new(listener));
    handle.register(shared, corevent::Interest::READ).expect("failed to register the listener");

    reactor.run().expect("reactor loop exited with an error");
}
