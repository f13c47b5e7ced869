//! Minimal echo client: connects with a timeout, sends each stdin line,
//! prints what comes back. Run with
//! `cargo run --bin echo_client -- 127.0.0.1:7070`.

use std::io::BufRead;
use std::time::Duration;

use corevent::net::Connector;
use corevent::Reactor;

fn main() {
    tracing_subscriber::fmt::init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7070".to_string());
    let addr = addr.parse().expect("invalid connect address");

    let mut reactor = Reactor::new().expect("failed to build the reactor");
    let handle = reactor.handle();

    let connect = Connector::connect(&handle, handle.clone(), addr, Duration::from_secs(5))
        .expect("failed to start the connect");

    let connected = connect.then(|conn| {
        conn.lock().unwrap().set_on_message(|conn, bytes| {
            print!("{}", String::from_utf8_lossy(bytes));
            tracing::debug!(peer = %conn.peer(), "received echo");
            bytes.len()
        });
        conn.lock().unwrap().set_on_disconnect(|_conn, _handle| {
            tracing::info!("server closed the connection");
        });
        conn
    });

    // The reactor has to be polling before `connected.wait()` can resolve,
    // so the loop itself runs on its own thread; this thread blocks on the
    // connect outcome, then on stdin.
    let reactor_thread = std::thread::spawn(move || reactor.run());

    match connected.wait() {
        corevent::Try::Ok(conn) => {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(Result::ok) {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                let conn = conn.clone();
                let send_handle = handle.clone();
                // Sends must happen on the loop thread that owns this
                // connection's registration (DESIGN.md).
                handle.execute(Box::new(move || {
                    if let Err(err) = conn.lock().unwrap().send_packet(&bytes, &send_handle) {
                        tracing::warn!(error = %err, "failed to send line");
                    }
                }));
            }
            handle.stop();
        }
        corevent::Try::Err(err) => {
            eprintln!("failed to connect: {err}");
            handle.stop();
        }
    }

    reactor_thread.join().expect("reactor thread panicked").expect("reactor loop exited with an error");
}
