//! Client side of the RPC channel (spec component C12).
//!
//! Grounded in `original_source/protobuf_rpc/RpcServiceStub.{h,cc}`'s
//! `ClientChannel`, split out per the "dual life of RpcChannel"
//! re-architecture note (spec.md §9):
//! a `ClientChannel` owns the pending-request map and the
//! `message → frame → bytes` send pipeline; [`super::server::ServerChannel`]
//! owns dispatch. Both drive the same underlying [`Connection`], installed
//! through its `on_message`/`on_disconnect` hooks exactly like the
//! raw-byte protocols `Connection` was already built to host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::future::{Future, Promise};
use crate::net::Connection;
use crate::reactor::ReactorHandle;

use super::error::RpcError;
use super::frame::{frame, Decoded, Frame, FrameCodec, LengthPrefixedCodec, Request, Response};

type PendingMap = Mutex<HashMap<i32, Promise<Vec<u8>>>>;

/// Issues requests over an established [`Connection`] and resolves the
/// future for each one when its matching response frame arrives.
pub struct ClientChannel {
    conn: Arc<Mutex<Connection>>,
    handle: ReactorHandle,
    codec: Arc<dyn FrameCodec>,
    pending: Arc<PendingMap>,
    next_id: AtomicI32,
}

impl ClientChannel {
    /// Attaches a `ClientChannel` to `conn`, installing the receive-side
    /// hooks. `conn` must already be registered with `handle`.
    pub fn new(conn: Arc<Mutex<Connection>>, handle: ReactorHandle) -> ClientChannel {
        Self::with_codec(conn, handle, Arc::new(LengthPrefixedCodec))
    }

    pub fn with_codec(conn: Arc<Mutex<Connection>>, handle: ReactorHandle, codec: Arc<dyn FrameCodec>) -> ClientChannel {
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));

        // The connection's own backstop against an unbounded reassembly
        // buffer (spec.md §4.6) must not be tighter than the wire's own
        // frame ceiling (spec.md §6), or a legitimately large-but-valid
        // frame would get the connection killed before the codec ever
        // saw it complete.
        conn.lock().unwrap().set_max_packet_size(super::frame::MAX_FRAME_LEN);

        let pending_for_message = pending.clone();
        let codec_for_message = codec.clone();
        let handle_for_message = handle.clone();
        conn.lock().unwrap().set_on_message(move |conn, bytes| match codec_for_message.decode(bytes) {
            Ok(Decoded::WaitMore) => 0,
            Ok(Decoded::Frame(frame, consumed)) => {
                Self::dispatch_response(&pending_for_message, frame, conn, &handle_for_message);
                consumed
            }
            Err(err) => {
                tracing::warn!(error = %err, "fatal frame decode error, closing connection");
                conn.active_close(&handle_for_message);
                bytes.len()
            }
        });

        let pending_for_disconnect = pending.clone();
        conn.lock().unwrap().set_on_disconnect(move |_conn, _handle| {
            for (_, pm) in pending_for_disconnect.lock().unwrap().drain() {
                pm.set_exception(Box::new(RpcError::ConnectionLost));
            }
        });

        ClientChannel { conn, handle, codec, pending, next_id: AtomicI32::new(1) }
    }

    /// On a hit, resolves the matching pending request. On a miss — a
    /// response id with no pending entry — closes the connection as a
    /// protocol violation (spec.md §4.10: "on miss, close the connection").
    fn dispatch_response(pending: &Arc<PendingMap>, frame: Frame, conn: &mut Connection, handle: &ReactorHandle) {
        let response = match frame.body {
            Some(frame::Body::Response(r)) => r,
            _ => {
                tracing::warn!("client received a non-response frame, closing connection");
                conn.active_close(handle);
                return;
            }
        };
        let Response { id, error, serialized_response } = response;
        let pm = pending.lock().unwrap().remove(&id);
        let Some(pm) = pm else {
            tracing::warn!(id, "response for an unknown or already-resolved request id, closing connection");
            conn.active_close(handle);
            return;
        };
        match error {
            Some(err) => pm.set_exception(Box::new(RpcError::Remote { code: err.code, message: err.message })),
            None => pm.set_value(serialized_response),
        }
    }

    /// Sends a request and returns a future for its response. The pending
    /// entry is removed either when the matching response arrives, the
    /// connection is lost, or the send itself fails.
    pub fn call(&self, service_name: &str, method_name: &str, payload: Vec<u8>) -> Future<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (pm, fut) = Promise::<Vec<u8>>::pair();
        self.pending.lock().unwrap().insert(id, pm);
        if let Err(err) = self.send_request(id, service_name, method_name, payload) {
            if let Some(pm) = self.pending.lock().unwrap().remove(&id) {
                pm.set_exception(Box::new(err));
            }
        }
        fut
    }

    /// Sends a request with no response slot: no pending entry is
    /// created and no id is tracked (spec.md §4.10, "one-way RPC").
    pub fn call_one_way(&self, service_name: &str, method_name: &str, payload: Vec<u8>) {
        if let Err(err) = self.send_request(0, service_name, method_name, payload) {
            tracing::warn!(error = %err, "one-way RPC send failed");
        }
    }

    fn send_request(&self, id: i32, service_name: &str, method_name: &str, payload: Vec<u8>) -> Result<(), RpcError> {
        let frame = Frame {
            body: Some(frame::Body::Request(Request {
                id,
                service_name: service_name.to_string(),
                method_name: method_name.to_string(),
                serialized_request: payload,
            })),
        };
        let bytes = self.codec.encode(&frame)?;
        self.conn.lock().unwrap().send_packet(&bytes, &self.handle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::net::connection::ConnState;
    use crate::reactor::Reactor;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn connected_pair() -> (Arc<Mutex<Connection>>, TcpStream, ReactorHandle) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer_side = TcpStream::connect(addr).unwrap();
        let (server_sock, peer_addr) = listener.accept().unwrap();
        let conn = Arc::new(Mutex::new(Connection::from_stream(server_sock, peer_addr).unwrap()));
        let reactor = Reactor::new().unwrap();
        (conn, peer_side, reactor.handle())
    }

    /// spec.md §4.10: "on miss, close the connection (protocol violation)".
    #[test]
    fn response_for_an_unknown_request_id_closes_the_connection() {
        let (conn, mut peer_side, handle) = connected_pair();
        let _client = ClientChannel::new(conn.clone(), handle.clone());

        let bogus = Frame { body: Some(frame::Body::Response(Response { id: 999, error: None, serialized_response: b"huh".to_vec() })) };
        let bytes = LengthPrefixedCodec.encode(&bogus).unwrap();
        peer_side.write_all(&bytes).unwrap();
        // Give the kernel a moment to deliver the bytes to the accepted side.
        std::thread::sleep(std::time::Duration::from_millis(20));

        conn.lock().unwrap().on_readable(&handle).unwrap();
        assert_eq!(conn.lock().unwrap().state(), ConnState::Closed);
    }
}
