//! Server side of the RPC channel (spec component C12).
//!
//! Grounded in `original_source/protobuf_rpc/AnanasRpc.{h,cc}`'s
//! `RpcService` dispatch, separated from [`super::client::ClientChannel`] per the "dual
//! life of RpcChannel" note (spec.md §9): this owns the method table and
//! in-flight dispatch, never a pending-request map. Method handlers run
//! via `handle.execute`, so a handler that blocks briefly never stalls
//! the loop's other channels for longer than one re-entry.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::net::Connection;
use crate::reactor::ReactorHandle;

use super::error::RpcError;
use super::frame::{frame, Decoded, Error as WireError, Frame, FrameCodec, LengthPrefixedCodec, Request, Response};

/// A method implementation: request payload in, a [`MethodResponder`] to
/// reply with. Shared across invocations via `Arc`, since the same
/// method may be called concurrently by different connections.
pub type MethodHandler = Arc<dyn Fn(Vec<u8>, MethodResponder) + Send + Sync>;

/// Resolves a request's method name from its raw payload when
/// `method_name` wasn't supplied on the frame (spec.md §4.10, custom
/// non-protobuf encodings).
pub type MethodSelector = Arc<dyn Fn(&[u8]) -> Option<String> + Send + Sync>;

/// The one-shot completion handle a method handler uses to send its
/// response. Dropping it without calling `reply`/`fail` leaves the
/// request unanswered — callers that want a guaranteed response should
/// always call one of the two.
pub struct MethodResponder {
    id: i32,
    conn: Arc<Mutex<Connection>>,
    handle: ReactorHandle,
    codec: Arc<dyn FrameCodec>,
}

impl MethodResponder {
    /// Sends a successful response. A no-op for one-way requests (`id ==
    /// 0`, spec.md §4.10).
    pub fn reply(self, payload: Vec<u8>) {
        if self.id == 0 {
            return;
        }
        self.send(Response { id: self.id, error: None, serialized_response: payload });
    }

    /// Sends a framed error response; the connection stays open (spec.md
    /// §7, "RPC server-recoverable errors return a framed error response").
    pub fn fail(self, code: i32, message: impl Into<String>) {
        if self.id == 0 {
            return;
        }
        let response = Response { id: self.id, error: Some(WireError { code, message: message.into() }), serialized_response: Vec::new() };
        self.send(response);
    }

    fn send(self, response: Response) {
        let frame = Frame { body: Some(frame::Body::Response(response)) };
        match self.codec.encode(&frame) {
            Ok(bytes) => {
                let conn = self.conn.clone();
                let handle = self.handle.clone();
                // Re-enter the owning loop: a handler may run on a thread
                // pool thread, but only the loop thread may touch the
                // connection's state (spec.md §9, "the loop exclusively
                // owns its registered channels").
                self.handle.execute(Box::new(move || {
                    if let Err(err) = conn.lock().unwrap().send_packet(&bytes, &handle) {
                        tracing::warn!(error = %err, "failed to send RPC response");
                    }
                }));
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode RPC response"),
        }
    }
}

/// Dispatches incoming request frames on an established [`Connection`] to
/// a fixed table of method handlers for one named service.
pub struct ServerChannel {
    conn: Arc<Mutex<Connection>>,
}

impl ServerChannel {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        handle: ReactorHandle,
        service_name: impl Into<String>,
        methods: HashMap<String, MethodHandler>,
    ) -> ServerChannel {
        Self::with_codec(conn, handle, service_name, methods, None, Arc::new(LengthPrefixedCodec))
    }

    pub fn with_codec(
        conn: Arc<Mutex<Connection>>,
        handle: ReactorHandle,
        service_name: impl Into<String>,
        methods: HashMap<String, MethodHandler>,
        method_selector: Option<MethodSelector>,
        codec: Arc<dyn FrameCodec>,
    ) -> ServerChannel {
        let service_name = Arc::new(service_name.into());
        let methods = Arc::new(methods);

        // See `ClientChannel::with_codec`: keep the connection's own
        // oversized-message backstop from being tighter than the wire's
        // frame ceiling.
        conn.lock().unwrap().set_max_packet_size(super::frame::MAX_FRAME_LEN);

        let service_for_message = service_name.clone();
        let methods_for_message = methods.clone();
        let selector_for_message = method_selector.clone();
        let codec_for_message = codec.clone();
        let conn_for_message = conn.clone();
        let handle_for_message = handle.clone();

        conn.lock().unwrap().set_on_message(move |active_conn, bytes| match codec_for_message.decode(bytes) {
            Ok(Decoded::WaitMore) => 0,
            Ok(Decoded::Frame(frame, consumed)) => {
                Self::dispatch_request(
                    &service_for_message,
                    &methods_for_message,
                    &selector_for_message,
                    &conn_for_message,
                    &handle_for_message,
                    &codec_for_message,
                    frame,
                );
                consumed
            }
            Err(err) => {
                tracing::warn!(error = %err, "fatal frame decode error, closing connection");
                active_conn.active_close(&handle_for_message);
                bytes.len()
            }
        });

        ServerChannel { conn }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_request(
        service_name: &str,
        methods: &HashMap<String, MethodHandler>,
        method_selector: &Option<MethodSelector>,
        conn: &Arc<Mutex<Connection>>,
        handle: &ReactorHandle,
        codec: &Arc<dyn FrameCodec>,
        frame: Frame,
    ) {
        let request = match frame.body {
            Some(frame::Body::Request(req)) => req,
            Some(frame::Body::Response(_)) => {
                tracing::warn!("server received a response frame, ignoring");
                return;
            }
            None => unreachable!("the codec rejects bodyless frames before they reach dispatch"),
        };
        let Request { id, service_name: req_service, method_name, serialized_request } = request;

        if req_service.is_empty() && method_name.is_empty() {
            Self::respond_error(id, conn, handle, codec, &RpcError::EmptyRequest);
            return;
        }
        if req_service != service_name {
            Self::respond_error(id, conn, handle, codec, &RpcError::NoSuchService(req_service));
            return;
        }

        let method_name = if method_name.is_empty() {
            match method_selector {
                Some(selector) => selector(&serialized_request),
                None => None,
            }
        } else {
            Some(method_name)
        };
        let Some(method_name) = method_name else {
            tracing::error!("request's method could not be determined, closing connection");
            conn.lock().unwrap().active_close(handle);
            return;
        };

        let Some(handler) = methods.get(&method_name) else {
            Self::respond_error(id, conn, handle, codec, &RpcError::NoSuchMethod(method_name, service_name.to_string()));
            return;
        };

        let handler = handler.clone();
        let conn = conn.clone();
        let handle_for_task = handle.clone();
        let codec = codec.clone();
        handle.execute(Box::new(move || {
            let responder = MethodResponder { id, conn: conn.clone(), handle: handle_for_task.clone(), codec: codec.clone() };
            if panic::catch_unwind(AssertUnwindSafe(|| handler(serialized_request, responder))).is_err() {
                MethodResponder { id, conn, handle: handle_for_task, codec }
                    .fail(RpcError::ThrowInMethod(String::new()).wire_code(), "method handler panicked");
            }
        }));
    }

    fn respond_error(id: i32, conn: &Arc<Mutex<Connection>>, handle: &ReactorHandle, codec: &Arc<dyn FrameCodec>, err: &RpcError) {
        debug_assert!(err.is_recoverable(), "fatal RPC errors must close the connection instead of responding");
        MethodResponder { id, conn: conn.clone(), handle: handle.clone(), codec: codec.clone() }.fail(err.wire_code(), err.to_string());
    }
}
