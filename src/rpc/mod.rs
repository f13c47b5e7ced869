//! Length-prefixed protobuf RPC framing over a [`Connection`](crate::net::Connection)
//! (spec component C12). Gated behind the `rpc` feature so the
//! reactor/timer/future core builds without a protoc toolchain.

mod client;
mod error;
mod frame;
mod server;

pub use client::ClientChannel;
pub use error::RpcError;
pub use frame::{Decoded, Error as WireError, Frame, FrameCodec, LengthPrefixedCodec, Request, Response, MAX_FRAME_LEN};
pub use server::{MethodHandler, MethodResponder, MethodSelector, ServerChannel};
