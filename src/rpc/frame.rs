//! Wire frame type and its length-prefixed codec (spec component C12,
//! spec.md §4.10 "Framing").
//!
//! `Frame`/`Request`/`Response`/`Error` are generated by `build.rs` from
//! `proto/frame.proto`. The codec wraps the generated `prost::Message` in
//! a 4-byte little-endian length prefix counting the whole frame
//! including those 4 bytes, matching `original_source/protobuf_rpc`'s
//! wire layout.

include!(concat!(env!("OUT_DIR"), "/corevent.rpc.rs"));

use prost::Message;

use super::error::RpcError;

/// Frames at or over `MAX_FRAME_LEN` bytes are rejected outright rather
/// than accumulated — a corrupt or hostile length prefix should not make
/// the reassembly buffer grow without bound. Matches spec.md §6: "Frames
/// with L ≤ 4 or L ≥ 100 MiB are protocol violations".
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;
const LENGTH_PREFIX_LEN: usize = 4;

/// Result of attempting to decode one frame from the front of a byte
/// slice: either a complete frame plus how many bytes it consumed, or a
/// request for more bytes.
pub enum Decoded {
    Frame(Frame, usize),
    WaitMore,
}

/// Translates [`Frame`] values to and from the wire. The default
/// [`LengthPrefixedCodec`] is swappable for a non-protobuf layout (HTTP,
/// Redis) via [`FrameCodec`] (spec.md §4.10, "two hook points allow
/// bypass").
pub trait FrameCodec: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, RpcError>;
    fn decode(&self, buf: &[u8]) -> Result<Decoded, RpcError>;
}

/// `[u32 little-endian total length][protobuf-encoded Frame]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixedCodec;

impl FrameCodec for LengthPrefixedCodec {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, RpcError> {
        let body = frame.encode_to_vec();
        let total = LENGTH_PREFIX_LEN + body.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, buf: &[u8]) -> Result<Decoded, RpcError> {
        if buf.len() < LENGTH_PREFIX_LEN {
            return Ok(Decoded::WaitMore);
        }
        let total = u32::from_le_bytes(buf[..LENGTH_PREFIX_LEN].try_into().unwrap()) as usize;
        if total <= LENGTH_PREFIX_LEN || total >= MAX_FRAME_LEN {
            return Err(RpcError::DecodeFail(format!("invalid frame length {total}")));
        }
        if buf.len() < total {
            return Ok(Decoded::WaitMore);
        }
        let frame = Frame::decode(&buf[LENGTH_PREFIX_LEN..total])
            .map_err(|e| RpcError::DecodeFail(e.to_string()))?;
        if frame.body.is_none() {
            return Err(RpcError::DecodeFail("frame has neither request nor response body".into()));
        }
        Ok(Decoded::Frame(frame, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request_frame() {
        let codec = LengthPrefixedCodec;
        let frame = Frame {
            body: Some(frame::Body::Request(Request {
                id: 7,
                service_name: "Echo".into(),
                method_name: "Ping".into(),
                serialized_request: b"hi".to_vec(),
            })),
        };
        let bytes = codec.encode(&frame).unwrap();
        match codec.decode(&bytes).unwrap() {
            Decoded::Frame(decoded, consumed) => {
                assert_eq!(consumed, bytes.len());
                match decoded.body {
                    Some(frame::Body::Request(req)) => {
                        assert_eq!(req.id, 7);
                        assert_eq!(req.service_name, "Echo");
                        assert_eq!(req.serialized_request, b"hi");
                    }
                    _ => panic!("expected a request body"),
                }
            }
            Decoded::WaitMore => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn waits_for_more_bytes_on_a_partial_length_prefix() {
        let codec = LengthPrefixedCodec;
        assert!(matches!(codec.decode(&[1, 2]).unwrap(), Decoded::WaitMore));
    }

    #[test]
    fn waits_for_more_bytes_on_a_partial_body() {
        let codec = LengthPrefixedCodec;
        let frame = Frame {
            body: Some(frame::Body::Request(Request {
                id: 1,
                service_name: "S".into(),
                method_name: "M".into(),
                serialized_request: vec![0; 64],
            })),
        };
        let bytes = codec.encode(&frame).unwrap();
        assert!(matches!(codec.decode(&bytes[..bytes.len() - 1]).unwrap(), Decoded::WaitMore));
    }

    #[test]
    fn two_back_to_back_frames_decode_independently() {
        let codec = LengthPrefixedCodec;
        let one = codec
            .encode(&Frame {
                body: Some(frame::Body::Request(Request {
                    id: 1,
                    service_name: "S".into(),
                    method_name: "M".into(),
                    serialized_request: vec![],
                })),
            })
            .unwrap();
        let two = codec
            .encode(&Frame {
                body: Some(frame::Body::Request(Request {
                    id: 2,
                    service_name: "S".into(),
                    method_name: "M".into(),
                    serialized_request: vec![],
                })),
            })
            .unwrap();
        let mut combined = one.clone();
        combined.extend_from_slice(&two);

        let (first, consumed) = match codec.decode(&combined).unwrap() {
            Decoded::Frame(f, n) => (f, n),
            Decoded::WaitMore => panic!("expected a complete frame"),
        };
        assert_eq!(consumed, one.len());
        match first.body {
            Some(frame::Body::Request(req)) => assert_eq!(req.id, 1),
            _ => panic!("expected a request body"),
        }

        match codec.decode(&combined[consumed..]).unwrap() {
            Decoded::Frame(f, n) => {
                assert_eq!(n, two.len());
                match f.body {
                    Some(frame::Body::Request(req)) => assert_eq!(req.id, 2),
                    _ => panic!("expected a request body"),
                }
            }
            Decoded::WaitMore => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn rejects_an_absurd_length_prefix() {
        let codec = LengthPrefixedCodec;
        let mut bytes = (u32::MAX).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        assert!(codec.decode(&bytes).is_err());
    }
}
