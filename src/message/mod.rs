//! The wire schema and its codec.
//!
//! Every frame on a connection is one self-describing [`Message`] record,
//! bincode-encoded inside a length-delimited frame. The schema is typed and
//! field-tagged end to end; nothing on the wire can make the decoder
//! execute anything, it either yields a well-formed [`Message`] or a
//! [`DecodeError`] that the receiver logs and drops.

use std::io;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{crypto::PublicKey, BundleDict, KeyDict};

/// Upper bound on a single frame. A `perturbations` frame for a large
/// session is the biggest legitimate message; 8 MiB leaves room for
/// thousands of peers before a frame is rejected.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("transport failure: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
/// One protocol frame.
///
/// The payload field names follow the wire schema: `init_base_param`,
/// `message`, `public_key`, `public_key_broadcast`, `perturbations`,
/// `value` and `aggregation_result` records.
pub enum Message {
    /// Coordinator → client, sent on admission: the modular base of this
    /// session.
    InitBaseParam { base: u64 },

    /// Coordinator → client, informational only; never advances any state
    /// machine.
    Notice { message: String },

    /// Client → coordinator: the client's public encryption key.
    PublicKey { public_key: PublicKey },

    /// Coordinator → client: the completed key directory of the session.
    PublicKeyBroadcast { public_keys: KeyDict },

    /// Client → coordinator: one sealed seed bundle per peer, keyed by
    /// recipient. Coordinator → client: the bundles sealed for this client,
    /// keyed by creator.
    Perturbations { perturbations: BundleDict },

    /// Client → coordinator: the masked vector.
    Value { value: Vec<u64> },

    /// Coordinator → client: the element-wise modular sum of all submitted
    /// vectors.
    AggregationResult { aggregation_result: Vec<u64> },
}

impl Message {
    /// The wire-schema tag of this frame, used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::InitBaseParam { .. } => "init_base_param",
            Message::Notice { .. } => "message",
            Message::PublicKey { .. } => "public_key",
            Message::PublicKeyBroadcast { .. } => "public_key_broadcast",
            Message::Perturbations { .. } => "perturbations",
            Message::Value { .. } => "value",
            Message::AggregationResult { .. } => "aggregation_result",
        }
    }
}

/// Frames [`Message`]s over a byte stream: 4-byte big-endian length prefix,
/// then the bincode payload.
pub struct MessageCodec(LengthDelimitedCodec);

impl MessageCodec {
    pub fn new() -> Self {
        Self(
            LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        )
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, DecodeError> {
        let frame = match self.0.decode(src)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        Ok(Some(bincode::deserialize(&frame)?))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = DecodeError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), DecodeError> {
        let payload = bincode::serialize(&message)?;
        self.0.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
