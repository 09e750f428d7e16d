//! Chunk framing for shipping one message over a small-chunk link.
//!
//! The link preserves chunk boundaries and order but has no notion of a
//! message. Every chunk therefore starts with a one-byte tag:
//!
//! ```text
//! +------+---------------------------+
//! | 0x01 | length (u32, big-endian)  |   SOM  start of message
//! +------+---------------------------+
//! | 0x02 | payload (1..=max-1 bytes) |   DATA
//! +------+---------------------------+
//! | 0x03 |                           |   EOM  end of message
//! +------+---------------------------+
//! ```
//!
//! Because the tag is positional, no payload content can be mistaken for a
//! sentinel. The length in SOM lets the receiver detect a truncated or
//! overlong message.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, SyncError};

/// Tag byte of a start-of-message chunk
pub const TAG_SOM: u8 = 0x01;
/// Tag byte of a payload chunk
pub const TAG_DATA: u8 = 0x02;
/// Tag byte of an end-of-message chunk
pub const TAG_EOM: u8 = 0x03;

/// Size of an encoded SOM chunk
pub const SOM_LEN: usize = 5;

/// Smallest link chunk size that can carry a SOM
pub const MIN_CHUNK_SIZE: usize = SOM_LEN;

/// Chunk size of the reference radio transport
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// One decoded chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Start { len: u32 },
    Data(Bytes),
    End,
}

impl Frame {
    /// Parse one chunk as received from the link
    pub fn parse(chunk: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, body) = chunk.split_first().ok_or(ProtocolError::EmptyChunk)?;
        match tag {
            TAG_SOM => {
                let len: [u8; 4] = body
                    .try_into()
                    .map_err(|_| ProtocolError::MalformedStart(chunk.len()))?;
                Ok(Frame::Start {
                    len: u32::from_be_bytes(len),
                })
            }
            TAG_DATA => Ok(Frame::Data(Bytes::copy_from_slice(body))),
            TAG_EOM => Ok(Frame::End),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Encode as one link chunk
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Start { len } => {
                let mut buf = BytesMut::with_capacity(SOM_LEN);
                buf.put_u8(TAG_SOM);
                buf.put_u32(*len);
                buf.freeze()
            }
            Frame::Data(payload) => {
                let mut buf = BytesMut::with_capacity(1 + payload.len());
                buf.put_u8(TAG_DATA);
                buf.put_slice(payload);
                buf.freeze()
            }
            Frame::End => Bytes::from_static(&[TAG_EOM]),
        }
    }
}

/// Payload bytes carried by one DATA chunk for a link chunk size
pub fn payload_per_chunk(max_chunk_size: usize) -> usize {
    max_chunk_size.saturating_sub(1)
}

/// Reject link chunk sizes that cannot carry a SOM
pub fn check_chunk_size(max_chunk_size: usize) -> Result<(), SyncError> {
    if max_chunk_size < MIN_CHUNK_SIZE {
        return Err(SyncError::ChunkSize {
            size: max_chunk_size,
            min: MIN_CHUNK_SIZE,
        });
    }
    Ok(())
}

/// The length a SOM announces for `payload`
pub fn announced_len(payload: &[u8]) -> Result<u32, SyncError> {
    u32::try_from(payload.len()).map_err(|_| SyncError::MessageTooLarge(payload.len()))
}

/// Every chunk of one framed message, in send order
pub fn chunk_message(payload: &Bytes, max_chunk_size: usize) -> Result<Vec<Bytes>, SyncError> {
    check_chunk_size(max_chunk_size)?;
    let len = announced_len(payload)?;
    let step = payload_per_chunk(max_chunk_size);

    let mut chunks = Vec::with_capacity(payload.len() / step + 2);
    chunks.push(Frame::Start { len }.encode());
    let mut cursor = 0;
    while cursor < payload.len() {
        let end = (cursor + step).min(payload.len());
        chunks.push(Frame::Data(payload.slice(cursor..end)).encode());
        cursor = end;
    }
    chunks.push(Frame::End.encode());
    Ok(chunks)
}
