//! Daemon wire format.
//!
//! ```text
//! frame   := correlation_id:u64be message
//! message := type:u8 length:u16be data[length] result:i32be
//! ```
//!
//! `type` is 1 for install and 2 for remove. Request data is ASCII
//! `distro SP spec (SP spec)*`; reply data is the unmapped dependency names
//! joined by SP. The declared `length` is checked against the direction's
//! bound before any byte of `data` is copied.

use pkgcompat_schema::{OperationKind, PackageOperation, SchemaError};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Largest request payload accepted by the daemon.
pub const MAX_PKG_DATA: usize = 1024;

/// Largest reply payload; the whole range of the length field.
pub const MAX_REPLY_DATA: usize = u16::MAX as usize;

pub(crate) const HEADER_LEN: usize = 8 + 1 + 2;
const RESULT_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame truncated")]
    Truncated,
    #[error("payload is {len} bytes, limit is {max}")]
    Oversized { len: usize, max: usize },
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("payload is not valid UTF-8")]
    Utf8,
    #[error("malformed request: {0}")]
    Malformed(#[from] SchemaError),
    #[error("wire I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One message of the daemon protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcMessage {
    pub kind: OperationKind,
    data: Vec<u8>,
    pub result: i32,
}

impl IpcMessage {
    /// Copy `data` into a message, rejecting it when longer than `max`.
    pub fn bounded(
        kind: OperationKind,
        data: &[u8],
        result: i32,
        max: usize,
    ) -> Result<Self, WireError> {
        if data.len() > max.min(MAX_REPLY_DATA) {
            return Err(WireError::Oversized {
                len: data.len(),
                max: max.min(MAX_REPLY_DATA),
            });
        }
        Ok(Self {
            kind,
            data: data.to_vec(),
            result,
        })
    }

    pub fn request(kind: OperationKind, data: &[u8]) -> Result<Self, WireError> {
        Self::bounded(kind, data, 0, MAX_PKG_DATA)
    }

    pub fn reply(kind: OperationKind, data: &[u8], result: i32) -> Result<Self, WireError> {
        Self::bounded(kind, data, result, MAX_REPLY_DATA)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serialize an operation as a request. Over-long operations are rejected whole.
    pub fn from_operation(op: &PackageOperation) -> Result<Self, WireError> {
        let len = op.distro.len()
            + op
                .payload()
                .iter()
                .map(|s| 1 + s.as_str().len())
                .sum::<usize>();
        if len > MAX_PKG_DATA {
            return Err(WireError::Oversized {
                len,
                max: MAX_PKG_DATA,
            });
        }
        let mut data = String::with_capacity(len);
        data.push_str(op.distro.as_str());
        for spec in op.payload() {
            data.push(' ');
            data.push_str(spec.as_str());
        }
        Self::request(op.kind, data.as_bytes())
    }

    /// Parse and validate the operation carried by a request.
    pub fn to_operation(&self) -> Result<PackageOperation, WireError> {
        let text = std::str::from_utf8(&self.data).map_err(|_| WireError::Utf8)?;
        let mut tokens = text.split(' ');
        let distro = tokens.next().unwrap_or_default();
        let specs: Vec<&str> = tokens.collect();
        Ok(PackageOperation::parse(self.kind, distro, &specs)?)
    }

    /// Space-separated words of a reply payload.
    pub fn words(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.data)
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub correlation_id: u64,
    pub message: IpcMessage,
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], WireError> {
    if buf.len() < n {
        return Err(WireError::Truncated);
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_be_bytes(raw)
}

impl Frame {
    pub fn new(correlation_id: u64, message: IpcMessage) -> Self {
        Self {
            correlation_id,
            message,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let data = self.message.data();
        let mut out = Vec::with_capacity(HEADER_LEN + data.len() + RESULT_LEN);
        out.extend_from_slice(&self.correlation_id.to_be_bytes());
        out.push(self.message.kind.wire_code());
        // `IpcMessage` construction keeps data within u16 range.
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(&self.message.result.to_be_bytes());
        out
    }

    /// Decode one complete frame whose data may be at most `max_data` bytes.
    pub fn decode(bytes: &[u8], max_data: usize) -> Result<Self, WireError> {
        let mut b = bytes;
        let correlation_id = be_u64(take(&mut b, 8)?);
        let code = take(&mut b, 1)?[0];
        let kind = OperationKind::from_wire_code(code).ok_or(WireError::UnknownType(code))?;
        let len_bytes = take(&mut b, 2)?;
        let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        if len > max_data {
            return Err(WireError::Oversized { len, max: max_data });
        }
        let data = take(&mut b, len)?;
        let result_bytes = take(&mut b, RESULT_LEN)?;
        let result = i32::from_be_bytes([
            result_bytes[0],
            result_bytes[1],
            result_bytes[2],
            result_bytes[3],
        ]);
        if !b.is_empty() {
            return Err(WireError::TrailingBytes(b.len()));
        }
        Ok(Self {
            correlation_id,
            message: IpcMessage::bounded(kind, data, result, max_data)?,
        })
    }

    /// Correlation id and type byte of a frame that failed to decode, when the header is intact.
    pub fn peek_header(bytes: &[u8]) -> Option<(u64, u8)> {
        (bytes.len() >= 9).then(|| (be_u64(&bytes[..8]), bytes[8]))
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        w.write_all(&self.encode())?;
        w.flush()?;
        Ok(())
    }

    /// Read the raw bytes of one frame from a stream. Returns `None` on a
    /// clean end of stream before the first header byte.
    ///
    /// A header declaring more than `max_data` bytes is returned alone, which
    /// [`decode`](Self::decode) rejects as `Oversized`; the frame's remaining
    /// bytes are drained from the stream without being buffered.
    pub fn read_raw(r: &mut impl Read, max_data: usize) -> Result<Option<Vec<u8>>, WireError> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match r.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(WireError::Truncated),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(WireError::Io(e)),
            }
        }
        let len = usize::from(u16::from_be_bytes([header[9], header[10]]));
        if len > max_data {
            let rest = (len + RESULT_LEN) as u64;
            let drained = io::copy(&mut Read::take(&mut *r, rest), &mut io::sink())?;
            if drained < rest {
                return Err(WireError::Truncated);
            }
            return Ok(Some(header.to_vec()));
        }
        let mut raw = vec![0u8; HEADER_LEN + len + RESULT_LEN];
        raw[..HEADER_LEN].copy_from_slice(&header);
        r.read_exact(&mut raw[HEADER_LEN..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                WireError::Truncated
            } else {
                WireError::Io(e)
            }
        })?;
        Ok(Some(raw))
    }
}
