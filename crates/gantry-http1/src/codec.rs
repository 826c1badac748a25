//! Shared parsing and framing machinery for both codec roles.

use bytes::{Buf, Bytes, BytesMut};

use gantry_core::headers::Headers;

use crate::errors::Http1Error;
use crate::types::{RequestHead, ResponseHead};

pub(crate) const MAX_HEADERS: usize = 64;
pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_CHUNK_SIZE_LINE: usize = 32;

/// How the body of the current message is delimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// No body follows the head.
    None,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Chunked transfer-encoding.
    Chunked,
    /// Body runs until the peer closes the connection (responses only).
    UntilEof,
}

/// Decoder position within one message.
#[derive(Debug)]
pub(crate) enum DecodeState {
    /// Waiting for a complete head.
    Head,
    /// Reading a `Content-Length` body.
    FixedBody {
        /// Bytes still owed by the peer.
        remaining: u64,
    },
    /// Reading a chunked body.
    ChunkedBody(ChunkState),
    /// Reading until EOF.
    EofBody,
    /// Body done; emit the end-of-message marker next.
    Finish,
}

/// Sub-state of chunked decoding.
#[derive(Debug)]
pub(crate) enum ChunkState {
    /// Expecting a chunk-size line.
    Size,
    /// Inside chunk data.
    Data {
        /// Bytes left in the current chunk.
        remaining: u64,
    },
    /// Expecting the CRLF that terminates a chunk.
    DataCrlf,
    /// Discarding trailer lines up to the final blank line.
    Trailers,
}

/// One step of chunked decoding.
pub(crate) enum ChunkStep {
    /// A piece of chunk data.
    Emit(Bytes),
    /// The terminating zero chunk and trailers were consumed.
    Done,
    /// More input is required.
    NeedMore,
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|w| w == b"\r\n")
}

/// Advance chunked-body decoding by one observable step.
pub(crate) fn decode_chunked(
    state: &mut ChunkState,
    src: &mut BytesMut,
) -> Result<ChunkStep, Http1Error> {
    loop {
        match state {
            ChunkState::Size => {
                let Some(pos) = find_crlf(src) else {
                    if src.len() > MAX_CHUNK_SIZE_LINE {
                        return Err(Http1Error::Framing("chunk size line too long".into()));
                    }
                    return Ok(ChunkStep::NeedMore);
                };
                let line = std::str::from_utf8(&src[..pos])
                    .map_err(|_| Http1Error::Framing("chunk size is not ASCII".into()))?;
                // chunk extensions after ';' are ignored
                let digits = line.split(';').next().unwrap_or(line).trim();
                let size = u64::from_str_radix(digits, 16).map_err(|_| {
                    Http1Error::Framing(format!("bad chunk size {digits:?}"))
                })?;
                src.advance(pos + 2);
                *state = if size == 0 {
                    ChunkState::Trailers
                } else {
                    ChunkState::Data { remaining: size }
                };
            }
            ChunkState::Data { remaining } => {
                if src.is_empty() {
                    return Ok(ChunkStep::NeedMore);
                }
                #[allow(clippy::cast_possible_truncation)]
                let take = (*remaining).min(src.len() as u64) as usize;
                let piece = src.split_to(take).freeze();
                *remaining -= take as u64;
                if *remaining == 0 {
                    *state = ChunkState::DataCrlf;
                }
                return Ok(ChunkStep::Emit(piece));
            }
            ChunkState::DataCrlf => {
                if src.len() < 2 {
                    return Ok(ChunkStep::NeedMore);
                }
                if &src[..2] != b"\r\n" {
                    return Err(Http1Error::Framing("missing CRLF after chunk data".into()));
                }
                src.advance(2);
                *state = ChunkState::Size;
            }
            ChunkState::Trailers => {
                let Some(pos) = find_crlf(src) else {
                    if src.len() > MAX_HEAD_BYTES {
                        return Err(Http1Error::Framing("trailer block too long".into()));
                    }
                    return Ok(ChunkStep::NeedMore);
                };
                let blank = pos == 0;
                src.advance(pos + 2);
                if blank {
                    return Ok(ChunkStep::Done);
                }
            }
        }
    }
}

fn content_length(headers: &Headers) -> Result<Option<u64>, Http1Error> {
    let mut value: Option<u64> = None;
    for raw in headers.get_all("Content-Length") {
        let n = raw
            .trim()
            .parse::<u64>()
            .map_err(|_| Http1Error::Framing(format!("invalid content-length {raw:?}")))?;
        if let Some(prev) = value {
            if prev != n {
                return Err(Http1Error::Framing("conflicting content-length".into()));
            }
        }
        value = Some(n);
    }
    Ok(value)
}

/// Body framing for an inbound request head.
pub(crate) fn request_framing(headers: &Headers) -> Result<BodyFraming, Http1Error> {
    if headers.has_token("Transfer-Encoding", "chunked") {
        return Ok(BodyFraming::Chunked);
    }
    match content_length(headers)? {
        Some(0) | None => Ok(BodyFraming::None),
        Some(n) => Ok(BodyFraming::Length(n)),
    }
}

/// Body framing for a response head received on an outbound connection.
pub(crate) fn response_framing(status: u16, headers: &Headers) -> Result<BodyFraming, Http1Error> {
    if (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(BodyFraming::None);
    }
    if headers.has_token("Transfer-Encoding", "chunked") {
        return Ok(BodyFraming::Chunked);
    }
    match content_length(headers)? {
        Some(0) => Ok(BodyFraming::None),
        Some(n) => Ok(BodyFraming::Length(n)),
        None => Ok(BodyFraming::UntilEof),
    }
}

/// Parse a request head. Returns the head and its wire length, or `None`
/// when more input is needed.
pub(crate) fn parse_request_head(src: &[u8]) -> Result<Option<(RequestHead, usize)>, Http1Error> {
    let mut header_slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_slots);
    match parsed.parse(src) {
        Ok(httparse::Status::Complete(len)) => {
            let method = parsed
                .method
                .ok_or_else(|| Http1Error::Parse("missing method".into()))?
                .to_owned();
            let target = parsed
                .path
                .ok_or_else(|| Http1Error::Parse("missing target".into()))?
                .to_owned();
            let minor = parsed
                .version
                .ok_or_else(|| Http1Error::Parse("missing version".into()))?;
            let head = RequestHead {
                method,
                target,
                version: format!("HTTP/1.{minor}"),
                headers: copy_headers(parsed.headers),
            };
            Ok(Some((head, len)))
        }
        Ok(httparse::Status::Partial) => {
            if src.len() > MAX_HEAD_BYTES {
                return Err(Http1Error::HeadTooLarge {
                    limit: MAX_HEAD_BYTES,
                });
            }
            Ok(None)
        }
        Err(err) => Err(Http1Error::Parse(err.to_string())),
    }
}

/// Parse a response head. Same contract as [`parse_request_head`].
pub(crate) fn parse_response_head(src: &[u8]) -> Result<Option<(ResponseHead, usize)>, Http1Error> {
    let mut header_slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_slots);
    match parsed.parse(src) {
        Ok(httparse::Status::Complete(len)) => {
            let status = parsed
                .code
                .ok_or_else(|| Http1Error::Parse("missing status code".into()))?;
            let minor = parsed
                .version
                .ok_or_else(|| Http1Error::Parse("missing version".into()))?;
            let head = ResponseHead {
                status,
                reason: parsed.reason.unwrap_or_default().to_owned(),
                version: format!("HTTP/1.{minor}"),
                headers: copy_headers(parsed.headers),
            };
            Ok(Some((head, len)))
        }
        Ok(httparse::Status::Partial) => {
            if src.len() > MAX_HEAD_BYTES {
                return Err(Http1Error::HeadTooLarge {
                    limit: MAX_HEAD_BYTES,
                });
            }
            Ok(None)
        }
        Err(err) => Err(Http1Error::Parse(err.to_string())),
    }
}

fn copy_headers(parsed: &[httparse::Header<'_>]) -> Headers {
    let mut headers = Headers::new();
    for h in parsed {
        headers.append(h.name, String::from_utf8_lossy(h.value).into_owned());
    }
    headers
}

/// Write a request head in wire format.
pub(crate) fn write_request_head(head: &RequestHead, dst: &mut BytesMut) {
    dst.extend_from_slice(head.method.as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(head.target.as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(head.version.as_bytes());
    dst.extend_from_slice(b"\r\n");
    write_headers(&head.headers, dst);
    dst.extend_from_slice(b"\r\n");
}

/// Write a response head in wire format.
pub(crate) fn write_response_head(head: &ResponseHead, dst: &mut BytesMut) {
    dst.extend_from_slice(head.version.as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(head.status.to_string().as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(head.reason.as_bytes());
    dst.extend_from_slice(b"\r\n");
    write_headers(&head.headers, dst);
    dst.extend_from_slice(b"\r\n");
}

fn write_headers(headers: &Headers, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        dst.extend_from_slice(name.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
}

/// Write one body chunk under the given framing.
pub(crate) fn write_chunk(chunked: bool, data: &Bytes, dst: &mut BytesMut) {
    if chunked {
        if data.is_empty() {
            return;
        }
        dst.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
        dst.extend_from_slice(data);
        dst.extend_from_slice(b"\r\n");
    } else {
        dst.extend_from_slice(data);
    }
}

/// Write the end-of-body marker under the given framing.
pub(crate) fn write_end(chunked: bool, dst: &mut BytesMut) {
    if chunked {
        dst.extend_from_slice(b"0\r\n\r\n");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
