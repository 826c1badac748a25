//! Server-role codec: decode inbound requests, encode outbound responses.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{self, BodyFraming, ChunkState, ChunkStep, DecodeState};
use crate::errors::Http1Error;
use crate::types::{RequestEvent, ResponseEvent};

/// Codec for the listener side of a connection.
///
/// Decoding yields one [`RequestEvent::Head`], zero or more
/// [`RequestEvent::Chunk`]s in arrival order, then exactly one
/// [`RequestEvent::End`] per request. Encoding accepts the mirrored
/// [`ResponseEvent`] sequence; chunked framing is applied when the response
/// head carries `Transfer-Encoding: chunked`.
#[derive(Debug)]
pub struct ServerCodec {
    state: DecodeState,
    encode_chunked: bool,
}

impl ServerCodec {
    /// Create a codec positioned before the first request.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            encode_chunked: false,
        }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ServerCodec {
    type Item = RequestEvent;
    type Error = Http1Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RequestEvent>, Http1Error> {
        loop {
            match &mut self.state {
                DecodeState::Head => {
                    let Some((head, len)) = codec::parse_request_head(&src[..])? else {
                        return Ok(None);
                    };
                    src.advance(len);
                    self.state = match codec::request_framing(&head.headers)? {
                        BodyFraming::Length(n) => DecodeState::FixedBody { remaining: n },
                        BodyFraming::Chunked => DecodeState::ChunkedBody(ChunkState::Size),
                        // requests are never EOF-delimited
                        BodyFraming::None | BodyFraming::UntilEof => DecodeState::Finish,
                    };
                    return Ok(Some(RequestEvent::Head(head)));
                }
                DecodeState::FixedBody { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let take = (*remaining).min(src.len() as u64) as usize;
                    let chunk = src.split_to(take).freeze();
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        self.state = DecodeState::Finish;
                    }
                    return Ok(Some(RequestEvent::Chunk(chunk)));
                }
                DecodeState::ChunkedBody(chunk_state) => {
                    match codec::decode_chunked(chunk_state, src)? {
                        ChunkStep::Emit(data) => return Ok(Some(RequestEvent::Chunk(data))),
                        ChunkStep::Done => self.state = DecodeState::Finish,
                        ChunkStep::NeedMore => return Ok(None),
                    }
                }
                DecodeState::EofBody | DecodeState::Finish => {
                    self.state = DecodeState::Head;
                    return Ok(Some(RequestEvent::End));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RequestEvent>, Http1Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        match self.state {
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::Head => Err(Http1Error::Parse("truncated head at EOF".into())),
            _ => Err(Http1Error::UnexpectedEof),
        }
    }
}

impl Encoder<ResponseEvent> for ServerCodec {
    type Error = Http1Error;

    fn encode(&mut self, item: ResponseEvent, dst: &mut BytesMut) -> Result<(), Http1Error> {
        match item {
            ResponseEvent::Head(head) => {
                self.encode_chunked = head.headers.has_token("Transfer-Encoding", "chunked");
                codec::write_response_head(&head, dst);
            }
            ResponseEvent::Chunk(data) => codec::write_chunk(self.encode_chunked, &data, dst),
            ResponseEvent::End => {
                codec::write_end(self.encode_chunked, dst);
                self.encode_chunked = false;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
