//! Client-role codec: encode outbound requests, decode inbound responses.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{self, BodyFraming, ChunkState, ChunkStep, DecodeState};
use crate::errors::Http1Error;
use crate::types::{RequestEvent, ResponseEvent};

/// Codec for the originating side of a connection.
///
/// Responses without `Content-Length` or `Transfer-Encoding` are delimited by
/// the peer closing the connection; [`Decoder::decode_eof`] turns that close
/// into the final [`ResponseEvent::End`]. A connection that ends a response
/// this way cannot be reused.
#[derive(Debug)]
pub struct ClientCodec {
    state: DecodeState,
    encode_chunked: bool,
}

impl ClientCodec {
    /// Create a codec positioned before the first response.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            encode_chunked: false,
        }
    }

    /// Whether the decoder is mid-response and waiting for a connection close
    /// to delimit the body.
    #[must_use]
    pub fn reading_until_eof(&self) -> bool {
        matches!(self.state, DecodeState::EofBody)
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseEvent;
    type Error = Http1Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResponseEvent>, Http1Error> {
        loop {
            match &mut self.state {
                DecodeState::Head => {
                    let Some((head, len)) = codec::parse_response_head(&src[..])? else {
                        return Ok(None);
                    };
                    src.advance(len);
                    self.state = match codec::response_framing(head.status, &head.headers)? {
                        BodyFraming::None => DecodeState::Finish,
                        BodyFraming::Length(n) => DecodeState::FixedBody { remaining: n },
                        BodyFraming::Chunked => DecodeState::ChunkedBody(ChunkState::Size),
                        BodyFraming::UntilEof => DecodeState::EofBody,
                    };
                    return Ok(Some(ResponseEvent::Head(head)));
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
                    return Ok(Some(ResponseEvent::Chunk(chunk)));
                }
                DecodeState::ChunkedBody(chunk_state) => {
                    match codec::decode_chunked(chunk_state, src)? {
                        ChunkStep::Emit(data) => return Ok(Some(ResponseEvent::Chunk(data))),
                        ChunkStep::Done => self.state = DecodeState::Finish,
                        ChunkStep::NeedMore => return Ok(None),
                    }
                }
                DecodeState::EofBody => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let chunk = src.split_to(src.len()).freeze();
                    return Ok(Some(ResponseEvent::Chunk(chunk)));
                }
                DecodeState::Finish => {
                    self.state = DecodeState::Head;
                    return Ok(Some(ResponseEvent::End));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ResponseEvent>, Http1Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        match self.state {
            DecodeState::EofBody => {
                self.state = DecodeState::Head;
                Ok(Some(ResponseEvent::End))
            }
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::Head => Err(Http1Error::Parse("truncated head at EOF".into())),
            _ => Err(Http1Error::UnexpectedEof),
        }
    }
}

impl Encoder<RequestEvent> for ClientCodec {
    type Error = Http1Error;

    fn encode(&mut self, item: RequestEvent, dst: &mut BytesMut) -> Result<(), Http1Error> {
        match item {
            RequestEvent::Head(head) => {
                self.encode_chunked = head.headers.has_token("Transfer-Encoding", "chunked");
                codec::write_request_head(&head, dst);
            }
            RequestEvent::Chunk(data) => codec::write_chunk(self.encode_chunked, &data, dst),
            RequestEvent::End => {
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
