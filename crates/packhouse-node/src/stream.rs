//! Request body decoding and response streaming.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::channel::mpsc;
use futures::SinkExt;
use packhouse_git::{GitError, PacketSink};
use std::io::{self, Write};

/// Response chunks buffered between the session and the client.
pub const RESPONSE_CHANNEL_CAPACITY: usize = 32;

/// Receiving half of a streamed response body.
pub type ResponseStream = mpsc::Receiver<Result<Bytes, io::Error>>;

/// [`PacketSink`] feeding a streamed HTTP response.
///
/// Once hyper drops the response body the receiver is gone and
/// [`PacketSink::is_closed`] turns true.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl ChannelSink {
    /// Creates a sink and the stream to hand to the response body.
    pub fn channel() -> (Self, ResponseStream) {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PacketSink for ChannelSink {
    async fn send(&mut self, bytes: Bytes) -> packhouse_git::Result<()> {
        self.tx
            .send(Ok(bytes))
            .await
            .map_err(|_| GitError::ClientDisconnected)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Undoes the request `Content-Encoding` one chunk at a time.
pub enum BodyDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
}

impl BodyDecoder {
    /// Picks a decoder for the request headers. Returns `None` for
    /// encodings other than gzip and identity.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let encoding = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());
        match encoding.as_deref() {
            None | Some("") | Some("identity") => Some(Self::Identity),
            Some("gzip") | Some("x-gzip") => Some(Self::Gzip(GzDecoder::new(Vec::new()))),
            Some(_) => None,
        }
    }

    /// Decodes one chunk, returning whatever output it completes.
    pub fn decode(&mut self, chunk: Bytes) -> io::Result<Bytes> {
        match self {
            Self::Identity => Ok(chunk),
            Self::Gzip(decoder) => {
                decoder.write_all(&chunk)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }

    /// Flushes the decoder at the end of the body.
    pub fn finish(&mut self) -> io::Result<Bytes> {
        match self {
            Self::Identity => Ok(Bytes::new()),
            Self::Gzip(decoder) => {
                decoder.try_finish()?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }
}
