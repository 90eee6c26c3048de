use crate::core::errors::OreError;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::marker::PhantomData;

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Incremental producer of a request body
///
/// Implementations hand out the encoded body one chunk at a time so they can
/// sit behind any transport's buffering model.
pub trait BodyEncoder: Send {
    /// Content type of the produced bytes
    fn content_type(&self) -> &'static str;

    /// The next chunk, or `None` once the body is complete
    fn next_chunk(&mut self) -> Option<Bytes>;
}

/// Incremental consumer of a response body
///
/// The transport calls [`BodyDecoder::start`] once the content type is known,
/// [`BodyDecoder::feed`] for every chunk as it arrives and
/// [`BodyDecoder::finish`] at end of stream.
pub trait BodyDecoder: Send {
    type Output: Send;

    fn start(&mut self, content_type: Option<&str>) -> Result<(), OreError>;

    fn feed(&mut self, chunk: &[u8]) -> Result<(), OreError>;

    fn finish(self) -> Result<Self::Output, OreError>;
}

/// Whether a `Content-Type` header value denotes JSON, ignoring parameters
pub fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case(APPLICATION_JSON))
}

/// JSON request body, serialized exactly once
///
/// Cloning or [`rewinding`](JsonEncoder::rewind) shares the encoded bytes, so a
/// transport retry replays the same payload without serializing it again.
#[derive(Debug, Clone)]
pub struct JsonEncoder {
    encoded: Bytes,
    position: usize,
    chunk_size: usize,
}

impl JsonEncoder {
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self, OreError> {
        let encoded = serde_json::to_vec(value).map_err(|e| {
            OreError::SerializationError(format!("Failed to serialize request body: {}", e))
        })?;

        Ok(Self {
            encoded: Bytes::from(encoded),
            position: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// A fresh cursor over the same encoded bytes
    #[must_use]
    pub fn rewind(&self) -> Self {
        Self {
            encoded: self.encoded.clone(),
            position: 0,
            chunk_size: self.chunk_size,
        }
    }

    /// Total encoded length in bytes
    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Stream the remaining chunks as a request body
    pub fn into_body(mut self) -> reqwest::Body {
        let chunks = std::iter::from_fn(move || self.next_chunk()).map(Ok::<_, Infallible>);
        reqwest::Body::wrap_stream(stream::iter(chunks))
    }
}

impl BodyEncoder for JsonEncoder {
    fn content_type(&self) -> &'static str {
        APPLICATION_JSON
    }

    fn next_chunk(&mut self) -> Option<Bytes> {
        if self.position >= self.encoded.len() {
            return None;
        }

        let end = (self.position + self.chunk_size).min(self.encoded.len());
        let chunk = self.encoded.slice(self.position..end);
        self.position = end;
        Some(chunk)
    }
}

/// Decodes a JSON response body into `T`
pub struct JsonDecoder<T> {
    buffer: BytesMut,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDecoder")
            .field("buffered", &self.buffer.len())
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned + Send> BodyDecoder for JsonDecoder<T> {
    type Output = T;

    fn start(&mut self, content_type: Option<&str>) -> Result<(), OreError> {
        match content_type {
            Some(content_type) if is_json(content_type) => Ok(()),
            other => Err(OreError::MalformedPayload(format!(
                "Incorrect content type received for a json object, expected {} but got {}",
                APPLICATION_JSON,
                other.unwrap_or("none")
            ))),
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<(), OreError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(self) -> Result<T, OreError> {
        serde_json::from_slice(&self.buffer).map_err(|e| {
            OreError::MalformedPayload(format!(
                "Failed to parse {} response: {}",
                std::any::type_name::<T>(),
                e
            ))
        })
    }
}

/// Accepts and drops any body
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardDecoder;

impl BodyDecoder for DiscardDecoder {
    type Output = ();

    fn start(&mut self, _content_type: Option<&str>) -> Result<(), OreError> {
        Ok(())
    }

    fn feed(&mut self, _chunk: &[u8]) -> Result<(), OreError> {
        Ok(())
    }

    fn finish(self) -> Result<(), OreError> {
        Ok(())
    }
}
