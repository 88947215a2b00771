use std::io;

use tokio_util::{
    bytes::BytesMut,
    codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder},
};
use tracing::debug;

/// Newline-framed text where bad bytes never end the stream: invalid UTF-8
/// is replaced with U+FFFD and lines past `max_length` are skipped. Only
/// transport errors surface as `Err`.
#[derive(Debug, Clone)]
pub struct LossyLinesCodec {
    inner: AnyDelimiterCodec,
}

impl LossyLinesCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_length),
        }
    }

    pub fn max_length(&self) -> usize {
        self.inner.max_length()
    }
}

fn to_line(chunk: &[u8]) -> String {
    let text = String::from_utf8_lossy(chunk);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}

fn into_io(err: AnyDelimiterCodecError) -> io::Error {
    match err {
        AnyDelimiterCodecError::Io(err) => err,
        other => io::Error::other(other),
    }
}

impl Decoder for LossyLinesCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            match self.inner.decode(buf) {
                Ok(chunk) => return Ok(chunk.map(|chunk| to_line(&chunk))),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    debug!("skipping line longer than {} bytes", self.max_length());
                }
                Err(err) => return Err(into_io(err)),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            match self.inner.decode_eof(buf) {
                Ok(chunk) => return Ok(chunk.map(|chunk| to_line(&chunk))),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    debug!("skipping line longer than {} bytes", self.max_length());
                }
                Err(err) => return Err(into_io(err)),
            }
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for LossyLinesCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(line, buf).map_err(into_io)
    }
}
