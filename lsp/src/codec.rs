//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by exactly `N`
//! bytes of UTF-8 JSON. Other headers (`Content-Type`) are accepted and
//! ignored. [`FrameReader`] and [`FrameWriter`] are generic over tokio's
//! async I/O traits so the same code drives child-process pipes and
//! in-memory duplex streams.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error on frame stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream ended inside a frame header")]
    TruncatedHeader,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value `{0}`")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads framed JSON values from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream closed cleanly between frames. EOF
    /// anywhere inside a frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized(len));
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length = None;
        let mut started = false;

        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                if started {
                    return Err(FrameError::TruncatedHeader);
                }
                return Ok(None);
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(len) = parse_content_length(header)? {
                content_length = Some(len);
            }
        }

        content_length
            .map(Some)
            .ok_or(FrameError::MissingContentLength)
    }
}

/// Returns the length if `header` is a `Content-Length` line.
/// The header name is matched case-insensitively.
fn parse_content_length(header: &str) -> Result<Option<usize>, FrameError> {
    let Some((name, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| FrameError::InvalidContentLength(value.to_string()))
}

/// Writes framed JSON messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg` and write it as one frame, then flush.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), FrameError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the underlying writer (closes the child's stdin).
    pub async fn close(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
