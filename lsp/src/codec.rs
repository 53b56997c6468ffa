//! JSON-RPC base protocol framing.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by `N` bytes of
//! JSON. [`FrameReader`] decodes incoming frames from the client and
//! [`FrameWriter`] encodes anything serializable on the way out.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest body accepted from the client (4 MiB).
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

pub struct FrameReader<R> {
    reader: BufReader<R>,
    header: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            header: String::new(),
        }
    }

    /// Read the next frame. `Ok(None)` means the client closed the stream
    /// between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Value>> {
        let Some(length) = self.read_content_length().await? else {
            return Ok(None);
        };
        if length > MAX_FRAME_BYTES {
            bail!("frame of {length} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("client closed the stream mid-frame")?;
        serde_json::from_slice(&body)
            .map(Some)
            .context("frame body is not JSON")
    }

    /// Consume one header block and return its `Content-Length`.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut first_line = true;
        loop {
            self.header.clear();
            let read = self
                .reader
                .read_line(&mut self.header)
                .await
                .context("reading frame header")?;
            if read == 0 {
                // Clean only when nothing of this frame was read yet.
                if first_line {
                    return Ok(None);
                }
                bail!("client closed the stream inside a frame header");
            }
            first_line = false;

            let line = self.header.trim();
            if line.is_empty() {
                break;
            }
            if let Some(value) = header_value(line, CONTENT_LENGTH) {
                length = Some(
                    value
                        .parse::<usize>()
                        .with_context(|| format!("bad {CONTENT_LENGTH} {value:?}"))?,
                );
            }
        }
        length
            .map(Some)
            .with_context(|| format!("frame header has no {CONTENT_LENGTH}"))
    }
}

/// Value of header `name` (matched case-insensitively) on `line`.
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then_some(value.trim())
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message` and write it as one flushed frame.
    pub async fn write<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let body = serde_json::to_vec(message).context("serializing outgoing frame")?;
        let mut frame = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);
        self.writer
            .write_all(&frame)
            .await
            .context("writing outgoing frame")?;
        self.writer.flush().await.context("flushing outgoing frame")
    }
}
