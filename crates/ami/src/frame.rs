use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const BANNER_PREFIX: &str = "Asterisk Call Manager";
const MAX_HEADERS_PER_FRAME: usize = 1_024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("manager stream i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("manager stream closed")]
    Closed,
    #[error("unexpected manager banner `{0}`")]
    InvalidBanner(String),
    #[error("manager stream closed in the middle of a frame")]
    Truncated,
    #[error("manager frame exceeded {MAX_HEADERS_PER_FRAME} headers")]
    TooLarge,
    #[error("header `{0}` contains a line break")]
    UnsafeHeader(String),
}

/// One AMI message: ordered `Key: Value` headers ended by a blank line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagerFrame {
    headers: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Response,
    Event,
    Other,
}

impl ManagerFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push((key.into(), value.into()));
    }

    /// First value for `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn kind(&self) -> FrameKind {
        if self.get("Response").is_some() {
            FrameKind::Response
        } else if self.get("Event").is_some() {
            FrameKind::Event
        } else {
            FrameKind::Other
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    /// Fails when a key or value would break the line framing.
    pub fn check(&self) -> Result<(), FrameError> {
        let breaks_line = |text: &str| text.contains(['\r', '\n']);
        let unsafe_header = self
            .headers
            .iter()
            .find(|(key, value)| breaks_line(key.as_str()) || breaks_line(value.as_str()));
        match unsafe_header {
            Some((key, _)) => Err(FrameError::UnsafeHeader(key.escape_debug().to_string())),
            None => Ok(()),
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        self.check()?;
        let mut encoded = String::new();
        for (key, value) in &self.headers {
            encoded.push_str(key);
            encoded.push_str(": ");
            encoded.push_str(value);
            encoded.push_str("\r\n");
        }
        encoded.push_str("\r\n");
        Ok(encoded)
    }
}

pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    line: String,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self { inner, buffer: Vec::new(), line: String::new() }
    }

    /// Reads the greeting line sent on connect and returns it trimmed.
    pub async fn read_banner(&mut self) -> Result<String, FrameError> {
        loop {
            if !self.next_line().await? {
                return Err(FrameError::Closed);
            }
            let banner = self.line.trim();
            if banner.is_empty() {
                continue;
            }
            if banner.starts_with(BANNER_PREFIX) {
                return Ok(banner.to_owned());
            }
            return Err(FrameError::InvalidBanner(banner.to_owned()));
        }
    }

    /// Next complete frame, or `None` when the stream ends between frames.
    pub async fn read_frame(&mut self) -> Result<Option<ManagerFrame>, FrameError> {
        let mut frame = ManagerFrame::new();

        loop {
            if !self.next_line().await? {
                return if frame.is_empty() { Ok(None) } else { Err(FrameError::Truncated) };
            }

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                if frame.is_empty() {
                    continue;
                }
                return Ok(Some(frame));
            }

            match line.split_once(':') {
                Some((key, value)) => {
                    if frame.headers.len() >= MAX_HEADERS_PER_FRAME {
                        return Err(FrameError::TooLarge);
                    }
                    frame.push(key.trim(), value.trim());
                }
                None => debug!(line, "ignoring manager line without a header separator"),
            }
        }
    }

    /// PBX events carry whatever the SIP peer sent, not always UTF-8.
    async fn next_line(&mut self) -> Result<bool, FrameError> {
        self.buffer.clear();
        let read = self.inner.read_until(b'\n', &mut self.buffer).await?;
        self.line = String::from_utf8_lossy(&self.buffer).into_owned();
        Ok(read > 0)
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &ManagerFrame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let encoded = frame.encode()?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
