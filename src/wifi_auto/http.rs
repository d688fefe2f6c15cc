//! Minimal HTTP/1.0 framing for the captive portal.
//!
//! Only the few request shapes the portal's own pages issue need to work: a request line,
//! `Name: value` headers up to a blank line, and an optional `Content-Length` body. Every
//! response is HTTP/1.0, so the connection is closed after it; `Connection: close` is never
//! sent.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::fmt::Write as _;

use embedded_io_async::{Error as _, Read, Write};
use heapless::{FnvIndexMap, String};

use crate::{Error, Result};

/// TCP port the portal serves.
pub const HTTP_PORT: u16 = 80;
/// Longest request line or header line kept.
pub const MAX_LINE_LEN: usize = 256;
/// Headers kept per request; further headers are ignored. Must be a power of two.
pub const MAX_HEADERS: usize = 16;
/// Largest request body accepted.
pub const MAX_BODY_LEN: usize = 256;

const READ_BUFFER_LEN: usize = 128;
const MAX_HEADER_NAME_LEN: usize = 32;
const MAX_HEADER_VALUE_LEN: usize = 128;

/// One line of the request head, without its line terminator.
pub type Line = String<MAX_LINE_LEN>;
/// Lowercased header name.
pub type HeaderName = String<MAX_HEADER_NAME_LEN>;
/// Header value with surrounding whitespace removed.
pub type HeaderValue = String<MAX_HEADER_VALUE_LEN>;
/// Header mapping. A repeated name keeps its last value.
pub type Headers = FnvIndexMap<HeaderName, HeaderValue, MAX_HEADERS>;

/// Buffered reader over one connection.
///
/// Lines and bodies are read strictly in order: request line, headers, body.
pub struct RequestReader<'c, C> {
    conn: &'c mut C,
    buf: [u8; READ_BUFFER_LEN],
    start: usize,
    end: usize,
}

impl<'c, C: Read> RequestReader<'c, C> {
    /// Read from `conn`.
    pub fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            buf: [0; READ_BUFFER_LEN],
            start: 0,
            end: 0,
        }
    }

    /// The underlying connection, for writing the response.
    pub fn connection(&mut self) -> &mut C {
        &mut *self.conn
    }

    /// Read one `\n`-terminated line, dropping the terminator and any `\r` before it.
    ///
    /// Fails with [`Error::ConnectionClosed`] at end of stream and
    /// [`Error::RequestTooLarge`] when the line overflows [`MAX_LINE_LEN`].
    pub async fn read_line(&mut self) -> Result<Line> {
        let mut line = heapless::Vec::<u8, MAX_LINE_LEN>::new();
        loop {
            let byte = self.next_byte().await?;
            if byte == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Line::from_utf8(line).map_err(|_| Error::MalformedRequest);
            }
            line.push(byte).map_err(|_| Error::RequestTooLarge)?;
        }
    }

    /// Like [`read_line`](Self::read_line), but an over-long line is consumed through its
    /// terminator and yields `None` instead of failing.
    pub async fn read_line_or_skip(&mut self) -> Result<Option<Line>> {
        match self.read_line().await {
            Ok(line) => Ok(Some(line)),
            Err(Error::RequestTooLarge) => {
                while self.next_byte().await? != b'\n' {}
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Fill `out` completely. Fails with [`Error::ConnectionClosed`] if the stream ends first.
    pub async fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.start == self.end && !self.fill().await? {
                return Err(Error::ConnectionClosed);
            }
            let available = &self.buf[self.start..self.end];
            let count = available.len().min(out.len() - filled);
            out[filled..filled + count].copy_from_slice(&available[..count]);
            self.start += count;
            filled += count;
        }
        Ok(())
    }

    async fn next_byte(&mut self) -> Result<u8> {
        if self.start == self.end && !self.fill().await? {
            return Err(Error::ConnectionClosed);
        }
        let byte = self.buf[self.start];
        self.start += 1;
        Ok(byte)
    }

    /// Refill the empty buffer. Returns `false` at end of stream.
    async fn fill(&mut self) -> Result<bool> {
        self.start = 0;
        self.end = 0;
        let count = self
            .conn
            .read(&mut self.buf)
            .await
            .map_err(|err| Error::Io(err.kind()))?;
        self.end = count;
        Ok(count > 0)
    }
}

/// Request line and headers of one request. The body, if any, is still unread.
#[derive(Debug)]
pub struct HttpRequest {
    request_line: Line,
    headers: Headers,
}

impl HttpRequest {
    /// Read the request line and headers, stopping after the blank line.
    ///
    /// An over-long request line fails with [`Error::RequestTooLarge`]; an over-long header
    /// is dropped.
    pub async fn read_head<C: Read>(reader: &mut RequestReader<'_, C>) -> Result<Self> {
        let request_line = reader.read_line().await?;
        let mut headers = Headers::new();
        loop {
            let Some(line) = reader.read_line_or_skip().await? else {
                debug!("Skipping header longer than {} bytes", MAX_LINE_LEN);
                continue;
            };
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = parse_header(&line) else {
                continue;
            };
            if headers.insert(name, value).is_err() {
                debug!("Ignoring header beyond the first {}", MAX_HEADERS);
            }
        }
        Ok(Self {
            request_line,
            headers,
        })
    }

    /// The request line as received, e.g. `GET /success HTTP/1.1`.
    #[must_use]
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    /// Value of header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let key = lowercase(name)?;
        self.headers.get(&key).map(HeaderValue::as_str)
    }

    /// `Content-Length`: `Ok(None)` when absent, an error when not a decimal number.
    pub fn content_length(&self) -> Result<Option<usize>> {
        self.header("content-length")
            .map(|value| value.parse::<usize>().map_err(|_| Error::MalformedRequest))
            .transpose()
    }
}

/// Split a header line once on the first `": "`, lowercasing the name.
///
/// Lines without `": "`, and names or values too long to keep, yield `None`.
fn parse_header(line: &str) -> Option<(HeaderName, HeaderValue)> {
    let (name, value) = line.split_once(": ")?;
    let name = lowercase(name)?;
    let value = HeaderValue::try_from(value.trim()).ok()?;
    Some((name, value))
}

fn lowercase(name: &str) -> Option<HeaderName> {
    let mut lowered = HeaderName::new();
    for ch in name.chars() {
        lowered.push(ch.to_ascii_lowercase()).ok()?;
    }
    Some(lowered)
}

/// Response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    Found,
    BadRequest,
    InternalServerError,
}

impl Status {
    /// Numeric status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Found => 302,
            Self::BadRequest => 400,
            Self::InternalServerError => 500,
        }
    }

    /// Standard reason phrase.
    #[must_use]
    pub const fn reason_phrase(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Found => "Found",
            Self::BadRequest => "Bad Request",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

/// Response body type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    TextHtml,
    TextPlain,
}

impl ContentType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::TextHtml => "text/html; charset=utf-8",
            Self::TextPlain => "text/plain; charset=utf-8",
        }
    }
}

/// Status line and headers of a response.
#[derive(Clone, Copy, Debug)]
pub struct ResponseHead<'a> {
    status: Status,
    location: Option<&'a str>,
    content_type: Option<ContentType>,
}

impl<'a> ResponseHead<'a> {
    /// A head with only a status line.
    #[must_use]
    pub const fn new(status: Status) -> Self {
        Self {
            status,
            location: None,
            content_type: None,
        }
    }

    /// Add a `Location` header.
    #[must_use]
    pub const fn with_location(mut self, location: &'a str) -> Self {
        self.location = Some(location);
        self
    }

    /// Add a `Content-Type` header.
    #[must_use]
    pub const fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Format the head, including the blank line that ends it.
    pub fn write_to(&self, writer: &mut impl core::fmt::Write) -> core::fmt::Result {
        write!(
            writer,
            "HTTP/1.0 {} {}\r\n",
            self.status.code(),
            self.status.reason_phrase()
        )?;
        if let Some(location) = self.location {
            write!(writer, "Location: {location}\r\n")?;
        }
        if let Some(content_type) = self.content_type {
            write!(writer, "Content-Type: {}\r\n", content_type.as_str())?;
        }
        writer.write_str("\r\n")
    }
}

/// Write `head`, then `body`.
pub async fn write_response<C: Write>(conn: &mut C, head: &ResponseHead<'_>, body: &str) -> Result<()> {
    let mut buffer = String::<MAX_LINE_LEN>::new();
    head.write_to(&mut buffer)?;
    write_all(conn, buffer.as_bytes()).await?;
    write_all(conn, body.as_bytes()).await
}

/// Write every byte of `bytes`.
pub async fn write_all<C: Write>(conn: &mut C, bytes: &[u8]) -> Result<()> {
    conn.write_all(bytes)
        .await
        .map_err(|err| Error::Io(err.kind()))
}
