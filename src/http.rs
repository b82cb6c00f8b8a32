//! A small streaming HTTP/1.1 header codec, just enough of the protocol to
//! drive a WebSocket Upgrade handshake: read/parse a request or status line
//! plus a header multimap, and emit the same back out.

use crate::error::Error;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on the whole header block (request/status line + headers),
/// matching the `Sec-WebSocket-*` handshake bound from RFC 6455 deployments.
pub const MAX_HEADER_SIZE: usize = 16 * 1024;
const INITIAL_CHUNK: usize = 1024;
const TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Case-insensitive header multimap. Names are stored lower-cased; original
/// insertion order of distinct names is preserved for emission.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    values: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let key = name.to_ascii_lowercase();
        let value = value.into();
        let entry = self.values.entry(key.clone()).or_insert_with(|| {
            self.order.push(key.clone());
            Vec::new()
        });
        if !entry.contains(&value) {
            entry.push(value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_value_ci(&self, name: &str, value: &str) -> bool {
        self.get_all(name)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value))
    }

    /// Iterates `(name, value)` pairs in insertion order, one per value (a
    /// header that recurred N times yields N entries).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().flat_map(move |name| {
            self.values[name]
                .iter()
                .map(move |v| (name.as_str(), v.as_str()))
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Reads from `reader` in ~1KiB chunks until `\r\n\r\n` is seen, then falls
/// back to single-byte reads once within the last `INITIAL_CHUNK` bytes of
/// `MAX_HEADER_SIZE`. A single underlying read can legitimately return bytes
/// past the terminator (the peer pipelined a frame right behind the
/// handshake response), so this returns `(header_bytes, leftover_bytes)`:
/// the header block including the trailing CRLFCRLF, and whatever was read
/// past it in that same chunk. The caller is responsible for feeding
/// `leftover_bytes` back into whatever it reads next — dropping them would
/// silently lose the start of the first frame.
/// EOF before the terminator is `Error::UnexpectedEof`; exceeding the cap is
/// `Error::HeaderTooLarge`.
pub async fn read_until_headers_end<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut buf = Vec::with_capacity(INITIAL_CHUNK);

    loop {
        if buf.len() >= MAX_HEADER_SIZE {
            return Err(Error::HeaderTooLarge);
        }

        let remaining_budget = MAX_HEADER_SIZE - buf.len();
        let chunk_size = if remaining_budget <= INITIAL_CHUNK {
            1
        } else {
            INITIAL_CHUNK
        };

        let mut chunk = vec![0u8; chunk_size];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_terminator(&buf) {
            let leftover = buf.split_off(pos + TERMINATOR.len());
            return Ok((buf, leftover));
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR)
}

pub struct ParsedFirstLine {
    pub method: Option<String>,
    pub target: String,
    pub status: Option<(u16, String)>,
}

/// Splits the raw header block into its first line and the header lines,
/// parsing the header lines into a `HeaderMap` per §4.2: multi-line folding,
/// case-insensitive names, and silently skipping lines with no colon.
pub fn parse_headers(raw: &[u8]) -> Result<(ParsedFirstLine, HeaderMap), Error> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");
    let first_line = lines.next().unwrap_or("");
    let parsed_first = parse_first_line(first_line)?;

    let mut headers = HeaderMap::new();
    let mut last_name: Option<String> = None;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of the previous header's value.
            if let Some(name) = &last_name {
                let folded = line.trim();
                if let Some(values) = headers.values.get_mut(name) {
                    if let Some(last) = values.last_mut() {
                        last.push(' ');
                        last.push_str(folded);
                    }
                }
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim();
                let value = value.trim();
                headers.insert(name, value);
                last_name = Some(name.to_ascii_lowercase());
            }
            None => {
                // Malformed line with no colon before CRLF; skip it.
                continue;
            }
        }
    }

    Ok((parsed_first, headers))
}

fn parse_first_line(line: &str) -> Result<ParsedFirstLine, Error> {
    let mut parts = line.split_whitespace();
    let first = parts
        .next()
        .ok_or_else(|| Error::MalformedFirstLine(line.to_string()))?;

    if let Some(version) = first.strip_prefix("HTTP/") {
        let _ = version;
        let status: u16 = parts
            .next()
            .ok_or_else(|| Error::MalformedFirstLine(line.to_string()))?
            .parse()
            .map_err(|_| Error::MalformedFirstLine(line.to_string()))?;
        let reason = parts.collect::<Vec<_>>().join(" ");
        Ok(ParsedFirstLine {
            method: None,
            target: String::new(),
            status: Some((status, reason)),
        })
    } else {
        let target = parts
            .next()
            .ok_or_else(|| Error::MalformedFirstLine(line.to_string()))?
            .to_string();
        Ok(ParsedFirstLine {
            method: Some(first.to_string()),
            target,
            status: None,
        })
    }
}

/// Emits a request line, every header in insertion order, the terminator,
/// then an optional body.
pub async fn emit_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<(), Error> {
    let mut out = format!("{} {} HTTP/1.1\r\n", method, path);
    for (name, value) in headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    writer.write_all(out.as_bytes()).await?;
    Ok(())
}

/// Emits a status line, every header in insertion order, the terminator,
/// then an optional body.
pub async fn emit_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    headers: &HeaderMap,
    body: Option<&[u8]>,
) -> Result<(), Error> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    writer.write_all(out.as_bytes()).await?;
    if let Some(body) = body {
        writer.write_all(body).await?;
    }
    Ok(())
}
