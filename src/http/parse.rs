// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{
    buf::PacketBuf,
    http::{HttpError, HttpVersion},
};

/// IMF-fixdate, the only date shape emitted and the one compared on
/// If-Modified-Since.
const HTTP_DATE_FMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A chunk-size line longer than this is framing garbage, not a slow peer.
const MAX_CHUNK_LINE: usize = 1024;

pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Splits `METHOD SP URI SP VERSION`.
pub fn parse_request_line(line: &str) -> Result<(String, String, HttpVersion), HttpError> {
    let mut parts = line.split_ascii_whitespace();
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v), None) => (m, u, v),
        _ => return Err(HttpError::Protocol(format!("bad request line: {line:?}"))),
    };
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(HttpError::Protocol(format!("bad method: {method:?}")));
    }
    if !uri.starts_with('/') {
        return Err(HttpError::Protocol(format!("bad request target: {uri:?}")));
    }
    let version = match version {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => return Err(HttpError::Protocol(format!("bad version: {other:?}"))),
    };
    Ok((method.to_string(), uri.to_string(), version))
}

pub fn parse_header_line(line: &str) -> Result<(String, String), HttpError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HttpError::Protocol(format!("bad header: {line:?}")))?;
    let name = name.trim();
    if name.is_empty() || name.contains(' ') {
        return Err(HttpError::Protocol(format!("bad header name: {name:?}")));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Percent-decodes `s`; with `plus_is_space`, `+` becomes a space
/// (form/query convention).
pub fn decode_percent(s: &str, plus_is_space: bool) -> Result<String, HttpError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
                let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    },
                    _ => {
                        return Err(HttpError::Protocol(format!(
                            "bad percent escape in {s:?}"
                        )));
                    },
                }
            },
            b'+' if plus_is_space => {
                out.push(b' ');
                i += 1;
            },
            b => {
                out.push(b);
                i += 1;
            },
        }
    }
    String::from_utf8(out)
        .map_err(|_| HttpError::Protocol(format!("non-UTF8 escape in {s:?}")))
}

/// Percent-decodes and dot-normalizes a request path. `..` escaping the root
/// and embedded NULs are protocol errors. The trailing slash survives (it
/// distinguishes directory requests).
pub fn normalize_path(raw: &str) -> Result<String, HttpError> {
    let decoded = decode_percent(raw, false)?;
    if decoded.bytes().any(|b| b == 0) {
        return Err(HttpError::Protocol("NUL in path".to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    return Err(HttpError::Protocol(format!(
                        "path escapes root: {raw:?}"
                    )));
                }
            },
            s => segments.push(s),
        }
    }

    let mut path = String::with_capacity(decoded.len());
    path.push('/');
    path.push_str(&segments.join("/"));
    if decoded.ends_with('/') && !path.ends_with('/') {
        path.push('/');
    }
    Ok(path)
}

/// Decodes `a=1&b=2` bodies and query strings. Malformed pairs are skipped
/// rather than failing the request.
pub fn parse_urlencoded(s: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for pair in s.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let (Ok(k), Ok(v)) = (decode_percent(k, true), decode_percent(v, true)) else {
            continue;
        };
        vars.entry(k).or_insert(v);
    }
    vars
}

pub fn http_date(t: DateTime<Utc>) -> String {
    t.format(HTTP_DATE_FMT).to_string()
}

pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), HTTP_DATE_FMT)
        .ok()
        .map(|n| n.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data,
    DataCrlf,
    Trailer,
    Done,
}

/// Incremental decoder for chunked request bodies. Feed it the connection
/// buffer as bytes arrive; it consumes exactly the chunk framing it can make
/// progress on and appends payload to `out`.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: ChunkState,
    remaining: usize,
    total: u64,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
            remaining: 0,
            total: 0,
        }
    }

    /// Bytes decoded so far, across all chunks.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns `Ok(true)` once the zero chunk and trailer are consumed.
    /// `Ok(false)` means more bytes are needed. The cumulative size is
    /// checked against `cap` as sizes are declared, so an oversized upload
    /// fails as soon as the limit is crossed.
    pub fn decode(
        &mut self,
        buf: &mut PacketBuf,
        out: &mut BytesMut,
        cap: u64,
    ) -> Result<bool, HttpError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(i) = find_crlf(buf.as_slice()) else {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(HttpError::Protocol(
                                "runaway chunk-size line".to_string(),
                            ));
                        }
                        return Ok(false);
                    };
                    let line = buf.get_block(i);
                    buf.consume(2);
                    let line = std::str::from_utf8(&line)
                        .map_err(|_| HttpError::Protocol("non-ASCII chunk size".to_string()))?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16).map_err(|_| {
                        HttpError::Protocol(format!("bad chunk size: {size_str:?}"))
                    })?;
                    if self.total + size as u64 > cap {
                        return Err(HttpError::TooLarge(cap));
                    }
                    if size == 0 {
                        self.state = ChunkState::Trailer;
                    } else {
                        self.remaining = size;
                        self.state = ChunkState::Data;
                    }
                },
                ChunkState::Data => {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    let take = self.remaining.min(buf.len());
                    out.extend_from_slice(&buf.get_block(take));
                    self.total += take as u64;
                    self.remaining -= take;
                    if self.remaining == 0 {
                        self.state = ChunkState::DataCrlf;
                    }
                },
                ChunkState::DataCrlf => {
                    if buf.len() < 2 {
                        return Ok(false);
                    }
                    if buf.get_block(2) != b"\r\n" {
                        return Err(HttpError::Protocol(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    self.state = ChunkState::Size;
                },
                ChunkState::Trailer => {
                    let Some(i) = find_crlf(buf.as_slice()) else {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(HttpError::Protocol(
                                "runaway trailer line".to_string(),
                            ));
                        }
                        return Ok(false);
                    };
                    // Trailer headers are consumed and ignored.
                    let line = buf.get_block(i);
                    buf.consume(2);
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                },
                ChunkState::Done => return Ok(true),
            }
        }
    }
}
