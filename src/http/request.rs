// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use bytes::BytesMut;
use chrono::Utc;
use once_cell::sync::Lazy;
use tracing::{debug, error};

use crate::{
    auth::Credentials,
    buf::PacketBuf,
    cfg::config::Limits,
    http::{
        HttpError, HttpVersion, Headers,
        parse::{
            ChunkDecoder, find_crlf, http_date, parse_header_line, parse_request_line,
            normalize_path,
        },
        status_text,
    },
    route::Route,
};

static SERVER_ID: Lazy<String> =
    Lazy::new(|| format!("embweb/{}", env!("CARGO_PKG_VERSION")));

/// Per-request lifecycle. Parsing drives Begin through Ready; dispatch moves
/// Ready to Running; `done` (or background-write EOF) finishes at Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Begin,
    FirstLine,
    Headers,
    Content,
    Ready,
    Running,
    Complete,
}

/// Deferred response body, streamed by the connection task after the
/// response head flushes. At most one per request.
#[derive(Debug)]
pub enum BodySource {
    File {
        file: tokio::fs::File,
        remaining: u64,
    },
}

/// One in-flight request on a connection: the incrementally parsed head and
/// body, authentication state, the selected route, and the response being
/// assembled.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub uri: String,
    /// Normalized, percent-decoded.
    pub path: String,
    pub query: String,
    pub version: HttpVersion,
    pub headers: Headers,
    pub host: Option<String>,
    pub port: u16,
    pub cookie: Option<String>,
    pub referrer: Option<String>,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub body: BytesMut,
    /// Decoded query and form variables, populated for action routes.
    pub vars: HashMap<String, String>,

    /// Wire credentials, parsed from Authorization or a login form.
    pub credentials: Option<Credentials>,
    /// Authenticated identity, from a verified login or the session cache.
    pub username: Option<String>,
    pub session: Option<String>,
    pub route: Option<Arc<Route>>,
    /// Where the upload handler spooled the body, when it ran.
    pub upload: Option<PathBuf>,

    pub state: RequestState,
    pub status: u16,
    pub keep_alive: bool,

    out: PacketBuf,
    resp_headers: Vec<(String, String)>,
    set_cookie: Option<String>,
    headers_written: bool,
    chunked_out: bool,
    finished: bool,
    body_source: Option<BodySource>,
    chunk: Option<ChunkDecoder>,
    head_bytes: usize,
    body_cap: u64,
}

impl Request {
    pub fn new(limits: &Limits) -> Self {
        Self {
            method: String::new(),
            uri: String::new(),
            path: String::new(),
            query: String::new(),
            version: HttpVersion::default(),
            headers: Headers::default(),
            host: None,
            port: 80,
            cookie: None,
            referrer: None,
            content_length: None,
            chunked: false,
            body: BytesMut::new(),
            vars: HashMap::new(),
            credentials: None,
            username: None,
            session: None,
            route: None,
            upload: None,
            state: RequestState::Begin,
            status: 200,
            keep_alive: true,
            out: PacketBuf::new(1024, limits.max_buffer.max(64 * 1024)),
            resp_headers: Vec::new(),
            set_cookie: None,
            headers_written: false,
            chunked_out: false,
            finished: false,
            body_source: None,
            chunk: None,
            head_bytes: 0,
            body_cap: limits.max_body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    // ────────────────────────────────────────────────────────────────────
    // Incremental parsing

    /// Advances the parse state machine with whatever `rx` holds. Returns
    /// `Ok(true)` once the request is Ready, `Ok(false)` when more bytes are
    /// needed. Errors carry the HTTP answer.
    pub fn advance(&mut self, rx: &mut PacketBuf, limits: &Limits) -> Result<bool, HttpError> {
        loop {
            match self.state {
                RequestState::Begin => {
                    let ws = rx
                        .as_slice()
                        .iter()
                        .take_while(|b| matches!(**b, b'\r' | b'\n' | b' ' | b'\t'))
                        .count();
                    rx.consume(ws);
                    if rx.is_empty() {
                        return Ok(false);
                    }
                    self.state = RequestState::FirstLine;
                },
                RequestState::FirstLine => {
                    let Some(line) = self.take_line(rx, limits)? else {
                        return Ok(false);
                    };
                    let (method, uri, version) = parse_request_line(&line)?;
                    let (raw_path, query) = match uri.split_once('?') {
                        Some((p, q)) => (p, q.to_string()),
                        None => (uri.as_str(), String::new()),
                    };
                    self.path = normalize_path(raw_path)?;
                    self.query = query;
                    self.method = method;
                    self.uri = uri;
                    self.version = version;
                    self.keep_alive = version.default_keep_alive();
                    self.state = RequestState::Headers;
                },
                RequestState::Headers => {
                    let Some(line) = self.take_line(rx, limits)? else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.finish_headers(limits)?;
                        self.state = RequestState::Content;
                        continue;
                    }
                    let (name, value) = parse_header_line(&line)?;
                    self.headers.insert(name, value);
                },
                RequestState::Content => {
                    if self.chunked {
                        let decoder = self
                            .chunk
                            .as_mut()
                            .ok_or_else(|| HttpError::Internal("missing chunk decoder".to_string()))?;
                        if !decoder.decode(rx, &mut self.body, self.body_cap)? {
                            return Ok(false);
                        }
                        self.content_length = Some(self.body.len() as u64);
                    } else if let Some(cl) = self.content_length {
                        let need = cl as usize - self.body.len();
                        if need > 0 {
                            let take = need.min(rx.len());
                            self.body.extend_from_slice(&rx.get_block(take));
                        }
                        if (self.body.len() as u64) < cl {
                            return Ok(false);
                        }
                    }
                    self.state = RequestState::Ready;
                },
                RequestState::Ready | RequestState::Running | RequestState::Complete => {
                    return Ok(true);
                },
            }
        }
    }

    fn take_line(
        &mut self,
        rx: &mut PacketBuf,
        limits: &Limits,
    ) -> Result<Option<String>, HttpError> {
        let Some(i) = find_crlf(rx.as_slice()) else {
            if self.head_bytes + rx.len() > limits.max_header {
                return Err(HttpError::TooLarge(limits.max_header as u64));
            }
            return Ok(None);
        };
        let bytes = rx.get_block(i);
        rx.consume(2);
        self.head_bytes += i + 2;
        if self.head_bytes > limits.max_header {
            return Err(HttpError::TooLarge(limits.max_header as u64));
        }
        let line = String::from_utf8(bytes)
            .map_err(|_| HttpError::Protocol("non-UTF8 header bytes".to_string()))?;
        Ok(Some(line))
    }

    fn finish_headers(&mut self, limits: &Limits) -> Result<(), HttpError> {
        if let Some(host) = self.headers.get("Host") {
            match host.rsplit_once(':') {
                Some((h, p)) if p.bytes().all(|b| b.is_ascii_digit()) && !p.is_empty() => {
                    self.host = Some(h.to_string());
                    self.port = p.parse().unwrap_or(80);
                },
                _ => self.host = Some(host.to_string()),
            }
        }
        self.cookie = self.headers.get("Cookie").map(str::to_string);
        self.referrer = self.headers.get("Referer").map(str::to_string);

        if let Some(te) = self.headers.get("Transfer-Encoding") {
            if !te.eq_ignore_ascii_case("chunked") {
                return Err(HttpError::Protocol(format!(
                    "unsupported transfer-encoding: {te:?}"
                )));
            }
            self.chunked = true;
        }

        if let Some(cl) = self.headers.get("Content-Length") {
            let cl: u64 = cl
                .trim()
                .parse()
                .map_err(|_| HttpError::Protocol(format!("bad content-length: {cl:?}")))?;
            // Chunked framing wins; a stray Content-Length is ignored.
            if !self.chunked {
                self.content_length = Some(cl);
            }
        }

        match self.headers.get("Connection") {
            Some(c) if c.eq_ignore_ascii_case("close") => self.keep_alive = false,
            Some(c) if c.eq_ignore_ascii_case("keep-alive") => self.keep_alive = true,
            _ => {},
        }

        self.body_cap = if self.method == "PUT" || self.method == "POST" {
            limits.put_limit
        } else {
            limits.max_body
        };
        if let Some(cl) = self.content_length
            && cl > self.body_cap
        {
            return Err(HttpError::TooLarge(self.body_cap));
        }
        if self.chunked {
            self.chunk = Some(ChunkDecoder::new());
        }
        debug!(
            method = %self.method,
            path = %self.path,
            version = %self.version,
            "request head parsed"
        );
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // Response production

    pub fn set_status(&mut self, code: u16) {
        self.status = code;
    }

    /// Queues an extra response header; must precede `write_headers`.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.resp_headers.push((name.to_string(), value.to_string()));
    }

    pub fn set_session_cookie(&mut self, cookie: String) {
        self.set_cookie = Some(cookie);
    }

    /// Emits the status line and headers. Without a known `content_length`
    /// (and when the status admits a body) the response switches to chunked
    /// transfer encoding and `write` frames each block.
    pub fn write_headers(&mut self, content_length: Option<u64>) -> Result<(), HttpError> {
        if self.headers_written {
            return Ok(());
        }
        self.headers_written = true;

        let head_only =
            self.method == "HEAD" || matches!(self.status, 204 | 304) || self.status < 200;

        self.out.puts(&format!(
            "{} {} {}\r\n",
            self.version,
            self.status,
            status_text(self.status)
        ))?;
        self.out.puts(&format!("Server: {}\r\n", &*SERVER_ID))?;
        self.out.puts(&format!("Date: {}\r\n", http_date(Utc::now())))?;
        self.out.puts(&format!(
            "Connection: {}\r\n",
            if self.keep_alive { "keep-alive" } else { "close" }
        ))?;
        if let Some(cookie) = self.set_cookie.take() {
            self.out.puts(&format!("Set-Cookie: {cookie}\r\n"))?;
        }
        for (name, value) in std::mem::take(&mut self.resp_headers) {
            self.out.puts(&format!("{name}: {value}\r\n"))?;
        }
        if let Some(cl) = content_length {
            self.out.puts(&format!("Content-Length: {cl}\r\n"))?;
        } else if !head_only {
            self.out.puts("Transfer-Encoding: chunked\r\n")?;
            self.chunked_out = true;
        }
        self.out.puts("\r\n")?;
        Ok(())
    }

    /// Appends response body bytes, framing them when the response is
    /// chunked. Headers are emitted first if the caller has not done so.
    pub fn write(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if !self.headers_written {
            self.write_headers(None)?;
        }
        if data.is_empty() {
            return Ok(());
        }
        if self.chunked_out {
            self.out.puts(&format!("{:x}\r\n", data.len()))?;
            self.out.put_block(data)?;
            self.out.puts("\r\n")?;
        } else {
            self.out.put_block(data)?;
        }
        Ok(())
    }

    /// Finishes the response: emits headers if pending, terminates chunked
    /// framing, and moves the request to Complete.
    pub fn done(&mut self) -> Result<(), HttpError> {
        if self.finished {
            return Ok(());
        }
        if !self.headers_written {
            self.write_headers(Some(0))?;
        }
        if self.chunked_out {
            self.out.puts("0\r\n\r\n")?;
        }
        self.finished = true;
        self.state = RequestState::Complete;
        Ok(())
    }

    /// Renders a minimal HTML error body and completes the request.
    /// Closing statuses also mark the connection for close.
    pub fn error(&mut self, status: u16, msg: &str) {
        if self.finished {
            return;
        }
        if matches!(status, 400 | 408 | 413 | 500 | 503) {
            self.keep_alive = false;
        }
        if self.headers_written {
            // The head is already on the wire; all we can do is stop.
            self.finished = true;
            self.state = RequestState::Complete;
            self.keep_alive = false;
            return;
        }
        self.status = status;
        let text = status_text(status);
        let body = format!(
            "<html><head><title>Document Error: {text}</title></head>\
             <body><h2>Access Error: {status} {text}</h2><p>{msg}</p></body></html>\r\n"
        );
        self.resp_headers
            .push(("Content-Type".to_string(), "text/html".to_string()));
        if let Err(e) = self.emit_small_body(status, body.as_bytes()) {
            error!("failed to render {status} response: {e}");
            self.keep_alive = false;
        }
        self.finished = true;
        self.state = RequestState::Complete;
    }

    /// Emits a 302 with Location and closes the connection once drained.
    pub fn redirect(&mut self, url: &str) {
        if self.finished || self.headers_written {
            return;
        }
        self.keep_alive = false;
        self.resp_headers.push(("Location".to_string(), url.to_string()));
        let body = format!(
            "<html><head></head><body><p>Redirected to <a href=\"{url}\">{url}</a></p></body></html>\r\n"
        );
        self.resp_headers
            .push(("Content-Type".to_string(), "text/html".to_string()));
        if let Err(e) = self.emit_small_body(302, body.as_bytes()) {
            error!("failed to render redirect: {e}");
        }
        self.finished = true;
        self.state = RequestState::Complete;
    }

    fn emit_small_body(&mut self, status: u16, body: &[u8]) -> Result<(), HttpError> {
        self.status = status;
        self.write_headers(Some(body.len() as u64))?;
        if self.method != "HEAD" {
            self.out.put_block(body)?;
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // Background body

    /// Installs the deferred body. A second install on the same request is a
    /// programming error.
    pub fn install_body_source(&mut self, src: BodySource) -> Result<(), HttpError> {
        debug_assert!(self.body_source.is_none(), "body source already installed");
        if self.body_source.is_some() {
            return Err(HttpError::Internal(
                "body source already installed".to_string(),
            ));
        }
        self.body_source = Some(src);
        Ok(())
    }

    pub(crate) fn has_body_source(&self) -> bool {
        self.body_source.is_some()
    }

    pub(crate) fn take_body_source(&mut self) -> Option<BodySource> {
        self.body_source.take()
    }

    /// Buffered response bytes awaiting the connection drain.
    pub fn output(&mut self) -> &mut PacketBuf {
        &mut self.out
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
