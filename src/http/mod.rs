// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use thiserror::Error;

use crate::buf::BufError;

pub mod parse;
pub mod request;

/// Request-level failures, each carrying its HTTP answer. `closes` marks the
/// kinds that also terminate the connection.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Protocol(String),
    #[error("authentication required")]
    AuthRequired,
    #[error("credentials offered with the wrong protocol")]
    AuthBadProtocol,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request exceeds {0} bytes")]
    TooLarge(u64),
    #[error("request timed out")]
    Timeout,
    #[error("internal failure: {0}")]
    Internal(String),
    #[error("service unavailable")]
    Unavailable,
}

impl HttpError {
    pub fn status(&self) -> u16 {
        match self {
            HttpError::Protocol(_) | HttpError::AuthBadProtocol => 400,
            HttpError::AuthRequired => 401,
            HttpError::NotFound(_) => 404,
            HttpError::Timeout => 408,
            HttpError::TooLarge(_) => 413,
            HttpError::Internal(_) => 500,
            HttpError::Unavailable => 503,
        }
    }

    /// Whether the failure also terminates the connection.
    pub fn closes(&self) -> bool {
        matches!(
            self,
            HttpError::Protocol(_)
                | HttpError::TooLarge(_)
                | HttpError::Timeout
                | HttpError::Internal(_)
                | HttpError::Unavailable
        )
    }
}

impl From<BufError> for HttpError {
    fn from(e: BufError) -> Self {
        HttpError::Internal(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    Http10,
    #[default]
    Http11,
}

impl HttpVersion {
    /// Keep-alive is the HTTP/1.1 default; HTTP/1.0 must ask for it.
    pub fn default_keep_alive(self) -> bool {
        matches!(self, HttpVersion::Http11)
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        })
    }
}

/// Case-insensitive header map preserving the first occurrence of a name.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Stores `value` under `name` unless the name was already seen.
    pub fn insert(&mut self, name: String, value: String) {
        if self.get(&name).is_none() {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Request Entity Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
