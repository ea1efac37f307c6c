// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Document tree, default document and write policy.
    pub documents: Documents,
    /// Hard caps on header/body sizes and buffer growth.
    pub limits: Limits,
    /// Idle and per-request wall-clock timeouts.
    pub timers: Timers,
    /// Realm, login page, nonce lifetime, development bypass.
    pub auth: AuthSettings,
    /// Session cookie name and idle expiry.
    pub sessions: SessionSettings,
}

/// Where documents live and how the file handler may modify them.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Documents {
    #[serde(rename = "DocumentRoot")]
    /// Root directory served by the file handler.
    pub document_root: PathBuf,

    #[serde(default = "default_document", rename = "DefaultDocument")]
    /// Document served for directory requests.
    pub default_document: String,

    #[serde(default, rename = "ReadOnly")]
    /// When set, PUT and DELETE are refused (ROM-style deployment).
    pub read_only: bool,

    #[serde(default, rename = "UploadDir")]
    /// Spool directory for the upload handler; unset disables it.
    pub upload_dir: Option<PathBuf>,
}

/// Per-request size ceilings. Crossing any of them terminates the request.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Limits {
    #[serde(rename = "MaxHeaderSize")]
    /// Request line plus header section, in bytes.
    pub max_header: usize,

    #[serde(rename = "MaxBodySize")]
    /// Identity or chunked body cap for non-upload methods.
    pub max_body: u64,

    #[serde(rename = "PutLimit")]
    /// Body cap for PUT/POST, applied as chunked bodies decode.
    pub put_limit: u64,

    #[serde(rename = "MaxBuffer")]
    /// Growth ceiling of a connection parse buffer.
    pub max_buffer: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Timers {
    #[serde(rename = "IdleTimeout", with = "serde_secs")]
    /// Connection is closed after this long without socket progress.
    pub idle: Duration,

    #[serde(rename = "RequestTimeout", with = "serde_secs")]
    /// Wall-clock cap for a single request; breach answers 408.
    pub request: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AuthSettings {
    #[serde(default = "default_realm", rename = "Realm")]
    /// Realm advertised in Basic/Digest challenges and folded into HA1.
    pub realm: String,

    #[serde(default = "default_login_page", rename = "LoginPage")]
    /// Where form-protected routes send unauthenticated clients.
    pub login_page: String,

    #[serde(rename = "NonceLifetime", with = "serde_secs", default = "default_nonce_lifetime")]
    /// Digest nonces older than this are answered with stale=TRUE.
    pub nonce_lifetime: Duration,

    #[serde(default, rename = "AutoLogin")]
    /// Development bypass: every request authenticates as this user.
    pub auto_login: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionSettings {
    #[serde(default = "default_cookie", rename = "CookieName")]
    /// Session cookie name.
    pub cookie_name: String,

    #[serde(rename = "SessionTimeout", with = "serde_secs")]
    /// Idle expiry; every access refreshes it.
    pub timeout: Duration,
}

fn default_document() -> String {
    "index.html".to_string()
}

fn default_realm() -> String {
    "site".to_string()
}

fn default_login_page() -> String {
    "/login.html".to_string()
}

fn default_cookie() -> String {
    "-embweb-session-".to_string()
}

fn default_nonce_lifetime() -> Duration {
    Duration::from_secs(300)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            documents: Documents {
                document_root: PathBuf::from("./web"),
                default_document: default_document(),
                read_only: false,
                upload_dir: None,
            },
            limits: Limits {
                max_header: 10 * 1024,
                max_body: 2 * 1024 * 1024,
                put_limit: 4 * 1024 * 1024,
                max_buffer: 64 * 1024,
            },
            timers: Timers {
                idle: Duration::from_secs(60),
                request: Duration::from_secs(120),
            },
            auth: AuthSettings {
                realm: default_realm(),
                login_page: default_login_page(),
                nonce_lifetime: default_nonce_lifetime(),
                auto_login: None,
            },
            sessions: SessionSettings {
                cookie_name: default_cookie(),
                timeout: Duration::from_secs(1800),
            },
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.documents.document_root.as_os_str().is_empty(),
            "DocumentRoot must not be empty"
        );
        ensure!(!self.auth.realm.is_empty(), "Realm must not be empty");
        ensure!(
            self.auth.login_page.starts_with('/'),
            "LoginPage must be an absolute path"
        );

        ensure!(self.limits.max_header >= 512, "MaxHeaderSize must be >= 512");
        ensure!(
            self.limits.max_buffer >= self.limits.max_header,
            "MaxBuffer must admit a full header section"
        );
        ensure!(self.limits.put_limit >= 1, "PutLimit must be >= 1");

        ensure!(
            !self.timers.idle.is_zero() && !self.timers.request.is_zero(),
            "timeouts must be non-zero"
        );

        // Cookie names travel in Set-Cookie verbatim; keep them token-safe.
        ensure!(
            self.sessions
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
            "CookieName must be a cookie token"
        );

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
