// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use md5::{Digest, Md5};

use crate::{
    auth::{Credentials, DigestCredentials},
    http::request::Request,
    server::Server,
};

pub(crate) fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Length-then-XOR-fold comparison; digest equality must not leak a prefix
/// length through timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Server nonce: base64 of `secret:realm:unix-time:counter`. Self-validating
/// against the server secret; no server-side nonce table is kept.
pub fn create_nonce(secret: &str, realm: &str, now: i64, counter: u64) -> String {
    STANDARD.encode(format!("{secret}:{realm}:{now}:{counter}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    Ok,
    /// Validly ours, but older than the lifetime: re-challenge stale=TRUE.
    Stale,
    /// Not minted by this server (or this realm).
    Bad,
}

/// Validates a nonce offered back by a client. The embedded secret must
/// equal the server secret and the embedded realm this realm; the timestamp
/// decides Ok against Stale.
pub fn check_nonce(
    nonce: &str,
    secret: &str,
    realm: &str,
    now: i64,
    lifetime_secs: i64,
) -> NonceCheck {
    let Ok(decoded) = STANDARD.decode(nonce) else {
        return NonceCheck::Bad;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return NonceCheck::Bad;
    };
    let mut parts = decoded.splitn(4, ':');
    let (Some(n_secret), Some(n_realm), Some(n_time), Some(_counter)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return NonceCheck::Bad;
    };
    if !constant_time_eq(n_secret.as_bytes(), secret.as_bytes()) || n_realm != realm {
        return NonceCheck::Bad;
    }
    let Ok(minted) = n_time.parse::<i64>() else {
        return NonceCheck::Bad;
    };
    let age = now - minted;
    if age < 0 {
        return NonceCheck::Bad;
    }
    if age > lifetime_secs {
        return NonceCheck::Stale;
    }
    NonceCheck::Ok
}

/// 401 with a Digest challenge carrying a fresh nonce; `stale` marks an
/// expired-nonce re-challenge so clients retry without reprompting.
pub fn ask_login(server: &Server, req: &mut Request, stale: bool) {
    let realm = &server.cfg.auth.realm;
    let nonce = create_nonce(
        server.secret(),
        realm,
        Utc::now().timestamp(),
        server.nonce_seq(),
    );
    let opaque = md5_hex(realm);
    let mut challenge = format!(
        "Digest realm=\"{realm}\", domain=\"/\", qop=\"auth\", nonce=\"{nonce}\", opaque=\"{opaque}\", algorithm=MD5"
    );
    if stale {
        challenge.push_str(", stale=TRUE");
    }
    req.add_header("WWW-Authenticate", &challenge);
    req.error(401, "Access Denied");
}

/// Parses `Authorization: Digest k=v, k="v", …`.
pub fn parse_credentials(header: &str) -> Result<Credentials> {
    let params = header
        .strip_prefix("Digest ")
        .or_else(|| header.strip_prefix("digest "))
        .context("not a Digest authorization")?;

    let mut dc = DigestCredentials::default();
    let mut username = String::new();
    for (key, value) in split_params(params) {
        match key.as_str() {
            "username" => username = value,
            "realm" => dc.realm = value,
            "nonce" => dc.nonce = value,
            "uri" => dc.uri = value,
            "response" => dc.response = value,
            "qop" => dc.qop = Some(value),
            "nc" => dc.nc = Some(value),
            "cnonce" => dc.cnonce = Some(value),
            "opaque" => dc.opaque = Some(value),
            // algorithm=MD5 and unknown extensions are ignored.
            _ => {},
        }
    }

    if username.is_empty() || dc.realm.is_empty() || dc.nonce.is_empty() {
        bail!("digest authorization missing username/realm/nonce");
    }
    if dc.uri.is_empty() || dc.response.is_empty() {
        bail!("digest authorization missing uri/response");
    }
    if dc.qop.is_some() && (dc.nc.is_none() || dc.cnonce.is_none()) {
        bail!("digest qop without nc/cnonce");
    }

    Ok(Credentials {
        username,
        password: String::new(),
        digest: Some(dc),
    })
}

/// Splits a digest parameter list on commas outside quotes, unquoting
/// values.
fn split_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let Some((key, tail)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim_matches(|c: char| c == ',' || c.is_whitespace());
        let tail = tail.trim_start();
        let (value, next) = if let Some(stripped) = tail.strip_prefix('"') {
            match stripped.split_once('"') {
                Some((v, n)) => (v.to_string(), n),
                None => (stripped.to_string(), ""),
            }
        } else {
            match tail.split_once(',') {
                Some((v, n)) => (v.trim().to_string(), n),
                None => (tail.trim().to_string(), ""),
            }
        };
        out.push((key.to_lowercase(), value));
        rest = next.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }
    out
}

/// RFC 2617 §3.2.2.1: HA2 = MD5(method:uri); with qop the response chains
/// nonce:nc:cnonce:qop, without it just the nonce.
pub fn expected_response(ha1: &str, method: &str, dc: &DigestCredentials) -> String {
    let ha2 = md5_hex(&format!("{method}:{}", dc.uri));
    match (&dc.qop, &dc.nc, &dc.cnonce) {
        (Some(qop), Some(nc), Some(cnonce)) => md5_hex(&format!(
            "{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}",
            dc.nonce
        )),
        _ => md5_hex(&format!("{ha1}:{}:{ha2}", dc.nonce)),
    }
}

#[derive(Debug)]
pub enum Verify {
    Ok,
    /// Authentic but expired nonce: re-challenge with stale=TRUE.
    Stale,
    /// Any other verification failure. Structurally malformed headers are
    /// rejected earlier, in `parse_credentials`; everything that reaches
    /// here answers 401 with a fresh challenge, and the reason stays in the
    /// server log.
    Bad(String),
}

/// Full verification of parsed digest credentials against the request and
/// the user table.
pub fn verify(server: &Server, req: &Request, creds: &Credentials) -> Verify {
    let Some(dc) = &creds.digest else {
        return Verify::Bad("missing digest fields".to_string());
    };
    if dc.realm != server.cfg.auth.realm {
        return Verify::Bad(format!("realm mismatch: {:?}", dc.realm));
    }
    if let Some(qop) = &dc.qop
        && qop != "auth"
    {
        return Verify::Bad(format!("unsupported qop: {qop:?}"));
    }
    if dc.uri != req.uri {
        return Verify::Bad(format!("digest uri {:?} != request uri", dc.uri));
    }
    match check_nonce(
        &dc.nonce,
        server.secret(),
        &server.cfg.auth.realm,
        Utc::now().timestamp(),
        server.cfg.auth.nonce_lifetime.as_secs() as i64,
    ) {
        NonceCheck::Ok => {},
        NonceCheck::Stale => return Verify::Stale,
        NonceCheck::Bad => return Verify::Bad("nonce not ours".to_string()),
    }

    // Unknown user and wrong password are indistinguishable to the client.
    let Some(ha1) = server.auth_store().ha1(&creds.username) else {
        return Verify::Bad("unknown user".to_string());
    };
    let expected = expected_response(&ha1, &req.method, dc);
    if constant_time_eq(expected.as_bytes(), dc.response.to_lowercase().as_bytes()) {
        Verify::Ok
    } else {
        Verify::Bad("response mismatch".to_string())
    }
}
