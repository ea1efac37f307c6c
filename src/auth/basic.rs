// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{auth::Credentials, http::request::Request, server::Server};

/// 401 with a Basic challenge for the configured realm.
pub fn ask_login(server: &Server, req: &mut Request) {
    req.add_header(
        "WWW-Authenticate",
        &format!("Basic realm=\"{}\"", server.cfg.auth.realm),
    );
    req.error(401, "Access Denied");
}

/// Decodes `Authorization: Basic <base64 user:pass>`.
pub fn parse_credentials(header: &str) -> Result<Credentials> {
    let encoded = header
        .strip_prefix("Basic ")
        .or_else(|| header.strip_prefix("basic "))
        .context("not a Basic authorization")?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .context("bad base64 in Basic authorization")?;
    let decoded =
        String::from_utf8(decoded).context("non-UTF8 Basic authorization")?;
    let Some((username, password)) = decoded.split_once(':') else {
        bail!("Basic credentials missing ':' separator");
    };
    Ok(Credentials {
        username: username.to_string(),
        password: password.to_string(),
        digest: None,
    })
}
