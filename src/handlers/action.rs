// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::{
    handlers::{Claim, Handler},
    http::{parse::parse_urlencoded, request::Request},
    server::Server,
};

/// Invokes in-process callbacks registered under the route prefix
/// (conventionally `/action/<name>`), with query and form variables decoded
/// into `req.vars` first.
pub struct ActionHandler;

#[async_trait]
impl Handler for ActionHandler {
    fn name(&self) -> &'static str {
        "action"
    }

    async fn service(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        // Actions are opt-in per route; a wildcard handler list stays with
        // the file handler.
        let prefix = match &req.route {
            Some(r) if r.handlers.iter().any(|h| h == "action") => r.prefix.clone(),
            _ => return Ok(Claim::Unclaimed),
        };
        let name = req
            .path
            .strip_prefix(prefix.as_str())
            .unwrap_or("")
            .trim_matches('/')
            .to_string();

        decode_vars(req);

        let Some(callback) = server.action(&name) else {
            debug!(action = %name, "no such action");
            req.error(404, "Missing action");
            return Ok(Claim::Claimed);
        };
        callback(server, req)?;
        if !req.is_finished() {
            req.done()?;
        }
        Ok(Claim::Claimed)
    }
}

/// Query variables first, then form-body variables for urlencoded POSTs;
/// the first occurrence of a name wins.
fn decode_vars(req: &mut Request) {
    for (k, v) in parse_urlencoded(&req.query) {
        req.vars.entry(k).or_insert(v);
    }
    let is_form = req
        .header("Content-Type")
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form && !req.body.is_empty() {
        let body = String::from_utf8_lossy(&req.body).into_owned();
        for (k, v) in parse_urlencoded(&body) {
            req.vars.entry(k).or_insert(v);
        }
    }
}
