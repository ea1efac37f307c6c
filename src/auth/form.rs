// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    auth::{SESSION_REFERRER, SESSION_USERNAME, establish},
    http::request::Request,
    server::Server,
};

/// Bounces an unauthenticated request to the login page, remembering where
/// it was headed so a successful login can return there.
pub fn ask_login(server: &Server, req: &mut Request) {
    if let Some(id) = server.sessions.get_session(req, true) {
        server.sessions.set_var(&id, SESSION_REFERRER, &req.uri);
    }
    req.redirect(&server.cfg.auth.login_page);
}

/// `/action/login`: verifies the posted `username`/`password`, caches the
/// identity on the session, and redirects to the recorded referrer or the
/// site root. Failure returns to the login page without saying why.
pub fn login_action(server: &Server, req: &mut Request) -> Result<()> {
    let username = req.vars.get("username").cloned().unwrap_or_default();
    let password = req.vars.get("password").cloned().unwrap_or_default();

    let verified =
        !username.is_empty() && server.auth_store().verify_login(&username, &password);
    if !verified {
        warn!(user = %username, "form login failed");
        req.redirect(&server.cfg.auth.login_page);
        return Ok(());
    }

    info!(user = %username, "form login");
    establish(server, req, username);
    let target = req
        .session
        .as_ref()
        .and_then(|id| server.sessions.get_var(id, SESSION_REFERRER))
        .unwrap_or_else(|| "/".to_string());
    req.redirect(&target);
    Ok(())
}

/// `/action/logout`: discards the session and returns to the login page.
pub fn logout_action(server: &Server, req: &mut Request) -> Result<()> {
    if let Some(id) = server.sessions.get_session(req, false) {
        server.sessions.remove_var(&id, SESSION_USERNAME);
        server.sessions.destroy(&id);
    }
    req.username = None;
    req.redirect(&server.cfg.auth.login_page);
    Ok(())
}
