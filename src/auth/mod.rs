// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::{http::request::Request, route::Route, server::Server};

pub mod basic;
pub mod digest;
pub mod form;
pub mod store;

/// Session variable holding the authenticated identity.
pub const SESSION_USERNAME: &str = "username";
/// Session variable holding the pre-login destination for form flows.
pub const SESSION_REFERRER: &str = "referrer";

/// Authentication protocol demanded by a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Digest,
    Form,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::Digest => "digest",
            AuthType::Form => "form",
        })
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(AuthType::None),
            "basic" => Ok(AuthType::Basic),
            "digest" => Ok(AuthType::Digest),
            "form" => Ok(AuthType::Form),
            other => Err(format!("unknown auth type: {other:?}")),
        }
    }
}

/// Credentials as offered on the wire, before verification.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    /// Cleartext password for Basic and form logins; empty for Digest.
    pub password: String,
    pub digest: Option<DigestCredentials>,
}

/// Parsed fields of a `Authorization: Digest` header.
#[derive(Debug, Clone, Default)]
pub struct DigestCredentials {
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
}

/// Runs the authentication lifecycle for the request's selected route.
/// Returns true when dispatch may proceed; on false the 400/401/redirect
/// response has already been produced. Calling it again on the same request
/// reaches the same decision through the cached identity.
pub fn authenticate(server: &Server, req: &mut Request) -> bool {
    let Some(route) = req.route.clone() else {
        return true;
    };
    if route.auth == AuthType::None && route.abilities.is_empty() {
        return true;
    }

    // Development bypass.
    if let Some(user) = &server.cfg.auth.auto_login {
        req.username = Some(user.clone());
        return authorize(server, req, &route);
    }

    // Identity cached on the session cookie.
    if req.username.is_none()
        && let Some(id) = server.sessions.get_session(req, false)
        && let Some(user) = server.sessions.get_var(&id, SESSION_USERNAME)
    {
        debug!(user = %user, "session-cached identity");
        req.username = Some(user);
    }

    if req.username.is_none() && !login(server, req, &route) {
        return false;
    }
    if req.username.is_none() {
        // Route demands abilities but offers no protocol to identify with;
        // send the client wherever 401s are routed (the login page).
        server.redirect_by_status(req, 401);
        return false;
    }
    authorize(server, req, &route)
}

/// Issues the route's challenge: Basic/Digest emit 401 with
/// WWW-Authenticate, form redirects to the login page, and routes with no
/// protocol fall back to the server's 401 redirect mapping.
pub fn ask_login(server: &Server, req: &mut Request, route: &Route, stale: bool) {
    match route.auth {
        AuthType::Basic => basic::ask_login(server, req),
        AuthType::Digest => digest::ask_login(server, req, stale),
        AuthType::Form => form::ask_login(server, req),
        AuthType::None => server.redirect_by_status(req, 401),
    }
}

/// Parses and verifies wire credentials for the route's protocol. Leaves
/// `req.username` set on success; otherwise the response is produced here.
fn login(server: &Server, req: &mut Request, route: &Route) -> bool {
    match route.auth {
        AuthType::None => true,
        AuthType::Form => {
            // Form identity only ever arrives via the login action; anything
            // else on a form route bounces to the login page.
            form::ask_login(server, req);
            false
        },
        AuthType::Basic => {
            let Some(header) = req.header("Authorization").map(str::to_string) else {
                basic::ask_login(server, req);
                return false;
            };
            let creds = match basic::parse_credentials(&header) {
                Ok(c) => c,
                Err(e) => {
                    debug!("basic credentials rejected: {e}");
                    req.error(400, "Bad authorization");
                    return false;
                },
            };
            let verified = server
                .auth_store()
                .verify_login(&creds.username, &creds.password);
            if !verified {
                warn!(user = %creds.username, "basic login failed");
                basic::ask_login(server, req);
                return false;
            }
            establish(server, req, creds.username.clone());
            req.credentials = Some(creds);
            true
        },
        AuthType::Digest => {
            let Some(header) = req.header("Authorization").map(str::to_string) else {
                digest::ask_login(server, req, false);
                return false;
            };
            let creds = match digest::parse_credentials(&header) {
                Ok(c) => c,
                Err(e) => {
                    debug!("digest credentials rejected: {e}");
                    req.error(400, "Bad authorization");
                    return false;
                },
            };
            match digest::verify(server, req, &creds) {
                digest::Verify::Ok => {
                    establish(server, req, creds.username.clone());
                    req.credentials = Some(creds);
                    true
                },
                digest::Verify::Stale => {
                    digest::ask_login(server, req, true);
                    false
                },
                digest::Verify::Bad(reason) => {
                    warn!(user = %creds.username, "digest login failed: {reason}");
                    digest::ask_login(server, req, false);
                    false
                },
            }
        },
    }
}

/// Caches the verified identity on a (possibly fresh) session.
pub(crate) fn establish(server: &Server, req: &mut Request, username: String) {
    if let Some(id) = server.sessions.get_session(req, true) {
        server.sessions.set_var(&id, SESSION_USERNAME, &username);
    }
    req.username = Some(username);
}

/// Route ability set must be covered by the user's expanded abilities.
/// The client gets a re-challenge, not a distinguishing message.
fn authorize(server: &Server, req: &mut Request, route: &Route) -> bool {
    if route.abilities.is_empty() {
        return true;
    }
    let allowed = req.username.as_deref().is_some_and(|name| {
        server
            .auth_store()
            .user(name)
            .is_some_and(|u| route.abilities.is_subset(&u.abilities))
    });
    if !allowed {
        warn!(user = ?req.username, prefix = %route.prefix, "missing abilities");
        ask_login(server, req, route, false);
    }
    allowed
}
