// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pluggable request handlers and the dispatch loop that lets the first
//! claiming handler produce the response.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::{
    http::request::{Request, RequestState},
    server::Server,
};

pub mod action;
pub mod auth_gate;
pub mod file;
pub mod redirect;
pub mod upload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    Unclaimed,
}

/// A registered handler. Handlers run in registration order; the first to
/// return `Claimed` owns the response.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap pre-filter consulted before `service`.
    fn matches(&self, _req: &Request) -> bool {
        true
    }

    /// Gating handlers run on every route regardless of its handler list
    /// and must never claim.
    fn gating(&self) -> bool {
        false
    }

    async fn service(&self, server: &Server, req: &mut Request) -> Result<Claim>;

    /// Teardown hook at server close.
    fn close(&self) {}
}

/// Runs the registered handlers against a Ready request. Gating handlers
/// (authentication) go first on every route; the rest are filtered by the
/// route's handler list. No claim means 404.
pub async fn dispatch(server: &Server, req: &mut Request) -> Result<()> {
    let Some(route) = req.route.clone() else {
        req.error(404, "No route for request");
        return Ok(());
    };

    for handler in server.handlers_snapshot() {
        if handler.gating() {
            handler.service(server, req).await?;
            if req.is_finished() {
                return Ok(());
            }
            continue;
        }
        if !route.admits_handler(handler.name()) || !handler.matches(req) {
            continue;
        }
        if let Claim::Claimed = handler.service(server, req).await? {
            debug!(handler = handler.name(), path = %req.path, "request claimed");
            if req.state == RequestState::Ready {
                req.state = RequestState::Running;
            }
            return Ok(());
        }
    }

    req.error(404, "No handler for request");
    Ok(())
}
