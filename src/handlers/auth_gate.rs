// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    auth::authenticate,
    handlers::{Claim, Handler},
    http::request::Request,
    server::Server,
};

/// Applies the route's authentication policy before any handler can claim.
/// Purely gating: a denied request is answered here (401/redirect) and the
/// dispatch loop stops on seeing it finished.
pub struct AuthGate;

#[async_trait]
impl Handler for AuthGate {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn gating(&self) -> bool {
        true
    }

    async fn service(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        authenticate(server, req);
        Ok(Claim::Unclaimed)
    }
}
