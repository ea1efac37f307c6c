// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    handlers::{Claim, Handler},
    http::request::Request,
    server::Server,
};

/// Table-driven rewrites: claims any request whose route carries a redirect
/// target.
pub struct RedirectHandler;

#[async_trait]
impl Handler for RedirectHandler {
    fn name(&self) -> &'static str {
        "redirect"
    }

    async fn service(&self, _server: &Server, req: &mut Request) -> Result<Claim> {
        let target = req.route.as_ref().and_then(|r| r.redirect_to.clone());
        match target {
            Some(url) => {
                req.redirect(&url);
                Ok(Claim::Claimed)
            },
            None => Ok(Claim::Unclaimed),
        }
    }
}
