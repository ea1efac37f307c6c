// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Write;

use anyhow::Result;
use async_trait::async_trait;
use rand::RngExt;
use tokio::fs;
use tracing::{info, warn};

use crate::{
    handlers::{Claim, Handler},
    http::request::Request,
    server::Server,
};

/// Spools a PUT/POST body into the configured upload directory. The body
/// size cap was already enforced while the content decoded, so what arrives
/// here fits.
pub struct UploadHandler;

#[async_trait]
impl Handler for UploadHandler {
    fn name(&self) -> &'static str {
        "upload"
    }

    fn matches(&self, req: &Request) -> bool {
        req.method == "PUT" || req.method == "POST"
    }

    async fn service(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        // Spooling is opt-in per route; on a wildcard handler list PUT/POST
        // belong to the file handler.
        let opted_in = req
            .route
            .as_ref()
            .is_some_and(|r| r.handlers.iter().any(|h| h == "upload"));
        if !opted_in {
            return Ok(Claim::Unclaimed);
        }
        let Some(dir) = server.cfg.documents.upload_dir.clone() else {
            return Ok(Claim::Unclaimed);
        };

        let mut tag = [0u8; 8];
        rand::rng().fill(&mut tag);
        let mut name = String::from("upload-");
        for byte in &tag {
            write!(&mut name, "{byte:02x}").expect("Writing to String cannot fail");
        }
        name.push_str(".tmp");

        let path = dir.join(name);
        if let Err(e) = fs::write(&path, &req.body).await {
            warn!(path = %path.display(), "upload spool failed: {e}");
            req.error(500, "Cannot store upload");
            return Ok(Claim::Claimed);
        }
        info!(path = %path.display(), bytes = req.body.len(), "upload stored");
        req.upload = Some(path.clone());

        let body = format!("{}\r\n", path.display());
        req.set_status(201);
        req.add_header("Content-Type", "text/plain");
        req.write_headers(Some(body.len() as u64))?;
        req.write(body.as_bytes())?;
        req.done()?;
        Ok(Claim::Claimed)
    }
}
