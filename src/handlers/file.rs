// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    handlers::{Claim, Handler},
    http::{
        parse::{http_date, parse_http_date},
        request::{BodySource, Request},
    },
    server::Server,
};

/// Serves documents out of the configured root: GET/HEAD with Last-Modified
/// and If-Modified-Since, directory redirects to the default document, and
/// PUT/DELETE unless the tree is read-only.
pub struct FileHandler;

#[async_trait]
impl Handler for FileHandler {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn service(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        match req.method.as_str() {
            "GET" | "HEAD" => self.serve(server, req).await,
            "PUT" => self.put(server, req).await,
            "DELETE" => self.delete(server, req).await,
            _ => Ok(Claim::Unclaimed),
        }
    }
}

impl FileHandler {
    /// The request path is already normalized and cannot climb out of the
    /// root, so resolution is a plain join.
    fn resolve(server: &Server, path: &str) -> PathBuf {
        server
            .cfg
            .documents
            .document_root
            .join(path.trim_start_matches('/'))
    }

    async fn serve(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        let mut fs_path = Self::resolve(server, &req.path);
        if req.path.ends_with('/') {
            fs_path = fs_path.join(&server.cfg.documents.default_document);
        }

        let meta = match fs::metadata(&fs_path).await {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %fs_path.display(), "stat failed: {e}");
                req.error(404, "Document not found");
                return Ok(Claim::Claimed);
            },
        };
        if meta.is_dir() {
            // Directory asked for without a trailing slash: send the client
            // back with one so relative links resolve.
            req.redirect(&format!("{}/", req.path));
            return Ok(Claim::Claimed);
        }

        let mtime: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        // HTTP dates carry second precision; compare at that granularity.
        let mtime_secs = mtime.timestamp();

        if let Some(since) = req.header("If-Modified-Since").and_then(parse_http_date)
            && mtime_secs <= since.timestamp()
        {
            req.set_status(304);
            req.write_headers(None)?;
            req.done()?;
            return Ok(Claim::Claimed);
        }

        let mime = mime_guess::from_path(&fs_path).first_or_octet_stream();
        req.add_header("Content-Type", mime.essence_str());
        req.add_header("Last-Modified", &http_date(mtime));
        req.set_status(200);
        req.write_headers(Some(meta.len()))?;

        if req.method == "HEAD" {
            req.done()?;
            return Ok(Claim::Claimed);
        }

        let file = fs::File::open(&fs_path).await?;
        req.install_body_source(BodySource::File {
            file,
            remaining: meta.len(),
        })?;
        Ok(Claim::Claimed)
    }

    async fn put(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        if server.cfg.documents.read_only {
            req.error(405, "Document tree is read-only");
            return Ok(Claim::Claimed);
        }
        let fs_path = Self::resolve(server, &req.path);
        let existed = fs::metadata(&fs_path).await.is_ok();
        if let Err(e) = fs::write(&fs_path, &req.body).await {
            warn!(path = %fs_path.display(), "put failed: {e}");
            req.error(500, "Cannot store document");
            return Ok(Claim::Claimed);
        }
        req.set_status(if existed { 204 } else { 201 });
        req.write_headers(Some(0))?;
        req.done()?;
        Ok(Claim::Claimed)
    }

    async fn delete(&self, server: &Server, req: &mut Request) -> Result<Claim> {
        if server.cfg.documents.read_only {
            req.error(405, "Document tree is read-only");
            return Ok(Claim::Claimed);
        }
        let fs_path = Self::resolve(server, &req.path);
        match fs::remove_file(&fs_path).await {
            Ok(()) => {
                req.set_status(204);
                req.write_headers(Some(0))?;
                req.done()?;
            },
            Err(e) => {
                debug!(path = %fs_path.display(), "delete failed: {e}");
                req.error(404, "Document not found");
            },
        }
        Ok(Claim::Claimed)
    }
}
