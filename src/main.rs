// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use embweb::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    server::Server,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("config/logger.yaml")?;

    let args: Vec<String> = std::env::args().collect();
    let cfg_path = args.get(1).map(String::as_str).unwrap_or("config/server.yaml");
    let endpoint = args.get(2).map(String::as_str).unwrap_or(":8080");

    // Load config
    let cfg = resolve_config_path(cfg_path)
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let route_file = resolve_config_path("config/routes.auth").ok();
    let server = Server::open(cfg, route_file.as_deref())?;

    let listener = server.listen(endpoint).await?;

    // Ctrl-C flips the terminator; serve() drains and closes.
    let terminator = CancellationToken::new();
    let shutdown = terminator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    server.serve(listener, terminator).await?;
    Ok(())
}
