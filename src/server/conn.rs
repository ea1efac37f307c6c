// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::AsyncReadExt,
    net::{TcpStream, tcp::OwnedWriteHalf},
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    buf::PacketBuf,
    handlers::dispatch,
    http::{
        HttpError,
        request::{BodySource, Request, RequestState},
    },
    server::Server,
};

/// Fixed block size for streaming deferred bodies.
const STREAM_CHUNK: usize = 32 * 1024;

async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, HttpError>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(HttpError::Unavailable),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(HttpError::Internal(format!("{label}: {e}"))),
                Err(_) => Err(HttpError::Timeout),
            }
        }
    }
}

enum Parsed {
    Ready,
    /// Peer closed cleanly between requests.
    Eof,
    Fail(HttpError),
}

/// Drives one connection: parse until Ready, select a route, dispatch,
/// drain the response, stream any deferred body, then either loop for the
/// next request on the keep-alive connection or close.
pub(crate) async fn handle(
    server: Arc<Server>,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "set_nodelay failed: {e}");
    }
    let (mut rd, mut wr) = stream.into_split();
    let limits = server.cfg.limits.clone();
    let idle = server.cfg.timers.idle;
    let mut rx = PacketBuf::new(4 * 1024, limits.max_buffer);
    debug!(%peer, "connection open");

    loop {
        let mut req = Request::new(&limits);
        let started = Instant::now();

        let parsed = loop {
            match req.advance(&mut rx, &limits) {
                Ok(true) => break Parsed::Ready,
                Ok(false) => {},
                Err(e) => break Parsed::Fail(e),
            }
            if started.elapsed() > server.cfg.timers.request {
                break Parsed::Fail(HttpError::Timeout);
            }
            match io_with_timeout("read", rx.fill_from(&mut rd), idle, &cancel).await {
                Ok(0) => {
                    if req.state == RequestState::Begin && rx.is_empty() {
                        break Parsed::Eof;
                    }
                    break Parsed::Fail(HttpError::Protocol(
                        "peer closed mid-request".to_string(),
                    ));
                },
                Ok(_) => {},
                Err(e) => break Parsed::Fail(e),
            }
        };

        match parsed {
            Parsed::Ready => {},
            Parsed::Eof => {
                debug!(%peer, "connection closed by peer");
                return;
            },
            Parsed::Fail(HttpError::Unavailable) => return,
            Parsed::Fail(e) => {
                warn!(%peer, "request failed: {e}");
                req.error(e.status(), &e.to_string());
                let _ = flush(&mut req, &mut wr, idle, &cancel).await;
                return;
            },
        }

        req.route = server.select_route(&req.method, &req.path);
        if let Err(e) = dispatch(&server, &mut req).await {
            warn!(%peer, "handler failure: {e}");
            req.error(500, "Internal error");
        }
        if !req.is_finished() && !req.has_body_source() {
            // A claimed-but-silent handler still owes the client a response.
            let _ = req.done();
        }

        if flush(&mut req, &mut wr, idle, &cancel).await.is_err() {
            return;
        }
        if let Some(src) = req.take_body_source() {
            if let Err(e) = stream_body(src, &mut wr, idle, &cancel).await {
                debug!(%peer, "body stream aborted: {e}");
                return;
            }
        }
        req.state = RequestState::Complete;

        if !req.keep_alive {
            debug!(%peer, "connection close");
            return;
        }
    }
}

/// Drains the buffered response head and any inline body, preserving
/// partial-write progress between attempts.
async fn flush(
    req: &mut Request,
    wr: &mut OwnedWriteHalf,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<(), HttpError> {
    let out = req.output();
    while !out.is_empty() {
        io_with_timeout("write", out.drain_to(wr), idle, cancel).await?;
    }
    Ok(())
}

/// The background writer: reads the deferred source in fixed-size blocks
/// and pushes each through the write buffer, accounting for partial writes
/// by re-draining the undrained tail before the next read.
async fn stream_body(
    src: BodySource,
    wr: &mut OwnedWriteHalf,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<(), HttpError> {
    let BodySource::File {
        mut file,
        mut remaining,
    } = src;
    let mut tx = PacketBuf::new(STREAM_CHUNK, STREAM_CHUNK * 2);
    let mut block = vec![0u8; STREAM_CHUNK];

    while remaining > 0 {
        let want = (remaining as usize).min(STREAM_CHUNK);
        let n =
            io_with_timeout("body read", file.read(&mut block[..want]), idle, cancel)
                .await?;
        if n == 0 {
            // The file shrank under us; the head already promised more.
            return Err(HttpError::Internal("document truncated mid-stream".to_string()));
        }
        tx.put_block(&block[..n])?;
        while !tx.is_empty() {
            io_with_timeout("body write", tx.drain_to(wr), idle, cancel).await?;
        }
        remaining -= n as u64;
    }
    Ok(())
}
