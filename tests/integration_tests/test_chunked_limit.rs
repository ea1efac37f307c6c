// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::integration_tests::common::{read_response, send_once, start};

#[tokio::test]
async fn chunked_put_over_limit_is_413_and_closes() -> Result<()> {
    let ts = start(|cfg| cfg.limits.put_limit = 64, |_| {}).await?;

    let mut stream = TcpStream::connect(ts.addr).await?;
    stream
        .write_all(b"PUT /up.bin HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n")
        .await?;

    // 32-byte chunks; the third crosses the 64-byte cap.
    let chunk = format!("20\r\n{}\r\n", "z".repeat(32));
    for _ in 0..3 {
        // The server may already have torn the connection down.
        if stream.write_all(chunk.as_bytes()).await.is_err() {
            break;
        }
    }

    let resp = read_response(&mut stream).await?;
    assert_eq!(resp.status, 413);

    // The connection is gone: nothing more arrives after the error.
    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).await.unwrap_or(0);
    assert_eq!(n, 0, "connection should be closed after 413");
    Ok(())
}

#[tokio::test]
async fn chunked_put_within_limit_is_stored() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;

    let mut stream = TcpStream::connect(ts.addr).await?;
    stream
        .write_all(
            b"PUT /data.txt HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              7\r\nchunked\r\n5\r\n-body\r\n0\r\n\r\n",
        )
        .await?;
    let resp = read_response(&mut stream).await?;
    assert_eq!(resp.status, 201);

    let stored = std::fs::read(ts.docroot.path().join("data.txt"))?;
    assert_eq!(stored, b"chunked-body");
    Ok(())
}

#[tokio::test]
async fn declared_content_length_over_limit_is_413() -> Result<()> {
    let ts = start(|cfg| cfg.limits.put_limit = 64, |_| {}).await?;
    let resp = send_once(
        ts.addr,
        b"PUT /up.bin HTTP/1.1\r\nHost: x\r\nContent-Length: 100000\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 413);
    Ok(())
}
