// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
};

use crate::integration_tests::common::{read_response, send_once, send_raw, start};

#[tokio::test]
async fn static_get_and_if_modified_since() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;
    // 42 bytes, as served.
    let content = b"The quick brown fox jumps over a lazy dog.";
    assert_eq!(content.len(), 42);
    std::fs::write(ts.docroot.path().join("index.html"), content)?;

    let resp = send_once(
        ts.addr,
        b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("Content-Length"), Some("42"));
    assert_eq!(resp.header("Content-Type"), Some("text/html"));
    assert!(resp.header("Server").expect("server header").starts_with("embweb/"));
    assert!(resp.header("Date").is_some());
    let last_modified = resp.header("Last-Modified").expect("mtime header").to_string();
    assert_eq!(resp.body, content);

    // Replaying the served Last-Modified must hit the 304 path, bodiless.
    let conditional = format!(
        "GET /index.html HTTP/1.1\r\nHost: x\r\nIf-Modified-Since: {last_modified}\r\nConnection: close\r\n\r\n"
    );
    let resp = send_once(ts.addr, conditional.as_bytes()).await?;
    assert_eq!(resp.status, 304);
    assert!(resp.body.is_empty());
    assert!(resp.header("Content-Length").is_none());
    Ok(())
}

#[tokio::test]
async fn keep_alive_carries_sequential_requests() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;
    std::fs::write(ts.docroot.path().join("a.txt"), b"first")?;
    std::fs::write(ts.docroot.path().join("b.txt"), b"second")?;

    let mut stream = TcpStream::connect(ts.addr).await?;
    stream
        .write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n")
        .await?;
    let first = read_response(&mut stream).await?;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("Connection"), Some("keep-alive"));
    assert_eq!(first.body, b"first");

    // Same connection, next request.
    stream
        .write_all(b"GET /b.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await?;
    let second = read_response(&mut stream).await?;
    assert_eq!(second.status, 200);
    assert_eq!(second.body, b"second");
    Ok(())
}

#[tokio::test]
async fn directory_requests_redirect_then_serve_default_document() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;
    std::fs::create_dir(ts.docroot.path().join("docs"))?;
    std::fs::write(ts.docroot.path().join("docs/index.html"), b"<p>docs</p>")?;

    let resp = send_once(
        ts.addr,
        b"GET /docs HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("Location"), Some("/docs/"));

    let resp = send_once(
        ts.addr,
        b"GET /docs/ HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"<p>docs</p>");
    Ok(())
}

#[tokio::test]
async fn head_sends_headers_without_body() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;
    std::fs::write(ts.docroot.path().join("big.bin"), vec![7u8; 1000])?;

    let raw = send_raw(
        ts.addr,
        b"HEAD /big.bin HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    let text = String::from_utf8(raw)?;
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 1000\r\n"));
    // Head only: the response terminates at the blank line.
    assert!(text.ends_with("\r\n\r\n"));
    Ok(())
}

#[tokio::test]
async fn missing_document_is_404() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;
    let resp = send_once(
        ts.addr,
        b"GET /absent.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 404);
    Ok(())
}

#[tokio::test]
async fn put_then_get_then_delete() -> Result<()> {
    let ts = start(|_| {}, |_| {}).await?;

    let resp = send_once(
        ts.addr,
        b"PUT /note.txt HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnote",
    )
    .await?;
    assert_eq!(resp.status, 201);

    let resp = send_once(
        ts.addr,
        b"GET /note.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.body, b"note");

    let resp = send_once(
        ts.addr,
        b"DELETE /note.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 204);

    let resp = send_once(
        ts.addr,
        b"GET /note.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await?;
    assert_eq!(resp.status, 404);
    Ok(())
}

#[tokio::test]
async fn read_only_mode_refuses_mutation() -> Result<()> {
    let ts = start(|cfg| cfg.documents.read_only = true, |_| {}).await?;
    let resp = send_once(
        ts.addr,
        b"PUT /x.txt HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\nConnection: close\r\n\r\nz",
    )
    .await?;
    assert_eq!(resp.status, 405);
    Ok(())
}
