// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::BytesMut;
use embweb::{
    buf::PacketBuf,
    http::{
        HttpError, HttpVersion,
        parse::{
            ChunkDecoder, decode_percent, http_date, normalize_path, parse_http_date,
            parse_request_line, parse_urlencoded,
        },
        request::{Request, RequestState},
    },
};

use crate::unit_tests::{limits, parse_one};

#[test]
fn request_line_happy_path() {
    let (method, uri, version) =
        parse_request_line("GET /a/b?x=1 HTTP/1.1").expect("parses");
    assert_eq!(method, "GET");
    assert_eq!(uri, "/a/b?x=1");
    assert_eq!(version, HttpVersion::Http11);
}

#[test]
fn request_line_rejects_garbage() {
    assert!(parse_request_line("GET /a").is_err());
    assert!(parse_request_line("get /a HTTP/1.1").is_err());
    assert!(parse_request_line("GET a HTTP/1.1").is_err());
    assert!(parse_request_line("GET /a HTTP/2.0").is_err());
    assert!(parse_request_line("GET /a HTTP/1.1 extra").is_err());
}

#[test]
fn path_normalization() {
    assert_eq!(normalize_path("/a/./b//c").expect("ok"), "/a/b/c");
    assert_eq!(normalize_path("/a/b/../c").expect("ok"), "/a/c");
    assert_eq!(normalize_path("/%61%2Fb").expect("ok"), "/a/b");
    assert_eq!(normalize_path("/dir/").expect("ok"), "/dir/");
    assert_eq!(normalize_path("/").expect("ok"), "/");
    // Escaping the root is a protocol error, encoded or not.
    assert!(normalize_path("/../etc/passwd").is_err());
    assert!(normalize_path("/a/%2e%2e/%2e%2e/etc").is_err());
}

#[test]
fn percent_and_form_decoding() {
    assert_eq!(decode_percent("a%20b", false).expect("ok"), "a b");
    assert_eq!(decode_percent("a+b", true).expect("ok"), "a b");
    assert_eq!(decode_percent("a+b", false).expect("ok"), "a+b");
    assert!(decode_percent("bad%2", false).is_err());

    let vars = parse_urlencoded("username=alice&password=p%40ss&flag");
    assert_eq!(vars["username"], "alice");
    assert_eq!(vars["password"], "p@ss");
    assert_eq!(vars["flag"], "");
}

#[test]
fn http_date_round_trip() {
    let t = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").expect("parses");
    assert_eq!(http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    assert!(parse_http_date("last tuesday").is_none());
}

#[test]
fn full_get_parses_across_fragments() {
    let limits = limits();
    let mut rx = PacketBuf::new(64, limits.max_buffer);
    let mut req = Request::new(&limits);

    // Feed the head in two arbitrary fragments, as sockets do.
    rx.put_block(b"GET /index.html HT").expect("fits");
    assert!(!req.advance(&mut rx, &limits).expect("incomplete is fine"));
    assert_eq!(req.state, RequestState::FirstLine);

    rx.put_block(b"TP/1.1\r\nHost: x:8080\r\nCookie: a=b\r\n\r\n")
        .expect("fits");
    assert!(req.advance(&mut rx, &limits).expect("parses"));
    assert_eq!(req.state, RequestState::Ready);
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/index.html");
    assert_eq!(req.host.as_deref(), Some("x"));
    assert_eq!(req.port, 8080);
    assert_eq!(req.cookie.as_deref(), Some("a=b"));
    assert!(req.keep_alive);
}

#[test]
fn headers_keep_first_occurrence() {
    let req = parse_one(
        b"GET / HTTP/1.1\r\nHost: a\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n",
        &limits(),
    )
    .expect("parses");
    assert_eq!(req.header("x-tag"), Some("one"));
    assert_eq!(req.headers.len(), 2);
}

#[test]
fn http10_defaults_to_close() {
    let req = parse_one(b"GET / HTTP/1.0\r\n\r\n", &limits()).expect("parses");
    assert!(!req.keep_alive);

    let req = parse_one(
        b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
        &limits(),
    )
    .expect("parses");
    assert!(req.keep_alive);

    let req = parse_one(
        b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
        &limits(),
    )
    .expect("parses");
    assert!(!req.keep_alive);
}

#[test]
fn body_collects_to_content_length() {
    let req = parse_one(
        b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        &limits(),
    )
    .expect("parses");
    assert_eq!(&req.body[..], b"hello");
    // After parsing completes the declared length never exceeds the cap.
    assert!(req.content_length.expect("declared") <= limits().put_limit);
}

#[test]
fn oversized_content_length_is_413() {
    let limits = limits();
    let raw = format!(
        "PUT /a HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
        limits.put_limit + 1
    );
    let err = parse_one(raw.as_bytes(), &limits).expect_err("must fail");
    assert_eq!(err.status(), 413);
    assert!(err.closes());
}

#[test]
fn malformed_header_is_400() {
    let err = parse_one(b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n", &limits())
        .expect_err("must fail");
    assert_eq!(err.status(), 400);
}

#[test]
fn chunked_body_decodes_incrementally() {
    let limits = limits();
    let mut rx = PacketBuf::new(64, limits.max_buffer);
    let mut out = BytesMut::new();
    let mut dec = ChunkDecoder::new();

    rx.put_block(b"5\r\nhel").expect("fits");
    assert!(!dec.decode(&mut rx, &mut out, 1024).expect("partial ok"));
    rx.put_block(b"lo\r\n3\r\nxyz\r\n0\r\n\r\n").expect("fits");
    assert!(dec.decode(&mut rx, &mut out, 1024).expect("completes"));
    assert_eq!(&out[..], b"helloxyz");
    assert_eq!(dec.total(), 8);
}

#[test]
fn chunked_over_cap_fails_as_crossed() {
    let mut rx = PacketBuf::new(64, 4096);
    let mut out = BytesMut::new();
    let mut dec = ChunkDecoder::new();

    rx.put_block(b"4\r\nabcd\r\n4\r\nefgh\r\n").expect("fits");
    let err = dec.decode(&mut rx, &mut out, 6).expect_err("cap crossed");
    assert!(matches!(err, HttpError::TooLarge(6)));
    // The first chunk made it through before the breach.
    assert_eq!(&out[..], b"abcd");
}

#[test]
fn chunked_request_end_to_end() {
    let req = parse_one(
        b"PUT /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nchunky\r\n0\r\n\r\n",
        &limits(),
    )
    .expect("parses");
    assert!(req.chunked);
    assert_eq!(&req.body[..], b"chunky");
    assert_eq!(req.content_length, Some(6));
}

#[test]
fn response_uses_chunked_when_length_unknown() {
    let limits = limits();
    let mut req = parse_one(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", &limits).expect("parses");

    req.write(b"part one,").expect("writes");
    req.write(b" part two").expect("writes");
    req.done().expect("finishes");

    let raw = String::from_utf8(req.output().get_block(usize::MAX)).expect("utf8");
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(raw.contains("Transfer-Encoding: chunked\r\n"));
    assert!(raw.contains("9\r\npart one,\r\n"));
    assert!(raw.ends_with("0\r\n\r\n"));
    assert_eq!(req.state, RequestState::Complete);
}

#[test]
fn error_renders_minimal_html_and_closes_on_413() {
    let limits = limits();
    let mut req = parse_one(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", &limits).expect("parses");
    req.error(413, "too big");
    assert!(req.is_finished());
    assert!(!req.keep_alive);
    let raw = String::from_utf8(req.output().get_block(usize::MAX)).expect("utf8");
    assert!(raw.starts_with("HTTP/1.1 413 "));
    assert!(raw.contains("Connection: close\r\n"));
    assert!(raw.contains("too big"));
}

#[test]
fn redirect_sets_location_and_closes() {
    let limits = limits();
    let mut req = parse_one(b"GET /old HTTP/1.1\r\nHost: a\r\n\r\n", &limits).expect("parses");
    req.redirect("/new");
    assert!(req.is_finished());
    let raw = String::from_utf8(req.output().get_block(usize::MAX)).expect("utf8");
    assert!(raw.starts_with("HTTP/1.1 302 "));
    assert!(raw.contains("Location: /new\r\n"));
}
