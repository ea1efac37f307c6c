// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use embweb::{http::request::Request, session::SessionStore};

use crate::unit_tests::{limits, parse_one};

fn request_with_cookie(cookie: Option<&str>) -> Request {
    let mut req = parse_one(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", &limits()).expect("parses");
    req.cookie = cookie.map(str::to_string);
    req
}

#[test]
fn create_sets_cookie_and_persists_vars() {
    let store = SessionStore::new("-embweb-session-", Duration::from_secs(60));
    let mut req = request_with_cookie(None);

    assert!(store.get_session(&mut req, false).is_none());
    let id = store.get_session(&mut req, true).expect("created");
    assert_eq!(id.len(), 32, "16 random bytes, hex encoded");

    store.set_var(&id, "username", "alice");
    assert_eq!(store.get_var(&id, "username").as_deref(), Some("alice"));
    store.remove_var(&id, "username");
    assert!(store.get_var(&id, "username").is_none());
}

#[test]
fn cookie_header_resolves_existing_session() {
    let store = SessionStore::new("-embweb-session-", Duration::from_secs(60));
    let mut req = request_with_cookie(None);
    let id = store.get_session(&mut req, true).expect("created");

    let mut next = request_with_cookie(Some(&format!(
        "other=1; -embweb-session-={id}; x=y"
    )));
    assert_eq!(store.get_session(&mut next, false).as_deref(), Some(id.as_str()));

    let mut missing = request_with_cookie(Some("-embweb-session-=deadbeef"));
    assert!(store.get_session(&mut missing, false).is_none());
}

#[test]
fn sessions_expire_and_sweep() {
    let store = SessionStore::new("-embweb-session-", Duration::from_millis(10));
    let mut req = request_with_cookie(None);
    let id = store.get_session(&mut req, true).expect("created");
    assert_eq!(store.len(), 1);

    std::thread::sleep(Duration::from_millis(30));
    // Lazy eviction on access.
    assert!(store.get_var(&id, "anything").is_none());
    store.sweep();
    assert!(store.is_empty());
}

#[test]
fn ids_do_not_collide() {
    let store = SessionStore::new("s", Duration::from_secs(60));
    let mut seen = std::collections::HashSet::new();
    for _ in 0..64 {
        let mut req = request_with_cookie(None);
        let id = store.get_session(&mut req, true).expect("created");
        assert!(seen.insert(id), "duplicate session id");
    }
}
