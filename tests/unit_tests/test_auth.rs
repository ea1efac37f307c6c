// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashSet;

use embweb::{
    auth::{
        AuthType, DigestCredentials, authenticate,
        digest::{
            NonceCheck, check_nonce, constant_time_eq, create_nonce, expected_response,
            parse_credentials,
        },
        store::AuthStore,
    },
    cfg::config::Config,
    route::Route,
    server::Server,
};

use crate::unit_tests::{limits, parse_one};

fn abilities(store: &AuthStore, user: &str) -> HashSet<String> {
    store.user(user).expect("user exists").abilities.clone()
}

#[test]
fn abilities_expand_transitively() {
    let mut store = AuthStore::new("site");
    store.add_role("viewer", "view").expect("role");
    store.add_role("editor", "viewer, edit").expect("role");
    store.add_role("admin", "editor shutdown").expect("role");
    store.add_user("alice", "pw", "admin").expect("user");

    let got = abilities(&store, "alice");
    let want: HashSet<String> = ["view", "edit", "shutdown"]
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(got, want);
}

#[test]
fn unknown_tokens_are_abilities_of_their_own() {
    let mut store = AuthStore::new("site");
    // "add" names no role, so it lands directly in the closure.
    store.add_user("bob", "pw", "add").expect("user");
    assert_eq!(
        abilities(&store, "bob"),
        HashSet::from(["add".to_string()])
    );
}

#[test]
fn role_cycles_terminate() {
    let mut store = AuthStore::new("site");
    store.add_role("a", "b").expect("role");
    store.add_role("b", "a, real").expect("role");
    store.add_user("carol", "pw", "a").expect("user");
    // The depth cap cuts the a<->b cycle; the concrete ability survives.
    assert!(abilities(&store, "carol").contains("real"));
}

#[test]
fn role_changes_recompute_closures() {
    let mut store = AuthStore::new("site");
    store.add_role("ops", "restart").expect("role");
    store.add_user("dan", "pw", "ops").expect("user");
    assert!(abilities(&store, "dan").contains("restart"));

    store.set_user_roles("dan", "other").expect("update");
    assert!(!abilities(&store, "dan").contains("restart"));
    assert!(abilities(&store, "dan").contains("other"));

    store.remove_role("ops");
    assert!(store.add_user("dan", "pw", "x").is_err(), "duplicate user");
}

#[test]
fn verify_login_cleartext_and_ha1() {
    let mut store = AuthStore::new("site");
    store.add_user("clear", "secret", "").expect("user");
    assert!(store.verify_login("clear", "secret"));
    assert!(!store.verify_login("clear", "wrong"));
    assert!(!store.verify_login("ghost", "secret"));

    // Stored as HA1 = MD5(user:realm:password).
    let ha1 = {
        use md5::{Digest, Md5};
        hex::encode(Md5::digest(b"hashed:site:pw"))
    };
    store.add_user("hashed", &ha1, "").expect("user");
    assert!(store.verify_login("hashed", "pw"));
    assert!(!store.verify_login("hashed", "pww"));
    assert_eq!(store.ha1("hashed").expect("ha1"), ha1);
}

#[test]
fn digest_response_matches_rfc2617_example() {
    // The worked example from RFC 2617 section 3.5.
    let dc = DigestCredentials {
        realm: "testrealm@host.com".to_string(),
        nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
        uri: "/dir/index.html".to_string(),
        response: String::new(),
        qop: Some("auth".to_string()),
        nc: Some("00000001".to_string()),
        cnonce: Some("0a4f113b".to_string()),
        opaque: None,
    };
    let ha1 = {
        use md5::{Digest, Md5};
        hex::encode(Md5::digest(b"Mufasa:testrealm@host.com:Circle Of Life"))
    };
    assert_eq!(
        expected_response(&ha1, "GET", &dc),
        "6629fae49393a05397450978507c4ef1"
    );
}

#[test]
fn digest_response_without_qop_uses_short_chain() {
    let with_qop = DigestCredentials {
        realm: "site".to_string(),
        nonce: "abc".to_string(),
        uri: "/x".to_string(),
        response: String::new(),
        qop: Some("auth".to_string()),
        nc: Some("00000001".to_string()),
        cnonce: Some("zzz".to_string()),
        opaque: None,
    };
    let without_qop = DigestCredentials {
        qop: None,
        nc: None,
        cnonce: None,
        ..with_qop.clone()
    };
    assert_ne!(
        expected_response("ha1", "GET", &with_qop),
        expected_response("ha1", "GET", &without_qop)
    );
}

#[test]
fn nonce_lifecycle() {
    let now = 1_700_000_000i64;
    let nonce = create_nonce("srv-secret", "site", now, 7);

    assert_eq!(
        check_nonce(&nonce, "srv-secret", "site", now + 10, 300),
        NonceCheck::Ok
    );
    // Older than the lifetime: stale, not bad.
    assert_eq!(
        check_nonce(&nonce, "srv-secret", "site", now + 301, 300),
        NonceCheck::Stale
    );
    // The nonce-embedded secret must equal the server secret.
    assert_eq!(
        check_nonce(&nonce, "other-secret", "site", now + 10, 300),
        NonceCheck::Bad
    );
    assert_eq!(
        check_nonce(&nonce, "srv-secret", "other-realm", now + 10, 300),
        NonceCheck::Bad
    );
    // From the future: never ours.
    assert_eq!(
        check_nonce(&nonce, "srv-secret", "site", now - 10, 300),
        NonceCheck::Bad
    );
    assert_eq!(
        check_nonce("not-base64!!!", "srv-secret", "site", now, 300),
        NonceCheck::Bad
    );
}

#[test]
fn digest_header_parsing() {
    let header = "Digest username=\"Mufasa\", realm=\"testrealm@host.com\", \
                  nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", uri=\"/dir/index.html\", \
                  qop=auth, nc=00000001, cnonce=\"0a4f113b\", \
                  response=\"6629fae49393a05397450978507c4ef1\", \
                  opaque=\"5ccc069c403ebaf9f0171e9517f40e41\", algorithm=MD5";
    let creds = parse_credentials(header).expect("parses");
    assert_eq!(creds.username, "Mufasa");
    let dc = creds.digest.expect("digest fields");
    assert_eq!(dc.realm, "testrealm@host.com");
    assert_eq!(dc.uri, "/dir/index.html");
    assert_eq!(dc.qop.as_deref(), Some("auth"));
    assert_eq!(dc.nc.as_deref(), Some("00000001"));
    assert_eq!(dc.response, "6629fae49393a05397450978507c4ef1");
}

#[test]
fn digest_qop_without_counters_is_rejected() {
    let header = "Digest username=\"a\", realm=\"site\", nonce=\"n\", uri=\"/\", \
                  qop=auth, response=\"deadbeef\"";
    assert!(parse_credentials(header).is_err());
}

#[test]
fn authenticate_is_idempotent() {
    let server = Server::open(Config::default(), None).expect("open");
    server.add_route(
        Route::new("/admin/")
            .auth(AuthType::Basic)
            .handlers(&["file"]),
    );
    server.add_user("alice", "pw", "").expect("user");

    // base64("alice:pw")
    let mut req = parse_one(
        b"GET /admin/x HTTP/1.1\r\nHost: a\r\nAuthorization: Basic YWxpY2U6cHc=\r\n\r\n",
        &limits(),
    )
    .expect("parses");
    req.route = server.select_route("GET", "/admin/x");
    assert!(req.route.is_some());

    assert!(authenticate(&server, &mut req));
    assert_eq!(req.username.as_deref(), Some("alice"));
    let session = req.session.clone().expect("identity cached on a session");
    assert_eq!(server.sessions.len(), 1);

    // Second call reaches the same decision without growing session state.
    assert!(authenticate(&server, &mut req));
    assert_eq!(req.session.as_deref(), Some(session.as_str()));
    assert_eq!(server.sessions.len(), 1);
}

#[test]
fn constant_time_eq_basics() {
    assert!(constant_time_eq(b"abc", b"abc"));
    assert!(!constant_time_eq(b"abc", b"abd"));
    assert!(!constant_time_eq(b"abc", b"abcd"));
    assert!(constant_time_eq(b"", b""));
}
