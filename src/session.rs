// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    fmt::Write,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use rand::RngExt;
use tracing::debug;

use crate::http::request::Request;

/// One client's server-side variable bag.
#[derive(Debug)]
struct Session {
    vars: HashMap<String, String>,
    expires: Instant,
}

/// Cookie-keyed session table. Ids come from the process CSPRNG; every
/// access refreshes the idle expiry, and expired entries are dropped lazily
/// on access or by `sweep`.
#[derive(Debug)]
pub struct SessionStore {
    map: DashMap<String, Session>,
    cookie_name: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cookie_name: &str, ttl: Duration) -> Self {
        Self {
            map: DashMap::new(),
            cookie_name: cookie_name.to_string(),
            ttl,
        }
    }

    /// 16 random bytes, hex encoded. `rand::rng()` is cryptographically
    /// strong; session ids must not be guessable.
    fn random_id() -> String {
        let mut raw = [0u8; 16];
        rand::rng().fill(&mut raw);

        let mut hex = String::with_capacity(32);
        for byte in &raw {
            write!(&mut hex, "{byte:02x}").expect("Writing to String cannot fail");
        }
        hex
    }

    /// Extracts this store's session id from the request's Cookie header,
    /// if the session still exists.
    pub fn session_of(&self, req: &Request) -> Option<String> {
        let cookie = req.cookie.as_deref()?;
        let id = cookie.split(';').find_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            (name == self.cookie_name).then(|| value.trim().to_string())
        })?;
        self.touch(&id).then_some(id)
    }

    /// Returns the request's live session id, creating one (and queueing the
    /// Set-Cookie) when `create` is set.
    pub fn get_session(&self, req: &mut Request, create: bool) -> Option<String> {
        if let Some(id) = req.session.clone()
            && self.touch(&id)
        {
            return Some(id);
        }
        if let Some(id) = self.session_of(req) {
            req.session = Some(id.clone());
            return Some(id);
        }
        if !create {
            return None;
        }
        let id = Self::random_id();
        self.map.insert(
            id.clone(),
            Session {
                vars: HashMap::new(),
                expires: Instant::now() + self.ttl,
            },
        );
        req.set_session_cookie(format!(
            "{}={}; Path=/; HttpOnly",
            self.cookie_name, id
        ));
        req.session = Some(id.clone());
        debug!(session = %id, "session created");
        Some(id)
    }

    /// Refreshes expiry; evicts and reports false when expired or unknown.
    fn touch(&self, id: &str) -> bool {
        match self.map.get_mut(id) {
            Some(mut s) => {
                if s.expires < Instant::now() {
                    drop(s);
                    self.map.remove(id);
                    return false;
                }
                s.expires = Instant::now() + self.ttl;
                true
            },
            None => false,
        }
    }

    pub fn get_var(&self, id: &str, name: &str) -> Option<String> {
        if !self.touch(id) {
            return None;
        }
        self.map.get(id)?.vars.get(name).cloned()
    }

    pub fn set_var(&self, id: &str, name: &str, value: &str) {
        if let Some(mut s) = self.map.get_mut(id) {
            s.vars.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_var(&self, id: &str, name: &str) {
        if let Some(mut s) = self.map.get_mut(id) {
            s.vars.remove(name);
        }
    }

    pub fn destroy(&self, id: &str) {
        self.map.remove(id);
    }

    /// Drops every expired session.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.map.retain(|_, s| s.expires >= now);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
