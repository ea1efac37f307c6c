// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashSet, sync::Arc};

use crate::auth::AuthType;

/// One dispatch rule, immutable once installed in the table.
#[derive(Debug, Clone)]
pub struct Route {
    /// URL prefix this rule covers.
    pub prefix: String,
    /// Admitted methods; `None` admits all.
    pub methods: Option<HashSet<String>>,
    /// Admitted path extensions; `None` admits all.
    pub extensions: Option<HashSet<String>>,
    /// Abilities the authenticated user must hold.
    pub abilities: HashSet<String>,
    pub auth: AuthType,
    /// Handler names allowed to claim, in registry order; empty admits all.
    pub handlers: Vec<String>,
    /// Target for the redirect handler.
    pub redirect_to: Option<String>,
    seq: u64,
}

impl Route {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            methods: None,
            extensions: None,
            abilities: HashSet::new(),
            auth: AuthType::None,
            handlers: Vec::new(),
            redirect_to: None,
            seq: 0,
        }
    }

    pub fn methods(mut self, methods: &[&str]) -> Self {
        self.methods = Some(methods.iter().map(|m| m.to_uppercase()).collect());
        self
    }

    pub fn extensions(mut self, exts: &[&str]) -> Self {
        self.extensions = Some(exts.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn abilities(mut self, abilities: &[&str]) -> Self {
        self.abilities = abilities.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    pub fn handlers(mut self, handlers: &[&str]) -> Self {
        self.handlers = handlers.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn redirect_to(mut self, url: &str) -> Self {
        self.redirect_to = Some(url.to_string());
        self
    }

    /// Whether this route's handler list admits `name`. An empty list admits
    /// every handler.
    pub fn admits_handler(&self, name: &str) -> bool {
        self.handlers.is_empty() || self.handlers.iter().any(|h| h == name)
    }

    fn admits(&self, method: &str, path: &str) -> bool {
        if !path.starts_with(&self.prefix) {
            return false;
        }
        if let Some(methods) = &self.methods
            && !methods.contains(method)
        {
            return false;
        }
        if let Some(exts) = &self.extensions {
            let ext = path
                .rsplit('/')
                .next()
                .and_then(|seg| seg.rsplit_once('.'))
                .map(|(_, e)| e);
            match ext {
                Some(e) if exts.contains(e) => {},
                _ => return false,
            }
        }
        true
    }
}

/// Ordered route rules: descending prefix length, insertion order on ties.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    next_seq: u64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut route: Route) {
        route.seq = self.next_seq;
        self.next_seq += 1;
        self.routes.push(Arc::new(route));
        self.routes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then(a.seq.cmp(&b.seq))
        });
    }

    /// Removes every rule with exactly this prefix. Returns whether any
    /// matched.
    pub fn remove(&mut self, prefix: &str) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| r.prefix != prefix);
        before != self.routes.len()
    }

    /// First admissible route for the request line. The ability check is
    /// deferred to authentication.
    pub fn select(&self, method: &str, path: &str) -> Option<Arc<Route>> {
        self.routes
            .iter()
            .find(|r| r.admits(method, path))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
