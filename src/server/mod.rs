// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, RwLock, RwLockReadGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use rand::RngExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    auth::store::{AuthStore, load_auth_file, save_auth_file},
    cfg::config::Config,
    handlers::{
        Handler, action::ActionHandler, auth_gate::AuthGate, file::FileHandler,
        redirect::RedirectHandler, upload::UploadHandler,
    },
    http::{request::Request, status_text},
    route::{Route, RouteTable},
    session::SessionStore,
};

pub mod conn;

/// In-process endpoint callback invoked by the action handler.
pub type ActionFn = Arc<dyn Fn(&Server, &mut Request) -> Result<()> + Send + Sync>;

/// The runtime a host embeds: configuration, route table, user/role tables,
/// sessions, the handler registry, and the digest secret. Everything a
/// request needs reaches it through this value.
pub struct Server {
    pub cfg: Config,
    routes: RwLock<RouteTable>,
    auth: RwLock<AuthStore>,
    pub sessions: SessionStore,
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    actions: DashMap<String, ActionFn>,
    /// redirect-by-status table, e.g. 401 to the login page.
    redirects: DashMap<u16, String>,
    /// Process secret folded into digest nonces. Drawn from the CSPRNG at
    /// startup; never persisted.
    secret: String,
    nonce_counter: AtomicU64,
    auth_path: RwLock<Option<PathBuf>>,
}

impl Server {
    /// Builds the runtime: registers the built-in handlers and the
    /// login/logout actions, then loads users, roles and routes from the
    /// route/auth file. Without a file a single static-file route covers
    /// the tree.
    pub fn open(cfg: Config, route_file: Option<&Path>) -> Result<Arc<Self>> {
        let mut raw = [0u8; 32];
        rand::rng().fill(&mut raw);
        let mut secret = String::with_capacity(64);
        for byte in &raw {
            write!(&mut secret, "{byte:02x}").expect("Writing to String cannot fail");
        }

        let server = Arc::new(Self {
            auth: RwLock::new(AuthStore::new(&cfg.auth.realm)),
            sessions: SessionStore::new(&cfg.sessions.cookie_name, cfg.sessions.timeout),
            routes: RwLock::new(RouteTable::new()),
            handlers: RwLock::new(Vec::new()),
            actions: DashMap::new(),
            redirects: DashMap::new(),
            secret,
            nonce_counter: AtomicU64::new(1),
            auth_path: RwLock::new(None),
            cfg,
        });

        server.define_handler(Arc::new(AuthGate));
        server.define_handler(Arc::new(RedirectHandler));
        server.define_handler(Arc::new(ActionHandler));
        server.define_handler(Arc::new(UploadHandler));
        server.define_handler(Arc::new(FileHandler));

        server.define_action("login", crate::auth::form::login_action);
        server.define_action("logout", crate::auth::form::logout_action);

        let login_page = server.cfg.auth.login_page.clone();
        server.add_redirect(401, &login_page);

        match route_file {
            Some(path) => server.load_auth(path)?,
            None => {
                server.add_route(Route::new("/").handlers(&["file"]));
            },
        }

        info!(
            docroot = %server.cfg.documents.document_root.display(),
            "runtime open"
        );
        Ok(server)
    }

    /// Applies a route/auth file to the live tables and remembers the path
    /// for write-back.
    pub fn load_auth(&self, path: &Path) -> Result<()> {
        let data = load_auth_file(path)?;
        {
            let mut store = self.auth.write().expect("auth table poisoned");
            for (name, abilities) in &data.roles {
                store.add_role(name, abilities)?;
            }
            for (name, password, roles) in &data.users {
                store.add_user(name, password, roles)?;
            }
        }
        {
            let mut routes = self.routes.write().expect("route table poisoned");
            for route in data.routes {
                routes.add(route);
            }
        }
        *self.auth_path.write().expect("auth path poisoned") = Some(path.to_path_buf());
        Ok(())
    }

    /// Writes users, roles and routes back, to `path` or the loaded file.
    pub fn save_auth(&self, path: Option<&Path>) -> Result<()> {
        let stored = self.auth_path.read().expect("auth path poisoned").clone();
        let path = match (path, &stored) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(p)) => p.clone(),
            (None, None) => bail!("no auth file path known"),
        };
        let store = self.auth.read().expect("auth table poisoned");
        let routes = self.routes.read().expect("route table poisoned");
        save_auth_file(&path, &store, &routes)
    }

    // ────────────────────────────────────────────────────────────────────
    // Listening

    /// Binds `[scheme://][host][:port]`. Only the http scheme is served
    /// here; TLS termination belongs to the host.
    pub async fn listen(&self, endpoint: &str) -> Result<TcpListener> {
        let (host, port) = parse_endpoint(endpoint)?;
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .with_context(|| format!("failed to bind {host}:{port}"))?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(listener)
    }

    /// Accept loop: one task per connection, until the terminator fires.
    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
        terminator: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = terminator.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(self);
                            let cancel = terminator.clone();
                            tokio::spawn(async move {
                                conn::handle(server, stream, peer, cancel).await;
                            });
                        },
                        Err(e) => warn!("accept failed: {e}"),
                    }
                },
            }
        }
        self.close();
        Ok(())
    }

    /// Tears down handler state and drops expired sessions.
    pub fn close(&self) {
        for handler in self.handlers_snapshot() {
            handler.close();
        }
        self.sessions.sweep();
        info!("runtime closed");
    }

    // ────────────────────────────────────────────────────────────────────
    // Extension surface

    pub fn define_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .push(handler);
    }

    pub fn define_action<F>(&self, name: &str, callback: F)
    where F: Fn(&Server, &mut Request) -> Result<()> + Send + Sync + 'static {
        self.actions.insert(name.to_string(), Arc::new(callback));
    }

    pub fn action(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).map(|a| Arc::clone(a.value()))
    }

    pub fn add_route(&self, route: Route) {
        self.routes
            .write()
            .expect("route table poisoned")
            .add(route);
    }

    pub fn remove_route(&self, prefix: &str) -> bool {
        self.routes
            .write()
            .expect("route table poisoned")
            .remove(prefix)
    }

    pub fn select_route(&self, method: &str, path: &str) -> Option<Arc<Route>> {
        self.routes
            .read()
            .expect("route table poisoned")
            .select(method, path)
    }

    pub fn add_user(&self, name: &str, password: &str, roles: &str) -> Result<()> {
        self.auth
            .write()
            .expect("auth table poisoned")
            .add_user(name, password, roles)
    }

    pub fn add_role(&self, name: &str, abilities: &str) -> Result<()> {
        self.auth
            .write()
            .expect("auth table poisoned")
            .add_role(name, abilities)
    }

    pub fn set_user_roles(&self, name: &str, roles: &str) -> Result<()> {
        self.auth
            .write()
            .expect("auth table poisoned")
            .set_user_roles(name, roles)
    }

    pub fn auth_store(&self) -> RwLockReadGuard<'_, AuthStore> {
        self.auth.read().expect("auth table poisoned")
    }

    /// Programmatic login: verifies and caches the identity on the
    /// request's session.
    pub fn login_user(&self, req: &mut Request, username: &str, password: &str) -> bool {
        if !self.auth_store().verify_login(username, password) {
            return false;
        }
        crate::auth::establish(self, req, username.to_string());
        true
    }

    /// Drops the request's session and identity.
    pub fn logout_user(&self, req: &mut Request) {
        if let Some(id) = self.sessions.get_session(req, false) {
            self.sessions.destroy(&id);
        }
        req.username = None;
        req.session = None;
    }

    pub fn get_session_var(&self, req: &mut Request, name: &str) -> Option<String> {
        let id = self.sessions.get_session(req, false)?;
        self.sessions.get_var(&id, name)
    }

    pub fn set_session_var(&self, req: &mut Request, name: &str, value: &str) {
        if let Some(id) = self.sessions.get_session(req, true) {
            self.sessions.set_var(&id, name, value);
        }
    }

    pub fn add_redirect(&self, status: u16, url: &str) {
        self.redirects.insert(status, url.to_string());
    }

    /// Status-driven redirect, e.g. 401 to the login page. Falls back to a
    /// plain error page when no mapping exists.
    pub fn redirect_by_status(&self, req: &mut Request, status: u16) {
        match self.redirects.get(&status) {
            Some(url) => req.redirect(url.value()),
            None => req.error(status, status_text(status)),
        }
    }

    pub(crate) fn handlers_snapshot(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .clone()
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    /// Monotonic counter folded into each digest nonce.
    pub(crate) fn nonce_seq(&self) -> u64 {
        self.nonce_counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// Splits `[scheme://][host][:port]`; the default is every interface on 80.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let rest = match endpoint.split_once("://") {
        Some(("http", rest)) => rest,
        Some((scheme, _)) => bail!("unsupported scheme {scheme:?}"),
        None => endpoint,
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
            (h, p.parse().context("port out of range")?)
        },
        Some(_) => bail!("bad endpoint {endpoint:?}"),
        None => (rest, 80),
    };
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok((host.to_string(), port))
}
