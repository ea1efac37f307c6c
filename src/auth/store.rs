// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use tracing::{error, info};

use crate::{
    auth::{
        AuthType,
        digest::{constant_time_eq, md5_hex},
    },
    route::{Route, RouteTable},
};

/// Role nesting deeper than this is a configuration cycle.
const MAX_ROLE_DEPTH: usize = 20;

#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    /// Cleartext or a precomputed HA1 (32 hex digits).
    pub password: String,
    pub roles: Vec<String>,
    /// Transitive closure of role abilities, recomputed on every change.
    pub abilities: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    /// Direct ability tokens; a token naming another role nests it.
    pub abilities: HashSet<String>,
}

/// User and role tables plus the realm their HA1 hashes are bound to.
/// Mutated only through this API, between requests.
#[derive(Debug)]
pub struct AuthStore {
    users: HashMap<String, User>,
    roles: HashMap<String, Role>,
    realm: String,
}

/// Splits a role/ability list on commas and whitespace.
fn tokenize(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

fn looks_like_ha1(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl AuthStore {
    pub fn new(realm: &str) -> Self {
        Self {
            users: HashMap::new(),
            roles: HashMap::new(),
            realm: realm.to_string(),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn add_user(&mut self, name: &str, password: &str, roles: &str) -> Result<()> {
        if self.users.contains_key(name) {
            bail!("user {name:?} already exists");
        }
        self.users.insert(
            name.to_string(),
            User {
                name: name.to_string(),
                password: password.to_string(),
                roles: tokenize(roles).map(str::to_string).collect(),
                abilities: HashSet::new(),
            },
        );
        self.recompute();
        Ok(())
    }

    pub fn remove_user(&mut self, name: &str) -> bool {
        self.users.remove(name).is_some()
    }

    pub fn add_role(&mut self, name: &str, abilities: &str) -> Result<()> {
        if self.roles.contains_key(name) {
            bail!("role {name:?} already exists");
        }
        self.roles.insert(
            name.to_string(),
            Role {
                name: name.to_string(),
                abilities: tokenize(abilities).map(str::to_string).collect(),
            },
        );
        self.recompute();
        Ok(())
    }

    pub fn remove_role(&mut self, name: &str) -> bool {
        let removed = self.roles.remove(name).is_some();
        if removed {
            self.recompute();
        }
        removed
    }

    pub fn set_user_roles(&mut self, name: &str, roles: &str) -> Result<()> {
        let user = self
            .users
            .get_mut(name)
            .with_context(|| format!("unknown user {name:?}"))?;
        user.roles = tokenize(roles).map(str::to_string).collect();
        self.recompute();
        Ok(())
    }

    /// Expands every user's role list into its ability closure. A token
    /// naming a role recurses into it; any other token is an ability of its
    /// own.
    fn recompute(&mut self) {
        let roles = &self.roles;
        for user in self.users.values_mut() {
            let mut abilities = HashSet::new();
            for token in &user.roles {
                expand(roles, token, 0, &mut abilities);
            }
            user.abilities = abilities;
        }
    }

    /// Verifies a cleartext password offered by Basic or form login against
    /// the stored cleartext or HA1.
    pub fn verify_login(&self, username: &str, password: &str) -> bool {
        let Some(user) = self.users.get(username) else {
            return false;
        };
        if looks_like_ha1(&user.password) {
            let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
            constant_time_eq(ha1.as_bytes(), user.password.to_lowercase().as_bytes())
        } else {
            constant_time_eq(password.as_bytes(), user.password.as_bytes())
        }
    }

    /// The user's HA1 for digest math, computing it when the record holds a
    /// cleartext password.
    pub fn ha1(&self, username: &str) -> Option<String> {
        let user = self.users.get(username)?;
        if looks_like_ha1(&user.password) {
            Some(user.password.to_lowercase())
        } else {
            Some(md5_hex(&format!(
                "{username}:{}:{}",
                self.realm, user.password
            )))
        }
    }
}

fn expand(
    roles: &HashMap<String, Role>,
    token: &str,
    depth: usize,
    out: &mut HashSet<String>,
) {
    if depth > MAX_ROLE_DEPTH {
        error!(token = %token, "role nesting exceeds {MAX_ROLE_DEPTH}, cycle?");
        return;
    }
    match roles.get(token) {
        Some(role) => {
            for inner in &role.abilities {
                expand(roles, inner, depth + 1, out);
            }
        },
        None => {
            out.insert(token.to_string());
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route/auth file: line-oriented `directive key=value …`

/// Parsed contents of a route/auth file.
#[derive(Debug, Default)]
pub struct AuthFileData {
    pub users: Vec<(String, String, String)>,
    pub roles: Vec<(String, String)>,
    pub routes: Vec<Route>,
}

fn kv_pairs(rest: &str) -> HashMap<&str, &str> {
    rest.split_whitespace()
        .filter_map(|tok| tok.split_once('='))
        .collect()
}

fn csv_list(s: &str) -> Vec<&str> {
    s.split(',').filter(|t| !t.is_empty()).collect()
}

/// Loads a route/auth file. `#` comments and blank lines are skipped;
/// unknown directives fail the load.
pub fn load_auth_file(path: &Path) -> Result<AuthFileData> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read auth file {path:?}"))?;
    let mut data = AuthFileData::default();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let kv = kv_pairs(rest);
        let ctx = || format!("{}:{}: {line:?}", path.display(), lineno + 1);

        match directive {
            "user" => {
                let name = kv.get("name").with_context(|| ctx())?;
                let password = kv.get("password").copied().unwrap_or("");
                let roles = kv.get("roles").copied().unwrap_or("");
                data.users
                    .push((name.to_string(), password.to_string(), roles.to_string()));
            },
            "role" => {
                let name = kv.get("name").with_context(|| ctx())?;
                let abilities = kv.get("abilities").copied().unwrap_or("");
                data.roles.push((name.to_string(), abilities.to_string()));
            },
            "route" => {
                let prefix = kv.get("prefix").with_context(|| ctx())?;
                let mut route = Route::new(prefix);
                if let Some(methods) = kv.get("methods").filter(|v| !v.is_empty()) {
                    route = route.methods(&csv_list(methods));
                }
                if let Some(exts) = kv.get("extensions").filter(|v| !v.is_empty()) {
                    route = route.extensions(&csv_list(exts));
                }
                if let Some(abilities) = kv.get("abilities").filter(|v| !v.is_empty()) {
                    route = route.abilities(&csv_list(abilities));
                }
                if let Some(auth) = kv.get("auth") {
                    route = route.auth(
                        AuthType::from_str(auth)
                            .map_err(anyhow::Error::msg)
                            .with_context(|| ctx())?,
                    );
                }
                if let Some(handlers) = kv.get("handler").filter(|v| !v.is_empty()) {
                    route = route.handlers(&csv_list(handlers));
                }
                if let Some(redirect) = kv.get("redirect").filter(|v| !v.is_empty()) {
                    route = route.redirect_to(redirect);
                }
                data.routes.push(route);
            },
            other => bail!("{}: unknown directive {other:?}", ctx()),
        }
    }

    info!(
        users = data.users.len(),
        roles = data.roles.len(),
        routes = data.routes.len(),
        "auth file loaded"
    );
    Ok(data)
}

/// Writes the current tables back in the same line shape, canonically
/// sorted, replacing the file atomically via a temp-file rename.
pub fn save_auth_file(path: &Path, store: &AuthStore, routes: &RouteTable) -> Result<()> {
    let mut out = String::from("# embweb route/auth configuration\n");

    let mut roles: Vec<&Role> = store.roles().collect();
    roles.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    for role in roles {
        let mut abilities: Vec<&str> = role.abilities.iter().map(String::as_str).collect();
        abilities.sort_unstable();
        out.push_str(&format!(
            "role name={} abilities={}\n",
            role.name,
            abilities.join(",")
        ));
    }

    let mut users: Vec<&User> = store.users().collect();
    users.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    for user in users {
        out.push_str(&format!(
            "user name={} password={} roles={}\n",
            user.name,
            user.password,
            user.roles.join(",")
        ));
    }

    for route in routes.iter() {
        out.push_str(&format!("route prefix={}", route.prefix));
        if let Some(methods) = &route.methods {
            let mut methods: Vec<&str> = methods.iter().map(String::as_str).collect();
            methods.sort_unstable();
            out.push_str(&format!(" methods={}", methods.join(",")));
        }
        if let Some(exts) = &route.extensions {
            let mut exts: Vec<&str> = exts.iter().map(String::as_str).collect();
            exts.sort_unstable();
            out.push_str(&format!(" extensions={}", exts.join(",")));
        }
        if !route.abilities.is_empty() {
            let mut abilities: Vec<&str> =
                route.abilities.iter().map(String::as_str).collect();
            abilities.sort_unstable();
            out.push_str(&format!(" abilities={}", abilities.join(",")));
        }
        out.push_str(&format!(" auth={}", route.auth));
        if !route.handlers.is_empty() {
            out.push_str(&format!(" handler={}", route.handlers.join(",")));
        }
        if let Some(redirect) = &route.redirect_to {
            out.push_str(&format!(" redirect={redirect}"));
        }
        out.push('\n');
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, out).with_context(|| format!("failed to write {tmp:?}"))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
