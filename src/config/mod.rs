// dbsync/src/config/mod.rs
pub mod settings;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::errors::{AppError, Result};

pub use settings::AppSettings;

const SOURCE_FIELDS: &[&str] = &[
    "username",
    "password",
    "database",
    "host",
    "gateway_host",
    "gateway_user",
];
const DESTINATION_FIELDS: &[&str] = &["username", "password", "database"];

/// Which side of a sync an environment can play. Derived from the gateway
/// fields, never read from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Destination => f.write_str("destination"),
        }
    }
}

// YAML scalars as they show up in hand-written database files: passwords and
// ports are frequently left unquoted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

// Structs for deserializing the environment file
#[derive(Debug, Clone, Default, Deserialize)]
struct RawEnvironment {
    adapter: Option<Scalar>,
    host: Option<Scalar>,
    port: Option<Scalar>,
    socket: Option<Scalar>,
    username: Option<Scalar>,
    password: Option<Scalar>,
    database: Option<Scalar>,
    /// Gateway host.
    server: Option<Scalar>,
    /// Gateway user.
    server_username: Option<Scalar>,
    url: Option<Scalar>,
}

/// Connection parameters for one named environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub adapter: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub gateway_host: Option<String>,
    pub gateway_user: Option<String>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl Environment {
    pub fn role(&self) -> Role {
        if present(&self.gateway_host) && present(&self.gateway_user) {
            Role::Source
        } else {
            Role::Destination
        }
    }

    /// Required fields for `role` that are absent or blank, in declaration order.
    pub fn missing_fields(&self, role: Role) -> Vec<&'static str> {
        let required = match role {
            Role::Source => SOURCE_FIELDS,
            Role::Destination => DESTINATION_FIELDS,
        };
        required
            .iter()
            .copied()
            .filter(|field| !present(self.field(field)))
            .collect()
    }

    fn field(&self, name: &str) -> &Option<String> {
        match name {
            "username" => &self.username,
            "password" => &self.password,
            "database" => &self.database,
            "host" => &self.host,
            "gateway_host" => &self.gateway_host,
            "gateway_user" => &self.gateway_user,
            _ => &None,
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or_default()
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn gateway_host(&self) -> &str {
        self.gateway_host.as_deref().unwrap_or_default()
    }

    pub fn gateway_user(&self) -> &str {
        self.gateway_user.as_deref().unwrap_or_default()
    }

    fn from_raw(name: &str, raw: RawEnvironment, path: &Path) -> Result<Self> {
        let text = |s: Option<Scalar>| s.map(Scalar::into_string);
        let port = match text(raw.port) {
            Some(p) => Some(parse_port(&p).ok_or_else(|| AppError::ConfigLoad {
                path: path.to_path_buf(),
                reason: format!("environment '{}' has an invalid port: {}", name, p),
            })?),
            None => None,
        };

        let mut env = Environment {
            name: name.to_string(),
            adapter: text(raw.adapter),
            host: text(raw.host),
            port,
            socket: text(raw.socket).map(PathBuf::from),
            username: text(raw.username),
            password: text(raw.password),
            database: text(raw.database),
            gateway_host: text(raw.server),
            gateway_user: text(raw.server_username),
        };

        if let Some(url) = text(raw.url) {
            env.fill_from_url(&url).map_err(|reason| AppError::ConfigLoad {
                path: path.to_path_buf(),
                reason: format!("environment '{}': {}", name, reason),
            })?;
        }
        Ok(env)
    }

    /// Fills fields left unset by explicit keys from a `mysql://` URL.
    fn fill_from_url(&mut self, raw_url: &str) -> std::result::Result<(), String> {
        let url = Url::parse(raw_url).map_err(|e| format!("invalid url '{}': {}", raw_url, e))?;
        if !url.scheme().starts_with("mysql") {
            return Err(format!("unsupported url scheme '{}'", url.scheme()));
        }

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        if self.username.is_none() {
            self.username = non_empty(url.username());
        }
        if self.password.is_none() {
            self.password = url.password().and_then(non_empty);
        }
        if self.host.is_none() {
            self.host = url.host_str().and_then(non_empty);
        }
        if self.port.is_none() {
            self.port = url.port();
        }
        if self.database.is_none() {
            self.database = non_empty(url.path().trim_start_matches('/'));
        }
        Ok(())
    }
}

fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse().ok()
}

/// Every environment defined in one configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    path: PathBuf,
    environments: BTreeMap<String, Environment>,
}

impl ConfigRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AppError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(path, &content)
    }

    pub fn from_yaml(path: &Path, content: &str) -> Result<Self> {
        let load_error = |reason: String| AppError::ConfigLoad {
            path: path.to_path_buf(),
            reason,
        };

        if content.trim().is_empty() {
            return Err(load_error("file defines no environments".to_string()));
        }
        let raw: BTreeMap<String, RawEnvironment> =
            serde_yaml::from_str(content).map_err(|e| load_error(e.to_string()))?;

        let mut environments = BTreeMap::new();
        for (name, raw_env) in raw {
            let env = Environment::from_raw(&name, raw_env, path)?;
            environments.insert(name, env);
        }

        tracing::debug!(
            "Loaded {} environments from {}",
            environments.len(),
            path.display()
        );
        Ok(ConfigRegistry {
            path: path.to_path_buf(),
            environments,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up `name` and checks it carries every field `role` needs.
    pub fn get(&self, name: &str, role: Role) -> Result<&Environment> {
        let env = self
            .environments
            .get(name)
            .ok_or_else(|| AppError::UnknownEnvironment(name.to_string()))?;

        let missing = env.missing_fields(role);
        if !missing.is_empty() {
            return Err(AppError::InvalidEnvironment {
                name: name.to_string(),
                role,
                missing,
            });
        }
        if let Some(adapter) = env.adapter.as_deref().filter(|a| !a.starts_with("mysql")) {
            tracing::warn!(
                "Environment '{}' uses adapter '{}'; commands are built for MySQL",
                name,
                adapter
            );
        }
        Ok(env)
    }

    pub fn list_sources(&self) -> Vec<&str> {
        self.environments
            .values()
            .filter(|env| env.role() == Role::Source)
            .map(|env| env.name.as_str())
            .collect()
    }

    pub fn list_destinations(&self) -> Vec<&str> {
        let sources = self.list_sources();
        self.environments
            .keys()
            .map(String::as_str)
            .filter(|name| !sources.contains(name))
            .collect()
    }
}
