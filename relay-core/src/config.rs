//! Typed configuration, merged over built-in defaults.
//!
//! # Loading flow
//!
//! 1. Parse [`DEFAULT_CONFIG_YAML`] into a `serde_yaml::Value`.
//! 2. Parse the user's document and merge it over the defaults: mappings
//!    merge key by key, recursively; any other value replaces the default.
//! 3. Deserialize the merged value into [`RelayConfig`]. Unknown keys and
//!    mistyped values become [`ConfigError::Parse`].
//! 4. [`RelayConfig::validate`] rejects values that parse but cannot work.
//!
//! Keys are kebab-case. The `key_filename` and `preserve_prefix` spellings
//! of older configuration files are rewritten before the merge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{io_err, ConfigError};
use crate::policy::{default_labels, Label};

/// Default location of the configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gerrit-relay/projects.yaml";

/// Built-in defaults every user document is merged over.
pub const DEFAULT_CONFIG_YAML: &str = r####"
git-config:
  email: ""
  name: ""
gerrit:
  host: localhost
  port: 29418
  username: SomeUser
  key-filename: null
  timeout: 10
  keepalive: 60
  was-here-indicator: "### Setup by gerrit-sync ###"
  all-projects-config: null
upstream:
  host: ""
  port: 29418
  username: SomeUser
  key-filename: null
  timeout: 10
  keepalive: 60
daemon:
  numthreads: 5
  sleep: 5
  delay: 120
  upstream: true
  sync: true
  scratch-dir: "~/tmp"
logging:
  file: /var/log/gerrit-relay/gerrit-relay.log
  level: info
  format: text
  max-bytes: 10485760
  keep: 5
groups: []
users: []
projects: []
"####;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Connection parameters for one review service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Remote {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_filename: Option<PathBuf>,
    /// Connect timeout in seconds.
    pub timeout: u64,
    /// Keepalive interval in seconds.
    pub keepalive: u64,
}

impl Remote {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive)
    }

    /// `ssh://user@host:port/<project>`
    pub fn project_url(&self, project: &str) -> String {
        format!(
            "ssh://{}@{}:{}/{}",
            self.username, self.host, self.port, project
        )
    }
}

/// The downstream review service: connection parameters plus the settings
/// of the configuration mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct DownstreamConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_filename: Option<PathBuf>,
    pub timeout: u64,
    pub keepalive: u64,
    /// Marker written at the top of every mirrored configuration file.
    pub was_here_indicator: String,
    /// Source of `project.config` for `All-Projects` (used by `setup`).
    pub all_projects_config: Option<PathBuf>,
}

impl DownstreamConfig {
    pub fn remote(&self) -> Remote {
        Remote {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            key_filename: self.key_filename.clone(),
            timeout: self.timeout,
            keepalive: self.keepalive,
        }
    }
}

/// Committer identity for commits this tool creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// Worker pool size.
    pub numthreads: usize,
    /// Idle sleep of the daemon loop and of idle workers, in seconds.
    pub sleep: u64,
    /// Delay before a sync triggered by an upstream ref update, in seconds.
    pub delay: u64,
    /// Mirror approved downstream changes to upstream.
    pub upstream: bool,
    /// Sync projects when upstream reports a ref update.
    pub sync: bool,
    #[serde(default = "default_labels")]
    pub required_labels: Vec<Label>,
    /// Parent directory of per-job scratch repositories. `~` is expanded.
    pub scratch_dir: PathBuf,
}

impl DaemonConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.sleep)
    }

    pub fn schedule_delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    pub fn scratch_root(&self) -> PathBuf {
        expand_home(&self.scratch_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub file: PathBuf,
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Size at which the log file is rotated.
    pub max_bytes: u64,
    /// Rotated files kept next to the live one. Zero truncates in place.
    pub keep: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// A group that must exist on downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Owning group; Gerrit defaults to Administrators.
    #[serde(default)]
    pub owner: Option<String>,
}

/// An internal account that must exist on downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct UserSpec {
    pub username: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub http_password: Option<String>,
}

/// A project managed on downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProjectSpec {
    pub name: String,
    /// Run `gerrit create-project` before anything else.
    #[serde(default)]
    pub create: bool,
    /// Source file for the mirrored `project.config`.
    #[serde(default)]
    pub config: Option<PathBuf>,
    /// Git URL whose branches and tags are pushed into the project.
    #[serde(default)]
    pub source: Option<String>,
    /// Refs starting with this prefix are never pruned.
    #[serde(default)]
    pub preserve_prefix: Option<String>,
    #[serde(default = "yes")]
    pub heads: bool,
    #[serde(default)]
    pub tags: bool,
    #[serde(default = "yes")]
    pub force: bool,
    #[serde(default = "yes")]
    pub prune: bool,
}

fn yes() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// The whole validated configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RelayConfig {
    pub git_config: GitIdentity,
    pub gerrit: DownstreamConfig,
    pub upstream: Remote,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
    pub groups: Vec<GroupSpec>,
    pub users: Vec<UserSpec>,
    pub projects: Vec<ProjectSpec>,
}

impl RelayConfig {
    /// Load `path` and merge it over the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => return Err(io_err(path, err)),
        };
        Self::from_yaml_str(&contents, path)
    }

    /// Parse `contents` as if it had been read from `origin`.
    pub fn from_yaml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        };

        let mut merged = default_document()?;
        let mut user: Value = serde_yaml::from_str(contents).map_err(parse_err)?;
        // An empty file parses as null: keep the defaults.
        if !user.is_null() {
            normalize_legacy_keys(&mut user);
            merge(&mut merged, user);
        }

        let config: RelayConfig = serde_yaml::from_value(merged).map_err(parse_err)?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in defaults alone.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_yaml_str("", Path::new(DEFAULTS_ORIGIN))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.numthreads == 0 {
            return Err(ConfigError::Invalid {
                field: "daemon.numthreads",
                reason: "at least one worker is required".to_string(),
            });
        }
        for label in &self.daemon.required_labels {
            if label.min >= label.max {
                return Err(ConfigError::Invalid {
                    field: "daemon.required-labels",
                    reason: format!(
                        "label {} has min {} not below max {}",
                        label.name, label.min, label.max
                    ),
                });
            }
        }
        if self.logging.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "logging.max-bytes",
                reason: "the rotation threshold must be positive".to_string(),
            });
        }
        if self.gerrit.was_here_indicator.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "gerrit.was-here-indicator",
                reason: "the marker must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Extra checks for `daemon`: both sides must be reachable.
    pub fn validate_for_daemon(&self) -> Result<(), ConfigError> {
        if self.gerrit.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "gerrit.host",
                reason: "the daemon needs a downstream host".to_string(),
            });
        }
        if self.upstream.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "upstream.host",
                reason: "the daemon needs an upstream host".to_string(),
            });
        }
        Ok(())
    }

    pub fn project(&self, name: &str) -> Option<&ProjectSpec> {
        self.projects.iter().find(|p| p.name == name)
    }
}

const DEFAULTS_ORIGIN: &str = "<built-in defaults>";

const LEGACY_KEYS: &[(&str, &str)] = &[
    ("key_filename", "key-filename"),
    ("preserve_prefix", "preserve-prefix"),
];

fn default_document() -> Result<Value, ConfigError> {
    serde_yaml::from_str(DEFAULT_CONFIG_YAML).map_err(|source| ConfigError::Parse {
        path: PathBuf::from(DEFAULTS_ORIGIN),
        source,
    })
}

/// Rename legacy snake_case keys anywhere in `value` to their kebab-case form.
fn normalize_legacy_keys(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            for (legacy, current) in LEGACY_KEYS {
                if let Some(v) = map.remove(*legacy) {
                    map.insert(Value::from(*current), v);
                }
            }
            for (_, v) in map.iter_mut() {
                normalize_legacy_keys(v);
            }
        }
        Value::Sequence(items) => items.iter_mut().for_each(normalize_legacy_keys),
        _ => {}
    }
}

/// Merge `overlay` into `base`. Mappings merge recursively; anything else in
/// `overlay` replaces the value in `base`.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            merge_mappings(base_map, overlay_map)
        }
        (base, overlay) => *base = overlay,
    }
}

fn merge_mappings(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        if let Some(existing) = base.get_mut(&key) {
            if existing.is_mapping() {
                merge(existing, value);
                continue;
            }
        }
        base.insert(key, value);
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
