//! Process-wide communication configuration.
//!
//! The base configuration names the plugin and plugin-interface search paths and the
//! file-suffix conventions for client and service plugins. It is read once from
//! `/etc/iotcomm/config.json`:
//!
//! ```json
//! {
//!     "pluginInterfaceDir": "plugin-interfaces",
//!     "pluginDir": "plugins",
//!     "communication": {
//!         "pluginFileSuffixes": {
//!             "clientFileSuffix": "client",
//!             "serverFileSuffix": "service"
//!         }
//!     }
//! }
//! ```
//!
//! An optional user file (`~/.iotcomm_config.json`) and the `IOTCOMM_PLUGIN_DIRS` /
//! `IOTCOMM_PLUGIN_INTERFACE_DIRS` environment variables append entries to the search
//! paths. Nothing ever replaces the base entries.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// System location of the base configuration file.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/iotcomm/config.json";

/// Name of the user override file inside `$HOME`.
pub const USER_CONFIG_FILE: &str = ".iotcomm_config.json";

/// Base directory for relative plugin search path entries.
pub const SYSTEM_PLUGIN_DIR: &str = "/usr/lib/iotcomm";

/// Base directory for relative plugin-interface search path entries.
pub const SYSTEM_INTERFACE_DIR: &str = "/etc/iotcomm";

/// Environment variable prefix for search path overrides.
pub const ENV_PREFIX: &str = "IOTCOMM";

static GLOBAL: OnceLock<Arc<CommConfig>> = OnceLock::new();

/// Colon-separated, ordered directory list. Lookups try entries in order and stop at the
/// first hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath(Vec<String>);

impl SearchPath {
    /// Parses a colon-separated list, skipping empty entries.
    pub fn parse(value: &str) -> Self {
        Self(
            value
                .split(':')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    /// Appends the entries of another path after the existing ones.
    pub fn append(&mut self, other: &SearchPath) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins the entries back into the colon-separated form.
    pub fn join(&self) -> String {
        self.0.join(":")
    }

    /// Returns the directories to search, joining relative entries onto `base`.
    pub fn resolve(&self, base: &Path) -> Vec<PathBuf> {
        self.0
            .iter()
            .map(|entry| {
                let path = Path::new(entry);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base.join(path)
                }
            })
            .collect()
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

impl Serialize for SearchPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.join())
    }
}

/// Plugin search configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommConfig {
    /// Directories holding `<interface>.json` descriptors
    pub plugin_interface_dirs: SearchPath,

    /// Directories holding `lib<protocol>-<suffix>.<ext>` modules
    pub plugin_dirs: SearchPath,

    /// Module suffix for the client role
    pub client_file_suffix: String,

    /// Module suffix for the service role
    pub service_file_suffix: String,

    /// Base for relative `plugin_dirs` entries
    pub plugin_base_dir: PathBuf,

    /// Base for relative `plugin_interface_dirs` entries
    pub interface_base_dir: PathBuf,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            plugin_interface_dirs: SearchPath::parse(&default_plugin_interface_dir()),
            plugin_dirs: SearchPath::parse(&default_plugin_dir()),
            client_file_suffix: default_client_suffix(),
            service_file_suffix: default_service_suffix(),
            plugin_base_dir: PathBuf::from(SYSTEM_PLUGIN_DIR),
            interface_base_dir: PathBuf::from(SYSTEM_INTERFACE_DIR),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BaseFile {
    plugin_interface_dir: Option<String>,
    plugin_dir: Option<String>,
    #[serde(default)]
    communication: Option<Communication>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Communication {
    plugin_file_suffixes: Option<FileSuffixes>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSuffixes {
    client_file_suffix: Option<String>,
    server_file_suffix: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFile {
    plugin_interface_dir_paths: Option<String>,
    plugin_dir_paths: Option<String>,
}

impl CommConfig {
    /// Creates the built-in default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a base configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid base configuration.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::load_failed(path.display().to_string(), e.to_string()))?;

        Self::from_json(&contents)
            .map_err(|e| ConfigError::invalid_format(path.display().to_string(), e.to_string()).into())
    }

    /// Parses a base configuration document. Keys absent from the document keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON of the expected shape.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: BaseFile = serde_json::from_str(json)
            .map_err(|e| ConfigError::invalid_format("<inline>", e.to_string()))?;

        let mut config = Self::default();
        if let Some(dirs) = file.plugin_interface_dir {
            config.plugin_interface_dirs = SearchPath::parse(&dirs);
        }
        if let Some(dirs) = file.plugin_dir {
            config.plugin_dirs = SearchPath::parse(&dirs);
        }
        if let Some(suffixes) = file.communication.and_then(|c| c.plugin_file_suffixes) {
            if let Some(suffix) = suffixes.client_file_suffix {
                config.client_file_suffix = suffix;
            }
            if let Some(suffix) = suffixes.server_file_suffix {
                config.service_file_suffix = suffix;
            }
        }
        Ok(config)
    }

    /// Appends the search paths of a user override file.
    ///
    /// Returns `Ok(false)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed. The configuration
    /// is left untouched in that case.
    pub fn apply_user_file<P: AsRef<Path>>(&mut self, path: P) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::load_failed(path.display().to_string(), e.to_string()))?;
        let file: UserFile = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::invalid_format(path.display().to_string(), e.to_string()))?;

        if let Some(dirs) = file.plugin_interface_dir_paths {
            self.plugin_interface_dirs.append(&SearchPath::parse(&dirs));
        }
        if let Some(dirs) = file.plugin_dir_paths {
            self.plugin_dirs.append(&SearchPath::parse(&dirs));
        }
        Ok(true)
    }

    /// Appends `IOTCOMM_PLUGIN_DIRS` and `IOTCOMM_PLUGIN_INTERFACE_DIRS` from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_source(Self::env_source())
    }

    /// Appends search path overrides from the given environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be collected.
    pub fn apply_env_source(&mut self, source: config::Environment) -> Result<()> {
        let env = config::Config::builder()
            .add_source(source)
            .build()
            .map_err(|e| ConfigError::Environment {
                details: e.to_string(),
            })?;

        if let Ok(dirs) = env.get_string("plugin_dirs") {
            debug!(dirs = %dirs, "Appending plugin dirs from environment");
            self.plugin_dirs.append(&SearchPath::parse(&dirs));
        }
        if let Ok(dirs) = env.get_string("plugin_interface_dirs") {
            debug!(dirs = %dirs, "Appending plugin interface dirs from environment");
            self.plugin_interface_dirs.append(&SearchPath::parse(&dirs));
        }
        Ok(())
    }

    /// The environment source for `IOTCOMM_*` overrides.
    pub fn env_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
    }

    /// Loads the configuration from explicit file locations.
    ///
    /// Never fails: a missing or malformed base file leaves the defaults in effect, and a
    /// malformed user file is ignored as a whole. Problems are logged.
    pub fn load_from<P: AsRef<Path>>(base: P, user: Option<&Path>) -> Self {
        let base = base.as_ref();
        let mut config = match Self::from_file(base) {
            Ok(config) => {
                info!(path = %base.display(), "Loaded communication configuration");
                config
            }
            Err(e) => {
                warn!(path = %base.display(), error = %e, "Using default communication configuration");
                Self::default()
            }
        };

        if let Some(user) = user {
            match config.apply_user_file(user) {
                Ok(true) => debug!(path = %user.display(), "Applied user configuration"),
                Ok(false) => debug!(path = %user.display(), "No user configuration file"),
                Err(e) => warn!(path = %user.display(), error = %e, "Ignoring user configuration file"),
            }
        }

        if let Err(e) = config.apply_env() {
            warn!(error = %e, "Ignoring environment overrides");
        }

        config
    }

    /// Loads the configuration from the system and user locations.
    pub fn load() -> Self {
        let user = std::env::var_os("HOME").map(|home| PathBuf::from(home).join(USER_CONFIG_FILE));
        Self::load_from(SYSTEM_CONFIG_FILE, user.as_deref())
    }

    /// Returns the process-wide configuration, loading it on first use.
    pub fn global() -> Arc<CommConfig> {
        GLOBAL.get_or_init(|| Arc::new(Self::load())).clone()
    }

    /// Directories searched for plugin modules, in order.
    pub fn plugin_search_dirs(&self) -> Vec<PathBuf> {
        self.plugin_dirs.resolve(&self.plugin_base_dir)
    }

    /// Directories searched for interface descriptors, in order.
    pub fn interface_search_dirs(&self) -> Vec<PathBuf> {
        self.plugin_interface_dirs.resolve(&self.interface_base_dir)
    }
}

fn default_plugin_interface_dir() -> String {
    "plugin-interfaces".to_string()
}

fn default_plugin_dir() -> String {
    "plugins".to_string()
}

fn default_client_suffix() -> String {
    "client".to_string()
}

fn default_service_suffix() -> String {
    "service".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::fs;

    #[test]
    fn test_search_path_parse() {
        let path = SearchPath::parse("/opt/a::b: :/c/");
        assert_eq!(path.entries(), &["/opt/a", "b", "/c/"]);
        assert_eq!(path.join(), "/opt/a:b:/c/");
        assert!(SearchPath::parse("").is_empty());
    }

    #[test]
    fn test_search_path_resolve() {
        let path = SearchPath::parse("/opt/plugins:plugins");
        let dirs = path.resolve(Path::new("/usr/lib/iotcomm"));
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/opt/plugins"),
                PathBuf::from("/usr/lib/iotcomm/plugins")
            ]
        );
    }

    #[test]
    fn test_defaults() {
        let config = CommConfig::default();
        assert_eq!(config.plugin_dirs.join(), "plugins");
        assert_eq!(config.plugin_interface_dirs.join(), "plugin-interfaces");
        assert_eq!(config.client_file_suffix, "client");
        assert_eq!(config.service_file_suffix, "service");
        assert_eq!(
            config.plugin_search_dirs(),
            vec![PathBuf::from("/usr/lib/iotcomm/plugins")]
        );
    }

    #[test]
    fn test_from_json() {
        let config = CommConfig::from_json(
            r#"{
                "pluginInterfaceDir": "/etc/x/interfaces",
                "pluginDir": "/opt/plugins:plugins",
                "communication": {
                    "pluginFileSuffixes": { "clientFileSuffix": "cli", "serverFileSuffix": "srv" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.plugin_interface_dirs.entries(), &["/etc/x/interfaces"]);
        assert_eq!(config.plugin_dirs.entries(), &["/opt/plugins", "plugins"]);
        assert_eq!(config.client_file_suffix, "cli");
        assert_eq!(config.service_file_suffix, "srv");
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = CommConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::LoadFailed { .. })));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        let err = CommConfig::from_file(&bad).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    fn test_user_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.json");
        fs::write(
            &user,
            r#"{ "pluginDirPaths": "/home/u/plugins:/opt/more", "pluginInterfaceDirPaths": "/home/u/ifaces" }"#,
        )
        .unwrap();

        let mut config = CommConfig::default();
        assert!(config.apply_user_file(&user).unwrap());
        assert_eq!(
            config.plugin_dirs.entries(),
            &["plugins", "/home/u/plugins", "/opt/more"]
        );
        assert_eq!(
            config.plugin_interface_dirs.entries(),
            &["plugin-interfaces", "/home/u/ifaces"]
        );
    }

    #[test]
    fn test_missing_user_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CommConfig::default();
        assert!(!config.apply_user_file(dir.path().join("none.json")).unwrap());
        assert_eq!(config, CommConfig::default());
    }

    #[test]
    fn test_load_from_keeps_defaults_on_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("config.json");
        let user = dir.path().join("user.json");
        fs::write(&base, "[1, 2").unwrap();
        fs::write(&user, "{ \"pluginDirPaths\": 7 }").unwrap();

        let config = CommConfig::load_from(&base, Some(&user));
        assert_eq!(config.client_file_suffix, "client");
        assert_eq!(config.plugin_interface_dirs.entries()[0], "plugin-interfaces");
        assert_eq!(config.plugin_dirs.entries()[0], "plugins");
    }

    #[test]
    fn test_load_from_merges_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("config.json");
        let user = dir.path().join("user.json");
        fs::write(&base, r#"{ "pluginDir": "/a" }"#).unwrap();
        fs::write(&user, r#"{ "pluginDirPaths": "/b" }"#).unwrap();

        let config = CommConfig::load_from(&base, Some(&user));
        assert_eq!(&config.plugin_dirs.entries()[..2], &["/a", "/b"]);
    }

    #[test]
    fn test_env_source_appends() {
        let mut vars = config::Map::new();
        vars.insert("IOTCOMM_PLUGIN_DIRS".to_string(), "/env/plugins".to_string());
        vars.insert(
            "IOTCOMM_PLUGIN_INTERFACE_DIRS".to_string(),
            "/env/a:/env/b".to_string(),
        );

        let mut config = CommConfig::default();
        config
            .apply_env_source(CommConfig::env_source().source(Some(vars)))
            .unwrap();
        assert_eq!(config.plugin_dirs.entries(), &["plugins", "/env/plugins"]);
        assert_eq!(
            config.plugin_interface_dirs.entries(),
            &["plugin-interfaces", "/env/a", "/env/b"]
        );
    }
}
