use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::HookError;
use crate::paths;
use crate::rules::RuleTable;

pub const DEFAULT_NAME: &str = "android-x86";
pub const DEFAULT_ANNOTATION_DOMAIN: &str = "kubevirt.io";

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Config {
    /// Hook name reported by `Info` and used as the socket file stem.
    #[facet(default = "android-x86")]
    pub name: String,
    #[facet(default = "/var/run/kubevirt-hooks")]
    pub socket_dir: String,
    /// The `<platform>` part of every annotation key.
    #[facet(default = "kubevirt.io")]
    pub annotation_domain: String,
    /// `fail-call` or `terminate`.
    #[facet(default = "fail-call")]
    pub decode_error_policy: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            socket_dir: paths::HOOK_SOCKETS_DIR.into(),
            annotation_domain: DEFAULT_ANNOTATION_DOMAIN.into(),
            decode_error_policy: "fail-call".into(),
        }
    }
}

/// What the server does after a call fails on a malformed payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeErrorPolicy {
    /// Fail the call and keep serving.
    #[default]
    FailCall,
    /// Fail the call, then stop the server so the supervisor restarts it.
    Terminate,
}

impl DecodeErrorPolicy {
    fn parse(value: &str) -> Result<Self, HookError> {
        match value {
            "fail-call" => Ok(Self::FailCall),
            "terminate" => Ok(Self::Terminate),
            other => Err(HookError::Validation {
                message: format!(
                    "decode_error_policy must be 'fail-call' or 'terminate' (got '{other}')"
                ),
            }),
        }
    }
}

// ── HookConfig ────────────────────────────────────────────

/// Validated runtime config.
#[derive(Debug, Clone)]
pub struct HookConfig {
    pub name: String,
    pub socket_dir: PathBuf,
    pub annotation_domain: String,
    pub decode_error_policy: DecodeErrorPolicy,
}

impl HookConfig {
    pub fn socket_path(&self) -> PathBuf {
        paths::socket_path(&self.socket_dir, &self.name)
    }

    pub fn rule_table(&self) -> RuleTable {
        RuleTable::for_platform(&self.annotation_domain)
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            socket_dir: PathBuf::from(paths::HOOK_SOCKETS_DIR),
            annotation_domain: DEFAULT_ANNOTATION_DOMAIN.into(),
            decode_error_policy: DecodeErrorPolicy::FailCall,
        }
    }
}

// ── validation ────────────────────────────────────────────

fn validate_name(name: &str) -> Result<(), HookError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(HookError::Validation {
            message: format!("name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"),
        });
    }
    Ok(())
}

/// Check a raw config and turn it into a [`HookConfig`].
pub fn validate_config(config: &Config) -> Result<HookConfig, HookError> {
    validate_name(&config.name)?;

    if config.annotation_domain.is_empty() || config.annotation_domain.contains('/') {
        return Err(HookError::Validation {
            message: format!(
                "annotation_domain must be non-empty and contain no '/' (got '{}')",
                config.annotation_domain
            ),
        });
    }

    if !config.socket_dir.starts_with('/') {
        return Err(HookError::Validation {
            message: format!("socket_dir must be absolute (got '{}')", config.socket_dir),
        });
    }

    Ok(HookConfig {
        name: config.name.clone(),
        socket_dir: PathBuf::from(&config.socket_dir),
        annotation_domain: config.annotation_domain.clone(),
        decode_error_policy: DecodeErrorPolicy::parse(&config.decode_error_policy)?,
    })
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, HookError> {
    facet_toml::from_str(contents).map_err(|e| HookError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load the config file at `path`, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config, HookError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let contents = std::fs::read_to_string(path).map_err(|source| HookError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    parse_config(&contents, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        parse_config(toml, Path::new("hook.toml")).unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = validate_config(&parse("")).unwrap();
        assert_eq!(config.name, "android-x86");
        assert_eq!(config.socket_dir, PathBuf::from("/var/run/kubevirt-hooks"));
        assert_eq!(config.annotation_domain, "kubevirt.io");
        assert_eq!(config.decode_error_policy, DecodeErrorPolicy::FailCall);
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/var/run/kubevirt-hooks/android-x86.sock")
        );
    }

    #[test]
    fn default_matches_parsed_defaults() {
        let parsed = validate_config(&parse("")).unwrap();
        let default = HookConfig::default();
        assert_eq!(parsed.name, default.name);
        assert_eq!(parsed.socket_dir, default.socket_dir);
        assert_eq!(parsed.annotation_domain, default.annotation_domain);
    }

    #[test]
    fn full_config() {
        let config = validate_config(&parse(
            r#"
name = "android-x86-dev"
socket_dir = "/tmp/hooks"
annotation_domain = "example.com"
decode_error_policy = "terminate"
"#,
        ))
        .unwrap();
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/hooks/android-x86-dev.sock"));
        assert_eq!(config.decode_error_policy, DecodeErrorPolicy::Terminate);
        assert_eq!(
            config.rule_table().key(crate::rules::Rule::VideoModel),
            Some("video.vm.example.com/model")
        );
    }

    #[test]
    fn invalid_names() {
        for name in ["", "-hook", "a/b", "hook name"] {
            let mut config = Config::default();
            config.name = name.into();
            assert!(validate_config(&config).is_err(), "expected '{name}' to be invalid");
        }
    }

    #[test]
    fn relative_socket_dir_rejected() {
        let mut config = Config::default();
        config.socket_dir = "run/hooks".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bad_annotation_domain_rejected() {
        for domain in ["", "kubevirt.io/x"] {
            let mut config = Config::default();
            config.annotation_domain = domain.into();
            assert!(validate_config(&config).is_err());
        }
    }

    #[test]
    fn unknown_policy_rejected() {
        let mut config = Config::default();
        config.decode_error_policy = "panic".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("decode_error_policy"));
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = load_config(Some(Path::new("/nonexistent/hook.toml"))).unwrap_err();
        assert!(matches!(err, HookError::ConfigLoad { .. }));
    }

    #[test]
    fn no_path_means_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.name, DEFAULT_NAME);
    }
}
