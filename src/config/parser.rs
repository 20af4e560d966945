use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates the configuration file at `path`
///
/// # Returns
///
/// * `Ok(Config)` - A configuration that passed validation
/// * `Err(ConfigError)` - The file is unreadable, not TOML, or invalid
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_probe::config::load_config;
///
/// let config = load_config(Path::new("probe.toml")).unwrap();
/// println!("Max depth: {}", config.scan.max_depth);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Hex-encoded SHA-256 of a configuration file
///
/// Logged when a scan starts so stored results can be traced to the exact
/// file that produced them.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    Ok(digest(&content))
}

/// Loads a configuration together with the hash of the bytes it came from
///
/// The file is read once, so the hash always describes the parsed content.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, digest(content.as_bytes())))
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotsFailurePolicy;
    use crate::url::LinkScope;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const FULL: &str = r#"
[scan]
max-depth = 3
max-pages = 200
requests-per-second = 2.5
timeout = 10
user-agent = "SumiProbe/1.0 (+https://example.com/bot)"

[engine]
workers = 8
link-scope = "site"
robots-failure = "deny"

[retry]
attempts = 1

[output]
database-path = "./scans.db"
"#;

    const MINIMAL: &str = r#"
[scan]
max-depth = 0
max-pages = 1
requests-per-second = 1
timeout = 5
user-agent = "SumiProbe"

[output]
database-path = "./scans.db"
"#;

    #[test]
    fn test_load_full_config() {
        let file = config_file(FULL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.scan.max_depth, 3);
        assert_eq!(config.scan.max_pages, 200);
        assert_eq!(config.scan.requests_per_second, 2.5);
        assert_eq!(config.scan.timeout(), std::time::Duration::from_secs(10));
        assert_eq!(config.engine.workers, 8);
        assert_eq!(config.engine.link_scope, LinkScope::Site);
        assert_eq!(config.engine.robots_failure, RobotsFailurePolicy::Deny);
        assert_eq!(config.retry.attempts, 1);
        assert_eq!(config.output.database_path, "./scans.db");
    }

    #[test]
    fn test_omitted_sections_take_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert!(config.scan.follow_redirects);
        assert!(config.scan.respect_robots);
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.engine.link_scope, LinkScope::Origin);
        assert_eq!(config.engine.robots_failure, RobotsFailurePolicy::Allow);
        assert_eq!(config.retry.attempts, 2);
        assert!(config.fingerprints.signatures_path.is_none());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/probe.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            parse_config("this is not valid TOML {{{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_budget = MINIMAL.replace("max-pages = 1", "max-pages = 0");
        assert!(matches!(
            parse_config(&zero_budget),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_hash_matches_loaded_content() {
        let file = config_file(FULL);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();

        assert_eq!(config.scan.max_depth, 3);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
        assert_ne!(hash, compute_config_hash(config_file(MINIMAL).path()).unwrap());
    }
}
