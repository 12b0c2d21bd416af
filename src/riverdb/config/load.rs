use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::{debug, info, info_span};

use crate::riverdb::common::{Error, Result};
use crate::riverdb::config::config::Settings;

/// Looks for `config_name` by walking up from the current directory, then
/// ~/.config/riverdb/, ~/.{config_name}, and /etc/riverdb/. A missing config
/// file is not an error: CLI positional arguments plus defaults are enough
/// to run, so this returns None rather than Err when nothing is found.
pub fn find_config_file(config_name: &str) -> Option<PathBuf> {
    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        loop {
            debug!("checking for config file in {}", dir.to_string_lossy());
            let fp = Path::join(dir, config_name);
            if fp.exists() {
                return Some(fp);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // HOME is required to be set on POSIX systems, but if it's not set we'll try ~/
    let home = env::var("HOME").unwrap_or_else(|_| "~/".to_string());

    let conf_path = Path::join(Path::new(&home), Path::join(Path::new(".config/riverdb"), config_name));
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Some(conf_path);
    }

    let conf_path = Path::join(Path::new(&home), format!(".{}", config_name));
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Some(conf_path);
    }

    let conf_path = Path::join(Path::new("/etc/riverdb"), config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Some(conf_path);
    }

    None
}

/// Replaces ${ENV_VAR[:DEFAULT]} parameters in the yaml text with values
/// from the environment, falling back to the given default after the `:`.
/// A default of the form `:?message` makes the variable required, failing
/// the load with `message` if it's unset.
pub fn replace_env_vars(raw_yaml: &str) -> Result<Cow<str>> {
    // We only call this once per process, so don't bother caching the regex.
    let re_var = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::([^}]+?))?\}").unwrap();

    let mut errors = Vec::<String>::new();

    let replaced_text = re_var
        .replace_all(raw_yaml, |caps: &Captures| match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = caps.get(2) {
                    let s = default.as_str();
                    if let Some(message) = s.strip_prefix('?') {
                        errors.push(message.to_string());
                        String::new()
                    } else {
                        s.to_string()
                    }
                } else {
                    errors.push(format!("environment variable {} is required but not defined", &caps[1]));
                    String::new()
                }
            }
        })
        .into_owned();

    if errors.is_empty() {
        Ok(Cow::Owned(replaced_text))
    } else {
        Err(Error::new(errors.join("\n")))
    }
}

/// Loads and parses `config_name` if present anywhere on the search path.
/// Returns Ok(None), not an error, when no config file exists — the CLI
/// positional arguments and built-in defaults are a complete configuration
/// on their own.
pub fn load_config_file(config_name: &str) -> Result<Option<Settings>> {
    let _span = info_span!("loading config file");
    let config_path = match find_config_file(config_name) {
        Some(p) => p,
        None => {
            debug!("no config file found, using CLI arguments and defaults");
            return Ok(None);
        }
    };
    info!(config_path = %config_path.to_string_lossy().into_owned(), "found config file");
    let raw_yaml = std::fs::read_to_string(&config_path)?;
    let yaml_text = replace_env_vars(&raw_yaml)?;
    let mut settings: Settings = serde_yaml::from_str(&yaml_text)?;
    settings.config_path = Some(config_path);
    Ok(Some(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_env_vars_uses_default_when_unset() {
        let text = replace_env_vars("port: ${RIVERDB_TEST_UNSET_VAR:9999}").unwrap();
        assert_eq!(text, "port: 9999");
    }

    #[test]
    fn replace_env_vars_uses_environment_when_set() {
        std::env::set_var("RIVERDB_TEST_SET_VAR", "12345");
        let text = replace_env_vars("port: ${RIVERDB_TEST_SET_VAR}").unwrap();
        assert_eq!(text, "port: 12345");
        std::env::remove_var("RIVERDB_TEST_SET_VAR");
    }

    #[test]
    fn replace_env_vars_required_message_fails_when_unset() {
        let result = replace_env_vars("host: ${RIVERDB_TEST_REQUIRED:?host is required}");
        assert!(result.is_err());
    }
}
