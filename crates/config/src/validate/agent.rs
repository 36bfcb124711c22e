//! Issuance agent validation
//!
//! The gateway cannot serve without its external issuance agent, so a
//! missing binary is an error, not a warning.

use std::path::{Path, PathBuf};

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Resolve the agent executable
///
/// Names containing a path separator are checked as given; bare names are
/// searched for on `PATH`.
pub fn resolve_agent_binary(binary: &str) -> Option<PathBuf> {
    if binary.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(binary);
        return is_executable(&path).then_some(path);
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Validate the agent binary and its state directory
pub fn validate_agent(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let agent = &config.agent;

    if resolve_agent_binary(&agent.binary).is_none() {
        result.add_error(ValidationError::new(
            ErrorCategory::Agent,
            format!("Cannot find issuance agent '{}'", agent.binary),
        ));
    }

    if agent.state_dir.exists() && !agent.state_dir.is_dir() {
        result.add_error(ValidationError::new(
            ErrorCategory::Agent,
            format!(
                "Agent state path {} exists but is not a directory",
                agent.state_dir.display()
            ),
        ));
    } else if !agent.state_dir.join("config").is_dir() {
        result.add_warning(ValidationWarning::new(format!(
            "No agent registration under {}; it will be created at startup",
            agent.state_dir.display()
        )));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_binary() {
        let mut config = Config::default();
        config.agent.binary = "certomat-no-such-agent".to_string();

        let result = validate_agent(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("certomat-no-such-agent")));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_binary_resolves() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("agent");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let resolved = resolve_agent_binary(script.to_str().unwrap());
        assert_eq!(resolved, Some(script.clone()));

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(resolve_agent_binary(script.to_str().unwrap()), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_sh_found_on_path() {
        assert!(resolve_agent_binary("sh").is_some());
    }

    #[test]
    fn test_unregistered_state_dir_warns() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.agent.state_dir = dir.path().to_path_buf();

        let result = validate_agent(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("registration")));
    }
}
