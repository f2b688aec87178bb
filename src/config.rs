use std::{path::Path, time::Duration};

use ini::{Ini, Properties};
use tracing::debug;

use crate::{
    constants,
    error::{Result, VaultError},
    profile::{Profile, ProfileGraph},
};

impl Profile {
    fn from_ini_section(name: &str, section: &Properties) -> Result<Self> {
        let get = |key: &str| {
            section
                .get(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let role_duration = section
            .get("duration_seconds")
            .map(|s| {
                s.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    VaultError::Configuration(format!(
                        "profile '{name}': duration_seconds must be a whole number of seconds, got '{s}'"
                    ))
                })
            })
            .transpose()?;

        let session_duration = section
            .get("session_duration")
            .map(|s| {
                humantime::parse_duration(s.trim()).map_err(|e| {
                    VaultError::Configuration(format!(
                        "profile '{name}': invalid session_duration '{s}': {e}"
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            source_profile: get("source_profile"),
            role_arn: get("role_arn"),
            mfa_serial: get("mfa_serial"),
            region: get("region"),
            external_id: get("external_id"),
            role_session_name: get("role_session_name"),
            session_duration,
            role_duration,
        })
    }
}

/// Build the profile graph from parsed INI data.
///
/// `[default]` and `[profile NAME]` sections are profiles; a bare `[NAME]`
/// section is accepted too, matching the credentials-file convention.
pub fn parse_profiles(ini: &Ini) -> Result<ProfileGraph> {
    let mut graph = ProfileGraph::new();

    for (section_name, properties) in ini.iter() {
        let Some(section_name) = section_name else {
            continue;
        };

        let name = section_name
            .strip_prefix("profile ")
            .unwrap_or(section_name)
            .trim();

        graph.insert(Profile::from_ini_section(name, properties)?);
    }

    Ok(graph)
}

/// Load profiles from the given AWS config file. A missing file is an empty
/// graph.
pub fn load_from(path: &Path) -> Result<ProfileGraph> {
    if !path.exists() {
        debug!(path = %path.display(), "No AWS config file, using implicit profiles");
        return Ok(ProfileGraph::new());
    }

    let ini = Ini::load_from_file(path).map_err(|e| {
        VaultError::Configuration(format!("Failed to load config file {}: {e}", path.display()))
    })?;

    parse_profiles(&ini)
}

/// Load profiles from `AWS_CONFIG_FILE` or `~/.aws/config`.
pub fn load() -> Result<ProfileGraph> {
    match constants::get_aws_config_path() {
        Some(path) => load_from(&path),
        None => Ok(ProfileGraph::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[default]
region = us-east-1

[profile dev]
region = eu-west-1
mfa_serial = arn:aws:iam::111111111111:mfa/alice
session_duration = 8h

[profile admin]
source_profile = dev
role_arn = arn:aws:iam::222222222222:role/Admin
external_id = ext-123
duration_seconds = 1800
"#;

    fn graph() -> ProfileGraph {
        parse_profiles(&Ini::load_from_str(CONFIG).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_profile_sections() {
        let graph = graph();
        let names: Vec<_> = graph.names().collect();
        assert_eq!(names, vec!["admin", "default", "dev"]);
    }

    #[test]
    fn test_profile_from_ini_section() {
        let graph = graph();

        let dev = graph.get("dev").unwrap();
        assert_eq!(dev.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            dev.mfa_serial.as_deref(),
            Some("arn:aws:iam::111111111111:mfa/alice")
        );
        assert_eq!(dev.session_duration, Some(Duration::from_secs(8 * 3600)));
        assert!(!dev.assumes_role());

        let admin = graph.get("admin").unwrap();
        assert_eq!(admin.source_profile.as_deref(), Some("dev"));
        assert_eq!(admin.external_id.as_deref(), Some("ext-123"));
        assert_eq!(admin.role_duration, Some(Duration::from_secs(1800)));
        assert!(admin.assumes_role());
    }

    #[test]
    fn test_profile_from_ini_section_with_defaults() {
        let profile = Profile::from_ini_section("bare", &Properties::new()).unwrap();
        assert_eq!(profile, Profile::new("bare"));
    }

    #[test]
    fn test_invalid_duration_is_configuration_error() {
        let ini = Ini::load_from_str("[profile x]\nduration_seconds = soon\n").unwrap();
        let err = parse_profiles(&ini).unwrap_err();
        assert!(matches!(err, VaultError::Configuration(msg) if msg.contains("'x'")));
    }

    #[test]
    fn test_missing_file_is_empty_graph() {
        let graph = load_from(Path::new("/nonexistent/vaulted/config")).unwrap();
        assert_eq!(graph.names().count(), 0);
    }
}
