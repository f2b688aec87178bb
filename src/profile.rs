use std::{collections::BTreeMap, time::Duration};

use crate::error::{Result, VaultError};

/// A named profile from the AWS config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub source_profile: Option<String>,
    pub role_arn: Option<String>,
    pub mfa_serial: Option<String>,
    pub region: Option<String>,
    pub external_id: Option<String>,
    pub role_session_name: Option<String>,
    /// Default GetSessionToken duration when this profile is a chain root
    pub session_duration: Option<Duration>,
    /// Default AssumeRole duration when this profile assumes a role
    pub role_duration: Option<Duration>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A profile with a role is a role-assumption step; otherwise it holds
    /// its own master credential.
    pub fn assumes_role(&self) -> bool {
        self.role_arn.is_some()
    }
}

/// All profiles known to this process, indexed by name.
///
/// Profiles that are not configured still resolve: they are treated as a
/// plain root with no role, so `vaulted add foo` works without a config
/// entry.
#[derive(Debug, Clone, Default)]
pub struct ProfileGraph {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Profile by name, or an implicit bare profile when unconfigured.
    pub fn lookup(&self, name: &str) -> Profile {
        self.get(name).cloned().unwrap_or_else(|| Profile::new(name))
    }

    /// Ordered chain from the root (no `source_profile`) to `name`.
    ///
    /// A profile with `role_arn` but no `source_profile` is its own root: its
    /// master credential is used to assume the role.
    pub fn chain(&self, name: &str) -> Result<Vec<Profile>> {
        let mut chain = Vec::new();
        let mut current = self.lookup(name);

        loop {
            if chain.iter().any(|p: &Profile| p.name == current.name) {
                return Err(VaultError::CyclicProfile(current.name));
            }

            let source = current.source_profile.clone();
            chain.push(current);

            match source {
                Some(source) if !source.is_empty() => {
                    if self.get(&source).is_none() {
                        return Err(VaultError::Configuration(format!(
                            "source_profile '{source}' referenced by '{}' is not configured",
                            chain.last().map(|p| p.name.as_str()).unwrap_or(name)
                        )));
                    }
                    current = self.lookup(&source);
                }
                _ => break,
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Region of the profile, falling back along its source chain.
    pub fn region(&self, name: &str) -> Option<String> {
        self.chain(name)
            .ok()?
            .iter()
            .rev()
            .find_map(|p| p.region.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, source: &str, arn: &str) -> Profile {
        Profile {
            source_profile: Some(source.to_string()),
            role_arn: Some(arn.to_string()),
            ..Profile::new(name)
        }
    }

    fn graph() -> ProfileGraph {
        let mut graph = ProfileGraph::new();
        graph.insert(Profile {
            region: Some("eu-west-1".to_string()),
            ..Profile::new("a")
        });
        graph.insert(role("b", "a", "arn:aws:iam::111111111111:role/R1"));
        graph.insert(role("c", "b", "arn:aws:iam::222222222222:role/R2"));
        graph
    }

    #[test]
    fn test_chain_root_to_leaf() {
        let chain = graph().chain("c").unwrap();
        let names: Vec<_> = chain.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_chain_of_root_is_itself() {
        let chain = graph().chain("a").unwrap();
        assert_eq!(chain.len(), 1);
        assert!(!chain[0].assumes_role());
    }

    #[test]
    fn test_unconfigured_profile_is_bare_root() {
        let chain = graph().chain("unknown").unwrap();
        assert_eq!(chain, vec![Profile::new("unknown")]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = ProfileGraph::new();
        graph.insert(role("x", "y", "arn:x"));
        graph.insert(role("y", "x", "arn:y"));

        let err = graph.chain("x").unwrap_err();
        assert!(matches!(err, VaultError::CyclicProfile(_)));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut graph = ProfileGraph::new();
        graph.insert(role("x", "x", "arn:x"));
        assert!(matches!(
            graph.chain("x").unwrap_err(),
            VaultError::CyclicProfile(name) if name == "x"
        ));
    }

    #[test]
    fn test_missing_source_is_configuration_error() {
        let mut graph = ProfileGraph::new();
        graph.insert(role("x", "ghost", "arn:x"));

        let err = graph.chain("x").unwrap_err();
        assert!(matches!(err, VaultError::Configuration(msg) if msg.contains("ghost")));
    }

    #[test]
    fn test_region_inherited_from_source() {
        assert_eq!(graph().region("c").as_deref(), Some("eu-west-1"));
        assert_eq!(graph().region("unknown"), None);
    }
}
