use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::config::LanguageConfig;

/// Everything needed to configure an isolation instance for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProfile {
    pub language_key: String,
    pub image: String,
    pub entry_command: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl From<LanguageConfig> for ExecutionProfile {
    fn from(language: LanguageConfig) -> Self {
        Self {
            language_key: language.name,
            image: language.image,
            entry_command: language.command,
            env: language.env,
        }
    }
}

/// Read-only table of supported runtimes, keyed by language selector
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    profiles: HashMap<String, Arc<ExecutionProfile>>,
}

impl RuntimeRegistry {
    /// The runtimes available without any configuration
    pub fn builtin() -> Self {
        let python_env = BTreeMap::from([
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ]);

        let profiles = [
            ("python", "python:3.11-slim", vec!["python", "-"], python_env),
            ("javascript", "node:20-alpine", vec!["node", "-"], BTreeMap::new()),
            ("bash", "alpine:3.18", vec!["sh"], BTreeMap::new()),
        ]
        .into_iter()
        .map(|(key, image, command, env)| ExecutionProfile {
            language_key: key.to_string(),
            image: image.to_string(),
            entry_command: command.into_iter().map(String::from).collect(),
            env,
        });

        Self::from_profiles(profiles).expect("built-in runtime table is well-formed")
    }

    /// Builds the registry from configured languages, falling back to the
    /// built-in table when none are configured
    pub fn from_config(languages: Vec<LanguageConfig>) -> Result<Self> {
        if languages.is_empty() {
            return Ok(Self::builtin());
        }
        Self::from_profiles(languages.into_iter().map(ExecutionProfile::from))
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = ExecutionProfile>) -> Result<Self> {
        let mut table = HashMap::new();
        for profile in profiles {
            if profile.entry_command.is_empty() {
                bail!("Language {} has an empty entry command", profile.language_key);
            }
            let key = profile.language_key.clone();
            if table.insert(key.clone(), Arc::new(profile)).is_some() {
                bail!("Language {key} is configured more than once");
            }
        }
        Ok(Self { profiles: table })
    }

    /// Looks up a profile; unknown keys resolve to `None`
    pub fn resolve(&self, language_key: &str) -> Option<Arc<ExecutionProfile>> {
        self.profiles.get(language_key).cloned()
    }

    pub fn language_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let registry = RuntimeRegistry::builtin();
        assert_eq!(registry.language_keys(), vec!["bash", "javascript", "python"]);

        let python = registry.resolve("python").unwrap();
        assert_eq!(python.image, "python:3.11-slim");
        assert_eq!(python.entry_command, vec!["python", "-"]);
        assert_eq!(python.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));

        let bash = registry.resolve("bash").unwrap();
        assert_eq!(bash.entry_command, vec!["sh"]);
        assert!(bash.env.is_empty());
    }

    #[test]
    fn test_unknown_key_fails_closed() {
        let registry = RuntimeRegistry::builtin();
        assert!(registry.resolve("ruby").is_none());
        assert!(registry.resolve("Python").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn test_config_replaces_builtin_table() {
        let registry = RuntimeRegistry::from_config(vec![LanguageConfig {
            name: "ruby".to_string(),
            image: "ruby:3.3-alpine".to_string(),
            command: vec!["ruby".to_string(), "-".to_string()],
            env: BTreeMap::new(),
        }])
        .unwrap();
        assert!(registry.resolve("ruby").is_some());
        assert!(registry.resolve("python").is_none());
    }

    #[test]
    fn test_duplicate_and_empty_entries_rejected() {
        let ruby = LanguageConfig {
            name: "ruby".to_string(),
            image: "ruby:3.3-alpine".to_string(),
            command: vec!["ruby".to_string()],
            env: BTreeMap::new(),
        };
        assert!(RuntimeRegistry::from_config(vec![ruby.clone(), ruby.clone()]).is_err());

        let empty = LanguageConfig { command: vec![], ..ruby };
        assert!(RuntimeRegistry::from_config(vec![empty]).is_err());
    }
}
