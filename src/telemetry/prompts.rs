//! PromptRegistry: versioned prompt lookup with a `Remote -> Local ->
//! BuiltIn` fallback chain (§4.7, §9 REDESIGN FLAGS). No concrete remote
//! source ships in this repository; the chain degrades to local files,
//! then hard-coded minimal prompts.

use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PromptVersion {
    pub name: String,
    pub version: String,
    pub template: String,
}

/// One link in the prompt-fetching chain. Implementations return `None`
/// when they don't have the prompt, letting the registry fall through to
/// the next source rather than erroring.
pub trait PromptSource: Send + Sync {
    fn fetch(&self, name: &str) -> Option<PromptVersion>;
    fn source_name(&self) -> &'static str;
}

/// Reads `<dir>/<name>.toml` files of the form `version = "..."` /
/// `template = "..."`.
pub struct LocalPromptSource {
    dir: PathBuf,
}

impl LocalPromptSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl PromptSource for LocalPromptSource {
    fn fetch(&self, name: &str) -> Option<PromptVersion> {
        let path = self.dir.join(format!("{name}.toml"));
        let contents = std::fs::read_to_string(path).ok()?;
        let parsed: toml::Value = toml::from_str(&contents).ok()?;
        let version = parsed.get("version")?.as_str()?.to_string();
        let template = parsed.get("template")?.as_str()?.to_string();
        Some(PromptVersion {
            name: name.to_string(),
            version,
            template,
        })
    }

    fn source_name(&self) -> &'static str {
        "local"
    }
}

/// Hard-coded minimal prompts, the last link in the chain. Always
/// succeeds for known prompt names so the agent can never be left without
/// phase guidance even with every other source unreachable.
pub struct BuiltInPromptSource {
    prompts: HashMap<&'static str, &'static str>,
}

impl Default for BuiltInPromptSource {
    fn default() -> Self {
        let mut prompts = HashMap::new();
        prompts.insert(
            "mindsweep_capture",
            "What's on your mind? List anything you need to capture, one item at a time.",
        );
        prompts.insert(
            "weekly_priorities",
            "Looking at what you captured, what are your top three priorities this week?",
        );
        prompts.insert(
            "daily_clarify",
            "Let's go through your inbox. For each item: what is it, and what's the next action?",
        );
        Self { prompts }
    }
}

impl PromptSource for BuiltInPromptSource {
    fn fetch(&self, name: &str) -> Option<PromptVersion> {
        self.prompts.get(name).map(|template| PromptVersion {
            name: name.to_string(),
            version: "builtin".to_string(),
            template: (*template).to_string(),
        })
    }

    fn source_name(&self) -> &'static str {
        "builtin"
    }
}

/// Composes an ordered chain of [`PromptSource`]s and returns the first hit.
pub struct PromptRegistry {
    chain: Vec<Box<dyn PromptSource>>,
}

impl PromptRegistry {
    pub fn new(chain: Vec<Box<dyn PromptSource>>) -> Self {
        Self { chain }
    }

    /// Built with just `Local -> BuiltIn`, matching the default deployment
    /// (no remote prompt service ships with this repository).
    pub fn local_and_builtin(local_dir: PathBuf) -> Self {
        Self::new(vec![
            Box::new(LocalPromptSource::new(local_dir)),
            Box::new(BuiltInPromptSource::default()),
        ])
    }

    pub fn resolve(&self, name: &str) -> Option<PromptVersion> {
        for source in &self.chain {
            if let Some(prompt) = source.fetch(name) {
                tracing::debug!(prompt_name = name, source = source.source_name(), "resolved prompt");
                return Some(prompt);
            }
        }
        tracing::warn!(prompt_name = name, "prompt not found in any source");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;
    impl PromptSource for EmptySource {
        fn fetch(&self, _name: &str) -> Option<PromptVersion> {
            None
        }
        fn source_name(&self) -> &'static str {
            "empty"
        }
    }

    #[test]
    fn falls_through_to_builtin_when_earlier_sources_miss() {
        let registry = PromptRegistry::new(vec![Box::new(EmptySource), Box::new(BuiltInPromptSource::default())]);
        let prompt = registry.resolve("mindsweep_capture").unwrap();
        assert_eq!(prompt.version, "builtin");
    }

    #[test]
    fn unknown_prompt_resolves_to_none() {
        let registry = PromptRegistry::new(vec![Box::new(BuiltInPromptSource::default())]);
        assert!(registry.resolve("no_such_prompt").is_none());
    }

    #[test]
    fn local_source_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weekly_priorities.toml"),
            "version = \"v2\"\ntemplate = \"custom template\"\n",
        )
        .unwrap();
        let source = LocalPromptSource::new(dir.path().to_path_buf());
        let prompt = source.fetch("weekly_priorities").unwrap();
        assert_eq!(prompt.version, "v2");
        assert_eq!(prompt.template, "custom template");
    }
}
