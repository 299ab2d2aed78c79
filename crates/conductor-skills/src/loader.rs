use crate::registry::SkillRegistry;
use conductor_core::{ConductorError, ConductorResult, Skill};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Loads YAML skill definitions from a directory.
///
/// File format:
/// ```yaml
/// id: code-review
/// name: code-review
/// version: 1.0.0
/// routing:
///   default_profile: balanced
///   failure_policy: skip_dependents
/// output_phase: report
/// phases:
///   - id: patterns
///     prompt: "List the recurring patterns in:\n{{input}}"
///   - id: security
///     depends_on: [patterns]
///     profile: premium
///     prompt: "Audit these patterns for security issues:\n{{patterns}}"
///   - id: report
///     depends_on: [security]
///     prompt: "Write a review report from:\n{{security}}"
/// ```
pub struct SkillLoader {
    skills_dir: PathBuf,
}

impl SkillLoader {
    /// A loader for `*.yaml` and `*.yml` files in `skills_dir`.
    pub fn new(skills_dir: PathBuf) -> Self {
        Self { skills_dir }
    }

    /// Parse a YAML skill definition and fill in defaulted names.
    pub fn parse(raw: &str, source: &Path) -> ConductorResult<Skill> {
        let mut skill: Skill = serde_yaml_ng::from_str(raw).map_err(|e| {
            ConductorError::Config(format!(
                "Failed to parse skill file {}: {}",
                source.display(),
                e
            ))
        })?;

        for phase in &mut skill.phases {
            if phase.name.is_empty() {
                phase.name = phase.id.clone();
            }
        }

        skill.validate()?;
        Ok(skill)
    }

    /// Read and parse a single skill file.
    pub async fn from_file(path: &Path) -> ConductorResult<Skill> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConductorError::Config(format!("Failed to read skill file {}: {}", path.display(), e))
        })?;
        Self::parse(&raw, path)
    }

    /// Load every `.yaml` / `.yml` file in the skills directory into the registry.
    ///
    /// Files that fail to parse or validate are logged and skipped. A missing
    /// directory yields zero skills rather than an error.
    pub async fn load_all(&self, registry: &mut SkillRegistry) -> ConductorResult<usize> {
        if !self.skills_dir.exists() {
            info!(dir = %self.skills_dir.display(), "Skills directory not found, skipping");
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(&self.skills_dir).await.map_err(|e| {
            ConductorError::Config(format!(
                "Failed to read skills dir {}: {}",
                self.skills_dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml")
            ) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let result = match Self::from_file(&path).await {
                Ok(skill) => registry.register(skill),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load skill, skipping");
                }
            }
        }

        info!(total = loaded, dir = %self.skills_dir.display(), "Skills loaded");
        Ok(loaded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::SkillSource;
    use conductor_core::{FailurePolicy, RoutingProfile};

    const SAMPLE: &str = r#"
id: code-review
name: code-review
routing:
  default_profile: cheap
  failure_policy: abort_workflow
output_phase: report
phases:
  - id: patterns
    prompt: "Patterns in {{input}}"
  - id: security
    name: Security audit
    depends_on: [patterns]
    profile: premium
    prompt: "Audit {{patterns}}"
  - id: report
    depends_on: [security]
    prompt: "Report on {{security}}"
"#;

    #[test]
    fn test_parse_sample() {
        let skill = SkillLoader::parse(SAMPLE, Path::new("code-review.yaml")).unwrap();
        assert_eq!(skill.id, "code-review");
        assert_eq!(skill.routing.default_profile, RoutingProfile::Cheap);
        assert_eq!(skill.routing.failure_policy, FailurePolicy::AbortWorkflow);
        assert_eq!(skill.output_phase.as_deref(), Some("report"));
        assert_eq!(skill.get_phase("patterns").unwrap().name, "patterns");
        assert_eq!(skill.get_phase("security").unwrap().name, "Security audit");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = SkillLoader::parse("id: [unclosed", Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }

    #[test]
    fn test_parse_rejects_dangling_dependency() {
        let raw = "id: s\nname: s\nphases:\n  - id: a\n    depends_on: [zzz]\n    prompt: x\n";
        assert!(SkillLoader::parse(raw, Path::new("s.yaml")).is_err());
    }

    #[tokio::test]
    async fn test_loader_nonexistent_dir() {
        let loader = SkillLoader::new(PathBuf::from("/nonexistent/dir"));
        let mut registry = SkillRegistry::new();
        assert_eq!(loader.load_all(&mut registry).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loader_with_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("code-review.yaml"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("broken.yml"), "phases: nope").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let loader = SkillLoader::new(dir.path().to_path_buf());
        let mut registry = SkillRegistry::new();
        let loaded = loader.load_all(&mut registry).await.unwrap();

        assert_eq!(loaded, 1);
        assert!(registry.get_skill_by_name("code-review").is_some());
    }
}
