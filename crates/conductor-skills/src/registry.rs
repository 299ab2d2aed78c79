use conductor_core::{ConductorError, ConductorResult, Skill};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Lookup contract the engine and CLI use to find skills.
pub trait SkillSource: Send + Sync {
    /// Find a skill by its stable id.
    fn get_skill(&self, id: &str) -> Option<Arc<Skill>>;

    /// Find a skill by its display name.
    fn get_skill_by_name(&self, name: &str) -> Option<Arc<Skill>>;

    /// Resolve a command-line reference: id first, then name.
    fn resolve(&self, reference: &str) -> ConductorResult<Arc<Skill>> {
        self.get_skill(reference)
            .or_else(|| self.get_skill_by_name(reference))
            .ok_or_else(|| ConductorError::Validation(format!("unknown skill: {reference}")))
    }
}

/// Central registry for all loaded skills, keyed by id.
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<Skill>>,
}

impl SkillRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            skills: BTreeMap::new(),
        }
    }

    /// Validate and register a skill. A skill with the same id replaces the old one.
    pub fn register(&mut self, skill: Skill) -> ConductorResult<()> {
        skill.validate()?;
        let id = skill.id.clone();
        if self.skills.contains_key(&id) {
            warn!(skill = %id, "Replacing previously registered skill");
        }
        info!(skill = %id, version = %skill.version, phases = skill.phases.len(), "Registered skill");
        self.skills.insert(id, Arc::new(skill));
        Ok(())
    }

    /// All skills, ordered by id.
    pub fn list(&self) -> Vec<&Arc<Skill>> {
        self.skills.values().collect()
    }

    /// Number of registered skills.
    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }
}

impl SkillSource for SkillRegistry {
    fn get_skill(&self, id: &str) -> Option<Arc<Skill>> {
        self.skills.get(id).cloned()
    }

    fn get_skill_by_name(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.values().find(|s| s.name == name).cloned()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Phase;

    fn skill(id: &str, name: &str) -> Skill {
        Skill::new(id, name).with_phase(Phase::new("only", "{{input}}"))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SkillRegistry::new();
        registry.register(skill("cr-1", "code-review")).unwrap();

        assert_eq!(registry.skill_count(), 1);
        assert!(registry.get_skill("cr-1").is_some());
        assert!(registry.get_skill_by_name("code-review").is_some());
        assert!(registry.get_skill("code-review").is_none());
    }

    #[test]
    fn test_resolve_prefers_id_then_name() {
        let mut registry = SkillRegistry::new();
        registry.register(skill("cr-1", "code-review")).unwrap();

        assert_eq!(registry.resolve("cr-1").unwrap().id, "cr-1");
        assert_eq!(registry.resolve("code-review").unwrap().id, "cr-1");
        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        assert!(err.to_string().contains("unknown skill"));
    }

    #[test]
    fn test_register_rejects_invalid_skill() {
        let mut registry = SkillRegistry::new();
        let bad = Skill::new("bad", "bad")
            .with_phase(Phase::new("a", "x").with_dependencies(["ghost"]));
        assert!(registry.register(bad).is_err());
        assert_eq!(registry.skill_count(), 0);
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = SkillRegistry::new();
        registry.register(skill("s", "first")).unwrap();
        registry.register(skill("s", "second")).unwrap();
        assert_eq!(registry.skill_count(), 1);
        assert_eq!(registry.get_skill("s").unwrap().name, "second");
    }
}
