use crate::{ConductorError, ConductorResult, RoutingProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What happens to the rest of a workflow when one phase fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Only the failed phase's transitive dependents are skipped.
    #[default]
    SkipDependents,
    /// The first failure stops every batch that has not started yet.
    AbortWorkflow,
}

/// Skill-level routing and failure settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillRouting {
    /// Profile used when neither the phase nor the caller picks one.
    #[serde(default)]
    pub default_profile: RoutingProfile,
    /// Failure propagation policy.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// One step of a skill.
///
/// Dependencies are referenced by phase id, never by position, so the phase list
/// stays trivially serializable. The batch a phase runs in is derived from the
/// dependency graph at planning time and is not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Stable identifier, unique within the skill.
    pub id: String,
    /// Human-readable name. Defaults to the id when empty.
    #[serde(default)]
    pub name: String,
    /// Ids of phases that must complete before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Prompt template. `{{input}}` is the request, `{{<phase_id>}}` a dependency's output.
    pub prompt: String,
    /// Optional system prompt sent ahead of the rendered template.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Per-phase routing profile override.
    #[serde(default)]
    pub profile: Option<RoutingProfile>,
    /// Maximum output tokens requested from the provider.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// When true, a failure of this phase aborts the whole workflow.
    #[serde(default)]
    pub required: bool,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

impl Phase {
    /// Create a phase with default limits and no dependencies.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            depends_on: Vec::new(),
            prompt: prompt.into(),
            system_prompt: None,
            profile: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            required: false,
        }
    }

    /// Builder: set the dependency ids.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: set a routing profile override.
    pub fn with_profile(mut self, profile: RoutingProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Builder: set the max output tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder: mark the phase as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The name to show users, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A named, versioned workflow definition composed of phases.
///
/// Immutable once loaded; the engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Stable identity, used in checkpoint fingerprints.
    pub id: String,
    /// Human-readable name, used for lookup from the command line.
    pub name: String,
    /// Version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// What the skill does.
    #[serde(default)]
    pub description: String,
    /// Routing and failure settings.
    #[serde(default)]
    pub routing: SkillRouting,
    /// Phases in declaration order.
    pub phases: Vec<Phase>,
    /// Phase whose output is the workflow's final output.
    #[serde(default)]
    pub output_phase: Option<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl Skill {
    /// Create a skill with default routing and no phases.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            description: String::new(),
            routing: SkillRouting::default(),
            phases: Vec::new(),
            output_phase: None,
        }
    }

    /// Builder: append a phase.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Builder: set the routing settings.
    pub fn with_routing(mut self, routing: SkillRouting) -> Self {
        self.routing = routing;
        self
    }

    /// Phases in declaration order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Look up a phase by id.
    pub fn get_phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Routing and failure settings.
    pub fn routing(&self) -> &SkillRouting {
        &self.routing
    }

    /// Check structural validity: at least one phase, unique ids, no dangling
    /// or self-referencing dependencies, and a known output phase.
    ///
    /// Cycles spanning several phases are detected when the graph is layered.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.phases.is_empty() {
            return Err(ConductorError::Validation(format!(
                "skill '{}' has no phases",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.id.as_str()) {
                return Err(ConductorError::Validation(format!(
                    "skill '{}' declares phase '{}' more than once",
                    self.name, phase.id
                )));
            }
        }

        for phase in &self.phases {
            for dep in &phase.depends_on {
                if dep == &phase.id {
                    return Err(ConductorError::Validation(format!(
                        "cyclic dependency: phase '{}' depends on itself",
                        phase.id
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(ConductorError::Validation(format!(
                        "phase '{}' depends on unknown phase '{}'",
                        phase.id, dep
                    )));
                }
            }
        }

        if let Some(output) = &self.output_phase {
            if !seen.contains(output.as_str()) {
                return Err(ConductorError::Validation(format!(
                    "output phase '{output}' is not a phase of skill '{}'",
                    self.name
                )));
            }
        }

        Ok(())
    }
}
