//! Skill registry and loader.
//!
//! Skills are workflow definitions: an ordered list of phases with dependency
//! edges and prompt templates. They are loaded once per process from YAML files
//! and looked up by id or by name.

/// YAML skill-file loading.
pub mod loader;
/// In-memory skill registry and the [`SkillSource`] lookup contract.
pub mod registry;

pub use loader::SkillLoader;
pub use registry::{SkillRegistry, SkillSource};
