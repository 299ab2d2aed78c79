use conductor_core::{ConductorError, ConductorResult, Phase, Skill};
use std::collections::HashMap;

/// A skill's phases layered into dependency batches.
///
/// `batch(P) = 1 + max(batch(dep))` over P's dependencies, `0` without any.
/// Within a batch, phases keep their declaration order.
#[derive(Debug, Clone)]
pub struct PhaseGraph {
    batches: Vec<Vec<Phase>>,
    batch_of: HashMap<String, usize>,
}

impl PhaseGraph {
    /// Validate the skill and layer its phases.
    ///
    /// Fails with a validation error on duplicate ids, dangling dependencies
    /// and cycles.
    pub fn build(skill: &Skill) -> ConductorResult<Self> {
        skill.validate()?;

        let phases: HashMap<&str, &Phase> =
            skill.phases().iter().map(|p| (p.id.as_str(), p)).collect();

        if let Some(cycle) = find_cycle(skill, &phases) {
            return Err(ConductorError::Validation(format!(
                "cyclic dependency in skill '{}': {}",
                skill.name,
                cycle.join(" -> ")
            )));
        }

        // Kahn layering: a phase is ready once all of its dependencies are placed.
        let mut batch_of: HashMap<String, usize> = HashMap::new();
        let mut remaining: Vec<&Phase> = skill.phases().iter().collect();
        let mut batches: Vec<Vec<Phase>> = Vec::new();

        while !remaining.is_empty() {
            let index = batches.len();
            let (ready, blocked): (Vec<&Phase>, Vec<&Phase>) = remaining
                .into_iter()
                .partition(|p| p.depends_on.iter().all(|d| batch_of.contains_key(d)));

            if ready.is_empty() {
                // find_cycle already ruled this out
                return Err(ConductorError::Validation(format!(
                    "cyclic dependency in skill '{}'",
                    skill.name
                )));
            }

            for phase in &ready {
                batch_of.insert(phase.id.clone(), index);
            }
            batches.push(ready.into_iter().cloned().collect());
            remaining = blocked;
        }

        Ok(Self { batches, batch_of })
    }

    /// Phases grouped into batches.
    pub fn batches(&self) -> &[Vec<Phase>] {
        &self.batches
    }

    /// Number of batches.
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Batch index of a phase.
    pub fn batch_of(&self, phase_id: &str) -> Option<usize> {
        self.batch_of.get(phase_id).copied()
    }

    /// All phases in plan order: batch index, then declaration order.
    pub fn ordered(&self) -> impl Iterator<Item = &Phase> {
        self.batches.iter().flatten()
    }

    /// Number of phases.
    pub fn len(&self) -> usize {
        self.batch_of.len()
    }

    /// The skill has no phases.
    pub fn is_empty(&self) -> bool {
        self.batch_of.is_empty()
    }
}

/// Depth-first search for a back edge. Returns the cycle as a path of ids.
fn find_cycle<'a>(skill: &'a Skill, phases: &HashMap<&'a str, &'a Phase>) -> Option<Vec<String>> {
    let mut state: HashMap<&'a str, u8> = HashMap::new();
    let mut path: Vec<&'a str> = Vec::new();
    for phase in skill.phases() {
        if let Some(cycle) = dfs_cycle(&phase.id, phases, &mut state, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs_cycle<'a>(
    id: &'a str,
    phases: &HashMap<&'a str, &'a Phase>,
    state: &mut HashMap<&'a str, u8>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match state.get(id) {
        Some(1) => {
            // back edge: the cycle is the path suffix starting at `id`
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        Some(2) => return None,
        _ => {}
    }
    state.insert(id, 1);
    path.push(id);
    if let Some(&phase) = phases.get(id) {
        for dep in &phase.depends_on {
            if let Some(cycle) = dfs_cycle(dep.as_str(), phases, state, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    state.insert(id, 2);
    None
}
