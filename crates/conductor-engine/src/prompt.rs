//! Phase prompt rendering.
//!
//! Templates may reference the request as `{{input}}` and a dependency's output
//! as `{{<phase_id>}}` or `{{phases.<phase_id>}}`. Whitespace inside the braces
//! is ignored and unknown placeholders are left as written.

use conductor_core::Phase;
use std::collections::HashSet;
use tracing::debug;

/// A completed dependency handed to its dependent's template.
#[derive(Debug, Clone, Copy)]
pub struct DependencyOutput<'a> {
    /// Id of the dependency.
    pub phase_id: &'a str,
    /// Display name of the dependency.
    pub name: &'a str,
    /// Text the dependency produced.
    pub output: &'a str,
}

impl<'a> DependencyOutput<'a> {
    /// Pair a phase with its output.
    pub fn new(phase: &'a Phase, output: &'a str) -> Self {
        Self {
            phase_id: &phase.id,
            name: phase.display_name(),
            output,
        }
    }
}

/// Render a phase template.
///
/// Dependency outputs not referenced by any placeholder are appended as a
/// `## <dep name>` section, in the order given. Empty outputs are never
/// appended. Memory, when present, is prepended.
pub fn render_prompt(
    template: &str,
    input: &str,
    deps: &[DependencyOutput<'_>],
    memory: Option<&str>,
) -> String {
    let mut used: HashSet<&str> = HashSet::new();
    let mut rendered = substitute(template, |key| {
        if key == "input" {
            return Some(input);
        }
        let id = key.strip_prefix("phases.").unwrap_or(key);
        let dep = deps.iter().find(|d| d.phase_id == id)?;
        used.insert(dep.phase_id);
        Some(dep.output)
    });

    for dep in deps {
        if used.contains(dep.phase_id) || dep.output.trim().is_empty() {
            continue;
        }
        rendered.push_str(&format!("\n\n## {}\n{}", dep.name, dep.output));
    }

    let prompt = match memory.map(str::trim).filter(|m| !m.is_empty()) {
        Some(memory) => format!("{memory}\n\n{rendered}"),
        None => rendered,
    };
    debug!(
        template_chars = template.len(),
        prompt_chars = prompt.len(),
        deps = deps.len(),
        "Rendered phase prompt"
    );
    prompt
}

/// Render a phase for estimation: the request is substituted and every
/// dependency placeholder is empty.
pub fn render_preview(phase: &Phase, input: &str, memory: Option<&str>) -> String {
    let deps: Vec<DependencyOutput<'_>> = phase
        .depends_on
        .iter()
        .map(|id| DependencyOutput {
            phase_id: id,
            name: id,
            output: "",
        })
        .collect();
    render_prompt(&phase.prompt, input, &deps, memory)
}

fn substitute<'v>(template: &str, mut lookup: impl FnMut(&str) -> Option<&'v str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close;
        out.push_str(&rest[..open]);
        let key = rest[open + 2..close].trim();
        match lookup(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..close + 2]),
        }
        rest = &rest[close + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_and_dependency_placeholders() {
        let patterns = Phase::new("patterns", "x");
        let deps = [DependencyOutput::new(&patterns, "uses builder pattern")];
        let out = render_prompt(
            "Audit {{input}} given {{ patterns }} and {{phases.patterns}}",
            "src/lib.rs",
            &deps,
            None,
        );
        assert_eq!(
            out,
            "Audit src/lib.rs given uses builder pattern and uses builder pattern"
        );
    }

    #[test]
    fn test_unreferenced_dependency_appended_as_section() {
        let security = Phase::new("security", "x").with_name("Security audit");
        let deps = [DependencyOutput::new(&security, "no issues")];
        let out = render_prompt("Write the report for {{input}}", "req", &deps, None);
        assert_eq!(out, "Write the report for req\n\n## Security audit\nno issues");
    }

    #[test]
    fn test_unknown_placeholder_left_intact() {
        let out = render_prompt("Keep {{mystery}} and {{input}}", "x", &[], None);
        assert_eq!(out, "Keep {{mystery}} and x");
        let out = render_prompt("Unclosed {{input", "x", &[], None);
        assert_eq!(out, "Unclosed {{input");
    }

    #[test]
    fn test_memory_prepended() {
        let out = render_prompt("Do {{input}}", "it", &[], Some("Project uses tokio.\n"));
        assert_eq!(out, "Project uses tokio.\n\nDo it");
        let out = render_prompt("Do {{input}}", "it", &[], Some("   "));
        assert_eq!(out, "Do it");
    }

    #[test]
    fn test_preview_leaves_dependencies_empty() {
        let phase = Phase::new("report", "Summarize {{security}} for {{input}}")
            .with_dependencies(["security", "patterns"]);
        let out = render_preview(&phase, "src/main.rs", None);
        assert_eq!(out, "Summarize  for src/main.rs");
    }
}
