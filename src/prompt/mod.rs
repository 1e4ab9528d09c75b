//! Prompt Composer (C6): assembles the system prompt from the current date,
//! a behavioral preamble, the skills catalog, a memory excerpt, and the
//! execution-protocol block. Deterministic for identical inputs.

use chrono::{DateTime, Utc};

use crate::skills::RegistrySnapshot;

const PREAMBLE: &str = "You are a careful assistant. Answer directly from your own \
knowledge when you can. Invoke a skill only when the task requires information or an \
action you cannot produce yourself — look-ups, side effects, or anything time-sensitive.";

const EXECUTION_PROTOCOL: &str = "To invoke a skill, emit exactly one block per turn:\n\
<execute_skill>\n<skill_name>NAME</skill_name>\n<code>...</code>\n</execute_skill>\n\
Any other syntax is treated as prose and will not be executed.";

/// Build the system prompt for one request.
///
/// `now` is threaded in explicitly (rather than read via `Utc::now()` here)
/// so composition stays pure and testable.
pub fn compose(now: DateTime<Utc>, registry: &RegistrySnapshot, memory_excerpt: &str) -> String {
    let mut sections = vec![
        format!("Current date/time: {}", now.to_rfc3339()),
        PREAMBLE.to_string(),
    ];

    let catalog = registry.summarize_for_prompt();
    if !catalog.is_empty() {
        sections.push(format!("Available skills:\n{catalog}"));
    }

    if !memory_excerpt.is_empty() {
        sections.push(format!("Relevant context from earlier in this session:\n{memory_excerpt}"));
    }

    sections.push(EXECUTION_PROTOCOL.to_string());
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::registry::build;

    #[test]
    fn composition_is_deterministic_for_identical_inputs() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = build(tmp.path()).unwrap();
        let now = Utc::now();
        assert_eq!(
            compose(now, &registry, ""),
            compose(now, &registry, "")
        );
    }

    #[test]
    fn empty_registry_omits_skills_section() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = build(tmp.path()).unwrap();
        let prompt = compose(Utc::now(), &registry, "");
        assert!(!prompt.contains("Available skills"));
    }

    #[test]
    fn memory_excerpt_included_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = build(tmp.path()).unwrap();
        let prompt = compose(Utc::now(), &registry, "user prefers metric units");
        assert!(prompt.contains("user prefers metric units"));
    }

    #[test]
    fn always_includes_execution_protocol() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = build(tmp.path()).unwrap();
        let prompt = compose(Utc::now(), &registry, "");
        assert!(prompt.contains("<execute_skill>"));
    }
}
