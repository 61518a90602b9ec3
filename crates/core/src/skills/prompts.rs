//! Default system prompts bundled at compile time.

/// Elicitor - asks up to three clarifying questions
pub const ELICITOR: &str = include_str!("defaults/elicitor.md");

/// Architect - writes spec.md from the idea and answers
pub const ARCHITECT: &str = include_str!("defaults/architect.md");

/// Synthesizer - turns spec.md into an ordered prompt package
pub const SYNTHESIZER: &str = include_str!("defaults/synthesizer.md");

/// Critic - audits the prompt package against spec.md
pub const CRITIC: &str = include_str!("defaults/critic.md");

/// All default prompts with their role slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("elicitor", ELICITOR),
        ("architect", ARCHITECT),
        ("synthesizer", SYNTHESIZER),
        ("critic", CRITIC),
    ]
}
