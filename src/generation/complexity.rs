//! Instruction complexity classifier for model selection.
//!
//! A pure classifier over instruction length and presence of heavyweight
//! domain keywords. The product currently maps every class to the same
//! model; the classification is retained for telemetry and future
//! branching.

use tracing::debug;

/// Model used for all generation requests today.
pub const DEFAULT_MODEL: &str = "forge-coder-1";

/// Heavyweight keywords that mark an instruction as complex regardless
/// of length.
const COMPLEX_KEYWORDS: &[&str] = &[
    "microservices",
    "authentication system",
    "database schema",
    "payment",
    "real-time",
    "multi-tenant",
];

const SIMPLE_MAX_CHARS: usize = 80;
const COMPLEX_MIN_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Classify an instruction as simple, medium, or complex.
pub fn classify_instruction(instruction: &str) -> Complexity {
    let trimmed = instruction.trim();
    let lower = trimmed.to_lowercase();

    let has_complex_keyword = COMPLEX_KEYWORDS.iter().any(|kw| lower.contains(kw));
    let complexity = if has_complex_keyword || trimmed.len() >= COMPLEX_MIN_CHARS {
        Complexity::Complex
    } else if trimmed.len() < SIMPLE_MAX_CHARS {
        Complexity::Simple
    } else {
        Complexity::Medium
    };

    debug!(
        complexity = complexity.as_str(),
        length = trimmed.len(),
        "Classified instruction"
    );
    complexity
}

/// Resolve the model for a given complexity class.
pub fn model_for(complexity: Complexity) -> &'static str {
    // Single model today; the branch point is kept deliberately.
    match complexity {
        Complexity::Simple | Complexity::Medium | Complexity::Complex => DEFAULT_MODEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_instruction_is_simple() {
        assert_eq!(
            classify_instruction("make the header blue"),
            Complexity::Simple
        );
    }

    #[test]
    fn test_keyword_forces_complex() {
        assert_eq!(
            classify_instruction("add an authentication system"),
            Complexity::Complex
        );
        assert_eq!(
            classify_instruction("split this into microservices"),
            Complexity::Complex
        );
    }

    #[test]
    fn test_length_thresholds() {
        let medium = "a".repeat(120);
        assert_eq!(classify_instruction(&medium), Complexity::Medium);

        let long = "a".repeat(250);
        assert_eq!(classify_instruction(&long), Complexity::Complex);
    }

    #[test]
    fn test_all_classes_resolve_to_default_model() {
        assert_eq!(model_for(Complexity::Simple), DEFAULT_MODEL);
        assert_eq!(model_for(Complexity::Complex), DEFAULT_MODEL);
    }
}
