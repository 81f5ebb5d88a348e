//! Complexity Classifier - keyword scoring that picks a model tier

use manice_llm::ModelTier;
use serde::{Deserialize, Serialize};

/// Phrases that indicate analysis or reasoning work
pub const LARGE_MODEL_KEYWORDS: &[&str] = &[
    "analyze",
    "forecast",
    "complex",
    "reasoning",
    "explain",
    "why",
    "prediction",
    "trend",
    "correlation",
    "statistical",
    "machine learning",
    "business intelligence",
    "dashboard",
    "report",
    "insights",
    "optimization",
];

/// Phrases that indicate quick, mechanical spreadsheet edits
pub const SMALL_MODEL_KEYWORDS: &[&str] = &[
    "formula",
    "calculate",
    "sum",
    "format",
    "color",
    "highlight",
    "insert",
    "delete",
    "copy",
    "paste",
    "sort",
    "filter",
    "quick",
    "simple",
    "basic",
    "cell",
    "row",
    "column",
];

/// Words that suggest the user wants an explanation
const REASONING_CUES: &[&str] = &["because", "explain", "why", "how", "analyze"];

/// Context sizes above this push toward the large model
const LARGE_CONTEXT_THRESHOLD: usize = 5000;

/// Instructions longer than this count as detailed requests
const LONG_INSTRUCTION_CHARS: usize = 200;

/// Both scores, for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub large: u32,
    pub small: u32,
}

impl ComplexityScore {
    /// Ties (including 0-0) go to the small model
    pub fn tier(&self) -> ModelTier {
        if self.large > self.small {
            ModelTier::Large
        } else {
            ModelTier::Small
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Pick a tier for an instruction and the size of its spreadsheet context
    pub fn classify(&self, text: &str, context_size: usize) -> ModelTier {
        self.score(text, context_size).tier()
    }

    pub fn score(&self, text: &str, context_size: usize) -> ComplexityScore {
        let text_lower = text.to_lowercase();

        let mut large = count_hits(&text_lower, LARGE_MODEL_KEYWORDS);
        let small = count_hits(&text_lower, SMALL_MODEL_KEYWORDS);

        if context_size > LARGE_CONTEXT_THRESHOLD {
            large += 2;
        }
        if text.chars().count() > LONG_INSTRUCTION_CHARS {
            large += 1;
        }
        if REASONING_CUES.iter().any(|cue| text_lower.contains(cue)) {
            large += 1;
        }

        ComplexityScore { large, small }
    }
}

fn count_hits(text: &str, keywords: &[&str]) -> u32 {
    keywords.iter().filter(|k| text.contains(*k)).count() as u32
}
