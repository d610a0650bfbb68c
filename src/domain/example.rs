// ============================================================
// Layer 3 - QaExample Domain Type
// ============================================================
// One extractive Q&A example:
//   - a tokenised context paragraph
//   - a tokenised question
//   - zero or more gold answers, each a token SPAN in the context
//
// Spans are half-open: the answer covers context[start..end].
//
// Example:
//   context:  ["the", "ceremony", "is", "on", "15", "april"]
//   question: ["when", "is", "the", "ceremony", "?"]
//   answer:   { text: "15 april", start: 4, end: 6 }
//
// Forward-mode data has no gold answers; everything that needs
// them treats an empty answer list as "unknown".

use serde::{Deserialize, Serialize};

/// A gold answer with its token span in the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSpan {
    pub text:  String,
    pub start: usize,
    pub end:   usize,
}

impl AnswerSpan {
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self { text: text.into(), start, end }
    }

    /// Number of tokens covered by the span
    pub fn span_length(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// True when the span is non-empty and fits inside the context
    pub fn fits(&self, context_len: usize) -> bool {
        self.start < self.end && self.end <= context_len
    }
}

/// A question over a paragraph, with its gold answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaExample {
    pub id:       String,
    pub context:  Vec<String>,
    pub question: Vec<String>,
    #[serde(default)]
    pub answers:  Vec<AnswerSpan>,
}

impl QaExample {
    /// The first gold answer, which is the one training targets
    pub fn gold(&self) -> Option<&AnswerSpan> {
        self.answers.first()
    }

    /// Context tokens joined back into a paragraph string
    pub fn paragraph(&self) -> String {
        self.context.join(" ")
    }

    pub fn question_text(&self) -> String {
        self.question.join(" ")
    }

    /// The text covered by context[start..end], clamped to the context
    pub fn span_text(&self, start: usize, end: usize) -> String {
        let end   = end.min(self.context.len());
        let start = start.min(end);
        self.context[start..end].join(" ")
    }
}
