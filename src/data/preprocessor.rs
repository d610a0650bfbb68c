// ============================================================
// Layer 4 - Text Preprocessor
// ============================================================
// Two kinds of text normalisation:
//
//   clean()            - applied to answer texts and tokens on load.
//                        Dataset dumps carry Windows line endings,
//                        non-breaking spaces and stray control
//                        characters that would otherwise leak into
//                        answer files and F1 comparisons.
//
//   normalize_answer() - the comparison form used by F1 / exact
//                        match: lower-case, no punctuation, no
//                        articles, single spaces.
//                        "The  Eiffel Tower!" -> "eiffel tower"

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Map odd whitespace and control characters to spaces, collapse
    /// runs of spaces and trim. Newlines are flattened too since every
    /// value cleaned here ends up on a single output line.
    pub fn clean(&self, text: &str) -> String {
        let mapped: String = text
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            })
            .collect();

        mapped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// SQuAD-style answer normalisation used before scoring
    pub fn normalize_answer(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let no_punct: String = lowered
            .chars()
            .filter(|c| !c.is_ascii_punctuation())
            .collect();

        no_punct
            .split_whitespace()
            .filter(|w| !matches!(*w, "a" | "an" | "the"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
