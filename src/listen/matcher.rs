//! Wake phrase matching
//!
//! Two passes over the ranked transcript hypotheses: an exact
//! word-aligned prefix match, then (when enabled) a fuzzy pass that
//! slides word-boundary windows over the transcript and accepts the
//! first window within the Levenshtein threshold. Windows are
//! word-aligned on purpose: a character-level scan would find
//! "hey robot" verbatim inside "they robotic".

use std::sync::OnceLock;

use regex::Regex;

use crate::config::MAX_FUZZY_THRESHOLD;
use crate::providers::Transcript;

/// Alternatives below this confidence are not worth a fuzzy scan
const MIN_ALTERNATIVE_CONFIDENCE: f32 = 0.5;

/// How many alternatives to scan beyond the primary transcript
const MAX_ALTERNATIVES_CHECKED: usize = 4;

/// A successful wake phrase match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseMatch {
    /// Text following the matched phrase, original casing, trimmed
    pub remainder: String,

    /// Word index where the matched window starts (0 for exact prefix)
    pub start_word: usize,

    /// Levenshtein distance of the accepted window (0 for exact prefix)
    pub distance: usize,

    /// Which hypothesis matched (0 = primary transcript)
    pub alt_index: usize,
}

/// Matches configured trigger phrases against transcripts
#[derive(Debug, Clone, Copy)]
pub struct WakeWordMatcher {
    fuzzy: bool,
    threshold: usize,
}

impl WakeWordMatcher {
    /// Create a matcher; the threshold is clamped to 0-5
    #[must_use]
    pub fn new(fuzzy: bool, threshold: u8) -> Self {
        let clamped = threshold.min(MAX_FUZZY_THRESHOLD);
        if clamped != threshold {
            tracing::warn!(threshold, clamped, "fuzzy threshold clamped");
        }
        Self {
            fuzzy,
            threshold: clamped as usize,
        }
    }

    /// Match `phrase` against the transcript and its alternatives
    ///
    /// The primary transcript is always preferred over alternates, and
    /// the exact pass over the fuzzy pass. Within one hypothesis the
    /// earliest-starting window wins.
    #[must_use]
    pub fn match_phrase(&self, transcript: &Transcript, phrase: &str) -> Option<PhraseMatch> {
        let phrase_words: Vec<String> = split_words(phrase).into_iter().map(|(_, n)| n).collect();
        if phrase_words.is_empty() {
            return None;
        }

        let candidates = ranked_hypotheses(transcript);

        for &(alt_index, text) in &candidates {
            if let Some(m) = exact_prefix_match(text, &phrase_words, alt_index) {
                tracing::debug!(phrase, alt_index, "exact trigger match");
                return Some(m);
            }
        }

        if !self.fuzzy {
            return None;
        }

        for &(alt_index, text) in &candidates {
            if let Some(m) = self.fuzzy_window_match(text, &phrase_words, alt_index) {
                tracing::debug!(
                    phrase,
                    alt_index,
                    distance = m.distance,
                    start_word = m.start_word,
                    "fuzzy trigger match"
                );
                return Some(m);
            }
        }

        None
    }

    /// Slide windows of the trigger's word count over the transcript
    fn fuzzy_window_match(
        &self,
        text: &str,
        phrase_words: &[String],
        alt_index: usize,
    ) -> Option<PhraseMatch> {
        let words = split_words(text);
        let size = phrase_words.len();
        if words.len() < size {
            return None;
        }

        let normalized_phrase = phrase_words.join(" ");

        for start in 0..=(words.len() - size) {
            let window = &words[start..start + size];

            // Word-boundary guard: a trigger word buried inside a longer
            // transcript word ("hey" in "they", "robot" in "robotic") is
            // a sub-word fragment, not a match.
            let fragment = window
                .iter()
                .zip(phrase_words)
                .any(|((_, w), p)| w != p && w.contains(p.as_str()));
            if fragment {
                continue;
            }

            let window_text = window
                .iter()
                .map(|(_, n)| n.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let distance = strsim::levenshtein(&normalized_phrase, &window_text);

            if distance <= self.threshold {
                let remainder = words[start + size..]
                    .iter()
                    .map(|(raw, _)| *raw)
                    .collect::<Vec<_>>()
                    .join(" ");
                return Some(PhraseMatch {
                    remainder: remainder.trim().to_string(),
                    start_word: start,
                    distance,
                    alt_index,
                });
            }
        }

        None
    }
}

/// Primary transcript followed by usable alternatives, ranked
fn ranked_hypotheses(transcript: &Transcript) -> Vec<(usize, &str)> {
    let mut candidates = vec![(0, transcript.text.as_str())];
    candidates.extend(
        transcript
            .alternatives
            .iter()
            .enumerate()
            .filter(|(_, a)| a.confidence >= MIN_ALTERNATIVE_CONFIDENCE)
            .take(MAX_ALTERNATIVES_CHECKED)
            .map(|(i, a)| (i + 1, a.text.as_str())),
    );
    candidates
}

/// Case-insensitive, word-aligned prefix match
fn exact_prefix_match(text: &str, phrase_words: &[String], alt_index: usize) -> Option<PhraseMatch> {
    let words = split_words(text);
    if words.len() < phrase_words.len() {
        return None;
    }

    let aligned = words
        .iter()
        .zip(phrase_words)
        .all(|((_, norm), phrase_word)| norm == phrase_word);
    if !aligned {
        return None;
    }

    let remainder = words[phrase_words.len()..]
        .iter()
        .map(|(raw, _)| *raw)
        .collect::<Vec<_>>()
        .join(" ");

    Some(PhraseMatch {
        remainder: remainder.trim().to_string(),
        start_word: 0,
        distance: 0,
        alt_index,
    })
}

/// Split into (raw, normalized) word pairs, dropping punctuation-only tokens
fn split_words(text: &str) -> Vec<(&str, String)> {
    text.split_whitespace()
        .filter_map(|raw| {
            let norm = normalize_word(raw);
            (!norm.is_empty()).then_some((raw, norm))
        })
        .collect()
}

/// Lowercase and strip everything but word characters and apostrophes
fn normalize_word(word: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^\w']+").expect("static word regex"));
    re.replace_all(&word.to_lowercase(), "").into_owned()
}
