//! Named-entity extraction seam.
//!
//! The real extractor is a collaborator; [`PatternExtractor`] is the
//! in-process stand-in, a proper-noun heuristic good enough to pull
//! place-like spans out of a user turn. Downstream code only consumes
//! location/organization-tagged spans.

use regex::Regex;

/// Kind of entity a span was tagged as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTag {
    Location,
    Organization,
    Other,
}

/// A tagged entity span extracted from free text.
#[derive(Debug, Clone)]
pub struct EntitySpan {
    pub text: String,
    pub tag: EntityTag,
}

/// Extracts tagged entity spans from text.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<EntitySpan>;
}

/// Regex-based extractor for place-like proper nouns.
///
/// Two patterns: multi-word capitalized phrases ("Central Market"), and a
/// single capitalized word after a locative cue ("in Hanoi"). Sentence
/// starters and day/month names are filtered out.
pub struct PatternExtractor {
    phrase_regex: Regex,
    cue_regex: Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        Self {
            phrase_regex: Regex::new(r"\b([A-Z][a-zA-Z']+(?:\s+[A-Z][a-zA-Z']+)+)\b").unwrap(),
            cue_regex: Regex::new(
                r"(?:\bin|\bat|\bnear|\bto|\babout|\baround|\bvisit)\s+([A-Z][a-zA-Z']+)\b",
            )
            .unwrap(),
        }
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor for PatternExtractor {
    fn extract(&self, text: &str) -> Vec<EntitySpan> {
        let mut spans: Vec<EntitySpan> = Vec::new();

        for caps in self.phrase_regex.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                // Drop leading question/sentence-starter words so
                // "Is Riverside Park" yields "Riverside Park".
                let mut words: Vec<&str> = m.as_str().split_whitespace().collect();
                let original_len = words.len();
                while words.first().is_some_and(|w| is_common_word(w)) {
                    words.remove(0);
                }
                // A lone word left over from a stripped phrase ("What
                // Time" -> "Time") is a sentence fragment, not a place.
                if words.is_empty() || (words.len() < original_len && words.len() < 2) {
                    continue;
                }
                spans.push(EntitySpan {
                    text: words.join(" "),
                    tag: EntityTag::Location,
                });
            }
        }

        for caps in self.cue_regex.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let word = m.as_str();
                if is_common_word(word) {
                    continue;
                }
                // Skip words already covered by a phrase span.
                if spans.iter().any(|s| s.text.contains(word)) {
                    continue;
                }
                spans.push(EntitySpan {
                    text: word.to_string(),
                    tag: EntityTag::Location,
                });
            }
        }

        spans
    }
}

/// Words that start sentences or name times, never places.
fn is_common_word(s: &str) -> bool {
    matches!(
        s,
        "The"
            | "This"
            | "That"
            | "These"
            | "Those"
            | "There"
            | "Here"
            | "When"
            | "Where"
            | "What"
            | "Which"
            | "Who"
            | "How"
            | "Why"
            | "Is"
            | "Are"
            | "Was"
            | "Were"
            | "Do"
            | "Does"
            | "Did"
            | "Can"
            | "Could"
            | "Will"
            | "Would"
            | "Should"
            | "Has"
            | "Have"
            | "Tell"
            | "Show"
            | "Give"
            | "Please"
            | "Thanks"
            | "Thank"
            | "Hello"
            | "Monday"
            | "Tuesday"
            | "Wednesday"
            | "Thursday"
            | "Friday"
            | "Saturday"
            | "Sunday"
            | "January"
            | "February"
            | "March"
            | "April"
            | "May"
            | "June"
            | "July"
            | "August"
            | "September"
            | "October"
            | "November"
            | "December"
    )
}
