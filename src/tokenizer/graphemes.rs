use std::collections::BTreeMap;
use std::time::Instant;

use super::{Phonemizer, TokenizeError};

/// Table-driven grapheme-to-phoneme conversion.
///
/// Rules map grapheme sequences to phoneme strings and are applied greedily,
/// longest match first. Characters no rule covers pass through unchanged, so a
/// rule table may be empty and the vocabulary alone decides what is spoken.
#[derive(Debug, Clone)]
pub struct GraphemePhonemizer {
    rules: BTreeMap<String, String>,
    longest_rule: usize,
    lowercase: bool,
}

impl GraphemePhonemizer {
    pub fn new(rules: BTreeMap<String, String>, lowercase: bool) -> Self {
        let rules: BTreeMap<String, String> = if lowercase {
            rules
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect()
        } else {
            rules
        };
        let longest_rule = rules.keys().map(|k| k.chars().count()).max().unwrap_or(0);
        Self {
            rules,
            longest_rule,
            lowercase,
        }
    }

    fn convert(&self, segment: &str) -> String {
        let text = if self.lowercase {
            segment.to_lowercase()
        } else {
            segment.to_string()
        };
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;

        'outer: while pos < chars.len() {
            let max = self.longest_rule.min(chars.len() - pos);
            for len in (1..=max).rev() {
                let candidate: String = chars[pos..pos + len].iter().collect();
                if let Some(phonemes) = self.rules.get(&candidate) {
                    out.push_str(phonemes);
                    pos += len;
                    continue 'outer;
                }
            }
            out.push(chars[pos]);
            pos += 1;
        }

        out
    }
}

impl Phonemizer for GraphemePhonemizer {
    fn phonemize(
        &self,
        segments: &[&str],
        _deadline: Option<Instant>,
    ) -> Result<Vec<String>, TokenizeError> {
        Ok(segments.iter().map(|s| self.convert(s)).collect())
    }
}
