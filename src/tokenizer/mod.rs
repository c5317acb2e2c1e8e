//! Text to phoneme token conversion.
//!
//! Text is split into word runs and boundary punctuation, each run is turned
//! into phonemes by the phonemizer configured for the requested language, and
//! every phoneme character is mapped to a token id through the vocabulary.
//! Both the phonemizer rules and the vocabulary come from `tokenizer.json`:
//!
//! ```json
//! {
//!   "vocab": { ";": 1, ":": 2, ",": 3, ".": 4, " ": 16, "ə": 83 },
//!   "default_language": "en-us",
//!   "unknown": "skip",
//!   "languages": {
//!     "en-us": { "backend": "espeak", "voice": "en-us" },
//!     "x-latin": { "backend": "graphemes", "lowercase": true, "rules": { "sh": "ʃ" } }
//!   },
//!   "voice_prefixes": { "af": "en-us", "am": "en-us" }
//! }
//! ```
//!
//! Characters without a vocabulary entry are dropped (`"unknown": "skip"`,
//! the default) or fail the request (`"unknown": "error"`). Whitespace without
//! a vocabulary entry is always dropped. Text that yields no tokens at all is
//! an error, never an empty sequence.

pub mod espeak;
pub mod graphemes;
mod text;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use serde::Deserialize;

use crate::assets::vocab::{parse_vocab, Vocab};
use crate::assets::ModelConfig;
use crate::error::{AssetError, SynthesisError};

pub use espeak::{EspeakConfig, EspeakPhonemizer};
pub use graphemes::GraphemePhonemizer;

use text::{split_text_parts, TextPart};

/// Clause punctuation; long token sequences are preferably split after these.
const CLAUSE_PUNCTUATION: [char; 6] = [';', ':', ',', '.', '!', '?'];

/// Converts runs of text into phoneme strings.
pub trait Phonemizer: Send + Sync + fmt::Debug {
    /// Phonemize each segment. Returns exactly one string per segment.
    ///
    /// Backends that call out to another process must give up at `deadline`
    /// with [`TokenizeError::DeadlineExceeded`].
    fn phonemize(
        &self,
        segments: &[&str],
        deadline: Option<Instant>,
    ) -> Result<Vec<String>, TokenizeError>;
}

#[derive(thiserror::Error, Debug)]
pub enum TokenizeError {
    #[error("text is empty")]
    EmptyText,
    #[error("Language '{0}' is not supported")]
    UnsupportedLanguage(String),
    #[error("character {0:?} has no token in the vocabulary")]
    UnknownCharacter(char),
    #[error("text produced no phoneme tokens")]
    NoTokens,
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("phonemizer did not finish before the deadline")]
    DeadlineExceeded,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TokenizeError> for SynthesisError {
    fn from(err: TokenizeError) -> Self {
        match err {
            TokenizeError::EmptyText => SynthesisError::Validation("text must not be empty".into()),
            TokenizeError::UnsupportedLanguage(lang) => SynthesisError::UnsupportedLanguage { lang },
            other => SynthesisError::Tokenize {
                reason: other.to_string(),
            },
        }
    }
}

/// What to do with a phoneme that has no vocabulary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    #[default]
    Skip,
    Error,
}

/// Phonemizer selection for one language in `tokenizer.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum LanguageRules {
    Espeak {
        voice: String,
    },
    Graphemes {
        #[serde(default)]
        lowercase: bool,
        #[serde(default)]
        rules: BTreeMap<String, String>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenizerFile {
    #[serde(default)]
    vocab: Option<serde_json::Value>,
    default_language: String,
    #[serde(default)]
    unknown: UnknownPolicy,
    languages: BTreeMap<String, LanguageRules>,
    #[serde(default)]
    voice_prefixes: BTreeMap<String, String>,
}

/// Non-empty sequence of vocabulary token ids, without padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenSequence(Vec<i64>);

impl TokenSequence {
    /// Returns `None` for an empty id list.
    pub fn new(ids: Vec<i64>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self(ids))
        }
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<i64> {
        self.0
    }
}

#[derive(Debug)]
pub struct Tokenizer {
    vocab: Vocab,
    unknown: UnknownPolicy,
    default_language: String,
    languages: BTreeMap<String, Box<dyn Phonemizer>>,
    voice_prefixes: BTreeMap<String, String>,
}

impl Tokenizer {
    /// Build a tokenizer from `tokenizer.json`.
    ///
    /// The vocabulary comes from the file's `vocab`, falling back to the
    /// `vocab` in `config.json`.
    pub(crate) fn load(
        path: &Path,
        config: &ModelConfig,
        espeak: &EspeakConfig,
    ) -> Result<Self, AssetError> {
        if !path.is_file() {
            return Err(AssetError::MissingTokenizer(path.to_path_buf()));
        }
        let invalid = |reason: String| AssetError::InvalidTokenizer {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| AssetError::io(path, e))?;
        let file: TokenizerFile =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        let vocab_json = match (&file.vocab, config.fallback_vocab()) {
            (Some(vocab), _) => vocab,
            (None, Some(vocab)) => {
                log::warn!("tokenizer.json has no vocab, using the one in config.json");
                vocab
            }
            (None, None) => {
                return Err(invalid(
                    "no 'vocab' in tokenizer.json or config.json".to_string(),
                ))
            }
        };
        let vocab = parse_vocab(vocab_json, config.n_token).map_err(invalid)?;

        if file.languages.is_empty() {
            return Err(invalid("'languages' is empty".to_string()));
        }
        if !file.languages.contains_key(&file.default_language) {
            return Err(invalid(format!(
                "default_language '{}' is not listed in 'languages'",
                file.default_language
            )));
        }
        if let Some((prefix, lang)) = file
            .voice_prefixes
            .iter()
            .find(|(_, lang)| !file.languages.contains_key(*lang))
        {
            return Err(invalid(format!(
                "voice prefix '{prefix}' maps to unknown language '{lang}'"
            )));
        }

        let languages = file
            .languages
            .into_iter()
            .map(|(code, rules)| {
                let phonemizer: Box<dyn Phonemizer> = match rules {
                    LanguageRules::Espeak { voice } => {
                        Box::new(EspeakPhonemizer::new(voice, espeak.clone()))
                    }
                    LanguageRules::Graphemes { lowercase, rules } => {
                        Box::new(GraphemePhonemizer::new(rules, lowercase))
                    }
                };
                (code, phonemizer)
            })
            .collect();

        log::info!("Loaded tokenizer with {} vocabulary entries", vocab.len());
        Ok(Self {
            vocab,
            unknown: file.unknown,
            default_language: file.default_language,
            languages,
            voice_prefixes: file.voice_prefixes,
        })
    }

    /// Assemble a tokenizer from already-built parts.
    ///
    /// `default_language` should be one of the keys of `languages`.
    pub fn from_parts(
        vocab: Vocab,
        default_language: impl Into<String>,
        languages: BTreeMap<String, Box<dyn Phonemizer>>,
        unknown: UnknownPolicy,
    ) -> Self {
        Self {
            vocab,
            unknown,
            default_language: default_language.into(),
            languages,
            voice_prefixes: BTreeMap::new(),
        }
    }

    /// Convert `text` into token ids using the phonemizer for `lang`.
    ///
    /// Deterministic for a deterministic phonemizer: the same `(text, lang)`
    /// always yields the same sequence.
    pub fn tokenize(&self, text: &str, lang: &str) -> Result<TokenSequence, TokenizeError> {
        self.tokenize_within(text, lang, None)
    }

    /// [`Tokenizer::tokenize`], giving up once `deadline` passes.
    pub fn tokenize_within(
        &self,
        text: &str,
        lang: &str,
        deadline: Option<Instant>,
    ) -> Result<TokenSequence, TokenizeError> {
        if text.trim().is_empty() {
            return Err(TokenizeError::EmptyText);
        }
        let phonemizer = self
            .languages
            .get(lang)
            .ok_or_else(|| TokenizeError::UnsupportedLanguage(lang.to_string()))?;

        let parts = split_text_parts(text);
        let segments: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                TextPart::Text(segment) => Some(segment.as_str()),
                TextPart::Punct(_) => None,
            })
            .collect();

        let phonemes = if segments.is_empty() {
            Vec::new()
        } else {
            phonemizer.phonemize(&segments, deadline)?
        };
        if phonemes.len() != segments.len() {
            return Err(TokenizeError::PhonemizerFailed(format!(
                "expected {} phoneme strings, got {}",
                segments.len(),
                phonemes.len()
            )));
        }

        let mut ids = Vec::new();
        let mut phonemes = phonemes.iter();
        let mut after_punct = false;
        for part in &parts {
            match part {
                TextPart::Text(_) => {
                    if after_punct {
                        self.push_char(' ', &mut ids)?;
                    }
                    if let Some(chunk) = phonemes.next() {
                        for ch in chunk.chars() {
                            self.push_char(ch, &mut ids)?;
                        }
                    }
                    after_punct = false;
                }
                TextPart::Punct(ch) => {
                    self.push_char(*ch, &mut ids)?;
                    after_punct = true;
                }
            }
        }

        log::debug!(
            "Tokenized {} chars ({lang}) into {} tokens",
            text.chars().count(),
            ids.len()
        );
        TokenSequence::new(ids).ok_or(TokenizeError::NoTokens)
    }

    fn push_char(&self, ch: char, ids: &mut Vec<i64>) -> Result<(), TokenizeError> {
        let ch = if ch.is_whitespace() { ' ' } else { ch };
        match self.vocab.get(&ch) {
            Some(&id) => {
                // No leading space and never two in a row.
                if ch != ' ' || (!ids.is_empty() && ids.last() != Some(&id)) {
                    ids.push(id);
                }
                Ok(())
            }
            None if ch == ' ' => Ok(()),
            None => match self.unknown {
                UnknownPolicy::Skip => Ok(()),
                UnknownPolicy::Error => Err(TokenizeError::UnknownCharacter(ch)),
            },
        }
    }

    pub fn supports(&self, lang: &str) -> bool {
        self.languages.contains_key(lang)
    }

    pub fn languages(&self) -> Vec<&str> {
        self.languages.keys().map(String::as_str).collect()
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Language implied by a voice name, using the longest matching prefix
    /// from `voice_prefixes` (e.g. `af_heart` → `en-us`).
    pub fn language_for_voice(&self, voice: &str) -> Option<&str> {
        self.voice_prefixes
            .iter()
            .filter(|(prefix, _)| voice.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, lang)| lang.as_str())
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Token ids of the clause punctuation present in the vocabulary.
    pub fn boundary_ids(&self) -> Vec<i64> {
        CLAUSE_PUNCTUATION
            .iter()
            .filter_map(|ch| self.vocab.get(ch).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vocab() -> Vocab {
        [
            (';', 1),
            (':', 2),
            (',', 3),
            ('.', 4),
            ('!', 5),
            ('?', 6),
            (' ', 16),
            ('a', 43),
            ('d', 46),
            ('e', 47),
            ('h', 50),
            ('l', 54),
            ('o', 57),
            ('r', 60),
            ('w', 65),
            ('ʃ', 131),
        ]
        .into_iter()
        .collect()
    }

    fn tokenizer(unknown: UnknownPolicy) -> Tokenizer {
        let mut rules = BTreeMap::new();
        rules.insert("sh".to_string(), "ʃ".to_string());
        let mut languages: BTreeMap<String, Box<dyn Phonemizer>> = BTreeMap::new();
        languages.insert(
            "x-test".to_string(),
            Box::new(GraphemePhonemizer::new(rules, true)),
        );
        Tokenizer::from_parts(test_vocab(), "x-test", languages, unknown)
    }

    #[test]
    fn tokenizes_words_and_punctuation() {
        let tokens = tokenizer(UnknownPolicy::Skip)
            .tokenize("Hello, world!", "x-test")
            .unwrap();
        assert_eq!(
            tokens.as_slice(),
            &[50, 47, 54, 54, 57, 3, 16, 65, 57, 60, 54, 46, 5]
        );
    }

    #[test]
    fn tokenization_is_deterministic() {
        let tok = tokenizer(UnknownPolicy::Skip);
        let first = tok.tokenize("Shh, hello there. Hello!", "x-test").unwrap();
        for _ in 0..10 {
            assert_eq!(tok.tokenize("Shh, hello there. Hello!", "x-test").unwrap(), first);
        }
    }

    #[test]
    fn empty_and_whitespace_text_is_rejected() {
        let tok = tokenizer(UnknownPolicy::Skip);
        assert!(matches!(tok.tokenize("", "x-test"), Err(TokenizeError::EmptyText)));
        assert!(matches!(
            tok.tokenize(" \n\t ", "x-test"),
            Err(TokenizeError::EmptyText)
        ));
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let err = tokenizer(UnknownPolicy::Skip)
            .tokenize("hello", "tlh")
            .unwrap_err();
        assert!(matches!(err, TokenizeError::UnsupportedLanguage(ref l) if l == "tlh"));
        assert!(matches!(
            SynthesisError::from(err),
            SynthesisError::UnsupportedLanguage { .. }
        ));
    }

    #[test]
    fn unknown_characters_follow_policy() {
        let skip = tokenizer(UnknownPolicy::Skip).tokenize("hello 42", "x-test").unwrap();
        assert_eq!(skip.as_slice(), &[50, 47, 54, 54, 57, 16]);

        let err = tokenizer(UnknownPolicy::Error)
            .tokenize("hello 42", "x-test")
            .unwrap_err();
        assert!(matches!(err, TokenizeError::UnknownCharacter('4')));
    }

    #[test]
    fn text_without_known_characters_is_a_tokenize_error() {
        let err = tokenizer(UnknownPolicy::Skip)
            .tokenize("123 456", "x-test")
            .unwrap_err();
        assert!(matches!(err, TokenizeError::NoTokens));
        assert!(matches!(
            SynthesisError::from(err),
            SynthesisError::Tokenize { .. }
        ));
    }

    #[test]
    fn boundary_ids_follow_the_vocabulary() {
        assert_eq!(tokenizer(UnknownPolicy::Skip).boundary_ids(), vec![1, 2, 3, 4, 5, 6]);

        let vocab: Vocab = [('.', 90), ('?', 91), ('a', 43)].into_iter().collect();
        let tok = Tokenizer::from_parts(vocab, "x-test", BTreeMap::new(), UnknownPolicy::Skip);
        assert_eq!(tok.boundary_ids(), vec![90, 91]);
    }

    #[test]
    fn applies_grapheme_rules() {
        let tokens = tokenizer(UnknownPolicy::Skip).tokenize("Shade", "x-test").unwrap();
        assert_eq!(tokens.as_slice(), &[131, 43, 46, 47]);
    }

    #[test]
    fn loads_from_tokenizer_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(
            &path,
            r#"{
                "vocab": { "a": 43, "b": 44, " ": 16 },
                "default_language": "x-one",
                "unknown": "error",
                "languages": {
                    "x-one": { "backend": "graphemes" },
                    "en-us": { "backend": "espeak", "voice": "en-us" }
                },
                "voice_prefixes": { "af": "en-us", "af_x": "x-one" }
            }"#,
        )
        .unwrap();

        let tok = Tokenizer::load(&path, &ModelConfig::default(), &EspeakConfig::default()).unwrap();
        assert_eq!(tok.languages(), vec!["en-us", "x-one"]);
        assert_eq!(tok.default_language(), "x-one");
        assert_eq!(tok.language_for_voice("af_heart"), Some("en-us"));
        assert_eq!(tok.language_for_voice("af_xavier"), Some("x-one"));
        assert_eq!(tok.language_for_voice("zz_nobody"), None);
        assert_eq!(tok.tokenize("ab ba", "x-one").unwrap().as_slice(), &[43, 44, 16, 44, 43]);
    }

    #[test]
    fn rejects_inconsistent_tokenizer_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        let config = ModelConfig::default();
        let espeak = EspeakConfig::default();

        std::fs::write(
            &path,
            r#"{ "vocab": { "a": 1 }, "default_language": "missing",
                 "languages": { "x": { "backend": "graphemes" } } }"#,
        )
        .unwrap();
        assert!(matches!(
            Tokenizer::load(&path, &config, &espeak),
            Err(AssetError::InvalidTokenizer { .. })
        ));

        std::fs::write(
            &path,
            r#"{ "default_language": "x", "languages": { "x": { "backend": "graphemes" } } }"#,
        )
        .unwrap();
        assert!(matches!(
            Tokenizer::load(&path, &config, &espeak),
            Err(AssetError::InvalidTokenizer { .. })
        ));

        std::fs::write(
            &path,
            r#"{ "vocab": { "a": 1 }, "default_language": "x",
                 "languages": { "x": { "backend": "klingon" } } }"#,
        )
        .unwrap();
        assert!(matches!(
            Tokenizer::load(&path, &config, &espeak),
            Err(AssetError::InvalidTokenizer { .. })
        ));
    }
}
