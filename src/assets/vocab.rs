use std::collections::HashMap;

/// Phoneme character to token id.
pub type Vocab = HashMap<char, i64>;

/// Parse a `"vocab"` JSON object mapping single-character strings to token ids.
///
/// Ids must lie in `0..n_token`; id 0 is reserved for padding.
pub fn parse_vocab(value: &serde_json::Value, n_token: usize) -> Result<Vocab, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "'vocab' must be an object".to_string())?;

    let mut map = HashMap::with_capacity(obj.len());
    for (k, v) in obj {
        let mut chars = k.chars();
        let ch = match (chars.next(), chars.next()) {
            (Some(ch), None) => ch,
            _ => return Err(format!("vocab key {k:?} must be exactly one character")),
        };
        let id = v
            .as_i64()
            .ok_or_else(|| format!("Non-integer vocab value for key {k:?}"))?;
        if id <= 0 || id as u64 >= n_token as u64 {
            return Err(format!(
                "vocab id {id} for key {k:?} outside 1..{n_token}"
            ));
        }
        map.insert(ch, id);
    }

    if map.is_empty() {
        return Err("'vocab' is empty".to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_char_keys() {
        let vocab = parse_vocab(&json!({ ";": 1, "ə": 83, " ": 16 }), 178).unwrap();
        assert_eq!(vocab.get(&'ə'), Some(&83));
        assert_eq!(vocab.get(&' '), Some(&16));
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn rejects_bad_entries() {
        assert!(parse_vocab(&json!([1, 2]), 178).is_err());
        assert!(parse_vocab(&json!({ "ab": 1 }), 178).is_err());
        assert!(parse_vocab(&json!({ "a": "x" }), 178).is_err());
        assert!(parse_vocab(&json!({ "a": 0 }), 178).is_err());
        assert!(parse_vocab(&json!({ "a": 178 }), 178).is_err());
        assert!(parse_vocab(&json!({}), 178).is_err());
    }
}
