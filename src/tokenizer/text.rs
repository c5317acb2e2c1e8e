//! Cutting input text into word runs and the punctuation between them.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TextPart {
    Text(String),
    Punct(char),
}

/// Split text into runs of words and the punctuation between them.
///
/// Whitespace inside a run collapses to one space. Line breaks act as a full
/// stop. Decimal points and thousands separators between digits stay inside
/// the run so the phonemizer can read the number.
pub(crate) fn split_text_parts(text: &str) -> Vec<TextPart> {
    let mut splitter = Splitter::default();
    let mut chars = text.chars().peekable();
    let mut prev = None;

    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        match clause_mark(ch) {
            Some(mark) if !joins_digits(prev, ch, next) => splitter.mark(ch, mark),
            _ if ch.is_whitespace() => splitter.space(),
            _ => splitter.run.push(ch),
        }
        prev = Some(ch);
    }

    splitter.finish()
}

#[derive(Default)]
struct Splitter {
    parts: Vec<TextPart>,
    run: String,
}

impl Splitter {
    fn space(&mut self) {
        if !self.run.is_empty() && !self.run.ends_with(' ') {
            self.run.push(' ');
        }
    }

    fn mark(&mut self, ch: char, mark: char) {
        self.flush();
        // A blank line is one stop, not two.
        let repeated_break =
            matches!(ch, '\n' | '\r') && self.parts.last() == Some(&TextPart::Punct('.'));
        if !repeated_break {
            self.parts.push(TextPart::Punct(mark));
        }
    }

    fn flush(&mut self) {
        let run = self.run.trim_end();
        if !run.is_empty() {
            self.parts.push(TextPart::Text(run.to_string()));
        }
        self.run.clear();
    }

    fn finish(mut self) -> Vec<TextPart> {
        self.flush();
        self.parts
    }
}

/// The punctuation token a character ends a run with, if any.
fn clause_mark(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

/// `.` or `,` with a digit on both sides, as in `2.5` or `1,000`.
fn joins_digits(prev: Option<char>, ch: char, next: Option<char>) -> bool {
    matches!(ch, '.' | ',')
        && prev.is_some_and(|c| c.is_ascii_digit())
        && next.is_some_and(|c| c.is_ascii_digit())
}
