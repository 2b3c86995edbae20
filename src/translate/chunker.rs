//! Sentence-aware splitting of long text into provider-sized segments.
//!
//! Text is cut on end-of-sentence punctuation and line breaks, then sentences
//! are packed greedily into segments of at most `max_len` chars. Terminators
//! are consumed by the split, so joining the segments yields the input without
//! its terminators. A sentence longer than `max_len` is hard-sliced into
//! `max_len`-char pieces that are never rejoined.

/// End-of-sentence characters. Consumed by [`split`].
pub const TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '.', '\n', '\r'];

#[inline]
fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

/// True when `text` is long enough that the orchestrator should chunk it.
pub fn exceeds(text: &str, threshold: usize) -> bool {
    text.chars().count() > threshold
}

/// Split `text` into ordered segments of at most `max_len` chars.
/// A `max_len` of zero is treated as one.
pub fn split(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;

    for sentence in text.split(is_terminator).filter(|s| !s.is_empty()) {
        let sentence_len = sentence.chars().count();

        if !buffer.is_empty() && buffer_len + sentence_len > max_len {
            segments.push(std::mem::take(&mut buffer));
            buffer_len = 0;
        }

        if sentence_len > max_len {
            hard_slice(sentence, max_len, &mut segments);
        } else {
            buffer.push_str(sentence);
            buffer_len += sentence_len;
        }
    }

    if !buffer.is_empty() {
        segments.push(buffer);
    }
    segments
}

fn hard_slice(sentence: &str, max_len: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = sentence.chars().collect();
    out.extend(chars.chunks(max_len).map(|piece| piece.iter().collect::<String>()));
}
