//! Line-boundary text chunker.
//!
//! Splits extracted document text into [`TextChunk`]s that each fit under
//! the summarization service's per-request character limit. Splitting
//! prefers the last newline inside the window so that lines stay whole;
//! a window with no newline is cut hard at the limit.
//!
//! Lengths are counted in characters, not bytes, and cuts always fall on
//! character boundaries. Concatenating the chunks in index order yields
//! the input exactly: the newline a cut is made at belongs to the chunk
//! that precedes it.

use crate::models::TextChunk;

/// Split `text` into chunks of at most `limit` characters.
///
/// Returns chunks with contiguous 1-based indices. Empty text yields no
/// chunks. A `limit` of zero is treated as one.
pub fn chunk_text(text: &str, limit: usize) -> Vec<TextChunk<'_>> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let rest = &text[start..];
        let end = match rest.char_indices().nth(limit) {
            // Remainder fits in one window.
            None => text.len(),
            Some((window_bytes, _)) => {
                let window = &rest[..window_bytes];
                match window.rfind('\n') {
                    Some(nl) => start + nl + 1,
                    None => start + window_bytes,
                }
            }
        };

        chunks.push(TextChunk {
            index: chunks.len() + 1,
            range: start..end,
            text: &text[start..end],
        });
        start = end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[TextChunk<'_>]) -> String {
        chunks.iter().map(|c| c.text).collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("hello\nworld", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[0].text, "hello\nworld");
        assert_eq!(chunks[0].range, 0..11);
    }

    #[test]
    fn text_exactly_at_limit_is_single_chunk() {
        let text = "a".repeat(50);
        assert_eq!(chunk_text(&text, 50).len(), 1);
    }

    #[test]
    fn splits_after_last_newline_in_window() {
        // Line of 200,000 chars, newline, then 49 more chars.
        let mut text = "x".repeat(200_000);
        text.push('\n');
        text.push_str(&"y".repeat(49));
        assert_eq!(text.chars().count(), 200_050);

        let chunks = chunk_text(&text, 125_000);
        // No newline in the first window: hard cut.
        assert_eq!(chunks[0].char_len(), 125_000);
        // Second window holds the newline; cut right after it.
        assert_eq!(chunks[1].char_len(), 75_001);
        assert!(chunks[1].text.ends_with('\n'));
        assert_eq!(chunks[2].text, "y".repeat(49));
        assert_eq!(chunks.len(), 3);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn long_document_splits_at_nearest_newline_below_limit() {
        // 200,050 chars; the last newline before the limit is at 124,899 and
        // nothing in 124,900..125,000 is a newline.
        let text = format!("{}\n{}", "a".repeat(124_899), "b".repeat(75_150));
        assert_eq!(text.chars().count(), 200_050);

        let chunks = chunk_text(&text, 125_000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].char_len(), 124_900);
        assert!(chunks[0].text.ends_with('\n'));
        assert_eq!(chunks[1].range, 124_900..200_050);
        assert_eq!(chunks[1].text, "b".repeat(75_150));
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn prefers_newline_over_hard_cut() {
        let text = "aaaa\nbbbb\ncccc\n";
        let chunks = chunk_text(text, 12);
        assert_eq!(chunks[0].text, "aaaa\nbbbb\n");
        assert_eq!(chunks[1].text, "cccc\n");
    }

    #[test]
    fn every_chunk_respects_limit_and_indices_are_contiguous() {
        let text: String = (0..500)
            .map(|i| format!("line {} {}\n", i, "w".repeat(i % 37)))
            .collect();
        let chunks = chunk_text(&text, 300);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i + 1);
            assert!(c.char_len() <= 300);
            assert!(!c.text.is_empty());
            assert_eq!(&text[c.range.clone()], c.text);
        }
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "alpha\nbeta gamma\ndelta\n".repeat(40);
        assert_eq!(chunk_text(&text, 64), chunk_text(&text, 64));
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Each 'é' is two bytes.
        let text = "é".repeat(10);
        let chunks = chunk_text(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].char_len(), 4);
        assert_eq!(chunks[2].char_len(), 2);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn zero_limit_still_terminates() {
        let chunks = chunk_text("abc", 0);
        assert_eq!(chunks.len(), 3);
    }
}
