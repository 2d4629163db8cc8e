/// Text chunking for embedding
///
/// Splits a document into overlapping chunks that respect semantic
/// boundaries: paragraphs first, falling back to sentence boundaries for
/// oversized paragraphs. Positions are byte offsets into the trimmed input
/// string; with a non-zero overlap, consecutive chunks share a tail of the
/// previous chunk rounded to a word boundary.

/// Default target chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default overlap between consecutive chunks in bytes
pub const DEFAULT_OVERLAP: usize = 64;

/// A piece of text cut from a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Chunking options
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Target chunk size in bytes
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in bytes
    pub overlap: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Split text into overlapping, boundary-respecting chunks.
///
/// Returns an empty vector for empty or whitespace-only input. Invalid
/// options are clamped: a zero chunk size becomes the default, and an
/// overlap of at least the chunk size becomes a quarter of it.
pub fn split(text: &str, mut opts: Options) -> Vec<ChunkSpan> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if opts.chunk_size == 0 {
        opts.chunk_size = DEFAULT_CHUNK_SIZE;
    }
    if opts.overlap >= opts.chunk_size {
        opts.overlap = opts.chunk_size / 4;
    }

    if text.len() <= opts.chunk_size {
        return vec![ChunkSpan {
            content: text.to_string(),
            start_pos: 0,
            end_pos: text.len(),
        }];
    }

    let paragraphs = split_paragraphs(text);
    merge_and_split(text, &paragraphs, opts)
}

/// A text span inside the full input
struct Segment {
    content: String,
    start_pos: usize,
}

/// Split text into paragraph segments (blank-line delimited), keeping
/// positions into the input.
fn split_paragraphs(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut start = 0;

    while start < text.len() {
        match text[start..].find("\n\n") {
            None => {
                let para = text[start..].trim();
                if !para.is_empty() {
                    segments.push(Segment {
                        content: para.to_string(),
                        start_pos: start,
                    });
                }
                break;
            }
            Some(idx) => {
                let end = start + idx;
                let para = text[start..end].trim();
                if !para.is_empty() {
                    segments.push(Segment {
                        content: para.to_string(),
                        start_pos: start,
                    });
                }
                start = end + 2;
            }
        }
    }

    segments
}

/// Merge paragraphs greedily into chunks of the target size, splitting
/// oversized paragraphs at sentence boundaries.
fn merge_and_split(full_text: &str, paragraphs: &[Segment], opts: Options) -> Vec<ChunkSpan> {
    let mut chunks: Vec<ChunkSpan> = Vec::new();
    let mut current = String::new();
    let mut current_start: Option<usize> = None;

    let flush = |chunks: &mut Vec<ChunkSpan>, current: &mut String, start: &mut Option<usize>| {
        let content = current.trim();
        if !content.is_empty() {
            let begin = start.unwrap_or(0);
            chunks.push(ChunkSpan {
                content: content.to_string(),
                start_pos: begin,
                end_pos: begin + current.len(),
            });
        }
        current.clear();
        *start = None;
    };

    for para in paragraphs {
        // Oversized paragraphs get their own sentence-packed chunks.
        if para.content.len() > opts.chunk_size {
            flush(&mut chunks, &mut current, &mut current_start);
            chunks.extend(split_by_sentences(&para.content, para.start_pos, opts));
            continue;
        }

        let mut projected = current.len();
        if projected > 0 {
            projected += 2; // "\n\n" separator
        }
        projected += para.content.len();

        if projected > opts.chunk_size && !current.is_empty() {
            flush(&mut chunks, &mut current, &mut current_start);
        }

        if current_start.is_none() {
            current_start = Some(para.start_pos);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&para.content);
    }
    flush(&mut chunks, &mut current, &mut current_start);

    if opts.overlap > 0 && chunks.len() > 1 {
        chunks = apply_overlap(full_text, chunks, opts.overlap);
    }

    chunks
}

/// Pack sentences of a long paragraph into chunks no larger than the target.
fn split_by_sentences(text: &str, base_pos: usize, opts: Options) -> Vec<ChunkSpan> {
    let sentences = find_sentences(text);
    if sentences.is_empty() {
        return vec![ChunkSpan {
            content: text.to_string(),
            start_pos: base_pos,
            end_pos: base_pos + text.len(),
        }];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_start = 0;

    for sent in &sentences {
        let mut projected = current.len();
        if projected > 0 {
            projected += 1; // space
        }
        projected += sent.content.len();

        if projected > opts.chunk_size && !current.is_empty() {
            let content = current.trim();
            if !content.is_empty() {
                chunks.push(ChunkSpan {
                    content: content.to_string(),
                    start_pos: base_pos + current_start,
                    end_pos: base_pos + current_start + current.len(),
                });
            }
            current.clear();
            current_start = sent.start_pos;
        }

        if current.is_empty() {
            current_start = sent.start_pos;
        } else {
            current.push(' ');
        }
        current.push_str(&sent.content);
    }

    let content = current.trim();
    if !content.is_empty() {
        chunks.push(ChunkSpan {
            content: content.to_string(),
            start_pos: base_pos + current_start,
            end_pos: base_pos + current_start + current.len(),
        });
    }

    chunks
}

/// Split text into sentence-like segments. A `.`, `!`, or `?` ends a
/// sentence when followed by whitespace and an uppercase letter, or by the
/// end of the text.
fn find_sentences(text: &str) -> Vec<Segment> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (byte_i, c) = chars[i];
        if c == '.' || c == '!' || c == '?' {
            let at_end = i + 1 >= chars.len();
            let boundary = at_end
                || (i + 2 < chars.len()
                    && chars[i + 1].1.is_whitespace()
                    && chars[i + 2].1.is_uppercase());
            if boundary {
                if start < chars.len() {
                    let byte_start = chars[start].0;
                    let byte_end = byte_i + c.len_utf8();
                    let sent = text[byte_start..byte_end].trim();
                    if !sent.is_empty() {
                        sentences.push(Segment {
                            content: sent.to_string(),
                            start_pos: byte_start,
                        });
                    }
                }
                while i + 1 < chars.len() && chars[i + 1].1.is_whitespace() {
                    i += 1;
                }
                start = i + 1;
            }
        }
        i += 1;
    }

    if start < chars.len() {
        let byte_start = chars[start].0;
        let sent = text[byte_start..].trim();
        if !sent.is_empty() {
            sentences.push(Segment {
                content: sent.to_string(),
                start_pos: byte_start,
            });
        }
    }

    sentences
}

/// Extend each chunk after the first backward into the previous chunk by up
/// to `overlap` bytes, rounded forward to a word boundary.
fn apply_overlap(full_text: &str, chunks: Vec<ChunkSpan>, overlap: usize) -> Vec<ChunkSpan> {
    if chunks.len() <= 1 {
        return chunks;
    }

    let mut result = Vec::with_capacity(chunks.len());
    result.push(chunks[0].clone());

    for i in 1..chunks.len() {
        let prev_start = chunks[i - 1].start_pos;
        let prev_end = align_backward(full_text, chunks[i - 1].end_pos.min(full_text.len()));
        let mut overlap_start = prev_end.saturating_sub(overlap).max(prev_start);
        overlap_start = next_word_boundary(full_text, overlap_start);

        let cur_start = align_backward(full_text, chunks[i].start_pos.min(full_text.len()));
        let cur_end = align_backward(full_text, chunks[i].end_pos.min(full_text.len()));

        if overlap_start >= prev_end {
            result.push(chunks[i].clone());
            continue;
        }

        let overlap_text = full_text[overlap_start..prev_end].trim();
        let main_text = full_text[cur_start..cur_end].trim();

        let combined = format!("{overlap_text} {main_text}");
        result.push(ChunkSpan {
            content: combined.trim().to_string(),
            start_pos: overlap_start,
            end_pos: chunks[i].end_pos,
        });
    }

    result
}

/// Move `pos` forward past the current word and any following whitespace,
/// landing on the start of the next word.
fn next_word_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    if pos == 0 {
        return 0;
    }
    let pos = align_forward(text, pos);
    let rest = &text[pos..];

    let mut word_end = rest.len();
    for (i, c) in rest.char_indices() {
        if c.is_whitespace() {
            word_end = i;
            break;
        }
    }
    if word_end == rest.len() {
        return text.len();
    }
    for (i, c) in rest[word_end..].char_indices() {
        if !c.is_whitespace() {
            return pos + word_end + i;
        }
    }
    text.len()
}

/// Round a byte position down to the nearest UTF-8 character boundary.
fn align_backward(text: &str, mut pos: usize) -> usize {
    if pos > text.len() {
        return text.len();
    }
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Round a byte position up to the nearest UTF-8 character boundary.
fn align_forward(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_returns_no_chunks() {
        assert!(split("", Options::default()).is_empty());
        assert!(split("   \n\t  ", Options::default()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split("Hello world", Options::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello world");
        assert_eq!(chunks[0].start_pos, 0);
        assert_eq!(chunks[0].end_pos, "Hello world".len());
    }

    #[test]
    fn test_trimmed_before_fitting() {
        let chunks = split("  Hello world  ", Options::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello world");
    }

    #[test]
    fn test_paragraphs_merge_up_to_chunk_size() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let opts = Options {
            chunk_size: 50,
            overlap: 0,
        };
        let chunks = split(text, opts);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(!c.content.is_empty());
            assert!(c.start_pos < c.end_pos);
            assert!(c.end_pos <= text.trim().len());
        }
        // First chunk begins at the start of the text.
        assert_eq!(chunks[0].start_pos, 0);
    }

    #[test]
    fn test_chunks_ordered_by_start() {
        let text = "Alpha paragraph.\n\nBeta paragraph.\n\nGamma paragraph.\n\nDelta paragraph.";
        let opts = Options {
            chunk_size: 40,
            overlap: 0,
        };
        let chunks = split(text, opts);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_pos <= pair[1].start_pos);
        }
    }

    #[test]
    fn test_oversized_paragraph_splits_at_sentences() {
        let text = "This is the first sentence of a long paragraph. \
                    Here comes the second sentence with more words in it. \
                    And a third sentence closes out the paragraph nicely.";
        let opts = Options {
            chunk_size: 80,
            overlap: 0,
        };
        let chunks = split(text, opts);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.content.len() <= 2 * opts.chunk_size);
            assert_eq!(
                c.content,
                text[c.start_pos..c.end_pos.min(text.len())].trim()
            );
        }
    }

    #[test]
    fn test_overlap_extends_backward() {
        let text = "First paragraph with several words inside it.\n\n\
                    Second paragraph with several more words inside.\n\n\
                    Third paragraph with even more words inside it.";
        let no_overlap = split(
            text,
            Options {
                chunk_size: 60,
                overlap: 0,
            },
        );
        let with_overlap = split(
            text,
            Options {
                chunk_size: 60,
                overlap: 20,
            },
        );
        assert_eq!(no_overlap.len(), with_overlap.len());
        assert!(with_overlap.len() > 1);

        // Every chunk after the first starts earlier (or equal) than the
        // non-overlapped version and overlaps the previous chunk's span.
        for i in 1..with_overlap.len() {
            assert!(with_overlap[i].start_pos <= no_overlap[i].start_pos);
            assert!(with_overlap[i].start_pos < with_overlap[i - 1].end_pos);
        }
    }

    #[test]
    fn test_overlap_clamped_when_larger_than_chunk_size() {
        let text = "Alpha paragraph here.\n\nBeta paragraph here.\n\nGamma paragraph text.";
        let chunks = split(
            text,
            Options {
                chunk_size: 30,
                overlap: 100,
            },
        );
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.start_pos < c.end_pos);
        }
    }

    #[test]
    fn test_zero_chunk_size_uses_default() {
        let chunks = split(
            "Some short text",
            Options {
                chunk_size: 0,
                overlap: 0,
            },
        );
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_spans_stay_in_bounds() {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!(
                "Paragraph number {i} with a sentence in it. Another one follows here.\n\n"
            ));
        }
        let trimmed_len = text.trim().len();
        let chunks = split(
            &text,
            Options {
                chunk_size: 128,
                overlap: 32,
            },
        );
        assert!(chunks.len() > 2);
        for c in &chunks {
            assert!(!c.content.is_empty());
            assert!(c.start_pos < c.end_pos);
            assert!(c.end_pos <= trimmed_len);
        }
    }

    #[test]
    fn test_unicode_text_does_not_split_mid_character() {
        let mut text = String::new();
        for _ in 0..20 {
            text.push_str("Grüße aus München an alle Freunde. Schöne Straße hier. ");
        }
        let chunks = split(
            &text,
            Options {
                chunk_size: 100,
                overlap: 20,
            },
        );
        assert!(chunks.len() > 1);
        for c in &chunks {
            // Content must be valid slices; trimming already proved the
            // boundaries are valid, so just confirm non-empty output.
            assert!(!c.content.is_empty());
        }
    }

    #[test]
    fn test_single_long_word_paragraph() {
        let word = "x".repeat(600);
        let chunks = split(&word, Options::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.len(), 600);
    }
}
