//! Recursive character text splitter.
//!
//! Page text is first cut into small pieces, trying the separators
//! `"\n\n"`, `"\n"`, and `" "` in turn and falling back to a hard split for
//! runs with no separator at all. Pieces are then merged into windows of at
//! most `chunk_size` bytes, and each new window starts with up to
//! `chunk_overlap` bytes of the previous one so that a sentence cut at a
//! window edge still appears whole in one of the two chunks.
//!
//! Every chunk records where it starts in the page text, plus a SHA-256
//! hash of its content.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::DocumentChunk;

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Split one page of text into overlapping chunks.
///
/// Returns an empty vector for blank text. Output is deterministic apart
/// from the generated chunk ids.
pub fn chunk_page(
    source: &str,
    page: Option<u32>,
    text: &str,
    config: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let max = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(max - 1);

    let mut spans = Vec::new();
    split_spans(text, 0, text.len(), &SEPARATORS, max, &mut spans);

    merge_spans(&spans, max, overlap)
        .into_iter()
        .filter_map(|(start, end)| {
            let window = &text[start..end];
            let trimmed = window.trim();
            if trimmed.is_empty() {
                return None;
            }
            let leading = window.len() - window.trim_start().len();
            Some(make_chunk(source, page, start + leading, trimmed))
        })
        .collect()
}

/// Cut `text[start..end]` into spans no longer than `max`, keeping each
/// separator attached to the end of the piece before it.
fn split_spans(
    text: &str,
    start: usize,
    end: usize,
    separators: &[&str],
    max: usize,
    out: &mut Vec<(usize, usize)>,
) {
    if end - start <= max {
        if end > start {
            out.push((start, end));
        }
        return;
    }

    let Some((sep, rest)) = separators.split_first() else {
        hard_split(text, start, end, max, out);
        return;
    };

    let mut piece_start = start;
    for (pos, _) in text[start..end].match_indices(sep) {
        let piece_end = start + pos + sep.len();
        split_spans(text, piece_start, piece_end, rest, max, out);
        piece_start = piece_end;
    }
    split_spans(text, piece_start, end, rest, max, out);
}

fn hard_split(text: &str, start: usize, end: usize, max: usize, out: &mut Vec<(usize, usize)>) {
    let mut cursor = start;
    while cursor < end {
        let mut cut = (cursor + max).min(end);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == cursor {
            // A single character wider than `max`.
            cut = text[cursor..]
                .chars()
                .next()
                .map(|c| cursor + c.len_utf8())
                .unwrap_or(end);
        }
        out.push((cursor, cut));
        cursor = cut;
    }
}

/// Merge contiguous spans into windows, carrying trailing spans totalling
/// at most `overlap` bytes into the next window.
fn merge_spans(spans: &[(usize, usize)], max: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    let mut current: VecDeque<(usize, usize)> = VecDeque::new();

    for &(span_start, span_end) in spans {
        if let (Some(&(front, _)), Some(&(_, back))) = (current.front(), current.back()) {
            if span_end - front > max {
                windows.push((front, back));
                while let Some(&(front, _)) = current.front() {
                    if back - front > overlap || span_end - front > max {
                        current.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        debug_assert!(current.back().map_or(true, |&(_, e)| e == span_start));
        current.push_back((span_start, span_end));
    }

    if let (Some(&(front, _)), Some(&(_, back))) = (current.front(), current.back()) {
        windows.push((front, back));
    }
    windows
}

fn make_chunk(source: &str, page: Option<u32>, start_index: usize, text: &str) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        page,
        start_index,
        content: text.to_string(),
        hash,
    }
}
