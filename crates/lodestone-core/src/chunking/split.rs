//! Splitting of lines that exceed the token budget on their own.
//!
//! Sentence boundaries are tried first; whatever is still too long is cut at
//! the longest prefix that fits, backed off to whitespace when a space is
//! close enough to avoid cutting a word.

use super::token_memo::TokenMemo;
use crate::config::FORCE_SPLIT_LOOKBACK_CHARS;
use crate::error::ChunkingError;

/// A piece of a line: byte offset relative to the line start, plus text.
pub(crate) type Piece<'a> = (usize, &'a str);

/// Splits `line` into pieces that each fit within `max_tokens`.
///
/// Pieces are contiguous, non-overlapping slices of `line` in order, so
/// concatenating them yields `line` again.
pub(crate) fn split_oversized_line<'a>(
    line: &'a str,
    max_tokens: usize,
    memo: &mut TokenMemo<'a>,
) -> Result<Vec<Piece<'a>>, ChunkingError> {
    let mut pieces = Vec::new();

    for (start, end) in pack_sentences(line, max_tokens, memo)? {
        let packed = &line[start..end];
        if memo.count(packed)? <= max_tokens {
            pieces.push((start, packed));
        } else {
            for (offset, piece) in force_split(packed, max_tokens, memo)? {
                pieces.push((start + offset, piece));
            }
        }
    }

    for (_, piece) in &pieces {
        let tokens = memo.count(piece)?;
        assert!(
            tokens <= max_tokens,
            "split produced a piece of {} tokens (max {})",
            tokens,
            max_tokens
        );
    }

    Ok(pieces)
}

/// Byte ranges of the sentences in `text`.
///
/// Western terminators (`.`, `!`, `?`) end a sentence only when followed by
/// whitespace or the end of text, and the whitespace stays with the sentence.
/// CJK terminators (`。`, `！`, `？`) end a sentence immediately.
pub(crate) fn sentence_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let boundary = match c {
            '。' | '！' | '？' => Some(idx + c.len_utf8()),
            '.' | '!' | '?' => match chars.peek() {
                None => Some(idx + c.len_utf8()),
                Some(&(_, next)) if next.is_whitespace() => {
                    // Keep the trailing whitespace run with this sentence
                    let mut end = idx + c.len_utf8();
                    while let Some(&(ws_idx, ws)) = chars.peek() {
                        if !ws.is_whitespace() {
                            break;
                        }
                        end = ws_idx + ws.len_utf8();
                        chars.next();
                    }
                    Some(end)
                }
                Some(_) => None,
            },
            _ => None,
        };

        if let Some(end) = boundary {
            if end > start {
                ranges.push((start, end));
            }
            start = end;
        }
    }

    if start < text.len() {
        ranges.push((start, text.len()));
    }
    ranges
}

/// Greedily packs consecutive sentences while the packed text fits.
///
/// A sentence that does not fit on its own becomes its own range; the caller
/// force-splits it.
fn pack_sentences<'a>(
    line: &'a str,
    max_tokens: usize,
    memo: &mut TokenMemo<'a>,
) -> Result<Vec<(usize, usize)>, ChunkingError> {
    let mut packed = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (start, end) in sentence_ranges(line) {
        current = match current {
            None => Some((start, end)),
            Some((cur_start, cur_end)) => {
                if memo.count(&line[cur_start..end])? <= max_tokens {
                    Some((cur_start, end))
                } else {
                    packed.push((cur_start, cur_end));
                    Some((start, end))
                }
            }
        };
    }

    if let Some(range) = current {
        packed.push(range);
    }
    Ok(packed)
}

/// Cuts `text` into pieces of at most `max_tokens` by prefix search.
///
/// For each piece the longest char prefix that fits is found by binary
/// search, then the cut moves back to the last whitespace within
/// `FORCE_SPLIT_LOOKBACK_CHARS` chars if there is one.
fn force_split<'a>(
    text: &'a str,
    max_tokens: usize,
    memo: &mut TokenMemo<'a>,
) -> Result<Vec<Piece<'a>>, ChunkingError> {
    let mut pieces = Vec::new();
    let mut offset = 0;

    while offset < text.len() {
        let rest = &text[offset..];
        if memo.count(rest)? <= max_tokens {
            pieces.push((offset, rest));
            break;
        }

        // Char boundaries of `rest`, excluding 0, ending with rest.len()
        let boundaries: Vec<usize> = rest
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(rest.len()))
            .collect();

        // Longest prefix that fits; always at least one char so we progress
        let mut lo = 0;
        let mut hi = boundaries.len() - 1;
        let mut best = 0;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if memo.count(&rest[..boundaries[mid]])? <= max_tokens {
                best = mid;
                lo = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                hi = mid - 1;
            }
        }
        let mut cut = boundaries[best];
        if best == 0 && memo.count(&rest[..cut])? > max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "max_tokens {} cannot hold the single character {:?}",
                max_tokens,
                &rest[..cut]
            )));
        }

        // Back off to whitespace so words are not split
        let window_start = rest[..cut]
            .char_indices()
            .rev()
            .nth(FORCE_SPLIT_LOOKBACK_CHARS.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        if let Some(ws) = rest[window_start..cut]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| window_start + i)
        {
            if ws > 0 && !rest[..ws].trim().is_empty() {
                cut = ws;
            }
        }

        pieces.push((offset, &rest[..cut]));
        offset += cut;
    }

    Ok(pieces)
}
