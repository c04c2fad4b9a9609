//! Line-based, heading-aware chunker.

use super::split::split_oversized_line;
use super::token_memo::TokenMemo;
use super::types::{Chunk, ChunkerConfig};
use super::ChunkingStrategy;
use crate::config::MAX_HEADING_LEVEL;
use crate::embedding::TokenCounter;
use crate::error::ChunkingError;
use std::rc::Rc;
use tracing::{debug, instrument};

/// One line (or pre-split piece of a line) queued for packing.
struct Unit<'a> {
    text: &'a str,
    /// Byte offset of `text` in the source
    offset: usize,
    tokens: usize,
    headings: Rc<Vec<String>>,
}

/// Packs source lines into chunks of at most `max_tokens`.
///
/// # Algorithm
///
/// 1. Split the source into lines, tracking a heading stack (levels 1-3).
///    Lines over budget are pre-split by sentences, then by prefix search.
/// 2. Append lines to a buffer while both the summed line counts and the
///    count of the newline-joined text fit.
/// 3. When the next line would overflow, emit the buffer and seed the next
///    one with a contiguous tail of the emitted lines totalling at most
///    `overlap_tokens`, dropped from the front until the next line fits.
///    A buffer holding nothing but overlap is never emitted.
/// 4. Emit the tail if it holds new, non-blank content (and more than
///    `min_trailing_tokens` new tokens when that is set).
///
/// # Panics
///
/// Panics if an emitted chunk exceeds `max_tokens`. Splitting guarantees it
/// cannot, so a violation means the splitter is broken.
#[derive(Debug, Clone, Default)]
pub struct LineChunker {
    config: ChunkerConfig,
}

impl LineChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits the source into units with offsets, token counts and headings.
    fn collect_units<'a>(
        &self,
        text: &'a str,
        memo: &mut TokenMemo<'a>,
    ) -> Result<Vec<Unit<'a>>, ChunkingError> {
        let max_tokens = self.config.max_tokens;
        let mut units = Vec::new();
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut headings: Rc<Vec<String>> = Rc::new(Vec::new());

        let mut line_start = 0;
        for raw_line in text.split('\n') {
            let offset = line_start;
            line_start += raw_line.len() + 1;
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

            if let Some((level, heading)) = parse_heading(line) {
                stack.retain(|(l, _)| *l < level);
                stack.push((level, heading.to_string()));
                headings = Rc::new(stack.iter().map(|(_, h)| h.clone()).collect());
            }

            let tokens = memo.count(line)?;
            if tokens <= max_tokens {
                units.push(Unit {
                    text: line,
                    offset,
                    tokens,
                    headings: Rc::clone(&headings),
                });
                continue;
            }

            for (piece_offset, piece) in split_oversized_line(line, max_tokens, memo)? {
                units.push(Unit {
                    text: piece,
                    offset: offset + piece_offset,
                    tokens: memo.count(piece)?,
                    headings: Rc::clone(&headings),
                });
            }
        }

        Ok(units)
    }

    /// Builds a chunk from buffered units. Returns `None` for blank buffers.
    fn build_chunk(units: &[Unit<'_>], buffer: &[usize]) -> Option<Chunk> {
        let joined = buffer
            .iter()
            .map(|&i| units[i].text)
            .collect::<Vec<_>>()
            .join("\n");
        let content = joined.trim();
        if content.is_empty() {
            return None;
        }

        let first = buffer
            .iter()
            .map(|&i| &units[i])
            .find(|u| !u.text.trim().is_empty())?;
        let leading_ws = first.text.len() - first.text.trim_start().len();

        Some(Chunk {
            content: content.to_string(),
            headings: first.headings.as_ref().clone(),
            start_offset: first.offset + leading_ws,
        })
    }

    /// Whether `next` can join `buffer` without the joined text overflowing.
    ///
    /// Summed line counts undercount joined text for tokenizers that spend
    /// tokens on newlines, so a buffer that passes the sum is counted again
    /// as joined text.
    fn fits(
        &self,
        units: &[Unit<'_>],
        buffer: &[usize],
        next: usize,
        memo: &TokenMemo<'_>,
    ) -> Result<bool, ChunkingError> {
        let max_tokens = self.config.max_tokens;
        let summed = buffer.iter().map(|&b| units[b].tokens).sum::<usize>() + units[next].tokens;
        if summed > max_tokens {
            return Ok(false);
        }
        if buffer.is_empty() {
            return Ok(true);
        }
        let joined = buffer
            .iter()
            .chain(std::iter::once(&next))
            .map(|&i| units[i].text)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(memo.count_owned(joined.trim())? <= max_tokens)
    }

    /// Emits `buffer` as one chunk. Blank buffers emit nothing.
    fn emit(
        &self,
        units: &[Unit<'_>],
        buffer: &[usize],
        memo: &TokenMemo<'_>,
        chunks: &mut Vec<Chunk>,
    ) -> Result<(), ChunkingError> {
        let Some(chunk) = Self::build_chunk(units, buffer) else {
            return Ok(());
        };
        let tokens = memo.count_owned(&chunk.content)?;
        assert!(
            tokens <= self.config.max_tokens,
            "chunk of {} tokens exceeds max_tokens {}",
            tokens,
            self.config.max_tokens
        );
        chunks.push(chunk);
        Ok(())
    }

    /// Picks the overlap that seeds the buffer holding `next`.
    ///
    /// Walks back from the end of `emitted` while the overlap stays within
    /// `overlap_tokens`, stopping at the first line that does not fit. Then
    /// drops lines from the front until `next` fits alongside.
    fn select_overlap(
        &self,
        units: &[Unit<'_>],
        emitted: &[usize],
        next: usize,
        memo: &TokenMemo<'_>,
    ) -> Result<Vec<usize>, ChunkingError> {
        let mut overlap = Vec::new();
        let mut total = 0;
        for &i in emitted.iter().rev() {
            if total + units[i].tokens > self.config.overlap_tokens {
                break;
            }
            total += units[i].tokens;
            overlap.push(i);
        }
        overlap.reverse();

        loop {
            // Leading blank lines add nothing
            while overlap
                .first()
                .is_some_and(|&first| units[first].text.trim().is_empty())
            {
                overlap.remove(0);
            }
            if overlap.is_empty() || self.fits(units, &overlap, next, memo)? {
                return Ok(overlap);
            }
            overlap.remove(0);
        }
    }
}

impl ChunkingStrategy for LineChunker {
    #[instrument(skip_all, fields(text_len = text.len(), max_tokens = self.config.max_tokens))]
    fn chunk(&self, text: &str, counter: &dyn TokenCounter) -> Result<Vec<Chunk>, ChunkingError> {
        self.config.validate()?;

        let mut memo = TokenMemo::new(counter);
        let units = self.collect_units(text, &mut memo)?;

        let mut chunks = Vec::new();
        let mut buffer: Vec<usize> = Vec::new();
        // Tokens added since the buffer was seeded (overlap excluded)
        let mut fresh_tokens = 0;
        // Whether a non-blank line was added since the buffer was seeded
        let mut fresh_content = false;

        let mut i = 0;
        while i < units.len() {
            let unit = &units[i];
            if buffer.is_empty() || self.fits(&units, &buffer, i, &memo)? {
                buffer.push(i);
                fresh_tokens += unit.tokens;
                fresh_content |= !unit.text.trim().is_empty();
                i += 1;
                continue;
            }

            if !fresh_content {
                // Only overlap and blank lines so far: give up overlap instead
                // of repeating it as a chunk of its own
                buffer.remove(0);
                continue;
            }

            self.emit(&units, &buffer, &memo, &mut chunks)?;
            buffer = self.select_overlap(&units, &buffer, i, &memo)?;
            fresh_tokens = 0;
            fresh_content = false;
        }

        if fresh_content && fresh_tokens > self.config.min_trailing_tokens {
            self.emit(&units, &buffer, &memo, &mut chunks)?;
        }

        debug!(chunks = chunks.len(), units = units.len(), "Chunked text");
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "line"
    }

    fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }
}

/// Parses an ATX heading of level 1-3 (`# Title`, `## Title`, `### Title`).
///
/// Deeper headings and `#tags` without a following space are ordinary text.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > MAX_HEADING_LEVEL {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end();
    if title.is_empty() {
        return None;
    }
    Some((level, title))
}
