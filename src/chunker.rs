//! Markdown chunker and code-block extractor.
//!
//! Splits page markdown into chunks that respect a configurable target size.
//! Split points are chosen in preference order: H1–H3 header lines near the
//! target, then paragraph boundaries, then sentence boundaries, then a hard
//! cut. A split never lands inside a fenced code block. Each chunk carries the
//! header path active at its start and overlaps its predecessor by a fixed
//! number of characters.
//!
//! Both entry points are pure functions: same input, same output.

/// One chunk of a page, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    /// Header trail active at the chunk start, e.g. `"Guide > Install"`.
    pub header_path: String,
    pub word_count: usize,
}

/// A fenced code block lifted out of page markdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCode {
    pub code: String,
    pub language: Option<String>,
    pub context_before: String,
    pub context_after: String,
}

/// Fraction of the target size within which a header split is preferred.
const HEADER_SLACK: f64 = 0.15;

/// Split markdown into chunks of roughly `size` characters with `overlap`
/// characters carried forward between consecutive chunks.
///
/// Returns chunks in document order; the caller assigns contiguous indices
/// from the vector positions. Whitespace-only input yields no chunks.
pub fn smart_chunk(text: &str, size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let size = size.max(1);
    let overlap = overlap.min(size.saturating_sub(1));

    let lines = scan_lines(text);
    let fences = fence_ranges(&lines, text.len());

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let header_path = header_path_at(&lines, start);

        if text.len() - start <= size {
            push_chunk(&mut chunks, &text[start..], header_path);
            break;
        }

        let target = start + size;
        let end = choose_split(text, &lines, &fences, start, target, size);

        push_chunk(&mut chunks, &text[start..end], header_path);

        if end >= text.len() {
            break;
        }

        // Carry `overlap` characters forward, staying on a char boundary and
        // always making progress.
        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    chunks
}

/// Extract every fenced code block with body length >= `min_chars`, together
/// with up to `context_chars` of the text immediately before and after it.
pub fn extract_code_blocks(text: &str, min_chars: usize, context_chars: usize) -> Vec<ExtractedCode> {
    let lines = scan_lines(text);
    let mut blocks = Vec::new();

    let mut open: Option<(usize, usize, Option<String>)> = None; // (fence start, body start, lang)
    for line in &lines {
        if !line.is_fence_delim {
            continue;
        }
        match open.take() {
            None => {
                let lang = line.fence_lang.clone();
                open = Some((line.start, line.end, lang));
            }
            Some((fence_start, body_start, lang)) => {
                let body_end = line.start;
                let code = text[body_start..body_end].trim_end_matches('\n');
                if code.len() >= min_chars {
                    let before_start = floor_char_boundary(text, fence_start.saturating_sub(context_chars));
                    let after_end = ceil_char_boundary(text, (line.end + context_chars).min(text.len()));
                    blocks.push(ExtractedCode {
                        code: code.to_string(),
                        language: lang,
                        context_before: text[before_start..fence_start].trim().to_string(),
                        context_after: text[line.end.min(text.len())..after_end].trim().to_string(),
                    });
                }
            }
        }
    }

    blocks
}

// ============ Internals ============

#[derive(Debug)]
struct LineInfo {
    start: usize,
    /// End of the line including its newline.
    end: usize,
    /// Header level 1-3 with title, outside fences only.
    header: Option<(u8, String)>,
    is_blank: bool,
    is_fence_delim: bool,
    fence_lang: Option<String>,
    /// True when the line sits inside an open fence (delimiters included).
    in_fence: bool,
}

fn scan_lines(text: &str) -> Vec<LineInfo> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    let mut in_fence = false;

    for raw in text.split_inclusive('\n') {
        let start = offset;
        let end = offset + raw.len();
        offset = end;

        let trimmed = raw.trim_end_matches('\n').trim_start();
        let is_fence_delim = trimmed.starts_with("```");
        let fence_lang = if is_fence_delim && !in_fence {
            let tag = trimmed.trim_start_matches('`').trim();
            if tag.is_empty() {
                None
            } else {
                Some(tag.to_string())
            }
        } else {
            None
        };

        let line_in_fence = in_fence || is_fence_delim;
        if is_fence_delim {
            in_fence = !in_fence;
        }

        let header = if !line_in_fence {
            parse_header(trimmed)
        } else {
            None
        };

        lines.push(LineInfo {
            start,
            end,
            header,
            is_blank: trimmed.is_empty(),
            is_fence_delim,
            fence_lang,
            in_fence: line_in_fence,
        });
    }

    // Text without a trailing newline still produces a final line above via
    // split_inclusive; nothing more to do.
    lines
}

fn parse_header(line: &str) -> Option<(u8, String)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 3 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes as u8, rest.trim().to_string()))
}

/// Byte ranges covered by fenced code blocks, delimiter lines included.
/// An unclosed fence runs to the end of the text.
fn fence_ranges(lines: &[LineInfo], text_len: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    for line in lines {
        if line.is_fence_delim {
            match open.take() {
                None => open = Some(line.start),
                Some(s) => ranges.push((s, line.end)),
            }
        }
    }
    if let Some(s) = open {
        ranges.push((s, text_len));
    }
    ranges
}

fn inside_fence(fences: &[(usize, usize)], offset: usize) -> Option<(usize, usize)> {
    fences
        .iter()
        .copied()
        .find(|&(s, e)| offset > s && offset < e)
}

/// Pick the split offset for a chunk starting at `start` aiming for `target`.
fn choose_split(
    text: &str,
    lines: &[LineInfo],
    fences: &[(usize, usize)],
    start: usize,
    target: usize,
    size: usize,
) -> usize {
    let slack = (size as f64 * HEADER_SLACK) as usize;
    let window_lo = target.saturating_sub(slack).max(start + 1);
    let window_hi = (target + slack).min(text.len());

    // 1. Header line closest to the target within the slack window.
    let mut best_header: Option<usize> = None;
    for line in lines {
        if line.header.is_none() || line.start <= start {
            continue;
        }
        if line.start < window_lo {
            continue;
        }
        if line.start > window_hi {
            break;
        }
        let better = match best_header {
            None => true,
            Some(b) => line.start.abs_diff(target) < b.abs_diff(target),
        };
        if better {
            best_header = Some(line.start);
        }
    }
    if let Some(h) = best_header {
        return h;
    }

    let floor = start + size / 2;

    // 2. Last paragraph boundary (blank line) at or before the target.
    let mut best_para: Option<usize> = None;
    for line in lines {
        if line.start <= start || line.start > target {
            continue;
        }
        if line.is_blank && !line.in_fence && line.start >= floor {
            best_para = Some(line.start);
        }
    }
    if let Some(p) = best_para {
        return p;
    }

    // 3. Last sentence boundary at or before the target.
    if let Some(s) = sentence_boundary(text, fences, floor, target) {
        return s;
    }

    // 4. Hard cut at the target, nudged off fence interiors and char
    //    boundaries. Prefer cutting before the fence when that keeps the
    //    chunk non-trivial, otherwise extend past it.
    let mut cut = target;
    if let Some((fs, fe)) = inside_fence(fences, cut) {
        cut = if fs > floor { fs } else { fe.min(text.len()) };
    }
    cut = cut.clamp(start + 1, text.len());
    while cut < text.len() && !text.is_char_boundary(cut) {
        cut += 1;
    }
    cut
}

fn sentence_boundary(
    text: &str,
    fences: &[(usize, usize)],
    floor: usize,
    target: usize,
) -> Option<usize> {
    let hi = ceil_char_boundary(text, target.min(text.len()));
    let lo = floor_char_boundary(text, floor.min(hi));
    let window = &text[lo..hi];

    let mut best: Option<usize> = None;
    for (i, _) in window.match_indices(['.', '!', '?']) {
        let abs = lo + i + 1;
        // Boundary only when followed by whitespace.
        if !text[abs..].starts_with([' ', '\n']) {
            continue;
        }
        let split = abs + 1;
        if inside_fence(fences, split).is_none() {
            best = Some(split);
        }
    }
    best
}

fn header_path_at(lines: &[LineInfo], offset: usize) -> String {
    let mut stack: Vec<(u8, String)> = Vec::new();
    for line in lines {
        // A header exactly at the chunk start belongs to the chunk.
        if line.start > offset {
            break;
        }
        if let Some((level, ref title)) = line.header {
            stack.retain(|&(l, _)| l < level);
            stack.push((level, title.clone()));
        }
    }
    stack
        .iter()
        .map(|(_, t)| t.as_str())
        .collect::<Vec<_>>()
        .join(" > ")
}

fn push_chunk(chunks: &mut Vec<TextChunk>, content: &str, header_path: String) {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return;
    }
    chunks.push(TextChunk {
        content: trimmed.to_string(),
        word_count: trimmed.split_whitespace().count(),
        header_path,
    });
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = smart_chunk("# Title\n\nHello world.", 5000, 200);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("Hello world."));
        assert_eq!(chunks[0].word_count, 4);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(smart_chunk("", 5000, 200).is_empty());
        assert!(smart_chunk("   \n\n  ", 5000, 200).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = (0..40)
            .map(|i| format!("## Section {}\n\nBody paragraph number {}.", i, i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let a = smart_chunk(&text, 300, 40);
        let b = smart_chunk(&text, 300, 40);
        assert_eq!(a, b);
    }

    #[test]
    fn test_prefers_header_boundaries() {
        let section = format!("## Part\n\n{}\n\n", "word ".repeat(50));
        let text = section.repeat(8);
        let chunks = smart_chunk(&text, 300, 0);
        assert!(chunks.len() > 1);
        // Interior chunks should begin at a header line.
        for c in &chunks[1..] {
            assert!(
                c.content.starts_with("## Part"),
                "chunk did not start at header: {:?}",
                &c.content[..40.min(c.content.len())]
            );
        }
    }

    #[test]
    fn test_never_splits_inside_fence() {
        let code = format!("```python\n{}\n```", "x = 1\n".repeat(120));
        let text = format!("Intro paragraph.\n\n{}\n\nOutro paragraph.", code);
        let chunks = smart_chunk(&text, 300, 0);
        // The fence is larger than the target: exactly one chunk holds the
        // opening delimiter, and that same chunk holds the closing one.
        let with_open: Vec<_> = chunks
            .iter()
            .filter(|c| c.content.contains("```python"))
            .collect();
        assert_eq!(with_open.len(), 1);
        assert!(with_open[0].content.matches("```").count() >= 2);
    }

    #[test]
    fn test_overlap_carried_forward() {
        let text = "alpha ".repeat(200);
        let chunks = smart_chunk(&text, 300, 60);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].content.chars().rev().take(20).collect();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].content.contains(tail.trim()),
                "no overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn test_header_path_tracks_nesting() {
        let body = "text ".repeat(80);
        let text = format!(
            "# Guide\n\n{}\n\n## Install\n\n{}\n\n## Usage\n\n{}",
            body, body, body
        );
        let chunks = smart_chunk(&text, 400, 0);
        assert!(chunks.iter().any(|c| c.header_path.contains("Guide")));
        let last = chunks.last().unwrap();
        assert!(
            last.header_path == "Guide > Usage" || last.header_path == "Guide > Install",
            "unexpected header path: {}",
            last.header_path
        );
    }

    #[test]
    fn test_extract_code_blocks_min_length() {
        let long_code = "fn main() {}\n".repeat(30);
        let text = format!(
            "Before text.\n\n```rust\n{}```\n\nAfter text.\n\n```\nshort\n```\n",
            long_code
        );
        let blocks = extract_code_blocks(&text, 300, 100);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("rust"));
        assert!(blocks[0].context_before.contains("Before text."));
        assert!(blocks[0].context_after.contains("After text."));
    }

    #[test]
    fn test_extract_code_blocks_no_language() {
        let body = "select 1;\n".repeat(40);
        let text = format!("```\n{}```\n", body);
        let blocks = extract_code_blocks(&text, 300, 50);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].language.is_none());
    }

    #[test]
    fn test_unclosed_fence_yields_nothing() {
        let text = format!("```python\n{}", "x = 1\n".repeat(100));
        assert!(extract_code_blocks(&text, 300, 50).is_empty());
    }
}
