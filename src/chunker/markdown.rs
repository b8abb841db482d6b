//! Heading-aware markdown chunking.
//!
//! Markdown files are split at heading boundaries into sections of roughly
//! `target_lines` lines. When a section runs long without an intervening
//! heading, the boundary search falls back to the nearest blank line. Tiny
//! trailing sections merge upward when the combined text stays within
//! 1.5× the configured max chunk size.

use crate::config::ChunkingTuning;

/// One markdown section with its line span (0-indexed, end exclusive).
#[derive(Debug, Clone)]
pub struct MarkdownSection {
    pub title: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Split markdown content into heading-bounded sections.
pub fn split_markdown(content: &str, tuning: &ChunkingTuning) -> Vec<MarkdownSection> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut sections: Vec<MarkdownSection> = Vec::new();
    let mut start = 0usize;
    let mut title = first_heading(&lines).unwrap_or_default();
    let mut in_fence = false;

    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }

        let is_boundary = !in_fence && i > start && is_heading(line);
        let over_target = i - start >= tuning.markdown_target_lines;

        if is_boundary {
            push_section(&mut sections, &lines, start, i, &title);
            title = heading_text(line);
            start = i;
        } else if over_target && !in_fence {
            // No heading in sight: cut at the nearest blank line at or after
            // the target, searching a small window forward.
            let cut = (i..(i + 20).min(lines.len()))
                .find(|&j| lines[j].trim().is_empty())
                .unwrap_or(i);
            if cut > start {
                push_section(&mut sections, &lines, start, cut, &title);
                start = cut;
                i = cut;
            }
        }
        i += 1;
    }

    if start < lines.len() {
        push_section(&mut sections, &lines, start, lines.len(), &title);
    }

    merge_tiny_trailing(sections, tuning)
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') && trimmed.chars().take_while(|&c| c == '#').count() <= 6
}

fn heading_text(line: &str) -> String {
    line.trim_start().trim_start_matches('#').trim().to_string()
}

fn first_heading(lines: &[&str]) -> Option<String> {
    lines.iter().find(|l| is_heading(l)).map(|l| heading_text(l))
}

fn push_section(
    sections: &mut Vec<MarkdownSection>,
    lines: &[&str],
    start: usize,
    end: usize,
    title: &str,
) {
    let text = lines[start..end].join("\n");
    if text.trim().is_empty() {
        return;
    }
    sections.push(MarkdownSection {
        title: title.to_string(),
        text,
        start_line: start,
        end_line: end,
    });
}

/// Merge a tiny final section into its predecessor when the result stays
/// within 1.5× the max chunk size.
fn merge_tiny_trailing(
    mut sections: Vec<MarkdownSection>,
    tuning: &ChunkingTuning,
) -> Vec<MarkdownSection> {
    let tiny = tuning.max_chunk_size / 8;
    let ceiling = tuning.max_chunk_size + tuning.max_chunk_size / 2;

    if sections.len() >= 2 {
        let last = sections.last().unwrap();
        let prev = &sections[sections.len() - 2];
        if last.text.len() < tiny && prev.text.len() + last.text.len() + 1 <= ceiling {
            let last = sections.pop().unwrap();
            let prev = sections.last_mut().unwrap();
            prev.text.push('\n');
            prev.text.push_str(&last.text);
            prev.end_line = last.end_line;
        }
    }

    sections
}
