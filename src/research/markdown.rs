//! Markdown helpers for assembling report text.

use crate::research::state::Section;
use crate::search::Citation;

const MAX_HEADING_LEVEL: usize = 6;
const DETAIL_SUFFIX: &str = ": Detailed Analysis";

/// Level of an ATX heading line (`## Title` is 2), or `None`.
pub fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > MAX_HEADING_LEVEL {
        return None;
    }
    match trimmed[level..].chars().next() {
        None => Some(level),
        Some(c) if c.is_whitespace() => Some(level),
        Some(_) => None,
    }
}

/// Heading lines outside fenced code blocks, with their levels.
fn headings(content: &str) -> impl Iterator<Item = (usize, &str)> + '_ {
    let mut in_fence = false;
    content.lines().filter_map(move |line| {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            return None;
        }
        if in_fence {
            return None;
        }
        heading_level(line).map(|level| (level, line))
    })
}

/// Smallest heading level used in `content`, defaulting to 2.
pub fn main_heading_level(content: &str) -> usize {
    headings(content).map(|(level, _)| level).min().unwrap_or(2)
}

/// Shift every heading so the shallowest one sits at `top_level`, keeping
/// relative nesting. Levels are capped at 6.
pub fn normalize_headings(content: &str, top_level: usize) -> String {
    let Some(min_level) = headings(content).map(|(level, _)| level).min() else {
        return content.to_string();
    };
    let top_level = top_level.clamp(1, MAX_HEADING_LEVEL);

    let mut in_fence = false;
    content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            match heading_level(line) {
                Some(level) if !in_fence => {
                    let new_level = (level + top_level)
                        .saturating_sub(min_level)
                        .clamp(1, MAX_HEADING_LEVEL);
                    let text = line.trim_start()[level..].trim();
                    format!("{} {}", "#".repeat(new_level), text)
                }
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of "Detailed Analysis" headings already appended to a section.
pub fn count_detail_headings(content: &str, section_name: &str) -> usize {
    let prefix = format!("{}{}", section_name, DETAIL_SUFFIX);
    headings(content)
        .filter(|(level, line)| {
            let text = line.trim_start()[*level..].trim();
            text.starts_with(&prefix)
        })
        .count()
}

/// Heading for the `index`-th deep-research pass over a section (0-based):
/// the first is unnumbered, later ones are numbered from 2.
pub fn detail_heading(level: usize, index: usize, section_name: &str) -> String {
    let hashes = "#".repeat(level.clamp(1, MAX_HEADING_LEVEL));
    if index == 0 {
        format!("{} {}{}", hashes, section_name, DETAIL_SUFFIX)
    } else {
        format!("{} {}{} {}", hashes, section_name, DETAIL_SUFFIX, index + 1)
    }
}

/// Append one pass of subsections to a section body.
pub fn append_detail_pass(content: &str, section_name: &str, subsections: &[String]) -> String {
    let content = content.trim();
    let main_level = main_heading_level(content);
    let index = count_detail_headings(content, section_name);

    let body = subsections
        .iter()
        .map(|s| normalize_headings(s.trim(), main_level + 1))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}\n\n{}\n\n{}",
        content,
        detail_heading(main_level, index, section_name),
        body
    )
}

/// Drop a leading heading whose text is `title` (case-insensitive); the
/// report compiler adds its own.
pub fn strip_leading_heading(content: &str, title: &str) -> String {
    let content = content.trim();
    let mut lines = content.splitn(2, '\n');
    let first = lines.next().unwrap_or_default();
    match heading_level(first) {
        Some(level) if first.trim_start()[level..].trim().eq_ignore_ascii_case(title) => {
            lines.next().unwrap_or_default().trim().to_string()
        }
        _ => content.to_string(),
    }
}

/// Sections rendered for prompts that need the whole report as context.
pub fn format_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .enumerate()
        .map(|(i, section)| {
            format!(
                "{sep}\nSection {n}: {name}\n{sep}\nDescription:\n{description}\nContent:\n{content}\n",
                sep = "=".repeat(60),
                n = i + 1,
                name = section.name,
                description = section.description,
                content = if section.content.is_empty() {
                    "[Not yet written]"
                } else {
                    section.content.as_str()
                },
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Final document: introduction, sections in plan order, conclusion and the
/// numbered reference list, separated by blank lines.
pub fn compile_report(
    introduction: Option<&str>,
    sections: &[Section],
    conclusion: Option<&str>,
    references: &[Citation],
) -> String {
    let mut blocks = Vec::with_capacity(sections.len() + 3);

    if let Some(intro) = introduction.map(str::trim).filter(|s| !s.is_empty()) {
        blocks.push(format!("## Introduction\n\n{}", intro));
    }
    blocks.extend(
        sections
            .iter()
            .map(|s| s.content.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    );
    if let Some(conclusion) = conclusion.map(str::trim).filter(|s| !s.is_empty()) {
        blocks.push(format!("## Conclusion\n\n{}", conclusion));
    }
    if !references.is_empty() {
        let list = references
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(format!("## References\n\n{}", list));
    }

    blocks.join("\n\n")
}
