//! Markdown normalization applied to section content at assembly
//!
//! [`normalize_section`] runs the transforms in a fixed order; each one
//! assumes the ones before it already ran.

use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect(concat!("Invalid pattern: ", stringify!($name))))
        }
    };
}

pattern!(list_item, r"^\s*(?:[-*+•]|\d+[.)])\s+");
pattern!(figure, r"\$\d+(?:,\d{3})*(?:\.\d+)?([A-Za-z]*)|\b\d+(?:\.\d+)?%");
pattern!(sup_marker, r"<sup>\s*([\[\]\^\d,\s]*?)\s*</sup>");
pattern!(bare_marker, r"\[(\d{1,3}(?:\s*,\s*\d{1,3})*)\]");
pattern!(citation_label, r"^\^?\d{1,3}(?:\s*,\s*\d{1,3})*$");
pattern!(footnote, r"[ \t]*\[\^\d{1,3}\]");
pattern!(digits, r"\d{1,3}");
pattern!(blank_runs, r"\n(?:[ \t]*\n){2,}");

const LABEL_MAX_CHARS: usize = 60;

/// Run every section transform in order
pub fn normalize_section(content: &str, title: &str) -> String {
    let content = strip_duplicate_title(content, title);
    let content = space_lists(&content);
    let content = bold_labels(&content);
    let content = bold_figures(&content);
    let content = canonicalize_citations(&content);
    collapse_blank_lines(&content)
}

/// Drop a leading line that just repeats the section title
pub fn strip_duplicate_title(content: &str, title: &str) -> String {
    let trimmed = content.trim_start_matches(['\n', '\r']);
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));

    let normalized = first
        .trim()
        .trim_start_matches('#')
        .replace('*', "")
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string();

    if normalized.eq_ignore_ascii_case(title) {
        rest.trim_start_matches(['\n', '\r']).to_string()
    } else {
        content.to_string()
    }
}

/// Ensure a blank line precedes every run of list items
pub fn space_lists(content: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous: Option<&str> = None;

    for line in content.lines() {
        if list_item().is_match(line) {
            if let Some(prev) = previous {
                if !prev.trim().is_empty() && !list_item().is_match(prev) {
                    out.push("");
                }
            }
        }
        out.push(line);
        previous = Some(line);
    }

    out.join("\n")
}

/// Wrap short `Label:` lines in bold
pub fn bold_labels(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if is_label(trimmed) {
                format!("**{}**", trimmed)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_label(line: &str) -> bool {
    line.ends_with(':')
        && line.chars().count() <= LABEL_MAX_CHARS
        && line.chars().next().is_some_and(|c| c.is_uppercase())
        && !line.contains(['*', '#', '|', '>', '[', '`'])
        && !list_item().is_match(line)
}

/// Bold currency amounts and percentages outside existing bold spans
pub fn bold_figures(content: &str) -> String {
    content
        .split("**")
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 1 {
                return segment.to_string();
            }
            figure()
                .replace_all(segment, |caps: &Captures<'_>| {
                    let suffix = caps.get(1).map_or("", |m| m.as_str());
                    if matches!(suffix, "" | "M" | "B" | "K") {
                        format!("**{}**", &caps[0])
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned()
        })
        .collect::<Vec<_>>()
        .join("**")
}

/// Rewrite `<sup>` wrapped and bare bracket numbers to `[^n]`.
///
/// Idempotent: canonical markers are never matched again.
pub fn canonicalize_citations(content: &str) -> String {
    let content = canonicalize_sup_markers(content);

    let mut out = String::with_capacity(content.len());
    let mut last = 0;

    for caps in bare_marker().captures_iter(&content) {
        let Some(whole) = caps.get(0) else { continue };
        let rest = &content[whole.end()..];

        // markdown links and reference definitions keep their brackets
        if rest.starts_with('(') || rest.starts_with(':') || follows_link_text(&content[..whole.start()]) {
            continue;
        }

        out.push_str(&content[last..whole.start()]);
        out.push_str(&footnotes(&caps[1]));
        last = whole.end();
    }

    out.push_str(&content[last..]);
    out
}

/// `[text][3]` is a reference link, `[^2][3]` and `[1][2]` are citations
fn follows_link_text(prefix: &str) -> bool {
    prefix
        .strip_suffix(']')
        .and_then(|p| p.rfind('[').map(|i| &p[i + 1..]))
        .is_some_and(|label| !citation_label().is_match(label))
}

/// Remove citation markers the model wrote without a source annotation.
///
/// Run on raw section text before renumbering so that only markers backed
/// by a registered source reach the footnote namespace.
pub fn strip_unsourced_citations(content: &str) -> String {
    let canonical = canonicalize_citations(content);
    footnote().replace_all(&canonical, "").into_owned()
}

/// Rewrite only `<sup>` wrapped markers; safe on a whole document
pub fn canonicalize_sup_markers(content: &str) -> String {
    sup_marker()
        .replace_all(content, |caps: &Captures<'_>| {
            let rendered = footnotes(&caps[1]);
            if rendered.is_empty() {
                caps[0].to_string()
            } else {
                rendered
            }
        })
        .into_owned()
}

fn footnotes(numbers: &str) -> String {
    digits()
        .find_iter(numbers)
        .map(|m| format!("[^{}]", m.as_str()))
        .collect()
}

/// Squeeze runs of blank lines down to one and trim the ends
pub fn collapse_blank_lines(content: &str) -> String {
    blank_runs().replace_all(content, "\n\n").trim().to_string()
}
