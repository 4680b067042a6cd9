//! Citation markers
//!
//! Generators place provisional markers of the form `[n](url "title")`
//! right after each cited span, numbered per section. At assembly a
//! [`CitationRegistry`] walks the sections in order and rewrites them to
//! canonical `[^g]` markers numbered by first appearance of each URL in the
//! whole memo.

use dealmemo_common::llm::TextCitation;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn provisional_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[(\d+)\]\((\S+?) "([^"]*)"\)"#).expect("Invalid provisional marker pattern")
    })
}

/// A text insertion at a character offset
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    offset: usize,
    number: usize,
    text: String,
}

/// Insert provisional markers after each cited span.
///
/// Citations are numbered by first appearance in the text, deduplicated by
/// URL. Offsets are character positions; out-of-range offsets are clamped to
/// the end of the text.
pub fn insert_markers(source: &str, citations: &[TextCitation]) -> String {
    if citations.is_empty() {
        return source.to_string();
    }

    let char_len = source.chars().count();

    let mut ordered: Vec<&TextCitation> = citations.iter().filter(|c| !c.url.is_empty()).collect();
    ordered.sort_by_key(|c| (c.start, c.end));

    let mut numbers: HashMap<&str, usize> = HashMap::new();
    let mut edits: Vec<Edit> = Vec::new();

    for citation in ordered {
        let next = numbers.len() + 1;
        let number = *numbers.entry(citation.url.as_str()).or_insert(next);
        let offset = citation.end.min(char_len);

        // the same source annotated twice on one span
        if edits.iter().any(|e| e.offset == offset && e.number == number) {
            continue;
        }

        edits.push(Edit {
            offset,
            number,
            text: format!("[{}]({} \"{}\")", number, citation.url, clean_title(&citation.title)),
        });
    }

    // apply from the end so earlier offsets stay valid
    edits.sort_by(|a, b| b.offset.cmp(&a.offset).then(b.number.cmp(&a.number)));

    let byte_offsets: Vec<usize> = source
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(source.len()))
        .collect();

    let mut out = source.to_string();
    for edit in edits {
        out.insert_str(byte_offsets[edit.offset], &edit.text);
    }
    out
}

fn clean_title(title: &str) -> String {
    title.replace('"', "'").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A source cited somewhere in the memo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub number: usize,
    pub url: String,
    pub title: String,
}

/// Memo-wide citation numbering, in first-seen order
#[derive(Debug, Default)]
pub struct CitationRegistry {
    sources: Vec<Source>,
    by_url: HashMap<String, usize>,
}

impl CitationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite every provisional marker in `content` to its global `[^g]` form
    pub fn renumber(&mut self, content: &str) -> String {
        provisional_marker()
            .replace_all(content, |caps: &regex_lite::Captures<'_>| {
                let number = self.register(&caps[2], &caps[3]);
                format!("[^{}]", number)
            })
            .into_owned()
    }

    fn register(&mut self, url: &str, title: &str) -> usize {
        if let Some(&number) = self.by_url.get(url) {
            return number;
        }

        let number = self.sources.len() + 1;
        self.by_url.insert(url.to_string(), number);
        self.sources.push(Source {
            number,
            url: url.to_string(),
            title: if title.trim().is_empty() { url.to_string() } else { title.to_string() },
        });
        number
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Footnote definitions, one line per source
    pub fn definitions(&self) -> String {
        self.sources
            .iter()
            .map(|s| format!("[^{}]: [{}]({})", s.number, s.title.replace(['[', ']'], ""), s.url))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(url: &str, title: &str, start: usize, end: usize) -> TextCitation {
        TextCitation {
            url: url.into(),
            title: title.into(),
            start,
            end,
        }
    }

    #[test]
    fn test_markers_follow_cited_spans() {
        let text = "Market is large. Growth is fast.";
        let citations = vec![
            cite("https://b.example", "B", 17, 32),
            cite("https://a.example", "A", 0, 16),
        ];

        let out = insert_markers(text, &citations);

        assert_eq!(
            out,
            "Market is large.[1](https://a.example \"A\") Growth is fast.[2](https://b.example \"B\")"
        );
    }

    #[test]
    fn test_same_url_reuses_number() {
        let text = "One. Two.";
        let citations = vec![
            cite("https://a.example", "A", 0, 4),
            cite("https://a.example", "A", 5, 9),
        ];

        let out = insert_markers(text, &citations);

        assert_eq!(out.matches("[1](").count(), 2);
        assert!(!out.contains("[2]("));
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let text = "Café growth € strong";
        let citations = vec![cite("https://a.example", "A", 0, 4)];

        let out = insert_markers(text, &citations);

        assert!(out.starts_with("Café[1](https://a.example \"A\") growth"));
    }

    #[test]
    fn test_out_of_range_offset_clamps() {
        let out = insert_markers("abc", &[cite("https://a.example", "A \"quoted\"", 0, 99)]);
        assert_eq!(out, "abc[1](https://a.example \"A 'quoted'\")");
    }

    #[test]
    fn test_registry_numbers_across_sections() {
        let mut registry = CitationRegistry::new();

        let first = registry.renumber("x[1](https://b.example \"B\") y[2](https://a.example \"A\")");
        let second = registry.renumber("z[1](https://a.example \"A\") w[2](https://c.example \"C\")");

        assert_eq!(first, "x[^1] y[^2]");
        assert_eq!(second, "z[^2] w[^3]");
        assert_eq!(registry.sources().len(), 3);
        assert_eq!(
            registry.definitions(),
            "[^1]: [B](https://b.example)\n[^2]: [A](https://a.example)\n[^3]: [C](https://c.example)"
        );
    }

    #[test]
    fn test_registry_ignores_plain_links() {
        let mut registry = CitationRegistry::new();
        let out = registry.renumber("See [docs](https://docs.example) and [3](https://x.example).");
        assert_eq!(out, "See [docs](https://docs.example) and [3](https://x.example).");
        assert!(registry.is_empty());
    }
}
