//! Document text helpers: frontmatter, titles and snippets.
//!
//! Chunk ranges are character offsets into the frontmatter-stripped body, so
//! indexing and snippet extraction must strip with the same function.

/// Split off a leading YAML frontmatter block.
///
/// Returns `(frontmatter, body)`. A document without a well-formed block
/// (opening `---` line followed by a closing `---` line) has no frontmatter.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let rest = match text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (None, text),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let frontmatter = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(frontmatter), body);
        }
        offset += line.len();
    }

    (None, text)
}

/// Body text with any frontmatter removed.
pub fn strip_frontmatter(text: &str) -> &str {
    split_frontmatter(text).1
}

/// Document title: frontmatter `title:` first, then the first `# ` heading.
pub fn extract_title(text: &str) -> Option<String> {
    let (frontmatter, body) = split_frontmatter(text);

    if let Some(fm) = frontmatter {
        for line in fm.lines() {
            if let Some(value) = line.strip_prefix("title:") {
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    body.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix("# "))
        .map(|heading| heading.trim().to_string())
        .filter(|heading| !heading.is_empty())
}

/// Number of characters (not bytes) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Extract a preview for a character range.
///
/// Whitespace runs collapse to single spaces and the result is capped at
/// `max_chars` characters, with an ellipsis when truncated. Out-of-range
/// offsets are clamped.
pub fn snippet(body: &str, start: usize, end: usize, max_chars: usize) -> String {
    let end = end.max(start);
    let raw: String = body.chars().skip(start).take(end - start).collect();
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if char_len(&collapsed) <= max_chars {
        return collapsed;
    }

    let mut truncated: String = collapsed.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontmatter_is_split() {
        let text = "---\ntitle: Notes\ntags: [a]\n---\n# Heading\nBody";
        let (fm, body) = split_frontmatter(text);
        assert_eq!(fm, Some("title: Notes\ntags: [a]\n"));
        assert_eq!(body, "# Heading\nBody");
    }

    #[test]
    fn test_unterminated_frontmatter_is_body() {
        let text = "---\ntitle: Notes\nno closing line";
        assert_eq!(split_frontmatter(text), (None, text));
        assert_eq!(strip_frontmatter("plain"), "plain");
    }

    #[test]
    fn test_title_prefers_frontmatter() {
        let text = "---\ntitle: \"From Frontmatter\"\n---\n# From Heading\n";
        assert_eq!(extract_title(text).as_deref(), Some("From Frontmatter"));
        assert_eq!(
            extract_title("intro\n# From Heading\n").as_deref(),
            Some("From Heading")
        );
        assert_eq!(extract_title("Rust is a systems language."), None);
    }

    #[test]
    fn test_snippet_uses_char_offsets() {
        let body = "héllo   wörld\nsecond line";
        assert_eq!(snippet(body, 0, 13, 100), "héllo wörld");
        assert_eq!(snippet(body, 9, 13, 100), "örld");
    }

    #[test]
    fn test_snippet_truncates_and_clamps() {
        let body = "abcdefghij";
        assert_eq!(snippet(body, 0, 10, 4), "abcd…");
        assert_eq!(snippet(body, 8, 50, 10), "ij");
        assert_eq!(snippet(body, 20, 30, 10), "");
    }
}
