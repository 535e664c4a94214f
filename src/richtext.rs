use once_cell::sync::Lazy;
use regex::Regex;

static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#[^\n]*\n").expect("valid header pattern"));

// The only entities policy editors actually emit; everything else stays
// encoded. Order matters: `&amp;` must decode first so `&amp;lt;` ends up
// as `<` the same way the console did it.
const ENTITIES: [(&str, &str); 6] = [
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#039;", "'"),
    ("&nbsp;", " "),
];

pub const EXCERPT_CHARS: usize = 120;

/// Reduces policy markup to plain text for preview cards: tags removed,
/// a fixed set of entities decoded, the first Markdown header line
/// dropped, surrounding whitespace trimmed.
///
/// This is presentation plumbing, not a sanitizer; never use it to make
/// untrusted content safe for embedding.
pub fn strip_markup(content: &str) -> String {
    let without_tags = MARKUP_TAG.replace_all(content, "");

    let mut decoded = without_tags.into_owned();
    for (entity, replacement) in ENTITIES {
        decoded = decoded.replace(entity, replacement);
    }

    HEADER_LINE.replace(&decoded, "").trim().to_string()
}

/// Derives the preview excerpt shown on cards: the stripped text cut at
/// 120 characters, with `"..."` appended when the *pre-strip* content ran
/// past 120 characters. The length check against the raw content mirrors
/// the shipped console behavior and is kept on purpose.
pub fn excerpt(content: &str) -> String {
    let stripped = strip_markup(content);
    let mut preview: String = stripped.chars().take(EXCERPT_CHARS).collect();
    if content.chars().count() > EXCERPT_CHARS {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_decodes_entities() {
        assert_eq!(
            strip_markup("# Title\n<p>Hello &amp; welcome</p>"),
            "Hello & welcome"
        );
        // An HTML heading is only tag-stripped; its text stays. Only a
        // Markdown header line is dropped wholesale.
        assert_eq!(
            strip_markup("<h1>Title</h1><p>Hello &amp; welcome</p>"),
            "TitleHello & welcome"
        );
    }

    #[test]
    fn decodes_only_the_known_entities() {
        assert_eq!(
            strip_markup("&lt;tag&gt; &quot;x&quot; &#039;y&#039;&nbsp;z"),
            "<tag> \"x\" 'y' z"
        );
        assert_eq!(strip_markup("&copy; &hellip;"), "&copy; &hellip;");
    }

    #[test]
    fn removes_only_the_first_header_line() {
        assert_eq!(
            strip_markup("# One\nbody\n# Two\nmore"),
            "body\n# Two\nmore"
        );
    }

    #[test]
    fn trailing_header_without_newline_survives() {
        assert_eq!(strip_markup("# Title only"), "# Title only");
    }

    #[test]
    fn stripping_is_idempotent() {
        let inputs = [
            "<h1>Access Policy</h1><p>All access &amp; review</p>\n",
            "plain text, no markup",
            "# Header\ncontent",
        ];
        for input in inputs {
            let once = strip_markup(input);
            assert_eq!(strip_markup(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn excerpt_truncates_and_marks_long_content() {
        let body = "x".repeat(200);
        let content = format!("<p>{body}</p>");
        let preview = excerpt(&content);
        assert_eq!(preview.chars().count(), EXCERPT_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn excerpt_leaves_short_content_alone() {
        assert_eq!(excerpt("<p>short</p>"), "short");
    }

    #[test]
    fn excerpt_ellipsis_follows_the_raw_length() {
        // 40 characters of text wrapped in enough markup to push the raw
        // content past 120: the stripped preview is short, the ellipsis
        // still appears because the check runs against the raw string.
        let content = format!("<div class=\"{}\">{}</div>", "c".repeat(100), "t".repeat(40));
        let preview = excerpt(&content);
        assert_eq!(preview, format!("{}...", "t".repeat(40)));
    }

    #[test]
    fn excerpt_respects_character_boundaries() {
        let content = "é".repeat(150);
        let preview = excerpt(&content);
        assert_eq!(preview.chars().count(), EXCERPT_CHARS + 3);
    }
}
