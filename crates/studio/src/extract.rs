use once_cell::sync::Lazy;
use regex::Regex;

/// First fenced block wins. The language tag is optional; untagged fences are accepted.
static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:tsx|jsx|html|xml|javascript|typescript|js|ts)?\s*(.*?)\s*```")
        .expect("fence pattern is valid")
});

/// Full documents are embedded by their `<body>` content only.
static BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<body[^>]*>(.*)</body>").expect("body pattern is valid")
});

/// Return the trimmed contents of the first fenced code block in `text`.
///
/// An unterminated fence (truncated output) or an empty block yields `None`,
/// so callers keep whatever preview they already have.
pub fn extract_code(text: &str) -> Option<String> {
    let code = FENCE.captures(text)?.get(1)?.as_str().trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

/// Markup to place inside the preview's root container.
pub fn body_markup(code: &str) -> &str {
    if !code.contains("<html") {
        return code;
    }
    BODY.captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_block() {
        let text = "Here you go:\n```html\n  <form>...</form>\n```\nEnjoy!";
        assert_eq!(extract_code(text).as_deref(), Some("<form>...</form>"));
    }

    #[test]
    fn test_inline_tag_without_newline() {
        let text = "```html<form>...</form>```";
        assert_eq!(extract_code(text).as_deref(), Some("<form>...</form>"));
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\n<div>hi</div>\n```";
        assert_eq!(extract_code(text).as_deref(), Some("<div>hi</div>"));
    }

    #[test]
    fn test_other_allowed_tags() {
        for tag in ["tsx", "jsx", "xml", "javascript", "typescript", "js", "ts"] {
            let text = format!("```{tag}\nconst a = 1;\n```");
            assert_eq!(extract_code(&text).as_deref(), Some("const a = 1;"), "tag {tag}");
        }
    }

    #[test]
    fn test_no_fence() {
        assert_eq!(extract_code("Sure, what would you like to build?"), None);
    }

    #[test]
    fn test_first_block_wins() {
        let text = "```html\n<p>one</p>\n```\nand\n```html\n<p>two</p>\n```";
        assert_eq!(extract_code(text).as_deref(), Some("<p>one</p>"));
    }

    #[test]
    fn test_unterminated_fence() {
        assert_eq!(extract_code("```html\n<div>partial"), None);
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(extract_code("``````"), None);
        assert_eq!(extract_code("```html\n\n```"), None);
    }

    #[test]
    fn test_body_markup_of_full_document() {
        let code = "<html><head><title>x</title></head><body class=\"p-4\"><h1>Hi</h1></body></html>";
        assert_eq!(body_markup(code), "<h1>Hi</h1>");
    }

    #[test]
    fn test_body_markup_of_fragment() {
        assert_eq!(body_markup("<h1>Hi</h1>"), "<h1>Hi</h1>");
        assert_eq!(body_markup("<html><p>no body</p></html>"), "<html><p>no body</p></html>");
    }
}
