//! HTML sanitization for untrusted syndicated-feed content.
//!
//! Feed items come from untrusted upstreams and the sanitised body/summary
//! are exposed to downstream consumers, so the policy strips `<script>`
//! elements and inline event-handler attributes while preserving the
//! formatting a syndicated article actually needs: text, inline emphasis,
//! lists, links, and images. Built on `ammonia`, the
//! allowlist-based sanitizer the wider Rust ecosystem reaches for instead
//! of hand-rolling an HTML parser.

use std::collections::HashSet;

use once_cell::sync::Lazy;

static ALLOWED_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "p", "br", "b", "strong", "i", "em", "u", "s", "blockquote", "code", "pre", "ul", "ol",
        "li", "a", "img", "h1", "h2", "h3", "h4", "h5", "h6", "span", "div",
    ]
    .into_iter()
    .collect()
});

static SANITIZER: Lazy<ammonia::Builder<'static>> = Lazy::new(|| {
    let mut builder = ammonia::Builder::default();
    builder
        .tags(ALLOWED_TAGS.clone())
        .link_rel(Some("noopener noreferrer nofollow"))
        .add_generic_attributes(&["class"])
        .add_tag_attributes("a", &["href", "title"])
        .add_tag_attributes("img", &["src", "alt", "title", "width", "height"]);
    builder
});

/// Sanitise a body or summary field per the feed collector's content
/// policy. Safe to call with empty input.
pub fn sanitize_html(input: &str) -> String {
    SANITIZER.clean(input).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let out = sanitize_html("<p>hi</p><script>alert(1)</script>");
        assert_eq!(out, "<p>hi</p>");
        assert!(!out.contains("<script"));
    }

    #[test]
    fn strips_inline_event_handlers() {
        let out = sanitize_html(r#"<a href="https://x" onclick="evil()">link</a>"#);
        assert!(!out.contains("onclick"));
        assert!(out.contains("href"));
    }

    #[test]
    fn preserves_lists_links_and_images() {
        let input = r#"<ul><li>one</li><li>two</li></ul><a href="https://x/a">a</a><img src="https://x/b.png" alt="b">"#;
        let out = sanitize_html(input);
        assert!(out.contains("<ul>"));
        assert!(out.contains("<li>"));
        assert!(out.contains("href=\"https://x/a\""));
        assert!(out.contains("<img"));
    }

    #[test]
    fn drops_unknown_elements_but_keeps_text() {
        let out = sanitize_html("<marquee>hello</marquee>");
        assert!(!out.contains("<marquee"));
        assert!(out.contains("hello"));
    }

    #[test]
    fn empty_input_is_fine() {
        assert_eq!(sanitize_html(""), "");
    }
}
