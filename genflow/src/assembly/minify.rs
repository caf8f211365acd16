//! Conservative markup minification.
//!
//! Structured data (`application/ld+json` and other non-script `<script>`
//! types), `<pre>` and `<textarea>` blocks are copied byte-for-byte.
//! Executable scripts only lose their leading and trailing blank lines. `<style>`
//! bodies are minified. Elsewhere comments are stripped (except the first
//! one carrying the metadata marker) and whitespace runs collapse.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PROTECTED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)(<script\b[^>]*>)(.*?)(</script\s*>)|(<style\b[^>]*>)(.*?)(</style\s*>)|<pre\b[^>]*>.*?</pre\s*>|<textarea\b[^>]*>.*?</textarea\s*>",
    )
    .unwrap_or_else(|e| unreachable!("block pattern: {e}"))
});

pub(super) static COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--(.*?)-->").unwrap_or_else(|e| unreachable!("comment pattern: {e}"))
});

static SCRIPT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btype\s*=\s*["']?([^"'\s>]+)"#)
        .unwrap_or_else(|e| unreachable!("script type pattern: {e}"))
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap_or_else(|e| unreachable!("whitespace pattern: {e}")));

static BETWEEN_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r">[ \t]*\n\s*(<|\z)").unwrap_or_else(|e| unreachable!("between tags pattern: {e}"))
});

static LEADING_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A[ \t]*\n\s*(<|\z)").unwrap_or_else(|e| unreachable!("leading break pattern: {e}"))
});

static CSS_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)/\*.*?\*/").unwrap_or_else(|e| unreachable!("css comment pattern: {e}"))
});

static CSS_PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*([{};,])\s*").unwrap_or_else(|e| unreachable!("css punctuation pattern: {e}"))
});

const EXECUTABLE_SCRIPT_TYPES: &[&str] = &[
    "text/javascript",
    "application/javascript",
    "module",
    "text/ecmascript",
    "application/ecmascript",
];

/// Minifies `document`, keeping the first comment whose body starts with `metadata_marker`.
#[must_use]
pub fn minify_document(document: &str, metadata_marker: &str) -> String {
    let mut out = String::with_capacity(document.len());
    let mut kept_metadata = false;
    let mut cursor = 0;

    for caps in PROTECTED_BLOCK.captures_iter(document) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&minify_markup(
            &document[cursor..whole.start()],
            metadata_marker,
            &mut kept_metadata,
        ));
        out.push_str(&minify_block(&caps));
        cursor = whole.end();
    }
    out.push_str(&minify_markup(
        &document[cursor..],
        metadata_marker,
        &mut kept_metadata,
    ));

    out.trim().to_string()
}

fn minify_block(caps: &Captures<'_>) -> String {
    if let (Some(open), Some(body), Some(close)) = (caps.get(1), caps.get(2), caps.get(3)) {
        if is_executable_script(open.as_str()) {
            return format!("{}{}{}", open.as_str(), minify_script(body.as_str()), close.as_str());
        }
        return caps[0].to_string();
    }
    if let (Some(open), Some(body), Some(close)) = (caps.get(4), caps.get(5), caps.get(6)) {
        return format!("{}{}{}", open.as_str(), minify_css(body.as_str()), close.as_str());
    }
    caps[0].to_string()
}

fn is_executable_script(open_tag: &str) -> bool {
    SCRIPT_TYPE.captures(open_tag).map_or(true, |caps| {
        let kind = caps[1].to_ascii_lowercase();
        EXECUTABLE_SCRIPT_TYPES.contains(&kind.as_str())
    })
}

fn minify_markup(text: &str, metadata_marker: &str, kept_metadata: &mut bool) -> String {
    let without_comments = COMMENT.replace_all(text, |caps: &Captures<'_>| {
        let body = caps[1].trim_start();
        if !*kept_metadata && !metadata_marker.is_empty() && body.starts_with(metadata_marker) {
            *kept_metadata = true;
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    let joined = BETWEEN_TAGS.replace_all(&without_comments, ">$1");
    let joined = LEADING_BREAK.replace(&joined, "$1");
    WHITESPACE.replace_all(&joined, " ").into_owned()
}

/// Removes comments and insignificant whitespace from a stylesheet.
#[must_use]
pub fn minify_css(css: &str) -> String {
    let without_comments = CSS_COMMENT.replace_all(css, "");
    let collapsed = WHITESPACE.replace_all(&without_comments, " ");
    let tight = CSS_PUNCTUATION.replace_all(&collapsed, "$1");
    tight.replace(";}", "}").trim().to_string()
}

/// Strips blank lines around a script body; the body itself is untouched
/// since string and template literals may span lines.
fn minify_script(script: &str) -> &str {
    let end = script.trim_end().len();
    let start = script
        .find(|c: char| !c.is_whitespace())
        .map_or(end, |first| script[..first].rfind('\n').map_or(0, |newline| newline + 1));
    &script[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collapses_whitespace_and_strips_comments() {
        let doc = "<html>\n  <body>\n    <!-- layout note -->\n    <p>Hello   <b>world</b></p>\n  </body>\n</html>\n";
        assert_eq!(
            minify_document(doc, "genflow:"),
            "<html><body><p>Hello <b>world</b></p></body></html>"
        );
    }

    #[test]
    fn test_keeps_first_metadata_comment_only() {
        let doc = "<!-- genflow: run=1 -->\n<p>a</p>\n<!-- genflow: run=2 -->\n<!-- other -->";
        assert_eq!(
            minify_document(doc, "genflow:"),
            "<!-- genflow: run=1 --><p>a</p>"
        );
    }

    #[test]
    fn test_structured_data_survives_byte_for_byte() {
        let ld = "<script type=\"application/ld+json\">\n{\n  \"@type\": \"Product\",\n  \"name\":   \"Widget\"\n}\n</script>";
        let doc = format!("<head>\n  {ld}\n</head>");
        let minified = minify_document(&doc, "genflow:");
        assert_eq!(minified, format!("<head>{ld}</head>"));
    }

    #[test]
    fn test_pre_and_textarea_survive() {
        let pre = "<pre>\n  fn main() {\n      println!(\"hi\");\n  }\n</pre>";
        let textarea = "<textarea name=\"t\">  line one\n\n  line two</textarea>";
        let doc = format!("<div>\n  {pre}\n  {textarea}\n</div>");
        let minified = minify_document(&doc, "genflow:");
        assert!(minified.contains(pre));
        assert!(minified.contains(textarea));
    }

    #[test]
    fn test_style_bodies_minified() {
        let doc = "<style>\n  /* hero */\n  .hero {\n    color: red;\n    margin: 0 auto;\n  }\n</style>";
        assert_eq!(
            minify_document(doc, "genflow:"),
            "<style>.hero{color: red;margin: 0 auto}</style>"
        );
    }

    #[test]
    fn test_scripts_keep_line_structure() {
        let doc = "<div>\n<script>\n\n  const a = 1\n\n  const b = 2\n\n</script>\n</div>";
        assert_eq!(
            minify_document(doc, "genflow:"),
            "<div><script>  const a = 1\n\n  const b = 2</script></div>"
        );
    }

    #[test]
    fn test_script_template_literals_untouched() {
        let body = "  const banner = `\n    Summer   sale\n      ends soon\n  `;\n  render(banner);";
        let doc = format!("<script>\n{body}\n</script>");
        assert_eq!(minify_document(&doc, "genflow:"), format!("<script>{body}</script>"));
    }

    #[test]
    fn test_minify_is_idempotent() {
        let doc = "<html>\n<head><style> a { b: c; } </style></head>\n<body>\n<!-- genflow: x -->\n<p> text </p>\n</body></html>";
        let once = minify_document(doc, "genflow:");
        assert_eq!(minify_document(&once, "genflow:"), once);
    }

    #[test]
    fn test_data_uri_in_css_untouched() {
        let css = ".a { background: url(data:image/png;base64,AAAA+/==); }";
        assert_eq!(minify_css(css), ".a{background: url(data:image/png;base64,AAAA+/==)}");
    }
}
