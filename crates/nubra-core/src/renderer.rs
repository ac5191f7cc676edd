//! Rich-text renderer: turns a Markdown-ish assistant reply into display
//! blocks: fenced code regions and styled prose.
//!
//! Rendering is pure. Everything inside a prose element is HTML-escaped
//! before any markup is introduced, so model output can never inject tags.

use std::sync::LazyLock;

use regex::Regex;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```([a-zA-Z0-9_+-]*)\n?([\s\S]*?)```").expect("valid fence regex")
});
static BARE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(summary|converted code|changes|notes|next steps|errors?)[ \t]*:?[ \t]*$")
        .expect("valid section regex")
});
static MD_HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+.+$").expect("valid heading regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*$").expect("valid heading regex"));
static PLAIN_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(summary|converted code|changes|notes|next steps|assumptions|errors?)\s*:?\s*$")
        .expect("valid plain heading regex")
});
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+(.+)$").expect("valid bullet regex"));
static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s+(.+)$").expect("valid numbered regex"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid bold regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid inline code regex"));
static WARNING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\n)\s*(?:#{0,6}\s*)?(warning|important|caution|mandatory|must|constraint)\b[:\-]?")
        .expect("valid warning regex")
});
static EXPLANATION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\n)\s*#{0,6}\s*Explanation\b").expect("valid explanation regex")
});
static SUMMARY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\n)\s*#{0,6}\s*Summary\b").expect("valid summary regex")
});
static REPLY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*#{1,6}\s*([^\n#]{3,80})").expect("valid reply heading regex")
});
static FN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:def|function)\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(").expect("valid fn regex")
});
static CLASS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bclass\s+([a-zA-Z_][a-zA-Z0-9_]*)\b").expect("valid class regex")
});
static TITLE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(session|general question)\b").expect("valid title noise regex")
});
static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));
static SNIFF_PY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*import\s+\w+|^\s*def\s+\w+").expect("valid python sniff regex")
});
static SNIFF_JS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfunction\s+\w+|=>|console\.log\(").expect("valid js sniff regex")
});
static SNIFF_PINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstrategy\(|indicator\(").expect("valid pine sniff regex"));

/// Prose longer than this renders collapsed.
pub const COLLAPSE_CHARS: usize = 700;

/// Names that say nothing about the strategy and are never used for files.
const BLOCKED_NAMES: &[&str] = &[
    "summary",
    "explanation",
    "notes",
    "note",
    "code",
    "converted_code",
    "required_parameter_updates",
    "required_updates",
    "output",
    "response",
];

const FALLBACK_NAME: &str = "strategy_code";

/// One rendered region of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Code(CodeBlock),
    Prose(ProseBlock),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Tag from the fence, possibly empty.
    pub language: String,
    /// Upper-cased tag, or "Code".
    pub label: String,
    /// Raw code, leading and trailing newlines removed.
    pub code: String,
    /// Slug used to name downloads.
    pub file_base: String,
}

impl CodeBlock {
    /// Extension from the fence tag, sniffing the code when the tag is unknown.
    pub fn file_extension(&self) -> &'static str {
        match self.language.trim().to_lowercase().as_str() {
            "python" | "py" => return "py",
            "javascript" | "js" | "node" => return "js",
            "typescript" | "ts" => return "ts",
            "pinescript" | "pine" => return "pine",
            "json" => return "json",
            "bash" | "shell" | "sh" => return "sh",
            _ => {}
        }
        if SNIFF_PY.is_match(&self.code) {
            "py"
        } else if SNIFF_JS.is_match(&self.code) {
            "js"
        } else if SNIFF_PINE.is_match(&self.code) {
            "pine"
        } else {
            "txt"
        }
    }

    pub fn download_name(&self) -> String {
        format!("{}.{}", self.file_base, self.file_extension())
    }
}

/// How a prose block is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProseStyle {
    Plain,
    Warning,
    /// Collapsed behind an "Explanation (expand)" toggle.
    Collapsible,
    Summary,
}

/// Parsed prose. Text is escaped inline HTML (`<strong>`, `<code>` only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProseElement {
    Heading(String),
    List(Vec<String>),
    Paragraph(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProseBlock {
    pub style: ProseStyle,
    pub elements: Vec<ProseElement>,
}

/// Renderer with an optional session title for download-name fallback.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    session_title: Option<String>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_title(title: impl Into<String>) -> Self {
        Self {
            session_title: Some(title.into()),
        }
    }

    /// Split `text` into code and prose blocks, in order.
    pub fn render(&self, text: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut last = 0;

        for caps in FENCE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                if let Some(prose) = render_prose(&text[last..whole.start()]) {
                    blocks.push(Block::Prose(prose));
                }
            }

            let language = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let code = caps
                .get(2)
                .map(|m| m.as_str().trim_matches('\n'))
                .unwrap_or_default();
            blocks.push(Block::Code(CodeBlock {
                language: language.to_string(),
                label: if language.is_empty() {
                    "Code".to_string()
                } else {
                    language.to_uppercase()
                },
                code: code.to_string(),
                file_base: self.infer_file_base(text, code),
            }));
            last = whole.end();
        }

        if last < text.len() {
            if let Some(prose) = render_prose(&text[last..]) {
                blocks.push(Block::Prose(prose));
            }
        }
        blocks
    }

    /// Heading in the reply, then function or class name, then session title.
    fn infer_file_base(&self, reply: &str, code: &str) -> String {
        let usable = |slug: String| (!slug.is_empty() && !BLOCKED_NAMES.contains(&slug.as_str())).then_some(slug);

        let from_heading = REPLY_HEADING
            .captures(reply)
            .and_then(|c| c.get(1))
            .and_then(|m| usable(slugify(m.as_str())));
        if let Some(name) = from_heading {
            return name;
        }

        let from_fn = FN_NAME.captures(code).and_then(|c| c.get(1)).and_then(|m| {
            let name = m.as_str();
            let name = ["get_", "set_", "run_"]
                .iter()
                .find_map(|p| name.strip_prefix(p))
                .unwrap_or(name);
            usable(slugify(name))
        });
        if let Some(name) = from_fn {
            return name;
        }

        let from_class = CLASS_NAME
            .captures(code)
            .and_then(|c| c.get(1))
            .and_then(|m| usable(slugify(m.as_str())));
        if let Some(name) = from_class {
            return name;
        }

        self.session_title
            .as_deref()
            .and_then(|title| usable(slugify(TITLE_NOISE.replace_all(title, "").trim())))
            .unwrap_or_else(|| FALLBACK_NAME.to_string())
    }
}

/// Render with no session context.
pub fn render(text: &str) -> Vec<Block> {
    Renderer::new().render(text)
}

fn render_prose(segment: &str) -> Option<ProseBlock> {
    let segment = segment.trim();
    if segment.is_empty() {
        return None;
    }
    let normalized = drop_empty_headings(&BARE_SECTION.replace_all(segment, "## $1"));
    if normalized.trim().is_empty() {
        return None;
    }

    let elements = parse_elements(&normalized);
    if elements.is_empty() {
        return None;
    }

    let style = if EXPLANATION_HEADING.is_match(&normalized)
        || normalized.chars().count() > COLLAPSE_CHARS
    {
        ProseStyle::Collapsible
    } else if WARNING.is_match(&normalized) || normalized.contains('?') {
        ProseStyle::Warning
    } else if SUMMARY_HEADING.is_match(&normalized) {
        ProseStyle::Summary
    } else {
        ProseStyle::Plain
    };

    Some(ProseBlock { style, elements })
}

/// Drop `#` headings followed (after blank lines) by another heading or nothing.
fn drop_empty_headings(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        if !MD_HEADING_LINE.is_match(line.trim()) {
            kept.push(*line);
            continue;
        }
        let next = lines[i + 1..].iter().map(|l| l.trim()).find(|l| !l.is_empty());
        if next.is_some_and(|l| !MD_HEADING_LINE.is_match(l)) {
            kept.push(*line);
        }
    }
    kept.join("\n")
}

fn parse_elements(text: &str) -> Vec<ProseElement> {
    let escaped = escape_html(text);
    let mut elements = Vec::new();
    let mut list: Vec<String> = Vec::new();

    fn flush(list: &mut Vec<String>, elements: &mut Vec<ProseElement>) {
        if !list.is_empty() {
            elements.push(ProseElement::List(std::mem::take(list)));
        }
    }

    for line in escaped.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut list, &mut elements);
            continue;
        }

        let heading = HEADING
            .captures(trimmed)
            .or_else(|| PLAIN_HEADING.captures(trimmed))
            .and_then(|c| c.get(1));
        if let Some(h) = heading {
            flush(&mut list, &mut elements);
            elements.push(ProseElement::Heading(format_inline(h.as_str())));
            continue;
        }

        let item = BULLET
            .captures(trimmed)
            .or_else(|| NUMBERED.captures(trimmed))
            .and_then(|c| c.get(1));
        if let Some(item) = item {
            list.push(format_inline(item.as_str()));
            continue;
        }

        flush(&mut list, &mut elements);
        elements.push(ProseElement::Paragraph(format_inline(trimmed)));
    }
    flush(&mut list, &mut elements);
    elements
}

/// `**bold**` and `` `code` `` on already-escaped text.
fn format_inline(escaped: &str) -> String {
    let bold = BOLD.replace_all(escaped, "<strong>$1</strong>");
    INLINE_CODE.replace_all(&bold, "<code>$1</code>").into_owned()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`escape_html`] for the inline markup the renderer emits;
/// gives terminal front ends plain text.
pub fn strip_inline_markup(html: &str) -> String {
    html.replace("<strong>", "")
        .replace("</strong>", "")
        .replace("<code>", "")
        .replace("</code>", "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Lower-case, strip quotes, collapse non-alphanumerics to `_`, cap at 64.
pub fn slugify(value: &str) -> String {
    let lower: String = value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '`' | '\'' | '"'))
        .collect();
    let slug = NON_SLUG.replace_all(&lower, "_");
    slug.trim_matches('_').chars().take(64).collect()
}

/// Final markup for a list of blocks.
pub fn render_html(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Code(code) => {
                out.push_str(&format!(
                    "<div class=\"nubra-code-block\"><div class=\"nubra-code-header\"><span>{}</span>\
                     <span class=\"nubra-code-file\">{}</span></div><pre><code>{}</code></pre></div>",
                    escape_html(&code.label),
                    escape_html(&code.download_name()),
                    escape_html(&code.code)
                ));
            }
            Block::Prose(prose) => {
                let inner = prose_html(&prose.elements);
                let wrapped = match prose.style {
                    ProseStyle::Collapsible => format!(
                        "<details class=\"nubra-text-collapsible\"><summary>Explanation (expand)</summary>\
                         <div class=\"nubra-text\">{}</div></details>",
                        inner
                    ),
                    ProseStyle::Warning => format!(
                        "<div class=\"nubra-text warning\"><span class=\"nubra-warning-icon\">&#9888;</span>{}</div>",
                        inner
                    ),
                    ProseStyle::Summary => {
                        format!("<section class=\"nubra-text nubra-summary-block\">{}</section>", inner)
                    }
                    ProseStyle::Plain => format!("<div class=\"nubra-text\">{}</div>", inner),
                };
                out.push_str(&wrapped);
            }
        }
    }
    out
}

fn prose_html(elements: &[ProseElement]) -> String {
    elements
        .iter()
        .map(|el| match el {
            ProseElement::Heading(h) => format!("<div class=\"nubra-md-heading\">{}</div>", h),
            ProseElement::Paragraph(p) => format!("<p class=\"nubra-md-paragraph\">{}</p>", p),
            ProseElement::List(items) => format!(
                "<ul class=\"nubra-md-list\">{}</ul>",
                items
                    .iter()
                    .map(|i| format!("<li>{}</li>", i))
                    .collect::<String>()
            ),
        })
        .collect()
}
