//! Nubra CLI: Terminal UI Components
//!
//! All visual rendering lives here. `main.rs` and `chat.rs` call these
//! functions and stay free of formatting details.

use std::sync::LazyLock;

use colored::*;
use regex::Regex;

use nubra_core::bus::{AssistantEvent, NoticeLevel};
use nubra_core::renderer::{Block, CodeBlock, ProseBlock, ProseElement, ProseStyle, strip_inline_markup};
use nubra_core::session::{Mode, Session};

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<strong>(.*?)</strong>|<code>(.*?)</code>").expect("valid inline tag regex")
});

/// Collapsible prose shows this many lines before the fold.
const FOLD_LINES: usize = 6;

// ─── Banner ──────────────────────────────────────────────────

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}", "  ╔════════════════════════════════════════════╗".cyan());
    println!(
        "{}",
        format!("  ║  ⚡ Nubra Assistant v{:<21}⚡  ║", version)
            .cyan()
            .bold()
    );
    println!("{}", "  ║   Broker code → Nubra SDK, and questions   ║".cyan());
    println!("{}", "  ╚════════════════════════════════════════════╝".cyan());
    println!();
}

/// Printed at the start of `nubra chat` and after switching sessions.
pub fn print_session_info(session: &Session, mode: Mode) {
    println!(
        "  {} {} {}  {} {} {}  {}",
        "Session".dimmed(),
        "›".dimmed(),
        session.display_name.green().bold(),
        "│".dimmed(),
        "Mode".dimmed(),
        "›".dimmed(),
        badge(&mode.to_string()),
    );
    println!(
        "  {}",
        format!(
            "{} │ {} │ {} messages │ /help for commands",
            session.category, session.broker_hint, session.messages.len()
        )
        .dimmed()
    );
    println!();
}

/// Minimal inline badge `[label]` coloured accent.
pub fn badge(label: &str) -> ColoredString {
    format!("[{}]", label).cyan().bold()
}

// ─── Notices ─────────────────────────────────────────────────

/// Terminal line for a notice event, if the event is one.
pub fn notice_line(event: &AssistantEvent) -> Option<String> {
    match event {
        AssistantEvent::Notice { level, text } => Some(match level {
            NoticeLevel::Info => format!("  ℹ️  {}", text).cyan().to_string(),
            NoticeLevel::Success => format!("  ✅ {}", text).green().to_string(),
            NoticeLevel::Error => format!("  ❌ {}", text).red().bold().to_string(),
        }),
        _ => None,
    }
}

// ─── Replies ─────────────────────────────────────────────────

/// Print the AI response prefix, then every rendered block.
pub fn print_reply(blocks: &[Block], is_error: bool) {
    if is_error {
        println!("\n{}", "AI ›".red().bold());
    } else {
        println!("\n{}", "AI ›".bright_cyan().bold());
    }
    for block in blocks {
        match block {
            Block::Code(code) => print_code(code),
            Block::Prose(prose) => print_prose(prose),
        }
    }
    print_turn_divider();
}

fn print_code(code: &CodeBlock) {
    println!(
        "  {} {}",
        badge(&code.label),
        code.download_name().dimmed()
    );
    for line in code.code.lines() {
        println!("  {} {}", "│".dimmed(), line.bright_white());
    }
    println!();
}

fn print_prose(prose: &ProseBlock) {
    let lines = prose_lines(&prose.elements);
    match prose.style {
        ProseStyle::Warning => {
            println!("  {}", "⚠ Attention".yellow().bold());
            for line in &lines {
                println!("  {} {}", "┃".yellow(), line);
            }
        }
        ProseStyle::Summary => {
            for line in &lines {
                println!("  {} {}", "┃".green(), line);
            }
        }
        ProseStyle::Collapsible => {
            println!("  {}", "▸ Explanation".dimmed().bold());
            for line in lines.iter().take(FOLD_LINES) {
                println!("    {}", line);
            }
            if lines.len() > FOLD_LINES {
                println!(
                    "    {}",
                    format!("… {} more lines (/expand)", lines.len() - FOLD_LINES).dimmed()
                );
            }
        }
        ProseStyle::Plain => {
            for line in &lines {
                println!("  {}", line);
            }
        }
    }
    println!();
}

/// Print a prose block in full, ignoring any fold.
pub fn print_expanded(blocks: &[Block]) {
    for block in blocks {
        if let Block::Prose(prose) = block {
            for line in prose_lines(&prose.elements) {
                println!("  {}", line);
            }
        }
    }
    println!();
}

fn prose_lines(elements: &[ProseElement]) -> Vec<String> {
    let mut lines = Vec::new();
    for element in elements {
        match element {
            ProseElement::Heading(text) => {
                lines.push(strip_inline_markup(text).cyan().bold().to_string())
            }
            ProseElement::List(items) => {
                for item in items {
                    lines.push(format!("{} {}", "•".dimmed(), inline(item)));
                }
            }
            ProseElement::Paragraph(text) => lines.push(inline(text)),
        }
    }
    lines
}

/// Turn the renderer's inline markup into terminal styling.
pub fn inline(html: &str) -> String {
    let mut out = String::new();
    let mut last = 0;
    for caps in INLINE_TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&strip_inline_markup(&html[last..whole.start()]));
        if let Some(bold) = caps.get(1) {
            out.push_str(&strip_inline_markup(bold.as_str()).bold().to_string());
        } else if let Some(code) = caps.get(2) {
            out.push_str(&strip_inline_markup(code.as_str()).magenta().to_string());
        }
        last = whole.end();
    }
    out.push_str(&strip_inline_markup(&html[last..]));
    out
}

/// Print a short separator after each AI turn.
pub fn print_turn_divider() {
    println!("{}", "  ─────────────────────────────────────".dimmed());
}

// ─── Session List ────────────────────────────────────────────

/// Numbered session list; numbers are what `/load` and friends accept.
pub fn print_session_list(sessions: &[&Session], active_id: &str) {
    if sessions.is_empty() {
        println!("\n  {}\n", "No sessions match.".yellow());
        return;
    }
    println!("\n{}", "  🗂  Sessions ──────────────────────────────".cyan());
    for (i, session) in sessions.iter().enumerate() {
        let marker = if session.id == active_id { "›".green().bold() } else { " ".normal() };
        let pin = if session.pinned { "📌" } else { "  " };
        println!(
            "  {} {:>3}. {} {}  {}",
            marker,
            i + 1,
            pin,
            session.display_name.bold(),
            format!(
                "{} · {} · {} msgs · {}",
                session.category,
                session.broker_hint,
                session.messages.len(),
                session.last_activity().format("%Y-%m-%d %H:%M")
            )
            .dimmed()
        );
    }
    println!();
}

// ─── Help Table ──────────────────────────────────────────────

/// Pretty-printed command reference.
pub fn print_help() {
    let cmds: &[(&str, &str)] = &[
        ("/mode <m>", "Switch between chat and convert"),
        ("/paste", "Enter multi-line input, finish with /end"),
        ("/regen", "Regenerate the last answer"),
        ("/copy", "Copy last code block (or whole reply) to clipboard"),
        ("/save [dir]", "Write code blocks of the last reply to files"),
        ("/expand", "Show the last reply's explanation in full"),
        ("/new", "Start a new session"),
        ("/history [q]", "List sessions, optionally filtered"),
        ("/load <n>", "Switch to session n from /history"),
        ("/rename <name>", "Rename the current session"),
        ("/pin [n]", "Pin or unpin a session"),
        ("/delete [n]", "Delete a session"),
        ("/theme", "Toggle the night / glass theme"),
        ("/quit", "Exit"),
    ];

    println!();
    println!("{}", "  Commands ─────────────────────────────────────".cyan());
    for (cmd, desc) in cmds {
        println!(
            "  {:16} {}  {}",
            cmd.bold().cyan(),
            "│".dimmed(),
            desc.dimmed()
        );
    }
    println!("{}", "  ──────────────────────────────────────────────".cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_strips_markup() {
        colored::control::set_override(false);
        let out = inline("Use <code>place_order</code> &amp; <strong>never</strong> &lt;skip&gt;");
        assert_eq!(out, "Use place_order & never <skip>");
    }

    #[test]
    fn test_notice_line_only_for_notices() {
        colored::control::set_override(false);
        assert_eq!(
            notice_line(&AssistantEvent::error("Busy")).as_deref(),
            Some("  ❌ Busy")
        );
        assert!(notice_line(&AssistantEvent::TypingDone).is_none());
    }
}
