//! Text classifier: labels free-form input and infers session metadata.
//!
//! Classification is a first-match-wins scan over [`RULES`]. The order of the
//! table is the priority order: error logs, then order placement, then
//! strategy/code-shaped input, then the general-question fallback.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::session::Category;

/// What kind of input the user sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    ErrorDebug,
    OrderPlacement,
    StrategyLogic,
    GeneralQuestion,
}

impl InputKind {
    /// Session category this input kind files under.
    pub fn category(self) -> Category {
        match self {
            Self::ErrorDebug => Category::OrderDebug,
            Self::OrderPlacement => Category::OrderPlacement,
            Self::StrategyLogic => Category::StrategyConversion,
            Self::GeneralQuestion => Category::GeneralQuestion,
        }
    }
}

/// A broker alias: substring `key` found in lower-cased input maps to `alias`.
#[derive(Debug, Clone, Copy)]
pub struct BrokerAlias {
    pub key: &'static str,
    pub alias: &'static str,
    /// Broker identifier sent to the convert endpoint.
    pub code: &'static str,
}

/// Ordered broker table. First match wins.
pub const BROKER_ALIASES: &[BrokerAlias] = &[
    BrokerAlias { key: "zerodha", alias: "Zerodha Kite", code: "ZERODHA" },
    BrokerAlias { key: "kite", alias: "Zerodha Kite", code: "ZERODHA" },
    BrokerAlias { key: "binance", alias: "Binance", code: "BINANCE" },
    BrokerAlias { key: "ibkr", alias: "IBKR", code: "IBKR" },
    BrokerAlias { key: "upstox", alias: "Upstox", code: "UPSTOX" },
    BrokerAlias { key: "fyers", alias: "Fyers", code: "FYERS" },
];

/// One classification rule. Any of `patterns` matching selects `kind`.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub kind: InputKind,
    pub patterns: &'static [&'static str],
}

/// Classification rules in priority order.
pub const RULES: &[Rule] = &[
    Rule {
        kind: InputKind::ErrorDebug,
        patterns: &[
            r"(?i)(traceback|exception|error:|stack trace|failed|syntaxerror|typeerror|referenceerror)",
        ],
    },
    Rule {
        kind: InputKind::OrderPlacement,
        patterns: &[
            r"(?i)(place_?order|create_?order|buy|sell|order_type|product_type|trigger_price|stop.?loss|sl)",
        ],
    },
    Rule {
        kind: InputKind::StrategyLogic,
        patterns: &[
            r"(?i)(strategy|entry|exit|indicator|rsi|ema|sma|macd|backtest|signal|candl)",
            r"[{}();=]|def\s+\w+|function\s+\w+|class\s+\w+|import\s+\w+",
        ],
    },
];

static COMPILED_RULES: LazyLock<Vec<(InputKind, Vec<Regex>)>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| {
            let patterns = rule
                .patterns
                .iter()
                .map(|p| Regex::new(p).expect("classifier rule is a valid regex"))
                .collect();
            (rule.kind, patterns)
        })
        .collect()
});

static TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,10})\b").expect("valid ticker regex"));

/// Result of classifying a piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: InputKind,
    pub label: String,
    /// Broker alias, empty when no alias matched.
    pub broker: String,
}

/// Classify free-form input. Pure and deterministic.
pub fn classify(text: &str) -> Classification {
    let value = text.trim();
    if value.is_empty() {
        return Classification {
            kind: InputKind::GeneralQuestion,
            label: "General Question".to_string(),
            broker: String::new(),
        };
    }

    let broker = detect_broker(value)
        .map(|b| b.alias.to_string())
        .unwrap_or_default();

    let kind = COMPILED_RULES
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(value)))
        .map(|(kind, _)| *kind)
        .unwrap_or(InputKind::GeneralQuestion);

    let label = match kind {
        InputKind::ErrorDebug => "Error Log".to_string(),
        InputKind::OrderPlacement if !broker.is_empty() => {
            format!("Order Placement ({})", broker)
        }
        InputKind::OrderPlacement => "Order Placement".to_string(),
        InputKind::StrategyLogic => "Strategy Logic".to_string(),
        InputKind::GeneralQuestion => "General Question".to_string(),
    };

    Classification { kind, label, broker }
}

/// First broker alias whose key occurs in the lower-cased text.
pub fn detect_broker(text: &str) -> Option<&'static BrokerAlias> {
    let lower = text.to_lowercase();
    BROKER_ALIASES.iter().find(|b| lower.contains(b.key))
}

/// First 2–10 letter all-caps token, taken as a ticker candidate.
pub fn extract_ticker(text: &str) -> Option<String> {
    TICKER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Session label derived from input: `"{ticker} - {category}"` or
/// `"{category} - {broker}"`.
pub fn derive_title(text: &str) -> String {
    SessionMetadata::infer(text).title
}

/// Metadata written back onto a session after each user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub title: String,
    pub category: Category,
    pub broker_hint: String,
}

impl SessionMetadata {
    pub fn infer(text: &str) -> Self {
        let ctx = classify(text);
        let category = ctx.kind.category();
        let broker_hint = if ctx.broker.is_empty() {
            "Generic".to_string()
        } else {
            ctx.broker
        };

        let title = match extract_ticker(text) {
            Some(ticker) => format!("{} - {}", ticker, category),
            None => format!("{} - {}", category, broker_hint),
        };

        Self {
            title,
            category,
            broker_hint,
        }
    }
}

/// Map source text onto the backend's language enum.
pub fn guess_language(code: &str) -> &'static str {
    static PINE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\bstrategy\(|\bindicator\(|//@version").expect("valid regex"));
    static PYTHON: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^\s*import\s+\w+|^\s*from\s+\w+\s+import|^\s*def\s+\w+").expect("valid regex")
    });
    static JS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\bfunction\s+\w+|=>|console\.log\(|\b(const|let)\s+\w+\s*=").expect("valid regex")
    });

    if PINE.is_match(code) {
        "pinescript"
    } else if PYTHON.is_match(code) {
        "python"
    } else if JS.is_match(code) {
        "javascript"
    } else {
        "other"
    }
}
