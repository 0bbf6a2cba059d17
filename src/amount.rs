// 💵 Amount Scanner - currency-aware numeric literals in free text
// Recognizes $X, X,XXX, X.XX, Xk, X thousand, X dollars/bucks/USD and X%

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const AMOUNT_PATTERN: &str = r"(?P<neg>-\s?)?(?P<cur>\$\s?)?(?P<int>\d{1,3}(?:,\d{3})+|\d+)(?P<frac>\.\d+)?(?:\s?(?P<k>k)\b|\s(?P<thousand>thousand)\b)?(?:\s?(?P<unit>dollars|dollar|bucks|usd)\b)?(?P<pct>%)?";

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(AMOUNT_PATTERN).unwrap());

static LEADING_AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^\s*{}", AMOUNT_PATTERN)).unwrap());

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountOptions {
    /// Minimum digits in the integer part for a literal to count
    pub min_digits: usize,

    /// Whether "5k" / "5 thousand" are recognized; when off such literals are skipped
    pub allow_k_notation: bool,
}

impl Default for AmountOptions {
    fn default() -> Self {
        AmountOptions {
            min_digits: 1,
            allow_k_notation: true,
        }
    }
}

// ============================================================================
// MATCH
// ============================================================================

/// A recognized amount and where it sits in the scanned text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountMatch {
    pub value: f64,
    pub start: usize,
    pub end: usize,
}

// ============================================================================
// SCANNER
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct AmountScanner {
    options: AmountOptions,
}

impl AmountScanner {
    pub fn new(options: AmountOptions) -> Self {
        AmountScanner { options }
    }

    /// Value of the first amount literal in `text`.
    ///
    /// A leading minus sign is dropped: "-500" reads as 500.
    pub fn scan(&self, text: &str) -> Option<f64> {
        self.find(text).map(|m| m.value)
    }

    /// First amount literal in `text`
    pub fn find(&self, text: &str) -> Option<AmountMatch> {
        AMOUNT_RE
            .captures_iter(text)
            .filter(|caps| starts_on_boundary(text, caps))
            .find_map(|caps| self.to_match(&caps))
    }

    /// Amount literal at the very start of `text`, leading whitespace allowed
    pub fn find_leading(&self, text: &str) -> Option<AmountMatch> {
        let caps = LEADING_AMOUNT_RE.captures(text)?;
        self.to_match(&caps)
    }

    fn to_match(&self, caps: &Captures) -> Option<AmountMatch> {
        let whole = caps.get(0)?;
        let int_part = caps.name("int")?.as_str().replace(',', "");

        if int_part.len() < self.options.min_digits {
            return None;
        }

        let thousands = caps.name("k").is_some() || caps.name("thousand").is_some();
        if thousands && !self.options.allow_k_notation {
            return None;
        }

        let frac = caps.name("frac").map(|m| m.as_str()).unwrap_or("");
        let mut value: f64 = format!("{}{}", int_part, frac).parse().ok()?;
        if thousands {
            value *= 1000.0;
        }

        // Leading whitespace of an anchored match is not part of the literal
        let start = caps
            .name("neg")
            .or_else(|| caps.name("cur"))
            .or_else(|| caps.name("int"))
            .map(|m| m.start())
            .unwrap_or_else(|| whole.start());

        Some(AmountMatch {
            value,
            start,
            end: whole.end(),
        })
    }
}

/// Digits glued to a preceding letter ("q3", "mcc5411") are not amounts
fn starts_on_boundary(text: &str, caps: &Captures) -> bool {
    let Some(whole) = caps.get(0) else {
        return false;
    };

    text[..whole.start()]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric())
}

/// Scan with default options
pub fn scan_amount(text: &str) -> Option<f64> {
    AmountScanner::default().scan(text)
}

// ============================================================================
// TESTS
// ============================================================================
