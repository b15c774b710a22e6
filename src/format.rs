//! Display formatting for bound values.
//!
//! Pure and stateless: a raw record value plus a value kind and the record's
//! format rules yields display text. Values that cannot be coerced for the
//! requested kind come back as their plain text, never as an error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::FormatRules;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Text,
    Currency,
    Number,
    Percentage,
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(Self::Text),
            "currency" => Ok(Self::Currency),
            "number" => Ok(Self::Number),
            "percentage" | "percent" => Ok(Self::Percentage),
            other => Err(format!("unknown value kind '{}'", other)),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Currency => "currency",
            Self::Number => "number",
            Self::Percentage => "percentage",
        };
        f.write_str(name)
    }
}

pub fn format_value(value: &Value, kind: ValueKind, rules: &FormatRules) -> String {
    match kind {
        ValueKind::Text => plain_text(value),
        ValueKind::Currency => format_currency(value, rules),
        ValueKind::Number => format_number(value, rules),
        ValueKind::Percentage => format_percentage(value, rules),
    }
}

/// Numbers become `<symbol><grouped whole amount>`; anything else passes
/// through.
pub fn format_currency(value: &Value, rules: &FormatRules) -> String {
    match value.as_f64() {
        Some(amount) => format!(
            "{}{}",
            rules.currency_symbol,
            group_fixed(amount, 0, 0, &rules.thousands_separator)
        ),
        _ => plain_text(value),
    }
}

/// Grouped with up to two decimals. Numeric strings are parsed first.
pub fn format_number(value: &Value, rules: &FormatRules) -> String {
    match numeric(value) {
        Some(n) => group_fixed(n, 0, 2, &rules.thousands_separator),
        None => plain_text(value),
    }
}

/// Whole numbers print without decimals, fractional ones with one or two.
/// Strings that already end in `%` are only trimmed.
pub fn format_percentage(value: &Value, rules: &FormatRules) -> String {
    if let Value::String(s) = value {
        let trimmed = s.trim();
        if trimmed.ends_with('%') {
            return trimmed.to_string();
        }
        return match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => percent(n, rules),
            _ => trimmed.to_string(),
        };
    }

    match value.as_f64() {
        Some(n) => percent(n, rules),
        None => plain_text(value),
    }
}

fn percent(n: f64, rules: &FormatRules) -> String {
    let min_fraction = if n.fract() != 0.0 { 1 } else { 0 };
    format!("{}%", group_fixed(n, min_fraction, 2, &rules.thousands_separator))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Text rendition of a raw value: strings verbatim, integral numbers without
/// a trailing `.0`, containers as compact JSON.
pub fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n.as_f64().map(|f| f.to_string()).unwrap_or_default(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Round to `max_fraction` digits, drop trailing zeros down to
/// `min_fraction`, and group the integer part with `separator`.
fn group_fixed(n: f64, min_fraction: usize, max_fraction: usize, separator: &str) -> String {
    let fixed = format!("{:.*}", max_fraction, n.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (fixed.as_str(), ""),
    };

    let mut fraction = frac_part.trim_end_matches('0').to_string();
    while fraction.len() < min_fraction {
        fraction.push('0');
    }

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3 * separator.len());
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push_str(separator);
        }
        grouped.push(digit);
    }

    let negative = n < 0.0 && (int_part.chars().any(|c| c != '0') || !fraction.is_empty());
    let sign = if negative { "-" } else { "" };

    if fraction.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, fraction)
    }
}
