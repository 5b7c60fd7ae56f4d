use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Number, Value, json};

use super::config::EnvConfig;

const EU_VAT_PREFIXES: &[&str] = &[
    "AT", "BE", "BG", "CY", "CZ", "DE", "DK", "EE", "EL", "ES", "FI", "FR", "HR", "HU", "IE",
    "IT", "LT", "LU", "LV", "MT", "NL", "PL", "PT", "RO", "SE", "SI", "SK",
];

fn currency_for_symbol(symbol: &str) -> &'static str {
    match symbol {
        "$" => "USD",
        "£" => "GBP",
        _ => "EUR",
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

fn extract_amount_and_currency(prompt: &str) -> Option<(f64, String)> {
    let symbol_re = Regex::new(r"([$€£])\s*([0-9]+(?:[.,][0-9]{1,2})?)").unwrap();
    if let Some(caps) = symbol_re.captures(prompt) {
        let amount = parse_amount(&caps[2])?;
        return Some((amount, currency_for_symbol(&caps[1]).to_string()));
    }

    let code_re =
        Regex::new(r"(?i)\b([0-9]+(?:[.,][0-9]{1,2})?)\s*(USD|EUR|GBP|CHF|SEK|NOK|DKK)\b").unwrap();
    if let Some(caps) = code_re.captures(prompt) {
        let amount = parse_amount(&caps[1])?;
        return Some((amount, caps[2].to_uppercase()));
    }

    None
}

fn extract_frequency(prompt: &str) -> Option<&'static str> {
    let patterns: [(&'static str, &'static str); 4] = [
        ("weekly", r"\b(weekly|every week)\b"),
        ("monthly", r"\b(monthly|every month)\b"),
        ("quarterly", r"\b(quarterly|every quarter)\b"),
        ("annual", r"\b(annual|annually|yearly|every year)\b"),
    ];
    let text = prompt.to_lowercase();
    for (frequency, pattern) in patterns {
        if Regex::new(pattern).unwrap().is_match(&text) {
            return Some(frequency);
        }
    }
    None
}

fn extract_tax_rule(prompt: &str) -> Option<&'static str> {
    let patterns: [(&'static str, &str); 4] = [
        ("reverse_charge", r"\b(reverse charge)\b"),
        ("standard", r"\b(standard tax|standard vat|standard)\b"),
        ("reduced", r"\b(reduced tax|reduced vat|reduced)\b"),
        ("zero_rated", r"\b(zero[- ]rated|zero vat|vat exempt)\b"),
    ];
    let text = prompt.to_lowercase();
    for (tax_rule, pattern) in patterns {
        if Regex::new(pattern).unwrap().is_match(&text) {
            return Some(tax_rule);
        }
    }
    None
}

/// Broad EU VAT id shape: two-letter country prefix plus an alphanumeric
/// payload containing at least one digit.
fn extract_vat_id(prompt: &str) -> Option<String> {
    let upper = prompt.to_uppercase();
    let re = Regex::new(r"\b([A-Z]{2}[A-Z0-9]{6,14})\b").unwrap();
    for caps in re.captures_iter(&upper) {
        let candidate = caps[1].to_string();
        let prefix = &candidate[..2];
        let payload = &candidate[2..];
        if EU_VAT_PREFIXES.contains(&prefix) && payload.chars().any(|ch| ch.is_ascii_digit()) {
            return Some(candidate);
        }
    }
    None
}

/// Deterministic slot extraction for invoice prompts. Used as the routing
/// fallback and to overlay canonical fields the model tends to paraphrase.
pub fn parse_invoice_prompt(prompt: &str) -> Map<String, Value> {
    let mut slots = Map::new();

    if let Some((amount, currency)) = extract_amount_and_currency(prompt) {
        if let Some(number) = Number::from_f64(amount) {
            slots.insert("amount".to_string(), Value::Number(number));
        }
        slots.insert("currency".to_string(), Value::String(currency));
    }
    if let Some(frequency) = extract_frequency(prompt) {
        slots.insert("period".to_string(), Value::String(frequency.to_string()));
    }
    if let Some(tax_rule) = extract_tax_rule(prompt) {
        slots.insert("tax_rule".to_string(), Value::String(tax_rule.to_string()));
    }
    if let Some(vat_id) = extract_vat_id(prompt) {
        slots.insert("vat_id".to_string(), Value::String(vat_id));
    }

    slots
}

/// Validate a VAT id against the configured VIES-style endpoint. Network
/// failure is reported inside the result, never as an error: a VAT check is
/// advisory context for the run, not a gate.
pub async fn validate_vat_id(cfg: &EnvConfig, vat_id: &str) -> Value {
    let http = reqwest::Client::new();
    let attempt = async {
        let resp = http
            .get(&cfg.vat_check_api_url)
            .query(&[("vat_number", vat_id)])
            .timeout(Duration::from_secs(15))
            .send()
            .await?
            .error_for_status()?;
        resp.json::<Value>().await
    };

    match attempt.await {
        Ok(payload) => json!({
            "checked": true,
            "provider": "vatcomply(vies)",
            "vat_id": vat_id,
            "valid": payload.get("valid").and_then(Value::as_bool).unwrap_or(false),
            "country_code": payload.get("country_code").cloned().unwrap_or(Value::Null),
            "name": payload.get("name").cloned().unwrap_or(Value::Null),
            "address": payload.get("address").cloned().unwrap_or(Value::Null),
        }),
        Err(err) => json!({
            "checked": true,
            "provider": "vatcomply(vies)",
            "vat_id": vat_id,
            "valid": Value::Null,
            "error": err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_symbol_amount_and_currency() {
        let slots = parse_invoice_prompt("Create a monthly sales invoice of €1200 for ACME");
        assert_eq!(slots["amount"], 1200.0);
        assert_eq!(slots["currency"], "EUR");
        assert_eq!(slots["period"], "monthly");
    }

    #[test]
    fn extracts_code_amount_case_insensitively() {
        let slots = parse_invoice_prompt("bill 450,50 usd every quarter");
        assert_eq!(slots["amount"], 450.5);
        assert_eq!(slots["currency"], "USD");
        assert_eq!(slots["period"], "quarterly");
    }

    #[test]
    fn extracts_tax_rule_and_vat_id() {
        let slots =
            parse_invoice_prompt("Invoice ACME, reverse charge, VAT IE6388047V, yearly billing");
        assert_eq!(slots["tax_rule"], "reverse_charge");
        assert_eq!(slots["vat_id"], "IE6388047V");
        assert_eq!(slots["period"], "annual");
    }

    #[test]
    fn ignores_vat_lookalikes_without_eu_prefix_or_digits() {
        let slots = parse_invoice_prompt("ship to XX12345678 and DEABCDEFGH");
        assert!(!slots.contains_key("vat_id"));
    }

    #[test]
    fn empty_prompt_yields_no_slots() {
        assert!(parse_invoice_prompt("please do the thing").is_empty());
    }
}
