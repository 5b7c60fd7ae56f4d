use serde_json::{Map, Value, json};

use super::platform::{PlatformMap, known_paths, sorted_selectors};

fn pick_selector(selectors: &[String], needles: &[&str]) -> Option<String> {
    for needle in needles {
        let needle = needle.to_lowercase();
        for selector in selectors {
            if selector.to_lowercase().contains(&needle) {
                return Some(selector.clone());
            }
        }
    }
    None
}

/// Best "create new record" path for the prompt: prefer an observed add/new
/// path matching the invoice side, fall back to the conventional routes.
fn candidate_add_path(prompt: &str, paths: &[String]) -> String {
    let p = prompt.to_lowercase();
    let is_purchase = p.contains("purchase");
    let target: &[&str] = if is_purchase {
        &["/desktop/purchase/add", "/desktop/purchase/new", "/desktop/purchase"]
    } else {
        &["/desktop/sale/add", "/desktop/sale/new"]
    };

    for needle in target {
        for raw in paths {
            if raw.to_lowercase().contains(needle) {
                return raw.clone();
            }
        }
    }
    for raw in paths {
        let low = raw.to_lowercase();
        if low.contains("/desktop/")
            && (low.contains("add") || low.contains("new"))
            && !low.contains("edit")
        {
            return raw.clone();
        }
    }
    if is_purchase {
        "/desktop/purchase/add".to_string()
    } else {
        "/desktop/sale/add".to_string()
    }
}

fn base_url(map: &PlatformMap, default_base_url: &str) -> String {
    map.base_urls
        .first()
        .filter(|u| !u.is_empty())
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default_base_url.trim_end_matches('/').to_string())
}

fn add_slot(
    slots: &mut Map<String, Value>,
    required: &mut Vec<String>,
    name: &str,
    description: &str,
    is_required: bool,
) -> String {
    slots
        .entry(name.to_string())
        .or_insert_with(|| json!({ "type": "string", "description": description }));
    if is_required && !required.iter().any(|r| r == name) {
        required.push(name.to_string());
    }
    name.to_string()
}

/// Nudge frequently-miscaptured invoice selectors toward their canonical
/// line-item form and make row inputs visibility-scoped.
fn canonical_invoice_selector(field: &str, picked: Option<String>) -> Option<String> {
    let lowered = picked.as_deref().unwrap_or("").to_lowercase();
    match field {
        "description" => {
            if picked.is_none() || (lowered.contains("sales_invoice__row[0]") && !lowered.contains("[description]")) {
                return Some("input[name='sales_invoice__row[0][description]']:visible".to_string());
            }
            if lowered.contains("[description]") && !lowered.contains(":visible") {
                return picked.map(|s| format!("{}:visible", s));
            }
            picked
        }
        "amount" => {
            if picked.is_none() || (lowered.contains("sales_invoice__row[0]") && !lowered.contains("[item_amount]")) {
                return Some("input[name='sales_invoice__row[0][item_amount]']:visible".to_string());
            }
            if lowered.contains("[item_amount]") && !lowered.contains(":visible") {
                return picked.map(|s| format!("{}:visible", s));
            }
            picked
        }
        "quantity" => {
            if picked.is_none() || (lowered.contains("sales_invoice__row[0]") && !lowered.contains("[item_qty]")) {
                return Some("input[name='sales_invoice__row[0][item_qty]']:visible".to_string());
            }
            picked
        }
        "due_days" => {
            if !lowered.is_empty()
                && lowered.contains("#due_days")
                && !lowered.contains("#sales_invoice__due_days")
            {
                return Some("input#sales_invoice__due_days".to_string());
            }
            picked
        }
        _ => picked,
    }
}

fn slot_placeholder(slot: &str) -> Value {
    Value::String(format!("{{{{{}}}}}", slot))
}

/// Deterministic skill synthesis from accumulated platform-map signals.
/// Used when the agent platform is unreachable or unconfigured: build a
/// create-invoice workflow out of the highest-frequency selectors observed
/// for this platform.
pub fn extrapolate_skill_from_platform_map(
    prompt: &str,
    map: &PlatformMap,
    skill_id: &str,
    default_base_url: &str,
) -> Value {
    let selectors = sorted_selectors(map);
    let paths = known_paths(map);
    let base = base_url(map, default_base_url);
    let add_path = candidate_add_path(prompt, &paths);
    let target_url = if add_path.starts_with("http") {
        add_path
    } else {
        format!("{}{}", base, add_path)
    };

    let mut steps: Vec<Value> = vec![json!({ "action": "goto", "value": target_url })];
    let mut slot_props = Map::new();
    let mut required: Vec<String> = Vec::new();

    let customer_select2 = pick_selector(
        &selectors,
        &[
            "select2-buyercompanyid-container",
            "buyercompanyid",
            "select2-companyid-container",
        ],
    );
    let invoice_date = pick_selector(&selectors, &["sales_invoice__invoice_date", "invoice_date"]);
    let transaction_date = pick_selector(
        &selectors,
        &["sales_invoice__transaction_date", "transaction_date"],
    );
    let due_days = pick_selector(&selectors, &["sales_invoice__due_days", "due_days"]);
    let description = pick_selector(
        &selectors,
        &["row[0][description]", "row_description", "description"],
    );
    let amount = pick_selector(
        &selectors,
        &["row[0][item_amount]", "row_item_amount", "item_amount", "amount"],
    );
    let qty = pick_selector(&selectors, &["row[0][item_qty]", "item_qty", "quantity"]);
    let save_btn = pick_selector(
        &selectors,
        &["save", "btn-warning", "btn-primary", "submit", "sales_invoice__save"],
    );

    let due_days = canonical_invoice_selector("due_days", due_days);
    let description = canonical_invoice_selector("description", description);
    let amount = canonical_invoice_selector("amount", amount);
    let qty = canonical_invoice_selector("quantity", qty);

    if let Some(selector) = customer_select2 {
        let slot = add_slot(&mut slot_props, &mut required, "customer", "Customer name", true);
        steps.push(json!({ "action": "click", "selector": selector.clone() }));
        steps.push(json!({
            "action": "select2",
            "selector": selector,
            "search": "input.select2-search__field",
            "value": slot_placeholder(&slot),
            "result": ".select2-results__option--highlighted",
        }));
    }

    if let Some(selector) = invoice_date {
        let slot = add_slot(
            &mut slot_props,
            &mut required,
            "invoice_date",
            "Invoice issue date (DD.MM.YYYY)",
            true,
        );
        steps.push(json!({ "action": "fill_date", "selector": selector, "value": slot_placeholder(&slot) }));
    }

    if let Some(selector) = transaction_date {
        let slot = add_slot(
            &mut slot_props,
            &mut required,
            "delivery_date",
            "Delivery/transaction date (DD.MM.YYYY)",
            true,
        );
        steps.push(json!({ "action": "fill_date", "selector": selector, "value": slot_placeholder(&slot) }));
    }

    if let Some(selector) = due_days {
        let slot = add_slot(
            &mut slot_props,
            &mut required,
            "due_days",
            "Payment terms in days",
            false,
        );
        steps.push(json!({ "action": "fill_if_visible", "selector": selector, "value": slot_placeholder(&slot) }));
    }

    if let Some(selector) = description {
        let slot = add_slot(
            &mut slot_props,
            &mut required,
            "description",
            "Invoice line description",
            true,
        );
        steps.push(json!({ "action": "fill", "selector": selector, "value": slot_placeholder(&slot) }));
    }

    if let Some(selector) = qty {
        let slot = add_slot(
            &mut slot_props,
            &mut required,
            "quantity",
            "Invoice line quantity",
            false,
        );
        steps.push(json!({ "action": "fill_if_visible", "selector": selector, "value": slot_placeholder(&slot) }));
    }

    if let Some(selector) = amount {
        let slot = add_slot(
            &mut slot_props,
            &mut required,
            "amount",
            "Invoice line amount",
            true,
        );
        steps.push(json!({ "action": "fill", "selector": selector, "value": slot_placeholder(&slot) }));
    }

    if let Some(selector) = save_btn {
        steps.push(json!({ "action": "click", "selector": selector }));
    }

    steps.push(json!({ "action": "check_validation" }));
    steps.push(json!({ "action": "screenshot" }));

    json!({
        "id": skill_id,
        "version": 1,
        "name": format!("Extrapolated skill for: {:.48}", prompt),
        "description": "Synthesized from platform map memory signals.",
        "base_url": base,
        "steps": steps,
        "slots_schema": {
            "type": "object",
            "required": required,
            "properties": slot_props,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::{RecordedEvent, load_platform_map, merge_platform_signals};

    fn map_with_selectors(selectors: &[&str], url: &str) -> PlatformMap {
        let mut map = load_platform_map("test-extrapolation-absent");
        let events: Vec<RecordedEvent> = selectors
            .iter()
            .map(|selector| RecordedEvent {
                event_type: Some("click".to_string()),
                selector: Some(selector.to_string()),
                url: Some(url.to_string()),
                ..RecordedEvent::default()
            })
            .collect();
        merge_platform_signals(&mut map, "https://x.example", &events, "", "test");
        map
    }

    #[test]
    fn builds_goto_plus_fields_from_observed_selectors() {
        let map = map_with_selectors(
            &[
                "span#select2-buyercompanyid-container",
                "input#sales_invoice__invoice_date",
                "input[name='sales_invoice__row[0][description]']",
                "input[name='sales_invoice__row[0][item_amount]']",
                "button#save",
            ],
            "https://x.example/desktop/sale/add",
        );
        let spec = extrapolate_skill_from_platform_map(
            "create a monthly invoice",
            &map,
            "invoiceapp.auto.test",
            "https://fallback.example",
        );

        assert_eq!(spec["id"], "invoiceapp.auto.test");
        assert_eq!(spec["base_url"], "https://x.example");
        let steps = spec["steps"].as_array().unwrap();
        assert_eq!(steps[0]["action"], "goto");
        assert_eq!(steps[0]["value"], "https://x.example/desktop/sale/add");
        assert_eq!(steps.last().unwrap()["action"], "screenshot");

        let required = spec["slots_schema"]["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "customer"));
        assert!(required.iter().any(|r| r == "amount"));
    }

    #[test]
    fn purchase_prompt_targets_purchase_route() {
        let map = load_platform_map("test-extrapolation-empty");
        let spec = extrapolate_skill_from_platform_map(
            "enter a purchase invoice",
            &map,
            "invoiceapp.auto.purchase",
            "https://fallback.example",
        );
        assert_eq!(
            spec["steps"][0]["value"],
            "https://fallback.example/desktop/purchase/add"
        );
    }

    #[test]
    fn row_selectors_gain_visibility_scope() {
        assert_eq!(
            canonical_invoice_selector(
                "amount",
                Some("input[name='sales_invoice__row[0][item_amount]']".to_string())
            )
            .unwrap(),
            "input[name='sales_invoice__row[0][item_amount]']:visible"
        );
        assert_eq!(
            canonical_invoice_selector("description", None).unwrap(),
            "input[name='sales_invoice__row[0][description]']:visible"
        );
    }
}
