use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use super::config::EnvConfig;
use super::storage::ObjectStore;

/// Normalized evaluation payload. `reasons` arrives from the model as a
/// string, a list, or garbage; it always leaves here as a list of strings.
pub fn normalize_eval(mut eval: Value) -> Value {
    let reasons = match eval.get("reasons") {
        Some(Value::String(s)) => vec![Value::String(s.clone())],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            })
            .collect(),
        Some(other) => vec![Value::String(other.to_string())],
        None => Vec::new(),
    };
    if let Some(object) = eval.as_object_mut() {
        object.insert("reasons".to_string(), Value::Array(reasons));
        object.entry("patch".to_string()).or_insert(json!([]));
    }
    eval
}

pub fn eval_patch_ops(eval: &Value) -> &[Value] {
    eval.get("patch")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Heuristic evaluation used when the agent platform is unreachable:
/// validation errors and missing created records are classified before the
/// plain status is trusted.
pub fn heuristic_evaluation(report: &Value) -> Value {
    let status = report
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    let validation_errors = report
        .get("validation_errors")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    let skill_id = report
        .get("skill_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let created_invoice_id = report
        .get("created_invoice_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty());

    let expects_invoice_id =
        skill_id.contains("invoice") && !skill_id.contains("extract") && !skill_id.contains("bulk");

    if validation_errors > 0 {
        return json!({
            "decision": "failure",
            "failure_class": "validation_error",
            "reasons": [format!("Run report contains {} validation errors.", validation_errors)],
            "patch": [],
            "source": "heuristic",
        });
    }
    if expects_invoice_id && created_invoice_id.is_none() {
        return json!({
            "decision": "failure",
            "failure_class": "missing_created_record",
            "reasons": ["Invoice workflow finished without a created invoice id in run report."],
            "patch": [],
            "source": "heuristic",
        });
    }
    if status == "success" {
        return json!({
            "decision": "success",
            "failure_class": Value::Null,
            "reasons": ["Run report status is success."],
            "patch": [],
            "source": "heuristic",
        });
    }
    json!({
        "decision": "failure",
        "failure_class": "runtime_error",
        "reasons": [report
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Run report indicates failure.")
            .to_string()],
        "patch": [],
        "source": "heuristic",
    })
}

/// Fetch an evaluation document: object storage first, then the local eval
/// cache written by the eval command.
pub async fn fetch_eval(
    cfg: &EnvConfig,
    store: Option<&ObjectStore>,
    eval_key: &str,
) -> Result<Value> {
    let storage_key = eval_key.strip_prefix("artifacts/").unwrap_or(eval_key);

    if let Some(store) = store {
        match store
            .download_json(&format!("artifacts/{}", storage_key))
            .await
        {
            Ok(eval) => return Ok(eval),
            Err(err) => {
                tracing::debug!("storage eval fetch failed, trying local cache: {err:#}");
            }
        }
    }

    let run_id = std::path::Path::new(storage_key)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(storage_key);
    let local_path = cfg.evals_dir().join(format!("{}.json", run_id));
    let raw = std::fs::read_to_string(&local_path).with_context(|| {
        format!(
            "evaluation not found in storage or local cache ({})",
            local_path.display()
        )
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Apply an RFC 6902 patch to a skill spec and bump its version.
///
/// Guardrail: noisy model patches sometimes blank the slots schema; when the
/// original had properties and the patched spec has none, the original
/// schema is restored.
pub fn apply_eval_patch(skill_spec: &Value, patch_ops: &[Value]) -> Result<Value> {
    if patch_ops.is_empty() {
        bail!("no patch operations found in evaluation");
    }

    let patch: json_patch::Patch = serde_json::from_value(Value::Array(patch_ops.to_vec()))
        .context("evaluation patch is not a valid RFC 6902 document")?;
    let mut patched = skill_spec.clone();
    json_patch::patch(&mut patched, &patch).context("patch application failed")?;

    let original_props = skill_spec
        .get("slots_schema")
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .map(|p| !p.is_empty())
        .unwrap_or(false);
    let patched_props = patched
        .get("slots_schema")
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .map(|p| !p.is_empty())
        .unwrap_or(false);
    if original_props && !patched_props
        && let (Some(patched_obj), Some(original_schema)) =
            (patched.as_object_mut(), skill_spec.get("slots_schema"))
    {
        patched_obj.insert("slots_schema".to_string(), original_schema.clone());
    }

    let next_version = skill_spec.get("version").and_then(Value::as_i64).unwrap_or(1) + 1;
    if let Some(patched_obj) = patched.as_object_mut() {
        patched_obj.insert("version".to_string(), json!(next_version));
    }

    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> Value {
        json!({
            "id": "invoiceapp.sales_invoice.existing",
            "version": 3,
            "steps": [
                { "action": "goto", "value": "https://x.example/desktop/sale/add" },
                { "action": "click", "selector": "#old-save" },
            ],
            "slots_schema": {
                "type": "object",
                "required": ["customer"],
                "properties": { "customer": { "type": "string" } },
            },
        })
    }

    #[test]
    fn patch_replaces_selector_and_bumps_version() {
        let ops = json!([
            { "op": "replace", "path": "/steps/1/selector", "value": "#save" },
        ]);
        let patched = apply_eval_patch(&sample_spec(), ops.as_array().unwrap()).unwrap();
        assert_eq!(patched["steps"][1]["selector"], "#save");
        assert_eq!(patched["version"], 4);
    }

    #[test]
    fn guardrail_restores_erased_slots_schema() {
        let ops = json!([
            { "op": "replace", "path": "/slots_schema", "value": { "type": "object", "properties": {} } },
        ]);
        let patched = apply_eval_patch(&sample_spec(), ops.as_array().unwrap()).unwrap();
        assert_eq!(
            patched["slots_schema"]["properties"]["customer"]["type"],
            "string"
        );
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(apply_eval_patch(&sample_spec(), &[]).is_err());
    }

    #[test]
    fn malformed_patch_is_rejected() {
        let ops = json!([{ "op": "teleport", "path": "/x" }]);
        assert!(apply_eval_patch(&sample_spec(), ops.as_array().unwrap()).is_err());
    }

    #[test]
    fn heuristic_flags_validation_errors_first() {
        let report = json!({
            "status": "success",
            "skill_id": "invoiceapp.sales_invoice.existing",
            "created_invoice_id": "123",
            "validation_errors": ["Mandatory field"],
        });
        let eval = heuristic_evaluation(&report);
        assert_eq!(eval["decision"], "failure");
        assert_eq!(eval["failure_class"], "validation_error");
    }

    #[test]
    fn heuristic_requires_created_id_for_invoice_skills() {
        let report = json!({
            "status": "success",
            "skill_id": "invoiceapp.sales_invoice.existing",
        });
        let eval = heuristic_evaluation(&report);
        assert_eq!(eval["failure_class"], "missing_created_record");

        let extract = json!({ "status": "success", "skill_id": "invoiceapp.extract_sales" });
        assert_eq!(heuristic_evaluation(&extract)["decision"], "success");
    }

    #[test]
    fn heuristic_falls_back_to_runtime_error() {
        let report = json!({ "status": "failed", "error": "timeout at #save" });
        let eval = heuristic_evaluation(&report);
        assert_eq!(eval["failure_class"], "runtime_error");
        assert_eq!(eval["reasons"][0], "timeout at #save");
    }

    #[test]
    fn normalize_eval_coerces_reasons_to_list() {
        let eval = normalize_eval(json!({ "decision": "failure", "reasons": "just one" }));
        assert_eq!(eval["reasons"], json!(["just one"]));
        assert_eq!(eval["patch"], json!([]));

        let eval = normalize_eval(json!({ "decision": "failure", "reasons": [1, "two"] }));
        assert_eq!(eval["reasons"][0], "1");
        assert_eq!(eval["reasons"][1], "two");
    }
}
