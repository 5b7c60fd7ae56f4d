use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value, json};

use super::config::EnvConfig;

const CONVERSATION_TIMEOUT: Duration = Duration::from_secs(120);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the agent-orchestration platform (Dust-style conversation API).
pub struct DustClient {
    api_key: String,
    workspace_id: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct ConversationReply {
    pub conversation_id: String,
    pub message: String,
}

/// Routing decision for a natural-language prompt.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub skill_id: Option<String>,
    pub slots: Map<String, Value>,
    pub confidence: f64,
}

/// Pull the outermost JSON object out of an agent reply that may wrap it in
/// prose or code fences.
pub fn parse_json_response(text: &str) -> Result<Value> {
    let start = text.find('{');
    let end = text.rfind('}');
    let candidate = match (start, end) {
        (Some(s), Some(e)) if e >= s => &text[s..=e],
        _ => text,
    };
    serde_json::from_str(candidate)
        .with_context(|| format!("agent did not return valid JSON: {}", text))
}

fn last_agent_message(conversation: &Value) -> Option<&Value> {
    conversation
        .get("conversation")?
        .get("content")?
        .as_array()?
        .last()?
        .as_array()?
        .first()
}

impl DustClient {
    pub fn from_config(cfg: &EnvConfig) -> Result<Self> {
        let (Some(api_key), Some(workspace_id)) = (&cfg.dust_api_key, &cfg.dust_workspace_id)
        else {
            bail!("DUST_API_KEY and DUST_WORKSPACE_ID must be set in environment");
        };
        Ok(Self {
            api_key: api_key.clone(),
            workspace_id: workspace_id.clone(),
            base_url: cfg.dust_base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        })
    }

    fn workspace_url(&self, suffix: &str) -> String {
        format!("{}/w/{}/{}", self.base_url, self.workspace_id, suffix)
    }

    /// Create a conversation and block until the agent's first reply.
    pub async fn create_conversation(
        &self,
        content: &str,
        agent_id: &str,
        title: Option<&str>,
    ) -> Result<ConversationReply> {
        let payload = json!({
            "message": {
                "content": content,
                "mentions": [{ "configurationId": agent_id }],
                "context": { "username": "cli-user", "timezone": "UTC" },
            },
            "blocking": true,
            "title": title
                .map(String::from)
                .unwrap_or_else(|| format!("CLI Task: {:.30}...", content)),
        });

        let resp = self
            .http
            .post(self.workspace_url("assistant/conversations"))
            .bearer_auth(&self.api_key)
            .timeout(CONVERSATION_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("agent platform error ({}): {}", status, body);
        }

        let result: Value = resp.json().await?;
        let conversation_id = result
            .get("conversation")
            .and_then(|c| c.get("sId"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("agent platform returned no conversation id"))?
            .to_string();
        let message = last_agent_message(&result)
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("agent platform returned empty content"))?
            .to_string();

        Ok(ConversationReply {
            conversation_id,
            message,
        })
    }

    /// Post a follow-up message into an existing conversation.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        agent_id: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.workspace_url(&format!(
                "assistant/conversations/{}/messages",
                conversation_id
            )))
            .bearer_auth(&self.api_key)
            .timeout(CONVERSATION_TIMEOUT)
            .json(&json!({
                "content": content,
                "mentions": [{ "configurationId": agent_id }],
                "context": { "username": "cli-user", "timezone": "UTC" },
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("agent platform error ({}): {}", status, body);
        }
        Ok(())
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.workspace_url(&format!("assistant/conversations/{}", conversation_id)))
            .bearer_auth(&self.api_key)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("agent platform error ({}): {}", status, body);
        }
        Ok(resp.json().await?)
    }

    /// Send a message into a thread and poll until the agent reply succeeds.
    pub async fn reply_in_thread(
        &self,
        conversation_id: &str,
        content: &str,
        agent_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<String> {
        let poll_interval = if poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            poll_interval
        };
        self.send_message(conversation_id, content, agent_id).await?;

        let mut waited = Duration::ZERO;
        while waited < max_wait {
            tokio::time::sleep(poll_interval).await;
            waited += poll_interval;

            let conversation = self.fetch_conversation(conversation_id).await?;
            if let Some(last) = last_agent_message(&conversation) {
                let is_agent = last.get("type").and_then(Value::as_str) == Some("agent_message");
                let succeeded = last.get("status").and_then(Value::as_str) == Some("succeeded");
                if is_agent && succeeded {
                    return Ok(last
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string());
                }
            }
        }
        bail!("agent did not reply within the timeout")
    }

    /// Route a natural-language prompt to a skill id and slot values.
    pub async fn route_prompt(&self, prompt: &str, agent_id: &str) -> Result<RouteDecision> {
        let content = format!(
            r#"
Route this request to a skill and return ONLY a JSON object with 'skill_id' and 'slots'.
Request: {prompt}

Available Skills:
- invoiceapp.sales_invoice.existing: Create a sales invoice for an existing customer.
- invoiceapp.sales_invoice.new_customer: Create a sales invoice and add a new customer inline.
- invoiceapp.purchase_invoice.new: Create a new purchase invoice.
- invoiceapp.extract_sales: Extract/list all sales invoices from the table.
- invoiceapp.bulk_create_drafts: Create multiple draft invoices from a list.

Example Output:
{{
  "skill_id": "invoiceapp.sales_invoice.existing",
  "slots": {{
    "customer": "ACME Corp, LLC",
    "amount": 32000,
    "currency": "USD",
    "period": "monthly",
    "tax_rule": "reverse_charge",
    "vat_id": "IE6388047V"
  }},
  "confidence": 0.9,
  "reasoning": "Sales invoice requested with recurrence and VAT context."
}}
"#
        );
        let reply = self
            .create_conversation(&content, agent_id, Some(&format!("Route: {:.20}", prompt)))
            .await?;
        let parsed = parse_json_response(&reply.message)?;

        let skill_id = parsed
            .get("skill_id")
            .and_then(Value::as_str)
            .map(String::from);
        let slots = parsed
            .get("slots")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let confidence = parsed
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);

        Ok(RouteDecision {
            skill_id,
            slots,
            confidence,
        })
    }

    /// Evaluate a run report and propose an RFC 6902 patch for the skill.
    pub async fn evaluate_run(
        &self,
        report: &Value,
        skill_spec: &Value,
        agent_id: &str,
    ) -> Result<Value> {
        let run_id = report
            .get("run_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let content = format!(
            "Evaluate this browser automation run and propose a JSON patch (RFC6902) to fix any \
             issues in the SkillSpec.\nReturn ONLY a JSON object with 'decision' \
             (success/failure), 'failure_class', 'reasons', and 'patch'.\n\nSkill Spec:\n{}\n\n\
             Run Report:\n{}\n",
            serde_json::to_string_pretty(skill_spec)?,
            serde_json::to_string_pretty(report)?,
        );
        let reply = self
            .create_conversation(&content, agent_id, Some(&format!("Eval: {:.8}", run_id)))
            .await?;
        parse_json_response(&reply.message)
    }

    /// One role in the multi-agent synthesis pipeline; the reply must be a
    /// bare JSON object.
    async fn run_json_role(
        &self,
        role_name: &str,
        task: &str,
        context_payload: &Value,
        title: &str,
        agent_id: &str,
    ) -> Result<Value> {
        let content = format!(
            "You are the '{}' agent in a multi-agent automation system.\n\
             Return ONLY valid JSON and no prose.\n\nTask:\n{}\n\nContext JSON:\n{}\n",
            role_name,
            task,
            serde_json::to_string_pretty(context_payload)?,
        );
        let reply = self
            .create_conversation(&content, agent_id, Some(title))
            .await?;
        let parsed = parse_json_response(&reply.message)?;
        if !parsed.is_object() {
            bail!("{} agent returned non-object JSON", role_name);
        }
        Ok(parsed)
    }

    /// Planner → writer → critic pipeline generating a SkillSpec for a
    /// prompt, seeded with the persisted platform-map digest.
    pub async fn synthesize_skill_from_prompt(
        &self,
        skill_id: &str,
        prompt: &str,
        platform_map_digest: &Value,
        available_skill_ids: &[String],
        agent_id: &str,
    ) -> Result<Value> {
        let planner = self
            .run_json_role(
                "prompt_planner",
                "Map the user prompt to executable workflow intent using platform memory. \
                 Return keys: objective, reuse_existing_skill, candidate_skill_id, \
                 slot_candidates, action_plan.",
                &json!({
                    "prompt": prompt,
                    "target_skill_id": skill_id,
                    "platform_map_digest": platform_map_digest,
                    "available_skill_ids": available_skill_ids,
                }),
                &format!("Plan prompt: {:.40}", prompt),
                agent_id,
            )
            .await?;

        let writer = self
            .run_json_role(
                "prompt_skill_writer",
                "Generate a new SkillSpec for this prompt. \
                 Use only supported actions: goto, click, fill, fill_date, select_option, \
                 select2, select2_tax, wait, wait_for_url, screenshot, evaluate, \
                 check_validation. Return keys: skill_spec.",
                &json!({
                    "prompt": prompt,
                    "target_skill_id": skill_id,
                    "platform_map_digest": platform_map_digest,
                    "planner": planner.clone(),
                }),
                &format!("Write prompt skill: {}", skill_id),
                agent_id,
            )
            .await?;

        let candidate = writer.get("skill_spec").cloned().unwrap_or(writer.clone());
        let critic = self
            .run_json_role(
                "prompt_skill_critic",
                "Review and repair the generated SkillSpec. \
                 Return keys: skill_spec, risks, assumptions.",
                &json!({
                    "prompt": prompt,
                    "target_skill_id": skill_id,
                    "candidate_skill_spec": candidate,
                    "planner": planner.clone(),
                    "platform_map_digest": platform_map_digest,
                }),
                &format!("Critique prompt skill: {}", skill_id),
                agent_id,
            )
            .await?;

        let skill_spec = critic
            .get("skill_spec")
            .cloned()
            .or_else(|| writer.get("skill_spec").cloned())
            .unwrap_or(writer.clone());

        Ok(json!({
            "planner": planner,
            "writer": writer,
            "critic": critic,
            "skill_spec": skill_spec,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_response_extracts_object_from_prose() {
        let text = "Sure! Here is the routing:\n{\"skill_id\": \"a.b\", \"slots\": {}}\nDone.";
        let value = parse_json_response(text).unwrap();
        assert_eq!(value["skill_id"], "a.b");
    }

    #[test]
    fn parse_json_response_handles_bare_object() {
        let value = parse_json_response("{\"decision\": \"success\"}").unwrap();
        assert_eq!(value["decision"], "success");
    }

    #[test]
    fn parse_json_response_rejects_non_json() {
        assert!(parse_json_response("no json here").is_err());
    }

    #[test]
    fn last_agent_message_walks_nested_content() {
        let conversation = serde_json::json!({
            "conversation": {
                "sId": "c1",
                "content": [
                    [{ "type": "user_message", "content": "hi" }],
                    [{ "type": "agent_message", "status": "succeeded", "content": "hello" }],
                ],
            }
        });
        let last = last_agent_message(&conversation).unwrap();
        assert_eq!(last["content"], "hello");
    }
}
