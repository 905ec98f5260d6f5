use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::agent::{AgentDefinition, AgentEvent, AgentEvents, AgentTool, Exchange, RewriteAgent};
use crate::config::EngineConfig;
use crate::truncate_text;

/// Blocking `generateContent` transport shared by the rewriting agent and the
/// image generator.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: EngineConfig,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    /// POSTs `payload` and returns the parsed JSON body. Timeouts and connect
    /// failures are retried with a linearly growing delay; HTTP errors are not.
    pub fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        let max_retries = self.config.transport_retries;

        for attempt in 0..=max_retries {
            let response = self
                .http
                .post(&endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.config.request_timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return response_json_or_error("Gemini", ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    eprintln!(
                        "nanoprompt warning: Gemini transport retry {}/{} after transient request failure.",
                        attempt + 1,
                        max_retries
                    );
                    let delay_s = self.config.retry_backoff_s * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        Err(anyhow!("Gemini request to {endpoint} made no attempt"))
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

pub(crate) fn first_candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Rewriting agent backed by a Gemini text model with Google Search grounding.
#[derive(Debug, Clone)]
pub struct GeminiAgent {
    client: GeminiClient,
}

impl GeminiAgent {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    pub fn build_payload(definition: &AgentDefinition, exchange: &Exchange) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": definition.instruction }] }),
        );
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": [{ "text": exchange.user_message() }],
            }]),
        );
        let tools: Vec<Value> = definition
            .tools
            .iter()
            .map(|tool| match tool {
                AgentTool::GoogleSearch => json!({ "google_search": {} }),
            })
            .collect();
        if !tools.is_empty() {
            payload.insert("tools".to_string(), Value::Array(tools));
        }
        Value::Object(payload)
    }

    /// Search queries the model issued, then one terminal event carrying the
    /// first candidate's visible text (thought parts are skipped).
    pub fn events_from_response(response: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        let queries = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("groundingMetadata"))
            .and_then(|grounding| grounding.get("webSearchQueries"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for query in queries.iter().filter_map(Value::as_str) {
            events.push(AgentEvent::ToolCall {
                tool: AgentTool::GoogleSearch.name().to_string(),
                query: query.to_string(),
            });
        }

        let text = first_candidate_parts(response)
            .iter()
            .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("");
        events.push(AgentEvent::Final {
            text: Some(text).filter(|value| !value.trim().is_empty()),
        });
        events
    }
}

impl RewriteAgent for GeminiAgent {
    fn name(&self) -> &str {
        "gemini"
    }

    fn run(&self, definition: &AgentDefinition, exchange: &Exchange) -> Result<AgentEvents> {
        let payload = Self::build_payload(definition, exchange);
        let response = self
            .client
            .generate_content(&definition.model, &payload)
            .context("rewriting agent call failed")?;
        let events = Self::events_from_response(&response)
            .into_iter()
            .map(Ok)
            .collect::<Vec<Result<AgentEvent>>>();
        Ok(Box::new(events.into_iter()))
    }
}
