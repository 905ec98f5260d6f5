use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nanoprompt_contracts::events::EventWriter;
use nanoprompt_contracts::rewrite::{RewriteFailure, RewriteOutcome, RewriteResult};
use nanoprompt_contracts::templates::TemplateCatalog;
use serde_json::json;

use crate::agent::{AgentDefinition, Exchange, RewriteAgent};
use crate::{error_chain_text, map_object, truncate_text};

/// Turns a raw user prompt into a template-shaped prompt via the rewriting
/// agent. Every failure degrades to the caller's prompt, unchanged.
#[derive(Clone)]
pub struct RewriteOrchestrator {
    agent: Arc<dyn RewriteAgent>,
    definition: Arc<AgentDefinition>,
    events: EventWriter,
}

impl RewriteOrchestrator {
    pub fn new(agent: Arc<dyn RewriteAgent>, definition: AgentDefinition) -> Self {
        Self {
            agent,
            definition: Arc::new(definition),
            events: EventWriter::disabled(),
        }
    }

    /// Orchestrator using the standard rewriter instruction for `model`.
    pub fn with_catalog(
        agent: Arc<dyn RewriteAgent>,
        catalog: &TemplateCatalog,
        model: Option<&str>,
    ) -> Self {
        Self::new(agent, AgentDefinition::prompt_rewriter(catalog, model))
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn rewrite(&self, raw_prompt: &str) -> String {
        self.rewrite_detailed(raw_prompt).into_prompt()
    }

    pub fn rewrite_detailed(&self, raw_prompt: &str) -> RewriteOutcome {
        let exchange = Exchange::new(raw_prompt);
        let started = Instant::now();
        self.events.record(
            "rewrite_started",
            map_object(json!({
                "session_id": exchange.session_id(),
                "agent": self.agent.name(),
                "model": self.definition.model,
                "prompt_chars": raw_prompt.chars().count(),
            })),
        );

        let outcome = match self
            .final_reply(&exchange)
            .and_then(|reply| RewriteResult::from_reply(&reply))
        {
            Ok(result) => RewriteOutcome::Rewritten(result),
            Err(reason) => RewriteOutcome::Fallback {
                prompt: raw_prompt.to_string(),
                reason,
            },
        };
        self.record_outcome(&exchange, &outcome, started.elapsed());
        outcome
    }

    /// Same as [`RewriteOrchestrator::rewrite_detailed`] but gives up after
    /// `timeout`, which counts as no response. The abandoned agent call keeps
    /// running on its own thread until the runtime returns.
    pub fn rewrite_within(&self, raw_prompt: &str, timeout: Duration) -> RewriteOutcome {
        let (tx, rx) = mpsc::channel();
        let worker = self.clone();
        let prompt = raw_prompt.to_string();
        let spawned = thread::Builder::new()
            .name("nanoprompt-rewrite".to_string())
            .spawn(move || {
                let _ = tx.send(worker.rewrite_detailed(&prompt));
            });
        if let Err(err) = spawned {
            return RewriteOutcome::Fallback {
                prompt: raw_prompt.to_string(),
                reason: RewriteFailure::CapabilityFailure(format!(
                    "could not start rewrite worker: {err}"
                )),
            };
        }
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => {
                self.events.record(
                    "rewrite_timeout",
                    map_object(json!({ "timeout_s": timeout.as_secs_f64() })),
                );
                RewriteOutcome::Fallback {
                    prompt: raw_prompt.to_string(),
                    reason: RewriteFailure::NoResponse,
                }
            }
        }
    }

    /// Text of the first terminal event; later events are not consumed.
    fn final_reply(&self, exchange: &Exchange) -> Result<String, RewriteFailure> {
        let events = self
            .agent
            .run(&self.definition, exchange)
            .map_err(|err| RewriteFailure::CapabilityFailure(error_chain_text(&err, 512)))?;
        for event in events {
            let event =
                event.map_err(|err| RewriteFailure::CapabilityFailure(error_chain_text(&err, 512)))?;
            if event.is_final_response() {
                return event
                    .final_text()
                    .map(str::to_string)
                    .ok_or(RewriteFailure::NoResponse);
            }
        }
        Err(RewriteFailure::NoResponse)
    }

    fn record_outcome(&self, exchange: &Exchange, outcome: &RewriteOutcome, elapsed: Duration) {
        let latency_s = elapsed.as_secs_f64();
        match outcome {
            RewriteOutcome::Rewritten(result) => self.events.record(
                "rewrite_completed",
                map_object(json!({
                    "session_id": exchange.session_id(),
                    "template_id": result.chosen_template_id,
                    "template_name": result.chosen_template_name,
                    "aspect_ratio": result.suggested_aspect_ratio,
                    "prompt_preview": truncate_text(&result.rewritten_prompt, 160),
                    "latency_s": latency_s,
                })),
            ),
            RewriteOutcome::Fallback { reason, .. } => self.events.record(
                "rewrite_fallback",
                map_object(json!({
                    "session_id": exchange.session_id(),
                    "reason": reason.code(),
                    "detail": reason.to_string(),
                    "latency_s": latency_s,
                })),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use nanoprompt_contracts::events::EventWriter;
    use nanoprompt_contracts::rewrite::{RewriteFailure, RewriteOutcome};
    use nanoprompt_contracts::templates::TemplateCatalog;
    use serde_json::Value;

    use super::RewriteOrchestrator;
    use crate::agent::{AgentDefinition, AgentEvent, AgentEvents, DryrunAgent, Exchange, RewriteAgent};

    enum Script {
        Events(Vec<AgentEvent>),
        FailOnRun,
        FailMidStream,
        Sleep(Duration),
    }

    struct ScriptedAgent {
        script: Script,
        calls: AtomicUsize,
        sessions: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                sessions: Mutex::new(Vec::new()),
            })
        }

        fn replying(text: &str) -> Arc<Self> {
            Self::new(Script::Events(vec![AgentEvent::Final {
                text: Some(text.to_string()),
            }]))
        }
    }

    impl RewriteAgent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        fn run(&self, _definition: &AgentDefinition, exchange: &Exchange) -> Result<AgentEvents> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut sessions) = self.sessions.lock() {
                sessions.push(exchange.session_id().to_string());
            }
            match &self.script {
                Script::Events(events) => {
                    let events: Vec<Result<AgentEvent>> = events.iter().cloned().map(Ok).collect();
                    Ok(Box::new(events.into_iter()))
                }
                Script::FailOnRun => Err(anyhow!("search quota exhausted")),
                Script::FailMidStream => Ok(Box::new(
                    vec![
                        Ok(AgentEvent::ToolCall {
                            tool: "google_search".to_string(),
                            query: "q".to_string(),
                        }),
                        Err(anyhow!("stream reset")),
                    ]
                    .into_iter(),
                )),
                Script::Sleep(delay) => {
                    std::thread::sleep(*delay);
                    Ok(Box::new(std::iter::empty()))
                }
            }
        }
    }

    fn orchestrator(agent: Arc<ScriptedAgent>) -> RewriteOrchestrator {
        RewriteOrchestrator::with_catalog(agent, &TemplateCatalog::builtin(), None)
    }

    #[test]
    fn well_formed_reply_returns_rewritten_prompt() {
        let agent = ScriptedAgent::replying(
            r#"{"chosen_template_id": 5, "rewritten_prompt": "Minimalist composition with a single red kite."}"#,
        );
        let rewritten = orchestrator(agent).rewrite("a kite");
        assert_eq!(rewritten, "Minimalist composition with a single red kite.");
    }

    #[test]
    fn prose_and_fences_around_reply_are_tolerated() {
        let agent = ScriptedAgent::replying(
            "I searched for the style first.\n```json\n{\"rewritten_prompt\": \"Ultra-realistic shot of a fox.\", \"optional_followups\": [\"Night?\"]}\n```\nLet me know!",
        );
        let outcome = orchestrator(agent).rewrite_detailed("fox photo");
        let result = outcome.result().cloned().unwrap_or_default();
        assert_eq!(result.rewritten_prompt, "Ultra-realistic shot of a fox.");
        assert_eq!(result.optional_followups, vec!["Night?"]);
    }

    #[test]
    fn missing_field_falls_back_to_raw_prompt() {
        let agent = ScriptedAgent::replying(r#"{"chosen_template_id": 2, "rationale": "sticker"}"#);
        let outcome = orchestrator(agent).rewrite_detailed("cute sticker");
        assert_eq!(
            outcome,
            RewriteOutcome::Fallback {
                prompt: "cute sticker".to_string(),
                reason: RewriteFailure::MissingField,
            }
        );
    }

    #[test]
    fn prose_only_reply_falls_back() {
        let agent = ScriptedAgent::replying("Sorry, I cannot help with that request.");
        let outcome = orchestrator(agent).rewrite_detailed("P");
        assert_eq!(outcome.prompt(), "P");
        assert_eq!(outcome.failure(), Some(&RewriteFailure::UnparseableReply));
    }

    #[test]
    fn no_terminal_event_or_empty_text_is_no_response() {
        let silent = ScriptedAgent::new(Script::Events(vec![AgentEvent::ToolCall {
            tool: "google_search".to_string(),
            query: "{\"rewritten_prompt\": \"not final\"}".to_string(),
        }]));
        assert_eq!(
            orchestrator(silent).rewrite_detailed("P").failure(),
            Some(&RewriteFailure::NoResponse)
        );

        let empty = ScriptedAgent::new(Script::Events(vec![AgentEvent::Final { text: None }]));
        assert_eq!(orchestrator(empty).rewrite(""), "");
    }

    #[test]
    fn only_the_first_terminal_event_counts() {
        let agent = ScriptedAgent::new(Script::Events(vec![
            AgentEvent::Final {
                text: Some("no json here".to_string()),
            },
            AgentEvent::Final {
                text: Some("{\"rewritten_prompt\": \"late\"}".to_string()),
            },
        ]));
        assert_eq!(orchestrator(agent).rewrite("P"), "P");
    }

    #[test]
    fn capability_errors_never_escape() {
        let outcome = orchestrator(ScriptedAgent::new(Script::FailOnRun)).rewrite_detailed("P");
        assert_eq!(outcome.prompt(), "P");
        assert!(matches!(
            outcome.failure(),
            Some(RewriteFailure::CapabilityFailure(detail)) if detail.contains("search quota exhausted")
        ));

        let outcome = orchestrator(ScriptedAgent::new(Script::FailMidStream)).rewrite_detailed("P");
        assert!(matches!(
            outcome.failure(),
            Some(RewriteFailure::CapabilityFailure(_))
        ));
    }

    #[test]
    fn every_call_uses_a_fresh_exchange() {
        let agent = ScriptedAgent::replying("{\"rewritten_prompt\": \"x\"}");
        let orchestrator = orchestrator(agent.clone());
        orchestrator.rewrite("one");
        orchestrator.rewrite("two");
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
        let sessions = agent.sessions.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0], sessions[1]);
    }

    #[test]
    fn concurrent_callers_do_not_interfere() {
        let orchestrator = orchestrator(ScriptedAgent::replying("{\"rewritten_prompt\": \"shared\"}"));
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let worker = orchestrator.clone();
                std::thread::spawn(move || worker.rewrite(&format!("prompt {idx}")))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap_or_default(), "shared");
        }
    }

    #[test]
    fn timeout_is_treated_as_no_response() {
        let agent = ScriptedAgent::new(Script::Sleep(Duration::from_millis(500)));
        let outcome = orchestrator(agent).rewrite_within("slow", Duration::from_millis(20));
        assert_eq!(
            outcome,
            RewriteOutcome::Fallback {
                prompt: "slow".to_string(),
                reason: RewriteFailure::NoResponse,
            }
        );
    }

    #[test]
    fn dryrun_agent_rewrites_within_deadline() {
        let orchestrator =
            RewriteOrchestrator::with_catalog(Arc::new(DryrunAgent), &TemplateCatalog::builtin(), None);
        let outcome = orchestrator.rewrite_within("minimalist lighthouse", Duration::from_secs(5));
        assert_eq!(outcome.result().and_then(|result| result.chosen_template_id), Some(5));
    }

    #[test]
    fn outcomes_are_logged_as_events() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let events = EventWriter::new(&path, "run-test");

        orchestrator(ScriptedAgent::replying("{\"rewritten_prompt\": \"ok\", \"chosen_template_id\": 3}"))
            .with_events(events.clone())
            .rewrite("first");
        orchestrator(ScriptedAgent::replying("nothing"))
            .with_events(events)
            .rewrite("second");

        let rows: Vec<Value> = fs::read_to_string(&path)?
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let types: Vec<&str> = rows.iter().filter_map(|row| row["type"].as_str()).collect();
        assert_eq!(
            types,
            vec!["rewrite_started", "rewrite_completed", "rewrite_started", "rewrite_fallback"]
        );
        assert_eq!(rows[1]["template_id"], Value::from(3));
        assert_eq!(rows[3]["reason"], Value::from("unparseable_reply"));
        Ok(())
    }
}
