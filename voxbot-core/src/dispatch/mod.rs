//! Turns a transcript into an answer.
//!
//! ```text
//! transcript ─► classify ─┬─ Camera ─────────────────────► camera flow
//!                         ├─ MotorStop / MotorExplore ───► tool, no model
//!                         ├─ other command ──────────────► model + tools
//!                         └─ none ───────────────────────► model, no tools
//! ```
//!
//! The history lock is never held across a model call, so STATUS requests
//! stay responsive while a turn is thinking.

pub mod classify;
pub mod history;
pub mod llm;
pub mod tools;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use self::classify::CommandClassifier;
use self::history::{ConversationHistory, Role};
use self::llm::{ChatMessage, LlmClient, LlmReply};
use self::tools::{tool_definitions, Tool, ToolExecutor};
use crate::error::{GenerationError, Result, TurnError};

pub use self::classify::CommandCategory;

/// Where a turn goes after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Text to speak. Already recorded in the history.
    Answer(String),
    /// The camera flow owns the rest of the turn.
    Camera,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub system_prompt: String,
    pub max_history_messages: usize,
    pub history_timeout: Duration,
}

pub struct AnswerDispatcher {
    classifier: CommandClassifier,
    llm: Box<dyn LlmClient>,
    tools: Arc<dyn ToolExecutor>,
    history: Mutex<ConversationHistory>,
    system_prompt: String,
    tool_schema: Value,
}

impl AnswerDispatcher {
    pub fn new(
        config: DispatchConfig,
        llm: Box<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        Ok(Self {
            classifier: CommandClassifier::new()?,
            llm,
            tools,
            history: Mutex::new(ConversationHistory::new(
                config.max_history_messages,
                config.history_timeout,
            )),
            system_prompt: config.system_prompt,
            tool_schema: tool_definitions(),
        })
    }

    pub fn dispatch(
        &self,
        transcript: &str,
        now: Instant,
    ) -> std::result::Result<DispatchOutcome, TurnError> {
        let category = self.classifier.classify(transcript);
        debug!(category = category.map(CommandCategory::as_str), "transcript classified");

        if category == Some(CommandCategory::Camera) {
            info!("camera command, skipping language model");
            return Ok(DispatchOutcome::Camera);
        }

        if let Some(tool) = category.and_then(Tool::immediate) {
            info!(tool = tool.name(), "immediate command, skipping language model");
            let result = self.tools.execute(&tool);
            let mut history = self.history.lock();
            history.begin_turn(transcript, now);
            history.record_answer(&result);
            return Ok(DispatchOutcome::Answer(result));
        }

        let messages = {
            let mut history = self.history.lock();
            history.begin_turn(transcript, now);
            std::iter::once(ChatMessage::new(Role::System, self.system_prompt.as_str()))
                .chain(
                    history
                        .turns()
                        .map(|t| ChatMessage::new(t.role, t.content.as_str())),
                )
                .collect::<Vec<_>>()
        };

        let tools = category.map(|_| &self.tool_schema);
        let answer = match self.llm.chat(&messages, tools)? {
            LlmReply::Text(text) => text,
            LlmReply::ToolCalls(calls) => {
                // Validate every call before running any of them.
                let parsed = calls
                    .iter()
                    .map(Tool::from_call)
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut results = Vec::with_capacity(parsed.len());
                for tool in parsed {
                    if tool.is_camera() {
                        info!("model requested the camera");
                        return Ok(DispatchOutcome::Camera);
                    }
                    info!(tool = tool.name(), "executing tool");
                    results.push(self.tools.execute(&tool));
                }
                let joined = results.join(" ");
                if joined.trim().is_empty() {
                    return Err(GenerationError::Empty.into());
                }
                joined
            }
        };

        self.history.lock().record_answer(&answer);
        Ok(DispatchOutcome::Answer(answer))
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tools::ToolCall;
    use serde_json::json;

    type Seen = Arc<Mutex<Vec<(Vec<ChatMessage>, bool)>>>;

    struct FakeLlm {
        reply: std::result::Result<LlmReply, GenerationError>,
        seen: Seen,
    }

    impl LlmClient for FakeLlm {
        fn name(&self) -> &str {
            "fake"
        }

        fn chat(
            &self,
            messages: &[ChatMessage],
            tools: Option<&Value>,
        ) -> std::result::Result<LlmReply, GenerationError> {
            self.seen.lock().push((messages.to_vec(), tools.is_some()));
            self.reply.clone()
        }
    }

    #[derive(Default)]
    struct RecordingTools {
        ran: Mutex<Vec<&'static str>>,
    }

    impl ToolExecutor for RecordingTools {
        fn execute(&self, tool: &Tool) -> String {
            self.ran.lock().push(tool.name());
            format!("{} done.", tool.name())
        }
    }

    fn dispatcher(
        reply: std::result::Result<LlmReply, GenerationError>,
    ) -> (AnswerDispatcher, Seen, Arc<RecordingTools>) {
        let seen: Seen = Arc::default();
        let tools = Arc::new(RecordingTools::default());
        let d = AnswerDispatcher::new(
            DispatchConfig {
                system_prompt: "Be brief.".into(),
                max_history_messages: 10,
                history_timeout: Duration::from_secs(300),
            },
            Box::new(FakeLlm {
                reply,
                seen: Arc::clone(&seen),
            }),
            Arc::clone(&tools) as Arc<dyn ToolExecutor>,
        )
        .unwrap();
        (d, seen, tools)
    }

    fn tool_reply(calls: &[(&str, Value)]) -> std::result::Result<LlmReply, GenerationError> {
        Ok(LlmReply::ToolCalls(
            calls
                .iter()
                .map(|(name, arguments)| ToolCall {
                    name: (*name).into(),
                    arguments: arguments.clone(),
                })
                .collect(),
        ))
    }

    #[test]
    fn open_question_goes_to_model_without_tools() {
        let (d, seen, _) = dispatcher(Ok(LlmReply::Text("Because of scattering.".into())));
        let out = d.dispatch("why is the sky blue", Instant::now()).unwrap();
        assert_eq!(out, DispatchOutcome::Answer("Because of scattering.".into()));

        let seen = seen.lock();
        let (messages, had_tools) = &seen[0];
        assert!(!had_tools);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[1].content, "why is the sky blue");
        assert_eq!(d.history_len(), 2);
    }

    #[test]
    fn command_goes_to_model_with_tools_and_runs_them_in_order() {
        let (d, seen, tools) = dispatcher(tool_reply(&[
            ("set_volume", json!({ "percent": 30 })),
            ("get_current_time", json!({})),
        ]));
        let out = d.dispatch("set the volume to thirty", Instant::now()).unwrap();
        assert_eq!(
            out,
            DispatchOutcome::Answer("set_volume done. get_current_time done.".into())
        );
        assert!(seen.lock()[0].1);
        assert_eq!(*tools.ran.lock(), vec!["set_volume", "get_current_time"]);
    }

    #[test]
    fn camera_category_bypasses_model() {
        let (d, seen, _) = dispatcher(Ok(LlmReply::Text("unused".into())));
        assert_eq!(
            d.dispatch("take a picture", Instant::now()),
            Ok(DispatchOutcome::Camera)
        );
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn stop_runs_immediately_without_model() {
        let (d, seen, tools) = dispatcher(Ok(LlmReply::Text("unused".into())));
        let out = d.dispatch("stop", Instant::now()).unwrap();
        assert_eq!(out, DispatchOutcome::Answer("motor_stop done.".into()));
        assert!(seen.lock().is_empty());
        assert_eq!(*tools.ran.lock(), vec!["motor_stop"]);
    }

    #[test]
    fn model_requested_camera_hands_off() {
        let (d, _, tools) = dispatcher(tool_reply(&[("take_picture", json!({}))]));
        assert_eq!(
            d.dispatch("turn left and look", Instant::now()),
            Ok(DispatchOutcome::Camera)
        );
        assert!(tools.ran.lock().is_empty());
    }

    #[test]
    fn unknown_tool_fails_before_anything_runs() {
        let (d, _, tools) = dispatcher(tool_reply(&[
            ("motor_forward", json!({})),
            ("self_destruct", json!({})),
        ]));
        let err = d.dispatch("go forward", Instant::now()).unwrap_err();
        assert_eq!(
            err,
            TurnError::Generation(GenerationError::UnknownTool("self_destruct".into()))
        );
        assert!(tools.ran.lock().is_empty());
    }

    #[test]
    fn generation_failure_propagates() {
        let (d, _, _) = dispatcher(Err(GenerationError::Timeout));
        assert_eq!(
            d.dispatch("tell me a story", Instant::now()),
            Err(TurnError::Generation(GenerationError::Timeout))
        );
    }
}
