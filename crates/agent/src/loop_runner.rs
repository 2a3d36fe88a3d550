//! The conversation loop implementation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracebot_core::event::{DomainEvent, EventBus};
use tracebot_core::memory::{ConversationKey, ConversationStore};
use tracebot_core::message::Turn;
use tracebot_core::provider::{Provider, ProviderRequest};
use tracebot_core::tool::{ToolGateway, ToolResult};
use tracing::{debug, error, info, warn};

/// Reply when the model answers with no text at all.
pub const EMPTY_REPLY: &str = "I couldn't process that request.";

/// Reply when the iteration cap is hit.
pub const CAP_EXCEEDED_REPLY: &str = "Sorry, the request took too many steps to complete.";

/// LLM queries allowed per user request.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Reply for a failed request.
pub fn error_reply(error: &dyn std::fmt::Display) -> String {
    format!("Sorry, I encountered an error: {error}")
}

/// How a `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model produced a text-only response
    Completed,
    /// Every allowed query asked for more tools
    IterationCapExceeded,
    /// The LLM query (or the gateway itself) failed
    Failed,
}

/// The result of one `run`. `reply` is always user-presentable.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub reply: String,
    pub termination: Termination,
    /// LLM queries issued
    pub iterations: usize,
    /// Tool calls executed
    pub tool_calls: usize,
}

/// Drives LLM queries and tool executions for one user message at a time.
pub struct ConversationLoop {
    provider: Arc<dyn Provider>,
    gateway: Arc<dyn ToolGateway>,
    memory: Arc<dyn ConversationStore>,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    max_iterations: usize,
    event_bus: Arc<EventBus>,
    key_locks: std::sync::Mutex<HashMap<ConversationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        gateway: Arc<dyn ToolGateway>,
        memory: Arc<dyn ConversationStore>,
        model: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            gateway,
            memory,
            model: model.into(),
            max_tokens: 1000,
            temperature: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_bus,
            key_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Set the maximum number of LLM queries per request.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set the max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn memory(&self) -> &Arc<dyn ConversationStore> {
        &self.memory
    }

    pub fn gateway(&self) -> &Arc<dyn ToolGateway> {
        &self.gateway
    }

    /// Lock for one conversation. Entries nobody else holds are pruned on
    /// the way in.
    fn key_lock(&self, key: &ConversationKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Answer one user message.
    ///
    /// 1. Load history from memory and persist the user turn right away
    /// 2. Query the LLM with the history and the tool catalog
    /// 3. If tool calls come back: run them in order, append all results as
    ///    one user turn, and query again
    /// 4. Otherwise return the concatenated text, persisting it if non-empty
    ///
    /// Requests for the same key run one at a time.
    pub async fn run(
        &self,
        key: &ConversationKey,
        user_message: &str,
        system_prompt: Option<&str>,
    ) -> LoopOutcome {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut messages = self.memory.read(key, Utc::now()).await;
        let user_turn = Turn::user(user_message);
        messages.push(user_turn.clone());
        self.memory.append(key, user_turn).await;

        let tools = if self.gateway.is_available() {
            self.gateway.list_tools().unwrap_or_default()
        } else {
            Vec::new()
        };

        info!(
            conversation_key = %key,
            history = messages.len() - 1,
            tools = tools.len(),
            "Processing message"
        );

        let mut tool_calls = 0;

        for iteration in 1..=self.max_iterations {
            debug!(conversation_key = %key, iteration, "Conversation loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                system: system_prompt.map(String::from),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                tools: tools.clone(),
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(conversation_key = %key, iteration, error = %e, "Error asking the LLM");
                    return self.fail(key, &e, iteration, tool_calls);
                }
            };

            if let Some(usage) = &response.usage {
                self.event_bus.publish(DomainEvent::ResponseGenerated {
                    conversation_key: key.to_string(),
                    model: response.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: Utc::now(),
                });
            }

            // Tool requests only count while the gateway is usable
            let invocations = if self.gateway.is_available() {
                response.tool_calls()
            } else {
                Vec::new()
            };

            if invocations.is_empty() {
                let final_text = response.final_text();
                if final_text.is_empty() {
                    return LoopOutcome {
                        reply: EMPTY_REPLY.into(),
                        termination: Termination::Completed,
                        iterations: iteration,
                        tool_calls,
                    };
                }
                self.memory
                    .append(key, Turn::assistant(final_text.clone()))
                    .await;
                return LoopOutcome {
                    reply: final_text,
                    termination: Termination::Completed,
                    iterations: iteration,
                    tool_calls,
                };
            }

            messages.push(Turn::assistant_blocks(response.content));

            let mut results: Vec<ToolResult> = Vec::with_capacity(invocations.len());
            for invocation in &invocations {
                let start = std::time::Instant::now();
                let result = match self.gateway.call_tool(invocation).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(tool = %invocation.name, error = %e, "Tool gateway failed");
                        return self.fail(key, &e, iteration, tool_calls);
                    }
                };
                tool_calls += 1;

                if result.is_error {
                    warn!(tool = %invocation.name, content = %result.content, "Tool execution failed");
                }
                self.event_bus.publish(DomainEvent::ToolExecuted {
                    tool_name: invocation.name.clone(),
                    success: !result.is_error,
                    duration_ms: start.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
                results.push(result);
            }

            messages.push(Turn::tool_results(&results));
        }

        warn!(
            conversation_key = %key,
            max_iterations = self.max_iterations,
            "Iteration cap reached"
        );
        LoopOutcome {
            reply: CAP_EXCEEDED_REPLY.into(),
            termination: Termination::IterationCapExceeded,
            iterations: self.max_iterations,
            tool_calls,
        }
    }

    fn fail(
        &self,
        key: &ConversationKey,
        error: &dyn std::fmt::Display,
        iterations: usize,
        tool_calls: usize,
    ) -> LoopOutcome {
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: key.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        LoopOutcome {
            reply: error_reply(error),
            termination: Termination::Failed,
            iterations,
            tool_calls,
        }
    }
}
