use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agora_models::{AgentMessage, AgentsConfig, ModelTier, Role};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::error::InvocationError;
use crate::prompts::system_prompt;

/// The external reasoning collaborator: prompt and context in, text out.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn invoke(
        &self,
        role: Role,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<String, InvocationError>;
}

/// A reasoner that drives the Claude CLI, one process per call.
pub struct ClaudeReasoner {
    quick_model: String,
    deep_model: String,
    overrides: HashMap<Role, String>,
    timeout: Duration,
}

impl ClaudeReasoner {
    pub fn from_config(config: &AgentsConfig) -> Self {
        let overrides = config
            .analysts
            .iter()
            .filter_map(|a| a.model.clone().map(|m| (a.role, m)))
            .collect();
        Self {
            quick_model: config.quick_model.clone(),
            deep_model: config.deep_model.clone(),
            overrides,
            timeout: Duration::from_secs(config.call_timeout_seconds),
        }
    }

    pub fn model_for(&self, role: Role) -> &str {
        if let Some(model) = self.overrides.get(&role) {
            return model;
        }
        match role.tier() {
            ModelTier::Quick => &self.quick_model,
            ModelTier::Deep => &self.deep_model,
        }
    }
}

#[async_trait]
impl Reasoner for ClaudeReasoner {
    async fn invoke(
        &self,
        role: Role,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<String, InvocationError> {
        let context = serde_json::to_string_pretty(context)
            .map_err(|e| InvocationError::Permanent(format!("Unserializable context: {e}")))?;
        let user_prompt = format!("{prompt}\n\n## CONTEXT\n\n{context}");
        let config = ClaudeCliConfig {
            model: self.model_for(role).to_string(),
            timeout: self.timeout,
        };
        invoke_claude(&system_prompt(role), &user_prompt, &config).await
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Calls the reasoner for a role and wraps the reply as an [`AgentMessage`].
///
/// Stateless apart from its policy; cheap to clone into fan-out tasks.
#[derive(Clone)]
pub struct AgentInvoker {
    reasoner: Arc<dyn Reasoner>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl AgentInvoker {
    pub fn new(reasoner: Arc<dyn Reasoner>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            reasoner,
            retry,
            call_timeout,
        }
    }

    pub fn from_config(reasoner: Arc<dyn Reasoner>, config: &AgentsConfig) -> Self {
        Self::new(
            reasoner,
            RetryPolicy::from_config(config),
            Duration::from_secs(config.call_timeout_seconds),
        )
    }

    pub async fn invoke(
        &self,
        role: Role,
        round: Option<u32>,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<AgentMessage, InvocationError> {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(
                self.call_timeout,
                self.reasoner.invoke(role, prompt, context),
            )
            .await
            .unwrap_or(Err(InvocationError::Timeout(self.call_timeout)));

            let error = match result {
                Ok(text) => {
                    debug!(%role, ?round, attempt, "Agent replied");
                    return Ok(AgentMessage::new(role, round, text.trim()));
                }
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= self.retry.max_attempts {
                warn!(%role, attempt, error = %error, "Agent invocation failed");
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                %role,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient agent failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
