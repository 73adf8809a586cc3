use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::provider::Provider;
use crate::stream::{EventStream, event_channel};
use crate::types::{Message, StreamEvent};

use super::process::{run_to_completion, spawn, stream_lines};
use super::transcript::{Prompt, linearize};

/// 默认整体超时
pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(300);

/// Supported command-line backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliKind {
    /// Anthropic `claude` CLI in print mode.
    ClaudeCli,
    /// Google `gemini` CLI.
    GeminiCli,
}

impl CliKind {
    pub fn name(&self) -> &'static str {
        match self {
            CliKind::ClaudeCli => "claude_cli",
            CliKind::GeminiCli => "gemini_cli",
        }
    }

    /// Executable looked up on `PATH` unless overridden.
    pub fn default_program(&self) -> &'static str {
        match self {
            CliKind::ClaudeCli => "claude",
            CliKind::GeminiCli => "gemini",
        }
    }

    /// Whether the CLI accepts the system prompt as a separate flag.
    fn hoists_system(&self) -> bool {
        matches!(self, CliKind::ClaudeCli)
    }

    fn prompt_args(&self, model: Option<&str>, prompt: Prompt) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            CliKind::ClaudeCli => {
                if let Some(model) = model {
                    args.extend(["--model".to_string(), model.to_string()]);
                }
                if let Some(system) = prompt.system {
                    args.extend(["--system-prompt".to_string(), system]);
                }
            }
            CliKind::GeminiCli => {
                if let Some(model) = model {
                    args.extend(["-m".to_string(), model.to_string()]);
                }
            }
        }
        args.extend(["-p".to_string(), prompt.transcript]);
        args
    }
}

/// Provider backed by a locally installed CLI, invoked once per call.
///
/// Tool calling is unavailable: the CLIs have no declaration format for tools.
pub struct SubprocessProvider {
    pub(crate) kind: CliKind,
    pub(crate) program: String,
    pub(crate) base_args: Vec<String>,
    pub(crate) model: Option<String>,
    pub(crate) timeout: Duration,
}

impl SubprocessProvider {
    pub fn new(kind: CliKind) -> Self {
        Self {
            kind,
            program: kind.default_program().to_string(),
            base_args: Vec::new(),
            model: None,
            timeout: DEFAULT_CLI_TIMEOUT,
        }
    }

    pub fn claude_cli() -> Self {
        Self::new(CliKind::ClaudeCli)
    }

    pub fn gemini_cli() -> Self {
        Self::new(CliKind::GeminiCli)
    }

    /// 替换可执行文件路径
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// 在提示参数之前追加的固定参数
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// 仅在配置时传递模型参数
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = (!model.trim().is_empty()).then_some(model);
        self
    }

    /// Absolute wall-clock deadline for one call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kind(&self) -> CliKind {
        self.kind
    }

    pub(crate) fn build_args(&self, messages: &[Message]) -> Result<Vec<String>, LLMError> {
        let prompt = linearize(messages, self.kind.hoists_system())?;
        let mut args = self.base_args.clone();
        args.extend(self.kind.prompt_args(self.model.as_deref(), prompt));
        Ok(args)
    }

    fn command(&self, messages: &[Message]) -> Result<Command, LLMError> {
        let args = self.build_args(messages)?;
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 子进程自成进程组，超时或取消时连同其派生进程一起结束
        #[cfg(unix)]
        command.process_group(0);
        tracing::debug!(
            provider = self.name(),
            program = %self.program,
            model = self.model.as_deref().unwrap_or_default(),
            timeout = ?self.timeout,
            "spawning cli backend"
        );
        Ok(command)
    }
}

#[async_trait]
impl Provider for SubprocessProvider {
    async fn generate(&self, messages: &[Message]) -> Result<String, LLMError> {
        let mut command = self.command(messages)?;
        let child = spawn(self.name(), &self.program, &mut command)?;
        run_to_completion(self.name(), child, self.timeout).await
    }

    async fn generate_streaming(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<EventStream<StreamEvent>, LLMError> {
        let mut command = self.command(messages)?;
        let child = spawn(self.name(), &self.program, &mut command)?;
        let (sender, events) = event_channel(&cancel);
        tokio::spawn(stream_lines(self.name(), child, self.timeout, sender));
        Ok(events)
    }

    fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(self.kind.default_program())
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }
}
