use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic::{self, AnthropicProvider};
use crate::provider::openai_compat::{OpenAiCompatProvider, OpenAiFlavor};
use crate::provider::subprocess::{CliKind, SubprocessProvider};

/// Provider 配置 描述一个可调用后端
///
/// # Examples
///
/// ```
/// use tsunagi_llm::config::{ProviderConfig, ProviderKind};
///
/// let config: ProviderConfig = serde_json::from_str(
///     r#"{"handle": "router", "kind": "openrouter", "model": "anthropic/claude-3.5-sonnet"}"#,
/// )
/// .unwrap();
/// assert_eq!(config.kind, ProviderKind::OpenRouter);
/// assert!(config.api_key.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 自定义句柄 例如 `default-openai`
    pub handle: String,
    pub kind: ProviderKind,
    /// 留空时读取对应环境变量
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// HTTP 为单次请求超时 CLI 为整体截止时间
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// 仅 Anthropic 使用
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// 附加请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// CLI 可执行文件 覆盖默认值
    #[serde(default)]
    pub program: Option<String>,
    /// CLI 固定参数
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProviderConfig {
    pub fn new(handle: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            handle: handle.into(),
            kind,
            api_key: None,
            model: None,
            base_url: None,
            timeout_secs: None,
            max_tokens: None,
            headers: HashMap::new(),
            program: None,
            args: Vec::new(),
        }
    }
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "litellm")]
    LiteLlm,
    Anthropic,
    ClaudeCli,
    GeminiCli,
}

impl ProviderKind {
    fn flavor(&self) -> Option<OpenAiFlavor> {
        match self {
            ProviderKind::OpenAi => Some(OpenAiFlavor::OpenAi),
            ProviderKind::OpenRouter => Some(OpenAiFlavor::OpenRouter),
            ProviderKind::LiteLlm => Some(OpenAiFlavor::LiteLlm),
            _ => None,
        }
    }

    fn cli(&self) -> Option<CliKind> {
        match self {
            ProviderKind::ClaudeCli => Some(CliKind::ClaudeCli),
            ProviderKind::GeminiCli => Some(CliKind::GeminiCli),
            _ => None,
        }
    }

    /// Environment variable holding the credential, for HTTP backends.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some(anthropic::API_KEY_ENV),
            other => other.flavor().map(|flavor| flavor.api_key_env()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Explicit key, else the backend's environment variable.
///
/// Returns `None` when neither is set; the provider then reports
/// [`LLMError::MissingCredential`] on first use.
pub fn resolve_api_key(config: &ProviderConfig) -> Option<String> {
    non_blank(config.api_key.clone()).or_else(|| {
        config
            .kind
            .api_key_env()
            .and_then(|name| non_blank(std::env::var(name).ok()))
    })
}

/// Explicit base URL, else `LITELLM_BASE_URL` for LiteLLM, else the backend default.
///
/// CLI backends have no base URL.
pub fn resolve_base_url(config: &ProviderConfig) -> Option<String> {
    if let Some(base_url) = non_blank(config.base_url.clone()) {
        return Some(base_url);
    }
    match config.kind {
        ProviderKind::Anthropic => Some(anthropic::DEFAULT_BASE_URL.to_string()),
        kind => kind.flavor().map(|flavor| {
            flavor
                .base_url_env()
                .and_then(|name| non_blank(std::env::var(name).ok()))
                .unwrap_or_else(|| flavor.default_base_url().to_string())
        }),
    }
}

fn resolve_timeout(config: &ProviderConfig) -> Result<Option<Duration>, LLMError> {
    match config.timeout_secs {
        Some(0) => Err(LLMError::InvalidConfig {
            field: format!("{}.timeout_secs", config.handle),
            reason: "must be greater than zero".to_string(),
        }),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

/// 根据单个配置构建 Provider
pub fn build_provider(
    config: &ProviderConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    if config.handle.trim().is_empty() {
        return Err(LLMError::InvalidConfig {
            field: "handle".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    let timeout = resolve_timeout(config)?;
    let model = non_blank(config.model.clone());
    let api_key = resolve_api_key(config);
    let base_url = resolve_base_url(config);

    let provider: DynProvider = match config.kind {
        ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::LiteLlm => {
            let flavor = config.kind.flavor().ok_or_else(|| LLMError::InvalidConfig {
                field: format!("{}.kind", config.handle),
                reason: "not an OpenAI-compatible backend".to_string(),
            })?;
            let mut provider = OpenAiCompatProvider::new(transport, flavor);
            if let Some(api_key) = api_key {
                provider = provider.with_api_key(api_key);
            }
            if let Some(base_url) = base_url {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }
            for (name, value) in &config.headers {
                provider = provider.with_header(name.clone(), value.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let mut provider = AnthropicProvider::new(transport);
            if let Some(api_key) = api_key {
                provider = provider.with_api_key(api_key);
            }
            if let Some(base_url) = base_url {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            if let Some(max_tokens) = config.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }
            for (name, value) in &config.headers {
                provider = provider.with_header(name.clone(), value.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::ClaudeCli | ProviderKind::GeminiCli => {
            let kind = config.kind.cli().ok_or_else(|| LLMError::InvalidConfig {
                field: format!("{}.kind", config.handle),
                reason: "not a CLI backend".to_string(),
            })?;
            let mut provider = SubprocessProvider::new(kind).with_base_args(config.args.clone());
            if let Some(program) = non_blank(config.program.clone()) {
                provider = provider.with_program(program);
            }
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }
            Arc::new(provider)
        }
    };

    tracing::debug!(
        handle = %config.handle,
        provider = provider.name(),
        model = provider.model_name(),
        "provider configured"
    );
    Ok(provider)
}

/// 根据一组配置构建 LLMClient
///
/// `default_handle` falls back to the first config when absent.
pub fn build_client_from_configs(
    configs: &[ProviderConfig],
    default_handle: Option<&str>,
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut seen = HashSet::new();
    let mut builder = LLMClient::builder();

    for config in configs {
        if !seen.insert(config.handle.as_str()) {
            return Err(LLMError::InvalidConfig {
                field: "handle".to_string(),
                reason: format!("duplicate handle `{}`", config.handle),
            });
        }
        let provider = build_provider(config, transport.clone())?;
        builder = builder.register_handle(config.handle.clone(), provider);
    }
    if let Some(handle) = default_handle {
        builder = builder.default_handle(handle);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn config(handle: &str, kind: ProviderKind) -> ProviderConfig {
        ProviderConfig::new(handle, kind)
    }

    #[test]
    fn kind_uses_flat_lowercase_names() {
        let kinds: Vec<ProviderKind> = serde_json::from_str(
            r#"["openai", "openrouter", "litellm", "anthropic", "claude_cli", "gemini_cli"]"#,
        )
        .expect("kinds");
        assert_eq!(
            kinds,
            vec![
                ProviderKind::OpenAi,
                ProviderKind::OpenRouter,
                ProviderKind::LiteLlm,
                ProviderKind::Anthropic,
                ProviderKind::ClaudeCli,
                ProviderKind::GeminiCli,
            ]
        );
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        temp_env::with_var("OPENAI_API_KEY", Some("from-env"), || {
            let mut explicit = config("a", ProviderKind::OpenAi);
            explicit.api_key = Some("from-config".to_string());
            assert_eq!(resolve_api_key(&explicit).as_deref(), Some("from-config"));

            let mut blank = config("b", ProviderKind::OpenAi);
            blank.api_key = Some("  ".to_string());
            assert_eq!(resolve_api_key(&blank).as_deref(), Some("from-env"));
        });
    }

    #[test]
    fn missing_key_resolves_to_none() {
        temp_env::with_var_unset("OPENROUTER_API_KEY", || {
            assert_eq!(resolve_api_key(&config("r", ProviderKind::OpenRouter)), None);
        });
        assert_eq!(resolve_api_key(&config("c", ProviderKind::ClaudeCli)), None);
    }

    #[test]
    fn litellm_base_url_reads_environment() {
        temp_env::with_var("LITELLM_BASE_URL", Some("http://litellm:4000"), || {
            assert_eq!(
                resolve_base_url(&config("l", ProviderKind::LiteLlm)).as_deref(),
                Some("http://litellm:4000")
            );
            // 其它 flavor 不读取该变量
            assert_eq!(
                resolve_base_url(&config("o", ProviderKind::OpenAi)).as_deref(),
                Some("https://api.openai.com/v1")
            );
        });
        temp_env::with_var_unset("LITELLM_BASE_URL", || {
            assert_eq!(
                resolve_base_url(&config("l", ProviderKind::LiteLlm)).as_deref(),
                Some("http://localhost:4000")
            );
        });
        assert_eq!(resolve_base_url(&config("g", ProviderKind::GeminiCli)), None);
    }

    #[test]
    fn build_client_registers_every_kind() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![
            config("openai", ProviderKind::OpenAi),
            config("router", ProviderKind::OpenRouter),
            config("proxy", ProviderKind::LiteLlm),
            config("claude", ProviderKind::Anthropic),
            config("claude-cli", ProviderKind::ClaudeCli),
            config("gemini-cli", ProviderKind::GeminiCli),
        ];

        let client = build_client_from_configs(&configs, Some("claude"), transport).expect("client");
        let mut handles = client.handles();
        handles.sort();
        assert_eq!(
            handles,
            vec![
                "claude".to_string(),
                "claude-cli".to_string(),
                "gemini-cli".to_string(),
                "openai".to_string(),
                "proxy".to_string(),
                "router".to_string(),
            ]
        );
        assert_eq!(client.default_handle(), Some("claude"));

        let mut tool_handles = client.handles_supporting_tools();
        tool_handles.sort();
        assert_eq!(
            tool_handles,
            vec![
                "claude".to_string(),
                "openai".to_string(),
                "proxy".to_string(),
                "router".to_string(),
            ]
        );

        let router = client.provider("router").expect("router");
        assert_eq!(router.name(), "openrouter");
        assert_eq!(router.model_name(), "openai/gpt-4o");
    }

    #[test]
    fn configured_model_overrides_default() {
        let transport = default_dyn_transport().expect("transport");
        let mut anthropic = config("claude", ProviderKind::Anthropic);
        anthropic.model = Some("claude-3-5-haiku-latest".to_string());
        let provider = build_provider(&anthropic, transport).expect("provider");
        assert_eq!(provider.model_name(), "claude-3-5-haiku-latest");
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![
            config("same", ProviderKind::OpenAi),
            config("same", ProviderKind::Anthropic),
        ];
        let err = build_client_from_configs(&configs, None, transport)
            .err()
            .expect("must fail");
        assert!(matches!(err, LLMError::InvalidConfig { .. }));
    }

    #[test]
    fn unknown_default_handle_is_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![config("openai", ProviderKind::OpenAi)];
        let err = build_client_from_configs(&configs, Some("missing"), transport)
            .err()
            .expect("must fail");
        assert!(matches!(err, LLMError::InvalidConfig { .. }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let mut cli = config("cli", ProviderKind::GeminiCli);
        cli.timeout_secs = Some(0);
        match build_provider(&cli, transport) {
            Err(LLMError::InvalidConfig { field, .. }) => assert_eq!(field, "cli.timeout_secs"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
    }
}
