//! Built-in model registry
//!
//! Every model the client can talk to is described by a static
//! [`ModelDescriptor`]. Providers form a closed set, so dispatch on them is a
//! `match` rather than string comparison.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Model used when the user has not picked one.
pub const DEFAULT_MODEL_ID: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const CEREBRAS_CHAT_URL: &str = "https://api.cerebras.ai/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    Groq,
    OpenRouter,
    Cerebras,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Groq, Provider::OpenRouter, Provider::Cerebras];

    pub fn id(self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
            Provider::Cerebras => "cerebras",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Cerebras => "Cerebras",
        }
    }

    /// Key under which the provider's API key lives in the credential store.
    pub fn credential_key(self) -> String {
        format!("{}_apikey", self.id())
    }

    /// Environment variable consulted when the keyring is unavailable.
    pub fn env_var(self) -> String {
        format!("{}_API_KEY", self.id().to_ascii_uppercase())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<&str> = Provider::ALL.iter().map(|p| p.id()).collect();
        write!(
            f,
            "unknown provider '{}' (expected one of: {})",
            self.0,
            known.join(", ")
        )
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub provider: Provider,
    pub endpoint_url: &'static str,
    pub supports_reasoning: bool,
}

const fn model(
    id: &'static str,
    display_name: &'static str,
    provider: Provider,
    supports_reasoning: bool,
) -> ModelDescriptor {
    let endpoint_url = match provider {
        Provider::Groq => GROQ_CHAT_URL,
        Provider::OpenRouter => OPENROUTER_CHAT_URL,
        Provider::Cerebras => CEREBRAS_CHAT_URL,
    };
    ModelDescriptor {
        id,
        display_name,
        provider,
        endpoint_url,
        supports_reasoning,
    }
}

static MODELS: &[ModelDescriptor] = &[
    model(
        "meta-llama/llama-4-maverick-17b-128e-instruct",
        "Llama 4 Maverick (17B)",
        Provider::Groq,
        false,
    ),
    model(
        "moonshotai/kimi-k2-instruct",
        "Kimi K2 Instruct",
        Provider::Groq,
        false,
    ),
    model(
        "deepseek-r1-distill-llama-70b",
        "DeepSeek R1 Distill Llama (70B)",
        Provider::Groq,
        true,
    ),
    model(
        "z-ai/glm-4.5-air:free",
        "GLM-4.5 Air (Free)",
        Provider::OpenRouter,
        false,
    ),
    model(
        "qwen/qwen2.5-vl-72b-instruct",
        "Qwen 2.5 VL (72B) Instruct",
        Provider::OpenRouter,
        false,
    ),
    model(
        "agentica-org/deepcoder-14b-preview",
        "DeepCoder (14B) Preview",
        Provider::OpenRouter,
        false,
    ),
    model(
        "tencent/hunyuan-a13b-instruct:free",
        "Hunyuan A13B Instruct (Free)",
        Provider::OpenRouter,
        false,
    ),
    model(
        "moonshotai/kimi-dev-72b:free",
        "Kimi Dev (72B) - Free",
        Provider::OpenRouter,
        false,
    ),
    model(
        "llama-4-scout-17b-16e-instruct",
        "Llama 4 Scout (17B)",
        Provider::Cerebras,
        false,
    ),
    model("llama3.1-8b", "Llama 3.1 (8B)", Provider::Cerebras, false),
    model("llama-3.3-70b", "Llama 3.3 (70B)", Provider::Cerebras, false),
    model("qwen-3-32b", "Qwen 3 (32B)", Provider::Cerebras, false),
    model(
        "llama-4-maverick-17b-128e-instruct",
        "Llama 4 Maverick (17B) [Preview]",
        Provider::Cerebras,
        false,
    ),
    model(
        "qwen-3-235b-a22b",
        "Qwen 3 (235B) [Preview]",
        Provider::Cerebras,
        false,
    ),
    model(
        "qwen-3-235b-a22b-instruct-2507",
        "Qwen 3 Instruct (235B) [Preview]",
        Provider::Cerebras,
        false,
    ),
    model(
        "qwen-3-235b-a22b-thinking-2507",
        "Qwen 3 Thinking (235B) [Preview]",
        Provider::Cerebras,
        true,
    ),
];

fn index() -> &'static HashMap<&'static str, &'static ModelDescriptor> {
    static INDEX: OnceLock<HashMap<&'static str, &'static ModelDescriptor>> = OnceLock::new();
    INDEX.get_or_init(|| MODELS.iter().map(|m| (m.id, m)).collect())
}

/// Error returned when a model id is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNotFound(pub String);

impl fmt::Display for ModelNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported model: {}", self.0)
    }
}

impl std::error::Error for ModelNotFound {}

/// Look up a model by its exact id.
pub fn lookup(model_id: &str) -> Result<&'static ModelDescriptor, ModelNotFound> {
    index()
        .get(model_id)
        .copied()
        .ok_or_else(|| ModelNotFound(model_id.to_string()))
}

/// All registered models, in table order.
pub fn all() -> &'static [ModelDescriptor] {
    MODELS
}

pub fn for_provider(provider: Provider) -> impl Iterator<Item = &'static ModelDescriptor> {
    MODELS.iter().filter(move |m| m.provider == provider)
}
