//! Provider names and per-model token limits

pub const PROVIDER_STACKSPOT: &str = "STACKSPOT";
pub const PROVIDER_OPENAI: &str = "OPENAI";
pub const PROVIDER_CLAUDE: &str = "CLAUDE";

/// Display name the browser uses for the StackSpot provider
pub const STACKSPOT_DISPLAY_NAME: &str = "GPT-5";

pub const STACKSPOT_DEFAULT_MODEL: &str = "stackspotai";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
pub const CLAUDE_SONNET_4: &str = "claude-sonnet-4-20250514";
pub const CLAUDE_SONNET_4_5: &str = "claude-sonnet-4-5-20250929";

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelMeta {
    pub id: &'static str,
    pub provider: &'static str,
    pub max_tokens: u32,
}

const MODELS: &[ModelMeta] = &[
    ModelMeta {
        id: STACKSPOT_DEFAULT_MODEL,
        provider: PROVIDER_STACKSPOT,
        max_tokens: 8192,
    },
    ModelMeta {
        id: OPENAI_DEFAULT_MODEL,
        provider: PROVIDER_OPENAI,
        max_tokens: 4096,
    },
    ModelMeta {
        id: CLAUDE_SONNET_4,
        provider: PROVIDER_CLAUDE,
        max_tokens: 4096,
    },
    ModelMeta {
        id: CLAUDE_SONNET_4_5,
        provider: PROVIDER_CLAUDE,
        max_tokens: 4096,
    },
];

/// Canonical provider key: upper-cased, display alias resolved
pub fn normalize_provider(provider: &str) -> String {
    let upper = provider.trim().to_uppercase();
    if upper == STACKSPOT_DISPLAY_NAME {
        PROVIDER_STACKSPOT.to_string()
    } else {
        upper
    }
}

pub fn resolve(provider: &str, model: &str) -> Option<&'static ModelMeta> {
    let provider = normalize_provider(provider);
    let model = model.trim().to_lowercase();

    MODELS.iter().find(|meta| {
        meta.provider == provider && (meta.id == model || meta.provider == PROVIDER_STACKSPOT)
    })
}

/// Token limit for a model, falling back to [`DEFAULT_MAX_TOKENS`]
pub fn max_tokens(provider: &str, model: &str) -> u32 {
    resolve(provider, model)
        .map(|meta| meta.max_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS)
}
