//! Static model registry.
//!
//! The ordered list backs the `/model` picker (1-based indexing) and the
//! usage accounting pricing lookup. Rates are USD per million tokens.

/// Per-million-token pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub cached_input: f64,
    pub output: f64,
}

/// One selectable model.
#[derive(Debug, Clone, Copy)]
pub struct ModelOption {
    pub id: &'static str,
    pub pricing: Pricing,
    pub context_window: u64,
}

/// Ordered model list. The first entry doubles as the pricing fallback for
/// unknown model ids.
pub static MODELS: &[ModelOption] = &[
    ModelOption {
        id: "anthropic:claude-opus-4-0",
        pricing: Pricing {
            input: 3.00,
            cached_input: 1.50,
            output: 15.00,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "anthropic:claude-sonnet-4-0",
        pricing: Pricing {
            input: 3.00,
            cached_input: 1.50,
            output: 15.00,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "anthropic:claude-3-7-sonnet-latest",
        pricing: Pricing {
            input: 3.00,
            cached_input: 1.50,
            output: 15.00,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "google-gla:gemini-2.5-pro",
        // Gemini Pro prices tier at 200k input; a session is unlikely to
        // cross it, so the lower tier is used throughout.
        pricing: Pricing {
            input: 1.25,
            cached_input: 1.25,
            output: 10.00,
        },
        context_window: 2_000_000,
    },
    ModelOption {
        id: "google-gla:gemini-2.5-flash",
        pricing: Pricing {
            input: 0.30,
            cached_input: 0.035,
            output: 2.50,
        },
        context_window: 2_000_000,
    },
    ModelOption {
        id: "openai:o4-mini",
        pricing: Pricing {
            input: 1.10,
            cached_input: 0.275,
            output: 4.40,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "openai:o3-pro",
        pricing: Pricing {
            input: 20.00,
            cached_input: 20.00,
            output: 80.00,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "openai:o3",
        pricing: Pricing {
            input: 10.00,
            cached_input: 2.50,
            output: 40.00,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "openai:o3-mini",
        pricing: Pricing {
            input: 1.10,
            cached_input: 0.55,
            output: 4.40,
        },
        context_window: 200_000,
    },
    ModelOption {
        id: "openai:gpt-4.1",
        pricing: Pricing {
            input: 2.00,
            cached_input: 0.50,
            output: 8.00,
        },
        context_window: 1_047_576,
    },
    ModelOption {
        id: "openai:gpt-4.1-mini",
        pricing: Pricing {
            input: 0.40,
            cached_input: 0.10,
            output: 1.60,
        },
        context_window: 1_047_576,
    },
    ModelOption {
        id: "openai:gpt-4.1-nano",
        pricing: Pricing {
            input: 0.10,
            cached_input: 0.025,
            output: 0.40,
        },
        context_window: 1_047_576,
    },
];

/// Finds a model by id.
pub fn find(id: &str) -> Option<&'static ModelOption> {
    MODELS.iter().find(|m| m.id == id)
}

/// Pricing for a model id, falling back to the first table entry when the id
/// is unknown.
pub fn pricing_for(id: &str) -> Pricing {
    find(id).unwrap_or(&MODELS[0]).pricing
}
