//! Per-model cost lookup table for multi-provider LLM support.
//!
//! Returns (input_cost_per_token, output_cost_per_token) as Decimal pairs.
//! Ollama and other local models return zero cost.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Look up known per-token costs for a model by its identifier.
///
/// Returns `Some((input_cost, output_cost))` for known models, `None` otherwise.
pub fn model_cost(model_id: &str) -> Option<(Decimal, Decimal)> {
    // Normalize: strip provider prefixes (e.g., "openai/gpt-4o" -> "gpt-4o")
    let id = model_id
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(model_id);

    match id {
        // OpenAI models -- prices per token (USD)
        // GPT-4o, GPT-4.1, o4-mini retired 2026-02-13
        "gpt-5.3-codex" => Some((dec!(0.0000025), dec!(0.000012))),
        "gpt-5.2" => Some((dec!(0.00000175), dec!(0.000014))),
        "gpt-5-mini" => Some((dec!(0.00000025), dec!(0.000002))),
        "gpt-5-nano" => Some((dec!(0.00000005), dec!(0.0000004))),
        "o3-mini" | "o3-mini-2025-01-31" => Some((dec!(0.0000011), dec!(0.0000044))),

        // Anthropic models
        "claude-opus-4.6" | "claude-opus-4-6-20260205" => {
            Some((dec!(0.000005), dec!(0.000025)))
        }
        "claude-sonnet-4" | "claude-sonnet-4-20250514" => {
            Some((dec!(0.000003), dec!(0.000015)))
        }
        "claude-haiku-4.5" | "claude-haiku-4-5-20241022" => {
            Some((dec!(0.000001), dec!(0.000005)))
        }
        // Legacy Anthropic (still in some configs)
        "claude-3-5-sonnet-20241022" | "claude-3-5-sonnet-latest" => {
            Some((dec!(0.000003), dec!(0.000015)))
        }
        "claude-3-opus-20240229" | "claude-3-opus-latest" | "claude-opus-4-20250514" => {
            Some((dec!(0.000015), dec!(0.000075)))
        }

        // Google Gemini models
        "gemini-3-pro-preview" | "gemini-3-pro" => {
            Some((dec!(0.000002), dec!(0.000012)))
        }
        "gemini-2.5-pro" | "gemini-2.5-pro-latest" => {
            Some((dec!(0.00000125), dec!(0.00001)))
        }
        "gemini-2.5-flash" | "gemini-2.5-flash-latest" => {
            Some((dec!(0.00000015), dec!(0.0000006)))
        }
        "gemini-3-flash-preview" | "gemini-3-flash" => {
            Some((dec!(0.00000015), dec!(0.0000006)))
        }

        // Ollama / local models -- free
        _ if is_local_model(id) => Some((Decimal::ZERO, Decimal::ZERO)),

        _ => None,
    }
}

/// Default cost for unknown models.
pub fn default_cost() -> (Decimal, Decimal) {
    // Conservative estimate: roughly GPT-5 Mini pricing
    (dec!(0.00000025), dec!(0.000002))
}

/// Rough token count for text with no tokenizer on hand, used only for cost
/// accounting (never for context-window enforcement).
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.len() + 3) / 4) as u32
}

/// Dollar cost for a completion given its estimated token counts, falling
/// back to [`default_cost`] for models absent from the pricing table.
pub fn estimate_cost_usd(model_id: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let (input_price, output_price) = model_cost(model_id).unwrap_or_else(default_cost);
    let cost = Decimal::from(prompt_tokens) * input_price + Decimal::from(completion_tokens) * output_price;
    cost.to_f64().unwrap_or(0.0)
}

/// Heuristic to detect local/self-hosted models (Ollama, llama.cpp, etc.).
fn is_local_model(model_id: &str) -> bool {
    let lower = model_id.to_lowercase();
    lower.starts_with("llama")
        || lower.starts_with("mistral")
        || lower.starts_with("mixtral")
        || lower.starts_with("phi")
        || lower.starts_with("gemma")
        || lower.starts_with("qwen")
        || lower.starts_with("codellama")
        || lower.starts_with("codestral")
        || lower.starts_with("deepseek")
        || lower.starts_with("deepcoder")
        || lower.starts_with("starcoder")
        || lower.starts_with("vicuna")
        || lower.starts_with("yi")
        || lower.starts_with("snowflake")
        || lower.contains(":latest")
        || lower.contains(":instruct")
        || lower.contains(":3b")
        || lower.contains(":7b")
        || lower.contains(":14b")
        || lower.contains(":22b")
        || lower.contains(":27b")
        || lower.contains(":30b")
        || lower.contains(":32b")
        || lower.contains(":70b")
        || lower.contains(":72b")
}
