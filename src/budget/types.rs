use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One ordered chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token counts reported for one remote call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Capability and pricing profile of one model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    /// Average characters per token for this family's tokenizer.
    pub chars_per_token: f64,
    /// Combined input+output window, in tokens.
    pub context_window: u64,
    /// USD per million input tokens.
    pub input_cost_per_million: f64,
    /// USD per million output tokens.
    pub output_cost_per_million: f64,
}

impl ModelProfile {
    /// Profile for a model id by substring match, with a conservative
    /// fallback for unknown models. Pricing is approximate and advisory.
    pub fn for_model(model: &str) -> Self {
        const PROFILES: &[(&[&str], f64, u64, f64, f64)] = &[
            (&["claude-3-opus", "claude-opus"], 3.8, 200_000, 15.00, 75.00),
            (&["claude-3-5-sonnet", "claude-sonnet", "claude-3-sonnet"], 3.8, 200_000, 3.00, 15.00),
            (&["claude-3-haiku", "claude-haiku"], 3.8, 200_000, 0.25, 1.25),
            (&["gpt-4o"], 4.0, 128_000, 2.50, 10.00),
            (&["gpt-4-turbo", "gpt-4"], 4.0, 128_000, 10.00, 30.00),
            (&["gpt-3.5"], 4.0, 16_384, 0.50, 1.50),
            (&["gemini-1.5-pro", "gemini-pro"], 4.0, 128_000, 1.25, 5.00),
            (&["gemini-flash", "gemini-1.5-flash"], 4.0, 128_000, 0.075, 0.30),
            (&["llama", "mixtral", "mistral"], 3.6, 32_768, 0.20, 0.20),
        ];
        let lower = model.to_lowercase();
        PROFILES
            .iter()
            .find(|(patterns, ..)| patterns.iter().any(|p| lower.contains(p)))
            .map(|(_, cpt, window, input, output)| Self {
                name: model.to_string(),
                chars_per_token: *cpt,
                context_window: *window,
                input_cost_per_million: *input,
                output_cost_per_million: *output,
            })
            .unwrap_or_else(|| Self {
                name: model.to_string(),
                chars_per_token: 4.0,
                context_window: 8_192,
                input_cost_per_million: 1.00,
                output_cost_per_million: 2.00,
            })
    }

    /// Advisory USD cost for a token count pair.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million
    }
}

/// One completed call, kept for statistics only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// Rolling statistics derived from the retained usage records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub avg_tokens_per_request: f64,
    /// Output-to-input ratio; low values suggest oversized contexts.
    pub efficiency_ratio: f64,
    /// Advisory estimate of input tokens spent on context the model barely
    /// used.
    pub wasted_input_tokens: u64,
}

/// Outcome of a token-budget optimization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub original_tokens: u64,
    pub optimized_tokens: u64,
    pub tokens_saved: u64,
    /// optimized / original; 1.0 when nothing changed.
    pub compression_ratio: f64,
    pub optimizations: Vec<String>,
    pub estimated_cost_savings: f64,
}

impl OptimizationReport {
    pub fn unchanged(tokens: u64) -> Self {
        Self {
            original_tokens: tokens,
            optimized_tokens: tokens,
            tokens_saved: 0,
            compression_ratio: 1.0,
            optimizations: Vec::new(),
            estimated_cost_savings: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Usage records retained for statistics.
    pub history_capacity: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
        }
    }
}
