//! Billing policy for AI-assisted actions: every call to the completion
//! service is gated behind a fixed-fee ledger debit. If the debit fails the
//! provider is never invoked; if generation or schema validation fails the
//! fee is re-credited, so users only pay for results.

use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info};
use ts_rs::TS;

use super::{
    completion::{CompletionError, CompletionProvider, parse_structured},
    ledger::{CreditLedger, LedgerError},
};

/// Fee charged per AI-assisted action unless overridden by configuration.
pub const DEFAULT_AI_ACTION_FEE: i64 = 5;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("generation failed: {0}")]
    Generation(#[from] CompletionError),
}

impl BillingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.code(),
            Self::Generation(_) => "generation_failed",
        }
    }
}

/// Structured result of the explain-code action.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CodeExplanation {
    pub summary: String,
    pub walkthrough: Vec<String>,
}

/// Structured result of the suggest-fix action.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct FixSuggestion {
    pub diagnosis: String,
    pub fixed_code: String,
    pub notes: Option<String>,
}

/// Structured result of the generate-tests action.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GeneratedTests {
    pub test_code: String,
    pub cases: Vec<String>,
}

/// Structured result of the generate-story action.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GeneratedStory {
    pub title: String,
    pub story: String,
    pub acceptance_criteria: Vec<String>,
}

pub struct AiBillingService {
    provider: Arc<dyn CompletionProvider>,
    fee: i64,
}

impl AiBillingService {
    pub fn new(provider: Arc<dyn CompletionProvider>, fee: i64) -> Self {
        Self { provider, fee }
    }

    pub fn fee(&self) -> i64 {
        self.fee
    }

    pub async fn explain_code(
        &self,
        pool: &SqlitePool,
        user_id: &str,
        code: &str,
    ) -> Result<CodeExplanation, BillingError> {
        let prompt = format!(
            r#"Explain the following code to a developer unfamiliar with it.

## Code
```
{code}
```

## Output Format (JSON only):
{{
  "summary": "<one paragraph overview>",
  "walkthrough": ["<step-by-step notes, one entry per logical section>"]
}}"#
        );

        self.charge_and_generate(pool, user_id, "explain_code", prompt, EXPLAIN_SYSTEM)
            .await
    }

    pub async fn suggest_fix(
        &self,
        pool: &SqlitePool,
        user_id: &str,
        code: &str,
        error_message: &str,
    ) -> Result<FixSuggestion, BillingError> {
        let prompt = format!(
            r#"The following code fails with an error. Diagnose it and propose a corrected version.

## Code
```
{code}
```

## Error
{error_message}

## Output Format (JSON only):
{{
  "diagnosis": "<what is wrong and why>",
  "fixed_code": "<the corrected code>",
  "notes": "<optional caveats, or null>"
}}"#
        );

        self.charge_and_generate(pool, user_id, "suggest_fix", prompt, FIX_SYSTEM)
            .await
    }

    pub async fn generate_tests(
        &self,
        pool: &SqlitePool,
        user_id: &str,
        code: &str,
    ) -> Result<GeneratedTests, BillingError> {
        let prompt = format!(
            r#"Write unit tests for the following code. Cover the main behavior and the obvious edge cases.

## Code
```
{code}
```

## Output Format (JSON only):
{{
  "test_code": "<complete test file>",
  "cases": ["<short name of each covered case>"]
}}"#
        );

        self.charge_and_generate(pool, user_id, "generate_tests", prompt, TESTS_SYSTEM)
            .await
    }

    pub async fn generate_story(
        &self,
        pool: &SqlitePool,
        user_id: &str,
        idea: &str,
    ) -> Result<GeneratedStory, BillingError> {
        let prompt = format!(
            r#"Turn this product idea into a user story with acceptance criteria.

## Idea
{idea}

## Output Format (JSON only):
{{
  "title": "<story title>",
  "story": "<as a ..., I want ..., so that ...>",
  "acceptance_criteria": ["<testable criterion>"]
}}"#
        );

        self.charge_and_generate(pool, user_id, "generate_story", prompt, STORY_SYSTEM)
            .await
    }

    /// Debit first, generate second, refund on failure. The `spend` and
    /// `refund` audit records both remain, so a failed action is visible in
    /// the user's history.
    async fn charge_and_generate<T: DeserializeOwned>(
        &self,
        pool: &SqlitePool,
        user_id: &str,
        action: &'static str,
        prompt: String,
        system: &str,
    ) -> Result<T, BillingError> {
        CreditLedger::deduct(pool, user_id, self.fee).await?;

        match self.generate_validated::<T>(&prompt, system).await {
            Ok(result) => {
                info!(user_id, action, fee = self.fee, "AI action billed and completed");
                Ok(result)
            }
            Err(e) => {
                match CreditLedger::credit_fee_refund(pool, user_id, self.fee).await {
                    Ok(()) => {
                        info!(user_id, action, fee = self.fee, "refunded AI action fee after failure")
                    }
                    Err(refund_err) => error!(
                        user_id,
                        action,
                        error = %refund_err,
                        "failed to refund AI action fee; audit trail holds the unmatched spend"
                    ),
                }
                Err(BillingError::Generation(e))
            }
        }
    }

    async fn generate_validated<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, CompletionError> {
        let text = self
            .provider
            .generate(prompt, Some(system.to_string()))
            .await?;
        parse_structured(&text)
    }
}

const EXPLAIN_SYSTEM: &str =
    "You are a senior engineer explaining code clearly and precisely. Output valid JSON only.";
const FIX_SYSTEM: &str =
    "You are a debugging assistant. Diagnose failures and propose minimal fixes. Output valid JSON only.";
const TESTS_SYSTEM: &str =
    "You are a test engineer. Write focused, deterministic unit tests. Output valid JSON only.";
const STORY_SYSTEM: &str =
    "You are a product assistant turning ideas into well-formed user stories. Output valid JSON only.";
