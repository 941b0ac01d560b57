//! Insight Generator
//!
//! Converts sanitized query results into a short executive narrative in
//! Insight / Evidence / Implication form. Every number in the narrative
//! must be grounded: before returning, the text is scanned for numeric
//! tokens that are not present in the result (or derivable as a column
//! total), and on any mismatch the output downgrades to a deterministic
//! summary built from the rows. Empty results never call the oracle.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::models::ExecutionResult;
use crate::services::llm::LlmClient;

/// Rows included in the oracle prompt
const MAX_PROMPT_ROWS: usize = 20;
/// Completion cap for the narrative
const INSIGHT_MAX_TOKENS: u32 = 500;
/// Low temperature for accuracy
const INSIGHT_TEMPERATURE: f64 = 0.3;

static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap());

const SYSTEM_PROMPT: &str = "You are an Executive Healthcare Intelligence Assistant. Your role \
is to convert raw database query results into clear, actionable insights for healthcare \
administrators, regulators, and finance auditors.

CRITICAL RULES (MUST FOLLOW):

1. GROUNDED RESPONSES ONLY:
   - Use ONLY the data provided in the query results
   - Never invent, estimate, or extrapolate numbers not in the results
   - If a number isn't in the results, don't mention it

2. RESPONSE STRUCTURE:
   Format your response as:
   - **Insight**: Clear, executive summary (1-2 sentences)
   - **Evidence**: Key numbers and facts from the data
   - **Implication**: What this means for decision-making (if applicable)

3. NO RAW SQL OR TECHNICAL DETAILS:
   - Never show SQL queries unless explicitly requested
   - Never show raw column names or database jargon
   - Use natural, professional language

4. HANDLE EMPTY RESULTS:
   - If results are empty, say so plainly and name what was searched

5. PROFESSIONAL TONE:
   - Executive-level language, clear and concise
   - Use full state names (e.g., \"Kogi State\" not \"Kogi\")
   - Reference time periods naturally (e.g., \"in 2023\", \"this month\")

Remember: Be accurate, grounded, and executive-focused. Never hallucinate.";

/// Produces grounded narratives from sanitized results
pub struct InsightGenerator {
    llm: Arc<LlmClient>,
}

impl InsightGenerator {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate the narrative. Never fails: oracle errors and grounding
    /// violations both degrade to the deterministic fallback summary.
    pub async fn generate(&self, question: &str, result: &ExecutionResult) -> String {
        if result.rows.is_empty() {
            return empty_result_insight(question);
        }

        let results_text = format_results_for_prompt(result);
        let prompt = format!(
            "{system}\n\nUser Query: {question}\n\nQuery Results:\n{results}\n\nGenerate a \
             clear, executive-level insight based on these results. Follow the format: \
             Insight -> Evidence -> Implication.",
            system = SYSTEM_PROMPT,
            question = question,
            results = results_text,
        );

        match self
            .llm
            .complete(&prompt, INSIGHT_TEMPERATURE, INSIGHT_MAX_TOKENS, None)
            .await
        {
            Ok(narrative) => {
                let narrative = narrative.trim().to_string();
                if is_grounded(&narrative, question, result) {
                    narrative
                } else {
                    tracing::warn!(
                        "Narrative failed grounding check, downgrading to fallback summary"
                    );
                    fallback_insight(question, result)
                }
            },
            Err(e) => {
                tracing::warn!("Insight generation error: {}, using fallback summary", e);
                fallback_insight(question, result)
            },
        }
    }
}

/// Format the sanitized rows for the oracle prompt
fn format_results_for_prompt(result: &ExecutionResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Total rows: {}", result.row_count));
    lines.push(format!(
        "Showing: {} rows",
        result.rows.len().min(MAX_PROMPT_ROWS)
    ));
    lines.push(String::new());
    lines.push("Data:".to_string());

    for (i, row) in result.rows.iter().take(MAX_PROMPT_ROWS).enumerate() {
        let row_str = row
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render_value(v)))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("  Row {}: {}", i + 1, row_str));
    }

    if result.rows.len() > MAX_PROMPT_ROWS {
        lines.push(format!("  ... and {} more rows", result.rows.len() - MAX_PROMPT_ROWS));
    }

    lines.join("\n")
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn empty_result_insight(question: &str) -> String {
    format!(
        "The database does not contain data matching your query: '{}'. This could mean the \
         data doesn't exist for the specified criteria, or the query parameters need adjustment.",
        question
    )
}

/// Deterministic summary used when the oracle fails or hallucinated
fn fallback_insight(question: &str, result: &ExecutionResult) -> String {
    if result.rows.is_empty() {
        return empty_result_insight(question);
    }

    if result.rows.len() == 1 {
        let row = &result.rows[0];
        let key_values = row
            .iter()
            .take(3)
            .map(|(k, v)| format!("{}: {}", k, render_value(v)))
            .collect::<Vec<_>>()
            .join(", ");
        return format!("Query returned 1 result: {}.", key_values);
    }

    let mut summary_parts = Vec::new();
    for row in result.rows.iter().take(5) {
        if let Some((key, value)) = row.iter().find(|(k, v)| {
            v.as_f64().map(|n| n > 0.0).unwrap_or(false) && !k.to_lowercase().contains("id")
        }) {
            summary_parts.push(format!("{}: {}", key, render_value(value)));
        }
        if summary_parts.len() >= 3 {
            break;
        }
    }

    let key_points = if summary_parts.is_empty() {
        format!("{} records found", result.rows.len())
    } else {
        summary_parts.join("; ")
    };

    format!("Query returned {} results. Key data points: {}", result.row_count, key_points)
}

/// Every numeric token in the narrative must appear in the result values,
/// the row count, the question itself, or a column total. Formatting is
/// tolerated: commas are stripped and floats compare with tolerance.
fn is_grounded(narrative: &str, question: &str, result: &ExecutionResult) -> bool {
    let allowed = allowed_numbers(question, result);

    for token in NUMERIC_TOKEN.find_iter(narrative) {
        let normalized = token.as_str().replace(',', "");
        let Ok(value) = normalized.parse::<f64>() else {
            continue;
        };
        if !allowed.iter().any(|a| (a - value).abs() < 1e-9) {
            tracing::debug!("Ungrounded numeric token in narrative: {}", token.as_str());
            return false;
        }
    }
    true
}

fn allowed_numbers(question: &str, result: &ExecutionResult) -> Vec<f64> {
    let mut allowed: Vec<f64> = Vec::new();

    allowed.push(result.row_count as f64);
    allowed.push(result.rows.len() as f64);

    for token in NUMERIC_TOKEN.find_iter(question) {
        if let Ok(v) = token.as_str().replace(',', "").parse::<f64>() {
            allowed.push(v);
        }
    }

    // Per-column totals count as derivable
    let mut column_sums: std::collections::HashMap<&str, f64> = std::collections::HashMap::new();

    for row in &result.rows {
        for (key, value) in row {
            if let Some(n) = value.as_f64() {
                allowed.push(n);
                *column_sums.entry(key.as_str()).or_insert(0.0) += n;
            } else if let Some(s) = value.as_str() {
                // Numeric tokens inside string values (dates, masked ids)
                for token in NUMERIC_TOKEN.find_iter(s) {
                    if let Ok(v) = token.as_str().replace(',', "").parse::<f64>() {
                        allowed.push(v);
                    }
                }
            }
        }
    }

    allowed.extend(column_sums.into_values());
    allowed
}
