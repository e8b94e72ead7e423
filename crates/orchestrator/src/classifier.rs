//! Result classification and enrichment.
//!
//! Turns a [`ToolOutcome`] into a [`QualityAnnotatedResult`]: a quality
//! label, a validation flag, guidance for the model, and (for data-bearing
//! results) a compacted copy of the data. Everything here is a pure
//! function of its inputs.

use quarry_config::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dates;
use crate::outcome::ToolOutcome;
use crate::query_mode::QueryMode;

/// Quality label of one tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Good,
    Limited,
    Empty,
    Failed,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Limited => "limited",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

/// Where array truncation happened during compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub shown: usize,
    pub total: usize,
}

/// A tool result rewritten for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAnnotatedResult {
    pub tool_name: String,
    pub summary: String,
    pub quality: Quality,
    pub validation_status: bool,
    pub guidance_text: String,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<Truncation>,
}

impl QualityAnnotatedResult {
    /// The compact JSON object placed in the tool-result turn.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "tool": self.tool_name,
            "quality": self.quality,
            "summary": self.summary,
            "record_count": self.record_count,
            "validated": self.validation_status,
            "guidance": self.guidance_text,
        });
        if let Some(data) = &self.data {
            payload["data"] = data.clone();
        }
        if let Some(truncated) = self.truncated {
            payload["truncated"] = json!(truncated);
        }
        payload
    }
}

/// The knobs the classifier reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierSettings {
    pub min_data_threshold: u64,
    pub max_records_in_context: usize,
    pub strict_guidance: bool,
}

impl ClassifierSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            min_data_threshold: config.min_data_threshold,
            max_records_in_context: config.max_records_in_context,
            strict_guidance: config.strict_guidance,
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// Quality label for an outcome.
pub fn classify(outcome: &ToolOutcome, min_data_threshold: u64) -> Quality {
    if outcome.is_error() {
        Quality::Failed
    } else if outcome.is_empty() {
        Quality::Empty
    } else if outcome.record_count < min_data_threshold {
        Quality::Limited
    } else {
        Quality::Good
    }
}

/// Whether the result evidently answers the dates the user asked about.
///
/// Failed and empty outcomes never validate. Without date references in
/// the query, any data-bearing result validates.
pub fn validate(outcome: &ToolOutcome, query: &str) -> bool {
    if outcome.is_error() || outcome.is_empty() {
        return false;
    }
    let Some(payload) = outcome.payload() else {
        return false;
    };

    let references = dates::extract(query);
    if references.is_empty() {
        return true;
    }

    let haystack = match serde_json::to_string(payload) {
        Ok(s) => s.to_lowercase(),
        Err(_) => return false,
    };
    references.iter().all(|r| r.appears_in(&haystack))
}

/// Shorten every array longer than `max_items`, reporting the largest cut.
pub fn compact_payload(payload: &Value, max_items: usize) -> (Value, Option<Truncation>) {
    fn walk(value: &Value, max_items: usize, cut: &mut Option<Truncation>) -> Value {
        match value {
            Value::Array(items) => {
                if items.len() > max_items {
                    let widest = cut.map_or(0, |t| t.total);
                    if items.len() > widest {
                        *cut = Some(Truncation {
                            shown: max_items,
                            total: items.len(),
                        });
                    }
                }
                Value::Array(
                    items
                        .iter()
                        .take(max_items)
                        .map(|v| walk(v, max_items, cut))
                        .collect(),
                )
            }
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), walk(v, max_items, cut)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    let mut cut = None;
    let compacted = walk(payload, max_items, &mut cut);
    (compacted, cut)
}

fn unavailable_guidance(quality: Quality, mode: QueryMode, strict: bool) -> String {
    let mut text = match quality {
        Quality::Failed => String::from(
            "This data source failed. Tell the user this data is unavailable right now. \
             Do not invent, estimate, or fill in values.",
        ),
        _ => String::from(
            "No data is available for this request. State plainly that no data is available. \
             Do not invent, estimate, or fill in values.",
        ),
    };
    if mode == QueryMode::Analytical {
        text.push_str(" Leave this source out of the analysis and say so.");
    }
    if !strict {
        text.push_str(" You may retry once with broader parameters if another attempt could help.");
    }
    text
}

/// Classify, validate and rewrite an outcome for the model.
///
/// Never mutates the outcome; identical inputs give identical results.
pub fn enrich(
    outcome: &ToolOutcome,
    query: &str,
    mode: QueryMode,
    settings: &ClassifierSettings,
) -> QualityAnnotatedResult {
    let quality = classify(outcome, settings.min_data_threshold);
    let validation_status = validate(outcome, query);
    let records = outcome.record_count;

    let (summary, guidance_text, data, truncated) = match quality {
        Quality::Failed => (
            format!(
                "{} failed: {}",
                outcome.tool_name,
                outcome.error_message().unwrap_or("unknown error")
            ),
            unavailable_guidance(quality, mode, settings.strict_guidance),
            None,
            None,
        ),
        Quality::Empty => (
            format!("{} returned no data", outcome.tool_name),
            unavailable_guidance(quality, mode, settings.strict_guidance),
            None,
            None,
        ),
        Quality::Limited | Quality::Good => {
            let (data, truncated) = outcome
                .payload()
                .map(|p| compact_payload(p, settings.max_records_in_context))
                .map_or((None, None), |(d, t)| (Some(d), t));

            let summary = format!(
                "{} returned {} record{} ({})",
                outcome.tool_name,
                records,
                if records == 1 { "" } else { "s" },
                quality.as_str()
            );

            let mut guidance = if quality == Quality::Limited {
                String::from(
                    "Only a few records came back. Extract the maximum value from them \
                     and mention that the data is limited.",
                )
            } else {
                String::from("Answer from these records.")
            };
            if !validation_status {
                guidance.push_str(
                    " The records do not clearly cover the dates in the question; say so if it matters.",
                );
            }
            if let Some(t) = truncated {
                guidance.push_str(&format!(
                    " Only the first {} of {} items are shown.",
                    t.shown, t.total
                ));
            }
            (summary, guidance, data, truncated)
        }
    };

    QualityAnnotatedResult {
        tool_name: outcome.tool_name.clone(),
        summary,
        quality,
        validation_status,
        guidance_text,
        record_count: records,
        data,
        truncated,
    }
}
