//! Normalization of the external analysis webhook's response.
//!
//! The webhook does not return a stable shape: the same service has been
//! observed wrapping its payload in an array, nesting it under `response`,
//! returning it flat, and spelling field names in several case variants.
//! Everything the rest of the service touches goes through [`normalize`],
//! which probes the known shapes in order and produces exactly one validated
//! [`AnalysisResult`] or a typed error.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const UNKNOWN_DISEASE: &str = "Unknown Disease";

const DEFAULT_ORGANIC: &str =
    "Apply a general-purpose organic treatment such as neem oil and monitor the plant closely.";
const DEFAULT_CHEMICAL: &str =
    "Consult a local plant specialist before applying chemical treatments.";

const DIAGNOSIS_KEYS: &[&str] = &["Diagnosis", "diagnosis", "Disease", "disease"];
const ORGANIC_KEYS: &[&str] = &[
    "Organic Diagnosis",
    "organic_diagnosis",
    "organicDiagnosis",
    "Organic Treatment",
    "organic_treatment",
    "Organic",
    "organic",
];
const CHEMICAL_KEYS: &[&str] = &[
    "Chemical Diagnosis",
    "chemical_diagnosis",
    "chemicalDiagnosis",
    "Chemical Treatment",
    "chemical_treatment",
    "Chemical",
    "chemical",
];
const SEVERITY_KEYS: &[&str] = &[
    "Severity",
    "severity",
    "Severity Percent",
    "severity_percent",
    "severityPercent",
];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("empty response from analysis service")]
    EmptyResponse,
    #[error("analysis response is not valid JSON: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("analysis response did not match any known shape")]
    UnrecognizedSchema,
    #[error("normalized analysis failed validation: {0}")]
    SchemaValidationFailed(String),
}

/// Closed severity set. The webhook never reports `None` directly; it only
/// appears in stored rows for healthy-plant results and in stats bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "None",
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical analysis record, the only thing allowed past this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub disease: String,
    pub severity: Severity,
    pub severity_percent: i64,
    pub organic_diagnosis: String,
    pub chemical_diagnosis: String,
}

/// Turn the raw webhook body into a canonical [`AnalysisResult`].
///
/// Fails with [`NormalizeError::EmptyResponse`] on an empty body,
/// [`NormalizeError::MalformedResponse`] on invalid JSON,
/// [`NormalizeError::UnrecognizedSchema`] when no shape candidate yields a
/// recognizable field, and [`NormalizeError::SchemaValidationFailed`] when
/// the extracted record violates the canonical contract. No partial results
/// are ever returned.
pub fn normalize(raw: &str) -> Result<AnalysisResult, NormalizeError> {
    if raw.trim().is_empty() {
        return Err(NormalizeError::EmptyResponse);
    }

    let root: Value = serde_json::from_str(raw)?;
    let output = locate_output(&root).ok_or(NormalizeError::UnrecognizedSchema)?;

    let disease = lookup(output, DIAGNOSIS_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_DISEASE.to_string());

    let organic_diagnosis = extract_treatment(output, ORGANIC_KEYS, DEFAULT_ORGANIC);
    let chemical_diagnosis = extract_treatment(output, CHEMICAL_KEYS, DEFAULT_CHEMICAL);
    let (severity, severity_percent) = classify_severity(lookup(output, SEVERITY_KEYS));

    let result = AnalysisResult {
        disease,
        severity,
        severity_percent,
        organic_diagnosis,
        chemical_diagnosis,
    };
    validate(&result).map_err(NormalizeError::SchemaValidationFailed)?;
    Ok(result)
}

/// Strict post-normalization contract: all text fields non-empty, percent
/// within [0,100]. A record failing this is never persisted.
pub fn validate(result: &AnalysisResult) -> Result<(), String> {
    if result.disease.trim().is_empty() {
        return Err("disease must be a non-empty string".into());
    }
    if result.organic_diagnosis.trim().is_empty() {
        return Err("organic_diagnosis must be a non-empty string".into());
    }
    if result.chemical_diagnosis.trim().is_empty() {
        return Err("chemical_diagnosis must be a non-empty string".into());
    }
    if !(0..=100).contains(&result.severity_percent) {
        return Err(format!(
            "severity_percent {} outside [0,100]",
            result.severity_percent
        ));
    }
    Ok(())
}

type Candidate = for<'a> fn(&'a Value) -> Option<&'a Map<String, Value>>;

/// Ordered shape candidates; the first one that both matches structurally and
/// carries at least one recognizable field wins. No merging across candidates.
const CANDIDATES: &[Candidate] = &[
    array_output,
    array_response_output,
    object_output,
    flat_fields,
];

fn locate_output(root: &Value) -> Option<&Map<String, Value>> {
    CANDIDATES
        .iter()
        .filter_map(|candidate| candidate(root))
        .find(|obj| has_recognizable_field(obj))
}

/// `result[0].output`
fn array_output(root: &Value) -> Option<&Map<String, Value>> {
    root.as_array()?.first()?.get("output")?.as_object()
}

/// `result[0].response.output`
fn array_response_output(root: &Value) -> Option<&Map<String, Value>> {
    root.as_array()?
        .first()?
        .get("response")?
        .get("output")?
        .as_object()
}

/// `result.output` on a plain object
fn object_output(root: &Value) -> Option<&Map<String, Value>> {
    root.get("output")?.as_object()
}

/// Diagnosis-like fields directly at the top level.
fn flat_fields(root: &Value) -> Option<&Map<String, Value>> {
    root.as_object()
}

fn has_recognizable_field(obj: &Map<String, Value>) -> bool {
    lookup(obj, DIAGNOSIS_KEYS).is_some()
        || lookup(obj, ORGANIC_KEYS).is_some()
        || lookup(obj, CHEMICAL_KEYS).is_some()
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

/// A treatment field may be a single string or a list of steps. Lists are
/// cleaned item by item and bullet-joined; a missing or unusable field falls
/// back to a fixed generic recommendation.
fn extract_treatment(obj: &Map<String, Value>, keys: &[&str], fallback: &str) -> String {
    match lookup(obj, keys) {
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(clean_treatment)
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                fallback.to_string()
            } else {
                parts.join("\n\u{2022} ")
            }
        }
        Some(Value::String(text)) => {
            let cleaned = clean_treatment(text);
            if cleaned.is_empty() {
                fallback.to_string()
            } else {
                cleaned
            }
        }
        _ => fallback.to_string(),
    }
}

lazy_static! {
    static ref EG_WITH_COMMA: Regex = Regex::new(r"\(e\.g\.,\s*").unwrap();
    static ref EG_PLAIN: Regex = Regex::new(r"\(e\.g\.\s*").unwrap();
    static ref PAREN_WITH: Regex = Regex::new(r"\)\s+with\s+").unwrap();
}

/// Fixed, deterministic rewrites of abbreviation patterns the webhook is fond
/// of. Not a general text parser.
fn clean_treatment(raw: &str) -> String {
    let text = EG_WITH_COMMA.replace_all(raw, "(for example: ");
    let text = EG_PLAIN.replace_all(&text, "(for example ");
    let text = PAREN_WITH.replace_all(&text, ") - ");
    text.trim().to_string()
}

/// Severity decision table. The label is deliberately not derived from a
/// numeric percent (a percent of 83 still reads "Moderate"); the string rules
/// check "mild" before "severe".
fn classify_severity(source: Option<&Value>) -> (Severity, i64) {
    match source {
        Some(Value::Number(n)) => {
            let percent = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .unwrap_or(50);
            (Severity::Moderate, percent)
        }
        Some(Value::String(text)) => {
            let lower = text.to_lowercase();
            if lower.contains("mild") {
                (Severity::Mild, 25)
            } else if lower.contains("severe") {
                (Severity::Severe, 75)
            } else {
                (Severity::Moderate, 50)
            }
        }
        _ => (Severity::Moderate, 50),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_full(result: &AnalysisResult) {
        assert_ne!(result.disease, UNKNOWN_DISEASE);
        assert_ne!(result.organic_diagnosis, DEFAULT_ORGANIC);
        assert_ne!(result.chemical_diagnosis, DEFAULT_CHEMICAL);
    }

    #[test]
    fn array_output_shape() {
        let raw = r#"[{"output": {
            "Diagnosis": "Late Blight",
            "Organic Diagnosis": "Remove infected leaves",
            "Chemical Diagnosis": "Copper fungicide",
            "Severity": "Severe infection"
        }}]"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.disease, "Late Blight");
        assert_eq!(result.severity, Severity::Severe);
        assert_eq!(result.severity_percent, 75);
        assert_full(&result);
    }

    #[test]
    fn array_response_output_shape() {
        let raw = r#"[{"response": {"output": {
            "diagnosis": "Powdery Mildew",
            "organic_diagnosis": "Baking soda spray",
            "chemical_diagnosis": "Sulfur dust",
            "severity": "mild"
        }}}]"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.disease, "Powdery Mildew");
        assert_eq!(result.severity, Severity::Mild);
        assert_eq!(result.severity_percent, 25);
        assert_full(&result);
    }

    #[test]
    fn object_output_shape() {
        let raw = r#"{"output": {
            "Disease": "Bacterial Spot",
            "organic": "Copper soap",
            "chemical": "Streptomycin",
            "severity": 62
        }}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.disease, "Bacterial Spot");
        assert_eq!(result.severity_percent, 62);
        assert_full(&result);
    }

    #[test]
    fn flat_aliased_shape() {
        let raw = r#"{
            "disease": "Rust",
            "Organic Treatment": "Prune affected shoots",
            "Chemical Treatment": "Myclobutanil",
            "Severity": "moderate spread"
        }"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.disease, "Rust");
        assert_eq!(result.severity, Severity::Moderate);
        assert_eq!(result.severity_percent, 50);
        assert_full(&result);
    }

    #[test]
    fn first_matching_candidate_wins() {
        // Array element has both output and response.output; the first
        // candidate must win and the nested one must be ignored.
        let raw = r#"[{
            "output": {"diagnosis": "From output"},
            "response": {"output": {"diagnosis": "From response"}}
        }]"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.disease, "From output");
    }

    #[test]
    fn missing_diagnosis_defaults_without_failing() {
        let raw = r#"{"output": {"organic_diagnosis": "Neem oil weekly"}}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.disease, UNKNOWN_DISEASE);
        assert_eq!(result.organic_diagnosis, "Neem oil weekly");
        assert_eq!(result.chemical_diagnosis, DEFAULT_CHEMICAL);
    }

    #[test]
    fn treatment_list_is_bullet_joined() {
        let raw = r#"{"output": {
            "diagnosis": "Leaf Spot",
            "organic_diagnosis": ["Remove debris", "Rotate crops", "Improve drainage"]
        }}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(
            result.organic_diagnosis,
            "Remove debris\n\u{2022} Rotate crops\n\u{2022} Improve drainage"
        );
    }

    #[test]
    fn severity_mild_substring_wins_first() {
        let raw = r#"{"output": {"diagnosis": "X", "severity": "Mild to moderate"}}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.severity, Severity::Mild);
        assert_eq!(result.severity_percent, 25);
    }

    #[test]
    fn numeric_severity_keeps_moderate_label() {
        let raw = r#"{"output": {"diagnosis": "X", "severity": 83}}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.severity, Severity::Moderate);
        assert_eq!(result.severity_percent, 83);
    }

    #[test]
    fn absent_severity_defaults_moderate_fifty() {
        let raw = r#"{"output": {"diagnosis": "X"}}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.severity, Severity::Moderate);
        assert_eq!(result.severity_percent, 50);
    }

    #[test]
    fn empty_body_is_empty_response() {
        assert!(matches!(normalize(""), Err(NormalizeError::EmptyResponse)));
        assert!(matches!(
            normalize("   \n"),
            Err(NormalizeError::EmptyResponse)
        ));
    }

    #[test]
    fn truncated_json_is_malformed() {
        assert!(matches!(
            normalize(r#"{"output": {"diagnosis": "#),
            Err(NormalizeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn unknown_fields_everywhere_is_unrecognized() {
        let raw = r#"{"status": "ok", "payload": {"foo": 1}}"#;
        assert!(matches!(
            normalize(raw),
            Err(NormalizeError::UnrecognizedSchema)
        ));
    }

    #[test]
    fn empty_array_is_unrecognized() {
        assert!(matches!(
            normalize("[]"),
            Err(NormalizeError::UnrecognizedSchema)
        ));
    }

    #[test]
    fn out_of_range_percent_fails_validation() {
        let raw = r#"{"output": {"diagnosis": "X", "severity": 140}}"#;
        assert!(matches!(
            normalize(raw),
            Err(NormalizeError::SchemaValidationFailed(_))
        ));
    }

    #[test]
    fn cleaning_rewrites_abbreviations() {
        let raw = r#"{"output": {
            "diagnosis": "X",
            "organic_diagnosis": "Apply neem oil (e.g., weekly) with care"
        }}"#;
        let result = normalize(raw).unwrap();
        assert!(result
            .organic_diagnosis
            .contains("(for example: weekly) - care"));
    }

    #[test]
    fn cleaning_handles_eg_without_comma() {
        assert_eq!(
            clean_treatment("spray (e.g. at dawn)  "),
            "spray (for example at dawn)"
        );
    }

    #[test]
    fn severity_percent_alias_is_numeric_source() {
        let raw = r#"{"output": {"diagnosis": "X", "severity_percent": 10}}"#;
        let result = normalize(raw).unwrap();
        assert_eq!(result.severity, Severity::Moderate);
        assert_eq!(result.severity_percent, 10);
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let result = AnalysisResult {
            disease: "  ".into(),
            severity: Severity::Mild,
            severity_percent: 25,
            organic_diagnosis: "a".into(),
            chemical_diagnosis: "b".into(),
        };
        assert!(validate(&result).is_err());
    }
}
