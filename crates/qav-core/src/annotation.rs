//! Entity annotations stored alongside indexed documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QavError, Result};

/// Entity types whose surface form is masked in display names.
pub const ANONYMIZED_TYPES: &[&str] = &["persona", "parte", "controparte"];

/// An entity mention as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: Value,

    #[serde(rename = "id_ER", default)]
    pub id_er: String,

    #[serde(default)]
    pub start: u64,

    #[serde(default)]
    pub end: u64,

    #[serde(rename = "type")]
    pub kind: String,

    pub mention: String,

    #[serde(default)]
    pub is_linked: bool,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymize: Option<bool>,
}

/// Mask every word after its first character: `"Mario Rossi"` → `"M**** R****"`.
pub fn anonymize(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    let mut masked = String::with_capacity(word.len());
                    masked.push(first);
                    masked.extend(chars.map(|_| '*'));
                    masked
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether mentions of this entity type are anonymized.
pub fn is_anonymized_type(kind: &str) -> bool {
    ANONYMIZED_TYPES.contains(&kind)
}

/// Display name for a mention: anonymized for personal entity types.
pub fn display_name_for(mention: &str, kind: &str) -> String {
    if is_anonymized_type(kind) {
        anonymize(mention)
    } else {
        mention.to_string()
    }
}

/// Normalize a caller-supplied mention object, filling defaults.
pub fn normalize_mention(mention: &serde_json::Map<String, Value>) -> Annotation {
    let str_field = |key: &str, default: &str| {
        mention
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    let kind = str_field("type", "unknown");
    let surface = str_field("mention", "");
    let anonymized = is_anonymized_type(&kind);
    let display_name = mention
        .get("display_name")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| display_name_for(&surface, &kind));

    Annotation {
        id: mention.get("id").cloned().unwrap_or(Value::Null),
        id_er: str_field("id_ER", ""),
        start: mention.get("start").and_then(Value::as_u64).unwrap_or(0),
        end: mention.get("end").and_then(Value::as_u64).unwrap_or(0),
        kind,
        mention: surface,
        is_linked: mention
            .get("is_linked")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        display_name,
        anonymize: Some(anonymized),
    }
}

/// Convert an annotation produced by the NER pipeline into its stored form.
///
/// Offsets are character positions into `text`. Linked entities take their
/// title and knowledge-base url; unlinked ones get a document-local id.
pub fn process_raw_annotation(raw: &Value, text: &str, document_id: &str) -> Result<Annotation> {
    let start = raw
        .get("start")
        .and_then(Value::as_u64)
        .ok_or_else(|| QavError::invalid_argument("annotation has no start offset"))?;
    let end = raw
        .get("end")
        .and_then(Value::as_u64)
        .ok_or_else(|| QavError::invalid_argument("annotation has no end offset"))?;
    let id = raw
        .get("id")
        .cloned()
        .ok_or_else(|| QavError::invalid_argument("annotation has no id"))?;
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| QavError::invalid_argument("annotation has no type"))?
        .to_string();

    if end < start {
        return Err(QavError::invalid_argument(format!(
            "annotation span {}..{} is reversed",
            start, end
        )));
    }

    let mention: String = text
        .chars()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect();

    let features = raw.get("features");
    let linking = features.and_then(|f| f.get("linking"));
    let is_nil = linking
        .and_then(|l| l.get("is_nil"))
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let (display_name, is_linked, id_er) = match linking {
        Some(linking) if !is_nil => (
            features
                .and_then(|f| f.get("title"))
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| mention.clone()),
            true,
            linking
                .get("top_candidate")
                .and_then(|c| c.get("url"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        ),
        _ => (
            mention.clone(),
            false,
            format!("{}_{}", document_id, mention),
        ),
    };

    Ok(Annotation {
        id,
        id_er,
        start,
        end,
        kind,
        mention,
        is_linked,
        display_name,
        anonymize: None,
    })
}
