//! Per-task result schemas and their validation
//!
//! Each element of the model's array is decoded on its own. Elements that
//! do not match the schema for the task, or that point at an item outside
//! the chunk the prompt was built from, are rejected individually.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{
    EntityLocation, GreenClassification, ResultBatch, ResultKind, TechClassification, WorkItem,
};
use crate::taxonomy::Taxonomy;

use super::parser::{MalformedResponse, parse_json_array};

/// Validated records of one call plus the number of elements thrown away
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub batch: ResultBatch,
    pub rejected: usize,
}

#[derive(Debug, Error)]
enum Rejection {
    #[error("unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("key {0:?} is not part of this batch")]
    UnknownKey(String),

    #[error("code {0:?} is not in the taxonomy")]
    UnknownCode(String),

    #[error("confidence {0} is outside [0, 1]")]
    Confidence(String),

    #[error("duplicate record for {0:?}")]
    Duplicate(String),
}

/// Natural keys of a chunk, also reachable through display names
pub struct ChunkKeys {
    aliases: HashMap<String, String>,
}

impl ChunkKeys {
    pub fn new(chunk: &[WorkItem]) -> Self {
        let mut aliases = HashMap::new();
        for item in chunk {
            if let WorkItem::Entity(entity) = item {
                aliases.insert(entity.display_name.clone(), entity.normalized_name.clone());
            }
        }
        // Natural keys take precedence over display names
        for item in chunk {
            aliases.insert(item.key().to_string(), item.key().to_string());
        }
        Self { aliases }
    }

    /// The chunk key `candidate` refers to, if any
    pub fn resolve(&self, candidate: &str) -> Option<&str> {
        self.aliases.get(candidate.trim()).map(String::as_str)
    }
}

#[derive(Deserialize)]
struct RawGreen {
    patent_id: String,
    category_code: String,
    #[serde(default)]
    category_type: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct RawTechPatent {
    patent_id: String,
    #[serde(default)]
    tech_domains: Vec<Value>,
}

#[derive(Deserialize)]
struct RawTechDomain {
    code: String,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct RawLocation {
    normalized_name: String,
    #[serde(default)]
    province: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    district: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    source: Option<String>,
}

/// Parse and validate the raw text returned for a `kind` prompt over `chunk`
pub fn parse_task_output(
    kind: ResultKind,
    raw: &str,
    chunk: &[WorkItem],
    taxonomy: &Taxonomy,
) -> Result<ParsedOutput, MalformedResponse> {
    let values = parse_json_array(raw)?;
    let keys = ChunkKeys::new(chunk);
    let mut rejected = 0;

    let batch = match kind {
        ResultKind::Green => {
            let mut seen = HashSet::new();
            let records = values
                .into_iter()
                .filter_map(|value| {
                    keep(kind, &mut rejected, validate_green(value, &keys, taxonomy, &mut seen))
                })
                .collect();
            ResultBatch::Green(records)
        }
        ResultKind::Tech => {
            let mut seen = HashSet::new();
            let mut records = Vec::new();
            for value in values {
                match serde_json::from_value::<RawTechPatent>(value) {
                    Ok(patent) => {
                        let Some(patent_id) = keys.resolve(&patent.patent_id) else {
                            keep::<()>(kind, &mut rejected, Err(Rejection::UnknownKey(patent.patent_id)));
                            continue;
                        };
                        for domain in patent.tech_domains {
                            let record = validate_tech(patent_id, domain, taxonomy, &mut seen);
                            if let Some(record) = keep(kind, &mut rejected, record) {
                                records.push(record);
                            }
                        }
                    }
                    Err(e) => {
                        keep::<()>(kind, &mut rejected, Err(Rejection::Shape(e)));
                    }
                }
            }
            ResultBatch::Tech(records)
        }
        ResultKind::Location => {
            let mut seen = HashSet::new();
            let records = values
                .into_iter()
                .filter_map(|value| {
                    keep(kind, &mut rejected, validate_location(value, &keys, &mut seen))
                })
                .collect();
            ResultBatch::Location(records)
        }
    };

    Ok(ParsedOutput { batch, rejected })
}

fn keep<T>(kind: ResultKind, rejected: &mut usize, outcome: Result<T, Rejection>) -> Option<T> {
    match outcome {
        Ok(record) => Some(record),
        Err(reason) => {
            *rejected += 1;
            debug!(task = %kind, reason = %reason, "Rejected record");
            None
        }
    }
}

fn validate_green(
    value: Value,
    keys: &ChunkKeys,
    taxonomy: &Taxonomy,
    seen: &mut HashSet<String>,
) -> Result<GreenClassification, Rejection> {
    let raw: RawGreen = serde_json::from_value(value)?;
    let patent_id = keys
        .resolve(&raw.patent_id)
        .ok_or_else(|| Rejection::UnknownKey(raw.patent_id.clone()))?
        .to_string();

    let code = raw.category_code.trim().to_ascii_uppercase();
    let category = taxonomy
        .green_category(&code)
        .ok_or_else(|| Rejection::UnknownCode(raw.category_code.clone()))?;
    let confidence = confidence(raw.confidence.as_ref())?;

    if !seen.insert(patent_id.clone()) {
        return Err(Rejection::Duplicate(patent_id));
    }

    let category_type = raw
        .category_type
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| category.category_type.clone());

    Ok(GreenClassification {
        patent_id,
        category_code: code,
        category_type,
        confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
    })
}

fn validate_tech(
    patent_id: &str,
    value: Value,
    taxonomy: &Taxonomy,
    seen: &mut HashSet<(String, String)>,
) -> Result<TechClassification, Rejection> {
    let raw: RawTechDomain = serde_json::from_value(value)?;
    let code = raw.code.trim().to_ascii_uppercase();
    let node = taxonomy
        .tech_node(&code)
        .ok_or_else(|| Rejection::UnknownCode(raw.code.clone()))?;
    let confidence = confidence(raw.confidence.as_ref())?;

    if !seen.insert((patent_id.to_string(), code.clone())) {
        return Err(Rejection::Duplicate(format!("{} {}", patent_id, code)));
    }

    Ok(TechClassification {
        patent_id: patent_id.to_string(),
        level: node.level(),
        code,
        confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
    })
}

fn validate_location(
    value: Value,
    keys: &ChunkKeys,
    seen: &mut HashSet<String>,
) -> Result<EntityLocation, Rejection> {
    let raw: RawLocation = serde_json::from_value(value)?;
    let normalized_name = keys
        .resolve(&raw.normalized_name)
        .ok_or_else(|| Rejection::UnknownKey(raw.normalized_name.clone()))?
        .to_string();
    let confidence = confidence(raw.confidence.as_ref())?;

    if !seen.insert(normalized_name.clone()) {
        return Err(Rejection::Duplicate(normalized_name));
    }

    Ok(EntityLocation {
        normalized_name,
        province: non_empty(raw.province),
        city: non_empty(raw.city),
        district: non_empty(raw.district),
        confidence,
        source: raw.source.unwrap_or_default(),
    })
}

/// Missing confidence counts as 0; numeric strings are accepted
fn confidence(value: Option<&Value>) -> Result<f64, Rejection> {
    let parsed = match value {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(c) if (0.0..=1.0).contains(&c) => Ok(c),
        _ => Err(Rejection::Confidence(
            value.map(|v| v.to_string()).unwrap_or_default(),
        )),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityItem, EntityType, PatentItem};

    fn patent(id: &str) -> WorkItem {
        WorkItem::Patent(PatentItem {
            patent_id: id.to_string(),
            title: "t".to_string(),
            abstract_excerpt: "a".to_string(),
            ipc_main_class: None,
            tech_domain_hint: None,
        })
    }

    fn entity(normalized: &str, display: &str) -> WorkItem {
        WorkItem::Entity(EntityItem {
            normalized_name: normalized.to_string(),
            display_name: display.to_string(),
            entity_type: EntityType::Company,
        })
    }

    #[test]
    fn test_green_scenario_from_prose() {
        let taxonomy = Taxonomy::builtin();
        let raw = "Here is the result:\n[{\"patent_id\":\"CN123\",\"category_code\":\"GT1\"}]\nDone.";

        let parsed =
            parse_task_output(ResultKind::Green, raw, &[patent("CN123")], &taxonomy).unwrap();

        let ResultBatch::Green(records) = parsed.batch else {
            panic!("expected green batch");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category_code, "GT1");
        assert_eq!(records[0].category_type, "零碳使能型");
        assert_eq!(records[0].confidence, 0.0);
        assert_eq!(records[0].reasoning, "");
        assert_eq!(parsed.rejected, 0);
    }

    #[test]
    fn test_green_rejects_individually() {
        let taxonomy = Taxonomy::builtin();
        let raw = r#"[
            {"patent_id": "CN1", "category_code": "GT2", "confidence": 0.8, "reasoning": "CCS"},
            {"patent_id": "CN9", "category_code": "GT1", "confidence": 0.9},
            {"patent_id": "CN2", "category_code": "GT7", "confidence": 0.9},
            {"patent_id": "CN2", "category_code": "gt3", "confidence": 1.5},
            {"patent_id": "CN2", "category_code": "gt3", "confidence": "0.6"},
            {"category_code": "GT3"},
            "not an object"
        ]"#;

        let parsed = parse_task_output(
            ResultKind::Green,
            raw,
            &[patent("CN1"), patent("CN2")],
            &taxonomy,
        )
        .unwrap();

        let ResultBatch::Green(records) = parsed.batch else {
            panic!("expected green batch");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].patent_id, "CN2");
        assert_eq!(records[1].category_code, "GT3");
        assert_eq!(records[1].confidence, 0.6);
        assert_eq!(parsed.rejected, 5);
    }

    #[test]
    fn test_green_duplicate_patent_keeps_first() {
        let taxonomy = Taxonomy::builtin();
        let raw = r#"[{"patent_id":"CN1","category_code":"GT1"},{"patent_id":"CN1","category_code":"GT2"}]"#;
        let parsed =
            parse_task_output(ResultKind::Green, raw, &[patent("CN1")], &taxonomy).unwrap();
        assert_eq!(parsed.batch.len(), 1);
        assert_eq!(parsed.rejected, 1);
    }

    #[test]
    fn test_tech_flattens_domains() {
        let taxonomy = Taxonomy::builtin();
        let raw = r#"[
            {"patent_id": "CN1", "tech_domains": [
                {"code": "H1.1.2", "level": 3, "confidence": 0.95, "reasoning": "PEM"},
                {"code": "H3.1", "confidence": 0.5},
                {"code": "H9.9", "confidence": 0.5}
            ]},
            {"patent_id": "CN2", "tech_domains": []}
        ]"#;

        let parsed = parse_task_output(
            ResultKind::Tech,
            raw,
            &[patent("CN1"), patent("CN2")],
            &taxonomy,
        )
        .unwrap();

        let ResultBatch::Tech(records) = parsed.batch else {
            panic!("expected tech batch");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].code, "H1.1.2");
        assert_eq!(records[0].level, 3);
        assert_eq!(records[1].code, "H3.1");
        assert_eq!(records[1].level, 2);
        assert_eq!(parsed.rejected, 1);
    }

    #[test]
    fn test_tech_unknown_patent_rejected() {
        let taxonomy = Taxonomy::builtin();
        let raw = r#"[{"patent_id": "CN404", "tech_domains": [{"code": "H1"}]}]"#;
        let parsed = parse_task_output(ResultKind::Tech, raw, &[patent("CN1")], &taxonomy).unwrap();
        assert!(parsed.batch.is_empty());
        assert_eq!(parsed.rejected, 1);
    }

    #[test]
    fn test_location_resolves_display_name() {
        let taxonomy = Taxonomy::builtin();
        let raw = r#"[
            {"normalized_name": "亿华通股份有限公司", "province": "北京市", "city": "北京市", "district": "", "confidence": 0.9, "source": "企业信用信息公示系统"},
            {"normalized_name": "未知实体", "province": "上海市", "confidence": 0.9}
        ]"#;

        let parsed = parse_task_output(
            ResultKind::Location,
            raw,
            &[entity("亿华通", "亿华通股份有限公司")],
            &taxonomy,
        )
        .unwrap();

        let ResultBatch::Location(records) = parsed.batch else {
            panic!("expected location batch");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].normalized_name, "亿华通");
        assert_eq!(records[0].district, None);
        assert_eq!(records[0].province.as_deref(), Some("北京市"));
        assert_eq!(parsed.rejected, 1);
    }

    #[test]
    fn test_malformed_response_is_error() {
        let taxonomy = Taxonomy::builtin();
        assert!(parse_task_output(ResultKind::Green, "no json here", &[patent("CN1")], &taxonomy).is_err());
        assert!(parse_task_output(ResultKind::Green, "[{broken}]", &[patent("CN1")], &taxonomy).is_err());
    }

    #[test]
    fn test_confidence_rules() {
        assert_eq!(confidence(None).unwrap(), 0.0);
        assert_eq!(confidence(Some(&Value::Null)).unwrap(), 0.0);
        assert_eq!(confidence(Some(&serde_json::json!(1))).unwrap(), 1.0);
        assert!(confidence(Some(&serde_json::json!(-0.1))).is_err());
        assert!(confidence(Some(&serde_json::json!("high"))).is_err());
        assert!(confidence(Some(&serde_json::json!([0.5]))).is_err());
    }
}
