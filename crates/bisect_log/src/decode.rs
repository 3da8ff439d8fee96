//! Line decoding: one JSON object per line into one checkpoint event.
//!
//! Field names differ between instrumentation generations (`point` vs
//! `checkpoint` vs `tag`, `prompt_id` vs `entity`), so every identity field
//! is looked up through an ordered list of candidate keys.

use crate::event::{CheckpointEvent, SampleStats};
use bisect_core::{CheckpointId, EntityKey, Phase, ScalarValue, TraceHash};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mapping from trace keys to event fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    /// Candidate keys for the entity identity, first present wins
    pub entity: Vec<String>,
    /// Candidate keys for the phase
    pub phase: Vec<String>,
    /// Candidate keys for the checkpoint id
    pub checkpoint: Vec<String>,
    /// Layer key
    pub layer: String,
    /// Step key
    pub step: String,
    /// Hash key
    pub hash: String,
    /// Sample key
    pub sample: String,
    /// Nested stats object key
    pub stats: String,
    /// Record-kind key used by the event filter
    pub event: String,
    /// Entity used when a record carries none of the entity keys
    pub fallback_entity: Option<String>,
    /// Phase used when a record carries none of the phase keys
    pub fallback_phase: Option<String>,
    /// Accepted values of the record-kind key (empty = accept all)
    pub event_filter: Vec<String>,
    /// Array keys that each become a checkpoint of their own when a record
    /// carries no checkpoint key; a number counts as a one-element array
    pub split: Vec<String>,
    /// Name a record that carries no checkpoint key after its record kind
    pub event_checkpoint: bool,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            entity: vec!["entity".to_string(), "prompt_id".to_string()],
            phase: vec!["phase".to_string()],
            checkpoint: vec![
                "checkpoint".to_string(),
                "point".to_string(),
                "tag".to_string(),
            ],
            layer: "layer".to_string(),
            step: "step".to_string(),
            hash: "hash".to_string(),
            sample: "sample".to_string(),
            stats: "stats".to_string(),
            event: "event".to_string(),
            fallback_entity: None,
            fallback_phase: None,
            event_filter: Vec::new(),
            split: Vec::new(),
            event_checkpoint: false,
        }
    }
}

/// Outcome of decoding one line
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A checkpoint event
    Event(CheckpointEvent),
    /// One record split into several checkpoint events, in split-key order
    Split(Vec<CheckpointEvent>),
    /// A well-formed record rejected by the event filter
    Filtered,
    /// A blank line
    Blank,
}

/// Why a line could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// Valid JSON but not an object
    #[error("record is not a JSON object")]
    NotAnObject,
    /// A required identity field is absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// A field has the wrong shape
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: String,
        /// What was wrong
        reason: String,
    },
}

/// Top-level keys folded into `SampleStats` when no nested stats object exists
const FLAT_STAT_KEYS: [&str; 7] = ["min", "max", "mean", "nan", "inf", "nan_count", "inf_count"];

/// Decoder turning trace lines into events
#[derive(Debug, Clone, Default)]
pub struct LineDecoder {
    fields: FieldMap,
}

impl LineDecoder {
    /// Create a decoder with the given field mapping
    #[must_use]
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }

    /// The field mapping in use
    #[must_use]
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Decode one line
    ///
    /// # Errors
    ///
    /// Returns error if the line is not a structurally valid record
    pub fn decode_line(&self, line: &str) -> Result<Decoded, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Decoded::Blank);
        }

        let value: Value =
            serde_json::from_str(line).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        let Value::Object(record) = value else {
            return Err(DecodeError::NotAnObject);
        };

        if !self.fields.event_filter.is_empty() {
            let kind = record.get(&self.fields.event).and_then(Value::as_str);
            match kind {
                Some(kind) if self.fields.event_filter.iter().any(|k| k == kind) => {}
                _ => return Ok(Decoded::Filtered),
            }
        }

        self.decode_record(record)
    }

    fn decode_record(&self, mut record: Map<String, Value>) -> Result<Decoded, DecodeError> {
        let entity = match take_first(&mut record, &self.fields.entity) {
            Some((key, value)) => EntityKey::new(identity_text(&key, value)?),
            None => match &self.fields.fallback_entity {
                Some(fallback) => EntityKey::new(fallback.clone()),
                None => return Err(DecodeError::MissingField("entity")),
            },
        };

        let phase = match take_first(&mut record, &self.fields.phase) {
            Some((key, value)) => Phase::new(identity_text(&key, value)?),
            None => match &self.fields.fallback_phase {
                Some(fallback) => Phase::new(fallback.clone()),
                None => return Err(DecodeError::MissingField("phase")),
            },
        };

        let kind = self
            .fields
            .event_checkpoint
            .then(|| record.get(&self.fields.event).and_then(Value::as_str))
            .flatten()
            .filter(|k| !k.is_empty())
            .map(CheckpointId::new);
        let checkpoint = match take_first(&mut record, &self.fields.checkpoint) {
            Some((key, value)) => Some(CheckpointId::new(identity_text(&key, value)?)),
            None => None,
        };
        let mut parts = Vec::new();
        if checkpoint.is_none() {
            for key in &self.fields.split {
                if let Some(value) = take_present(&mut record, key) {
                    parts.push((CheckpointId::new(key.clone()), split_sample(key, value)?));
                }
            }
        }
        let Some(placeholder) = checkpoint
            .clone()
            .or_else(|| kind.clone())
            .or_else(|| parts.first().map(|(id, _)| id.clone()))
        else {
            return Err(DecodeError::MissingField("checkpoint"));
        };

        let mut event = CheckpointEvent::new(entity, phase, placeholder);

        if let Some(value) = take_present(&mut record, &self.fields.layer) {
            event.layer = Some(integer_field(&self.fields.layer, &value)?);
        }
        if let Some(value) = take_present(&mut record, &self.fields.step) {
            event.step = Some(integer_field(&self.fields.step, &value)?);
        }
        if let Some(value) = take_present(&mut record, &self.fields.hash) {
            event.hash = Some(hash_field(&self.fields.hash, &value)?);
        }
        if let Some(value) = take_present(&mut record, &self.fields.sample) {
            event.sample = Some(sample_field(&self.fields.sample, value)?);
        }

        event.stats = match take_present(&mut record, &self.fields.stats) {
            Some(Value::Object(stats)) => Some(stats_from(&stats, &self.fields.stats)?),
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field: self.fields.stats.clone(),
                    reason: "expected an object".to_string(),
                });
            }
            None => {
                let flat = stats_from(&record, "stats")?;
                if flat.is_empty() {
                    None
                } else {
                    for key in FLAT_STAT_KEYS {
                        record.remove(key);
                    }
                    Some(flat)
                }
            }
        };

        record.remove(&self.fields.event);

        event.scalars = record
            .iter()
            .filter_map(|(k, v)| ScalarValue::from_json(v).map(|s| (k.clone(), s)))
            .collect::<IndexMap<_, _>>();

        if parts.is_empty() {
            return Ok(Decoded::Event(event));
        }
        let mut events = Vec::with_capacity(parts.len() + 1);
        if kind.is_some() {
            events.push(event.clone());
        }
        events.extend(parts.into_iter().map(|(checkpoint, sample)| CheckpointEvent {
            checkpoint,
            sample: Some(sample),
            ..event.clone()
        }));
        Ok(Decoded::Split(events))
    }
}

/// Remove and return the first present, non-null candidate key
fn take_first(record: &mut Map<String, Value>, keys: &[String]) -> Option<(String, Value)> {
    keys.iter()
        .find(|k| record.get(k.as_str()).is_some_and(|v| !v.is_null()))
        .and_then(|k| record.remove(k.as_str()).map(|v| (k.clone(), v)))
}

fn take_present(record: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match record.remove(key) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value),
    }
}

fn identity_text(key: &str, value: Value) -> Result<String, DecodeError> {
    let text = match value {
        Value::String(s) => s,
        Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        _ => {
            return Err(DecodeError::InvalidField {
                field: key.to_string(),
                reason: "expected a string or integer".to_string(),
            });
        }
    };
    if text.is_empty() {
        return Err(DecodeError::InvalidField {
            field: key.to_string(),
            reason: "empty identifier".to_string(),
        });
    }
    Ok(text)
}

fn integer_field(key: &str, value: &Value) -> Result<i64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::InvalidField {
        field: key.to_string(),
        reason: format!("expected an integer, got {}", value),
    })
}

fn hash_field(key: &str, value: &Value) -> Result<TraceHash, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidField {
        field: key.to_string(),
        reason,
    };
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(TraceHash::from_raw(u))
            } else if let Some(i) = n.as_i64() {
                Ok(TraceHash::from_signed(i))
            } else {
                Err(invalid("hash must be an integer".to_string()))
            }
        }
        Value::String(s) => TraceHash::from_hex(s.trim()).map_err(|e| invalid(e.to_string())),
        _ => Err(invalid("expected an integer or hex string".to_string())),
    }
}

fn split_sample(key: &str, value: Value) -> Result<Vec<f64>, DecodeError> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| vec![f]).ok_or_else(|| DecodeError::InvalidField {
            field: key.to_string(),
            reason: "number out of range".to_string(),
        }),
        other => sample_field(key, other),
    }
}

fn sample_field(key: &str, value: Value) -> Result<Vec<f64>, DecodeError> {
    let Value::Array(items) = value else {
        return Err(DecodeError::InvalidField {
            field: key.to_string(),
            reason: "expected an array of numbers".to_string(),
        });
    };
    items
        .iter()
        .map(|item| {
            item.as_f64().ok_or_else(|| DecodeError::InvalidField {
                field: key.to_string(),
                reason: format!("non-numeric element {}", item),
            })
        })
        .collect()
}

fn stats_from(map: &Map<String, Value>, field: &str) -> Result<SampleStats, DecodeError> {
    let float = |name: &str| -> Result<Option<f64>, DecodeError> {
        match map.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| DecodeError::InvalidField {
                field: format!("{}.{}", field, name),
                reason: "expected a number".to_string(),
            }),
        }
    };
    let count = |names: [&str; 2]| -> Result<u64, DecodeError> {
        for name in names {
            match map.get(name) {
                None | Some(Value::Null) => continue,
                Some(v) => {
                    return v.as_u64().ok_or_else(|| DecodeError::InvalidField {
                        field: format!("{}.{}", field, name),
                        reason: "expected a non-negative integer".to_string(),
                    });
                }
            }
        }
        Ok(0)
    };

    Ok(SampleStats {
        min: float("min")?,
        max: float("max")?,
        mean: float("mean")?,
        nan_count: count(["nan_count", "nan"])?,
        inf_count: count(["inf_count", "inf"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Result<Decoded, DecodeError> {
        LineDecoder::default().decode_line(line)
    }

    fn event(line: &str) -> CheckpointEvent {
        match decode(line).unwrap() {
            Decoded::Event(e) => e,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_stage_record() {
        let e = event(
            r#"{"prompt_id":"p1","phase":"prefill_last","point":"x_in","layer":0,"hash":12,"sample":[0.5,1.0],"top1_id":7}"#,
        );
        assert_eq!(e.entity.as_str(), "p1");
        assert_eq!(e.phase.as_str(), "prefill_last");
        assert_eq!(e.checkpoint.as_str(), "x_in");
        assert_eq!(e.layer, Some(0));
        assert_eq!(e.hash, Some(TraceHash::from_raw(12)));
        assert_eq!(e.sample, Some(vec![0.5, 1.0]));
        assert_eq!(e.scalar("top1_id"), Some(&ScalarValue::Int(7)));
        assert!(e.scalar("point").is_none());
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(decode("   ").unwrap(), Decoded::Blank);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(decode("{oops"), Err(DecodeError::InvalidJson(_))));
        assert_eq!(decode("[1,2]"), Err(DecodeError::NotAnObject));
        assert_eq!(
            decode(r#"{"phase":"a","point":"b"}"#),
            Err(DecodeError::MissingField("entity"))
        );
        assert_eq!(
            decode(r#"{"entity":"e","point":"b"}"#),
            Err(DecodeError::MissingField("phase"))
        );
        assert!(matches!(
            decode(r#"{"entity":"e","phase":"a","point":"b","sample":[1,"x"]}"#),
            Err(DecodeError::InvalidField { .. })
        ));
        assert!(matches!(
            decode(r#"{"entity":"e","phase":"a","point":"b","layer":"top"}"#),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_integer_entity_and_hex_hash() {
        let fields = FieldMap {
            entity: vec!["token_id".to_string()],
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        let Decoded::Event(e) = decoder
            .decode_line(r#"{"token_id":42,"phase":"decode0","point":"wo_out","hash":"0xff"}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(e.entity.as_str(), "42");
        assert_eq!(e.hash, Some(TraceHash::from_raw(255)));
    }

    #[test]
    fn test_negative_hash_reinterpreted() {
        let e = event(r#"{"entity":"e","phase":"a","point":"b","hash":-1}"#);
        assert_eq!(e.hash, Some(TraceHash::from_raw(u64::MAX)));
    }

    #[test]
    fn test_fallback_entity() {
        let fields = FieldMap {
            fallback_entity: Some("unknown".to_string()),
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        let Decoded::Event(e) = decoder
            .decode_line(r#"{"phase":"decode0","point":"q"}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(e.entity.as_str(), "unknown");
    }

    #[test]
    fn test_fallback_phase() {
        let fields = FieldMap {
            fallback_entity: Some("trace".to_string()),
            fallback_phase: Some("run".to_string()),
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        let Decoded::Event(e) = decoder
            .decode_line(r#"{"step":3,"layer":0,"tag":"attn_out","hash":5,"min":0.0,"max":1.0,"mean":0.5}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(e.phase.as_str(), "run");
        assert_eq!(e.step, Some(3));
        assert_eq!(e.stats.unwrap().mean, Some(0.5));
    }

    #[test]
    fn test_event_filter() {
        let fields = FieldMap {
            event_filter: vec!["post_wo_trace".to_string()],
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        assert_eq!(
            decoder
                .decode_line(r#"{"event":"post_wo_logits","entity":"e","phase":"a","point":"b"}"#)
                .unwrap(),
            Decoded::Filtered
        );
        let Decoded::Event(e) = decoder
            .decode_line(r#"{"event":"post_wo_trace","entity":"e","phase":"a","point":"b"}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert!(e.scalar("event").is_none());
    }

    #[test]
    fn test_flat_stats() {
        let e = event(r#"{"entity":"e","phase":"a","tag":"b","min":-1.0,"max":2.0,"mean":0.5,"nan":1,"inf":0}"#);
        let stats = e.stats.as_ref().unwrap();
        assert_eq!(stats.min, Some(-1.0));
        assert_eq!(stats.max, Some(2.0));
        assert_eq!(stats.mean, Some(0.5));
        assert_eq!(stats.nan_count, 1);
        assert!(e.scalar("mean").is_none());
    }

    #[test]
    fn test_nested_stats() {
        let e = event(r#"{"entity":"e","phase":"a","point":"b","stats":{"mean":3.0,"inf_count":2}}"#);
        let stats = e.stats.unwrap();
        assert_eq!(stats.mean, Some(3.0));
        assert_eq!(stats.inf_count, 2);
    }

    #[test]
    fn test_null_fields_are_absent() {
        let e = event(r#"{"entity":"e","phase":"a","point":"b","hash":null,"sample":null,"layer":null}"#);
        assert!(e.hash.is_none());
        assert!(e.sample.is_none());
        assert!(e.layer.is_none());
    }

    #[test]
    fn test_split_record() {
        let fields = FieldMap {
            split: vec!["q".to_string(), "k".to_string(), "v".to_string()],
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        let Decoded::Split(events) = decoder
            .decode_line(
                r#"{"event":"attn_l0_pipe","prompt_id":"p0","phase":"decode0","q":[1.0,2.0],"v":[3.0],"q_route_used":"gemv"}"#,
            )
            .unwrap()
        else {
            panic!("expected split");
        };
        let names: Vec<&str> = events.iter().map(|e| e.checkpoint.as_str()).collect();
        assert_eq!(names, vec!["q", "v"]);
        assert_eq!(events[0].sample, Some(vec![1.0, 2.0]));
        assert_eq!(events[1].sample, Some(vec![3.0]));
        assert_eq!(
            events[1].scalar("q_route_used"),
            Some(&ScalarValue::Text("gemv".to_string()))
        );

        assert_eq!(
            decoder.decode_line(r#"{"entity":"e","phase":"a"}"#),
            Err(DecodeError::MissingField("checkpoint"))
        );
    }

    #[test]
    fn test_record_kind_names_checkpoint() {
        let fields = FieldMap {
            split: vec!["logits_mean".to_string()],
            event_checkpoint: true,
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        let Decoded::Split(events) = decoder
            .decode_line(
                r#"{"event":"post_wo_logits","prompt_id":"p0","phase":"decode0","top1_id":96965,"logits_mean":-0.25}"#,
            )
            .unwrap()
        else {
            panic!("expected split");
        };
        let names: Vec<&str> = events.iter().map(|e| e.checkpoint.as_str()).collect();
        assert_eq!(names, vec!["post_wo_logits", "logits_mean"]);
        assert_eq!(events[0].scalar("top1_id"), Some(&ScalarValue::Int(96965)));
        assert_eq!(events[0].sample, None);
        assert_eq!(events[1].sample, Some(vec![-0.25]));

        // Without split keys the record stays a single event
        let Decoded::Event(event) = decoder
            .decode_line(r#"{"event":"post_wo_logits","prompt_id":"p0","phase":"decode0","top1_id":7}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(event.checkpoint.as_str(), "post_wo_logits");

        // An explicit checkpoint key still wins
        let Decoded::Event(event) = decoder
            .decode_line(r#"{"event":"post_wo_trace","prompt_id":"p0","phase":"decode0","point":"x_in"}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(event.checkpoint.as_str(), "x_in");
    }

    #[test]
    fn test_split_ignored_when_checkpoint_present() {
        let fields = FieldMap {
            split: vec!["q".to_string()],
            ..Default::default()
        };
        let decoder = LineDecoder::new(fields);
        let decoded = decoder
            .decode_line(r#"{"entity":"e","phase":"a","point":"x","q":[1.0]}"#)
            .unwrap();
        assert!(matches!(decoded, Decoded::Event(_)));
    }

    proptest::proptest! {
        #[test]
        fn prop_decoder_never_panics(line in ".{0,200}") {
            let _ = LineDecoder::default().decode_line(&line);
        }
    }
}
