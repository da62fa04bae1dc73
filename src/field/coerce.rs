//! Per-kind coercion from weakly-typed JSON input.
//!
//! [`coerce`] returns `Ok(None)` when the input counts as absent (a null
//! duration or time), `Ok(Some(_))` with the canonical value otherwise, and a
//! [`CoerceError`] when the input cannot be read as the kind.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::{FieldKind, FieldValue, Header};
use crate::validation::is_name_string;

/// Why an input value could not be coerced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CoerceError(String);

impl CoerceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

type CoerceResult<T> = std::result::Result<T, CoerceError>;

/// Coerces `raw` to `kind`.
///
/// # Example
///
/// ```
/// use vaultframe::field::coerce::coerce;
/// use vaultframe::field::{FieldKind, FieldValue};
/// use serde_json::json;
///
/// let value = coerce(FieldKind::DurationSecond, &json!("42m")).unwrap();
/// assert_eq!(value, Some(FieldValue::Duration(2520)));
///
/// let value = coerce(FieldKind::CommaIntSlice, &json!("1,2,3")).unwrap();
/// assert_eq!(value, Some(FieldValue::IntSlice(vec![1, 2, 3])));
///
/// assert!(coerce(FieldKind::Bool, &json!("3false3")).is_err());
/// ```
pub fn coerce(kind: FieldKind, raw: &Value) -> CoerceResult<Option<FieldValue>> {
    let value = match kind {
        FieldKind::String => FieldValue::String(weak_string(raw)?),
        FieldKind::LowerCaseString => FieldValue::String(weak_string(raw)?.to_lowercase()),
        FieldKind::NameString => {
            let s = weak_string(raw)?;
            if !is_name_string(&s) {
                return Err(CoerceError::new("field does not match the formatting rules"));
            }
            FieldValue::String(s)
        }
        FieldKind::Int | FieldKind::Int64 => FieldValue::Int(weak_int(raw)?),
        FieldKind::Float => FieldValue::Float(weak_float(raw)?),
        FieldKind::Bool => FieldValue::Bool(weak_bool(raw)?),
        FieldKind::Map => FieldValue::Map(to_map(raw)?),
        FieldKind::KvPairs => FieldValue::KvPairs(to_kv_pairs(raw)?),
        FieldKind::DurationSecond | FieldKind::SignedDurationSecond => {
            let Some(secs) = parse_duration_secs(raw)? else {
                return Ok(None);
            };
            if kind == FieldKind::DurationSecond && secs < 0 {
                return Err(CoerceError::new("cannot provide negative value"));
            }
            FieldValue::Duration(secs)
        }
        FieldKind::Slice => FieldValue::Slice(to_slice(raw)),
        FieldKind::StringSlice => FieldValue::StringSlice(to_string_slice(raw, false)?),
        FieldKind::CommaStringSlice => FieldValue::StringSlice(to_string_slice(raw, true)?),
        FieldKind::CommaIntSlice => FieldValue::IntSlice(to_int_slice(raw)?),
        FieldKind::Header => FieldValue::Header(to_header(raw)?),
        FieldKind::Time => match parse_time(raw)? {
            Some(t) => FieldValue::Time(t),
            None => return Ok(None),
        },
        FieldKind::Invalid => return Err(CoerceError::new("unknown field type")),
    };
    Ok(Some(value))
}

/// Renders a raw value for error messages, without quoting strings.
pub(crate) fn display_value(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_name(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn weak_string(raw: &Value) -> CoerceResult<String> {
    match raw {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(true) => Ok("1".to_string()),
        Value::Bool(false) => Ok("0".to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(CoerceError::new(format!(
            "expected a scalar, got {}",
            kind_name(other)
        ))),
    }
}

fn number_to_i64(n: &Number) -> CoerceResult<i64> {
    if let Some(i) = n.as_i64() {
        return Ok(i);
    }
    if n.is_u64() {
        return Err(CoerceError::new(format!("{n} overflows a 64-bit integer")));
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Ok(f as i64)
        }
        _ => Err(CoerceError::new(format!("cannot parse {n} as an integer"))),
    }
}

/// Parses a signed integer with optional `0x`, `0o` or `0b` radix prefix.
fn parse_int_literal(s: &str) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(hex) = lower.strip_prefix("0x") {
        (16, hex.to_string())
    } else if let Some(oct) = lower.strip_prefix("0o") {
        (8, oct.to_string())
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (2, bin.to_string())
    } else {
        (10, lower.clone())
    };
    if body.is_empty() || body.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(&body, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

fn weak_int(raw: &Value) -> CoerceResult<i64> {
    match raw {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => number_to_i64(n),
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => parse_int_literal(s)
            .ok_or_else(|| CoerceError::new(format!("cannot parse {s:?} as an integer"))),
        other => Err(CoerceError::new(format!(
            "expected an integer, got {}",
            kind_name(other)
        ))),
    }
}

fn weak_float(raw: &Value) -> CoerceResult<f64> {
    match raw {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoerceError::new(format!("cannot parse {n} as a float"))),
        Value::String(s) if s.is_empty() => Ok(0.0),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| CoerceError::new(format!("cannot parse {s:?} as a float"))),
        other => Err(CoerceError::new(format!(
            "expected a float, got {}",
            kind_name(other)
        ))),
    }
}

fn parse_bool_literal(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn weak_bool(raw: &Value) -> CoerceResult<bool> {
    match raw {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) if s.is_empty() => Ok(false),
        Value::String(s) => parse_bool_literal(s)
            .ok_or_else(|| CoerceError::new(format!("cannot parse {s:?} as a bool"))),
        other => Err(CoerceError::new(format!(
            "expected a bool, got {}",
            kind_name(other)
        ))),
    }
}

fn to_map(raw: &Value) -> CoerceResult<Map<String, Value>> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(m) => Ok(m.clone()),
        Value::Array(a) if a.is_empty() => Ok(Map::new()),
        other => Err(CoerceError::new(format!(
            "expected a map, got {}",
            kind_name(other)
        ))),
    }
}

fn to_kv_pairs(raw: &Value) -> CoerceResult<BTreeMap<String, String>> {
    let entries: Vec<String> = match raw {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(m) => {
            return m
                .iter()
                .map(|(k, v)| Ok::<_, CoerceError>((k.clone(), weak_string(v)?)))
                .collect();
        }
        Value::Array(items) => items.iter().map(weak_string).collect::<CoerceResult<_>>()?,
        scalar => vec![weak_string(scalar)?],
    };

    let mut pairs = BTreeMap::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                pairs.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(CoerceError::new(format!("invalid key pair {entry:?}")));
            }
        }
    }
    Ok(pairs)
}

/// Whole seconds from an integer, float, numeric string or duration literal.
fn parse_duration_secs(raw: &Value) -> CoerceResult<Option<i64>> {
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            None => n
                .as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| Some(f.trunc() as i64))
                .ok_or_else(|| CoerceError::new(format!("cannot parse {n} as a duration"))),
        },
        Value::String(s) => parse_duration_str(s).map(Some),
        other => Err(CoerceError::new(format!(
            "could not parse duration from {}",
            kind_name(other)
        ))),
    }
}

fn parse_duration_str(input: &str) -> CoerceResult<i64> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }

    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let duration: Duration = humantime::parse_duration(body)
        .map_err(|e| CoerceError::new(format!("cannot parse {input:?} as a duration: {e}")))?;
    let secs = i64::try_from(duration.as_secs())
        .map_err(|_| CoerceError::new(format!("duration {input:?} is too large")))?;
    Ok(if negative { -secs } else { secs })
}

fn to_slice(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        Value::Object(m) if m.is_empty() => Vec::new(),
        other => vec![other.clone()],
    }
}

fn to_string_slice(raw: &Value, split_commas: bool) -> CoerceResult<Vec<String>> {
    let items = match raw {
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) if split_commas => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items.iter().map(weak_string).collect::<CoerceResult<_>>()?,
        scalar => vec![weak_string(scalar)?],
    };
    Ok(items.into_iter().map(|s| s.trim().to_string()).collect())
}

fn to_int_slice(raw: &Value) -> CoerceResult<Vec<i64>> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => s
            .split(',')
            .map(|part| weak_int(&Value::String(part.trim().to_string())))
            .collect(),
        Value::Array(items) => items.iter().map(weak_int).collect(),
        scalar => Ok(vec![weak_int(scalar)?]),
    }
}

/// Canonical MIME header form: `content-type` becomes `Content-Type`.
///
/// Keys containing characters outside the HTTP token set are returned
/// unchanged.
pub fn canonical_header_key(key: &str) -> String {
    let valid = key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid || key.is_empty() {
        return key.to_string();
    }

    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for c in key.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn header_from_map(map: &Map<String, Value>) -> CoerceResult<Header> {
    let mut header = Header::new();
    for (key, value) in map {
        let values = header.entry(canonical_header_key(key)).or_default();
        match value {
            Value::String(s) => values.push(s.clone()),
            Value::Number(n) => values.push(n.to_string()),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => values.push(s.clone()),
                        other => {
                            return Err(CoerceError::new(format!(
                                "expected string values for header {key:?}, got {}",
                                kind_name(other)
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(CoerceError::new(format!(
                    "unrecognized type {} for header {key:?}",
                    kind_name(other)
                )))
            }
        }
    }
    Ok(header)
}

fn to_header(raw: &Value) -> CoerceResult<Header> {
    match raw {
        Value::Null => Ok(Header::new()),
        Value::Object(map) => header_from_map(map),
        Value::String(s) => {
            let decoded = STANDARD
                .decode(s.as_bytes())
                .unwrap_or_else(|_| s.as_bytes().to_vec());
            let parsed: Map<String, Value> = serde_json::from_slice(&decoded)
                .map_err(|e| CoerceError::new(format!("header is not a JSON object: {e}")))?;
            header_from_map(&parsed)
        }
        Value::Array(items) => {
            let mut header = Header::new();
            for item in items {
                let Value::String(entry) = item else {
                    return Err(CoerceError::new(format!(
                        "expected \"key:value\" strings, got {}",
                        kind_name(item)
                    )));
                };
                match entry.split_once(':') {
                    Some((key, value)) if !key.is_empty() => header
                        .entry(canonical_header_key(key))
                        .or_default()
                        .push(value.to_string()),
                    _ => return Err(CoerceError::new(format!("invalid key pair {entry:?}"))),
                }
            }
            Ok(header)
        }
        other => Err(CoerceError::new(format!(
            "header not provided in an expected format, got {}",
            kind_name(other)
        ))),
    }
}

fn parse_time(raw: &Value) -> CoerceResult<Option<DateTime<Utc>>> {
    let from_epoch = |secs: i64| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| CoerceError::new(format!("epoch {secs} out of range")))
    };

    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let secs = number_to_i64(n)?;
            from_epoch(secs).map(Some)
        }
        Value::String(s) => {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(t.with_timezone(&Utc)));
            }
            match s.parse::<i64>() {
                Ok(secs) => from_epoch(secs).map(Some),
                Err(_) => Err(CoerceError::new("could not parse string as date and time")),
            }
        }
        other => Err(CoerceError::new(format!(
            "could not parse time from {}",
            kind_name(other)
        ))),
    }
}
