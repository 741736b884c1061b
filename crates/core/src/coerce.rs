//! Field coercion: raw editor/base text → [`TypedValue`], per descriptor.
//!
//! Blank input is always accepted and yields [`TypedValue::Empty`]; an empty
//! override is a "no opinion" entry, not a validation failure.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::field_value::{FixedPoint, TypedValue};
use crate::registry::{CoercionRule, FieldDescriptor, FieldType};

static CVE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CVE-\d{4}-\d{4,}$").expect("static pattern"));

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^https?://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|",
        r"localhost|",
        r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .expect("static pattern")
});

pub fn coerce(descriptor: &FieldDescriptor, raw: &str) -> Result<TypedValue, CoreError> {
    let field = descriptor.name.as_str();
    let value = raw.trim();
    if value.is_empty() {
        return Ok(TypedValue::Empty);
    }

    let typed = match &descriptor.field_type {
        FieldType::Text => TypedValue::Text(value.to_string()),
        FieldType::Choice => {
            check_option(field, &descriptor.options, value)?;
            TypedValue::Choice(value.to_string())
        }
        FieldType::MultiChoice => {
            let items = split_items(value);
            for item in &items {
                check_option(field, &descriptor.options, item)?;
            }
            TypedValue::MultiChoice(items)
        }
        FieldType::Numeric { scale } => {
            let n = FixedPoint::parse(value, *scale).map_err(|e| CoreError::coercion(field, e))?;
            TypedValue::Numeric(n)
        }
        FieldType::Boolean => TypedValue::Boolean(parse_bool(field, value)?),
        FieldType::StructuredList => TypedValue::StructuredList(parse_records(field, value)?),
    };

    if let Some(rule) = &descriptor.rule {
        apply_rule(field, rule, &typed)?;
    }
    Ok(typed)
}

fn check_option(field: &str, options: &[String], value: &str) -> Result<(), CoreError> {
    if options.is_empty() || options.iter().any(|o| o == value) {
        return Ok(());
    }
    Err(CoreError::coercion(
        field,
        format!("must be one of: {}", options.join(", ")),
    ))
}

/// Multi-choice payloads arrive either as a JSON array (of strings, or of
/// objects keyed `cve`/`CVE`) or as a comma-separated list.
fn split_items(value: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(value) {
        return items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => obj
                    .get("cve")
                    .or_else(|| obj.get("CVE"))
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(field: &str, value: &str) -> Result<bool, CoreError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(CoreError::coercion(field, format!("not a boolean: {value:?}"))),
    }
}

fn parse_records(field: &str, value: &str) -> Result<Vec<Map<String, Value>>, CoreError> {
    let parsed: Value = serde_json::from_str(value)
        .map_err(|e| CoreError::coercion(field, format!("expected a JSON array: {e}")))?;
    let Value::Array(items) = parsed else {
        return Err(CoreError::coercion(field, "expected a JSON array"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            _ => Err(CoreError::coercion(field, "each item must be an object")),
        })
        .collect()
}

fn apply_rule(field: &str, rule: &CoercionRule, typed: &TypedValue) -> Result<(), CoreError> {
    match (rule, typed) {
        (CoercionRule::Url, TypedValue::Text(url)) => {
            if !URL.is_match(url) {
                return Err(CoreError::coercion(field, "invalid URL format"));
            }
        }
        (CoercionRule::CveIds, TypedValue::MultiChoice(items)) => {
            if let Some(bad) = items.iter().find(|cve| !CVE_ID.is_match(cve)) {
                return Err(CoreError::coercion(
                    field,
                    format!("invalid CVE format: {bad}. Expected format: CVE-YYYY-NNNN"),
                ));
            }
        }
        (
            CoercionRule::Records {
                required_any,
                enumerated,
            },
            TypedValue::StructuredList(records),
        ) => {
            for record in records {
                let has_required = required_any.is_empty()
                    || required_any.iter().any(|key| is_present(record.get(key)));
                if !has_required {
                    return Err(CoreError::coercion(
                        field,
                        format!("each item must have at least one of: {}", required_any.join(", ")),
                    ));
                }
                for (key, allowed) in enumerated {
                    let actual = record.get(key).and_then(Value::as_str).unwrap_or_default();
                    if !allowed.iter().any(|a| a == actual) {
                        return Err(CoreError::coercion(
                            field,
                            format!("{key} must be one of: {}", allowed.join(", ")),
                        ));
                    }
                }
            }
        }
        (rule, other) => {
            return Err(CoreError::coercion(
                field,
                format!("rule {rule:?} does not apply to {other:?}"),
            ));
        }
    }
    Ok(())
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}
