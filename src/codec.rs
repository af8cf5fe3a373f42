//! # Attribute Value Encoding and Decoding
//!
//! This module converts attribute values between three representations:
//!
//! ```text
//!   external JSON              typed value                 storage
//!  {"B": "aGk="}   ──decode──► AttributeValue ──schema──► 0x6869            (declared column)
//!                                             ──dynamic─► 0x7b2242223a...   (extra_attr_data blob)
//! ```
//!
//! ## Schema vs. Dynamic Columns
//!
//! A declared attribute has a typed column, so its value is stored natively:
//! strings as text, numbers as decimal text, binary as blob, sets as sets.
//!
//! A dynamic attribute shares one `map<text, blob>` column with every other
//! dynamic attribute, so the column type says nothing about the value. Its
//! value is therefore stored in a self-describing form: the compact external
//! JSON (tag and value together) as bytes. Decoding that blob needs no other
//! information.
//!
//! All functions here are pure.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::statement::CqlValue;
use crate::types::{AttributeMap, AttributeType, AttributeValue, TableSchema};

// =============================================================================
// Decoding (external → typed)
// =============================================================================

/// Decodes one attribute from its tag and raw JSON value.
///
/// `attribute` only labels errors.
///
/// # Errors
///
/// [`Error::Decoding`] for an unknown tag, a raw value of the wrong JSON shape,
/// invalid base64, invalid decimal text, or an empty set.
pub fn decode_attribute(attribute: &str, tag: &str, raw: &Value) -> Result<AttributeValue> {
    let ty = AttributeType::from_tag(tag)
        .ok_or_else(|| Error::decoding(attribute, format!("unknown type tag '{}'", tag)))?;
    decode_value(attribute, ty, raw)
}

/// Decodes a raw JSON value under a known type.
pub fn decode_value(attribute: &str, ty: AttributeType, raw: &Value) -> Result<AttributeValue> {
    match ty {
        AttributeType::String => Ok(AttributeValue::String(decode_string(attribute, raw)?)),
        AttributeType::Number => Ok(AttributeValue::Number(decode_number(attribute, raw)?)),
        AttributeType::Binary => Ok(AttributeValue::Binary(decode_binary(attribute, raw)?)),
        AttributeType::StringSet => Ok(AttributeValue::StringSet(decode_set(
            attribute,
            raw,
            decode_string,
        )?)),
        AttributeType::NumberSet => Ok(AttributeValue::NumberSet(decode_set(
            attribute,
            raw,
            decode_number,
        )?)),
        AttributeType::BinarySet => Ok(AttributeValue::BinarySet(decode_set(
            attribute,
            raw,
            decode_binary,
        )?)),
    }
}

/// Decodes a whole record: `{"name": {"TAG": raw}, ...}`.
///
/// Each attribute value must be an object with exactly one entry.
pub fn decode_record(record: &Map<String, Value>) -> Result<AttributeMap> {
    record
        .iter()
        .map(|(name, tagged)| {
            let (tag, raw) = single_entry(name, tagged)?;
            Ok((name.clone(), decode_attribute(name, tag, raw)?))
        })
        .collect()
}

/// Rejects declared attributes whose tag differs from the declared type.
pub fn check_declared_types(item: &AttributeMap, schema: &TableSchema) -> Result<()> {
    for (name, value) in item.iter() {
        if let Some(declared) = schema.attribute_type(name) {
            let actual = value.attribute_type();
            if actual != declared {
                return Err(Error::decoding(
                    name,
                    format!("declared as {} but record carries {}", declared, actual),
                ));
            }
        }
    }
    Ok(())
}

fn single_entry<'a>(attribute: &str, tagged: &'a Value) -> Result<(&'a str, &'a Value)> {
    let object = tagged
        .as_object()
        .ok_or_else(|| Error::decoding(attribute, "expected an object of the form {\"TAG\": value}"))?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((tag, raw)), None) => Ok((tag.as_str(), raw)),
        _ => Err(Error::decoding(
            attribute,
            format!("expected exactly one type tag, found {}", object.len()),
        )),
    }
}

fn decode_string(attribute: &str, raw: &Value) -> Result<String> {
    raw.as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::decoding(attribute, "string value must be a JSON string"))
}

/// Numbers travel as decimal text. Bare JSON numbers are accepted too; the
/// parser keeps their source spelling, so no digits are lost on the way.
fn decode_number(attribute: &str, raw: &Value) -> Result<String> {
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(Error::decoding(attribute, "number value must be decimal text")),
    };
    if !is_decimal(&text) {
        return Err(Error::decoding(attribute, format!("'{}' is not a decimal number", text)));
    }
    Ok(text)
}

fn decode_binary(attribute: &str, raw: &Value) -> Result<Vec<u8>> {
    let text = raw
        .as_str()
        .ok_or_else(|| Error::decoding(attribute, "binary value must be base64 text"))?;
    BASE64
        .decode(text)
        .map_err(|e| Error::decoding(attribute, format!("invalid base64: {}", e)))
}

fn decode_set<T: Ord>(
    attribute: &str,
    raw: &Value,
    element: fn(&str, &Value) -> Result<T>,
) -> Result<BTreeSet<T>> {
    let items = raw
        .as_array()
        .ok_or_else(|| Error::decoding(attribute, "set value must be a JSON array"))?;
    if items.is_empty() {
        return Err(Error::decoding(attribute, "set must not be empty"));
    }
    items.iter().map(|item| element(attribute, item)).collect()
}

/// Checks `[+-]digits[.digits][(e|E)[+-]digits]`, allowing either side of the
/// point to be empty but not both.
pub fn is_decimal(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;

    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }

    if digits == 0 {
        return false;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// Plain spellings longer than this many zeros switch to `<digits>E<exp>`.
const PLAIN_EXPONENT_LIMIT: i64 = 32;

/// One spelling per decimal value: `"1"`, `"+1.0"` and `"0.1e1"` all give
/// `"1"`, and `"-0"` gives `"0"`.
///
/// Text that is not a decimal comes back unchanged.
pub fn canonical_decimal(text: &str) -> String {
    if !is_decimal(text) {
        return text.to_string();
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], &unsigned[at + 1..]),
        None => (unsigned, "0"),
    };
    let exponent: i64 = match exponent.parse() {
        Ok(exponent) => exponent,
        Err(_) => return text.to_string(),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    // value = digits * 10^scale
    let digits: String = whole.chars().chain(fraction.chars()).collect();
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return "0".to_string();
    }
    let significant = digits.trim_end_matches('0');
    let scale = exponent
        .saturating_sub(fraction.len() as i64)
        .saturating_add((digits.len() - significant.len()) as i64);

    let sign = if negative { "-" } else { "" };
    let body = if (0..=PLAIN_EXPONENT_LIMIT).contains(&scale) {
        format!("{}{}", significant, "0".repeat(scale as usize))
    } else if (-PLAIN_EXPONENT_LIMIT..0).contains(&scale) {
        let point = significant.len() as i64 + scale;
        if point > 0 {
            let (int, frac) = significant.split_at(point as usize);
            format!("{}.{}", int, frac)
        } else {
            format!("0.{}{}", "0".repeat((-point) as usize), significant)
        }
    } else {
        format!("{}E{}", significant, scale)
    };
    format!("{}{}", sign, body)
}

// =============================================================================
// External Encoding (typed → external)
// =============================================================================

/// Encodes a value back to its external `{"TAG": raw}` form.
pub fn encode_external(value: &AttributeValue) -> Value {
    let raw = match value {
        AttributeValue::String(s) | AttributeValue::Number(s) => Value::String(s.clone()),
        AttributeValue::Binary(b) => Value::String(BASE64.encode(b)),
        AttributeValue::StringSet(set) | AttributeValue::NumberSet(set) => {
            set.iter().cloned().map(Value::String).collect()
        }
        AttributeValue::BinarySet(set) => set
            .iter()
            .map(|b| Value::String(BASE64.encode(b)))
            .collect(),
    };

    let mut object = Map::with_capacity(1);
    object.insert(value.attribute_type().tag().to_string(), raw);
    Value::Object(object)
}

// =============================================================================
// Schema Columns
// =============================================================================

/// Storage value of a declared attribute.
pub fn schema_value(value: &AttributeValue) -> CqlValue {
    match value {
        AttributeValue::String(s) => CqlValue::Text(s.clone()),
        AttributeValue::Number(n) => CqlValue::Decimal(n.clone()),
        AttributeValue::Binary(b) => CqlValue::Blob(b.clone()),
        AttributeValue::StringSet(set) => CqlValue::Set(set.iter().cloned().map(CqlValue::Text).collect()),
        AttributeValue::NumberSet(set) => {
            CqlValue::Set(set.iter().cloned().map(CqlValue::Decimal).collect())
        }
        AttributeValue::BinarySet(set) => CqlValue::Set(set.iter().cloned().map(CqlValue::Blob).collect()),
    }
}

/// Literal text of a declared attribute; `None` is the null literal.
///
/// Strings are quoted, numbers pass through, binary is `0x`-prefixed hex, and
/// sets are `{a,b}` lists of their element literals.
pub fn encode_schema_column(value: Option<&AttributeValue>) -> String {
    value.map(schema_value).unwrap_or(CqlValue::Null).literal()
}

/// Reads a declared attribute back from its stored column value.
///
/// Returns `Ok(None)` for a null column.
pub fn from_schema_value(
    attribute: &str,
    ty: AttributeType,
    stored: &CqlValue,
) -> Result<Option<AttributeValue>> {
    let mismatch = || {
        Error::decoding(
            attribute,
            format!("stored {} does not match declared {}", stored.type_name(), ty),
        )
    };

    let value = match (ty, stored) {
        (_, CqlValue::Null) => return Ok(None),
        (AttributeType::String, CqlValue::Text(s)) => AttributeValue::String(s.clone()),
        (AttributeType::Number, CqlValue::Decimal(n)) => AttributeValue::Number(n.clone()),
        (AttributeType::Binary, CqlValue::Blob(b)) => AttributeValue::Binary(b.clone()),
        (AttributeType::StringSet, CqlValue::Set(items)) => AttributeValue::StringSet(
            items
                .iter()
                .map(|item| item.as_text().map(str::to_string).ok_or_else(mismatch))
                .collect::<Result<_>>()?,
        ),
        (AttributeType::NumberSet, CqlValue::Set(items)) => AttributeValue::NumberSet(
            items
                .iter()
                .map(|item| match item {
                    CqlValue::Decimal(n) => Ok(n.clone()),
                    _ => Err(mismatch()),
                })
                .collect::<Result<_>>()?,
        ),
        (AttributeType::BinarySet, CqlValue::Set(items)) => AttributeValue::BinarySet(
            items
                .iter()
                .map(|item| match item {
                    CqlValue::Blob(b) => Ok(b.clone()),
                    _ => Err(mismatch()),
                })
                .collect::<Result<_>>()?,
        ),
        _ => return Err(mismatch()),
    };
    Ok(Some(value))
}

// =============================================================================
// Dynamic Columns
// =============================================================================

/// Self-describing bytes of a dynamic attribute: its compact external JSON.
pub fn dynamic_blob(value: &AttributeValue) -> Vec<u8> {
    encode_external(value).to_string().into_bytes()
}

/// Decodes bytes written by [`dynamic_blob`].
pub fn decode_dynamic_blob(attribute: &str, blob: &[u8]) -> Result<AttributeValue> {
    let tagged: Value = serde_json::from_slice(blob)
        .map_err(|e| Error::decoding(attribute, format!("corrupt dynamic value: {}", e)))?;
    let (tag, raw) = single_entry(attribute, &tagged)?;
    decode_attribute(attribute, tag, raw)
}

/// Literal text of a dynamic attribute value; `None` is the null literal.
pub fn encode_dynamic_column(value: Option<&AttributeValue>) -> String {
    value
        .map(|v| CqlValue::Blob(dynamic_blob(v)))
        .unwrap_or(CqlValue::Null)
        .literal()
}

/// Storage type recorded for a dynamic attribute in `extra_attr_types`.
pub fn dynamic_type_tag(value: &AttributeValue) -> CqlValue {
    CqlValue::Text(value.attribute_type().tag().to_string())
}

// =============================================================================
// Tests
// =============================================================================
