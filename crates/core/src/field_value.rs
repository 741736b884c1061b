use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Exact decimal with a fixed number of fractional digits.
/// `units` is the value scaled by `10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedPoint {
    units: i64,
    scale: u32,
}

const MAX_SCALE: u32 = 9;

impl FixedPoint {
    pub fn new(units: i64, scale: u32) -> Self {
        Self { units, scale }
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Parse a plain decimal literal (`-12`, `3.14159`, `.5`), rounding half
    /// away from zero to `scale` fractional digits. Exponents are rejected.
    pub fn parse(raw: &str, scale: u32) -> Result<Self, String> {
        if scale > MAX_SCALE {
            return Err(format!("scale {scale} exceeds maximum of {MAX_SCALE}"));
        }
        let s = raw.trim();
        let (negative, digits) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("not a number: {raw:?}"));
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(format!("not a number: {raw:?}"));
        }

        let overflow = || format!("number out of range: {raw:?}");
        let mut units: i128 = 0;
        for b in int_part.bytes() {
            units = units
                .checked_mul(10)
                .and_then(|u| u.checked_add(i128::from(b - b'0')))
                .ok_or_else(overflow)?;
        }
        let frac = frac_part.as_bytes();
        for i in 0..scale as usize {
            let d = frac.get(i).map_or(0, |b| b - b'0');
            units = units
                .checked_mul(10)
                .and_then(|u| u.checked_add(i128::from(d)))
                .ok_or_else(overflow)?;
        }
        if frac.get(scale as usize).is_some_and(|b| *b >= b'5') {
            units += 1;
        }
        if negative {
            units = -units;
        }
        let units = i64::try_from(units).map_err(|_| overflow())?;
        Ok(Self { units, scale })
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.units < 0 { "-" } else { "" };
        let magnitude = self.units.unsigned_abs();
        if self.scale == 0 {
            return write!(f, "{sign}{magnitude}");
        }
        let divisor = 10u64.pow(self.scale);
        write!(
            f,
            "{sign}{}.{:0width$}",
            magnitude / divisor,
            magnitude % divisor,
            width = self.scale as usize
        )
    }
}

/// A field value after coercion through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    /// Blank input of any field type.
    Empty,
    Text(String),
    Choice(String),
    MultiChoice(Vec<String>),
    Numeric(FixedPoint),
    Boolean(bool),
    StructuredList(Vec<Map<String, Value>>),
}

impl TypedValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, TypedValue::Empty)
    }

    pub fn as_numeric(&self) -> Option<FixedPoint> {
        match self {
            TypedValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    /// Normalized text form: what the override log stores and what reads return.
    pub fn to_canonical(&self) -> String {
        match self {
            TypedValue::Empty => String::new(),
            TypedValue::Text(s) | TypedValue::Choice(s) => s.clone(),
            TypedValue::MultiChoice(items) => items.join(", "),
            TypedValue::Numeric(n) => n.to_string(),
            TypedValue::Boolean(b) => b.to_string(),
            TypedValue::StructuredList(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect()).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rounds_half_away_from_zero() {
        assert_eq!(FixedPoint::parse("7.25", 1).unwrap().to_string(), "7.3");
        assert_eq!(FixedPoint::parse("7.24", 1).unwrap().to_string(), "7.2");
        assert_eq!(FixedPoint::parse("-7.25", 1).unwrap().to_string(), "-7.3");
        assert_eq!(FixedPoint::parse("9.96", 1).unwrap().to_string(), "10.0");
    }

    #[test]
    fn parse_pads_missing_fraction() {
        let n = FixedPoint::parse("42", 2).unwrap();
        assert_eq!(n.units(), 4200);
        assert_eq!(n.to_string(), "42.00");
        assert_eq!(FixedPoint::parse(" .5 ", 1).unwrap().to_string(), "0.5");
        assert_eq!(FixedPoint::parse("-0.04", 1).unwrap().to_string(), "0.0");
    }

    #[test]
    fn parse_rejects_garbage() {
        for raw in ["", "-", ".", "abc", "1e3", "1.2.3", "--1", "12a"] {
            assert!(FixedPoint::parse(raw, 1).is_err(), "{raw:?} should not parse");
        }
        assert!(FixedPoint::parse("99999999999999999999", 0).is_err());
        assert!(FixedPoint::parse("1", MAX_SCALE + 1).is_err());
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(TypedValue::Empty.to_canonical(), "");
        assert_eq!(
            TypedValue::MultiChoice(vec!["CVE-2021-1234".into(), "CVE-2022-98765".into()])
                .to_canonical(),
            "CVE-2021-1234, CVE-2022-98765"
        );
        assert_eq!(TypedValue::Boolean(false).to_canonical(), "false");

        let mut record = Map::new();
        record.insert("kb".into(), Value::String("KB123".into()));
        assert_eq!(
            TypedValue::StructuredList(vec![record]).to_canonical(),
            r#"[{"kb":"KB123"}]"#
        );
    }
}
