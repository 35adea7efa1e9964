#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text rendered for a missing value, and used as its key by frequency counts.
pub const MISSING_TEXT: &str = "<NA>";

/// Pattern used by the `strftime` conversion when no format is supplied.
pub const DEFAULT_DATE_FORMAT: &str = "YYYY-MM-DD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DType {
    Int,
    Float,
    Boolean,
    String,
    Array,
    Object,
    Unknown,
    /// Text that parses as an integral number. Only produced by [`classify`].
    IntString,
    /// Text that parses as a fractional number. Only produced by [`classify`].
    FloatString,
    /// The literal text `"true"` or `"false"`. Only produced by [`classify`].
    BooleanString,
    /// Calendar date-time conversion target.
    Moment,
    /// ISO week number conversion target.
    Week,
    /// Formatted date conversion target.
    Strftime,
    /// Display-only category: values are rendered multiplied by 100 with a `%`.
    Percent,
}

impl DType {
    pub const ALL: [Self; 14] = [
        Self::Int,
        Self::Float,
        Self::Boolean,
        Self::String,
        Self::Array,
        Self::Object,
        Self::Unknown,
        Self::IntString,
        Self::FloatString,
        Self::BooleanString,
        Self::Moment,
        Self::Week,
        Self::Strftime,
        Self::Percent,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Unknown => "unknown",
            Self::IntString => "intString",
            Self::FloatString => "floatString",
            Self::BooleanString => "booleanString",
            Self::Moment => "moment",
            Self::Week => "week",
            Self::Strftime => "strftime",
            Self::Percent => "percent",
        }
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Percent)
    }

    /// Whether [`convert`] rewrites values for this target. Every other target
    /// passes values through unchanged.
    #[must_use]
    pub fn has_conversion(self) -> bool {
        matches!(
            self,
            Self::Moment
                | Self::Week
                | Self::Strftime
                | Self::Int
                | Self::Float
                | Self::String
                | Self::Boolean
                | Self::Array
        )
    }

    /// Digit budget used by [`render`] when the caller does not supply one.
    #[must_use]
    pub fn default_resolution(self) -> Option<usize> {
        match self {
            Self::Float => Some(4),
            Self::Int => Some(6),
            Self::Percent => Some(2),
            Self::String => Some(50),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = TypeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.as_str() == name)
            .ok_or_else(|| TypeError::UnknownDType {
                name: name.to_owned(),
            })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown dtype name {name:?}")]
    UnknownDType { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Missing,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(Vec<Scalar>),
    Object(BTreeMap<String, Scalar>),
    DateTime(NaiveDateTime),
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Scalar>> for Scalar {
    fn from(value: Vec<Scalar>) -> Self {
        Self::Array(value)
    }
}

impl From<serde_json::Value> for Scalar {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Missing,
            Value::Bool(v) => Self::Bool(v),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Missing),
            Value::String(v) => Self::Str(v),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Scalar {
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Equality used for uniqueness and counting: NaN equals NaN and integers
    /// compare equal to floats of the same value.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.semantic_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Numeric coercion. Values with no numeric reading become NaN.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Missing | Self::Object(_) => f64::NAN,
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
            Self::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Str(text) => parse_numeric_text(text).unwrap_or(f64::NAN),
            Self::Array(_) => parse_numeric_text(&self.to_text()).unwrap_or(f64::NAN),
            Self::DateTime(dt) => dt.and_utc().timestamp_millis() as f64,
        }
    }

    /// Textual coercion. Missing values inside arrays contribute empty text.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format_number(*v),
            Self::Bool(v) => v.to_string(),
            Self::Str(v) => v.clone(),
            Self::Array(items) => items
                .iter()
                .map(Self::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) => "[object Object]".to_owned(),
            Self::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Str(_) => 2,
            Self::DateTime(_) => 3,
            Self::Array(_) => 4,
            Self::Object(_) => 5,
            Self::Missing => 6,
        }
    }

    /// Default sort order: numbers numerically, text lexicographically,
    /// `false < true`, mixed kinds by a fixed kind rank, missing last.
    #[must_use]
    pub fn default_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.to_number().total_cmp(&other.to_number())
            }
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.default_cmp(y))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Self::Object(a), Self::Object(b)) => a
                .iter()
                .zip(b)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.default_cmp(vb)))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

// ── Numeric text ───────────────────────────────────────────────────────

/// Lenient numeric parse of text.
///
/// Surrounding whitespace is ignored and blank text reads as zero.
/// `Infinity` (optionally signed), `0x`/`0o`/`0b` integers, and decimal or
/// exponent notation are accepted. Spellings such as `inf` or `nan` are not.
#[must_use]
pub fn parse_numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }

    match trimmed {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    for (prefix, radix) in [
        ("0x", 16),
        ("0X", 16),
        ("0o", 8),
        ("0O", 8),
        ("0b", 2),
        ("0B", 2),
    ] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return radix_integer(digits, radix);
        }
    }

    let plain_decimal = trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !plain_decimal {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Digits accumulate in `f64`, so integers wider than 64 bits lose
/// precision instead of failing.
fn radix_integer(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0.0_f64, |acc, ch| {
        ch.to_digit(radix)
            .map(|digit| acc * f64::from(radix) + f64::from(digit))
    })
}

/// Shortest round-trip text of a number, switching to exponent form outside
/// `[1e-6, 1e21)`.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if value == 0.0 {
        return "0".to_owned();
    }

    let magnitude = value.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        return with_exponent_sign(&format!("{value:e}"));
    }
    format!("{value}")
}

fn to_fixed(value: f64, digits: usize) -> String {
    if !value.is_finite() || value.abs() >= 1e21 {
        return format_number(value);
    }
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{value:.digits$}")
}

fn to_exponential(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return format_number(value);
    }
    with_exponent_sign(&format!("{value:.digits$e}"))
}

fn with_exponent_sign(formatted: &str) -> String {
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => formatted.to_owned(),
    }
}

// ── Classification and inference ───────────────────────────────────────

const PRIORITY: [DType; 6] = [
    DType::Object,
    DType::Array,
    DType::String,
    DType::Float,
    DType::Int,
    DType::Boolean,
];

/// Classify a single value.
///
/// Numeric-looking text keeps its string-encoded category here; it never
/// collapses into `Int`/`Float`. NaN is `Unknown`, infinities are `Float`.
#[must_use]
pub fn classify(value: &Scalar) -> DType {
    match value {
        Scalar::Array(_) => DType::Array,
        Scalar::Object(_) | Scalar::DateTime(_) => DType::Object,
        Scalar::Int(_) => DType::Int,
        Scalar::Float(v) if v.is_nan() => DType::Unknown,
        Scalar::Float(v) => {
            if v % 1.0 == 0.0 {
                DType::Int
            } else {
                DType::Float
            }
        }
        Scalar::Bool(_) => DType::Boolean,
        Scalar::Str(text) => match parse_numeric_text(text) {
            Some(n) if n % 1.0 == 0.0 => DType::IntString,
            Some(_) => DType::FloatString,
            None if text == "true" || text == "false" => DType::BooleanString,
            None => DType::String,
        },
        Scalar::Missing => DType::Unknown,
    }
}

/// Resolve two categories to the dominant one:
/// `object > array > string > float > int > boolean`.
///
/// Categories outside that list never win; if neither input is on it the
/// result is `Unknown`.
#[must_use]
pub fn merge_priority(left: DType, right: DType) -> DType {
    PRIORITY
        .into_iter()
        .find(|candidate| *candidate == left || *candidate == right)
        .unwrap_or(DType::Unknown)
}

/// Fold the classification of every non-missing value into one dtype.
pub fn infer_dtype<'a, I>(values: I) -> DType
where
    I: IntoIterator<Item = &'a Scalar>,
{
    let mut current = DType::Unknown;
    for value in values {
        if value.is_missing() {
            continue;
        }
        let observed = classify(value);
        if observed != current {
            current = merge_priority(current, observed);
        }
    }
    current
}

// ── Options ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Date pattern for the `strftime` target (`YYYY`, `MM`, `DD`, ...).
    pub format: Option<String>,
}

impl ConvertOptions {
    #[must_use]
    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            format: Some(format.into()),
        }
    }

    #[must_use]
    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Digit budget; falls back to [`DType::default_resolution`].
    pub resolution: Option<usize>,
    /// Truncate text longer than this many characters. `None` never truncates.
    pub max_length: Option<usize>,
}

impl RenderOptions {
    fn resolution_for(&self, dtype: DType) -> usize {
        self.resolution
            .or_else(|| dtype.default_resolution())
            .unwrap_or_default()
    }
}

// ── Conversion ─────────────────────────────────────────────────────────

/// Convert a value to the target dtype, taking ownership so values that are
/// already in shape move through without a clone.
///
/// Never fails: missing values and targets without a conversion pass through,
/// and dates that cannot be read become missing.
#[must_use]
pub fn convert_owned(value: Scalar, target: DType, options: &ConvertOptions) -> Scalar {
    if value.is_missing() {
        return value;
    }

    match target {
        DType::Moment => match parse_datetime(&value) {
            Some(dt) => Scalar::DateTime(dt),
            None => unreadable_date(&value, target),
        },
        DType::Week => match parse_datetime(&value) {
            Some(dt) => Scalar::Int(i64::from(dt.iso_week().week())),
            None => unreadable_date(&value, target),
        },
        DType::Strftime => match parse_datetime(&value) {
            Some(dt) => Scalar::Str(format_datetime(&dt, options.format())),
            None => unreadable_date(&value, target),
        },
        DType::Int => match value {
            Scalar::Int(_) => value,
            other => integral_number(other.to_number()),
        },
        DType::Float => match value {
            Scalar::Float(_) => value,
            other => Scalar::Float(other.to_number()),
        },
        DType::String => match value {
            Scalar::Str(_) => value,
            other => Scalar::Str(other.to_text()),
        },
        DType::Boolean => match value {
            Scalar::Bool(_) => value,
            Scalar::Str(ref text) if text == "true" => Scalar::Bool(true),
            Scalar::Str(ref text) if text == "false" => Scalar::Bool(false),
            other => integral_number(other.to_number()),
        },
        DType::Array => match value {
            Scalar::Str(text) => split_array_text(&text),
            other => other,
        },
        _ => value,
    }
}

/// Cast a scalar reference to a target dtype (clones the input).
#[must_use]
pub fn convert(value: &Scalar, target: DType, options: &ConvertOptions) -> Scalar {
    convert_owned(value.clone(), target, options)
}

fn integral_number(value: f64) -> Scalar {
    if value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value < i64::MAX as f64
    {
        Scalar::Int(value as i64)
    } else {
        Scalar::Float(value)
    }
}

fn split_array_text(text: &str) -> Scalar {
    let stripped: String = text
        .chars()
        .filter(|ch| !matches!(ch, '[' | ']' | '\''))
        .collect();
    let collapsed = stripped.replace(", ", ",");
    Scalar::Array(collapsed.split(',').map(Scalar::from).collect())
}

fn unreadable_date(value: &Scalar, target: DType) -> Scalar {
    tracing::debug!(value = %value.to_text(), target_dtype = %target, "value is not a readable date");
    Scalar::Missing
}

// ── Dates ──────────────────────────────────────────────────────────────

const DATETIME_PATTERNS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_PATTERNS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Read a date-time from a value: date-times as-is, numbers as epoch
/// milliseconds, text in RFC 3339 or one of the common layouts.
#[must_use]
pub fn parse_datetime(value: &Scalar) -> Option<NaiveDateTime> {
    match value {
        Scalar::DateTime(dt) => Some(*dt),
        Scalar::Int(millis) => DateTime::<Utc>::from_timestamp_millis(*millis).map(|dt| dt.naive_utc()),
        Scalar::Float(millis) if millis.is_finite() => {
            DateTime::<Utc>::from_timestamp_millis(millis.trunc() as i64).map(|dt| dt.naive_utc())
        }
        Scalar::Str(text) => parse_datetime_text(text.trim()),
        _ => None,
    }
}

fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }

    DATETIME_PATTERNS
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(text, pattern).ok())
        .or_else(|| {
            DATE_PATTERNS
                .iter()
                .find_map(|pattern| NaiveDate::parse_from_str(text, pattern).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

// Longest tokens first so `YYYY` wins over `YY` and `MMMM` over `MM`.
const DATE_TOKENS: [(&str, &str); 20] = [
    ("YYYY", "%Y"),
    ("MMMM", "%B"),
    ("dddd", "%A"),
    ("SSS", "%3f"),
    ("MMM", "%b"),
    ("ddd", "%a"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("WW", "%V"),
    ("M", "%-m"),
    ("D", "%-d"),
    ("H", "%-H"),
    ("h", "%-I"),
    ("A", "%p"),
    ("W", "%-V"),
];

/// Render a date-time with a token pattern such as `YYYY-MM-DD` or
/// `DD MMM YYYY [at] HH:mm`. Text inside brackets is copied literally.
#[must_use]
pub fn format_datetime(dt: &NaiveDateTime, pattern: &str) -> String {
    dt.format(&pattern_to_strftime(pattern)).to_string()
}

fn pattern_to_strftime(pattern: &str) -> String {
    let mut spec = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;

    while let Some(ch) = rest.chars().next() {
        if ch == '[' {
            let end = rest.find(']').unwrap_or(rest.len());
            push_literal(&mut spec, &rest[1..end]);
            rest = rest.get(end + 1..).unwrap_or_default();
            continue;
        }

        if let Some((token, item)) = DATE_TOKENS
            .iter()
            .find(|(token, _)| rest.starts_with(token))
        {
            spec.push_str(item);
            rest = &rest[token.len()..];
            continue;
        }

        push_literal(&mut spec, &rest[..ch.len_utf8()]);
        rest = &rest[ch.len_utf8()..];
    }

    spec
}

fn push_literal(spec: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '%' {
            spec.push_str("%%");
        } else {
            spec.push(ch);
        }
    }
}

// ── Rendering ──────────────────────────────────────────────────────────

/// Render a value as display text for the given dtype.
///
/// `float` renders fixed-point when `value / 10^(resolution-1) > 0` and in
/// exponent form otherwise, so zero and negative floats come out in exponent
/// form. `int` switches to exponent form at `10^(resolution-1)`.
#[must_use]
pub fn render(value: &Scalar, dtype: DType, options: &RenderOptions) -> String {
    if value.is_missing() {
        return MISSING_TEXT.to_owned();
    }

    match dtype {
        DType::Float => {
            let resolution = options.resolution_for(dtype);
            let number = value.to_number();
            if number / resolution_scale(resolution) > 0.0 {
                to_fixed(number, resolution)
            } else {
                to_exponential(number, resolution)
            }
        }
        DType::Int => {
            let resolution = options.resolution_for(dtype);
            let number = value.to_number();
            if number < resolution_scale(resolution) {
                value.to_text()
            } else {
                to_exponential(number, resolution)
            }
        }
        DType::Percent => {
            let resolution = options.resolution_for(dtype);
            format!("{}%", to_fixed(100.0 * value.to_number(), resolution))
        }
        _ => truncate(value.to_text(), options.max_length),
    }
}

fn resolution_scale(resolution: usize) -> f64 {
    10_f64.powf(resolution as f64 - 1.0)
}

fn truncate(text: String, max_length: Option<usize>) -> String {
    match max_length {
        Some(max) if text.chars().count() > max => {
            let mut kept: String = text.chars().take(max).collect();
            kept.push_str("...");
            kept
        }
        _ => text,
    }
}
