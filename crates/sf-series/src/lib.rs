#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sf_index::{Index, IndexKey};
use sf_types::{
    ConvertOptions, DType, MISSING_TEXT, RenderOptions, Scalar, TypeError, convert_owned,
    format_number, infer_dtype, render,
};
use thiserror::Error;

/// Minimum width of rendered index keys.
const MIN_INDEX_WIDTH: usize = 5;

/// Separator between the index and value columns of the report.
const COLUMN_GAP: &str = "   ";

const LINE_END: &str = "\r\n";

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("series input must be a JSON object but found {found}")]
    NotAnObject { found: &'static str },
    #[error("index entry {position} must be an integer or a string but found {found}")]
    InvalidIndexKey { position: usize, found: String },
    #[error("field {field:?} must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// The shapes a series can be built from.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesSource {
    /// Values paired positionally with `index`, or with `0..n` when absent.
    /// `values: None` builds an empty series.
    Values {
        values: Option<Vec<Scalar>>,
        index: Option<Vec<IndexKey>>,
    },
    /// Keyed pairs, in order.
    Object(Vec<(IndexKey, Scalar)>),
}

/// Options for [`Series::astype`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AstypeOptions {
    /// Convert the receiver itself. When `false` a converted copy is returned
    /// and the receiver is left untouched.
    pub inplace: bool,
    /// Date pattern for the `strftime` target.
    pub format: Option<String>,
}

impl Default for AstypeOptions {
    fn default() -> Self {
        Self {
            inplace: true,
            format: None,
        }
    }
}

impl AstypeOptions {
    #[must_use]
    pub fn copy() -> Self {
        Self {
            inplace: false,
            ..Self::default()
        }
    }

    fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            format: self.format.clone(),
        }
    }
}

/// A named, indexed sequence of values with one dtype.
///
/// Keys are unique and fixed after construction; only values, the dtype and
/// the name change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    index: Index,
    values: Vec<Scalar>,
    dtype: DType,
    name: Option<String>,
}

impl Series {
    pub fn new(source: SeriesSource, name: Option<String>) -> Self {
        let (index, values) = populate(source);
        let dtype = infer_dtype(&values);
        Self {
            index,
            values,
            dtype,
            name,
        }
    }

    /// Values keyed `0..n`.
    pub fn from_values(values: Vec<Scalar>) -> Self {
        Self::new(
            SeriesSource::Values {
                values: Some(values),
                index: None,
            },
            None,
        )
    }

    pub fn from_indexed_values(index: Vec<IndexKey>, values: Vec<Scalar>) -> Self {
        Self::new(
            SeriesSource::Values {
                values: Some(values),
                index: Some(index),
            },
            None,
        )
    }

    /// Keys become the index, values become the data.
    pub fn from_pairs(pairs: Vec<(IndexKey, Scalar)>) -> Self {
        Self::new(SeriesSource::Object(pairs), None)
    }

    /// Build a series from a JSON object.
    ///
    /// An `"object"` field supplies the keyed pairs and wins over any other
    /// shape. Otherwise a `"values"` field (with optional `"index"`) selects
    /// positional input, otherwise the object itself is the keyed pairs. `"name"` and `"dtype"` are metadata in
    /// every shape; a `"dtype"` name replaces the inferred dtype.
    pub fn from_json(input: Value) -> Result<Self, SeriesError> {
        let mut fields = match input {
            Value::Object(fields) => fields,
            other => {
                return Err(SeriesError::NotAnObject {
                    found: json_kind(&other),
                });
            }
        };

        let name = match fields.shift_remove("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name),
            Some(_) => {
                return Err(SeriesError::InvalidField {
                    field: "name",
                    expected: "a string",
                });
            }
        };

        let assigned = match fields.shift_remove("dtype") {
            None | Some(Value::Null) => None,
            Some(Value::String(dtype)) => Some(dtype.parse::<DType>()?),
            Some(_) => {
                return Err(SeriesError::InvalidField {
                    field: "dtype",
                    expected: "a dtype name",
                });
            }
        };

        let source = if let Some(object) = fields.shift_remove("object") {
            match object {
                Value::Object(pairs) => SeriesSource::Object(json_pairs(pairs)),
                _ => {
                    return Err(SeriesError::InvalidField {
                        field: "object",
                        expected: "an object",
                    });
                }
            }
        } else if fields.contains_key("values") {
            let values = match fields.shift_remove("values") {
                None | Some(Value::Null) => None,
                Some(Value::Array(items)) => Some(items.into_iter().map(Scalar::from).collect()),
                Some(_) => {
                    return Err(SeriesError::InvalidField {
                        field: "values",
                        expected: "an array",
                    });
                }
            };
            let index = match fields.shift_remove("index") {
                None | Some(Value::Null) => None,
                Some(Value::Array(items)) => Some(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(position, item)| json_index_key(position, item))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                Some(_) => {
                    return Err(SeriesError::InvalidField {
                        field: "index",
                        expected: "an array",
                    });
                }
            };
            SeriesSource::Values { values, index }
        } else {
            SeriesSource::Object(json_pairs(fields))
        };

        let mut series = Self::new(source, name);
        if let Some(dtype) = assigned {
            series.dtype = dtype;
        }
        Ok(series)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn keys(&self) -> &[IndexKey] {
        self.index.keys()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &IndexKey) -> Option<&Scalar> {
        self.index
            .position(key)
            .and_then(|position| self.values.get(position))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &Scalar)> {
        self.index.keys().iter().zip(&self.values)
    }

    /// Overwrite values positionally. Keys and dtype are unchanged; positions
    /// past the end of `values` become missing.
    pub fn set_values(&mut self, values: Vec<Scalar>) {
        if values.len() < self.values.len() {
            tracing::warn!(
                expected = self.values.len(),
                provided = values.len(),
                "fewer values than index keys; filling the rest with missing"
            );
        }

        let mut incoming = values.into_iter();
        for slot in &mut self.values {
            *slot = incoming.next().unwrap_or(Scalar::Missing);
        }
    }

    /// Key/value pairs without metadata. The series is untouched.
    #[must_use]
    pub fn to_plain_mapping(&self) -> Vec<(IndexKey, Scalar)> {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Key/value pairs without metadata, consuming the series.
    #[must_use]
    pub fn into_plain_mapping(self) -> Vec<(IndexKey, Scalar)> {
        self.index.into_keys().into_iter().zip(self.values).collect()
    }

    /// Assign `dtype` and convert every value to it.
    ///
    /// With `options.inplace` (the default) the receiver is converted and
    /// borrowed back; otherwise a converted copy is returned.
    pub fn astype(&mut self, dtype: DType, options: &AstypeOptions) -> Cow<'_, Self> {
        if options.inplace {
            self.astype_in_place(dtype, options);
            Cow::Borrowed(&*self)
        } else {
            Cow::Owned(self.astype_copy(dtype, options))
        }
    }

    pub fn astype_in_place(&mut self, dtype: DType, options: &AstypeOptions) {
        if !dtype.has_conversion() {
            tracing::debug!(%dtype, "dtype has no value conversion; values pass through");
        }

        let convert_options = options.convert_options();
        let values = std::mem::take(&mut self.values);
        self.values = values
            .into_iter()
            .map(|value| convert_owned(value, dtype, &convert_options))
            .collect();
        self.dtype = dtype;
    }

    #[must_use]
    pub fn astype_copy(&self, dtype: DType, options: &AstypeOptions) -> Self {
        let mut copy = self.clone();
        copy.astype_in_place(dtype, options);
        copy
    }

    /// Distinct values in first-seen order, sorted when `ordered`.
    ///
    /// An `array` series is flattened first, so distinctness applies to the
    /// array elements rather than to whole arrays.
    #[must_use]
    pub fn unique(&self, ordered: bool) -> Vec<Scalar> {
        let mut distinct = distinct_values(self.values.iter().cloned());

        if self.dtype == DType::Array {
            let flattened = distinct
                .into_iter()
                .filter(|value| !value.is_missing())
                .flat_map(|value| match value {
                    Scalar::Array(items) => items,
                    other => vec![other],
                });
            distinct = distinct_values(flattened);
        }

        if ordered {
            distinct.sort_by(Scalar::default_cmp);
        }
        distinct
    }

    /// Frequency of every distinct value, keyed by the value.
    ///
    /// Frequencies compare against whole values, so the flattened elements of
    /// an `array` series all count zero.
    #[must_use]
    pub fn count(&self) -> Self {
        let pairs = self
            .unique(false)
            .into_iter()
            .map(|value| {
                let frequency = self
                    .values
                    .iter()
                    .filter(|item| item.semantic_eq(&value))
                    .count();
                (
                    count_key(&value),
                    Scalar::Int(i64::try_from(frequency).unwrap_or(i64::MAX)),
                )
            })
            .collect();
        Self::from_pairs(pairs)
    }

    /// Rendered values, right-aligned to a common width.
    #[must_use]
    pub fn value_to_string(&self) -> Vec<String> {
        self.value_to_string_with(&RenderOptions::default())
    }

    #[must_use]
    pub fn value_to_string_with(&self, options: &RenderOptions) -> Vec<String> {
        let rendered = self
            .values
            .iter()
            .map(|value| render(value, self.dtype, options))
            .collect();
        pad_to_widest(rendered, 0)
    }

    /// Rendered keys as text, right-aligned to a common width of at least 5.
    #[must_use]
    pub fn index_to_string(&self) -> Vec<String> {
        let options = RenderOptions::default();
        let rendered = self
            .index
            .keys()
            .iter()
            .map(|key| render(&key_scalar(key), DType::String, &options))
            .collect();
        pad_to_widest(rendered, MIN_INDEX_WIDTH)
    }

    /// One `index   value` line per pair followed by `dtype` and `name` rows.
    /// Every line ends with `\r\n`.
    #[must_use]
    pub fn to_report_string(&self) -> String {
        let mut labels = self.index_to_string();
        let mut cells = self.value_to_string();
        labels.extend(["dtype".to_owned(), " name".to_owned()]);
        cells.extend([self.dtype.to_string(), self.name.clone().unwrap_or_default()]);

        let mut out = String::new();
        for (label, cell) in labels.iter().zip(&cells) {
            out.push_str(label);
            out.push_str(COLUMN_GAP);
            out.push_str(cell);
            out.push_str(LINE_END);
        }
        out
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_report_string())
    }
}

fn populate(source: SeriesSource) -> (Index, Vec<Scalar>) {
    match source {
        SeriesSource::Values { values: None, .. } => {
            tracing::warn!("missing values: building an empty series");
            (Index::default(), Vec::new())
        }
        SeriesSource::Values {
            values: Some(values),
            index: None,
        } => (Index::range(values.len()), values),
        SeriesSource::Values {
            values: Some(values),
            index: Some(keys),
        } => {
            if keys.len() != values.len() {
                tracing::debug!(
                    index_len = keys.len(),
                    values_len = values.len(),
                    "index and values differ in length; pairing by index"
                );
            }
            let mut values = values.into_iter();
            let pairs = keys
                .into_iter()
                .map(|key| (key, values.next().unwrap_or(Scalar::Missing)))
                .collect::<Vec<_>>();
            collect_unique(pairs)
        }
        SeriesSource::Object(pairs) => collect_unique(pairs),
    }
}

/// Later pairs with a seen key replace the earlier value in place.
fn collect_unique(pairs: Vec<(IndexKey, Scalar)>) -> (Index, Vec<Scalar>) {
    let mut index = Index::default();
    let mut values = Vec::with_capacity(pairs.len());

    for (key, value) in pairs {
        let (position, inserted) = index.push_unique(key);
        if inserted {
            values.push(value);
        } else {
            tracing::debug!(key = %index.keys()[position], "duplicate index key; keeping the later value");
            values[position] = value;
        }
    }

    (index, values)
}

fn distinct_values(values: impl IntoIterator<Item = Scalar>) -> Vec<Scalar> {
    let mut seen = Vec::<Scalar>::new();
    for value in values {
        if !seen.iter().any(|existing| existing.semantic_eq(&value)) {
            seen.push(value);
        }
    }
    seen
}

fn count_key(value: &Scalar) -> IndexKey {
    match value {
        Scalar::Int(v) => IndexKey::Int(*v),
        Scalar::Float(v)
            if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 =>
        {
            IndexKey::Int(*v as i64)
        }
        Scalar::Missing => IndexKey::from(MISSING_TEXT),
        other => IndexKey::Str(other.to_text()),
    }
}

fn key_scalar(key: &IndexKey) -> Scalar {
    match key {
        IndexKey::Int(v) => Scalar::Int(*v),
        IndexKey::Str(v) => Scalar::Str(v.clone()),
    }
}

fn pad_to_widest(rendered: Vec<String>, min_width: usize) -> Vec<String> {
    let width = rendered
        .iter()
        .map(|text| text.chars().count())
        .max()
        .unwrap_or_default()
        .max(min_width);
    rendered
        .into_iter()
        .map(|text| format!("{text:>width$}"))
        .collect()
}

fn json_pairs(fields: Map<String, Value>) -> Vec<(IndexKey, Scalar)> {
    fields
        .into_iter()
        .map(|(key, value)| (IndexKey::Str(key), Scalar::from(value)))
        .collect()
}

fn json_index_key(position: usize, item: Value) -> Result<IndexKey, SeriesError> {
    match item {
        Value::String(key) => Ok(IndexKey::Str(key)),
        Value::Number(number) => Ok(match number.as_i64() {
            Some(key) => IndexKey::Int(key),
            None => IndexKey::Str(number.as_f64().map_or_else(|| number.to_string(), format_number)),
        }),
        other => Err(SeriesError::InvalidIndexKey {
            position,
            found: json_kind(&other).to_owned(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
