//! ScanImage `SI.*` header parsing.
//!
//! ScanImage writes its state into the first page of every TIFF as one
//! `SI.path.to.property = <MATLAB literal>` assignment per line.

use std::collections::BTreeMap;

/// A MATLAB literal from the header.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// Numeric matrix, row by row (`[1 2; 3 4]`); a vector is a single row
    Array(Vec<Vec<f64>>),
}

impl HeaderValue {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return HeaderValue::Bool(true),
            "false" => return HeaderValue::Bool(false),
            _ => {}
        }

        if let Some(text) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            return HeaderValue::Text(text.replace("''", "'"));
        }

        if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return parse_matrix(inner)
                .map(HeaderValue::Array)
                .unwrap_or_else(|| HeaderValue::Text(raw.to_string()));
        }

        raw.parse::<f64>()
            .map(HeaderValue::Number)
            .unwrap_or_else(|_| HeaderValue::Text(raw.to_string()))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Number(n) => Some(*n),
            HeaderValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            HeaderValue::Array(rows) => match rows.as_slice() {
                [row] if row.len() == 1 => Some(row[0]),
                _ => None,
            },
            HeaderValue::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Bool(b) => Some(*b),
            other => other.as_f64().map(|n| n != 0.0),
        }
    }

    /// All numbers in row-major order; a scalar becomes a one-element vector.
    pub fn as_vec(&self) -> Option<Vec<f64>> {
        match self {
            HeaderValue::Array(rows) => Some(rows.iter().flatten().copied().collect()),
            HeaderValue::Number(n) => Some(vec![*n]),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn parse_matrix(inner: &str) -> Option<Vec<Vec<f64>>> {
    let mut rows = Vec::new();
    for row in inner.split(';') {
        let values = row
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;
        if !values.is_empty() {
            rows.push(values);
        }
    }
    Some(rows)
}

/// Parsed `SI.*` assignments of one TIFF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiHeader {
    values: BTreeMap<String, HeaderValue>,
}

impl SiHeader {
    /// Collect every `SI.` assignment in `text`; other lines are ignored.
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                let key = key.trim();
                key.starts_with("SI.")
                    .then(|| (key.to_string(), HeaderValue::parse(value)))
            })
            .collect();
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.values.get(key)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(HeaderValue::as_bool)
    }

    pub fn vec(&self, key: &str) -> Option<Vec<f64>> {
        self.get(key).and_then(HeaderValue::as_vec)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }
}
