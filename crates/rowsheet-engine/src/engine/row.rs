use rhai::{Dynamic, Map};
use serde::{Deserialize, Serialize};

use super::value::FormulaValue;

/// A body row keyed by column name, in header order.
///
/// Duplicate column names keep the first occurrence, which matches how
/// `prop()` resolves them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFields {
    fields: Vec<(String, String)>,
}

impl RowFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build fields from a raw grid row, padding missing trailing cells.
    pub fn from_row(columns: &[String], row: &[String]) -> Self {
        let mut fields = RowFields::new();
        for (idx, column) in columns.iter().enumerate() {
            if fields.contains(column) {
                continue;
            }
            let value = row.get(idx).cloned().unwrap_or_default();
            fields.fields.push((column.clone(), value));
        }
        fields
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive lookup, returning the stored column name as well.
    pub fn get_ignore_case(&self, name: &str) -> Option<(&str, &str)> {
        let wanted = name.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set a field, appending it when the column is not present yet.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Lay the fields back out as a grid row in `columns` order.
    ///
    /// Positions whose column is a duplicate header name keep the value from
    /// `original` so that write-back never clobbers cells it cannot address.
    pub fn to_row(&self, columns: &[String], original: &[String]) -> Vec<String> {
        let mut seen: Vec<&str> = Vec::new();
        columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let first = !seen.contains(&column.as_str());
                seen.push(column.as_str());
                match (first, self.get(column)) {
                    (true, Some(value)) => value.to_string(),
                    _ => original.get(idx).cloned().unwrap_or_default(),
                }
            })
            .collect()
    }

    pub fn to_rhai_map(&self) -> Map {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
            .collect()
    }

    /// Read fields back from a Rhai map, stringifying whatever a script stored.
    /// Columns missing from the map keep their value from `fallback`.
    pub fn from_rhai_map(columns: &[String], map: &Map, fallback: &RowFields) -> Self {
        let mut fields = RowFields::new();
        for column in columns {
            if fields.contains(column) {
                continue;
            }
            let value = match map.get(column.as_str()) {
                Some(value) => FormulaValue::from_dynamic(value.clone()).to_string(),
                None => fallback.get(column).unwrap_or_default().to_string(),
            };
            fields.fields.push((column.clone(), value));
        }
        fields
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = RowFields::new();
        for (k, v) in iter {
            let k = k.into();
            if !fields.contains(&k) {
                fields.fields.push((k, v.into()));
            }
        }
        fields
    }
}
