use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Named numeric columns, keyed by column name.
///
/// Tables read from a file are row aligned: every column has the same length and
/// index `i` of each column refers to the same input row. Stage outputs in
/// aggregate mode are single-row tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table {
    columns: BTreeMap<String, Vec<f64>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a single-column table.
    pub fn single(name: impl Into<String>, values: Vec<f64>) -> Self {
        let mut table = Self::new();
        table.insert(name, values);
        table
    }

    /// Inserts a column, replacing any existing column with the same name.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Option<Vec<f64>> {
        self.columns.insert(name.into(), values)
    }

    /// Appends values to the named column, creating it if needed.
    pub fn extend_column(&mut self, name: &str, values: &[f64]) {
        self.columns
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(values);
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<f64>> {
        self.columns.iter()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Total number of values across all columns.
    pub fn value_count(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<f64>)> for Table {
    fn from_iter<I: IntoIterator<Item = (K, Vec<f64>)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl IntoIterator for Table {
    type Item = (String, Vec<f64>);
    type IntoIter = btree_map::IntoIter<String, Vec<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = (&'a String, &'a Vec<f64>);
    type IntoIter = btree_map::Iter<'a, String, Vec<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}
