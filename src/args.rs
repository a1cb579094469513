//! Argument store.
//!
//! An ordered, category-keyed collection of literal values available for
//! positional binding during resolution. Values are opaque strings passed
//! through to renderers without interpretation; the store does not validate
//! medical-code formats.

use std::collections::HashMap;

use crate::error::ResolveError;

/// Ordered argument values keyed by category (`DRUG`, `RACE`, `AGE`, ...).
#[derive(Debug, Clone, Default)]
pub struct ArgStore {
    values: HashMap<String, Vec<String>>,
}

impl ArgStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an ordered value sequence to a category, replacing any previous
    /// binding for that category.
    pub fn bind(&mut self, category: &str, values: Vec<String>) {
        self.values.insert(category.to_string(), values);
    }

    /// Fetch the value at `index` for `category`.
    ///
    /// Fails with [`ResolveError::MissingArgument`] when the category has no
    /// entries or the index exceeds the bound sequence.
    pub fn get(&self, category: &str, index: usize) -> Result<&str, ResolveError> {
        self.values
            .get(category)
            .and_then(|vals| vals.get(index))
            .map(String::as_str)
            .ok_or_else(|| ResolveError::missing(category, index))
    }

    /// Number of values bound for a category (0 when absent).
    pub fn len(&self, category: &str) -> usize {
        self.values.get(category).map_or(0, Vec::len)
    }

    /// Sample fixture with representative values per category, for demos and
    /// tests when no manifest is supplied upstream.
    pub fn sample() -> Self {
        let mut store = Self::new();
        // RxNorm ingredient codes.
        store.bind("DRUG", strs(&["1154343", "1191", "2670", "8782"]));
        // ICD10CM condition codes.
        store.bind("CONDITION", strs(&["E11", "I25.10", "J45", "M79.3"]));
        store.bind(
            "RACE",
            strs(&[
                "White",
                "Black or African American",
                "Asian",
                "American Indian or Alaska Native",
            ]),
        );
        store.bind("GENDER", strs(&["FEMALE", "MALE"]));
        store.bind(
            "ETHNICITY",
            strs(&["Hispanic or Latino", "Not Hispanic or Latino"]),
        );
        store.bind("STATE", strs(&["CA", "NY", "TX", "FL"]));
        store.bind("TIMEDAYS", strs(&["30", "90", "180", "365"]));
        store.bind("TIMEYEARS", strs(&["2020", "2021", "2022", "1950"]));
        store.bind("AGE", strs(&["65", "18", "25", "45"]));
        store
    }
}

impl FromIterator<(String, Vec<String>)> for ArgStore {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn strs(vals: &[&str]) -> Vec<String> {
    vals.iter().map(|s| s.to_string()).collect()
}
