//! Input loaders.
//!
//! External collaborators of the core: CSV query definitions and JSON
//! argument manifests. The core imposes no format requirement beyond the
//! query column containing zero or more legal placeholder sequences.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::args::ArgStore;
use crate::batch::QueryDef;
use crate::error::OmopgenResult;

#[derive(Debug, Deserialize)]
struct QueryRow {
    query: String,
    #[serde(default)]
    required_args: Option<usize>,
}

/// Load query definitions from a CSV file with a `query` column and an
/// optional `required_args` column. Ids are assigned from row order,
/// starting at 1.
pub fn load_queries(path: &Path) -> OmopgenResult<Vec<QueryDef>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;
    let mut defs = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        let row: QueryRow = row?;
        defs.push(QueryDef {
            id: i as u32 + 1,
            query: row.query,
            required_args: row.required_args,
        });
    }
    debug!(count = defs.len(), path = %path.display(), "loaded query definitions");
    Ok(defs)
}

/// Load an argument manifest from a JSON object of the form
/// `{"DRUG": ["1154343", "1191"], "AGE": ["65"]}`.
pub fn load_args(path: &Path) -> OmopgenResult<ArgStore> {
    let file = File::open(path)?;
    let manifest: HashMap<String, Vec<String>> = serde_json::from_reader(file)?;
    Ok(manifest.into_iter().collect())
}
