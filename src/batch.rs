//! Batch driver.
//!
//! Applies the resolver to a collection of query definitions and aggregates
//! per-query outcomes. Queries share no mutable state, so the batch runs
//! them in parallel with rayon; a single query's errors never abort the run.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::args::ArgStore;
use crate::resolver::{self, ResolvedQuery, Resolver, Status};

/// One input query definition, as supplied by an external loader.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryDef {
    pub id: u32,
    /// The annotated template string.
    pub query: String,
    /// Declared number of ARG placeholders, when the source provides one.
    pub required_args: Option<usize>,
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records: Vec<ResolvedQuery>,
}

impl BatchReport {
    /// Success rate in percent (100 for an empty batch).
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

/// Resolve every definition independently and collect the aggregate report.
pub fn run_batch(defs: &[QueryDef], resolver: &Resolver, args: &ArgStore) -> BatchReport {
    let records: Vec<ResolvedQuery> = defs
        .par_iter()
        .map(|def| resolve_def(def, resolver, args))
        .collect();

    let succeeded = records.iter().filter(|r| r.is_success()).count();
    let report = BatchReport {
        total: records.len(),
        succeeded,
        failed: records.len() - succeeded,
        records,
    };
    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "batch complete"
    );
    report
}

/// Resolve one definition, attaching the declared-count warning if the
/// scan disagrees with the manifest. The mismatch is diagnostic only.
fn resolve_def(def: &QueryDef, resolver: &Resolver, args: &ArgStore) -> ResolvedQuery {
    let record = resolver.resolve_with_id(def.id, &def.query, args);
    match def.required_args {
        Some(declared) => {
            let found = resolver::arg_unit_count(&def.query);
            if declared != found {
                let warning = format!(
                    "declared {declared} required argument(s) but scanning found {found}"
                );
                ResolvedQuery {
                    warnings: vec![warning],
                    ..record
                }
            } else {
                record
            }
        }
        None => record,
    }
}
