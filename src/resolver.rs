//! Resolution engine.
//!
//! Walks the scanned token stream, groups adjacent tokens into placeholder
//! units, binds arguments, invokes renderers and reassembles the final SQL
//! string. Defects are collected on the returned record; a failed query is
//! returned with its best-effort partial text, never dropped.
//!
//! # Unit shapes
//!
//! ```text
//! <DRUG-TEMPLATE><ARG-DRUG><0>   template bound to argument DRUG[0]
//! <ARG-TIMEDAYS><1>              bare literal substitution
//! <RACE-TEMPLATE>                parameterless template invocation
//! ```
//!
//! Grouping requires strict adjacency: any literal text between tokens
//! splits them into independent units.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::args::ArgStore;
use crate::error::{OmopgenError, OmopgenResult, ResolveError};
use crate::scanner::{self, scan, Segment, Token};
use crate::templates::TemplateRegistry;

/// Default number of extra resolution passes over renderer output.
pub const DEFAULT_RESCAN_PASSES: usize = 1;

/// Outcome of resolving one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// The resolved form of one input query definition.
///
/// Immutable once resolution finishes; the batch driver only reads it.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedQuery {
    pub id: u32,
    /// The original template string, echoed for diagnostics.
    pub template: String,
    /// Per-category argument demand discovered by scanning (max index + 1).
    pub required_args: BTreeMap<String, usize>,
    /// Rendered SQL. On failure this is the best-effort partial text with
    /// the original placeholder syntax left visible at the failure sites.
    pub sql: String,
    pub status: Status,
    pub errors: Vec<ResolveError>,
    pub warnings: Vec<String>,
}

impl ResolvedQuery {
    /// True when the query resolved with zero errors and is executable.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// The placeholder resolution engine.
///
/// Holds the configured schema name, the renderer registry and the re-scan
/// bound explicitly; resolution depends on nothing but its inputs, so
/// instances are freely shared across threads.
#[derive(Clone)]
pub struct Resolver {
    schema: String,
    registry: TemplateRegistry,
    rescan_passes: usize,
}

impl Resolver {
    /// Create a resolver for the given schema with the standard registry.
    ///
    /// An empty schema name is a fatal precondition: nothing can resolve
    /// without it.
    pub fn new(schema: impl Into<String>) -> OmopgenResult<Self> {
        let schema = schema.into();
        if schema.trim().is_empty() {
            return Err(OmopgenError::Config(
                "schema name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            schema,
            registry: TemplateRegistry::standard(),
            rescan_passes: DEFAULT_RESCAN_PASSES,
        })
    }

    /// Replace the renderer registry.
    pub fn with_registry(mut self, registry: TemplateRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the number of extra passes over renderer output.
    pub fn with_rescan_passes(mut self, passes: usize) -> Self {
        self.rescan_passes = passes;
        self
    }

    /// Resolve a single query string against the argument store.
    pub fn resolve(&self, query: &str, args: &ArgStore) -> ResolvedQuery {
        self.resolve_with_id(0, query, args)
    }

    /// Resolve a query, stamping the record with the caller's id.
    pub fn resolve_with_id(&self, id: u32, query: &str, args: &ArgStore) -> ResolvedQuery {
        let mut errors = Vec::new();
        // Raw text of tokens already reported, so the final sweep does not
        // re-report a failure site left verbatim in the output.
        let mut reported: HashSet<String> = HashSet::new();

        let mut text = query.to_string();
        let mut pass = 0;
        loop {
            let errors_before = errors.len();
            text = self.resolve_pass(&text, args, &mut errors, &mut reported);

            if !scanner::contains_placeholder(&text) {
                break;
            }
            if errors.len() > errors_before {
                // The surviving tokens are the failure sites themselves;
                // another pass would only duplicate their errors.
                break;
            }
            // Tokens without errors can only have come from renderer output.
            if pass >= self.rescan_passes {
                errors.push(ResolveError::RecursionLimitExceeded {
                    limit: self.rescan_passes,
                });
                break;
            }
            pass += 1;
        }

        // Lexical sweep for placeholder-shaped text the scanner could not
        // classify (misspellings pass through as literals).
        for raw in suspicious_spans(&text) {
            if reported.insert(raw.clone()) {
                errors.push(ResolveError::UnresolvedPlaceholder(raw));
            }
        }

        let status = if errors.is_empty() {
            Status::Success
        } else {
            Status::Failure
        };
        debug!(id, ?status, errors = errors.len(), "resolved query");

        ResolvedQuery {
            id,
            template: query.to_string(),
            required_args: required_args(query),
            sql: text,
            status,
            errors,
            warnings: Vec::new(),
        }
    }

    /// One left-to-right substitution pass over the token stream.
    fn resolve_pass(
        &self,
        input: &str,
        args: &ArgStore,
        errors: &mut Vec<ResolveError>,
        reported: &mut HashSet<String>,
    ) -> String {
        let segments = scan(input);
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < segments.len() {
            let seg = &segments[i];
            let token = match seg {
                Segment::Literal { text, .. } => {
                    out.push_str(text);
                    i += 1;
                    continue;
                }
                Segment::Placeholder { token, .. } => token,
            };

            match token {
                Token::Schema => {
                    out.push_str(&self.schema);
                    i += 1;
                }
                Token::Template(category) => {
                    // Shape 1 when immediately followed by ARG + INDEX,
                    // shape 3 otherwise; ARG without INDEX breaks the unit.
                    match (peek_token(&segments, i + 1), peek_token(&segments, i + 2)) {
                        (Some(Token::Arg(arg_cat)), Some(Token::Index(index))) => {
                            let unit = &segments[i..i + 3];
                            match args.get(arg_cat, *index) {
                                Ok(v) => {
                                    match self.registry.render(category, &self.schema, Some(v)) {
                                        Ok(frag) => out.push_str(&frag),
                                        Err(e) => {
                                            errors.push(e);
                                            self.keep_raw(input, unit, &mut out, reported);
                                        }
                                    }
                                }
                                Err(e) => {
                                    // Report the unregistered category too, so
                                    // the record shows every defect in the unit.
                                    if !self.registry.contains(category) {
                                        errors.push(ResolveError::UnknownTemplateType(
                                            category.clone(),
                                        ));
                                    }
                                    errors.push(e);
                                    self.keep_raw(input, unit, &mut out, reported);
                                }
                            }
                            i += 3;
                        }
                        (Some(Token::Arg(_)), _) => {
                            let unit = &segments[i..i + 2];
                            errors.push(ResolveError::malformed(
                                raw_of(input, unit),
                                seg.start(),
                            ));
                            self.keep_raw(input, unit, &mut out, reported);
                            i += 2;
                        }
                        _ => {
                            match self.registry.render(category, &self.schema, None) {
                                Ok(frag) => out.push_str(&frag),
                                Err(e) => {
                                    errors.push(e);
                                    self.keep_raw(
                                        input,
                                        &segments[i..i + 1],
                                        &mut out,
                                        reported,
                                    );
                                }
                            }
                            i += 1;
                        }
                    }
                }
                Token::Arg(category) => match peek_token(&segments, i + 1) {
                    Some(Token::Index(index)) => {
                        let unit = &segments[i..i + 2];
                        match args.get(category, *index) {
                            Ok(value) => out.push_str(value),
                            Err(e) => {
                                errors.push(e);
                                self.keep_raw(input, unit, &mut out, reported);
                            }
                        }
                        i += 2;
                    }
                    _ => {
                        let unit = &segments[i..i + 1];
                        errors.push(ResolveError::malformed(raw_of(input, unit), seg.start()));
                        self.keep_raw(input, unit, &mut out, reported);
                        i += 1;
                    }
                },
                Token::Index(_) => {
                    // An index with no preceding ARG joins no shape.
                    let unit = &segments[i..i + 1];
                    errors.push(ResolveError::malformed(raw_of(input, unit), seg.start()));
                    self.keep_raw(input, unit, &mut out, reported);
                    i += 1;
                }
            }
        }

        out
    }

    /// Leave a failed unit's text verbatim in the output and remember each
    /// token's raw form so later sweeps skip it.
    fn keep_raw(
        &self,
        input: &str,
        unit: &[Segment],
        out: &mut String,
        reported: &mut HashSet<String>,
    ) {
        for seg in unit {
            if let Segment::Placeholder { start, end, .. } = seg {
                reported.insert(input[*start..*end].to_string());
            }
        }
        out.push_str(&raw_of(input, unit));
    }
}

/// The token at segment position `i`, if that segment is a placeholder.
fn peek_token(segments: &[Segment], i: usize) -> Option<&Token> {
    match segments.get(i) {
        Some(Segment::Placeholder { token, .. }) => Some(token),
        _ => None,
    }
}

/// Source text covered by a run of segments.
fn raw_of(input: &str, unit: &[Segment]) -> String {
    let start = unit.first().map_or(0, Segment::start);
    let end = unit.last().map_or(start, |seg| match seg {
        Segment::Literal { text, start } => start + text.len(),
        Segment::Placeholder { end, .. } => *end,
    });
    input[start..end].to_string()
}

/// Per-category argument demand of a query: max referenced index + 1.
pub fn required_args(query: &str) -> BTreeMap<String, usize> {
    let segments = scan(query);
    let mut required = BTreeMap::new();
    for window in segments.windows(2) {
        if let (
            Segment::Placeholder {
                token: Token::Arg(category),
                ..
            },
            Segment::Placeholder {
                token: Token::Index(index),
                ..
            },
        ) = (&window[0], &window[1])
        {
            let needed = index.saturating_add(1);
            required
                .entry(category.clone())
                .and_modify(|n: &mut usize| *n = (*n).max(needed))
                .or_insert(needed);
        }
    }
    required
}

/// Count of ARG tokens in a query, for the declared-count warning.
pub fn arg_unit_count(query: &str) -> usize {
    scan(query)
        .iter()
        .filter(|seg| {
            matches!(
                seg,
                Segment::Placeholder {
                    token: Token::Arg(_),
                    ..
                }
            )
        })
        .count()
}

/// Placeholder-shaped spans in the text: recognized tokens plus bracketed
/// uppercase runs the scanner passed through as literal (misspellings).
fn suspicious_spans(text: &str) -> Vec<String> {
    let mut spans = Vec::new();
    for seg in scan(text) {
        match seg {
            Segment::Placeholder { start, end, .. } => {
                spans.push(text[start..end].to_string());
            }
            Segment::Literal { text: lit, .. } => {
                let bytes = lit.as_bytes();
                let mut i = 0;
                while i < bytes.len() {
                    if bytes[i] == b'<' {
                        let body_start = i + 1;
                        let mut j = body_start;
                        while j < bytes.len()
                            && (bytes[j].is_ascii_uppercase()
                                || bytes[j].is_ascii_digit()
                                || bytes[j] == b'_'
                                || bytes[j] == b'-')
                        {
                            j += 1;
                        }
                        if j > body_start && j < bytes.len() && bytes[j] == b'>' {
                            spans.push(lit[i..=j].to_string());
                            i = j + 1;
                            continue;
                        }
                    }
                    i += 1;
                }
            }
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> Resolver {
        Resolver::new("cmsdesynpuf23m").unwrap()
    }

    #[test]
    fn test_empty_schema_is_fatal() {
        assert!(Resolver::new("").is_err());
        assert!(Resolver::new("   ").is_err());
    }

    #[test]
    fn test_schema_substitution() {
        let out = resolver().resolve("SELECT * FROM <SCHEMA>.person", &ArgStore::new());
        assert_eq!(out.status, Status::Success);
        assert_eq!(out.sql, "SELECT * FROM cmsdesynpuf23m.person");
    }

    #[test]
    fn test_uniform_schema_replacement() {
        let out = resolver().resolve(
            "SELECT 1 FROM <SCHEMA>.person p JOIN <SCHEMA>.location l ON p.location_id = l.location_id",
            &ArgStore::new(),
        );
        assert_eq!(out.sql.matches("cmsdesynpuf23m").count(), 2);
        assert!(out.is_success());
    }

    #[test]
    fn test_shape_one_binds_argument() {
        let mut args = ArgStore::new();
        args.bind("DRUG", vec!["1154343".to_string(), "1191".to_string()]);
        let out = resolver().resolve(
            "SELECT person_id FROM <SCHEMA>.drug_exposure WHERE drug_concept_id IN <DRUG-TEMPLATE><ARG-DRUG><0>",
            &args,
        );
        assert_eq!(out.status, Status::Success);
        assert!(out.sql.contains("src.concept_code = '1154343'"));
        assert!(!out.sql.contains('<'));
    }

    #[test]
    fn test_shape_two_bare_literal() {
        let mut args = ArgStore::new();
        args.bind("TIMEDAYS", vec!["30".to_string()]);
        let out = resolver().resolve(
            "WHERE end_date - start_date > <ARG-TIMEDAYS><0>",
            &args,
        );
        assert_eq!(out.sql, "WHERE end_date - start_date > 30");
        assert!(out.is_success());
    }

    #[test]
    fn test_shape_two_repeated_index_identical_value() {
        let mut args = ArgStore::new();
        args.bind("TIMEDAYS", vec!["30".to_string()]);
        let out = resolver().resolve(
            "BETWEEN x - <ARG-TIMEDAYS><0> AND x + <ARG-TIMEDAYS><0>",
            &args,
        );
        assert_eq!(out.sql, "BETWEEN x - 30 AND x + 30");
    }

    #[test]
    fn test_shape_three_parameterless_template() {
        let out = resolver().resolve(
            "SELECT race, COUNT(DISTINCT pe1.person_id) FROM <SCHEMA>.person pe1 JOIN <RACE-TEMPLATE> ON pe1.race_concept_id=concept_id GROUP BY race;",
            &ArgStore::new(),
        );
        assert_eq!(out.status, Status::Success);
        assert!(out.sql.contains("cmsdesynpuf23m.person pe1"));
        assert!(out.sql.contains("domain_id = 'Race'"));
        assert!(out.sql.contains("concept_name AS race"));
        // Unfiltered: shape 3 has no bound value.
        assert!(!out.sql.contains("concept_name = "));
    }

    #[test]
    fn test_missing_argument_is_failure() {
        let mut args = ArgStore::new();
        args.bind("DRUG", vec![]);
        let out = resolver().resolve("IN <DRUG-TEMPLATE><ARG-DRUG><0>", &args);
        assert_eq!(out.status, Status::Failure);
        assert_eq!(out.errors, vec![ResolveError::missing("DRUG", 0)]);
        // No subquery spliced; the unit survives verbatim for debugging.
        assert!(out.sql.contains("<DRUG-TEMPLATE><ARG-DRUG><0>"));
        assert!(!out.sql.contains("SELECT dc.concept_id"));
    }

    #[test]
    fn test_oversized_index_yields_missing_argument() {
        // An index literal too large for usize must never alias position 0.
        let mut args = ArgStore::new();
        args.bind("AGE", vec!["65".to_string()]);
        let out = resolver().resolve(
            "WHERE age >= <ARG-AGE><99999999999999999999999999>",
            &args,
        );
        assert_eq!(out.status, Status::Failure);
        assert!(out.errors.iter().any(|e| matches!(
            e,
            ResolveError::MissingArgument {
                index: usize::MAX,
                ..
            }
        )));
        assert!(!out.sql.contains("65"));
        assert!(out.sql.contains("<ARG-AGE>"));
    }

    #[test]
    fn test_unknown_template_is_failure_with_intact_text() {
        let out = resolver().resolve("JOIN <FOO-TEMPLATE> ON x", &ArgStore::new());
        assert_eq!(out.status, Status::Failure);
        assert_eq!(
            out.errors,
            vec![ResolveError::UnknownTemplateType("FOO".to_string())]
        );
        assert_eq!(out.sql, "JOIN <FOO-TEMPLATE> ON x");
    }

    #[test]
    fn test_unknown_template_in_bound_unit_keeps_raw_text() {
        // Shape-1 unit whose template category is unregistered: the bound
        // argument resolves, but the unit must survive verbatim with the
        // registry error, never vanish from the output.
        let mut args = ArgStore::new();
        args.bind("DRUG", vec!["1154343".to_string()]);
        let out = resolver().resolve("JOIN <FOO-TEMPLATE><ARG-DRUG><0> ON x", &args);
        assert_eq!(out.status, Status::Failure);
        assert_eq!(
            out.errors,
            vec![ResolveError::UnknownTemplateType("FOO".to_string())]
        );
        assert_eq!(out.sql, "JOIN <FOO-TEMPLATE><ARG-DRUG><0> ON x");
    }

    #[test]
    fn test_arg_without_index_is_malformed() {
        let out = resolver().resolve("WHERE age > <ARG-AGE> AND 1=1", &ArgStore::sample());
        assert_eq!(out.status, Status::Failure);
        assert!(matches!(
            out.errors[0],
            ResolveError::MalformedPlaceholder { .. }
        ));
        assert!(out.sql.contains("<ARG-AGE>"));
    }

    #[test]
    fn test_bare_index_is_malformed() {
        let out = resolver().resolve("SELECT <0> FROM t", &ArgStore::new());
        assert_eq!(out.status, Status::Failure);
        assert!(matches!(
            out.errors[0],
            ResolveError::MalformedPlaceholder { .. }
        ));
        assert_eq!(out.sql, "SELECT <0> FROM t");
    }

    #[test]
    fn test_gap_splits_units() {
        // Literal text between TEMPLATE and ARG makes two independent units:
        // a shape-3 template and a shape-2 substitution.
        let mut args = ArgStore::new();
        args.bind("GENDER", vec!["FEMALE".to_string()]);
        let out = resolver().resolve("<GENDER-TEMPLATE> <ARG-GENDER><0>", &args);
        assert_eq!(out.status, Status::Success);
        assert!(out.sql.contains("domain_id = 'Gender'"));
        assert!(out.sql.ends_with(" FEMALE"));
    }

    #[test]
    fn test_misspelled_placeholder_is_unresolved() {
        let out = resolver().resolve("JOIN <RCAE-TEMPLTE> ON x", &ArgStore::new());
        assert_eq!(out.status, Status::Failure);
        assert_eq!(
            out.errors,
            vec![ResolveError::UnresolvedPlaceholder(
                "<RCAE-TEMPLTE>".to_string()
            )]
        );
        assert_eq!(out.sql, "JOIN <RCAE-TEMPLTE> ON x");
    }

    #[test]
    fn test_failure_reported_once() {
        let out = resolver().resolve("<FOO-TEMPLATE>", &ArgStore::new());
        assert_eq!(out.errors.len(), 1);
    }

    #[test]
    fn test_resolved_output_is_idempotent() {
        let out = resolver().resolve(
            "SELECT gender FROM <SCHEMA>.person JOIN <GENDER-TEMPLATE> ON gender_concept_id=concept_id",
            &ArgStore::new(),
        );
        assert!(out.is_success());
        let again = resolver().resolve(&out.sql, &ArgStore::new());
        assert_eq!(again.status, Status::Success);
        assert!(again.errors.is_empty());
        assert_eq!(again.sql, out.sql);
    }

    #[test]
    fn test_rescan_resolves_renderer_placeholders() {
        fn nested(_: &str, _: Option<&str>) -> String {
            "(SELECT concept_id FROM <SCHEMA>.concept)".to_string()
        }
        let mut registry = TemplateRegistry::standard();
        registry.register("NESTED", nested);
        let resolver = resolver().with_registry(registry);
        let out = resolver.resolve("JOIN <NESTED-TEMPLATE> ON 1=1", &ArgStore::new());
        assert_eq!(out.status, Status::Success);
        assert!(out.sql.contains("cmsdesynpuf23m.concept"));
    }

    #[test]
    fn test_recursion_limit_exceeded() {
        fn looping(_: &str, _: Option<&str>) -> String {
            "<LOOP-TEMPLATE>x".to_string()
        }
        let mut registry = TemplateRegistry::standard();
        registry.register("LOOP", looping);
        let resolver = resolver().with_registry(registry);
        let out = resolver.resolve("<LOOP-TEMPLATE>", &ArgStore::new());
        assert_eq!(out.status, Status::Failure);
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, ResolveError::RecursionLimitExceeded { limit: 1 })));
    }

    #[test]
    fn test_required_args_takes_max_index() {
        let required = required_args("<ARG-DRUG><2> <ARG-DRUG><0> <ARG-AGE><1>");
        assert_eq!(required.get("DRUG"), Some(&3));
        assert_eq!(required.get("AGE"), Some(&2));
    }

    #[test]
    fn test_arg_unit_count() {
        assert_eq!(
            arg_unit_count("<DRUG-TEMPLATE><ARG-DRUG><0> AND <ARG-AGE><0>"),
            2
        );
    }

    #[test]
    fn test_unreferenced_categories_are_not_errors() {
        let out = resolver().resolve("SELECT 1 FROM <SCHEMA>.person", &ArgStore::sample());
        assert!(out.is_success());
    }
}
