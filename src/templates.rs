//! Template renderers.
//!
//! One rendering function per template category, each producing a
//! self-contained SQL subquery from a bound argument value and fixed
//! vocabulary constants. Renderers are pure: no I/O, no recursion back into
//! the resolution engine.
//!
//! Two families:
//!
//! - **Descendant-concept** (`DRUG`, `CONDITION`): resolve a source
//!   vocabulary code to its concept id, expand to all descendant standard
//!   concepts through `concept_ancestor`, and expose a `concept_id` column
//!   for the caller to join against.
//! - **Exact-match** (`GENDER`, `RACE`, `ETHNICITY`, `STATE`, `CONCEPT`):
//!   filter a lookup table by domain/column equality and project a renamed
//!   `concept_id`/label pair; with no bound value the full lookup table is
//!   returned for the outer query to join and group.

use std::collections::HashMap;

use crate::error::ResolveError;

/// A rendering function: `(schema, optional bound value) -> SQL fragment`.
///
/// Fragments are always parenthesized subqueries, safe to splice into the
/// surrounding SQL without altering operator precedence.
pub type RenderFn = fn(&str, Option<&str>) -> String;

/// Capability-keyed lookup from template category to rendering function.
///
/// Built once at startup; adding a category means registering a function
/// here, never changing the resolution engine.
#[derive(Clone)]
pub struct TemplateRegistry {
    renderers: HashMap<&'static str, RenderFn>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    /// Registry with all standard OMOP CDM renderers installed.
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register("DRUG", render_drug);
        reg.register("CONDITION", render_condition);
        reg.register("GENDER", render_gender);
        reg.register("RACE", render_race);
        reg.register("ETHNICITY", render_ethnicity);
        reg.register("STATE", render_state);
        reg.register("CONCEPT", render_concept);
        reg
    }

    /// Register a renderer for a category, replacing any existing one.
    pub fn register(&mut self, category: &'static str, f: RenderFn) {
        self.renderers.insert(category, f);
    }

    /// Render the subquery for `category` against `schema`.
    ///
    /// Fails with [`ResolveError::UnknownTemplateType`] when the category has
    /// no registered renderer.
    pub fn render(
        &self,
        category: &str,
        schema: &str,
        value: Option<&str>,
    ) -> Result<String, ResolveError> {
        match self.renderers.get(category) {
            Some(f) => Ok(f(schema, value)),
            None => Err(ResolveError::UnknownTemplateType(category.to_string())),
        }
    }

    /// True if a renderer exists for the category.
    pub fn contains(&self, category: &str) -> bool {
        self.renderers.contains_key(category)
    }

    /// Registered category names, sorted.
    pub fn categories(&self) -> Vec<&'static str> {
        let mut cats: Vec<_> = self.renderers.keys().copied().collect();
        cats.sort_unstable();
        cats
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Escape a value for splicing into a single-quoted SQL string literal.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Descendant lookup over `concept_ancestor` for a source vocabulary code.
fn render_descendants(schema: &str, vocabulary: &str, code: Option<&str>) -> String {
    let code = code.unwrap_or_default();
    format!(
        "(SELECT dc.concept_id \
         FROM {schema}.concept src \
         JOIN {schema}.concept_ancestor ca ON ca.ancestor_concept_id = src.concept_id \
         JOIN {schema}.concept dc ON dc.concept_id = ca.descendant_concept_id \
         WHERE src.vocabulary_id = {vocab} \
         AND src.concept_code = {code} \
         AND dc.standard_concept = 'S')",
        schema = schema,
        vocab = sql_literal(vocabulary),
        code = sql_literal(code),
    )
}

/// Exact-match lookup over the concept table for one domain.
///
/// Projects `concept_id` plus `concept_name` renamed to `label`, so outer
/// queries can `JOIN ... ON x_concept_id = concept_id GROUP BY label`.
fn render_domain_lookup(schema: &str, domain: &str, label: &str, name: Option<&str>) -> String {
    let name_filter = match name {
        Some(n) => format!(" AND concept_name = {}", sql_literal(n)),
        None => String::new(),
    };
    format!(
        "(SELECT concept_id, concept_name AS {label} \
         FROM {schema}.concept \
         WHERE domain_id = {domain} \
         AND standard_concept = 'S'{name_filter})",
        schema = schema,
        domain = sql_literal(domain),
        label = label,
        name_filter = name_filter,
    )
}

fn render_drug(schema: &str, value: Option<&str>) -> String {
    render_descendants(schema, "RxNorm", value)
}

fn render_condition(schema: &str, value: Option<&str>) -> String {
    render_descendants(schema, "ICD10CM", value)
}

fn render_gender(schema: &str, value: Option<&str>) -> String {
    render_domain_lookup(schema, "Gender", "gender", value)
}

fn render_race(schema: &str, value: Option<&str>) -> String {
    render_domain_lookup(schema, "Race", "race", value)
}

fn render_ethnicity(schema: &str, value: Option<&str>) -> String {
    render_domain_lookup(schema, "Ethnicity", "ethnicity", value)
}

/// State lookup lives in the location table, not the vocabulary.
fn render_state(schema: &str, value: Option<&str>) -> String {
    let filter = match value {
        Some(v) => format!(" WHERE state = {}", sql_literal(v)),
        None => " WHERE state IS NOT NULL".to_string(),
    };
    format!(
        "(SELECT location_id, state FROM {schema}.location{filter})",
        schema = schema,
        filter = filter,
    )
}

/// Generic concept-name lookup across all standard concepts.
fn render_concept(schema: &str, value: Option<&str>) -> String {
    let name_filter = match value {
        Some(n) => format!(" AND concept_name = {}", sql_literal(n)),
        None => String::new(),
    };
    format!(
        "(SELECT concept_id, concept_name \
         FROM {schema}.concept \
         WHERE standard_concept = 'S'{name_filter})",
        schema = schema,
        name_filter = name_filter,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "cmsdesynpuf23m";

    #[test]
    fn test_drug_renderer_uses_rxnorm_and_schema() {
        let sql = TemplateRegistry::standard()
            .render("DRUG", SCHEMA, Some("1154343"))
            .unwrap();
        assert!(sql.starts_with('(') && sql.ends_with(')'));
        assert!(sql.contains("src.vocabulary_id = 'RxNorm'"));
        assert!(sql.contains("src.concept_code = '1154343'"));
        assert!(sql.contains(&format!("{SCHEMA}.concept_ancestor")));
        assert!(sql.contains("dc.standard_concept = 'S'"));
    }

    #[test]
    fn test_condition_renderer_uses_icd10cm() {
        let sql = TemplateRegistry::standard()
            .render("CONDITION", SCHEMA, Some("E11"))
            .unwrap();
        assert!(sql.contains("src.vocabulary_id = 'ICD10CM'"));
        assert!(sql.contains("src.concept_code = 'E11'"));
    }

    #[test]
    fn test_race_renderer_filtered() {
        let sql = TemplateRegistry::standard()
            .render("RACE", SCHEMA, Some("Asian"))
            .unwrap();
        assert!(sql.contains("domain_id = 'Race'"));
        assert!(sql.contains("concept_name AS race"));
        assert!(sql.contains("concept_name = 'Asian'"));
    }

    #[test]
    fn test_race_renderer_unfiltered() {
        // Shape-3 units render the full lookup table for the outer query to
        // join and group.
        let sql = TemplateRegistry::standard()
            .render("RACE", SCHEMA, None)
            .unwrap();
        assert!(sql.contains("domain_id = 'Race'"));
        assert!(!sql.contains("concept_name = "));
    }

    #[test]
    fn test_state_renderer_targets_location() {
        let sql = TemplateRegistry::standard()
            .render("STATE", SCHEMA, Some("CA"))
            .unwrap();
        assert_eq!(
            sql,
            format!("(SELECT location_id, state FROM {SCHEMA}.location WHERE state = 'CA')")
        );
    }

    #[test]
    fn test_unknown_category() {
        let err = TemplateRegistry::standard()
            .render("FOO", SCHEMA, None)
            .unwrap_err();
        assert_eq!(err, ResolveError::UnknownTemplateType("FOO".to_string()));
    }

    #[test]
    fn test_sql_literal_escaping() {
        let sql = TemplateRegistry::standard()
            .render("CONCEPT", SCHEMA, Some("Crohn's disease"))
            .unwrap();
        assert!(sql.contains("'Crohn''s disease'"));
    }

    #[test]
    fn test_categories_sorted() {
        let reg = TemplateRegistry::standard();
        assert_eq!(
            reg.categories(),
            vec!["CONCEPT", "CONDITION", "DRUG", "ETHNICITY", "GENDER", "RACE", "STATE"]
        );
    }
}
