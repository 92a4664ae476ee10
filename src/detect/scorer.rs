use crate::config::CoarseType;
use crate::config::CompiledField;
use crate::config::FieldCatalog;
use crate::spreadsheet::cell::CellValue;

pub const ALLOWED_VALUE_SCORE: u32 = 15;
pub const PATTERN_SCORE: u32 = 10;
pub const TYPE_SCORE: u32 = 5;
pub const HEADERLESS_SCORE: u32 = 4;

/// A possible assignment of a column to a canonical field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeaderCandidate {
    pub column: u32,
    /// Index into the catalog's fields
    pub field: usize,
    pub score: u32,
}

/// One step of the scoring cascade. Returns `None` when the field does not
/// configure this kind of rule, so the next step decides.
pub(crate) trait MatchRule {
    fn score(&self, field: &CompiledField, value: &CellValue) -> Option<u32>;
}

/// Exact membership in the field's allowed values.
pub(crate) struct AllowedValuesRule;

impl MatchRule for AllowedValuesRule {
    fn score(&self, field: &CompiledField, value: &CellValue) -> Option<u32> {
        if field.allowed_values.is_empty() {
            return None;
        }
        let allowed = field.allowed_values.iter().any(|allowed| allowed.matches(value));
        Some(if allowed { ALLOWED_VALUE_SCORE } else { 0 })
    }
}

/// Any configured regex matching the start of the stringified value.
pub(crate) struct PatternRule;

impl MatchRule for PatternRule {
    fn score(&self, field: &CompiledField, value: &CellValue) -> Option<u32> {
        let patterns = field.patterns.as_ref()?;
        let text = value.to_string();
        let matched = patterns.iter().any(|pattern| pattern.is_match(&text));
        Some(if matched { PATTERN_SCORE } else { 0 })
    }
}

pub(crate) struct CoarseTypeRule;

impl MatchRule for CoarseTypeRule {
    fn score(&self, field: &CompiledField, value: &CellValue) -> Option<u32> {
        let accepted = field.types.iter().any(|kind| match (kind, value) {
            (CoarseType::Numeric, CellValue::Number(_)) => true,
            (CoarseType::String, CellValue::Number(_)) => true,
            (CoarseType::String, CellValue::Text(text)) => !text.trim().is_empty(),
            _ => false,
        });
        Some(if accepted { TYPE_SCORE } else { 0 })
    }
}

/// Scores header/data cell pairs against the catalog.
pub struct HeaderScorer<'a> {
    catalog: &'a FieldCatalog,
    rules: Vec<Box<dyn MatchRule>>,
}

impl<'a> HeaderScorer<'a> {
    pub fn new(catalog: &'a FieldCatalog) -> HeaderScorer<'a> {
        HeaderScorer {
            catalog,
            rules: vec![Box::new(AllowedValuesRule), Box::new(PatternRule), Box::new(CoarseTypeRule)],
        }
    }

    pub fn catalog(&self) -> &'a FieldCatalog {
        self.catalog
    }

    /// Desirability of `value` as data of the field, 0 meaning rejection.
    /// The first rule with an opinion decides.
    pub fn score(&self, field: usize, value: &CellValue) -> u32 {
        let field = self.catalog.field(field);
        self.rules
            .iter()
            .find_map(|rule| rule.score(field, value))
            .unwrap_or(0)
    }

    /// All non-zero candidates for one column, given its header cell and the
    /// first data cell below it. Blank headers fall back to the headerless rules.
    pub fn candidates(&self, column: u32, header: &CellValue, data: &CellValue) -> Vec<HeaderCandidate> {
        if header.is_blank() {
            let text = data.to_string();
            return self
                .catalog
                .headerless()
                .iter()
                .filter(|rule| rule.patterns.iter().any(|pattern| pattern.is_match(&text)))
                .map(|rule| HeaderCandidate {
                    column,
                    field: rule.field,
                    score: HEADERLESS_SCORE,
                })
                .collect();
        }

        self.catalog
            .lookup(&header.to_string())
            .iter()
            .map(|field| HeaderCandidate {
                column,
                field: *field,
                score: self.score(*field, data),
            })
            .filter(|candidate| candidate.score > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::catalog;

    #[test]
    fn cascade_priorities() {
        let catalog = catalog();
        let scorer = HeaderScorer::new(&catalog);
        let field = |name: &str| catalog.field_index(name).unwrap();

        assert_eq!(scorer.score(field("pallet_count"), &CellValue::Number(1.0)), 15);
        assert_eq!(scorer.score(field("pallet_count"), &CellValue::from("1")), 15);
        assert_eq!(scorer.score(field("cbm"), &CellValue::Number(1.25)), 10);
        assert_eq!(scorer.score(field("cbm"), &CellValue::from("n/a")), 0);
        assert_eq!(scorer.score(field("pcs"), &CellValue::Number(120.0)), 5);
        assert_eq!(scorer.score(field("pcs"), &CellValue::from("120")), 0);
        assert_eq!(scorer.score(field("po"), &CellValue::Number(4500123.0)), 5);
        assert_eq!(scorer.score(field("po"), &CellValue::from("  ")), 0);
        assert_eq!(scorer.score(field("po"), &CellValue::Empty), 0);
    }

    #[test]
    fn allowed_values_override_lower_rules() {
        let catalog = catalog();
        let scorer = HeaderScorer::new(&catalog);
        let pallet = catalog.field_index("pallet_count").unwrap();
        // numeric and would satisfy either coarse type, yet is not an allowed value
        assert_eq!(scorer.score(pallet, &CellValue::Number(2.0)), 0);
        assert_eq!(scorer.score(pallet, &CellValue::from("one")), 0);
        assert!(scorer
            .candidates(4, &CellValue::from("Pallet"), &CellValue::Number(3.0))
            .is_empty());
    }

    #[test]
    fn header_aliases_are_exact_and_case_insensitive() {
        let catalog = catalog();
        let scorer = HeaderScorer::new(&catalog);
        let item = catalog.field_index("item").unwrap();
        assert_eq!(
            scorer.candidates(2, &CellValue::from("item no"), &CellValue::from("JF-1001")),
            vec![HeaderCandidate { column: 2, field: item, score: 5 }]
        );
        assert!(scorer
            .candidates(2, &CellValue::from("ITEM NUMBER"), &CellValue::from("JF-1001"))
            .is_empty());
    }

    #[test]
    fn ambiguous_headers_yield_several_candidates() {
        let catalog = catalog();
        let scorer = HeaderScorer::new(&catalog);
        let candidates = scorer.candidates(6, &CellValue::from("USD"), &CellValue::Number(2.5));
        let fields: Vec<&str> = candidates.iter().map(|c| catalog.field(c.field).name.as_str()).collect();
        assert_eq!(fields, vec!["unit", "amount"]);
        assert!(candidates.iter().all(|c| c.score == 5));
    }

    #[test]
    fn headerless_columns_score_four() {
        let catalog = catalog();
        let scorer = HeaderScorer::new(&catalog);
        let description = catalog.field_index("description").unwrap();
        assert_eq!(
            scorer.candidates(3, &CellValue::Empty, &CellValue::from("Cow Leather Split")),
            vec![HeaderCandidate { column: 3, field: description, score: 4 }]
        );
        assert!(scorer.candidates(3, &CellValue::from(" "), &CellValue::from("Steel")).is_empty());
    }
}
