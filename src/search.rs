use std::cmp::Ordering;
use std::str::FromStr;

use serde::Serialize;
use strsim::jaro_winkler;
use tracing::debug;

use crate::models::ParticipantRecord;
use crate::normalize::{self, CanonicalRecord, Dimension};

pub const SIMILARITY_THRESHOLD: f64 = 0.82;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SearchField {
    FullName,
    IdNumber,
    Program,
    School,
    Section,
    YearLevel,
    Religion,
    Ethnicity,
    Address,
    Orientation,
}

impl SearchField {
    pub fn weight(self) -> f64 {
        match self {
            SearchField::FullName | SearchField::IdNumber => 3.0,
            SearchField::Program | SearchField::School => 2.0,
            SearchField::Section | SearchField::YearLevel => 1.5,
            SearchField::Religion
            | SearchField::Ethnicity
            | SearchField::Address
            | SearchField::Orientation => 1.0,
        }
    }
}

const MAX_WEIGHT: f64 = 3.0;

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// A record flattened into lowercase tokens per weighted field.
#[derive(Debug, Clone)]
pub struct SearchDocument {
    pub position: usize,
    pub fields: Vec<(SearchField, Vec<String>)>,
}

impl SearchDocument {
    pub fn from_record(position: usize, record: &ParticipantRecord, canonical: &CanonicalRecord) -> Self {
        let sources: [(SearchField, Option<&str>, Option<&str>); 10] = [
            (SearchField::FullName, record.full_name.as_deref(), None),
            (SearchField::IdNumber, record.id_number.as_deref(), None),
            (SearchField::Program, record.program.as_deref(), Some(canonical.program.label.as_str())),
            (SearchField::School, record.school.as_deref(), None),
            (SearchField::Section, record.section.as_deref(), None),
            (SearchField::YearLevel, None, Some(canonical.year_level.label.as_str())),
            (SearchField::Religion, record.religion.as_deref(), Some(canonical.religion.label.as_str())),
            (SearchField::Ethnicity, None, Some(canonical.ethnicity.label.as_str())),
            (SearchField::Address, record.address.as_deref(), None),
            (SearchField::Orientation, record.orientation.as_deref(), None),
        ];

        let fields = sources
            .into_iter()
            .filter_map(|(field, raw, label)| {
                let label = label.filter(|label| *label != normalize::NOT_SPECIFIED);
                let mut tokens: Vec<String> = raw
                    .into_iter()
                    .chain(label)
                    .flat_map(tokenize)
                    .collect();
                tokens.sort();
                tokens.dedup();
                (!tokens.is_empty()).then_some((field, tokens))
            })
            .collect();

        Self { position, fields }
    }
}

/// Approximate matching over search documents.
///
/// `matches` returns `(position, score)` pairs in ascending position order with
/// scores in `0.0..=1.0`, higher is better.
pub trait SearchIndex {
    fn build(documents: Vec<SearchDocument>) -> Self
    where
        Self: Sized;

    fn matches(&self, query: &str) -> Vec<(usize, f64)>;
}

/// Token-wise Jaro-Winkler matching. Every query term must match some field;
/// a term that is a prefix of a token counts as an exact hit.
#[derive(Debug, Clone)]
pub struct FuzzyIndex {
    documents: Vec<SearchDocument>,
}

fn term_similarity(term: &str, token: &str) -> f64 {
    if token.starts_with(term) {
        return 1.0;
    }
    // Very short terms only match as prefixes.
    if term.chars().count() < 3 {
        return 0.0;
    }
    jaro_winkler(term, token)
}

impl FuzzyIndex {
    fn score(&self, document: &SearchDocument, terms: &[String]) -> Option<f64> {
        let mut total = 0.0;
        for term in terms {
            let best = document
                .fields
                .iter()
                .flat_map(|(field, tokens)| {
                    tokens
                        .iter()
                        .map(move |token| (field.weight(), term_similarity(term, token)))
                })
                .filter(|(_, similarity)| *similarity >= SIMILARITY_THRESHOLD)
                .map(|(weight, similarity)| weight * similarity)
                .fold(None, |best: Option<f64>, value| Some(best.map_or(value, |b| b.max(value))))?;
            total += best;
        }
        Some(total / (terms.len() as f64 * MAX_WEIGHT))
    }
}

impl SearchIndex for FuzzyIndex {
    fn build(documents: Vec<SearchDocument>) -> Self {
        Self { documents }
    }

    fn matches(&self, query: &str) -> Vec<(usize, f64)> {
        let terms: Vec<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Vec::new();
        }
        self.documents
            .iter()
            .filter_map(|document| {
                self.score(document, &terms)
                    .map(|score| (document.position, score))
            })
            .collect()
    }
}

/// Exact, case-insensitive equality against one dimension's canonical label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub dimension: Dimension,
    pub value: String,
}

impl Filter {
    pub fn new(dimension: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: value.into(),
        }
    }

    fn accepts(&self, record: &CanonicalRecord) -> bool {
        record.label(self.dimension).to_lowercase() == self.value.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Relevance,
    Name,
    Age,
    CreatedAt,
    Dimension(Dimension),
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relevance" | "score" => Ok(SortKey::Relevance),
            "name" => Ok(SortKey::Name),
            "age" => Ok(SortKey::Age),
            "created" | "created-at" | "createdat" => Ok(SortKey::CreatedAt),
            other => other
                .parse::<Dimension>()
                .map(SortKey::Dimension)
                .map_err(|_| format!("unknown sort key `{value}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortKey {
    /// Best matches first for relevance; everything else ascends.
    pub fn default_direction(self) -> SortDirection {
        match self {
            SortKey::Relevance => SortDirection::Descending,
            _ => SortDirection::Ascending,
        }
    }
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub filters: Vec<Filter>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit<'a> {
    pub record: &'a ParticipantRecord,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults<'a> {
    pub hits: Vec<SearchHit<'a>>,
    pub total_matches: usize,
    pub has_more: bool,
}

/// Missing values sort last in either direction.
fn compare_present<T: Ord>(a: Option<T>, b: Option<T>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(left), Some(right)) => direction.apply(left.cmp(&right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Records plus the index built over them. Rebuild whenever the records change.
pub struct ParticipantIndex<I = FuzzyIndex> {
    records: Vec<ParticipantRecord>,
    canonical: Vec<CanonicalRecord>,
    matcher: Option<I>,
}

impl<I> Default for ParticipantIndex<I> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            canonical: Vec::new(),
            matcher: None,
        }
    }
}

impl<I: SearchIndex> ParticipantIndex<I> {
    pub fn build(records: Vec<ParticipantRecord>) -> Self {
        let canonical: Vec<CanonicalRecord> =
            records.iter().map(CanonicalRecord::from_record).collect();
        let documents = records
            .iter()
            .zip(&canonical)
            .enumerate()
            .map(|(position, (record, canonical))| {
                SearchDocument::from_record(position, record, canonical)
            })
            .collect();
        debug!(records = records.len(), "search index built");
        Self {
            records,
            canonical,
            matcher: Some(I::build(documents)),
        }
    }

    pub fn records(&self) -> &[ParticipantRecord] {
        &self.records
    }

    fn passes(&self, position: usize, filters: &[Filter]) -> bool {
        let canonical = &self.canonical[position];
        filters.iter().all(|filter| filter.accepts(canonical))
    }

    fn compare(&self, spec: SortSpec, a: &(usize, f64), b: &(usize, f64)) -> Ordering {
        let (left, right) = (&self.records[a.0], &self.records[b.0]);
        match spec.key {
            SortKey::Relevance => spec
                .direction
                .apply(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal)),
            SortKey::Name => compare_present(
                left.full_name.as_deref().map(str::to_lowercase),
                right.full_name.as_deref().map(str::to_lowercase),
                spec.direction,
            ),
            SortKey::Age => compare_present(
                normalize::parse_age(left.age.as_deref()),
                normalize::parse_age(right.age.as_deref()),
                spec.direction,
            ),
            SortKey::CreatedAt => compare_present(left.created_at, right.created_at, spec.direction),
            SortKey::Dimension(dimension) => {
                let label = |position: usize| {
                    let label = self.canonical[position].label(dimension);
                    (label != normalize::NOT_SPECIFIED).then(|| label.to_lowercase())
                };
                compare_present(label(a.0), label(b.0), spec.direction)
            }
        }
    }

    /// Empty text takes the exact-filter path; otherwise fuzzy matches are
    /// intersected with the filters. Sorting is stable and the limit is
    /// applied last.
    pub fn search(&self, query: &SearchQuery) -> SearchResults<'_> {
        let Some(matcher) = &self.matcher else {
            return SearchResults::default();
        };

        let text = query.text.trim();
        let mut hits: Vec<(usize, f64)> = if text.is_empty() {
            (0..self.records.len())
                .filter(|position| self.passes(*position, &query.filters))
                .map(|position| (position, 1.0))
                .collect()
        } else {
            let mut matched = matcher.matches(text);
            matched.retain(|(position, _)| self.passes(*position, &query.filters));
            matched
        };

        match query.sort {
            Some(spec) => hits.sort_by(|a, b| self.compare(spec, a, b)),
            None if !text.is_empty() => {
                hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
            }
            None => {}
        }

        let total_matches = hits.len();
        let limit = query.limit.unwrap_or(total_matches);
        hits.truncate(limit);
        debug!(query = text, total_matches, returned = hits.len(), "search evaluated");

        SearchResults {
            hits: hits
                .into_iter()
                .map(|(position, score)| SearchHit {
                    record: &self.records[position],
                    score,
                })
                .collect(),
            total_matches,
            has_more: total_matches > limit,
        }
    }
}
