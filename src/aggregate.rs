use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::models::{Collection, ParticipantRecord};
use crate::normalize::{self, CanonicalRecord, Dimension, Sex, NOT_SPECIFIED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPolicy {
    /// Case-insensitive ascending, `Not Specified` last.
    Alphabetical,
    /// Fixed lookup table for the dimension; unranked labels follow alphabetically.
    Ordinal,
    /// Largest total first; ties keep first-encountered order.
    FrequencyDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Sex,
    Collection,
}

impl Split {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Split::Sex => &["Male", "Female"],
            Split::Collection => &["student", "staffFaculty", "community"],
        }
    }

    fn column(self, record: &CanonicalRecord) -> Option<&'static str> {
        match self {
            Split::Sex => match record.sex {
                Sex::Male | Sex::Female => Some(record.sex.label()),
                Sex::NotSpecified => None,
            },
            Split::Collection => Collection::ALL
                .iter()
                .map(|collection| collection.as_str())
                .find(|name| *name == record.collection.label),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakdownSpec {
    pub dimension: Dimension,
    pub split: Split,
    pub sort: SortPolicy,
}

impl BreakdownSpec {
    pub fn new(dimension: Dimension, split: Split, sort: SortPolicy) -> Self {
        Self {
            dimension,
            split,
            sort,
        }
    }

    /// The dashboard's usual table for `dimension`, split by sex.
    pub fn for_dimension(dimension: Dimension) -> Self {
        let split = if dimension == Dimension::Sex {
            Split::Collection
        } else {
            Split::Sex
        };
        Self::new(dimension, split, default_sort(dimension))
    }
}

pub fn default_sort(dimension: Dimension) -> SortPolicy {
    match dimension {
        Dimension::Sex | Dimension::AgeBracket | Dimension::YearLevel | Dimension::Collection => {
            SortPolicy::Ordinal
        }
        Dimension::Ethnicity | Dimension::Program | Dimension::School | Dimension::Address => {
            SortPolicy::FrequencyDesc
        }
        Dimension::Religion | Dimension::Orientation | Dimension::Section => {
            SortPolicy::Alphabetical
        }
    }
}

pub fn default_specs() -> Vec<BreakdownSpec> {
    Dimension::ALL
        .iter()
        .map(|dimension| BreakdownSpec::for_dimension(*dimension))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateBucket {
    pub category: String,
    pub counts: BTreeMap<String, u64>,
    /// Records whose split value is not one of the split's columns.
    pub unspecified: u64,
    pub total: u64,
    #[serde(skip)]
    first_seen: usize,
}

impl AggregateBucket {
    fn new(category: &str, split: Split, first_seen: usize) -> Self {
        Self {
            category: category.to_string(),
            counts: split
                .columns()
                .iter()
                .map(|column| ((*column).to_string(), 0))
                .collect(),
            unspecified: 0,
            total: 0,
            first_seen,
        }
    }

    pub fn count(&self, column: &str) -> u64 {
        self.counts.get(column).copied().unwrap_or(0)
    }

    pub fn is_fallback(&self) -> bool {
        self.category == NOT_SPECIFIED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrandTotal {
    pub counts: BTreeMap<String, u64>,
    pub unspecified: u64,
    pub total: u64,
}

impl GrandTotal {
    pub fn count(&self, column: &str) -> u64 {
        self.counts.get(column).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub spec: BreakdownSpec,
    pub buckets: Vec<AggregateBucket>,
    pub grand_total: GrandTotal,
}

impl Breakdown {
    #[cfg(test)]
    pub fn bucket(&self, category: &str) -> Option<&AggregateBucket> {
        self.buckets.iter().find(|bucket| bucket.category == category)
    }
}

struct Tally {
    spec: BreakdownSpec,
    positions: HashMap<String, usize>,
    buckets: Vec<AggregateBucket>,
}

impl Tally {
    fn new(spec: BreakdownSpec) -> Self {
        Self {
            spec,
            positions: HashMap::new(),
            buckets: Vec::new(),
        }
    }

    fn add(&mut self, record: &CanonicalRecord) {
        let category = record.label(self.spec.dimension);
        let position = match self.positions.get(category) {
            Some(position) => *position,
            None => {
                let position = self.buckets.len();
                self.buckets
                    .push(AggregateBucket::new(category, self.spec.split, position));
                self.positions.insert(category.to_string(), position);
                position
            }
        };

        let bucket = &mut self.buckets[position];
        match self.spec.split.column(record) {
            Some(column) => *bucket.counts.entry(column.to_string()).or_insert(0) += 1,
            None => bucket.unspecified += 1,
        }
        bucket.total += 1;
    }

    fn finish(self) -> Breakdown {
        let mut buckets = self.buckets;
        sort_buckets(&mut buckets, self.spec.dimension, self.spec.sort);
        let grand_total = grand_total(&buckets);
        Breakdown {
            spec: self.spec,
            buckets,
            grand_total,
        }
    }
}

fn ordinal_rank(dimension: Dimension, label: &str) -> Option<usize> {
    match dimension {
        Dimension::AgeBracket => normalize::age_bracket_rank(label),
        Dimension::YearLevel => normalize::year_level_rank(label),
        Dimension::Sex => ["Male", "Female"].iter().position(|sex| *sex == label),
        Dimension::Collection => Collection::ALL
            .iter()
            .position(|collection| collection.as_str() == label),
        _ => None,
    }
}

fn fallback_last(a: &AggregateBucket, b: &AggregateBucket) -> Ordering {
    a.is_fallback().cmp(&b.is_fallback())
}

fn alphabetical(a: &AggregateBucket, b: &AggregateBucket) -> Ordering {
    a.category
        .to_lowercase()
        .cmp(&b.category.to_lowercase())
        .then_with(|| a.category.cmp(&b.category))
}

pub fn sort_buckets(buckets: &mut [AggregateBucket], dimension: Dimension, policy: SortPolicy) {
    match policy {
        SortPolicy::Alphabetical => {
            buckets.sort_by(|a, b| fallback_last(a, b).then_with(|| alphabetical(a, b)));
        }
        SortPolicy::Ordinal => {
            buckets.sort_by(|a, b| {
                fallback_last(a, b).then_with(|| {
                    match (
                        ordinal_rank(dimension, &a.category),
                        ordinal_rank(dimension, &b.category),
                    ) {
                        (Some(left), Some(right)) => left.cmp(&right),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => alphabetical(a, b),
                    }
                })
            });
        }
        SortPolicy::FrequencyDesc => {
            buckets.sort_by(|a, b| {
                b.total
                    .cmp(&a.total)
                    .then_with(|| a.first_seen.cmp(&b.first_seen))
            });
        }
    }
}

pub fn grand_total(buckets: &[AggregateBucket]) -> GrandTotal {
    let mut total = GrandTotal::default();
    for bucket in buckets {
        for (column, count) in &bucket.counts {
            *total.counts.entry(column.clone()).or_insert(0) += count;
        }
        total.unspecified += bucket.unspecified;
        total.total += bucket.total;
    }
    total
}

pub fn canonicalize(records: &[ParticipantRecord]) -> Vec<CanonicalRecord> {
    records.iter().map(CanonicalRecord::from_record).collect()
}

pub fn aggregate(records: &[CanonicalRecord], spec: BreakdownSpec) -> Breakdown {
    let mut breakdowns = aggregate_all(records, &[spec]);
    breakdowns.pop().unwrap_or_else(|| Tally::new(spec).finish())
}

/// Computes every spec in a single pass over `records`.
pub fn aggregate_all(records: &[CanonicalRecord], specs: &[BreakdownSpec]) -> Vec<Breakdown> {
    let mut tallies: Vec<Tally> = specs.iter().copied().map(Tally::new).collect();
    for record in records {
        for tally in &mut tallies {
            tally.add(record);
        }
    }
    tallies.into_iter().map(Tally::finish).collect()
}

/// Share of `count` in `total` as a percentage; zero when `total` is zero.
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Most frequent bucket, ignoring the `Not Specified` fallback.
pub fn top_value(breakdown: &Breakdown) -> Option<&AggregateBucket> {
    breakdown
        .buckets
        .iter()
        .filter(|bucket| !bucket.is_fallback())
        .fold(None, |best: Option<&AggregateBucket>, bucket| match best {
            Some(current)
                if current.total > bucket.total
                    || (current.total == bucket.total && current.first_seen < bucket.first_seen) =>
            {
                Some(current)
            }
            _ => Some(bucket),
        })
}
