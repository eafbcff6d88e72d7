use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::aggregate::{self, Breakdown};
use crate::models::ParticipantRecord;
use crate::normalize::{self, Dimension};
use crate::search::SearchResults;

const HIGHLIGHTS: [Dimension; 5] = [
    Dimension::Ethnicity,
    Dimension::Program,
    Dimension::YearLevel,
    Dimension::Religion,
    Dimension::Address,
];

pub fn render_breakdown(output: &mut String, breakdown: &Breakdown) {
    let columns = breakdown.spec.split.columns();
    let show_unspecified = breakdown.grand_total.unspecified > 0;
    let grand = breakdown.grand_total.total;

    let mut header = format!("| {} |", breakdown.spec.dimension.title());
    for column in columns {
        let _ = write!(header, " {column} |");
    }
    if show_unspecified {
        header.push_str(" Unspecified |");
    }
    header.push_str(" Total | % |");
    let _ = writeln!(output, "{header}");
    let _ = writeln!(output, "|{}", "---|".repeat(columns.len() + 3 + usize::from(show_unspecified)));

    for bucket in &breakdown.buckets {
        let mut row = format!("| {} |", bucket.category);
        for column in columns {
            let _ = write!(row, " {} |", bucket.count(column));
        }
        if show_unspecified {
            let _ = write!(row, " {} |", bucket.unspecified);
        }
        let _ = write!(
            row,
            " {} | {:.1} |",
            bucket.total,
            aggregate::percentage(bucket.total, grand)
        );
        let _ = writeln!(output, "{row}");
    }

    let mut footer = String::from("| **Total** |");
    for column in columns {
        let _ = write!(footer, " {} |", breakdown.grand_total.count(column));
    }
    if show_unspecified {
        let _ = write!(footer, " {} |", breakdown.grand_total.unspecified);
    }
    let _ = write!(
        footer,
        " {} | {:.1} |",
        grand,
        aggregate::percentage(grand, grand)
    );
    let _ = writeln!(output, "{footer}");
}

pub fn render_stats(breakdowns: &[Breakdown]) -> String {
    let mut output = String::new();
    for (index, breakdown) in breakdowns.iter().enumerate() {
        if index > 0 {
            let _ = writeln!(output);
        }
        let _ = writeln!(output, "## {}", breakdown.spec.dimension.title());
        if breakdown.buckets.is_empty() {
            let _ = writeln!(output, "No participants recorded.");
        } else {
            render_breakdown(&mut output, breakdown);
        }
    }
    output
}

pub fn build_report(
    scope: Option<&str>,
    generated_at: DateTime<Utc>,
    records: &[ParticipantRecord],
    breakdowns: &[Breakdown],
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all collections");

    let _ = writeln!(output, "# Participant Census Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} ({} participants)",
        scope_label,
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        records.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Highlights");

    let highlights: Vec<String> = HIGHLIGHTS
        .iter()
        .filter_map(|dimension| {
            let breakdown = breakdowns
                .iter()
                .find(|breakdown| breakdown.spec.dimension == *dimension)?;
            let top = aggregate::top_value(breakdown)?;
            Some(format!(
                "- Most common {}: {} ({} of {}, {:.1}%)",
                dimension.title().to_lowercase(),
                top.category,
                top.total,
                breakdown.grand_total.total,
                aggregate::percentage(top.total, breakdown.grand_total.total)
            ))
        })
        .collect();

    if highlights.is_empty() {
        let _ = writeln!(output, "No participants recorded for this scope.");
    } else {
        for line in highlights {
            let _ = writeln!(output, "{line}");
        }
    }

    for breakdown in breakdowns {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", breakdown.spec.dimension.title());
        if breakdown.buckets.is_empty() {
            let _ = writeln!(output, "No participants recorded.");
        } else {
            render_breakdown(&mut output, breakdown);
        }
    }

    let mut recent: Vec<&ParticipantRecord> =
        records.iter().filter(|record| record.created_at.is_some()).collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recently Added");

    if recent.is_empty() {
        let _ = writeln!(output, "No dated records in this scope.");
    } else {
        for record in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) on {}",
                display_name(record),
                record.collection,
                record
                    .created_at
                    .map(|created| created.format("%Y-%m-%d").to_string())
                    .unwrap_or_default()
            );
        }
    }

    output
}

fn display_name(record: &ParticipantRecord) -> String {
    record
        .full_name
        .as_deref()
        .filter(|name| normalize::is_meaningful(name))
        .map(normalize::title_case)
        .unwrap_or_else(|| format!("[{}]", record.id))
}

pub fn render_search(results: &SearchResults<'_>) -> String {
    let mut output = String::new();
    if results.hits.is_empty() {
        let _ = writeln!(output, "No matching participants.");
        return output;
    }

    for hit in &results.hits {
        let record = hit.record;
        let _ = writeln!(
            output,
            "- {} ({}, {}) sex {} age {} archived {} score {:.2}",
            display_name(record),
            record.collection,
            record.id_number.as_deref().unwrap_or(&record.id),
            normalize::normalize_sex(record.sex.as_deref()).label(),
            normalize::age_bracket(record.age.as_deref()),
            normalize::render_flag(record.archived),
            hit.score
        );
    }
    if results.has_more {
        let _ = writeln!(
            output,
            "... {} more (raise --limit to see them)",
            results.total_matches - results.hits.len()
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate_all, canonicalize, default_specs, BreakdownSpec};
    use crate::models::Collection;
    use crate::search::{ParticipantIndex, SearchQuery};
    use chrono::TimeZone;

    fn records() -> Vec<ParticipantRecord> {
        let mut first = ParticipantRecord::blank("a", Collection::Student);
        first.full_name = Some("avery dela cruz".to_string());
        first.sex = Some("female".to_string());
        first.age = Some("19".to_string());
        first.program = Some("bsit".to_string());
        first.created_at = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).single();

        let mut second = ParticipantRecord::blank("b", Collection::Community);
        second.sex = None;
        second.age = Some("61".to_string());
        second.created_at = Utc.with_ymd_and_hms(2026, 2, 3, 8, 0, 0).single();
        vec![first, second]
    }

    #[test]
    fn breakdown_table_includes_totals_and_unspecified() {
        let breakdowns = aggregate_all(
            &canonicalize(&records()),
            &[BreakdownSpec::for_dimension(Dimension::AgeBracket)],
        );
        let output = render_stats(&breakdowns);
        assert!(output.contains("| Age Bracket | Male | Female | Unspecified | Total | % |"));
        assert!(output.contains("| 18-24 | 0 | 1 | 0 | 1 | 50.0 |"));
        assert!(output.contains("| 55+ | 0 | 0 | 1 | 1 | 50.0 |"));
        assert!(output.contains("| **Total** | 0 | 1 | 1 | 2 | 100.0 |"));
    }

    #[test]
    fn report_lists_highlights_and_recent_records() {
        let records = records();
        let breakdowns = aggregate_all(&canonicalize(&records), &default_specs());
        let generated = Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap();
        let report = build_report(Some("students"), generated, &records, &breakdowns);

        assert!(report.contains("Generated for students on 2026-02-10 09:30 UTC (2 participants)"));
        assert!(report.contains("- Most common program: BSIT (1 of 2, 50.0%)"));
        let recent = report.split("## Recently Added").nth(1).unwrap();
        let community = recent.find("[b]").unwrap();
        let student = recent.find("Avery Dela Cruz").unwrap();
        assert!(community < student);
    }

    #[test]
    fn empty_report_is_well_formed() {
        let breakdowns = aggregate_all(&[], &default_specs());
        let report = build_report(None, Utc::now(), &[], &breakdowns);
        assert!(report.contains("No participants recorded for this scope."));
        assert!(report.contains("No dated records in this scope."));
        assert!(!report.contains("NaN"));
    }

    #[test]
    fn search_rendering_notes_more_results() {
        let index: ParticipantIndex = ParticipantIndex::build(records());
        let results = index.search(&SearchQuery {
            limit: Some(1),
            ..SearchQuery::default()
        });
        let output = render_search(&results);
        assert!(output.contains("Avery Dela Cruz (student, a) sex Female age 18-24 archived No"));
        assert!(output.contains("... 1 more"));
    }
}
