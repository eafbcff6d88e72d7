use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::models::ParticipantRecord;

pub const NOT_SPECIFIED: &str = "Not Specified";
pub const OTHER_LOCATIONS: &str = "Other Locations";

/// A grouping label together with the raw value it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Canonical {
    pub label: String,
    pub raw: Option<String>,
}

impl Canonical {
    fn new(label: impl Into<String>, raw: Option<&str>) -> Self {
        Self {
            label: label.into(),
            raw: raw.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Dimension {
    Sex,
    AgeBracket,
    Ethnicity,
    Religion,
    Orientation,
    Address,
    School,
    Program,
    YearLevel,
    Section,
    Collection,
}

impl Dimension {
    pub const ALL: [Dimension; 11] = [
        Dimension::Sex,
        Dimension::AgeBracket,
        Dimension::Ethnicity,
        Dimension::Religion,
        Dimension::Orientation,
        Dimension::Address,
        Dimension::School,
        Dimension::Program,
        Dimension::YearLevel,
        Dimension::Section,
        Dimension::Collection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Sex => "sex",
            Dimension::AgeBracket => "age",
            Dimension::Ethnicity => "ethnicity",
            Dimension::Religion => "religion",
            Dimension::Orientation => "orientation",
            Dimension::Address => "address",
            Dimension::School => "school",
            Dimension::Program => "program",
            Dimension::YearLevel => "year-level",
            Dimension::Section => "section",
            Dimension::Collection => "collection",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Dimension::Sex => "Sex",
            Dimension::AgeBracket => "Age Bracket",
            Dimension::Ethnicity => "Ethnic Group",
            Dimension::Religion => "Religion",
            Dimension::Orientation => "Orientation",
            Dimension::Address => "Address",
            Dimension::School => "School",
            Dimension::Program => "Program",
            Dimension::YearLevel => "Year Level",
            Dimension::Section => "Section",
            Dimension::Collection => "Collection",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "sex" | "gender" => Ok(Dimension::Sex),
            "age" | "agebracket" => Ok(Dimension::AgeBracket),
            "ethnicity" | "ethnicgroup" => Ok(Dimension::Ethnicity),
            "religion" => Ok(Dimension::Religion),
            "orientation" => Ok(Dimension::Orientation),
            "address" | "region" => Ok(Dimension::Address),
            "school" => Ok(Dimension::School),
            "program" | "course" => Ok(Dimension::Program),
            "yearlevel" | "year" => Ok(Dimension::YearLevel),
            "section" => Ok(Dimension::Section),
            "collection" | "origin" => Ok(Dimension::Collection),
            _ => Err(format!("unknown dimension `{value}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Sex {
    Male,
    Female,
    NotSpecified,
}

impl Sex {
    pub fn label(self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
            Sex::NotSpecified => NOT_SPECIFIED,
        }
    }
}

pub fn normalize_sex(raw: Option<&str>) -> Sex {
    let Some(value) = raw else {
        return Sex::NotSpecified;
    };
    match value.trim().to_lowercase().as_str() {
        "m" | "male" | "man" | "boy" => Sex::Male,
        "f" | "female" | "woman" | "girl" => Sex::Female,
        _ => Sex::NotSpecified,
    }
}

/// Lower bounds are inclusive; each bracket ends where the next one starts.
pub const AGE_BRACKETS: [(u32, &str); 6] = [
    (0, "Below 18"),
    (18, "18-24"),
    (25, "25-34"),
    (35, "35-44"),
    (45, "45-54"),
    (55, "55+"),
];

pub fn parse_age(raw: Option<&str>) -> Option<u32> {
    let value: f64 = raw?.trim().parse().ok()?;
    if !value.is_finite() || !(0.0..=150.0).contains(&value) {
        return None;
    }
    Some(value.trunc() as u32)
}

pub fn age_bracket(raw: Option<&str>) -> &'static str {
    let Some(age) = parse_age(raw) else {
        return NOT_SPECIFIED;
    };
    AGE_BRACKETS
        .iter()
        .rev()
        .find(|(lower, _)| age >= *lower)
        .map(|(_, label)| *label)
        .unwrap_or(NOT_SPECIFIED)
}

pub fn age_bracket_rank(label: &str) -> Option<usize> {
    AGE_BRACKETS.iter().position(|(_, bracket)| *bracket == label)
}

pub struct Region {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

// Declaration order is the match precedence: the first region with a matching
// keyword wins, even when a later region has a longer match. Keywords match
// whole words only.
pub const GAZETTEER: &[Region] = &[
    Region {
        name: "Davao del Norte",
        keywords: &["davao del norte", "tagum", "panabo", "samal", "carmen", "kapalong", "sto. tomas"],
    },
    Region {
        name: "Davao de Oro",
        keywords: &["davao de oro", "compostela valley", "nabunturan", "monkayo", "maco", "mawab"],
    },
    Region {
        name: "Davao Oriental",
        keywords: &["davao oriental", "mati", "baganga", "lupon"],
    },
    Region {
        name: "Davao Occidental",
        keywords: &["davao occidental", "malita", "jose abad santos"],
    },
    Region {
        name: "Davao del Sur",
        keywords: &["davao del sur", "davao city", "digos", "toril", "bansalan", "sta. cruz", "davao"],
    },
    Region {
        name: "South Cotabato",
        keywords: &["south cotabato", "koronadal", "general santos", "gensan", "polomolok"],
    },
    Region {
        name: "Cotabato",
        keywords: &["cotabato", "kidapawan", "midsayap", "kabacan"],
    },
    Region {
        name: "Bukidnon",
        keywords: &["bukidnon", "malaybalay", "valencia", "maramag"],
    },
    Region {
        name: "Misamis Oriental",
        keywords: &["misamis oriental", "cagayan de oro", "gingoog"],
    },
    Region {
        name: "Lanao del Norte",
        keywords: &["lanao del norte", "iligan"],
    },
    Region {
        name: "Metro Manila",
        keywords: &["metro manila", "manila", "quezon city", "makati", "pasig", "taguig"],
    },
    Region {
        name: "Cebu",
        keywords: &["cebu", "mandaue", "lapu-lapu"],
    },
];

pub fn address_region(raw: Option<&str>) -> &'static str {
    let Some(value) = raw.map(str::trim).filter(|value| is_meaningful(value)) else {
        return NOT_SPECIFIED;
    };
    let haystack = value.to_lowercase();
    GAZETTEER
        .iter()
        .find(|region| {
            region
                .keywords
                .iter()
                .any(|keyword| contains_word(&haystack, keyword))
        })
        .map(|region| region.name)
        .unwrap_or(OTHER_LOCATIONS)
}

fn contains_word(haystack: &str, keyword: &str) -> bool {
    haystack.match_indices(keyword).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

const PLACEHOLDERS: [&str; 9] = [
    "n/a", "na", "none", "null", "nil", "-", "--", "not applicable", "undefined",
];

/// False for empty strings and placeholder answers such as `n/a`, `-`, or `123`.
pub fn is_meaningful(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    if PLACEHOLDERS.contains(&lowered.as_str()) {
        return false;
    }
    let significant: Vec<char> = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if significant.iter().all(|c| c.is_ascii_digit()) {
        return false;
    }
    !significant.iter().all(|c| c.is_ascii_punctuation())
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn free_text_label(raw: Option<&str>) -> String {
    match raw.filter(|value| is_meaningful(value)) {
        Some(value) => title_case(value),
        None => NOT_SPECIFIED.to_string(),
    }
}

const RELIGION_ALIASES: [(&str, &str); 11] = [
    ("rc", "Roman Catholic"),
    ("catholic", "Roman Catholic"),
    ("roman catholic", "Roman Catholic"),
    ("inc", "Iglesia ni Cristo"),
    ("iglesia ni cristo", "Iglesia ni Cristo"),
    ("sda", "Seventh-day Adventist"),
    ("seventh day adventist", "Seventh-day Adventist"),
    ("seventh-day adventist", "Seventh-day Adventist"),
    ("muslim", "Islam"),
    ("islam", "Islam"),
    ("born again", "Born Again Christian"),
];

pub fn religion_label(raw: Option<&str>) -> String {
    let Some(value) = raw.filter(|value| is_meaningful(value)) else {
        return NOT_SPECIFIED.to_string();
    };
    let key = collapse_whitespace(&value.to_lowercase().replace('.', ""));
    RELIGION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| title_case(value))
}

pub fn ethnicity_label(group: Option<&str>, other: Option<&str>) -> String {
    let Some(value) = group.filter(|value| is_meaningful(value)) else {
        return free_text_label(other);
    };
    let key = value.trim().to_lowercase();
    if key == "other" || key == "others" || key.starts_with("other ") || key.starts_with("others ") {
        return match other.filter(|value| is_meaningful(value)) {
            Some(specified) => title_case(specified),
            None => "Other".to_string(),
        };
    }
    title_case(value)
}

/// Short single-token programs (`bsit`, `BSEd`) are abbreviations and render uppercase.
pub fn program_label(raw: Option<&str>) -> String {
    let Some(value) = raw.filter(|value| is_meaningful(value)) else {
        return NOT_SPECIFIED.to_string();
    };
    let trimmed = value.trim();
    if !trimmed.contains(char::is_whitespace) && trimmed.chars().count() <= 6 {
        return trimmed.to_uppercase();
    }
    title_case(trimmed)
}

pub fn section_label(raw: Option<&str>) -> String {
    match raw.filter(|value| is_meaningful(value)) {
        Some(value) => collapse_whitespace(value).to_uppercase(),
        None => NOT_SPECIFIED.to_string(),
    }
}

pub const YEAR_LEVELS: [&str; 5] = ["1st Year", "2nd Year", "3rd Year", "4th Year", "5th Year"];

const YEAR_WORDS: [[&str; 3]; 5] = [
    ["1", "1st", "first"],
    ["2", "2nd", "second"],
    ["3", "3rd", "third"],
    ["4", "4th", "fourth"],
    ["5", "5th", "fifth"],
];

pub fn year_level_label(raw: Option<&str>) -> String {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return NOT_SPECIFIED.to_string();
    };
    let lowered = value.to_lowercase();
    let first = lowered
        .split(|c: char| c.is_whitespace() || c == '-')
        .find(|token| !token.is_empty())
        .unwrap_or_default();
    if let Some(level) = YEAR_WORDS.iter().position(|words| words.contains(&first)) {
        return YEAR_LEVELS[level].to_string();
    }
    free_text_label(Some(value))
}

pub fn year_level_rank(label: &str) -> Option<usize> {
    YEAR_LEVELS.iter().position(|level| *level == label)
}

const LOWERCASE_WORDS: [&str; 4] = ["de", "of", "and", "the"];

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn capitalize_token(token: &str) -> String {
    if token.contains('-') {
        return token.split('-').map(capitalize).collect::<Vec<_>>().join("-");
    }
    if token.contains('.') {
        // Initials such as `j.p.` are uppercased whole; `st.` keeps only its first letter.
        let initials = token.split('.').all(|segment| segment.chars().count() <= 1);
        return if initials {
            token.to_uppercase()
        } else {
            capitalize(token)
        };
    }
    capitalize(token)
}

pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .enumerate()
        .map(|(index, token)| {
            let lowered = token.to_lowercase();
            if index > 0 && LOWERCASE_WORDS.contains(&lowered.as_str()) {
                lowered
            } else {
                capitalize_token(token)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "yes" | "true" | "1")
}

pub fn render_flag(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// Every groupable dimension of one record, normalized once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub sex: Sex,
    pub age: Canonical,
    pub ethnicity: Canonical,
    pub religion: Canonical,
    pub orientation: Canonical,
    pub address: Canonical,
    pub school: Canonical,
    pub program: Canonical,
    pub year_level: Canonical,
    pub section: Canonical,
    pub collection: Canonical,
}

impl CanonicalRecord {
    pub fn from_record(record: &ParticipantRecord) -> Self {
        let sex = record.sex.as_deref();
        let ethnic = record.ethnic_group.as_deref();
        let ethnic_other = record.ethnic_group_other.as_deref();
        Self {
            sex: normalize_sex(sex),
            age: Canonical::new(age_bracket(record.age.as_deref()), record.age.as_deref()),
            ethnicity: Canonical::new(ethnicity_label(ethnic, ethnic_other), ethnic.or(ethnic_other)),
            religion: Canonical::new(religion_label(record.religion.as_deref()), record.religion.as_deref()),
            orientation: Canonical::new(
                free_text_label(record.orientation.as_deref()),
                record.orientation.as_deref(),
            ),
            address: Canonical::new(address_region(record.address.as_deref()), record.address.as_deref()),
            school: Canonical::new(free_text_label(record.school.as_deref()), record.school.as_deref()),
            program: Canonical::new(program_label(record.program.as_deref()), record.program.as_deref()),
            year_level: Canonical::new(
                year_level_label(record.year_level.as_deref()),
                record.year_level.as_deref(),
            ),
            section: Canonical::new(section_label(record.section.as_deref()), record.section.as_deref()),
            collection: Canonical::new(record.collection.as_str(), Some(record.collection.as_str())),
        }
    }

    pub fn label(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Sex => self.sex.label(),
            Dimension::AgeBracket => &self.age.label,
            Dimension::Ethnicity => &self.ethnicity.label,
            Dimension::Religion => &self.religion.label,
            Dimension::Orientation => &self.orientation.label,
            Dimension::Address => &self.address.label,
            Dimension::School => &self.school.label,
            Dimension::Program => &self.program.label,
            Dimension::YearLevel => &self.year_level.label,
            Dimension::Section => &self.section.label,
            Dimension::Collection => &self.collection.label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;

    #[test]
    fn sex_is_case_insensitive_and_total() {
        assert_eq!(normalize_sex(Some(" MALE ")), Sex::Male);
        assert_eq!(normalize_sex(Some("f")), Sex::Female);
        assert_eq!(normalize_sex(Some("prefer not to say")), Sex::NotSpecified);
        assert_eq!(normalize_sex(Some("")), Sex::NotSpecified);
        assert_eq!(normalize_sex(None), Sex::NotSpecified);
    }

    #[test]
    fn age_brackets_use_inclusive_lower_bounds() {
        assert_eq!(age_bracket(Some("17")), "Below 18");
        assert_eq!(age_bracket(Some("18")), "18-24");
        assert_eq!(age_bracket(Some("24")), "18-24");
        assert_eq!(age_bracket(Some("25")), "25-34");
        assert_eq!(age_bracket(Some("44.9")), "35-44");
        assert_eq!(age_bracket(Some("55")), "55+");
        assert_eq!(age_bracket(Some("90")), "55+");
    }

    #[test]
    fn age_falls_back_for_unparseable_input() {
        for raw in [None, Some(""), Some("twenty"), Some("-3"), Some("NaN"), Some("inf")] {
            assert_eq!(age_bracket(raw), NOT_SPECIFIED, "input {raw:?}");
        }
    }

    #[test]
    fn address_uses_first_declared_region() {
        assert_eq!(address_region(Some("Purok 2, Tagum City")), "Davao del Norte");
        assert_eq!(address_region(Some("Bajada, DAVAO CITY")), "Davao del Sur");
        // Both regions match; the earlier declaration wins.
        assert_eq!(address_region(Some("Tagum road, Davao City")), "Davao del Norte");
        assert_eq!(address_region(Some("Mati, Davao Oriental")), "Davao Oriental");
        assert_eq!(address_region(Some("Koronadal, South Cotabato")), "South Cotabato");
        assert_eq!(address_region(Some("Kidapawan, Cotabato")), "Cotabato");
    }

    #[test]
    fn address_keywords_match_whole_words() {
        assert_eq!(address_region(Some("Matina Crossing, Davao City")), "Davao del Sur");
        assert_eq!(address_region(Some("Automatic Subd, Digos")), "Davao del Sur");
        assert_eq!(address_region(Some("Macopa St., Toril")), "Davao del Sur");
        assert_eq!(address_region(Some("Poblacion, Mati City")), "Davao Oriental");
    }

    #[test]
    fn address_separates_unmatched_from_missing() {
        assert_eq!(address_region(Some("Springfield")), OTHER_LOCATIONS);
        assert_eq!(address_region(Some("   ")), NOT_SPECIFIED);
        assert_eq!(address_region(Some("n/a")), NOT_SPECIFIED);
        assert_eq!(address_region(None), NOT_SPECIFIED);
    }

    #[test]
    fn placeholders_are_not_meaningful() {
        for value in ["n/a", "N/A", "none", "-", "123", "...", " ", "", "--"] {
            assert!(!is_meaningful(value), "{value:?}");
        }
        for value in ["Catholic", "Bagobo", "4-B", "B'laan"] {
            assert!(is_meaningful(value), "{value:?}");
        }
    }

    #[test]
    fn religion_resolves_abbreviations() {
        assert_eq!(religion_label(Some("R.C.")), "Roman Catholic");
        assert_eq!(religion_label(Some("catholic")), "Roman Catholic");
        assert_eq!(religion_label(Some("INC")), "Iglesia ni Cristo");
        assert_eq!(religion_label(Some("baptist")), "Baptist");
        assert_eq!(religion_label(Some("none")), NOT_SPECIFIED);
    }

    #[test]
    fn ethnicity_uses_other_specification() {
        assert_eq!(ethnicity_label(Some("Others"), Some("mandaya")), "Mandaya");
        assert_eq!(ethnicity_label(Some("Other"), None), "Other");
        assert_eq!(ethnicity_label(Some("cebuano"), Some("ignored")), "Cebuano");
        assert_eq!(ethnicity_label(None, Some("Tagalog")), "Tagalog");
        assert_eq!(ethnicity_label(None, None), NOT_SPECIFIED);
    }

    #[test]
    fn title_case_handles_exceptions() {
        assert_eq!(title_case("university OF the philippines"), "University of the Philippines");
        assert_eq!(title_case("de la salle"), "De La Salle");
        assert_eq!(title_case("brgy. st. jude"), "Brgy. St. Jude");
        assert_eq!(title_case("lapu-lapu city"), "Lapu-Lapu City");
        assert_eq!(title_case("j.p. laurel  ave"), "J.P. Laurel Ave");
    }

    #[test]
    fn year_levels_are_ordinal() {
        assert_eq!(year_level_label(Some("1")), "1st Year");
        assert_eq!(year_level_label(Some("Second Year")), "2nd Year");
        assert_eq!(year_level_label(Some("4th-year")), "4th Year");
        assert_eq!(year_level_label(Some("graduate")), "Graduate");
        assert_eq!(year_level_label(None), NOT_SPECIFIED);
        assert_eq!(year_level_rank("3rd Year"), Some(2));
    }

    #[test]
    fn programs_keep_abbreviations() {
        assert_eq!(program_label(Some("bsit")), "BSIT");
        assert_eq!(program_label(Some("bachelor of arts and letters")), "Bachelor of Arts and Letters");
        assert_eq!(program_label(Some("-")), NOT_SPECIFIED);
    }

    #[test]
    fn flags_parse_and_render() {
        assert!(parse_flag("YES"));
        assert!(parse_flag(" true "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
        assert!(!parse_flag(""));
        assert_eq!(render_flag(true), "Yes");
        assert_eq!(render_flag(false), "No");
    }

    #[test]
    fn blank_record_normalizes_to_fallbacks() {
        let canonical = CanonicalRecord::from_record(&ParticipantRecord::blank("x", Collection::Community));
        for dimension in Dimension::ALL {
            let label = canonical.label(dimension);
            if dimension == Dimension::Collection {
                assert_eq!(label, "community");
            } else {
                assert_eq!(label, NOT_SPECIFIED, "{dimension}");
            }
        }
    }

    #[test]
    fn dimensions_parse_from_cli_names() {
        for dimension in Dimension::ALL {
            assert_eq!(dimension.as_str().parse::<Dimension>(), Ok(dimension));
        }
    }
}
