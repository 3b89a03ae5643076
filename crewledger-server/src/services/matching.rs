//! Project and category resolution for OCR results
//!
//! Names the employee texts (or the vision model guesses) rarely match the
//! stored names exactly, so both lookups fall back to fuzzy matching.

use sqlx::{Row, SqlitePool};

/// Minimum fuzzy score for a project match
pub const PROJECT_MATCH_THRESHOLD: u8 = 70;

/// Minimum fuzzy score for a category match
pub const CATEGORY_MATCH_THRESHOLD: u8 = 60;

/// Vendor name keywords that imply a category, checked in order
const VENDOR_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Fuel",
        &[
            "gas", "fuel", "shell", "chevron", "bp", "exxon", "mobil", "circle k", "wawa",
            "racetrac", "speedway", "sunoco", "murphy", "qt", "quiktrip", "lake wales", "citgo",
            "valero", "marathon",
        ],
    ),
    (
        "Materials",
        &[
            "home depot", "lowe", "menard", "ace hardware", "84 lumber", "abc supply", "beacon",
            "srs", "build",
        ],
    ),
    (
        "Food & Drinks",
        &[
            "mcdonald", "burger", "subway", "wendy", "chick-fil", "taco bell", "pizza",
            "restaurant", "diner", "cafe", "publix", "walmart", "dollar general", "dollar tree",
            "convenience", "smoke shop",
        ],
    ),
    ("Safety Gear", &["safety", "grainger", "fastenal"]),
    (
        "Lodging",
        &["hotel", "motel", "inn", "suites", "lodge", "airbnb", "extended stay"],
    ),
];

/// Similarity of two strings on a 0-100 scale, case-insensitive
///
/// Indel ratio: `2 * LCS / (len_a + len_b)`, so a short name contained in a
/// longer one still scores well ("Sparrow Job" vs "Sparrow" is 78). The
/// project and category thresholds are tuned on this scale.
///
/// ```
/// use crewledger_server::services::matching::fuzzy_ratio;
///
/// assert_eq!(fuzzy_ratio("Sparrow", "sparrow"), 100);
/// assert!(fuzzy_ratio("Sparow", "Sparrow") >= 70);
/// assert!(fuzzy_ratio("Falcon", "Sparrow") < 70);
/// ```
pub fn fuzzy_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    if a == b {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let common = longest_common_subsequence(&a, &b) as f64;
    (200.0 * common / (a.len() + b.len()) as f64).round() as u8
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Best `(id, score)` candidate at or above `threshold`
fn best_match<'a>(
    needle: &str,
    candidates: impl IntoIterator<Item = (i64, &'a str)>,
    threshold: u8,
) -> Option<i64> {
    let mut best: Option<(i64, u8)> = None;
    for (id, name) in candidates {
        let score = fuzzy_ratio(needle, name);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((id, score));
        }
    }
    best.filter(|(_, score)| *score >= threshold).map(|(id, _)| id)
}

/// Category keyword for a vendor name, if any list matches
pub fn category_for_vendor(vendor: &str) -> Option<&'static str> {
    let lower = vendor.to_lowercase();
    VENDOR_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(category, _)| *category)
}

/// Resolve an employee-supplied project name against active projects
pub async fn resolve_project(pool: &SqlitePool, name: &str) -> crewledger_common::Result<Option<i64>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }

    let exact: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM projects WHERE LOWER(name) = LOWER(?) AND status = 'active'",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    if exact.is_some() {
        return Ok(exact);
    }

    let rows = sqlx::query("SELECT id, name FROM projects WHERE status = 'active'")
        .fetch_all(pool)
        .await?;
    let candidates: Vec<(i64, String)> = rows
        .iter()
        .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("name")))
        .collect();

    Ok(best_match(
        name,
        candidates.iter().map(|(id, n)| (*id, n.as_str())),
        PROJECT_MATCH_THRESHOLD,
    ))
}

/// Resolve a category for a receipt
///
/// Tries the OCR-suggested category (exact, then fuzzy), then the vendor
/// keyword map, then `Other`.
pub async fn resolve_category(
    pool: &SqlitePool,
    suggested: Option<&str>,
    vendor: Option<&str>,
) -> crewledger_common::Result<Option<i64>> {
    let rows = sqlx::query("SELECT id, name FROM categories WHERE is_active = 1")
        .fetch_all(pool)
        .await?;
    let categories: Vec<(i64, String)> = rows
        .iter()
        .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("name")))
        .collect();
    let by_name = |wanted: &str| {
        categories
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(wanted))
            .map(|(id, _)| *id)
    };

    if let Some(suggested) = suggested.map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(id) = by_name(suggested) {
            return Ok(Some(id));
        }
        if let Some(id) = best_match(
            suggested,
            categories.iter().map(|(id, n)| (*id, n.as_str())),
            CATEGORY_MATCH_THRESHOLD,
        ) {
            return Ok(Some(id));
        }
    }

    if let Some(category) = vendor.and_then(category_for_vendor) {
        if let Some(id) = by_name(category) {
            return Ok(Some(id));
        }
    }

    Ok(by_name("Other"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_keywords() {
        assert_eq!(category_for_vendor("Shell Oil 1234"), Some("Fuel"));
        assert_eq!(category_for_vendor("The Home Depot #6311"), Some("Materials"));
        assert_eq!(category_for_vendor("Chick-fil-A"), Some("Food & Drinks"));
        assert_eq!(category_for_vendor("Grainger"), Some("Safety Gear"));
        assert_eq!(category_for_vendor("Extended Stay America"), Some("Lodging"));
        assert_eq!(category_for_vendor("Zzyzx Corp"), None);
    }

    #[test]
    fn test_best_match_respects_threshold() {
        let candidates = [(1, "Sparrow"), (2, "Falcon")];
        assert_eq!(best_match("sparow", candidates, 70), Some(1));
        assert_eq!(best_match("zzz", candidates, 70), None);
    }

    #[test]
    fn test_fuzzy_ratio_bounds() {
        assert_eq!(fuzzy_ratio("", ""), 100);
        assert_eq!(fuzzy_ratio("Sparrow", ""), 0);
        assert_eq!(fuzzy_ratio("abc", "xyz"), 0);
    }

    #[test]
    fn test_fuzzy_ratio_scores_contained_names() {
        assert_eq!(fuzzy_ratio("Sparrow Job", "Sparrow"), 78);
        assert_eq!(fuzzy_ratio("Fuel & Gas", "Fuel"), 57);
        assert_eq!(fuzzy_ratio("kitten", "sitting"), 62);
        assert!(fuzzy_ratio("Sparrow Job", "Sparrow") >= PROJECT_MATCH_THRESHOLD);
        assert!(fuzzy_ratio("Safety", "Safety Gear") >= CATEGORY_MATCH_THRESHOLD);
    }

    #[test]
    fn test_project_with_suffix_matches() {
        let candidates = [(1, "Sparrow"), (2, "Falcon Ridge")];
        assert_eq!(best_match("Sparrow Job", candidates, PROJECT_MATCH_THRESHOLD), Some(1));
    }
}
