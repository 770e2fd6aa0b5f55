//! Generic document → typed records.
//!
//! Best effort: items with no title are skipped, unknown enum
//! values fall back to defaults, and unparsable dates are treated as absent.
//! Nothing here returns an error.
//!
//! Section status comes from [`SECTION_RULES`], a keyword heuristic. Any
//! section whose title matches none of the rules is skipped, so its items
//! are lost on the next write.

use crate::markdown::{GenericDocument, Item};
use crate::record::{Category, Priority, Progress, Rating, Record, Status};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

/// Star glyph used by the serializer for ratings.
pub const STAR: &str = "⭐";

/// Case-insensitive substring rules, evaluated in order; first match wins.
///
/// Order matters: a title like "Finished reading" matches `Reading` before
/// it reaches `Done`.
pub const SECTION_RULES: &[(Status, &[&str])] = &[
    (Status::ToRead, &["to read", "backlog"]),
    (Status::Reading, &["reading", "in progress"]),
    (Status::Done, &["done", "completed", "finished"]),
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Map every recognised section's items to records, in document order.
pub fn map_document(doc: &GenericDocument) -> Vec<Record> {
    let mut records = Vec::new();

    for section in &doc.sections {
        let Some(status) = section_status(&section.title) else {
            debug!("Skipping section '{}' (no status rule matched)", section.title);
            continue;
        };

        for item in &section.items {
            match map_item(item, status) {
                Some(record) => records.push(record),
                None => debug!("Skipping untitled item in section '{}'", section.title),
            }
        }
    }

    records
}

/// Resolve a section heading to a status using [`SECTION_RULES`].
pub fn section_status(title: &str) -> Option<Status> {
    let title = title.to_lowercase();
    SECTION_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| title.contains(k)))
        .map(|(status, _)| *status)
}

fn map_item(item: &Item, status: Status) -> Option<Record> {
    let props = &item.properties;
    let prop = |key: &str| props.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    let author = prop("author").unwrap_or("Unknown");
    let mut record = Record::restore(&item.title, author, status).ok()?;

    if let Some(raw) = prop("type") {
        record.category = Category::parse(raw).unwrap_or_else(|| {
            debug!("Unknown type '{}' for '{}', using book", raw, item.title);
            Category::Book
        });
    }
    if let Some(raw) = prop("priority") {
        record.priority = Priority::parse(raw).unwrap_or_default();
    }
    if let Some(raw) = prop("tags") {
        for token in raw.split_whitespace() {
            record.add_tag(token);
        }
    }

    record.metadata.added = prop("added").and_then(parse_date);
    record.metadata.started = prop("started").and_then(parse_date);
    record.metadata.finished = prop("finished").and_then(parse_date);
    record.metadata.url = prop("url").unwrap_or_default().to_string();
    record.metadata.notes = prop("notes").unwrap_or_default().to_string();
    record.metadata.review = prop("review").unwrap_or_default().to_string();

    record.progress = parse_progress(
        prop("progress"),
        prop("current_page"),
        prop("pages"),
    );
    record.rating = prop("rating").and_then(parse_rating);

    Some(record)
}

/// Try `YYYY-MM-DD`, then `YYYY-MM-DD HH:MM:SS`, then RFC 3339.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

fn parse_progress(
    percentage: Option<&str>,
    current_page: Option<&str>,
    total_pages: Option<&str>,
) -> Option<Progress> {
    let percentage = percentage
        .and_then(|p| p.trim_end_matches('%').trim().parse::<i64>().ok())
        .and_then(|p| Progress::new(p).ok());
    let current_page = current_page.and_then(|p| p.parse::<u32>().ok());
    let total_pages = total_pages.and_then(|p| p.parse::<u32>().ok());

    if percentage.is_none() && current_page.is_none() && total_pages.is_none() {
        return None;
    }

    let mut progress = percentage.unwrap_or_default();
    progress.current_page = current_page.unwrap_or(0);
    progress.total_pages = total_pages.unwrap_or(0);
    Some(progress)
}

/// Star glyphs first, then a bare integer.
fn parse_rating(value: &str) -> Option<Rating> {
    let stars = value.matches(STAR).count();
    if stars > 0 {
        return Rating::new(stars as i64).ok();
    }
    value.parse::<i64>().ok().and_then(|v| Rating::new(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse;

    fn map(content: &str) -> Vec<Record> {
        map_document(&parse(content).unwrap())
    }

    #[test]
    fn test_section_rules() {
        assert_eq!(section_status("📚 To Read"), Some(Status::ToRead));
        assert_eq!(section_status("Backlog"), Some(Status::ToRead));
        assert_eq!(section_status("📖 Reading"), Some(Status::Reading));
        assert_eq!(section_status("IN PROGRESS"), Some(Status::Reading));
        assert_eq!(section_status("✅ Done"), Some(Status::Done));
        assert_eq!(section_status("Completed"), Some(Status::Done));
        assert_eq!(section_status("Finished"), Some(Status::Done));
        assert_eq!(section_status("Finished reading"), Some(Status::Reading));
        assert_eq!(section_status("Wishlist"), None);
    }

    #[test]
    fn test_unknown_section_contributes_nothing() {
        let records = map("## Wishlist\n### [[A]]\n## Done\n### [[B]]\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "B");
        assert_eq!(records[0].status(), Status::Done);
    }

    #[test]
    fn test_untitled_item_is_skipped() {
        let records = map("## Backlog\n### [[]]\n- **author**: X\n### [[Real]]\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "Real");
    }

    #[test]
    fn test_field_coercion() {
        let records = map(
            "## Backlog\n### [[A]]\n- **type**: Podcast\n- **priority**: urgent\n- **tags**: #x y #x\n",
        );
        let record = &records[0];
        assert_eq!(record.author, "Unknown");
        assert_eq!(record.category, Category::Book);
        assert_eq!(record.priority, Priority::Medium);
        assert_eq!(record.tags(), ["x", "y"]);
    }

    #[test]
    fn test_known_values() {
        let records = map(
            "## Reading\n### [[A]]\n- **type**: ARTICLE\n- **author**: Jane\n- **priority**: High\n- **progress**: 40%\n- **current_page**: 120\n- **pages**: 300\n- **url**: https://example.com/a\n",
        );
        let record = &records[0];
        assert_eq!(record.category, Category::Article);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(
            record.progress,
            Some(Progress { percentage: 40, current_page: 120, total_pages: 300 })
        );
        assert_eq!(record.metadata.url, "https://example.com/a");
        assert_eq!(record.id().as_str(), "A-Jane");
    }

    #[test]
    fn test_dates() {
        assert_eq!(parse_date("2024-01-15"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_date("2024-01-15 08:30:00"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_date("2024-01-15T08:30:00Z"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_date("15/01/2024"), None);
    }

    #[test]
    fn test_bad_date_is_absent() {
        let records = map("## Done\n### [[A]]\n- **added**: yesterday\n- **finished**: 2024-02-01\n");
        assert_eq!(records[0].metadata.added, None);
        assert_eq!(records[0].metadata.finished, NaiveDate::from_ymd_opt(2024, 2, 1));
    }

    #[test]
    fn test_rating_forms() {
        assert_eq!(parse_rating("⭐⭐⭐").map(|r| r.value()), Some(3));
        assert_eq!(parse_rating("4").map(|r| r.value()), Some(4));
        assert_eq!(parse_rating("0").map(|r| r.value()), Some(0));
        assert_eq!(parse_rating("9"), None);
        assert_eq!(parse_rating("great"), None);
    }

    #[test]
    fn test_progress_absent_without_any_field() {
        assert_eq!(parse_progress(None, None, None), None);
        assert_eq!(parse_progress(Some("abc"), None, None), None);
        assert_eq!(
            parse_progress(Some("0%"), None, None),
            Some(Progress::default())
        );
    }
}
