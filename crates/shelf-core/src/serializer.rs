//! Typed records → markdown.
//!
//! Output is canonical: a fixed preamble, then one section per status in
//! to-read / reading / done order (empty sections omitted), each item's
//! properties in a fixed order. Only modeled fields are written, so any
//! extra properties added by hand are dropped on rewrite.

use crate::mapper::STAR;
use crate::record::{Priority, Record, Status, fold_whitespace};
use chrono::{Local, NaiveDate};
use std::fmt::Write;

const DOCUMENT_KIND: &str = "reading-list";
const DOCUMENT_TITLE: &str = "# Reading List";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Heading written for each status section.
pub fn section_heading(status: Status) -> &'static str {
    match status {
        Status::ToRead => "📚 To Read",
        Status::Reading => "📖 Reading",
        Status::Done => "✅ Done",
    }
}

/// Serialize with today's date stamped into the preamble.
pub fn serialize(records: &[Record]) -> String {
    serialize_at(records, Local::now().date_naive())
}

/// Serialize with an explicit preamble date.
pub fn serialize_at(records: &[Record], today: NaiveDate) -> String {
    let mut out = String::new();
    let today = today.format(DATE_FORMAT);

    // Writing to a String cannot fail
    let _ = writeln!(out, "---");
    let _ = writeln!(out, "type: {DOCUMENT_KIND}");
    let _ = writeln!(out, "created: {today}");
    let _ = writeln!(out, "updated: {today}");
    let _ = writeln!(out, "---");
    out.push('\n');
    let _ = writeln!(out, "{DOCUMENT_TITLE}");
    out.push('\n');

    for status in Status::ALL {
        let mut section = records.iter().filter(|r| r.status() == status).peekable();
        if section.peek().is_none() {
            continue;
        }

        let _ = writeln!(out, "## {}", section_heading(status));
        out.push('\n');
        for record in section {
            write_item(&mut out, record);
        }
    }

    out
}

fn write_item(out: &mut String, record: &Record) {
    let _ = writeln!(out, "### [[{}]]", fold_whitespace(record.title()));
    let _ = writeln!(out, "- **type**: {}", record.category.as_str());
    let _ = writeln!(out, "- **author**: {}", fold_whitespace(&record.author));

    if !record.tags().is_empty() {
        let tags: Vec<String> = record.tags().iter().map(|t| format!("#{t}")).collect();
        let _ = writeln!(out, "- **tags**: {}", tags.join(" "));
    }

    if record.priority != Priority::Medium {
        let _ = writeln!(out, "- **priority**: {}", record.priority.as_str());
    }

    let meta = &record.metadata;
    for (key, date) in [
        ("added", meta.added),
        ("started", meta.started),
        ("finished", meta.finished),
    ] {
        if let Some(date) = date {
            let _ = writeln!(out, "- **{key}**: {}", date.format(DATE_FORMAT));
        }
    }

    if let Some(progress) = &record.progress {
        let _ = writeln!(out, "- **progress**: {}%", progress.percentage);
        if progress.current_page > 0 {
            let _ = writeln!(out, "- **current_page**: {}", progress.current_page);
        }
        if progress.total_pages > 0 {
            let _ = writeln!(out, "- **pages**: {}", progress.total_pages);
        }
    }

    if let Some(rating) = record.rating {
        let value = match rating.value() {
            0 => "0".to_string(),
            n => STAR.repeat(usize::from(n)),
        };
        let _ = writeln!(out, "- **rating**: {value}");
    }

    for (key, value) in [
        ("url", &meta.url),
        ("notes", &meta.notes),
        ("review", &meta.review),
    ] {
        if !value.is_empty() {
            let _ = writeln!(out, "- **{key}**: {}", fold_whitespace(value));
        }
    }

    out.push('\n');
}
