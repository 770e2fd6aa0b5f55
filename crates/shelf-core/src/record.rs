//! Typed reading list records.
//!
//! A [`Record`] owns its lifecycle: status only moves along
//! to-read → reading → done, with reading allowed to fall back to to-read.
//! The store persists whatever it is handed and never checks these rules.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Title cannot be empty")]
    EmptyTitle,

    #[error("Rating must be between 0 and 5, got {0}")]
    RatingOutOfRange(i64),

    #[error("Progress percentage must be between 0 and 100, got {0}")]
    ProgressOutOfRange(i64),

    #[error("Cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: Status, to: Status },

    #[error("Item not found: {0}")]
    NotFound(RecordId),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Identifier derived from title and author.
///
/// Not guaranteed unique: two records whose title/author differ only in
/// punctuation collide, and the later write wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn derive(title: &str, author: &str) -> Self {
        let raw = format!("{title}-{author}");
        let id = raw
            .chars()
            .filter_map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' => Some(c),
                ' ' => Some('-'),
                _ => None,
            })
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    ToRead,
    Reading,
    Done,
}

impl Status {
    /// Fixed section order in the document.
    pub const ALL: [Status; 3] = [Status::ToRead, Status::Reading, Status::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::ToRead => "to-read",
            Status::Reading => "reading",
            Status::Done => "done",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::ToRead, Status::Reading)
                | (Status::Reading, Status::Done)
                | (Status::Reading, Status::ToRead)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "to-read" => Ok(Status::ToRead),
            "reading" => Ok(Status::Reading),
            "done" => Ok(Status::Done),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Book,
    Article,
    Video,
    Course,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Book => "book",
            Category::Article => "article",
            Category::Video => "video",
            Category::Course => "course",
        }
    }

    /// Case-insensitive match; `None` for anything unrecognised.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "book" => Some(Category::Book),
            "article" => Some(Category::Article),
            "video" => Some(Category::Video),
            "course" => Some(Category::Course),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Star rating, 0 to 5 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self> {
        match u8::try_from(value) {
            Ok(v) if v <= Self::MAX => Ok(Self(v)),
            _ => Err(ValidationError::RatingOutOfRange(value)),
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub percentage: u8,
    /// 0 when unknown
    pub current_page: u32,
    /// 0 when unknown
    pub total_pages: u32,
}

impl Progress {
    pub fn new(percentage: i64) -> Result<Self> {
        match u8::try_from(percentage) {
            Ok(p) if p <= 100 => Ok(Self {
                percentage: p,
                ..Self::default()
            }),
            _ => Err(ValidationError::ProgressOutOfRange(percentage)),
        }
    }

    pub fn complete(&mut self) {
        self.percentage = 100;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Metadata {
    pub added: Option<NaiveDate>,
    pub started: Option<NaiveDate>,
    pub finished: Option<NaiveDate>,
    pub url: String,
    pub notes: String,
    pub review: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: RecordId,
    title: String,
    pub author: String,
    pub category: Category,
    status: Status,
    pub priority: Priority,
    tags: Vec<String>,
    pub progress: Option<Progress>,
    pub rating: Option<Rating>,
    pub metadata: Metadata,
}

impl Record {
    /// Create a new to-read record added on `added`.
    pub fn new(title: &str, author: &str, category: Category, added: NaiveDate) -> Result<Self> {
        let mut record = Self::restore(title, author, Status::ToRead)?;
        record.category = category;
        record.metadata.added = Some(added);
        Ok(record)
    }

    /// Rebuild a record read back from storage, in whatever status it was found.
    pub(crate) fn restore(title: &str, author: &str, status: Status) -> Result<Self> {
        let title = fold_whitespace(title);
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let author = fold_whitespace(author);

        Ok(Self {
            id: RecordId::derive(&title, &author),
            title,
            author,
            category: Category::default(),
            status,
            priority: Priority::default(),
            tags: Vec::new(),
            progress: None,
            rating: None,
            metadata: Metadata::default(),
        })
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        self.tags.iter().any(|t| *t == tag)
    }

    /// Add a label. A leading `#` is dropped, inner whitespace becomes `-`,
    /// and duplicates are ignored.
    pub fn add_tag(&mut self, tag: &str) {
        let tag = normalize_tag(tag);
        if !tag.is_empty() && !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        let tag = normalize_tag(tag);
        self.tags.retain(|t| *t != tag);
    }

    fn transition(&mut self, next: Status) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// to-read → reading. Resets progress to 0%.
    pub fn start(&mut self, date: NaiveDate) -> Result<()> {
        self.transition(Status::Reading)?;
        self.metadata.started = Some(date);
        self.progress = Some(Progress::default());
        Ok(())
    }

    /// reading → to-read. Started date and progress are kept.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(Status::ToRead)
    }

    /// reading → done. Completes any recorded progress.
    pub fn finish(&mut self, date: NaiveDate, rating: Rating) -> Result<()> {
        self.transition(Status::Done)?;
        self.metadata.finished = Some(date);
        self.rating = Some(rating);
        if let Some(progress) = self.progress.as_mut() {
            progress.complete();
        }
        Ok(())
    }

    /// Replace progress. Only allowed while reading.
    pub fn update_progress(&mut self, progress: Progress) -> Result<()> {
        if self.status != Status::Reading {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                to: Status::Reading,
            });
        }
        self.progress = Some(progress);
        Ok(())
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .trim_start_matches('#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Title and author are stored on a single heading or property line, so
/// they are kept in that form in memory too.
pub(crate) fn fold_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
