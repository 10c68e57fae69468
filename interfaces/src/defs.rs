use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Editorial sections of the newsletter, declared in taxonomy order.
/// The derived `Ord` is the order sections appear in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SectionName {
    Lead,
    SalesAndLeasing,
    ConstructionAndDevelopment,
    World,
    WatchingClosely,
}

impl SectionName {
    pub const TAXONOMY: [SectionName; 5] = [
        SectionName::Lead,
        SectionName::SalesAndLeasing,
        SectionName::ConstructionAndDevelopment,
        SectionName::World,
        SectionName::WatchingClosely,
    ];

    pub const THEMATIC: [SectionName; 4] = [
        SectionName::SalesAndLeasing,
        SectionName::ConstructionAndDevelopment,
        SectionName::World,
        SectionName::WatchingClosely,
    ];

    /// Catch-all section for content that cannot be placed with confidence.
    pub const DEFAULT: SectionName = SectionName::WatchingClosely;

    pub fn is_thematic(self) -> bool {
        self != SectionName::Lead
    }

    /// Heading printed in the published document.
    pub fn display_title(self) -> &'static str {
        match self {
            SectionName::Lead => "Abertura",
            SectionName::SalesAndLeasing => "Vendas e Locação",
            SectionName::ConstructionAndDevelopment => "Construção e Incorporação",
            SectionName::World => "Mundo",
            SectionName::WatchingClosely => "Estamos de olho",
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            SectionName::Lead => "Lead",
            SectionName::SalesAndLeasing => "SalesAndLeasing",
            SectionName::ConstructionAndDevelopment => "ConstructionAndDevelopment",
            SectionName::World => "World",
            SectionName::WatchingClosely => "WatchingClosely",
        }
    }
}

impl std::fmt::Display for SectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

/// A link submitted by the editor for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub url: String,
    /// Raw section label as typed by the editor; resolved later.
    pub assigned_section: Option<String>,
    pub note: Option<String>,
}

impl SourceLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            assigned_section: None,
            note: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.assigned_section = Some(section.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Html,
    Pdf,
    /// Anything else; carried so extraction can report it.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailureKind {
    Transient,
    Permanent,
    Auth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub kind: FetchFailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Ok,
    Failed(FetchFailure),
}

/// Raw response for one link. Lives only until extraction.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub source_url: String,
    /// URL after redirects.
    pub final_url: String,
    pub content_type: ContentType,
    pub raw_bytes: Vec<u8>,
    pub status: FetchStatus,
    pub fetched_at: DateTime<Utc>,
    pub http_status: Option<u16>,
}

impl FetchedDocument {
    pub fn failed(source_url: &str, kind: FetchFailureKind, reason: impl Into<String>) -> Self {
        Self {
            source_url: source_url.to_string(),
            final_url: source_url.to_string(),
            content_type: ContentType::Other(String::new()),
            raw_bytes: Vec::new(),
            status: FetchStatus::Failed(FetchFailure {
                kind,
                reason: reason.into(),
            }),
            fetched_at: Utc::now(),
            http_status: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, FetchStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    PrimaryParser,
    FallbackParser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub source_url: String,
    pub canonical_url: String,
    pub title: String,
    pub body_text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub extraction_method: ExtractionMethod,
}

/// Extracted content tagged with the position of its link in the submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedContent {
    pub position: usize,
    pub content: ExtractedContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HintOrigin {
    /// Section typed next to the link itself.
    Link,
    /// Section derived from free-form editorial instructions.
    Instruction,
}

/// An editorial placement request for the link at `position` (0-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHint {
    pub position: usize,
    pub section: String,
    pub note: Option<u32>,
    pub origin: HintOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedItem {
    pub position: usize,
    /// Items of one section sharing a note number are written as one note.
    pub note: Option<u32>,
    pub content: ExtractedContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionAssignment {
    pub sections: BTreeMap<SectionName, Vec<AssignedItem>>,
}

impl SectionAssignment {
    pub fn items(&self, section: SectionName) -> &[AssignedItem] {
        self.sections.get(&section).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn push(&mut self, section: SectionName, item: AssignedItem) {
        self.sections.entry(section).or_default().push(item);
    }

    pub fn total_items(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    /// Sections holding at least one item, in taxonomy order.
    pub fn populated(&self) -> impl Iterator<Item = (SectionName, &[AssignedItem])> {
        SectionName::TAXONOMY
            .into_iter()
            .map(|name| (name, self.items(name)))
            .filter(|(_, items)| !items.is_empty())
    }

    pub fn section_of(&self, canonical_url: &str) -> Option<SectionName> {
        self.sections.iter().find_map(|(name, items)| {
            items
                .iter()
                .any(|item| item.content.canonical_url == canonical_url)
                .then_some(*name)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextKind {
    Lead,
    DetailedNote,
    Headline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source_name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compliance {
    Compliant,
    /// Best draft kept after every attempt failed validation.
    NonCompliant,
    /// No backend produced anything.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSectionText {
    pub section: SectionName,
    pub kind: TextKind,
    pub text: String,
    pub source_citations: Vec<Citation>,
    pub compliance: Compliance,
    /// Backend whose draft was kept.
    pub backend: Option<String>,
    pub fallback_used: bool,
}

impl GeneratedSectionText {
    pub fn incomplete(section: SectionName, kind: TextKind) -> Self {
        Self {
            section,
            kind,
            text: String::new(),
            source_citations: Vec::new(),
            compliance: Compliance::Incomplete,
            backend: None,
            fallback_used: false,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.compliance == Compliance::Incomplete
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub name: SectionName,
    pub notes: Vec<GeneratedSectionText>,
    pub headlines: Vec<GeneratedSectionText>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterDocument {
    pub title: String,
    pub sponsor_paragraph: Option<String>,
    pub lead: GeneratedSectionText,
    pub sections: Vec<DocumentSection>,
    pub closing_text: String,
}

/// One structural write against the external document.
/// Ranges are half-open `[start, end)` in the target's index space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PublishOperation {
    InsertText { index: usize, text: String },
    ApplyBold { start: usize, end: usize },
    InsertLink { start: usize, end: usize, url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOperationSet {
    pub operations: Vec<PublishOperation>,
    /// Full document text every range was computed against.
    pub snapshot: String,
    pub index_base: usize,
}
