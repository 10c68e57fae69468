use crate::style;
use crate::types::{
    Citation, DocumentSection, GeneratedSectionText, NewsletterDocument, PipelineError,
    PublishOperation, PublishOperationSet, Result, TextKind,
};
use crate::utils::text::{fold, paragraphs, squash_whitespace, utf16_len};
use tracing::{debug, info};

/// Shown in place of a text no backend could produce.
pub const INCOMPLETE_NOTICE: &str =
    "[Texto indisponível: nenhum modelo de geração respondeu para este trecho.]";

/// Document service indices start after the body's opening position.
pub const DEFAULT_INDEX_BASE: usize = 1;

/// One paragraph of the final text and how it is styled.
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    bold: bool,
    citations: Vec<Citation>,
}

pub struct Assembler {
    headline_symbol: String,
    index_base: usize,
}

impl Assembler {
    pub fn new(headline_symbol: impl Into<String>) -> Self {
        Self {
            headline_symbol: headline_symbol.into(),
            index_base: DEFAULT_INDEX_BASE,
        }
    }

    pub fn with_index_base(mut self, index_base: usize) -> Self {
        self.index_base = index_base;
        self
    }

    /// Merge generated parts into a document with fixed global order:
    /// title, optional sponsor, lead, sections in taxonomy order (notes
    /// before headlines), closing text.
    pub fn assemble(
        &self,
        title: &str,
        sponsor: Option<&str>,
        lead: GeneratedSectionText,
        sections: Vec<DocumentSection>,
        closing: &str,
    ) -> Result<NewsletterDocument> {
        let title = squash_whitespace(title);
        if title.is_empty() {
            return Err(PipelineError::Assembly("document title is empty".to_string()));
        }
        let closing_text = closing.trim().to_string();
        if closing_text.is_empty() {
            return Err(PipelineError::Assembly("closing text is empty".to_string()));
        }
        if lead.kind != TextKind::Lead || lead.section.is_thematic() {
            return Err(PipelineError::Assembly(format!(
                "lead slot holds a {:?} for {}",
                lead.kind, lead.section
            )));
        }

        let mut merged: Vec<DocumentSection> = Vec::new();
        for section in sections {
            if !section.name.is_thematic() {
                return Err(PipelineError::Assembly(
                    "the lead cannot appear as a thematic section".to_string(),
                ));
            }
            let (notes, headlines): (Vec<_>, Vec<_>) = section
                .notes
                .into_iter()
                .chain(section.headlines)
                .partition(|t| t.kind != TextKind::Headline);

            match merged.iter_mut().find(|s| s.name == section.name) {
                Some(existing) => {
                    existing.notes.extend(notes);
                    existing.headlines.extend(headlines);
                    existing.incomplete |= section.incomplete;
                }
                None => merged.push(DocumentSection {
                    name: section.name,
                    notes,
                    headlines,
                    incomplete: section.incomplete,
                }),
            }
        }
        merged.sort_by_key(|s| s.name);

        let sponsor_paragraph = sponsor
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        info!(
            "Assembled document '{}' with {} section(s){}",
            title,
            merged.len(),
            if sponsor_paragraph.is_some() { " and a sponsor" } else { "" }
        );
        Ok(NewsletterDocument {
            title,
            sponsor_paragraph,
            lead,
            sections: merged,
            closing_text,
        })
    }

    /// Full document text, exactly as `plan` inserts it.
    pub fn render(&self, doc: &NewsletterDocument) -> String {
        self.units(doc)
            .iter()
            .map(|u| format!("{}\n", u.text))
            .collect()
    }

    /// Operations that recreate `doc` in an empty document. Every offset is
    /// computed against the one final text, so applying the operations in
    /// order never shifts a range already emitted.
    pub fn plan(&self, doc: &NewsletterDocument) -> PublishOperationSet {
        let units = self.units(doc);
        let mut operations = Vec::new();
        let mut snapshot = String::new();
        let mut offset = self.index_base;

        for unit in &units {
            let start = offset;
            let end = start + utf16_len(&unit.text);
            operations.push(PublishOperation::InsertText {
                index: start,
                text: format!("{}\n", unit.text),
            });
            if unit.bold && end > start {
                operations.push(PublishOperation::ApplyBold { start, end });
            }
            for (range_start, range_end, url) in citation_ranges(&unit.text, &unit.citations) {
                operations.push(PublishOperation::InsertLink {
                    start: start + range_start,
                    end: start + range_end,
                    url,
                });
            }

            snapshot.push_str(&unit.text);
            snapshot.push('\n');
            offset = end + 1;
        }

        debug!(
            "Planned {} operation(s) over {} UTF-16 units",
            operations.len(),
            offset - self.index_base
        );
        PublishOperationSet {
            operations,
            snapshot,
            index_base: self.index_base,
        }
    }

    fn units(&self, doc: &NewsletterDocument) -> Vec<Unit> {
        let mut units = vec![Unit {
            text: doc.title.clone(),
            bold: true,
            citations: Vec::new(),
        }];

        if let Some(sponsor) = &doc.sponsor_paragraph {
            units.push(plain(sponsor));
        }

        units.extend(text_units(&doc.lead, None));

        for section in &doc.sections {
            units.push(Unit {
                text: section.name.display_title().to_string(),
                bold: true,
                citations: Vec::new(),
            });
            for note in &section.notes {
                units.extend(text_units(note, None));
            }
            for headline in &section.headlines {
                units.extend(text_units(headline, Some(&self.headline_symbol)));
            }
        }

        units.push(plain(&doc.closing_text));
        units
    }
}

fn plain(text: &str) -> Unit {
    Unit {
        text: text.to_string(),
        bold: false,
        citations: Vec::new(),
    }
}

/// One unit per paragraph of a generated text; headlines get their marker.
fn text_units(text: &GeneratedSectionText, symbol: Option<&str>) -> Vec<Unit> {
    if text.is_incomplete() {
        return vec![plain(INCOMPLETE_NOTICE)];
    }
    paragraphs(&text.text)
        .into_iter()
        .map(|paragraph| Unit {
            text: match symbol {
                Some(symbol) => format!("{} {}", symbol, paragraph),
                None => paragraph.to_string(),
            },
            bold: false,
            citations: text.source_citations.clone(),
        })
        .collect()
}

/// UTF-16 ranges of cited names inside the paragraph's closing parenthetical.
fn citation_ranges(text: &str, citations: &[Citation]) -> Vec<(usize, usize, String)> {
    let Some(names) = style::trailing_citation(text) else {
        return Vec::new();
    };
    let Some(open) = text.rfind('(') else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut cursor = open;
    for name in names {
        let Some(citation) = citations
            .iter()
            .find(|c| fold(&c.source_name) == fold(&name))
        else {
            continue;
        };
        let Some(found) = text[cursor..].find(name.as_str()) else {
            continue;
        };
        let byte_start = cursor + found;
        let byte_end = byte_start + name.len();
        ranges.push((
            utf16_len(&text[..byte_start]),
            utf16_len(&text[..byte_end]),
            citation.url.clone(),
        ));
        cursor = byte_end;
    }
    ranges
}
