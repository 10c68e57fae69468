use crate::config::GenerationConfig;
use crate::llm_adapter::BackendChain;
use crate::prompt::Prompt;
use crate::style::{self, StyleGuide, Violation};
use crate::types::{
    AssignedItem, Citation, Compliance, DocumentSection, GeneratedSectionText, GenerationError,
    SectionAssignment, SectionName, TextKind,
};
use crate::utils::text::fold;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of one generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState {
    Pending,
    Drafting,
    Validating,
    Accepted,
    Retrying,
    Failed,
}

/// Outcome of one generated text, for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionReport {
    pub section: SectionName,
    pub kind: TextKind,
    /// 1-based note index within the section, for notes and headlines
    pub note: Option<usize>,
    pub state: GenerationState,
    pub backend: Option<String>,
    pub fallback_used: bool,
    pub compliant: bool,
    pub attempts: u32,
    /// Violations of the kept draft, or of the last draft when none was kept
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub lead: GeneratedSectionText,
    pub sections: Vec<DocumentSection>,
    pub reports: Vec<SectionReport>,
}

/// Candidate draft kept while retrying.
struct Draft {
    text: String,
    violations: Vec<Violation>,
    backend: String,
    fallback: bool,
}

pub struct Orchestrator {
    chain: BackendChain,
    style: Arc<StyleGuide>,
    config: GenerationConfig,
    editor_notes: HashMap<usize, String>,
}

impl Orchestrator {
    pub fn new(chain: BackendChain, style: Arc<StyleGuide>, config: GenerationConfig) -> Self {
        Self {
            chain,
            style,
            config,
            editor_notes: HashMap::new(),
        }
    }

    /// Free-text editor notes keyed by 0-based link position, passed to prompts.
    pub fn with_editor_notes(mut self, notes: HashMap<usize, String>) -> Self {
        self.editor_notes = notes;
        self
    }

    /// Lead first, then each thematic section in taxonomy order: its notes,
    /// then one headline per accepted note. Notes kept without passing
    /// validation get no headline.
    pub async fn generate(&self, assignment: &SectionAssignment) -> GenerationOutcome {
        let mut reports = Vec::new();

        let lead_items: Vec<AssignedItem> = if assignment.items(SectionName::Lead).is_empty() {
            // No link was placed in the lead: frame the issue from everything
            SectionName::THEMATIC
                .iter()
                .flat_map(|s| assignment.items(*s).iter().cloned())
                .collect()
        } else {
            assignment.items(SectionName::Lead).to_vec()
        };

        let lead = if lead_items.is_empty() {
            warn!("No content available for the lead");
            GeneratedSectionText::incomplete(SectionName::Lead, TextKind::Lead)
        } else {
            let (text, report) = self
                .generate_text(SectionName::Lead, TextKind::Lead, None, &lead_items, None)
                .await;
            reports.push(report);
            text
        };

        let mut sections = Vec::new();
        for section in SectionName::THEMATIC {
            let items = assignment.items(section);
            if items.is_empty() {
                continue;
            }

            let mut notes = Vec::new();
            let mut headlines = Vec::new();
            for (idx, group) in group_notes(items).into_iter().enumerate() {
                let (note, report) = self
                    .generate_text(section, TextKind::DetailedNote, Some(idx + 1), &group, None)
                    .await;
                reports.push(report);

                if note.compliance == Compliance::Compliant {
                    let (headline, report) = self
                        .generate_text(
                            section,
                            TextKind::Headline,
                            Some(idx + 1),
                            &group,
                            Some(&note.text),
                        )
                        .await;
                    reports.push(report);
                    headlines.push(headline);
                } else if !note.is_incomplete() {
                    warn!("No headline for note {} in {}: note was not accepted", idx + 1, section);
                }
                notes.push(note);
            }

            let incomplete = notes.iter().chain(headlines.iter()).any(|t| t.is_incomplete());
            if incomplete {
                warn!("Section {} is incomplete", section);
            }
            sections.push(DocumentSection {
                name: section,
                notes,
                headlines,
                incomplete,
            });
        }

        info!(
            "Generated lead and {} section(s); {} text(s) reported",
            sections.len(),
            reports.len()
        );
        GenerationOutcome {
            lead,
            sections,
            reports,
        }
    }

    /// Draft, validate and retry one text across the backend chain.
    pub async fn generate_text(
        &self,
        section: SectionName,
        kind: TextKind,
        note: Option<usize>,
        items: &[AssignedItem],
        summarize: Option<&str>,
    ) -> (GeneratedSectionText, SectionReport) {
        let excerpt_chars = match kind {
            TextKind::Lead => self.config.lead_excerpt_chars,
            _ => self.config.excerpt_chars,
        };
        let mut base = Prompt::build(
            &self.style,
            kind,
            section,
            items,
            excerpt_chars,
            &self.editor_notes,
        );
        if kind != TextKind::Headline {
            // Only numbers the model was shown can be demanded back
            let facts = style::numeric_facts(base.sources.iter().map(|s| s.excerpt.as_str()));
            base = base.with_numeric_facts(facts);
        }
        if let Some(text) = summarize {
            base = base.with_summary_of(text);
        }
        let allowed = base.allowed_sources();

        let mut report = SectionReport {
            section,
            kind,
            note,
            state: GenerationState::Pending,
            backend: None,
            fallback_used: false,
            compliant: false,
            attempts: 0,
            violations: Vec::new(),
        };
        let mut best: Option<Draft> = None;
        let mut feedback: Vec<Violation> = Vec::new();

        for (rank, (backend, fallback)) in self.chain.ordered().into_iter().enumerate() {
            let budget = if rank == 0 {
                self.config.max_attempts
            } else {
                self.config.fallback_attempts
            };
            if fallback {
                info!("Falling back to {} for {:?} in {}", backend.name(), kind, section);
            }

            for attempt in 1..=budget {
                report.state = GenerationState::Drafting;
                report.attempts += 1;
                let prompt = base.with_feedback(&feedback);

                let raw = match backend.generate(&prompt).await {
                    Ok(raw) => raw,
                    Err(e @ GenerationError::BackendUnavailable { .. }) => {
                        warn!("{}", e);
                        break;
                    }
                    Err(e) => {
                        warn!("Attempt {} for {:?} in {} failed: {}", attempt, kind, section, e);
                        report.state = GenerationState::Retrying;
                        continue;
                    }
                };

                report.state = GenerationState::Validating;
                let text = self.clean(kind, &raw);
                let violations = self.style.validate(&text, kind, &allowed, &base.numeric_facts);

                if violations.is_empty() {
                    debug!(
                        "{:?} in {} accepted from {} on attempt {}",
                        kind,
                        section,
                        backend.name(),
                        attempt
                    );
                    report.state = GenerationState::Accepted;
                    report.backend = Some(backend.name());
                    report.fallback_used = fallback;
                    report.compliant = true;
                    report.violations.clear();
                    let generated = GeneratedSectionText {
                        section,
                        kind,
                        source_citations: citations_for(&text, items),
                        text,
                        compliance: Compliance::Compliant,
                        backend: Some(backend.name()),
                        fallback_used: fallback,
                    };
                    return (generated, report);
                }

                let rejection = GenerationError::ConstraintViolation {
                    violations: violations.clone(),
                };
                warn!(
                    "{:?} in {} from {} rejected, {}: {}",
                    kind,
                    section,
                    backend.name(),
                    rejection,
                    violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
                );
                report.state = GenerationState::Retrying;
                report.violations = violations.clone();

                // Fewest violations wins; ties keep the earlier draft
                if best.as_ref().map_or(true, |b| violations.len() < b.violations.len()) {
                    best = Some(Draft {
                        text,
                        violations: violations.clone(),
                        backend: backend.name(),
                        fallback,
                    });
                }
                feedback = violations;
            }
        }

        report.state = GenerationState::Failed;
        match best {
            Some(draft) => {
                warn!(
                    "Keeping non-compliant {:?} in {} from {} after {} attempt(s)",
                    kind, section, draft.backend, report.attempts
                );
                report.backend = Some(draft.backend.clone());
                report.fallback_used = draft.fallback;
                report.violations = draft.violations;
                let generated = GeneratedSectionText {
                    section,
                    kind,
                    source_citations: citations_for(&draft.text, items),
                    text: draft.text,
                    compliance: Compliance::NonCompliant,
                    backend: Some(draft.backend),
                    fallback_used: draft.fallback,
                };
                (generated, report)
            }
            None => {
                error!("No backend produced {:?} for {}; marking incomplete", kind, section);
                (GeneratedSectionText::incomplete(section, kind), report)
            }
        }
    }

    fn clean(&self, kind: TextKind, raw: &str) -> String {
        match kind {
            TextKind::Headline => self.style.clean_headline(raw).to_string(),
            _ => raw.trim().to_string(),
        }
    }
}

/// Items sharing a note number form one note; the rest one note each.
/// Notes follow the submission order of their first item.
pub fn group_notes(items: &[AssignedItem]) -> Vec<Vec<AssignedItem>> {
    let mut groups: Vec<Vec<AssignedItem>> = Vec::new();
    let mut by_note: HashMap<u32, usize> = HashMap::new();

    let mut ordered: Vec<&AssignedItem> = items.iter().collect();
    ordered.sort_by_key(|item| item.position);

    for item in ordered {
        match item.note {
            Some(number) => match by_note.get(&number) {
                Some(&idx) => groups[idx].push(item.clone()),
                None => {
                    by_note.insert(number, groups.len());
                    groups.push(vec![item.clone()]);
                }
            },
            None => groups.push(vec![item.clone()]),
        }
    }
    groups
}

/// Map cited names to the items' URLs. Falls back to every item when the
/// text cites nothing recognisable, so derived text always carries sources.
fn citations_for(text: &str, items: &[AssignedItem]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for name in style::cited_names(text) {
        let folded = fold(&name);
        for item in items.iter().filter(|i| fold(&i.content.source_name) == folded) {
            if !citations.iter().any(|c| c.url == item.content.canonical_url) {
                citations.push(Citation {
                    source_name: item.content.source_name.clone(),
                    url: item.content.canonical_url.clone(),
                });
            }
        }
    }

    if citations.is_empty() {
        for item in items {
            if !citations.iter().any(|c| c.url == item.content.canonical_url) {
                citations.push(Citation {
                    source_name: item.content.source_name.clone(),
                    url: item.content.canonical_url.clone(),
                });
            }
        }
    }
    citations
}
