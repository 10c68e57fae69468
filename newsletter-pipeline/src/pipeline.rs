use crate::assembler::Assembler;
use crate::config::NewsletterConfig;
use crate::extract::{ocr::TesseractRecognizer, Extractor};
use crate::fetcher::Fetcher;
use crate::instructions::parse_instruction_plan;
use crate::links::note_number;
use crate::llm_adapter::BackendChain;
use crate::orchestrator::{Orchestrator, SectionReport};
use crate::publish::GoogleDocsPublisher;
use crate::resolver::{self, Placement};
use crate::session::SessionCache;
use crate::style::StyleGuide;
use crate::traits::{DocumentPublisher, PublishedDocument, TextRecognizer};
use crate::types::{
    FetchFailureKind, FetchStatus, HintOrigin, NewsletterDocument, PublishOperationSet, Result,
    SectionHint, SourceLink, SubmittedContent,
};
use crate::utils;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Auth,
    Extraction,
}

/// A link excluded from the run and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFailure {
    pub position: usize,
    pub url: String,
    pub stage: FailureStage,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateLink {
    pub position: usize,
    pub url: String,
    pub kept_position: usize,
}

/// Everything that happened in one run, serialisable to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub link_failures: Vec<LinkFailure>,
    pub duplicates: Vec<DuplicateLink>,
    pub placements: Vec<Placement>,
    pub section_reports: Vec<SectionReport>,
    pub document: NewsletterDocument,
    pub operations: PublishOperationSet,
    pub published: Option<PublishedDocument>,
}

/// Inputs of one newsletter run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub links: Vec<SourceLink>,
    pub instructions: Option<String>,
    pub sponsor: Option<String>,
    pub dry_run: bool,
}

impl RunRequest {
    pub fn new(links: Vec<SourceLink>) -> Self {
        Self {
            links,
            ..Default::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_sponsor(mut self, sponsor: impl Into<String>) -> Self {
        self.sponsor = Some(sponsor.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Acquisition through publishing for one set of links.
pub struct NewsletterPipeline {
    config: Arc<NewsletterConfig>,
    fetcher: Fetcher,
    extractor: Extractor,
    chain: BackendChain,
    style: Arc<StyleGuide>,
    assembler: Assembler,
    publisher: Arc<dyn DocumentPublisher>,
}

impl NewsletterPipeline {
    pub fn new(config: Arc<NewsletterConfig>) -> Result<Self> {
        let fetcher = Fetcher::new(config.clone())?;

        let mut extractor = Extractor::new(config.extraction.clone());
        if config.extraction.ocr_enabled {
            let timeout = Duration::from_secs(config.fetch.operation_timeout_seconds);
            extractor = extractor.with_recognizer(Arc::new(
                TesseractRecognizer::new(config.extraction.ocr_language.clone())
                    .with_timeout(timeout),
            ));
        }

        let style = StyleGuide::load(config.style_guide_path.as_deref(), &config.generation)?;
        let publisher = GoogleDocsPublisher::new(&config.publish)?;

        Ok(Self {
            fetcher,
            extractor,
            chain: BackendChain::from_config(&config.generation),
            style: Arc::new(style),
            assembler: Assembler::new(config.generation.headline_symbol.clone()),
            publisher: Arc::new(publisher),
            config,
        })
    }

    pub fn with_backends(mut self, chain: BackendChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.extractor = Extractor::new(self.config.extraction.clone()).with_recognizer(recognizer);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn DocumentPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Run every stage. Per-link and per-section problems end up in the
    /// report; assembly and publishing problems fail the run.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting run {} with {} link(s)", run_id, request.links.len());

        let (unique, mut duplicates) = dedup_links(&request.links);
        let (items, mut link_failures) = self.acquire(&unique).await;
        info!(
            "Acquired {} of {} unique link(s); {} failed",
            items.len(),
            unique.len(),
            link_failures.len()
        );

        let (hints, editor_notes) = collect_hints(&unique, request.instructions.as_deref());
        let resolution = resolver::resolve_with_report(&items, &hints);
        for duplicate in &resolution.duplicates {
            duplicates.push(DuplicateLink {
                position: duplicate.position,
                url: duplicate.canonical_url.clone(),
                kept_position: duplicate.kept_position,
            });
        }
        duplicates.sort_by_key(|d| d.position);
        link_failures.sort_by_key(|f| f.position);

        let orchestrator = Orchestrator::new(
            self.chain.clone(),
            self.style.clone(),
            self.config.generation.clone(),
        )
        .with_editor_notes(editor_notes);
        let outcome = orchestrator.generate(&resolution.assignment).await;

        let sponsor = request
            .sponsor
            .as_deref()
            .or(self.config.sponsor_paragraph.as_deref());
        let document = self.assembler.assemble(
            &self.config.document_title,
            sponsor,
            outcome.lead,
            outcome.sections,
            &self.config.closing_text,
        )?;
        let operations = self.assembler.plan(&document);

        let published = if request.dry_run {
            info!(
                "Dry run: {} operation(s) planned, nothing published",
                operations.operations.len()
            );
            None
        } else {
            info!("Publishing through {}", self.publisher.publisher_name());
            let published = self
                .publisher
                .publish(&document.title, &self.config.target_container, &operations)
                .await
                .map_err(|e| {
                    error!("Publishing failed: {}", e);
                    e
                })?;
            Some(published)
        };

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: request.dry_run,
            link_failures,
            duplicates,
            placements: resolution.placements,
            section_reports: outcome.reports,
            document,
            operations,
            published,
        })
    }

    /// Fetch and extract links concurrently, keeping submission order.
    async fn acquire(
        &self,
        links: &[(usize, SourceLink)],
    ) -> (Vec<SubmittedContent>, Vec<LinkFailure>) {
        let sessions = SessionCache::new();
        let sessions = &sessions;
        let budget = Duration::from_secs(self.config.fetch.operation_timeout_seconds);

        let results: Vec<_> = stream::iter(links.iter())
            .map(|(position, link)| async move {
                let failure = |stage, kind: &str, reason: String| LinkFailure {
                    position: *position,
                    url: link.url.clone(),
                    stage,
                    kind: kind.to_string(),
                    reason,
                };

                let document = self.fetcher.fetch(link, sessions).await;
                if let FetchStatus::Failed(failed) = &document.status {
                    let (stage, kind) = match failed.kind {
                        FetchFailureKind::Auth => (FailureStage::Auth, "login_failed"),
                        FetchFailureKind::Transient => (FailureStage::Fetch, "transient"),
                        FetchFailureKind::Permanent => (FailureStage::Fetch, "permanent"),
                    };
                    return Err(failure(stage, kind, failed.reason.clone()));
                }

                match tokio::time::timeout(budget, self.extractor.extract(&document)).await {
                    Ok(Ok(content)) => Ok(SubmittedContent {
                        position: *position,
                        content,
                    }),
                    Ok(Err(e)) => {
                        warn!("Extraction failed for {}: {}", link.url, e);
                        Err(failure(FailureStage::Extraction, e.kind_name(), e.to_string()))
                    }
                    Err(_) => {
                        warn!("Extraction of {} exceeded {:?}", link.url, budget);
                        Err(failure(
                            FailureStage::Extraction,
                            "transient",
                            format!("extraction timed out after {}s", budget.as_secs()),
                        ))
                    }
                }
            })
            .buffered(self.config.fetch.max_concurrency.max(1))
            .collect()
            .await;

        for (domain, reason) in sessions.disabled_domains().await {
            warn!("Domain {} disabled for this run: {}", domain, reason);
        }

        let mut items = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(item) => items.push(item),
                Err(failure) => failures.push(failure),
            }
        }
        (items, failures)
    }
}

/// Keep the first link per normalised URL, with its submission position.
pub fn dedup_links(links: &[SourceLink]) -> (Vec<(usize, SourceLink)>, Vec<DuplicateLink>) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();

    for (position, link) in links.iter().enumerate() {
        let key = utils::url::normalize(&link.url);
        match seen.get(&key) {
            Some(&kept_position) => {
                info!("Link {} repeats link {}: {}", position + 1, kept_position + 1, link.url);
                duplicates.push(DuplicateLink {
                    position,
                    url: link.url.clone(),
                    kept_position,
                });
            }
            None => {
                seen.insert(key, position);
                unique.push((position, link.clone()));
            }
        }
    }
    (unique, duplicates)
}

/// Section hints from the links themselves and the free-form instructions,
/// plus free-text link notes for the prompts.
pub fn collect_hints(
    links: &[(usize, SourceLink)],
    instructions: Option<&str>,
) -> (Vec<SectionHint>, HashMap<usize, String>) {
    let mut hints = Vec::new();
    let mut editor_notes = HashMap::new();

    for (position, link) in links {
        let numbered = link.note.as_deref().and_then(note_number);
        if let Some(section) = &link.assigned_section {
            hints.push(SectionHint {
                position: *position,
                section: section.clone(),
                note: numbered,
                origin: HintOrigin::Link,
            });
        }
        if let (Some(note), None) = (&link.note, numbered) {
            editor_notes.insert(*position, note.clone());
        }
    }

    let hints = match instructions {
        Some(text) => parse_instruction_plan(text).merge(hints),
        None => hints,
    };
    (hints, editor_notes)
}
