mod common;

use common::*;
use newsletter_pipeline::config::GenerationConfig;
use newsletter_pipeline::orchestrator::{group_notes, GenerationState};
use newsletter_pipeline::style::{cited_names, numeric_facts, trailing_citation, Violation};
use newsletter_pipeline::types::*;
use newsletter_pipeline::{Backend, BackendChain, Orchestrator, StyleGuide};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn style() -> StyleGuide {
    StyleGuide::from_config(&GenerationConfig::default(), None)
}

fn allowed(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn item(position: usize, note: Option<u32>, source: &str, body: &str) -> AssignedItem {
    AssignedItem {
        position,
        note,
        content: content(
            position,
            &format!("https://example.com/materia-{}", position),
            &format!("Matéria {}", position),
            body,
            source,
        )
        .content,
    }
}

/// Two items in sales, one in world, every body quoting a number.
fn sample_assignment() -> SectionAssignment {
    let mut assignment = SectionAssignment::default();
    assignment.push(
        SectionName::SalesAndLeasing,
        item(0, None, "Valor Econômico", "As vendas de imóveis cresceram 12,5% no trimestre."),
    );
    assignment.push(
        SectionName::SalesAndLeasing,
        item(1, None, "Exame", "O aluguel residencial subiu 0,8% em setembro."),
    );
    assignment.push(
        SectionName::World,
        item(2, None, "Estadão", "Preços na China recuaram 3,1% no ano."),
    );
    assignment
}

fn orchestrator(chain: BackendChain) -> Orchestrator {
    Orchestrator::new(chain, Arc::new(style()), GenerationConfig::default())
}

#[test]
fn test_compliant_note_passes() {
    let text = format!("{} com alta de 12,5% no período (Valor Econômico).", filler(140));
    let violations = style().validate(
        &text,
        TextKind::DetailedNote,
        &allowed(&["Valor Econômico"]),
        &["12,5%".to_string()],
    );
    assert!(violations.is_empty(), "unexpected violations: {:?}", violations);
}

#[test]
fn test_note_rules() {
    let style = style();
    let sources = allowed(&["Valor Econômico"]);

    let short =
        style.validate("Vendas sobem (Valor Econômico).", TextKind::DetailedNote, &sources, &[]);
    assert!(matches!(short[0], Violation::TooShort { words: 4, min: 120 }));

    let listed = format!("{} (Valor Econômico).\n- primeiro ponto (Valor Econômico).", filler(130));
    let violations = style.validate(&listed, TextKind::DetailedNote, &sources, &[]);
    assert!(violations.contains(&Violation::MultipleParagraphs { paragraphs: 2 }));
    assert!(violations.contains(&Violation::ListStructure));

    let uncited = filler(150);
    let violations = style.validate(&uncited, TextKind::DetailedNote, &sources, &[]);
    assert_eq!(violations, vec![Violation::MissingCitation { paragraph: 1 }]);

    let foreign = format!("{} (Folha de S.Paulo).", filler(150));
    let violations = style.validate(&foreign, TextKind::DetailedNote, &sources, &[]);
    assert_eq!(
        violations,
        vec![Violation::UnknownCitation {
            name: "Folha de S.Paulo".to_string()
        }]
    );

    let missing_number = format!("{} (Valor Econômico).", filler(150));
    let violations = style.validate(
        &missing_number,
        TextKind::DetailedNote,
        &sources,
        &["12,5%".to_string()],
    );
    assert!(matches!(violations.as_slice(), [Violation::MissingNumericFacts { .. }]));
}

#[test]
fn test_markup_is_forbidden() {
    let style = style();
    let sources = allowed(&["Exame"]);
    let text = format!("**Destaque** {} veja [aqui](https://x.y) (Exame).", filler(140));

    let violations = style.validate(&text, TextKind::DetailedNote, &sources, &[]);

    assert!(violations.contains(&Violation::ForbiddenMarkup { marker: "*".to_string() }));
    assert!(violations.contains(&Violation::ForbiddenMarkup {
        marker: "[texto](url)".to_string()
    }));
}

#[test]
fn test_citation_matching_ignores_accents_and_case() {
    let text = format!("{} (valor economico).", filler(150));
    let violations =
        style().validate(&text, TextKind::DetailedNote, &allowed(&["Valor Econômico"]), &[]);
    assert!(violations.is_empty());
}

#[test]
fn test_headline_rules() {
    let style = style();
    let sources = allowed(&["Exame"]);

    assert!(style
        .validate("▪ Lançamentos batem recorde (Exame)", TextKind::Headline, &sources, &[])
        .is_empty());

    // The marker does not count toward the limit
    let exact = format!("{} (Exame)", "a".repeat(52));
    assert_eq!(exact.chars().count(), 60);
    assert!(style
        .validate(&format!("▪ {}", exact), TextKind::Headline, &sources, &[])
        .is_empty());

    let long = format!("{} (Exame)", "a".repeat(60));
    assert_eq!(
        style.validate(&long, TextKind::Headline, &sources, &[]),
        vec![Violation::HeadlineTooLong { chars: 68, max: 60 }]
    );

    let two_lines = "Vendas sobem (Exame)\nAluguel cai (Exame)";
    assert!(style
        .validate(two_lines, TextKind::Headline, &sources, &[])
        .contains(&Violation::MultiLine));

    assert_eq!(style.validate("   ", TextKind::Headline, &sources, &[]), vec![Violation::Empty]);
}

#[test]
fn test_lead_bounds() {
    let style = style();
    let sources = allowed(&["Exame"]);
    let paragraph = format!("{} (Exame).", filler(60));
    let short_lead = vec![paragraph.clone(); 4].join("\n\n");
    let lead = vec![paragraph; 8].join("\n\n");

    assert!(matches!(
        style.validate(&short_lead, TextKind::Lead, &sources, &[]).as_slice(),
        [Violation::TooShort { .. }]
    ));
    assert!(style.validate(&lead, TextKind::Lead, &sources, &[]).is_empty());
}

#[test]
fn test_numeric_fact_and_citation_helpers() {
    let facts = numeric_facts([
        "As vendas tiveram alta de 12,5% e somaram R$ 2,3 bilhões.",
        "Nos EUA, o fundo aportou US$ 500 mil; a alta foi de 12,5 %.",
    ]);
    assert_eq!(facts, vec!["12,5%", "R$ 2,3 bilhões", "US$ 500 mil"]);

    assert_eq!(
        trailing_citation("Texto qualquer (Valor Econômico e Exame)."),
        Some(vec!["Valor Econômico".to_string(), "Exame".to_string()])
    );
    assert_eq!(trailing_citation("Sem fonte no fim."), None);
    assert_eq!(
        cited_names("Um (Exame).\nDois (Estadão, exame)."),
        vec!["Exame".to_string(), "Estadão".to_string()]
    );
}

#[test]
fn test_notes_grouped_by_number_in_submission_order() {
    let items = vec![
        item(4, Some(2), "Exame", "b"),
        item(1, Some(1), "Exame", "a"),
        item(6, None, "Exame", "c"),
        item(3, Some(1), "Exame", "d"),
    ];

    let groups: Vec<Vec<usize>> = group_notes(&items)
        .iter()
        .map(|g| g.iter().map(|i| i.position).collect())
        .collect();

    assert_eq!(groups, vec![vec![1, 3], vec![4], vec![6]]);
}

#[tokio::test]
async fn test_generates_every_section_in_order() {
    init_tracing();
    let calls: Arc<Mutex<Vec<(TextKind, SectionName, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = calls.clone();
    let backend = Backend::scripted("primary", move |prompt| {
        recorder
            .lock()
            .expect("recorder lock")
            .push((prompt.kind, prompt.section, prompt.summarize.is_some()));
        Ok(compliant_text(prompt))
    });

    let outcome = orchestrator(BackendChain::new().with_primary(backend))
        .generate(&sample_assignment())
        .await;

    assert_eq!(outcome.lead.compliance, Compliance::Compliant);
    assert_eq!(outcome.lead.source_citations.len(), 3);
    assert_eq!(outcome.sections.len(), 2);

    let sales = &outcome.sections[0];
    assert_eq!(sales.name, SectionName::SalesAndLeasing);
    assert_eq!(sales.notes.len(), 2);
    assert_eq!(sales.headlines.len(), 2);
    assert!(!sales.incomplete);
    assert_eq!(
        sales.notes[0].source_citations,
        vec![Citation {
            source_name: "Valor Econômico".to_string(),
            url: "https://example.com/materia-0".to_string(),
        }]
    );
    assert!(sales.notes[0].text.contains("12,5%"));
    assert!(sales.headlines[1].text.ends_with("(Exame)"));
    assert_eq!(outcome.sections[1].name, SectionName::World);

    assert_eq!(outcome.reports.len(), 7);
    assert!(outcome
        .reports
        .iter()
        .all(|r| r.state == GenerationState::Accepted && r.attempts == 1 && r.compliant));

    let calls = calls.lock().expect("recorder lock").clone();
    assert_eq!(
        calls,
        vec![
            (TextKind::Lead, SectionName::Lead, false),
            (TextKind::DetailedNote, SectionName::SalesAndLeasing, false),
            (TextKind::Headline, SectionName::SalesAndLeasing, true),
            (TextKind::DetailedNote, SectionName::SalesAndLeasing, false),
            (TextKind::Headline, SectionName::SalesAndLeasing, true),
            (TextKind::DetailedNote, SectionName::World, false),
            (TextKind::Headline, SectionName::World, true),
        ]
    );
}

#[tokio::test]
async fn test_retry_carries_feedback() {
    init_tracing();
    let backend = Backend::scripted("primary", |prompt| {
        if prompt.feedback.is_empty() {
            Ok(broken_text(prompt))
        } else {
            Ok(compliant_text(prompt))
        }
    });

    let outcome = orchestrator(BackendChain::new().with_primary(backend))
        .generate(&sample_assignment())
        .await;

    assert_eq!(outcome.lead.compliance, Compliance::Compliant);
    assert!(outcome.reports.iter().all(|r| r.attempts == 2 && r.compliant));
    assert!(outcome.reports.iter().all(|r| !r.fallback_used));
}

#[tokio::test]
async fn test_backend_errors_count_as_attempts() {
    init_tracing();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let backend = Backend::scripted("flaky", move |prompt| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(GenerationError::BackendError {
                backend: "flaky".to_string(),
                reason: "HTTP 500".to_string(),
            })
        } else {
            Ok(compliant_text(prompt))
        }
    });
    let mut assignment = SectionAssignment::default();
    assignment.push(
        SectionName::World,
        item(0, None, "Estadão", "Preços na China recuaram 3,1% no ano."),
    );

    let outcome = orchestrator(BackendChain::new().with_primary(backend))
        .generate(&assignment)
        .await;

    assert_eq!(outcome.reports[0].kind, TextKind::Lead);
    assert_eq!(outcome.reports[0].attempts, 2);
    assert!(outcome.reports[0].compliant);
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_secondary_backend_takes_over() {
    init_tracing();
    let chain = BackendChain::new()
        .with_primary(broken_backend("primary"))
        .with_secondary(compliant_backend("secondary"));

    let outcome = orchestrator(chain).generate(&sample_assignment()).await;

    assert_eq!(outcome.lead.compliance, Compliance::Compliant);
    assert!(outcome.lead.fallback_used);
    assert_eq!(outcome.lead.backend.as_deref(), Some("scripted:secondary"));
    for report in &outcome.reports {
        assert!(report.compliant);
        assert!(report.fallback_used);
        // Three primary attempts, then one fallback attempt
        assert_eq!(report.attempts, 4);
    }
}

#[tokio::test]
async fn test_unavailable_primary_falls_back_immediately() {
    init_tracing();
    let chain = BackendChain::new()
        .with_primary(unavailable_backend("primary"))
        .with_secondary(compliant_backend("secondary"));

    let outcome = orchestrator(chain).generate(&sample_assignment()).await;

    assert!(outcome.reports.iter().all(|r| r.attempts == 2 && r.fallback_used && r.compliant));
}

#[tokio::test]
async fn test_no_backend_marks_everything_incomplete() {
    init_tracing();
    let chain = BackendChain::new()
        .with_primary(unavailable_backend("primary"))
        .with_secondary(unavailable_backend("secondary"));

    let outcome = orchestrator(chain).generate(&sample_assignment()).await;

    assert!(outcome.lead.is_incomplete());
    assert_eq!(outcome.sections.len(), 2);
    for section in &outcome.sections {
        assert!(section.incomplete);
        assert!(section.headlines.is_empty());
        assert!(section.notes.iter().all(|n| n.is_incomplete()));
    }
    assert!(outcome
        .reports
        .iter()
        .all(|r| r.state == GenerationState::Failed && r.backend.is_none()));
}

#[tokio::test]
async fn test_exhausted_retries_keep_best_draft() {
    init_tracing();
    let mut assignment = SectionAssignment::default();
    assignment.push(
        SectionName::SalesAndLeasing,
        item(0, None, "Valor Econômico", "As vendas de imóveis cresceram 12,5% no trimestre."),
    );

    let outcome = orchestrator(BackendChain::new().with_primary(broken_backend("primary")))
        .generate(&assignment)
        .await;

    let note = &outcome.sections[0].notes[0];
    assert_eq!(note.compliance, Compliance::NonCompliant);
    assert_eq!(note.text, "**Destaque**\n- item solto\n- outro item");
    assert!(!note.source_citations.is_empty());

    let report = outcome
        .reports
        .iter()
        .find(|r| r.kind == TextKind::DetailedNote)
        .expect("note report");
    assert_eq!(report.state, GenerationState::Failed);
    assert_eq!(report.attempts, 3);
    assert!(!report.violations.is_empty());

    assert!(outcome.sections[0].headlines.is_empty());
    assert!(!outcome.reports.iter().any(|r| r.kind == TextKind::Headline));
}

#[tokio::test]
async fn test_dropped_numbers_are_rejected() {
    init_tracing();
    let backend = Backend::scripted("primary", |prompt| {
        Ok(format!("{} ({}).", filler(140), prompt.allowed_sources().join(", ")))
    });
    let items = vec![item(
        0,
        None,
        "Valor Econômico",
        "As vendas de imóveis cresceram 12,5% no trimestre.",
    )];

    let (text, report) = orchestrator(BackendChain::new().with_primary(backend))
        .generate_text(SectionName::SalesAndLeasing, TextKind::DetailedNote, Some(1), &items, None)
        .await;

    assert_eq!(text.compliance, Compliance::NonCompliant);
    assert_eq!(
        report.violations,
        vec![Violation::MissingNumericFacts {
            facts: vec!["12,5%".to_string()]
        }]
    );
}

#[test]
fn test_every_quoted_number_must_survive() {
    let facts: Vec<String> =
        ["12,5%", "4,1%", "R$ 2,3 bilhões"].iter().map(|f| f.to_string()).collect();
    let sources = allowed(&["Valor Econômico"]);
    let partial = format!("{} com alta de 12,5% no período (Valor Econômico).", filler(140));

    let violations = style().validate(&partial, TextKind::DetailedNote, &sources, &facts);

    assert_eq!(
        violations,
        vec![Violation::MissingNumericFacts {
            facts: vec!["4,1%".to_string(), "R$ 2,3 bilhões".to_string()]
        }]
    );

    let complete = format!(
        "{} com alta de 12,5%, juros de 4,1% e R$ 2,3 bilhões em lançamentos (Valor Econômico).",
        filler(140)
    );
    assert!(style().validate(&complete, TextKind::DetailedNote, &sources, &facts).is_empty());

    let lenient = StyleGuide::from_config(
        &GenerationConfig {
            numeric_fact_coverage: 0.3,
            ..GenerationConfig::default()
        },
        None,
    );
    assert!(lenient.validate(&partial, TextKind::DetailedNote, &sources, &facts).is_empty());
}

#[tokio::test]
async fn test_lead_sources_get_longer_excerpts() {
    init_tracing();
    let prompts: Arc<Mutex<Vec<(TextKind, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = prompts.clone();
    let backend = Backend::scripted("primary", move |prompt| {
        let longest = prompt.sources.iter().map(|s| s.excerpt.chars().count()).max().unwrap_or(0);
        recorder.lock().expect("recorder lock").push((prompt.kind, longest));
        Ok(compliant_text(prompt))
    });
    let mut assignment = SectionAssignment::default();
    assignment.push(
        SectionName::SalesAndLeasing,
        item(0, None, "Valor Econômico", &filler(1500)),
    );
    let config = GenerationConfig {
        excerpt_chars: 500,
        lead_excerpt_chars: 2000,
        ..GenerationConfig::default()
    };

    Orchestrator::new(BackendChain::new().with_primary(backend), Arc::new(style()), config)
        .generate(&assignment)
        .await;

    let prompts = prompts.lock().expect("recorder lock").clone();
    let excerpt = |kind: TextKind| prompts.iter().find(|(k, _)| *k == kind).map(|(_, len)| *len);
    let lead = excerpt(TextKind::Lead).expect("lead prompt");
    let note = excerpt(TextKind::DetailedNote).expect("note prompt");
    assert!(lead > 1500, "lead excerpt only {} chars", lead);
    assert!(note < 600, "note excerpt {} chars", note);
}

#[tokio::test]
async fn test_shared_note_cites_every_source() {
    init_tracing();
    let mut assignment = SectionAssignment::default();
    assignment.push(
        SectionName::ConstructionAndDevelopment,
        item(0, Some(1), "Valor Econômico", "Lançamentos somaram R$ 2,3 bilhões."),
    );
    assignment.push(
        SectionName::ConstructionAndDevelopment,
        item(1, Some(1), "Exame", "Construtoras ampliaram lançamentos em 9%."),
    );

    let outcome = orchestrator(BackendChain::new().with_primary(compliant_backend("primary")))
        .generate(&assignment)
        .await;

    let section = &outcome.sections[0];
    assert_eq!(section.notes.len(), 1);
    assert_eq!(section.headlines.len(), 1);
    let urls: Vec<&str> =
        section.notes[0].source_citations.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(urls, vec!["https://example.com/materia-0", "https://example.com/materia-1"]);
}

#[tokio::test]
async fn test_empty_assignment_leaves_lead_incomplete() {
    init_tracing();
    let outcome = orchestrator(BackendChain::new().with_primary(compliant_backend("primary")))
        .generate(&SectionAssignment::default())
        .await;

    assert!(outcome.lead.is_incomplete());
    assert!(outcome.sections.is_empty());
    assert!(outcome.reports.is_empty());
}
