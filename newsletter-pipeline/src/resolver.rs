use crate::types::{AssignedItem, SectionAssignment, SectionHint, SectionName, SubmittedContent};
use crate::utils::text::fold;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Accepted spellings per section, compared after folding and dropping
/// everything but letters and digits.
const SECTION_ALIASES: &[(SectionName, &[&str])] = &[
    (
        SectionName::Lead,
        &["lead", "abertura", "materiadeabertura", "opening"],
    ),
    (
        SectionName::SalesAndLeasing,
        &[
            "salesandleasing",
            "sales",
            "leasing",
            "vendaselocacao",
            "vendaselocacoes",
            "vendas",
            "locacao",
        ],
    ),
    (
        SectionName::ConstructionAndDevelopment,
        &[
            "constructionanddevelopment",
            "construction",
            "development",
            "construcaoeincorporacao",
            "construcao",
            "incorporacao",
        ],
    ),
    (
        SectionName::World,
        &["world", "mundo", "internacional", "international"],
    ),
    (
        SectionName::WatchingClosely,
        &["watchingclosely", "estamosdeolho", "deolho", "radar"],
    ),
];

/// Topic keywords for items the editor did not place. A keyword matches a
/// word starting with it, or a phrase when it contains a space.
const TOPIC_KEYWORDS: &[(SectionName, &[&str])] = &[
    (
        SectionName::SalesAndLeasing,
        &[
            "venda", "vende", "locacao", "aluguel", "alugueis", "locatario", "inquilino",
            "comprador", "financiamento", "credito imobiliario", "imovel usado", "sales", "rent",
            "lease",
        ],
    ),
    (
        SectionName::ConstructionAndDevelopment,
        &[
            "construcao", "construtora", "incorporacao", "incorporadora", "obra", "canteiro",
            "lancamento", "empreendimento", "loteamento", "construction", "developer",
        ],
    ),
    (
        SectionName::World,
        &[
            "mundo", "internacional", "exterior", "global", "estados unidos", "eua", "china",
            "europa", "world", "international",
        ],
    ),
];

/// Characters of body text considered by the keyword heuristic.
const HEURISTIC_WINDOW: usize = 2000;

/// Map a free-form label onto the taxonomy; `None` when unrecognised.
pub fn parse_section_label(label: &str) -> Option<SectionName> {
    let compact: String = fold(label).chars().filter(|c| c.is_alphanumeric()).collect();
    if compact.is_empty() {
        return None;
    }
    SECTION_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&compact.as_str()))
        .map(|(section, _)| *section)
}

/// Best thematic match for an item, defaulting to the catch-all section.
pub fn classify(title: &str, body: &str) -> SectionName {
    let window: String = body.chars().take(HEURISTIC_WINDOW).collect();
    let folded = fold(&format!("{} {}", title, window));
    let words: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = format!(" {} ", words.join(" "));

    let mut best = (SectionName::DEFAULT, 0usize);
    for (section, keywords) in TOPIC_KEYWORDS {
        let hits: usize = keywords
            .iter()
            .map(|keyword| {
                if keyword.contains(' ') {
                    joined.matches(&format!(" {} ", keyword)).count()
                } else {
                    words.iter().filter(|w| w.starts_with(keyword)).count()
                }
            })
            .sum();
        // Ties keep the earlier section in taxonomy order
        if hits > best.1 {
            best = (*section, hits);
        }
    }
    best.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementReason {
    Hint,
    Heuristic,
    /// Conflicting or unrecognised hints
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub position: usize,
    pub section: SectionName,
    pub reason: PlacementReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duplicate {
    pub position: usize,
    pub canonical_url: String,
    pub kept_position: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub assignment: SectionAssignment,
    pub placements: Vec<Placement>,
    pub duplicates: Vec<Duplicate>,
}

/// Place every item in exactly one section.
pub fn resolve(items: &[SubmittedContent], hints: &[SectionHint]) -> SectionAssignment {
    resolve_with_report(items, hints).assignment
}

pub fn resolve_with_report(items: &[SubmittedContent], hints: &[SectionHint]) -> Resolution {
    let mut ordered: Vec<&SubmittedContent> = items.iter().collect();
    ordered.sort_by_key(|item| item.position);

    let mut by_position: HashMap<usize, Vec<&SectionHint>> = HashMap::new();
    for hint in hints {
        by_position.entry(hint.position).or_default().push(hint);
    }

    let mut resolution = Resolution::default();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for item in ordered {
        let canonical = item.content.canonical_url.as_str();
        if let Some(&kept_position) = seen.get(canonical) {
            info!(
                "Dropping duplicate of link {} at position {}: {}",
                kept_position + 1,
                item.position + 1,
                canonical
            );
            resolution.duplicates.push(Duplicate {
                position: item.position,
                canonical_url: canonical.to_string(),
                kept_position,
            });
            continue;
        }
        seen.insert(canonical, item.position);

        let item_hints = by_position.get(&item.position).map(Vec::as_slice).unwrap_or(&[]);
        let (section, note, reason) = place(item, item_hints);

        debug!(
            "Link {} -> {} ({:?})",
            item.position + 1,
            section.identifier(),
            reason
        );
        resolution.placements.push(Placement {
            position: item.position,
            section,
            reason,
        });
        resolution.assignment.push(
            section,
            AssignedItem {
                position: item.position,
                note,
                content: item.content.clone(),
            },
        );
    }

    info!(
        "Resolved {} item(s) into {} section(s), {} duplicate(s)",
        resolution.assignment.total_items(),
        resolution.assignment.populated().count(),
        resolution.duplicates.len()
    );
    resolution
}

fn place(
    item: &SubmittedContent,
    hints: &[&SectionHint],
) -> (SectionName, Option<u32>, PlacementReason) {
    if hints.is_empty() {
        let section = classify(&item.content.title, &item.content.body_text);
        return (section, None, PlacementReason::Heuristic);
    }

    let parsed: Vec<Option<SectionName>> =
        hints.iter().map(|h| parse_section_label(&h.section)).collect();
    let first = parsed[0];
    let agreed = first.filter(|section| parsed.iter().all(|p| *p == Some(*section)));

    match agreed {
        Some(section) => {
            let note = hints.iter().find_map(|h| h.note);
            (section, note, PlacementReason::Hint)
        }
        None => {
            let labels: Vec<&str> = hints.iter().map(|h| h.section.as_str()).collect();
            warn!(
                "Link {} has unusable section hint(s) {:?}; placing in {}",
                item.position + 1,
                labels,
                SectionName::DEFAULT.identifier()
            );
            (SectionName::DEFAULT, None, PlacementReason::FailClosed)
        }
    }
}
