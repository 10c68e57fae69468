//! Reads the editor's free-form placement instructions.
//!
//! Understood phrasing (case and accents ignored, link numbers are 1-based):
//! - "A matéria de abertura deve usar os dois primeiros links." / "os primeiros N links"
//! - "A Matéria de Abertura deve OBRIGATORIAMENTE usar o link 3." (wins over the above)
//! - "O bloco Vendas e Locação deve ter 2 notas." opens a section for what follows
//! - "A primeira nota deve usar os links 5 e 6." / "A nota 2 deve usar o link 7."
//! - "Ao final do bloco, escreva as manchetes dos links 10, 11 e 12."
//! - "O bloco Agenda deve usar os links 8 e 9."
//! - "3 => Mundo" or "3: Mundo" on its own line

use crate::types::{HintOrigin, SectionHint};
use crate::utils::text::fold;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

static LINE_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*(?:=>|:)\s*(.+?)\s*$").expect("line form regex"));
static BLOCK_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bo bloco\s+(.+?)\s+deve\s+(ter|usar)\b").expect("block regex")
});
static ORDINAL_NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:a\s+)?(\w+)\s+nota\s+deve\s+usar\b").expect("ordinal note regex")
});
static NUMBERED_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnota\s+(\d+)\s+deve\s+usar\b").expect("numbered note regex"));
static FIRST_LINKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:os\s+)?(\w+)\s+primeiros\s+links\b|\bprimeiros\s+(\w+)\s+links\b|\bprimeiro\s+link\b")
        .expect("first links regex")
});
static LINK_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\blinks?\b(.*)").expect("link list regex"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number regex"));

const LEAD_LABEL: &str = "Lead";

fn number_word(word: &str) -> Option<u32> {
    if let Ok(n) = word.parse::<u32>() {
        return Some(n);
    }
    let n = match word {
        "um" | "uma" | "primeiro" | "primeira" => 1,
        "dois" | "duas" | "segundo" | "segunda" => 2,
        "tres" | "terceiro" | "terceira" => 3,
        "quatro" | "quarto" | "quarta" => 4,
        "cinco" | "quinto" | "quinta" => 5,
        "seis" | "sexto" | "sexta" => 6,
        "sete" | "setimo" | "setima" => 7,
        "oito" | "oitavo" | "oitava" => 8,
        "nove" | "nono" | "nona" => 9,
        "dez" | "decimo" | "decima" => 10,
        _ => return None,
    };
    Some(n)
}

/// 1-based link numbers cited after "link"/"links" in a sentence.
fn cited_links(sentence: &str) -> Vec<usize> {
    let Some(tail) = LINK_LIST.captures(sentence).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    NUMBER
        .find_iter(tail.as_str())
        .filter_map(|m| m.as_str().parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .collect()
}

fn hint(link_number: usize, section: &str, note: Option<u32>) -> SectionHint {
    SectionHint {
        position: link_number - 1,
        section: section.to_string(),
        note,
        origin: HintOrigin::Instruction,
    }
}

/// Placements read from instructions, with the lead rules kept apart so
/// they can be weighed against sections typed next to the links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionPlan {
    pub hints: Vec<SectionHint>,
    /// 1-based links for the lead when nothing else places them
    pub lead_default: Vec<usize>,
    /// 1-based links the lead must use, replacing any other placement
    pub lead_mandatory: Option<Vec<usize>>,
}

impl InstructionPlan {
    /// Merge with the hints typed next to links. A mandatory lead replaces
    /// every hint for its links; the default lead only takes links nothing
    /// else placed.
    pub fn merge(self, link_hints: Vec<SectionHint>) -> Vec<SectionHint> {
        let mut hints = link_hints;
        hints.extend(self.hints);

        let lead_links = match self.lead_mandatory {
            Some(links) => {
                let forced: HashSet<usize> = links.iter().map(|l| l - 1).collect();
                hints.retain(|h| !forced.contains(&h.position));
                links
            }
            None => {
                let placed: HashSet<usize> = hints.iter().map(|h| h.position).collect();
                self.lead_default
                    .into_iter()
                    .filter(|l| !placed.contains(&(l - 1)))
                    .collect()
            }
        };
        for link in lead_links {
            hints.push(hint(link, LEAD_LABEL, None));
        }
        hints
    }
}

/// Parse instructions into placement hints with 0-based positions.
pub fn parse_instructions(text: &str) -> Vec<SectionHint> {
    parse_instruction_plan(text).merge(Vec::new())
}

pub fn parse_instruction_plan(text: &str) -> InstructionPlan {
    let mut hints = Vec::new();
    let mut lead_default: Vec<usize> = Vec::new();
    let mut lead_override: Option<Vec<usize>> = None;
    let mut current_block: Option<String> = None;

    for line in text.lines() {
        let folded_line = fold(line);

        if let Some(caps) = LINE_FORM.captures(line) {
            if let Ok(number) = caps[1].parse::<usize>() {
                if number >= 1 {
                    hints.push(hint(number, caps[2].trim(), None));
                    continue;
                }
            }
        }

        for sentence in folded_line.split(['.', ';', '!', '?']) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            if sentence.contains("materia de abertura") {
                if sentence.contains("obrigatoriamente") {
                    lead_override = Some(cited_links(sentence));
                } else if let Some(caps) = FIRST_LINKS.captures(sentence) {
                    let count = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .and_then(|m| number_word(m.as_str()))
                        .unwrap_or(1) as usize;
                    lead_default = (1..=count).collect();
                } else {
                    lead_default = cited_links(sentence);
                }
                continue;
            }

            if let Some(caps) = BLOCK_OPEN.captures(sentence) {
                let label = caps[1].trim().to_string();
                debug!("Instruction block opened: {}", label);
                if &caps[2] == "usar" {
                    for link in cited_links(sentence) {
                        hints.push(hint(link, &label, None));
                    }
                }
                current_block = Some(label);
                continue;
            }

            let section = current_block.clone().unwrap_or_default();

            if sentence.contains("ao final do bloco") && sentence.contains("manchete") {
                for link in cited_links(sentence) {
                    hints.push(hint(link, &section, None));
                }
                continue;
            }

            let note = NUMBERED_NOTE
                .captures(sentence)
                .and_then(|c| c[1].parse::<u32>().ok())
                .or_else(|| {
                    ORDINAL_NOTE
                        .captures(sentence)
                        .and_then(|c| number_word(&c[1]))
                });
            if let Some(note) = note {
                for link in cited_links(sentence) {
                    hints.push(hint(link, &section, Some(note)));
                }
            }
        }
    }

    debug!(
        "Parsed {} placement hint(s) from instructions, lead {:?}/{:?}",
        hints.len(),
        lead_override,
        lead_default
    );
    InstructionPlan {
        hints,
        lead_default,
        lead_mandatory: lead_override,
    }
}
