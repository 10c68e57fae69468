use crate::config::GenerationConfig;
use crate::types::{Result, TextKind};
use crate::utils::text::{fold, paragraphs, word_count};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// House rules embedded in every prompt when no style-guide file is configured.
pub const DEFAULT_RULES: &str = "\
Você é editor sênior de uma newsletter sobre o mercado imobiliário brasileiro.
- Escreva em português do Brasil, tom analítico e direto, sem adjetivos promocionais.
- Use apenas os fatos das fontes fornecidas para cada bloco; não misture fontes entre notas.
- Priorize indicadores e números; reproduza percentuais, valores em moeda e comparações entre períodos exatamente como aparecem nas fontes.
- Feche cada parágrafo, nota e manchete com a fonte entre parênteses, usando o nome do veículo, ex.: (Valor Econômico).
- Não use markdown: nada de asteriscos, sublinhados, cerquilhas ou crases.
- Notas são um único parágrafo corrido, sem listas ou marcadores.
- Manchetes são telegráficas, em uma única linha.";

static TRAILING_CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^()]+)\)\s*[.!]?\s*$").expect("citation regex"));
static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+(?:[.,]\d+)*\s?%").expect("percent regex"));
static CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:R\$|US\$|U\$|\$|€)\s?\d+(?:[.,]\d+)*(?:\s?(?:mil|milhões|milhão|bilhões|bilhão|trilhões|trilhão|bi|mi|tri)\b)?")
        .expect("currency regex")
});
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-•▪*]|\d+[.)])\s+").expect("list item regex"));
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]\([^)]*\)").expect("markdown link regex"));
static NAME_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?:,|;|/|\s+e\s+)\s*").expect("name separator regex"));

/// One broken rule in a draft, phrased for feedback to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    Empty,
    TooShort { words: usize, min: usize },
    TooLong { words: usize, max: usize },
    HeadlineTooLong { chars: usize, max: usize },
    MultiLine,
    MultipleParagraphs { paragraphs: usize },
    MissingCitation { paragraph: usize },
    UnknownCitation { name: String },
    ForbiddenMarkup { marker: String },
    ListStructure,
    MissingNumericFacts { facts: Vec<String> },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Empty => write!(f, "o texto veio vazio"),
            Violation::TooShort { words, min } => {
                write!(f, "o texto tem {} palavras; o mínimo é {}", words, min)
            }
            Violation::TooLong { words, max } => {
                write!(f, "o texto tem {} palavras; o máximo é {}", words, max)
            }
            Violation::HeadlineTooLong { chars, max } => {
                write!(f, "a manchete tem {} caracteres; o máximo é {}", chars, max)
            }
            Violation::MultiLine => write!(f, "a manchete deve ocupar uma única linha"),
            Violation::MultipleParagraphs { paragraphs } => {
                write!(f, "a nota tem {} parágrafos; escreva um único parágrafo", paragraphs)
            }
            Violation::MissingCitation { paragraph } => write!(
                f,
                "o parágrafo {} não termina com a fonte entre parênteses",
                paragraph
            ),
            Violation::UnknownCitation { name } => write!(
                f,
                "a fonte \"{}\" não está entre as fontes permitidas",
                name
            ),
            Violation::ForbiddenMarkup { marker } => {
                write!(f, "remova a marcação proibida \"{}\"", marker)
            }
            Violation::ListStructure => write!(f, "não use listas ou marcadores"),
            Violation::MissingNumericFacts { facts } => write!(
                f,
                "preserve os números das fontes: {}",
                facts.join(", ")
            ),
        }
    }
}

/// Shared, read-only rules for one run.
#[derive(Debug, Clone)]
pub struct StyleGuide {
    pub rules: String,
    pub lead_words: (usize, usize),
    pub note_words: (usize, usize),
    pub headline_max_chars: usize,
    pub headline_symbol: String,
    pub numeric_coverage: f64,
}

impl StyleGuide {
    pub fn from_config(generation: &GenerationConfig, rules: Option<String>) -> Self {
        Self {
            rules: rules.unwrap_or_else(|| DEFAULT_RULES.to_string()),
            lead_words: (generation.lead_min_words, generation.lead_max_words),
            note_words: generation.note_bounds(),
            headline_max_chars: generation.headline_max_chars,
            headline_symbol: generation.headline_symbol.clone(),
            numeric_coverage: generation.numeric_fact_coverage,
        }
    }

    /// Built-in rules, replaced by the file at `path` when given.
    pub fn load(path: Option<&Path>, generation: &GenerationConfig) -> Result<Self> {
        let rules = match path {
            Some(path) => {
                info!("Loading style guide from {}", path.display());
                Some(std::fs::read_to_string(path)?.trim().to_string())
            }
            None => None,
        };
        Ok(Self::from_config(generation, rules))
    }

    /// Human-readable bounds for a text kind, used in prompts.
    pub fn constraint_for(&self, kind: TextKind) -> String {
        match kind {
            TextKind::Lead => format!(
                "Entre {} e {} palavras, em 4 a 8 parágrafos; cada parágrafo termina com a fonte entre parênteses.",
                self.lead_words.0, self.lead_words.1
            ),
            TextKind::DetailedNote => format!(
                "Um único parágrafo de {} a {} palavras (fato + implicação prática para o mercado), terminando com a fonte entre parênteses.",
                self.note_words.0, self.note_words.1
            ),
            TextKind::Headline => format!(
                "Uma única linha de no máximo {} caracteres, telegráfica, terminando com a fonte entre parênteses. Não inclua o marcador {}.",
                self.headline_max_chars, self.headline_symbol
            ),
        }
    }

    /// Strip the headline marker and surrounding whitespace if the model added it.
    pub fn clean_headline<'a>(&self, text: &'a str) -> &'a str {
        let trimmed = text.trim();
        trimmed
            .strip_prefix(self.headline_symbol.as_str())
            .map(str::trim_start)
            .unwrap_or(trimmed)
    }

    /// Every hard constraint the draft breaks; empty when compliant.
    pub fn validate(
        &self,
        text: &str,
        kind: TextKind,
        allowed_sources: &[String],
        numeric_facts: &[String],
    ) -> Vec<Violation> {
        let text = match kind {
            TextKind::Headline => self.clean_headline(text),
            _ => text.trim(),
        };
        if text.is_empty() {
            return vec![Violation::Empty];
        }

        let mut violations = Vec::new();
        let words = word_count(text);
        let paras = paragraphs(text);

        match kind {
            TextKind::Lead => check_bounds(words, self.lead_words, &mut violations),
            TextKind::DetailedNote => {
                check_bounds(words, self.note_words, &mut violations);
                if paras.len() > 1 {
                    violations.push(Violation::MultipleParagraphs { paragraphs: paras.len() });
                }
                if paras.iter().any(|p| LIST_ITEM.is_match(p)) {
                    violations.push(Violation::ListStructure);
                }
            }
            TextKind::Headline => {
                if text.lines().count() > 1 {
                    violations.push(Violation::MultiLine);
                }
                let chars = text.chars().count();
                if chars > self.headline_max_chars {
                    violations.push(Violation::HeadlineTooLong {
                        chars,
                        max: self.headline_max_chars,
                    });
                }
            }
        }

        for (idx, paragraph) in paras.iter().enumerate() {
            match trailing_citation(paragraph) {
                None => violations.push(Violation::MissingCitation { paragraph: idx + 1 }),
                Some(names) => {
                    for name in names {
                        if !allowed_sources.iter().any(|s| same_name(s, &name)) {
                            violations.push(Violation::UnknownCitation { name });
                        }
                    }
                }
            }
        }

        violations.extend(forbidden_markup(text));

        if kind != TextKind::Headline && !numeric_facts.is_empty() {
            let flat = compact(text);
            let missing: Vec<&String> = numeric_facts
                .iter()
                .filter(|fact| !flat.contains(&compact(fact)))
                .collect();
            let kept = (numeric_facts.len() - missing.len()) as f64;
            if kept < self.numeric_coverage * numeric_facts.len() as f64 {
                violations.push(Violation::MissingNumericFacts {
                    facts: missing.into_iter().take(5).cloned().collect(),
                });
            }
        }

        violations
    }
}

fn check_bounds(words: usize, (min, max): (usize, usize), violations: &mut Vec<Violation>) {
    if words < min {
        violations.push(Violation::TooShort { words, min });
    } else if words > max {
        violations.push(Violation::TooLong { words, max });
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn same_name(a: &str, b: &str) -> bool {
    fold(a.trim()) == fold(b.trim())
}

/// Source names in the parenthetical closing a paragraph, if any.
pub fn trailing_citation(paragraph: &str) -> Option<Vec<String>> {
    let caps = TRAILING_CITATION.captures(paragraph.trim())?;
    let names: Vec<String> = NAME_SEPARATOR
        .split(caps[1].trim())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    (!names.is_empty()).then_some(names)
}

/// Distinct cited names across all paragraphs, in order of appearance.
pub fn cited_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for paragraph in paragraphs(text) {
        for name in trailing_citation(paragraph).unwrap_or_default() {
            if !names.iter().any(|n| same_name(n, &name)) {
                names.push(name);
            }
        }
    }
    names
}

fn forbidden_markup(text: &str) -> Vec<Violation> {
    let mut found = Vec::new();
    for marker in ['*', '`'] {
        if text.contains(marker) {
            found.push(Violation::ForbiddenMarkup {
                marker: marker.to_string(),
            });
        }
    }
    if text.split_whitespace().any(|w| w.starts_with('_') || w.ends_with('_')) {
        found.push(Violation::ForbiddenMarkup {
            marker: "_".to_string(),
        });
    }
    if text.lines().any(|line| line.trim_start().starts_with('#')) {
        found.push(Violation::ForbiddenMarkup {
            marker: "#".to_string(),
        });
    }
    if MARKDOWN_LINK.is_match(text) {
        found.push(Violation::ForbiddenMarkup {
            marker: "[texto](url)".to_string(),
        });
    }
    found
}

/// Percentages and money amounts quoted in the sources, deduplicated.
pub fn numeric_facts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut facts: Vec<String> = Vec::new();
    for text in texts {
        for m in PERCENT.find_iter(text).chain(CURRENCY.find_iter(text)) {
            let fact = m.as_str().trim().to_string();
            if !facts.iter().any(|f| compact(f) == compact(&fact)) {
                facts.push(fact);
            }
        }
    }
    facts
}
