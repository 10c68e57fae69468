use crate::style::{StyleGuide, Violation};
use crate::types::{AssignedItem, SectionName, TextKind};
use crate::utils::text::smart_truncate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One source as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExcerpt {
    /// 1-based link number from the submission
    pub link: usize,
    pub name: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub editor_note: Option<String>,
}

/// Structured request handed to a generative backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub kind: TextKind,
    pub section: SectionName,
    pub sources: Vec<SourceExcerpt>,
    pub numeric_facts: Vec<String>,
    pub constraints: String,
    /// Accepted note a headline must summarise.
    pub summarize: Option<String>,
    /// Problems found in the previous draft.
    pub feedback: Vec<String>,
}

impl Prompt {
    pub fn build(
        style: &StyleGuide,
        kind: TextKind,
        section: SectionName,
        items: &[AssignedItem],
        excerpt_chars: usize,
        editor_notes: &HashMap<usize, String>,
    ) -> Self {
        let sources = items
            .iter()
            .map(|item| SourceExcerpt {
                link: item.position + 1,
                name: item.content.source_name.clone(),
                url: item.content.canonical_url.clone(),
                title: item.content.title.clone(),
                excerpt: smart_truncate(&item.content.body_text, excerpt_chars),
                editor_note: editor_notes.get(&item.position).cloned(),
            })
            .collect();

        Self {
            system: style.rules.clone(),
            kind,
            section,
            sources,
            numeric_facts: Vec::new(),
            constraints: style.constraint_for(kind),
            summarize: None,
            feedback: Vec::new(),
        }
    }

    pub fn with_numeric_facts(mut self, facts: Vec<String>) -> Self {
        self.numeric_facts = facts;
        self
    }

    pub fn with_summary_of(mut self, note: &str) -> Self {
        self.summarize = Some(note.to_string());
        self
    }

    /// Copy of the prompt carrying the previous draft's violations.
    pub fn with_feedback(&self, violations: &[Violation]) -> Self {
        let mut prompt = self.clone();
        prompt.feedback = violations.iter().map(|v| v.to_string()).collect();
        prompt
    }

    /// Names the draft may cite, in submission order.
    pub fn allowed_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for source in &self.sources {
            if !names.contains(&source.name) {
                names.push(source.name.clone());
            }
        }
        names
    }

    /// User message sent alongside `system`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let task = match self.kind {
            TextKind::Lead => "[ABERTURA]\nInstrução: escreva a matéria de abertura (tese, contexto, impactos e fechamento).".to_string(),
            TextKind::DetailedNote => format!(
                "[SEÇÃO: {} | NOTA]\nInstrução: escreva uma nota (fato e implicação prática para o mercado).",
                self.section.display_title()
            ),
            TextKind::Headline => format!(
                "[SEÇÃO: {} | MANCHETE]\nInstrução: resuma a nota aprovada abaixo em uma manchete.",
                self.section.display_title()
            ),
        };
        out.push_str(&task);
        out.push_str("\nRestrições: ");
        out.push_str(&self.constraints);
        out.push_str("\nFontes permitidas (cite pelo nome entre parênteses): ");
        out.push_str(&self.allowed_sources().join(", "));

        if !self.numeric_facts.is_empty() {
            out.push_str("\nNúmeros das fontes a preservar literalmente: ");
            out.push_str(&self.numeric_facts.join("; "));
        }

        if let Some(note) = &self.summarize {
            out.push_str("\n\nNota aprovada:\n");
            out.push_str(note);
        }

        out.push_str("\n\nTrechos das fontes:");
        for source in &self.sources {
            out.push_str(&format!(
                "\n[{}] {} | {} ({})\n{}",
                source.link, source.title, source.url, source.name, source.excerpt
            ));
            if let Some(note) = &source.editor_note {
                out.push_str(&format!("\nObservação do editor: {}", note));
            }
        }

        if !self.feedback.is_empty() {
            out.push_str("\n\nA versão anterior foi rejeitada. Corrija:");
            for item in &self.feedback {
                out.push_str("\n- ");
                out.push_str(item);
            }
        }

        out
    }
}
