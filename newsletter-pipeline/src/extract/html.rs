use super::resolve_source_name;
use crate::config::ExtractionConfig;
use crate::types::{ExtractedContent, ExtractionError, ExtractionMethod, FetchedDocument};
use crate::utils;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Containers tried, in order, by the structured strategy.
const ARTICLE_ROOTS: &[&str] = &[
    "[itemprop='articleBody']",
    "article",
    "[role='main']",
    "main",
    "body",
];

/// Blocks inside these never carry article text.
const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "form", "script", "style", "noscript", "button", "select",
    "figcaption",
];

/// Children rendered inline; their text belongs to the enclosing block.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "br", "cite", "code", "em", "font", "i", "mark", "q", "s", "small", "span",
    "strong", "sub", "sup", "time", "u",
];

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let Ok(selector) = Selector::parse(css) else {
        return None;
    };
    document.select(&selector).next()
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    select_first(document, css)
        .and_then(|el| el.value().attr("content"))
        .map(utils::text::squash_whitespace)
        .filter(|s| !s.is_empty())
}

/// Pages are UTF-8 almost always; anything else is read as Latin-1.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

pub fn extract_html(
    doc: &FetchedDocument,
    config: &ExtractionConfig,
) -> std::result::Result<ExtractedContent, ExtractionError> {
    let source = decode(&doc.raw_bytes);
    let document = Html::parse_document(&source);

    let (body_text, extraction_method) = match structured_body(&document, config) {
        Some(body) => (body, ExtractionMethod::PrimaryParser),
        None => match largest_block(&document, config) {
            Some(body) => (body, ExtractionMethod::FallbackParser),
            None => {
                return Err(ExtractionError::EmptyContent {
                    url: doc.source_url.clone(),
                })
            }
        },
    };

    let site_name = meta_content(&document, "meta[property='og:site_name']")
        .or_else(|| meta_content(&document, "meta[name='application-name']"));

    Ok(ExtractedContent {
        source_url: doc.source_url.clone(),
        canonical_url: canonical_url(&document, &doc.final_url),
        title: page_title(&document, &doc.final_url),
        body_text,
        published_at: published_at(&document),
        source_name: resolve_source_name(site_name.as_deref(), &doc.final_url),
        extraction_method,
    })
}

/// Title from metadata, then the first heading, then the domain.
fn page_title(document: &Html, final_url: &str) -> String {
    meta_content(document, "meta[property='og:title']")
        .or_else(|| meta_content(document, "meta[name='twitter:title']"))
        .or_else(|| {
            select_first(document, "title")
                .map(|el| utils::text::squash_whitespace(&el.text().collect::<String>()))
                .filter(|s| !s.is_empty())
        })
        .or_else(|| {
            select_first(document, "h1")
                .map(|el| utils::text::squash_whitespace(&el.text().collect::<String>()))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| {
            utils::url::extract_domain(final_url).unwrap_or_else(|| final_url.to_string())
        })
}

fn canonical_url(document: &Html, final_url: &str) -> String {
    let declared = select_first(document, "link[rel='canonical']")
        .and_then(|el| el.value().attr("href"))
        .map(str::to_string)
        .or_else(|| meta_content(document, "meta[property='og:url']"));

    let resolved = declared.and_then(|href| {
        let base = Url::parse(final_url).ok()?;
        base.join(href.trim()).ok().map(|u| u.to_string())
    });

    utils::url::normalize(resolved.as_deref().unwrap_or(final_url))
}

fn published_at(document: &Html) -> Option<DateTime<Utc>> {
    let candidates = [
        meta_content(document, "meta[property='article:published_time']"),
        meta_content(document, "meta[itemprop='datePublished']"),
        meta_content(document, "meta[name='date']"),
        select_first(document, "time[datetime]")
            .and_then(|el| el.value().attr("datetime"))
            .map(str::to_string),
    ];

    candidates.into_iter().flatten().find_map(|raw| parse_date(&raw))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn tag_name(el: &ElementRef) -> String {
    el.value().name().to_ascii_lowercase()
}

fn inside_boilerplate(el: &ElementRef) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| BOILERPLATE_TAGS.contains(&e.name().to_ascii_lowercase().as_str()))
    })
}

/// Share of a block's characters that sit inside links.
fn link_density(el: &ElementRef, text_len: usize) -> f64 {
    if text_len == 0 {
        return 1.0;
    }
    let Ok(anchor) = Selector::parse("a") else {
        return 0.0;
    };
    let linked: usize = el
        .select(&anchor)
        .map(|a| utils::text::squash_whitespace(&a.text().collect::<String>()).chars().count())
        .sum();
    linked as f64 / text_len as f64
}

fn keep_block(text: &str, density: f64, config: &ExtractionConfig) -> bool {
    utils::text::word_count(text) >= config.min_block_words && density <= config.max_link_density
}

/// Paragraph-level extraction inside the most specific article container.
fn structured_body(document: &Html, config: &ExtractionConfig) -> Option<String> {
    let Ok(block_sel) = Selector::parse("p, blockquote, h2, h3") else {
        return None;
    };

    for root_css in ARTICLE_ROOTS {
        let Some(root) = select_first(document, root_css) else {
            continue;
        };

        let mut blocks = Vec::new();
        for el in root.select(&block_sel) {
            if inside_boilerplate(&el) {
                continue;
            }
            let text = utils::text::squash_whitespace(&el.text().collect::<String>());
            let density = link_density(&el, text.chars().count());
            let is_heading = matches!(tag_name(&el).as_str(), "h2" | "h3");
            // Sub-headings are short by nature; keep them if the body follows
            if is_heading && !text.is_empty() && density <= config.max_link_density {
                blocks.push(text);
            } else if keep_block(&text, density, config) {
                blocks.push(text);
            }
        }

        let words: usize = blocks.iter().map(|b| utils::text::word_count(b)).sum();
        if words >= config.min_article_words {
            return Some(blocks.join("\n"));
        }
    }
    None
}

/// Raw-text fallback: the block element whose own inline text is longest.
fn largest_block(document: &Html, config: &ExtractionConfig) -> Option<String> {
    let Ok(all) = Selector::parse("body *") else {
        return None;
    };
    let body = select_first(document, "body");

    let mut best: Option<(usize, String)> = None;
    let candidates = document
        .select(&all)
        .chain(body)
        .filter(|el| !INLINE_TAGS.contains(&tag_name(el).as_str()))
        .filter(|el| !BOILERPLATE_TAGS.contains(&tag_name(el).as_str()));

    for el in candidates {
        if inside_boilerplate(&el) {
            continue;
        }
        let mut own = String::new();
        let mut linked = 0usize;
        collect_inline_text(&el, &mut own, &mut linked, false);
        let text = utils::text::normalize_whitespace(&own);
        let words = utils::text::word_count(&text);
        if words == 0 {
            continue;
        }
        let chars = text.chars().filter(|c| !c.is_whitespace()).count().max(1);
        if linked as f64 / chars as f64 > config.max_link_density {
            continue;
        }
        // Strictly greater keeps the first block on ties
        if best.as_ref().map_or(true, |(w, _)| words > *w) {
            best = Some((words, text));
        }
    }

    best.map(|(_, text)| text)
}

/// Text of `el` excluding nested block elements. `<br>` becomes a line break.
fn collect_inline_text(el: &ElementRef, out: &mut String, linked: &mut usize, in_link: bool) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            if in_link {
                *linked += text.chars().filter(|c| !c.is_whitespace()).count();
            }
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let name = tag_name(&child_el);
        if name == "br" {
            out.push('\n');
        } else if INLINE_TAGS.contains(&name.as_str()) {
            collect_inline_text(&child_el, out, linked, in_link || name == "a");
        } else {
            out.push('\n');
        }
    }
}
