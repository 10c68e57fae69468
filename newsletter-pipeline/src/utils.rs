/// Text processing utilities
pub mod text {
    use unicode_normalization::UnicodeNormalization;

    /// Count whitespace-separated words
    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// Collapse runs of whitespace inside each line and drop empty lines,
    /// keeping paragraph breaks as single newlines
    pub fn normalize_whitespace(text: &str) -> String {
        text.lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Collapse all whitespace, including newlines, to single spaces
    pub fn squash_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Truncate text to a maximum number of characters, trying to break at sentence boundaries
    pub fn smart_truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }

        let cut = text
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        let truncated = &text[..cut];
        if let Some(last_sentence) = truncated.rfind(". ") {
            truncated[..last_sentence + 1].to_string()
        } else if let Some(last_space) = truncated.rfind(' ') {
            format!("{}...", &truncated[..last_space])
        } else {
            format!("{}...", truncated)
        }
    }

    /// Lowercase and strip diacritics so "Locação" matches "locacao"
    pub fn fold(text: &str) -> String {
        text.nfd()
            .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
            .collect::<String>()
            .to_lowercase()
    }

    /// Paragraphs separated by blank lines or single newlines
    pub fn paragraphs(text: &str) -> Vec<&str> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Length in UTF-16 code units, the unit document services index by
    pub fn utf16_len(text: &str) -> usize {
        text.encode_utf16().count()
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Extract host from URL, without a leading `www.`
    pub fn extract_domain(url_str: &str) -> Option<String> {
        Url::parse(url_str)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
    }

    /// Check the URL parses and uses http(s)
    pub fn is_fetchable(url_str: &str) -> bool {
        Url::parse(url_str)
            .map(|url| {
                (url.scheme() == "http" || url.scheme() == "https") && url.host_str().is_some()
            })
            .unwrap_or(false)
    }

    /// Drop the fragment and `utm_*` tracking parameters. Unparseable input is
    /// returned trimmed so it still deduplicates against itself.
    pub fn normalize(url_str: &str) -> String {
        let Ok(mut url) = Url::parse(url_str.trim()) else {
            return url_str.trim().to_string();
        };
        url.set_fragment(None);

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !key.to_lowercase().starts_with("utm_"))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        url.to_string()
    }

    /// "www.imobi-report.com.br" -> "Imobi Report"
    pub fn pretty_domain_name(host: &str) -> String {
        let host = host.trim_start_matches("www.");
        let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
        let label = match labels.len() {
            0 => return host.to_string(),
            1 => labels[0],
            _ => {
                // Skip public-suffix style endings like .com.br / .co.uk
                let mut idx = labels.len() - 2;
                if idx > 0 && matches!(labels[idx], "com" | "co" | "org" | "net" | "gov" | "edu") {
                    idx -= 1;
                }
                labels[idx]
            }
        };

        label
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
