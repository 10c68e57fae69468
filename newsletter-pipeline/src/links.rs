use crate::types::SourceLink;
use crate::utils::text::fold;

/// Parse a link list, one `url | section | note` per line. Section and note
/// are optional; blank lines and lines starting with `#` are skipped.
pub fn parse_link_list(text: &str) -> Vec<SourceLink> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|').map(str::trim);
            let url = parts.next().filter(|u| !u.is_empty())?;
            let mut link = SourceLink::new(url);
            if let Some(section) = parts.next().filter(|s| !s.is_empty()) {
                link = link.with_section(section);
            }
            if let Some(note) = parts.next().filter(|n| !n.is_empty()) {
                link = link.with_note(note);
            }
            Some(link)
        })
        .collect()
}

/// Note number in a link's note field: "3", "nota 3" or "note 3".
pub fn note_number(note: &str) -> Option<u32> {
    let folded = fold(note.trim());
    let digits = folded
        .strip_prefix("nota")
        .or_else(|| folded.strip_prefix("note"))
        .unwrap_or(&folded)
        .trim()
        .trim_start_matches('#');
    digits.parse::<u32>().ok().filter(|n| *n > 0)
}
