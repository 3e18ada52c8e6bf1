//! Turns raw source records into names and categories a reader can scan.
//!
//! Everything here is pure: the same citation at the same position always yields
//! the same [`DisplayCitation`].

use citechat_stream::Citation;

/// Maximum number of characters shown from a source's content.
pub const PREVIEW_CHAR_LIMIT: usize = 200;
const PREVIEW_ELLIPSIS: &str = "...";
const STRIPPED_PREFIX: &str = "PDF_";
const STRIPPED_SUFFIX: &str = ".txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CitationCategory {
    Pdf,
    Policy,
    Disclosure,
    Guide,
    Document,
}

impl CitationCategory {
    /// Classifies by substring of the raw, unstripped name, first match wins.
    pub fn classify(raw_name: &str) -> Self {
        let name = raw_name.to_lowercase();
        if name.contains("pdf") {
            Self::Pdf
        } else if name.contains("policy") || name.contains("terms") {
            Self::Policy
        } else if name.contains("disclosure") {
            Self::Disclosure
        } else if name.contains("booklet") {
            Self::Guide
        } else {
            Self::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Policy => "policy",
            Self::Disclosure => "disclosure",
            Self::Guide => "guide",
            Self::Document => "document",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pdf => "Pdf",
            Self::Policy => "Policy",
            Self::Disclosure => "Disclosure",
            Self::Guide => "Guide",
            Self::Document => "Document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayCitation {
    pub display_name: String,
    pub category: CitationCategory,
    pub link: Option<String>,
    pub preview: Option<String>,
}

impl DisplayCitation {
    /// Projects `citation`, where `position` is its 1-based place in the source list.
    pub fn from_citation(citation: &Citation, position: usize) -> Self {
        let raw_name = chosen_raw_name(citation);

        let display_name = raw_name
            .map(display_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Source {position}"));
        let category = raw_name
            .map(CitationCategory::classify)
            .unwrap_or(CitationCategory::Document);

        Self {
            display_name,
            category,
            link: citation.external_link.clone(),
            preview: citation.content_preview.as_deref().map(preview),
        }
    }
}

pub fn normalize_citations(citations: &[Citation]) -> Vec<DisplayCitation> {
    citations
        .iter()
        .enumerate()
        .map(|(index, citation)| DisplayCitation::from_citation(citation, index + 1))
        .collect()
}

fn chosen_raw_name(citation: &Citation) -> Option<&str> {
    citation
        .raw_title
        .as_deref()
        .filter(|title| !title.is_empty())
        .or_else(|| {
            citation
                .raw_source_name
                .as_deref()
                .filter(|source| !source.is_empty())
        })
}

/// Cleans a file-ish source name into title-cased words.
///
/// `PDF_Cash-Back_Terms.txt` becomes `Cash Back Terms`, `creditLineIncrease`
/// becomes `Credit Line Increase`.
pub fn display_name(raw_name: &str) -> String {
    let name = raw_name.strip_prefix(STRIPPED_PREFIX).unwrap_or(raw_name);
    let name = name.strip_suffix(STRIPPED_SUFFIX).unwrap_or(name);

    let mut spaced = String::with_capacity(name.len() * 2);
    for character in name.chars() {
        match character {
            '-' | '_' => spaced.push(' '),
            upper if upper.is_uppercase() => {
                spaced.push(' ');
                spaced.push(upper);
            }
            other => spaced.push(other),
        }
    }

    spaced
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut characters = word.chars();
    match characters.next() {
        Some(first) => first
            .to_uppercase()
            .chain(characters.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHAR_LIMIT) {
        Some((cut, _)) => format!("{}{PREVIEW_ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(title: &str) -> Citation {
        Citation::default().with_title(title)
    }

    fn sourced(source: &str) -> Citation {
        Citation::default().with_source_name(source)
    }

    #[test]
    fn pdf_prefix_is_stripped_but_still_classifies_as_pdf() {
        let display = DisplayCitation::from_citation(&titled("PDF_Cash-Back_Terms.txt"), 1);

        assert_eq!(display.display_name, "Cash Back Terms");
        assert_eq!(display.category, CitationCategory::Pdf);
    }

    #[test]
    fn category_uses_unstripped_name() {
        // "pdf" only appears in the prefix that display_name removes.
        let raw = "PDF_Rewards.txt";

        assert!(!display_name(raw).to_lowercase().contains("pdf"));
        assert_eq!(CitationCategory::classify(raw), CitationCategory::Pdf);
    }

    #[test]
    fn source_name_is_used_without_title() {
        let display = DisplayCitation::from_citation(&sourced("terms_and_conditions.txt"), 2);

        assert_eq!(display.display_name, "Terms And Conditions");
        assert_eq!(display.category, CitationCategory::Policy);
    }

    #[test]
    fn title_wins_over_source_name() {
        let citation = titled("Privacy Disclosure").with_source_name("privacy_policy.txt");

        let display = DisplayCitation::from_citation(&citation, 1);

        assert_eq!(display.display_name, "Privacy Disclosure");
        assert_eq!(display.category, CitationCategory::Disclosure);
    }

    #[test]
    fn categories_follow_priority_order() {
        assert_eq!(
            CitationCategory::classify("policy_terms.pdf"),
            CitationCategory::Pdf
        );
        assert_eq!(
            CitationCategory::classify("Terms-Disclosure"),
            CitationCategory::Policy
        );
        assert_eq!(
            CitationCategory::classify("rate-disclosure-booklet"),
            CitationCategory::Disclosure
        );
        assert_eq!(
            CitationCategory::classify("Welcome_Booklet"),
            CitationCategory::Guide
        );
        assert_eq!(
            CitationCategory::classify("support-article"),
            CitationCategory::Document
        );
    }

    #[test]
    fn nameless_sources_get_positional_names() {
        let citations = vec![
            titled("FAQ"),
            Citation::default().with_external_link("https://example.com/a"),
            Citation::default(),
        ];

        let displays = normalize_citations(&citations);

        assert_eq!(displays[1].display_name, "Source 2");
        assert_eq!(displays[1].category, CitationCategory::Document);
        assert_eq!(displays[1].link.as_deref(), Some("https://example.com/a"));
        assert_eq!(displays[2].display_name, "Source 3");
        assert_eq!(displays[2].link, None);
    }

    #[test]
    fn camel_case_is_split_and_words_title_cased() {
        assert_eq!(display_name("creditLineIncrease"), "Credit Line Increase");
        assert_eq!(display_name("HOW-to_apply"), "H O W To Apply");
        assert_eq!(display_name("  spaced   out  "), "Spaced Out");
    }

    #[test]
    fn name_that_strips_to_nothing_falls_back_to_position() {
        let display = DisplayCitation::from_citation(&titled("PDF_.txt"), 4);

        assert_eq!(display.display_name, "Source 4");
        assert_eq!(display.category, CitationCategory::Pdf);
    }

    #[test]
    fn long_previews_are_truncated_with_ellipsis() {
        let long = "\u{e9}".repeat(PREVIEW_CHAR_LIMIT + 5);
        let exact = "x".repeat(PREVIEW_CHAR_LIMIT);

        let truncated = DisplayCitation::from_citation(&titled("a").with_content_preview(long), 1);
        let untouched = DisplayCitation::from_citation(&titled("a").with_content_preview(exact.clone()), 1);

        let truncated = truncated.preview.unwrap();
        assert_eq!(truncated.chars().count(), PREVIEW_CHAR_LIMIT + PREVIEW_ELLIPSIS.len());
        assert!(truncated.ends_with("..."));
        assert_eq!(untouched.preview, Some(exact));
        assert_eq!(DisplayCitation::from_citation(&titled("a"), 1).preview, None);
    }

    #[test]
    fn normalization_is_deterministic() {
        let citations = vec![sourced("Cardmember_Agreement.txt"), titled("PDF_Rates")];

        assert_eq!(normalize_citations(&citations), normalize_citations(&citations));
    }
}
