use serde::{Deserialize, Serialize};

/// One typed unit decoded from an answer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// The service accepted the question. Carries no content.
    Start,
    /// Cumulative answer text received so far.
    Chunk(String),
    /// Final answer text plus the sources backing it.
    Complete {
        answer: String,
        citations: Vec<Citation>,
    },
    /// The service gave up on the question. `message` is absent when the service sent none.
    Error { message: Option<String> },
}

impl ProtocolEvent {
    /// Returns true for events after which nothing else may be produced.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Source reference attached to a completed answer.
///
/// Fields hold the service's raw values; display formatting happens elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub raw_title: Option<String>,
    pub raw_source_name: Option<String>,
    pub external_link: Option<String>,
    pub document_id: Option<String>,
    pub content_preview: Option<String>,
}

impl Citation {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.raw_title = Some(title.into());
        self
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.raw_source_name = Some(source_name.into());
        self
    }

    pub fn with_external_link(mut self, link: impl Into<String>) -> Self {
        self.external_link = Some(link.into());
        self
    }

    pub fn with_content_preview(mut self, preview: impl Into<String>) -> Self {
        self.content_preview = Some(preview.into());
        self
    }
}

/// Source record exactly as the answer service serializes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawSource {
    pub title: Option<String>,
    pub source: Option<String>,
    pub source_reference: Option<String>,
    pub id: Option<String>,
    /// Rank assigned by the service. Citations keep arrival order regardless.
    pub index: Option<u64>,
    pub metadata: Option<RawSourceMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawSourceMetadata {
    pub content: Option<String>,
}

impl From<RawSource> for Citation {
    fn from(raw: RawSource) -> Self {
        // The service sends empty strings for absent values; treat them as missing.
        Self {
            raw_title: non_empty(raw.title),
            raw_source_name: non_empty(raw.source),
            external_link: non_empty(raw.source_reference),
            document_id: non_empty(raw.id),
            content_preview: non_empty(raw.metadata.and_then(|metadata| metadata.content)),
        }
    }
}

/// Body of the one-shot answer endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnswerPayload {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<RawSource>,
}

impl AnswerPayload {
    /// Splits the payload into answer text and converted citations.
    pub fn into_parts(self) -> (String, Vec<Citation>) {
        let citations = self.sources.into_iter().map(Citation::from).collect();
        (self.answer, citations)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_source_maps_onto_citation_fields() {
        let raw: RawSource = serde_json::from_str(
            r#"{
                "title": "Cardholder Agreement",
                "source": "cardholder_agreement.txt",
                "source_reference": "https://example.com/agreement",
                "id": "doc-17",
                "metadata": {"content": "The annual fee is $0."},
                "index": 3,
                "score": 0.82
            }"#,
        )
        .unwrap();
        assert_eq!(raw.index, Some(3));

        let citation = Citation::from(raw);

        assert_eq!(citation.raw_title.as_deref(), Some("Cardholder Agreement"));
        assert_eq!(
            citation.raw_source_name.as_deref(),
            Some("cardholder_agreement.txt")
        );
        assert_eq!(
            citation.external_link.as_deref(),
            Some("https://example.com/agreement")
        );
        assert_eq!(citation.document_id.as_deref(), Some("doc-17"));
        assert_eq!(
            citation.content_preview.as_deref(),
            Some("The annual fee is $0.")
        );
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let raw: RawSource =
            serde_json::from_str(r#"{"title": "", "source": "faq.txt", "metadata": {"content": ""}}"#)
                .unwrap();

        let citation = Citation::from(raw);

        assert_eq!(citation.raw_title, None);
        assert_eq!(citation.raw_source_name.as_deref(), Some("faq.txt"));
        assert_eq!(citation.content_preview, None);
    }

    #[test]
    fn answer_payload_defaults_missing_sources() {
        let payload: AnswerPayload = serde_json::from_str(r#"{"answer": "Yes."}"#).unwrap();

        let (answer, citations) = payload.into_parts();

        assert_eq!(answer, "Yes.");
        assert!(citations.is_empty());
    }

    #[test]
    fn only_complete_and_error_are_terminal() {
        assert!(!ProtocolEvent::Start.is_terminal());
        assert!(!ProtocolEvent::Chunk("a".to_string()).is_terminal());
        assert!(
            ProtocolEvent::Complete {
                answer: String::new(),
                citations: Vec::new(),
            }
            .is_terminal()
        );
        assert!(
            ProtocolEvent::Error {
                message: Some("boom".to_string()),
            }
            .is_terminal()
        );
    }
}
