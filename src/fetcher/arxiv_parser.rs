//! arXiv Atom response parser
//!
//! Streams the feed with quick-xml and matches elements by local name, so the
//! `opensearch:` and `arxiv:` prefixes need no namespace bookkeeping.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;
use tracing::warn;

use crate::fetcher::{FetcherError, FetcherResult};
use crate::{version_from_url, LinkKind, Record, RecordId, RecordLink};

/// Parsed Atom feed
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    /// `opensearch:totalResults`
    pub total_results: u64,
    /// Entries in document order
    pub records: Vec<Record>,
}

#[derive(Default)]
struct EntryBuilder {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    authors: Vec<String>,
    categories: BTreeSet<String>,
    published: Option<String>,
    updated: Option<String>,
    links: Vec<RecordLink>,
}

impl EntryBuilder {
    fn build(self) -> FetcherResult<Record> {
        let raw_id = self
            .id
            .ok_or_else(|| FetcherError::ParseError("entry without <id>".to_string()))?;
        let published = self
            .published
            .ok_or_else(|| FetcherError::ParseError(format!("entry {raw_id} without <published>")))?;
        let submitted_at = parse_instant(&published)?;
        let updated_at = match self.updated {
            Some(updated) => parse_instant(&updated)?,
            None => submitted_at,
        };

        Ok(Record {
            id: RecordId::from_url(&raw_id),
            version: version_from_url(&raw_id),
            title: collapse_whitespace(self.title.as_deref().unwrap_or_default()),
            authors: self.authors,
            summary: collapse_whitespace(self.summary.as_deref().unwrap_or_default()),
            categories: self.categories,
            submitted_at,
            updated_at,
            links: self.links,
        })
    }
}

fn parse_instant(raw: &str) -> FetcherResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FetcherError::ParseError(format!("invalid timestamp '{raw}': {e}")))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attribute(element: &BytesStart<'_>, name: &str) -> FetcherResult<Option<String>> {
    match element
        .try_get_attribute(name)
        .map_err(|e| FetcherError::ParseError(format!("bad attribute '{name}': {e}")))?
    {
        Some(attr) => attr
            .unescape_value()
            .map(|value| Some(value.into_owned()))
            .map_err(|e| FetcherError::ParseError(format!("bad attribute '{name}': {e}"))),
        None => Ok(None),
    }
}

fn link_from(element: &BytesStart<'_>) -> FetcherResult<Option<RecordLink>> {
    let Some(href) = attribute(element, "href")? else {
        return Ok(None);
    };
    let title = attribute(element, "title")?;
    let rel = attribute(element, "rel")?;
    let kind = match (title.as_deref(), rel.as_deref()) {
        (Some("pdf"), _) => LinkKind::Pdf,
        (Some("doi"), _) => LinkKind::Doi,
        (_, Some("alternate")) => LinkKind::Abstract,
        _ => LinkKind::Other,
    };
    Ok(Some(RecordLink { href, kind }))
}

/// Parse one Atom response page
///
/// # Errors
///
/// - [`FetcherError::ApiError`] when the provider answered with an error entry
/// - [`FetcherError::ParseError`] for malformed XML, a missing total, or an
///   entry without id or submission time
pub fn parse_feed(xml: &str) -> FetcherResult<ParsedFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut total_results: Option<u64> = None;
    let mut entry: Option<EntryBuilder> = None;
    let mut records = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = element.local_name().as_ref().to_vec();
                if let Some(builder) = entry.as_mut() {
                    absorb_attributes(builder, &name, &element)?;
                } else if name == b"entry" {
                    entry = Some(EntryBuilder::default());
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Empty(element)) => {
                let name = element.local_name().as_ref().to_vec();
                if let Some(builder) = entry.as_mut() {
                    absorb_attributes(builder, &name, &element)?;
                }
            }
            Ok(Event::Text(chunk)) => {
                let value = chunk
                    .unescape()
                    .map_err(|e| FetcherError::ParseError(format!("bad text: {e}")))?;
                text.push_str(&value);
            }
            Ok(Event::CData(chunk)) => {
                text.push_str(&String::from_utf8_lossy(&chunk.into_inner()));
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    return Err(FetcherError::ParseError("unbalanced closing tag".to_string()));
                };
                let value = std::mem::take(&mut text);
                let parent = path.last().map(Vec::as_slice);

                if name == b"entry" {
                    if let Some(builder) = entry.take() {
                        finish_entry(builder, &mut records)?;
                    }
                    continue;
                }

                match (name.as_slice(), entry.as_mut()) {
                    (b"id", Some(builder)) => builder.id = Some(value.trim().to_string()),
                    (b"title", Some(builder)) => builder.title = Some(value),
                    (b"summary", Some(builder)) => builder.summary = Some(value),
                    (b"published", Some(builder)) => builder.published = Some(value),
                    (b"updated", Some(builder)) => builder.updated = Some(value),
                    (b"name", Some(builder)) if parent == Some(b"author".as_slice()) => {
                        let author = collapse_whitespace(&value);
                        if !author.is_empty() {
                            builder.authors.push(author);
                        }
                    }
                    (b"totalResults", None) => {
                        let total = value.trim().parse::<u64>().map_err(|e| {
                            FetcherError::ParseError(format!("invalid totalResults '{value}': {e}"))
                        })?;
                        total_results = Some(total);
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FetcherError::ParseError(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                )))
            }
        }
    }

    if !path.is_empty() || entry.is_some() {
        return Err(FetcherError::ParseError("truncated document".to_string()));
    }

    let total_results = total_results
        .ok_or_else(|| FetcherError::ParseError("response without totalResults".to_string()))?;

    Ok(ParsedFeed {
        total_results,
        records,
    })
}

fn absorb_attributes(
    builder: &mut EntryBuilder,
    name: &[u8],
    element: &BytesStart<'_>,
) -> FetcherResult<()> {
    match name {
        b"category" => {
            if let Some(term) = attribute(element, "term")? {
                builder.categories.insert(term);
            }
        }
        b"link" => {
            if let Some(link) = link_from(element)? {
                builder.links.push(link);
            }
        }
        _ => {}
    }
    Ok(())
}

fn finish_entry(builder: EntryBuilder, records: &mut Vec<Record>) -> FetcherResult<()> {
    if builder.id.as_deref().is_some_and(|id| id.contains("/api/errors")) {
        let message = builder
            .summary
            .as_deref()
            .map(collapse_whitespace)
            .unwrap_or_else(|| "unspecified provider error".to_string());
        return Err(FetcherError::ApiError(message));
    }

    let record = builder.build()?;
    match record.validate() {
        Ok(()) => records.push(record),
        Err(reason) => warn!(record_id = %record.id, reason = %reason, "Dropping invalid entry"),
    }
    Ok(())
}
