//! Feed identifier parsing and validation
//!
//! A feed is one arXiv category query stream, written `ARCHIVE[.SUBJECT]`
//! (for example `cs.AI`, `stat.ML`, `hep-th`, `physics.optics`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categories harvested when no feed list is given
pub const DEFAULT_FEEDS: &[&str] = &["cs.AI", "cs.CL", "cs.CV", "cs.LG", "cs.NE", "cs.CC", "stat.ML"];

/// arXiv category feed identifier
///
/// The archive is normalized to lowercase. Subject classes are uppercase,
/// except under `physics` where arXiv writes them in lowercase.
///
/// # Examples
///
/// ```
/// use paper_harvester::identifier::FeedId;
///
/// let feed = FeedId::parse("CS.ai").unwrap();
/// assert_eq!(feed.as_str(), "cs.AI");
/// assert_eq!(feed.archive(), "cs");
/// assert_eq!(feed.subject(), Some("AI"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedId(String);

impl FeedId {
    /// Parse and normalize a feed identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, has more than one `.`,
    /// or contains characters other than ASCII letters, digits and `-`.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentifierError::InvalidFormat(
                "feed identifier cannot be empty".to_string(),
            ));
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 2 {
            return Err(IdentifierError::InvalidFormat(format!(
                "invalid feed '{s}': expected ARCHIVE or ARCHIVE.SUBJECT"
            )));
        }

        let archive = parts[0].to_lowercase();
        validate_component(s, "archive", &archive)?;
        if !archive.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(IdentifierError::InvalidFormat(format!(
                "invalid feed '{s}': archive must start with a letter"
            )));
        }

        match parts.get(1) {
            None => Ok(Self(archive)),
            Some(subject) => {
                let subject = if archive == "physics" {
                    subject.to_lowercase()
                } else {
                    subject.to_uppercase()
                };
                validate_component(s, "subject", &subject)?;
                Ok(Self(format!("{archive}.{subject}")))
            }
        }
    }

    /// Full identifier, e.g. `cs.AI`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Archive component, e.g. `cs`
    pub fn archive(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Subject class component, e.g. `AI`
    pub fn subject(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, subject)| subject)
    }

    /// Convert identifier to filesystem-safe format
    ///
    /// # Examples
    ///
    /// ```
    /// use paper_harvester::identifier::FeedId;
    ///
    /// let feed = FeedId::parse("cs.AI").unwrap();
    /// assert_eq!(feed.to_filesystem_safe(), "cs_ai");
    /// ```
    pub fn to_filesystem_safe(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }
}

fn validate_component(input: &str, name: &str, value: &str) -> Result<(), IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::InvalidFormat(format!(
            "invalid feed '{input}': {name} component cannot be empty"
        )));
    }
    if let Some(bad) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
        return Err(IdentifierError::InvalidFormat(format!(
            "invalid feed '{input}': unexpected character '{bad}' in {name}"
        )));
    }
    Ok(())
}

/// Parse the built-in feed list
pub fn default_feeds() -> Vec<FeedId> {
    DEFAULT_FEEDS
        .iter()
        .filter_map(|raw| FeedId::parse(raw).ok())
        .collect()
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for FeedId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FeedId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FeedId> for String {
    fn from(value: FeedId) -> Self {
        value.0
    }
}

/// Errors that can occur during identifier parsing
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    /// Invalid identifier format
    #[error("identifier error: {0}")]
    InvalidFormat(String),
}
