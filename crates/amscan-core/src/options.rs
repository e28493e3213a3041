//! Per-scan options

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of tags attached to one scan
pub const MAX_TAGS: usize = 8;

/// Maximum length of a single tag
pub const MAX_TAG_LEN: usize = 63;

/// Options for a single scan call. Built once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Enable predictive machine learning detection
    pml: bool,
    /// Enable Smart Protection Network feedback
    feedback: bool,
    /// Ask the scanner for the verbose result format
    verbose: bool,
    /// Report active content (scripts, macros) found in the object
    active_content: bool,
    /// Labels attached to the scan for later lookup
    tags: Vec<String>,
}

impl ScanOptions {
    /// Start building scan options
    pub fn builder() -> ScanOptionsBuilder {
        ScanOptionsBuilder::default()
    }

    pub fn pml(&self) -> bool {
        self.pml
    }

    pub fn feedback(&self) -> bool {
        self.feedback
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn active_content(&self) -> bool {
        self.active_content
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check the tag constraints: at most 8 tags, each 1..=63 characters
    pub fn validate(&self) -> Result<()> {
        validate_tags(&self.tags)
    }
}

/// Validate a tag list against the scanner's limits
pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(Error::TooManyTags { max: MAX_TAGS });
    }

    for tag in tags {
        let len = tag.chars().count();
        if len == 0 || len > MAX_TAG_LEN {
            return Err(Error::TagTooLong {
                max: MAX_TAG_LEN,
                tag: tag.clone(),
            });
        }
    }

    Ok(())
}

/// Builder for [`ScanOptions`]
#[derive(Debug, Clone, Default)]
pub struct ScanOptionsBuilder {
    options: ScanOptions,
}

impl ScanOptionsBuilder {
    pub fn pml(mut self, pml: bool) -> Self {
        self.options.pml = pml;
        self
    }

    pub fn feedback(mut self, feedback: bool) -> Self {
        self.options.feedback = feedback;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = verbose;
        self
    }

    pub fn active_content(mut self, active_content: bool) -> Self {
        self.options.active_content = active_content;
        self
    }

    /// Replace the tag list
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.push(tag.into());
        self
    }

    /// Finish building. Tags are validated when the scan runs.
    pub fn build(self) -> ScanOptions {
        self.options
    }
}
