// Copyright 2026 Formrelay Contributors
// SPDX-License-Identifier: Apache-2.0

//! Submission execution — fill a discovered contact form and verify whether
//! the submission actually went through.
//!
//! Two interchangeable strategies share the [`Submitter`] contract:
//! [`http::HttpSubmitter`] posts the form over plain HTTP, and
//! [`browser::BrowserSubmitter`] drives a real rendering engine for
//! JS-dependent forms. Both absorb faults within an attempt into a terminal
//! [`SubmissionOutcome`]; only faults that prevented the attempt from running
//! at all (unreachable page, dead browser) surface as
//! [`crate::error::SubmitError`] for the pipeline's retry policy.

pub mod browser;
pub mod http;

use crate::error::SubmitError;
use async_trait::async_trait;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Terminal verdict of one submission attempt. Produced once per
/// (site, content-record) pair; retries are the pipeline's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// A success signal was detected.
    Success,
    /// The page had no forms at all.
    NoFormFound,
    /// Forms existed, but no form's fields could be resolved.
    NoFieldsMatched,
    /// The submit action ran but failed (transport fault, error response,
    /// or no success signal where one was required).
    SubmitActionFailed,
    /// The server accepted the request but nothing confirmed or denied
    /// success.
    Indeterminate,
    /// The page explicitly refuses unsolicited contact; nothing was sent.
    Declined,
}

impl SubmissionOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoFormFound => "no_form_found",
            Self::NoFieldsMatched => "no_fields_matched",
            Self::SubmitActionFailed => "submit_action_failed",
            Self::Indeterminate => "indeterminate",
            Self::Declined => "declined",
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller-supplied semantic payload: an ordered mapping from content key
/// (e.g. `email_address`) to the literal value to submit. Immutable per
/// attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentRecord {
    entries: Vec<(String, String)>,
}

impl ContentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key/value pair, replacing an existing entry with the same
    /// key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ContentRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ContentRecord {
    // Hand-rolled visitor so JSON object order survives — serde_json's Map
    // would re-sort the keys, and entry order is part of the contract.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = ContentRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of content keys to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut record = ContentRecord::new();
                while let Some((key, value)) = map.next_entry::<String, serde_json::Value>()? {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Bool(b) => b.to_string(),
                        serde_json::Value::Number(n) => n.to_string(),
                        serde_json::Value::Null => continue,
                        other => {
                            return Err(serde::de::Error::custom(format!(
                                "content value for {key:?} must be a scalar, got {other}"
                            )))
                        }
                    };
                    record.insert(key, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// One strategy for executing a submission attempt.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Attempt to submit `record` through a contact form at `url`.
    async fn submit(
        &self,
        url: &str,
        record: &ContentRecord,
    ) -> Result<SubmissionOutcome, SubmitError>;
}
