//! Field matching — resolve a semantic content key ("email_address") onto a
//! concrete field of an extracted form.
//!
//! Two tiers, short-circuiting on the first hit:
//!
//! 1. **Heuristic**: exact, case-sensitive field-name match against a static
//!    alias dictionary. Free and deterministic.
//! 2. **Semantic**: cosine similarity between the embedding of the field's
//!    name and the embedding of the content key, when a retriever is
//!    configured. Vectors come through the cache, so repeated runs against
//!    the same vocabulary are cheap and deterministic.
//!
//! A match never mutates the extracted form; it produces a [`MatchedField`]
//! that pairs a copy of the field with the value to submit.

pub mod aliases;
pub mod cache;
pub mod embedding;
pub mod similarity;

use crate::schema::{Form, FormField};
use cache::EmbeddingRetriever;
use similarity::cosine_similarity;

/// Similarity floor for the general matching entry point. Callers that can
/// afford misses (like the submitters) tighten this via configuration.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.1;

/// A form field bound to the value that will be submitted into it.
#[derive(Debug, Clone)]
pub struct MatchedField {
    pub field: FormField,
    pub value: String,
}

/// Resolves content keys onto form fields. Dependencies are injected — there
/// is no process-wide matcher instance.
pub struct FieldMatcher {
    retriever: Option<EmbeddingRetriever>,
}

impl FieldMatcher {
    /// A matcher with both tiers. Pass `None` to run heuristic-only (no
    /// embedding service configured).
    pub fn new(retriever: Option<EmbeddingRetriever>) -> Self {
        Self { retriever }
    }

    pub fn heuristic_only() -> Self {
        Self { retriever: None }
    }

    /// Match `key` onto a field of `form`, heuristic tier first, semantic
    /// tier as fallback. `threshold` applies to the semantic tier only.
    pub async fn match_field(
        &self,
        form: &Form,
        key: &str,
        value: &str,
        threshold: f32,
    ) -> Option<MatchedField> {
        if let Some(matched) = heuristic_match(form, key, value) {
            return Some(matched);
        }
        self.similarity_match(form, key, value, threshold).await
    }

    /// Semantic tier: best field by cosine similarity, strictly above
    /// `threshold`. On equal top scores the earliest field in document order
    /// wins. Embedding failures disqualify the affected field (or the whole
    /// tier, when the key itself cannot be embedded) rather than erroring.
    pub async fn similarity_match(
        &self,
        form: &Form,
        key: &str,
        value: &str,
        threshold: f32,
    ) -> Option<MatchedField> {
        let retriever = self.retriever.as_ref()?;

        let key_vector = match retriever.retrieve(key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("embedding for key {key:?} failed: {e:#}");
                return None;
            }
        };

        let mut best: Option<(f32, &FormField)> = None;
        for field in &form.fields {
            let Some(name) = field.name.as_deref() else {
                continue;
            };
            let field_vector = match retriever.retrieve(name).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("embedding for field {name:?} failed: {e:#}");
                    continue;
                }
            };
            let score = cosine_similarity(&field_vector, &key_vector);
            let current_best = best.map(|(s, _)| s).unwrap_or(0.0);
            // Strictly greater on both counts: equal scores keep the earlier
            // field, at-threshold scores never match.
            if score > current_best && score > threshold {
                best = Some((score, field));
            }
        }

        best.map(|(_, field)| MatchedField {
            field: field.clone(),
            value: value.to_string(),
        })
    }
}

/// Heuristic tier: scan fields in document order and select the first whose
/// `name` exactly equals the content key or one of its known aliases.
///
/// Exact match only, and case-sensitive; see [`aliases`] for the tradeoff.
pub fn heuristic_match(form: &Form, key: &str, value: &str) -> Option<MatchedField> {
    for field in &form.fields {
        let Some(name) = field.name.as_deref() else {
            continue;
        };
        if name == key || aliases::aliases_for(key).contains(&name) {
            return Some(MatchedField {
                field: field.clone(),
                value: value.to_string(),
            });
        }
    }
    None
}
