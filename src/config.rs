//! Runtime configuration shared by both submission strategies and the
//! pipeline.

use std::time::Duration;

/// Default user agent presented on every page fetch and submission.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                              AppleWebKit/537.36 (KHTML, like Gecko) \
                              Chrome/131.0.0.0 Safari/537.36";

/// Configuration for a relay run.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// User-Agent header for HTTP fetches and submissions.
    pub user_agent: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Phrases whose presence on the post-submit page counts as success.
    pub success_keywords: Vec<String>,
    /// Phrases that mark a page as refusing unsolicited contact; submission
    /// is skipped with a `Declined` outcome when one is found.
    pub decline_keywords: Vec<String>,
    /// Minimum cosine similarity for the semantic matching tier.
    pub similarity_threshold: f32,
    /// Settle delay between browser interactions, so JS-bound forms can
    /// react to one field before the next is filled.
    pub settle: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(25),
            success_keywords: vec![
                "送信されました".to_string(),
                "成功しました".to_string(),
                "ありがとうございました".to_string(),
                "Thank you".to_string(),
            ],
            decline_keywords: vec![
                "営業のご連絡はご遠慮ください".to_string(),
                "新規の営業やご提案は受け付けておりません".to_string(),
                "営業目的のお問い合わせ".to_string(),
                "自動的に迷惑メール".to_string(),
            ],
            similarity_threshold: 0.5,
            settle: Duration::from_millis(400),
        }
    }
}

impl RelayConfig {
    /// Request timeout in milliseconds, for APIs that take raw millis.
    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout.as_millis() as u64
    }
}

/// Returns `true` when `text` contains any of `keywords` (plain substring
/// search — keywords are literal phrases, not patterns).
pub fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_keywords() {
        let cfg = RelayConfig::default();
        assert!(!cfg.success_keywords.is_empty());
        assert!(!cfg.decline_keywords.is_empty());
        assert!(cfg.similarity_threshold > 0.0);
    }

    #[test]
    fn contains_any_matches_substring() {
        let kws = vec!["送信されました".to_string(), "Thank you".to_string()];
        assert!(contains_any("お問い合わせが送信されました。", &kws));
        assert!(contains_any("<p>Thank you for reaching out</p>", &kws));
        assert!(!contains_any("error: please retry", &kws));
    }

    #[test]
    fn contains_any_ignores_empty_keywords() {
        let kws = vec![String::new()];
        assert!(!contains_any("anything", &kws));
    }
}
