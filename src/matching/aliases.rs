//! Static alias dictionary for the heuristic matching tier.
//!
//! Maps a canonical content key to field names observed on real contact
//! forms. Lookups are exact and case-sensitive: a form field named `Email`
//! does not match the `email` alias. That is a known limitation we keep on
//! purpose — case-folding here would also fold names like `SEI`/`sei` that
//! Japanese forms use with distinct meanings.

/// Alias table: canonical content key → known literal field names.
pub const ALIAS_TABLE: &[(&str, &[&str])] = &[
    (
        "name",
        &["your-name", "fullname", "full_name", "contact_name", "onamae"],
    ),
    (
        "email_address",
        &["email", "mail", "your-email", "mail_address", "e-mail"],
    ),
    (
        "phone_number",
        &["phone", "tel", "telephone", "your-phone", "mobile"],
    ),
    (
        "company_name",
        &["company", "your-company", "organization", "corp", "kaisha"],
    ),
    ("department", &["division", "busho"]),
    ("subject", &["title", "your-subject", "inquiry_subject"]),
    (
        "message_content",
        &["message", "your-message", "inquiry", "content", "body", "comments"],
    ),
    ("post_code", &["zip", "zipcode", "postal_code", "postcode"]),
    ("address", &["add", "address1", "street_address", "jusho"]),
];

/// Known aliases for `key`, not including `key` itself. Unknown keys get an
/// empty slice — the matcher still tries the key verbatim.
pub fn aliases_for(key: &str) -> &'static [&'static str] {
    ALIAS_TABLE
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}
