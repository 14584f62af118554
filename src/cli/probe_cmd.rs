//! `formrelay probe <url>` — fetch a page and dump its form schemas.
//!
//! The dry-run companion to `run`: shows exactly what the extractor sees on
//! one page so a mismatch can be diagnosed before a bulk campaign.

use crate::cli::output;
use crate::config::{contains_any, RelayConfig};
use crate::fetch::HttpClient;
use crate::schema::{extract_forms, Form};
use anyhow::{bail, Result};

/// Run the probe command.
pub async fn run(url: &str) -> Result<()> {
    let config = RelayConfig::default();
    let client = HttpClient::new(&config.user_agent, config.request_timeout_ms());

    let page = client
        .get(url, config.request_timeout_ms())
        .await
        .map_err(|e| anyhow::anyhow!("fetch failed: {e}"))?;
    if page.status != 200 {
        bail!("{url} answered with status {}", page.status);
    }

    let forms = extract_forms(&page.body, &page.final_url);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "url": page.final_url,
            "refuses_contact": contains_any(&page.body, &config.decline_keywords),
            "forms": serde_json::to_value(&forms)?,
        }));
        return Ok(());
    }

    if contains_any(&page.body, &config.decline_keywords) {
        println!("  ⚠ page carries a no-solicitation notice — submission would be declined");
    }

    if forms.is_empty() {
        println!("  no forms found on {}", page.final_url);
        return Ok(());
    }

    for form in &forms {
        print_form(form);
    }
    Ok(())
}

fn print_form(form: &Form) {
    println!("\n--- Form #{} ---", form.index);
    println!("  Action:   {}", form.action.as_deref().unwrap_or("(none)"));
    println!(
        "  Resolved: {}",
        form.action_absolute.as_deref().unwrap_or("(unresolved)")
    );
    println!("  Method:   {:?}", form.method);
    if let Some(id) = &form.id {
        println!("  ID:       {id}");
    }
    if !form.classes.is_empty() {
        println!("  Class:    {}", form.classes.join(", "));
    }

    if form.fields.is_empty() {
        println!("  (no fields)");
        return;
    }
    for field in &form.fields {
        println!("  - {} {}", field.kind.as_str(), field.locator);
        if let Some(name) = &field.name {
            println!("      name: {name}");
        }
        if let Some(input_type) = &field.input_type {
            println!("      type: {input_type}");
        }
        if let Some(value) = &field.value {
            println!("      default: '{value}'");
        }
        if let Some(placeholder) = &field.placeholder {
            println!("      placeholder: '{placeholder}'");
        }
        if field.required {
            println!("      required");
        }
        if let Some(max) = field.max_length {
            println!("      maxlength: {max}");
        }
        if let Some(checked) = field.checked {
            println!("      checked: {checked}");
        }
        for option in &field.options {
            println!(
                "      option '{}' = {:?}{}",
                option.label,
                option.value,
                if option.selected { " (selected)" } else { "" }
            );
        }
    }
}
