//! Form schema extraction — parse untrusted HTML into an addressable model
//! of forms and fields.
//!
//! This is a pure transform: HTML text plus a base URL in, ordered list of
//! [`Form`] out. Malformed markup never fails — `scraper` recovers the way a
//! browser would, and a document with no `<form>` elements yields an empty
//! list rather than an error.

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// The element kind a field was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Input,
    TextArea,
    Select,
    Button,
}

impl FieldKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "input" => Some(Self::Input),
            "textarea" => Some(Self::TextArea),
            "select" => Some(Self::Select),
            "button" => Some(Self::Button),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::TextArea => "textarea",
            Self::Select => "select",
            Self::Button => "button",
        }
    }
}

/// HTTP method a form submits with. Anything that is not `post`
/// (case-insensitive) is treated as GET, matching browser behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    #[default]
    Get,
    Post,
}

/// One `<option>` of a `<select>` field.
#[derive(Debug, Clone, Serialize)]
pub struct SelectOption {
    pub value: Option<String>,
    pub label: String,
    pub selected: bool,
}

/// An expression that re-finds a specific live element in a rendered page:
/// the `index`-th match of `css` in document order
/// (`querySelectorAll(css)[index]` semantics).
///
/// Fields carrying an id get an id selector (ids are document-unique, index
/// 0). Fields with only a name get a name-qualified selector indexed across
/// the document's forms — `form:nth-of-type` scoping would silently miss
/// sibling forms living in different containers. Fields with neither are
/// addressable only by their position among all form controls, which
/// survives re-rendering less reliably — a degraded locator, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLocator {
    pub css: String,
    pub index: usize,
}

impl fmt::Display for FieldLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.css)
        } else {
            write!(f, "{}#{}", self.css, self.index)
        }
    }
}

/// One form control, as extracted.
#[derive(Debug, Clone, Serialize)]
pub struct FormField {
    pub kind: FieldKind,
    pub name: Option<String>,
    pub id: Option<String>,
    pub input_type: Option<String>,
    pub value: Option<String>,
    pub placeholder: Option<String>,
    pub required: bool,
    pub max_length: Option<u32>,
    /// `None` for non-checkable fields; `Some(state)` for checkbox/radio.
    pub checked: Option<bool>,
    /// Options in document order; empty for anything but `<select>`.
    pub options: Vec<SelectOption>,
    pub locator: FieldLocator,
}

impl FormField {
    pub fn is_hidden(&self) -> bool {
        self.input_type.as_deref() == Some("hidden")
    }

    pub fn is_checkbox(&self) -> bool {
        self.input_type.as_deref() == Some("checkbox")
    }

    pub fn is_submit(&self) -> bool {
        self.input_type.as_deref() == Some("submit")
    }

    /// Fields that accept typed text.
    pub fn is_texty(&self) -> bool {
        match self.kind {
            FieldKind::TextArea => true,
            FieldKind::Input => !matches!(
                self.input_type.as_deref(),
                Some("checkbox" | "radio" | "hidden" | "submit" | "button" | "image" | "file")
            ),
            _ => false,
        }
    }
}

/// One `<form>` element's schema.
#[derive(Debug, Clone, Serialize)]
pub struct Form {
    /// Ordinal position of the form within the page (0-based).
    pub index: usize,
    pub action: Option<String>,
    pub method: FormMethod,
    pub id: Option<String>,
    pub classes: Vec<String>,
    /// Action resolved against the page URL; `None` only when the action is
    /// missing or cannot be resolved.
    pub action_absolute: Option<String>,
    /// Fields in document order.
    pub fields: Vec<FormField>,
}

impl Form {
    /// The form's submit control per the extracted schema: the first
    /// submit-typed input, or button whose type is submit (explicitly or by
    /// the button default).
    pub fn submit_control(&self) -> Option<&FormField> {
        self.fields.iter().find(|f| match f.kind {
            FieldKind::Input => f.input_type.as_deref() == Some("submit"),
            FieldKind::Button => matches!(f.input_type.as_deref(), None | Some("submit")),
            _ => false,
        })
    }
}

/// Extract every `<form>` in `html` as a schema, in document order.
///
/// `base_url` is used only to resolve relative `action` attributes.
pub fn extract_forms(html: &str, base_url: &str) -> Vec<Form> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form").expect("static selector");
    let field_sel =
        Selector::parse("input, textarea, select, button").expect("static selector");
    let option_sel = Selector::parse("option").expect("static selector");

    let base = Url::parse(base_url).ok();

    // Locator indices count matches across the whole document, in the same
    // document order `querySelectorAll` uses.
    let mut selector_counts: HashMap<String, usize> = HashMap::new();

    document
        .select(&form_sel)
        .enumerate()
        .map(|(index, form_el)| {
            let action = form_el.value().attr("action").map(str::to_string);
            let method = match form_el.value().attr("method") {
                Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
                _ => FormMethod::Get,
            };
            let action_absolute = match (&base, &action) {
                (Some(base), Some(action)) => base.join(action).ok().map(|u| u.to_string()),
                _ => None,
            };

            let fields = form_el
                .select(&field_sel)
                .filter_map(|field_el| {
                    extract_field(field_el, &mut selector_counts, &option_sel)
                })
                .collect();

            Form {
                index,
                action,
                method,
                id: form_el.value().attr("id").map(str::to_string),
                classes: form_el.value().classes().map(str::to_string).collect(),
                action_absolute,
                fields,
            }
        })
        .collect()
}

/// Selector matching every form control in the document, used by
/// position-only locators.
const ANY_CONTROL_CSS: &str = "form :is(input, textarea, select, button)";

fn extract_field(
    el: ElementRef<'_>,
    selector_counts: &mut HashMap<String, usize>,
    option_sel: &Selector,
) -> Option<FormField> {
    let kind = FieldKind::from_tag(el.value().name())?;
    let name = el.value().attr("name").map(str::to_string);
    let id = el.value().attr("id").map(str::to_string);
    let input_type = el.value().attr("type").map(str::to_string);
    let mut value = el.value().attr("value").map(str::to_string);

    let checked = match input_type.as_deref() {
        Some("checkbox" | "radio") => Some(el.value().attr("checked").is_some()),
        _ => None,
    };

    let mut options = Vec::new();
    if kind == FieldKind::Select {
        for opt in el.select(option_sel) {
            options.push(SelectOption {
                value: opt.value().attr("value").map(str::to_string),
                label: opt.text().collect::<String>().trim().to_string(),
                selected: opt.value().attr("selected").is_some(),
            });
        }
        // Default-selection policy, matching what an untouched submission
        // would send: an explicitly selected option wins, otherwise the
        // first option is the default.
        if let Some(selected) = options.iter().find(|o| o.selected) {
            value = selected.value.clone();
        } else if let Some(first) = options.first() {
            value = first.value.clone();
        }
    }

    // Every extracted field bumps the position-only counter: the catch-all
    // selector matches each of them, so its index is the global field
    // ordinal.
    let position_entry = selector_counts.entry(ANY_CONTROL_CSS.to_string()).or_insert(0);
    let position = *position_entry;
    *position_entry += 1;

    let locator = if let Some(id) = &id {
        // ids are document-unique, no index needed.
        FieldLocator {
            css: format!(r#"[id="{}"]"#, css_escape(id)),
            index: 0,
        }
    } else if let Some(name) = &name {
        let css = format!(r#"form [name="{}"]"#, css_escape(name));
        let entry = selector_counts.entry(css.clone()).or_insert(0);
        let locator = FieldLocator { css, index: *entry };
        *entry += 1;
        locator
    } else {
        FieldLocator {
            css: ANY_CONTROL_CSS.to_string(),
            index: position,
        }
    };

    Some(FormField {
        kind,
        name,
        id,
        input_type,
        value,
        placeholder: el.value().attr("placeholder").map(str::to_string),
        required: el.value().attr("required").is_some(),
        max_length: el
            .value()
            .attr("maxlength")
            .and_then(|m| m.trim().parse().ok()),
        checked,
        options,
        locator,
    })
}

/// Escape a value for embedding inside a double-quoted CSS attribute selector.
fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
