//! Artifact extraction from fetched pages
//!
//! This module derives from a response:
//! - Links to follow (anchors, image maps, canonical links, frames, form actions)
//! - Form descriptors
//! - Technology fingerprints
//!
//! Parsing is lenient. Broken markup yields whatever html5ever recovers.

use crate::crawler::FetchedPage;
use crate::fingerprint::{SignatureTable, TechSignal};
use crate::url::ScopeFilter;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// One named control of a form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    /// Input type (`text`, `password`, ...), or the tag for `select` and `textarea`
    #[serde(rename = "type")]
    pub field_type: String,
}

/// A form found on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescriptor {
    /// Absolute action URL (the page URL when the form has none)
    pub action: String,
    /// Uppercased HTTP method
    pub method: String,
    pub fields: Vec<FormField>,
}

/// Everything extracted from one page
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// In-scope absolute links, deduplicated, in document order
    pub links: Vec<Url>,
    pub forms: Vec<FormDescriptor>,
    pub fingerprints: Vec<TechSignal>,
}

/// Extracts links, forms and fingerprints from `page`
///
/// Links and forms come from successful responses only. A redirect that was
/// not followed contributes its `Location`. Fingerprints are taken from every
/// response, error pages included.
pub fn extract(page: &FetchedPage, scope: &ScopeFilter, signatures: &SignatureTable) -> Extraction {
    let mut extraction = Extraction {
        fingerprints: signatures.detect(page),
        ..Extraction::default()
    };

    if page.is_redirect() {
        if let Some(location) = page.header("location") {
            if let Some(url) = resolve_link(location, &page.final_url) {
                if scope.contains(&url) {
                    extraction.links.push(url);
                }
            }
        }
        return extraction;
    }

    if !page.is_success() {
        return extraction;
    }

    let document = Html::parse_document(&page.body);
    let base = document_base(&document, &page.final_url);

    extraction.forms = extract_forms(&document, &base);

    let mut seen = HashSet::new();
    let mut candidates = extract_links(&document, &base);
    candidates.extend(
        extraction
            .forms
            .iter()
            .filter_map(|form| Url::parse(&form.action).ok()),
    );

    for mut url in candidates {
        url.set_fragment(None);
        if scope.contains(&url) && seen.insert(url.to_string()) {
            extraction.links.push(url);
        }
    }

    extraction
}

/// Honors `<base href>` when present
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Extracts every followable link in the document
fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let sources = [
        ("a[href]", "href"),
        ("area[href]", "href"),
        ("link[rel][href]", "href"),
        ("iframe[src]", "src"),
        ("frame[src]", "src"),
    ];

    let mut links = Vec::new();
    for (css, attr) in sources {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            let el = element.value();

            if el.attr("download").is_some() {
                continue;
            }

            if el.name() == "link" && !is_canonical(el.attr("rel").unwrap_or("")) {
                continue;
            }

            if let Some(url) = el.attr(attr).and_then(|value| resolve_link(value, base)) {
                links.push(url);
            }
        }
    }

    links
}

fn is_canonical(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case("canonical"))
}

/// Extracts every form in the document
fn extract_forms(document: &Html, base: &Url) -> Vec<FormDescriptor> {
    let (Ok(form_selector), Ok(field_selector)) = (
        Selector::parse("form"),
        Selector::parse("input[name], select[name], textarea[name], button[name]"),
    ) else {
        return Vec::new();
    };

    document
        .select(&form_selector)
        .map(|form| {
            let action = form
                .value()
                .attr("action")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .and_then(|a| base.join(a).ok())
                .unwrap_or_else(|| base.clone());

            let method = form
                .value()
                .attr("method")
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or("GET")
                .to_ascii_uppercase();

            let fields = form
                .select(&field_selector)
                .filter_map(form_field)
                .collect();

            FormDescriptor {
                action: action.to_string(),
                method,
                fields,
            }
        })
        .collect()
}

fn form_field(element: ElementRef<'_>) -> Option<FormField> {
    let el = element.value();
    let name = el.attr("name")?.trim();
    if name.is_empty() {
        return None;
    }

    let declared = el
        .attr("type")
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty());

    let field_type = match el.name() {
        "input" => declared.unwrap_or_else(|| "text".to_string()),
        "button" => declared.unwrap_or_else(|| "submit".to_string()),
        other => other.to_string(),
    };

    Some(FormField {
        name: name.to_string(),
        field_type,
    })
}

/// Resolves an href to an absolute http(s) URL
///
/// Returns None for:
/// - javascript:, mailto:, tel: and data: targets
/// - Fragment-only references
/// - Anything that does not resolve to http or https
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
