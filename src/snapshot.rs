//! DOM snapshotting.
//!
//! One snapshot per loop iteration: a bounded, prioritized list of the
//! page's interactive elements, captured by injected script and shaped on
//! this side so the ordering and truncation rules stay testable. Snapshots
//! reflect live page state at call time and are discarded after the
//! iteration that took them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::driver::BrowserDriver;

/// Interactive-element candidates, in document order. Visibility filtering
/// needs computed styles, so it happens in the page; prioritization and
/// truncation happen in Rust.
const CAPTURE_SCRIPT: &str = r#"
const selectors = 'a, button, input, textarea, select, [role="button"], [role="link"], [role="search"], [role="textbox"], form';
const all = Array.from(document.querySelectorAll(selectors));
const visible = all.filter(el => {
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    const isVisible = rect.width > 0 && rect.height > 0 &&
                      style.visibility !== 'hidden' &&
                      style.display !== 'none';
    const textPresent = el.textContent && el.textContent.trim().length > 0;
    const hasAttributes = el.getAttribute('placeholder') || el.getAttribute('aria-label') || el.id || el.href;
    return isVisible && (textPresent || hasAttributes);
});
return visible.map(el => ({
    tag: el.tagName.toLowerCase(),
    text: el.textContent ? el.textContent.trim() : "",
    attributes: {
        id: el.id || null,
        name: el.name || null,
        class: el.className || null,
        placeholder: el.getAttribute('placeholder') || null,
        'aria-label': el.getAttribute('aria-label') || null,
        href: el.href || null,
        title: el.getAttribute('title') || null
    },
    position: {
        top: Math.round(el.getBoundingClientRect().top),
        left: Math.round(el.getBoundingClientRect().left)
    }
}));
"#;

/// Attribute order used when summarizing an element for the oracle.
const SUMMARY_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "class",
    "placeholder",
    "aria-label",
    "title",
    "href",
];

const TEXT_CLAMP: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementPosition {
    pub top: f64,
    pub left: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// One interactive element as seen at snapshot time. Never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomElement {
    pub tag: String,
    pub text: String,
    pub attributes: HashMap<String, Option<String>>,
    pub position: ElementPosition,
}

impl DomElement {
    /// Priority bucket: inputs and buttons first, then links, then the rest.
    pub fn priority(&self) -> u8 {
        match self.tag.as_str() {
            "input" | "button" => 1,
            "a" => 2,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomSnapshot {
    pub elements: Vec<DomElement>,
}

impl DomSnapshot {
    /// Capture the current page's interactive elements, at most
    /// `max_elements` of them. A script failure degrades to an empty
    /// snapshot; the loop carries on with what it has.
    pub async fn capture(driver: &dyn BrowserDriver, max_elements: usize) -> Self {
        let raw = match driver.execute_script(CAPTURE_SCRIPT, Vec::new()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "dom snapshot script failed");
                return Self::default();
            }
        };
        let elements: Vec<DomElement> = match serde_json::from_value(raw) {
            Ok(elements) => elements,
            Err(err) => {
                warn!(%err, "dom snapshot payload malformed");
                return Self::default();
            }
        };
        Self {
            elements: shape_elements(elements, max_elements),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Render the element list the way the oracle prompt expects it:
    /// one `tag: 'text' (attr='value', ...)` line per element.
    pub fn render_summary(&self) -> String {
        if self.elements.is_empty() {
            return "No interactive elements found.".to_string();
        }
        let mut lines = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            let mut line = format!("{}: '{}'", element.tag, element.text);
            let attrs: Vec<String> = SUMMARY_ATTRIBUTES
                .iter()
                .filter_map(|key| {
                    element
                        .attributes
                        .get(*key)
                        .and_then(|value| value.as_deref())
                        .filter(|value| !value.is_empty())
                        .map(|value| format!("{key}='{value}'"))
                })
                .collect();
            if !attrs.is_empty() {
                line.push_str(&format!(" ({})", attrs.join(", ")));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Stable priority sort (document order breaks ties), bounded length,
/// clamped text.
fn shape_elements(mut elements: Vec<DomElement>, max_elements: usize) -> Vec<DomElement> {
    elements.sort_by_key(DomElement::priority);
    elements.truncate(max_elements);
    for element in &mut elements {
        element.text = clamp_text(&element.text);
    }
    elements
}

fn clamp_text(text: &str) -> String {
    if text.chars().count() > TEXT_CLAMP {
        let clipped: String = text.chars().take(TEXT_CLAMP).collect();
        format!("{clipped}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, text: &str) -> DomElement {
        DomElement {
            tag: tag.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn sort_is_stable_within_buckets() {
        let shaped = shape_elements(
            vec![
                element("a", "first link"),
                element("div", "container"),
                element("input", "query"),
                element("a", "second link"),
                element("button", "Go"),
            ],
            10,
        );
        let order: Vec<(&str, &str)> = shaped
            .iter()
            .map(|el| (el.tag.as_str(), el.text.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("input", "query"),
                ("button", "Go"),
                ("a", "first link"),
                ("a", "second link"),
                ("div", "container"),
            ]
        );
    }

    #[test]
    fn buckets_are_non_decreasing_and_bounded() {
        let mut elements = Vec::new();
        for i in 0..50 {
            let tag = match i % 3 {
                0 => "a",
                1 => "span",
                _ => "input",
            };
            elements.push(element(tag, &format!("el{i}")));
        }
        let shaped = shape_elements(elements, 20);
        assert_eq!(shaped.len(), 20);
        let buckets: Vec<u8> = shaped.iter().map(DomElement::priority).collect();
        let mut sorted = buckets.clone();
        sorted.sort_unstable();
        assert_eq!(buckets, sorted);
    }

    #[test]
    fn long_text_is_clamped_with_ellipsis() {
        let long = "x".repeat(150);
        let shaped = shape_elements(vec![element("button", &long)], 10);
        assert_eq!(shaped[0].text.chars().count(), TEXT_CLAMP + 3);
        assert!(shaped[0].text.ends_with("..."));

        let short = shape_elements(vec![element("button", "ok")], 10);
        assert_eq!(short[0].text, "ok");
    }

    #[test]
    fn summary_lists_attributes_in_fixed_order() {
        let mut el = element("input", "");
        el.attributes
            .insert("name".to_string(), Some("q".to_string()));
        el.attributes
            .insert("placeholder".to_string(), Some("Search".to_string()));
        el.attributes.insert("href".to_string(), None);
        let snapshot = DomSnapshot { elements: vec![el] };
        assert_eq!(
            snapshot.render_summary(),
            "input: '' (name='q', placeholder='Search')"
        );
    }

    #[test]
    fn empty_snapshot_has_placeholder_summary() {
        let snapshot = DomSnapshot::default();
        assert_eq!(snapshot.render_summary(), "No interactive elements found.");
    }
}
