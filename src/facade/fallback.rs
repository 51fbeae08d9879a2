//! Offline placeholders served when the backend path fails.

use crate::service::{Element, ElementType};

/// Appended to the title of every placeholder element.
pub const OFFLINE_TITLE_SUFFIX: &str = " (Offline)";
pub const CREATED_OFFLINE_MARKER: &str = "created offline due to error";
pub const UPDATED_OFFLINE_MARKER: &str = "updated offline due to error";
/// Placeholders have no backend identity yet.
pub const OFFLINE_ELEMENT_ID: i64 = 0;

fn mark(description: &str, marker: &str) -> String {
    if description.is_empty() {
        marker.to_string()
    } else {
        format!("{} - {}", description, marker)
    }
}

pub fn offline_created(element_type: ElementType, title: &str, description: &str) -> Element {
    Element::new(
        OFFLINE_ELEMENT_ID,
        element_type,
        format!("{}{}", title, OFFLINE_TITLE_SUFFIX),
        mark(description, CREATED_OFFLINE_MARKER),
    )
}

/// The caller's intended update, marked as not yet applied.
pub fn offline_updated(element: &Element) -> Element {
    Element {
        id: element.id,
        element_type: element.element_type,
        title: format!("{}{}", element.title, OFFLINE_TITLE_SUFFIX),
        description: mark(&element.description, UPDATED_OFFLINE_MARKER),
    }
}

pub fn is_offline(element: &Element) -> bool {
    element.title.ends_with(OFFLINE_TITLE_SUFFIX)
}
