//! The wrapped story-element service contract.
//!
//! The resilience layer does not own element semantics; it only needs this narrow
//! async interface. Persistence lives behind an implementation of [`ElementService`].

mod memory;

pub use memory::InMemoryElementService;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of narrative entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Character,
    Location,
    Item,
    Event,
    Faction,
    Theme,
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ElementType::Character => "character",
            ElementType::Location => "location",
            ElementType::Item => "item",
            ElementType::Event => "event",
            ElementType::Faction => "faction",
            ElementType::Theme => "theme",
        };
        f.write_str(s)
    }
}

/// A story element as returned by the wrapped service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: i64,
    pub element_type: ElementType,
    pub title: String,
    pub description: String,
}

impl Element {
    pub fn new(
        id: i64,
        element_type: ElementType,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            element_type,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Operations the facade wraps. Implementations must be shareable across tasks.
#[async_trait]
pub trait ElementService: Send + Sync {
    async fn create_element(
        &self,
        element_type: ElementType,
        title: &str,
        description: &str,
    ) -> Result<Element>;

    async fn get_element_by_id(&self, id: i64) -> Result<Option<Element>>;

    async fn search_elements(&self, term: &str) -> Result<Vec<Element>>;

    async fn update_element(&self, element: Element) -> Result<Element>;

    async fn delete_element(&self, id: i64) -> Result<bool>;

    async fn link_elements(&self, a: i64, b: i64) -> Result<bool>;

    async fn load_large_dataset(&self, count: usize) -> Result<()>;
}
