use super::{Element, ElementService, ElementType};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

const GENERATED_TYPES: [ElementType; 4] = [
    ElementType::Character,
    ElementType::Location,
    ElementType::Item,
    ElementType::Event,
];

/// Thread-safe in-memory element store with failure injection.
///
/// Used by the demo binary and tests as a stand-in for the real backend. Every call,
/// failed or not, bumps [`call_count`](Self::call_count).
pub struct InMemoryElementService {
    elements: RwLock<BTreeMap<i64, Element>>,
    links: RwLock<BTreeSet<(i64, i64)>>,
    next_id: AtomicI64,
    offline: AtomicBool,
    fail_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl InMemoryElementService {
    pub fn new() -> Self {
        Self {
            elements: RwLock::new(BTreeMap::new()),
            links: RwLock::new(BTreeSet::new()),
            next_id: AtomicI64::new(1),
            offline: AtomicBool::new(false),
            fail_remaining: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_call_count(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.elements.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_linked(&self, a: i64, b: i64) -> bool {
        self.links
            .read()
            .map(|l| l.contains(&ordered(a, b)))
            .unwrap_or(false)
    }

    fn check_available(&self, operation: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(unavailable(operation, "backend offline"));
        }
        let injected = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(unavailable(operation, "injected failure"));
        }
        Ok(())
    }

    fn insert_new(&self, element_type: ElementType, title: &str, description: &str) -> Result<Element> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let element = Element::new(id, element_type, title, description);
        self.elements
            .write()
            .map_err(|_| poisoned("elements"))?
            .insert(id, element.clone());
        Ok(element)
    }
}

impl Default for InMemoryElementService {
    fn default() -> Self {
        Self::new()
    }
}

fn ordered(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn unavailable(operation: &str, reason: &str) -> Error {
    Error::service_with_context(
        reason,
        ErrorContext::new()
            .with_details(operation)
            .with_source("in_memory_service"),
    )
}

fn poisoned(what: &str) -> Error {
    Error::runtime_with_context(
        format!("{} lock poisoned", what),
        ErrorContext::new().with_source("in_memory_service"),
    )
}

#[async_trait]
impl ElementService for InMemoryElementService {
    async fn create_element(
        &self,
        element_type: ElementType,
        title: &str,
        description: &str,
    ) -> Result<Element> {
        self.check_available("create_element")?;
        if title.trim().is_empty() {
            return Err(Error::validation_with_context(
                "element title must not be empty",
                ErrorContext::new()
                    .with_field_path("title")
                    .with_source("in_memory_service"),
            ));
        }
        self.insert_new(element_type, title, description)
    }

    async fn get_element_by_id(&self, id: i64) -> Result<Option<Element>> {
        self.check_available("get_element_by_id")?;
        let elements = self.elements.read().map_err(|_| poisoned("elements"))?;
        Ok(elements.get(&id).cloned())
    }

    async fn search_elements(&self, term: &str) -> Result<Vec<Element>> {
        self.check_available("search_elements")?;
        let needle = term.to_lowercase();
        let elements = self.elements.read().map_err(|_| poisoned("elements"))?;
        Ok(elements
            .values()
            .filter(|e| {
                e.title.to_lowercase().contains(&needle)
                    || e.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn update_element(&self, element: Element) -> Result<Element> {
        self.check_available("update_element")?;
        let mut elements = self.elements.write().map_err(|_| poisoned("elements"))?;
        match elements.get_mut(&element.id) {
            Some(existing) => {
                *existing = element.clone();
                Ok(element)
            }
            None => Err(Error::validation_with_context(
                "element does not exist",
                ErrorContext::new()
                    .with_details(format!("id {}", element.id))
                    .with_source("in_memory_service"),
            )),
        }
    }

    async fn delete_element(&self, id: i64) -> Result<bool> {
        self.check_available("delete_element")?;
        let removed = self
            .elements
            .write()
            .map_err(|_| poisoned("elements"))?
            .remove(&id)
            .is_some();
        if removed {
            self.links
                .write()
                .map_err(|_| poisoned("links"))?
                .retain(|(a, b)| *a != id && *b != id);
        }
        Ok(removed)
    }

    async fn link_elements(&self, a: i64, b: i64) -> Result<bool> {
        self.check_available("link_elements")?;
        {
            let elements = self.elements.read().map_err(|_| poisoned("elements"))?;
            if a == b || !elements.contains_key(&a) || !elements.contains_key(&b) {
                return Ok(false);
            }
        }
        Ok(self
            .links
            .write()
            .map_err(|_| poisoned("links"))?
            .insert(ordered(a, b)))
    }

    async fn load_large_dataset(&self, count: usize) -> Result<()> {
        self.check_available("load_large_dataset")?;
        for i in 0..count {
            let element_type = GENERATED_TYPES[i % GENERATED_TYPES.len()];
            self.insert_new(
                element_type,
                &format!("Generated {} {}", element_type, i + 1),
                &format!("Bulk-loaded {} #{}", element_type, i + 1),
            )?;
        }
        Ok(())
    }
}
