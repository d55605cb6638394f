//! Host page node model
//!
//! A flattened view of an inserted page node: its own tag, classes and
//! rendered text, plus its descendants in document order. Identity is the
//! `NodeHandle` assigned by the host, not the content, so two identical
//! messages rendered twice are still two nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a page node for the lifetime of the page view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHandle(pub u64);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A descendant element of an inserted node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageElement {
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub text: String,
}

impl PageElement {
    pub fn new(tag: &str, classes: &[&str], text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            text: text.to_string(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// An element inserted into the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageNode {
    pub handle: NodeHandle,
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    /// Rendered text of the whole subtree
    #[serde(default)]
    pub text: String,
    /// Descendant elements in document order
    #[serde(default)]
    pub descendants: Vec<PageElement>,
}

impl PageNode {
    pub fn new(handle: u64, tag: &str, classes: &[&str], text: &str) -> Self {
        Self {
            handle: NodeHandle(handle),
            tag: tag.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            text: text.to_string(),
            descendants: Vec::new(),
        }
    }

    pub fn with_descendant(mut self, element: PageElement) -> Self {
        self.descendants.push(element);
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn has_all_classes(&self, classes: &[&str]) -> bool {
        classes.iter().all(|c| self.has_class(c))
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    /// First descendant matching a tag and (optionally) a class
    pub fn first_descendant(&self, tag: &str, class: Option<&str>) -> Option<&PageElement> {
        self.descendants
            .iter()
            .find(|e| e.is_tag(tag) && class.map_or(true, |c| e.has_class(c)))
    }

    /// First descendant carrying a class, whatever its tag
    pub fn first_with_class(&self, class: &str) -> Option<&PageElement> {
        self.descendants.iter().find(|e| e.has_class(class))
    }

    /// Descendants whose tag is one of `tags`, in document order
    pub fn descendants_tagged<'a>(
        &'a self,
        tags: &'a [&'a str],
    ) -> impl Iterator<Item = &'a PageElement> + 'a {
        self.descendants
            .iter()
            .filter(move |e| tags.iter().any(|t| e.is_tag(t)))
    }
}
