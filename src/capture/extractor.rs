//! Pair Extractor
//!
//! Turns one flushed batch of nodes into the prompt/response pairs it
//! completes. Runs to completion without suspending, so membership tests and
//! inserts on the processed set never interleave between flushes.

use std::collections::HashSet;
use tracing::debug;

use crate::capture::classifier::{classifier_for, TurnClassifier};
use crate::capture::node::{NodeHandle, PageNode};
use crate::identity::Service;
use crate::turn::{ConversationDelta, ConversationTurn};

/// Nodes already folded into some delta. Holds handles only, never the nodes.
#[derive(Debug, Default, Clone)]
pub struct ProcessedNodeSet {
    handles: HashSet<NodeHandle>,
}

impl ProcessedNodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.handles.contains(&handle)
    }

    /// Returns false if the handle was already a member
    pub fn insert(&mut self, handle: NodeHandle) -> bool {
        self.handles.insert(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Pair user and assistant texts positionally. An unmatched tail on either
/// side is dropped for this flush.
pub fn pair_texts(user_texts: Vec<String>, assistant_texts: Vec<String>) -> Vec<ConversationTurn> {
    user_texts
        .into_iter()
        .zip(assistant_texts)
        .map(|(prompt, response)| ConversationTurn { prompt, response })
        .collect()
}

pub struct PairExtractor {
    classifier: Box<dyn TurnClassifier>,
    processed: ProcessedNodeSet,
}

impl PairExtractor {
    pub fn new(classifier: Box<dyn TurnClassifier>) -> Self {
        Self {
            classifier,
            processed: ProcessedNodeSet::new(),
        }
    }

    pub fn for_service(service: Service) -> Self {
        Self::new(classifier_for(service))
    }

    pub fn service(&self) -> Service {
        self.classifier.service()
    }

    pub fn processed(&self) -> &ProcessedNodeSet {
        &self.processed
    }

    /// Extract the delta for one flush
    pub fn extract(&mut self, nodes: &[PageNode]) -> ConversationDelta {
        let mut user_texts = Vec::new();
        let mut assistant_texts = Vec::new();

        for node in nodes {
            if self.processed.contains(node.handle) {
                continue;
            }
            if !self.classifier.is_message_container(node) {
                continue;
            }
            self.processed.insert(node.handle);

            let classified = self.classifier.classify(node);
            if let Some(prompt) = classified.prompt {
                user_texts.push(prompt);
            }
            if let Some(response) = classified.response {
                assistant_texts.push(response);
            }
        }

        if user_texts.len() != assistant_texts.len() {
            debug!(
                service = %self.service(),
                prompts = user_texts.len(),
                responses = assistant_texts.len(),
                "Unmatched texts withheld from this flush"
            );
        }

        ConversationDelta::new(pair_texts(user_texts, assistant_texts))
    }
}
