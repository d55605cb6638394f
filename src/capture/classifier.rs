//! Turn classifiers
//!
//! Each chat service renders messages with its own markup. A classifier
//! knows one service's message-container signature and how to pull the
//! prompt or response text out of a container. Markup changes on a host
//! page are confined to its adapter here.

use crate::capture::node::PageNode;
use crate::identity::Service;

/// Text pulled out of one message container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub prompt: Option<String>,
    pub response: Option<String>,
}

pub trait TurnClassifier: Send + Sync {
    fn service(&self) -> Service;

    /// Structural signature of a message container
    fn is_message_container(&self, node: &PageNode) -> bool;

    /// Extract authored text from a node already known to be a container
    fn classify(&self, node: &PageNode) -> Classified;
}

/// Classifier for a service's current markup
pub fn classifier_for(service: Service) -> Box<dyn TurnClassifier> {
    match service {
        Service::ChatGpt => Box::new(ChatGptClassifier),
        Service::Claude => Box::new(ClaudeClassifier),
        Service::Gemini => Box::new(GeminiClassifier),
    }
}

/// Trimmed text of every descendant with one of `tags`, newline-joined
fn joined_text(node: &PageNode, tags: &[&str]) -> String {
    node.descendants_tagged(tags)
        .map(|e| e.text.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub struct ChatGptClassifier;

impl ChatGptClassifier {
    const CONTAINER_CLASSES: &'static [&'static str] = &["text-token-text-primary", "w-full"];
    const USER_MARKER: &'static str = "You said:";
    const ASSISTANT_MARKER: &'static str = "ChatGPT said:";
    const PROMPT_CLASS: &'static str = "whitespace-pre-wrap";
    const RESPONSE_TAGS: &'static [&'static str] = &["p", "code"];
}

impl TurnClassifier for ChatGptClassifier {
    fn service(&self) -> Service {
        Service::ChatGpt
    }

    fn is_message_container(&self, node: &PageNode) -> bool {
        node.has_all_classes(Self::CONTAINER_CLASSES)
    }

    fn classify(&self, node: &PageNode) -> Classified {
        let mut out = Classified::default();

        // A container can carry both markers; each is checked independently
        if node.text.contains(Self::USER_MARKER) {
            out.prompt = node
                .first_descendant("div", Some(Self::PROMPT_CLASS))
                .map(|e| e.text.trim().to_string());
        }
        if node.text.contains(Self::ASSISTANT_MARKER) {
            out.response = Some(joined_text(node, Self::RESPONSE_TAGS));
        }
        out
    }
}

pub struct ClaudeClassifier;

impl ClaudeClassifier {
    const USER_CLASS: &'static str = "font-user-message";
    const ASSISTANT_CLASS: &'static str = "font-claude-message";
    const RESPONSE_TAGS: &'static [&'static str] = &["p", "code", "li"];
}

impl TurnClassifier for ClaudeClassifier {
    fn service(&self) -> Service {
        Service::Claude
    }

    fn is_message_container(&self, node: &PageNode) -> bool {
        node.has_class(Self::USER_CLASS) || node.has_class(Self::ASSISTANT_CLASS)
    }

    fn classify(&self, node: &PageNode) -> Classified {
        let mut out = Classified::default();
        if node.has_class(Self::USER_CLASS) {
            out.prompt = non_empty(joined_text(node, &["p"]))
                .or_else(|| non_empty(node.text.trim().to_string()));
        }
        if node.has_class(Self::ASSISTANT_CLASS) {
            out.response = Some(joined_text(node, Self::RESPONSE_TAGS));
        }
        out
    }
}

pub struct GeminiClassifier;

impl GeminiClassifier {
    const USER_TAG: &'static str = "user-query";
    const ASSISTANT_TAG: &'static str = "model-response";
    const PROMPT_CLASS: &'static str = "query-text";
    const RESPONSE_TAGS: &'static [&'static str] = &["p", "code", "li"];
}

impl TurnClassifier for GeminiClassifier {
    fn service(&self) -> Service {
        Service::Gemini
    }

    fn is_message_container(&self, node: &PageNode) -> bool {
        node.is_tag(Self::USER_TAG) || node.is_tag(Self::ASSISTANT_TAG)
    }

    fn classify(&self, node: &PageNode) -> Classified {
        let mut out = Classified::default();
        if node.is_tag(Self::USER_TAG) {
            out.prompt = node
                .first_with_class(Self::PROMPT_CLASS)
                .map(|e| e.text.trim().to_string())
                .or_else(|| non_empty(node.text.trim().to_string()));
        }
        if node.is_tag(Self::ASSISTANT_TAG) {
            out.response = Some(joined_text(node, Self::RESPONSE_TAGS));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::node::PageElement;

    const CHATGPT_CONTAINER: &[&str] = &["text-token-text-primary", "w-full"];

    #[test]
    fn test_chatgpt_container_signature_needs_both_classes() {
        let c = ChatGptClassifier;
        assert!(c.is_message_container(&PageNode::new(1, "article", CHATGPT_CONTAINER, "")));
        assert!(!c.is_message_container(&PageNode::new(2, "article", &["w-full"], "")));
    }

    #[test]
    fn test_chatgpt_user_prompt() {
        let node = PageNode::new(1, "article", CHATGPT_CONTAINER, "You said:\n  hi there ")
            .with_descendant(PageElement::new("div", &["whitespace-pre-wrap"], "  hi there "));
        let out = ChatGptClassifier.classify(&node);
        assert_eq!(out.prompt.as_deref(), Some("hi there"));
        assert!(out.response.is_none());
    }

    #[test]
    fn test_chatgpt_user_marker_without_prompt_element() {
        let node = PageNode::new(1, "article", CHATGPT_CONTAINER, "You said: hi");
        assert_eq!(ChatGptClassifier.classify(&node), Classified::default());
    }

    #[test]
    fn test_chatgpt_response_joins_paragraphs_and_code() {
        let node = PageNode::new(3, "article", CHATGPT_CONTAINER, "ChatGPT said: ...")
            .with_descendant(PageElement::new("p", &[], " First. "))
            .with_descendant(PageElement::new("span", &[], "ignored"))
            .with_descendant(PageElement::new("code", &[], "let x = 1;"))
            .with_descendant(PageElement::new("p", &[], "Last."));
        let out = ChatGptClassifier.classify(&node);
        assert_eq!(out.response.as_deref(), Some("First.\nlet x = 1;\nLast."));
    }

    #[test]
    fn test_claude_markup() {
        let c = classifier_for(Service::Claude);
        let user = PageNode::new(1, "div", &["font-user-message"], " plain prompt ");
        let assistant = PageNode::new(2, "div", &["font-claude-message"], "")
            .with_descendant(PageElement::new("p", &[], "Answer"))
            .with_descendant(PageElement::new("li", &[], "point"));

        assert!(c.is_message_container(&user));
        assert_eq!(c.classify(&user).prompt.as_deref(), Some("plain prompt"));
        assert_eq!(c.classify(&assistant).response.as_deref(), Some("Answer\npoint"));
        assert!(!c.is_message_container(&PageNode::new(3, "div", &["other"], "")));
    }

    #[test]
    fn test_gemini_markup() {
        let c = classifier_for(Service::Gemini);
        let user = PageNode::new(1, "user-query", &[], "ignored wrapper text")
            .with_descendant(PageElement::new("div", &["query-text"], " what is rust "));
        let assistant = PageNode::new(2, "model-response", &[], "")
            .with_descendant(PageElement::new("p", &[], "A language."));

        assert_eq!(c.service(), Service::Gemini);
        assert_eq!(c.classify(&user).prompt.as_deref(), Some("what is rust"));
        assert_eq!(c.classify(&assistant).response.as_deref(), Some("A language."));
    }
}
