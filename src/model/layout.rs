//! Layout information recorded by parsers so printers can reproduce the original text.
//!
//! Each node may carry one [`LayoutInformation`] adapter: the ordered tokens that made up the
//! node's own text, including the hidden tokens (whitespace, comments) in front of it. Object
//! references remember the [`ObjectRef`] they stood for; when a proxy is resolved the resource
//! swaps the proxy for the resolved target in every layout adapter of the container, so that a
//! printer can deresolve the real element.
use serde::{Deserialize, Serialize};

use super::ObjectRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutToken {
    /// Whitespace, line breaks and comments
    Hidden(String),
    /// Literal syntax such as `->` or `,`
    Keyword(String),
    /// Text of an attribute value
    Value { feature: String, text: String },
    /// Text of an object reference together with the element it denotes
    Reference {
        feature: String,
        target: ObjectRef,
        text: String,
    },
}

impl LayoutToken {
    /// The text exactly as it was read.
    pub fn text(&self) -> &str {
        match self {
            LayoutToken::Hidden(text) | LayoutToken::Keyword(text) => text,
            LayoutToken::Value { text, .. } | LayoutToken::Reference { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutInformation {
    tokens: Vec<LayoutToken>,
}

impl LayoutInformation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: LayoutToken) {
        self.tokens.push(token);
    }

    pub fn hidden(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.tokens.push(LayoutToken::Hidden(text));
        }
    }

    pub fn keyword(&mut self, text: impl Into<String>) {
        self.tokens.push(LayoutToken::Keyword(text.into()));
    }

    pub fn value(&mut self, feature: impl Into<String>, text: impl Into<String>) {
        self.tokens.push(LayoutToken::Value {
            feature: feature.into(),
            text: text.into(),
        });
    }

    pub fn reference(&mut self, feature: impl Into<String>, target: ObjectRef, text: impl Into<String>) {
        self.tokens.push(LayoutToken::Reference {
            feature: feature.into(),
            target,
            text: text.into(),
        });
    }

    pub fn tokens(&self) -> &[LayoutToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Replace every reference token pointing at `proxy` with `target`. Returns the number of
    /// tokens rewritten.
    pub fn replace_proxy(&mut self, proxy: &ObjectRef, target: &ObjectRef) -> usize {
        let mut replaced = 0;
        for token in self.tokens.iter_mut() {
            if let LayoutToken::Reference { target: current, .. } = token {
                if current == proxy {
                    *current = target.clone();
                    replaced += 1;
                }
            }
        }
        replaced
    }

    /// Concatenated original text.
    pub fn source_text(&self) -> String {
        self.tokens.iter().map(LayoutToken::text).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn replace_proxy_only_touches_matching_references() {
        let proxy = ObjectRef::Local(NodeId::from(7));
        let other = ObjectRef::Local(NodeId::from(8));
        let target = ObjectRef::Local(NodeId::from(2));

        let mut layout = LayoutInformation::new();
        layout.hidden("  ");
        layout.value("name", "A");
        layout.keyword(" -> ");
        layout.reference("refs", proxy.clone(), "B");
        layout.keyword(", ");
        layout.reference("refs", other.clone(), "C");

        assert_eq!(layout.replace_proxy(&proxy, &target), 1);
        assert_eq!(layout.replace_proxy(&proxy, &target), 0);
        assert_eq!(layout.source_text(), "  A -> B, C");
        let targets: Vec<&ObjectRef> = layout
            .tokens()
            .iter()
            .filter_map(|t| match t {
                LayoutToken::Reference { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![&target, &other]);
    }
}
