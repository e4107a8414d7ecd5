//! The in-memory object graph of a text resource.
//!
//! A [`Model`] is an arena of [`Node`]s addressed by [`NodeId`]. Nodes carry a class name,
//! string attributes and named feature slots. A slot holds [`ObjectRef`]s: either a node of the
//! same arena or a node of another resource (reached through a target-identifier mapping).
//!
//! Containment is expressed through the child's container back-link: a child appears in a slot of
//! its container *and* points back at `(container, feature)`. Cross references share the same
//! slot representation but leave the target's back-link alone.
//!
//! ## Proxies
//!
//! A proxy is a placeholder node whose `proxy_uri` is set. Parsers create one for every reference
//! they cannot resolve immediately and register it with the resource as a context-dependent
//! fragment. Resolution never mutates the proxy; it rewrites the container's slot (and the
//! container's layout information) to point at the resolved element instead.
//!
//! ## Journal
//!
//! Every structural mutation appends a [`ResourceEvent`] to the model's journal. The owning
//! resource drains it and decides whether to dispatch it immediately or as part of a pipeline
//! batch.
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};
use url::Url;
use uuid::Uuid;

use crate::{error::ResourceError, event::ResourceEvent};

pub mod layout;
pub mod schema;

pub use layout::{LayoutInformation, LayoutToken};
pub use schema::{ClassDefinition, FeatureDefinition, FeatureKind, SchemaRegistry};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value stored in a feature slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    Local(NodeId),
    /// A node owned by another resource. Node ids are only meaningful within one commit, so the
    /// handle carries the `load_id` of the content it was taken from.
    Foreign {
        resource: Url,
        load_id: Uuid,
        node: NodeId,
    },
}

impl ObjectRef {
    pub fn as_local(&self) -> Option<NodeId> {
        match self {
            ObjectRef::Local(id) => Some(*id),
            ObjectRef::Foreign { .. } => None,
        }
    }

    pub fn is_foreign(&self) -> bool {
        matches!(self, ObjectRef::Foreign { .. })
    }
}

impl From<NodeId> for ObjectRef {
    fn from(id: NodeId) -> Self {
        ObjectRef::Local(id)
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ObjectRef::Local(id) => write!(f, "{id}"),
            ObjectRef::Foreign { resource, node, .. } => write!(f, "{resource}{node}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Single(Option<ObjectRef>),
    Many(Vec<ObjectRef>),
}

impl Slot {
    pub fn values(&self) -> Vec<&ObjectRef> {
        match self {
            Slot::Single(value) => value.iter().collect(),
            Slot::Many(values) => values.iter().collect(),
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Slot::Many(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adapter {
    Layout(LayoutInformation),
    /// Free-form key/value annotation attached by post-processors
    Annotation { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    class: String,
    attributes: BTreeMap<String, String>,
    features: BTreeMap<String, Slot>,
    container: Option<(NodeId, String)>,
    adapters: Vec<Adapter>,
    proxy_uri: Option<String>,
}

impl Node {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn slot(&self, feature: &str) -> Option<&Slot> {
        self.features.get(feature)
    }

    pub fn features(&self) -> impl Iterator<Item = (&String, &Slot)> {
        self.features.iter()
    }

    pub fn container(&self) -> Option<(NodeId, &str)> {
        self.container
            .as_ref()
            .map(|(parent, feature)| (*parent, feature.as_str()))
    }

    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    pub fn layout(&self) -> Option<&LayoutInformation> {
        self.adapters.iter().find_map(|adapter| match adapter {
            Adapter::Layout(layout) => Some(layout),
            _ => None,
        })
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.adapters.iter().find_map(|adapter| match adapter {
            Adapter::Annotation { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy_uri.is_some()
    }

    pub fn proxy_uri(&self) -> Option<&str> {
        self.proxy_uri.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    journal: Vec<ResourceEvent>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a detached node of `class`.
    pub fn create(&mut self, class: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            class: class.into(),
            ..Default::default()
        });
        id
    }

    /// Create a detached proxy of `class`. Its proxy URI is assigned when it is registered as a
    /// context-dependent fragment.
    pub fn create_proxy(&mut self, class: impl Into<String>) -> NodeId {
        let id = self.create(class);
        self.nodes[id.index()].proxy_uri = Some(String::new());
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ResourceError> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| ResourceError::NotFound(format!("node {id}")))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn is_proxy(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(Node::is_proxy)
    }

    pub fn set_proxy_uri(&mut self, id: NodeId, uri: impl Into<String>) -> Result<(), ResourceError> {
        self.node_mut(id)?.proxy_uri = Some(uri.into());
        Ok(())
    }

    pub fn class(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(Node::class)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn add_root(&mut self, id: NodeId) -> Result<(), ResourceError> {
        self.node_mut(id)?;
        self.roots.push(id);
        self.journal.push(ResourceEvent::ContentsAdded(id));
        Ok(())
    }

    pub fn remove_root(&mut self, id: NodeId) -> bool {
        let before = self.roots.len();
        self.roots.retain(|root| *root != id);
        let removed = self.roots.len() != before;
        if removed {
            self.journal.push(ResourceEvent::ContentsRemoved(id));
        }
        removed
    }

    pub fn clear_roots(&mut self) {
        for root in std::mem::take(&mut self.roots) {
            self.journal.push(ResourceEvent::ContentsRemoved(root));
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id).and_then(|node| node.attribute(name))
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResourceError> {
        let name = name.into();
        self.node_mut(id)?
            .attributes
            .insert(name.clone(), value.into());
        self.journal.push(ResourceEvent::AttributeSet {
            node: id,
            attribute: name,
        });
        Ok(())
    }

    fn many_slot(
        &mut self,
        id: NodeId,
        feature: &str,
    ) -> Result<&mut Vec<ObjectRef>, ResourceError> {
        let slot = self
            .node_mut(id)?
            .features
            .entry(feature.to_string())
            .or_insert_with(|| Slot::Many(Vec::new()));
        match slot {
            Slot::Many(values) => Ok(values),
            Slot::Single(_) => Err(ResourceError::Codec(format!(
                "feature '{feature}' of node {id} is single-valued"
            ))),
        }
    }

    /// Append `child` to the containment `feature` of `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        feature: &str,
        child: NodeId,
    ) -> Result<(), ResourceError> {
        self.node_mut(child)?.container = Some((parent, feature.to_string()));
        self.many_slot(parent, feature)?
            .push(ObjectRef::Local(child));
        self.journal.push(ResourceEvent::FeatureAdded {
            node: parent,
            feature: feature.to_string(),
        });
        Ok(())
    }

    /// Assign `child` to the single-valued containment `feature` of `parent`.
    pub fn set_child(
        &mut self,
        parent: NodeId,
        feature: &str,
        child: NodeId,
    ) -> Result<(), ResourceError> {
        self.node_mut(child)?.container = Some((parent, feature.to_string()));
        self.set_reference(parent, feature, Some(ObjectRef::Local(child)))
    }

    /// Append `target` to the many-valued reference `feature` of `id`.
    pub fn add_reference(
        &mut self,
        id: NodeId,
        feature: &str,
        target: ObjectRef,
    ) -> Result<(), ResourceError> {
        self.many_slot(id, feature)?.push(target);
        self.journal.push(ResourceEvent::FeatureAdded {
            node: id,
            feature: feature.to_string(),
        });
        Ok(())
    }

    pub fn set_reference(
        &mut self,
        id: NodeId,
        feature: &str,
        target: Option<ObjectRef>,
    ) -> Result<(), ResourceError> {
        self.node_mut(id)?
            .features
            .insert(feature.to_string(), Slot::Single(target));
        self.journal.push(ResourceEvent::FeatureSet {
            node: id,
            feature: feature.to_string(),
        });
        Ok(())
    }

    /// Set a single-valued feature without emitting an event, for the inverse side of a
    /// resolved reference.
    pub fn set_inverse(
        &mut self,
        id: NodeId,
        feature: &str,
        target: ObjectRef,
    ) -> Result<(), ResourceError> {
        self.node_mut(id)?
            .features
            .insert(feature.to_string(), Slot::Single(Some(target)));
        Ok(())
    }

    /// Add `target` to a many-valued feature unless already present. Emits no event: this is the
    /// bookkeeping side of an inverse relation.
    pub fn add_unique(
        &mut self,
        id: NodeId,
        feature: &str,
        target: ObjectRef,
    ) -> Result<bool, ResourceError> {
        let values = self.many_slot(id, feature)?;
        if values.contains(&target) {
            return Ok(false);
        }
        values.push(target);
        Ok(true)
    }

    /// Replace `expected` by `target` in `feature` of `id`. For many-valued slots the value at
    /// `position` is preferred; otherwise the first occurrence is replaced.
    pub fn replace_reference(
        &mut self,
        id: NodeId,
        feature: &str,
        position: Option<usize>,
        expected: &ObjectRef,
        target: ObjectRef,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(id.index()) else {
            return false;
        };
        let replaced = match node.features.get_mut(feature) {
            Some(Slot::Single(current)) if current.as_ref() == Some(expected) => {
                *current = Some(target);
                true
            }
            Some(Slot::Many(values)) => {
                let index = position
                    .filter(|p| values.get(*p) == Some(expected))
                    .or_else(|| values.iter().position(|v| v == expected));
                match index {
                    Some(index) => {
                        values[index] = target;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        if replaced {
            self.journal.push(ResourceEvent::FeatureSet {
                node: id,
                feature: feature.to_string(),
            });
        }
        replaced
    }

    pub fn slot(&self, id: NodeId, feature: &str) -> Option<&Slot> {
        self.node(id).and_then(|node| node.slot(feature))
    }

    pub fn values(&self, id: NodeId, feature: &str) -> Vec<ObjectRef> {
        self.slot(id, feature)
            .map(|slot| slot.values().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes contained by `id`, in feature-name then slot order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut children = Vec::new();
        for (feature, slot) in node.features.iter() {
            for value in slot.values() {
                if let ObjectRef::Local(child) = value {
                    let contained = self
                        .node(*child)
                        .and_then(Node::container)
                        .is_some_and(|(parent, f)| parent == id && f == feature);
                    if contained {
                        children.push(*child);
                    }
                }
            }
        }
        children
    }

    /// Depth-first, pre-order traversal of everything reachable through containment from the
    /// roots. Detached nodes (including proxies) are not visited.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            visited.push(id);
            stack.extend(self.children(id).into_iter().rev());
        }
        visited
    }

    /// First node in traversal order whose attribute `name` equals `value`.
    pub fn find_by_attribute(&self, name: &str, value: &str) -> Option<NodeId> {
        self.walk()
            .into_iter()
            .find(|id| self.attribute(*id, name) == Some(value))
    }

    /// Path fragment such as `/0/@entries.1/@children.0` addressing `id` through containment.
    pub fn uri_fragment(&self, id: NodeId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some((parent, feature)) = self.node(current)?.container() {
            match self.slot(parent, feature)? {
                Slot::Single(_) => segments.push(format!("@{feature}")),
                Slot::Many(values) => {
                    let index = values.iter().position(|v| v == &ObjectRef::Local(current))?;
                    segments.push(format!("@{feature}.{index}"));
                }
            }
            current = parent;
        }
        let root_index = self.roots.iter().position(|root| *root == current)?;
        segments.push(root_index.to_string());
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    /// Inverse of [`Model::uri_fragment`].
    pub fn resolve_uri_fragment(&self, fragment: &str) -> Option<NodeId> {
        let path = fragment.strip_prefix('/')?;
        let mut segments = path.split('/');
        let root_index = match segments.next()? {
            "" => 0,
            index => index.parse::<usize>().ok()?,
        };
        let mut current = *self.roots.get(root_index)?;
        for segment in segments {
            let segment = segment.strip_prefix('@')?;
            let (feature, index) = match segment.split_once('.') {
                Some((feature, index)) => (feature, Some(index.parse::<usize>().ok()?)),
                None => (segment, None),
            };
            let next = match (self.slot(current, feature)?, index) {
                (Slot::Many(values), Some(index)) => values.get(index)?,
                (Slot::Single(Some(value)), None) => value,
                _ => return None,
            };
            current = next.as_local()?;
        }
        Some(current)
    }

    pub fn add_adapter(&mut self, id: NodeId, adapter: Adapter) -> Result<(), ResourceError> {
        self.node_mut(id)?.adapters.push(adapter);
        Ok(())
    }

    pub fn annotate(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResourceError> {
        self.add_adapter(
            id,
            Adapter::Annotation {
                key: key.into(),
                value: value.into(),
            },
        )
    }

    /// Attach layout information to `id`, replacing any previous layout adapter.
    pub fn set_layout(&mut self, id: NodeId, layout: LayoutInformation) -> Result<(), ResourceError> {
        let node = self.node_mut(id)?;
        node.adapters
            .retain(|adapter| !matches!(adapter, Adapter::Layout(_)));
        node.adapters.push(Adapter::Layout(layout));
        Ok(())
    }

    pub fn layout(&self, id: NodeId) -> Option<&LayoutInformation> {
        self.node(id).and_then(Node::layout)
    }

    /// Swap `proxy` for `target` in the layout adapters of `container`.
    pub fn replace_proxy_in_layout(
        &mut self,
        container: NodeId,
        proxy: &ObjectRef,
        target: &ObjectRef,
    ) -> usize {
        let Some(node) = self.nodes.get_mut(container.index()) else {
            return 0;
        };
        node.adapters
            .iter_mut()
            .map(|adapter| match adapter {
                Adapter::Layout(layout) => layout.replace_proxy(proxy, target),
                _ => 0,
            })
            .sum()
    }

    /// Remove every layout adapter. Returns the number of adapters removed.
    pub fn strip_layout(&mut self) -> usize {
        let mut removed = 0;
        for node in self.nodes.iter_mut() {
            let before = node.adapters.len();
            node.adapters
                .retain(|adapter| !matches!(adapter, Adapter::Layout(_)));
            removed += before - node.adapters.len();
        }
        removed
    }

    pub(crate) fn record(&mut self, event: ResourceEvent) {
        self.journal.push(event);
    }

    pub(crate) fn take_journal(&mut self) -> Vec<ResourceEvent> {
        std::mem::take(&mut self.journal)
    }
}
