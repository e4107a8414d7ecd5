//! Change notifications emitted by a [`crate::resource::TextResource`].
//!
//! Every mutation of a resource's model or diagnostics is recorded as a [`ResourceEvent`] in a
//! journal. Outside of a load pipeline the journal is flushed after each operation; a pipeline
//! flushes its whole journal as one [`EventBatch`] after commit, or drops it if the pipeline was
//! cancelled. Observers therefore never see events for content that was never committed.
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use url::Url;

use crate::{codec::diagnostic::Severity, error::ResourceError, model::NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceEvent {
    /// A root node was attached to the resource
    ContentsAdded(NodeId),
    /// A root node was detached from the resource
    ContentsRemoved(NodeId),
    /// A single-valued feature was (re)assigned, including proxy replacement
    FeatureSet { node: NodeId, feature: String },
    /// A value was appended to a many-valued feature
    FeatureAdded { node: NodeId, feature: String },
    /// An attribute value changed
    AttributeSet { node: NodeId, attribute: String },
    ProblemsChanged { severity: Severity },
    Loaded(bool),
    Unloaded,
    UriChanged(Url),
}

impl Display for ResourceEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ResourceEvent::ContentsAdded(node) => write!(f, "ContentsAdded({node})"),
            ResourceEvent::ContentsRemoved(node) => write!(f, "ContentsRemoved({node})"),
            ResourceEvent::FeatureSet { node, feature } => {
                write!(f, "FeatureSet({node}.{feature})")
            }
            ResourceEvent::FeatureAdded { node, feature } => {
                write!(f, "FeatureAdded({node}.{feature})")
            }
            ResourceEvent::AttributeSet { node, attribute } => {
                write!(f, "AttributeSet({node}.{attribute})")
            }
            ResourceEvent::ProblemsChanged { severity } => write!(f, "ProblemsChanged({severity})"),
            ResourceEvent::Loaded(loaded) => write!(f, "Loaded({loaded})"),
            ResourceEvent::Unloaded => write!(f, "Unloaded"),
            ResourceEvent::UriChanged(uri) => write!(f, "UriChanged({uri})"),
        }
    }
}

/// The unit of delivery to observers.
pub type EventBatch = Vec<ResourceEvent>;

/// Registered observers of one resource.
#[derive(Debug, Default)]
pub struct Observers {
    senders: Vec<UnboundedSender<EventBatch>>,
}

impl Observers {
    pub fn subscribe(&mut self) -> UnboundedReceiver<EventBatch> {
        let (tx, rx) = unbounded_channel();
        self.senders.push(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send `batch` to every live observer. Observers whose receiver was dropped are pruned.
    /// Empty batches are not delivered.
    pub fn dispatch(&mut self, batch: EventBatch) {
        if batch.is_empty() {
            return;
        }
        tracing::trace!("[Observers] dispatching batch of {} events", batch.len());
        self.senders.retain(|tx| match tx.send(batch.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    "[Observers] pruning closed observer: {}",
                    ResourceError::from(e)
                );
                false
            }
        });
    }
}
