//! Shared helpers for unit tests

use parking_lot::Mutex;
use std::sync::Arc;
use url::Url;

use crate::{
    codec::{
        diagnostic::{DiagnosticRecord, MarkerSink, ProblemKind},
        outline::OutlineSyntax,
    },
    model::NodeId,
    resource::TextResource,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn outline_uri(name: &str) -> Url {
    Url::parse(&format!("file:///workspace/{name}.outline")).unwrap()
}

pub fn outline_resource(name: &str) -> TextResource {
    TextResource::new(outline_uri(name), Arc::new(OutlineSyntax::new()))
}

/// What a [`RecordingSink`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Mark(DiagnosticRecord),
    UnmarkCause(NodeId),
    UnmarkKind(ProblemKind),
}

/// Marker sink keeping the markers it currently holds and every call it received.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Mutex<Vec<SinkCall>>,
    pub markers: Mutex<Vec<DiagnosticRecord>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self
            .markers
            .lock()
            .iter()
            .map(|m| m.message.clone())
            .collect();
        messages.sort();
        messages
    }
}

impl MarkerSink for RecordingSink {
    fn mark(&self, diagnostic: &DiagnosticRecord) {
        self.calls.lock().push(SinkCall::Mark(diagnostic.clone()));
        self.markers.lock().push(diagnostic.clone());
    }

    fn unmark_cause(&self, _resource: &Url, element: NodeId) {
        self.calls.lock().push(SinkCall::UnmarkCause(element));
        self.markers
            .lock()
            .retain(|m| m.element != Some(element));
    }

    fn unmark_kind(&self, _resource: &Url, kind: ProblemKind) {
        self.calls.lock().push(SinkCall::UnmarkKind(kind));
        self.markers.lock().retain(|m| m.kind != kind);
    }
}
