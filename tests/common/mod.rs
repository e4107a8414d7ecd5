//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```
#![allow(dead_code)]

use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use textres_core::{
    codec::{
        outline::OutlineSyntax, DiagnosticRecord, ParseError, ParseResult, ResourcePostProcessor,
        Severity, Syntax, TextParser, TextPrinter, Validator,
    },
    config::LoadOptions,
    error::ResourceError,
    event::EventBatch,
    model::{NodeId, ObjectRef, SchemaRegistry},
    resolve::{ReferenceResolveResult, ReferenceResolver, ReferenceResolverSwitch, ResolveContext},
    resource::{CancellationToken, ResourceContent, TextResource},
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

/// Upper bound for any wait on another test thread.
const PATIENCE: Duration = Duration::from_secs(10);

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
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

/// The root entry names of `resource`, in document order.
pub fn top_level_names(resource: &TextResource) -> Vec<String> {
    resource
        .with_model(|model| {
            model
                .roots()
                .iter()
                .flat_map(|root| model.children(*root))
                .filter_map(|entry| model.attribute(entry, "name").map(str::to_string))
                .collect()
        })
        .unwrap()
}

pub fn messages(diagnostics: &[textres_core::codec::TextDiagnostic]) -> Vec<String> {
    let mut messages: Vec<String> = diagnostics.iter().map(|d| d.message().to_string()).collect();
    messages.sort();
    messages
}

/// Committed errors and warnings with their resolved positions.
pub fn diagnostics(resource: &TextResource) -> (Vec<DiagnosticRecord>, Vec<DiagnosticRecord>) {
    resource
        .with_content(|content| {
            (
                content.records(Severity::Error),
                content.records(Severity::Warning),
            )
        })
        .unwrap()
}

/// Class, name and outgoing references of every node, in traversal order.
pub fn shape(resource: &TextResource) -> Vec<(String, Option<String>, Vec<ObjectRef>)> {
    resource
        .with_model(|model| {
            model
                .walk()
                .into_iter()
                .map(|node| {
                    (
                        model.class(node).unwrap_or_default().to_string(),
                        model.attribute(node, "name").map(str::to_string),
                        model.values(node, "refs"),
                    )
                })
                .collect()
        })
        .unwrap()
}

/// Every batch delivered so far.
pub fn drain(events: &mut UnboundedReceiver<EventBatch>) -> Vec<EventBatch> {
    let mut batches = Vec::new();
    while let Ok(batch) = events.try_recv() {
        batches.push(batch);
    }
    batches
}

/// A one-shot checkpoint a pipeline stage blocks on, so tests can interleave reloads
/// deterministically.
///
/// Arming returns a receiver that fires when a pipeline reaches the gate. The pipeline then waits
/// until the gate is opened or, where the stage has a token to poll, until it is cancelled.
#[derive(Default)]
pub struct Gate {
    armed: AtomicBool,
    open: AtomicBool,
    entered: Mutex<Option<Sender<()>>>,
}

impl Gate {
    pub fn arm(&self) -> Receiver<()> {
        let (tx, rx) = channel();
        *self.entered.lock() = Some(tx);
        self.open.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
        rx
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Block if armed. Returns `false` if `token` was cancelled while waiting.
    fn pass(&self, token: Option<&CancellationToken>) -> bool {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return true;
        }
        if let Some(tx) = self.entered.lock().take() {
            tx.send(()).ok();
        }
        let started = Instant::now();
        while started.elapsed() < PATIENCE {
            if self.open.load(Ordering::SeqCst) {
                return true;
            }
            if token.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        tracing::warn!("[Gate] gave up waiting");
        true
    }
}

/// Wait for a gate armed with [`Gate::arm`] to be reached.
pub fn reached(entered: &Receiver<()>) {
    entered
        .recv_timeout(PATIENCE)
        .expect("pipeline never reached the gate");
}

/// The outline notation with a [`Gate`] in front of parsing, post-processing and resolution.
#[derive(Default)]
pub struct GatedSyntax {
    inner: OutlineSyntax,
    pub parse: Arc<Gate>,
    pub post_process: Arc<Gate>,
    pub resolve: Arc<Gate>,
}

impl GatedSyntax {
    pub fn resource(self: &Arc<Self>, name: &str) -> TextResource {
        TextResource::new(outline_uri(name), self.clone())
    }
}

impl Syntax for GatedSyntax {
    fn name(&self) -> &str {
        "gated outline"
    }

    fn file_extension(&self) -> &str {
        self.inner.file_extension()
    }

    fn schema(&self) -> SchemaRegistry {
        self.inner.schema()
    }

    fn create_parser(&self) -> Arc<dyn TextParser> {
        Arc::new(GatedParser {
            inner: self.inner.create_parser(),
            gate: self.parse.clone(),
        })
    }

    fn create_printer(&self) -> Box<dyn TextPrinter> {
        self.inner.create_printer()
    }

    fn create_resolver_switch(&self) -> Arc<dyn ReferenceResolverSwitch> {
        Arc::new(GatedSwitch {
            inner: self.inner.create_resolver_switch(),
            gate: self.resolve.clone(),
        })
    }

    fn post_processor(&self) -> Option<Arc<dyn ResourcePostProcessor>> {
        Some(Arc::new(GatedPostProcessor {
            inner: self.inner.post_processor(),
            gate: self.post_process.clone(),
        }))
    }

    fn validator(&self) -> Option<Arc<dyn Validator>> {
        self.inner.validator()
    }
}

struct GatedParser {
    inner: Arc<dyn TextParser>,
    gate: Arc<Gate>,
}

impl TextParser for GatedParser {
    fn parse(
        &self,
        text: &str,
        content: &mut ResourceContent,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<ParseResult, ParseError> {
        if !self.gate.pass(Some(cancel)) {
            return Err(ParseError::Terminated);
        }
        self.inner.parse(text, content, options, cancel)
    }

    fn terminate(&self) {
        self.inner.terminate();
    }
}

struct GatedPostProcessor {
    inner: Option<Arc<dyn ResourcePostProcessor>>,
    gate: Arc<Gate>,
}

impl ResourcePostProcessor for GatedPostProcessor {
    fn process(
        &self,
        content: &mut ResourceContent,
        cancel: &CancellationToken,
    ) -> Result<(), ResourceError> {
        if !self.gate.pass(Some(cancel)) {
            return Err(ResourceError::OperationCancelled);
        }
        match self.inner.as_ref() {
            Some(inner) => inner.process(content, cancel),
            None => Ok(()),
        }
    }
}

struct GatedSwitch {
    inner: Arc<dyn ReferenceResolverSwitch>,
    gate: Arc<Gate>,
}

impl ReferenceResolverSwitch for GatedSwitch {
    fn set_options(&self, options: &LoadOptions) {
        self.inner.set_options(options);
    }

    fn resolver(&self, class: &str, feature: &str) -> Option<Arc<dyn ReferenceResolver>> {
        let inner = self.inner.resolver(class, feature)?;
        Some(Arc::new(GatedResolver {
            inner,
            gate: self.gate.clone(),
        }))
    }
}

/// Resolution has no token of its own to poll, so this gate only returns once opened.
struct GatedResolver {
    inner: Arc<dyn ReferenceResolver>,
    gate: Arc<Gate>,
}

impl ReferenceResolver for GatedResolver {
    fn resolve(
        &self,
        identifier: &str,
        container: NodeId,
        feature: &str,
        position: Option<usize>,
        resolve_fuzzy: bool,
        result: &mut ReferenceResolveResult,
        ctx: &ResolveContext<'_>,
    ) -> Result<(), ResourceError> {
        self.gate.pass(None);
        self.inner
            .resolve(identifier, container, feature, position, resolve_fuzzy, result, ctx)
    }

    fn deresolve(
        &self,
        element: &ObjectRef,
        container: NodeId,
        feature: &str,
        ctx: &ResolveContext<'_>,
    ) -> Option<String> {
        self.inner.deresolve(element, container, feature, ctx)
    }
}
