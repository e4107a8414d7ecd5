//! The text resource: one document, its committed content and its load/reload state machine.
//!
//! ## Staged commit
//!
//! Every [`TextResource::load`] and [`TextResource::reload`] builds a fresh
//! [`ResourceContent`] and runs parse, post-parse commands, post-processors, forced proxy
//! resolution and validation against it. Only when the pipeline's [`CancellationToken`] is still
//! clear at the end is the staged content swapped in, together with one [`EventBatch`] for
//! observers and the marker updates for the registered [`MarkerSink`]. A cancelled pipeline
//! leaves the committed content exactly as it was.
//!
//! ## Concurrency
//!
//! `reload` may be called from any thread at any time. It records its input as the latest
//! request, terminates whatever pipeline is active (token, parser, post-processor and resolver
//! are all signalled immediately) and then waits for the load lock. Whichever caller gets the
//! lock runs the latest request; callers whose request was taken over by a newer one return
//! [`LoadOutcome::Superseded`].
//!
//! Lock order is `load_lock`, then the pipeline control mutex, then the content mutex.
//!
//! ```rust
//! use textres_core::{config::LoadOptions, resource::{LoadOutcome, TextResource}};
//! use url::Url;
//!
//! let resource = TextResource::for_uri(Url::parse("file:///notes.outline").unwrap()).unwrap();
//! let outcome = resource
//!     .load("Tasks -> Done\nDone\n", LoadOptions::default())
//!     .unwrap();
//! assert_eq!(outcome, LoadOutcome::Committed);
//! assert!(resource.errors().is_empty());
//! ```
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    io::Write,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;
use uuid::Uuid;

use crate::{
    codec::{
        diagnostic::{MarkerSink, Problem, ProblemKind, QuickFix, TextDiagnostic},
        Syntax, CODECS,
    },
    config::{LoadOptions, OptionProvider, TextEncoding},
    error::ResourceError,
    event::{EventBatch, Observers, ResourceEvent},
    location::LocationMap,
    model::{Model, NodeId, ObjectRef},
    resolve::{InterruptibleResolver, ModelRepository},
};

pub mod cancel;
pub mod content;
mod pipeline;

pub use cancel::CancellationToken;
pub use content::ResourceContent;

use cancel::{PipelineControl, ReloadRequest};
use pipeline::MarkerCall;

/// How a load or reload call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOutcome {
    /// The pipeline ran to completion and its content is now the resource's content
    Committed,
    /// The pipeline was terminated before committing; prior content is unchanged
    Cancelled,
    /// A newer reload took over this call's request before it started
    Superseded,
}

pub struct TextResourceBuilder {
    uri: Url,
    syntax: Arc<dyn Syntax>,
    default_encoding: Option<TextEncoding>,
    option_providers: Vec<Arc<dyn OptionProvider>>,
    marker_sink: Option<Arc<dyn MarkerSink>>,
    repository: Option<Weak<dyn ModelRepository>>,
}

impl TextResourceBuilder {
    /// Encoding used when the load options name none.
    pub fn default_encoding(mut self, encoding: TextEncoding) -> Self {
        self.default_encoding = Some(encoding);
        self
    }

    pub fn option_provider(mut self, provider: Arc<dyn OptionProvider>) -> Self {
        self.option_providers.push(provider);
        self
    }

    pub fn marker_sink(mut self, sink: Arc<dyn MarkerSink>) -> Self {
        self.marker_sink = Some(sink);
        self
    }

    /// Repository consulted for target-identifier mappings. Held weakly.
    pub fn repository(mut self, repository: &Arc<dyn ModelRepository>) -> Self {
        self.repository = Some(Arc::downgrade(repository));
        self
    }

    pub fn build(self) -> TextResource {
        let content = ResourceContent::new(self.uri.clone(), self.syntax.schema());
        TextResource {
            syntax: self.syntax,
            uri: RwLock::new(self.uri),
            default_encoding: self.default_encoding,
            option_providers: self.option_providers,
            marker_sink: self.marker_sink,
            repository: RwLock::new(self.repository),
            content: ReentrantMutex::new(RefCell::new(content)),
            load_lock: Mutex::new(()),
            control: Mutex::new(PipelineControl::default()),
            loaded: AtomicBool::new(false),
            observers: Mutex::new(Observers::default()),
        }
    }
}

pub struct TextResource {
    syntax: Arc<dyn Syntax>,
    uri: RwLock<Url>,
    default_encoding: Option<TextEncoding>,
    option_providers: Vec<Arc<dyn OptionProvider>>,
    marker_sink: Option<Arc<dyn MarkerSink>>,
    repository: RwLock<Option<Weak<dyn ModelRepository>>>,
    content: ReentrantMutex<RefCell<ResourceContent>>,
    load_lock: Mutex<()>,
    control: Mutex<PipelineControl>,
    loaded: AtomicBool,
    observers: Mutex<Observers>,
}

impl std::fmt::Debug for TextResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextResource")
            .field("uri", &self.uri().as_str())
            .field("syntax", &self.syntax.name())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl TextResource {
    pub fn builder(uri: Url, syntax: Arc<dyn Syntax>) -> TextResourceBuilder {
        TextResourceBuilder {
            uri,
            syntax,
            default_encoding: None,
            option_providers: Vec::new(),
            marker_sink: None,
            repository: None,
        }
    }

    pub fn new(uri: Url, syntax: Arc<dyn Syntax>) -> Self {
        Self::builder(uri, syntax).build()
    }

    /// Resource for `uri` using the syntax registered in [`CODECS`] for its file extension.
    pub fn for_uri(uri: Url) -> Result<Self, ResourceError> {
        let syntax = CODECS.for_uri(&uri)?;
        Ok(Self::new(uri, syntax))
    }

    pub fn uri(&self) -> Url {
        self.uri.read().clone()
    }

    pub fn syntax(&self) -> &Arc<dyn Syntax> {
        &self.syntax
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> UnboundedReceiver<EventBatch> {
        self.observers.lock().subscribe()
    }

    pub fn set_repository(&self, repository: Weak<dyn ModelRepository>) {
        *self.repository.write() = Some(repository);
    }

    pub fn repository(&self) -> Option<Arc<dyn ModelRepository>> {
        self.repository.read().as_ref().and_then(Weak::upgrade)
    }

    /// The encoding `options` select: the explicit option, else the resource default, else UTF-8.
    pub fn encoding(&self, options: &LoadOptions) -> Result<TextEncoding, ResourceError> {
        match options.encoding.as_deref() {
            Some(label) => label.parse(),
            None => Ok(self.default_encoding.unwrap_or(TextEncoding::Utf8)),
        }
    }

    fn effective_options(&self, mut options: LoadOptions) -> Result<LoadOptions, ResourceError> {
        for provider in self.option_providers.iter() {
            provider.apply(&mut options)?;
        }
        Ok(options)
    }

    /// First load. Fails with [`ResourceError::AlreadyLoaded`] if content is committed.
    pub fn load(
        &self,
        input: impl Into<Vec<u8>>,
        options: LoadOptions,
    ) -> Result<LoadOutcome, ResourceError> {
        if self.is_loaded() {
            return Err(ResourceError::AlreadyLoaded(self.uri().to_string()));
        }
        let _loading = self.load_lock.lock();
        if self.is_loaded() {
            return Err(ResourceError::AlreadyLoaded(self.uri().to_string()));
        }
        let options = self.effective_options(options)?;
        let token = self.control.lock().begin();
        self.run_pipeline(input.into(), options, token, false)
    }

    pub fn load_from_path(
        &self,
        path: impl AsRef<Path>,
        options: LoadOptions,
    ) -> Result<LoadOutcome, ResourceError> {
        let input = std::fs::read(path.as_ref())?;
        self.load(input, options)
    }

    /// Replace the content with a parse of `input`, superseding any load or reload in flight.
    ///
    /// Reloading an unloaded resource behaves like a first load, including batch constraints.
    pub fn reload(
        &self,
        input: impl Into<Vec<u8>>,
        options: LoadOptions,
    ) -> Result<LoadOutcome, ResourceError> {
        let options = self.effective_options(options)?;
        {
            let mut control = self.control.lock();
            control.latest = Some(ReloadRequest {
                input: input.into(),
                options,
            });
            control.terminate_active();
        }
        let _loading = self.load_lock.lock();
        let Some((request, token)) = self.control.lock().begin_latest() else {
            tracing::debug!("[TextResource::reload] request taken over by a newer reload");
            return Ok(LoadOutcome::Superseded);
        };
        let reloading = self.is_loaded();
        self.run_pipeline(request.input, request.options, token, reloading)
    }

    /// Terminate the active pipeline, if any, without starting a new one.
    pub fn cancel_reload(&self) {
        self.control.lock().terminate_active();
    }

    /// Drop the committed content and its options. The resource keeps its URI and may be loaded
    /// again.
    pub fn unload(&self) -> Result<(), ResourceError> {
        self.control.lock().terminate_active();
        let _loading = self.load_lock.lock();
        let (batch, calls) = {
            let guard = self.content.lock();
            let mut content = guard
                .try_borrow_mut()
                .map_err(|_| ResourceError::Busy(self.uri().to_string()))?;
            let mut batch: EventBatch = content
                .roots()
                .iter()
                .map(|root| ResourceEvent::ContentsRemoved(*root))
                .collect();
            batch.push(ResourceEvent::Unloaded);
            let calls = if self.marker_sink.is_some() && content.is_marker_creation_enabled() {
                MarkerCall::unmark_all(false)
            } else {
                Vec::new()
            };
            *content = ResourceContent::new(self.uri(), self.syntax.schema());
            self.loaded.store(false, Ordering::SeqCst);
            (batch, calls)
        };
        tracing::debug!("[TextResource::unload] {} unloaded", self.uri());
        self.apply_markers(calls);
        self.observers.lock().dispatch(batch);
        Ok(())
    }

    /// Print every root with the syntax's printer and write the encoded text to `out`.
    pub fn save(&self, out: &mut impl Write, options: &LoadOptions) -> Result<(), ResourceError> {
        let encoding = self.encoding(options)?;
        let text = self.save_to_string(options)?;
        out.write_all(&encoding.encode(&text)?)?;
        Ok(())
    }

    pub fn save_to_string(&self, options: &LoadOptions) -> Result<String, ResourceError> {
        let printer = self.syntax.create_printer();
        self.with_content(|content| {
            let mut out = String::new();
            for root in content.roots() {
                printer.print(content, *root, &mut out, options)?;
            }
            Ok::<_, ResourceError>(out)
        })?
    }

    /// Read access to the committed content. Fails with [`ResourceError::Busy`] when called
    /// from inside [`TextResource::modify`] on the same thread.
    pub fn with_content<R>(
        &self,
        f: impl FnOnce(&ResourceContent) -> R,
    ) -> Result<R, ResourceError> {
        let guard = self.content.lock();
        let content = guard
            .try_borrow()
            .map_err(|_| ResourceError::Busy(self.uri().to_string()))?;
        Ok(f(&content))
    }

    pub fn with_model<R>(&self, f: impl FnOnce(&Model) -> R) -> Result<R, ResourceError> {
        self.with_content(|content| f(content.model()))
    }

    /// Mutate the committed content. The events and marker updates the closure produces are
    /// delivered as one batch once it returns.
    pub fn modify<R>(
        &self,
        f: impl FnOnce(&mut ResourceContent) -> R,
    ) -> Result<R, ResourceError> {
        let (result, batch, calls) = {
            let guard = self.content.lock();
            let mut content = guard
                .try_borrow_mut()
                .map_err(|_| ResourceError::Busy(self.uri().to_string()))?;
            let result = f(&mut content);
            let (batch, markers) = content.take_journal();
            let calls = self.marker_calls(&content, markers);
            (result, batch, calls)
        };
        self.apply_markers(calls);
        self.observers.lock().dispatch(batch);
        Ok(result)
    }

    /// Resolve `id` against the committed content; see [`ResourceContent::get_object`].
    ///
    /// Returns `None` when called re-entrantly while this resource is already resolving.
    pub fn get_object(&self, id: &str) -> Option<ObjectRef> {
        let repository = self.repository();
        match self.modify(|content| content.get_object(id, repository.as_deref())) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!("[TextResource::get_object] {}: {}", id, e);
                None
            }
        }
    }

    /// Change the resource URI. Proxies are resolved first, so references made under the old URI
    /// keep pointing at the same elements.
    pub fn set_uri(&self, uri: Url) -> Result<(), ResourceError> {
        let _loading = self.load_lock.lock();
        let repository = self.repository();
        let new_uri = uri.clone();
        self.modify(move |content| {
            let resolver = InterruptibleResolver::new(CancellationToken::new());
            let resolved = resolver.resolve_all(content, repository.as_deref())?;
            tracing::debug!(
                "[TextResource::set_uri] resolved {} proxies before renaming to {}",
                resolved,
                new_uri
            );
            content.set_uri(new_uri);
            Ok::<_, ResourceError>(())
        })??;
        *self.uri.write() = uri;
        Ok(())
    }

    pub fn register_context_dependent_proxy(
        &self,
        container: NodeId,
        feature: &str,
        position: Option<usize>,
        identifier: &str,
        proxy: NodeId,
    ) -> Result<String, ResourceError> {
        self.modify(|content| {
            content.register_context_dependent_proxy(container, feature, position, identifier, proxy)
        })?
    }

    pub fn add_problem(&self, problem: Problem, element: NodeId) -> Result<(), ResourceError> {
        self.modify(|content| content.add_problem(problem, element))
    }

    pub fn add_problem_at(
        &self,
        problem: Problem,
        line: usize,
        column: usize,
        char_start: usize,
        char_end: usize,
    ) -> Result<(), ResourceError> {
        self.modify(|content| content.add_problem_at(problem, line, column, char_start, char_end))
    }

    pub fn add_error(
        &self,
        message: impl Into<String>,
        kind: ProblemKind,
        cause: NodeId,
    ) -> Result<(), ResourceError> {
        self.modify(|content| content.add_error(message, kind, cause))
    }

    pub fn add_warning(
        &self,
        message: impl Into<String>,
        kind: ProblemKind,
        cause: NodeId,
    ) -> Result<(), ResourceError> {
        self.modify(|content| content.add_warning(message, kind, cause))
    }

    pub fn errors(&self) -> Vec<TextDiagnostic> {
        self.with_content(|content| content.errors().to_vec())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<TextDiagnostic> {
        self.with_content(|content| content.warnings().to_vec())
            .unwrap_or_default()
    }

    pub fn has_errors(&self) -> bool {
        self.with_content(ResourceContent::has_errors)
            .unwrap_or(false)
    }

    pub fn location_map(&self) -> LocationMap {
        self.with_content(|content| content.location_map().clone())
            .unwrap_or_default()
    }

    pub fn set_location_map(&self, location_map: LocationMap) -> Result<(), ResourceError> {
        self.modify(|content| content.set_location_map(location_map))
    }

    pub fn quick_fix(&self, context: &str) -> Option<QuickFix> {
        self.with_content(|content| content.quick_fix(context).cloned())
            .ok()
            .flatten()
    }

    /// Root nodes of the committed content.
    pub fn contents(&self) -> Vec<NodeId> {
        self.with_content(|content| content.roots().to_vec())
            .unwrap_or_default()
    }

    /// Identifies the committed content; changes with every commit and unload.
    pub fn load_id(&self) -> Option<Uuid> {
        self.with_content(ResourceContent::load_id).ok()
    }

    pub fn is_marker_creation_enabled(&self) -> bool {
        self.with_content(ResourceContent::is_marker_creation_enabled)
            .unwrap_or(true)
    }

    pub fn is_location_map_enabled(&self) -> bool {
        self.with_content(ResourceContent::is_location_map_enabled)
            .unwrap_or(true)
    }

    pub fn is_layout_information_recording_enabled(&self) -> bool {
        self.with_content(ResourceContent::is_layout_information_recording_enabled)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::outline::OutlineSyntax,
        tests::{init_logging, outline_resource},
    };

    fn resource() -> TextResource {
        outline_resource("unit")
    }

    #[test]
    fn load_twice_is_rejected() {
        init_logging();
        let resource = resource();
        assert_eq!(
            resource.load("A\n", LoadOptions::default()).unwrap(),
            LoadOutcome::Committed
        );
        assert!(matches!(
            resource.load("B\n", LoadOptions::default()),
            Err(ResourceError::AlreadyLoaded(_))
        ));
        resource.unload().unwrap();
        assert!(!resource.is_loaded());
        assert!(resource.contents().is_empty());
        assert_eq!(
            resource.load("B\n", LoadOptions::default()).unwrap(),
            LoadOutcome::Committed
        );
    }

    #[test]
    fn explicit_encoding_wins_over_default() {
        let resource = TextResource::builder(
            Url::parse("file:///unit.outline").unwrap(),
            Arc::new(OutlineSyntax::new()),
        )
        .default_encoding(TextEncoding::Latin1)
        .build();
        assert_eq!(
            resource.encoding(&LoadOptions::default()).unwrap(),
            TextEncoding::Latin1
        );
        assert_eq!(
            resource
                .encoding(&LoadOptions::default().with_encoding("utf-16le"))
                .unwrap(),
            TextEncoding::Utf16Le
        );
        assert!(resource
            .encoding(&LoadOptions::default().with_encoding("ebcdic"))
            .is_err());
    }

    #[test]
    fn only_the_latest_queued_reload_runs() {
        let resource = resource();
        resource.load("A\n", LoadOptions::default()).unwrap();
        let queued = |text: &str| {
            let started = std::time::Instant::now();
            while resource
                .control
                .lock()
                .latest
                .as_ref()
                .is_none_or(|request| request.input != text.as_bytes())
            {
                assert!(started.elapsed() < std::time::Duration::from_secs(10));
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        };

        let held = resource.load_lock.lock();
        let outcomes = std::thread::scope(|s| {
            let first = s.spawn(|| resource.reload("B\n", LoadOptions::default()));
            queued("B\n");
            let second = s.spawn(|| resource.reload("C\n", LoadOptions::default()));
            queued("C\n");
            drop(held);
            [first.join().unwrap().unwrap(), second.join().unwrap().unwrap()]
        });

        assert!(outcomes.contains(&LoadOutcome::Committed));
        assert!(outcomes.contains(&LoadOutcome::Superseded));
        let names = resource
            .with_model(|model| {
                model
                    .walk()
                    .into_iter()
                    .filter_map(|node| model.attribute(node, "name").map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(names, vec!["C".to_string()]);
    }

    #[test]
    fn content_access_is_not_reentrant() {
        let resource = resource();
        resource.load("A\n", LoadOptions::default()).unwrap();
        let nested = resource
            .modify(|_| resource.with_content(|content| content.roots().len()))
            .unwrap();
        assert!(matches!(nested, Err(ResourceError::Busy(_))));
        assert_eq!(resource.get_object("A").map(|o| o.is_foreign()), Some(false));
    }
}
