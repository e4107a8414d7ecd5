//! Pluggable notation support for text resources.
//!
//! The resource engine is grammar-agnostic. Everything notation specific is reached through a
//! [`Syntax`]: it hands out a fresh [`TextParser`] per load, a [`TextPrinter`] per save, the
//! reference resolver switch, an optional primary post-processor and an optional [`Validator`].
//!
//! ## Key Components
//!
//! - [`TextParser`] - structural parse of decoded text into a staged [`ResourceContent`]
//! - [`TextPrinter`] - serializes a root element back into text
//! - [`ResourcePostProcessor`] - analysis passes that run after a clean parse
//! - [`Validator`] - live and batch constraint checks
//! - [`CodecMap`] - registry of syntaxes by file extension (accessible via [`CODECS`])
//! - [`diagnostic`] - problems, diagnostics, quick fixes and marker sinks
//!
//! ## Termination
//!
//! Parsers and post-processors receive the pipeline's [`CancellationToken`] and are expected to
//! poll it at reasonable granularity (e.g. per line or per node). A parser that notices the
//! token, or whose [`TextParser::terminate`] was called, returns [`ParseError::Terminated`]; the
//! resource then discards the staged content without committing anything.
//!
//! ## Built-in Syntaxes
//!
//! - **Outline** (`.outline`) - via [`outline::OutlineSyntax`]
//!
//! Register custom syntaxes via [`CodecMap::insert`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use textres_core::codec::{outline::OutlineSyntax, CODECS};
//!
//! CODECS.insert("notes", Arc::new(OutlineSyntax::new()));
//! assert!(CODECS.get("notes").is_some());
//! ```
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::{collections::BTreeMap, fmt, result::Result, sync::Arc};
use thiserror::Error;
use url::Url;

use crate::{
    config::LoadOptions,
    error::ResourceError,
    location::LocationMap,
    model::{NodeId, SchemaRegistry},
    resolve::ReferenceResolverSwitch,
    resource::{CancellationToken, ResourceContent},
};

pub mod diagnostic;
pub mod outline;

pub use diagnostic::{
    DiagnosticRecord, MarkerSink, Problem, ProblemKind, QuickFix, Severity, TextDiagnostic,
};

/// Global singleton codec map with the builtin outline syntax
pub static CODECS: Lazy<CodecMap> = Lazy::new(CodecMap::create);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The parse stopped at a poll point because termination was requested
    #[error("parse terminated")]
    Terminated,
    /// The parse could not produce a model; reported as a syntax error
    #[error("parse failed: {0}")]
    Failed(String),
}

impl From<ResourceError> for ParseError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::OperationCancelled => ParseError::Terminated,
            other => ParseError::Failed(other.to_string()),
        }
    }
}

/// A deferred action queued by a parser, executed on the staged content right after the new root
/// is attached.
pub type PostParseCommand =
    Box<dyn FnOnce(&mut ResourceContent) -> Result<(), ResourceError> + Send>;

#[derive(Default)]
pub struct ParseResult {
    pub root: Option<NodeId>,
    pub location_map: Option<LocationMap>,
    pub post_parse_commands: Vec<PostParseCommand>,
}

impl fmt::Debug for ParseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseResult")
            .field("root", &self.root)
            .field("location_map", &self.location_map.as_ref().map(LocationMap::len))
            .field("post_parse_commands", &self.post_parse_commands.len())
            .finish()
    }
}

pub trait TextParser: Send + Sync {
    /// Parse `text` into nodes of `content`'s model.
    ///
    /// Unresolvable references are represented by proxies registered through
    /// [`ResourceContent::register_context_dependent_proxy`]; syntax problems are added to
    /// `content` as diagnostics.
    fn parse(
        &self,
        text: &str,
        content: &mut ResourceContent,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<ParseResult, ParseError>;

    /// Request that a running [`TextParser::parse`] stops at its next poll point.
    fn terminate(&self) {}
}

pub trait TextPrinter {
    fn print(
        &self,
        content: &ResourceContent,
        root: NodeId,
        out: &mut String,
        options: &LoadOptions,
    ) -> Result<(), ResourceError>;
}

/// Transforms raw input bytes before decoding.
pub trait InputStreamProcessor: Send + Sync {
    fn process(&self, input: Vec<u8>) -> Result<Vec<u8>, ResourceError>;
}

pub trait InputStreamProcessorProvider: Send + Sync {
    fn input_stream_processor(&self) -> Arc<dyn InputStreamProcessor>;
}

impl<P: InputStreamProcessor + Clone + 'static> InputStreamProcessorProvider for P {
    fn input_stream_processor(&self) -> Arc<dyn InputStreamProcessor> {
        Arc::new(self.clone())
    }
}

pub trait ResourcePostProcessor: Send + Sync {
    fn process(
        &self,
        content: &mut ResourceContent,
        cancel: &CancellationToken,
    ) -> Result<(), ResourceError>;

    fn terminate(&self) {}
}

pub trait ResourcePostProcessorProvider: Send + Sync {
    fn resource_post_processor(&self) -> Arc<dyn ResourcePostProcessor>;
}

impl<P: ResourcePostProcessor + Clone + 'static> ResourcePostProcessorProvider for P {
    fn resource_post_processor(&self) -> Arc<dyn ResourcePostProcessor> {
        Arc::new(self.clone())
    }
}

pub trait Validator: Send + Sync {
    /// Check constraints on the tree below `root`, adding problems to `content`. Batch
    /// constraints are checked only when `include_batch_constraints` is set.
    fn check_constraints(
        &self,
        content: &mut ResourceContent,
        root: NodeId,
        include_batch_constraints: bool,
    );
}

/// Everything the engine needs to know about one notation.
pub trait Syntax: Send + Sync {
    fn name(&self) -> &str;

    fn file_extension(&self) -> &str;

    fn schema(&self) -> SchemaRegistry;

    fn create_parser(&self) -> Arc<dyn TextParser>;

    fn create_printer(&self) -> Box<dyn TextPrinter>;

    fn create_resolver_switch(&self) -> Arc<dyn ReferenceResolverSwitch>;

    /// Runs before any post-processor supplied through the load options.
    fn post_processor(&self) -> Option<Arc<dyn ResourcePostProcessor>> {
        None
    }

    fn validator(&self) -> Option<Arc<dyn Validator>> {
        None
    }
}

/// Syntaxes keyed by file extension.
#[derive(Clone)]
pub struct CodecMap(Arc<RwLock<BTreeMap<String, Arc<dyn Syntax>>>>);

impl CodecMap {
    /// A map holding the built-in syntaxes.
    pub fn create() -> Self {
        let codecs = CodecMap(Arc::default());
        codecs.insert(
            outline::OUTLINE_EXTENSION,
            Arc::new(outline::OutlineSyntax::new()),
        );
        codecs
    }

    /// Register `syntax` for `extension`, returning the syntax it replaces.
    pub fn insert(
        &self,
        extension: impl Into<String>,
        syntax: Arc<dyn Syntax>,
    ) -> Option<Arc<dyn Syntax>> {
        let extension = extension.into();
        let previous = self.0.write().insert(extension.clone(), syntax);
        if let Some(previous) = previous.as_ref() {
            tracing::debug!(
                "[CodecMap::insert] '{}' replaces the {} syntax",
                extension,
                previous.name()
            );
        }
        previous
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn Syntax>> {
        self.0.read().get(extension).cloned()
    }

    /// Syntax registered for the file extension of `uri`'s path.
    pub fn for_uri(&self, uri: &Url) -> Result<Arc<dyn Syntax>, ResourceError> {
        let ext = uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|file| file.rsplit_once('.'))
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default();
        self.get(&ext)
            .ok_or_else(|| ResourceError::UnknownSyntax(format!("{ext} ({uri})")))
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_lookup_by_uri_extension() {
        let codecs = CodecMap::create();
        let uri = Url::parse("file:///work/plan.outline").unwrap();
        assert_eq!(codecs.for_uri(&uri).unwrap().name(), "outline");

        let unknown = Url::parse("file:///work/plan.md").unwrap();
        assert!(matches!(
            codecs.for_uri(&unknown),
            Err(ResourceError::UnknownSyntax(_))
        ));

        assert!(codecs
            .insert("md", Arc::new(outline::OutlineSyntax::new()))
            .is_none());
        assert!(codecs.for_uri(&unknown).is_ok());
        assert_eq!(codecs.extensions(), vec!["md".to_string(), "outline".to_string()]);
        assert!(codecs
            .insert("md", Arc::new(outline::OutlineSyntax::new()))
            .is_some());
    }

    #[test]
    fn resource_errors_convert_to_parse_errors() {
        assert_eq!(
            ParseError::from(ResourceError::OperationCancelled),
            ParseError::Terminated
        );
        assert!(matches!(
            ParseError::from(ResourceError::Codec("x".into())),
            ParseError::Failed(_)
        ));
    }
}
