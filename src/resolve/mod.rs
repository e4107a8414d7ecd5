//! Lazy, context-dependent reference resolution.
//!
//! A parser that meets a textual reference it cannot bind yet creates a proxy node, stores it in
//! the referencing slot and registers a [`ContextFragment`] with the staged content. The fragment
//! remembers everything needed to resolve the reference later: the identifier text, the
//! containing node, the feature and position within that feature, and the proxy itself.
//!
//! Resolution is demand driven (through `get_object` on the resource) and additionally forced for
//! all proxies at the end of every load pipeline by the
//! [`InterruptibleResolver`](interruptible::InterruptibleResolver).
//!
//! Resolvers report results through a [`ReferenceResolveResult`]. A mapping either names the
//! target element directly ([`ReferenceMapping::Element`]) or gives a global identifier that a
//! [`ModelRepository`] turns into an element of some other resource ([`ReferenceMapping::Uri`]).
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use url::Url;

use crate::{
    codec::diagnostic::QuickFix,
    config::LoadOptions,
    error::ResourceError,
    model::{Model, NodeId, ObjectRef},
};

pub mod interruptible;

pub use interruptible::InterruptibleResolver;

/// Prefix of the internal ids under which context-dependent fragments are registered.
pub const INTERNAL_URI_FRAGMENT_PREFIX: &str = "_context_dependent_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceMapping {
    Element {
        identifier: String,
        target: ObjectRef,
        warning: Option<String>,
    },
    Uri {
        identifier: String,
        target_identifier: Url,
        warning: Option<String>,
    },
}

impl ReferenceMapping {
    pub fn identifier(&self) -> &str {
        match self {
            ReferenceMapping::Element { identifier, .. }
            | ReferenceMapping::Uri { identifier, .. } => identifier,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            ReferenceMapping::Element { warning, .. } | ReferenceMapping::Uri { warning, .. } => {
                warning.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceResolveResult {
    resolve_fuzzy: bool,
    error_message: Option<String>,
    mappings: Vec<ReferenceMapping>,
    quick_fixes: Vec<QuickFix>,
}

impl ReferenceResolveResult {
    pub fn new(resolve_fuzzy: bool) -> Self {
        ReferenceResolveResult {
            resolve_fuzzy,
            ..Default::default()
        }
    }

    /// Fuzzy results collect every candidate (content assist) instead of stopping at the first.
    pub fn is_fuzzy(&self) -> bool {
        self.resolve_fuzzy
    }

    pub fn was_resolved(&self) -> bool {
        !self.mappings.is_empty()
    }

    pub fn was_resolved_uniquely(&self) -> bool {
        self.mappings.len() == 1
    }

    pub fn was_resolved_multiple(&self) -> bool {
        self.mappings.len() > 1
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn mappings(&self) -> &[ReferenceMapping] {
        &self.mappings
    }

    pub fn quick_fixes(&self) -> &[QuickFix] {
        &self.quick_fixes
    }

    pub fn add_quick_fix(&mut self, quick_fix: QuickFix) {
        self.quick_fixes.push(quick_fix);
    }

    pub fn add_mapping_element(
        &mut self,
        identifier: impl Into<String>,
        target: ObjectRef,
        warning: Option<String>,
    ) {
        self.mappings.push(ReferenceMapping::Element {
            identifier: identifier.into(),
            target,
            warning,
        });
    }

    pub fn add_mapping_uri(
        &mut self,
        identifier: impl Into<String>,
        target_identifier: Url,
        warning: Option<String>,
    ) {
        self.mappings.push(ReferenceMapping::Uri {
            identifier: identifier.into(),
            target_identifier,
            warning,
        });
    }
}

/// Read-only view handed to resolvers.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub model: &'a Model,
    pub uri: &'a Url,
    pub options: &'a LoadOptions,
}

pub trait ReferenceResolver: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn resolve(
        &self,
        identifier: &str,
        container: NodeId,
        feature: &str,
        position: Option<usize>,
        resolve_fuzzy: bool,
        result: &mut ReferenceResolveResult,
        ctx: &ResolveContext<'_>,
    ) -> Result<(), ResourceError>;

    /// Textual identifier for `element` when printed in `feature` of `container`.
    fn deresolve(
        &self,
        element: &ObjectRef,
        container: NodeId,
        feature: &str,
        ctx: &ResolveContext<'_>,
    ) -> Option<String>;

    fn set_options(&self, _options: &LoadOptions) {}
}

/// Dispatches resolution to the resolver registered for a (container class, feature) pair.
pub trait ReferenceResolverSwitch: Send + Sync {
    fn set_options(&self, options: &LoadOptions);

    fn resolver(&self, class: &str, feature: &str) -> Option<Arc<dyn ReferenceResolver>>;

    fn resolve(
        &self,
        identifier: &str,
        container: NodeId,
        feature: &str,
        position: Option<usize>,
        result: &mut ReferenceResolveResult,
        ctx: &ResolveContext<'_>,
    ) -> Result<(), ResourceError> {
        let class = ctx.model.class(container).unwrap_or_default();
        let resolver = self.resolver(class, feature).ok_or_else(|| {
            ResourceError::Resolution(format!("no resolver registered for {class}.{feature}"))
        })?;
        resolver.resolve(identifier, container, feature, position, false, result, ctx)
    }

    /// Collect every candidate for `identifier`, e.g. for content assist.
    fn resolve_fuzzy(
        &self,
        identifier: &str,
        container: NodeId,
        feature: &str,
        result: &mut ReferenceResolveResult,
        ctx: &ResolveContext<'_>,
    ) -> Result<(), ResourceError> {
        let class = ctx.model.class(container).unwrap_or_default();
        match self.resolver(class, feature) {
            Some(resolver) => resolver.resolve(identifier, container, feature, None, true, result, ctx),
            None => Ok(()),
        }
    }

    fn deresolve(
        &self,
        element: &ObjectRef,
        container: NodeId,
        feature: &str,
        ctx: &ResolveContext<'_>,
    ) -> Option<String> {
        let class = ctx.model.class(container)?;
        self.resolver(class, feature)?
            .deresolve(element, container, feature, ctx)
    }
}

/// Table driven [`ReferenceResolverSwitch`].
#[derive(Default)]
pub struct ResolverSwitch {
    resolvers: HashMap<(String, String), Arc<dyn ReferenceResolver>>,
    options: RwLock<Option<LoadOptions>>,
}

impl ResolverSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(
        mut self,
        class: impl Into<String>,
        feature: impl Into<String>,
        resolver: Arc<dyn ReferenceResolver>,
    ) -> Self {
        self.resolvers
            .insert((class.into(), feature.into()), resolver);
        self
    }

    pub fn options(&self) -> Option<LoadOptions> {
        self.options.read().clone()
    }
}

impl ReferenceResolverSwitch for ResolverSwitch {
    fn set_options(&self, options: &LoadOptions) {
        for resolver in self.resolvers.values() {
            resolver.set_options(options);
        }
        *self.options.write() = Some(options.clone());
    }

    fn resolver(&self, class: &str, feature: &str) -> Option<Arc<dyn ReferenceResolver>> {
        self.resolvers
            .get(&(class.to_string(), feature.to_string()))
            .cloned()
    }
}

/// Resolves global identifiers produced by [`ReferenceMapping::Uri`] mappings.
pub trait ModelRepository: Send + Sync {
    fn get_object(&self, uri: &Url) -> Option<ObjectRef>;

    /// Whether `object` is itself an unresolved proxy, or a foreign handle whose owning content
    /// has since been replaced.
    fn is_proxy(&self, object: &ObjectRef) -> bool;
}

/// A pending reference registered by a parser, keyed by its internal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFragment {
    internal_id: String,
    identifier: String,
    container: NodeId,
    feature: String,
    position: Option<usize>,
    proxy: NodeId,
    result: Option<ReferenceResolveResult>,
    target: Option<ObjectRef>,
}

impl ContextFragment {
    pub fn new(
        internal_id: impl Into<String>,
        identifier: impl Into<String>,
        container: NodeId,
        feature: impl Into<String>,
        position: Option<usize>,
        proxy: NodeId,
    ) -> Self {
        ContextFragment {
            internal_id: internal_id.into(),
            identifier: identifier.into(),
            container,
            feature: feature.into(),
            position,
            proxy,
            result: None,
            target: None,
        }
    }

    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn proxy(&self) -> NodeId {
        self.proxy
    }

    pub fn is_resolved(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.was_resolved())
    }

    /// The element the proxy was replaced with, once materialized.
    pub fn target(&self) -> Option<&ObjectRef> {
        self.target.as_ref()
    }

    pub(crate) fn set_target(&mut self, target: ObjectRef) {
        self.target = Some(target);
    }

    /// Run the resolver unless a successful result is cached. Unsuccessful results are not
    /// cached, so a later call retries against the then current model.
    pub fn resolve(
        &mut self,
        switch: &dyn ReferenceResolverSwitch,
        ctx: &ResolveContext<'_>,
    ) -> Result<ReferenceResolveResult, ResourceError> {
        if let Some(result) = self.result.as_ref().filter(|r| r.was_resolved()) {
            return Ok(result.clone());
        }
        let mut result = ReferenceResolveResult::new(false);
        switch.resolve(
            &self.identifier,
            self.container,
            &self.feature,
            self.position,
            &mut result,
            ctx,
        )?;
        self.result = Some(result.clone());
        Ok(result)
    }
}
