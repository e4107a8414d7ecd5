//! The state of one document: model, locations, diagnostics, pending references.
//!
//! A [`ResourceContent`] is either the committed content of a [`super::TextResource`] or the
//! staged content a load pipeline builds before committing it. Everything a pipeline stage
//! touches lives here, which is what makes a cancelled pipeline free of side effects: dropping the
//! staged content drops its model, diagnostics, fragment registry and journals together.
use std::{collections::BTreeMap, fmt, sync::Arc};
use url::Url;
use uuid::Uuid;

use crate::{
    codec::diagnostic::{
        DiagnosticRecord, MarkerOp, Problem, ProblemKind, QuickFix, Severity, TextDiagnostic,
    },
    config::LoadOptions,
    error::ResourceError,
    event::ResourceEvent,
    location::LocationMap,
    model::{Model, Node, NodeId, ObjectRef, SchemaRegistry},
    resolve::{
        ContextFragment, ModelRepository, ReferenceResolveResult, ReferenceResolverSwitch,
        ResolveContext, INTERNAL_URI_FRAGMENT_PREFIX,
    },
};

/// Where a pending reference lives, copied out of its fragment so the model can be mutated.
#[derive(Debug, Clone)]
struct FragmentSite {
    identifier: String,
    container: NodeId,
    feature: String,
    position: Option<usize>,
    proxy: NodeId,
}

impl FragmentSite {
    fn of(fragment: &ContextFragment) -> Self {
        FragmentSite {
            identifier: fragment.identifier().to_string(),
            container: fragment.container(),
            feature: fragment.feature().to_string(),
            position: fragment.position(),
            proxy: fragment.proxy(),
        }
    }
}

pub struct ResourceContent {
    load_id: Uuid,
    uri: Url,
    options: Option<LoadOptions>,
    schema: SchemaRegistry,
    model: Model,
    location_map: LocationMap,
    errors: Vec<TextDiagnostic>,
    warnings: Vec<TextDiagnostic>,
    fragments: BTreeMap<String, ContextFragment>,
    proxy_counter: usize,
    quick_fixes: BTreeMap<String, QuickFix>,
    resolver_switch: Option<Arc<dyn ReferenceResolverSwitch>>,
    markers: Vec<MarkerOp>,
}

impl fmt::Debug for ResourceContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContent")
            .field("load_id", &self.load_id)
            .field("uri", &self.uri.as_str())
            .field("roots", &self.model.roots())
            .field("nodes", &self.model.len())
            .field("errors", &self.errors.len())
            .field("warnings", &self.warnings.len())
            .field("fragments", &self.fragments.len())
            .finish()
    }
}

impl ResourceContent {
    /// Empty content, as held by a resource that was never loaded.
    pub fn new(uri: Url, schema: SchemaRegistry) -> Self {
        ResourceContent {
            load_id: Uuid::new_v4(),
            uri,
            options: None,
            schema,
            model: Model::new(),
            location_map: LocationMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            fragments: BTreeMap::new(),
            proxy_counter: 0,
            quick_fixes: BTreeMap::new(),
            resolver_switch: None,
            markers: Vec::new(),
        }
    }

    /// Fresh content for one pipeline run.
    pub fn staged(
        uri: Url,
        options: LoadOptions,
        schema: SchemaRegistry,
        resolver_switch: Arc<dyn ReferenceResolverSwitch>,
    ) -> Self {
        let mut content = Self::new(uri, schema);
        content.options = Some(options);
        content.resolver_switch = Some(resolver_switch);
        content
    }

    /// Unique per pipeline run; changes whenever new content is committed.
    pub fn load_id(&self) -> Uuid {
        self.load_id
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub(crate) fn set_uri(&mut self, uri: Url) {
        self.uri = uri.clone();
        self.model.record(ResourceEvent::UriChanged(uri));
    }

    pub fn options(&self) -> Option<&LoadOptions> {
        self.options.as_ref()
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn roots(&self) -> &[NodeId] {
        self.model.roots()
    }

    pub fn location_map(&self) -> &LocationMap {
        &self.location_map
    }

    pub fn location_map_mut(&mut self) -> &mut LocationMap {
        &mut self.location_map
    }

    pub fn set_location_map(&mut self, location_map: LocationMap) {
        self.location_map = location_map;
    }

    pub fn resolver_switch(&self) -> Option<&Arc<dyn ReferenceResolverSwitch>> {
        self.resolver_switch.as_ref()
    }

    pub fn is_marker_creation_enabled(&self) -> bool {
        self.options
            .as_ref()
            .is_none_or(|o| !o.disable_marker_creation_for_problems)
    }

    pub fn is_location_map_enabled(&self) -> bool {
        self.options.as_ref().is_none_or(|o| !o.disable_location_map)
    }

    pub fn is_layout_information_recording_enabled(&self) -> bool {
        self.options
            .as_ref()
            .is_none_or(|o| !o.disable_layout_information_recording)
    }

    /// Register `proxy`, stored at `feature[position]` of `container`, as a pending reference to
    /// `identifier`. Returns the internal id under which [`ResourceContent::get_object`] resolves
    /// it.
    pub fn register_context_dependent_proxy(
        &mut self,
        container: NodeId,
        feature: &str,
        position: Option<usize>,
        identifier: &str,
        proxy: NodeId,
    ) -> Result<String, ResourceError> {
        let internal_id = format!(
            "{INTERNAL_URI_FRAGMENT_PREFIX}{}_{identifier}",
            self.proxy_counter
        );
        self.proxy_counter += 1;
        self.model
            .set_proxy_uri(proxy, format!("{}#{internal_id}", self.uri))?;
        self.fragments.insert(
            internal_id.clone(),
            ContextFragment::new(
                internal_id.clone(),
                identifier,
                container,
                feature,
                position,
                proxy,
            ),
        );
        Ok(internal_id)
    }

    pub fn fragment(&self, internal_id: &str) -> Option<&ContextFragment> {
        self.fragments.get(internal_id)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &ContextFragment> {
        self.fragments.values()
    }

    /// Number of registered fragments whose proxy has not been replaced yet.
    pub fn pending_fragments(&self) -> usize {
        self.fragments
            .values()
            .filter(|f| f.target().is_none())
            .count()
    }

    /// Resolve `id`: a registered context-dependent fragment, a containment path such as
    /// `/0/@entries.1`, or the value of a class's id attribute.
    ///
    /// For a fragment, the registered resolver runs unless the fragment was materialized before.
    /// On success the proxy is replaced in its container's slot and layout information, and the
    /// element is returned. On failure an unresolved-reference error is attached to the proxy
    /// (unless the fragment had been resolved before) and `None` is returned.
    pub fn get_object(
        &mut self,
        id: &str,
        repository: Option<&dyn ModelRepository>,
    ) -> Option<ObjectRef> {
        if !self.fragments.contains_key(id) {
            return self.resolve_plain_fragment(id).map(ObjectRef::Local);
        }
        let Some(switch) = self.resolver_switch.clone() else {
            tracing::warn!(
                "[ResourceContent::get_object] no resolver switch, cannot resolve {}",
                id
            );
            return None;
        };
        let options = self.options.clone().unwrap_or_default();
        let fragment = self.fragments.get_mut(id)?;
        let mut replaced = ObjectRef::Local(fragment.proxy());
        if let Some(target) = fragment.target() {
            let stale = target.is_foreign() && repository.is_some_and(|repo| repo.is_proxy(target));
            if !stale {
                return Some(target.clone());
            }
            tracing::debug!(
                "[ResourceContent::get_object] {} points into replaced content, resolving again",
                target
            );
            replaced = target.clone();
        }
        let was_resolved_before = fragment.is_resolved();
        let ctx = ResolveContext {
            model: &self.model,
            uri: &self.uri,
            options: &options,
        };
        let outcome = fragment.resolve(switch.as_ref(), &ctx);
        let site = FragmentSite::of(fragment);

        match outcome {
            Err(e) => {
                let message =
                    format!("An exception occurred while resolving the proxy for: {id}. ({e})");
                tracing::error!("[ResourceContent::get_object] {}", message);
                self.remove_diagnostics(site.proxy, Severity::Error);
                self.add_problem(
                    Problem::error(message, ProblemKind::UnresolvedReference),
                    site.proxy,
                );
                None
            }
            Ok(result) if !result.was_resolved() => {
                if !was_resolved_before {
                    self.attach_resolve_error(&result, &site);
                }
                None
            }
            Ok(result) => self.materialize(id, &site, &replaced, &result, repository),
        }
    }

    fn attach_resolve_error(&mut self, result: &ReferenceResolveResult, site: &FragmentSite) {
        let message = match result.error_message() {
            Some(message) => message.to_string(),
            None => {
                tracing::error!(
                    "[ResourceContent] resolver reported neither a mapping nor an error for '{}'",
                    site.identifier
                );
                format!("Unable to resolve '{}'", site.identifier)
            }
        };
        self.remove_diagnostics(site.proxy, Severity::Error);
        self.add_problem(
            Problem::error(message, ProblemKind::UnresolvedReference)
                .with_quick_fixes(result.quick_fixes().iter().cloned()),
            site.proxy,
        );
    }

    /// Replace `replaced` (the proxy, or a stale earlier target) with the element `result`
    /// maps to.
    fn materialize(
        &mut self,
        id: &str,
        site: &FragmentSite,
        replaced: &ObjectRef,
        result: &ReferenceResolveResult,
        repository: Option<&dyn ModelRepository>,
    ) -> Option<ObjectRef> {
        self.remove_diagnostics(site.proxy, Severity::Error);
        self.remove_diagnostics(site.proxy, Severity::Warning);
        for warning in result.mappings().iter().filter_map(|m| m.warning()) {
            self.add_problem(
                Problem::warning(warning, ProblemKind::UnresolvedReference),
                site.proxy,
            );
        }

        let target = match result.mappings().first()? {
            crate::resolve::ReferenceMapping::Element { target, .. } => {
                self.attach_inverse(site, target);
                target.clone()
            }
            crate::resolve::ReferenceMapping::Uri {
                target_identifier, ..
            } => {
                let found = if self.is_own_uri(target_identifier) {
                    target_identifier
                        .fragment()
                        .and_then(|fragment| self.resolve_plain_fragment(fragment))
                        .filter(|node| !self.model.is_proxy(*node))
                        .map(ObjectRef::Local)
                } else {
                    repository.and_then(|repo| {
                        repo.get_object(target_identifier)
                            .filter(|object| !repo.is_proxy(object))
                    })
                };
                match found {
                    Some(target) => target,
                    None => {
                        debug_assert!(
                            result.error_message().is_some(),
                            "target-identifier mapping for '{}' without an error message",
                            site.identifier
                        );
                        let message = result.error_message().map(str::to_string).unwrap_or_else(
                            || format!("Unable to resolve '{}' as {}", site.identifier, target_identifier),
                        );
                        self.add_problem(
                            Problem::error(message, ProblemKind::UnresolvedReference)
                                .with_quick_fixes(result.quick_fixes().iter().cloned()),
                            site.proxy,
                        );
                        return None;
                    }
                }
            }
        };

        if !self.model.replace_reference(
            site.container,
            &site.feature,
            site.position,
            replaced,
            target.clone(),
        ) {
            tracing::debug!(
                "[ResourceContent] proxy {} no longer held by {}.{}",
                site.proxy,
                site.container,
                site.feature
            );
        }
        self.model
            .replace_proxy_in_layout(site.container, replaced, &target);
        if let Some(fragment) = self.fragments.get_mut(id) {
            fragment.set_target(target.clone());
        }
        Some(target)
    }

    /// Record the container on the target's inverse relation for non-containment references.
    fn attach_inverse(&mut self, site: &FragmentSite, target: &ObjectRef) {
        let Some(target_node) = target.as_local() else {
            return;
        };
        let Some(class) = self.model.class(site.container) else {
            return;
        };
        let Some(feature) = self.schema.feature(class, &site.feature) else {
            return;
        };
        let Some(opposite) = feature.opposite.filter(|_| !feature.is_containment()) else {
            return;
        };
        let target_class = self.model.class(target_node).unwrap_or_default();
        let opposite_many = self
            .schema
            .feature(target_class, opposite)
            .is_none_or(|f| f.many);
        let container = ObjectRef::Local(site.container);
        let outcome = if opposite_many {
            self.model
                .add_unique(target_node, opposite, container)
                .map(|_| ())
        } else {
            self.model.set_inverse(target_node, opposite, container)
        };
        if let Err(e) = outcome {
            tracing::warn!(
                "[ResourceContent] could not update inverse '{}' of {}: {}",
                opposite,
                target_node,
                e
            );
        }
    }

    /// Whether `uri` addresses this document. Such identifiers resolve against this content,
    /// which may be staged, rather than through the repository.
    fn is_own_uri(&self, uri: &Url) -> bool {
        let mut base = uri.clone();
        base.set_fragment(None);
        base == self.uri
    }

    fn resolve_plain_fragment(&self, id: &str) -> Option<NodeId> {
        if let Some(node) = self.model.resolve_uri_fragment(id) {
            return Some(node);
        }
        self.model.walk().into_iter().find(|node| {
            let Some(definition) = self.model.class(*node).and_then(|c| self.schema.get(c)) else {
                return false;
            };
            definition
                .id_attribute
                .is_some_and(|attribute| self.model.attribute(*node, attribute) == Some(id))
        })
    }

    /// Resolve every proxy held in the slots of `node`. Returns how many were replaced.
    pub fn resolve_proxies_of(
        &mut self,
        node: NodeId,
        repository: Option<&dyn ModelRepository>,
    ) -> usize {
        let Some(current) = self.model.node(node) else {
            return 0;
        };
        let mut pending = Vec::new();
        for (feature, slot) in current.features() {
            let many = slot.is_many();
            for (index, value) in slot.values().into_iter().enumerate() {
                let ObjectRef::Local(proxy) = value else {
                    continue;
                };
                if let Some(uri) = self.model.node(*proxy).and_then(Node::proxy_uri) {
                    pending.push((
                        feature.clone(),
                        many.then_some(index),
                        *proxy,
                        uri.to_string(),
                    ));
                }
            }
        }

        let mut resolved = 0;
        for (feature, position, proxy, proxy_uri) in pending {
            let fragment = proxy_uri
                .split_once('#')
                .map_or(proxy_uri.as_str(), |(_, fragment)| fragment);
            if self.fragments.contains_key(fragment) {
                if self.get_object(fragment, repository).is_some() {
                    resolved += 1;
                }
                continue;
            }
            let (Some(repo), Ok(uri)) = (repository, Url::parse(&proxy_uri)) else {
                tracing::debug!(
                    "[ResourceContent] skipping unregistered proxy {} of {}",
                    proxy,
                    node
                );
                continue;
            };
            if let Some(target) = repo.get_object(&uri).filter(|t| !repo.is_proxy(t)) {
                let proxy_ref = ObjectRef::Local(proxy);
                if self
                    .model
                    .replace_reference(node, &feature, position, &proxy_ref, target.clone())
                {
                    self.model.replace_proxy_in_layout(node, &proxy_ref, &target);
                    resolved += 1;
                }
            }
        }
        resolved
    }

    /// Deresolve `element` for printing through the resolver switch.
    pub fn deresolve(&self, element: &ObjectRef, container: NodeId, feature: &str) -> Option<String> {
        let switch = self.resolver_switch.as_ref()?;
        let options = self.options.clone().unwrap_or_default();
        let ctx = ResolveContext {
            model: &self.model,
            uri: &self.uri,
            options: &options,
        };
        switch.deresolve(element, container, feature, &ctx)
    }

    pub fn add_problem(&mut self, problem: Problem, element: NodeId) {
        self.push_diagnostic(TextDiagnostic::element_based(problem, element));
    }

    pub fn add_problem_at(
        &mut self,
        problem: Problem,
        line: usize,
        column: usize,
        char_start: usize,
        char_end: usize,
    ) {
        self.push_diagnostic(TextDiagnostic::position_based(
            problem, line, column, char_start, char_end,
        ));
    }

    pub fn add_error(&mut self, message: impl Into<String>, kind: ProblemKind, cause: NodeId) {
        self.add_problem(Problem::error(message, kind), cause);
    }

    pub fn add_warning(&mut self, message: impl Into<String>, kind: ProblemKind, cause: NodeId) {
        self.add_problem(Problem::warning(message, kind), cause);
    }

    fn push_diagnostic(&mut self, diagnostic: TextDiagnostic) {
        for fix in diagnostic.problem().quick_fixes() {
            self.quick_fixes
                .insert(fix.context_as_string(), fix.clone());
        }
        let severity = diagnostic.severity();
        self.markers.push(MarkerOp::Mark(diagnostic.clone()));
        match severity {
            Severity::Error => self.errors.push(diagnostic),
            Severity::Warning => self.warnings.push(diagnostic),
        }
        self.model
            .record(ResourceEvent::ProblemsChanged { severity });
    }

    /// Remove every diagnostic of `severity` caused by `cause`.
    pub fn remove_diagnostics(&mut self, cause: NodeId, severity: Severity) -> usize {
        let list = match severity {
            Severity::Error => &mut self.errors,
            Severity::Warning => &mut self.warnings,
        };
        let before = list.len();
        list.retain(|d| !d.was_caused_by(cause));
        let removed = before - list.len();
        if removed > 0 {
            self.markers.push(MarkerOp::UnmarkCause(cause));
            self.model
                .record(ResourceEvent::ProblemsChanged { severity });
        }
        removed
    }

    /// Remove every diagnostic of `kind`, whatever its severity.
    pub fn clear_problems_of_kind(&mut self, kind: ProblemKind) -> usize {
        let mut removed = 0;
        for severity in [Severity::Error, Severity::Warning] {
            let list = match severity {
                Severity::Error => &mut self.errors,
                Severity::Warning => &mut self.warnings,
            };
            let before = list.len();
            list.retain(|d| d.kind() != kind);
            if list.len() != before {
                removed += before - list.len();
                self.model
                    .record(ResourceEvent::ProblemsChanged { severity });
            }
        }
        self.markers.push(MarkerOp::UnmarkKind(kind));
        removed
    }

    pub fn errors(&self) -> &[TextDiagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[TextDiagnostic] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors that stop post-processing and validation. Batch-constraint errors carried over
    /// from an earlier load do not count.
    pub(crate) fn has_blocking_errors(&self) -> bool {
        self.errors
            .iter()
            .any(|d| d.kind() != ProblemKind::BatchConstraintProblem)
    }

    /// Diagnostics of `severity` with positions resolved against the current location map.
    pub fn records(&self, severity: Severity) -> Vec<DiagnosticRecord> {
        let list = match severity {
            Severity::Error => &self.errors,
            Severity::Warning => &self.warnings,
        };
        list.iter()
            .map(|d| d.resolve(&self.uri, &self.location_map))
            .collect()
    }

    pub fn quick_fix(&self, context: &str) -> Option<&QuickFix> {
        self.quick_fixes.get(context)
    }

    /// Copy the batch-constraint diagnostics of `previous`, frozen at their current positions.
    /// Their markers already exist, so no marker operations are journaled.
    pub(crate) fn carry_over_batch_problems(&mut self, previous: &ResourceContent) -> usize {
        let carried: Vec<TextDiagnostic> = previous
            .errors
            .iter()
            .chain(previous.warnings.iter())
            .filter(|d| d.kind() == ProblemKind::BatchConstraintProblem)
            .map(|d| d.freeze(&previous.location_map))
            .collect();
        let count = carried.len();
        for diagnostic in carried {
            for fix in diagnostic.problem().quick_fixes() {
                self.quick_fixes
                    .insert(fix.context_as_string(), fix.clone());
            }
            match diagnostic.severity() {
                Severity::Error => self.errors.push(diagnostic),
                Severity::Warning => self.warnings.push(diagnostic),
            }
        }
        count
    }

    pub(crate) fn take_journal(&mut self) -> (Vec<ResourceEvent>, Vec<MarkerOp>) {
        (self.model.take_journal(), std::mem::take(&mut self.markers))
    }
}
