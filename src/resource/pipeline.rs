use enumset::EnumSet;
use std::sync::Arc;

use super::{
    cancel::ActiveWork, CancellationToken, LoadOutcome, ResourceContent, TextResource,
};
use crate::{
    codec::{
        diagnostic::{DiagnosticRecord, MarkerOp, Problem, ProblemKind},
        ParseError, ParseResult,
    },
    config::LoadOptions,
    error::ResourceError,
    event::{EventBatch, ResourceEvent},
    model::NodeId,
    resolve::InterruptibleResolver,
};

/// A marker update with its position already resolved, ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MarkerCall {
    Mark(DiagnosticRecord),
    UnmarkCause(NodeId),
    UnmarkKind(ProblemKind),
}

impl MarkerCall {
    /// Unmark every problem kind; batch-constraint markers survive when `keep_batch` is set.
    pub(crate) fn unmark_all(keep_batch: bool) -> Vec<MarkerCall> {
        EnumSet::<ProblemKind>::all()
            .iter()
            .filter(|kind| !(keep_batch && *kind == ProblemKind::BatchConstraintProblem))
            .map(MarkerCall::UnmarkKind)
            .collect()
    }
}

impl TextResource {
    /// Run one load or reload pipeline under `token` and release its pipeline registration.
    #[tracing::instrument(skip_all, fields(uri = %self.uri(), reloading = reloading))]
    pub(super) fn run_pipeline(
        &self,
        input: Vec<u8>,
        options: LoadOptions,
        token: CancellationToken,
        reloading: bool,
    ) -> Result<LoadOutcome, ResourceError> {
        let outcome = self.stage_and_commit(input, options, &token, reloading);
        self.control.lock().finish(&token);
        match &outcome {
            Ok(LoadOutcome::Cancelled) => {
                tracing::debug!("[TextResource::pipeline] terminated, prior content kept")
            }
            Ok(outcome) => tracing::debug!("[TextResource::pipeline] {:?}", outcome),
            Err(e) => tracing::warn!("[TextResource::pipeline] failed: {}", e),
        }
        outcome
    }

    fn stage_and_commit(
        &self,
        input: Vec<u8>,
        options: LoadOptions,
        token: &CancellationToken,
        reloading: bool,
    ) -> Result<LoadOutcome, ResourceError> {
        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }
        let input = match options.input_stream_preprocessor.as_ref() {
            Some(provider) => provider.input_stream_processor().process(input)?,
            None => input,
        };

        let switch = self.syntax.create_resolver_switch();
        switch.set_options(&options);
        let mut staged = ResourceContent::staged(
            self.uri(),
            options.clone(),
            self.syntax.schema(),
            switch,
        );
        if reloading {
            let carried = self.with_content(|current| staged.carry_over_batch_problems(current))?;
            tracing::debug!(
                "[TextResource::pipeline] carried {} batch-constraint problems over",
                carried
            );
        }

        match self.encoding(&options).and_then(|enc| enc.decode(&input)) {
            Ok(text) => {
                if !self.parse_into(&text, &mut staged, &options, token)? {
                    return Ok(LoadOutcome::Cancelled);
                }
            }
            Err(e) => {
                tracing::warn!("[TextResource::pipeline] cannot decode input: {}", e);
                staged.add_problem_at(
                    Problem::error(e.to_string(), ProblemKind::SyntaxError),
                    1,
                    0,
                    0,
                    0,
                );
            }
        }
        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        if !staged.has_blocking_errors() && !self.post_process(&mut staged, &options, token) {
            return Ok(LoadOutcome::Cancelled);
        }
        // Problems found by forced resolution do not hold back validation.
        let validatable = !staged.has_blocking_errors();
        if !self.force_resolution(&mut staged, token) {
            return Ok(LoadOutcome::Cancelled);
        }
        if validatable {
            self.validate(&mut staged, &options, reloading);
        }

        self.commit(staged, token, reloading)
    }

    /// Register a collaborator of the pipeline running under `token`, unless it was superseded.
    fn register(&self, token: &CancellationToken, f: impl FnOnce(&mut ActiveWork)) {
        let mut control = self.control.lock();
        if control.is_active(token) {
            f(&mut control.active);
        }
    }

    /// Parse `text` and adopt the result into `staged`. Returns `false` if terminated.
    fn parse_into(
        &self,
        text: &str,
        staged: &mut ResourceContent,
        options: &LoadOptions,
        token: &CancellationToken,
    ) -> Result<bool, ResourceError> {
        let parser = self.syntax.create_parser();
        self.register(token, |active| active.parser = Some(parser.clone()));
        if token.is_cancelled() {
            return Ok(false);
        }
        match parser.parse(text, staged, options, token) {
            Err(ParseError::Terminated) => Ok(false),
            Err(ParseError::Failed(message)) => {
                tracing::warn!("[TextResource::pipeline] parse failed: {}", message);
                staged.add_problem_at(
                    Problem::error(message, ProblemKind::SyntaxError),
                    1,
                    0,
                    0,
                    0,
                );
                Ok(true)
            }
            Ok(result) => {
                if token.is_cancelled() {
                    return Ok(false);
                }
                self.adopt(staged, result)?;
                Ok(true)
            }
        }
    }

    fn adopt(&self, staged: &mut ResourceContent, result: ParseResult) -> Result<(), ResourceError> {
        let ParseResult {
            root,
            location_map,
            post_parse_commands,
        } = result;
        if let Some(location_map) = location_map.filter(|_| staged.is_location_map_enabled()) {
            staged.set_location_map(location_map);
        }
        if !staged.is_layout_information_recording_enabled() {
            let stripped = staged.model_mut().strip_layout();
            tracing::debug!("[TextResource::pipeline] stripped {} layout adapters", stripped);
        }
        if let Some(root) = root {
            staged.model_mut().add_root(root)?;
        }
        for command in post_parse_commands {
            if let Err(e) = command(staged) {
                tracing::error!("[TextResource::pipeline] post-parse command failed: {}", e);
            }
        }
        Ok(())
    }

    /// Run the syntax's primary post-processor, then those supplied by the options. Returns
    /// `false` if the pipeline was terminated along the way.
    fn post_process(
        &self,
        staged: &mut ResourceContent,
        options: &LoadOptions,
        token: &CancellationToken,
    ) -> bool {
        staged.clear_problems_of_kind(ProblemKind::AnalysisProblem);
        let processors = self.syntax.post_processor().into_iter().chain(
            options
                .post_processors
                .iter()
                .map(|provider| provider.resource_post_processor()),
        );
        for processor in processors {
            if token.is_cancelled() {
                return false;
            }
            self.register(token, |active| {
                active.post_processor = Some(processor.clone())
            });
            match processor.process(staged, token) {
                Ok(()) => {}
                Err(ResourceError::OperationCancelled) => return false,
                Err(e) => tracing::error!("[TextResource::pipeline] post-processor failed: {}", e),
            }
        }
        !token.is_cancelled()
    }

    /// Resolve every proxy left in `staged`. Returns `false` if the pipeline was terminated.
    fn force_resolution(&self, staged: &mut ResourceContent, token: &CancellationToken) -> bool {
        let resolver = Arc::new(InterruptibleResolver::new(token.clone()));
        self.register(token, |active| active.resolver = Some(resolver.clone()));
        let repository = self.repository();
        match resolver.resolve_all(staged, repository.as_deref()) {
            Ok(_) => !token.is_cancelled(),
            Err(ResourceError::OperationCancelled) => false,
            Err(e) => {
                tracing::error!("[TextResource::pipeline] forced resolution failed: {}", e);
                !token.is_cancelled()
            }
        }
    }

    fn validate(&self, staged: &mut ResourceContent, options: &LoadOptions, reloading: bool) {
        if options.disable_validation {
            return;
        }
        let Some(validator) = self.syntax.validator() else {
            return;
        };
        for root in staged.roots().to_vec() {
            validator.check_constraints(staged, root, !reloading);
        }
    }

    /// Swap `staged` in if `token` is still the active, uncancelled pipeline.
    fn commit(
        &self,
        mut staged: ResourceContent,
        token: &CancellationToken,
        reloading: bool,
    ) -> Result<LoadOutcome, ResourceError> {
        let (batch, calls) = {
            let control = self.control.lock();
            if token.is_cancelled() || !control.is_active(token) {
                return Ok(LoadOutcome::Cancelled);
            }
            let guard = self.content.lock();
            let mut current = guard
                .try_borrow_mut()
                .map_err(|_| ResourceError::Busy(self.uri().to_string()))?;

            let mut batch: EventBatch = current
                .roots()
                .iter()
                .map(|root| ResourceEvent::ContentsRemoved(*root))
                .collect();
            let (events, markers) = staged.take_journal();
            batch.extend(events);
            batch.push(ResourceEvent::Loaded(true));

            let mut calls = Vec::new();
            if self.marker_sink.is_some() && staged.is_marker_creation_enabled() {
                calls = MarkerCall::unmark_all(reloading);
                calls.extend(self.marker_calls(&staged, markers));
            }

            tracing::info!(
                "[TextResource::commit] {}: {} nodes, {} errors, {} warnings",
                staged.uri(),
                staged.model().len(),
                staged.errors().len(),
                staged.warnings().len()
            );
            *current = staged;
            self.loaded.store(true, std::sync::atomic::Ordering::SeqCst);
            (batch, calls)
        };
        self.apply_markers(calls);
        self.observers.lock().dispatch(batch);
        Ok(LoadOutcome::Committed)
    }

    /// Resolve journaled marker operations against `content`. Empty when markers are disabled.
    pub(super) fn marker_calls(
        &self,
        content: &ResourceContent,
        markers: Vec<MarkerOp>,
    ) -> Vec<MarkerCall> {
        if self.marker_sink.is_none() || !content.is_marker_creation_enabled() {
            return Vec::new();
        }
        markers
            .into_iter()
            .map(|op| match op {
                MarkerOp::Mark(diagnostic) => MarkerCall::Mark(
                    diagnostic.resolve(content.uri(), content.location_map()),
                ),
                MarkerOp::UnmarkCause(element) => MarkerCall::UnmarkCause(element),
                MarkerOp::UnmarkKind(kind) => MarkerCall::UnmarkKind(kind),
            })
            .collect()
    }

    pub(super) fn apply_markers(&self, calls: Vec<MarkerCall>) {
        let Some(sink) = self.marker_sink.as_ref() else {
            return;
        };
        let uri = self.uri();
        for call in calls {
            match call {
                MarkerCall::Mark(record) => sink.mark(&record),
                MarkerCall::UnmarkCause(element) => sink.unmark_cause(&uri, element),
                MarkerCall::UnmarkKind(kind) => sink.unmark_kind(&uri, kind),
            }
        }
    }
}
