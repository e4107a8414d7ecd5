use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    codec::{ResourcePostProcessor, TextParser},
    config::LoadOptions,
    error::ResourceError,
    resolve::InterruptibleResolver,
};

/// Cooperative cancellation flag shared by everything one pipeline invocation runs.
///
/// Each load or reload creates its own token, so a late poll by a superseded pipeline can never
/// observe (or clear) the flag of its successor.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(OperationCancelled)` once cancelled, for use with `?` at poll points.
    pub fn check(&self) -> Result<(), ResourceError> {
        if self.is_cancelled() {
            Err(ResourceError::OperationCancelled)
        } else {
            Ok(())
        }
    }

    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

pub(crate) struct ReloadRequest {
    pub(crate) input: Vec<u8>,
    pub(crate) options: LoadOptions,
}

/// The collaborators of the pipeline currently running, so a competing reload can stop them.
#[derive(Default)]
pub(crate) struct ActiveWork {
    pub(crate) token: Option<CancellationToken>,
    pub(crate) parser: Option<Arc<dyn TextParser>>,
    pub(crate) post_processor: Option<Arc<dyn ResourcePostProcessor>>,
    pub(crate) resolver: Option<Arc<InterruptibleResolver>>,
}

/// Reload bookkeeping guarded by one mutex: taking the latest request and registering the token
/// that will run it happen atomically.
#[derive(Default)]
pub(crate) struct PipelineControl {
    pub(crate) latest: Option<ReloadRequest>,
    pub(crate) active: ActiveWork,
}

impl PipelineControl {
    pub(crate) fn begin(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.active = ActiveWork {
            token: Some(token.clone()),
            ..Default::default()
        };
        token
    }

    pub(crate) fn begin_latest(&mut self) -> Option<(ReloadRequest, CancellationToken)> {
        let request = self.latest.take()?;
        Some((request, self.begin()))
    }

    pub(crate) fn is_active(&self, token: &CancellationToken) -> bool {
        self.active
            .token
            .as_ref()
            .is_some_and(|active| active.same_as(token))
    }

    pub(crate) fn terminate_active(&mut self) {
        let active = &self.active;
        if let Some(token) = active.token.as_ref() {
            tracing::debug!("[PipelineControl] terminating active pipeline");
            token.cancel();
        }
        if let Some(parser) = active.parser.as_ref() {
            parser.terminate();
        }
        if let Some(post_processor) = active.post_processor.as_ref() {
            post_processor.terminate();
        }
        if let Some(resolver) = active.resolver.as_ref() {
            resolver.terminate();
        }
    }

    pub(crate) fn finish(&mut self, token: &CancellationToken) {
        if self.is_active(token) {
            self.active = ActiveWork::default();
        }
    }
}
