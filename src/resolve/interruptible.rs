use crate::{
    error::ResourceError,
    resolve::ModelRepository,
    resource::{CancellationToken, ResourceContent},
};

/// Forces resolution of every proxy in a document, polling for termination between nodes.
pub struct InterruptibleResolver {
    token: CancellationToken,
}

impl InterruptibleResolver {
    pub fn new(token: CancellationToken) -> Self {
        InterruptibleResolver { token }
    }

    pub fn terminate(&self) {
        tracing::debug!("[InterruptibleResolver] termination requested");
        self.token.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Walk every contained node and resolve each proxy-valued slot. Returns the number of
    /// proxies replaced, or `OperationCancelled` if termination was requested along the way.
    #[tracing::instrument(skip_all)]
    pub fn resolve_all(
        &self,
        content: &mut ResourceContent,
        repository: Option<&dyn ModelRepository>,
    ) -> Result<usize, ResourceError> {
        let mut resolved = 0;
        for node in content.model().walk() {
            self.token.check()?;
            resolved += content.resolve_proxies_of(node, repository);
        }
        self.token.check()?;
        tracing::debug!(
            "[InterruptibleResolver] resolved {} proxies in {}",
            resolved,
            content.uri()
        );
        Ok(resolved)
    }
}
