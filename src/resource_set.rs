//! A set of text resources that resolve cross-document references against each other.
use parking_lot::RwLock;
use std::sync::Arc;
use url::Url;

use crate::{
    codec::CODECS,
    error::ResourceError,
    model::ObjectRef,
    resolve::ModelRepository,
    resource::TextResource,
};

/// Resources addressed by URI. Every resource added to the set uses it as its
/// [`ModelRepository`], so `other.outline#Name` style references resolve to elements of the
/// other resource as [`ObjectRef::Foreign`].
#[derive(Debug, Default)]
pub struct ResourceSet {
    resources: RwLock<Vec<Arc<TextResource>>>,
}

impl ResourceSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add `resource`, replacing any resource with the same URI.
    pub fn add(self: &Arc<Self>, resource: TextResource) -> Arc<TextResource> {
        let resource = Arc::new(resource);
        let repository: Arc<dyn ModelRepository> = self.clone();
        resource.set_repository(Arc::downgrade(&repository));
        let uri = resource.uri();
        let mut resources = self.resources.write();
        resources.retain(|existing| existing.uri() != uri);
        resources.push(resource.clone());
        resource
    }

    /// Create and add an unloaded resource using the syntax registered for `uri`'s extension.
    pub fn create_resource(self: &Arc<Self>, uri: Url) -> Result<Arc<TextResource>, ResourceError> {
        Ok(self.add(TextResource::for_uri(uri)?))
    }

    /// The resource currently addressed by `uri`, ignoring its fragment.
    pub fn resource(&self, uri: &Url) -> Option<Arc<TextResource>> {
        let mut base = uri.clone();
        base.set_fragment(None);
        self.resources
            .read()
            .iter()
            .find(|resource| resource.uri() == base)
            .cloned()
    }

    pub fn remove(&self, uri: &Url) -> Option<Arc<TextResource>> {
        let mut resources = self.resources.write();
        let index = resources.iter().position(|resource| &resource.uri() == uri)?;
        Some(resources.remove(index))
    }

    pub fn resources(&self) -> Vec<Arc<TextResource>> {
        self.resources.read().clone()
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

impl ResourceSet {
    /// Whether `object` points into content its resource no longer holds: the resource left the
    /// set, was unloaded, or committed new content since the handle was taken.
    pub fn is_stale(&self, object: &ObjectRef) -> bool {
        let ObjectRef::Foreign {
            resource, load_id, ..
        } = object
        else {
            return false;
        };
        match self.resource(resource) {
            Some(resource) => !resource.is_loaded() || resource.load_id() != Some(*load_id),
            None => true,
        }
    }
}

impl ModelRepository for ResourceSet {
    fn get_object(&self, uri: &Url) -> Option<ObjectRef> {
        let fragment = uri.fragment()?;
        let resource = self.resource(uri)?;
        let load_id = resource.load_id()?;
        match resource.get_object(fragment)? {
            ObjectRef::Local(node) => Some(ObjectRef::Foreign {
                resource: resource.uri(),
                load_id,
                node,
            }),
            foreign => Some(foreign),
        }
    }

    fn is_proxy(&self, object: &ObjectRef) -> bool {
        if self.is_stale(object) {
            return true;
        }
        match object {
            ObjectRef::Local(_) => false,
            ObjectRef::Foreign { resource, node, .. } => self
                .resource(resource)
                .and_then(|resource| resource.with_model(|model| model.is_proxy(*node)).ok())
                .unwrap_or(false),
        }
    }
}
