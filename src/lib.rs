//! # textres-core
//!
//! A text resource engine: parse a textual notation into an in-memory object graph, track where
//! every element came from, resolve cross-references lazily and reload the document while a
//! previous load may still be running.
//!
//! ## Overview
//!
//! A [`resource::TextResource`] owns one document. Loading it runs a pipeline of pluggable
//! collaborators supplied by a [`codec::Syntax`]:
//!
//! 1. the [`codec::TextParser`] builds nodes and a [`location::LocationMap`], leaving references
//!    it cannot resolve yet as proxies registered with the resource
//! 2. post-parse commands and [`codec::ResourcePostProcessor`]s enrich the result
//! 3. an [`resolve::InterruptibleResolver`] forces resolution of every remaining proxy
//! 4. the [`codec::Validator`] checks live constraints, plus batch constraints on a first load
//!
//! All of this happens on staged content. The resource commits it in one step, so observers and
//! readers either see the previous document or the complete new one.
//!
//! ### Key Features
//!
//! - **Cancellable reload**: a newer `reload` terminates the running pipeline cooperatively and
//!   the resource always ends up reflecting the last request
//! - **Deferred resolution**: proxies are replaced in their container (and in recorded layout
//!   information) the first time they resolve, with diagnostics attached while they do not
//! - **Cross-resource references**: a [`resource_set::ResourceSet`] resolves identifiers that
//!   address elements of other documents
//! - **Batched notifications**: every pipeline emits exactly one [`event::EventBatch`]
//! - **Diagnostics and markers**: errors and warnings with positions, quick fixes, and an optional
//!   [`codec::MarkerSink`] mirroring them
//!
//! ## Architecture
//!
//! - **[`resource`]**: `TextResource`, its staged `ResourceContent` and the load pipeline
//! - **[`codec`]**: the `Syntax` plug-in traits, diagnostics, and the sample outline notation
//! - **[`resolve`]**: resolve results, resolvers, resolver switches and context fragments
//! - **[`model`]**: the arena backed object graph, schema and layout information
//! - **[`location`]**: element to source position mapping
//! - **[`event`]**: change notifications
//! - **[`config`]**: load options, option providers and text encodings
//! - **[`resource_set`]**: resources resolving references against each other
//!
//! ## Quick Start
//!
//! ```rust
//! use textres_core::{config::LoadOptions, resource_set::ResourceSet};
//! use url::Url;
//!
//! # fn main() -> Result<(), textres_core::ResourceError> {
//! let set = ResourceSet::new();
//! let shared = set.create_resource(Url::parse("file:///docs/shared.outline")?)?;
//! shared.load("Calendar\n", LoadOptions::default())?;
//!
//! let plan = set.create_resource(Url::parse("file:///docs/plan.outline")?)?;
//! plan.load(
//!     "Project -> Owner\n  Tasks -> shared.outline#Calendar\nOwner\n",
//!     LoadOptions::default(),
//! )?;
//!
//! assert!(plan.errors().is_empty());
//! assert_eq!(
//!     plan.save_to_string(&LoadOptions::default())?,
//!     "Project -> Owner\n  Tasks -> shared.outline#Calendar\nOwner\n"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ### Observing a Resource
//!
//! ```rust
//! use textres_core::{config::LoadOptions, event::ResourceEvent, resource::TextResource};
//! use url::Url;
//!
//! # fn main() -> Result<(), textres_core::ResourceError> {
//! let resource = TextResource::for_uri(Url::parse("file:///notes.outline")?)?;
//! let mut events = resource.subscribe();
//! resource.load("A\n", LoadOptions::default())?;
//!
//! let batch = events.try_recv().expect("one batch per load");
//! assert_eq!(batch.last(), Some(&ResourceEvent::Loaded(true)));
//! assert!(events.try_recv().is_err());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod location;
pub mod model;
pub mod resolve;
pub mod resource;
pub mod resource_set;
#[cfg(test)]
mod tests;

pub use error::*;
