//! Reloads that overlap, get cancelled, or carry constraint problems over.
//!
//! The gated syntax lets a test park a pipeline at parse, post-processing or resolution and
//! decide from the test thread what happens next.

mod common;

use common::*;
use std::{sync::Arc, thread};
use test_log::test;
use textres_core::{
    codec::ProblemKind,
    config::LoadOptions,
    resource::{LoadOutcome, TextResource},
};

/// A loaded resource whose content carries an error and a warning.
fn loaded(syntax: &Arc<GatedSyntax>, name: &str) -> TextResource {
    let resource = syntax.resource(name);
    resource
        .load("Original -> Missing\nlower\n", LoadOptions::default())
        .unwrap();
    assert_eq!(resource.errors().len(), 1);
    assert_eq!(resource.warnings().len(), 1);
    resource
}

#[test]
fn cancelling_a_parse_keeps_prior_content() {
    let syntax = Arc::new(GatedSyntax::default());
    let resource = loaded(&syntax, "parse");
    let load_id = resource.load_id();
    let before = (diagnostics(&resource), shape(&resource));
    let mut events = resource.subscribe();

    let entered = syntax.parse.arm();
    let outcome = thread::scope(|s| {
        let reload = s.spawn(|| resource.reload("Replacement\n", LoadOptions::default()));
        reached(&entered);
        resource.cancel_reload();
        reload.join().unwrap()
    });

    assert_eq!(outcome.unwrap(), LoadOutcome::Cancelled);
    assert_eq!(top_level_names(&resource), vec!["Original", "lower"]);
    assert_eq!(resource.load_id(), load_id);
    assert_eq!((diagnostics(&resource), shape(&resource)), before);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn cancelling_post_processing_keeps_prior_content() {
    let syntax = Arc::new(GatedSyntax::default());
    let resource = loaded(&syntax, "post");
    let before = (diagnostics(&resource), shape(&resource));
    let mut events = resource.subscribe();

    let entered = syntax.post_process.arm();
    let outcome = thread::scope(|s| {
        let reload = s.spawn(|| resource.reload("Replacement\n", LoadOptions::default()));
        reached(&entered);
        resource.cancel_reload();
        reload.join().unwrap()
    });

    assert_eq!(outcome.unwrap(), LoadOutcome::Cancelled);
    assert_eq!(top_level_names(&resource), vec!["Original", "lower"]);
    assert_eq!((diagnostics(&resource), shape(&resource)), before);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn cancelling_resolution_keeps_prior_content() {
    let syntax = Arc::new(GatedSyntax::default());
    let resource = loaded(&syntax, "resolution");
    let before = (diagnostics(&resource), shape(&resource));
    let mut events = resource.subscribe();

    let entered = syntax.resolve.arm();
    let outcome = thread::scope(|s| {
        let reload = s.spawn(|| resource.reload("Uses -> Target\nTarget\n", LoadOptions::default()));
        reached(&entered);
        resource.cancel_reload();
        syntax.resolve.open();
        reload.join().unwrap()
    });

    assert_eq!(outcome.unwrap(), LoadOutcome::Cancelled);
    assert_eq!(top_level_names(&resource), vec!["Original", "lower"]);
    assert_eq!((diagnostics(&resource), shape(&resource)), before);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn newer_reload_supersedes_a_running_one() {
    let syntax = Arc::new(GatedSyntax::default());
    let resource = loaded(&syntax, "supersede");
    let mut events = resource.subscribe();

    let entered = syntax.parse.arm();
    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| resource.reload("First\n", LoadOptions::default()));
        reached(&entered);
        let second = resource.reload("Second\n", LoadOptions::default());
        (first.join().unwrap(), second)
    });

    assert_eq!(first.unwrap(), LoadOutcome::Cancelled);
    assert_eq!(second.unwrap(), LoadOutcome::Committed);
    assert_eq!(top_level_names(&resource), vec!["Second"]);
    let batches = drain(&mut events);
    assert_eq!(batches.len(), 1);
}

#[test]
fn resource_can_reload_after_a_cancellation() {
    let syntax = Arc::new(GatedSyntax::default());
    let resource = loaded(&syntax, "again");

    let entered = syntax.parse.arm();
    thread::scope(|s| {
        let reload = s.spawn(|| resource.reload("Lost\n", LoadOptions::default()));
        reached(&entered);
        resource.cancel_reload();
        reload.join().unwrap().unwrap();
    });

    assert_eq!(
        resource.reload("Kept\n", LoadOptions::default()).unwrap(),
        LoadOutcome::Committed
    );
    assert_eq!(top_level_names(&resource), vec!["Kept"]);
}

#[test]
fn cancel_without_active_pipeline_is_harmless() {
    let resource = outline_resource("idle");
    resource.cancel_reload();
    resource.load("A\n", LoadOptions::default()).unwrap();
    resource.cancel_reload();
    assert_eq!(
        resource.reload("B\n", LoadOptions::default()).unwrap(),
        LoadOutcome::Committed
    );
    assert_eq!(top_level_names(&resource), vec!["B"]);
}

#[test]
fn batch_constraints_are_checked_on_first_load_only() {
    let resource = outline_resource("constraints");
    resource.load("lower\nUpper\n", LoadOptions::default()).unwrap();
    assert_eq!(
        messages(&resource.warnings()),
        vec!["Entry name 'lower' should start with an uppercase letter"]
    );

    // Reloads keep the earlier batch findings but do not look for new ones.
    resource
        .reload("lower\nUpper\nsmall\n", LoadOptions::default())
        .unwrap();
    let warnings = resource.warnings();
    assert_eq!(
        messages(&warnings),
        vec!["Entry name 'lower' should start with an uppercase letter"]
    );
    assert_eq!(warnings[0].kind(), ProblemKind::BatchConstraintProblem);
    assert_eq!(warnings[0].element(), None);
    assert_eq!(warnings[0].line(&resource.location_map()), 1);

    // Live constraints run on every pipeline.
    resource
        .reload("Twin\nTwin\n", LoadOptions::default())
        .unwrap();
    assert_eq!(messages(&resource.errors()), vec!["Duplicate entry name 'Twin'"]);
    assert_eq!(
        resource.errors()[0].kind(),
        ProblemKind::LiveConstraintProblem
    );

    // After an unload the next load counts as a first load again.
    resource.unload().unwrap();
    resource.load("small\n", LoadOptions::default()).unwrap();
    assert_eq!(
        messages(&resource.warnings()),
        vec!["Entry name 'small' should start with an uppercase letter"]
    );
}

#[test]
fn unresolved_references_do_not_hold_back_constraints() {
    let resource = outline_resource("dangling");
    resource
        .load("a -> Missing\nB\nB\n", LoadOptions::default())
        .unwrap();
    let kinds = |diagnostics: Vec<textres_core::codec::TextDiagnostic>| {
        diagnostics.iter().map(|d| d.kind()).collect::<Vec<_>>()
    };
    assert_eq!(
        messages(&resource.errors()),
        vec!["Duplicate entry name 'B'", "Entry 'Missing' is not defined"]
    );
    assert!(kinds(resource.errors()).contains(&ProblemKind::LiveConstraintProblem));
    assert_eq!(
        kinds(resource.warnings()),
        vec![ProblemKind::BatchConstraintProblem]
    );

    // Syntax errors still stop validation.
    let broken = outline_resource("broken");
    broken.load("a\n   B\n", LoadOptions::default()).unwrap();
    assert_eq!(kinds(broken.errors()), vec![ProblemKind::SyntaxError]);
    assert!(broken.warnings().is_empty());
}

#[test]
fn reload_of_an_unloaded_resource_is_a_first_load() {
    let resource = outline_resource("fresh");
    assert_eq!(
        resource.reload("lower\n", LoadOptions::default()).unwrap(),
        LoadOutcome::Committed
    );
    assert!(resource.is_loaded());
    assert_eq!(
        messages(&resource.warnings()),
        vec!["Entry name 'lower' should start with an uppercase letter"]
    );
}

#[test]
fn disabled_validation_skips_every_constraint() {
    let resource = outline_resource("unchecked");
    resource
        .load(
            "twin\ntwin\n",
            LoadOptions {
                disable_validation: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(resource.errors().is_empty());
    assert!(resource.warnings().is_empty());
}
