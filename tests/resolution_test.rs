//! Proxy resolution within one resource and across a resource set.

mod common;

use common::*;
use test_log::test;
use textres_core::{
    codec::{ProblemKind, Severity},
    config::LoadOptions,
    event::ResourceEvent,
    model::ObjectRef,
    resource::TextResource,
    resource_set::ResourceSet,
};
use url::Url;

fn node(resource: &TextResource, name: &str) -> textres_core::model::NodeId {
    resource
        .with_model(|model| model.find_by_attribute("name", name))
        .unwrap()
        .unwrap()
}

fn fragment_ids(resource: &TextResource) -> Vec<String> {
    resource
        .with_content(|content| {
            content
                .fragments()
                .map(|fragment| fragment.internal_id().to_string())
                .collect()
        })
        .unwrap()
}

#[test]
fn references_resolve_during_load() {
    let resource = outline_resource("local");
    resource
        .load("A -> C\nB -> C\nC\n", LoadOptions::default())
        .unwrap();
    let (a, b, c) = (node(&resource, "A"), node(&resource, "B"), node(&resource, "C"));

    resource
        .with_content(|content| {
            assert_eq!(content.pending_fragments(), 0);
            let model = content.model();
            assert_eq!(model.values(a, "refs"), vec![ObjectRef::Local(c)]);
            assert_eq!(
                model.values(c, "referrers"),
                vec![ObjectRef::Local(a), ObjectRef::Local(b)]
            );
        })
        .unwrap();
    assert!(resource.errors().is_empty());

    let id = &fragment_ids(&resource)[0];
    assert!(id.starts_with("_context_dependent_"));
    assert_eq!(resource.get_object(id), Some(ObjectRef::Local(c)));
}

#[test]
fn unresolved_reference_reports_position_and_quick_fix() {
    let resource = outline_resource("missing");
    resource
        .load("A -> Missing\n", LoadOptions::default())
        .unwrap();

    let records = resource
        .with_content(|content| content.records(Severity::Error))
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.message, "Entry 'Missing' is not defined");
    assert_eq!(record.kind, ProblemKind::UnresolvedReference);
    assert_eq!((record.line, record.column), (1, 5));
    assert_eq!((record.char_start, record.char_end), (5, 12));

    let errors = resource.errors();
    let fix = &errors[0].problem().quick_fixes()[0];
    assert_eq!(fix.display_string(), "Create entry 'Missing'");
    assert_eq!(
        fix.context_objects(),
        &[ObjectRef::Local(node(&resource, "A"))]
    );
    assert_eq!(resource.quick_fix(&fix.context_as_string()).as_ref(), Some(fix));

    // Asking again does not stack a second error on the proxy.
    let id = &fragment_ids(&resource)[0];
    assert_eq!(resource.get_object(id), None);
    assert_eq!(resource.errors().len(), 1);
}

#[test]
fn resolver_warnings_are_attached_to_the_reference() {
    let resource = outline_resource("warnings");
    resource.load("A -> A\n", LoadOptions::default()).unwrap();
    assert!(resource.errors().is_empty());
    assert_eq!(
        messages(&resource.warnings()),
        vec!["Entry 'A' refers to itself"]
    );

    let ambiguous = outline_resource("ambiguous");
    ambiguous
        .load("A -> B\nB\nB\n", LoadOptions::default())
        .unwrap();
    assert_eq!(
        messages(&ambiguous.warnings()),
        vec!["'B' is ambiguous, 2 entries share this name"]
    );
    assert_eq!(
        messages(&ambiguous.errors()),
        vec!["Duplicate entry name 'B'"]
    );
    let first_b = ambiguous
        .with_model(|model| model.children(model.roots()[0])[1])
        .unwrap();
    let a = node(&ambiguous, "A");
    assert_eq!(
        ambiguous.with_model(|model| model.values(a, "refs")).unwrap(),
        vec![ObjectRef::Local(first_b)]
    );
}

#[test]
fn references_into_other_resources_resolve_once_available() {
    init_logging();
    let set = ResourceSet::new();
    let plan_uri = Url::parse("file:///docs/plan.outline").unwrap();
    let plan = set.create_resource(plan_uri.clone()).unwrap();
    plan.load("Tasks -> shared.outline#Calendar\n", LoadOptions::default())
        .unwrap();
    assert_eq!(
        messages(&plan.errors()),
        vec!["Entry 'Calendar' not found in shared.outline"]
    );

    let shared_uri = Url::parse("file:///docs/shared.outline").unwrap();
    let shared = set.create_resource(shared_uri.clone()).unwrap();
    shared.load("Calendar\n", LoadOptions::default()).unwrap();
    let calendar = node(&shared, "Calendar");

    let mut events = plan.subscribe();
    let id = &fragment_ids(&plan)[0];
    let expected = ObjectRef::Foreign {
        resource: shared_uri,
        load_id: shared.load_id().unwrap(),
        node: calendar,
    };
    assert_eq!(plan.get_object(id), Some(expected.clone()));
    assert!(plan.errors().is_empty());

    let tasks = node(&plan, "Tasks");
    assert_eq!(
        plan.with_model(|model| model.values(tasks, "refs")).unwrap(),
        vec![expected]
    );
    let batches = drain(&mut events);
    assert_eq!(batches.len(), 1);
    assert!(batches[0].contains(&ResourceEvent::FeatureSet {
        node: tasks,
        feature: "refs".to_string()
    }));
    assert!(batches[0].contains(&ResourceEvent::ProblemsChanged {
        severity: Severity::Error
    }));
    assert_eq!(
        plan.save_to_string(&LoadOptions::default()).unwrap(),
        "Tasks -> shared.outline#Calendar\n"
    );
}

#[test]
fn reload_resolves_against_current_set_members() {
    let set = ResourceSet::new();
    let lib = set
        .create_resource(Url::parse("file:///docs/lib.outline").unwrap())
        .unwrap();
    lib.load("Old\n", LoadOptions::default()).unwrap();
    let app = set
        .create_resource(Url::parse("file:///docs/app.outline").unwrap())
        .unwrap();
    app.load("Main -> lib.outline#New\n", LoadOptions::default())
        .unwrap();
    assert_eq!(app.errors().len(), 1);

    lib.reload("Old\nNew\n", LoadOptions::default()).unwrap();
    app.reload("Main -> lib.outline#New\n", LoadOptions::default())
        .unwrap();
    assert!(app.errors().is_empty());
    assert_eq!(set.len(), 2);
}

#[test]
fn foreign_targets_follow_their_resource_across_reloads() {
    let set = ResourceSet::new();
    let lib = set
        .create_resource(Url::parse("file:///docs/lib.outline").unwrap())
        .unwrap();
    lib.load("Old\nNew\n", LoadOptions::default()).unwrap();
    let app = set
        .create_resource(Url::parse("file:///docs/app.outline").unwrap())
        .unwrap();
    app.load("Main -> lib.outline#New\n", LoadOptions::default())
        .unwrap();
    let id = &fragment_ids(&app)[0];
    let main = node(&app, "Main");
    let Some(ObjectRef::Foreign { load_id, node: first, .. }) = app.get_object(id) else {
        panic!("expected a foreign target");
    };
    assert_eq!(Some(load_id), lib.load_id());
    assert_eq!(first, node(&lib, "New"));

    // The held handle now indexes replaced content and is looked up again.
    lib.reload("Extra\nMore\nNew\n", LoadOptions::default())
        .unwrap();
    let refreshed = app.get_object(id).unwrap();
    let expected = ObjectRef::Foreign {
        resource: lib.uri(),
        load_id: lib.load_id().unwrap(),
        node: node(&lib, "New"),
    };
    assert_eq!(refreshed, expected);
    assert_eq!(
        app.with_model(|model| model.values(main, "refs")).unwrap(),
        vec![expected]
    );
    assert!(!set.is_stale(&refreshed));

    lib.reload("Extra\n", LoadOptions::default()).unwrap();
    assert!(set.is_stale(&refreshed));
    assert_eq!(app.get_object(id), None);
    assert_eq!(
        messages(&app.errors()),
        vec!["Entry 'New' not found in lib.outline"]
    );
    assert_eq!(app.get_object(id), None);
    assert_eq!(app.errors().len(), 1);
}

#[test]
fn references_to_the_own_file_resolve_within_the_document() {
    let set = ResourceSet::new();
    let doc = set
        .create_resource(Url::parse("file:///docs/self.outline").unwrap())
        .unwrap();
    doc.load("A -> self.outline#B\nB\n", LoadOptions::default())
        .unwrap();
    assert!(doc.errors().is_empty());
    let (a, b) = (node(&doc, "A"), node(&doc, "B"));
    assert_eq!(
        doc.with_model(|model| model.values(a, "refs")).unwrap(),
        vec![ObjectRef::Local(b)]
    );

    doc.reload("B\nA -> self.outline#B\n", LoadOptions::default())
        .unwrap();
    let (a, b) = (node(&doc, "A"), node(&doc, "B"));
    assert_eq!(
        doc.with_model(|model| model.values(a, "refs")).unwrap(),
        vec![ObjectRef::Local(b)]
    );
}
