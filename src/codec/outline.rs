//! A small indentation based notation.
//!
//! ```text
//! # comments run to the end of the line
//! Project -> Owner
//!   Tasks -> Owner, shared.outline#Calendar
//!     Done
//! Owner
//! ```
//!
//! Each non-blank line declares an `Entry` named by its first word. Two spaces of indentation
//! nest an entry below the previous, shallower one. `->` starts a comma separated list of
//! references: a plain name refers to an entry of the same document, `file#Name` to an entry of
//! another resource in the same [`crate::resource_set::ResourceSet`].
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    codec::{
        diagnostic::{Problem, ProblemKind, QuickFix},
        ParseError, ParseResult, ResourcePostProcessor, Syntax, TextParser, TextPrinter,
        Validator,
    },
    config::LoadOptions,
    error::ResourceError,
    location::{Location, LocationMap},
    model::{
        ClassDefinition, FeatureDefinition, LayoutInformation, LayoutToken, NodeId, ObjectRef,
        SchemaRegistry,
    },
    resolve::{
        ReferenceResolveResult, ReferenceResolver, ReferenceResolverSwitch, ResolveContext,
        ResolverSwitch,
    },
    resource::{CancellationToken, ResourceContent},
};

pub const OUTLINE_EXTENSION: &str = "outline";

pub const OUTLINE_CLASS: &str = "Outline";
pub const ENTRY_CLASS: &str = "Entry";

const INDENT_WIDTH: usize = 2;
const DEFAULT_MAX_DEPTH: i64 = 8;

const ENTRY_PATTERN: &str =
    r"^(?P<indent> *)(?P<name>[\w.]+(?:-[\w.]+)*)(?:(?P<arrow>\s*->\s*)(?P<refs>.*?))?(?P<trail>\s*)$";

static ENTRY_REGEX: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(ENTRY_PATTERN));

/// The part of `line` before its comment. A comment starts at a `#` that opens the line or
/// follows whitespace, so `file#Name` references stay intact.
fn strip_comment(line: &str) -> &str {
    let mut previous: Option<char> = None;
    for (index, ch) in line.char_indices() {
        if ch == '#' && previous.map_or(true, char::is_whitespace) {
            return &line[..index];
        }
        previous = Some(ch);
    }
    line
}

/// Schema of the outline notation.
pub fn outline_schema() -> SchemaRegistry {
    let schema = SchemaRegistry::default();
    schema.register(
        OUTLINE_CLASS,
        ClassDefinition {
            features: vec![FeatureDefinition::containment("entries", true)],
            id_attribute: None,
        },
    );
    schema.register(
        ENTRY_CLASS,
        ClassDefinition {
            features: vec![
                FeatureDefinition::attribute("name"),
                FeatureDefinition::containment("children", true),
                FeatureDefinition::reference("refs", true, Some("referrers")),
                FeatureDefinition::reference("referrers", true, Some("refs")),
            ],
            id_attribute: Some("name"),
        },
    );
    schema
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn containment_feature(model_class: Option<&str>) -> &'static str {
    match model_class {
        Some(OUTLINE_CLASS) => "entries",
        _ => "children",
    }
}

#[derive(Debug, Clone)]
pub struct OutlineSyntax {
    schema: SchemaRegistry,
}

impl OutlineSyntax {
    pub fn new() -> Self {
        OutlineSyntax {
            schema: outline_schema(),
        }
    }
}

impl Default for OutlineSyntax {
    fn default() -> Self {
        Self::new()
    }
}

impl Syntax for OutlineSyntax {
    fn name(&self) -> &str {
        "outline"
    }

    fn file_extension(&self) -> &str {
        OUTLINE_EXTENSION
    }

    fn schema(&self) -> SchemaRegistry {
        self.schema.clone()
    }

    fn create_parser(&self) -> Arc<dyn TextParser> {
        Arc::new(OutlineParser::default())
    }

    fn create_printer(&self) -> Box<dyn TextPrinter> {
        Box::new(OutlinePrinter)
    }

    fn create_resolver_switch(&self) -> Arc<dyn ReferenceResolverSwitch> {
        Arc::new(ResolverSwitch::new().with_resolver(
            ENTRY_CLASS,
            "refs",
            Arc::new(EntryReferenceResolver),
        ))
    }

    fn post_processor(&self) -> Option<Arc<dyn ResourcePostProcessor>> {
        Some(Arc::new(DepthAnalysis))
    }

    fn validator(&self) -> Option<Arc<dyn Validator>> {
        Some(Arc::new(OutlineValidator))
    }
}

/// Line oriented parser. Polls the cancellation token and its own termination flag once per
/// line.
#[derive(Debug, Default)]
pub struct OutlineParser {
    terminated: AtomicBool,
}

struct LineCursor<'a> {
    number: usize,
    char_offset: usize,
    code: &'a str,
}

impl LineCursor<'_> {
    fn offset_of(&self, byte_index: usize) -> usize {
        self.char_offset + char_len(&self.code[..byte_index])
    }

    fn column_of(&self, byte_index: usize) -> usize {
        char_len(&self.code[..byte_index])
    }
}

impl OutlineParser {
    fn syntax_error(
        content: &mut ResourceContent,
        message: impl Into<String>,
        line: &LineCursor<'_>,
    ) {
        content.add_problem_at(
            Problem::error(message, ProblemKind::SyntaxError),
            line.number,
            0,
            line.char_offset,
            line.char_offset + char_len(line.code),
        );
    }
}

impl TextParser for OutlineParser {
    fn parse(
        &self,
        text: &str,
        content: &mut ResourceContent,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<ParseResult, ParseError> {
        let pattern = match &*ENTRY_REGEX {
            Ok(pattern) => pattern,
            Err(e) => return Err(ResourceError::from(e.clone()).into()),
        };
        let record_layout = !options.disable_layout_information_recording;
        let mut locations = LocationMap::new();

        let root = content.model_mut().create(OUTLINE_CLASS);
        locations.set_location(root, Location::new(0, char_len(text), 1, 0));

        // (depth, entry) of the current ancestry
        let mut stack: Vec<(usize, NodeId)> = Vec::new();
        let mut pending_hidden = String::new();
        let mut char_offset = 0;

        for (index, raw_line) in text.split_inclusive('\n').enumerate() {
            cancel.check()?;
            if self.terminated.load(Ordering::SeqCst) {
                return Err(ParseError::Terminated);
            }
            let line_text = raw_line.trim_end_matches(['\n', '\r']);
            let code = strip_comment(line_text);
            let line = LineCursor {
                number: index + 1,
                char_offset,
                code,
            };
            char_offset += char_len(raw_line);

            if code.trim().is_empty() {
                pending_hidden.push_str(raw_line);
                continue;
            }
            let Some(captures) = pattern.captures(code) else {
                Self::syntax_error(content, format!("Invalid entry '{}'", code.trim()), &line);
                pending_hidden.push_str(raw_line);
                continue;
            };
            let indent = captures.name("indent").map_or("", |m| m.as_str());
            if indent.len() % INDENT_WIDTH != 0 {
                Self::syntax_error(
                    content,
                    format!("Indentation must be a multiple of {INDENT_WIDTH} spaces"),
                    &line,
                );
                pending_hidden.push_str(raw_line);
                continue;
            }
            let depth = indent.len() / INDENT_WIDTH;
            while stack.last().is_some_and(|(d, _)| *d >= depth) {
                stack.pop();
            }
            if depth > stack.len() {
                Self::syntax_error(
                    content,
                    "Entry is indented more than one level below its parent",
                    &line,
                );
                pending_hidden.push_str(raw_line);
                continue;
            }
            let parent = stack.last().map_or(root, |(_, entry)| *entry);

            let Some(name) = captures.name("name") else {
                continue;
            };
            let model = content.model_mut();
            let entry = model.create(ENTRY_CLASS);
            model.set_attribute(entry, "name", name.as_str())?;
            let feature = containment_feature(model.class(parent));
            model.add_child(parent, feature, entry)?;
            let code_end = captures.name("trail").map_or(code.len(), |m| m.start());
            locations.set_location(
                entry,
                Location::new(
                    line.offset_of(name.start()),
                    line.offset_of(code_end),
                    line.number,
                    line.column_of(name.start()),
                ),
            );

            let mut layout = LayoutInformation::new();
            pending_hidden.push_str(indent);
            layout.hidden(std::mem::take(&mut pending_hidden));
            layout.value("name", name.as_str());

            if let (Some(arrow), Some(refs)) = (captures.name("arrow"), captures.name("refs")) {
                layout.keyword(arrow.as_str());
                let mut start = refs.start();
                for (position, piece) in refs.as_str().split(',').enumerate() {
                    if position > 0 {
                        layout.keyword(",");
                    }
                    let leading = piece.len() - piece.trim_start().len();
                    let identifier = piece.trim();
                    let ident_start = start + leading;
                    let ident_end = ident_start + identifier.len();
                    start += piece.len() + 1;
                    layout.hidden(&piece[..leading]);

                    if identifier.is_empty() || identifier.contains(char::is_whitespace) {
                        let column = line.column_of(ident_start);
                        content.add_problem_at(
                            Problem::error(
                                format!("Invalid reference '{identifier}'"),
                                ProblemKind::SyntaxError,
                            ),
                            line.number,
                            column,
                            line.offset_of(ident_start),
                            line.offset_of(ident_end),
                        );
                        layout.hidden(identifier);
                    } else {
                        let proxy = content.model_mut().create_proxy(ENTRY_CLASS);
                        let slot_position = content.model().values(entry, "refs").len();
                        content
                            .model_mut()
                            .add_reference(entry, "refs", ObjectRef::Local(proxy))?;
                        content.register_context_dependent_proxy(
                            entry,
                            "refs",
                            Some(slot_position),
                            identifier,
                            proxy,
                        )?;
                        locations.set_location(
                            proxy,
                            Location::new(
                                line.offset_of(ident_start),
                                line.offset_of(ident_end),
                                line.number,
                                line.column_of(ident_start),
                            ),
                        );
                        layout.reference("refs", ObjectRef::Local(proxy), identifier);
                    }
                    layout.hidden(&piece[leading + identifier.len()..]);
                }
            }

            pending_hidden.push_str(&code[code_end..]);
            pending_hidden.push_str(&raw_line[code.len()..]);
            if record_layout {
                content.model_mut().set_layout(entry, layout)?;
            }
            stack.push((depth, entry));
        }

        if record_layout && !pending_hidden.is_empty() {
            let mut trailing = LayoutInformation::new();
            trailing.hidden(pending_hidden);
            content.model_mut().set_layout(root, trailing)?;
        }

        Ok(ParseResult {
            root: Some(root),
            location_map: (!options.disable_location_map).then_some(locations),
            post_parse_commands: Vec::new(),
        })
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Entries below `root` in document order, with their nesting depth (0 for top level).
fn entries_below(content: &ResourceContent, root: NodeId) -> Vec<(usize, NodeId)> {
    let model = content.model();
    let mut entries = Vec::new();
    let mut stack: Vec<(usize, NodeId)> =
        model.children(root).into_iter().rev().map(|e| (0, e)).collect();
    while let Some((depth, entry)) = stack.pop() {
        entries.push((depth, entry));
        stack.extend(
            model
                .children(entry)
                .into_iter()
                .rev()
                .map(|child| (depth + 1, child)),
        );
    }
    entries
}

/// Prints from layout information when every entry carries it, canonically otherwise.
#[derive(Debug, Default)]
pub struct OutlinePrinter;

impl OutlinePrinter {
    fn reference_text(content: &ResourceContent, entry: NodeId, target: &ObjectRef) -> String {
        if let Some(text) = content.deresolve(target, entry, "refs") {
            return text;
        }
        content
            .fragments()
            .find(|fragment| {
                fragment.target() == Some(target)
                    || ObjectRef::Local(fragment.proxy()) == *target
            })
            .map(|fragment| fragment.identifier().to_string())
            .unwrap_or_else(|| target.to_string())
    }

    fn print_layout(content: &ResourceContent, entry: NodeId, layout: &LayoutInformation, out: &mut String) {
        let model = content.model();
        for token in layout.tokens() {
            match token {
                LayoutToken::Value { feature, text } => {
                    out.push_str(model.attribute(entry, feature).unwrap_or(text))
                }
                LayoutToken::Reference { target, text, .. } => {
                    let resolved_local = target
                        .as_local()
                        .is_some_and(|node| !model.is_proxy(node));
                    match resolved_local.then(|| content.deresolve(target, entry, "refs")) {
                        Some(Some(name)) => out.push_str(&name),
                        _ => out.push_str(text),
                    }
                }
                other => out.push_str(other.text()),
            }
        }
    }

    fn print_canonical(content: &ResourceContent, depth: usize, entry: NodeId, out: &mut String) {
        let model = content.model();
        out.push_str(&" ".repeat(depth * INDENT_WIDTH));
        out.push_str(model.attribute(entry, "name").unwrap_or_default());
        let refs = model.values(entry, "refs");
        if !refs.is_empty() {
            let texts: Vec<String> = refs
                .iter()
                .map(|target| Self::reference_text(content, entry, target))
                .collect();
            out.push_str(" -> ");
            out.push_str(&texts.join(", "));
        }
        out.push('\n');
    }
}

impl TextPrinter for OutlinePrinter {
    fn print(
        &self,
        content: &ResourceContent,
        root: NodeId,
        out: &mut String,
        _options: &LoadOptions,
    ) -> Result<(), ResourceError> {
        let model = content.model();
        let entries = entries_below(content, root);
        let preserve_layout = entries
            .iter()
            .all(|(_, entry)| model.layout(*entry).is_some());
        for (depth, entry) in entries {
            match model.layout(entry).filter(|_| preserve_layout) {
                Some(layout) => Self::print_layout(content, entry, layout, out),
                None => Self::print_canonical(content, depth, entry, out),
            }
        }
        if preserve_layout {
            if let Some(trailing) = model.layout(root) {
                out.push_str(&trailing.source_text());
            }
        }
        Ok(())
    }
}

/// Resolves the `refs` of an entry: plain names within the document, `file#Name` through the
/// model repository.
#[derive(Debug, Default)]
pub struct EntryReferenceResolver;

impl ReferenceResolver for EntryReferenceResolver {
    fn resolve(
        &self,
        identifier: &str,
        container: NodeId,
        _feature: &str,
        _position: Option<usize>,
        resolve_fuzzy: bool,
        result: &mut ReferenceResolveResult,
        ctx: &ResolveContext<'_>,
    ) -> Result<(), ResourceError> {
        if let Some((file, name)) = identifier.split_once('#') {
            let mut target = ctx.uri.join(file)?;
            target.set_fragment(Some(name));
            result.set_error_message(format!("Entry '{name}' not found in {file}"));
            result.add_mapping_uri(identifier, target, None);
            return Ok(());
        }

        let model = ctx.model;
        let candidates: Vec<NodeId> = model
            .walk()
            .into_iter()
            .filter(|node| model.class(*node) == Some(ENTRY_CLASS))
            .filter(|node| {
                let name = model.attribute(*node, "name").unwrap_or_default();
                if resolve_fuzzy {
                    name.starts_with(identifier)
                } else {
                    name == identifier
                }
            })
            .collect();

        if candidates.is_empty() {
            result.set_error_message(format!("Entry '{identifier}' is not defined"));
            result.add_quick_fix(QuickFix::new(
                format!("Create entry '{identifier}'"),
                None,
                vec![ObjectRef::Local(container)],
            ));
            return Ok(());
        }
        let ambiguous = !resolve_fuzzy && candidates.len() > 1;
        for (index, candidate) in candidates.iter().enumerate() {
            let warning = if *candidate == container {
                Some(format!("Entry '{identifier}' refers to itself"))
            } else if ambiguous && index == 0 {
                Some(format!(
                    "'{identifier}' is ambiguous, {} entries share this name",
                    candidates.len()
                ))
            } else {
                None
            };
            result.add_mapping_element(identifier, ObjectRef::Local(*candidate), warning);
        }
        Ok(())
    }

    fn deresolve(
        &self,
        element: &ObjectRef,
        _container: NodeId,
        _feature: &str,
        ctx: &ResolveContext<'_>,
    ) -> Option<String> {
        let node = element.as_local()?;
        if ctx.model.is_proxy(node) {
            return None;
        }
        ctx.model.attribute(node, "name").map(str::to_string)
    }
}

/// Warns about entries nested deeper than the `max_depth` extra option (default 8).
#[derive(Debug, Clone, Default)]
pub struct DepthAnalysis;

impl ResourcePostProcessor for DepthAnalysis {
    fn process(
        &self,
        content: &mut ResourceContent,
        cancel: &CancellationToken,
    ) -> Result<(), ResourceError> {
        let max_depth = content
            .options()
            .and_then(|options| options.extra_integer("max_depth"))
            .unwrap_or(DEFAULT_MAX_DEPTH)
            .max(0) as usize;
        let mut too_deep = Vec::new();
        for root in content.roots().to_vec() {
            for (depth, entry) in entries_below(content, root) {
                cancel.check()?;
                if depth + 1 > max_depth {
                    too_deep.push((depth + 1, entry));
                }
            }
        }
        for (depth, entry) in too_deep {
            let name = content
                .model()
                .attribute(entry, "name")
                .unwrap_or_default()
                .to_string();
            content.add_warning(
                format!("Entry '{name}' is nested {depth} levels deep (maximum {max_depth})"),
                ProblemKind::AnalysisProblem,
                entry,
            );
        }
        Ok(())
    }
}

/// Duplicate sibling names are a live-constraint error. Names that do not start with an
/// uppercase letter are a batch-constraint warning.
#[derive(Debug, Clone, Default)]
pub struct OutlineValidator;

impl Validator for OutlineValidator {
    fn check_constraints(
        &self,
        content: &mut ResourceContent,
        root: NodeId,
        include_batch_constraints: bool,
    ) {
        let mut parents = vec![root];
        parents.extend(
            entries_below(content, root)
                .into_iter()
                .map(|(_, entry)| entry),
        );
        let mut duplicates = Vec::new();
        let mut lowercase = Vec::new();
        let model = content.model();
        for parent in parents {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for child in model.children(parent) {
                let name = model.attribute(child, "name").unwrap_or_default();
                let count = seen.entry(name).or_default();
                *count += 1;
                if *count > 1 {
                    duplicates.push((child, name.to_string()));
                }
                if include_batch_constraints
                    && !name.chars().next().is_some_and(char::is_uppercase)
                {
                    lowercase.push((child, name.to_string()));
                }
            }
        }
        for (entry, name) in duplicates {
            content.add_error(
                format!("Duplicate entry name '{name}'"),
                ProblemKind::LiveConstraintProblem,
                entry,
            );
        }
        for (entry, name) in lowercase {
            content.add_warning(
                format!("Entry name '{name}' should start with an uppercase letter"),
                ProblemKind::BatchConstraintProblem,
                entry,
            );
        }
    }
}
