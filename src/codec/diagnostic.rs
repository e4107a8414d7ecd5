//! Diagnostic types for parsing, reference resolution, post-processing and validation.
//!
//! A [`Problem`] describes *what* went wrong; a [`TextDiagnostic`] binds it to *where*. Element
//! based diagnostics remember only the offending node and read their position from the
//! resource's current [`LocationMap`] whenever they are queried. Position based diagnostics carry
//! frozen coordinates, which is what syntax errors (no element exists yet) and diagnostics carried
//! across a reload need.
//!
//! [`DiagnosticRecord`] is the resolved, serializable view handed to callers and marker sinks.
use enumset::EnumSetType;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use url::Url;

use crate::{
    location::LocationMap,
    model::{NodeId, ObjectRef},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Where a problem came from. Determines which diagnostics are cleared when a phase re-runs.
#[derive(EnumSetType, Debug, Hash, Serialize, Deserialize)]
#[enumset(serialize_repr = "list")]
pub enum ProblemKind {
    Unknown,
    SyntaxError,
    UnresolvedReference,
    /// Produced by constraints that run on every load and reload
    LiveConstraintProblem,
    /// Produced by expensive constraints that run only on an explicit full load; these survive
    /// reloads
    BatchConstraintProblem,
    /// Produced by post-processors; cleared before post-processors run again
    AnalysisProblem,
}

impl Display for ProblemKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            ProblemKind::Unknown => "unknown",
            ProblemKind::SyntaxError => "syntax error",
            ProblemKind::UnresolvedReference => "unresolved reference",
            ProblemKind::LiveConstraintProblem => "live constraint",
            ProblemKind::BatchConstraintProblem => "batch constraint",
            ProblemKind::AnalysisProblem => "analysis",
        };
        write!(f, "{name}")
    }
}

/// A suggested repair attached to a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFix {
    display_string: String,
    image_key: Option<String>,
    context_objects: Vec<ObjectRef>,
}

impl QuickFix {
    pub fn new(
        display_string: impl Into<String>,
        image_key: Option<String>,
        context_objects: Vec<ObjectRef>,
    ) -> Self {
        QuickFix {
            display_string: display_string.into(),
            image_key,
            context_objects,
        }
    }

    pub fn display_string(&self) -> &str {
        &self.display_string
    }

    pub fn image_key(&self) -> Option<&str> {
        self.image_key.as_deref()
    }

    pub fn context_objects(&self) -> &[ObjectRef] {
        &self.context_objects
    }

    /// Key under which the resource registers this fix.
    pub fn context_as_string(&self) -> String {
        let objects: Vec<String> = self.context_objects.iter().map(|o| o.to_string()).collect();
        format!("{}:{}", self.display_string, objects.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    message: String,
    kind: ProblemKind,
    severity: Severity,
    quick_fixes: Vec<QuickFix>,
}

impl Problem {
    pub fn new(message: impl Into<String>, kind: ProblemKind, severity: Severity) -> Self {
        Problem {
            message: message.into(),
            kind,
            severity,
            quick_fixes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, kind: ProblemKind) -> Self {
        Self::new(message, kind, Severity::Error)
    }

    pub fn warning(message: impl Into<String>, kind: ProblemKind) -> Self {
        Self::new(message, kind, Severity::Warning)
    }

    pub fn with_quick_fixes(mut self, quick_fixes: impl IntoIterator<Item = QuickFix>) -> Self {
        self.quick_fixes.extend(quick_fixes);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ProblemKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn quick_fixes(&self) -> &[QuickFix] {
        &self.quick_fixes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextDiagnostic {
    /// Positioned at an element; coordinates come from the location map at query time
    ElementBased { problem: Problem, element: NodeId },
    /// Positioned at fixed coordinates
    PositionBased {
        problem: Problem,
        line: usize,
        column: usize,
        char_start: usize,
        char_end: usize,
    },
}

impl TextDiagnostic {
    pub fn element_based(problem: Problem, element: NodeId) -> Self {
        TextDiagnostic::ElementBased { problem, element }
    }

    pub fn position_based(
        problem: Problem,
        line: usize,
        column: usize,
        char_start: usize,
        char_end: usize,
    ) -> Self {
        TextDiagnostic::PositionBased {
            problem,
            line,
            column,
            char_start,
            char_end,
        }
    }

    pub fn problem(&self) -> &Problem {
        match self {
            TextDiagnostic::ElementBased { problem, .. }
            | TextDiagnostic::PositionBased { problem, .. } => problem,
        }
    }

    pub fn message(&self) -> &str {
        self.problem().message()
    }

    pub fn kind(&self) -> ProblemKind {
        self.problem().kind()
    }

    pub fn severity(&self) -> Severity {
        self.problem().severity()
    }

    pub fn element(&self) -> Option<NodeId> {
        match self {
            TextDiagnostic::ElementBased { element, .. } => Some(*element),
            TextDiagnostic::PositionBased { .. } => None,
        }
    }

    /// Position based diagnostics were caused by no element.
    pub fn was_caused_by(&self, element: NodeId) -> bool {
        self.element() == Some(element)
    }

    pub fn line(&self, locations: &LocationMap) -> usize {
        match self {
            TextDiagnostic::ElementBased { element, .. } => locations.line(*element).unwrap_or(0),
            TextDiagnostic::PositionBased { line, .. } => *line,
        }
    }

    pub fn column(&self, locations: &LocationMap) -> usize {
        match self {
            TextDiagnostic::ElementBased { element, .. } => {
                locations.column(*element).unwrap_or(0)
            }
            TextDiagnostic::PositionBased { column, .. } => *column,
        }
    }

    pub fn char_start(&self, locations: &LocationMap) -> usize {
        match self {
            TextDiagnostic::ElementBased { element, .. } => {
                locations.char_start(*element).unwrap_or(0)
            }
            TextDiagnostic::PositionBased { char_start, .. } => *char_start,
        }
    }

    pub fn char_end(&self, locations: &LocationMap) -> usize {
        match self {
            TextDiagnostic::ElementBased { element, .. } => {
                locations.char_end(*element).unwrap_or(0)
            }
            TextDiagnostic::PositionBased { char_end, .. } => *char_end,
        }
    }

    /// Convert into a position based diagnostic using the coordinates `locations` holds now.
    pub fn freeze(&self, locations: &LocationMap) -> TextDiagnostic {
        TextDiagnostic::position_based(
            self.problem().clone(),
            self.line(locations),
            self.column(locations),
            self.char_start(locations),
            self.char_end(locations),
        )
    }

    pub fn resolve(&self, uri: &Url, locations: &LocationMap) -> DiagnosticRecord {
        DiagnosticRecord {
            message: self.message().to_string(),
            kind: self.kind(),
            severity: self.severity(),
            line: self.line(locations),
            column: self.column(locations),
            char_start: self.char_start(locations),
            char_end: self.char_end(locations),
            location: uri.clone(),
            element: self.element(),
        }
    }
}

/// A diagnostic with its position resolved against a location map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub message: String,
    pub kind: ProblemKind,
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub char_start: usize,
    pub char_end: usize,
    /// URI of the resource the diagnostic belongs to
    pub location: Url,
    pub element: Option<NodeId>,
}

impl Display for DiagnosticRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {} line {}, column {}",
            self.message, self.location, self.line, self.column
        )
    }
}

/// Receiver of persistent problem markers, the headless stand-in for editor markers.
pub trait MarkerSink: Send + Sync {
    fn mark(&self, diagnostic: &DiagnosticRecord);

    /// Remove markers caused by `element`.
    fn unmark_cause(&self, resource: &Url, element: NodeId);

    /// Remove markers of `kind`.
    fn unmark_kind(&self, resource: &Url, kind: ProblemKind);
}

/// Marker operations journaled by resource content and replayed once the content is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOp {
    Mark(TextDiagnostic),
    UnmarkCause(NodeId),
    UnmarkKind(ProblemKind),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    #[test]
    fn element_based_positions_follow_the_location_map() {
        let element = NodeId::from(1);
        let diagnostic = TextDiagnostic::element_based(
            Problem::error("Entry 'X' not found", ProblemKind::UnresolvedReference),
            element,
        );
        let mut map = LocationMap::new();
        assert_eq!(diagnostic.line(&map), 0);
        assert_eq!(diagnostic.char_end(&map), 0);

        map.set_location(element, Location::new(10, 14, 3, 2));
        assert_eq!(diagnostic.line(&map), 3);
        assert_eq!(diagnostic.column(&map), 2);
        assert!(diagnostic.was_caused_by(element));

        let frozen = diagnostic.freeze(&map);
        assert_eq!(frozen.line(&LocationMap::new()), 3);
        assert!(!frozen.was_caused_by(element));
    }

    #[test]
    fn record_display_names_the_resource() {
        let uri = Url::parse("file:///tmp/a.outline").unwrap();
        let diagnostic = TextDiagnostic::position_based(
            Problem::error("Unexpected indentation", ProblemKind::SyntaxError),
            2,
            3,
            7,
            9,
        );
        let record = diagnostic.resolve(&uri, &LocationMap::new());
        assert_eq!(
            record.to_string(),
            "Unexpected indentation at file:///tmp/a.outline line 2, column 3"
        );
        assert_eq!(record.element, None);
    }

    #[test]
    fn quick_fix_context_includes_objects() {
        let fix = QuickFix::new(
            "Create entry 'B'",
            None,
            vec![ObjectRef::Local(NodeId::from(4))],
        );
        assert_eq!(fix.context_as_string(), "Create entry 'B':#4");
        let problem = Problem::warning("w", ProblemKind::Unknown).with_quick_fixes([fix.clone()]);
        assert_eq!(problem.quick_fixes(), &[fix]);
    }
}
