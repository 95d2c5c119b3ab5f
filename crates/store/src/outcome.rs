//! Structured validation and operation outcomes.
//!
//! An [`OperationOutcome`] is an ordered list of [`Issue`]s. An empty outcome
//! means the operation found nothing worth reporting.

use serde_json::Value;

/// Issue severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IssueSeverity {
    /// Fatal error - processing cannot continue.
    Fatal,
    /// Error - processing has failed.
    Error,
    /// Warning - processing succeeded but with concerns.
    Warning,
    /// Information - informational message.
    Information,
}

impl IssueSeverity {
    /// Returns the FHIR string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Fatal => "fatal",
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Information => "information",
        }
    }

    /// Returns true for fatal and error severities.
    pub fn is_error(&self) -> bool {
        matches!(self, IssueSeverity::Fatal | IssueSeverity::Error)
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueType {
    /// Invalid content.
    Invalid,
    /// Structural issue.
    Structure,
    /// Required element missing.
    Required,
    /// Value out of range or not allowed.
    Value,
    /// Code not valid in its value set.
    CodeInvalid,
    /// Resource not found.
    NotFound,
    /// Conflict with existing state.
    Conflict,
    /// Not supported.
    NotSupported,
    /// Processing error.
    Processing,
    /// Informational message.
    Informational,
}

impl IssueType {
    /// Returns the FHIR code string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Invalid => "invalid",
            IssueType::Structure => "structure",
            IssueType::Required => "required",
            IssueType::Value => "value",
            IssueType::CodeInvalid => "code-invalid",
            IssueType::NotFound => "not-found",
            IssueType::Conflict => "conflict",
            IssueType::NotSupported => "not-supported",
            IssueType::Processing => "processing",
            IssueType::Informational => "informational",
        }
    }
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// The severity of the issue.
    pub severity: IssueSeverity,
    /// The type/code of the issue.
    pub code: IssueType,
    /// Human-readable description.
    pub details: String,
    /// Location of the issue within the resource.
    pub expression: Option<String>,
}

impl Issue {
    /// Creates a new issue.
    pub fn new(severity: IssueSeverity, code: IssueType, details: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            details: details.into(),
            expression: None,
        }
    }

    /// Creates an error issue.
    pub fn error(code: IssueType, details: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, details)
    }

    /// Creates a warning issue.
    pub fn warning(code: IssueType, details: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, code, details)
    }

    /// Creates an information issue.
    pub fn information(code: IssueType, details: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, code, details)
    }

    /// Sets the expression (location).
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Converts to FHIR JSON.
    pub fn to_json(&self) -> Value {
        let mut issue = serde_json::json!({
            "severity": self.severity.as_str(),
            "code": self.code.as_str(),
            "details": {
                "text": self.details
            }
        });

        if let Some(expr) = &self.expression {
            issue["expression"] = serde_json::json!([expr]);
        }

        issue
    }
}

/// An ordered sequence of findings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOutcome {
    issues: Vec<Issue>,
}

impl OperationOutcome {
    /// Creates an empty outcome.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an outcome holding a single informational message.
    pub fn information(details: impl Into<String>) -> Self {
        Self::new().with_issue(Issue::information(IssueType::Informational, details))
    }

    /// Adds an issue.
    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Appends an issue in place.
    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Appends every issue of another outcome.
    pub fn extend(&mut self, other: OperationOutcome) {
        self.issues.extend(other.issues);
    }

    /// Returns the issues in the order they were found.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Returns true if there are no findings at all.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns true if any finding has error or fatal severity.
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_error())
    }

    /// Returns the findings with error or fatal severity.
    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity.is_error())
    }

    /// Returns true if any finding's details contain the given text.
    pub fn contains_text(&self, text: &str) -> bool {
        self.issues.iter().any(|i| i.details.contains(text))
    }

    /// Joins the details of every finding into one line.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.severity, i.details))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Builds the OperationOutcome resource.
    pub fn to_json(&self) -> Value {
        let issues: Vec<Value> = self.issues.iter().map(Issue::to_json).collect();

        serde_json::json!({
            "resourceType": "OperationOutcome",
            "issue": issues
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_to_json() {
        let issue = Issue::error(IssueType::Required, "missing subject").with_expression(".subject");
        let json = issue.to_json();

        assert_eq!(json["severity"], "error");
        assert_eq!(json["code"], "required");
        assert_eq!(json["details"]["text"], "missing subject");
        assert_eq!(json["expression"][0], ".subject");
    }

    #[test]
    fn test_outcome_errors_and_summary() {
        let mut outcome = OperationOutcome::information("Ok to delete");
        assert!(!outcome.has_errors());

        outcome.push(Issue::warning(IssueType::NotFound, "unknown value set"));
        assert!(!outcome.has_errors());

        outcome.push(Issue::error(IssueType::Structure, "too many"));
        assert!(outcome.has_errors());
        assert_eq!(outcome.errors().count(), 1);
        assert_eq!(
            outcome.summary(),
            "information: Ok to delete; warning: unknown value set; error: too many"
        );
    }

    #[test]
    fn test_outcome_to_json() {
        let outcome = OperationOutcome::information("Ok to delete");
        let json = outcome.to_json();

        assert_eq!(json["resourceType"], "OperationOutcome");
        assert_eq!(json["issue"][0]["severity"], "information");
        assert!(json.to_string().contains("Ok to delete"));
    }
}
