use thiserror::Error;

/// Top-level error type returned by the fieldkit engine facade.
#[derive(Debug, Error)]
pub enum FieldError {
    /// A definition mutation violated a registry rule.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A single value failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// One or more values of a bulk update failed validation; nothing was written.
    #[error(transparent)]
    BulkValidation(#[from] BulkValidationError),

    /// A read-time computation failed and the caller asked for the error instead of a degraded value.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Target entity, template or saved filter was not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Unique constraint violation - the value already exists on another entity.
    #[error("unique constraint violation: field '{field}' already holds this value on entity '{existing_entity_id}'")]
    UniqueViolation { field: String, existing_entity_id: String },

    /// Invalid input supplied to a facade operation.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl FieldError {
    pub fn code(&self) -> &'static str {
        match self {
            FieldError::Definition(err) => err.code(),
            FieldError::Validation(err) => err.code(),
            FieldError::BulkValidation(_) => "validation.bulk",
            FieldError::Evaluation(_) => "evaluation.failed",
            FieldError::NotFound { .. } => "not_found",
            FieldError::UniqueViolation { .. } => "validation.unique",
            FieldError::InvalidRequest { .. } => "invalid_request",
        }
    }
}

/// Errors raised while creating or mutating field definitions. Always fatal to the operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("field not found: {id}")]
    FieldNotFound { id: String },

    #[error("unknown field type: {name}")]
    UnknownFieldType { name: String },

    #[error("invalid field name: {message}")]
    InvalidName { message: String },

    #[error("a field named '{name}' already exists for entity type {entity_type}")]
    DuplicateName { name: String, entity_type: String },

    #[error("invalid configuration for field '{field}': {message}")]
    InvalidConfiguration { field: String, message: String },

    #[error("field type of '{field}' cannot change from {from} to {to}")]
    ImmutableFieldType { field: String, from: String, to: String },

    #[error("change to '{field}' would invalidate {conflicts} stored value(s), e.g. {example}")]
    UnsafeNarrowing {
        field: String,
        conflicts: usize,
        example: String,
    },

    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("lookup '{field}' cannot target '{target}': lookups may only follow a single hop")]
    InvalidLookupDepth { field: String, target: String },

    #[error("default value for '{field}' is invalid: {source}")]
    InvalidDefaultValue {
        field: String,
        #[source]
        source: ValidationError,
    },

    #[error("system field '{field}' cannot be {action}")]
    SystemField { field: String, action: &'static str },
}

impl DefinitionError {
    /// Stable machine-readable code for the violated rule.
    pub fn code(&self) -> &'static str {
        match self {
            DefinitionError::FieldNotFound { .. } => "definition.not_found",
            DefinitionError::UnknownFieldType { .. } => "definition.unknown_type",
            DefinitionError::InvalidName { .. } => "definition.invalid_name",
            DefinitionError::DuplicateName { .. } => "definition.duplicate_name",
            DefinitionError::InvalidConfiguration { .. } => "definition.invalid_configuration",
            DefinitionError::ImmutableFieldType { .. } => "definition.immutable_type",
            DefinitionError::UnsafeNarrowing { .. } => "definition.unsafe_narrowing",
            DefinitionError::CircularDependency { .. } => "definition.circular_dependency",
            DefinitionError::InvalidLookupDepth { .. } => "definition.lookup_depth",
            DefinitionError::InvalidDefaultValue { .. } => "definition.invalid_default",
            DefinitionError::SystemField { .. } => "definition.system_field",
        }
    }

    pub(crate) fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        DefinitionError::InvalidConfiguration {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A value failed the type-specific or rule-based checks of its field definition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("'{field}' expects {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("'{field}' is required")]
    Required { field: String },

    #[error("'{field}' is computed and cannot be set directly")]
    ComputedFieldNotSettable { field: String },

    #[error("'{field}' must be at least {min} characters")]
    TooShort { field: String, min: usize },

    #[error("'{field}' must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("'{field}' must be at least {min}")]
    BelowMinimum { field: String, min: String },

    #[error("'{field}' must be at most {max}")]
    AboveMaximum { field: String, max: String },

    #[error("'{field}' does not match pattern {pattern}")]
    PatternMismatch { field: String, pattern: String },

    #[error("'{field}' must be a valid {format}")]
    InvalidFormat { field: String, format: &'static str },

    #[error("'{value}' is not an option of '{field}'")]
    InvalidOption { field: String, value: String },

    #[error("'{field}' needs at least {min} selection(s)")]
    TooFewSelections { field: String, min: usize },

    #[error("'{field}' allows at most {max} selection(s)")]
    TooManySelections { field: String, max: usize },

    #[error("'{field}' does not accept .{extension} files")]
    FileExtension { field: String, extension: String },

    #[error("'{field}' accepts files up to {max} bytes")]
    FileTooLarge { field: String, max: u64 },

    #[error("'{field}' failed custom validation '{hook}': {message}")]
    Custom {
        field: String,
        hook: String,
        message: String,
    },
}

impl ValidationError {
    /// Stable machine-readable code for the violated rule.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::TypeMismatch { .. } => "validation.invalid_type",
            ValidationError::Required { .. } => "validation.required",
            ValidationError::ComputedFieldNotSettable { .. } => "validation.computed",
            ValidationError::TooShort { .. } | ValidationError::TooLong { .. } => "validation.length",
            ValidationError::BelowMinimum { .. } | ValidationError::AboveMaximum { .. } => "validation.range",
            ValidationError::PatternMismatch { .. } => "validation.regex",
            ValidationError::InvalidFormat { .. } => "validation.format",
            ValidationError::InvalidOption { .. } => "validation.option",
            ValidationError::TooFewSelections { .. } | ValidationError::TooManySelections { .. } => {
                "validation.selections"
            }
            ValidationError::FileExtension { .. } | ValidationError::FileTooLarge { .. } => "validation.file",
            ValidationError::Custom { .. } => "validation.custom",
        }
    }

    /// Name of the field the error refers to.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::TypeMismatch { field, .. }
            | ValidationError::Required { field }
            | ValidationError::ComputedFieldNotSettable { field }
            | ValidationError::TooShort { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::BelowMinimum { field, .. }
            | ValidationError::AboveMaximum { field, .. }
            | ValidationError::PatternMismatch { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::InvalidOption { field, .. }
            | ValidationError::TooFewSelections { field, .. }
            | ValidationError::TooManySelections { field, .. }
            | ValidationError::FileExtension { field, .. }
            | ValidationError::FileTooLarge { field, .. }
            | ValidationError::Custom { field, .. } => field,
        }
    }
}

/// Collection of validation issues encountered while preparing a bulk update.
#[derive(Debug, Clone, Error)]
#[error("bulk update rejected: {}", summarize(issues))]
pub struct BulkValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BulkValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Detailed validation failure for a single field of a bulk update.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ValidationError> for ValidationIssue {
    fn from(error: &ValidationError) -> Self {
        ValidationIssue::new(error.field(), error.code(), error.to_string())
    }
}

/// Formula computation failures. Degrade to an unavailable value at read time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("formula syntax error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("formula references unknown field '{reference}'")]
    UnknownReference { reference: String },

    #[error("formula dependency '{field_id}' is archived or deleted")]
    MissingDependency { field_id: String },

    #[error("formula dependency '{field_id}' is unavailable")]
    UpstreamUnavailable { field_id: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown function {name}()")]
    UnknownFunction { name: String },

    #[error("{name}() expects {expected} argument(s)")]
    Arity { name: String, expected: &'static str },
}

/// Lookup resolution failures. Degrade to an unavailable value at read time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("broken reference: {message}")]
    BrokenReference { message: String },

    #[error("lookup '{field}' exceeded the single-hop resolution depth")]
    DepthExceeded { field: String },

    #[error("lookup target '{field}' could not be computed: {source}")]
    TargetUnavailable {
        field: String,
        #[source]
        source: FormulaError,
    },
}

/// Read-time evaluation failures (formula, lookup, filter).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("operator {operator} is not supported for {field_type} field '{field_id}'")]
    UnsupportedOperator {
        field_id: String,
        field_type: String,
        operator: String,
    },

    #[error("filter references unknown field '{field_id}'")]
    UnknownField { field_id: String },

    #[error("invalid filter value for '{field_id}': {message}")]
    InvalidFilterValue { field_id: String, message: String },
}

pub type FieldResult<T> = Result<T, FieldError>;

pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Convenience alias used by the validator.
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_are_namespaced() {
        let err = ValidationError::InvalidOption {
            field: "Severity".into(),
            value: "Critical".into(),
        };
        assert_eq!(err.code(), "validation.option");
        assert_eq!(err.field(), "Severity");
        assert_eq!(err.to_string(), "'Critical' is not an option of 'Severity'");
    }

    #[test]
    fn circular_dependency_lists_path() {
        let err = DefinitionError::CircularDependency {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "circular dependency: A -> B -> A");
        assert_eq!(err.code(), "definition.circular_dependency");
    }

    #[test]
    fn bulk_error_summarizes_issues() {
        let required = ValidationError::Required { field: "Owner".into() };
        let err = BulkValidationError::new([ValidationIssue::from(&required)]);
        assert!(!err.is_empty());
        assert_eq!(err.issues[0].code, "validation.required");
        assert!(err.to_string().contains("Owner"));
    }
}
