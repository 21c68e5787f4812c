//! Errors reported by type inference.

use thiserror::Error;

/// Failures surfaced while inferring or checking types.
///
/// `RecursiveUnification` is a contract-level failure (the occurs check
/// fired); the `Duplicate*` and `NotDeclaredParamConstraint` variants can
/// only arise from misconfigured type tables. Everything else is an
/// ordinary user-visible type error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("recursive unification")]
    RecursiveUnification,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("type class {0} is not implemented")]
    MissingClass(String),
    #[error("generic parameter requires a prior declaration of constraint {0}")]
    NotDeclaredParamConstraint(String),
    #[error("ambiguous class method: {0}")]
    AmbiguousClassMethod(String),
    #[error("class method is not implemented: {0}")]
    MissingClassMethod(String),
    #[error("identifier redefined in the same scope: {0}")]
    Redefined(String),
    #[error("dangling reference: {0}")]
    Dangling(String),
    #[error("duplicate type definition: {0}")]
    DuplicateTypeDefinition(String),
    #[error("duplicate type class definition: {0}")]
    DuplicateClassDefinition(String),
}
