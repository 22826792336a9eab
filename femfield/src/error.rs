//! Module containing the universal error type
use crate::mesh::{
    AttributeId, ElementId, ElementShape, MAX_XI, NodalValueType, NodeId,
};
use thiserror::Error;

/// Universal error type for `femfield`
#[derive(Error, Debug)]
pub enum Error {
    /// Field is not present in this `Context`
    #[error("field is not present in this `Context`")]
    BadField,

    /// A field with this name is already registered
    #[error("a field named `{0}` already exists")]
    DuplicateName(String),

    /// The field is still an operand of another field
    #[error("field `{0}` is still used as an operand of `{1}`")]
    FieldInUse(String, String),

    /// Rewiring operands would make the field depend on itself
    #[error("rewiring `{0}` would create a dependency cycle")]
    Cycle(String),

    /// Wrong number of operands for this field type
    #[error("{0} fields take {1} operand(s), got {2}")]
    BadOperandCount(&'static str, usize, usize),

    /// Operand has the wrong number of components
    #[error("{0} fields need a {1}-component source, got {2}")]
    BadSourceComponents(&'static str, usize, usize),

    /// Operand component counts do not match each other
    #[error("operand component counts do not match ({0} vs {1})")]
    MismatchedComponents(usize, usize),

    /// A field must have at least one component
    #[error("component count must be at least 1")]
    ZeroComponents,

    /// Element is not present in the mesh
    #[error("element {0} is not present in the mesh")]
    BadElement(ElementId),

    /// Node is not present in the mesh
    #[error("node {0} is not present in the mesh")]
    BadNode(NodeId),

    /// Attribute is not present in the mesh
    #[error("attribute {0} is not present in the mesh")]
    BadAttribute(AttributeId),

    /// Node does not store the requested value
    #[error("node {0} has no {1} value (version {2})")]
    MissingNodalValue(NodeId, NodalValueType, usize),

    /// Node does not store an embedded element location
    #[error("node {0} has no embedded element location")]
    MissingElementXi(NodeId),

    /// Local coordinate length does not match the element dimension
    #[error("xi has {0} values but element {2} has dimension {1}")]
    BadXiLength(usize, usize, ElementId),

    /// Element dimension is larger than we can represent
    #[error("element dimension {0} exceeds the maximum of {MAX_XI}")]
    BadDimension(usize),

    /// Local coordinate does not fit the reference shape
    #[error("xi with {1} values does not fit a {0:?} element")]
    BadShape(ElementShape, usize),

    /// Top-level conversion matrix has the wrong shape
    #[error("conversion into element {0} has a {1}×{2} linear term")]
    BadTopLevelConversion(ElementId, usize, usize),

    /// The field type is not defined at nodes
    #[error("{0} fields cannot be evaluated at nodes")]
    NotDefinedAtNode(&'static str),

    /// The field type is not defined in elements
    #[error("{0} fields cannot be evaluated in elements")]
    NotDefinedInElement(&'static str),

    /// Element is not top-level and has no parent to convert through
    #[error("element {0} has no top-level parent")]
    NoTopLevelElement(ElementId),

    /// Element was never reached when building the texture mapping
    #[error("element {0} is not in the texture mapping")]
    UnmappedElement(ElementId),

    /// Operation requires a texture-coordinate field
    #[error("field is not a texture-coordinate field")]
    NotTextureField,

    /// Too many components to invert through a texture mapping
    #[error("texture inversion supports up to {MAX_XI} components, got {0}")]
    TooManyTextureComponents(usize),

    /// Target value count does not match the field's component count
    #[error("target has {0} values; field has {1} components")]
    BadTargetLength(usize, usize),

    /// Value count does not match the field's component count
    #[error("got {0} values for a {1}-component field")]
    BadValueCount(usize, usize),

    /// Search scope contains no elements
    #[error("search scope is empty")]
    EmptyScope,

    /// Another search currently owns this field's inverse-evaluation cache
    #[error("inverse-evaluation cache is in use by another search")]
    CacheInUse,

    /// Derivatives are not defined for this field type
    #[error("derivatives are not available for {0} fields")]
    DerivativesUnsupported(&'static str),

    /// Values of this field type can't be written back into the mesh
    #[error("{0} fields cannot be set at nodes")]
    SetValuesUnsupported(&'static str),

    /// Could not solve the Newton normal equations
    #[error("could not solve normal equations: matrix is singular")]
    SingularMatrix,

    /// Inverse evaluation exhausted its scope
    #[error("no element in scope produces the requested values")]
    NotFound,

    /// Could not reserve cache storage
    #[error("allocation failed: {0}")]
    AllocationFailure(#[from] std::collections::TryReserveError),
}

/// Coarse classification of an [`Error`]
///
/// Callers that only care about *how* to react to a failure (rather than the
/// precise reason) should match on this.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Shape, arity, or domain mismatch in the caller's request
    InvalidArgument,
    /// The operation is not defined for this field type
    UnsupportedOperation,
    /// Newton normal matrix was not invertible
    Singular,
    /// Inverse evaluation found nothing
    NotFound,
    /// Resource exhaustion
    AllocationFailure,
}

impl Error {
    /// Returns the coarse classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DerivativesUnsupported(..)
            | Error::SetValuesUnsupported(..) => ErrorKind::UnsupportedOperation,
            Error::SingularMatrix => ErrorKind::Singular,
            Error::NotFound => ErrorKind::NotFound,
            Error::AllocationFailure(..) => ErrorKind::AllocationFailure,
            _ => ErrorKind::InvalidArgument,
        }
    }
}
