//! Evaluation of fields at mesh locations
//!
//! [`Context::evaluate`] is the single entry point: it checks the field's
//! cache, recursively evaluates operands at the same location, then applies
//! the variant's formula and stores the result.
pub(crate) mod cache;
mod color;
mod coord;
mod element;
mod logical;

pub use cache::CacheState;

use crate::{
    Error,
    context::{Context, FieldId, FieldKind},
    mesh::{ElementId, Mesh, NodalValueType, NodeId, Xi, xi_from_slice},
};
use log::trace;
use nalgebra::DMatrix;

/// Where a field is evaluated
#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    /// At a mesh node
    Node(NodeId),
    /// At a local coordinate within an element
    Element {
        /// Element being evaluated
        element: ElementId,
        /// Local coordinate, one value per element dimension
        xi: Xi,
        /// Preferred top-level parent, used to make face evaluation (and its
        /// derivatives) consistent with a particular neighbouring element
        top_level: Option<ElementId>,
    },
}

impl Location {
    /// Builds a node location
    pub fn node(node: NodeId) -> Self {
        Location::Node(node)
    }

    /// Builds an element location, without a top-level hint
    pub fn element(element: ElementId, xi: &[f64]) -> Result<Self, Error> {
        Ok(Location::Element {
            element,
            xi: xi_from_slice(xi)?,
            top_level: None,
        })
    }

    /// Attaches a top-level hint to an element location
    ///
    /// This has no effect on node locations.
    pub fn with_top_level(self, top: ElementId) -> Self {
        match self {
            Location::Element { element, xi, .. } => Location::Element {
                element,
                xi,
                top_level: Some(top),
            },
            n => n,
        }
    }

    /// Number of local coordinates (0 at a node)
    pub fn dimension(&self) -> usize {
        match self {
            Location::Node(..) => 0,
            Location::Element { xi, .. } => xi.len(),
        }
    }

    /// Checks that the location exists in the mesh
    fn check(&self, mesh: &dyn Mesh) -> Result<(), Error> {
        match self {
            Location::Node(n) if !mesh.contains_node(*n) => {
                Err(Error::BadNode(*n))
            }
            Location::Node(..) => Ok(()),
            Location::Element { element, xi, .. } => {
                let dim = mesh
                    .element_dimension(*element)
                    .ok_or(Error::BadElement(*element))?;
                if dim != xi.len() {
                    Err(Error::BadXiLength(xi.len(), dim, *element))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Result of evaluating a field
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// One value per component
    pub values: Vec<f64>,
    /// Derivatives with respect to `xi` (`components × dimension`), if
    /// requested within an element
    pub derivatives: Option<DMatrix<f64>>,
}

impl Evaluation {
    /// Builds an evaluation without derivatives
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            values,
            derivatives: None,
        }
    }
}

impl Context {
    /// Evaluates a field at the given location
    ///
    /// `derivatives` is ignored at nodes.  If the field's cache already holds
    /// a result for this location, it's returned without recomputation;
    /// otherwise, operands are evaluated (and cached) first.  On failure, the
    /// field's previous cache is left untouched.
    ///
    /// ```
    /// # use femfield::{context::Context, eval::Location, mesh::{grid::GridMesh, Mesh}};
    /// let mesh = GridMesh::new(&[2, 2])?;
    /// let mut ctx = Context::new();
    /// let xi = ctx.xi_coordinates("xi", 3)?;
    /// let e = mesh.element(&[0, 1]).unwrap();
    /// let out = ctx.evaluate(&mesh, xi, &Location::element(e, &[0.25, 0.5])?, true)?;
    /// assert_eq!(out.values, vec![0.25, 0.5, 0.0]);
    /// assert_eq!(out.derivatives.unwrap().shape(), (3, 2));
    /// # Ok::<(), femfield::Error>(())
    /// ```
    pub fn evaluate(
        &mut self,
        mesh: &dyn Mesh,
        id: FieldId,
        location: &Location,
        derivatives: bool,
    ) -> Result<Evaluation, Error> {
        let derivatives =
            derivatives && matches!(location, Location::Element { .. });
        if let Some(hit) = self.get(id)?.cache.lookup(location, derivatives) {
            return Ok(hit);
        }
        location.check(mesh)?;
        let out = self.evaluate_uncached(mesh, id, location, derivatives)?;
        self.get_mut(id)?.cache.store(location, &out)?;
        Ok(out)
    }

    /// Returns what a field's evaluation cache currently holds
    pub fn cache_state(&self, id: FieldId) -> Result<CacheState, Error> {
        self.get(id).map(|f| f.cache.state())
    }

    /// Checks whether a field can be evaluated at the given location
    ///
    /// Nothing is evaluated or cached.  The location must exist in the mesh,
    /// every field in the operand graph must be defined there, and the mesh
    /// must store the nodal values that the graph reads.  Operands of an
    /// embedded field are checked at the element location stored on the
    /// node.
    pub fn is_defined(
        &self,
        mesh: &dyn Mesh,
        id: FieldId,
        location: &Location,
    ) -> Result<bool, Error> {
        let field = self.get(id)?;
        if location.check(mesh).is_err() {
            return Ok(false);
        }
        let kind = &field.kind;
        let mut at = location.clone();
        let here = match (kind, location) {
            (_, Location::Node(..)) if !kind.defined_at_node() => false,
            (_, Location::Element { .. }) if !kind.defined_in_element() => {
                false
            }
            (FieldKind::FiniteElement { attribute }, Location::Node(n)) => mesh
                .nodal_values(*attribute, *n, NodalValueType::Value, 0)
                .is_ok(),
            (FieldKind::FiniteElement { attribute }, Location::Element { .. }) => {
                mesh.attribute_components(*attribute).is_some()
            }
            (
                FieldKind::NodeValue {
                    attribute,
                    value_type,
                    version,
                },
                Location::Node(n),
            ) => mesh
                .nodal_values(*attribute, *n, *value_type, *version)
                .is_ok(),
            (FieldKind::Embedded { attribute }, Location::Node(n)) => {
                match mesh.nodal_element_xi(*attribute, *n) {
                    Ok((element, xi)) => {
                        at = Location::Element {
                            element,
                            xi,
                            top_level: None,
                        };
                        true
                    }
                    Err(..) => false,
                }
            }
            (
                FieldKind::TextureCoordinates(mapping),
                Location::Element {
                    element, top_level, ..
                },
            ) => mapping.covers(mesh, *element, *top_level),
            _ => true,
        };
        if !here {
            return Ok(false);
        }
        for o in field.operands() {
            if !self.is_defined(mesh, *o, &at)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_uncached(
        &mut self,
        mesh: &dyn Mesh,
        id: FieldId,
        location: &Location,
        derivatives: bool,
    ) -> Result<Evaluation, Error> {
        let field = self.get(id)?;
        let name = field.kind.type_name();
        match location {
            Location::Node(..) if !field.kind.defined_at_node() => {
                return Err(Error::NotDefinedAtNode(name));
            }
            Location::Element { .. } if !field.kind.defined_in_element() => {
                return Err(Error::NotDefinedInElement(name));
            }
            _ => (),
        }
        if derivatives && !field.kind.has_derivatives() {
            return Err(Error::DerivativesUnsupported(name));
        }
        trace!("evaluating `{}` ({name}) at {location:?}", field.name());

        let operands = field.operands().to_vec();
        let embedded = match field.kind {
            FieldKind::Embedded { attribute } => Some(attribute),
            _ => None,
        };
        let sources = match (embedded, location) {
            (Some(attribute), Location::Node(node)) => {
                let (element, xi) = mesh.nodal_element_xi(attribute, *node)?;
                let inner = Location::Element {
                    element,
                    xi,
                    top_level: None,
                };
                vec![self.evaluate(mesh, operands[0], &inner, false)?]
            }
            _ => operands
                .iter()
                .map(|o| self.evaluate(mesh, *o, location, derivatives))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let field = self.get(id)?;
        let out = match &field.kind {
            FieldKind::Logical(op) => {
                logical::evaluate(*op, &sources[0], &sources[1])
            }
            FieldKind::CoordinateConvert => {
                let system = self.get(operands[0])?.coordinate_system();
                coord::to_rectangular_cartesian(system, &sources[0])
            }
            FieldKind::FiniteElement { attribute } => {
                element::finite_element(mesh, *attribute, location, derivatives)?
            }
            FieldKind::NodeValue {
                attribute,
                value_type,
                version,
            } => {
                let Location::Node(node) = location else {
                    return Err(Error::NotDefinedInElement(name));
                };
                element::node_value(mesh, *attribute, *value_type, *version, *node)?
            }
            FieldKind::CmissNumber => element::cmiss_number(location, derivatives),
            FieldKind::AccessCount => {
                element::access_count(mesh, location, derivatives)
            }
            FieldKind::XiCoordinates => {
                element::xi_coordinates(field.components(), location, derivatives)?
            }
            FieldKind::Embedded { .. } => {
                Evaluation::from_values(sources[0].values.clone())
            }
            FieldKind::Color(conversion) => {
                color::convert(*conversion, field.components(), &sources[0])
            }
            FieldKind::TextureCoordinates(mapping) => {
                mapping.evaluate(mesh, location, derivatives)?
            }
        };
        Ok(out)
    }
}
