//! Interface to the finite-element mesh that fields are evaluated over
//!
//! The mesh itself (element shapes, basis functions, adjacency, nodal storage)
//! lives outside this crate.  Fields only see it through the [`Mesh`] trait,
//! which is deliberately narrow: identity lookup, shape and adjacency queries,
//! and reading or writing tabulated attributes.
//!
//! [`GridMesh`](grid::GridMesh) is a small structured implementation, used by
//! the tests and demos.
use crate::Error;
use arrayvec::ArrayVec;
use nalgebra::{DMatrix, DVector};

pub mod grid;

/// Maximum number of local coordinates in an element
pub const MAX_XI: usize = 3;

/// Local (parametric) coordinate within an element
pub type Xi = ArrayVec<f64, MAX_XI>;

/// Builds an [`Xi`] from a slice, returning an error if it's too long
pub fn xi_from_slice(xi: &[f64]) -> Result<Xi, Error> {
    xi.try_into().map_err(|_| Error::BadDimension(xi.len()))
}

macro_rules! define_mesh_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// The wrapped number is the user-facing identifier; it is reported
        /// verbatim by `cmiss_number` fields.
        #[derive(
            Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd,
        )]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw identifier
            pub const fn new(i: u32) -> Self {
                Self(i)
            }
            /// Returns the raw identifier
            pub const fn get(&self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_mesh_id!(ElementId, "Identifier for a mesh element");
define_mesh_id!(NodeId, "Identifier for a mesh node");

/// Handle to a tabulated attribute stored in the mesh
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AttributeId(usize);

impl AttributeId {
    /// Wraps a raw attribute index
    pub const fn new(i: usize) -> Self {
        Self(i)
    }
    /// Returns the raw attribute index
    pub const fn get(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for AttributeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which nodal quantity to read: the value or one of its derivatives with
/// respect to the nodal arc-length directions
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum NodalValueType {
    /// The value itself
    #[default]
    Value,
    /// `d/ds1`
    DS1,
    /// `d/ds2`
    DS2,
    /// `d/ds3`
    DS3,
    /// `d2/ds1ds2`
    DS1DS2,
    /// `d2/ds1ds3`
    DS1DS3,
    /// `d2/ds2ds3`
    DS2DS3,
    /// `d3/ds1ds2ds3`
    DS1DS2DS3,
}

/// Reference shape of an element
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElementShape {
    /// 1D line, `xi` in `[0, 1]`
    Line,
    /// 2D square, `xi` in `[0, 1]²`
    Square,
    /// 3D cube, `xi` in `[0, 1]³`
    Cube,
    /// 2D triangle, `xi0 + xi1 <= 1`
    Triangle,
    /// 3D tetrahedron, `xi0 + xi1 + xi2 <= 1`
    Tetrahedron,
    /// 3D wedge with a triangular cross-section over the two given axes
    Wedge([usize; 2]),
}

impl ElementShape {
    /// Returns the tensor-product (line / square / cube) shape for a dimension
    pub fn from_dimension(dim: usize) -> Option<Self> {
        match dim {
            1 => Some(Self::Line),
            2 => Some(Self::Square),
            3 => Some(Self::Cube),
            _ => None,
        }
    }

    /// Number of local coordinates
    pub fn dimension(&self) -> usize {
        match self {
            Self::Line => 1,
            Self::Square | Self::Triangle => 2,
            Self::Cube | Self::Tetrahedron | Self::Wedge(..) => 3,
        }
    }

    /// Axes which are coupled by a simplex constraint
    fn simplex_axes(&self) -> ArrayVec<usize, MAX_XI> {
        match self {
            Self::Line | Self::Square | Self::Cube => ArrayVec::new(),
            Self::Triangle => [0, 1].into_iter().collect(),
            Self::Tetrahedron => [0, 1, 2].into_iter().collect(),
            Self::Wedge(axes) => axes.iter().cloned().collect(),
        }
    }

    /// Returns the centroid of the reference shape
    pub fn centroid(&self) -> Xi {
        let simplex = self.simplex_axes();
        let s = 1.0 / (simplex.len() as f64 + 1.0);
        (0..self.dimension())
            .map(|i| if simplex.contains(&i) { s } else { 0.5 })
            .collect()
    }

    /// Pulls `xi` back into the reference shape, expanded by `tolerance`
    ///
    /// Simplex excess is removed equally from every coupled axis, then each
    /// axis is clamped to `[-tolerance, 1 + tolerance]`.
    ///
    /// Returns an error if `xi` does not have one value per axis, or if a
    /// wedge names axes that the shape doesn't have.
    pub fn clamp(&self, xi: &mut [f64], tolerance: f64) -> Result<(), Error> {
        let dim = self.dimension();
        let simplex = self.simplex_axes();
        let bad_axes = match self {
            Self::Wedge([a, b]) => a == b,
            _ => false,
        } || simplex.iter().any(|&i| i >= dim);
        if xi.len() != dim || bad_axes {
            return Err(Error::BadShape(*self, xi.len()));
        }
        if !simplex.is_empty() {
            let excess = simplex.iter().map(|&i| xi[i]).sum::<f64>()
                - 1.0
                - tolerance;
            if excess > 0.0 {
                let delta = excess / simplex.len() as f64;
                for &i in &simplex {
                    xi[i] -= delta;
                }
            }
        }
        for x in xi.iter_mut() {
            *x = x.clamp(-tolerance, 1.0 + tolerance);
        }
        Ok(())
    }
}

/// Affine map from a face or line element's `xi` into its top-level parent
///
/// `top_xi = offset + linear * xi`
#[derive(Clone, Debug, PartialEq)]
pub struct TopLevelConversion {
    /// Top-level parent element
    pub element: ElementId,
    /// Constant term, one row per top-level axis
    pub offset: DVector<f64>,
    /// Linear term, `top_dimension × dimension`
    pub linear: DMatrix<f64>,
}

impl TopLevelConversion {
    /// Converts a local coordinate into the top-level element's coordinates
    ///
    /// Returns an error if the parent has more than [`MAX_XI`] axes, or if
    /// `linear` is not `offset.len() × xi.len()`.
    pub fn apply(&self, xi: &[f64]) -> Result<Xi, Error> {
        let rows = self.offset.len();
        if rows > MAX_XI {
            return Err(Error::BadDimension(rows));
        }
        if self.linear.shape() != (rows, xi.len()) {
            return Err(Error::BadTopLevelConversion(
                self.element,
                self.linear.nrows(),
                self.linear.ncols(),
            ));
        }
        Ok((0..rows)
            .map(|j| {
                self.offset[j]
                    + xi.iter()
                        .enumerate()
                        .map(|(k, x)| self.linear[(j, k)] * x)
                        .sum::<f64>()
            })
            .collect())
    }
}

/// Attribute values sampled within an element
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeSample {
    /// One value per attribute component
    pub values: Vec<f64>,
    /// Derivatives with respect to `xi`, `components × dimension`
    pub derivatives: Option<DMatrix<f64>>,
}

/// The mesh collaborator consumed by field evaluation
///
/// Face directions are numbered `2 * axis + side`, where `side` is 0 for the
/// `xi[axis] = 0` face and 1 for the `xi[axis] = 1` face.
pub trait Mesh {
    /// Returns the element's dimension, or `None` if it is not in the mesh
    fn element_dimension(&self, element: ElementId) -> Option<usize>;

    /// Returns the element's reference shape
    ///
    /// The default assumes line / square / cube elements.
    fn element_shape(&self, element: ElementId) -> Option<ElementShape> {
        self.element_dimension(element)
            .and_then(ElementShape::from_dimension)
    }

    /// Checks whether the element is present
    fn contains_element(&self, element: ElementId) -> bool {
        self.element_dimension(element).is_some()
    }

    /// Checks whether the node is present
    fn contains_node(&self, node: NodeId) -> bool;

    /// Every element in the mesh, in a deterministic order
    fn elements(&self) -> Box<dyn Iterator<Item = ElementId> + '_>;

    /// Returns the element on the far side of the given face
    fn adjacent_element(&self, element: ElementId, face: usize)
    -> Option<ElementId>;

    /// Checks whether an element has no parent (i.e. is not a face or line)
    fn is_top_level(&self, element: ElementId) -> bool;

    /// Finds a top-level parent for a face or line element
    ///
    /// `hint` is used if it is a valid parent; otherwise, the first parent is
    /// chosen.
    fn top_level_conversion(
        &self,
        element: ElementId,
        hint: Option<ElementId>,
    ) -> Option<TopLevelConversion>;

    /// Number of components of an attribute, or `None` if it's not present
    fn attribute_components(&self, attribute: AttributeId) -> Option<usize>;

    /// Interpolates an attribute within an element
    fn evaluate_attribute(
        &self,
        attribute: AttributeId,
        element: ElementId,
        xi: &[f64],
        top_level: Option<ElementId>,
        derivatives: bool,
    ) -> Result<AttributeSample, Error>;

    /// Reads a tabulated attribute value at a node
    fn nodal_values(
        &self,
        attribute: AttributeId,
        node: NodeId,
        value_type: NodalValueType,
        version: usize,
    ) -> Result<Vec<f64>, Error>;

    /// Overwrites a tabulated attribute value at a node
    ///
    /// `values` must have one entry per attribute component.
    fn set_nodal_values(
        &mut self,
        attribute: AttributeId,
        node: NodeId,
        value_type: NodalValueType,
        version: usize,
        values: &[f64],
    ) -> Result<(), Error>;

    /// Reads an embedded element location stored at a node
    fn nodal_element_xi(
        &self,
        attribute: AttributeId,
        node: NodeId,
    ) -> Result<(ElementId, Xi), Error>;

    /// Number of live references to the element
    fn element_access_count(&self, element: ElementId) -> usize;

    /// Number of live references to the node
    fn node_access_count(&self, node: NodeId) -> usize;
}
