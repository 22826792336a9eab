//! Field records and their variant configuration
use crate::{
    context::FieldId,
    eval::cache::FieldCache,
    mesh::{AttributeId, NodalValueType},
    solver::cache::FindXiSlot,
    texture::TextureMapping,
};

/// Min / max style combinator applied per component
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum LogicalOp {
    /// `min(a, b)`
    And,
    /// `max(a, b)`
    Or,
    /// `max(a, b) * max(1 - a, 1 - b)`
    Xor,
}

/// Conversion from an RGB triple into another colour space
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum ColorConversion {
    /// CIE XYZ; affine, so derivatives are available
    RgbToXyz,
    /// Hue, saturation, lightness (in that order)
    RgbToHsl,
    /// CIE L*a*b*
    RgbToLab,
    /// Luma, replicated into every output component
    RgbToGrayscale,
}

/// Family of coordinate system a field's values are expressed in
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum CoordinateSystemType {
    /// `(x, y, z)`
    #[default]
    RectangularCartesian,
    /// `(r, θ, z)`
    CylindricalPolar,
    /// `(r, θ, φ)`
    SphericalPolar,
    /// `(λ, μ, θ)` about a focus on the x axis
    ProlateSpheroidal,
    /// `(λ, μ, θ)` about a focal ring
    OblateSpheroidal,
}

/// Coordinate system, including the focus for the spheroidal types
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CoordinateSystem {
    /// Which coordinate system the values are expressed in
    pub kind: CoordinateSystemType,
    /// Focal distance, used only by the spheroidal types
    pub focus: f64,
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        Self {
            kind: CoordinateSystemType::RectangularCartesian,
            focus: 1.0,
        }
    }
}

impl CoordinateSystem {
    /// Builds a coordinate system with a unit focus
    pub fn new(kind: CoordinateSystemType) -> Self {
        Self { kind, focus: 1.0 }
    }

    /// Builds a coordinate system with the given focus
    pub fn with_focus(kind: CoordinateSystemType, focus: f64) -> Self {
        Self { kind, focus }
    }
}

/// Variant-specific behaviour of a [`Field`]
#[derive(Clone, Debug)]
pub enum FieldKind {
    /// Per-component min / max combinator of two operands
    Logical(LogicalOp),
    /// Converts the operand's coordinates into rectangular Cartesian
    CoordinateConvert,
    /// Interpolates a mesh attribute
    FiniteElement {
        /// Mesh attribute being interpolated
        attribute: AttributeId,
    },
    /// Reads one tabulated nodal quantity of a mesh attribute
    NodeValue {
        /// Mesh attribute being read
        attribute: AttributeId,
        /// Which nodal value or derivative to read
        value_type: NodalValueType,
        /// Zero-based version of the nodal value
        version: usize,
    },
    /// Identifier number of the current node or element
    CmissNumber,
    /// Mesh reference count of the current node or element
    AccessCount,
    /// The local coordinate itself
    XiCoordinates,
    /// Evaluates the operand at an element location stored on a node
    Embedded {
        /// Node attribute holding the element location
        attribute: AttributeId,
    },
    /// Colour-space conversion of a 3-component operand
    Color(ColorConversion),
    /// Continuous parametrization unrolled across element faces
    TextureCoordinates(TextureMapping),
}

impl FieldKind {
    /// Name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Logical(LogicalOp::And) => "and",
            FieldKind::Logical(LogicalOp::Or) => "or",
            FieldKind::Logical(LogicalOp::Xor) => "xor",
            FieldKind::CoordinateConvert => "coordinate_transformation",
            FieldKind::FiniteElement { .. } => "finite_element",
            FieldKind::NodeValue { .. } => "node_value",
            FieldKind::CmissNumber => "cmiss_number",
            FieldKind::AccessCount => "access_count",
            FieldKind::XiCoordinates => "xi_coordinates",
            FieldKind::Embedded { .. } => "embedded",
            FieldKind::Color(ColorConversion::RgbToXyz) => "rgb_to_xyz",
            FieldKind::Color(ColorConversion::RgbToHsl) => "rgb_to_hsl",
            FieldKind::Color(ColorConversion::RgbToLab) => "rgb_to_lab",
            FieldKind::Color(ColorConversion::RgbToGrayscale) => {
                "rgb_to_grayscale"
            }
            FieldKind::TextureCoordinates(..) => "xi_texture_coordinates",
        }
    }

    /// Checks whether the field can be evaluated at a node
    pub fn defined_at_node(&self) -> bool {
        !matches!(
            self,
            FieldKind::XiCoordinates | FieldKind::TextureCoordinates(..)
        )
    }

    /// Checks whether the field can be evaluated inside an element
    pub fn defined_in_element(&self) -> bool {
        !matches!(self, FieldKind::NodeValue { .. } | FieldKind::Embedded { .. })
    }

    /// Checks whether the field can produce derivatives with respect to `xi`
    pub fn has_derivatives(&self) -> bool {
        !matches!(
            self,
            FieldKind::Logical(..)
                | FieldKind::Color(
                    ColorConversion::RgbToHsl
                        | ColorConversion::RgbToLab
                        | ColorConversion::RgbToGrayscale
                )
        )
    }

    /// Returns the mesh attribute this field reads, if any
    pub fn attribute(&self) -> Option<AttributeId> {
        match self {
            FieldKind::FiniteElement { attribute }
            | FieldKind::NodeValue { attribute, .. }
            | FieldKind::Embedded { attribute } => Some(*attribute),
            _ => None,
        }
    }
}

/// A named node in the field graph
#[derive(Debug)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) components: usize,
    pub(crate) kind: FieldKind,
    pub(crate) operands: Vec<FieldId>,
    pub(crate) coordinate_system: CoordinateSystem,
    pub(crate) cache: FieldCache,
    pub(crate) find_xi: FindXiSlot,
}

impl Field {
    pub(crate) fn new(
        name: &str,
        components: usize,
        kind: FieldKind,
        operands: Vec<FieldId>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            components,
            kind,
            operands,
            coordinate_system: CoordinateSystem::default(),
            cache: FieldCache::default(),
            find_xi: FindXiSlot::default(),
        }
    }

    /// Unique name of this field
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values produced per evaluation
    pub fn components(&self) -> usize {
        self.components
    }

    /// Variant and its configuration
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Source fields, in order
    pub fn operands(&self) -> &[FieldId] {
        &self.operands
    }

    /// Coordinate system the field's values are expressed in
    pub fn coordinate_system(&self) -> CoordinateSystem {
        self.coordinate_system
    }

    /// Clears the evaluation cache and any inverse-evaluation result
    pub(crate) fn clear_caches(&mut self) {
        self.cache.clear();
        self.find_xi.invalidate(&self.name);
    }
}
