//! Registry of fields, stored as a graph of operands
//!
//! A [`Context`] owns every [`Field`] and hands out [`FieldId`] handles.
//! Operands must exist before the field that uses them, so insertion order
//! is always a topological order; rewiring operands afterwards goes through
//! an explicit cycle check.
mod field;
pub(crate) mod indexed;

pub use field::{
    ColorConversion, CoordinateSystem, CoordinateSystemType, Field, FieldKind,
    LogicalOp,
};
use indexed::{IndexVec, define_index};

use crate::{
    Error,
    mesh::{AttributeId, ElementId, Mesh, NodalValueType, NodeId},
    texture::TextureMapping,
};
use log::debug;
use std::collections::{BTreeSet, HashMap};

define_index!(FieldId, "An index in the `Context::fields` arena");

/// A `Context` holds a set of named fields and their operand graph.
///
/// It is also the owner of every field's evaluation cache, so evaluation
/// (see [`Context::evaluate`]) takes `&mut self`.
#[derive(Debug, Default)]
pub struct Context {
    fields: IndexVec<Option<Field>, FieldId>,
    names: HashMap<String, FieldId>,
}

impl Context {
    /// Build a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live fields in the context
    ///
    /// ```
    /// # use femfield::context::Context;
    /// let mut ctx = Context::new();
    /// assert!(ctx.is_empty());
    /// ctx.cmiss_number("n").unwrap();
    /// assert_eq!(ctx.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Checks whether the context is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Looks up a field by name
    pub fn lookup(&self, name: &str) -> Option<FieldId> {
        self.names.get(name).cloned()
    }

    /// Looks up a field by handle
    pub fn get(&self, id: FieldId) -> Result<&Field, Error> {
        self.fields
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(Error::BadField)
    }

    pub(crate) fn get_mut(&mut self, id: FieldId) -> Result<&mut Field, Error> {
        self.fields
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(Error::BadField)
    }

    /// Returns the name of a field
    pub fn name(&self, id: FieldId) -> Result<&str, Error> {
        self.get(id).map(Field::name)
    }

    /// Returns the number of components of a field
    pub fn components(&self, id: FieldId) -> Result<usize, Error> {
        self.get(id).map(Field::components)
    }

    /// Returns the operands of a field
    pub fn operands(&self, id: FieldId) -> Result<&[FieldId], Error> {
        self.get(id).map(Field::operands)
    }

    /// Returns every field which uses `id` directly as an operand
    pub fn dependents(&self, id: FieldId) -> Result<Vec<FieldId>, Error> {
        self.get(id)?;
        Ok(self
            .iter()
            .filter(|(_, f)| f.operands.contains(&id))
            .map(|(i, _)| i)
            .collect())
    }

    /// Iterates over live fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &Field)> {
        self.fields
            .iter()
            .filter_map(|(i, f)| f.as_ref().map(|f| (i, f)))
    }

    ////////////////////////////////////////////////////////////////////////////
    // Graph construction

    /// Checks operand count and shapes for a field kind, returning the
    /// resulting component count (0 for leaf kinds)
    fn check_operands(
        &self,
        kind: &FieldKind,
        operands: &[FieldId],
    ) -> Result<usize, Error> {
        let arity = match kind {
            FieldKind::Logical(..) => 2,
            FieldKind::CoordinateConvert
            | FieldKind::Embedded { .. }
            | FieldKind::Color(..) => 1,
            _ => 0,
        };
        if operands.len() != arity {
            return Err(Error::BadOperandCount(
                kind.type_name(),
                arity,
                operands.len(),
            ));
        }
        let c = operands
            .iter()
            .map(|o| self.components(*o))
            .collect::<Result<Vec<_>, _>>()?;
        match kind {
            FieldKind::Logical(..) if c[0] != c[1] => {
                Err(Error::MismatchedComponents(c[0], c[1]))
            }
            FieldKind::Logical(..) | FieldKind::Embedded { .. } => Ok(c[0]),
            FieldKind::CoordinateConvert if !(1..=3).contains(&c[0]) => {
                Err(Error::BadSourceComponents(kind.type_name(), 3, c[0]))
            }
            FieldKind::Color(..) if c[0] != 3 => {
                Err(Error::BadSourceComponents(kind.type_name(), 3, c[0]))
            }
            FieldKind::CoordinateConvert | FieldKind::Color(..) => Ok(3),
            _ => Ok(0),
        }
    }

    /// Registers a new field, returning its handle
    fn insert(
        &mut self,
        name: &str,
        components: usize,
        kind: FieldKind,
        operands: Vec<FieldId>,
    ) -> Result<FieldId, Error> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        if components == 0 {
            return Err(Error::ZeroComponents);
        }
        let id = self
            .fields
            .push(Some(Field::new(name, components, kind, operands)));
        self.names.insert(name.to_owned(), id);
        Ok(id)
    }

    fn op_with_operands(
        &mut self,
        name: &str,
        kind: FieldKind,
        operands: Vec<FieldId>,
    ) -> Result<FieldId, Error> {
        let components = self.check_operands(&kind, &operands)?;
        self.insert(name, components, kind, operands)
    }

    fn op_logical(
        &mut self,
        name: &str,
        op: LogicalOp,
        a: FieldId,
        b: FieldId,
    ) -> Result<FieldId, Error> {
        self.op_with_operands(name, FieldKind::Logical(op), vec![a, b])
    }

    /// Builds a field computing `min(a, b)` per component
    ///
    /// ```
    /// # use femfield::{context::Context, eval::Location, mesh::{grid::GridMesh, Mesh}};
    /// let mut mesh = GridMesh::new(&[1])?;
    /// let attr = mesh.add_attribute_with("x", 1, |p| vec![p[0]]);
    /// let mut ctx = Context::new();
    /// let x = ctx.finite_element("x", &mesh, attr)?;
    /// let xi = ctx.xi_coordinates("xi", 1)?;
    /// let m = ctx.and("min", x, xi)?;
    /// let e = mesh.element(&[0]).unwrap();
    /// let out = ctx.evaluate(&mesh, m, &Location::element(e, &[0.25])?, false)?;
    /// assert_eq!(out.values, vec![0.25]);
    /// # Ok::<(), femfield::Error>(())
    /// ```
    pub fn and(
        &mut self,
        name: &str,
        a: FieldId,
        b: FieldId,
    ) -> Result<FieldId, Error> {
        self.op_logical(name, LogicalOp::And, a, b)
    }

    /// Builds a field computing `max(a, b)` per component
    pub fn or(
        &mut self,
        name: &str,
        a: FieldId,
        b: FieldId,
    ) -> Result<FieldId, Error> {
        self.op_logical(name, LogicalOp::Or, a, b)
    }

    /// Builds a field computing `max(a, b) * max(1 - a, 1 - b)` per component
    pub fn xor(
        &mut self,
        name: &str,
        a: FieldId,
        b: FieldId,
    ) -> Result<FieldId, Error> {
        self.op_logical(name, LogicalOp::Xor, a, b)
    }

    /// Builds a field converting `source` into rectangular Cartesian
    /// coordinates, based on the source's coordinate system
    pub fn coordinate_convert(
        &mut self,
        name: &str,
        source: FieldId,
    ) -> Result<FieldId, Error> {
        self.op_with_operands(name, FieldKind::CoordinateConvert, vec![source])
    }

    /// Builds a field interpolating a mesh attribute
    pub fn finite_element(
        &mut self,
        name: &str,
        mesh: &dyn Mesh,
        attribute: AttributeId,
    ) -> Result<FieldId, Error> {
        let components = mesh
            .attribute_components(attribute)
            .ok_or(Error::BadAttribute(attribute))?;
        self.insert(
            name,
            components,
            FieldKind::FiniteElement { attribute },
            vec![],
        )
    }

    /// Builds a field reading one nodal quantity of a mesh attribute
    pub fn node_value(
        &mut self,
        name: &str,
        mesh: &dyn Mesh,
        attribute: AttributeId,
        value_type: NodalValueType,
        version: usize,
    ) -> Result<FieldId, Error> {
        let components = mesh
            .attribute_components(attribute)
            .ok_or(Error::BadAttribute(attribute))?;
        self.insert(
            name,
            components,
            FieldKind::NodeValue {
                attribute,
                value_type,
                version,
            },
            vec![],
        )
    }

    /// Builds a field reporting the node or element identifier
    pub fn cmiss_number(&mut self, name: &str) -> Result<FieldId, Error> {
        self.insert(name, 1, FieldKind::CmissNumber, vec![])
    }

    /// Builds a field reporting the node or element reference count
    pub fn access_count(&mut self, name: &str) -> Result<FieldId, Error> {
        self.insert(name, 1, FieldKind::AccessCount, vec![])
    }

    /// Builds a field returning the local coordinate, padded with zeros to
    /// `components` values
    pub fn xi_coordinates(
        &mut self,
        name: &str,
        components: usize,
    ) -> Result<FieldId, Error> {
        self.insert(name, components, FieldKind::XiCoordinates, vec![])
    }

    /// Builds a field which evaluates `source` at the element location stored
    /// in a node's `attribute`
    pub fn embedded(
        &mut self,
        name: &str,
        attribute: AttributeId,
        source: FieldId,
    ) -> Result<FieldId, Error> {
        self.op_with_operands(
            name,
            FieldKind::Embedded { attribute },
            vec![source],
        )
    }

    /// Builds a colour-space conversion of a 3-component RGB field
    ///
    /// Grayscale conversions produce a single component; use
    /// [`grayscale`](Self::grayscale) to replicate it.
    pub fn color(
        &mut self,
        name: &str,
        conversion: ColorConversion,
        source: FieldId,
    ) -> Result<FieldId, Error> {
        if conversion == ColorConversion::RgbToGrayscale {
            return self.grayscale(name, source, 1);
        }
        self.op_with_operands(name, FieldKind::Color(conversion), vec![source])
    }

    /// Builds a grayscale conversion with `components` identical outputs
    pub fn grayscale(
        &mut self,
        name: &str,
        source: FieldId,
        components: usize,
    ) -> Result<FieldId, Error> {
        let kind = FieldKind::Color(ColorConversion::RgbToGrayscale);
        self.check_operands(&kind, &[source])?;
        self.insert(name, components, kind, vec![source])
    }

    /// Builds a texture-coordinate field, unrolling the mesh from `seed`
    ///
    /// The field has one component per local coordinate of the seed element.
    pub fn texture_coordinates(
        &mut self,
        name: &str,
        mesh: &dyn Mesh,
        seed: ElementId,
    ) -> Result<FieldId, Error> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let mapping = TextureMapping::build(mesh, seed)?;
        let components = mapping.dimension();
        self.insert(
            name,
            components,
            FieldKind::TextureCoordinates(mapping),
            vec![],
        )
    }

    /// Checks whether `target` can be reached by walking operands from `from`
    fn reaches(&self, from: FieldId, target: FieldId) -> Result<bool, Error> {
        let mut todo = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(f) = todo.pop() {
            if f == target {
                return Ok(true);
            }
            if seen.insert(f) {
                todo.extend(self.operands(f)?);
            }
        }
        Ok(false)
    }

    /// Replaces the operands of an existing field
    ///
    /// The new operands must have the same shape as the old ones, and must
    /// not depend on `id` (which would create a cycle).  Caches of `id` and
    /// its dependents are cleared.
    pub fn set_operands(
        &mut self,
        id: FieldId,
        operands: &[FieldId],
    ) -> Result<(), Error> {
        let field = self.get(id)?;
        let components = self.check_operands(&field.kind, operands)?;
        let keeps_shape = components == 0
            || matches!(
                field.kind,
                FieldKind::Color(ColorConversion::RgbToGrayscale)
            )
            || components == field.components;
        if !keeps_shape {
            return Err(Error::MismatchedComponents(
                field.components,
                components,
            ));
        }
        for o in operands {
            if self.reaches(*o, id)? {
                return Err(Error::Cycle(field.name.clone()));
            }
        }
        self.invalidate_dependents(id)?;
        self.get_mut(id)?.operands = operands.to_vec();
        Ok(())
    }

    /// Sets the coordinate system a field's values are expressed in
    pub fn set_coordinate_system(
        &mut self,
        id: FieldId,
        system: CoordinateSystem,
    ) -> Result<(), Error> {
        self.invalidate_dependents(id)?;
        self.get_mut(id)?.coordinate_system = system;
        Ok(())
    }

    /// Removes a field from the context
    ///
    /// Fails if any other field still uses it as an operand.  Other handles
    /// remain valid.
    pub fn remove(&mut self, id: FieldId) -> Result<(), Error> {
        if let Some(d) = self.dependents(id)?.first() {
            return Err(Error::FieldInUse(
                self.name(id)?.to_owned(),
                self.name(*d)?.to_owned(),
            ));
        }
        if let Some(f) = self.fields.get_mut(id).and_then(Option::take) {
            self.names.remove(&f.name);
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Writing values

    /// Writes a field's values at a node back into the mesh
    ///
    /// Only fields that read nodal values directly can be set:
    /// - finite-element fields overwrite the value at every version stored
    ///   on the node (version 0 is always written)
    /// - node-value fields overwrite their one quantity, which must already
    ///   be stored on the node
    ///
    /// Every field reading the attribute, and everything depending on those,
    /// has its caches cleared (including memoized inverse evaluations).
    pub fn set_values_at_node(
        &mut self,
        mesh: &mut dyn Mesh,
        id: FieldId,
        node: NodeId,
        values: &[f64],
    ) -> Result<(), Error> {
        let field = self.get(id)?;
        if values.len() != field.components {
            return Err(Error::BadValueCount(values.len(), field.components));
        }
        if !mesh.contains_node(node) {
            return Err(Error::BadNode(node));
        }
        let attribute = match field.kind {
            FieldKind::FiniteElement { attribute } => {
                let v = NodalValueType::Value;
                mesh.set_nodal_values(attribute, node, v, 0, values)?;
                let mut version = 1;
                while mesh.nodal_values(attribute, node, v, version).is_ok() {
                    mesh.set_nodal_values(attribute, node, v, version, values)?;
                    version += 1;
                }
                attribute
            }
            FieldKind::NodeValue {
                attribute,
                value_type,
                version,
            } => {
                mesh.nodal_values(attribute, node, value_type, version)?;
                mesh.set_nodal_values(
                    attribute, node, value_type, version, values,
                )?;
                attribute
            }
            ref kind => {
                return Err(Error::SetValuesUnsupported(kind.type_name()));
            }
        };
        debug!("set `{}` at node {node} to {values:?}", field.name);
        self.attribute_changed(attribute);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Invalidation

    /// Clears the evaluation and inverse-evaluation caches of one field
    pub fn invalidate(&mut self, id: FieldId) -> Result<(), Error> {
        self.get_mut(id)?.clear_caches();
        Ok(())
    }

    /// Clears caches of a field and everything that depends on it
    pub fn invalidate_dependents(&mut self, id: FieldId) -> Result<(), Error> {
        self.get(id)?;
        self.clear_downstream(|i, _| i == id);
        Ok(())
    }

    /// Clears every cache in the context
    pub fn invalidate_all(&mut self) {
        for f in self.fields.values_mut().flatten() {
            f.clear_caches();
        }
    }

    /// Clears caches of every field reading `attribute`, and their dependents
    ///
    /// This should be called whenever the mesh's values for the attribute
    /// change.
    pub fn attribute_changed(&mut self, attribute: AttributeId) {
        self.clear_downstream(|_, f| f.kind.attribute() == Some(attribute));
    }

    /// Clears caches of every live field matching `root`, then of every
    /// field with an operand already cleared
    ///
    /// Rewired operands may point forward in the arena, so this runs to a
    /// fixed point rather than making a single pass.
    fn clear_downstream(&mut self, root: impl Fn(FieldId, &Field) -> bool) {
        let mut hit: BTreeSet<FieldId> = self
            .iter()
            .filter(|(i, f)| root(*i, *f))
            .map(|(i, _)| i)
            .collect();
        loop {
            let next: Vec<FieldId> = self
                .iter()
                .filter(|(i, f)| {
                    !hit.contains(i)
                        && f.operands.iter().any(|o| hit.contains(o))
                })
                .map(|(i, _)| i)
                .collect();
            if next.is_empty() {
                break;
            }
            hit.extend(next);
        }
        for i in hit {
            if let Some(f) = self.fields.get_mut(i).and_then(Option::as_mut) {
                f.clear_caches();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        eval::{CacheState, Location},
        mesh::grid::GridMesh,
    };

    fn rgb_mesh() -> (GridMesh, AttributeId) {
        let mut mesh = GridMesh::new(&[1, 1]).unwrap();
        let a = mesh.add_attribute_with("rgb", 3, |p| vec![p[0], p[1], 0.5]);
        (mesh, a)
    }

    #[test]
    fn test_names() {
        let mut ctx = Context::new();
        let a = ctx.cmiss_number("a").unwrap();
        assert_eq!(ctx.lookup("a"), Some(a));
        assert_eq!(ctx.name(a).unwrap(), "a");
        assert_eq!(ctx.components(a).unwrap(), 1);
        assert!(matches!(
            ctx.access_count("a"),
            Err(Error::DuplicateName(..))
        ));
        assert!(matches!(
            ctx.xi_coordinates("b", 0),
            Err(Error::ZeroComponents)
        ));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_operand_checks() {
        let (mesh, rgb) = rgb_mesh();
        let mut ctx = Context::new();
        let c = ctx.finite_element("rgb", &mesh, rgb).unwrap();
        let n = ctx.cmiss_number("n").unwrap();
        assert!(matches!(
            ctx.and("bad", c, n),
            Err(Error::MismatchedComponents(3, 1))
        ));
        assert!(matches!(
            ctx.color("lab", ColorConversion::RgbToLab, n),
            Err(Error::BadSourceComponents(..))
        ));
        let g = ctx.grayscale("g", c, 4).unwrap();
        assert_eq!(ctx.components(g).unwrap(), 4);
        let xyz = ctx.color("xyz", ColorConversion::RgbToXyz, c).unwrap();
        assert_eq!(ctx.components(xyz).unwrap(), 3);
        let xi = ctx.xi_coordinates("xi", 4).unwrap();
        assert!(ctx.coordinate_convert("rc", xi).is_err());
        assert!(matches!(
            ctx.finite_element("missing", &mesh, AttributeId::new(9)),
            Err(Error::BadAttribute(..))
        ));
    }

    #[test]
    fn test_cycles() {
        let mut ctx = Context::new();
        let a = ctx.xi_coordinates("a", 1).unwrap();
        let b = ctx.xi_coordinates("b", 1).unwrap();
        let c = ctx.and("c", a, b).unwrap();
        let d = ctx.or("d", c, b).unwrap();

        assert!(matches!(ctx.set_operands(c, &[d, a]), Err(Error::Cycle(..))));
        assert!(matches!(ctx.set_operands(c, &[c, a]), Err(Error::Cycle(..))));
        assert!(matches!(
            ctx.set_operands(c, &[a]),
            Err(Error::BadOperandCount("and", 2, 1))
        ));
        ctx.set_operands(c, &[b, b]).unwrap();
        assert_eq!(ctx.operands(c).unwrap(), &[b, b]);
        assert_eq!(ctx.dependents(b).unwrap(), vec![c, d]);
        assert!(ctx.dependents(a).unwrap().is_empty());
    }

    #[test]
    fn test_remove() {
        let mut ctx = Context::new();
        let a = ctx.xi_coordinates("a", 1).unwrap();
        let b = ctx.xi_coordinates("b", 1).unwrap();
        let c = ctx.xor("c", a, b).unwrap();
        assert!(matches!(ctx.remove(a), Err(Error::FieldInUse(..))));
        ctx.remove(c).unwrap();
        ctx.remove(a).unwrap();
        assert!(ctx.lookup("a").is_none());
        assert!(matches!(ctx.get(a), Err(Error::BadField)));
        assert_eq!(ctx.name(b).unwrap(), "b");
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.iter().map(|(i, _)| i).collect::<Vec<_>>(), vec![b]);

        // The name is free again
        ctx.xi_coordinates("a", 2).unwrap();
    }

    #[test]
    fn test_coordinate_system() {
        let mut ctx = Context::new();
        let a = ctx.xi_coordinates("a", 3).unwrap();
        let s = CoordinateSystem::with_focus(
            CoordinateSystemType::ProlateSpheroidal,
            2.0,
        );
        ctx.set_coordinate_system(a, s).unwrap();
        assert_eq!(ctx.get(a).unwrap().coordinate_system(), s);
    }

    #[test]
    fn test_attribute_changed() {
        let (mesh, rgb) = rgb_mesh();
        let mut ctx = Context::new();
        let xi = ctx.xi_coordinates("xi", 3).unwrap();
        let x = ctx.or("x", xi, xi).unwrap();
        let c = ctx.finite_element("rgb", &mesh, rgb).unwrap();
        let y = ctx.and("y", c, c).unwrap();
        // Rewire so that an earlier field reads a later one
        ctx.set_operands(x, &[xi, y]).unwrap();
        let g = ctx.grayscale("g", x, 1).unwrap();

        let e = mesh.element(&[0, 0]).unwrap();
        let loc = Location::element(e, &[0.5, 0.5]).unwrap();
        ctx.evaluate(&mesh, g, &loc, false).unwrap();
        for f in [xi, x, c, y, g] {
            assert_eq!(
                ctx.cache_state(f).unwrap(),
                CacheState::Element(e, false)
            );
        }

        ctx.attribute_changed(rgb);
        for f in [x, c, y, g] {
            assert_eq!(ctx.cache_state(f).unwrap(), CacheState::Empty);
        }
        assert_eq!(
            ctx.cache_state(xi).unwrap(),
            CacheState::Element(e, false)
        );
    }
}
