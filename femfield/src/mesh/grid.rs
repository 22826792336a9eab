//! Structured grid of multilinear elements
use super::{
    AttributeId, AttributeSample, ElementId, MAX_XI, Mesh, NodalValueType,
    NodeId, TopLevelConversion, Xi,
};
use crate::Error;
use arrayvec::ArrayVec;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Integer lattice position of a cell or node
type GridIndex = ArrayVec<usize, MAX_XI>;

/// A face element registered on a cell
#[derive(Copy, Clone, Debug)]
struct Face {
    parent: ElementId,
    face: usize,
}

#[derive(Clone, Debug)]
enum AttributeData {
    /// Tabulated nodal values, keyed by `(node, value type, version)`
    Values {
        components: usize,
        values: BTreeMap<(NodeId, NodalValueType, usize), Vec<f64>>,
    },
    /// Embedded element locations stored at nodes
    ElementXi(BTreeMap<NodeId, (ElementId, Xi)>),
}

#[derive(Clone, Debug)]
struct Attribute {
    name: String,
    data: AttributeData,
}

/// A line, square, or cube grid of unit cells with multilinear interpolation
///
/// Cells are numbered from 1 with axis 0 varying fastest; nodes are numbered
/// the same way on the `(n + 1)` lattice.  Face elements added with
/// [`add_face`](Self::add_face) are numbered after the cells.
///
/// An axis may be made periodic, in which case adjacency wraps around from
/// the last cell to the first.  The wrapped cells don't share nodes, so
/// attribute values are free to jump across the seam.
#[derive(Clone, Debug)]
pub struct GridMesh {
    size: GridIndex,
    periodic: [bool; MAX_XI],
    faces: Vec<Face>,
    attributes: Vec<Attribute>,
}

impl GridMesh {
    /// Builds a grid with the given number of cells along each axis
    ///
    /// ```
    /// # use femfield::mesh::{grid::GridMesh, Mesh};
    /// let mesh = GridMesh::new(&[4, 3])?;
    /// assert_eq!(mesh.cell_count(), 12);
    /// assert_eq!(mesh.node_count(), 20);
    /// # Ok::<(), femfield::Error>(())
    /// ```
    pub fn new(size: &[usize]) -> Result<Self, Error> {
        if size.is_empty() || size.len() > MAX_XI || size.contains(&0) {
            return Err(Error::BadDimension(size.len()));
        }
        Ok(Self {
            size: size.iter().cloned().collect(),
            periodic: [false; MAX_XI],
            faces: vec![],
            attributes: vec![],
        })
    }

    /// Makes adjacency along the given axis wrap around
    pub fn with_periodic(mut self, axis: usize) -> Self {
        if axis < self.dimension() {
            self.periodic[axis] = true;
        }
        self
    }

    /// Dimension of the grid's cells
    pub fn dimension(&self) -> usize {
        self.size.len()
    }

    /// Number of top-level cells
    pub fn cell_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Number of lattice nodes
    pub fn node_count(&self) -> usize {
        self.size.iter().map(|n| n + 1).product()
    }

    /// Looks up a cell by lattice position
    pub fn element(&self, index: &[usize]) -> Option<ElementId> {
        flatten(index, &self.size).map(|i| ElementId::new(i as u32 + 1))
    }

    /// Looks up a node by lattice position
    pub fn node(&self, index: &[usize]) -> Option<NodeId> {
        let dims: GridIndex = self.size.iter().map(|n| n + 1).collect();
        flatten(index, &dims).map(|i| NodeId::new(i as u32 + 1))
    }

    /// Returns the lattice position of a top-level cell
    pub fn cell_index(&self, element: ElementId) -> Option<GridIndex> {
        let i = (element.get() as usize).checked_sub(1)?;
        (i < self.cell_count()).then(|| unflatten(i, &self.size))
    }

    /// Returns the lattice position of a node
    pub fn node_index(&self, node: NodeId) -> Option<GridIndex> {
        let i = (node.get() as usize).checked_sub(1)?;
        let dims: GridIndex = self.size.iter().map(|n| n + 1).collect();
        (i < self.node_count()).then(|| unflatten(i, &dims))
    }

    /// Returns the corner nodes of a cell, with axis 0 varying fastest
    pub fn element_nodes(&self, element: ElementId) -> Option<Vec<NodeId>> {
        let base = self.cell_index(element)?;
        (0..1usize << self.dimension())
            .map(|corner| {
                let index: GridIndex = base
                    .iter()
                    .enumerate()
                    .map(|(axis, i)| i + ((corner >> axis) & 1))
                    .collect();
                self.node(&index)
            })
            .collect()
    }

    fn face(&self, element: ElementId) -> Option<Face> {
        let i = (element.get() as usize).checked_sub(self.cell_count() + 1)?;
        self.faces.get(i).cloned()
    }

    /// Registers a face of a cell as a lower-dimensional element
    pub fn add_face(
        &mut self,
        parent: ElementId,
        face: usize,
    ) -> Result<ElementId, Error> {
        if self.cell_index(parent).is_none() {
            return Err(Error::BadElement(parent));
        }
        if self.dimension() < 2 || face >= 2 * self.dimension() {
            return Err(Error::BadDimension(self.dimension() - 1));
        }
        self.faces.push(Face { parent, face });
        Ok(ElementId::new((self.cell_count() + self.faces.len()) as u32))
    }

    /// Adds an attribute with no values
    pub fn add_attribute(&mut self, name: &str, components: usize) -> AttributeId {
        self.attributes.push(Attribute {
            name: name.to_owned(),
            data: AttributeData::Values {
                components,
                values: BTreeMap::new(),
            },
        });
        AttributeId::new(self.attributes.len() - 1)
    }

    /// Adds an attribute whose nodal values are computed from each node's
    /// lattice position
    ///
    /// ```
    /// # use femfield::mesh::{grid::GridMesh, Mesh, NodalValueType};
    /// let mut mesh = GridMesh::new(&[2, 2])?;
    /// let coords = mesh.add_attribute_with("coordinates", 2, |p| p.to_vec());
    /// let n = mesh.node(&[1, 2]).unwrap();
    /// let v = mesh.nodal_values(coords, n, NodalValueType::Value, 0)?;
    /// assert_eq!(v, vec![1.0, 2.0]);
    /// # Ok::<(), femfield::Error>(())
    /// ```
    pub fn add_attribute_with<F: Fn(&[f64]) -> Vec<f64>>(
        &mut self,
        name: &str,
        components: usize,
        f: F,
    ) -> AttributeId {
        let attribute = self.add_attribute(name, components);
        let dims: GridIndex = self.size.iter().map(|n| n + 1).collect();
        let mut values = BTreeMap::new();
        for i in 0..self.node_count() {
            let pos: Vec<f64> =
                unflatten(i, &dims).iter().map(|&p| p as f64).collect();
            let mut v = f(&pos);
            v.resize(components, 0.0);
            values.insert(
                (NodeId::new(i as u32 + 1), NodalValueType::Value, 0),
                v,
            );
        }
        if let AttributeData::Values { values: v, .. } =
            &mut self.attributes[attribute.get()].data
        {
            *v = values;
        }
        attribute
    }

    /// Adds an attribute storing embedded element locations at nodes
    pub fn add_element_xi_attribute(&mut self, name: &str) -> AttributeId {
        self.attributes.push(Attribute {
            name: name.to_owned(),
            data: AttributeData::ElementXi(BTreeMap::new()),
        });
        AttributeId::new(self.attributes.len() - 1)
    }

    /// Looks up an attribute by name
    pub fn attribute(&self, name: &str) -> Option<AttributeId> {
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .map(AttributeId::new)
    }

    /// Stores an embedded element location at a node
    pub fn set_nodal_element_xi(
        &mut self,
        attribute: AttributeId,
        node: NodeId,
        element: ElementId,
        xi: &[f64],
    ) -> Result<(), Error> {
        if !self.contains_node(node) {
            return Err(Error::BadNode(node));
        }
        let dim = self
            .element_dimension(element)
            .ok_or(Error::BadElement(element))?;
        if xi.len() != dim {
            return Err(Error::BadXiLength(xi.len(), dim, element));
        }
        let xi = super::xi_from_slice(xi)?;
        match self.attributes.get_mut(attribute.get()).map(|a| &mut a.data) {
            Some(AttributeData::ElementXi(map)) => {
                map.insert(node, (element, xi));
                Ok(())
            }
            _ => Err(Error::BadAttribute(attribute)),
        }
    }

    /// Builds the conversion from a face into the given neighbouring cell
    fn face_conversion(&self, cell: ElementId, face: usize) -> TopLevelConversion {
        let dim = self.dimension();
        let axis = face / 2;
        let mut offset = DVector::zeros(dim);
        offset[axis] = (face % 2) as f64;
        let mut linear = DMatrix::zeros(dim, dim - 1);
        for (k, a) in (0..dim).filter(|a| *a != axis).enumerate() {
            linear[(a, k)] = 1.0;
        }
        TopLevelConversion {
            element: cell,
            offset,
            linear,
        }
    }

    /// Interpolates a nodal attribute within a top-level cell
    fn sample_cell(
        &self,
        attribute: AttributeId,
        element: ElementId,
        xi: &[f64],
        derivatives: bool,
    ) -> Result<AttributeSample, Error> {
        let Some(AttributeData::Values { components, values }) =
            self.attributes.get(attribute.get()).map(|a| &a.data)
        else {
            return Err(Error::BadAttribute(attribute));
        };
        let nodes = self
            .element_nodes(element)
            .ok_or(Error::BadElement(element))?;
        let dim = self.dimension();

        let mut out = vec![0.0; *components];
        let mut d = DMatrix::zeros(*components, dim);
        for (corner, node) in nodes.iter().enumerate() {
            let v = values
                .get(&(*node, NodalValueType::Value, 0))
                .ok_or(Error::MissingNodalValue(*node, NodalValueType::Value, 0))?;
            let bit = |axis: usize| (corner >> axis) & 1 == 1;
            let weight = |axis: usize| if bit(axis) { xi[axis] } else { 1.0 - xi[axis] };
            let w: f64 = (0..dim).map(weight).product();
            for (o, v) in out.iter_mut().zip(v) {
                *o += w * v;
            }
            if derivatives {
                for j in 0..dim {
                    let dw: f64 = (0..dim)
                        .map(|a| {
                            if a != j {
                                weight(a)
                            } else if bit(a) {
                                1.0
                            } else {
                                -1.0
                            }
                        })
                        .product();
                    for (c, v) in v.iter().enumerate() {
                        d[(c, j)] += dw * v;
                    }
                }
            }
        }
        Ok(AttributeSample {
            values: out,
            derivatives: derivatives.then_some(d),
        })
    }
}

impl Mesh for GridMesh {
    fn element_dimension(&self, element: ElementId) -> Option<usize> {
        if self.cell_index(element).is_some() {
            Some(self.dimension())
        } else {
            self.face(element).map(|_| self.dimension() - 1)
        }
    }

    fn contains_node(&self, node: NodeId) -> bool {
        self.node_index(node).is_some()
    }

    fn elements(&self) -> Box<dyn Iterator<Item = ElementId> + '_> {
        let n = self.cell_count() + self.faces.len();
        Box::new((1..=n as u32).map(ElementId::new))
    }

    fn adjacent_element(
        &self,
        element: ElementId,
        face: usize,
    ) -> Option<ElementId> {
        let mut index = self.cell_index(element)?;
        let axis = face / 2;
        let n = *self.size.get(axis)?;
        let i = index[axis];
        index[axis] = match (face % 2, self.periodic[axis]) {
            (0, _) if i > 0 => i - 1,
            (0, true) => n - 1,
            (1, _) if i + 1 < n => i + 1,
            (1, true) => 0,
            _ => return None,
        };
        self.element(&index)
    }

    fn is_top_level(&self, element: ElementId) -> bool {
        self.cell_index(element).is_some()
    }

    fn top_level_conversion(
        &self,
        element: ElementId,
        hint: Option<ElementId>,
    ) -> Option<TopLevelConversion> {
        let Face { parent, face } = self.face(element)?;
        // The face is shared with the neighbouring cell, which may be chosen
        // through the hint
        if let Some(h) = hint {
            if h != parent && self.adjacent_element(parent, face) == Some(h) {
                return Some(self.face_conversion(h, face ^ 1));
            }
        }
        Some(self.face_conversion(parent, face))
    }

    fn attribute_components(&self, attribute: AttributeId) -> Option<usize> {
        match &self.attributes.get(attribute.get())?.data {
            AttributeData::Values { components, .. } => Some(*components),
            AttributeData::ElementXi(..) => None,
        }
    }

    fn evaluate_attribute(
        &self,
        attribute: AttributeId,
        element: ElementId,
        xi: &[f64],
        top_level: Option<ElementId>,
        derivatives: bool,
    ) -> Result<AttributeSample, Error> {
        let dim = self
            .element_dimension(element)
            .ok_or(Error::BadElement(element))?;
        if xi.len() != dim {
            return Err(Error::BadXiLength(xi.len(), dim, element));
        }
        if self.is_top_level(element) {
            return self.sample_cell(attribute, element, xi, derivatives);
        }
        let conv = self
            .top_level_conversion(element, top_level)
            .ok_or(Error::NoTopLevelElement(element))?;
        let top_xi = conv.apply(xi)?;
        let mut sample =
            self.sample_cell(attribute, conv.element, &top_xi, derivatives)?;
        sample.derivatives = sample.derivatives.map(|d| d * &conv.linear);
        Ok(sample)
    }

    fn nodal_values(
        &self,
        attribute: AttributeId,
        node: NodeId,
        value_type: NodalValueType,
        version: usize,
    ) -> Result<Vec<f64>, Error> {
        if !self.contains_node(node) {
            return Err(Error::BadNode(node));
        }
        match self.attributes.get(attribute.get()).map(|a| &a.data) {
            Some(AttributeData::Values { values, .. }) => values
                .get(&(node, value_type, version))
                .cloned()
                .ok_or(Error::MissingNodalValue(node, value_type, version)),
            _ => Err(Error::BadAttribute(attribute)),
        }
    }

    fn set_nodal_values(
        &mut self,
        attribute: AttributeId,
        node: NodeId,
        value_type: NodalValueType,
        version: usize,
        v: &[f64],
    ) -> Result<(), Error> {
        if !self.contains_node(node) {
            return Err(Error::BadNode(node));
        }
        match self.attributes.get_mut(attribute.get()).map(|a| &mut a.data) {
            Some(AttributeData::Values { components, values })
                if v.len() == *components =>
            {
                values.insert((node, value_type, version), v.to_vec());
                Ok(())
            }
            Some(AttributeData::Values { components, .. }) => {
                Err(Error::BadSourceComponents("nodal", *components, v.len()))
            }
            _ => Err(Error::BadAttribute(attribute)),
        }
    }

    fn nodal_element_xi(
        &self,
        attribute: AttributeId,
        node: NodeId,
    ) -> Result<(ElementId, Xi), Error> {
        if !self.contains_node(node) {
            return Err(Error::BadNode(node));
        }
        match self.attributes.get(attribute.get()).map(|a| &a.data) {
            Some(AttributeData::ElementXi(map)) => map
                .get(&node)
                .cloned()
                .ok_or(Error::MissingElementXi(node)),
            _ => Err(Error::BadAttribute(attribute)),
        }
    }

    fn element_access_count(&self, element: ElementId) -> usize {
        if self.is_top_level(element) {
            1 + self.faces.iter().filter(|f| f.parent == element).count()
        } else if self.face(element).is_some() {
            1
        } else {
            0
        }
    }

    fn node_access_count(&self, node: NodeId) -> usize {
        // Number of cells which use this node as a corner
        let Some(index) = self.node_index(node) else {
            return 0;
        };
        index
            .iter()
            .zip(&self.size)
            .map(|(&i, &n)| usize::from(i > 0) + usize::from(i < n))
            .product()
    }
}

fn flatten(index: &[usize], dims: &[usize]) -> Option<usize> {
    if index.len() != dims.len() {
        return None;
    }
    let mut out = 0;
    for (i, n) in index.iter().zip(dims).rev() {
        if i >= n {
            return None;
        }
        out = out * n + i;
    }
    Some(out)
}

fn unflatten(mut i: usize, dims: &[usize]) -> GridIndex {
    dims.iter()
        .map(|n| {
            let out = i % n;
            i /= n;
            out
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn numbering() {
        let mesh = GridMesh::new(&[3, 2]).unwrap();
        assert_eq!(mesh.element(&[0, 0]), Some(ElementId::new(1)));
        assert_eq!(mesh.element(&[2, 1]), Some(ElementId::new(6)));
        assert_eq!(mesh.element(&[3, 0]), None);
        assert_eq!(mesh.cell_index(ElementId::new(5)).unwrap().as_slice(), &[1, 1]);
        assert_eq!(mesh.node(&[3, 2]), Some(NodeId::new(12)));
        assert_eq!(
            mesh.element_nodes(ElementId::new(1)).unwrap(),
            vec![NodeId::new(1), NodeId::new(2), NodeId::new(5), NodeId::new(6)]
        );
        assert!(GridMesh::new(&[]).is_err());
        assert!(GridMesh::new(&[1, 0]).is_err());
    }

    #[test]
    fn adjacency() {
        let mesh = GridMesh::new(&[3, 2]).unwrap();
        let e = mesh.element(&[1, 0]).unwrap();
        assert_eq!(mesh.adjacent_element(e, 0), mesh.element(&[0, 0]));
        assert_eq!(mesh.adjacent_element(e, 1), mesh.element(&[2, 0]));
        assert_eq!(mesh.adjacent_element(e, 2), None);
        assert_eq!(mesh.adjacent_element(e, 3), mesh.element(&[1, 1]));
        assert_eq!(mesh.adjacent_element(e, 4), None);

        let ring = GridMesh::new(&[3]).unwrap().with_periodic(0);
        let first = ring.element(&[0]).unwrap();
        assert_eq!(ring.adjacent_element(first, 0), ring.element(&[2]));
    }

    #[test]
    fn interpolation() {
        let mut mesh = GridMesh::new(&[2, 2]).unwrap();
        let a = mesh.add_attribute_with("f", 1, |p| vec![p[0] * p[1]]);
        let e = mesh.element(&[1, 1]).unwrap();
        let s = mesh.evaluate_attribute(a, e, &[0.5, 0.25], None, true).unwrap();
        // bilinear interpolation of x * y is exact
        assert_relative_eq!(s.values[0], 1.5 * 1.25);
        let d = s.derivatives.unwrap();
        assert_relative_eq!(d[(0, 0)], 1.25);
        assert_relative_eq!(d[(0, 1)], 1.5);

        let s = mesh.evaluate_attribute(a, e, &[0.5, 0.25], None, false).unwrap();
        assert!(s.derivatives.is_none());
        assert!(mesh.evaluate_attribute(a, e, &[0.5], None, false).is_err());
    }

    #[test]
    fn faces() {
        let mut mesh = GridMesh::new(&[2, 1]).unwrap();
        let a = mesh.add_attribute_with("x", 2, |p| p.to_vec());
        let left = mesh.element(&[0, 0]).unwrap();
        let right = mesh.element(&[1, 0]).unwrap();
        let face = mesh.add_face(left, 1).unwrap();
        assert_eq!(face, ElementId::new(3));
        assert_eq!(mesh.element_dimension(face), Some(1));
        assert!(!mesh.is_top_level(face));
        assert_eq!(mesh.element_access_count(left), 2);

        let s = mesh.evaluate_attribute(a, face, &[0.25], None, true).unwrap();
        assert_eq!(s.values, vec![1.0, 0.25]);
        let d = s.derivatives.unwrap();
        assert_eq!(d.shape(), (2, 1));
        assert_eq!(d[(1, 0)], 1.0);

        // Same face, seen from the right-hand cell
        let c = mesh.top_level_conversion(face, Some(right)).unwrap();
        assert_eq!(c.element, right);
        assert_eq!(c.apply(&[0.25]).unwrap().as_slice(), &[0.0, 0.25]);
        let s = mesh
            .evaluate_attribute(a, face, &[0.25], Some(right), false)
            .unwrap();
        assert_eq!(s.values, vec![1.0, 0.25]);
    }

    #[test]
    fn nodal_storage() {
        let mut mesh = GridMesh::new(&[1, 1]).unwrap();
        let a = mesh.add_attribute("f", 2);
        let n = mesh.node(&[1, 1]).unwrap();
        mesh.set_nodal_values(a, n, NodalValueType::DS1, 1, &[3.0, 4.0])
            .unwrap();
        assert_eq!(
            mesh.nodal_values(a, n, NodalValueType::DS1, 1).unwrap(),
            vec![3.0, 4.0]
        );
        assert!(matches!(
            mesh.nodal_values(a, n, NodalValueType::Value, 0),
            Err(Error::MissingNodalValue(..))
        ));
        assert!(mesh.set_nodal_values(a, n, NodalValueType::Value, 0, &[1.0]).is_err());
        assert_eq!(mesh.node_access_count(n), 1);

        let big = GridMesh::new(&[3, 3]).unwrap();
        assert_eq!(big.node_access_count(big.node(&[1, 1]).unwrap()), 4);
        assert_eq!(big.node_access_count(big.node(&[0, 1]).unwrap()), 2);
    }
}
