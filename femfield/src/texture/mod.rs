//! Texture coordinates unrolled across element faces
//!
//! A [`TextureMapping`] assigns each reachable top-level element an integer
//! offset, so that `offset + xi` is continuous across shared faces.  The
//! table is built by a breadth-first walk over face adjacency, starting from
//! a seed element whose offset is zero.
//!
//! Each element keeps the offset from the first path that reaches it.  On a
//! mesh with a loop (e.g. a periodic axis), a later path that implies a
//! different offset is ignored, which leaves a seam in the texture.
use crate::{
    Error,
    context::{Context, FieldId, FieldKind},
    eval::{Evaluation, Location},
    mesh::{ElementId, MAX_XI, Mesh},
    solver::ElementXi,
};
use log::debug;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, VecDeque};

/// Offset of one element within the unrolled texture space
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureMappingEntry {
    /// Integer offset along each axis, padded with zeros
    pub offset: [f64; MAX_XI],
}

/// Per-element offsets for a texture-coordinate field
#[derive(Clone, Debug)]
pub struct TextureMapping {
    seed: ElementId,
    dimension: usize,
    entries: BTreeMap<ElementId, TextureMappingEntry>,
}

impl TextureMapping {
    /// Walks the mesh from `seed`, assigning offsets to every element
    /// reachable through face adjacency
    pub fn build(mesh: &dyn Mesh, seed: ElementId) -> Result<Self, Error> {
        let dimension = mesh
            .element_dimension(seed)
            .ok_or(Error::BadElement(seed))?;
        if dimension == 0 || dimension > MAX_XI {
            return Err(Error::BadDimension(dimension));
        }

        let mut entries = BTreeMap::new();
        entries.insert(
            seed,
            TextureMappingEntry {
                offset: [0.0; MAX_XI],
            },
        );
        let mut todo = VecDeque::from([seed]);
        while let Some(e) = todo.pop_front() {
            let offset = entries[&e].offset;
            let dim = mesh.element_dimension(e).unwrap_or(0).min(MAX_XI);
            for face in 0..2 * dim {
                let Some(n) = mesh.adjacent_element(e, face) else {
                    continue;
                };
                if entries.contains_key(&n) {
                    continue;
                }
                let mut offset = offset;
                offset[face / 2] += if face % 2 == 0 { -1.0 } else { 1.0 };
                entries.insert(n, TextureMappingEntry { offset });
                todo.push_back(n);
            }
        }
        debug!(
            "built texture mapping from element {seed}: {} elements",
            entries.len()
        );
        Ok(Self {
            seed,
            dimension,
            entries,
        })
    }

    /// Element the walk started from
    pub fn seed(&self) -> ElementId {
        self.seed
    }

    /// Number of texture coordinates (the seed element's dimension)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of mapped elements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the mapping is empty (which never happens once built)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an element's entry
    pub fn get(&self, element: ElementId) -> Option<&TextureMappingEntry> {
        self.entries.get(&element)
    }

    /// Iterates over entries in element order
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (ElementId, &TextureMappingEntry)> {
        self.entries.iter().map(|(e, m)| (*e, m))
    }

    /// Checks whether an element was reached when building the mapping
    ///
    /// Faces and lines are covered if their top-level parent is.
    pub(crate) fn covers(
        &self,
        mesh: &dyn Mesh,
        element: ElementId,
        top_level: Option<ElementId>,
    ) -> bool {
        if mesh.is_top_level(element) {
            self.entries.contains_key(&element)
        } else {
            mesh.top_level_conversion(element, top_level)
                .is_some_and(|c| self.entries.contains_key(&c.element))
        }
    }

    fn entry(&self, element: ElementId) -> Result<&TextureMappingEntry, Error> {
        self.get(element).ok_or(Error::UnmappedElement(element))
    }

    /// Evaluates texture coordinates within an element
    ///
    /// Faces and lines are evaluated through their top-level parent, using
    /// the parent's offset.
    pub(crate) fn evaluate(
        &self,
        mesh: &dyn Mesh,
        location: &Location,
        derivatives: bool,
    ) -> Result<Evaluation, Error> {
        let Location::Element {
            element,
            xi,
            top_level,
        } = location
        else {
            return Err(Error::NotDefinedAtNode("xi_texture_coordinates"));
        };
        let n = self.dimension;
        if mesh.is_top_level(*element) {
            let offset = self.entry(*element)?.offset;
            let values = (0..n)
                .map(|i| offset[i] + xi.get(i).cloned().unwrap_or(0.0))
                .collect();
            Ok(Evaluation {
                values,
                derivatives: derivatives
                    .then(|| DMatrix::identity(n, xi.len())),
            })
        } else {
            let conv = mesh
                .top_level_conversion(*element, *top_level)
                .ok_or(Error::NoTopLevelElement(*element))?;
            let offset = self.entry(conv.element)?.offset;
            let top_xi = conv.apply(xi)?;
            let values = (0..n)
                .map(|i| offset[i] + top_xi.get(i).cloned().unwrap_or(0.0))
                .collect();
            let linear = &conv.linear;
            Ok(Evaluation {
                values,
                derivatives: derivatives.then(|| {
                    DMatrix::from_fn(n, xi.len(), |r, c| {
                        if r < linear.nrows() { linear[(r, c)] } else { 0.0 }
                    })
                }),
            })
        }
    }

    /// Finds the element and local coordinate producing `target`
    ///
    /// The integer part of the target selects the element by offset and the
    /// remainder is the local coordinate.  `hint` is checked before scanning
    /// the table; a match outside `in_scope` is reported as [`Error::NotFound`].
    pub(crate) fn inverse<F: Fn(ElementId) -> bool>(
        &self,
        mesh: &dyn Mesh,
        target: &[f64],
        hint: Option<ElementId>,
        in_scope: F,
    ) -> Result<ElementXi, Error> {
        if target.len() > MAX_XI {
            return Err(Error::TooManyTextureComponents(target.len()));
        }
        let mut key = [0.0; MAX_XI];
        for (k, t) in key.iter_mut().zip(target) {
            *k = t.floor();
        }
        let matches = |m: &TextureMappingEntry| m.offset == key;
        let element = hint
            .filter(|h| self.get(*h).is_some_and(matches))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(_, m)| matches(m))
                    .map(|(e, _)| *e)
            })
            .ok_or(Error::NotFound)?;
        if !in_scope(element) {
            return Err(Error::NotFound);
        }
        let dim = mesh
            .element_dimension(element)
            .ok_or(Error::BadElement(element))?;
        let xi = (0..dim)
            .map(|i| target.get(i).cloned().unwrap_or(0.0) - key[i])
            .collect();
        Ok(ElementXi { element, xi })
    }
}

impl Context {
    /// Rebuilds a texture-coordinate field's mapping from a new seed
    ///
    /// The new seed must have the same dimension as the field's component
    /// count.  Caches of the field and its dependents are cleared.
    pub fn build_texture_mapping(
        &mut self,
        id: FieldId,
        mesh: &dyn Mesh,
        seed: ElementId,
    ) -> Result<(), Error> {
        let field = self.get(id)?;
        if !matches!(field.kind, FieldKind::TextureCoordinates(..)) {
            return Err(Error::NotTextureField);
        }
        let mapping = TextureMapping::build(mesh, seed)?;
        if mapping.dimension() != field.components {
            return Err(Error::MismatchedComponents(
                field.components,
                mapping.dimension(),
            ));
        }
        self.invalidate_dependents(id)?;
        self.get_mut(id)?.kind = FieldKind::TextureCoordinates(mapping);
        Ok(())
    }

    /// Returns the mapping of a texture-coordinate field
    pub fn texture_mapping(&self, id: FieldId) -> Result<&TextureMapping, Error> {
        match &self.get(id)?.kind {
            FieldKind::TextureCoordinates(m) => Ok(m),
            _ => Err(Error::NotTextureField),
        }
    }
}
