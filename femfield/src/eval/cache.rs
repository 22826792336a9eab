//! Single-slot evaluation cache
use super::{Evaluation, Location};
use crate::{
    Error,
    mesh::{ElementId, NodeId, Xi},
};
use nalgebra::DMatrix;

/// Most recent evaluation of a field
///
/// Only one location is remembered; storing a node result drops any element
/// result and vice versa.
#[derive(Clone, Debug, Default)]
pub(crate) enum FieldCache {
    #[default]
    Empty,
    Node {
        node: NodeId,
        values: Vec<f64>,
    },
    Element {
        element: ElementId,
        xi: Xi,
        top_level: Option<ElementId>,
        values: Vec<f64>,
        derivatives: Option<DMatrix<f64>>,
    },
}

/// Public view of what a field's cache currently holds
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CacheState {
    /// Nothing cached
    Empty,
    /// Values at a node
    Node(NodeId),
    /// Values within an element, and whether derivatives were stored
    Element(ElementId, bool),
}

/// Compares local coordinates bit-for-bit
fn same_xi(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(a, b)| a.to_bits() == b.to_bits())
}

impl FieldCache {
    pub fn clear(&mut self) {
        *self = FieldCache::Empty;
    }

    pub fn state(&self) -> CacheState {
        match self {
            FieldCache::Empty => CacheState::Empty,
            FieldCache::Node { node, .. } => CacheState::Node(*node),
            FieldCache::Element {
                element,
                derivatives,
                ..
            } => CacheState::Element(*element, derivatives.is_some()),
        }
    }

    /// Returns the cached result, if it matches the location and holds
    /// derivatives when they're requested
    pub fn lookup(
        &self,
        location: &Location,
        want_derivatives: bool,
    ) -> Option<Evaluation> {
        match (self, location) {
            (FieldCache::Node { node, values }, Location::Node(n))
                if node == n =>
            {
                Some(Evaluation {
                    values: values.clone(),
                    derivatives: None,
                })
            }
            (
                FieldCache::Element {
                    element,
                    xi,
                    top_level,
                    values,
                    derivatives,
                },
                Location::Element {
                    element: e,
                    xi: x,
                    top_level: t,
                },
            ) if element == e
                && top_level == t
                && same_xi(xi, x)
                && (!want_derivatives || derivatives.is_some()) =>
            {
                Some(Evaluation {
                    values: values.clone(),
                    derivatives: if want_derivatives {
                        derivatives.clone()
                    } else {
                        None
                    },
                })
            }
            _ => None,
        }
    }

    /// Replaces the cache contents
    ///
    /// If storage can't be reserved, the previous contents are kept.
    pub fn store(
        &mut self,
        location: &Location,
        eval: &Evaluation,
    ) -> Result<(), Error> {
        let mut values = Vec::new();
        values.try_reserve_exact(eval.values.len())?;
        values.extend_from_slice(&eval.values);
        *self = match location {
            Location::Node(node) => FieldCache::Node {
                node: *node,
                values,
            },
            Location::Element {
                element,
                xi,
                top_level,
            } => FieldCache::Element {
                element: *element,
                xi: xi.clone(),
                top_level: *top_level,
                values,
                derivatives: eval.derivatives.clone(),
            },
        };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(e: u32, xi: &[f64]) -> Location {
        Location::element(ElementId::new(e), xi).unwrap()
    }

    #[test]
    fn node_slot() {
        let mut c = FieldCache::default();
        let loc = Location::Node(NodeId::new(3));
        assert!(c.lookup(&loc, false).is_none());
        c.store(&loc, &Evaluation::from_values(vec![1.0, 2.0])).unwrap();
        assert_eq!(c.state(), CacheState::Node(NodeId::new(3)));
        assert_eq!(c.lookup(&loc, false).unwrap().values, vec![1.0, 2.0]);
        assert!(c.lookup(&Location::Node(NodeId::new(4)), false).is_none());
        assert!(c.lookup(&at(3, &[0.5]), false).is_none());
    }

    #[test]
    fn element_slot() {
        let mut c = FieldCache::default();
        let loc = at(1, &[0.25, 0.5]);
        c.store(&loc, &Evaluation::from_values(vec![1.0])).unwrap();
        assert_eq!(c.state(), CacheState::Element(ElementId::new(1), false));
        assert!(c.lookup(&loc, false).is_some());
        // No derivatives stored, so a derivative request misses
        assert!(c.lookup(&loc, true).is_none());
        assert!(c.lookup(&at(1, &[0.25, 0.50001]), false).is_none());
        assert!(
            c.lookup(&loc.clone().with_top_level(ElementId::new(2)), false)
                .is_none()
        );

        let d = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        c.store(
            &loc,
            &Evaluation {
                values: vec![1.0],
                derivatives: Some(d.clone()),
            },
        )
        .unwrap();
        assert_eq!(c.lookup(&loc, true).unwrap().derivatives, Some(d));
        assert_eq!(c.lookup(&loc, false).unwrap().derivatives, None);

        // Storing at a node drops the element entry
        c.store(&Location::Node(NodeId::new(1)), &Evaluation::from_values(vec![]))
            .unwrap();
        assert!(c.lookup(&loc, false).is_none());
        c.clear();
        assert_eq!(c.state(), CacheState::Empty);
    }

    #[test]
    fn signed_zero_is_a_different_location() {
        let mut c = FieldCache::default();
        c.store(&at(1, &[0.0]), &Evaluation::from_values(vec![1.0])).unwrap();
        assert!(c.lookup(&at(1, &[-0.0]), false).is_none());
    }
}
