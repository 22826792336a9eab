//! Evaluators which read from the mesh
use super::{Evaluation, Location};
use crate::{
    Error,
    mesh::{AttributeId, Mesh, NodalValueType, NodeId},
};
use nalgebra::DMatrix;

/// Samples an attribute at a node (its value) or within an element
pub(crate) fn finite_element(
    mesh: &dyn Mesh,
    attribute: AttributeId,
    location: &Location,
    derivatives: bool,
) -> Result<Evaluation, Error> {
    match location {
        Location::Node(node) => {
            let values =
                mesh.nodal_values(attribute, *node, NodalValueType::Value, 0)?;
            Ok(Evaluation::from_values(values))
        }
        Location::Element {
            element,
            xi,
            top_level,
        } => {
            let s = mesh.evaluate_attribute(
                attribute,
                *element,
                xi,
                *top_level,
                derivatives,
            )?;
            Ok(Evaluation {
                values: s.values,
                derivatives: s.derivatives,
            })
        }
    }
}

/// Reads one tabulated nodal quantity
pub(crate) fn node_value(
    mesh: &dyn Mesh,
    attribute: AttributeId,
    value_type: NodalValueType,
    version: usize,
    node: NodeId,
) -> Result<Evaluation, Error> {
    mesh.nodal_values(attribute, node, value_type, version)
        .map(Evaluation::from_values)
}

/// Wraps a single integer-valued quantity, with zero derivatives in elements
fn scalar(v: f64, location: &Location, derivatives: bool) -> Evaluation {
    Evaluation {
        values: vec![v],
        derivatives: derivatives
            .then(|| DMatrix::zeros(1, location.dimension())),
    }
}

pub(crate) fn cmiss_number(location: &Location, derivatives: bool) -> Evaluation {
    let n = match location {
        Location::Node(node) => node.get(),
        Location::Element { element, .. } => element.get(),
    };
    scalar(n as f64, location, derivatives)
}

pub(crate) fn access_count(
    mesh: &dyn Mesh,
    location: &Location,
    derivatives: bool,
) -> Evaluation {
    let n = match location {
        Location::Node(node) => mesh.node_access_count(*node),
        Location::Element { element, .. } => mesh.element_access_count(*element),
    };
    scalar(n as f64, location, derivatives)
}

/// Returns the local coordinate, padded or truncated to `components`
pub(crate) fn xi_coordinates(
    components: usize,
    location: &Location,
    derivatives: bool,
) -> Result<Evaluation, Error> {
    let Location::Element { xi, .. } = location else {
        return Err(Error::NotDefinedAtNode("xi_coordinates"));
    };
    let mut values = vec![0.0; components];
    for (v, x) in values.iter_mut().zip(xi) {
        *v = *x;
    }
    Ok(Evaluation {
        values,
        derivatives: derivatives
            .then(|| DMatrix::identity(components, xi.len())),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{ElementId, grid::GridMesh};

    #[test]
    fn xi_padding() {
        let loc = Location::element(ElementId::new(1), &[0.25, 0.75]).unwrap();
        let out = xi_coordinates(3, &loc, true).unwrap();
        assert_eq!(out.values, vec![0.25, 0.75, 0.0]);
        let d = out.derivatives.unwrap();
        assert_eq!(d, DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]));

        let out = xi_coordinates(1, &loc, false).unwrap();
        assert_eq!(out.values, vec![0.25]);
        assert!(out.derivatives.is_none());

        assert!(xi_coordinates(3, &Location::Node(NodeId::new(1)), false).is_err());
    }

    #[test]
    fn identifiers() {
        let mut mesh = GridMesh::new(&[2, 2]).unwrap();
        let e = mesh.element(&[1, 1]).unwrap();
        mesh.add_face(e, 0).unwrap();
        let loc = Location::element(e, &[0.5, 0.5]).unwrap();

        let out = cmiss_number(&loc, true);
        assert_eq!(out.values, vec![4.0]);
        assert_eq!(out.derivatives, Some(DMatrix::zeros(1, 2)));
        assert_eq!(access_count(&mesh, &loc, false).values, vec![2.0]);

        let n = mesh.node(&[1, 1]).unwrap();
        let loc = Location::Node(n);
        assert_eq!(cmiss_number(&loc, false).values, vec![5.0]);
        assert_eq!(access_count(&mesh, &loc, false).values, vec![4.0]);
    }

    #[test]
    fn attribute_sampling() {
        let mut mesh = GridMesh::new(&[2]).unwrap();
        let a = mesh.add_attribute_with("x", 1, |p| vec![p[0] * 2.0]);
        let n = mesh.node(&[2]).unwrap();
        let out = finite_element(&mesh, a, &Location::Node(n), false).unwrap();
        assert_eq!(out.values, vec![4.0]);

        let e = mesh.element(&[1]).unwrap();
        let loc = Location::element(e, &[0.5]).unwrap();
        let out = finite_element(&mesh, a, &loc, true).unwrap();
        assert_eq!(out.values, vec![3.0]);
        assert_eq!(out.derivatives, Some(DMatrix::from_element(1, 1, 2.0)));

        mesh.set_nodal_values(a, n, NodalValueType::DS1, 0, &[0.5]).unwrap();
        let out = node_value(&mesh, a, NodalValueType::DS1, 0, n).unwrap();
        assert_eq!(out.values, vec![0.5]);
        assert!(node_value(&mesh, a, NodalValueType::DS1, 1, n).is_err());
    }
}
