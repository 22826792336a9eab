use approx::assert_relative_eq;
use femfield::{
    Error, ErrorKind,
    context::{ColorConversion, Context},
    eval::{CacheState, Location},
    mesh::{Mesh, NodalValueType, grid::GridMesh},
    solver::{FindXiSettings, SearchScope},
};

#[test]
fn shared_operand_graph() {
    let mut mesh = GridMesh::new(&[2, 2]).unwrap();
    let rgb = mesh.add_attribute_with("rgb", 3, |p| {
        vec![p[0] / 2.0, p[1] / 2.0, 0.25]
    });
    let mut ctx = Context::new();
    let rgb = ctx.finite_element("rgb", &mesh, rgb).unwrap();
    let xyz = ctx.color("xyz", ColorConversion::RgbToXyz, rgb).unwrap();
    let gray = ctx.grayscale("gray", rgb, 3).unwrap();
    let mix = ctx.or("mix", xyz, gray).unwrap();

    let e = mesh.element(&[1, 1]).unwrap();
    let loc = Location::element(e, &[0.5, 0.5]).unwrap();
    let out = ctx.evaluate(&mesh, mix, &loc, false).unwrap();
    assert_eq!(out.values.len(), 3);

    // Every field in the graph was evaluated at the same location
    for f in [rgb, xyz, gray, mix] {
        assert_eq!(ctx.cache_state(f).unwrap(), CacheState::Element(e, false));
    }

    // Repeating the request is a cache hit with identical bits
    let again = ctx.evaluate(&mesh, mix, &loc, false).unwrap();
    assert_eq!(out.values, again.values);

    // Grayscale is 0.299 r + 0.587 g + 0.114 b, replicated
    let g = ctx.evaluate(&mesh, gray, &loc, false).unwrap();
    let expected = 0.299 * 0.75 + 0.587 * 0.75 + 0.114 * 0.25;
    for v in &g.values {
        assert_relative_eq!(*v, expected, epsilon = 1e-12);
    }

    // The combinator can't differentiate
    let err = ctx.evaluate(&mesh, mix, &loc, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

    // Switching to a node clears every element cache in the graph
    let n = mesh.node(&[1, 1]).unwrap();
    ctx.evaluate(&mesh, mix, &Location::Node(n), false).unwrap();
    for f in [rgb, xyz, gray, mix] {
        assert_eq!(ctx.cache_state(f).unwrap(), CacheState::Node(n));
    }
}

#[test]
fn texture_continuity_across_faces() {
    let mut mesh = GridMesh::new(&[3, 3]).unwrap();
    let mut faces = vec![];
    for j in 0..3 {
        for i in 0..2 {
            let e = mesh.element(&[i, j]).unwrap();
            faces.push((e, mesh.add_face(e, 1).unwrap()));
        }
    }
    let mut ctx = Context::new();
    let seed = mesh.element(&[1, 1]).unwrap();
    let t = ctx.texture_coordinates("texture", &mesh, seed).unwrap();

    for (parent, face) in faces {
        let neighbour = mesh.adjacent_element(parent, 1).unwrap();
        for s in [0.0, 0.3, 1.0] {
            let a = ctx
                .evaluate(
                    &mesh,
                    t,
                    &Location::element(face, &[s]).unwrap().with_top_level(parent),
                    false,
                )
                .unwrap();
            let b = ctx
                .evaluate(
                    &mesh,
                    t,
                    &Location::element(face, &[s])
                        .unwrap()
                        .with_top_level(neighbour),
                    false,
                )
                .unwrap();
            assert_eq!(a.values, b.values);
        }
    }
}

#[test]
fn set_values_at_node() {
    let mut mesh = GridMesh::new(&[2]).unwrap();
    let a = mesh.add_attribute_with("x", 1, |p| p.to_vec());
    let end = mesh.node(&[2]).unwrap();
    mesh.set_nodal_values(a, end, NodalValueType::Value, 1, &[2.0])
        .unwrap();
    mesh.set_nodal_values(a, end, NodalValueType::DS1, 0, &[1.0])
        .unwrap();

    let mut ctx = Context::new();
    let x = ctx.finite_element("x", &mesh, a).unwrap();
    let dx = ctx
        .node_value("dx", &mesh, a, NodalValueType::DS1, 0)
        .unwrap();
    let double = ctx.or("double", x, x).unwrap();
    let settings = FindXiSettings::default();

    let found = ctx
        .find_element_xi(&mesh, x, &[1.5], &SearchScope::Mesh, &settings)
        .unwrap();
    assert_eq!(Some(found.element), mesh.element(&[1]));
    assert_relative_eq!(found.xi[0], 0.5, epsilon = 1e-9);
    let e = found.element;
    ctx.evaluate(&mesh, double, &found.into(), false).unwrap();

    // Every stored version of the value is overwritten
    ctx.set_values_at_node(&mut mesh, x, end, &[3.0]).unwrap();
    for version in [0, 1] {
        assert_eq!(
            mesh.nodal_values(a, end, NodalValueType::Value, version)
                .unwrap(),
            vec![3.0]
        );
    }
    assert_eq!(
        mesh.nodal_values(a, end, NodalValueType::DS1, 0).unwrap(),
        vec![1.0]
    );

    // Caches downstream of the attribute are gone, and so is the memoized
    // search result
    assert_eq!(ctx.cache_state(double).unwrap(), CacheState::Empty);
    let out = ctx
        .evaluate(&mesh, x, &Location::Node(end), false)
        .unwrap();
    assert_eq!(out.values, vec![3.0]);
    let found = ctx
        .find_element_xi(&mesh, x, &[1.5], &SearchScope::Mesh, &settings)
        .unwrap();
    assert_eq!(found.element, e);
    assert_relative_eq!(found.xi[0], 0.25, epsilon = 1e-9);

    // A node value field writes only its own quantity
    ctx.set_values_at_node(&mut mesh, dx, end, &[0.5]).unwrap();
    assert_eq!(
        mesh.nodal_values(a, end, NodalValueType::DS1, 0).unwrap(),
        vec![0.5]
    );
    assert_eq!(
        mesh.nodal_values(a, end, NodalValueType::Value, 0).unwrap(),
        vec![3.0]
    );
    let out = ctx
        .evaluate(&mesh, dx, &Location::Node(end), false)
        .unwrap();
    assert_eq!(out.values, vec![0.5]);

    // ...and the quantity must already be stored on the node
    let start = mesh.node(&[0]).unwrap();
    let err = ctx
        .set_values_at_node(&mut mesh, dx, start, &[0.5])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MissingNodalValue(_, NodalValueType::DS1, 0)
    ));
    assert!(mesh.nodal_values(a, start, NodalValueType::DS1, 0).is_err());
}

#[test]
fn set_values_rejected() {
    let mut mesh = GridMesh::new(&[2]).unwrap();
    let a = mesh.add_attribute_with("x", 1, |p| p.to_vec());
    let host = mesh.add_element_xi_attribute("host");
    let mut ctx = Context::new();
    let x = ctx.finite_element("x", &mesh, a).unwrap();
    let embedded = ctx.embedded("embedded", host, x).unwrap();
    let cmiss = ctx.cmiss_number("cmiss").unwrap();
    let n = mesh.node(&[1]).unwrap();

    for f in [embedded, cmiss] {
        let err = ctx.set_values_at_node(&mut mesh, f, n, &[0.5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }
    assert!(matches!(
        ctx.set_values_at_node(&mut mesh, x, n, &[0.5, 0.5]),
        Err(Error::BadValueCount(2, 1))
    ));
    let missing = femfield::mesh::NodeId::new(99);
    assert!(matches!(
        ctx.set_values_at_node(&mut mesh, x, missing, &[0.5]),
        Err(Error::BadNode(..))
    ));
    assert_eq!(
        mesh.nodal_values(a, n, NodalValueType::Value, 0).unwrap(),
        vec![1.0]
    );
}

#[test]
fn is_defined() {
    let mut mesh = GridMesh::new(&[2, 1]).unwrap();
    let a = mesh.add_attribute_with("coordinates", 2, |p| p.to_vec());
    let host = mesh.add_element_xi_attribute("host");
    let corner = mesh.node(&[2, 1]).unwrap();
    mesh.set_nodal_values(a, corner, NodalValueType::DS1, 0, &[1.0, 0.0])
        .unwrap();

    let mut ctx = Context::new();
    let x = ctx.finite_element("coordinates", &mesh, a).unwrap();
    let dx = ctx
        .node_value("dx", &mesh, a, NodalValueType::DS1, 0)
        .unwrap();
    let xi = ctx.xi_coordinates("xi", 2).unwrap();
    let mix = ctx.and("mix", x, xi).unwrap();
    let embedded = ctx.embedded("embedded", host, x).unwrap();
    let outer = ctx.embedded("outer", host, mix).unwrap();
    let seed = mesh.element(&[0, 0]).unwrap();
    let texture = ctx.texture_coordinates("texture", &mesh, seed).unwrap();

    let origin = mesh.node(&[0, 0]).unwrap();
    let at_corner = Location::Node(corner);
    let at_origin = Location::Node(origin);
    let e = mesh.element(&[1, 0]).unwrap();
    let inside = Location::element(e, &[0.5, 0.5]).unwrap();

    assert!(ctx.is_defined(&mesh, x, &at_origin).unwrap());
    assert!(ctx.is_defined(&mesh, x, &inside).unwrap());
    assert!(ctx.is_defined(&mesh, dx, &at_corner).unwrap());
    assert!(!ctx.is_defined(&mesh, dx, &at_origin).unwrap());
    assert!(!ctx.is_defined(&mesh, dx, &inside).unwrap());

    // A combinator is defined wherever all of its operands are
    assert!(!ctx.is_defined(&mesh, xi, &at_origin).unwrap());
    assert!(!ctx.is_defined(&mesh, mix, &at_origin).unwrap());
    assert!(ctx.is_defined(&mesh, mix, &inside).unwrap());

    // Embedded fields need a stored location, and check their operand there
    assert!(!ctx.is_defined(&mesh, embedded, &at_origin).unwrap());
    mesh.set_nodal_element_xi(host, origin, e, &[0.25, 0.75])
        .unwrap();
    assert!(ctx.is_defined(&mesh, embedded, &at_origin).unwrap());
    assert!(ctx.is_defined(&mesh, outer, &at_origin).unwrap());
    assert!(!ctx.is_defined(&mesh, embedded, &inside).unwrap());
    let out = ctx
        .evaluate(&mesh, embedded, &at_origin, false)
        .unwrap();
    assert_relative_eq!(out.values[0], 1.25, epsilon = 1e-12);
    assert_relative_eq!(out.values[1], 0.75, epsilon = 1e-12);

    assert!(ctx.is_defined(&mesh, texture, &inside).unwrap());
    assert!(!ctx.is_defined(&mesh, texture, &at_origin).unwrap());

    // Locations that aren't in the mesh are never defined
    let bad_xi = Location::element(e, &[0.5]).unwrap();
    assert!(!ctx.is_defined(&mesh, x, &bad_xi).unwrap());
    let missing = Location::Node(femfield::mesh::NodeId::new(99));
    assert!(!ctx.is_defined(&mesh, x, &missing).unwrap());

    // Nothing was evaluated along the way
    assert_eq!(ctx.cache_state(mix).unwrap(), CacheState::Empty);

    ctx.remove(texture).unwrap();
    assert!(matches!(
        ctx.is_defined(&mesh, texture, &inside),
        Err(Error::BadField)
    ));
}
