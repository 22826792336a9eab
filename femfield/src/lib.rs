//! `femfield` is a library for lazily evaluated fields over finite-element
//! meshes.
//!
//! A **field** maps a location on a mesh (a node, or an element plus local
//! coordinates `xi`) to a fixed number of real-valued components.  Fields
//! either read directly from the mesh (interpolated attributes, nodal values,
//! identifiers, `xi` itself) or are computed from other fields (fuzzy logic,
//! coordinate-system conversion, colour-space conversion, embedding).
//!
//! # Building fields
//! Fields are constructed within a
//! [`femfield::context::Context`](crate::context::Context), which serves as an
//! arena for fields and their operand graph:
//! ```
//! use femfield::{context::Context, mesh::grid::GridMesh};
//!
//! let mut mesh = GridMesh::new(&[2, 2])?;
//! let coords = mesh.add_attribute_with("coordinates", 2, |p| p.to_vec());
//!
//! let mut ctx = Context::new();
//! let x = ctx.finite_element("coordinates", &mesh, coords)?;
//! let xi = ctx.xi_coordinates("xi", 2)?;
//! let blend = ctx.or("blend", x, xi)?;
//! # Ok::<(), femfield::Error>(())
//! ```
//!
//! The mesh itself lives outside the library, behind the
//! [`Mesh`](crate::mesh::Mesh) trait.  [`GridMesh`](crate::mesh::grid::GridMesh)
//! is a small structured implementation.
//!
//! # Evaluation
//! [`Context::evaluate`](crate::context::Context::evaluate) evaluates a field
//! at a [`Location`](crate::eval::Location), optionally with derivatives with
//! respect to `xi`.  Each field remembers its most recent result, so repeated
//! evaluation at the same location (as happens when several fields share an
//! operand) is cheap:
//! ```
//! # use femfield::{context::Context, mesh::grid::GridMesh};
//! use femfield::eval::Location;
//! # let mut mesh = GridMesh::new(&[2, 2])?;
//! # let coords = mesh.add_attribute_with("coordinates", 2, |p| p.to_vec());
//! # let mut ctx = Context::new();
//! # let x = ctx.finite_element("coordinates", &mesh, coords)?;
//! let e = mesh.element(&[1, 0]).unwrap();
//! let out = ctx.evaluate(&mesh, x, &Location::element(e, &[0.5, 0.25])?, true)?;
//! assert_eq!(out.values, vec![1.5, 0.25]);
//! assert!(out.derivatives.is_some());
//! # Ok::<(), femfield::Error>(())
//! ```
//!
//! When the mesh changes, callers must tell the context which caches are
//! stale, using [`Context::attribute_changed`](crate::context::Context::attribute_changed)
//! or one of the `invalidate` functions.
//!
//! # Inverse evaluation
//! [`Context::find_element_xi`](crate::context::Context::find_element_xi)
//! finds a location where a field takes given values, by Newton iteration
//! within each candidate element.  See the [`solver`] module for details.
//!
//! # Texture coordinates
//! A texture-coordinate field unrolls a mesh into a continuous coordinate
//! space, by giving each element an integer offset; see [`texture`].
#![warn(missing_docs)]

pub mod context;
pub mod eval;
pub mod mesh;
pub mod solver;
pub mod texture;

mod error;
pub use error::{Error, ErrorKind};
