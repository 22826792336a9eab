//! Inverse evaluation: finding the element and `xi` that produce a value
//!
//! Each candidate element is searched with Gauss-Newton iteration on the
//! field's own derivatives, so any field with `xi` derivatives can be
//! inverted.  Texture-coordinate fields are inverted directly through their
//! mapping instead.
pub(crate) mod cache;

use crate::{
    Error,
    context::{Context, FieldId, FieldKind},
    eval::Location,
    mesh::{ElementId, ElementShape, MAX_XI, Mesh, Xi},
};
use cache::{Begin, FindXiKey};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

/// Maximum number of Newton steps per candidate element
pub const MAX_ITERATIONS: usize = 10;

/// Pivots smaller than this mark the normal equations as singular
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Settings for [`Context::find_element_xi`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FindXiSettings {
    /// Convergence tolerance on each `xi` increment; also the amount by
    /// which `xi` may leave the element during iteration
    pub tolerance: f64,

    /// Return the closest element if no exact match is found
    pub find_nearest: bool,

    /// Only consider elements of this dimension
    pub element_dimension: Option<usize>,
}

impl Default for FindXiSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            find_nearest: false,
            element_dimension: None,
        }
    }
}

/// Elements to search
#[derive(Clone, Debug, PartialEq)]
pub enum SearchScope {
    /// A single element
    Element(ElementId),
    /// Every element in the mesh, in enumeration order
    Mesh,
    /// The given elements, in order
    Elements(Vec<ElementId>),
}

impl SearchScope {
    /// Checks whether the scope includes an element
    pub fn contains(&self, mesh: &dyn Mesh, element: ElementId) -> bool {
        match self {
            SearchScope::Element(e) => *e == element,
            SearchScope::Mesh => mesh.contains_element(element),
            SearchScope::Elements(v) => v.contains(&element),
        }
    }
}

/// A location found by inverse evaluation
#[derive(Clone, Debug, PartialEq)]
pub struct ElementXi {
    /// Element containing the location
    pub element: ElementId,
    /// Local coordinate within `element`
    pub xi: Xi,
}

impl From<ElementXi> for Location {
    fn from(e: ElementXi) -> Self {
        Location::Element {
            element: e.element,
            xi: e.xi,
            top_level: None,
        }
    }
}

/// Reason for abandoning a candidate element
#[derive(Copy, Clone, Debug, PartialEq)]
enum GiveUp {
    Singular,
    MaxIterations,
    NoProgress,
    /// Converged in `xi`, but some components are still off target
    Overdetermined,
}

/// Result of Newton iteration within one element
enum Newton {
    Converged(Xi),
    GiveUp {
        reason: GiveUp,
        /// Last evaluated location and its squared residual
        xi: Xi,
        residual: f64,
    },
}

/// Solves `a x = b` by LU decomposition, returning `None` if singular
fn solve(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let lu = a.lu();
    if lu
        .u()
        .diagonal()
        .iter()
        .any(|d| d.abs() < SINGULAR_TOLERANCE)
    {
        return None;
    }
    lu.solve(b)
}

impl Context {
    /// Finds an element location where the field takes the target values
    ///
    /// Returns [`Error::NotFound`] if no element in scope matches (and
    /// `find_nearest` is not set).  Results are cached per field: repeating
    /// a search with identical inputs returns the previous answer, until the
    /// field is invalidated.
    ///
    /// ```
    /// # use femfield::{context::Context, mesh::{grid::GridMesh, Mesh}};
    /// # use femfield::solver::{FindXiSettings, SearchScope};
    /// let mut mesh = GridMesh::new(&[4, 4])?;
    /// let coords = mesh.add_attribute_with("coordinates", 2, |p| p.to_vec());
    /// let mut ctx = Context::new();
    /// let x = ctx.finite_element("x", &mesh, coords)?;
    /// let found = ctx.find_element_xi(
    ///     &mesh,
    ///     x,
    ///     &[2.5, 1.25],
    ///     &SearchScope::Mesh,
    ///     &FindXiSettings::default(),
    /// )?;
    /// assert_eq!(Some(found.element), mesh.element(&[2, 1]));
    /// assert!((found.xi[0] - 0.5).abs() < 1e-6);
    /// assert!((found.xi[1] - 0.25).abs() < 1e-6);
    /// # Ok::<(), femfield::Error>(())
    /// ```
    pub fn find_element_xi(
        &mut self,
        mesh: &dyn Mesh,
        id: FieldId,
        target: &[f64],
        scope: &SearchScope,
        settings: &FindXiSettings,
    ) -> Result<ElementXi, Error> {
        let components = self.components(id)?;
        if target.len() != components {
            return Err(Error::BadTargetLength(target.len(), components));
        }
        match scope {
            SearchScope::Elements(v) if v.is_empty() => {
                return Err(Error::EmptyScope);
            }
            SearchScope::Element(e) if !mesh.contains_element(*e) => {
                return Err(Error::BadElement(*e));
            }
            _ => (),
        }

        let key = FindXiKey::new(target, scope, settings)?;
        let (hint, previous) = match self.get_mut(id)?.find_xi.begin(&key)? {
            Begin::Cached(outcome) => {
                debug!("find_element_xi cache hit: {outcome:?}");
                return outcome.ok_or(Error::NotFound);
            }
            Begin::Search { hint, previous } => (hint, previous),
        };

        let result = self.search(mesh, id, target, scope, settings, hint);
        let f = self.get_mut(id)?;
        f.find_xi.finish(&f.name, key, &result, previous);
        match result? {
            Some(found) => {
                debug!(
                    "`{}` found target in element {} at {:?}",
                    f.name, found.element, found.xi
                );
                Ok(found)
            }
            None => {
                debug!("`{}`: no element produces {target:?}", f.name);
                Err(Error::NotFound)
            }
        }
    }

    /// Runs the search, returning `None` if nothing matched
    fn search(
        &mut self,
        mesh: &dyn Mesh,
        id: FieldId,
        target: &[f64],
        scope: &SearchScope,
        settings: &FindXiSettings,
        hint: Option<ElementId>,
    ) -> Result<Option<ElementXi>, Error> {
        if let FieldKind::TextureCoordinates(mapping) = &self.get(id)?.kind {
            return match mapping.inverse(mesh, target, hint, |e| {
                scope.contains(mesh, e)
            }) {
                Ok(found) => Ok(Some(found)),
                Err(Error::NotFound) => Ok(None),
                Err(e) => Err(e),
            };
        }

        let candidates: Vec<ElementId> = match scope {
            SearchScope::Element(e) => vec![*e],
            SearchScope::Mesh => mesh.elements().collect(),
            SearchScope::Elements(v) => v.clone(),
        };
        let hint = hint.filter(|h| scope.contains(mesh, *h));
        let order = hint
            .into_iter()
            .chain(candidates.into_iter().filter(|c| Some(*c) != hint));

        let mut nearest: Option<(f64, ElementXi)> = None;
        for element in order {
            match self.newton(mesh, id, target, element, settings)? {
                None => (),
                Some(Newton::Converged(xi)) => {
                    return Ok(Some(ElementXi { element, xi }));
                }
                Some(Newton::GiveUp {
                    reason,
                    xi,
                    residual,
                }) => {
                    trace!("element {element}: gave up ({reason:?})");
                    if settings.find_nearest
                        && nearest.as_ref().is_none_or(|(r, _)| residual < *r)
                    {
                        nearest = Some((residual, ElementXi { element, xi }));
                    }
                }
            }
        }
        if let Some((r, n)) = &nearest {
            debug!(
                "no exact match; nearest is element {} (residual² = {r})",
                n.element
            );
        }
        Ok(nearest.map(|(_, n)| n))
    }

    /// Gauss-Newton iteration within one element
    ///
    /// Returns `None` if the element is skipped (wrong dimension, or more
    /// `xi` than field components).
    fn newton(
        &mut self,
        mesh: &dyn Mesh,
        id: FieldId,
        target: &[f64],
        element: ElementId,
        settings: &FindXiSettings,
    ) -> Result<Option<Newton>, Error> {
        let dim = mesh
            .element_dimension(element)
            .ok_or(Error::BadElement(element))?;
        if settings.element_dimension.is_some_and(|d| d != dim)
            || dim == 0
            || dim > target.len()
        {
            return Ok(None);
        }
        if dim > MAX_XI {
            return Err(Error::BadDimension(dim));
        }
        let shape = mesh
            .element_shape(element)
            .filter(|s| s.dimension() == dim)
            .or_else(|| ElementShape::from_dimension(dim))
            .ok_or(Error::BadDimension(dim))?;
        let tol = settings.tolerance;
        let goal = DVector::from_column_slice(target);

        let mut xi = shape.centroid();
        let mut last_xi: Option<Xi> = None;
        for iteration in 1..=MAX_ITERATIONS {
            let at = xi.clone();
            let loc = Location::Element {
                element,
                xi: at.clone(),
                top_level: None,
            };
            let eval = self.evaluate(mesh, id, &loc, true)?;
            let jac = eval.derivatives.ok_or(Error::DerivativesUnsupported(
                self.get(id)?.kind.type_name(),
            ))?;
            let residual = &goal - DVector::from_vec(eval.values);
            let give_up = |reason| {
                Ok(Some(Newton::GiveUp {
                    reason,
                    xi: at.clone(),
                    residual: residual.norm_squared(),
                }))
            };

            let jt = jac.transpose();
            let Some(delta) = solve(&jt * &jac, &(&jt * &residual)) else {
                return give_up(GiveUp::Singular);
            };
            trace!(
                "element {element}, iteration {iteration}: xi = {:?}, \
                 |r|² = {}, delta = {:?}",
                at,
                residual.norm_squared(),
                delta.as_slice()
            );
            let converged = delta.iter().all(|d| d.abs() <= tol);
            for (x, d) in xi.iter_mut().zip(delta.iter()) {
                *x += d;
            }

            if converged {
                // With more components than xi, each component's residual
                // must be explained by the last step
                if jac.nrows() > dim {
                    let step = &jac * &delta;
                    if step
                        .iter()
                        .zip(residual.iter())
                        .any(|(s, r)| 2.0 * s.abs() < r.abs())
                    {
                        return give_up(GiveUp::Overdetermined);
                    }
                }
                return Ok(Some(Newton::Converged(xi)));
            }

            shape.clamp(&mut xi, tol)?;
            if iteration == MAX_ITERATIONS {
                return give_up(GiveUp::MaxIterations);
            }
            if last_xi.as_ref() == Some(&xi) {
                return give_up(GiveUp::NoProgress);
            }
            last_xi = Some(xi.clone());
        }
        unreachable!("loop always returns on its final iteration")
    }

    /// Checks whether a field's inverse-evaluation cache is held by a search
    pub fn find_xi_in_use(&self, id: FieldId) -> Result<bool, Error> {
        self.get(id).map(|f| f.find_xi.is_in_use())
    }
}
