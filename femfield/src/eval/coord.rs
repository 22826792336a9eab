//! Conversion of curvilinear coordinates into rectangular Cartesian
use super::Evaluation;
use crate::context::{CoordinateSystem, CoordinateSystemType};
use nalgebra::{DMatrix, Matrix3, Vector3};

impl CoordinateSystem {
    /// Converts a point into rectangular Cartesian coordinates
    ///
    /// Missing components are treated as zero.  Returns the converted point
    /// and the Jacobian `d(x, y, z) / d(source)`.
    pub fn to_rectangular_cartesian(
        &self,
        p: &[f64],
    ) -> (Vector3<f64>, Matrix3<f64>) {
        let c = |i: usize| p.get(i).cloned().unwrap_or(0.0);
        let (u, v, w) = (c(0), c(1), c(2));
        let a = self.focus;
        match self.kind {
            CoordinateSystemType::RectangularCartesian => {
                (Vector3::new(u, v, w), Matrix3::identity())
            }
            CoordinateSystemType::CylindricalPolar => {
                let (r, (st, ct), z) = (u, v.sin_cos(), w);
                (
                    Vector3::new(r * ct, r * st, z),
                    Matrix3::new(
                        ct, -r * st, 0.0, //
                        st, r * ct, 0.0, //
                        0.0, 0.0, 1.0,
                    ),
                )
            }
            CoordinateSystemType::SphericalPolar => {
                let (r, (st, ct), (sp, cp)) = (u, v.sin_cos(), w.sin_cos());
                (
                    Vector3::new(r * ct * cp, r * st * cp, r * sp),
                    Matrix3::new(
                        ct * cp, -r * st * cp, -r * ct * sp, //
                        st * cp, r * ct * cp, -r * st * sp, //
                        sp, 0.0, r * cp,
                    ),
                )
            }
            CoordinateSystemType::ProlateSpheroidal => {
                let (sl, cl) = (u.sinh(), u.cosh());
                let (sm, cm) = v.sin_cos();
                let (st, ct) = w.sin_cos();
                (
                    Vector3::new(
                        a * cl * cm,
                        a * sl * sm * ct,
                        a * sl * sm * st,
                    ),
                    Matrix3::new(
                        a * sl * cm, -a * cl * sm, 0.0, //
                        a * cl * sm * ct, a * sl * cm * ct, -a * sl * sm * st, //
                        a * cl * sm * st, a * sl * cm * st, a * sl * sm * ct,
                    ),
                )
            }
            CoordinateSystemType::OblateSpheroidal => {
                let (sl, cl) = (u.sinh(), u.cosh());
                let (sm, cm) = v.sin_cos();
                let (st, ct) = w.sin_cos();
                (
                    Vector3::new(
                        a * cl * cm * ct,
                        a * sl * sm,
                        a * cl * cm * st,
                    ),
                    Matrix3::new(
                        a * sl * cm * ct, -a * cl * sm * ct, -a * cl * cm * st, //
                        a * cl * sm, a * sl * cm, 0.0, //
                        a * sl * cm * st, -a * cl * sm * st, a * cl * cm * ct,
                    ),
                )
            }
        }
    }
}

/// Converts a 1-3 component source into rectangular Cartesian coordinates
///
/// Source derivatives, when present, are pushed through the Jacobian.
pub(crate) fn to_rectangular_cartesian(
    system: CoordinateSystem,
    source: &Evaluation,
) -> Evaluation {
    let (p, jac) = system.to_rectangular_cartesian(&source.values);
    let derivatives = source.derivatives.as_ref().map(|d| {
        let mut padded = DMatrix::zeros(3, d.ncols());
        let rows = d.nrows().min(3);
        padded.rows_mut(0, rows).copy_from(&d.rows(0, rows));
        DMatrix::from_column_slice(3, 3, jac.as_slice()) * padded
    });
    Evaluation {
        values: p.iter().cloned().collect(),
        derivatives,
    }
}
