//! Colour-space conversions from RGB
use super::Evaluation;
use crate::context::ColorConversion;
use nalgebra::DMatrix;

/// sRGB to CIE XYZ, row-major
const XYZ: [f64; 9] = [
    0.412453, 0.357580, 0.180423, //
    0.212671, 0.715160, 0.072169, //
    0.019334, 0.119193, 0.950227,
];

/// Scale applied to the Z row of [`XYZ`] for the XYZ output
const Z_SCALE: f64 = 0.918483657;

/// Reference white used to normalize X and Z before the Lab transform
const WHITE_X: f64 = 0.950456;
const WHITE_Z: f64 = 1.088754;

const LAB_THRESHOLD: f64 = 0.008856;

/// Below this lightness, chroma fades towards zero
const LAB_BLACK: f64 = 20.0;

/// Upper bound on the `b` channel
const LAB_YELLOW: f64 = 70.0;

fn xyz_matrix() -> DMatrix<f64> {
    let mut m = DMatrix::from_row_slice(3, 3, &XYZ);
    m.row_mut(2).scale_mut(Z_SCALE);
    m
}

fn rgb_to_lab(rgb: &[f64]) -> [f64; 3] {
    let dot = |row: usize| (0..3).map(|i| XYZ[row * 3 + i] * rgb[i]).sum::<f64>();
    let x = dot(0) / WHITE_X;
    let y = dot(1);
    let z = dot(2) / WHITE_Z;

    let f = |t: f64| {
        if t > LAB_THRESHOLD {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let (fx, fy, fz) = (f(x), f(y), f(z));
    let mut l = if y > LAB_THRESHOLD {
        116.0 * fy - 16.0
    } else {
        903.3 * y
    };
    let mut a = 500.0 * (fx - fy);
    let mut b = 200.0 * (fy - fz);
    if l < LAB_BLACK {
        let k = ((l - LAB_BLACK) / (LAB_BLACK / 4.0)).exp();
        a *= k;
        b *= k;
        l = LAB_BLACK;
    }
    [l, a, b.min(LAB_YELLOW)]
}

/// Hue reported for achromatic input
const GRAY_HUE: f64 = 2.0 / 3.0;

/// Returns `[lightness, saturation, hue]`, with hue in `[0, 1)`
fn rgb_to_hsl(rgb: &[f64]) -> [f64; 3] {
    let (r, g, b) = (rgb[0], rgb[1], rgb[2]);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let range = max - min;
    if range == 0.0 {
        return [l, 0.0, GRAY_HUE];
    }
    let s = if l <= 0.5 {
        range / (max + min)
    } else {
        range / (2.0 - max - min)
    };
    let delta = |c: f64| ((max - c) / 6.0 + range / 2.0) / range;
    let mut h = if r == max {
        delta(b) - delta(g)
    } else if g == max {
        1.0 / 3.0 + delta(r) - delta(b)
    } else {
        2.0 / 3.0 + delta(g) - delta(r)
    };
    if h < 0.0 {
        h += 1.0;
    }
    if h >= 1.0 {
        h -= 1.0;
    }
    [l, s, h]
}

fn rgb_to_grayscale(rgb: &[f64]) -> f64 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

/// Converts a 3-component RGB source
///
/// Only the XYZ conversion carries derivatives, and only when the source
/// has them.
pub(crate) fn convert(
    conversion: ColorConversion,
    components: usize,
    source: &Evaluation,
) -> Evaluation {
    let rgb = &source.values;
    match conversion {
        ColorConversion::RgbToXyz => {
            let m = xyz_matrix();
            let values = (0..3)
                .map(|row| (0..3).map(|i| m[(row, i)] * rgb[i]).sum::<f64>())
                .collect();
            Evaluation {
                values,
                derivatives: source.derivatives.as_ref().map(|d| &m * d),
            }
        }
        ColorConversion::RgbToHsl => {
            Evaluation::from_values(rgb_to_hsl(rgb).to_vec())
        }
        ColorConversion::RgbToLab => {
            Evaluation::from_values(rgb_to_lab(rgb).to_vec())
        }
        ColorConversion::RgbToGrayscale => {
            Evaluation::from_values(vec![rgb_to_grayscale(rgb); components])
        }
    }
}
