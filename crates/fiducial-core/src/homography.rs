//! Planar homographies from point correspondences.
//!
//! Both solvers condition the points first (centroid at the origin, mean
//! radius √2) and undo the conditioning on the result, which is returned
//! scaled so that `h33 = 1`.

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};

/// Plane-to-plane projective map, `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// Map a point through `H` and dehomogenize.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let q = self.h * p.to_homogeneous();
        Point2::new(q.x / q.z, q.y / q.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Column `i` of `H`.
    pub fn column(&self, i: usize) -> Vector3<f64> {
        self.h.column(i).into_owned()
    }
}

/// Similarity that moves a point set's centroid to the origin and scales
/// its mean distance from it to √2.
struct Conditioner {
    t: Matrix3<f64>,
}

impl Conditioner {
    fn fit(pts: &[Point2<f64>]) -> Self {
        let n = pts.len() as f64;
        let centroid = pts.iter().fold(Vector3::zeros(), |acc, p| acc + p.to_homogeneous()) / n;
        let (cx, cy) = (centroid.x, centroid.y);
        let spread = pts
            .iter()
            .map(|p| (p.x - cx).hypot(p.y - cy))
            .sum::<f64>()
            / n;
        let s = if spread > 1e-12 {
            std::f64::consts::SQRT_2 / spread
        } else {
            1.0
        };
        Self {
            t: Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0),
        }
    }

    fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        let q = self.t * p.to_homogeneous();
        Point2::new(q.x, q.y)
    }

    fn apply_all(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pts.iter().map(|p| self.apply(p)).collect()
    }
}

/// The two linear constraints one correspondence `s -> d` puts on the
/// row-major entries of `H`.
fn dlt_rows(s: &Point2<f64>, d: &Point2<f64>) -> [[f64; 9]; 2] {
    let (x, y) = (s.x, s.y);
    let (u, v) = (d.x, d.y);
    [
        [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
        [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
    ]
}

/// Undo conditioning and scale to `h33 = 1`.
fn finish(hn: Matrix3<f64>, src: &Conditioner, dst: &Conditioner) -> Option<Homography> {
    let h = dst.t.try_inverse()? * hn * src.t;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Homography::new(h / scale))
}

/// Estimate H such that `dst ~ H * src` from N >= 4 correspondences.
///
/// Exactly four points go through [`homography_from_4pt`]; more are solved
/// in the least-squares sense via the SVD null vector.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s), Ok(d)) = (
        <&[Point2<f64>; 4]>::try_from(src),
        <&[Point2<f64>; 4]>::try_from(dst),
    ) {
        return homography_from_4pt(s, d);
    }

    let (cs, cd) = (Conditioner::fit(src), Conditioner::fit(dst));
    let (s, d) = (cs.apply_all(src), cd.apply_all(dst));

    let mut a = DMatrix::<f64>::zeros(2 * s.len(), 9);
    for (k, (sp, dp)) in s.iter().zip(&d).enumerate() {
        for (j, row) in dlt_rows(sp, dp).iter().enumerate() {
            a.row_mut(2 * k + j).copy_from_slice(row);
        }
    }

    let v_t = a.svd(false, true).v_t?;
    let null = v_t.row(v_t.nrows().checked_sub(1)?);
    let hn = Matrix3::from_fn(|r, c| null[3 * r + c]);
    finish(hn, &cs, &cd)
}

/// Compute H such that `dst ~ H * src` from exactly 4 correspondences.
///
/// Corner order must be consistent between `src` and `dst`. Returns `None`
/// when the linear system is singular (coincident points).
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    let (cs, cd) = (Conditioner::fit(src), Conditioner::fit(dst));

    // fix h33 = 1 and move its column to the right-hand side
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for k in 0..4 {
        let rows = dlt_rows(&cs.apply(&src[k]), &cd.apply(&dst[k]));
        for (j, row) in rows.iter().enumerate() {
            let r = 2 * k + j;
            for (c, &value) in row[..8].iter().enumerate() {
                a[(r, c)] = value;
            }
            b[r] = -row[8];
        }
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);
    finish(hn, &cs, &cd)
}
