/// Minimal column-major 4x4 matrix math for vertex and camera
/// transforms. Element `m[c * 4 + r]` is column `c`, row `r`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        let mut m = Mat4::IDENTITY;
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }

    pub fn rotation_x(angle: f32) -> Mat4 {
        let (s, c) = angle.sin_cos();
        let mut m = Mat4::IDENTITY;
        m.0[5] = c;
        m.0[6] = s;
        m.0[9] = -s;
        m.0[10] = c;
        m
    }

    pub fn rotation_y(angle: f32) -> Mat4 {
        let (s, c) = angle.sin_cos();
        let mut m = Mat4::IDENTITY;
        m.0[0] = c;
        m.0[2] = -s;
        m.0[8] = s;
        m.0[10] = c;
        m
    }

    pub fn rotation_z(angle: f32) -> Mat4 {
        let (s, c) = angle.sin_cos();
        let mut m = Mat4::IDENTITY;
        m.0[0] = c;
        m.0[1] = s;
        m.0[4] = -s;
        m.0[5] = c;
        m
    }

    /// Matrix product `self * rhs`.
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [0.0f32; 16];
        for c in 0..4 {
            for r in 0..4 {
                let mut acc = 0.0;
                for k in 0..4 {
                    acc += a[k * 4 + r] * b[c * 4 + k];
                }
                out[c * 4 + r] = acc;
            }
        }
        Mat4(out)
    }

    /// Transform a point (w = 1).
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0] * p[0] + m[4] * p[1] + m[8] * p[2] + m[12],
            m[1] * p[0] + m[5] * p[1] + m[9] * p[2] + m[13],
            m[2] * p[0] + m[6] * p[1] + m[10] * p[2] + m[14],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transforms_nothing() {
        assert_eq!(
            Mat4::IDENTITY.transform_point([1.0, 2.0, 3.0]),
            [1.0, 2.0, 3.0]
        );
        assert_eq!(Mat4::IDENTITY.mul(&Mat4::IDENTITY), Mat4::IDENTITY);
    }

    #[test]
    fn translation_offsets_points() {
        let t = Mat4::translation(10.0, -5.0, 2.0);
        assert_eq!(t.transform_point([1.0, 1.0, 1.0]), [11.0, -4.0, 3.0]);
    }

    #[test]
    fn composed_transform_applies_right_to_left() {
        // T * R: rotate first, then translate.
        let m = Mat4::translation(100.0, 0.0, 0.0).mul(&Mat4::rotation_z(std::f32::consts::FRAC_PI_2));
        let p = m.transform_point([1.0, 0.0, 0.0]);
        assert!((p[0] - 100.0).abs() < 1e-5);
        assert!((p[1] - 1.0).abs() < 1e-5);
        assert!(p[2].abs() < 1e-5);
    }
}
