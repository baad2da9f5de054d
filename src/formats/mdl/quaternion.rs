//! Packed single-scalar quaternion encoding
//!
//! Orientation keyframes may store a unit quaternion in one 32-bit word:
//! x and y as signed 11-bit fixed point, z as signed 10-bit, with w derived
//! from the unit-length identity. The encoder first selects the hemisphere
//! with non-negative w so the derived w is always correct in sign.

use glam::Quat;

const XY_SCALE: f32 = 1023.0;
const Z_SCALE: f32 = 511.0;

/// Pack a unit quaternion into the compact 11/11/10-bit form.
pub fn compress_quaternion(q: Quat) -> u32 {
    let q = if q.w < 0.0 { -q } else { q };
    let cx = ((1.0 - q.x) * XY_SCALE).round().clamp(0.0, 2047.0) as u32;
    let cy = ((1.0 - q.y) * XY_SCALE).round().clamp(0.0, 2047.0) as u32;
    let cz = ((1.0 - q.z) * Z_SCALE).round().clamp(0.0, 1023.0) as u32;
    cx | (cy << 11) | (cz << 22)
}

/// Unpack the compact form back into a unit quaternion.
///
/// If quantization pushed the stored components past unit length the
/// radicand goes negative; w is clamped to zero and the result renormalized.
pub fn decompress_quaternion(packed: u32) -> Quat {
    let x = 1.0 - (packed & 0x7FF) as f32 / XY_SCALE;
    let y = 1.0 - ((packed >> 11) & 0x7FF) as f32 / XY_SCALE;
    let z = 1.0 - (packed >> 22) as f32 / Z_SCALE;
    let mag = x * x + y * y + z * z;
    let w = if mag < 1.0 { (1.0 - mag).sqrt() } else { 0.0 };
    Quat::from_xyzw(x, y, z, w).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_roundtrip(q: Quat) {
        let q = q.normalize();
        let canonical = if q.w < 0.0 { -q } else { q };
        let out = decompress_quaternion(compress_quaternion(q));
        assert!(out.w >= 0.0, "w sign not preserved for {q:?}");
        // Direction recovered within quantization tolerance.
        assert!(
            canonical.dot(out) > 0.9999,
            "dot {} for {q:?} -> {out:?}",
            canonical.dot(out)
        );
    }

    #[test]
    fn test_roundtrip_various() {
        check_roundtrip(Quat::IDENTITY);
        check_roundtrip(Quat::from_xyzw(0.5, 0.5, 0.5, 0.5));
        check_roundtrip(Quat::from_xyzw(0.3, -0.4, 0.2, 0.84));
        check_roundtrip(Quat::from_rotation_z(std::f32::consts::FRAC_PI_3));
        check_roundtrip(Quat::from_rotation_x(2.8));
    }

    #[test]
    fn test_negative_hemisphere_canonicalized() {
        let q = Quat::from_xyzw(0.1, 0.2, 0.3, -0.927).normalize();
        let out = decompress_quaternion(compress_quaternion(q));
        // Same rotation, opposite sign convention.
        assert!(q.dot(out).abs() > 0.9999);
        assert!(out.w >= 0.0);
    }

    #[test]
    fn test_w_zero_when_radicand_negative() {
        // All three components at their extreme negative quantization.
        let packed = 0u32 | (0 << 11) | (0 << 22); // x = y = 1.0, z = 1.0
        let out = decompress_quaternion(packed);
        assert!(out.is_finite());
        assert!(out.w.abs() < 1e-6);
    }
}
