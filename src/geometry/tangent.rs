//! Per-vertex tangent-space generation
//!
//! Solves the UV-to-position edge system per face and accumulates into the
//! face's vertices; the result is averaged per vertex and renormalized.

use glam::{Vec2, Vec3};

use crate::model::{Face, TangentFrame};

/// Compute a tangent frame for every vertex.
///
/// Faces whose indices fall outside the position or UV arrays are skipped
/// for this purpose (the stored geometry may legitimately carry fewer UVs).
/// Vertices with no usable contribution fall back to the +X/+Y frame.
pub fn compute_tangent_space(
    positions: &[Vec3],
    uvs: &[Vec2],
    faces: &[Face],
) -> Vec<TangentFrame> {
    let mut tangents = vec![Vec3::ZERO; positions.len()];
    let mut bitangents = vec![Vec3::ZERO; positions.len()];
    let mut counts = vec![0u32; positions.len()];

    for face in faces {
        let [i0, i1, i2] = face.indices.map(usize::from);
        let in_bounds = [i0, i1, i2]
            .iter()
            .all(|&i| i < positions.len() && i < uvs.len());
        if !in_bounds {
            continue;
        }

        let e1 = positions[i1] - positions[i0];
        let e2 = positions[i2] - positions[i0];
        let duv1 = uvs[i1] - uvs[i0];
        let duv2 = uvs[i2] - uvs[i0];

        let det = duv1.x * duv2.y - duv2.x * duv1.y;
        if det.abs() < f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let tangent = (e1 * duv2.y - e2 * duv1.y) * r;
        let bitangent = (e2 * duv1.x - e1 * duv2.x) * r;

        for i in [i0, i1, i2] {
            tangents[i] += tangent;
            bitangents[i] += bitangent;
            counts[i] += 1;
        }
    }

    (0..positions.len())
        .map(|i| {
            if counts[i] == 0 {
                return TangentFrame {
                    tangent: Vec3::X,
                    bitangent: Vec3::Y,
                };
            }
            let n = counts[i] as f32;
            let tangent = (tangents[i] / n).normalize_or_zero();
            let bitangent = (bitangents[i] / n).normalize_or_zero();
            TangentFrame {
                tangent: if tangent == Vec3::ZERO { Vec3::X } else { tangent },
                bitangent: if bitangent == Vec3::ZERO {
                    Vec3::Y
                } else {
                    bitangent
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_triangle_frame() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let uvs = [Vec2::ZERO, Vec2::X, Vec2::Y];
        let faces = [Face {
            indices: [0, 1, 2],
            ..Face::default()
        }];
        let frames = compute_tangent_space(&positions, &uvs, &faces);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!((frame.tangent - Vec3::X).length() < 1e-6);
            assert!((frame.bitangent - Vec3::Y).length() < 1e-6);
            // Both orthogonal to the face normal (+Z).
            assert!(frame.tangent.dot(Vec3::Z).abs() < 1e-6);
            assert!(frame.bitangent.dot(Vec3::Z).abs() < 1e-6);
        }
    }

    #[test]
    fn test_short_uv_array_is_skipped() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let uvs = [Vec2::ZERO]; // too short for the face
        let faces = [Face {
            indices: [0, 1, 2],
            ..Face::default()
        }];
        let frames = compute_tangent_space(&positions, &uvs, &faces);
        // Fallback frame, no panic, no NaN.
        assert_eq!(frames[0].tangent, Vec3::X);
        assert_eq!(frames[0].bitangent, Vec3::Y);
    }
}
