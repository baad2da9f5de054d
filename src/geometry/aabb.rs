//! AABB collision-tree construction
//!
//! Builds the binary bounding-volume tree stored by aabb meshes: a median
//! split over face centroids along the largest box extent, one leaf per face.

use glam::Vec3;

use crate::model::{AabbNode, AabbNodeKind, AabbTree, Face};

/// Build a collision tree over a mesh's faces. Leaf count equals face count;
/// an empty face list yields an empty tree.
pub fn build_aabb_tree(positions: &[Vec3], faces: &[Face]) -> AabbTree {
    if faces.is_empty() {
        return AabbTree { root: None };
    }
    let centroids: Vec<Vec3> = faces
        .iter()
        .map(|f| {
            let mut sum = Vec3::ZERO;
            for &i in &f.indices {
                sum += positions.get(i as usize).copied().unwrap_or(Vec3::ZERO);
            }
            sum / 3.0
        })
        .collect();
    let mut face_ids: Vec<u32> = (0..faces.len() as u32).collect();
    let root = split(positions, faces, &centroids, &mut face_ids);
    AabbTree {
        root: Some(Box::new(root)),
    }
}

fn face_bounds(positions: &[Vec3], faces: &[Face], face_ids: &[u32]) -> (Vec3, Vec3) {
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for &id in face_ids {
        for &i in &faces[id as usize].indices {
            if let Some(&v) = positions.get(i as usize) {
                min = min.min(v);
                max = max.max(v);
            }
        }
    }
    (min, max)
}

fn split(positions: &[Vec3], faces: &[Face], centroids: &[Vec3], face_ids: &mut [u32]) -> AabbNode {
    let (min, max) = face_bounds(positions, faces, face_ids);
    if let [face] = *face_ids {
        return AabbNode {
            min,
            max,
            kind: AabbNodeKind::Leaf { face },
        };
    }

    // Largest extent wins; ties go to the later axis in X→Y→Z order.
    let extent = max - min;
    let mut axis = 0usize;
    if extent.y >= extent[axis] {
        axis = 1;
    }
    if extent.z >= extent[axis] {
        axis = 2;
    }

    face_ids.sort_unstable_by(|&a, &b| {
        centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
    });
    let mid = face_ids.len() / 2;
    let (left_ids, right_ids) = face_ids.split_at_mut(mid);
    let left = split(positions, faces, centroids, left_ids);
    let right = split(positions, faces, centroids, right_ids);

    AabbNode {
        min,
        max,
        kind: AabbNodeKind::Branch {
            left: Box::new(left),
            right: Box::new(right),
            plane: 1 << axis,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_mesh(n: usize) -> (Vec<Vec3>, Vec<Face>) {
        // n quads along X, two triangles each.
        let mut positions = Vec::new();
        let mut faces = Vec::new();
        for i in 0..=n {
            positions.push(Vec3::new(i as f32, 0.0, 0.0));
            positions.push(Vec3::new(i as f32, 1.0, 0.0));
        }
        for i in 0..n as u16 {
            let a = 2 * i;
            faces.push(Face {
                indices: [a, a + 1, a + 2],
                ..Face::default()
            });
            faces.push(Face {
                indices: [a + 1, a + 3, a + 2],
                ..Face::default()
            });
        }
        (positions, faces)
    }

    fn check_containment(node: &AabbNode) {
        if let AabbNodeKind::Branch { left, right, .. } = &node.kind {
            for child in [left, right] {
                assert!(node.min.cmple(child.min).all());
                assert!(node.max.cmpge(child.max).all());
                check_containment(child);
            }
        }
    }

    #[test]
    fn test_leaf_count_matches_faces() {
        let (positions, faces) = grid_mesh(17);
        let tree = build_aabb_tree(&positions, &faces);
        assert_eq!(tree.leaf_count(), faces.len());
    }

    #[test]
    fn test_branch_contains_children() {
        let (positions, faces) = grid_mesh(9);
        let tree = build_aabb_tree(&positions, &faces);
        check_containment(tree.root.as_deref().unwrap());
    }

    #[test]
    fn test_height_is_logarithmic() {
        let (positions, faces) = grid_mesh(64);
        let tree = build_aabb_tree(&positions, &faces);
        // 128 faces, median split: ceil(log2(128)) + 1 levels.
        assert!(tree.height() <= 8);
    }

    #[test]
    fn test_single_face_is_leaf() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let faces = vec![Face {
            indices: [0, 1, 2],
            ..Face::default()
        }];
        let tree = build_aabb_tree(&positions, &faces);
        let root = tree.root.as_deref().unwrap();
        assert!(matches!(root.kind, AabbNodeKind::Leaf { face: 0 }));
    }
}
