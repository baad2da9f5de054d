//! Geometry algorithms consumed by the writer and by authoring tools

pub mod aabb;
pub mod tangent;

pub use aabb::build_aabb_tree;
pub use tangent::compute_tangent_space;
