//! Light node payload

use glam::Vec3;

/// Dynamic light source with optional lens-flare elements.
///
/// The four flare arrays are parallel per flare element; texture names are
/// stored as an offset array of nul-terminated strings on disk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Light {
    pub flare_radius: f32,
    pub flare_sizes: Vec<f32>,
    pub flare_positions: Vec<f32>,
    pub flare_color_shifts: Vec<Vec3>,
    pub flare_textures: Vec<String>,
    pub priority: u32,
    pub ambient_only: bool,
    pub dynamic_type: u32,
    pub affect_dynamic: bool,
    pub shadow: bool,
    pub flare: bool,
    pub fading: bool,
}

impl Light {
    /// Number of lens-flare elements (length of the parallel arrays).
    pub fn flare_count(&self) -> usize {
        self.flare_sizes.len()
    }
}
