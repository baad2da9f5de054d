//! Keyframe controller tracks

/// Interpolation mode of a controller track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    /// Bezier rows carry an in/out tangent triple per column.
    Bezier,
}

/// One keyframe row: a timestamp plus the payload floats.
///
/// For linear tracks `values.len()` equals the column count of the controller
/// type. For bezier tracks it is three times that: the key values followed by
/// the absolute in-tangents and out-tangents (the encoder stores tangents as
/// deltas relative to the key value; decode restores absolute values).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerRow {
    pub time: f32,
    pub values: Vec<f32>,
}

/// A typed, time-keyed property curve on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    /// Controller type id; the meaning depends on the node class, see the
    /// declarative table in `formats::mdl::controllers`.
    pub controller_type: u32,
    pub interpolation: Interpolation,
    pub rows: Vec<ControllerRow>,
}

impl Controller {
    pub fn new(controller_type: u32) -> Self {
        Self {
            controller_type,
            interpolation: Interpolation::Linear,
            rows: Vec::new(),
        }
    }

    /// Single-row convenience constructor (static value tracks).
    pub fn single(controller_type: u32, values: Vec<f32>) -> Self {
        Self {
            controller_type,
            interpolation: Interpolation::Linear,
            rows: vec![ControllerRow { time: 0.0, values }],
        }
    }

    /// Number of value columns per row, accounting for bezier tripling.
    pub fn columns(&self) -> usize {
        let per_row = self.rows.first().map_or(0, |r| r.values.len());
        match self.interpolation {
            Interpolation::Linear => per_row,
            Interpolation::Bezier => per_row / 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_account_for_bezier() {
        let mut c = Controller::single(8, vec![1.0, 2.0, 3.0]);
        assert_eq!(c.columns(), 3);
        c.interpolation = Interpolation::Bezier;
        c.rows[0].values = vec![0.0; 9];
        assert_eq!(c.columns(), 3);
    }
}
