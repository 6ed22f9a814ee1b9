use serde::{Deserialize, Serialize};

/// Alpha at or above which a map is drawn through the uniform custom-colour path.
pub const OPAQUE_ALPHA_THRESHOLD: f32 = 0.98;

/// Alpha below which display buffers are flagged as transparent.
pub const TRANSPARENT_ALPHA_THRESHOLD: f32 = 0.99;

/// Red-channel value that separates the positive lobe from the negative lobe
/// in engine-coloured difference-map meshes.
pub const DIFFERENCE_RED_THRESHOLD: f32 = 0.5;

/// An RGB colour with channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Returns a copy with every channel clamped to `[0, 1]`.
    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn with_alpha(self, alpha: f32) -> [f32; 4] {
        [self.r, self.g, self.b, alpha]
    }
}

impl From<[f32; 3]> for Rgb {
    fn from(c: [f32; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

#[inline]
pub fn is_opaque(alpha: f32) -> bool {
    alpha >= OPAQUE_ALPHA_THRESHOLD
}

#[inline]
pub fn is_transparent(alpha: f32) -> bool {
    alpha < TRANSPARENT_ALPHA_THRESHOLD
}

/// Writes `colour` into every RGBA quadruple of `colours`.
pub fn fill_rgba(colours: &mut [f32], colour: [f32; 4]) {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        colours
            .par_chunks_exact_mut(4)
            .for_each(|chunk| chunk.copy_from_slice(&colour));
    }
    #[cfg(not(feature = "parallel"))]
    {
        colours
            .chunks_exact_mut(4)
            .for_each(|chunk| chunk.copy_from_slice(&colour));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_limits_channels_to_unit_range() {
        let c = Rgb::new(-0.5, 0.5, 1.5).clamped();
        assert_eq!(c, Rgb::new(0.0, 0.5, 1.0));
    }

    #[test]
    fn opacity_thresholds_are_distinct() {
        assert!(is_opaque(1.0));
        assert!(is_opaque(0.98));
        assert!(!is_opaque(0.97));
        assert!(is_transparent(0.985));
        assert!(!is_transparent(0.99));
    }

    #[test]
    fn fill_rgba_overwrites_every_vertex() {
        let mut colours = vec![0.0; 12];
        fill_rgba(&mut colours, [0.1, 0.2, 0.3, 0.4]);
        for chunk in colours.chunks_exact(4) {
            assert_eq!(chunk, [0.1, 0.2, 0.3, 0.4]);
        }
    }

    #[test]
    fn fill_rgba_ignores_trailing_partial_quadruple() {
        let mut colours = vec![0.0; 6];
        fill_rgba(&mut colours, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&colours[4..], &[0.0, 0.0]);
    }
}
