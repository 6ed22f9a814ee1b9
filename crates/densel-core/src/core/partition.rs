use super::colour::{DIFFERENCE_RED_THRESHOLD, Rgb};
use super::mesh::MeshGeometry;

/// Which lobe of a difference map a vertex or colour belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lobe {
    Positive,
    Negative,
}

impl Lobe {
    #[inline]
    pub fn of_red(red: f32) -> Self {
        if red < DIFFERENCE_RED_THRESHOLD {
            Lobe::Positive
        } else {
            Lobe::Negative
        }
    }
}

/// Colour-array offsets of every referenced vertex, grouped by lobe.
///
/// Computed once per full contour pass and reused to recolour the two lobe
/// buffers without re-partitioning the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColourIndexPartition {
    positive: Vec<usize>,
    negative: Vec<usize>,
    colour_len: usize,
}

/// The result of splitting an engine-coloured mesh into its two lobes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LobeSplit {
    pub positive_indices: Vec<u32>,
    pub negative_indices: Vec<u32>,
    pub partition: ColourIndexPartition,
}

impl ColourIndexPartition {
    /// Splits `mesh` into positive and negative lobes.
    ///
    /// Every referenced vertex is classified by the red channel of its own
    /// colour. Whole primitives follow the lobe of their first vertex so
    /// each lobe keeps a complete index list.
    pub fn split(mesh: &MeshGeometry) -> LobeSplit {
        let arity = mesh.primitive().arity();
        let vertex_count = mesh.colours.len() / 4;
        let mut seen = vec![false; vertex_count];
        let mut split = LobeSplit {
            partition: ColourIndexPartition {
                colour_len: mesh.colours.len(),
                ..Default::default()
            },
            ..Default::default()
        };

        for primitive in mesh.indices.chunks(arity) {
            let Some(&first) = primitive.first() else {
                continue;
            };
            let Some(&red) = mesh.colours.get(first as usize * 4) else {
                continue;
            };
            let target = match Lobe::of_red(red) {
                Lobe::Positive => &mut split.positive_indices,
                Lobe::Negative => &mut split.negative_indices,
            };
            target.extend_from_slice(primitive);

            for &index in primitive {
                let vertex = index as usize;
                if vertex >= vertex_count || seen[vertex] {
                    continue;
                }
                seen[vertex] = true;
                let offset = vertex * 4;
                match Lobe::of_red(mesh.colours[offset]) {
                    Lobe::Positive => split.partition.positive.push(offset),
                    Lobe::Negative => split.partition.negative.push(offset),
                }
            }
        }

        split
    }

    pub fn offsets(&self, lobe: Lobe) -> &[usize] {
        match lobe {
            Lobe::Positive => &self.positive,
            Lobe::Negative => &self.negative,
        }
    }

    /// Length of the colour array the partition was computed for.
    #[inline]
    pub fn colour_len(&self) -> usize {
        self.colour_len
    }

    /// Returns `true` when the partition can address `colours` directly.
    #[inline]
    pub fn fits(&self, colours: &[f32]) -> bool {
        colours.len() == self.colour_len
    }

    /// Overwrites the RGBA of every vertex in `lobe`. Returns the number of
    /// vertices written, or `None` if `colours` has a different length than
    /// the array the partition was computed for.
    pub fn recolour(
        &self,
        colours: &mut [f32],
        lobe: Lobe,
        colour: Rgb,
        alpha: f32,
    ) -> Option<usize> {
        if !self.fits(colours) {
            return None;
        }
        let rgba = colour.with_alpha(alpha);
        let offsets = self.offsets(lobe);
        for &offset in offsets {
            colours[offset..offset + 4].copy_from_slice(&rgba);
        }
        Some(offsets.len())
    }

    /// Rewrites only the alpha channel of every vertex in `lobe`.
    pub fn set_alpha(&self, colours: &mut [f32], lobe: Lobe, alpha: f32) -> Option<usize> {
        if !self.fits(colours) {
            return None;
        }
        let offsets = self.offsets(lobe);
        for &offset in offsets {
            colours[offset + 3] = alpha;
        }
        Some(offsets.len())
    }
}
