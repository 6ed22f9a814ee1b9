//! Buffer synchronization: turning a fresh contour mesh into display buffers,
//! and recolouring existing buffers without a new mesh.
//!
//! Standard maps own at most one buffer; difference maps own exactly two
//! (positive and negative lobe). Callers rebuild and redraw once per pass
//! through [`finish_pass`], never once per buffer.

use super::buffer::{BufferId, Renderer};
use super::colour::{Rgb, fill_rgba, is_opaque, is_transparent};
use super::mesh::MeshGeometry;
use super::partition::{ColourIndexPartition, Lobe};
use tracing::trace;

/// The pair of buffers backing a contoured difference map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifferenceBuffers {
    pub positive: BufferId,
    pub negative: BufferId,
}

impl DifferenceBuffers {
    pub fn get(&self, lobe: Lobe) -> BufferId {
        match lobe {
            Lobe::Positive => self.positive,
            Lobe::Negative => self.negative,
        }
    }
}

/// How a contour pass landed in the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No buffer existed, a new one was created.
    Created,
    /// The existing buffer's arrays were overwritten in place.
    MutatedInPlace,
    /// The existing buffer was discarded and a new one created.
    Replaced,
}

/// How a colour change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecolourPath {
    /// A uniform custom colour was set; vertex colour arrays were untouched.
    Uniform,
    /// Every affected vertex colour was rewritten.
    PerVertex,
    /// Nothing to recolour.
    Skipped,
}

/// Display parameters of a standard (single-colour) map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardStyle {
    pub colour: Rgb,
    pub alpha: f32,
    /// Keep the per-vertex colours assigned by the engine.
    pub keep_engine_colours: bool,
}

/// Display parameters of a difference map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceStyle {
    pub positive: Rgb,
    pub negative: Rgb,
    pub alpha: f32,
}

impl DifferenceStyle {
    pub fn colour(&self, lobe: Lobe) -> Rgb {
        match lobe {
            Lobe::Positive => self.positive,
            Lobe::Negative => self.negative,
        }
    }
}

pub fn sync_standard(
    renderer: &mut dyn Renderer,
    existing: Option<BufferId>,
    mut mesh: MeshGeometry,
    style: StandardStyle,
) -> (BufferId, SyncOutcome) {
    if style.keep_engine_colours {
        let (id, outcome) = replace_buffer(renderer, existing, &mesh);
        renderer.set_custom_colour(id, None);
        mark_transparency(renderer, id, style.alpha);
        return (id, outcome);
    }

    let custom = if is_opaque(style.alpha) {
        Some(style.colour.with_alpha(1.0))
    } else {
        fill_rgba(&mut mesh.colours, style.colour.with_alpha(style.alpha));
        None
    };

    let reusable = existing.filter(|&id| {
        renderer
            .buffer(id)
            .is_some_and(|b| b.primitive == Some(mesh.primitive()))
    });

    let (id, outcome) = match reusable {
        Some(id) => {
            if let Some(buffer) = renderer.buffer_mut(id) {
                buffer.overwrite_with(&mesh, &mesh.indices);
            }
            trace!("Mutated map buffer in place ({} indices).", mesh.indices.len());
            (id, SyncOutcome::MutatedInPlace)
        }
        None => replace_buffer(renderer, existing, &mesh),
    };

    renderer.set_custom_colour(id, custom);
    mark_transparency(renderer, id, style.alpha);
    (id, outcome)
}

pub fn sync_difference(
    renderer: &mut dyn Renderer,
    existing: Option<DifferenceBuffers>,
    mesh: MeshGeometry,
    style: DifferenceStyle,
) -> (DifferenceBuffers, ColourIndexPartition) {
    let split = ColourIndexPartition::split(&mesh);
    trace!(
        "Difference mesh split: {} positive, {} negative indices.",
        split.positive_indices.len(),
        split.negative_indices.len()
    );

    if let Some(old) = existing {
        for id in [old.positive, old.negative] {
            renderer.clear_buffers(id);
            renderer.remove_buffer(id);
        }
    }

    let buffers = DifferenceBuffers {
        positive: renderer.append_other_data(&mesh, &split.positive_indices),
        negative: renderer.append_other_data(&mesh, &split.negative_indices),
    };
    recolour_difference(renderer, buffers, &split.partition, style, None);

    (buffers, split.partition)
}

pub fn recolour_standard(
    renderer: &mut dyn Renderer,
    id: BufferId,
    colour: Rgb,
    alpha: f32,
) -> RecolourPath {
    if renderer.buffer(id).is_none() {
        return RecolourPath::Skipped;
    }
    let path = if is_opaque(alpha) {
        renderer.set_custom_colour(id, Some(colour.with_alpha(1.0)));
        RecolourPath::Uniform
    } else {
        renderer.set_custom_colour(id, None);
        if let Some(buffer) = renderer.buffer_mut(id) {
            fill_rgba(&mut buffer.colours, colour.with_alpha(alpha));
            buffer.dirty = true;
        }
        RecolourPath::PerVertex
    };
    mark_transparency(renderer, id, alpha);
    path
}

/// Recolours one lobe, or both when `lobe` is `None`.
pub fn recolour_difference(
    renderer: &mut dyn Renderer,
    buffers: DifferenceBuffers,
    partition: &ColourIndexPartition,
    style: DifferenceStyle,
    lobe: Option<Lobe>,
) -> RecolourPath {
    let lobes: &[Lobe] = match lobe {
        Some(Lobe::Positive) => &[Lobe::Positive],
        Some(Lobe::Negative) => &[Lobe::Negative],
        None => &[Lobe::Positive, Lobe::Negative],
    };

    let mut path = RecolourPath::Skipped;
    for &lobe in lobes {
        let id = buffers.get(lobe);
        if renderer.buffer(id).is_none() {
            continue;
        }
        let colour = style.colour(lobe);
        if is_opaque(style.alpha) {
            renderer.set_custom_colour(id, Some(colour.with_alpha(1.0)));
            path = RecolourPath::Uniform;
        } else {
            renderer.set_custom_colour(id, None);
            if let Some(buffer) = renderer.buffer_mut(id) {
                partition.recolour(&mut buffer.colours, lobe, colour, style.alpha);
                buffer.dirty = true;
            }
            path = RecolourPath::PerVertex;
        }
        mark_transparency(renderer, id, style.alpha);
    }
    path
}

/// Changes only the alpha channel of a buffer, keeping its per-vertex
/// engine colours.
pub fn recolour_alpha(renderer: &mut dyn Renderer, id: BufferId, alpha: f32) -> RecolourPath {
    let Some(buffer) = renderer.buffer_mut(id) else {
        return RecolourPath::Skipped;
    };
    for rgba in buffer.colours.chunks_exact_mut(4) {
        rgba[3] = alpha;
    }
    buffer.dirty = true;
    buffer.transparent = is_transparent(alpha);
    RecolourPath::PerVertex
}

/// Rebuilds aggregate buffers and redraws exactly once.
pub fn finish_pass(renderer: &mut dyn Renderer) {
    renderer.build_buffers();
    renderer.draw_scene();
}

fn replace_buffer(
    renderer: &mut dyn Renderer,
    existing: Option<BufferId>,
    mesh: &MeshGeometry,
) -> (BufferId, SyncOutcome) {
    let outcome = match existing {
        Some(old) => {
            renderer.clear_buffers(old);
            renderer.remove_buffer(old);
            SyncOutcome::Replaced
        }
        None => SyncOutcome::Created,
    };
    (renderer.append_other_data(mesh, &mesh.indices), outcome)
}

fn mark_transparency(renderer: &mut dyn Renderer, id: BufferId, alpha: f32) {
    if let Some(buffer) = renderer.buffer_mut(id) {
        buffer.transparent = is_transparent(alpha);
    }
}
