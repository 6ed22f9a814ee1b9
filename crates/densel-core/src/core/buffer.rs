use super::mesh::{MeshGeometry, Primitive};
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Handle to a GPU-resident display buffer owned by a [`Renderer`].
    pub struct BufferId;
}

/// GPU-side triangle or line mesh state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayBuffer {
    pub primitive: Option<Primitive>,
    pub vertices: Vec<f32>,
    pub normals: Vec<f32>,
    pub colours: Vec<f32>,
    pub indices: Vec<u32>,
    pub transparent: bool,
    /// Uniform colour that overrides the per-vertex colours when set.
    pub custom_colour: Option<[f32; 4]>,
    /// Set when the arrays changed since the last aggregate rebuild.
    pub dirty: bool,
}

impl DisplayBuffer {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Replaces every array with the contents of `mesh`, reusing the existing
    /// allocations where they are large enough.
    pub fn overwrite_with(&mut self, mesh: &MeshGeometry, indices: &[u32]) {
        self.primitive = Some(mesh.primitive());
        replace(&mut self.vertices, &mesh.vertices);
        replace(&mut self.normals, &mesh.normals);
        replace(&mut self.colours, &mesh.colours);
        replace(&mut self.indices, indices);
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.normals.clear();
        self.colours.clear();
        self.indices.clear();
        self.custom_colour = None;
        self.dirty = true;
    }
}

fn replace<T: Copy>(dst: &mut Vec<T>, src: &[T]) {
    dst.clear();
    dst.extend_from_slice(src);
}

/// The GPU buffer-builder surface consumed by map controllers.
///
/// One renderer is shared by every map in a session. Implementations batch
/// uploads: per-buffer mutations only mark state, and the actual upload
/// happens in [`Renderer::build_buffers`].
pub trait Renderer: Send {
    /// Creates a new buffer from `mesh` restricted to `indices`.
    fn append_other_data(&mut self, mesh: &MeshGeometry, indices: &[u32]) -> BufferId;

    fn buffer(&self, id: BufferId) -> Option<&DisplayBuffer>;

    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut DisplayBuffer>;

    /// Sets or clears the uniform colour of a buffer.
    fn set_custom_colour(&mut self, id: BufferId, colour: Option<[f32; 4]>);

    /// Empties a buffer while keeping its handle alive.
    fn clear_buffers(&mut self, id: BufferId);

    /// Drops a buffer entirely.
    fn remove_buffer(&mut self, id: BufferId);

    /// Rebuilds aggregate GPU buffers from every dirty display buffer.
    fn build_buffers(&mut self);

    fn draw_scene(&mut self);
}

/// A headless renderer that keeps display buffers in memory and counts the
/// aggregate rebuilds and redraws it was asked for.
#[derive(Debug, Default)]
pub struct InMemoryRenderer {
    buffers: SlotMap<BufferId, DisplayBuffer>,
    builds: usize,
    draws: usize,
    uploaded_vertices: usize,
}

impl InMemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers_iter(&self) -> impl Iterator<Item = (BufferId, &DisplayBuffer)> {
        self.buffers.iter()
    }

    pub fn build_count(&self) -> usize {
        self.builds
    }

    pub fn draw_count(&self) -> usize {
        self.draws
    }

    /// Total vertices uploaded across all aggregate rebuilds.
    pub fn uploaded_vertices(&self) -> usize {
        self.uploaded_vertices
    }
}

impl Renderer for InMemoryRenderer {
    fn append_other_data(&mut self, mesh: &MeshGeometry, indices: &[u32]) -> BufferId {
        let mut buffer = DisplayBuffer::default();
        buffer.overwrite_with(mesh, indices);
        self.buffers.insert(buffer)
    }

    fn buffer(&self, id: BufferId) -> Option<&DisplayBuffer> {
        self.buffers.get(id)
    }

    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut DisplayBuffer> {
        self.buffers.get_mut(id)
    }

    fn set_custom_colour(&mut self, id: BufferId, colour: Option<[f32; 4]>) {
        if let Some(buffer) = self.buffers.get_mut(id) {
            buffer.custom_colour = colour;
            buffer.dirty = true;
        }
    }

    fn clear_buffers(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.get_mut(id) {
            buffer.clear();
        }
    }

    fn remove_buffer(&mut self, id: BufferId) {
        self.buffers.remove(id);
    }

    fn build_buffers(&mut self) {
        self.builds += 1;
        for (_, buffer) in self.buffers.iter_mut().filter(|(_, b)| b.dirty) {
            self.uploaded_vertices += buffer.vertices.len() / 3;
            buffer.dirty = false;
        }
    }

    fn draw_scene(&mut self) {
        self.draws += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mesh::tests::two_lobe_mesh;

    #[test]
    fn append_other_data_copies_selected_indices() {
        let mut renderer = InMemoryRenderer::new();
        let mesh = two_lobe_mesh();
        let id = renderer.append_other_data(&mesh, &[3, 4, 5]);

        let buffer = renderer.buffer(id).unwrap();
        assert_eq!(buffer.indices, vec![3, 4, 5]);
        assert_eq!(buffer.vertices.len(), mesh.vertices.len());
        assert!(buffer.dirty);
    }

    #[test]
    fn build_buffers_clears_dirty_flags_and_counts_upload() {
        let mut renderer = InMemoryRenderer::new();
        let id = renderer.append_other_data(&two_lobe_mesh(), &[0, 1, 2]);

        renderer.build_buffers();
        assert!(!renderer.buffer(id).unwrap().dirty);
        assert_eq!(renderer.uploaded_vertices(), 6);

        renderer.build_buffers();
        assert_eq!(renderer.uploaded_vertices(), 6);
        assert_eq!(renderer.build_count(), 2);
    }

    #[test]
    fn clear_buffers_keeps_handle_alive() {
        let mut renderer = InMemoryRenderer::new();
        let id = renderer.append_other_data(&two_lobe_mesh(), &[0, 1, 2]);
        renderer.set_custom_colour(id, Some([1.0, 0.0, 0.0, 1.0]));

        renderer.clear_buffers(id);

        let buffer = renderer.buffer(id).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.custom_colour, None);
        assert_eq!(renderer.buffer_count(), 1);
    }

    #[test]
    fn removed_buffer_is_gone() {
        let mut renderer = InMemoryRenderer::new();
        let id = renderer.append_other_data(&two_lobe_mesh(), &[0, 1, 2]);
        renderer.remove_buffer(id);
        assert!(renderer.buffer(id).is_none());
        renderer.set_custom_colour(id, None);
    }

    #[test]
    fn overwrite_with_reuses_allocation() {
        let mesh = two_lobe_mesh();
        let mut buffer = DisplayBuffer::default();
        buffer.overwrite_with(&mesh, &mesh.indices);
        let capacity = buffer.vertices.capacity();
        let pointer = buffer.vertices.as_ptr();

        buffer.overwrite_with(&mesh, &mesh.indices[..3]);

        assert_eq!(buffer.vertices.capacity(), capacity);
        assert_eq!(buffer.vertices.as_ptr(), pointer);
        assert_eq!(buffer.indices.len(), 3);
    }
}
