//! # Core Module
//!
//! Stateless building blocks shared by the engine and map layers: contour
//! mesh geometry, colours, the difference-map colour partition, display
//! buffers with the [`buffer::Renderer`] abstraction, and the buffer
//! synchronization strategy in [`sync`].

pub mod buffer;
pub mod colour;
pub mod mesh;
pub mod partition;
pub mod sync;
