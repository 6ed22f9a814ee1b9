//! # Maps Module
//!
//! The volumetric entity layer: one [`controller::MapController`] per loaded
//! density map.
//!
//! A map moves through `Unloaded → Loading → Loaded → Contoured → Disposed`.
//! Loading reads CCP4 or MTZ data from a [`source::ByteSource`] and fetches the
//! engine's suggested display settings; contouring requests a mesh for the
//! current [`settings::DisplaySettings`] and hands it to the buffer
//! synchronization in [`crate::core::sync`]. Colour and alpha changes recolour
//! the existing buffers without asking the engine for a new mesh.
//!
//! Standard and difference maps are separate variants of
//! [`controller::MapVariant`]; a difference map always owns two lobe buffers
//! and never takes the single-colour path.

pub mod controller;
pub mod settings;
pub mod source;
