//! # densel
//!
//! Asynchronous compute-engine messaging and contour buffer synchronization
//! for molecular graphics front-ends.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models: contour meshes, colours,
//!   the difference-map colour partition, display buffers behind the
//!   [`core::buffer::Renderer`] trait, and the buffer synchronization strategy.
//!
//! - **[`engine`]: The Messaging Core.** The stateful link to the compute engine.
//!   A `ChannelAdapter` correlates concurrent requests with their replies, and a
//!   `CommandCentre` issues semantic commands on top of it, journaling the ones
//!   that mutate persistent state.
//!
//! - **[`maps`]: The Public API.** Map controllers that load volumetric data,
//!   request contour meshes and keep the renderer's buffers in sync with their
//!   display parameters.

pub mod core;
pub mod engine;
pub mod maps;
