use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MeshError {
    #[error("{array} array has length {actual}, expected {expected}")]
    LengthMismatch {
        array: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Index {index} at position {position} exceeds vertex count {vertex_count}")]
    IndexOutOfRange {
        position: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Index count {count} is not a multiple of the {primitive:?} arity {arity}")]
    IncompletePrimitive {
        primitive: Primitive,
        count: usize,
        arity: usize,
    },

    #[error("Mesh reports {actual:?} primitives where {expected:?} were requested")]
    PrimitiveMismatch {
        expected: Primitive,
        actual: Primitive,
    },
}

/// Primitive topology of a contour mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Primitive {
    Triangles,
    Lines,
}

impl Primitive {
    #[inline]
    pub fn arity(self) -> usize {
        match self {
            Primitive::Triangles => 3,
            Primitive::Lines => 2,
        }
    }
}

/// Contour geometry as returned by the compute engine.
///
/// Vertices and normals are packed `xyz` triples, colours are packed `rgba`
/// quadruples, one per vertex. Indices reference vertices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshGeometry {
    pub primitive: Option<Primitive>,
    pub vertices: Vec<f32>,
    pub normals: Vec<f32>,
    pub colours: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    pub fn new(
        primitive: Primitive,
        vertices: Vec<f32>,
        normals: Vec<f32>,
        colours: Vec<f32>,
        indices: Vec<u32>,
    ) -> Self {
        Self {
            primitive: Some(primitive),
            vertices,
            normals,
            colours,
            indices,
        }
    }

    /// Primitive topology, defaulting to triangles when the engine omits it.
    #[inline]
    pub fn primitive(&self) -> Primitive {
        self.primitive.unwrap_or(Primitive::Triangles)
    }

    /// Settles the topology against the one the request asked for. An
    /// absent primitive takes the expected one.
    pub fn settle_primitive(&mut self, expected: Primitive) -> Result<(), MeshError> {
        match self.primitive {
            None => {
                self.primitive = Some(expected);
                Ok(())
            }
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(MeshError::PrimitiveMismatch { expected, actual }),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Checks that the packed arrays agree with each other.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.vertices.len() % 3 != 0 {
            return Err(MeshError::LengthMismatch {
                array: "vertex",
                expected: self.vertices.len() - self.vertices.len() % 3,
                actual: self.vertices.len(),
            });
        }
        let vertex_count = self.vertex_count();
        if self.normals.len() != vertex_count * 3 {
            return Err(MeshError::LengthMismatch {
                array: "normal",
                expected: vertex_count * 3,
                actual: self.normals.len(),
            });
        }
        if self.colours.len() != vertex_count * 4 {
            return Err(MeshError::LengthMismatch {
                array: "colour",
                expected: vertex_count * 4,
                actual: self.colours.len(),
            });
        }
        let primitive = self.primitive();
        if self.indices.len() % primitive.arity() != 0 {
            return Err(MeshError::IncompletePrimitive {
                primitive,
                count: self.indices.len(),
                arity: primitive.arity(),
            });
        }
        if let Some((position, &index)) = self
            .indices
            .iter()
            .enumerate()
            .find(|(_, i)| **i as usize >= vertex_count)
        {
            return Err(MeshError::IndexOutOfRange {
                position,
                index,
                vertex_count,
            });
        }
        Ok(())
    }
}
