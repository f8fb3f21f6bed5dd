//! Mesh helpers for deferred scenes.
//!
//! All meshes here carry position, normal and uv, the vertex layout the
//! deferred passes draw. Sizes follow the unit conventions the demo scenes
//! are authored against: a 1x1x1 cube, a 1x1 plane and a 0.5 radius sphere.

use bevy::prelude::*;
use bevy_mesh::Indices;

/// Largest subdivision count accepted by [`icosphere`].
pub const MAX_ICOSPHERE_SUBDIVISIONS: u32 = 80;

/// Radius of the light marker sphere.
pub const LIGHT_SPHERE_RADIUS: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveError {
    TooManySubdivisions { requested: u32 },
    MissingAttribute(&'static str),
}

impl std::fmt::Display for PrimitiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveError::TooManySubdivisions { requested } => write!(
                f,
                "icosphere with {} subdivisions exceeds the maximum of {}",
                requested, MAX_ICOSPHERE_SUBDIVISIONS
            ),
            PrimitiveError::MissingAttribute(name) => write!(f, "mesh has no {} data", name),
        }
    }
}

impl std::error::Error for PrimitiveError {}

/// Axis-aligned cube centered at the origin with edge length 1.
pub fn unit_cube() -> Mesh {
    Cuboid::new(1.0, 1.0, 1.0).mesh().build()
}

/// Plane facing +Y, centered at the origin, 1x1.
pub fn unit_plane() -> Mesh {
    Plane3d::default().mesh().size(1.0, 1.0).build()
}

/// Subdivided icosahedron of `radius`.
pub fn icosphere(subdivisions: u32, radius: f32) -> Result<Mesh, PrimitiveError> {
    if subdivisions >= MAX_ICOSPHERE_SUBDIVISIONS {
        return Err(PrimitiveError::TooManySubdivisions {
            requested: subdivisions,
        });
    }
    Sphere::new(radius)
        .mesh()
        .ico(subdivisions)
        .map_err(|_| PrimitiveError::TooManySubdivisions {
            requested: subdivisions,
        })
}

/// Vertex positions and a u32 index list, for uploading a mesh by hand.
///
/// Non-indexed meshes get a sequential index list.
pub fn positions_and_indices(mesh: &Mesh) -> Result<(Vec<[f32; 3]>, Vec<u32>), PrimitiveError> {
    let positions = mesh
        .attribute(Mesh::ATTRIBUTE_POSITION)
        .and_then(|values| values.as_float3())
        .ok_or(PrimitiveError::MissingAttribute("position"))?
        .to_vec();

    let indices = match mesh.indices() {
        Some(Indices::U16(indices)) => indices.iter().map(|&i| i as u32).collect(),
        Some(Indices::U32(indices)) => indices.clone(),
        None => (0..positions.len() as u32).collect(),
    };

    Ok((positions, indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icosphere_vertices_lie_on_radius() {
        let mesh = icosphere(2, LIGHT_SPHERE_RADIUS).unwrap();
        let (positions, indices) = positions_and_indices(&mesh).unwrap();

        assert!(!positions.is_empty());
        assert_eq!(indices.len() % 3, 0);
        for p in positions {
            let length = Vec3::from_array(p).length();
            assert!((length - LIGHT_SPHERE_RADIUS).abs() < 1e-4);
        }
    }

    #[test]
    fn test_icosphere_rejects_excessive_subdivision() {
        assert_eq!(
            icosphere(200, 1.0).unwrap_err(),
            PrimitiveError::TooManySubdivisions { requested: 200 }
        );
    }

    #[test]
    fn test_helpers_carry_deferred_attributes() {
        for mesh in [unit_cube(), unit_plane()] {
            assert!(mesh.attribute(Mesh::ATTRIBUTE_POSITION).is_some());
            assert!(mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_some());
            assert!(mesh.attribute(Mesh::ATTRIBUTE_UV_0).is_some());
        }
    }

    #[test]
    fn test_unit_cube_spans_one_unit() {
        let (positions, _) = positions_and_indices(&unit_cube()).unwrap();
        let max = positions
            .iter()
            .fold(f32::MIN, |acc, p| acc.max(p[0]).max(p[1]).max(p[2]));
        assert!((max - 0.5).abs() < 1e-6);
    }
}
