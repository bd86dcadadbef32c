//! Procedural shapes, all position (float3) + texcoord (float2).

use glam::{Vec2, Vec3};

use super::{MeshSubmission, Vertex};

/// Unit quad in the XY plane, centered at the origin.
pub fn quad() -> MeshSubmission {
    let vertices = vec![
        Vertex::position_uv(Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 1.0)),
        Vertex::position_uv(Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 1.0)),
        Vertex::position_uv(Vec3::new(0.5, 0.5, 0.0), Vec2::new(1.0, 0.0)),
        Vertex::position_uv(Vec3::new(-0.5, 0.5, 0.0), Vec2::new(0.0, 0.0)),
    ];
    MeshSubmission::from_trusted(vertices, vec![0, 1, 2, 2, 3, 0])
}

/// A `columns` x `rows` grid of unit tiles in the XZ plane, one submission
/// per tile.
///
/// Adjacent tiles repeat the vertices on their shared edge. Texture
/// coordinates span the whole plane so shared edges produce identical
/// tuples and collapse in a [`MeshData`](super::MeshData).
pub fn tiled_plane(columns: u32, rows: u32) -> Vec<MeshSubmission> {
    let width = columns.max(1) as f32;
    let depth = rows.max(1) as f32;
    let corner = |x: u32, z: u32| {
        let (x, z) = (x as f32, z as f32);
        Vertex::position_uv(Vec3::new(x, 0.0, z), Vec2::new(x / width, z / depth))
    };

    let mut tiles = Vec::with_capacity((columns as usize) * (rows as usize));
    for z in 0..rows {
        for x in 0..columns {
            let vertices = vec![
                corner(x, z),
                corner(x + 1, z),
                corner(x + 1, z + 1),
                corner(x, z + 1),
            ];
            tiles.push(MeshSubmission::from_trusted(vertices, vec![0, 2, 1, 0, 3, 2]));
        }
    }
    tiles
}

/// Unit cube centered at the origin, four vertices per face.
pub fn cube() -> MeshSubmission {
    // (normal, up) per face; right = up x normal
    let faces = [
        (Vec3::Z, Vec3::Y),
        (-Vec3::Z, Vec3::Y),
        (Vec3::X, Vec3::Y),
        (-Vec3::X, Vec3::Y),
        (Vec3::Y, -Vec3::Z),
        (-Vec3::Y, Vec3::Z),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, up)) in faces.into_iter().enumerate() {
        let right = up.cross(normal);
        let center = normal * 0.5;
        let base = (face * 4) as u32;
        for (u, v) in [(0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)] {
            let position = center + right * (u - 0.5) + up * (0.5 - v);
            vertices.push(Vertex::position_uv(position, Vec2::new(u, v)));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    MeshSubmission::from_trusted(vertices, indices)
}
