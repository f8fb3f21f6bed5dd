//! Mesh extraction for deferred rendering.
//!
//! Each frame the (mesh, world transform, material) tuples of all
//! [`DeferredRenderable`] entities are copied into the render world, then
//! turned into per-mesh bind groups that the geometry and shadow passes share.

use bevy::prelude::*;
use bevy::render::{
    mesh::{allocator::MeshAllocator, RenderMesh, RenderMeshBufferInfo},
    render_asset::RenderAssets,
    render_phase::TrackedRenderPass,
    render_resource::{BindGroup, BindGroupEntry, BufferInitDescriptor, BufferUsages},
    renderer::RenderDevice,
    Extract,
};

use super::gbuffer_geometry::{DeferredLayouts, DeferredMeshUniform};
use super::material::{DeferredRenderable, SolidMaterial};

/// Extracted mesh data for one deferred draw.
#[derive(Clone, Debug)]
pub struct ExtractedDeferredMesh {
    pub mesh: AssetId<Mesh>,
    pub world_from_local: Mat4,
    pub albedo_spec: [f32; 4],
}

/// Meshes to draw this frame, in main-world query order.
#[derive(Resource, Default)]
pub struct ExtractedDeferredMeshes {
    pub meshes: Vec<ExtractedDeferredMesh>,
}

/// System to extract deferred renderable meshes to the render world.
///
/// Uses inherited (hierarchy) visibility rather than per-camera visibility so
/// off-screen meshes still cast shadows.
pub fn extract_deferred_meshes(
    mut commands: Commands,
    meshes_query: Extract<
        Query<
            (&GlobalTransform, &Mesh3d, &SolidMaterial, &InheritedVisibility),
            With<DeferredRenderable>,
        >,
    >,
) {
    let meshes = meshes_query
        .iter()
        .filter(|(_, _, _, visibility)| visibility.get())
        .map(|(transform, mesh, material, _)| ExtractedDeferredMesh {
            mesh: mesh.0.id(),
            world_from_local: transform.to_matrix(),
            albedo_spec: material.to_rgba_f32(),
        })
        .collect();

    commands.insert_resource(ExtractedDeferredMeshes { meshes });
}

/// A mesh ready to draw: GPU mesh id plus its transform/material bind group.
pub struct DeferredMeshDraw {
    pub mesh: AssetId<Mesh>,
    pub bind_group: BindGroup,
}

/// Per-frame draw list shared by the geometry and shadow passes.
#[derive(Resource, Default)]
pub struct DeferredMeshBatch {
    pub draws: Vec<DeferredMeshDraw>,
}

/// True when the GPU mesh carries exactly position, normal and uv.
fn has_deferred_layout(mesh: &RenderMesh) -> bool {
    mesh.layout.0.attribute_ids()
        == [
            Mesh::ATTRIBUTE_POSITION.id,
            Mesh::ATTRIBUTE_NORMAL.id,
            Mesh::ATTRIBUTE_UV_0.id,
        ]
}

/// System to build per-mesh bind groups for the current frame.
pub fn prepare_deferred_meshes(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layouts: Res<DeferredLayouts>,
    render_meshes: Res<RenderAssets<RenderMesh>>,
    extracted: Option<Res<ExtractedDeferredMeshes>>,
) {
    let mut batch = DeferredMeshBatch::default();

    for mesh in extracted.iter().flat_map(|e| e.meshes.iter()) {
        // Not uploaded yet; it will show up in a later frame.
        let Some(gpu_mesh) = render_meshes.get(mesh.mesh) else {
            continue;
        };
        if !has_deferred_layout(gpu_mesh) {
            warn_once!("Skipping deferred mesh without a position/normal/uv vertex layout");
            continue;
        }

        let mesh_uniform = DeferredMeshUniform::new(mesh.world_from_local, mesh.albedo_spec);
        let uniform_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("deferred_mesh_uniform"),
            contents: bytemuck::bytes_of(&mesh_uniform),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = render_device.create_bind_group(
            Some("deferred_mesh_bind_group"),
            &layouts.mesh,
            &[BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        );

        batch.draws.push(DeferredMeshDraw {
            mesh: mesh.mesh,
            bind_group,
        });
    }

    if !batch.draws.is_empty() {
        debug!("Prepared {} meshes for deferred rendering", batch.draws.len());
    }
    commands.insert_resource(batch);
}

/// Record every mesh in `batch`, binding its uniforms at `mesh_group`.
///
/// The caller sets the pipeline and any other bind groups first.
pub fn draw_deferred_meshes<'w>(
    render_pass: &mut TrackedRenderPass<'w>,
    world: &'w World,
    batch: &'w DeferredMeshBatch,
    mesh_group: usize,
) {
    let mesh_allocator = world.resource::<MeshAllocator>();
    let render_meshes = world.resource::<RenderAssets<RenderMesh>>();

    for draw in &batch.draws {
        let Some(gpu_mesh) = render_meshes.get(draw.mesh) else {
            continue;
        };
        let Some(vertex_slice) = mesh_allocator.mesh_vertex_slice(&draw.mesh) else {
            continue;
        };

        render_pass.set_bind_group(mesh_group, &draw.bind_group, &[]);
        render_pass.set_vertex_buffer(0, vertex_slice.buffer.slice(..));

        match &gpu_mesh.buffer_info {
            RenderMeshBufferInfo::Indexed {
                count,
                index_format,
            } => {
                let Some(index_slice) = mesh_allocator.mesh_index_slice(&draw.mesh) else {
                    continue;
                };
                render_pass.set_index_buffer(index_slice.buffer.slice(..), 0, *index_format);
                render_pass.draw_indexed(
                    index_slice.range.start..(index_slice.range.start + count),
                    vertex_slice.range.start as i32,
                    0..1,
                );
            }
            RenderMeshBufferInfo::NonIndexed => {
                render_pass.draw(vertex_slice.range.clone(), 0..1);
            }
        }
    }
}
