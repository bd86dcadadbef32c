//! Lifecycle integration tests.
//!
//! Each case runs once per backend kind against the dummy backend.

mod common;

use rstest::rstest;

use common::{captured, context, position_model, read_f32s, read_u32s, triangle};
use gfx_lifecycle::mesh::generators;
use gfx_lifecycle::resource::GpuResource;
use gfx_lifecycle::{
    BackendCall, BackendKind, BufferDescriptor, BufferObject, BufferUsage, ContextConfig,
    Diagnostics, DummyBackend, EmptyDataPolicy, FailPoint, GpuBackend, GpuResources, LifecycleError,
    MemoryProperties, MeshData, MeshSubmission, Model, ModelConfig, RenderContext, Vertex,
    VertexLayout,
};

// ============================================================================
// Resource destruction
// ============================================================================

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_destroy_twice_tears_down_once(#[case] kind: BackendKind) {
    common::init_logging();
    let diag = Diagnostics::capturing("destroy", 64);
    let mut backend = DummyBackend::new(kind);
    let desc = BufferDescriptor::new("scratch", 32, BufferUsage::VERTEX)
        .with_memory(MemoryProperties::HOST_SHARED);

    let mut buffer = BufferObject::create(&mut backend, &desc, &diag).unwrap();
    buffer.destroy(&mut backend, &diag).unwrap();
    buffer.destroy(&mut backend, &diag).unwrap();

    assert_eq!(backend.teardown_count(), 1);
    assert_eq!(backend.live_objects(), 0);
    assert!(buffer.is_destroyed());

    let entries = diag.capture().unwrap().lock();
    assert_eq!(entries.count(log::Level::Warn), 1);
    assert_eq!(entries.count(log::Level::Error), 0);
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_flush_destroys_queued_id_once(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    ctx.setup().unwrap();

    let id = ctx
        .resources_mut()
        .create_buffer(&BufferDescriptor::new("doomed", 16, BufferUsage::UNIFORM))
        .unwrap();
    ctx.resources_mut().enqueue_destroy_buffer(id);
    ctx.resources_mut().enqueue_destroy_buffer(id);
    assert_eq!(ctx.resources().pending_count(), 2);

    let report = ctx.per_frame_maintenance().unwrap();
    assert_eq!(report.destroyed, 1);
    assert_eq!(ctx.backend().teardown_count(), 1);
    assert_eq!(ctx.resources().pending_count(), 0);
    {
        let entries = captured(&ctx);
        assert_eq!(entries.matching(log::Level::Error, "could not be found").count(), 1);
    }

    // Nothing left to do on the next frame.
    let report = ctx.per_frame_maintenance().unwrap();
    assert_eq!(report.destroyed, 0);
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_teardown_leaves_no_live_objects(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let key = ctx.add_model(position_model("scene")).unwrap();
    ctx.setup().unwrap();
    ctx.model_mut(key).unwrap().add_mesh(triangle(0.0)).unwrap();
    ctx.per_frame_maintenance().unwrap();

    let pixels = vec![255u8; 2 * 2 * 4];
    let texture = ctx
        .resources_mut()
        .create_texture(gfx_lifecycle::TextureDescriptor::new(
            "albedo",
            2,
            2,
            gfx_lifecycle::TextureFormat::Rgba8,
        ))
        .unwrap();
    ctx.resources_mut().upload_texture(texture, &pixels).unwrap();
    assert_eq!(ctx.backend().texture_contents(texture), Some(pixels.as_slice()));

    // vao + vbo + ebo + texture
    assert_eq!(ctx.teardown().unwrap(), 4);
    assert_eq!(ctx.backend().live_objects(), 0);
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn test_shared_vertices_collapse_and_expand_back() {
    let a = Vertex::from([0.0, 0.0, 0.0]);
    let b = Vertex::from([1.0, 0.0, 0.0]);
    let c = Vertex::from([1.0, 1.0, 0.0]);
    let d = Vertex::from([0.0, 1.0, 0.0]);

    let first = MeshSubmission::new(vec![a.clone(), b.clone(), c.clone()], vec![0, 1, 2]).unwrap();
    let second = MeshSubmission::new(vec![c.clone(), d.clone(), a.clone()], vec![0, 1, 2]).unwrap();

    let mut expected = Vec::new();
    for submission in [&first, &second] {
        for &index in submission.indices() {
            expected.push(submission.vertices()[index as usize].clone());
        }
    }

    let mut data = MeshData::new();
    data.add(first).unwrap();
    data.add(second).unwrap();

    let (vertices, indices) = data.get().unwrap();
    assert_eq!(vertices, &[a, b, c, d][..]);
    assert_eq!(indices, &[0, 1, 2, 2, 3, 0][..]);

    let expanded: Vec<Vertex> = indices.iter().map(|&i| vertices[i as usize].clone()).collect();
    assert_eq!(expanded, expected);
}

#[test]
fn test_tiled_plane_shares_edge_vertices() {
    let mut data = MeshData::new();
    for tile in generators::tiled_plane(3, 2) {
        data.add(tile).unwrap();
    }

    // 4 x 3 grid corners
    assert_eq!(data.get_vertices().unwrap().len(), 12);
    assert_eq!(data.get_indices().unwrap().len(), 36);
    assert!(data.get_indices().unwrap().iter().all(|&i| i < 12));
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_deduplicated_mesh_uploads_unique_vertices(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let key = ctx
        .add_model(ModelConfig::new("plane").with_layout(VertexLayout::position_uv()))
        .unwrap();
    ctx.setup().unwrap();

    let mut data = MeshData::new();
    for tile in generators::tiled_plane(3, 2) {
        data.add(tile).unwrap();
    }
    ctx.model_mut(key).unwrap().add_mesh(data).unwrap();
    ctx.per_frame_maintenance().unwrap();

    let model = ctx.model(key).unwrap();
    assert_eq!(model.indices_length(), 36);
    let indices = read_u32s(ctx.backend(), model.ebo().unwrap(), 36);
    assert_eq!(indices.iter().copied().max(), Some(11));
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_dedup_keeps_submission_order_and_unindexed_vertices(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let key = ctx.add_model(position_model("reversed")).unwrap();
    ctx.setup().unwrap();

    let mut data = MeshData::new();
    data.add(
        MeshSubmission::new(
            vec![
                Vertex::from([0.0, 0.0, 0.0]),
                Vertex::from([1.0, 0.0, 0.0]),
                Vertex::from([1.0, 1.0, 0.0]),
                Vertex::from([0.0, 1.0, 0.0]),
            ],
            vec![2, 1, 0],
        )
        .unwrap(),
    )
    .unwrap();
    ctx.model_mut(key).unwrap().add_mesh(data).unwrap();
    ctx.per_frame_maintenance().unwrap();

    let model = ctx.model(key).unwrap();
    assert_eq!(read_u32s(ctx.backend(), model.ebo().unwrap(), 3), vec![2, 1, 0]);
    assert_eq!(
        read_f32s(ctx.backend(), model.vbo().unwrap(), 12),
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0]
    );
    ctx.teardown().unwrap();
}

// ============================================================================
// Build pipeline
// ============================================================================

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_meshes_are_offset_by_running_max_index(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let key = ctx.add_model(position_model("pair")).unwrap();
    ctx.setup().unwrap();

    let model = ctx.model_mut(key).unwrap();
    model.add_mesh(triangle(0.0)).unwrap();
    model.add_mesh(triangle(5.0)).unwrap();
    let report = ctx.per_frame_maintenance().unwrap();
    assert_eq!(report.rebuilt, 1);

    let model = ctx.model(key).unwrap();
    assert_eq!(model.indices_length(), 6);
    assert_eq!(
        read_u32s(ctx.backend(), model.ebo().unwrap(), 6),
        vec![0, 1, 2, 3, 4, 5]
    );
    let floats = read_f32s(ctx.backend(), model.vbo().unwrap(), 18);
    assert_eq!(&floats[9..12], &[5.0, 0.0, 0.0]);

    // Clean models are not rebuilt.
    assert_eq!(ctx.per_frame_maintenance().unwrap().rebuilt, 0);
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_end_to_end_single_triangle(#[case] kind: BackendKind) {
    common::init_logging();
    let mut res = GpuResources::new(DummyBackend::new(kind), Diagnostics::capturing("e2e", 256));
    let mut model = Model::new(position_model("tri"), res.diagnostics().child("tri"));

    model.generate_handles(&mut res).unwrap();
    for id in [
        model.vao().unwrap().to_string(),
        model.vbo().unwrap().to_string(),
        model.ebo().unwrap().to_string(),
    ] {
        assert!(!id.ends_with("#0"), "{id} must be a real handle");
    }

    model.add_mesh(triangle(0.0)).unwrap();
    model.build(&mut res).unwrap();
    assert_eq!(model.indices_length(), 3);
    assert_eq!(
        read_f32s(res.backend(), model.vbo().unwrap(), 9),
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    );

    model.bind(&mut res).unwrap();
    model.draw(&mut res).unwrap();
    assert!(res.backend().calls().contains(&BackendCall::DrawIndexed {
        vao: model.vao().unwrap(),
        count: 3,
    }));

    model.free(&mut res).unwrap();
    assert!(matches!(model.draw(&mut res), Err(LifecycleError::WasFreed(_))));
    assert!(matches!(model.build(&mut res), Err(LifecycleError::WasFreed(_))));
    assert!(matches!(
        model.free(&mut res),
        Err(LifecycleError::ModelAlreadyFreed(_))
    ));

    assert_eq!(res.flush_all(), 3);
    assert_eq!(res.backend().live_objects(), 0);
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_draw_requires_own_vertex_array(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let first = ctx.add_model(position_model("first")).unwrap();
    let second = ctx.add_model(position_model("second")).unwrap();
    ctx.setup().unwrap();
    ctx.model_mut(first).unwrap().add_mesh(triangle(0.0)).unwrap();
    ctx.model_mut(second).unwrap().add_mesh(triangle(2.0)).unwrap();
    ctx.per_frame_maintenance().unwrap();

    assert!(matches!(
        ctx.draw_model(first),
        Err(LifecycleError::IllegalState(_))
    ));

    ctx.bind_model(first).unwrap();
    assert!(matches!(
        ctx.draw_model(second),
        Err(LifecycleError::IllegalState(_))
    ));
    ctx.draw_model(first).unwrap();
    ctx.teardown().unwrap();
}

// ============================================================================
// Empty data policies
// ============================================================================

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_empty_build_throw(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    ctx.add_model(position_model("empty").with_empty_build(EmptyDataPolicy::Throw))
        .unwrap();
    ctx.setup().unwrap();

    assert!(matches!(
        ctx.per_frame_maintenance(),
        Err(LifecycleError::EmptyData { operation: "build", .. })
    ));
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_empty_build_silently_fail(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let key = ctx
        .add_model(position_model("empty").with_empty_build(EmptyDataPolicy::SilentlyFail))
        .unwrap();
    ctx.setup().unwrap();
    ctx.backend_mut().clear_calls();

    let report = ctx.per_frame_maintenance().unwrap();
    assert_eq!(report.rebuilt, 0);

    let model = ctx.model(key).unwrap();
    assert!(model.is_dirty());
    assert_eq!(model.indices_length(), 0);
    assert!(ctx.backend().calls().is_empty());
    assert_eq!(captured(&ctx).count(log::Level::Warn), 0);
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_empty_build_scream_warns_once(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    ctx.add_model(position_model("empty").with_empty_build(EmptyDataPolicy::Scream))
        .unwrap();
    ctx.setup().unwrap();

    ctx.per_frame_maintenance().unwrap();
    {
        let entries = captured(&ctx);
        assert_eq!(entries.count(log::Level::Warn), 1);
        assert_eq!(entries.matching(log::Level::Warn, "no data").count(), 1);
    }
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_empty_draw_follows_its_own_policy(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let throwing = ctx
        .add_model(
            position_model("throwing")
                .with_empty_build(EmptyDataPolicy::SilentlyFail)
                .with_empty_draw(EmptyDataPolicy::Throw),
        )
        .unwrap();
    let silent = ctx
        .add_model(
            position_model("silent")
                .with_empty_build(EmptyDataPolicy::SilentlyFail)
                .with_empty_draw(EmptyDataPolicy::SilentlyFail),
        )
        .unwrap();
    ctx.setup().unwrap();
    ctx.per_frame_maintenance().unwrap();

    assert!(matches!(
        ctx.draw_model(throwing),
        Err(LifecycleError::EmptyData { operation: "draw", .. })
    ));
    ctx.draw_model(silent).unwrap();
    assert!(!ctx
        .backend()
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::DrawIndexed { .. })));
    ctx.teardown().unwrap();
}

// ============================================================================
// Failure recovery
// ============================================================================

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_failing_model_does_not_block_others(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    ctx.add_model(position_model("empty").with_empty_build(EmptyDataPolicy::Throw))
        .unwrap();
    let good = ctx.add_model(position_model("good")).unwrap();
    ctx.setup().unwrap();
    ctx.model_mut(good).unwrap().add_mesh(triangle(0.0)).unwrap();

    let err = ctx.per_frame_maintenance().unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::EmptyData { operation: "build", ref label } if label == "empty"
    ));

    let model = ctx.model(good).unwrap();
    assert!(!model.is_dirty());
    assert_eq!(model.indices_length(), 3);
    {
        let entries = captured(&ctx);
        assert_eq!(entries.matching(log::Level::Error, "model 'empty'").count(), 1);
    }
    ctx.teardown().unwrap();
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_failed_teardown_is_retried_at_shutdown(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    ctx.setup().unwrap();
    let id = ctx
        .resources_mut()
        .create_buffer(&BufferDescriptor::new("stubborn", 16, BufferUsage::UNIFORM))
        .unwrap();

    ctx.backend_mut().fail_after(FailPoint::DestroyBuffer, 0);
    ctx.resources_mut().enqueue_destroy_buffer(id);
    let report = ctx.per_frame_maintenance().unwrap();
    assert_eq!(report.destroyed, 0);
    assert!(ctx.resources().buffers().contains(id));
    assert_eq!(ctx.backend().live_objects(), 1);
    {
        let entries = captured(&ctx);
        assert_eq!(entries.matching(log::Level::Error, "failed to destroy").count(), 1);
    }

    assert_eq!(ctx.teardown().unwrap(), 1);
    assert_eq!(ctx.backend().live_objects(), 0);
}

#[rstest]
#[case::gl(BackendKind::Gl)]
#[case::vulkan(BackendKind::Vulkan)]
fn test_failed_growth_recovers_next_frame(#[case] kind: BackendKind) {
    let mut ctx = context(kind);
    let key = ctx
        .add_model(position_model("growing").with_initial_capacity(16))
        .unwrap();
    ctx.setup().unwrap();
    let (vbo, ebo) = {
        let model = ctx.model(key).unwrap();
        (model.vbo().unwrap(), model.ebo().unwrap())
    };
    let model = ctx.model_mut(key).unwrap();
    for i in 0..4 {
        model.add_mesh(triangle(i as f32 * 2.0)).unwrap();
    }

    // the vertex buffer grows, the index buffer replacement fails
    ctx.backend_mut().fail_after(FailPoint::CreateBuffer, 1);
    assert!(ctx.per_frame_maintenance().is_err());
    let model = ctx.model(key).unwrap();
    assert_eq!((model.vbo(), model.ebo()), (Some(vbo), Some(ebo)));
    assert!(model.is_dirty());

    let report = ctx.per_frame_maintenance().unwrap();
    assert_eq!((report.destroyed, report.rebuilt), (1, 1));
    let model = ctx.model(key).unwrap();
    assert_eq!(model.indices_length(), 12);
    assert_eq!(
        ctx.backend().vertex_array_buffers(model.vao().unwrap()),
        Some((model.vbo().unwrap(), model.ebo().unwrap()))
    );

    // vao + grown vbo/ebo + the replaced pair still queued
    assert_eq!(ctx.teardown().unwrap(), 5);
    assert_eq!(ctx.backend().live_objects(), 0);
}

// ============================================================================
// Upload paths
// ============================================================================

#[rstest]
#[case::gl(BackendKind::Gl, false)]
#[case::vulkan(BackendKind::Vulkan, true)]
fn test_device_local_upload_path(#[case] kind: BackendKind, #[case] staged: bool) {
    let mut ctx = RenderContext::new(
        DummyBackend::new(kind),
        ContextConfig::new("upload").with_model(
            position_model("template").with_memory(MemoryProperties::DEVICE_LOCAL),
        ),
    );
    let key = ctx.add_default_model("tri").unwrap();
    ctx.setup().unwrap();
    ctx.model_mut(key).unwrap().add_mesh(triangle(0.0)).unwrap();
    ctx.per_frame_maintenance().unwrap();

    let calls = ctx.backend().calls();
    let staged_copies = calls
        .iter()
        .filter(|c| matches!(c, BackendCall::CopyStaging { .. }))
        .count();
    let releases = calls
        .iter()
        .filter(|c| matches!(c, BackendCall::ReleaseStaging))
        .count();
    let direct = calls
        .iter()
        .filter(|c| matches!(c, BackendCall::WriteBuffer { .. }))
        .count();

    if staged {
        assert_eq!((staged_copies, releases, direct), (2, 2, 0));
    } else {
        assert_eq!((staged_copies, releases, direct), (0, 0, 2));
    }

    let model = ctx.model(key).unwrap();
    assert_eq!(read_u32s(ctx.backend(), model.ebo().unwrap(), 3), vec![0, 1, 2]);
    ctx.teardown().unwrap();
}

#[test]
fn test_host_visible_vulkan_buffers_are_written_directly() {
    common::init_logging();
    let diag = Diagnostics::default();
    let mut vk = DummyBackend::new(BackendKind::Vulkan);
    let desc = BufferDescriptor::new("uniforms", 16, BufferUsage::UNIFORM)
        .with_memory(MemoryProperties::HOST_SHARED);
    let buffer = BufferObject::create(&mut vk, &desc, &diag).unwrap();

    buffer.copy(&mut vk, &[1u32, 2, 3, 4], 0).unwrap();
    assert!(!vk
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::CreateStaging { .. })));
    assert_eq!(read_u32s(&vk, buffer.id(), 4), vec![1, 2, 3, 4]);
}

#[test]
fn test_copy_through_the_wrong_backend_is_rejected() {
    common::init_logging();
    let diag = Diagnostics::default();
    let mut gl = DummyBackend::new(BackendKind::Gl);
    let mut vk = DummyBackend::new(BackendKind::Vulkan);
    let buffer = BufferObject::create(
        &mut gl,
        &BufferDescriptor::new("gl only", 16, BufferUsage::VERTEX),
        &diag,
    )
    .unwrap();

    assert!(matches!(
        buffer.copy(&mut vk, &[0.0f32; 4], 0),
        Err(LifecycleError::IllegalState(_))
    ));
    assert_eq!(vk.calls().len(), 0);
    assert_eq!(gl.kind(), BackendKind::Gl);
}
