mod common;

use std::cell::RefCell;
use std::rc::Rc;

use glink::{ConstantType, SharedParameters, Stage, StageKind, StrategyChoice, Variability};
use glink_driver::{BlockKind, BufferTarget, Driver, UploadValues};
use pretty_assertions::assert_eq;

use common::{context, stage};

const TINTED_VERTEX: &str = "#version 330\n\
uniform vec4 tint;\n\
in vec4 position;\n\
void main() { gl_Position = position * tint; }\n";

const TINTED_FRAGMENT: &str = "#version 330\n\
uniform vec4 tint;\n\
out vec4 color;\n\
void main() { color = tint; }\n";

#[test]
fn updates_touch_only_the_requested_stage() {
    for strategy in [StrategyChoice::Monolithic, StrategyChoice::Separable] {
        let mut ctx = context(strategy);
        let v = stage(StageKind::Vertex, "tint.vert", TINTED_VERTEX);
        let f = stage(StageKind::Fragment, "tint.frag", TINTED_FRAGMENT);
        ctx.bind(&v);
        ctx.bind(&f);
        ctx.activate_current_program().unwrap();

        let uniforms = ctx.current_program().unwrap().uniforms();
        assert_eq!(uniforms.len(), 2);
        assert!(uniforms.iter().any(|u| u.stage == StageKind::Vertex));
        assert!(uniforms.iter().any(|u| u.stage == StageKind::Fragment));

        let mut vertex_params = ctx.create_parameters(&v).unwrap();
        vertex_params.set_named_constant("tint", &[1.0f32, 0.0, 0.0, 1.0]).unwrap();
        let mut fragment_params = ctx.create_parameters(&f).unwrap();
        fragment_params.set_named_constant("tint", &[0.0f32, 1.0, 0.0, 1.0]).unwrap();

        ctx.update_uniforms(&fragment_params, Variability::ALL, StageKind::Fragment);
        let uploads = ctx.driver_mut().take_uploads();
        assert_eq!(uploads.len(), 1, "{strategy:?}");
        assert_eq!(uploads[0].values, UploadValues::F32(vec![0.0, 1.0, 0.0, 1.0]));
        assert_eq!(uploads[0].components, 4);
        let expected_program = ctx.current_program().unwrap().handles().program_for(StageKind::Fragment);
        assert_eq!(Some(uploads[0].program), expected_program);

        ctx.update_uniforms(&vertex_params, Variability::ALL, StageKind::Vertex);
        let uploads = ctx.driver_mut().take_uploads();
        assert_eq!(uploads.len(), 1, "{strategy:?}");
        assert_eq!(uploads[0].values, UploadValues::F32(vec![1.0, 0.0, 0.0, 1.0]));
    }
}

#[test]
fn variability_mask_filters_uploads() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let f = stage(
        StageKind::Fragment,
        "mask.frag",
        "uniform vec4 tint;\nuniform float time;\nout vec4 color;\nvoid main() { color = tint * time; }\n",
    );
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    let mut params = ctx.create_parameters(&f).unwrap();
    params.set_variability("time", Variability::PER_OBJECT).unwrap();
    params.set_named_constant("time", &[2.5f32]).unwrap();

    ctx.update_uniforms(&params, Variability::PER_OBJECT, StageKind::Fragment);
    assert_eq!(ctx.driver().uploads().len(), 1);
    assert_eq!(ctx.driver().uploads()[0].values, UploadValues::F32(vec![2.5]));

    ctx.update_uniforms(&params, Variability::LIGHTS, StageKind::Fragment);
    assert_eq!(ctx.driver().uploads().len(), 1);
}

#[test]
fn matrix_transpose_follows_the_other_stage() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(
        StageKind::Vertex,
        "world.vert",
        "uniform mat4 world;\nin vec4 position;\nvoid main() { gl_Position = world * position; }\n",
    );
    let f = Rc::new(
        Stage::new(
            StageKind::Fragment,
            "uv.frag",
            "uniform mat4 uv_transform;\nout vec4 color;\nvoid main() { color = uv_transform[0]; }\n",
        )
        .with_column_major(false),
    );
    ctx.bind(&v);
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    let matrix: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let mut vertex_params = ctx.create_parameters(&v).unwrap();
    vertex_params.set_named_constant("world", &matrix).unwrap();
    let mut fragment_params = ctx.create_parameters(&f).unwrap();
    fragment_params.set_named_constant("uv_transform", &matrix).unwrap();

    ctx.update_uniforms(&vertex_params, Variability::ALL, StageKind::Vertex);
    ctx.update_uniforms(&fragment_params, Variability::ALL, StageKind::Fragment);
    let uploads = ctx.driver_mut().take_uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].matrix, Some((4, 4)));
    // The fragment stage is row-major, so the vertex stage's matrix is not transposed.
    assert!(!uploads[0].transpose);
    assert!(uploads[1].transpose);
    assert_eq!(uploads[1].values, UploadValues::F32(matrix));
}

#[test]
fn samplers_and_bools_upload_as_integers() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let f = stage(
        StageKind::Fragment,
        "tex.frag",
        "uniform sampler2D albedo;\nuniform bool flip;\nout vec4 color;\n\
         void main() { color = flip ? texture(albedo, vec2(0.0)) : vec4(0.0); }\n",
    );
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    let mut params = ctx.create_parameters(&f).unwrap();
    params.set_sampler("albedo", 3).unwrap();
    params.set_named_bool("flip", &[true]).unwrap();
    ctx.update_uniforms(&params, Variability::ALL, StageKind::Fragment);

    let values: Vec<_> = ctx.driver().uploads().iter().map(|u| u.values.clone()).collect();
    assert_eq!(values, vec![UploadValues::I32(vec![3]), UploadValues::U32(vec![1])]);
}

#[test]
fn pass_iteration_updates_only_the_counter() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let f = stage(
        StageKind::Fragment,
        "passes.frag",
        "uniform vec4 tint;\nuniform float pass_number;\nout vec4 color;\n\
         void main() { color = tint * pass_number; }\n",
    );
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    let mut params = ctx.create_parameters(&f).unwrap();
    params.set_named_constant("tint", &[1.0f32; 4]).unwrap();
    params.set_pass_iteration_constant("pass_number").unwrap();
    params.set_pass_iteration(3);

    ctx.update_pass_iteration_uniforms(&params);
    let uploads = ctx.driver_mut().take_uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].values, UploadValues::F32(vec![3.0]));
    let counter = ctx
        .current_program()
        .unwrap()
        .uniforms()
        .iter()
        .find(|u| u.name == "pass_number")
        .unwrap()
        .location;
    assert_eq!(uploads[0].location, counter);
}

#[test]
fn pass_iteration_ignores_other_stages_at_the_same_index() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(
        StageKind::Vertex,
        "scaled.vert",
        "uniform float scale;\nin vec4 position;\nvoid main() { gl_Position = position * scale; }\n",
    );
    let f = stage(
        StageKind::Fragment,
        "passes.frag",
        "uniform float pass_number;\nout vec4 color;\nvoid main() { color = vec4(pass_number); }\n",
    );
    ctx.bind(&v);
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    let vertex_params = ctx.create_parameters(&v).unwrap();
    let mut fragment_params = ctx.create_parameters(&f).unwrap();
    fragment_params.set_pass_iteration_constant("pass_number").unwrap();
    fragment_params.set_pass_iteration(3);
    assert_eq!(
        vertex_params.constants().get("scale").unwrap().physical_index,
        fragment_params.pass_iteration_index().unwrap()
    );

    ctx.update_pass_iteration_uniforms(&fragment_params);
    let uploads = ctx.driver_mut().take_uploads();
    let location = |name: &str| {
        ctx.current_program()
            .unwrap()
            .uniforms()
            .iter()
            .find(|u| u.name == name)
            .unwrap()
            .location
    };
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].location, location("pass_number"));
    assert_ne!(uploads[0].location, location("scale"));
    assert_eq!(uploads[0].values, UploadValues::F32(vec![3.0]));

    ctx.update_pass_iteration_uniforms(&vertex_params);
    assert!(ctx.driver().uploads().is_empty());
}

#[test]
fn dirty_block_members_are_written_once() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let f = stage(
        StageKind::Fragment,
        "frame.frag",
        "#version 330\n\
         layout(std140) uniform Frame { vec4 color; float time; } frame;\n\
         out vec4 o;\n\
         void main() { o = frame.color * frame.time; }\n",
    );
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();
    let block = &ctx.current_program().unwrap().blocks()[0];
    assert_eq!(block.name, "Frame");
    assert_eq!(block.data_size, 32);
    assert_eq!(ctx.block_binding(BlockKind::Uniform, "Frame"), Some(0));

    let shared = Rc::new(RefCell::new(SharedParameters::new("Frame")));
    let mut params = ctx.create_parameters(&f).unwrap();
    params.add_shared_parameters(shared.clone());

    // No buffer yet: nothing to do.
    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert_eq!(ctx.driver().stats().buffer_writes, 0);

    let buffer = ctx.driver_mut().create_buffer(BufferTarget::Uniform, 32).unwrap();
    {
        let mut shared = shared.borrow_mut();
        shared.add_constant("color", ConstantType::Float4, 1);
        shared.add_constant("time", ConstantType::Float1, 1);
        shared.set_named_constant("color", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        shared.set_named_constant("time", &[0.5f32]).unwrap();
        shared.set_buffer(Some(buffer));
    }

    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert_eq!(ctx.driver().stats().buffer_writes, 2);
    assert_eq!(ctx.driver().bound_buffer(BufferTarget::Uniform, 0), Some(buffer));
    assert!(!shared.borrow().is_dirty());
    let contents = ctx.driver().buffer_contents(buffer).unwrap();
    let floats: Vec<f32> = contents
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(&floats[..5], &[1.0, 2.0, 3.0, 4.0, 0.5]);

    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert_eq!(ctx.driver().stats().buffer_writes, 2);

    shared.borrow_mut().set_named_constant("time", &[0.75f32]).unwrap();
    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert_eq!(ctx.driver().stats().buffer_writes, 3);
}

#[test]
fn failed_block_write_keeps_members_dirty() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let f = stage(
        StageKind::Fragment,
        "frame.frag",
        "layout(std140) uniform Frame { vec4 color; } frame;\nout vec4 o;\nvoid main() { o = frame.color; }\n",
    );
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    let buffer = ctx.driver_mut().create_buffer(BufferTarget::Uniform, 16).unwrap();
    let shared = Rc::new(RefCell::new(SharedParameters::new("Frame")));
    shared.borrow_mut().add_constant("color", ConstantType::Float4, 1);
    shared.borrow_mut().set_buffer(Some(buffer));
    let mut params = ctx.create_parameters(&f).unwrap();
    params.add_shared_parameters(shared.clone());

    ctx.driver_mut().set_fail_buffer_writes(true);
    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert!(shared.borrow().is_dirty());

    ctx.driver_mut().set_fail_buffer_writes(false);
    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert!(!shared.borrow().is_dirty());
    assert_eq!(ctx.driver().stats().buffer_writes, 1);
}


#[test]
fn block_arrays_and_matrices_use_reflected_strides() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let f = stage(
        StageKind::Fragment,
        "weights.frag",
        "layout(std140) uniform Weights { float w[4]; mat3 basis; vec4 tail; } weights;\n\
         out vec4 o;\n\
         void main() { o = weights.tail * weights.w[1] + vec4(weights.basis[0], 1.0); }\n",
    );
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();
    assert_eq!(ctx.current_program().unwrap().blocks()[0].data_size, 128);

    let buffer = ctx.driver_mut().create_buffer(BufferTarget::Uniform, 128).unwrap();
    let shared = Rc::new(RefCell::new(SharedParameters::new("Weights")));
    {
        let mut shared = shared.borrow_mut();
        shared.add_constant("w", ConstantType::Float1, 4);
        shared.add_constant("basis", ConstantType::Matrix3x3, 1);
        shared.add_constant("tail", ConstantType::Float4, 1);
        shared.set_named_constant("w", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let basis: Vec<f32> = (10..19).map(|v| v as f32).collect();
        shared.set_named_constant("basis", &basis).unwrap();
        shared.set_named_constant("tail", &[9.0f32; 4]).unwrap();
        shared.set_buffer(Some(buffer));
    }
    let mut params = ctx.create_parameters(&f).unwrap();
    params.add_shared_parameters(shared.clone());

    ctx.update_uniform_blocks(&params, Variability::ALL, StageKind::Fragment);
    assert_eq!(ctx.driver().stats().buffer_writes, 3);
    let floats: Vec<f32> = ctx
        .driver()
        .buffer_contents(buffer)
        .unwrap()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    #[rustfmt::skip]
    let expected = vec![
        1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0,
        10.0, 11.0, 12.0, 0.0, 13.0, 14.0, 15.0, 0.0, 16.0, 17.0, 18.0, 0.0,
        9.0, 9.0, 9.0, 9.0,
    ];
    assert_eq!(floats, expected);
}

#[test]
fn block_bindings_are_shared_between_programs() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let lights = "layout(std140) uniform Lights { vec4 colors[4]; } lights;\n";
    let a = stage(
        StageKind::Fragment,
        "a.frag",
        &format!("uniform Camera {{ mat4 view; }} camera;\n{lights}out vec4 o;\nvoid main() {{ o = lights.colors[0]; }}\n"),
    );
    let b = stage(
        StageKind::Fragment,
        "b.frag",
        &format!("{lights}out vec4 o;\nvoid main() {{ o = lights.colors[1]; }}\n"),
    );

    ctx.bind(&a);
    ctx.activate_current_program().unwrap();
    ctx.bind(&b);
    ctx.activate_current_program().unwrap();

    assert_eq!(ctx.block_binding(BlockKind::Uniform, "Camera"), Some(0));
    assert_eq!(ctx.block_binding(BlockKind::Uniform, "Lights"), Some(1));
    let lights = &ctx.current_program().unwrap().blocks()[0];
    assert_eq!((lights.name.as_str(), lights.binding), ("Lights", 1));
}

#[test]
fn atomic_counters_write_their_buffer() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let c = stage(
        StageKind::Compute,
        "count.comp",
        "#version 430\n\
         layout(binding = 1) uniform atomic_uint hits;\n\
         layout(binding = 1) uniform atomic_uint misses;\n\
         void main() { atomicCounterIncrement(hits); atomicCounterIncrement(misses); }\n",
    );
    ctx.bind(&c);
    ctx.activate_current_program().unwrap();

    let counters = ctx.current_program().unwrap().atomic_counters();
    assert_eq!(
        counters.iter().map(|c| (c.name.as_str(), c.binding, c.offset)).collect::<Vec<_>>(),
        vec![("hits", 1, 0), ("misses", 1, 4)]
    );

    let buffer = ctx.driver_mut().create_buffer(BufferTarget::AtomicCounter, 8).unwrap();
    let mut params = ctx.create_parameters(&c).unwrap();
    params.set_named_constant("hits", &[7u32]).unwrap();
    params.set_named_constant("misses", &[9u32]).unwrap();
    params.set_counter_buffer(1, buffer);

    ctx.update_atomic_counters(&params, Variability::ALL, StageKind::Compute);
    assert_eq!(ctx.driver().bound_buffer(BufferTarget::AtomicCounter, 1), Some(buffer));
    let mut expected = 7u32.to_le_bytes().to_vec();
    expected.extend_from_slice(&9u32.to_le_bytes());
    assert_eq!(ctx.driver().buffer_contents(buffer), Some(expected.as_slice()));
}
