//! Module-level behavior: entry points, resource declarations, textures,
//! and the error contract.
use pretty_assertions::assert_eq;
use spirv::Op as S;

use shadec::nsb::{ResourceKind, Slot};
use shadec::{compile, CodeBuilder, FuncCode, ShaderError, SourceOp};

mod util;
use util::{count, f32_const_ids, find_all, instrs};

/// A fragment shader writing one constant to one output location.
fn trivial_fragment() -> FuncCode {
    let mut b = CodeBuilder::new("fragment_constant");
    b.arg("out_color", ResourceKind::Output, Slot::Index(0), "f32");
    b.load_const(42.0).store_fast("out_color");
    b.return_none();
    b.build()
}

#[test]
fn trivial_shader_stores_its_constant_once() {
    let module = compile(&trivial_fragment()).unwrap();
    let instrs = instrs(&module.binary);
    let stores = find_all(&instrs, S::Store);
    assert_eq!(stores.len(), 1);
    let const_ids = f32_const_ids(&instrs, 42.0);
    assert_eq!(const_ids.len(), 1);
    assert_eq!(stores[0][1], const_ids[0]);
}

#[test]
fn module_header_is_wellformed() {
    let module = compile(&trivial_fragment()).unwrap();
    let header = module.binary.header().unwrap();
    assert_eq!(header.magic, 0x0723_0203);
    let all = instrs(&module.binary);
    // Label and variable result ids all stay below the declared bound.
    for operands in find_all(&all, S::Label) {
        assert!(operands[0] < header.bound);
    }
    for operands in find_all(&all, S::Variable) {
        assert!(operands[1] < header.bound);
    }
    assert_eq!(count(&all, S::MemoryModel), 1);
    assert_eq!(count(&all, S::EntryPoint), 1);
    assert_eq!(count(&all, S::FunctionEnd), 1);
}

#[test]
fn entry_point_lists_io_interface() {
    let mut b = CodeBuilder::new("vertex_passthrough");
    b.arg("position", ResourceKind::Input, Slot::Index(0), "vec4");
    b.arg(
        "out_pos",
        ResourceKind::Output,
        Slot::Name("Position".to_owned()),
        "vec4",
    );
    b.load_fast("position").store_fast("out_pos");
    b.return_none();
    let module = compile(&b.build()).unwrap();
    let all = instrs(&module.binary);
    let entry = &find_all(&all, S::EntryPoint)[0];
    // Execution model, function id, "main\0\0\0\0" (2 words), 2 interface
    // ids.
    assert_eq!(entry.len(), 2 + 2 + 2);
    assert_eq!(entry[0], spirv::ExecutionModel::Vertex as u32);
}

#[test]
fn compute_gets_default_local_size() {
    let mut b = CodeBuilder::new("compute_noop");
    b.arg("data", ResourceKind::Buffer, Slot::Index(0), "Array(f32)");
    b.load_const(1.0).load_fast("data").load_const(0i64);
    b.op(SourceOp::StoreSubscr);
    b.return_none();
    let module = compile(&b.build()).unwrap();
    let all = instrs(&module.binary);
    let modes = find_all(&all, S::ExecutionMode);
    assert_eq!(modes.len(), 1);
    assert_eq!(modes[0][1], spirv::ExecutionMode::LocalSize as u32);
    assert_eq!(&modes[0][2..], &[1, 1, 1]);
}

#[test]
fn duplicate_slots_are_rejected() {
    // Two buffers on one binding of one bind group.
    let mut b = CodeBuilder::new("compute_clash");
    b.arg("a", ResourceKind::Buffer, Slot::Index(1), "Array(f32)");
    b.arg("bb", ResourceKind::Buffer, Slot::Pair(0, 1), "Array(f32)");
    b.return_none();
    assert!(matches!(
        compile(&b.build()),
        Err(ShaderError::Declaration(_))
    ));

    // The same binding in two different bind groups is fine, and inputs and
    // outputs have namespaces of their own.
    let mut b = CodeBuilder::new("compute_no_clash");
    b.arg("a", ResourceKind::Buffer, Slot::Index(1), "Array(f32)");
    b.arg("bb", ResourceKind::Buffer, Slot::Pair(1, 1), "Array(f32)");
    b.return_none();
    assert!(compile(&b.build()).is_ok());

    let mut b = CodeBuilder::new("fragment_io");
    b.arg("uv", ResourceKind::Input, Slot::Index(0), "vec2");
    b.arg("color", ResourceKind::Output, Slot::Index(0), "vec4");
    b.return_none();
    assert!(compile(&b.build()).is_ok());

    let mut b = CodeBuilder::new("fragment_in_clash");
    b.arg("uv", ResourceKind::Input, Slot::Index(0), "vec2");
    b.arg("uv2", ResourceKind::Input, Slot::Index(0), "vec2");
    b.return_none();
    assert!(matches!(
        compile(&b.build()),
        Err(ShaderError::Declaration(_))
    ));
}

#[test]
fn unknown_builtin_is_rejected() {
    let mut b = CodeBuilder::new("compute_bad_builtin");
    b.arg(
        "index",
        ResourceKind::Input,
        Slot::Name("GlobalThreadId".to_owned()),
        "i32",
    );
    b.return_none();
    assert!(matches!(
        compile(&b.build()),
        Err(ShaderError::Declaration(_))
    ));
}

#[test]
fn stage_comes_from_the_function_name() {
    let mut b = CodeBuilder::new("mystery_shader");
    b.return_none();
    assert!(matches!(
        compile(&b.build()),
        Err(ShaderError::Declaration(_))
    ));

    let mut b = CodeBuilder::new("vertex_or_fragment");
    b.return_none();
    assert!(matches!(
        compile(&b.build()),
        Err(ShaderError::Declaration(_))
    ));
}

#[test]
fn stores_to_inputs_and_uniforms_are_type_errors() {
    let mut b = CodeBuilder::new("compute_store_input");
    b.arg(
        "index",
        ResourceKind::Input,
        Slot::Name("GlobalInvocationId".to_owned()),
        "i32",
    );
    b.load_const(1i64).store_fast("index");
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Type(_))));

    let mut b = CodeBuilder::new("compute_store_uniform");
    b.arg("u", ResourceKind::Uniform, Slot::Index(0), "Struct(scale=f32)");
    b.load_const(1.0).store_fast("u");
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Type(_))));
}

#[test]
fn dialect_violations_are_rejected() {
    let mut b = CodeBuilder::new("compute_tuple");
    b.load_const(1.0).load_const(2.0);
    b.op_arg(SourceOp::BuildTuple, 2);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Dialect(_))));

    let mut b = CodeBuilder::new("compute_dict");
    b.op_arg(SourceOp::BuildMap, 0);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Dialect(_))));

    let mut b = CodeBuilder::new("compute_closure");
    b.op_arg(SourceOp::LoadDeref, 0);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Dialect(_))));

    // Implicit truth-value conversion.
    let mut b = CodeBuilder::new("compute_truthy");
    let end = b.new_label();
    b.load_const(1.0);
    b.op_jump(SourceOp::JumpIfTrueOrPop, end);
    b.place(end);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Dialect(_))));

    // range() outside a for-loop.
    let mut b = CodeBuilder::new("compute_bare_range");
    b.load_global("range").load_const(4i64).call_function(1);
    b.op(SourceOp::PopTop);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Dialect(_))));
}

#[test]
fn range_step_must_be_positive_constant() {
    let mut b = CodeBuilder::new("compute_bad_step");
    b.arg(
        "index",
        ResourceKind::Input,
        Slot::Name("GlobalInvocationId".to_owned()),
        "i32",
    );
    let (loop_start, loop_end) = (b.new_label(), b.new_label());
    b.load_global("range");
    b.load_const(0i64).load_fast("index").load_const(0i64);
    b.call_function(3);
    b.op(SourceOp::GetIter);
    b.place(loop_start);
    b.for_iter(loop_end);
    b.store_fast("i");
    b.jump_absolute(loop_start);
    b.place(loop_end);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Dialect(_))));
}

/// Sampling a 2D float texture: the image type settles to sampled, the
/// texture and sampler join into one combined handle, and the sample runs
/// at an explicit level of detail of zero.
#[test]
fn texture_sample_settles_image_words() {
    let mut b = CodeBuilder::new("fragment_sample");
    b.arg("coord", ResourceKind::Input, Slot::Index(0), "vec2");
    b.arg("tex", ResourceKind::Texture, Slot::Pair(0, 0), "2d f32");
    b.arg("samp", ResourceKind::Sampler, Slot::Pair(0, 1), "");
    b.arg("out_color", ResourceKind::Output, Slot::Index(0), "vec4");
    b.load_fast("tex");
    b.load_method("sample");
    b.load_fast("samp").load_fast("coord");
    b.call_method(2);
    b.store_fast("out_color");
    b.return_none();

    let module = compile(&b.build()).unwrap();
    let all = instrs(&module.binary);

    let images = find_all(&all, S::TypeImage);
    assert_eq!(images.len(), 1);
    // result id, sample type, dim, depth, arrayed, ms, sampled, format
    let image = images[0];
    assert_eq!(image[2], spirv::Dim::Dim2D as u32);
    assert_eq!(image[3], 0, "depth settles to 0 on use");
    assert_eq!(image[6], 1, "sampled settles to 1 when sampled");

    assert_eq!(count(&all, S::TypeSampledImage), 1);
    assert_eq!(count(&all, S::SampledImage), 1);

    let samples = find_all(&all, S::ImageSampleExplicitLod);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0][4], spirv::ImageOperands::LOD.bits());
    let lod_id = samples[0][5];
    assert!(f32_const_ids(&all, 0.0).contains(&lod_id));
}

/// Storage use settles the same words the other way.
#[test]
fn texture_write_makes_a_storage_image() {
    let mut b = CodeBuilder::new("compute_blit");
    b.arg(
        "index",
        ResourceKind::Input,
        Slot::Name("GlobalInvocationId".to_owned()),
        "i32",
    );
    b.arg("tex", ResourceKind::Texture, Slot::Pair(0, 0), "2d rgba32f");
    // tex.write(ivec2(index, index), vec4(...))
    b.load_fast("tex");
    b.load_method("write");
    b.load_global("ivec2");
    b.load_fast("index").load_fast("index");
    b.call_function(2);
    b.load_global("vec4");
    b.load_const(0.0).load_const(0.0).load_const(0.0).load_const(1.0);
    b.call_function(4);
    b.call_method(2);
    b.op(SourceOp::PopTop);
    b.return_none();

    let module = compile(&b.build()).unwrap();
    let all = instrs(&module.binary);
    let image = find_all(&all, S::TypeImage)[0];
    assert_eq!(image[3], 0, "depth settles to 0 on use");
    assert_eq!(image[6], 2, "sampled settles to 2 for storage use");
    assert_eq!(image[7], spirv::ImageFormat::Rgba32f as u32);
    assert_eq!(count(&all, S::ImageWrite), 1);

    // Bad coordinate types are rejected.
    let mut b = CodeBuilder::new("compute_blit_bad");
    b.arg("tex", ResourceKind::Texture, Slot::Pair(0, 0), "2d rgba32f");
    b.load_fast("tex");
    b.load_method("read");
    b.load_const(0.5);
    b.call_method(1);
    b.op(SourceOp::PopTop);
    b.return_none();
    assert!(matches!(compile(&b.build()), Err(ShaderError::Type(_))));
}

#[test]
fn nsb_serializes_to_json_tuples() {
    let module = compile(&trivial_fragment()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&module.nsb_json()).unwrap();
    let ops = json.as_array().unwrap();
    assert_eq!(ops[0][0], "entrypoint");
    assert_eq!(ops[0][2], "fragment");
    let tags: Vec<&str> = ops.iter().map(|op| op[0].as_str().unwrap()).collect();
    assert!(tags.contains(&"resource"));
    assert!(tags.contains(&"store_name"));
    assert_eq!(*tags.last().unwrap(), "func_end");
}

#[test]
fn ternary_select_flag_does_not_change_default_output() {
    use std::sync::atomic::Ordering;
    let func = trivial_fragment();
    let with_default = compile(&func).unwrap();
    shadec::OPT_CONVERT_TERNARY_TO_SELECT.store(false, Ordering::Relaxed);
    let with_flag_off = compile(&func).unwrap();
    shadec::OPT_CONVERT_TERNARY_TO_SELECT.store(true, Ordering::Relaxed);
    assert_eq!(with_default.binary, with_flag_off.binary);
}
