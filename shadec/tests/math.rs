//! Operand-type-directed opcode selection: the binary-operator table,
//! scalar conversions, vector packing, and the two modulo flavors.
use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use spirv::Op as S;

use shadec::nsb::{BinOp, ConstVal, Op, ResourceKind, Slot, Stage};
use shadec::{compile, generate, CodeBuilder, ShaderError, SourceOp};

mod util;
use util::{count, instrs};

/// A minimal compute program around the given body ops.
fn compute_nsb(body: Vec<Op>) -> Vec<Op> {
    let mut ops = vec![Op::Entrypoint {
        name: "main".to_owned(),
        stage: Stage::Compute,
        modes: BTreeMap::new(),
    }];
    ops.extend(body);
    ops.push(Op::FuncEnd);
    ops
}

fn binop_program(a: ConstVal, b: ConstVal, op: BinOp) -> Vec<Op> {
    compute_nsb(vec![
        Op::LoadConstant(a),
        Op::LoadConstant(b),
        Op::BinaryOp(op),
        Op::PopTop,
    ])
}

#[test]
fn float_arithmetic_selects_float_ops() {
    for (op, expected) in [
        (BinOp::Add, S::FAdd),
        (BinOp::Sub, S::FSub),
        (BinOp::Mul, S::FMul),
        (BinOp::Div, S::FDiv),
        (BinOp::Mod, S::FMod),
    ]
    .iter()
    {
        let nsb = binop_program(ConstVal::Float(1.5), ConstVal::Float(2.5), *op);
        let binary = generate(&nsb).unwrap();
        assert_eq!(count(&instrs(&binary), *expected), 1, "for {:?}", op);
    }
}

#[test]
fn int_arithmetic_selects_int_ops() {
    for (op, expected) in [
        (BinOp::Add, S::IAdd),
        (BinOp::Sub, S::ISub),
        (BinOp::Mul, S::IMul),
        (BinOp::Div, S::SDiv),
        (BinOp::Mod, S::SMod),
    ]
    .iter()
    {
        let nsb = binop_program(ConstVal::Int(12), ConstVal::Int(5), *op);
        let binary = generate(&nsb).unwrap();
        assert_eq!(count(&instrs(&binary), *expected), 1, "for {:?}", op);
    }
}

#[test]
fn bool_logic_selects_logical_ops() {
    for (op, expected) in [(BinOp::And, S::LogicalAnd), (BinOp::Or, S::LogicalOr)].iter() {
        let nsb = binop_program(ConstVal::Bool(true), ConstVal::Bool(false), *op);
        let binary = generate(&nsb).unwrap();
        assert_eq!(count(&instrs(&binary), *expected), 1, "for {:?}", op);
    }
}

#[test]
fn unlisted_operand_pairs_are_rejected() {
    let cases = vec![
        // Different element types never mix.
        binop_program(ConstVal::Float(1.0), ConstVal::Int(2), BinOp::Add),
        // Logic needs booleans.
        binop_program(ConstVal::Int(1), ConstVal::Int(2), BinOp::And),
        // Arithmetic needs numbers.
        binop_program(ConstVal::Bool(true), ConstVal::Bool(false), BinOp::Add),
    ];
    for nsb in cases {
        match generate(&nsb) {
            Err(ShaderError::Type(_)) => {}
            other => panic!("expected a type error, got {:?}", other.map(|_| ())),
        }
    }
}

fn vec2_of(x: f64, y: f64) -> Vec<Op> {
    vec![
        Op::LoadConstant(ConstVal::Float(x)),
        Op::LoadConstant(ConstVal::Float(y)),
        Op::Call {
            func: "vec2".to_owned(),
            nargs: 2,
        },
    ]
}

#[test]
fn scalar_times_vector_uses_vector_times_scalar() {
    let mut body = vec![Op::LoadConstant(ConstVal::Float(3.0))];
    body.extend(vec2_of(1.0, 2.0));
    body.push(Op::BinaryOp(BinOp::Mul));
    body.push(Op::PopTop);
    let binary = generate(&compute_nsb(body)).unwrap();
    assert_eq!(count(&instrs(&binary), S::VectorTimesScalar), 1);
}

#[test]
fn scalar_plus_vector_broadcasts() {
    let mut body = vec![Op::LoadConstant(ConstVal::Float(3.0))];
    body.extend(vec2_of(1.0, 2.0));
    body.push(Op::BinaryOp(BinOp::Add));
    body.push(Op::PopTop);
    let binary = generate(&compute_nsb(body)).unwrap();
    let instrs = instrs(&binary);
    // One construct for the vec2 literal, one for the broadcast scalar.
    assert_eq!(count(&instrs, S::CompositeConstruct), 2);
    assert_eq!(count(&instrs, S::FAdd), 1);
}

#[test]
fn matrix_multiplication_shapes() {
    let with_matrices = |expr: Vec<Op>| {
        let mut ops = vec![Op::Resource {
            name: "uniform.u".to_owned(),
            kind: ResourceKind::Uniform,
            slot: Slot::Index(0),
            typename: "Struct(a=Matrix(3,2,f32), b=Matrix(2,3,f32), c=Matrix(3,4,f32), v=Vector(3,f32))"
                .to_owned(),
        }];
        ops.extend(expr);
        ops.push(Op::PopTop);
        compute_nsb(ops)
    };
    let member = |name: &str| {
        vec![
            Op::LoadName("uniform.u".to_owned()),
            Op::LoadAttr(name.to_owned()),
        ]
    };

    // (3 cols, 2 rows) x (2 cols, 3 rows): inner dimensions agree.
    let mut good = member("a");
    good.extend(member("b"));
    good.push(Op::BinaryOp(BinOp::Mul));
    let binary = generate(&with_matrices(good)).unwrap();
    assert_eq!(count(&instrs(&binary), S::MatrixTimesMatrix), 1);

    // Matrix times its column-count vector.
    let mut good = member("a");
    good.extend(member("v"));
    good.push(Op::BinaryOp(BinOp::Mul));
    let binary = generate(&with_matrices(good)).unwrap();
    assert_eq!(count(&instrs(&binary), S::MatrixTimesVector), 1);

    // (3 cols, 2 rows) x (3 cols, 4 rows): shape mismatch.
    let mut bad = member("a");
    bad.extend(member("c"));
    bad.push(Op::BinaryOp(BinOp::Mul));
    assert!(matches!(
        generate(&with_matrices(bad)),
        Err(ShaderError::Type(_))
    ));

    // Matrices only multiply.
    let mut bad = member("a");
    bad.extend(member("b"));
    bad.push(Op::BinaryOp(BinOp::Add));
    assert!(matches!(
        generate(&with_matrices(bad)),
        Err(ShaderError::Type(_))
    ));
}

#[test]
fn scalar_conversions_pick_by_kind_pair() {
    let convert = |value: ConstVal, target: &str| {
        compute_nsb(vec![
            Op::LoadConstant(value),
            Op::Call {
                func: target.to_owned(),
                nargs: 1,
            },
            Op::PopTop,
        ])
    };
    let cases = vec![
        (convert(ConstVal::Int(3), "f32"), S::ConvertSToF),
        (convert(ConstVal::Float(3.0), "i32"), S::ConvertFToS),
        (convert(ConstVal::Float(3.0), "u32"), S::ConvertFToU),
        // Same width, different signedness reinterprets.
        (convert(ConstVal::Int(3), "u32"), S::Bitcast),
        (convert(ConstVal::Int(3), "i64"), S::SConvert),
        (convert(ConstVal::Float(3.0), "f64"), S::FConvert),
        (convert(ConstVal::Bool(true), "f32"), S::Select),
        (convert(ConstVal::Float(3.0), "bool"), S::FOrdNotEqual),
        (convert(ConstVal::Int(3), "bool"), S::INotEqual),
    ];
    for (nsb, expected) in cases {
        let binary = generate(&nsb).unwrap();
        assert_eq!(count(&instrs(&binary), expected), 1, "for {:?}", expected);
    }
}

#[test]
fn fmod_and_modulo_differ() {
    // `%` follows the divisor's sign, math.fmod the dividend's.
    let nsb = compute_nsb(vec![
        Op::LoadConstant(ConstVal::Float(-5.0)),
        Op::LoadConstant(ConstVal::Float(3.0)),
        Op::BinaryOp(BinOp::Mod),
        Op::PopTop,
        Op::LoadConstant(ConstVal::Float(-5.0)),
        Op::LoadConstant(ConstVal::Float(3.0)),
        Op::Call {
            func: "math.fmod".to_owned(),
            nargs: 2,
        },
        Op::PopTop,
    ]);
    let binary = generate(&nsb).unwrap();
    let instrs = instrs(&binary);
    assert_eq!(count(&instrs, S::FMod), 1);
    assert_eq!(count(&instrs, S::FRem), 1);
}

#[test]
fn stdlib_calls_import_the_extended_set() {
    let nsb = compute_nsb(vec![
        Op::LoadConstant(ConstVal::Float(2.0)),
        Op::Call {
            func: "stdlib.sqrt".to_owned(),
            nargs: 1,
        },
        Op::PopTop,
        Op::LoadConstant(ConstVal::Int(-4)),
        Op::Call {
            func: "abs".to_owned(),
            nargs: 1,
        },
        Op::PopTop,
    ]);
    let binary = generate(&nsb).unwrap();
    let instrs = instrs(&binary);
    assert_eq!(count(&instrs, S::ExtInstImport), 1);
    let exts = util::find_all(&instrs, S::ExtInst);
    assert_eq!(exts.len(), 2);
    assert_eq!(exts[0][3], spirv::GLOp::Sqrt as u32);
    assert_eq!(exts[1][3], spirv::GLOp::SAbs as u32);
}

/// Packing a vec4 from one f32 and one ivec3 converts the three integer
/// components and composes once.
#[test]
fn vector_pack_and_convert() {
    let mut b = CodeBuilder::new("compute_pack");
    b.arg(
        "index",
        ResourceKind::Input,
        Slot::Name("GlobalInvocationId".to_owned()),
        "i32",
    );
    b.arg("data1", ResourceKind::Buffer, Slot::Index(0), "Array(f32)");
    b.arg("data2", ResourceKind::Buffer, Slot::Index(1), "Array(ivec3)");
    b.arg("data3", ResourceKind::Buffer, Slot::Index(2), "Array(vec4)");

    b.load_global("vec4");
    b.load_fast("data1").load_fast("index").op(SourceOp::BinarySubscr);
    b.load_fast("data2").load_fast("index").op(SourceOp::BinarySubscr);
    b.call_function(2);
    b.load_fast("data3").load_fast("index").op(SourceOp::StoreSubscr);
    b.return_none();

    let module = compile(&b.build()).unwrap();
    let instrs = instrs(&module.binary);
    assert_eq!(count(&instrs, S::CompositeConstruct), 1);
    assert_eq!(count(&instrs, S::ConvertSToF), 3);
    assert_eq!(count(&instrs, S::CompositeExtract), 3);

    // The conversions all happen before the construct.
    let construct_pos = instrs
        .iter()
        .position(|(code, _)| *code == S::CompositeConstruct as u32)
        .unwrap();
    let last_convert = instrs
        .iter()
        .rposition(|(code, _)| *code == S::ConvertSToF as u32)
        .unwrap();
    assert!(last_convert < construct_pos);
}

#[test]
fn power_shortcuts_lower_in_the_front_end() {
    let mut b = CodeBuilder::new("compute_pow");
    b.arg("data", ResourceKind::Buffer, Slot::Index(0), "Array(f32)");
    b.load_const(0i64).store_fast("i");
    // x = data[i] ** 2 becomes a self-multiplication.
    b.load_fast("data").load_fast("i").op(SourceOp::BinarySubscr);
    b.load_const(2i64);
    b.op(SourceOp::BinaryPower);
    b.store_fast("x");
    // y = data[i] ** 0.5 becomes sqrt.
    b.load_fast("data").load_fast("i").op(SourceOp::BinarySubscr);
    b.load_const(0.5);
    b.op(SourceOp::BinaryPower);
    b.store_fast("y");
    b.return_none();

    let module = compile(&b.build()).unwrap();
    assert!(module.nsb.contains(&Op::BinaryOp(BinOp::Mul)));
    assert!(module.nsb.contains(&Op::Call {
        func: "sqrt".to_owned(),
        nargs: 1
    }));
    let instrs = instrs(&module.binary);
    assert_eq!(count(&instrs, S::FMul), 1);
    assert_eq!(count(&instrs, S::ExtInst), 1);
}
