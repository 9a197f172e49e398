//! Textual type descriptors.
//!
//! Resource declarations carry their types as text, e.g. `"vec4"`,
//! `"Array(f32)"` or `"Struct(scale=f32, offset=vec2)"`. This module resolves
//! the text to a [`Type`].
use crate::error::{Result, ShaderError};
use crate::ty::{ArrayType, MatrixType, ScalarType, StructMember, StructType, Type, VectorType};

/// What a bare name in shader code refers to in the type namespace.
pub enum TypeName {
    /// A concrete type such as `f32` or `vec3`.
    Concrete(Type),
    /// A type constructor that still needs arguments: `Array`, `Vector`,
    /// `Matrix` or `Struct`.
    Abstract(&'static str),
}

/// Resolve a bare name against the type namespace, or `None` if the name is
/// not a type at all.
pub fn resolve_name(name: &str) -> Option<TypeName> {
    match name {
        "Array" => return Some(TypeName::Abstract("Array")),
        "Vector" => return Some(TypeName::Abstract("Vector")),
        "Matrix" => return Some(TypeName::Abstract("Matrix")),
        "Struct" => return Some(TypeName::Abstract("Struct")),
        _ => {}
    }
    plain_type(name).map(TypeName::Concrete)
}

fn plain_type(name: &str) -> Option<Type> {
    let ty = match name {
        "bool" => Type::Scalar(ScalarType::Bool),
        "f16" => Type::Scalar(ScalarType::float(16)),
        "f32" => Type::Scalar(ScalarType::f32()),
        "f64" => Type::Scalar(ScalarType::float(64)),
        "i16" => Type::Scalar(ScalarType::int(16)),
        "i32" => Type::Scalar(ScalarType::i32()),
        "i64" => Type::Scalar(ScalarType::int(64)),
        "u8" => Type::Scalar(ScalarType::uint(8)),
        "u16" => Type::Scalar(ScalarType::uint(16)),
        "u32" => Type::Scalar(ScalarType::u32()),
        "u64" => Type::Scalar(ScalarType::uint(64)),
        "vec2" | "vec3" | "vec4" => vec_of(ScalarType::f32(), &name[3..])?,
        "ivec2" | "ivec3" | "ivec4" => vec_of(ScalarType::i32(), &name[4..])?,
        "uvec2" | "uvec3" | "uvec4" => vec_of(ScalarType::u32(), &name[4..])?,
        "bvec2" | "bvec3" | "bvec4" => vec_of(ScalarType::Bool, &name[4..])?,
        "mat2" | "mat3" | "mat4" => {
            let n: u32 = name[3..].parse().ok()?;
            Type::Matrix(MatrixType {
                cols: n,
                rows: n,
                scalar_ty: ScalarType::f32(),
            })
        }
        _ => return None,
    };
    Some(ty)
}

fn vec_of(scalar_ty: ScalarType, count: &str) -> Option<Type> {
    let scalar_count: u32 = count.parse().ok()?;
    Some(Type::Vector(VectorType {
        scalar_ty,
        scalar_count,
    }))
}

/// Parse a full type descriptor.
pub fn parse_typename(text: &str) -> Result<Type> {
    let text = text.trim();
    if let Some(ty) = plain_type(text) {
        return Ok(ty);
    }
    let (head, args) = match text.find('(') {
        Some(pos) if text.ends_with(')') => {
            (&text[..pos], split_args(&text[pos + 1..text.len() - 1]))
        }
        _ => {
            return Err(ShaderError::declaration(format!(
                "unknown type '{}'",
                text
            )))
        }
    };
    match head {
        "Array" => parse_array(text, &args),
        "Vector" => match args.as_slice() {
            [n, t] => {
                let scalar_count = parse_count(text, n)?;
                if !(2..=4).contains(&scalar_count) {
                    return Err(ShaderError::declaration(format!(
                        "vector length must be 2, 3 or 4 in '{}'",
                        text
                    )));
                }
                let scalar_ty = parse_scalar(text, t)?;
                Ok(Type::Vector(VectorType {
                    scalar_ty,
                    scalar_count,
                }))
            }
            _ => Err(ShaderError::declaration(format!(
                "Vector takes (length, scalar) in '{}'",
                text
            ))),
        },
        "Matrix" => match args.as_slice() {
            [c, r, t] => Ok(Type::Matrix(MatrixType {
                cols: parse_count(text, c)?,
                rows: parse_count(text, r)?,
                scalar_ty: parse_scalar(text, t)?,
            })),
            _ => Err(ShaderError::declaration(format!(
                "Matrix takes (cols, rows, scalar) in '{}'",
                text
            ))),
        },
        "Struct" => {
            let mut members = Vec::with_capacity(args.len());
            for arg in &args {
                let (name, ty) = match arg.split_once('=') {
                    Some((name, ty)) => (name.trim(), ty.trim()),
                    None => {
                        return Err(ShaderError::declaration(format!(
                            "struct fields are 'name=type' in '{}'",
                            text
                        )))
                    }
                };
                members.push(StructMember {
                    name: name.to_owned(),
                    ty: parse_typename(ty)?,
                });
            }
            Ok(Type::Struct(StructType {
                name: None,
                members,
            }))
        }
        _ => Err(ShaderError::declaration(format!(
            "unknown type '{}'",
            text
        ))),
    }
}

fn parse_array(text: &str, args: &[String]) -> Result<Type> {
    match args {
        [elem] => Ok(Type::Array(ArrayType {
            element_ty: Box::new(parse_typename(elem)?),
            element_count: None,
        })),
        [n, elem] => Ok(Type::Array(ArrayType {
            element_ty: Box::new(parse_typename(elem)?),
            element_count: Some(parse_count(text, n)?),
        })),
        _ => Err(ShaderError::declaration(format!(
            "Array takes (element) or (length, element) in '{}'",
            text
        ))),
    }
}

fn parse_count(text: &str, arg: &str) -> Result<u32> {
    arg.trim().parse().map_err(|_| {
        ShaderError::declaration(format!("expected a length, got '{}' in '{}'", arg, text))
    })
}

fn parse_scalar(text: &str, arg: &str) -> Result<ScalarType> {
    match parse_typename(arg)? {
        Type::Scalar(s) => Ok(s),
        _ => Err(ShaderError::declaration(format!(
            "expected a scalar type, got '{}' in '{}'",
            arg, text
        ))),
    }
}

/// Split on top-level commas, leaving nested parentheses intact.
fn split_args(body: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                cur.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                cur.push(c);
            }
            ',' if depth == 0 => {
                args.push(cur.trim().to_owned());
                cur = String::new();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        args.push(cur.trim().to_owned());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_and_nested_types() {
        assert_eq!(
            parse_typename("vec3").unwrap(),
            Type::vec(ScalarType::f32(), 3)
        );
        assert_eq!(
            parse_typename("Array(f32)").unwrap(),
            Type::Array(ArrayType {
                element_ty: Box::new(Type::Scalar(ScalarType::f32())),
                element_count: None,
            })
        );
        assert_eq!(
            parse_typename("Array(12, Vector(2, f32))").unwrap(),
            Type::Array(ArrayType {
                element_ty: Box::new(Type::vec(ScalarType::f32(), 2)),
                element_count: Some(12),
            })
        );
        let st = parse_typename("Struct(scale=f32, offset=vec2)").unwrap();
        let st = st.as_struct().unwrap();
        assert_eq!(st.members.len(), 2);
        assert_eq!(st.members[1].name, "offset");
        assert_eq!(st.members[1].ty, Type::vec(ScalarType::f32(), 2));
    }

    #[test]
    fn rejects_gibberish() {
        assert!(parse_typename("vec5").is_err());
        assert!(parse_typename("Vector(5, f32)").is_err());
        assert!(parse_typename("Dict(f32)").is_err());
    }
}
