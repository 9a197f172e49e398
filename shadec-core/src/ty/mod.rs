//! Structured representations of SPIR-V types.
use std::fmt;

pub mod parse;
pub mod reg;

pub use self::reg::TypeRegistry;
pub use spirv::{Dim, ImageFormat, StorageClass};

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum ScalarType {
    /// Boolean value of either true or false. Booleans are never exposed to
    /// the host; they only exist inside a function.
    Bool,
    /// Two's complement integer.
    Int {
        /// Number of bits the integer takes.
        bits: u32,
        /// Whether the integer is signed.
        signed: bool,
    },
    /// IEEE 754 floating-point number.
    Float {
        /// Number of bits the float takes.
        bits: u32,
    },
}
impl ScalarType {
    pub fn int(bits: u32) -> Self {
        Self::Int { bits, signed: true }
    }
    pub fn uint(bits: u32) -> Self {
        Self::Int {
            bits,
            signed: false,
        }
    }
    pub fn float(bits: u32) -> Self {
        Self::Float { bits }
    }
    pub fn i32() -> Self {
        Self::int(32)
    }
    pub fn u32() -> Self {
        Self::uint(32)
    }
    pub fn f32() -> Self {
        Self::float(32)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }
    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int { .. })
    }
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float { .. })
    }
    /// True for signed integers, false for unsigned integers and everything
    /// else.
    pub fn is_signed_int(&self) -> bool {
        matches!(self, Self::Int { signed: true, .. })
    }

    /// Size in bytes, if the type can be laid out in a buffer.
    pub fn byte_size(&self) -> Option<u32> {
        match self {
            Self::Bool => None,
            Self::Int { bits, .. } => Some(bits / 8),
            Self::Float { bits } => Some(bits / 8),
        }
    }
}
impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int { bits, signed } => match signed {
                true => write!(f, "i{}", bits),
                false => write!(f, "u{}", bits),
            },
            Self::Float { bits } => write!(f, "f{}", bits),
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct VectorType {
    /// Vector scalar type.
    pub scalar_ty: ScalarType,
    /// Number of scalar components in the vector, 2 to 4.
    pub scalar_count: u32,
}
impl VectorType {
    pub fn byte_size(&self) -> Option<u32> {
        Some(self.scalar_ty.byte_size()? * self.scalar_count)
    }
}
impl fmt::Display for VectorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vec{}<{}>", self.scalar_count, self.scalar_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct MatrixType {
    /// Number of columns.
    pub cols: u32,
    /// Number of rows, which is the length of each column vector.
    pub rows: u32,
    /// Matrix element scalar type.
    pub scalar_ty: ScalarType,
}
impl MatrixType {
    /// Type of one column.
    pub fn column_ty(&self) -> VectorType {
        VectorType {
            scalar_ty: self.scalar_ty.clone(),
            scalar_count: self.rows,
        }
    }
    /// Stride between column vectors in a buffer.
    pub fn stride(&self) -> Option<u32> {
        Some(self.rows * self.scalar_ty.byte_size()?)
    }
    pub fn byte_size(&self) -> Option<u32> {
        Some(self.stride()? * self.cols)
    }
}
impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mat{}x{}<{}>", self.cols, self.rows, self.scalar_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ArrayType {
    /// Type of the array element.
    pub element_ty: Box<Type>,
    /// Number of elements. `None` if the length is only known at runtime,
    /// which is the shape storage buffers usually take.
    pub element_count: Option<u32>,
}
impl ArrayType {
    pub fn byte_size(&self) -> Option<u32> {
        Some(self.element_ty.byte_size()? * self.element_count?)
    }
}
impl fmt::Display for ArrayType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(n) = self.element_count {
            write!(f, "[{}; {}]", self.element_ty, n)
        } else {
            write!(f, "[{}]", self.element_ty)
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct StructMember {
    pub name: String,
    pub ty: Type,
}
#[derive(PartialEq, Eq, Hash, Clone, Debug, Default)]
pub struct StructType {
    pub name: Option<String>,
    pub members: Vec<StructMember>,
}
impl StructType {
    /// Index of the member called `name`.
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
    pub fn byte_size(&self) -> Option<u32> {
        self.members.iter().map(|m| m.ty.byte_size()).sum()
    }
}
impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{} {{ ", name)?;
        } else {
            f.write_str("{ ")?;
        }
        for (i, member) in self.members.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", member.name, member.ty)?;
        }
        f.write_str(" }")
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ImageType {
    /// Scalar type of image access result.
    pub scalar_ty: ScalarType,
    /// Dimension of the image.
    pub dim: Dim,
    /// Whether the image has multiple layers.
    pub is_array: bool,
    /// Whether the image is multisampled.
    pub is_multisampled: bool,
    /// Declared texel format. `Unknown` for sampled images.
    pub fmt: ImageFormat,
}
impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dim = match self.dim {
            Dim::Dim1D => "1D",
            Dim::Dim2D => "2D",
            Dim::Dim3D => "3D",
            Dim::DimCube => "Cube",
            _ => "?",
        };
        let is_array = if self.is_array { "Array" } else { "" };
        let ms = if self.is_multisampled { "MS" } else { "" };
        write!(
            f,
            "Image{}{}{}<{},{:?}>",
            dim, is_array, ms, self.scalar_ty, self.fmt
        )
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct PointerType {
    pub pointee_ty: Box<Type>,
    pub store_cls: StorageClass,
}
impl fmt::Display for PointerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pointer {{ {} }}", self.pointee_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct FunctionType {
    pub return_ty: Box<Type>,
    pub arg_tys: Vec<Type>,
}
impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("fn (")?;
        for (i, arg) in self.arg_tys.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ") -> {}", self.return_ty)
    }
}

macro_rules! declr_ty_accessor {
    ([$e:ident] $($name:ident -> $ty:ident,)+) => {
        $(
            pub fn $name(&self) -> bool {
                matches!(self, $e::$ty(..))
            }
        )+
    }
}
macro_rules! declr_ty_downcast {
    ([$e:ident] $($name:ident -> $ty:ident($inner_ty:ident),)+) => {
        $(
            pub fn $name(&self) -> Option<&$inner_ty> {
                match self {
                    $e::$ty(x) => Some(x),
                    _ => None,
                }
            }
        )+
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum Type {
    /// Pseudo-type for functions that return no value.
    Void,
    /// A single boolean, integer or floating-point value.
    Scalar(ScalarType),
    /// A collection of scalars.
    Vector(VectorType),
    /// A collection of column vectors.
    Matrix(MatrixType),
    /// Repetition of a single type, fixed-length or runtime-sized.
    Array(ArrayType),
    /// Aggregation of types.
    Struct(StructType),
    /// An image. Its `Sampled` and `Depth` words are resolved from usage, so
    /// image types are declared per resource rather than interned.
    Image(ImageType),
    /// An image joined with a sampler state, ready to be sampled.
    SampledImage(ImageType),
    /// Separable sampler state.
    Sampler,
    /// Pointer into a storage class.
    Pointer(PointerType),
    /// Function signature.
    Function(FunctionType),
}
impl Type {
    declr_ty_accessor! {
        [Type]
        is_scalar -> Scalar,
        is_vector -> Vector,
        is_matrix -> Matrix,
        is_array -> Array,
        is_struct -> Struct,
        is_image -> Image,
        is_pointer -> Pointer,
    }
    declr_ty_downcast! {
        [Type]
        as_scalar -> Scalar(ScalarType),
        as_vector -> Vector(VectorType),
        as_matrix -> Matrix(MatrixType),
        as_array -> Array(ArrayType),
        as_struct -> Struct(StructType),
        as_image -> Image(ImageType),
        as_pointer -> Pointer(PointerType),
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Scalar(ScalarType::Bool))
    }

    /// The element scalar type of a scalar, vector or matrix.
    pub fn element_scalar(&self) -> Option<&ScalarType> {
        match self {
            Type::Scalar(x) => Some(x),
            Type::Vector(x) => Some(&x.scalar_ty),
            Type::Matrix(x) => Some(&x.scalar_ty),
            _ => None,
        }
    }

    /// The type produced by indexing into this type.
    pub fn subtype(&self) -> Option<Type> {
        match self {
            Type::Vector(x) => Some(Type::Scalar(x.scalar_ty.clone())),
            Type::Matrix(x) => Some(Type::Vector(x.column_ty())),
            Type::Array(x) => Some((*x.element_ty).clone()),
            _ => None,
        }
    }

    /// Size in bytes when laid out in a buffer, fields packed back to back.
    pub fn byte_size(&self) -> Option<u32> {
        match self {
            Type::Scalar(x) => x.byte_size(),
            Type::Vector(x) => x.byte_size(),
            Type::Matrix(x) => x.byte_size(),
            Type::Array(x) => x.byte_size(),
            Type::Struct(x) => x.byte_size(),
            _ => None,
        }
    }

    pub fn vec(scalar_ty: ScalarType, scalar_count: u32) -> Type {
        Type::Vector(VectorType {
            scalar_ty,
            scalar_count,
        })
    }
}
impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Scalar(x) => x.fmt(f),
            Type::Vector(x) => x.fmt(f),
            Type::Matrix(x) => x.fmt(f),
            Type::Array(x) => x.fmt(f),
            Type::Struct(x) => x.fmt(f),
            Type::Image(x) => x.fmt(f),
            Type::SampledImage(x) => write!(f, "SampledImage<{}>", x),
            Type::Sampler => f.write_str("Sampler"),
            Type::Pointer(x) => x.fmt(f),
            Type::Function(x) => x.fmt(f),
        }
    }
}
