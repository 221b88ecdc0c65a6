//! Closed set of uniform value shapes

use std::fmt;

/// Component type of a uniform shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformScalar {
    Float,
    Int,
    UInt,
}

impl UniformScalar {
    fn wgsl_name(self) -> &'static str {
        match self {
            UniformScalar::Float => "f32",
            UniformScalar::Int => "i32",
            UniformScalar::UInt => "u32",
        }
    }
}

/// Every uniform shape a program can be handed
///
/// `MatCR` follows GLSL naming: `C` columns of `R` rows, so `Mat23` is
/// WGSL `mat2x3<f32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformShape {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    UVec2,
    UVec3,
    UVec4,
    Mat22,
    Mat33,
    Mat44,
    Mat23,
    Mat32,
    Mat24,
    Mat42,
    Mat34,
    Mat43,
}

impl UniformShape {
    pub const ALL: [UniformShape; 21] = [
        UniformShape::Float,
        UniformShape::Vec2,
        UniformShape::Vec3,
        UniformShape::Vec4,
        UniformShape::Int,
        UniformShape::IVec2,
        UniformShape::IVec3,
        UniformShape::IVec4,
        UniformShape::UInt,
        UniformShape::UVec2,
        UniformShape::UVec3,
        UniformShape::UVec4,
        UniformShape::Mat22,
        UniformShape::Mat33,
        UniformShape::Mat44,
        UniformShape::Mat23,
        UniformShape::Mat32,
        UniformShape::Mat24,
        UniformShape::Mat42,
        UniformShape::Mat34,
        UniformShape::Mat43,
    ];

    /// Scalar or vector shape with `size` components (1..=4)
    pub fn vector(scalar: UniformScalar, size: usize) -> Option<Self> {
        use UniformShape::*;
        let shape = match (scalar, size) {
            (UniformScalar::Float, 1) => Float,
            (UniformScalar::Float, 2) => Vec2,
            (UniformScalar::Float, 3) => Vec3,
            (UniformScalar::Float, 4) => Vec4,
            (UniformScalar::Int, 1) => Int,
            (UniformScalar::Int, 2) => IVec2,
            (UniformScalar::Int, 3) => IVec3,
            (UniformScalar::Int, 4) => IVec4,
            (UniformScalar::UInt, 1) => UInt,
            (UniformScalar::UInt, 2) => UVec2,
            (UniformScalar::UInt, 3) => UVec3,
            (UniformScalar::UInt, 4) => UVec4,
            _ => return None,
        };
        Some(shape)
    }

    /// Float matrix shape with the given column and row counts (2..=4)
    pub fn matrix(columns: usize, rows: usize) -> Option<Self> {
        use UniformShape::*;
        let shape = match (columns, rows) {
            (2, 2) => Mat22,
            (3, 3) => Mat33,
            (4, 4) => Mat44,
            (2, 3) => Mat23,
            (3, 2) => Mat32,
            (2, 4) => Mat24,
            (4, 2) => Mat42,
            (3, 4) => Mat34,
            (4, 3) => Mat43,
            _ => return None,
        };
        Some(shape)
    }

    pub fn scalar(self) -> UniformScalar {
        use UniformShape::*;
        match self {
            Int | IVec2 | IVec3 | IVec4 => UniformScalar::Int,
            UInt | UVec2 | UVec3 | UVec4 => UniformScalar::UInt,
            _ => UniformScalar::Float,
        }
    }

    /// `(columns, rows)` for matrix shapes
    pub fn matrix_dims(self) -> Option<(usize, usize)> {
        use UniformShape::*;
        match self {
            Mat22 => Some((2, 2)),
            Mat33 => Some((3, 3)),
            Mat44 => Some((4, 4)),
            Mat23 => Some((2, 3)),
            Mat32 => Some((3, 2)),
            Mat24 => Some((2, 4)),
            Mat42 => Some((4, 2)),
            Mat34 => Some((3, 4)),
            Mat43 => Some((4, 3)),
            _ => None,
        }
    }

    /// Number of scalar components a value of this shape carries
    pub fn components(self) -> usize {
        use UniformShape::*;
        match self.matrix_dims() {
            Some((columns, rows)) => columns * rows,
            None => match self {
                Float | Int | UInt => 1,
                Vec2 | IVec2 | UVec2 => 2,
                Vec3 | IVec3 | UVec3 => 3,
                _ => 4,
            },
        }
    }
}

impl fmt::Display for UniformShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalar = self.scalar().wgsl_name();
        match self.matrix_dims() {
            Some((columns, rows)) => write!(f, "mat{}x{}<{}>", columns, rows, scalar),
            None => match self.components() {
                1 => f.write_str(scalar),
                n => write!(f, "vec{}<{}>", n, scalar),
            },
        }
    }
}

/// Order of the values in a [`Matrix`]
///
/// The layout travels with the value down to the block writer; nothing checks
/// it against how the kernel reads the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatrixLayout {
    #[default]
    ColumnMajor,
    RowMajor,
}

/// Float matrix with `N` values in either layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix<const N: usize> {
    pub values: [f32; N],
    pub layout: MatrixLayout,
}

impl<const N: usize> Matrix<N> {
    pub fn column_major(values: [f32; N]) -> Self {
        Self {
            values,
            layout: MatrixLayout::ColumnMajor,
        }
    }

    pub fn row_major(values: [f32; N]) -> Self {
        Self {
            values,
            layout: MatrixLayout::RowMajor,
        }
    }
}

/// A uniform value, passed by value into a single set call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    UVec2([u32; 2]),
    UVec3([u32; 3]),
    UVec4([u32; 4]),
    Mat22(Matrix<4>),
    Mat33(Matrix<9>),
    Mat44(Matrix<16>),
    Mat23(Matrix<6>),
    Mat32(Matrix<6>),
    Mat24(Matrix<8>),
    Mat42(Matrix<8>),
    Mat34(Matrix<12>),
    Mat43(Matrix<12>),
}

/// What the block writer needs to place a value
pub(crate) enum Payload<'a> {
    /// Scalars and vectors are copied as tightly packed components
    Components(&'a [u8]),
    Matrix {
        columns: usize,
        rows: usize,
        values: &'a [f32],
        layout: MatrixLayout,
    },
}

impl UniformValue {
    pub fn shape(&self) -> UniformShape {
        match self {
            UniformValue::Float(_) => UniformShape::Float,
            UniformValue::Vec2(_) => UniformShape::Vec2,
            UniformValue::Vec3(_) => UniformShape::Vec3,
            UniformValue::Vec4(_) => UniformShape::Vec4,
            UniformValue::Int(_) => UniformShape::Int,
            UniformValue::IVec2(_) => UniformShape::IVec2,
            UniformValue::IVec3(_) => UniformShape::IVec3,
            UniformValue::IVec4(_) => UniformShape::IVec4,
            UniformValue::UInt(_) => UniformShape::UInt,
            UniformValue::UVec2(_) => UniformShape::UVec2,
            UniformValue::UVec3(_) => UniformShape::UVec3,
            UniformValue::UVec4(_) => UniformShape::UVec4,
            UniformValue::Mat22(_) => UniformShape::Mat22,
            UniformValue::Mat33(_) => UniformShape::Mat33,
            UniformValue::Mat44(_) => UniformShape::Mat44,
            UniformValue::Mat23(_) => UniformShape::Mat23,
            UniformValue::Mat32(_) => UniformShape::Mat32,
            UniformValue::Mat24(_) => UniformShape::Mat24,
            UniformValue::Mat42(_) => UniformShape::Mat42,
            UniformValue::Mat34(_) => UniformShape::Mat34,
            UniformValue::Mat43(_) => UniformShape::Mat43,
        }
    }

    pub(crate) fn payload(&self) -> Payload<'_> {
        match self {
            UniformValue::Float(v) => Payload::Components(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::Vec3(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::Vec4(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::Int(v) => Payload::Components(bytemuck::bytes_of(v)),
            UniformValue::IVec2(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::IVec3(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::IVec4(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::UInt(v) => Payload::Components(bytemuck::bytes_of(v)),
            UniformValue::UVec2(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::UVec3(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::UVec4(v) => Payload::Components(bytemuck::cast_slice(v)),
            UniformValue::Mat22(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat33(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat44(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat23(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat32(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat24(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat42(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat34(m) => matrix_payload(self.shape(), &m.values, m.layout),
            UniformValue::Mat43(m) => matrix_payload(self.shape(), &m.values, m.layout),
        }
    }
}

fn matrix_payload(shape: UniformShape, values: &[f32], layout: MatrixLayout) -> Payload<'_> {
    let (columns, rows) = shape.matrix_dims().unwrap_or((0, 0));
    Payload::Matrix {
        columns,
        rows,
        values,
        layout,
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::UInt(v)
    }
}

macro_rules! from_glam {
    ($($glam:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$glam> for UniformValue {
                fn from(v: $glam) -> Self {
                    UniformValue::$variant(v.to_array())
                }
            }
        )*
    };
}

from_glam! {
    glam::Vec2 => Vec2,
    glam::Vec3 => Vec3,
    glam::Vec4 => Vec4,
    glam::IVec2 => IVec2,
    glam::IVec3 => IVec3,
    glam::IVec4 => IVec4,
    glam::UVec2 => UVec2,
    glam::UVec3 => UVec3,
    glam::UVec4 => UVec4,
}

impl From<glam::Mat2> for UniformValue {
    fn from(m: glam::Mat2) -> Self {
        UniformValue::Mat22(Matrix::column_major(m.to_cols_array()))
    }
}

impl From<glam::Mat3> for UniformValue {
    fn from(m: glam::Mat3) -> Self {
        UniformValue::Mat33(Matrix::column_major(m.to_cols_array()))
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(m: glam::Mat4) -> Self {
        UniformValue::Mat44(Matrix::column_major(m.to_cols_array()))
    }
}
