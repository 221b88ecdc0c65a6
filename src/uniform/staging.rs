//! Host-side uniform block images
//!
//! [`UniformStaging`] holds one byte image per uniform block of a kernel and
//! resolves names against the reflected interface. It never touches the
//! device; a program uploads the dirty images before each dispatch.

use rustc_hash::FxHashMap;

use super::upload::{encoded_size, write_value};
use super::value::{Matrix, UniformValue};
use crate::error::{UniformError, UniformResult};
use crate::reflect::{KernelInterface, UniformLocation};

/// Uniform buffers are bound in multiples of this
const BLOCK_ALIGNMENT: usize = 16;

#[derive(Debug, Clone)]
struct BlockImage {
    bytes: Vec<u8>,
    dirty: bool,
}

/// Name-addressed uniform values staged for upload
#[derive(Debug, Clone)]
pub struct UniformStaging {
    names: FxHashMap<String, UniformLocation>,
    blocks: Vec<BlockImage>,
}

macro_rules! shape_setters {
    ($($name:ident($ty:ty) => $variant:ident;)*) => {
        $(
            #[doc = concat!("Set a `", stringify!($variant), "` uniform")]
            pub fn $name(&mut self, name: &str, value: $ty) -> UniformResult<()> {
                self.set_uniform(name, UniformValue::$variant(value))
            }
        )*
    };
}

macro_rules! all_shape_setters {
    ($macro:ident) => {
        $macro! {
            set_float(f32) => Float;
            set_vec2([f32; 2]) => Vec2;
            set_vec3([f32; 3]) => Vec3;
            set_vec4([f32; 4]) => Vec4;
            set_int(i32) => Int;
            set_ivec2([i32; 2]) => IVec2;
            set_ivec3([i32; 3]) => IVec3;
            set_ivec4([i32; 4]) => IVec4;
            set_uint(u32) => UInt;
            set_uvec2([u32; 2]) => UVec2;
            set_uvec3([u32; 3]) => UVec3;
            set_uvec4([u32; 4]) => UVec4;
            set_mat22(Matrix<4>) => Mat22;
            set_mat33(Matrix<9>) => Mat33;
            set_mat44(Matrix<16>) => Mat44;
            set_mat23(Matrix<6>) => Mat23;
            set_mat32(Matrix<6>) => Mat32;
            set_mat24(Matrix<8>) => Mat24;
            set_mat42(Matrix<8>) => Mat42;
            set_mat34(Matrix<12>) => Mat34;
            set_mat43(Matrix<12>) => Mat43;
        }
    };
}

pub(crate) use all_shape_setters;
pub(crate) use shape_setters;

impl UniformStaging {
    /// Zeroed images for every uniform block of `interface`
    ///
    /// Each image is at least as large as the furthest value placed in it.
    pub fn new(interface: &KernelInterface) -> Self {
        let mut names = FxHashMap::default();
        let mut sizes: Vec<usize> = interface
            .uniform_blocks
            .iter()
            .map(|block| block.size)
            .collect();

        for name in interface.uniform_names() {
            let Some(location) = interface.uniform(name) else { continue };
            if let Some(size) = sizes.get_mut(location.block) {
                let end = location.offset + encoded_size(location.shape);
                *size = (*size).max(end.next_multiple_of(BLOCK_ALIGNMENT));
            }
            names.insert(name.to_string(), location);
        }

        let blocks = sizes
            .into_iter()
            .map(|size| BlockImage {
                bytes: vec![0; size],
                dirty: false,
            })
            .collect();

        Self { names, blocks }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Current image of a block
    pub fn block(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).map(|block| block.bytes.as_slice())
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.blocks.get(index).is_some_and(|block| block.dirty)
    }

    /// Set a uniform by name
    ///
    /// Fails without touching any image when the name is not an active
    /// uniform or is declared with a different shape.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> UniformResult<()> {
        let value = value.into();
        let location = *self
            .names
            .get(name)
            .ok_or_else(|| UniformError::NotFound(name.to_string()))?;

        if location.shape != value.shape() {
            return Err(UniformError::ShapeMismatch {
                name: name.to_string(),
                declared: location.shape,
                given: value.shape(),
            });
        }

        let placement = || UniformError::Placement {
            name: name.to_string(),
            offset: location.offset,
            size: encoded_size(location.shape),
        };
        let block = self.blocks.get_mut(location.block).ok_or_else(placement)?;
        if !write_value(&mut block.bytes, location.offset, &value) {
            return Err(placement());
        }
        block.dirty = true;
        Ok(())
    }

    all_shape_setters!(shape_setters);

    /// Hand every changed image to `upload` and mark it clean
    pub(crate) fn flush(&mut self, mut upload: impl FnMut(usize, &[u8])) {
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block.dirty {
                upload(index, &block.bytes);
                block.dirty = false;
            }
        }
    }
}
