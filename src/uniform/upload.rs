//! Block image writer for uniform values
//!
//! Uniform blocks use the WGSL uniform address-space layout: a column of two
//! floats is 8-byte aligned, columns of three or four floats are 16-byte
//! aligned. Scalars and vectors are copied verbatim.

use super::value::{MatrixLayout, Payload, UniformShape, UniformValue};

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Distance in bytes between matrix columns of `rows` floats
pub(crate) fn column_stride(rows: usize) -> usize {
    if rows == 2 {
        2 * FLOAT_SIZE
    } else {
        4 * FLOAT_SIZE
    }
}

/// Bytes a value of `shape` occupies inside a block
pub fn encoded_size(shape: UniformShape) -> usize {
    match shape.matrix_dims() {
        Some((columns, rows)) => columns * column_stride(rows),
        None => shape.components() * FLOAT_SIZE,
    }
}

/// Place `value` into `block` at `offset`
///
/// Returns `false` without touching the block when the value would not fit.
pub(crate) fn write_value(block: &mut [u8], offset: usize, value: &UniformValue) -> bool {
    let Some(dst) = offset
        .checked_add(encoded_size(value.shape()))
        .and_then(|end| block.get_mut(offset..end))
    else {
        return false;
    };

    match value.payload() {
        Payload::Components(bytes) => dst.copy_from_slice(bytes),
        Payload::Matrix {
            columns,
            rows,
            values,
            layout,
        } => write_matrix(dst, columns, rows, values, layout),
    }
    true
}

fn write_matrix(dst: &mut [u8], columns: usize, rows: usize, values: &[f32], layout: MatrixLayout) {
    let stride = column_stride(rows);

    for column in 0..columns {
        for row in 0..rows {
            let value = match layout {
                MatrixLayout::ColumnMajor => values[column * rows + row],
                MatrixLayout::RowMajor => values[row * columns + column],
            };
            let at = column * stride + row * FLOAT_SIZE;
            dst[at..at + FLOAT_SIZE].copy_from_slice(bytemuck::bytes_of(&value));
        }
    }
}
