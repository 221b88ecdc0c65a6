//! Storage buffers
//!
//! A [`Buffer`] owns a device allocation and occupies one binding slot in its
//! context. The allocation is rounded up to the copy alignment so that any
//! logical size, including zero, can be bound; reads and writes are checked
//! against the logical size only.

use bytemuck::Pod;
use std::sync::Arc;

use crate::binding::BufferId;
use crate::context::Context;
use crate::debug::DebugLevel;
use crate::error::{BufferError, BufferResult};

const COPY_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

/// Physical allocation size backing a logical `size`
fn capacity_for(size: usize) -> usize {
    size.max(1).next_multiple_of(COPY_ALIGNMENT)
}

/// Smallest aligned window covering `offset..offset + len`
fn aligned_window(offset: usize, len: usize) -> (usize, usize) {
    let start = offset - offset % COPY_ALIGNMENT;
    let end = (offset + len).next_multiple_of(COPY_ALIGNMENT);
    (start, end)
}

/// Fails unless `offset..offset + len` lies inside a buffer of `size` bytes
fn check_range(offset: usize, len: usize, size: usize) -> BufferResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BufferError::OutOfBounds { offset, len, size }),
    }
}

/// A device-resident byte buffer bound to a numbered slot
pub struct Buffer {
    context: Context,
    id: BufferId,
    binding: u32,
    size: usize,
    raw: Arc<wgpu::Buffer>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id.0)
            .field("binding", &self.binding)
            .field("size", &self.size)
            .finish()
    }
}

impl Buffer {
    /// Allocate `size` bytes bound to `binding`
    pub fn new(context: &Context, binding: u32, size: usize) -> BufferResult<Self> {
        let raw = allocate(context, size)?;
        let id = context.next_buffer_id();
        context.bindings().bind(binding, id, raw.clone());

        log::debug!(
            "[Buffer] Created buffer {} at slot {} ({} bytes)",
            id.0,
            binding,
            size
        );

        Ok(Self {
            context: context.clone(),
            id,
            binding,
            size,
            raw,
        })
    }

    /// Allocate a buffer holding a copy of `data`
    pub fn from_bytes(context: &Context, binding: u32, data: &[u8]) -> BufferResult<Self> {
        let mut buffer = Self::new(context, binding, data.len())?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Allocate a buffer holding a copy of `values`
    pub fn from_pod<T: Pod>(context: &Context, binding: u32, values: &[T]) -> BufferResult<Self> {
        Self::from_bytes(context, binding, bytemuck::cast_slice(values))
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    /// Logical size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether this buffer still occupies its slot; a later buffer bound to
    /// the same slot takes it over
    pub fn is_bound(&self) -> bool {
        self.context.bindings().owner(self.binding) == Some(self.id)
    }

    /// The underlying device buffer; its size may exceed [`Buffer::size`]
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.raw
    }

    /// Move the buffer to another slot; takes effect at the next dispatch
    pub fn rebind(&mut self, binding: u32) {
        let mut table = self.context.bindings();
        table.unbind(self.binding, self.id);
        table.bind(binding, self.id, self.raw.clone());
        drop(table);

        log::debug!(
            "[Buffer] Rebound buffer {} from slot {} to {}",
            self.id.0,
            self.binding,
            binding
        );
        self.binding = binding;
    }

    /// Change the logical size, keeping the bytes both sizes share
    ///
    /// Reallocates only when the aligned capacity changes. Bytes past the old
    /// size are unspecified after growing.
    pub fn resize(&mut self, size: usize) -> BufferResult<()> {
        let old_capacity = self.raw.size() as usize;
        let new_capacity = capacity_for(size);

        if new_capacity != old_capacity {
            let raw = allocate(&self.context, size)?;
            let keep = old_capacity.min(new_capacity) as wgpu::BufferAddress;

            let mut encoder = self
                .context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("microcompute resize"),
                });
            encoder.copy_buffer_to_buffer(&self.raw, 0, &raw, 0, keep);
            self.context.queue().submit(Some(encoder.finish()));

            self.context
                .bindings()
                .replace(self.binding, self.id, raw.clone());
            self.raw = raw;
        }

        log::debug!(
            "[Buffer] Resized buffer {} from {} to {} bytes",
            self.id.0,
            self.size,
            size
        );
        self.size = size;
        Ok(())
    }

    /// Copy `data` into the buffer at `offset`
    ///
    /// Returns the number of bytes written. Nothing is written when the range
    /// does not fit inside the buffer.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> BufferResult<usize> {
        check_range(offset, data.len(), self.size)?;
        if data.is_empty() {
            return Ok(0);
        }

        let (start, end) = aligned_window(offset, data.len());
        if start == offset && end == offset + data.len() {
            self.context
                .queue()
                .write_buffer(&self.raw, offset as wgpu::BufferAddress, data);
        } else {
            // bytes sharing an aligned word with the range must survive
            let mut window = self.read_window(start, end)?;
            window[offset - start..][..data.len()].copy_from_slice(data);
            self.context
                .queue()
                .write_buffer(&self.raw, start as wgpu::BufferAddress, &window);
        }

        Ok(data.len())
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`
    ///
    /// Returns the number of bytes read. `dst` is untouched when the range
    /// does not fit inside the buffer.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> BufferResult<usize> {
        check_range(offset, dst.len(), self.size)?;
        if dst.is_empty() {
            return Ok(0);
        }

        let (start, end) = aligned_window(offset, dst.len());
        let window = self.read_window(start, end)?;
        dst.copy_from_slice(&window[offset - start..][..dst.len()]);
        Ok(dst.len())
    }

    /// Write a slice of plain values at a byte offset
    pub fn write_pod<T: Pod>(&mut self, offset: usize, values: &[T]) -> BufferResult<usize> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    /// Read `count` plain values starting at a byte offset
    pub fn read_pod<T: Pod>(&self, offset: usize, count: usize) -> BufferResult<Vec<T>> {
        let len = count.saturating_mul(std::mem::size_of::<T>());
        check_range(offset, len, self.size)?;

        let mut values = vec![T::zeroed(); count];
        self.read(offset, bytemuck::cast_slice_mut(&mut values))?;
        Ok(values)
    }

    /// The whole buffer as bytes
    pub fn to_vec(&self) -> BufferResult<Vec<u8>> {
        let mut bytes = vec![0; self.size];
        self.read(0, &mut bytes)?;
        Ok(bytes)
    }

    /// The whole buffer as plain values; the size must divide evenly
    pub fn to_vec_pod<T: Pod>(&self) -> BufferResult<Vec<T>> {
        let element = std::mem::size_of::<T>();
        if element == 0 || self.size % element != 0 {
            return Err(BufferError::ElementSize {
                len: self.size,
                element,
            });
        }
        self.read_pod(0, self.size / element)
    }

    /// Copy an aligned byte range back to the host
    fn read_window(&self, start: usize, end: usize) -> BufferResult<Vec<u8>> {
        let len = (end - start) as wgpu::BufferAddress;
        let device = self.context.device();

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("microcompute readback"),
            size: len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("microcompute readback"),
        });
        encoder.copy_buffer_to_buffer(&self.raw, start as wgpu::BufferAddress, &staging, 0, len);
        let submission = self.context.queue().submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if tx.send(result).is_err() {
                log::error!("[Buffer] Failed to send map_async result - receiver dropped");
            }
        });

        self.context.wait_for(submission);
        self.context.device().poll(wgpu::Maintain::Wait);

        match rx.try_recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(BufferError::Map(error.to_string())),
            Err(_) => return Err(BufferError::Map("mapping did not complete".to_string())),
        }

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.context.bindings().unbind(self.binding, self.id);
        log::debug!("[Buffer] Released buffer {} at slot {}", self.id.0, self.binding);
    }
}

fn allocate(context: &Context, size: usize) -> BufferResult<Arc<wgpu::Buffer>> {
    let result = try_allocate(context, size);
    if let Err(error) = &result {
        log::error!("[Buffer] {}", error);
        context.report(DebugLevel::High, &error.to_string());
    }
    result
}

fn try_allocate(context: &Context, size: usize) -> BufferResult<Arc<wgpu::Buffer>> {
    let capacity = capacity_for(size) as wgpu::BufferAddress;
    let limit = context.limits().max_buffer_size;
    if capacity > limit {
        return Err(BufferError::Allocation {
            size,
            reason: format!("exceeds the device limit of {} bytes", limit),
        });
    }

    let (raw, error) = context.error_scope(|device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("microcompute storage"),
            size: capacity,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    });

    match error {
        Some(error) => Err(BufferError::Allocation {
            size,
            reason: error.to_string(),
        }),
        None => Ok(Arc::new(raw)),
    }
}
