//! Compute programs
//!
//! A [`Program`] owns a compiled compute pipeline plus one uniform buffer per
//! `var<uniform>` the kernel declares. Storage buffers are not owned: at
//! dispatch time each storage slot the kernel declares is looked up in the
//! context's binding table.

use std::borrow::Cow;
use std::path::Path;

use crate::context::Context;
use crate::debug::DebugLevel;
use crate::binding::BindingTable;
use crate::error::{ProgramError, ProgramResult, UniformResult};
use crate::reflect::{KernelInterface, KernelLanguage, StorageBinding, UniformBlock};
use crate::uniform::{all_shape_setters, shape_setters, Matrix, UniformStaging, UniformValue};

/// Device buffer backing one uniform block
struct UniformBuffer {
    group: u32,
    binding: u32,
    buffer: wgpu::Buffer,
}

impl UniformBuffer {
    fn new(device: &wgpu::Device, block: &UniformBlock, size: usize) -> Self {
        let label = format!("uniform {}", block.name.as_deref().unwrap_or("block"));
        // device buffers start zeroed, matching a fresh staging image
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&label),
            size: size as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            group: block.group,
            binding: block.binding,
            buffer,
        }
    }
}

/// A compiled, linked compute kernel
pub struct Program {
    context: Context,
    interface: KernelInterface,
    pipeline: wgpu::ComputePipeline,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    staging: UniformStaging,
    uniforms: Vec<UniformBuffer>,
}

impl Program {
    /// Compile a WGSL kernel using its first compute entry point
    pub fn from_wgsl(context: &Context, source: &str) -> ProgramResult<Self> {
        Self::new(context, KernelLanguage::Wgsl, source, None)
    }

    /// Compile a GLSL compute shader
    pub fn from_glsl(context: &Context, source: &str) -> ProgramResult<Self> {
        Self::new(context, KernelLanguage::Glsl, source, None)
    }

    /// Read and compile a kernel file; the extension picks the language
    pub fn from_file(context: &Context, path: impl AsRef<Path>) -> ProgramResult<Self> {
        let path = path.as_ref();
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(error) => {
                let error = ProgramError::Io {
                    path: path.to_path_buf(),
                    error,
                };
                context.report(DebugLevel::High, &error.to_string());
                return Err(error);
            }
        };

        log::debug!("[Program] Loaded kernel source from {}", path.display());
        Self::new(context, KernelLanguage::from_path(path), &source, None)
    }

    /// Compile `source` and link it against `entry_point`, or the first
    /// compute entry point when `None`
    ///
    /// Every failure is reported to the debug sink before it is returned.
    pub fn new(
        context: &Context,
        language: KernelLanguage,
        source: &str,
        entry_point: Option<&str>,
    ) -> ProgramResult<Self> {
        match Self::build(context, language, source, entry_point) {
            Ok(program) => Ok(program),
            Err(error) => {
                log::error!("[Program] Creation failed: {}", error);
                context.report(DebugLevel::High, &error.to_string());
                Err(error)
            }
        }
    }

    fn build(
        context: &Context,
        language: KernelLanguage,
        source: &str,
        entry_point: Option<&str>,
    ) -> ProgramResult<Self> {
        let interface = KernelInterface::from_source(language, source, entry_point)?;
        for warning in &interface.warnings {
            context.report(DebugLevel::Low, warning);
        }

        let staging = UniformStaging::new(&interface);
        let ((pipeline, group_layouts, uniforms), error) = context.error_scope(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&interface.entry_point),
                source: shader_source(language, source),
            });

            let group_layouts: Vec<wgpu::BindGroupLayout> = (0..interface.group_count())
                .map(|group| {
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(&format!("{} group {}", interface.entry_point, group)),
                        entries: &layout_entries(&interface, group),
                    })
                })
                .collect();
            let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&interface.entry_point),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&interface.entry_point),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: &interface.entry_point,
            });

            let uniforms: Vec<UniformBuffer> = interface
                .uniform_blocks
                .iter()
                .enumerate()
                .map(|(index, block)| {
                    let size = staging.block(index).map_or(block.size, <[u8]>::len);
                    UniformBuffer::new(device, block, size)
                })
                .collect();

            (pipeline, group_layouts, uniforms)
        });

        if let Some(error) = error {
            return Err(ProgramError::Device(error.to_string()));
        }

        log::debug!(
            "[Program] Compiled '{}' with workgroup size {:?}, storage slots {:?}",
            interface.entry_point,
            interface.workgroup_size,
            interface.storage.iter().map(|s| s.slot).collect::<Vec<_>>()
        );
        context.report(
            DebugLevel::Info,
            &format!(
                "Compiled kernel '{}' ({} storage slots, {} uniform blocks)",
                interface.entry_point,
                interface.storage.len(),
                interface.uniform_blocks.len()
            ),
        );

        Ok(Self {
            context: context.clone(),
            interface,
            pipeline,
            group_layouts,
            staging,
            uniforms,
        })
    }

    pub fn interface(&self) -> &KernelInterface {
        &self.interface
    }

    pub fn entry_point(&self) -> &str {
        &self.interface.entry_point
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.interface.workgroup_size
    }

    /// Storage slots the kernel expects buffers at, ascending
    pub fn storage_slots(&self) -> Vec<u32> {
        self.interface.storage.iter().map(|s| s.slot).collect()
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.interface.uniform(name).is_some()
    }

    /// Every name `set_uniform` accepts, sorted
    pub fn uniform_names(&self) -> Vec<&str> {
        self.interface.uniform_names()
    }

    /// Staged uniform values, uploaded with the next dispatch
    pub fn uniforms(&self) -> &UniformStaging {
        &self.staging
    }

    /// Set a uniform by name
    ///
    /// The value is staged on the host and uploaded with the next dispatch.
    /// Fails without side effects when the name is not an active uniform or
    /// is declared with a different shape.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> UniformResult<()> {
        self.staging.set_uniform(name, value)
    }

    all_shape_setters!(shape_setters);

    /// Run the kernel over `workgroups` and wait for it to finish
    ///
    /// When this returns, buffer reads observe everything the kernel wrote.
    /// A zero in any dimension is a no-op.
    pub fn dispatch(&mut self, workgroups: [u32; 3]) -> ProgramResult<()> {
        let limit = self.context.limits().max_compute_workgroups_per_dimension;
        match check_workgroups(workgroups, limit) {
            Ok(true) => {}
            Ok(false) => {
                log::trace!("[Program] Skipping empty dispatch {:?}", workgroups);
                return Ok(());
            }
            Err(error) => {
                self.context.report(DebugLevel::Medium, &error.to_string());
                return Err(error);
            }
        }

        let resolved = resolve_storage(&*self.context.bindings(), &self.interface.storage);
        let storage = match resolved {
            Ok(storage) => storage,
            Err(error) => {
                self.context.report(DebugLevel::High, &error.to_string());
                return Err(error);
            }
        };

        self.flush_uniforms();

        let context = &self.context;
        let (submission, error) = context.error_scope(|device| {
            let bind_groups: Vec<wgpu::BindGroup> = self
                .group_layouts
                .iter()
                .enumerate()
                .map(|(group, layout)| {
                    let group = group as u32;
                    let mut entries: Vec<wgpu::BindGroupEntry> = Vec::new();
                    if group == 0 {
                        entries.extend(storage.iter().map(|(slot, raw)| wgpu::BindGroupEntry {
                            binding: *slot,
                            resource: raw.as_entire_binding(),
                        }));
                    }
                    entries.extend(
                        self.uniforms
                            .iter()
                            .filter(|uniform| uniform.group == group)
                            .map(|uniform| wgpu::BindGroupEntry {
                                binding: uniform.binding,
                                resource: uniform.buffer.as_entire_binding(),
                            }),
                    );

                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: None,
                        layout,
                        entries: &entries,
                    })
                })
                .collect();

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("microcompute dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&self.interface.entry_point),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                for (index, bind_group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, bind_group, &[]);
                }
                pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
            }

            context.queue().submit(Some(encoder.finish()))
        });

        context.wait_for(submission);

        if let Some(error) = error {
            let error = ProgramError::Dispatch(error.to_string());
            log::error!("[Program] {}", error);
            context.report(DebugLevel::High, &error.to_string());
            return Err(error);
        }

        Ok(())
    }

    fn flush_uniforms(&mut self) {
        let queue = self.context.queue();
        let uniforms = &self.uniforms;
        self.staging.flush(|index, image| {
            if let Some(uniform) = uniforms.get(index) {
                queue.write_buffer(&uniform.buffer, 0, image);
            }
        });
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        log::debug!("[Program] Released kernel '{}'", self.interface.entry_point);
    }
}

/// Whether `workgroups` has any work, failing when a dimension exceeds `limit`
fn check_workgroups(workgroups: [u32; 3], limit: u32) -> ProgramResult<bool> {
    if workgroups.contains(&0) {
        return Ok(false);
    }
    if workgroups.iter().any(|&count| count > limit) {
        return Err(ProgramError::WorkgroupLimit {
            count: workgroups,
            limit,
        });
    }
    Ok(true)
}

/// The resource behind every storage slot the kernel declares
fn resolve_storage<R: Clone>(
    table: &BindingTable<R>,
    storage: &[StorageBinding],
) -> ProgramResult<Vec<(u32, R)>> {
    storage
        .iter()
        .map(|binding| {
            table
                .lookup(binding.slot)
                .map(|resource| (binding.slot, resource))
                .ok_or(ProgramError::UnboundSlot(binding.slot))
        })
        .collect()
}

fn shader_source(language: KernelLanguage, source: &str) -> wgpu::ShaderSource<'_> {
    match language {
        KernelLanguage::Wgsl => wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        KernelLanguage::Glsl => wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(source),
            stage: naga::ShaderStage::Compute,
            defines: Default::default(),
        },
    }
}

fn layout_entries(interface: &KernelInterface, group: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
    let buffer_entry = |binding: u32, ty: wgpu::BufferBindingType| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let mut entries = Vec::new();
    if group == 0 {
        entries.extend(interface.storage.iter().map(|storage| {
            buffer_entry(
                storage.slot,
                wgpu::BufferBindingType::Storage {
                    read_only: storage.read_only,
                },
            )
        }));
    }
    entries.extend(
        interface
            .uniform_blocks
            .iter()
            .filter(|block| block.group == group)
            .map(|block| buffer_entry(block.binding, wgpu::BufferBindingType::Uniform)),
    );

    entries.sort_by_key(|entry| entry.binding);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::binding::BufferId;

    #[test]
    fn test_zero_workgroups_do_no_work() {
        for workgroups in [[0, 0, 0], [0, 4, 4], [4, 0, 4], [4, 4, 0]] {
            assert!(!check_workgroups(workgroups, 65535).unwrap());
        }
        assert!(check_workgroups([1, 1, 1], 65535).unwrap());
        assert!(check_workgroups([65535, 1, 1], 65535).unwrap());
    }

    #[test]
    fn test_workgroup_limit_rejected() {
        assert!(matches!(
            check_workgroups([1, 65536, 1], 65535),
            Err(ProgramError::WorkgroupLimit { count: [1, 65536, 1], limit: 65535 })
        ));
        // an empty dispatch never reaches the limit check
        assert!(!check_workgroups([0, 65536, 1], 65535).unwrap());
    }

    #[test]
    fn test_storage_resolves_through_binding_table() {
        let storage = vec![
            StorageBinding { name: Some("src".into()), slot: 0, read_only: true },
            StorageBinding { name: Some("dst".into()), slot: 3, read_only: false },
        ];
        let mut table = BindingTable::default();
        table.bind(0, BufferId(1), "a");

        assert!(matches!(
            resolve_storage(&table, &storage),
            Err(ProgramError::UnboundSlot(3))
        ));

        table.bind(3, BufferId(2), "b");
        table.bind(0, BufferId(3), "c");
        assert_eq!(resolve_storage(&table, &storage).unwrap(), vec![(0, "c"), (3, "b")]);
    }

    #[test]
    fn test_layout_entries_split_by_group() {
        let source = r#"
            @group(0) @binding(2) var<storage, read> src: array<u32>;
            @group(0) @binding(0) var<storage, read_write> dst: array<u32>;
            @group(0) @binding(1) var<uniform> count: u32;
            @group(2) @binding(0) var<uniform> scale: f32;
            @compute @workgroup_size(1) fn main() { dst[0] = src[0] * count + u32(scale); }
        "#;
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, source, None).unwrap();
        assert_eq!(interface.group_count(), 3);

        let group0 = layout_entries(&interface, 0);
        assert_eq!(group0.iter().map(|e| e.binding).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(matches!(
            group0[2].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                ..
            }
        ));
        assert!(matches!(
            group0[1].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                ..
            }
        ));

        assert!(layout_entries(&interface, 1).is_empty());
        assert_eq!(layout_entries(&interface, 2).len(), 1);
    }
}
