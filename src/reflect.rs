//! Kernel interface reflection
//!
//! Parses kernel source with naga and extracts what the host side needs to
//! drive it: the compute entry point, the storage buffer slots it reads and
//! writes, and a name table for every addressable uniform.

use naga::valid::ModuleInfo;
use naga::{AddressSpace, Module, ScalarKind, StorageAccess, TypeInner};
use rustc_hash::FxHashMap;
use std::path::Path;

use crate::error::{ProgramError, ProgramResult};
use crate::uniform::{UniformScalar, UniformShape};

/// Uniform buffer sizes are rounded up to this
const UNIFORM_BLOCK_ALIGNMENT: usize = 16;

/// Source language of a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelLanguage {
    #[default]
    Wgsl,
    /// Vulkan-flavoured GLSL compute shader
    Glsl,
}

impl KernelLanguage {
    /// `.glsl` and `.comp` are GLSL, everything else is WGSL
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("glsl") | Some("comp") => KernelLanguage::Glsl,
            _ => KernelLanguage::Wgsl,
        }
    }
}

/// A storage buffer the kernel expects at a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBinding {
    pub name: Option<String>,
    pub slot: u32,
    pub read_only: bool,
}

/// A `var<uniform>` declaration; the program owns one buffer per block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub name: Option<String>,
    pub group: u32,
    pub binding: u32,
    pub size: usize,
}

/// Where a named uniform lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    /// Index into [`KernelInterface::uniform_blocks`]
    pub block: usize,
    pub offset: usize,
    pub shape: UniformShape,
}

/// Everything the host needs to know about a kernel
#[derive(Debug, Clone)]
pub struct KernelInterface {
    pub entry_point: String,
    pub workgroup_size: [u32; 3],
    pub storage: Vec<StorageBinding>,
    pub uniform_blocks: Vec<UniformBlock>,
    uniforms: FxHashMap<String, UniformLocation>,
    /// Non-fatal findings, such as uniform names claimed by two blocks
    pub warnings: Vec<String>,
}

impl KernelInterface {
    /// Parse, validate and reflect kernel source
    pub fn from_source(
        language: KernelLanguage,
        source: &str,
        entry_point: Option<&str>,
    ) -> ProgramResult<Self> {
        let module = parse(language, source)?;
        let info = validate(&module, source)?;
        Self::from_module(&module, &info, entry_point)
    }

    /// Reflect a validated module
    ///
    /// Only globals the selected entry point actually uses are reported, so
    /// resources belonging to other entry points need no buffer and their
    /// uniforms do not resolve.
    pub fn from_module(
        module: &Module,
        info: &ModuleInfo,
        entry_point: Option<&str>,
    ) -> ProgramResult<Self> {
        let is_compute = |ep: &naga::EntryPoint| ep.stage == naga::ShaderStage::Compute;
        let index = match entry_point {
            Some(name) => module
                .entry_points
                .iter()
                .position(|ep| is_compute(ep) && ep.name == name)
                .ok_or_else(|| ProgramError::MissingEntryPoint(name.to_string()))?,
            None => module
                .entry_points
                .iter()
                .position(is_compute)
                .ok_or(ProgramError::NoEntryPoint)?,
        };
        let entry = &module.entry_points[index];
        let usage = info.get_entry_point(index);

        let mut layouter = naga::proc::Layouter::default();
        layouter
            .update(module.to_ctx())
            .map_err(|e| ProgramError::Compile(format!("Failed to lay out kernel types: {}", e)))?;

        let mut interface = KernelInterface {
            entry_point: entry.name.clone(),
            workgroup_size: entry.workgroup_size,
            storage: Vec::new(),
            uniform_blocks: Vec::new(),
            uniforms: FxHashMap::default(),
            warnings: Vec::new(),
        };

        for (handle, var) in module.global_variables.iter() {
            if usage[handle].is_empty() {
                continue;
            }
            let display_name = var.name.clone().unwrap_or_else(|| "<unnamed>".to_string());

            match var.space {
                AddressSpace::Storage { access } => {
                    let Some(binding) = &var.binding else { continue };
                    if binding.group != 0 {
                        return Err(ProgramError::StorageGroup {
                            name: display_name,
                            group: binding.group,
                        });
                    }
                    interface.storage.push(StorageBinding {
                        name: var.name.clone(),
                        slot: binding.binding,
                        read_only: !access.contains(StorageAccess::STORE),
                    });
                }
                AddressSpace::Uniform => {
                    let Some(binding) = &var.binding else { continue };
                    let size = layouter[var.ty].size as usize;
                    let block = interface.uniform_blocks.len();
                    interface.uniform_blocks.push(UniformBlock {
                        name: var.name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        size: size.next_multiple_of(UNIFORM_BLOCK_ALIGNMENT),
                    });
                    interface.collect_uniforms(module, block, var.ty, 0, var.name.as_deref(), None);
                }
                AddressSpace::Handle => {
                    return Err(ProgramError::UnsupportedResource(display_name));
                }
                _ => {}
            }
        }

        interface.storage.sort_by_key(|binding| binding.slot);
        Ok(interface)
    }

    /// Walk a uniform's type, registering every addressable scalar, vector
    /// and matrix under its dotted path
    fn collect_uniforms(
        &mut self,
        module: &Module,
        block: usize,
        ty: naga::Handle<naga::Type>,
        offset: usize,
        var_name: Option<&str>,
        member_path: Option<&str>,
    ) {
        let inner = &module.types[ty].inner;

        if let TypeInner::Struct { members, .. } = inner {
            for member in members {
                let Some(member_name) = member.name.as_deref() else { continue };
                let path = match member_path {
                    Some(parent) => format!("{}.{}", parent, member_name),
                    None => member_name.to_string(),
                };
                self.collect_uniforms(
                    module,
                    block,
                    member.ty,
                    offset + member.offset as usize,
                    var_name,
                    Some(&path),
                );
            }
            return;
        }

        let Some(shape) = shape_of(inner) else { return };
        let location = UniformLocation { block, offset, shape };

        match (var_name, member_path) {
            (Some(var), Some(path)) => {
                self.uniforms.insert(format!("{}.{}", var, path), location);
                self.register_bare(path, location);
            }
            (Some(var), None) => {
                self.register_bare(var, location);
            }
            (None, Some(path)) => {
                self.register_bare(path, location);
            }
            (None, None) => {}
        }
    }

    fn register_bare(&mut self, name: &str, location: UniformLocation) {
        if let Some(existing) = self.uniforms.get(name) {
            if existing.block != location.block {
                self.warnings.push(format!(
                    "Uniform name '{}' is declared in more than one uniform block; using the first",
                    name
                ));
            }
            return;
        }
        self.uniforms.insert(name.to_string(), location);
    }

    /// Resolve a uniform by name
    pub fn uniform(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).copied()
    }

    /// Every resolvable uniform name, sorted
    pub fn uniform_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.uniforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of bind groups the pipeline layout needs
    pub fn group_count(&self) -> u32 {
        let uniform_max = self.uniform_blocks.iter().map(|block| block.group + 1).max();
        let storage_max = if self.storage.is_empty() { None } else { Some(1) };
        uniform_max.max(storage_max).unwrap_or(0)
    }
}

pub(crate) fn parse(language: KernelLanguage, source: &str) -> ProgramResult<Module> {
    match language {
        KernelLanguage::Wgsl => naga::front::wgsl::parse_str(source)
            .map_err(|error| ProgramError::Compile(error.emit_to_string(source))),
        KernelLanguage::Glsl => {
            let options = naga::front::glsl::Options::from(naga::ShaderStage::Compute);
            naga::front::glsl::Frontend::default()
                .parse(&options, source)
                .map_err(|errors| {
                    let rendered: Vec<String> =
                        errors.iter().map(|error| error.to_string()).collect();
                    ProgramError::Compile(rendered.join("\n"))
                })
        }
    }
}

pub(crate) fn validate(module: &Module, source: &str) -> ProgramResult<ModuleInfo> {
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );

    validator
        .validate(module)
        .map_err(|error| ProgramError::Compile(error.emit_to_string(source)))
}

fn shape_of(inner: &TypeInner) -> Option<UniformShape> {
    match *inner {
        TypeInner::Scalar(scalar) => UniformShape::vector(scalar_of(scalar)?, 1),
        TypeInner::Vector { size, scalar } => UniformShape::vector(scalar_of(scalar)?, size as usize),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => match scalar_of(scalar)? {
            UniformScalar::Float => UniformShape::matrix(columns as usize, rows as usize),
            _ => None,
        },
        _ => None,
    }
}

fn scalar_of(scalar: naga::Scalar) -> Option<UniformScalar> {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Float, 4) => Some(UniformScalar::Float),
        (ScalarKind::Sint, 4) => Some(UniformScalar::Int),
        (ScalarKind::Uint, 4) => Some(UniformScalar::UInt),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPY_KERNEL: &str = r#"
        struct Params {
            scale: f32,
            shift: vec3<f32>,
            transform: mat2x3<f32>,
            count: u32,
        }

        @group(0) @binding(0) var<storage, read> input: array<f32>;
        @group(0) @binding(3) var<storage, read_write> output: array<f32>;
        @group(1) @binding(0) var<uniform> params: Params;
        @group(1) @binding(1) var<uniform> bias: i32;

        @compute @workgroup_size(64, 1, 1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            let i = id.x;
            if (i < params.count) {
                output[i] = input[i] * params.scale + params.shift.x + f32(bias) + params.transform[0].x;
            }
        }
    "#;

    #[test]
    fn test_reflects_storage_slots_and_entry_point() {
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, COPY_KERNEL, None).unwrap();

        assert_eq!(interface.entry_point, "main");
        assert_eq!(interface.workgroup_size, [64, 1, 1]);
        assert_eq!(
            interface.storage,
            vec![
                StorageBinding { name: Some("input".into()), slot: 0, read_only: true },
                StorageBinding { name: Some("output".into()), slot: 3, read_only: false },
            ]
        );
        assert_eq!(interface.group_count(), 2);
    }

    #[test]
    fn test_struct_members_resolve_with_and_without_prefix() {
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, COPY_KERNEL, None).unwrap();

        let scale = interface.uniform("scale").unwrap();
        assert_eq!(scale.shape, UniformShape::Float);
        assert_eq!(scale.offset, 0);
        assert_eq!(interface.uniform("params.scale"), Some(scale));

        let shift = interface.uniform("params.shift").unwrap();
        assert_eq!(shift.shape, UniformShape::Vec3);
        assert_eq!(shift.offset, 16);

        let transform = interface.uniform("transform").unwrap();
        assert_eq!(transform.shape, UniformShape::Mat23);
        assert_eq!(transform.offset, 32);

        assert_eq!(interface.uniform("count").unwrap().shape, UniformShape::UInt);
        assert_eq!(interface.uniform("bias").unwrap().shape, UniformShape::Int);
        assert_eq!(interface.uniform("bias").unwrap().block, 1);

        assert!(interface.uniform("missing").is_none());
        assert!(interface.uniform("params").is_none());
    }

    #[test]
    fn test_block_sizes_are_rounded() {
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, COPY_KERNEL, None).unwrap();
        assert_eq!(interface.uniform_blocks.len(), 2);
        assert_eq!(interface.uniform_blocks[0].size % 16, 0);
        assert!(interface.uniform_blocks[0].size >= 68);
        assert_eq!(interface.uniform_blocks[1].size, 16);
    }

    #[test]
    fn test_parse_error_is_rendered() {
        let err = KernelInterface::from_source(KernelLanguage::Wgsl, "fn main( {", None).unwrap_err();
        match err {
            ProgramError::Compile(message) => assert!(!message.is_empty()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_entry_point_selection() {
        let source = r#"
            @compute @workgroup_size(1) fn first() {}
            @compute @workgroup_size(8, 8) fn second() {}
        "#;

        let default = KernelInterface::from_source(KernelLanguage::Wgsl, source, None).unwrap();
        assert_eq!(default.entry_point, "first");

        let named = KernelInterface::from_source(KernelLanguage::Wgsl, source, Some("second")).unwrap();
        assert_eq!(named.workgroup_size, [8, 8, 1]);

        let missing = KernelInterface::from_source(KernelLanguage::Wgsl, source, Some("third"));
        assert!(matches!(missing, Err(ProgramError::MissingEntryPoint(name)) if name == "third"));

        let none = KernelInterface::from_source(KernelLanguage::Wgsl, "fn helper() {}", None);
        assert!(matches!(none, Err(ProgramError::NoEntryPoint)));
    }

    #[test]
    fn test_storage_outside_group_zero_rejected() {
        let source = r#"
            @group(2) @binding(0) var<storage, read_write> data: array<u32>;
            @compute @workgroup_size(1) fn main() { data[0] = 1u; }
        "#;
        let err = KernelInterface::from_source(KernelLanguage::Wgsl, source, None).unwrap_err();
        assert!(matches!(err, ProgramError::StorageGroup { group: 2, .. }));
    }

    #[test]
    fn test_duplicate_bare_names_warn() {
        let source = r#"
            struct A { gain: f32 }
            struct B { gain: f32 }
            @group(1) @binding(0) var<uniform> a: A;
            @group(1) @binding(1) var<uniform> b: B;
            @group(0) @binding(0) var<storage, read_write> dst: array<f32>;
            @compute @workgroup_size(1) fn main() { dst[0] = a.gain + b.gain; }
        "#;
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, source, None).unwrap();
        assert_eq!(interface.uniform("gain").unwrap().block, 0);
        assert_eq!(interface.uniform("b.gain").unwrap().block, 1);
        assert_eq!(interface.warnings.len(), 1);
    }

    #[test]
    fn test_glsl_block_members_resolve() {
        let source = r#"
            #version 450
            layout(local_size_x = 10) in;
            layout(std430, set = 0, binding = 1) buffer Data { float values[]; };
            layout(std140, set = 1, binding = 0) uniform Params { float test; };

            void main() {
                values[gl_GlobalInvocationID.x] += test;
            }
        "#;
        let interface = KernelInterface::from_source(KernelLanguage::Glsl, source, None).unwrap();
        assert_eq!(interface.entry_point, "main");
        assert_eq!(interface.workgroup_size, [10, 1, 1]);
        assert_eq!(interface.storage.len(), 1);
        assert_eq!(interface.storage[0].slot, 1);
        assert_eq!(interface.uniform("test").unwrap().shape, UniformShape::Float);
    }

    #[test]
    fn test_language_from_extension() {
        assert_eq!(KernelLanguage::from_path(Path::new("k.comp")), KernelLanguage::Glsl);
        assert_eq!(KernelLanguage::from_path(Path::new("k.glsl")), KernelLanguage::Glsl);
        assert_eq!(KernelLanguage::from_path(Path::new("k.wgsl")), KernelLanguage::Wgsl);
        assert_eq!(KernelLanguage::from_path(Path::new("kernel")), KernelLanguage::Wgsl);
    }
    #[test]
    fn test_every_shape_reflects() {
        let members: Vec<String> = UniformShape::ALL
            .iter()
            .enumerate()
            .map(|(i, shape)| format!("m{}: {},", i, shape))
            .collect();
        let source = format!(
            "struct All {{ {} }}\n\
             @group(0) @binding(0) var<storage, read_write> dst: array<f32>;\n\
             @group(1) @binding(0) var<uniform> all_shapes: All;\n\
             @compute @workgroup_size(1) fn main() {{ dst[0] = all_shapes.m0; }}",
            members.join(" ")
        );
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, &source, None).unwrap();
        for (i, shape) in UniformShape::ALL.iter().enumerate() {
            let location = interface.uniform(&format!("m{}", i)).unwrap();
            assert_eq!(location.shape, *shape);
            assert_eq!(location.offset % 4, 0);
        }
    }
    #[test]
    fn test_only_globals_of_the_entry_point_are_reflected() {
        let source = r#"
            @group(0) @binding(0) var<storage, read_write> first_out: array<f32>;
            @group(0) @binding(1) var<storage, read_write> second_out: array<f32>;
            @group(1) @binding(0) var<uniform> gain: f32;
            @group(1) @binding(1) var<uniform> unused_scale: f32;

            @compute @workgroup_size(1) fn first() { first_out[0] = 1.0; }
            @compute @workgroup_size(1) fn second() { second_out[0] = gain; }
        "#;

        let first = KernelInterface::from_source(KernelLanguage::Wgsl, source, Some("first")).unwrap();
        assert_eq!(first.storage.iter().map(|s| s.slot).collect::<Vec<_>>(), vec![0]);
        assert!(first.uniform_blocks.is_empty());
        assert!(first.uniform("gain").is_none());
        assert!(first.uniform("unused_scale").is_none());
        assert_eq!(first.group_count(), 1);

        let second = KernelInterface::from_source(KernelLanguage::Wgsl, source, Some("second")).unwrap();
        assert_eq!(second.storage.iter().map(|s| s.slot).collect::<Vec<_>>(), vec![1]);
        assert_eq!(second.uniform_blocks.len(), 1);
        assert!(second.uniform("gain").is_some());
        assert!(second.uniform("unused_scale").is_none());
    }

    #[test]
    fn test_unused_storage_in_other_group_is_ignored() {
        let source = r#"
            @group(0) @binding(0) var<storage, read_write> data: array<u32>;
            @group(3) @binding(0) var<storage, read_write> stray: array<u32>;
            @compute @workgroup_size(1) fn main() { data[0] = 1u; }
        "#;
        let interface = KernelInterface::from_source(KernelLanguage::Wgsl, source, None).unwrap();
        assert_eq!(interface.storage.len(), 1);
    }

    #[test]
    fn test_glsl_parse_error_is_rendered() {
        let source = "#version 450\nlayout(local_size_x = 1) in;\nvoid main() { float x = ; }\n";
        match KernelInterface::from_source(KernelLanguage::Glsl, source, None) {
            Err(ProgramError::Compile(message)) => assert!(!message.is_empty()),
            other => panic!("expected a compile error, got {:?}", other.map(|i| i.entry_point)),
        }
    }
}
