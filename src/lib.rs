//! Headless GPU compute on top of wgpu
//!
//! Open a [`Context`] on a render device, compile a [`Program`] from WGSL or
//! GLSL, create [`Buffer`]s at the slots the kernel declares, set uniforms by
//! name and dispatch. Dispatch blocks until the kernel has finished, so the
//! next buffer read sees its results.
//!
//! ```no_run
//! use microcompute::{Buffer, Context, ContextConfig, Program};
//!
//! # fn main() -> anyhow::Result<()> {
//! let context = Context::start(&ContextConfig::with_device("/dev/dri/renderD128"))?;
//! let mut program = Program::from_wgsl(&context, r#"
//!     @group(0) @binding(0) var<storage, read_write> data: array<f32>;
//!     @group(1) @binding(0) var<uniform> gain: f32;
//!     @compute @workgroup_size(1)
//!     fn main(@builtin(global_invocation_id) id: vec3<u32>) {
//!         data[id.x] = data[id.x] * gain;
//!     }
//! "#)?;
//!
//! let buffer = Buffer::from_pod(&context, 0, &[1.0f32, 2.0, 3.0])?;
//! program.set_float("gain", 2.0)?;
//! program.dispatch([3, 1, 1])?;
//! assert_eq!(buffer.to_vec_pod::<f32>()?, vec![2.0, 4.0, 6.0]);
//! # Ok(())
//! # }
//! ```

mod binding;
pub mod buffer;
pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod program;
pub mod reflect;
pub mod uniform;

pub use buffer::Buffer;
pub use config::{ContextConfig, DeviceSelector, PowerPreference};
pub use context::Context;
pub use debug::{DebugLevel, DebugSink, LogSink, NullSink, StdoutSink};
pub use error::{BufferError, ConfigError, ContextError, ProgramError, UniformError};
pub use program::Program;
pub use reflect::{KernelInterface, KernelLanguage};
pub use uniform::{Matrix, MatrixLayout, UniformShape, UniformStaging, UniformValue};
