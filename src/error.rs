//! Error types for every failure class of the compute layer
//!
//! Resource creation failures are also reported through the context's debug
//! sink before they are returned; name-resolution and bounds failures are
//! returned silently because callers hit them routinely.

use std::path::PathBuf;
use thiserror::Error;

use crate::uniform::UniformShape;

/// Device context start-up failures
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Render device {} does not exist", .0.display())]
    MissingDevice(PathBuf),

    #[error("No adapter matches device selector '{selector}'")]
    NoAdapter { selector: String },

    #[error("Device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("Device '{0}' is not a render node (expected /dev/dri/renderD<N> with N >= 128)")]
    InvalidDevice(String),
}

/// Program creation and dispatch failures
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Failed to read kernel source {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Kernel failed to compile:\n{0}")]
    Compile(String),

    #[error("Kernel has no compute entry point")]
    NoEntryPoint,

    #[error("Kernel has no compute entry point named '{0}'")]
    MissingEntryPoint(String),

    #[error("Storage buffer '{name}' is declared in group {group}; storage buffers must live in group 0")]
    StorageGroup { name: String, group: u32 },

    #[error("Resource '{0}' is not a buffer; only storage and uniform buffers can be bound")]
    UnsupportedResource(String),

    #[error("Device rejected the kernel: {0}")]
    Device(String),

    #[error("No buffer is bound at slot {0}")]
    UnboundSlot(u32),

    #[error("Workgroup count {count:?} exceeds the device limit of {limit} per dimension")]
    WorkgroupLimit { count: [u32; 3], limit: u32 },

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

/// Buffer allocation and transfer failures
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Failed to allocate {size} bytes: {reason}")]
    Allocation { size: usize, reason: String },

    #[error("Range {offset}+{len} exceeds buffer size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("Failed to map buffer for reading: {0}")]
    Map(String),

    #[error("Byte length {len} is not a multiple of the element size {element}")]
    ElementSize { len: usize, element: usize },
}

/// Uniform set failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniformError {
    #[error("Uniform '{0}' is not an active uniform of this program")]
    NotFound(String),

    #[error("Uniform '{name}' is declared as {declared} but was set as {given}")]
    ShapeMismatch {
        name: String,
        declared: UniformShape,
        given: UniformShape,
    },

    #[error("Uniform '{name}' at offset {offset} does not fit its {size}-byte block")]
    Placement {
        name: String,
        offset: usize,
        size: usize,
    },
}

pub type ContextResult<T> = Result<T, ContextError>;
pub type ProgramResult<T> = Result<T, ProgramError>;
pub type BufferResult<T> = Result<T, BufferError>;
pub type UniformResult<T> = Result<T, UniformError>;
