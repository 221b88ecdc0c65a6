//! Device context
//!
//! Owns the wgpu device and queue, routes device diagnostics to the debug
//! sink, and holds the slot binding table shared by every buffer created on
//! it. `Context` is a cheap handle; programs and buffers keep a clone, so the
//! device stays open until the last of them is dropped.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::binding::{BindingTable, BufferId};
use crate::config::{ContextConfig, DeviceSelector};
use crate::debug::{DebugLevel, DebugSink, StdoutSink};
use crate::error::{ContextError, ContextResult};

struct ContextInner {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    sink: Arc<dyn DebugSink>,
    bindings: Mutex<BindingTable>,
    next_buffer_id: AtomicU64,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
        log::debug!("[Context] Released device '{}'", self.adapter_info.name);
    }
}

/// Handle to an open compute device
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("adapter", &self.inner.adapter_info.name)
            .field("backend", &self.inner.adapter_info.backend)
            .field("bound_slots", &self.inner.bindings.lock().len())
            .finish()
    }
}

impl Context {
    /// Open a device, printing diagnostics to stdout at the configured threshold
    pub fn start(config: &ContextConfig) -> ContextResult<Self> {
        let sink = StdoutSink::new(config.debug_level);
        Self::start_with_sink(config, sink)
    }

    /// Open a device, sending diagnostics to `sink`
    pub fn start_with_sink(
        config: &ContextConfig,
        sink: impl DebugSink + 'static,
    ) -> ContextResult<Self> {
        let sink: Arc<dyn DebugSink> = Arc::new(sink);

        match Self::open(config, sink.clone()) {
            Ok(context) => Ok(context),
            Err(error) => {
                log::error!("[Context] Failed to start: {}", error);
                sink.emit(DebugLevel::High, &error.to_string());
                Err(error)
            }
        }
    }

    fn open(config: &ContextConfig, sink: Arc<dyn DebugSink>) -> ContextResult<Self> {
        let backends = config.backend_bits()?;
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let selector = config.selector()?;
        let adapter = select_adapter(&instance, config, &selector, backends)?;
        let adapter_info = adapter.get_info();

        log::info!(
            "[Context] Selected adapter '{}' ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );
        sink.emit(
            DebugLevel::Info,
            &format!(
                "Using {} on {:?} ({})",
                adapter_info.name, adapter_info.backend, adapter_info.driver
            ),
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("microcompute device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        ))?;

        let error_sink = sink.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            log::error!("[Context] Uncaptured device error: {}", error);
            error_sink.emit(DebugLevel::High, &error.to_string());
        }));

        let limits = device.limits();

        Ok(Self {
            inner: Arc::new(ContextInner {
                device,
                queue,
                adapter_info,
                limits,
                sink,
                bindings: Mutex::new(BindingTable::default()),
                next_buffer_id: AtomicU64::new(0),
            }),
        })
    }

    /// Adapters the configured backends can see, in selection order
    pub fn available_adapters(config: &ContextConfig) -> ContextResult<Vec<wgpu::AdapterInfo>> {
        let backends = config.backend_bits()?;
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        Ok(instance
            .enumerate_adapters(backends)
            .into_iter()
            .map(|adapter| adapter.get_info())
            .collect())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.inner.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.inner.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.inner.adapter_info
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.inner.limits
    }

    /// Send a diagnostic to the debug sink
    pub fn report(&self, level: DebugLevel, message: &str) {
        log::debug!(target: "microcompute::diagnostics", "{}: {}", level, message);
        self.inner.sink.emit(level, message);
    }

    /// Run `f` inside validation and out-of-memory error scopes
    pub(crate) fn error_scope<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        let device = &self.inner.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let value = f(device);

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        (value, validation.or(out_of_memory))
    }

    /// Block until `submission` has finished executing
    pub(crate) fn wait_for(&self, submission: wgpu::SubmissionIndex) {
        self.inner
            .device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
    }

    pub(crate) fn bindings(&self) -> MutexGuard<'_, BindingTable> {
        self.inner.bindings.lock()
    }

    pub(crate) fn next_buffer_id(&self) -> BufferId {
        BufferId(self.inner.next_buffer_id.fetch_add(1, Ordering::Relaxed))
    }
}

fn select_adapter(
    instance: &wgpu::Instance,
    config: &ContextConfig,
    selector: &DeviceSelector,
    backends: wgpu::Backends,
) -> ContextResult<wgpu::Adapter> {
    let no_adapter = || ContextError::NoAdapter {
        selector: config.device.clone(),
    };

    match selector {
        DeviceSelector::Auto => pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: config.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            },
        ))
        .ok_or_else(no_adapter),
        DeviceSelector::RenderNode { path, index } => {
            if !path.exists() {
                return Err(ContextError::MissingDevice(path.clone()));
            }
            instance
                .enumerate_adapters(backends)
                .into_iter()
                .filter(|adapter| adapter.get_info().device_type != wgpu::DeviceType::Cpu)
                .nth(*index)
                .ok_or_else(no_adapter)
        }
        DeviceSelector::Index(index) => instance
            .enumerate_adapters(backends)
            .into_iter()
            .nth(*index)
            .ok_or_else(no_adapter),
        DeviceSelector::Name(name) => instance
            .enumerate_adapters(backends)
            .into_iter()
            .find(|adapter| adapter.get_info().name.to_lowercase().contains(name.as_str()))
            .ok_or_else(no_adapter),
    }
}
