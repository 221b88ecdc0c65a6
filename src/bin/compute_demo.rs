//! Runs a small kernel end to end: upload, set a uniform, dispatch, read back

use microcompute::{Buffer, Context, ContextConfig, DebugLevel, Program};

const KERNEL: &str = r#"
@group(0) @binding(1) var<storage, read_write> data: array<f32>;
@group(1) @binding(0) var<uniform> test: f32;

@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] + test;
}
"#;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ContextConfig::from_env();
    if config.debug_level.is_none() {
        config.debug_level = Some(DebugLevel::Low);
    }
    log::info!("Starting compute demo on device '{}'", config.device);

    let context = Context::start(&config)?;
    let mut program = match std::env::args().nth(1) {
        Some(path) => Program::from_file(&context, path)?,
        None => Program::from_wgsl(&context, KERNEL)?,
    };

    let data: Vec<f32> = (0..10).map(|i| i as f32).collect();
    println!("{:?}", data);

    let buffer = Buffer::from_pod(&context, 1, &data)?;
    if let Err(e) = program.set_float("test", 9.0) {
        log::warn!("{}", e);
    }

    program.dispatch([data.len() as u32, 1, 1])?;

    let result: Vec<f32> = buffer.to_vec_pod()?;
    println!("{:?}", result);

    Ok(())
}
