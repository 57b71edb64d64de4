//! umbra-run — execute a compiled shader on a synthetic test grid.
//!
//! Loads a `.slx` bytecode file, binds it to a flat grid with
//! configurable incidence vectors, runs parameter defaults and the main
//! program, and prints the resulting output variables. Useful for
//! checking a compiled shader without driving the whole renderer.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use umbra_foundation::V3;
use umbra_shadeops::ShadeopRegistry;
use umbra_vm::{load_program, ShaderInstance, ShadingContext, StandardVar, TestGrid};

#[derive(Parser, Debug)]
#[command(name = "umbra-run")]
#[command(about = "Run a compiled umbra shader on a synthetic test grid")]
struct Cli {
    /// Path to the compiled shader (.slx text format)
    shader: PathBuf,

    /// Grid width in shading points
    #[arg(long, default_value = "4")]
    width: usize,

    /// Grid height in shading points
    #[arg(long, default_value = "4")]
    height: usize,

    /// Surface normal, as x,y,z
    #[arg(long, default_value = "0,0,1", value_parser = parse_v3)]
    normal: V3,

    /// Incident direction, as x,y,z
    #[arg(long, default_value = "0,0,1", value_parser = parse_v3)]
    incident: V3,

    /// Surface color, as r,g,b
    #[arg(long, default_value = "1,1,1", value_parser = parse_v3)]
    cs: V3,

    /// Add a white point light at x,y,z (repeatable)
    #[arg(long, value_parser = parse_v3)]
    light: Vec<V3>,
}

fn parse_v3(raw: &str) -> Result<V3, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z, found `{raw}`"));
    }
    let mut v = [0.0f32; 3];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| format!("bad component `{part}`: {e}"))?;
    }
    Ok(V3::new(v[0], v[1], v[2]))
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "umbra_run=info,umbra_vm=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.shader) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot read {}: {e}", cli.shader.display());
            return ExitCode::FAILURE;
        }
    };
    let name = cli
        .shader
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shader".to_string());

    let registry = ShadeopRegistry::with_builtins();
    let program = match load_program(name, &source, &registry) {
        Ok(p) => p,
        Err(e) => {
            error!("load failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        shader = %program.name,
        kind = %program.kind,
        symbols = program.symbols.len(),
        "program loaded"
    );

    let mut grid = TestGrid::new(cli.width, cli.height);
    grid.fill_triple(StandardVar::N, cli.normal);
    grid.fill_triple(StandardVar::Ng, cli.normal);
    grid.fill_triple(StandardVar::I, cli.incident);
    grid.fill_triple(StandardVar::Cs, cli.cs);
    for light in &cli.light {
        grid.add_point_light(*light, V3::ONE);
    }
    // Parametric coordinates sweep the unit square.
    for y in 0..cli.height {
        for x in 0..cli.width {
            let i = y * cli.width + x;
            let u = x as f32 / (cli.width.max(2) - 1) as f32;
            let v = y as f32 / (cli.height.max(2) - 1) as f32;
            grid.set_float(StandardVar::U, i, u);
            grid.set_float(StandardVar::V, i, v);
            grid.set_float(StandardVar::S, i, u);
            grid.set_float(StandardVar::T, i, v);
            grid.set_triple(StandardVar::P, i, V3::new(u, v, 0.0));
        }
    }

    let mut instance = ShaderInstance::new(Arc::new(program));
    let mut ctx = ShadingContext::new();
    if let Err(e) = instance.run_defaults(&mut grid, &mut ctx) {
        error!("running parameter defaults failed: {e}");
        return ExitCode::FAILURE;
    }
    instance.prepare(&grid);
    if let Err(e) = instance.run(&mut grid, &mut ctx) {
        error!("shader execution failed: {e}");
        return ExitCode::FAILURE;
    }

    for var in [StandardVar::Ci, StandardVar::Oi] {
        if let Some(v) = grid.triple_at(var, 0) {
            println!("{}[0] = {} {} {}", var.name(), v.x, v.y, v.z);
        }
    }
    for symbol in &instance.program().symbols {
        if !symbol.output {
            continue;
        }
        if let Some(value) = instance.local(&symbol.name) {
            let value = value.borrow();
            if let Ok(f) = value.floats() {
                println!("{}[0] = {}", symbol.name, f.at(0));
            } else if let Ok(t) = value.triples() {
                let v = t.at(0);
                println!("{}[0] = {} {} {}", symbol.name, v.x, v.y, v.z);
            }
        }
    }

    let (hits, misses) = ctx.pool.stats();
    info!(pool_hits = hits, pool_allocations = misses, "done");
    ExitCode::SUCCESS
}
