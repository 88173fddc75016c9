use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use shader_forge::compiler::cache::ShaderCache;
use shader_forge::compiler::naga_compiler::NagaCompiler;
use shader_forge::compiler::{CompiledPipeline, build_pipeline};
use shader_forge::{CrossCompileTarget, PipelineBuildOptions, RenderingBackend, load_manifest_from_path};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Cli {
    manifest: PathBuf,
    options: PipelineBuildOptions,
    output_dir: PathBuf,
}

const USAGE: &str = "supported: --manifest <pipeline.json>, --backend <opengl|vulkan|bgfx|sdl3>, \
                     --spirv-version <N>, --cross-compile msl, --output-dir <dir>";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut manifest = None;
    let mut options = PipelineBuildOptions::default();
    let mut output_dir = PathBuf::from(".");
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || args.get(i + 1).ok_or_else(|| anyhow!("missing value for {flag}"));
        match flag {
            "--manifest" => manifest = Some(PathBuf::from(value()?)),
            "--backend" => options.backend = RenderingBackend::parse(value()?)?,
            "--spirv-version" => {
                let v = value()?;
                options.spirv_version = v
                    .parse()
                    .map_err(|e| anyhow!("invalid --spirv-version '{v}': {e}"))?;
            }
            "--cross-compile" => options.cross_compile = Some(CrossCompileTarget::parse(value()?)?),
            "--outputdir" | "--output-dir" => output_dir = PathBuf::from(value()?),
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
        i += 2;
    }
    let manifest = manifest.ok_or_else(|| anyhow!("--manifest is required ({USAGE})"))?;
    Ok(Cli {
        manifest,
        options,
        output_dir,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote");
    Ok(())
}

fn write_pipeline(pipeline: &CompiledPipeline, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;
    let backend = pipeline.backend.name();
    for stage in &pipeline.stages {
        let name = stage.stage.name();
        write_file(&output_dir.join(format!("{name}.{backend}.src.glsl")), stage.source.as_bytes())?;
        let native = &stage.shader.native;
        write_file(&output_dir.join(format!("{name}.{}", native.kind.extension())), &native.bytes)?;
        if let Some(cross) = &stage.shader.cross_compiled {
            write_file(&output_dir.join(format!("{name}.{}", cross.kind.extension())), &cross.bytes)?;
            info!(stage = %stage.stage, entry_point = %cross.entry_point, "cross-compiled entry point");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    let manifest = load_manifest_from_path(&cli.manifest)?;
    let mut cache = ShaderCache::new();
    let pipeline = build_pipeline(&manifest, &cli.options, &NagaCompiler::default(), &mut cache)
        .with_context(|| format!("building {}", cli.manifest.display()))?;
    write_pipeline(&pipeline, &cli.output_dir)?;
    println!(
        "built {} stage(s) for {} into {}",
        pipeline.stages.len(),
        pipeline.backend,
        cli.output_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_cli_full() {
        let cli = parse_cli(&args(&[
            "--manifest",
            "quad.json",
            "--backend",
            "sdl3",
            "--spirv-version",
            "13",
            "--cross-compile",
            "msl",
            "--output-dir",
            "out",
        ]))
        .unwrap();
        assert_eq!(cli.manifest, PathBuf::from("quad.json"));
        assert_eq!(cli.options.backend, RenderingBackend::Sdl3Gpu);
        assert_eq!(cli.options.spirv_version, 13);
        assert_eq!(cli.options.cross_compile, Some(CrossCompileTarget::Msl));
        assert_eq!(cli.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn parse_cli_requires_manifest() {
        let err = parse_cli(&args(&["--backend", "vulkan"])).unwrap_err();
        assert!(format!("{err:#}").contains("--manifest is required"));
    }

    #[test]
    fn parse_cli_rejects_unknown_flags() {
        let err = parse_cli(&args(&["--manifest", "a.json", "--headless"])).unwrap_err();
        assert!(format!("{err:#}").contains("unknown argument: --headless"));
        let err = parse_cli(&args(&["--manifest"])).unwrap_err();
        assert!(format!("{err:#}").contains("missing value for --manifest"));
    }
}
