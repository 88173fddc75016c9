use std::path::PathBuf;

use shader_forge::backend::RenderingBackend;
use shader_forge::compiler::generate_pipeline_sources;
use shader_forge::load_manifest_from_path;
use shader_forge::pipeline::traits::PipelineTrait;
use shader_forge::shader::ShaderStage;

fn cases_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("cases")
}

fn load(case: &str) -> shader_forge::PipelineManifest {
    let path = cases_root().join(case).join("pipeline.json");
    load_manifest_from_path(&path).unwrap_or_else(|e| panic!("case {case}: {e:#}"))
}

#[test]
fn every_case_generates_on_every_backend() {
    for case in ["textured-quad", "particles", "instanced-mesh"] {
        let manifest = load(case);
        for backend in [
            RenderingBackend::OpenGl,
            RenderingBackend::Vulkan,
            RenderingBackend::Bgfx,
            RenderingBackend::Sdl3Gpu,
        ] {
            let generated =
                generate_pipeline_sources(&manifest, backend).unwrap_or_else(|e| panic!("{case} on {backend}: {e:#}"));
            assert_eq!(generated.sources.len(), manifest.stages.len(), "{case} on {backend}");
            for (stage, text) in &generated.sources {
                assert!(text.starts_with("#version "), "{case} {stage} on {backend}");
                assert!(!text.contains("${"), "{case} {stage} on {backend}");
            }
        }
    }
}

#[test]
fn stage_paths_resolve_next_to_the_manifest() {
    let manifest = load("textured-quad");
    assert_eq!(manifest.name.as_deref(), Some("textured-quad"));
    let vertex = manifest.stage(ShaderStage::Vertex).unwrap();
    assert!(vertex.source.as_deref().unwrap_or_default().contains("ark_main"));
    assert_eq!(manifest.traits.len(), 2);
    assert!(matches!(manifest.traits[1], PipelineTrait::CullFace { .. }));
}

#[test]
fn textured_quad_layout() {
    let generated = generate_pipeline_sources(&load("textured-quad"), RenderingBackend::Vulkan).unwrap();
    let layout = &generated.assignment.layout;
    assert_eq!(layout.color_attachment_count, 1);
    assert_eq!(layout.samplers.get("u_Albedo").unwrap().binding(), Some(0));

    let fragment_ubo = &layout.ubos[layout.ubo_for_stage(ShaderStage::Fragment).unwrap()];
    assert_eq!(fragment_ubo.size(), 20);
    assert_eq!(fragment_ubo.slot_of("u_Exposure").unwrap().offset, 16);
    let data = fragment_ubo.initial_data();
    assert_eq!(&data[4..8], &0.5f32.to_le_bytes());

    let fragment = generated.source(ShaderStage::Fragment).unwrap();
    assert!(fragment.contains("layout(set = 2, binding = 0) uniform texture2D u_Albedo_tex;"));
    assert!(fragment.contains("layout(set = 2, binding = 1) uniform sampler u_Albedo_smp;"));
    assert!(fragment.contains("#define u_Albedo sampler2D(u_Albedo_tex, u_Albedo_smp)"));
    assert!(fragment.contains("    float u_Exposure;\n"));
}

#[test]
fn instanced_mesh_streams_and_outputs() {
    let generated = generate_pipeline_sources(&load("instanced-mesh"), RenderingBackend::Vulkan).unwrap();
    let layout = &generated.assignment.layout;
    let instance = layout.stream(1).unwrap();
    assert_eq!(instance.get("Model").unwrap().offset, Some(0));
    assert_eq!(instance.get("NodeId").unwrap().offset, Some(64));
    assert_eq!(instance.stride(), 80);

    let fragment = generated.source(ShaderStage::Fragment).unwrap();
    assert!(fragment.contains("flat in int v_NodeId;"));
    assert!(fragment.contains("FragColor = ark_main(v_WorldNormal) * u_Tint;"));
    assert!(fragment.contains("#define LIGHT_COUNT 4"));
    let vertex = generated.source(ShaderStage::Vertex).unwrap();
    assert!(vertex.contains("v_NodeId = a_NodeId;"));
    assert!(vertex.contains("gl_Position = ark_main(a_Position, a_Normal, v_WorldNormal);"));
}

#[test]
fn particles_compute_keeps_storage_layout() {
    let generated = generate_pipeline_sources(&load("particles"), RenderingBackend::Sdl3Gpu).unwrap();
    let compute = generated.source(ShaderStage::Compute).unwrap();
    assert!(compute.contains("struct Particle {"));
    assert!(compute.contains("set = 1, binding = 0) buffer Particles {"));
    assert!(compute.contains("layout(set = 2, binding = 0) uniform UBO0"));
    assert!(compute.contains("layout(local_size_x = 64) in;"));
    assert!(compute.contains("    ark_main();"));
}
