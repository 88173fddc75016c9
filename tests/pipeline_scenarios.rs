use shader_forge::backend::{BackendLayoutPolicy, RenderingBackend, policy_for};
use shader_forge::compiler::generate_pipeline_sources;
use shader_forge::manifest::{PipelineManifest, parse_manifest};
use shader_forge::pipeline::{LayoutLimits, PipelineBuildingContext};
use shader_forge::shader::{LayoutQualifier, ShaderStage, StageMask};
use serde_json::json;

fn manifest(value: serde_json::Value) -> PipelineManifest {
    parse_manifest(&value.to_string()).expect("valid manifest")
}

fn two_stage() -> PipelineManifest {
    manifest(json!({
        "name": "two-stage",
        "stages": [
            {
                "stage": "vertex",
                "source": "vec4 ark_main(vec3 Position, vec2 TexCoordinate) {\n    return u_VP * vec4(Position, 1.0);\n}\n"
            },
            {
                "stage": "fragment",
                "source": "vec4 ark_main(vec4 c) {\n    return c * u_Color * vec4(v_TexCoordinate, 1.0, 1.0);\n}\n"
            }
        ],
        "uniforms": [ { "name": "u_Color", "type": "vec4", "value": "1,1,1,1" } ]
    }))
}

#[test]
fn vertex_locations_follow_parameters_and_varyings_match() {
    let generated = generate_pipeline_sources(&two_stage(), RenderingBackend::Vulkan).unwrap();
    let vertex = generated.assignment.stage(ShaderStage::Vertex).unwrap();
    let fragment = generated.assignment.stage(ShaderStage::Fragment).unwrap();

    assert_eq!(vertex.inputs["Position"], LayoutQualifier::location(0));
    assert_eq!(vertex.inputs["TexCoordinate"], LayoutQualifier::location(1));
    assert_eq!(fragment.inputs["TexCoordinate"], vertex.outputs["TexCoordinate"]);
    assert_eq!(fragment.inputs["C"], vertex.outputs["C"]);

    let vertex_text = generated.source(ShaderStage::Vertex).unwrap();
    assert!(vertex_text.contains("layout(location = 0) in vec3 a_Position;"));
    assert!(vertex_text.contains("layout(location = 1) in vec2 a_TexCoordinate;"));
    assert!(vertex_text.contains("gl_Position = ark_main(a_Position, a_TexCoordinate);"));
    assert!(vertex_text.contains("v_TexCoordinate = a_TexCoordinate;"));

    let location = fragment.inputs["TexCoordinate"].location.unwrap();
    let fragment_text = generated.source(ShaderStage::Fragment).unwrap();
    assert!(fragment_text.contains(&format!("layout(location = {location}) in vec2 v_TexCoordinate;")));
    assert!(fragment_text.contains("FragColor = ark_main(v_C);"));
}

#[test]
fn fragment_only_uniform_lives_in_a_fragment_only_block() {
    let ctx = PipelineBuildingContext::new(&two_stage(), LayoutLimits::default()).unwrap();
    let owners: Vec<_> = ctx
        .layout
        .ubos
        .iter()
        .filter(|ubo| ubo.uniforms().iter().any(|u| u.name == "u_Color"))
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].stages, StageMask::of(ShaderStage::Fragment));
    assert_eq!(owners[0].initial_data().len(), 16);
}

#[test]
fn nine_samplers_overflow_an_eight_slot_backend() {
    let body: Vec<String> = (0..9).map(|i| format!("texture(u_Texture{i}, vec2(0.5))")).collect();
    let samplers: Vec<serde_json::Value> = (0..9).map(|_| json!({})).collect();
    let m = manifest(json!({
        "stages": [
            { "stage": "vertex", "source": "vec4 ark_main(vec3 position) { return vec4(position, 1.0); }" },
            { "stage": "fragment", "source": format!("vec4 ark_main() {{ return {}; }}", body.join(" + ")) }
        ],
        "samplers": samplers
    }));
    let policy = policy_for(RenderingBackend::Sdl3Gpu);
    assert_eq!(policy.limits().max_samplers, 8);
    let err = generate_pipeline_sources(&m, RenderingBackend::Sdl3Gpu).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("capacity exceeded"), "{msg}");
    assert!(msg.contains("9 requested"), "{msg}");
    assert!(msg.contains("8 slots"), "{msg}");

    // the same pipeline fits a 16-slot backend
    generate_pipeline_sources(&m, RenderingBackend::Vulkan).unwrap();
}

#[test]
fn compute_with_vertex_fails_before_parsing() {
    let m = manifest(json!({
        "stages": [
            { "stage": "compute", "source": "this is not glsl at all" },
            { "stage": "vertex", "source": "neither is this" }
        ]
    }));
    let err = generate_pipeline_sources(&m, RenderingBackend::Vulkan).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("compute stage is exclusive"), "{msg}");
    assert!(!msg.contains("ark_main"), "{msg}");
}

#[test]
fn missing_entry_point_is_a_dialect_error() {
    let m = manifest(json!({
        "stages": [
            { "stage": "vertex", "source": "vec4 ark_main(vec3 position) { return vec4(position, 1.0); }" },
            { "stage": "fragment", "source": "vec4 shade() { return vec4(1.0); }" }
        ]
    }));
    for backend in [
        RenderingBackend::OpenGl,
        RenderingBackend::Vulkan,
        RenderingBackend::Bgfx,
        RenderingBackend::Sdl3Gpu,
    ] {
        let err = generate_pipeline_sources(&m, backend).unwrap_err();
        assert!(format!("{err:#}").contains("undefined ark_main in fragment shader"));
    }
}
