use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    // Full-screen quad from gl_VertexIndex: two CCW triangles, no vertex
    // buffer. uv is (0,0) at NDC (-1,-1).
    let vs_src = r#"
#version 450
layout(location = 0) out vec2 outUV;

const vec2 kCorners[6] = vec2[](
    vec2(-1.0, -1.0), vec2( 1.0, -1.0), vec2( 1.0,  1.0),
    vec2(-1.0, -1.0), vec2( 1.0,  1.0), vec2(-1.0,  1.0)
);

void main() {
    vec2 p = kCorners[gl_VertexIndex];
    outUV = p * 0.5 + 0.5;
    gl_Position = vec4(p, 0.0, 1.0);
}
"#;

    // Safety-net shader shown while the user shader is missing or broken.
    // Must only depend on the push-constant block.
    let fs_src = r#"
#version 450
layout(location = 0) in vec2 inUV;
layout(location = 0) out vec4 outColor;

layout(push_constant) uniform PushConstants {
    vec2  resolution;
    vec2  mouse;
    float time;
    float time_delta;
    int   frame;
} pc;

void main() {
    vec2 px = inUV * pc.resolution;
    vec2 cell = floor(px / 32.0);
    float checker = mod(cell.x + cell.y, 2.0);

    vec3 base = mix(vec3(0.10, 0.02, 0.12), vec3(0.22, 0.04, 0.26), checker);
    float pulse = 0.5 + 0.5 * sin(pc.time * 2.0);
    base += vec3(0.25, 0.0, 0.25) * pulse * inUV.y;

    float d = length(px - pc.mouse);
    float ring = smoothstep(10.0, 8.0, abs(d - 16.0));
    outColor = vec4(mix(base, vec3(1.0), ring), 1.0);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "quad.vert",
            "main",
            Some(&opts),
        )
        .expect("quad.vert");

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "fallback.frag",
            "main",
            Some(&opts),
        )
        .expect("fallback.frag");

    fs::write(out.join("quad.vert.spv"), vs_spv.as_binary_u8()).expect("write quad.vert.spv");
    fs::write(out.join("fallback.frag.spv"), fs_spv.as_binary_u8())
        .expect("write fallback.frag.spv");

    println!("cargo:rerun-if-changed=build.rs");
}
