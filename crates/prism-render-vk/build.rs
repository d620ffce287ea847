// SPDX-License-Identifier: CEPL-1.0
// With `embed-shaders` (the default), compiles shaders/triangle.{vert,frag}
// into OUT_DIR. Without it the renderer loads prebuilt .spv files at runtime.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "embed-shaders")]
    embed::compile();
}

#[cfg(feature = "embed-shaders")]
mod embed {
    use std::{env, fs, path::PathBuf};

    pub fn compile() {
        let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
        let src = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"))
            .join("shaders");

        let comp = shaderc::Compiler::new().expect("shaderc compiler");
        let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_1 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (file, kind) in [
            ("triangle.vert", shaderc::ShaderKind::Vertex),
            ("triangle.frag", shaderc::ShaderKind::Fragment),
        ] {
            let path = src.join(file);
            println!("cargo:rerun-if-changed={}", path.display());
            let glsl = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
            let spv = comp
                .compile_into_spirv(&glsl, kind, file, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("compile {file}: {e}"));
            fs::write(out.join(format!("{file}.spv")), spv.as_binary_u8())
                .unwrap_or_else(|e| panic!("write {file}.spv: {e}"));
        }
    }
}
