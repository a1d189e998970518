use anyhow::{Context, Result};
use shaderc::{CompileOptions, Compiler, ShaderKind};
use std::{
    env,
    fs::{self, File},
    io::Write,
    path::PathBuf,
};
use walkdir::WalkDir;

// GLSL sources, relative to this crate's manifest.
const SHADER_SOURCE_DIR: &str = "../../shaders";

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed={}", SHADER_SOURCE_DIR);

    let out_dir = PathBuf::from(env::var("OUT_DIR")?).join("shaders");
    fs::create_dir_all(&out_dir).context("Failed to create shader output directory")?;

    let compiler = Compiler::new().context("Failed to create shader compiler")?;
    let mut options = CompileOptions::new().context("Failed to create compile options")?;

    if env::var("PROFILE")? == "release" {
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
    } else {
        options.set_optimization_level(shaderc::OptimizationLevel::Zero);
        options.set_generate_debug_info();
    }
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );

    eprintln!(
        "Build.rs: Compiling shaders from '{}' to '{}'",
        SHADER_SOURCE_DIR,
        out_dir.display()
    );

    for entry in WalkDir::new(SHADER_SOURCE_DIR)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let in_path = entry.path();

        let Some(extension) = in_path.extension().and_then(|s| s.to_str()) else {
            println!(
                "cargo:warning=Skipping file with no extension: {}",
                in_path.display()
            );
            continue;
        };
        let shader_kind = match extension {
            "vert" => ShaderKind::Vertex,
            "frag" => ShaderKind::Fragment,
            "comp" => ShaderKind::Compute,
            "geom" => ShaderKind::Geometry,
            _ => {
                println!(
                    "cargo:warning=Skipping file with unknown shader extension ({}): {}",
                    extension,
                    in_path.display()
                );
                continue;
            }
        };

        let source_text = fs::read_to_string(in_path)
            .with_context(|| format!("Failed to read shader source: {}", in_path.display()))?;
        let input_file_name = in_path.to_string_lossy();

        let compiled_spirv = compiler
            .compile_into_spirv(
                &source_text,
                shader_kind,
                &input_file_name,
                "main",
                Some(&options),
            )
            .with_context(|| format!("Failed to compile shader: {}", input_file_name))?;

        if compiled_spirv.get_num_warnings() > 0 {
            println!(
                "cargo:warning=Shader compilation warnings for {}:\n{}",
                input_file_name,
                compiled_spirv.get_warning_messages()
            );
        }

        // sphere.vert -> sphere.vert.spv, so stages sharing a stem don't collide.
        let out_filename = format!(
            "{}.spv",
            in_path.file_name().unwrap_or_default().to_string_lossy()
        );
        let out_path = out_dir.join(out_filename);

        let mut outfile = File::create(&out_path)
            .with_context(|| format!("Failed to create output file: {}", out_path.display()))?;
        outfile
            .write_all(compiled_spirv.as_binary_u8())
            .with_context(|| format!("Failed to write SPIR-V to: {}", out_path.display()))?;

        eprintln!(
            "Build.rs: Compiled {} -> {}",
            in_path.display(),
            out_path.display()
        );
    }

    Ok(())
}
