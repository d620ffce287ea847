// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use prism_render_vk::{ShaderSource, VkOptions, DEFAULT_CLEAR_COLOR};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Presents a single triangle through Vulkan", long_about = None)]
pub struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "prism.toml")]
    pub config: PathBuf,

    /// Enable the Khronos validation layer (`--validation false` to force off)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub validation: Option<bool>,

    /// Directory holding triangle.vert.spv and triangle.frag.spv
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,

    /// Exit after presenting this many frames (0 = run until closed)
    #[arg(long)]
    pub frames: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub validation: Option<bool>,
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_frames: u64,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            validation: None,
            shader_dir: None,
            max_frames: 0,
        }
    }
}

#[derive(Debug, Deserialize, Default, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

fn default_clear() -> [f32; 4] {
    DEFAULT_CLEAR_COLOR
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file means defaults. A file that fails to parse is reported and
/// also falls back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// Effective settings after layering CLI flags over the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub clear_color: [f32; 4],
    pub validation: Option<bool>,
    pub shader_dir: Option<PathBuf>,
    pub max_frames: u64,
}

impl Settings {
    pub fn resolve(args: &Args, cfg: &AppCfg) -> Self {
        Self {
            clear_color: cfg.render.clear_color,
            validation: args.validation.or(cfg.render.validation),
            shader_dir: args
                .shader_dir
                .clone()
                .or_else(|| cfg.render.shader_dir.clone()),
            max_frames: args.frames.unwrap_or(cfg.render.max_frames),
        }
    }

    /// Environment defaults with anything set here layered on top.
    pub fn vk_options(&self) -> VkOptions {
        let mut opts = VkOptions::from_env();
        if let Some(v) = self.validation {
            opts.validation = v;
        }
        if let Some(dir) = &self.shader_dir {
            opts.shaders = ShaderSource::Dir(dir.clone());
        }
        opts.clear_color = self.clear_color;
        opts
    }
}
