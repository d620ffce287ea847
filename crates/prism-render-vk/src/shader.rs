// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;

use crate::error::SetupError;
use crate::gpu::ShaderSet;

pub const VERTEX_FILE: &str = "triangle.vert.spv";
pub const FRAGMENT_FILE: &str = "triangle.frag.spv";

/// Where the triangle's SPIR-V comes from. Defaults to [`ShaderSource::Embedded`]
/// when the `embed-shaders` feature (on by default) is enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    /// `triangle.vert.spv` and `triangle.frag.spv` inside a directory.
    Dir(PathBuf),
    /// Compiled into the binary by the `embed-shaders` build.
    Embedded,
}

impl Default for ShaderSource {
    fn default() -> Self {
        if cfg!(feature = "embed-shaders") {
            Self::Embedded
        } else {
            Self::Dir(PathBuf::from("shaders"))
        }
    }
}

impl ShaderSource {
    pub fn load(&self) -> Result<ShaderSet, SetupError> {
        match self {
            Self::Dir(dir) => Ok(ShaderSet {
                vertex: load_file(&dir.join(VERTEX_FILE))?,
                fragment: load_file(&dir.join(FRAGMENT_FILE))?,
            }),
            Self::Embedded => embedded(),
        }
    }
}

#[cfg(feature = "embed-shaders")]
fn embedded() -> Result<ShaderSet, SetupError> {
    let vs = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
    let fs = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));
    Ok(ShaderSet {
        vertex: words(VERTEX_FILE, vs)?,
        fragment: words(FRAGMENT_FILE, fs)?,
    })
}

#[cfg(not(feature = "embed-shaders"))]
fn embedded() -> Result<ShaderSet, SetupError> {
    Err(SetupError::Shader {
        name: "embedded".into(),
        reason: "built without the embed-shaders feature".into(),
    })
}

fn load_file(path: &Path) -> Result<Vec<u32>, SetupError> {
    let name = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| SetupError::Shader {
        name: name.clone(),
        reason: e.to_string(),
    })?;
    words(&name, &bytes)
}

/// Reinterprets a SPIR-V blob as 32-bit words.
pub fn words(name: &str, bytes: &[u8]) -> Result<Vec<u32>, SetupError> {
    read_spv(&mut Cursor::new(bytes)).map_err(|e| SetupError::Shader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}
