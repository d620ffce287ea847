// SPDX-License-Identifier: CEPL-1.0
//! Extension and layer requirements, resolved once against what the loader
//! and the chosen device offer.

use std::ffi::{c_char, CStr};

use ash::vk;
use tracing::{info, warn};

use crate::error::SetupError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Names offered by an `enumerate_*_extension_properties` call.
pub fn extension_names(props: &[vk::ExtensionProperties]) -> Vec<&CStr> {
    props
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) })
        .collect()
}

pub fn layer_names(props: &[vk::LayerProperties]) -> Vec<&CStr> {
    props
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) })
        .collect()
}

/// Every entry of `wanted` that `available` does not contain.
pub fn missing<'a>(wanted: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|w| !available.contains(w))
        .collect()
}

/// A set of required and nice-to-have extension names for one scope
/// (instance or device).
#[derive(Clone, Debug)]
pub struct RequirementSet {
    scope: &'static str,
    required: Vec<&'static CStr>,
    optional: Vec<&'static CStr>,
}

impl RequirementSet {
    pub fn new(scope: &'static str) -> Self {
        Self {
            scope,
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    pub fn require(mut self, name: &'static CStr) -> Self {
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    pub fn require_all(mut self, names: impl IntoIterator<Item = &'static CStr>) -> Self {
        for name in names {
            self = self.require(name);
        }
        self
    }

    pub fn prefer(mut self, name: &'static CStr) -> Self {
        if !self.optional.contains(&name) {
            self.optional.push(name);
        }
        self
    }

    pub fn required(&self) -> &[&'static CStr] {
        &self.required
    }

    /// The names to enable: every required one plus the optional ones on
    /// offer. Fails if any required name is absent.
    pub fn resolve(&self, available: &[&CStr]) -> Result<Vec<&'static CStr>, SetupError> {
        let absent = missing(&self.required, available);
        if !absent.is_empty() {
            return Err(SetupError::MissingExtensions {
                scope: self.scope,
                missing: absent
                    .iter()
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            });
        }
        let mut enabled = self.required.clone();
        for name in &self.optional {
            if available.contains(name) && !enabled.contains(name) {
                enabled.push(name);
            }
        }
        Ok(enabled)
    }
}

/// Converts the loader's window-system extension list.
///
/// # Safety
/// Every pointer must reference a NUL-terminated string with static
/// lifetime, as returned by `ash_window::enumerate_required_extensions`.
pub unsafe fn static_names(ptrs: &'static [*const c_char]) -> Vec<&'static CStr> {
    ptrs.iter()
        .map(|&p| unsafe { CStr::from_ptr(p) })
        .collect()
}

pub fn instance_requirements(window_system: &[&'static CStr], validation: bool) -> RequirementSet {
    let mut set = RequirementSet::new("instance")
        .require_all(window_system.iter().copied())
        .prefer(ash::khr::portability_enumeration::NAME);
    if validation {
        set = set.require(ash::ext::debug_utils::NAME);
    }
    set
}

pub fn device_requirements() -> RequirementSet {
    RequirementSet::new("device")
        .require(ash::khr::swapchain::NAME)
        .prefer(ash::khr::portability_subset::NAME)
}

/// Enumeration flag needed when the portability extension made it in.
pub fn instance_flags(enabled: &[&CStr]) -> vk::InstanceCreateFlags {
    if enabled.contains(&ash::khr::portability_enumeration::NAME) {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    }
}

/// The validation layer if it was asked for and is installed. A missing
/// layer only costs diagnostics, so startup continues.
pub fn validation_layers(requested: bool, available: &[&CStr]) -> Vec<&'static CStr> {
    if !requested {
        return Vec::new();
    }
    if available.contains(&VALIDATION_LAYER) {
        info!("enabled validation layer {}", VALIDATION_LAYER.to_string_lossy());
        vec![VALIDATION_LAYER]
    } else {
        warn!(
            "validation layer {} is not available",
            VALIDATION_LAYER.to_string_lossy()
        );
        Vec::new()
    }
}

pub fn as_ptrs(names: &[&CStr]) -> Vec<*const c_char> {
    names.iter().map(|n| n.as_ptr()).collect()
}
