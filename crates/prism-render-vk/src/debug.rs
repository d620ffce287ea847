// SPDX-License-Identifier: CEPL-1.0
//! Debug-utils messenger plumbing. Driver messages are routed to a
//! [`DiagnosticsSink`]; nothing here feeds back into rendering.

use std::ffi::{c_void, CStr};

use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        if flags.contains(S::ERROR) {
            Self::Error
        } else if flags.contains(S::WARNING) {
            Self::Warning
        } else if flags.contains(S::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    General,
    Validation,
    Performance,
}

impl MessageKind {
    pub fn from_vk(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        if flags.contains(T::VALIDATION) {
            Self::Validation
        } else if flags.contains(T::PERFORMANCE) {
            Self::Performance
        } else {
            Self::General
        }
    }
}

pub trait DiagnosticsSink: Send + Sync {
    fn message(&self, severity: Severity, kind: MessageKind, id: i32, text: &str);
}

/// Forwards to `tracing` at the matching level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn message(&self, severity: Severity, kind: MessageKind, id: i32, text: &str) {
        match severity {
            Severity::Error => tracing::error!("[vulkan {kind:?}] {id}: {text}"),
            Severity::Warning => tracing::warn!("[vulkan {kind:?}] {id}: {text}"),
            Severity::Info => tracing::info!("[vulkan {kind:?}] {id}: {text}"),
            Severity::Verbose => tracing::debug!("[vulkan {kind:?}] {id}: {text}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn message(&self, _: Severity, _: MessageKind, _: i32, _: &str) {}
}

/// Heap-pinned sink whose address is handed to the driver as user data.
///
/// Must outlive both the messenger and the instance, since the create info
/// is also chained into instance creation.
pub struct SinkSlot(Box<Box<dyn DiagnosticsSink>>);

impl SinkSlot {
    pub fn new(sink: Box<dyn DiagnosticsSink>) -> Self {
        Self(Box::new(sink))
    }

    fn user_data(&self) -> *mut c_void {
        &*self.0 as *const Box<dyn DiagnosticsSink> as *mut c_void
    }

    /// Warnings and errors from validation and performance checks.
    pub fn create_info(&self) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            p_user_data: self.user_data(),
            ..Default::default()
        }
    }
}

pub(crate) unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    let (id, text) = unsafe {
        let data = &*data;
        let text = if data.p_message.is_null() {
            std::borrow::Cow::Borrowed("")
        } else {
            CStr::from_ptr(data.p_message).to_string_lossy()
        };
        (data.message_id_number, text)
    };
    let sink = unsafe { &*(user as *const Box<dyn DiagnosticsSink>) };
    sink.message(Severity::from_vk(severity), MessageKind::from_vk(types), id, &text);
    vk::FALSE
}

/// An instance-scoped messenger. Destroy before the instance.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// # Safety
    /// `instance` must have `VK_EXT_debug_utils` enabled and `slot` must
    /// outlive the returned messenger.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        slot: &SinkSlot,
    ) -> ash::prelude::VkResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let handle = unsafe { loader.create_debug_utils_messenger(&slot.create_info(), None)? };
        Ok(Self { loader, handle })
    }

    /// # Safety
    /// Call once, before the owning instance is destroyed.
    pub unsafe fn destroy(&mut self) {
        if self.handle != vk::DebugUtilsMessengerEXT::null() {
            unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
            self.handle = vk::DebugUtilsMessengerEXT::null();
        }
    }
}
