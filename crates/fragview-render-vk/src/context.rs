// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and device bring-up.

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"fragview";

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Everything that lives as long as the window: one instance, one surface,
/// one device with a single graphics+present queue.
pub struct GpuContext {
    _entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub queue_family: u32,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub max_push_constants_size: u32,
    debug: Option<DebugMessenger>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

unsafe fn has_instance_layer(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader.create_debug_utils_messenger(&ci, None)?;
    Ok(DebugMessenger { loader, messenger })
}

/// First queue family that can both draw and present.
pub(crate) fn pick_queue_family(
    families: &[vk::QueueFamilyProperties],
    can_present: impl Fn(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, q)| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .find(|&i| can_present(i))
}

pub(crate) fn supports_api_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

unsafe fn has_device_extension(instance: &Instance, phys: vk::PhysicalDevice, name: &CStr) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
}

unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in instance.enumerate_physical_devices()? {
        let props = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        if !supports_api_1_3(props.api_version) {
            debug!("skipping {name}: Vulkan 1.3 not supported");
            continue;
        }
        if !has_device_extension(instance, phys, swapchain::NAME) {
            debug!("skipping {name}: no VK_KHR_swapchain");
            continue;
        }

        let families = instance.get_physical_device_queue_family_properties(phys);
        let family = pick_queue_family(&families, |i| {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        });
        if let Some(family) = family {
            info!("using {name} (queue family {family})");
            return Ok((phys, family));
        }
    }
    Err(anyhow!("no Vulkan 1.3 device can present to this surface"))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let device_exts = [swapchain::NAME.as_ptr()];

    // feats2 -> feats13; both must outlive create_device.
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        dynamic_rendering: vk::TRUE,
        synchronization2: vk::TRUE,
        ..Default::default()
    };
    let feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        p_next: (&mut feats13) as *mut _ as *mut _,
        ..Default::default()
    };

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&feats2) as *const _ as *const _,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);
    Ok((device, queue))
}

/// Cleanups for a half-built context, run newest first unless disarmed.
#[derive(Default)]
struct Unwind<'a> {
    steps: Vec<Box<dyn FnOnce() + 'a>>,
}

impl<'a> Unwind<'a> {
    fn push(&mut self, step: impl FnOnce() + 'a) {
        self.steps.push(Box::new(step));
    }

    fn disarm(mut self) {
        self.steps.clear();
    }
}

impl Drop for Unwind<'_> {
    fn drop(&mut self) {
        while let Some(step) = self.steps.pop() {
            step();
        }
    }
}

impl GpuContext {
    /// # Safety
    /// The window behind `window`/`display` must outlive the context.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        // Order matters: instance, then surface from it, then a device that
        // can present to that surface.
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::linked();
        let validation = if validation && !has_instance_layer(&entry, VALIDATION_LAYER) {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
            false
        } else {
            validation
        };

        let instance = create_instance(&entry, dh, validation).context("create_instance")?;
        let mut unwind = Unwind::default();
        let owned = instance.clone();
        unwind.push(move || owned.destroy_instance(None));

        let debug = if validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };
        if let Some(dbg) = &debug {
            let (loader, messenger) = (dbg.loader.clone(), dbg.messenger);
            unwind.push(move || loader.destroy_debug_utils_messenger(messenger, None));
        }

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;
        let loader = surface_loader.clone();
        unwind.push(move || loader.destroy_surface(surface, None));

        let (phys, queue_family) = pick_device_and_queue(&instance, &surface_loader, surface)?;
        let (device, queue) = create_device(&instance, phys, queue_family)?;
        unwind.disarm();

        let max_push_constants_size = instance
            .get_physical_device_properties(phys)
            .limits
            .max_push_constants_size;

        Ok(GpuContext {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            phys,
            queue_family,
            device,
            queue,
            max_push_constants_size,
            debug,
        })
    }

    /// Device, then surface, then instance. Everything created from the
    /// device must already be gone.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        self.surface_loader.destroy_surface(self.surface, None);
        if let Some(dbg) = self.debug.take() {
            dbg.loader.destroy_debug_utils_messenger(dbg.messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn queue_family_needs_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        // Family 1 draws but cannot present; 2 does both.
        assert_eq!(pick_queue_family(&families, |i| i != 1), Some(2));
        assert_eq!(pick_queue_family(&families, |_| true), Some(1));
        assert_eq!(pick_queue_family(&families, |_| false), None);
    }

    #[test]
    fn empty_queue_families_are_ignored() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0)];
        assert_eq!(pick_queue_family(&families, |_| true), None);
    }

    #[test]
    fn api_version_gate() {
        assert!(supports_api_1_3(vk::API_VERSION_1_3));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!supports_api_1_3(vk::API_VERSION_1_2));
    }

    #[test]
    fn partial_context_unwinds_newest_first() {
        use std::cell::RefCell;
        let log = RefCell::new(Vec::new());
        {
            let mut unwind = Unwind::default();
            unwind.push(|| log.borrow_mut().push("instance"));
            unwind.push(|| log.borrow_mut().push("messenger"));
            unwind.push(|| log.borrow_mut().push("surface"));
        }
        assert_eq!(*log.borrow(), ["surface", "messenger", "instance"]);

        let mut unwind = Unwind::default();
        unwind.push(|| log.borrow_mut().push("device"));
        unwind.disarm();
        assert_eq!(log.borrow().len(), 3);
    }
}
