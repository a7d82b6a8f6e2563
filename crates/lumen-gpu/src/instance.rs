//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// Required instance extensions for the renderer.
pub fn required_instance_extensions(enable_validation: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];

    if enable_validation {
        extensions.push(ash::ext::debug_utils::NAME);
    }

    extensions
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Lumen")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let extension_names: Vec<*const std::ffi::c_char> = required_instance_extensions(enable_validation)
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Missing layers are reported but not fatal
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
            if !found {
                tracing::warn!("Validation layer {:?} not available", layer);
            }
            found
        })
        .collect();

    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Select the best physical device.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best_device = None;
    let mut best_score = 0i64;

    for device in devices {
        let properties = instance.get_physical_device_properties(device);
        let score = score_physical_device(&properties);
        tracing::debug!(
            "Physical device {:?}: score {}",
            properties.device_name_as_c_str().unwrap_or(c"?"),
            score
        );
        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or(GpuError::NoSuitableDevice)
}

/// Score a physical device for selection. Devices below Vulkan 1.2 score -1.
fn score_physical_device(properties: &vk::PhysicalDeviceProperties) -> i64 {
    let api_version = properties.api_version;
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    if major < 1 || (major == 1 && minor < 2) {
        return -1;
    }

    let mut score = 0;

    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 500,
        _ => {}
    }

    // Newer API versions win ties between devices of the same type
    score += i64::from(minor) * 100;

    let limits = &properties.limits;
    score += i64::from(limits.max_image_dimension2_d) / 1024;
    score += i64::from(limits.max_per_stage_descriptor_sampled_images.min(1 << 20)) / 4096;

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(device_type: vk::PhysicalDeviceType, minor: u32) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, minor, 0),
            device_type,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_beats_integrated() {
        let discrete = score_physical_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 2));
        let integrated =
            score_physical_device(&properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 3));
        assert!(discrete > integrated);
    }

    #[test]
    fn old_api_is_rejected() {
        assert_eq!(
            score_physical_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 1)),
            -1
        );
    }

    #[test]
    fn validation_adds_debug_utils() {
        assert!(required_instance_extensions(true).contains(&ash::ext::debug_utils::NAME));
        assert!(!required_instance_extensions(false).contains(&ash::ext::debug_utils::NAME));
    }
}
