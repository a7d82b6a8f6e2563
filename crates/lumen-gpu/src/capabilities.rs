//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    // Core features the renderer enables
    pub supports_geometry_shader: bool,
    pub supports_sampler_anisotropy: bool,
    pub supports_depth_clamp: bool,

    // Descriptor indexing (VK 1.2 core)
    pub supports_runtime_descriptor_array: bool,
    pub supports_partially_bound: bool,
    pub supports_sampled_image_non_uniform_indexing: bool,

    // Limits
    /// Minimum alignment for dynamic uniform buffer offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Maximum sampler anisotropy
    pub max_sampler_anisotropy: f32,
    /// Maximum sampled images per shader stage
    pub max_per_stage_sampled_images: u32,

    // Memory info
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

/// Device extensions the renderer cannot run without.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: Caller guarantees the handles are valid
        let (properties, memory_properties, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let mut vulkan_1_2 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_2);
        // SAFETY: The feature chain lives for the duration of the call
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        let features = features2.features;

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,

            supports_geometry_shader: features.geometry_shader == vk::TRUE,
            supports_sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            supports_depth_clamp: features.depth_clamp == vk::TRUE,

            supports_runtime_descriptor_array: vulkan_1_2.runtime_descriptor_array == vk::TRUE,
            supports_partially_bound: vulkan_1_2.descriptor_binding_partially_bound == vk::TRUE,
            supports_sampled_image_non_uniform_indexing: vulkan_1_2
                .shader_sampled_image_array_non_uniform_indexing
                == vk::TRUE,

            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            max_per_stage_sampled_images: properties.limits.max_per_stage_descriptor_sampled_images,

            device_local_memory_mb,
            available_extensions,
        }
    }

    /// Names of required features this device lacks. Empty when usable.
    pub fn missing_features(&self) -> Vec<&'static str> {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        let checks = [
            (api_major > 1 || (api_major == 1 && api_minor >= 2), "Vulkan 1.2"),
            (self.supports_geometry_shader, "geometryShader"),
            (self.supports_sampler_anisotropy, "samplerAnisotropy"),
            (self.supports_depth_clamp, "depthClamp"),
            (self.supports_runtime_descriptor_array, "runtimeDescriptorArray"),
            (self.supports_partially_bound, "descriptorBindingPartiallyBound"),
            (
                self.supports_sampled_image_non_uniform_indexing,
                "shaderSampledImageArrayNonUniformIndexing",
            ),
        ];

        checks
            .iter()
            .filter(|(supported, _)| !supported)
            .map(|(_, name)| *name)
            .collect()
    }

    /// Required device extensions this device lacks.
    pub fn missing_extensions(&self) -> Vec<String> {
        REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .filter_map(|ext| ext.to_str().ok())
            .filter(|name| !self.available_extensions.contains(*name))
            .map(String::from)
            .collect()
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable() -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "test".to_string(),
            api_version: vk::make_api_version(0, 1, 3, 0),
            driver_version: 0,
            supports_geometry_shader: true,
            supports_sampler_anisotropy: true,
            supports_depth_clamp: true,
            supports_runtime_descriptor_array: true,
            supports_partially_bound: true,
            supports_sampled_image_non_uniform_indexing: true,
            min_uniform_buffer_offset_alignment: 256,
            max_sampler_anisotropy: 16.0,
            max_per_stage_sampled_images: 1024,
            device_local_memory_mb: 4096,
            available_extensions: ["VK_KHR_swapchain".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn complete_device_has_nothing_missing() {
        let caps = capable();
        assert!(caps.missing_features().is_empty());
        assert!(caps.missing_extensions().is_empty());
    }

    #[test]
    fn reports_missing_geometry_shader() {
        let caps = GpuCapabilities {
            supports_geometry_shader: false,
            ..capable()
        };
        assert_eq!(caps.missing_features(), vec!["geometryShader"]);
    }

    #[test]
    fn reports_old_api_and_missing_swapchain() {
        let caps = GpuCapabilities {
            api_version: vk::make_api_version(0, 1, 1, 0),
            available_extensions: HashSet::new(),
            ..capable()
        };
        assert_eq!(caps.missing_features(), vec!["Vulkan 1.2"]);
        assert_eq!(caps.missing_extensions(), vec!["VK_KHR_swapchain".to_string()]);
    }
}
