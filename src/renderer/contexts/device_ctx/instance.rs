use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crossbeam_channel::{Receiver, Sender};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use crate::renderer::config::{RenderConfig, APP_NAME};

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<DebugUtils>,
}

struct DebugUtils {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    errors: Receiver<String>,
    // Referenced by the messenger callback as user data
    _sink: Box<Sender<String>>,
}

impl RenderInstance {
    const REQUIRED_VALIDATION_LAYERS: &'static [&'static CStr] = &[
        c"VK_LAYER_KHRONOS_validation",
    ];

    pub fn new(window: &Window, config: &RenderConfig) -> Result<Self> {
        let entry = ash::Entry::linked();

        let enable_validation = config.validation;
        if enable_validation {
            Self::check_validation_layers_supported(&entry)?;
        }

        let (sink, errors) = crossbeam_channel::unbounded();
        let sink = Box::new(sink);
        let user_data = sink.as_ref() as *const Sender<String> as *mut c_void;

        let instance = Self::create_instance(&entry, window, enable_validation, user_data)?;

        let debug_utils = if enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = debug_utils_messenger_create_info(user_data);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&info, None)?
            };
            Some(DebugUtils {
                loader,
                messenger,
                errors,
                _sink: sink,
            })
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    pub fn create_surface(
        &self,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok((surface, surface_loader))
    }

    /// First validation error reported since the last call, if any.
    pub fn take_validation_error(&self) -> Option<String> {
        self.debug_utils
            .as_ref()
            .and_then(|utils| utils.errors.try_recv().ok())
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
        enable_validation: bool,
        user_data: *mut c_void,
    ) -> Result<ash::Instance> {
        let app_name = std::ffi::CString::new(APP_NAME)?;
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name)
            .api_version(vk::API_VERSION_1_0);
        let enabled_layer_names = if enable_validation {
            Self::REQUIRED_VALIDATION_LAYERS
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>()
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::get_required_instance_extensions(window, enable_validation)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // Also covers messages emitted while creating and destroying the instance
        let mut debug_info = debug_utils_messenger_create_info(user_data);
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if enable_validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn get_required_instance_extensions(
        window: &Window,
        enable_validation: bool,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw()
        )?
            .iter()
            .map(|ext| unsafe {
                CStr::from_ptr(*ext)
            })
            .collect::<Vec<_>>();

        if enable_validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> Result<()> {
        let supported_layers = unsafe {
            entry.enumerate_instance_layer_properties()?
        };

        for layer in Self::REQUIRED_VALIDATION_LAYERS {
            let supported = supported_layers
                .iter()
                .filter_map(|props| props.layer_name_as_c_str().ok())
                .any(|name| name == *layer);
            if !supported {
                return Err(eyre!(
                    "Validation layer {:?} not supported; run with --validation false",
                    layer
                ));
            }
        }

        Ok(())
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(utils) = self.debug_utils.as_ref() {
                utils.loader.destroy_debug_utils_messenger(utils.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info(
    user_data: *mut c_void,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
        .user_data(user_data)
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*p_callback_data).p_message)
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("[Verbose]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Warning]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Error]{} {:?}", msg_type, msg);
        }
        _ => {
            log::info!("[Info]{} {:?}", msg_type, msg);
        }
    }

    if is_fatal_message(message_severity, message_type) && !p_user_data.is_null() {
        let sink = unsafe { &*(p_user_data as *const Sender<String>) };
        let _ = sink.try_send(msg.to_string_lossy().into_owned());
    }

    vk::FALSE
}

/// Errors of any type, and warnings from validation or about performance, stop the renderer.
pub fn is_fatal_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
) -> bool {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    use vk::DebugUtilsMessageTypeFlagsEXT as Type;

    severity.contains(Severity::ERROR)
        || (severity.contains(Severity::WARNING)
            && message_type.intersects(Type::VALIDATION | Type::PERFORMANCE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    use vk::DebugUtilsMessageTypeFlagsEXT as Type;

    #[test]
    fn errors_are_always_fatal() {
        assert!(is_fatal_message(Severity::ERROR, Type::VALIDATION));
        assert!(is_fatal_message(Severity::ERROR, Type::GENERAL));
    }

    #[test]
    fn validation_and_performance_warnings_are_fatal() {
        assert!(is_fatal_message(Severity::WARNING, Type::VALIDATION));
        assert!(is_fatal_message(Severity::WARNING, Type::PERFORMANCE));
        assert!(!is_fatal_message(Severity::WARNING, Type::GENERAL));
    }

    #[test]
    fn info_and_verbose_are_only_logged() {
        assert!(!is_fatal_message(Severity::INFO, Type::VALIDATION));
        assert!(!is_fatal_message(Severity::VERBOSE, Type::PERFORMANCE));
    }
}
