use std::hash::Hash;
use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
    ) -> Self {
        Self {
            index,
            properties,
        }
    }

    /// The first family advertising graphics support, in enumeration order.
    pub fn first_graphics(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        families
            .iter()
            .enumerate()
            .map(|(i, props)| Self::new(i as u32, *props))
            .find(|family| family.supports_graphics())
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_count > 0
            && self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

impl Hash for QueueFamily {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
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
    fn picks_first_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 4),
        ];
        let picked = QueueFamily::first_graphics(&families).unwrap();
        assert_eq!(picked.index, 1);
    }

    #[test]
    fn no_graphics_family() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 0),
        ];
        assert!(QueueFamily::first_graphics(&families).is_none());
    }
}
