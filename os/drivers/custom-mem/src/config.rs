use utils_accessors_derive::Setters;

/// Name under which the device node is published.
pub const DEVICE_NAME: &str = "custom_mem_drv";

/// Device class name.
pub const CLASS_NAME: &str = "custom_mem_drv";

/// Requests above this size fail with `OutOfMemory` before touching the
/// page source.
pub const DEFAULT_MAX_REQUEST_BYTES: u64 = 64 * 1024 * 1024;

/// Static driver settings, fixed when the [`Device`](crate::Device) is
/// created.
///
/// ```
/// use custom_mem::DriverConfig;
///
/// let config = DriverConfig::new()
///     .with_capacity_bytes(Some(1 << 20))
///     .with_max_request_bytes(64 * 1024);
/// assert_eq!(config.device_name(), "custom_mem_drv");
/// assert_eq!(config.capacity_bytes(), Some(1 << 20));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Setters)]
pub struct DriverConfig {
    #[setters(copy)]
    device_name: &'static str,
    #[setters(copy)]
    class_name: &'static str,
    /// Total bytes the driver may hold at once. `None` means the heap is the
    /// only limit.
    #[setters(copy)]
    capacity_bytes: Option<u64>,
    #[setters(copy)]
    max_request_bytes: u64,
}

impl DriverConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            device_name: DEVICE_NAME,
            class_name: CLASS_NAME,
            capacity_bytes: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = DriverConfig::default();
        assert_eq!(c.device_name(), DEVICE_NAME);
        assert_eq!(c.class_name(), CLASS_NAME);
        assert_eq!(c.capacity_bytes(), None);
        assert_eq!(c.max_request_bytes(), DEFAULT_MAX_REQUEST_BYTES);
    }

    #[test]
    fn setters_chain() {
        let mut c = DriverConfig::new();
        c.set_device_name("shm0").set_max_request_bytes(4096);
        assert_eq!(c.device_name(), "shm0");
        assert_eq!(c.max_request_bytes(), 4096);
    }
}
