use crate::types::DeviceIndex;

/// Canonical cache key for an ordered list of local devices.
///
/// The order is significant: `[0, 1]` and `[1, 0]` are different keys and get
/// different communicators, since the position of a device in the list is
/// its local index in the global rank space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn from_devices(devices: &[DeviceIndex]) -> Self {
        let joined = devices
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
