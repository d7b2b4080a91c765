//! Host facts the launcher needs before starting workers.
use std::{fs, path::Path};

use tracing::{info, warn};

pub const DRIVER_VERSION_FILE: &str = "/usr/local/Ascend/driver/version.info";

/// Last driver release that still addresses devices by their physical id.
pub const LEGACY_DRIVER_VERSION: &str = "Version=20.1.0";

/// How workers address their device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNumbering {
    /// Topology-assigned physical id (legacy driver).
    Physical,
    /// Position of the device within the node's device list.
    Logical,
}

impl DeviceNumbering {
    pub fn from_driver_version(version: Option<&str>) -> Self {
        match version {
            Some(v) if v == LEGACY_DRIVER_VERSION => DeviceNumbering::Physical,
            _ => DeviceNumbering::Logical,
        }
    }

    pub fn detect(version_file: &Path) -> Self {
        Self::from_driver_version(driver_version(version_file).as_deref())
    }
}

/// First non-empty line of the driver version file, trimmed.
pub fn driver_version(version_file: &Path) -> Option<String> {
    let content = fs::read_to_string(version_file).ok()?;
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Log the driver version and the device numbering it implies.
pub fn log_driver(version_file: &Path) -> DeviceNumbering {
    let version = driver_version(version_file);
    match &version {
        Some(v) => info!(target: "dvrun.core.system", driver = %v, "accelerator driver"),
        None => warn!(
            target: "dvrun.core.system",
            path = %version_file.display(),
            "driver version file missing; driver unknown"
        ),
    }

    let numbering = DeviceNumbering::from_driver_version(version.as_deref());
    if numbering == DeviceNumbering::Logical {
        info!(
            target: "dvrun.core.system",
            "workers get ASCEND_DEVICE_ID (logical id, equal to DEVICE_ID); prefer it over DEVICE_ID"
        );
    }
    numbering
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempDir;

    #[test]
    fn missing_file_means_logical() {
        let numbering = DeviceNumbering::detect(Path::new("/nonexistent/version.info"));
        assert_eq!(numbering, DeviceNumbering::Logical);
    }

    #[test]
    fn legacy_version_means_physical() {
        let tmp = TempDir::new("driver");
        let file = tmp.path().join("version.info");
        fs::write(&file, "\n  Version=20.1.0  \nother=1\n").unwrap();

        assert_eq!(driver_version(&file).as_deref(), Some("Version=20.1.0"));
        assert_eq!(DeviceNumbering::detect(&file), DeviceNumbering::Physical);
    }

    #[test]
    fn newer_version_means_logical() {
        let tmp = TempDir::new("driver");
        let file = tmp.path().join("version.info");
        fs::write(&file, "Version=21.0.2\n").unwrap();

        assert_eq!(DeviceNumbering::detect(&file), DeviceNumbering::Logical);
    }
}
