//! Process configuration from the environment

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen address
    pub host: IpAddr,
    /// Listen port; 80 needs root
    pub port: u16,
    pub settings_path: PathBuf,
    pub options_path: PathBuf,
    /// Static web UI root
    pub www_dir: PathBuf,
    /// Where still captures are written
    pub capture_dir: PathBuf,
    /// V4L2 device node
    pub camera_device: String,
    /// hwmon directory of the power monitor
    pub battery_hwmon: PathBuf,
    /// Command run by `/power_off.json`
    pub power_off_command: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            settings_path: PathBuf::from("settings.json"),
            options_path: PathBuf::from("options.json"),
            www_dir: PathBuf::from("www"),
            capture_dir: PathBuf::from("data/captures"),
            camera_device: "/dev/video0".to_string(),
            battery_hwmon: PathBuf::from("/sys/class/hwmon/hwmon0"),
            power_off_command: vec!["shutdown".to_string(), "now".to_string()],
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST")
                .and_then(|h| h.parse().ok())
                .unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            settings_path: lookup("SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            options_path: lookup("OPTIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.options_path),
            www_dir: lookup("WWW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.www_dir),
            capture_dir: lookup("CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.capture_dir),
            camera_device: lookup("CAMERA_DEVICE").unwrap_or(defaults.camera_device),
            battery_hwmon: lookup("BATTERY_HWMON")
                .map(PathBuf::from)
                .unwrap_or(defaults.battery_hwmon),
            power_off_command: lookup("POWER_OFF_COMMAND")
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                .filter(|cmd| !cmd.is_empty())
                .unwrap_or(defaults.power_off_command),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
