use crate::collaborators::{InMemoryReservationLedger, InMemoryZoneDirectory, ZoneMetadata};
use crate::core_modules::occupancy::ZoneId;
use crate::error::ConfigError;
use crate::frame_source::FileFrameProvider;
use crate::slot_layout::JsonLayoutProvider;
use crate::zone_loop::LoopConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `bind_addr`.
pub const BIND_ENV: &str = "PARKING_BIND";

#[derive(Debug, Clone, Deserialize)]
pub struct ParkingConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_max_consecutive_read_failures")]
    pub max_consecutive_read_failures: u32,
    /// Subtracted from sensor free counts in the aggregated views.
    #[serde(default)]
    pub display_offset: u32,
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub id: ZoneId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub total_slots: u32,
    pub price: f64,
    #[serde(default)]
    pub is_live: bool,
    /// Camera wiring. Zones without it are served from static capacity.
    pub sensor: Option<SensorConfig>,
}

/// Where a camera zone reads its frames and slot layout from.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// A directory of still frames, or a video file with the `video` feature.
    pub frames: PathBuf,
    /// JSON slot layout file.
    pub layout: PathBuf,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_frame_interval_ms() -> u64 {
    30
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_max_consecutive_read_failures() -> u32 {
    100
}

fn default_reservation_ttl_secs() -> u64 {
    300
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            frame_interval_ms: default_frame_interval_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            max_consecutive_read_failures: default_max_consecutive_read_failures(),
            display_offset: 0,
            reservation_ttl_secs: default_reservation_ttl_secs(),
            zones: Vec::new(),
        }
    }
}

impl ParkingConfig {
    /// Reads, parses and validates a TOML config file. Relative sensor paths are
    /// resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ParkingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("frame_interval_ms must be positive".to_string()));
        }
        if self.max_consecutive_read_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_read_failures must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id) {
                return Err(ConfigError::Invalid(format!("duplicate zone id {}", zone.id)));
            }
            if let Some(sensor) = &zone.sensor {
                if sensor.frames.as_os_str().is_empty() || sensor.layout.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "zone {} sensor needs both frames and layout",
                        zone.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for sensor in self.zones.iter_mut().filter_map(|zone| zone.sensor.as_mut()) {
            if sensor.frames.is_relative() {
                sensor.frames = base.join(&sensor.frames);
            }
            if sensor.layout.is_relative() {
                sensor.layout = base.join(&sensor.layout);
            }
        }
    }

    /// The bind address, with `PARKING_BIND` taking precedence when set.
    pub fn effective_bind_addr(&self) -> String {
        std::env::var(BIND_ENV).unwrap_or_else(|_| self.bind_addr.clone())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            max_consecutive_read_failures: self.max_consecutive_read_failures,
        }
    }

    /// Ids of zones that have a camera wired up, in config order.
    pub fn sensor_zone_ids(&self) -> Vec<ZoneId> {
        self.zones
            .iter()
            .filter(|zone| zone.sensor.is_some())
            .map(|zone| zone.id)
            .collect()
    }

    pub fn zone_directory(&self) -> InMemoryZoneDirectory {
        InMemoryZoneDirectory::new(self.zones.iter().map(ZoneConfig::metadata).collect())
    }

    pub fn reservation_ledger(&self) -> InMemoryReservationLedger {
        InMemoryReservationLedger::new(self.reservation_ttl())
    }

    pub fn layout_provider(&self) -> JsonLayoutProvider {
        let mut layouts = JsonLayoutProvider::new();
        for zone in &self.zones {
            if let Some(sensor) = &zone.sensor {
                layouts.insert(zone.id, sensor.layout.clone());
            }
        }
        layouts
    }

    pub fn frame_provider(&self) -> FileFrameProvider {
        let mut frames = FileFrameProvider::new();
        for zone in &self.zones {
            if let Some(sensor) = &zone.sensor {
                frames.insert(zone.id, sensor.frames.clone());
            }
        }
        frames
    }
}

impl ZoneConfig {
    pub fn metadata(&self) -> ZoneMetadata {
        ZoneMetadata {
            id: self.id,
            name: self.name.clone(),
            lat: self.lat,
            lng: self.lng,
            total_slots: self.total_slots,
            price: self.price,
            is_live: self.is_live,
        }
    }
}
