// THEORY:
// Slot layouts are drawn once per camera and never change while the process runs.
// The on-disk format mirrors how operators mark slots: a list of top-left corners
// plus one slot size shared by every slot of the camera.

use crate::core_modules::occupancy::ZoneId;
use crate::core_modules::slot_region::{DEFAULT_SLOT_HEIGHT, DEFAULT_SLOT_WIDTH, SlotRegion};
use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Supplies the ordered slot regions of a zone.
pub trait SlotLayoutProvider: Send + Sync {
    fn load_layout(&self, zone_id: ZoneId) -> Result<Vec<SlotRegion>, LayoutError>;
}

/// JSON layout file: `{ "slot_width": 107, "slot_height": 48, "positions": [[x, y], ...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutFile {
    #[serde(default = "default_slot_width")]
    pub slot_width: u32,
    #[serde(default = "default_slot_height")]
    pub slot_height: u32,
    pub positions: Vec<(u32, u32)>,
}

fn default_slot_width() -> u32 {
    DEFAULT_SLOT_WIDTH
}

fn default_slot_height() -> u32 {
    DEFAULT_SLOT_HEIGHT
}

impl LayoutFile {
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path).map_err(|source| LayoutError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| LayoutError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn regions(&self) -> Vec<SlotRegion> {
        self.positions
            .iter()
            .map(|&(x, y)| SlotRegion::new(x, y, self.slot_width, self.slot_height))
            .collect()
    }
}

/// Loads layouts from per-zone JSON files.
#[derive(Debug, Default, Clone)]
pub struct JsonLayoutProvider {
    paths: HashMap<ZoneId, PathBuf>,
}

impl JsonLayoutProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone_id: ZoneId, path: impl Into<PathBuf>) {
        self.paths.insert(zone_id, path.into());
    }
}

impl SlotLayoutProvider for JsonLayoutProvider {
    fn load_layout(&self, zone_id: ZoneId) -> Result<Vec<SlotRegion>, LayoutError> {
        let path = self.paths.get(&zone_id).ok_or(LayoutError::Missing(zone_id))?;
        Ok(LayoutFile::load(path)?.regions())
    }
}

/// Serves layouts held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticLayoutProvider {
    layouts: HashMap<ZoneId, Vec<SlotRegion>>,
}

impl StaticLayoutProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone_id: ZoneId, layout: Vec<SlotRegion>) {
        self.layouts.insert(zone_id, layout);
    }
}

impl SlotLayoutProvider for StaticLayoutProvider {
    fn load_layout(&self, zone_id: ZoneId) -> Result<Vec<SlotRegion>, LayoutError> {
        self.layouts
            .get(&zone_id)
            .cloned()
            .ok_or(LayoutError::Missing(zone_id))
    }
}
