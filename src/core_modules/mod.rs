pub mod mask;
pub mod occupancy;
pub mod slot_classifier;
pub mod slot_region;
