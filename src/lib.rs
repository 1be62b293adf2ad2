// THEORY:
// This file is the entry point for the `parking_vision` library crate. It exposes
// the occupancy engine as a set of layers that a binary (or another service) wires
// together:
//
// Key architectural principles:
// 1.  **Per-Frame Core**: `core_modules` holds the stateless image stages, from the
//     raw frame to a free-slot count. Nothing in it knows about zones or threads.
// 2.  **One Loop Per Zone**: `zone_loop` drives the core for a single camera and
//     publishes into the shared `zone_store`. `supervisor` owns the loops.
// 3.  **Read-Side Overlay**: `aggregator` merges sensor state with zone metadata and
//     reservations at read time. Sensor state is never written back.
// 4.  **Collaborators Behind Traits**: frames, layouts, zone metadata and
//     reservations all come through narrow traits, so tests and deployments swap
//     them freely.

pub mod aggregator;
pub mod collaborators;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod frame_source;
#[cfg(feature = "web")]
pub mod server;
pub mod slot_layout;
pub mod supervisor;
pub mod zone_loop;
pub mod zone_store;

#[cfg(test)]
mod test_support;
