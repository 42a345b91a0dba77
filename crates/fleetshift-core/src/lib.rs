//! fleetshift-core — shared model for fleet rollouts.
//!
//! - **`types`** — workloads, pods, nodes and the `Object` trait
//! - **`selector`** — label/field selectors and label syntax checks
//! - **`manifest`** — single-document workload manifest decoding
//! - **`config`** — `fleet.toml` parsing

pub mod config;
pub mod manifest;
pub mod selector;
pub mod types;

pub use config::{ConfigError, FleetConfig, RolloutDefaults};
pub use manifest::{parse_workload, ManifestError, ManifestResult};
pub use selector::{ListParams, Selector, SelectorError};
pub use types::*;
