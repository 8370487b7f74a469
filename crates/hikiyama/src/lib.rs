//! `hikiyama` - Live map and tracker for festival parade floats
//!
//! Eighteen floats share one realtime document store. Viewers keep a live
//! table of every float's position and draw it as rotated shogi-piece
//! markers; a volunteer's device publishes its location for one float.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod float;
pub mod logging;
pub mod map;
pub mod registry;
pub mod sensor;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod tracker;

pub use config::Config;
pub use error::{Error, Precondition, Result};
pub use float::{FloatState, Position};
pub use logging::init_logging;
pub use map::{Basemap, MapView, Marker, RotationEditor};
pub use sensor::{LocationSensor, Sample, SensorEvent, WatchOptions};
pub use store::{DocumentStore, MemoryStore, Patch, SqliteStore};
pub use subscription::{Subscription, SubscriptionSet};
pub use sync::{FloatTable, SyncEvent, Synchronizer};
pub use tracker::{StartRequest, Tracker, TrackerNotice, TrackerState};
