//! TileStream - Quadtree level-of-detail tile streaming for globe rendering
//!
//! Each frame, the engine walks a quadtree of geographic tiles from a fixed
//! set of top-level tiles, refines where the eye is close, and produces a
//! draw list in which every selected tile either has its own content or
//! borrows the nearest resident ancestor's. Missing content is requested
//! from a bounded worker pool and never blocks the frame.
//!
//! ```text
//!   View ──► TileAssembler ──► draw list ──► TileContent::draw
//!               │     ▲
//!      requests │     │ residency, absent list
//!               ▼     │
//!         RequestQueue ──► WorkerPool ──► outcomes (next frame)
//! ```
//!
//! [`LayerDriver`] ties the pieces together for one layer.

pub mod absent;
pub mod assembler;
pub mod config;
pub mod content;
pub mod error;
pub mod geo;
pub mod layer;
pub mod level;
pub mod logging;
pub mod pool;
pub mod request;
pub mod tile;
pub mod view;

pub use absent::{AbsentConfig, AbsentResourceList};
pub use assembler::{TileAssembler, DEFAULT_SPLIT_SCALE};
pub use content::{CachedTileContent, TileContent, TileMemoryCache};
pub use error::{FetchError, GeoError, HierarchyError};
pub use geo::{Globe, Sector, SphereGlobe};
pub use layer::{FrameStats, LayerConfig, LayerDriver};
pub use level::{HierarchyConfig, LevelHierarchy};
pub use pool::TokioFetchPool;
pub use request::{RequestOrder, RequestQueue, WorkerPool};
pub use tile::{Tile, TileKey};
pub use view::{Frustum, View};

/// Crate version, for log banners and `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
