//! Cost Sheet Sync
//!
//! Keeps the cost figures of a sales presentation in step with a remote cost
//! record: load, derive computed totals, detect changes by signature, and
//! re-render bound display targets on a polling cadence, falling back to a
//! previously selected local file when the remote endpoint is unreachable.
//!
//! ```rust,ignore
//! use cost_sheet_sync::{CostSync, MemorySurface, SyncConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let surface = Arc::new(MemorySurface::new());
//! let sync = CostSync::from_config(&config, None, surface.clone());
//! if sync.initialize().await {
//!     println!("{:?}", surface.snapshot());
//! }
//! ```

pub mod config;
pub mod derive;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod record;
pub mod render;
pub mod scheduler;
pub mod signature;
pub mod source;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use derive::{DerivationEngine, DerivationScope, Formula, FormulaId};
pub use error::{LoadError, SignatureError};
pub use format::ValueKind;
pub use pipeline::{CheckOutcome, Pipeline};
pub use record::{FieldValue, Record};
pub use render::{Binding, BindingRenderer, DisplaySurface, MemorySurface, SlideMapping};
pub use scheduler::{RefreshScheduler, SchedulerState};
pub use signature::Signature;
pub use source::{FilePicker, FixedPicker, HttpSource, RecordSource, SourceLoader, StdinPicker};
pub use sync::CostSync;
