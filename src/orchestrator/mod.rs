//! Run orchestration and the HTTP surface in front of it.
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    StudioApi                        │
//! │    GET  /  and  /static/*     (studio page)         │
//! │    POST /api/predict          (multipart upload)    │
//! │    GET  /api/file/{run_id}/{filename}               │
//! │    GET  /api/output-root                            │
//! │    PUT  /api/output-root                            │
//! │    POST /api/output-root/select                     │
//! │    POST /api/output-root/open                       │
//! │                                                     │
//! │  RunOrchestrator                                    │
//! │    execute() under one compute lock, then bind run  │
//! │    EngineCache ─► SceneCodec ─► manifest ─► bundle  │
//! │                                                     │
//! │  OutputRootRegistry                                 │
//! │    current root + root per run id                   │
//! └────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod bundle;
pub mod output_roots;
pub mod runs;

pub use api::{ApiError, StudioApi, StudioState};
pub use bundle::{BUNDLE_FILE, build_bundle};
pub use output_roots::OutputRootRegistry;
pub use runs::{
    MANIFEST_FILE, OutputEntry, RunManifest, RunOrchestrator, RunRequest, RunResult,
    UploadPayload, generate_run_id,
};
