//! Run lifecycle: one batch of uploads in, one directory of artifacts out.
//!
//! ```text
//! execute()
//!   └─ compute lock ─► process(request, root)
//!   │    validate ─► device ─► run dir ─► checkpoint ─► engine
//!   │      └─ per image: write ─► load ─► predict ─► .ply ─► preview ─► [video]
//!   │    manifest.json ─► bundle.zip
//!   └─ bind run id to root
//! ```
//!
//! Only one run computes at a time: the accelerator is shared and cannot
//! safely serve two inference passes at once. A failure on any image aborts
//! the whole run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{Device, DeviceRequest, EngineCache, ImageInput, WeightsIdentity};
use crate::error::RunError;
use crate::media::{PREVIEW_MAX_SIZE, SceneCodec, SceneMetadata, write_preview};
use crate::orchestrator::bundle::{BUNDLE_FILE, build_bundle};
use crate::orchestrator::output_roots::OutputRootRegistry;
use crate::safety::{self, UsedNames, indexed_filename, safe_filename, split_extension, unique_filename};
use crate::store::CheckpointStore;

/// Manifest file written into every run directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const RENDER_SKIPPED_WARNING: &str = "Rendering requires CUDA. Video render was skipped.";
/// Suffixes appended to an image stem for its artifacts.
const ARTIFACT_SUFFIXES: [&str; 4] = [".ply", ".preview.jpg", ".mp4", ".depth.mp4"];

const UNSAFE_CHECKPOINT_WARNING: &str =
    "Checkpoint loaded with unsafe deserialization. Only use trusted checkpoint files.";

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Everything a run needs from the caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub images: Vec<UploadPayload>,
    pub checkpoint: Option<UploadPayload>,
    /// `default`, `cpu`, `cuda` or `mps`.
    pub device: String,
    pub render: bool,
    pub allow_unsafe: bool,
}

/// Artifacts produced for one input image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    pub ply: String,
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_video: Option<String>,
}

impl OutputEntry {
    /// Rewrite every file name with `f` (used to turn names into URLs).
    pub fn map_files(self, f: impl Fn(&str) -> String) -> Self {
        Self {
            name: self.name,
            ply: f(&self.ply),
            preview: f(&self.preview),
            video: self.video.as_deref().map(&f),
            depth_video: self.depth_video.as_deref().map(&f),
        }
    }
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub device: Device,
    pub render_requested: bool,
    pub render_enabled: bool,
    pub outputs: Vec<OutputEntry>,
    pub warnings: Vec<String>,
    pub created_at: String,
}

/// What a finished run reports back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub device: Device,
    pub render_requested: bool,
    pub render_enabled: bool,
    pub outputs: Vec<OutputEntry>,
    pub warnings: Vec<String>,
    /// File name of the bundle inside the run directory.
    pub bundle: String,
}

/// `YYYYmmdd-HHMMSS-<8 hex>`; sortable by creation time.
pub fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}

/// Drives runs against a shared engine cache, one at a time.
pub struct RunOrchestrator {
    engines: Arc<EngineCache>,
    codec: Arc<dyn SceneCodec>,
    roots: Arc<OutputRootRegistry>,
    compute_lock: Mutex<()>,
}

impl RunOrchestrator {
    pub fn new(
        engines: Arc<EngineCache>,
        codec: Arc<dyn SceneCodec>,
        roots: Arc<OutputRootRegistry>,
    ) -> Self {
        Self {
            engines,
            codec,
            roots,
            compute_lock: Mutex::new(()),
        }
    }

    pub fn engines(&self) -> &Arc<EngineCache> {
        &self.engines
    }

    pub fn roots(&self) -> &Arc<OutputRootRegistry> {
        &self.roots
    }

    /// Run under the compute lock, writing into the current output root.
    /// Only a finished run is bound to that root.
    ///
    /// Blocks; call from a worker thread.
    pub fn execute(&self, request: RunRequest) -> Result<RunResult, RunError> {
        let _guard = self
            .compute_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let output_root = self.roots.get_root();
        let result = self.process(request, &output_root)?;
        self.roots.bind_run(&result.run_id, &output_root);
        Ok(result)
    }

    /// Process one request into a new run directory under `output_root`.
    /// Expects the compute lock to be held.
    fn process(&self, request: RunRequest, output_root: &Path) -> Result<RunResult, RunError> {
        if request.images.is_empty() {
            return Err(RunError::NoInput);
        }

        let device = request
            .device
            .parse::<DeviceRequest>()?
            .resolve(self.engines.backend().accelerators())?;

        let render_enabled = request.render && device == Device::Cuda;
        let mut warnings = Vec::new();
        if request.render && !render_enabled {
            warnings.push(RENDER_SKIPPED_WARNING.to_string());
        }

        let run_id = generate_run_id();
        std::fs::create_dir_all(output_root)?;
        let run_dir = safety::resolve(output_root, &output_root.join(&run_id))?;
        std::fs::create_dir(&run_dir)?;

        tracing::info!(
            run_id = %run_id,
            images = request.images.len(),
            device = %device,
            render = render_enabled,
            "Starting run"
        );

        let identity = match request.checkpoint {
            Some(ref checkpoint) => WeightsIdentity::Checkpoint(
                CheckpointStore::for_output_root(output_root).store(&checkpoint.content)?,
            ),
            None => WeightsIdentity::Default,
        };

        let (engine, used_unsafe) = self
            .engines
            .get(&identity, device, request.allow_unsafe)?;
        if used_unsafe {
            warnings.push(UNSAFE_CHECKPOINT_WARNING.to_string());
        }

        let mut outputs = Vec::with_capacity(request.images.len());
        let mut used_names = UsedNames::new();
        let mut artifacts = HashSet::new();

        for (index, upload) in request.images.iter().enumerate() {
            let safe_name = claim_artifacts(
                &safe_filename(&upload.filename),
                &mut used_names,
                &mut artifacts,
            );
            let input_path = run_file(&run_dir, &indexed_filename(index + 1, &safe_name))?;
            std::fs::write(&input_path, &upload.content)?;

            let loaded = self.codec.load_rgb(&input_path)?;
            let (height, width) = loaded.dims();
            let geometry = engine.predict(
                &ImageInput {
                    path: &input_path,
                    image: &loaded.image,
                    focal_length_px: loaded.focal_length_px,
                },
                device,
            )?;

            let (stem, _) = split_extension(&safe_name);
            let ply_path = run_file(&run_dir, &format!("{}.ply", stem))?;
            self.codec
                .save_geometry(&geometry, loaded.focal_length_px, (height, width), &ply_path)?;

            let preview_path = run_file(&run_dir, &format!("{}.preview.jpg", stem))?;
            write_preview(&loaded.image, &preview_path, PREVIEW_MAX_SIZE)?;

            let mut entry = OutputEntry {
                name: safe_name.clone(),
                ply: file_name(&ply_path),
                preview: file_name(&preview_path),
                video: None,
                depth_video: None,
            };

            if render_enabled {
                let video_path = run_file(&run_dir, &format!("{}.mp4", stem))?;
                let metadata = SceneMetadata {
                    focal_length_px: loaded.focal_length_px,
                    resolution: (width, height),
                    color_space: "linearRGB".to_string(),
                };
                let rendered = self.codec.render(&geometry, &metadata, &video_path)?;
                entry.video = Some(file_name(&rendered.video));
                entry.depth_video = rendered.depth_video.as_deref().map(file_name);
            }

            tracing::debug!(run_id = %run_id, name = %safe_name, "Image processed");
            outputs.push(entry);
        }

        let manifest = RunManifest {
            run_id: run_id.clone(),
            device,
            render_requested: request.render,
            render_enabled,
            outputs,
            warnings,
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        std::fs::write(
            run_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        build_bundle(&run_dir, &run_dir.join(BUNDLE_FILE))?;

        tracing::info!(run_id = %run_id, outputs = manifest.outputs.len(), "Run complete");

        Ok(RunResult {
            run_id: manifest.run_id,
            device,
            render_requested: manifest.render_requested,
            render_enabled,
            outputs: manifest.outputs,
            warnings: manifest.warnings,
            bundle: BUNDLE_FILE.to_string(),
        })
    }
}

/// Pick a unique name for `name` whose artifact names are all still free,
/// then reserve them.
///
/// Stems alone are not enough: the video of `x.depth` is `x.depth.mp4`,
/// which is also the depth video of `x`.
fn claim_artifacts(name: &str, used: &mut UsedNames, artifacts: &mut HashSet<String>) -> String {
    loop {
        let candidate = unique_filename(name, used);
        let (stem, _) = split_extension(&candidate);
        let names: Vec<String> = ARTIFACT_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{}", stem, suffix))
            .collect();
        if names.iter().all(|n| !artifacts.contains(n)) {
            artifacts.extend(names);
            return candidate;
        }
    }
}

/// Path of `name` inside `run_dir`, refusing anything that would escape it.
fn run_file(run_dir: &Path, name: &str) -> Result<PathBuf, RunError> {
    Ok(safety::resolve(run_dir, &run_dir.join(name))?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
