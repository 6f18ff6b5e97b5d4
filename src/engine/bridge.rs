//! Engine backend and scene codec backed by an external predictor program.
//!
//! The model runtime lives in a separate executable (`sharp` by default).
//! Each operation is one short-lived invocation:
//!
//! ```text
//! <bin> devices                                   -> {"cuda": bool, "mps": bool}
//! <bin> inspect-checkpoint <path> [--weights-only] -> exit status
//! <bin> predict --checkpoint <path> --device <d> --input <img> --output <ply>
//!               --focal-length-px <f> [--weights-only]
//! <bin> render --input <ply> --output <mp4> --depth-output <mp4>
//!              --focal-length-px <f> --width <w> --height <h>
//! ```
//!
//! Intermediate files go to a private temporary directory, never next to
//! the run's artifacts. A depth video is reported only when the renderer
//! wrote one to the `--depth-output` path it was given.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::PredictorConfig;
use crate::engine::{
    Accelerators, DeserializeMode, Device, EngineBackend, Geometry, ImageInput, InferenceEngine,
    SerializedWeights,
};
use crate::error::{CodecError, EngineError};
use crate::media::{LoadedImage, RenderedVideo, SceneCodec, SceneMetadata, decode_rgb};

/// Published weights for the predictor.
pub const DEFAULT_MODEL_URL: &str =
    "https://ml-site.cdn-apple.com/models/sharp/sharp_2572gikvuh.pt";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Spawns the predictor program for device probing, checkpoint inspection,
/// and engine creation.
#[derive(Debug)]
pub struct PredictorBridge {
    program: Arc<PathBuf>,
    model_url: String,
    cache_dir: PathBuf,
    accelerators: OnceLock<Accelerators>,
}

impl PredictorBridge {
    pub fn new(config: &PredictorConfig) -> Self {
        Self {
            program: Arc::new(config.program.clone()),
            model_url: config
                .model_url
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL_URL.to_string()),
            cache_dir: config.cache_dir.clone(),
            accelerators: OnceLock::new(),
        }
    }

    /// A codec that renders through the same program.
    pub fn codec(&self) -> BridgeCodec {
        BridgeCodec {
            program: Arc::clone(&self.program),
        }
    }

    fn probe_accelerators(&self) -> Accelerators {
        let output = match run(&self.program, &["devices"]) {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!(
                    "Device probe failed ({}), assuming CPU only: {}",
                    output.status,
                    stderr_text(&output)
                );
                return Accelerators::cpu_only();
            }
            Err(e) => {
                tracing::warn!("Device probe failed, assuming CPU only: {}", e);
                return Accelerators::cpu_only();
            }
        };

        match serde_json::from_slice::<Accelerators>(&output.stdout) {
            Ok(accelerators) => {
                tracing::info!(
                    cuda = accelerators.cuda,
                    mps = accelerators.mps,
                    "Detected accelerators"
                );
                accelerators
            }
            Err(e) => {
                tracing::warn!("Unreadable device probe output, assuming CPU only: {}", e);
                Accelerators::cpu_only()
            }
        }
    }

    fn default_weights_path(&self) -> PathBuf {
        let name = self
            .model_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("default.pt");
        self.cache_dir.join(name)
    }

    fn download(&self, destination: &Path) -> Result<(), EngineError> {
        let fail = |reason: String| EngineError::DefaultWeights {
            url: self.model_url.clone(),
            reason,
        };

        std::fs::create_dir_all(&self.cache_dir)?;
        let partial = destination.with_extension("part");

        // Called from a blocking worker, so run the request on a dedicated
        // single-threaded runtime instead of the server's.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| fail(format!("failed to create HTTP runtime: {e}")))?;
        let written = rt.block_on(async {
            let client = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .map_err(|e| fail(format!("failed to build HTTP client: {e}")))?;
            let mut response = client
                .get(&self.model_url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| fail(e.to_string()))?;

            let mut file = std::fs::File::create(&partial)?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await.map_err(|e| fail(e.to_string()))? {
                file.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            file.sync_all()?;
            Ok::<_, EngineError>(written)
        });

        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(e);
            }
        };
        std::fs::rename(&partial, destination)?;
        tracing::info!(bytes = written, "Default model saved to {}", destination.display());
        Ok(())
    }
}

impl EngineBackend for PredictorBridge {
    fn accelerators(&self) -> Accelerators {
        *self.accelerators.get_or_init(|| self.probe_accelerators())
    }

    fn fetch_default_weights(&self) -> Result<SerializedWeights, EngineError> {
        let path = self.default_weights_path();
        if !path.exists() {
            tracing::info!("Downloading default model from {}", self.model_url);
            self.download(&path)?;
        }
        Ok(SerializedWeights {
            path,
            mode: DeserializeMode::Restricted,
        })
    }

    fn deserialize(
        &self,
        path: &Path,
        mode: DeserializeMode,
    ) -> Result<SerializedWeights, EngineError> {
        let path_arg = path.to_string_lossy();
        let mut args = vec!["inspect-checkpoint", path_arg.as_ref()];
        if mode == DeserializeMode::Restricted {
            args.push("--weights-only");
        }

        let output = run(&self.program, &args)?;
        if !output.status.success() {
            return Err(EngineError::Deserialization {
                path: path.to_path_buf(),
                reason: stderr_text(&output),
            });
        }
        Ok(SerializedWeights {
            path: path.to_path_buf(),
            mode,
        })
    }

    fn create_engine(&self) -> Box<dyn InferenceEngine> {
        Box::new(BridgeEngine {
            program: Arc::clone(&self.program),
            weights: None,
            device: Device::Cpu,
        })
    }
}

/// Engine handle; each prediction is one `predict` invocation.
#[derive(Debug)]
pub struct BridgeEngine {
    program: Arc<PathBuf>,
    weights: Option<SerializedWeights>,
    device: Device,
}

impl InferenceEngine for BridgeEngine {
    fn load_weights(&mut self, weights: SerializedWeights) -> Result<(), EngineError> {
        if !weights.path.is_file() {
            return Err(EngineError::Backend(format!(
                "weights file {} does not exist",
                weights.path.display()
            )));
        }
        self.weights = Some(weights);
        Ok(())
    }

    fn eval(&mut self) {}

    fn to(&mut self, device: Device) -> Result<(), EngineError> {
        self.device = device;
        Ok(())
    }

    fn predict(&self, input: &ImageInput<'_>, device: Device) -> Result<Geometry, EngineError> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| EngineError::Backend("no weights loaded".to_string()))?;
        if device != self.device {
            tracing::debug!(
                loaded = %self.device,
                requested = %device,
                "Predicting on a different device than the engine was moved to"
            );
        }

        let scratch_dir = tempfile::tempdir()?;
        let scratch = scratch_dir.path().join("geometry.ply");
        let checkpoint = weights.path.to_string_lossy();
        let input_arg = input.path.to_string_lossy();
        let output_arg = scratch.to_string_lossy();
        let focal = input.focal_length_px.to_string();
        let mut args = vec![
            "predict",
            "--checkpoint",
            checkpoint.as_ref(),
            "--device",
            device.as_str(),
            "--input",
            input_arg.as_ref(),
            "--output",
            output_arg.as_ref(),
            "--focal-length-px",
            focal.as_str(),
        ];
        if weights.mode == DeserializeMode::Restricted {
            args.push("--weights-only");
        }

        let output = run(&self.program, &args)?;
        if !output.status.success() {
            return Err(EngineError::Backend(format!(
                "predict exited with {}: {}",
                output.status,
                stderr_text(&output)
            )));
        }
        Ok(Geometry(std::fs::read(&scratch)?))
    }
}

/// Scene codec that decodes images in-process and renders through the
/// predictor program.
#[derive(Debug, Clone)]
pub struct BridgeCodec {
    program: Arc<PathBuf>,
}

impl SceneCodec for BridgeCodec {
    fn load_rgb(&self, path: &Path) -> Result<LoadedImage, CodecError> {
        decode_rgb(path)
    }

    fn save_geometry(
        &self,
        geometry: &Geometry,
        _focal_length_px: f32,
        _dims: (u32, u32),
        path: &Path,
    ) -> Result<(), CodecError> {
        // The predictor already emits a complete PLY.
        std::fs::write(path, &geometry.0)?;
        Ok(())
    }

    fn render(
        &self,
        geometry: &Geometry,
        metadata: &SceneMetadata,
        path: &Path,
    ) -> Result<RenderedVideo, CodecError> {
        let scratch_dir = tempfile::tempdir()?;
        let scene = scratch_dir.path().join("scene.ply");
        let depth_scratch = scratch_dir.path().join("depth.mp4");
        std::fs::write(&scene, &geometry.0)?;

        let input_arg = scene.to_string_lossy();
        let output_arg = path.to_string_lossy();
        let depth_arg = depth_scratch.to_string_lossy();
        let focal = metadata.focal_length_px.to_string();
        let width = metadata.resolution.0.to_string();
        let height = metadata.resolution.1.to_string();
        let output = run(
            &self.program,
            &[
                "render",
                "--input",
                input_arg.as_ref(),
                "--output",
                output_arg.as_ref(),
                "--depth-output",
                depth_arg.as_ref(),
                "--focal-length-px",
                focal.as_str(),
                "--width",
                width.as_str(),
                "--height",
                height.as_str(),
            ],
        )
        .map_err(|e| CodecError::Render(e.to_string()))?;
        if !output.status.success() {
            return Err(CodecError::Render(format!(
                "render exited with {}: {}",
                output.status,
                stderr_text(&output)
            )));
        }
        if !path.is_file() {
            return Err(CodecError::Render(format!(
                "renderer produced no video at {}",
                path.display()
            )));
        }

        let depth_video = if depth_scratch.is_file() {
            let depth = path.with_extension("depth.mp4");
            std::fs::copy(&depth_scratch, &depth)?;
            Some(depth)
        } else {
            None
        };
        Ok(RenderedVideo {
            video: path.to_path_buf(),
            depth_video,
        })
    }
}

fn run(program: &Path, args: &[&str]) -> Result<Output, EngineError> {
    tracing::debug!(program = %program.display(), ?args, "Running predictor");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            EngineError::Backend(format!("failed to spawn {}: {}", program.display(), e))
        })
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
