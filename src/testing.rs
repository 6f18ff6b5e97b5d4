//! Test doubles for the engine backend and scene codec.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::engine::{
    Accelerators, DeserializeMode, Device, EngineBackend, Geometry, ImageInput, InferenceEngine,
    SerializedWeights,
};
use crate::error::{CodecError, EngineError};
use crate::media::{LoadedImage, RenderedVideo, SceneCodec, SceneMetadata, decode_rgb};

/// Backend that counts loads and can be told which checkpoints need full
/// deserialization.
#[derive(Default)]
pub struct MockBackend {
    pub accelerators: Accelerators,
    pub loads: AtomicUsize,
    pub restricted_attempts: AtomicUsize,
    pub full_attempts: AtomicUsize,
    /// Checkpoints whose restricted deserialization fails.
    pub pickled: Mutex<HashSet<PathBuf>>,
    pub load_delay: Option<Duration>,
    /// How long each `predict` call takes on engines from this backend.
    pub predict_delay: Option<Duration>,
    pub predictions: Arc<InFlight>,
}

/// Counts `predict` calls that are running right now and the highest such
/// count seen.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl MockBackend {
    pub fn with_accelerators(accelerators: Accelerators) -> Self {
        Self {
            accelerators,
            ..Default::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn mark_pickled(&self, path: &Path) {
        self.pickled.lock().unwrap().insert(path.to_path_buf());
    }
}

impl EngineBackend for MockBackend {
    fn accelerators(&self) -> Accelerators {
        self.accelerators
    }

    fn fetch_default_weights(&self) -> Result<SerializedWeights, EngineError> {
        Ok(SerializedWeights {
            path: PathBuf::from("default.pt"),
            mode: DeserializeMode::Restricted,
        })
    }

    fn deserialize(
        &self,
        path: &Path,
        mode: DeserializeMode,
    ) -> Result<SerializedWeights, EngineError> {
        match mode {
            DeserializeMode::Restricted => {
                self.restricted_attempts.fetch_add(1, Ordering::SeqCst);
                if self.pickled.lock().unwrap().contains(path) {
                    return Err(EngineError::Deserialization {
                        path: path.to_path_buf(),
                        reason: "unsupported global".to_string(),
                    });
                }
            }
            DeserializeMode::Full => {
                self.full_attempts.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(SerializedWeights {
            path: path.to_path_buf(),
            mode,
        })
    }

    fn create_engine(&self) -> Box<dyn InferenceEngine> {
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Box::new(MockEngine {
            weights: None,
            predict_delay: self.predict_delay,
            predictions: Arc::clone(&self.predictions),
        })
    }
}

/// Engine whose geometry names the input file, so outputs are traceable.
#[derive(Debug, Default)]
pub struct MockEngine {
    weights: Option<SerializedWeights>,
    predict_delay: Option<Duration>,
    predictions: Arc<InFlight>,
}

impl InferenceEngine for MockEngine {
    fn load_weights(&mut self, weights: SerializedWeights) -> Result<(), EngineError> {
        self.weights = Some(weights);
        Ok(())
    }

    fn eval(&mut self) {}

    fn to(&mut self, _device: Device) -> Result<(), EngineError> {
        Ok(())
    }

    fn predict(&self, input: &ImageInput<'_>, _device: Device) -> Result<Geometry, EngineError> {
        if self.weights.is_none() {
            return Err(EngineError::Backend("weights not loaded".to_string()));
        }
        self.predictions.enter();
        if let Some(delay) = self.predict_delay {
            std::thread::sleep(delay);
        }
        self.predictions.exit();
        let name = input
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Geometry(format!("ply {}", name).into_bytes()))
    }
}

/// Codec that decodes real images and writes placeholder artifacts.
#[derive(Default)]
pub struct MockCodec {
    pub renders: AtomicUsize,
    /// Whether renders also produce a depth video.
    pub with_depth: bool,
}

impl SceneCodec for MockCodec {
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
        std::fs::write(path, &geometry.0)?;
        Ok(())
    }

    fn render(
        &self,
        _geometry: &Geometry,
        _metadata: &SceneMetadata,
        path: &Path,
    ) -> Result<RenderedVideo, CodecError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        std::fs::write(path, b"mp4")?;
        let depth_video = if self.with_depth {
            let depth = path.with_extension("depth.mp4");
            std::fs::write(&depth, b"depth")?;
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

/// A small PNG, encoded in memory.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
