//! End-to-end tests for the studio HTTP server.
//!
//! Uses an in-process engine backend and codec so no predictor program or
//! model weights are needed.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sharp_studio::config::SettingsFile;
use sharp_studio::desktop::Desktop;
use sharp_studio::engine::{
    Accelerators, DeserializeMode, Device, EngineBackend, EngineCache, Geometry, ImageInput,
    InferenceEngine, SerializedWeights,
};
use sharp_studio::error::{CodecError, DesktopError, EngineError};
use sharp_studio::media::{LoadedImage, RenderedVideo, SceneCodec, SceneMetadata, decode_rgb};
use sharp_studio::orchestrator::{OutputRootRegistry, RunOrchestrator, StudioApi, StudioState};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Backend on a CUDA machine. Checkpoints containing `pickle` fail
/// restricted deserialization.
#[derive(Default)]
struct FakeBackend {
    loads: AtomicUsize,
    predictions: Arc<Predictions>,
}

/// Predictions running right now, and the most ever seen at once.
#[derive(Default)]
struct Predictions {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl EngineBackend for FakeBackend {
    fn accelerators(&self) -> Accelerators {
        Accelerators {
            cuda: true,
            mps: false,
        }
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
        let content = std::fs::read(path)?;
        if mode == DeserializeMode::Restricted && content.windows(6).any(|w| w == b"pickle") {
            return Err(EngineError::Deserialization {
                path: path.to_path_buf(),
                reason: "unsupported global".to_string(),
            });
        }
        Ok(SerializedWeights {
            path: path.to_path_buf(),
            mode,
        })
    }

    fn create_engine(&self) -> Box<dyn InferenceEngine> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeEngine {
            predictions: Arc::clone(&self.predictions),
        })
    }
}

struct FakeEngine {
    predictions: Arc<Predictions>,
}

impl InferenceEngine for FakeEngine {
    fn load_weights(&mut self, _weights: SerializedWeights) -> Result<(), EngineError> {
        Ok(())
    }

    fn eval(&mut self) {}

    fn to(&mut self, _device: Device) -> Result<(), EngineError> {
        Ok(())
    }

    fn predict(&self, input: &ImageInput<'_>, device: Device) -> Result<Geometry, EngineError> {
        let running = self.predictions.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.predictions.peak.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        self.predictions.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Geometry(
            format!("ply {}x{} on {}", input.image.width(), input.image.height(), device)
                .into_bytes(),
        ))
    }
}

struct FakeCodec;

impl SceneCodec for FakeCodec {
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
        std::fs::write(path, b"mp4")?;
        let depth = path.with_extension("depth.mp4");
        std::fs::write(&depth, b"depth")?;
        Ok(RenderedVideo {
            video: path.to_path_buf(),
            depth_video: Some(depth),
        })
    }
}

struct HeadlessDesktop;

impl Desktop for HeadlessDesktop {
    fn pick_folder(&self, _initial: &Path) -> Result<Option<PathBuf>, DesktopError> {
        Err(DesktopError::EnvironmentUnavailable)
    }

    fn open(&self, target: &str) -> Result<(), DesktopError> {
        Err(DesktopError::OpenFailed {
            target: target.to_string(),
            reason: "no display".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    root: PathBuf,
    tmp: tempfile::TempDir,
    backend: Arc<FakeBackend>,
    state: StudioState,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start_test_server() -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("outputs");
    std::fs::create_dir_all(&root).unwrap();
    let root = root.canonicalize().unwrap();

    let backend = Arc::new(FakeBackend::default());
    let engines = Arc::new(EngineCache::new(backend.clone()));
    let roots = Arc::new(OutputRootRegistry::new(root.clone()));
    let state = StudioState {
        orchestrator: Arc::new(RunOrchestrator::new(engines, Arc::new(FakeCodec), roots)),
        settings: Arc::new(SettingsFile::at(tmp.path().join("config.json"))),
        desktop: Arc::new(HeadlessDesktop),
        ui_dir: None,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_state = state.clone();
    tokio::spawn(async move {
        let _ = StudioApi::start(server_state, listener, 64 * 1024 * 1024).await;
    });

    TestServer {
        addr,
        root,
        tmp,
        backend,
        state,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn image_part(name: &str, width: u32, height: u32) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(png_bytes(width, height))
        .file_name(name.to_string())
        .mime_str("image/png")
        .unwrap()
}

async fn predict(server: &TestServer, form: reqwest::multipart::Form) -> reqwest::Response {
    client()
        .post(server.url("/api/predict"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_run_with_render() {
    let server = start_test_server().await;
    let form = reqwest::multipart::Form::new()
        .part("images", image_part("beach.png", 32, 16))
        .part("images", image_part("beach.png", 8, 8))
        .text("device", "default")
        .text("render", "true");

    let resp = predict(&server, form).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    let run_id = body["run_id"].as_str().unwrap().to_string();
    assert_eq!(body["device"], "cuda");
    assert_eq!(body["render_enabled"], true);
    assert_eq!(body["warnings"], serde_json::json!([]));

    let outputs = body["outputs"].as_array().unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0]["name"], "beach.png");
    assert_eq!(outputs[1]["name"], "beach-1.png");
    assert_eq!(
        outputs[1]["video"],
        format!("/api/file/{}/beach-1.mp4", run_id)
    );
    assert_eq!(
        outputs[1]["depth_video"],
        format!("/api/file/{}/beach-1.depth.mp4", run_id)
    );

    let ply = client()
        .get(server.url(outputs[0]["ply"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(ply.status(), 200);
    assert_eq!(ply.text().await.unwrap(), "ply 32x16 on cuda");

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(server.root.join(&run_id).join("manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["run_id"], run_id);
    assert_eq!(manifest["outputs"][0]["ply"], "beach.ply");
    assert!(manifest["created_at"].is_string());
}

#[tokio::test]
async fn test_bundle_download_contains_run() {
    let server = start_test_server().await;
    let form = reqwest::multipart::Form::new().part("images", image_part("a.png", 4, 4));

    let body: serde_json::Value = predict(&server, form).await.json().await.unwrap();
    let bundle = client()
        .get(server.url(body["bundle"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(bundle.status(), 200);
    let bytes = bundle.bytes().await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let names: HashSet<String> = archive.file_names().map(str::to_string).collect();
    let expected: HashSet<String> = ["01_a.png", "a.ply", "a.preview.jpg", "manifest.json"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, expected);

    let mut ply = String::new();
    archive
        .by_name("a.ply")
        .unwrap()
        .read_to_string(&mut ply)
        .unwrap();
    assert_eq!(ply, "ply 4x4 on cuda");
}

#[tokio::test]
async fn test_engine_reused_across_runs() {
    let server = start_test_server().await;
    for _ in 0..3 {
        let form = reqwest::multipart::Form::new()
            .part("images", image_part("a.png", 4, 4))
            .text("device", "cuda");
        assert_eq!(predict(&server, form).await.status(), 200);
    }
    assert_eq!(server.backend.loads.load(Ordering::SeqCst), 1);

    let form = reqwest::multipart::Form::new()
        .part("images", image_part("a.png", 4, 4))
        .text("device", "cpu");
    assert_eq!(predict(&server, form).await.status(), 200);
    assert_eq!(server.backend.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unsafe_checkpoint_requires_opt_in_every_time() {
    let server = start_test_server().await;
    let checkpoint = || {
        reqwest::multipart::Part::bytes(b"pickle weights".to_vec()).file_name("model.pt")
    };

    let form = reqwest::multipart::Form::new()
        .part("images", image_part("a.png", 4, 4))
        .part("checkpoint", checkpoint());
    let resp = predict(&server, form).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("safe deserialization"));

    let form = reqwest::multipart::Form::new()
        .part("images", image_part("a.png", 4, 4))
        .part("checkpoint", checkpoint())
        .text("unsafe_checkpoint", "1");
    let resp = predict(&server, form).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(
        body["warnings"][0]
            .as_str()
            .unwrap()
            .contains("unsafe deserialization")
    );

    // Cached now, but a request without the opt-in is still refused.
    let form = reqwest::multipart::Form::new()
        .part("images", image_part("a.png", 4, 4))
        .part("checkpoint", checkpoint());
    assert_eq!(predict(&server, form).await.status(), 400);

    let stored: Vec<_> = std::fs::read_dir(server.root.join("_checkpoints"))
        .unwrap()
        .collect();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_old_downloads_survive_root_change() {
    let server = start_test_server().await;
    let form = reqwest::multipart::Form::new().part("images", image_part("old.png", 4, 4));
    let old: serde_json::Value = predict(&server, form).await.json().await.unwrap();

    let new_root = server.tmp.path().join("new-outputs");
    let resp = client()
        .put(server.url("/api/output-root"))
        .json(&serde_json::json!({ "path": new_root }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["changed"], true);

    let form = reqwest::multipart::Form::new().part("images", image_part("new.png", 4, 4));
    let new: serde_json::Value = predict(&server, form).await.json().await.unwrap();
    let new_run = new["run_id"].as_str().unwrap();
    assert!(
        new_root
            .canonicalize()
            .unwrap()
            .join(new_run)
            .join("new.ply")
            .is_file()
    );

    let resp = client()
        .get(server.url(old["outputs"][0]["ply"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let current: serde_json::Value = client()
        .get(server.url("/api/output-root"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        current["path"],
        new_root.canonicalize().unwrap().display().to_string()
    );
    assert_eq!(
        server.state.settings.load().output_root,
        Some(new_root.canonicalize().unwrap())
    );
}

#[tokio::test]
async fn test_download_guards() {
    let server = start_test_server().await;
    std::fs::write(server.tmp.path().join("secret.txt"), b"secret").unwrap();

    let resp = client()
        .get(server.url("/api/file/..%2F/secret.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client()
        .get(server.url("/api/file/no-such-run/a.ply"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "File not found.");
}

#[tokio::test]
async fn test_headless_desktop_endpoints_fail_cleanly() {
    let server = start_test_server().await;

    let resp = client()
        .post(server.url("/api/output-root/select"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let resp = client()
        .post(server.url("/api/output-root/open"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Failed to open output folder.");
}

#[tokio::test]
async fn test_concurrent_requests_all_complete() {
    let server = Arc::new(start_test_server().await);
    let run_ids = Arc::new(Mutex::new(HashSet::new()));

    let mut handles = Vec::new();
    for i in 0..4 {
        let server = Arc::clone(&server);
        let run_ids = Arc::clone(&run_ids);
        handles.push(tokio::spawn(async move {
            let form = reqwest::multipart::Form::new()
                .part("images", image_part(&format!("img{}.png", i), 4, 4))
                .part("images", image_part(&format!("img{}-b.png", i), 4, 4));
            let body: serde_json::Value = predict(&server, form).await.json().await.unwrap();
            run_ids
                .lock()
                .unwrap()
                .insert(body["run_id"].as_str().unwrap().to_string());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(run_ids.lock().unwrap().len(), 4);
    assert_eq!(server.backend.loads.load(Ordering::SeqCst), 1);
    assert_eq!(server.backend.predictions.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_browser_landing_page() {
    let server = start_test_server().await;

    let resp = client().get(server.url("/")).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    let page = resp.text().await.unwrap();
    assert!(page.contains("SHARP Studio"));
}
