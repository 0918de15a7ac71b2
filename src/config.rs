use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ClassifierKind;
use crate::ingest::AcquisitionSettings;
use crate::react::deterrent::DeterrentKind;
use crate::tiling::TilingGeometry;

const DEFAULT_CAMERA_SOURCE: &str = "stub://garden";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 960;
const DEFAULT_CAMERA_FPS: u32 = 2;
const DEFAULT_READY_TIMEOUT_MS: u64 = 500;
const DEFAULT_GRID_COLS: u32 = 3;
const DEFAULT_GRID_ROWS: u32 = 2;
const DEFAULT_OVERLAP: f64 = 1.2;
const DEFAULT_MODEL_INPUT: u32 = 224;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.95;
const DEFAULT_TARGET_LABEL: &str = "Pigeon";
const DEFAULT_IDLE_DELAY_MS: u64 = 200;
const DEFAULT_THERMAL_SOURCE: &str = "stub";
const DEFAULT_THROTTLE_CELSIUS: f32 = 80.0;
const DEFAULT_THROTTLE_SLEEP_SECS: u64 = 5;
const DEFAULT_EVIDENCE_DIR: &str = "images";
const DEFAULT_BUCKET_SECS: u32 = crate::ONE_HOUR_S;
const DEFAULT_DETER_SECS: u32 = 15;
const DEFAULT_MIN_DETER_SECS: u32 = 3;
const DEFAULT_LINKTAP_URL: &str = "https://www.link-tap.com/api/activateInstantMode";
const DEFAULT_IMGBB_URL: &str = "https://api.imgbb.com/1/upload";
const DEFAULT_UPLOAD_EXPIRATION_SECS: u64 = 60 * 60 * 24;
const DEFAULT_NOTIFY_EVENT: &str = "tilewatch_detect";

#[derive(Debug, Deserialize, Default)]
struct TilewatchConfigFile {
    camera: Option<CameraConfigFile>,
    grid: Option<GridConfigFile>,
    model: Option<ModelConfigFile>,
    scan: Option<ScanConfigFile>,
    thermal: Option<ThermalConfigFile>,
    reaction: Option<ReactionConfigFile>,
    deterrent: Option<DeterrentConfigFile>,
    upload: Option<UploadConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    ready_timeout_ms: Option<u64>,
    shutter_us: Option<u32>,
    contrast: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct GridConfigFile {
    cols: Option<u32>,
    rows: Option<u32>,
    overlap: Option<f64>,
    tile_size: Option<u32>,
    inactive_zones: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<ClassifierKind>,
    url: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    target_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ScanConfigFile {
    warm_up_frames: Option<u32>,
    frame_budget: Option<u64>,
    idle_delay_ms: Option<u64>,
    auto_detect: Option<bool>,
    artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ThermalConfigFile {
    source: Option<String>,
    throttle_celsius: Option<f32>,
    throttle_sleep_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ReactionConfigFile {
    evidence_dir: Option<PathBuf>,
    bucket_secs: Option<u32>,
    deter: Option<bool>,
    deter_secs: Option<u32>,
    min_deter_secs: Option<u32>,
    cooldown_secs: Option<u64>,
    journal_path: Option<PathBuf>,
    save_full_frame: Option<bool>,
    save_annotated: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DeterrentConfigFile {
    kind: Option<DeterrentKind>,
    linktap: Option<LinkTapConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct LinkTapConfigFile {
    url: Option<String>,
    username: Option<String>,
    api_key: Option<String>,
    gateway_id: Option<String>,
    taplinker_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    url: Option<String>,
    api_key: Option<String>,
    expiration_secs: Option<u64>,
}

/// Either a full webhook `url`, or an IFTTT `ifttt_key` plus optional `event`.
#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    url: Option<String>,
    ifttt_key: Option<String>,
    event: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TilewatchConfig {
    pub camera: CameraSettings,
    pub grid: GridSettings,
    pub model: ModelSettings,
    pub scan: ScanSettings,
    pub thermal: ThermalSettings,
    pub reaction: ReactionSettings,
    pub deterrent: DeterrentSettings,
    pub upload: Option<UploadSettings>,
    pub notify: Option<NotifySettings>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `stub://<name>`, `http(s)://...` or a local image directory.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub ready_timeout: Duration,
    pub acquisition: AcquisitionSettings,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_CAMERA_SOURCE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            acquisition: AcquisitionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSettings {
    pub cols: u32,
    pub rows: u32,
    pub overlap: f64,
    /// Explicit tile size; computed from the grid when absent.
    pub tile_size: Option<u32>,
    pub inactive_zones: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: ClassifierKind,
    pub url: Option<String>,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub target_label: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: ClassifierKind::Stub,
            url: None,
            model_path: None,
            labels_path: None,
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            target_label: DEFAULT_TARGET_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub warm_up_frames: u32,
    /// Maximum number of ticks; 0 runs until cancelled.
    pub frame_budget: u64,
    pub idle_delay: Duration,
    pub auto_detect: bool,
    pub artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ThermalSettings {
    /// `stub`, `stub:<celsius>`, `sysfs` or a sysfs millidegree file.
    pub source: String,
    pub throttle_celsius: f32,
    pub throttle_sleep: Duration,
}

#[derive(Debug, Clone)]
pub struct ReactionSettings {
    pub evidence_dir: PathBuf,
    pub bucket_secs: u32,
    pub deter: bool,
    pub deter_secs: u32,
    pub min_deter_secs: u32,
    /// Minimum spacing between deterrent activations; zero disables it.
    pub cooldown: Duration,
    pub journal_path: Option<PathBuf>,
    /// Save the full source frame next to each tile.
    pub save_full_frame: bool,
    /// Save a copy of the tile with the detection box drawn.
    pub save_annotated: bool,
}

#[derive(Debug, Clone)]
pub struct DeterrentSettings {
    pub kind: DeterrentKind,
    pub linktap: Option<LinkTapSettings>,
}

#[derive(Debug, Clone)]
pub struct LinkTapSettings {
    pub url: String,
    pub username: String,
    pub api_key: String,
    pub gateway_id: String,
    pub taplinker_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub url: String,
    pub api_key: String,
    pub expiration: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub url: String,
}

impl TilewatchConfig {
    /// Read `TILEWATCH_CONFIG` (if set), apply `TILEWATCH_*` overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TILEWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Tiling geometry for the configured camera and grid.
    pub fn geometry(&self) -> Result<TilingGeometry> {
        let geometry = TilingGeometry::new(
            self.camera.width,
            self.camera.height,
            self.grid.cols,
            self.grid.rows,
            self.grid.overlap,
        )?;
        match self.grid.tile_size {
            Some(size) => geometry.with_tile_size(size),
            None => Ok(geometry),
        }
    }

    fn from_file(file: TilewatchConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            source: camera_file
                .source
                .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            ready_timeout: Duration::from_millis(
                camera_file
                    .ready_timeout_ms
                    .unwrap_or(DEFAULT_READY_TIMEOUT_MS),
            ),
            acquisition: AcquisitionSettings {
                shutter_us: camera_file.shutter_us,
                contrast: camera_file.contrast.unwrap_or(0),
            },
        };

        let grid_file = file.grid.unwrap_or_default();
        let grid = GridSettings {
            cols: grid_file.cols.unwrap_or(DEFAULT_GRID_COLS),
            rows: grid_file.rows.unwrap_or(DEFAULT_GRID_ROWS),
            overlap: grid_file.overlap.unwrap_or(DEFAULT_OVERLAP),
            tile_size: grid_file.tile_size,
            inactive_zones: grid_file.inactive_zones.unwrap_or_default(),
        };

        let model_defaults = ModelSettings::default();
        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            backend: model_file.backend.unwrap_or(model_defaults.backend),
            url: model_file.url,
            model_path: model_file.model_path,
            labels_path: model_file.labels_path,
            input_width: model_file.input_width.unwrap_or(model_defaults.input_width),
            input_height: model_file
                .input_height
                .unwrap_or(model_defaults.input_height),
            confidence_threshold: model_file
                .confidence_threshold
                .unwrap_or(model_defaults.confidence_threshold),
            target_label: model_file
                .target_label
                .unwrap_or(model_defaults.target_label),
        };

        let scan_file = file.scan.unwrap_or_default();
        let scan = ScanSettings {
            warm_up_frames: scan_file.warm_up_frames.unwrap_or(0),
            frame_budget: scan_file.frame_budget.unwrap_or(0),
            idle_delay: Duration::from_millis(
                scan_file.idle_delay_ms.unwrap_or(DEFAULT_IDLE_DELAY_MS),
            ),
            auto_detect: scan_file.auto_detect.unwrap_or(true),
            artifact_dir: scan_file.artifact_dir,
        };

        let thermal_file = file.thermal.unwrap_or_default();
        let thermal = ThermalSettings {
            source: thermal_file
                .source
                .unwrap_or_else(|| DEFAULT_THERMAL_SOURCE.to_string()),
            throttle_celsius: thermal_file
                .throttle_celsius
                .unwrap_or(DEFAULT_THROTTLE_CELSIUS),
            throttle_sleep: Duration::from_secs(
                thermal_file
                    .throttle_sleep_secs
                    .unwrap_or(DEFAULT_THROTTLE_SLEEP_SECS),
            ),
        };

        let reaction_file = file.reaction.unwrap_or_default();
        let reaction = ReactionSettings {
            evidence_dir: reaction_file
                .evidence_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_DIR)),
            bucket_secs: reaction_file.bucket_secs.unwrap_or(DEFAULT_BUCKET_SECS),
            deter: reaction_file.deter.unwrap_or(false),
            deter_secs: reaction_file.deter_secs.unwrap_or(DEFAULT_DETER_SECS),
            min_deter_secs: reaction_file
                .min_deter_secs
                .unwrap_or(DEFAULT_MIN_DETER_SECS),
            cooldown: Duration::from_secs(reaction_file.cooldown_secs.unwrap_or(0)),
            journal_path: reaction_file.journal_path,
            save_full_frame: reaction_file.save_full_frame.unwrap_or(true),
            save_annotated: reaction_file.save_annotated.unwrap_or(true),
        };

        let deterrent_file = file.deterrent.unwrap_or_default();
        let deterrent = DeterrentSettings {
            kind: deterrent_file.kind.unwrap_or(DeterrentKind::Log),
            linktap: deterrent_file.linktap.map(|linktap| LinkTapSettings {
                url: linktap
                    .url
                    .unwrap_or_else(|| DEFAULT_LINKTAP_URL.to_string()),
                username: linktap.username.unwrap_or_default(),
                api_key: linktap.api_key.unwrap_or_default(),
                gateway_id: linktap.gateway_id.unwrap_or_default(),
                taplinker_id: linktap.taplinker_id.unwrap_or_default(),
            }),
        };

        let upload = file.upload.map(|upload| UploadSettings {
            url: upload.url.unwrap_or_else(|| DEFAULT_IMGBB_URL.to_string()),
            api_key: upload.api_key.unwrap_or_default(),
            expiration: Duration::from_secs(
                upload
                    .expiration_secs
                    .unwrap_or(DEFAULT_UPLOAD_EXPIRATION_SECS),
            ),
        });

        let notify = file.notify.map(|notify| {
            let url = notify.url.or_else(|| {
                notify.ifttt_key.map(|key| {
                    format!(
                        "https://maker.ifttt.com/trigger/{}/with/key/{}",
                        notify.event.as_deref().unwrap_or(DEFAULT_NOTIFY_EVENT),
                        key
                    )
                })
            });
            NotifySettings {
                url: url.unwrap_or_default(),
            }
        });

        Ok(Self {
            camera,
            grid,
            model,
            scan,
            thermal,
            reaction,
            deterrent,
            upload,
            notify,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("TILEWATCH_CAMERA_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(url) = std::env::var("TILEWATCH_MODEL_URL") {
            if !url.trim().is_empty() {
                self.model.url = Some(url);
            }
        }
        if let Ok(backend) = std::env::var("TILEWATCH_BACKEND") {
            if !backend.trim().is_empty() {
                self.model.backend = backend
                    .parse::<ClassifierKind>()
                    .context("TILEWATCH_BACKEND")?;
            }
        }
        if let Ok(label) = std::env::var("TILEWATCH_TARGET_LABEL") {
            if !label.trim().is_empty() {
                self.model.target_label = label.trim().to_string();
            }
        }
        if let Ok(threshold) = std::env::var("TILEWATCH_CONFIDENCE_THRESHOLD") {
            self.model.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("TILEWATCH_CONFIDENCE_THRESHOLD must be a number in [0, 1]")
            })?;
        }
        if let Ok(budget) = std::env::var("TILEWATCH_FRAME_BUDGET") {
            self.scan.frame_budget = budget.trim().parse().map_err(|_| {
                anyhow!("TILEWATCH_FRAME_BUDGET must be a non-negative integer")
            })?;
        }
        if let Ok(value) = std::env::var("TILEWATCH_AUTO_DETECT") {
            self.scan.auto_detect = parse_bool("TILEWATCH_AUTO_DETECT", &value)?;
        }
        if let Ok(value) = std::env::var("TILEWATCH_DETER") {
            self.reaction.deter = parse_bool("TILEWATCH_DETER", &value)?;
        }
        if let Ok(dir) = std::env::var("TILEWATCH_EVIDENCE_DIR") {
            if !dir.trim().is_empty() {
                self.reaction.evidence_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    /// Check cross-field constraints; rerun after applying CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        self.camera.source = self.camera.source.trim().to_string();
        if self.camera.source.is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        let source = self.camera.source.as_str();
        if source.contains("://")
            && !["stub://", "http://", "https://"]
                .iter()
                .any(|scheme| source.starts_with(scheme))
        {
            return Err(anyhow!(
                "unsupported camera source '{}'; expected stub://, http(s):// or a local directory",
                source
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.target_fps == 0 {
            return Err(anyhow!("camera width, height and target_fps must be > 0"));
        }
        self.camera.acquisition.validate()?;

        let geometry = self.geometry()?;
        for &zone in &self.grid.inactive_zones {
            if zone >= geometry.zone_count() {
                return Err(anyhow!(
                    "inactive zone {} out of range (grid has {} zones)",
                    zone,
                    geometry.zone_count()
                ));
            }
        }

        let threshold = self.model.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1] (got {})",
                threshold
            ));
        }
        if self.model.target_label.trim().is_empty() {
            return Err(anyhow!("target_label must not be empty"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be > 0"));
        }
        match self.model.backend {
            ClassifierKind::Remote | ClassifierKind::RemoteDetector => {
                if self.model.url.as_deref().map_or(true, |url| url.trim().is_empty()) {
                    return Err(anyhow!(
                        "model backend {} requires model.url",
                        self.model.backend
                    ));
                }
            }
            ClassifierKind::Tract => {
                if self.model.model_path.is_none() {
                    return Err(anyhow!("model backend tract requires model.model_path"));
                }
            }
            ClassifierKind::Stub => {}
        }

        if !self.thermal.throttle_celsius.is_finite() {
            return Err(anyhow!("thermal.throttle_celsius must be a finite number"));
        }
        if self.thermal.source.trim().is_empty() {
            return Err(anyhow!("thermal source must not be empty"));
        }

        if self.reaction.bucket_secs == 0 {
            return Err(anyhow!("reaction.bucket_secs must be greater than zero"));
        }
        if self.reaction.min_deter_secs == 0 {
            return Err(anyhow!("reaction.min_deter_secs must be greater than zero"));
        }

        if self.deterrent.kind == DeterrentKind::LinkTap {
            let linktap = self
                .deterrent
                .linktap
                .as_ref()
                .ok_or_else(|| anyhow!("deterrent kind linktap requires a deterrent.linktap section"))?;
            for (name, value) in [
                ("username", &linktap.username),
                ("api_key", &linktap.api_key),
                ("gateway_id", &linktap.gateway_id),
                ("taplinker_id", &linktap.taplinker_id),
            ] {
                if value.trim().is_empty() {
                    return Err(anyhow!("deterrent.linktap.{} must be set", name));
                }
            }
        }

        if let Some(upload) = &self.upload {
            if upload.api_key.trim().is_empty() {
                return Err(anyhow!("upload.api_key must be set when upload is configured"));
            }
        }
        if let Some(notify) = &self.notify {
            if notify.url.trim().is_empty() {
                return Err(anyhow!("notify needs either url or ifttt_key"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TilewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (got '{}')", name, value)),
    }
}
