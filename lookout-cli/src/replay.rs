// Replay a recorded detection script through the perception loop

use anyhow::{bail, Context};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use lookout_core::KeyValueStore;
use lookout_eye::camera::FrameSource;
use lookout_eye::{
    integrate, Detection, DetectionSource, EyeConfig, PerceptionEngine, PerceptionFrame,
    PerceptionLoop, SenseInput, VisionError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const CANVAS_GREY: u8 = 128;

/// One line of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptFrame {
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub ocr: Option<String>,
    pub context: String,
}

impl Default for ScriptFrame {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            detections: Vec::new(),
            ocr: None,
            context: String::new(),
        }
    }
}

/// Parse a JSON-lines script. Blank lines and `#` comments are skipped.
pub fn parse_script(content: &str) -> anyhow::Result<Vec<ScriptFrame>> {
    let mut frames = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame: ScriptFrame = serde_json::from_str(line)
            .with_context(|| format!("Invalid script line {}", number + 1))?;
        if frame.width > 8192 || frame.height > 8192 {
            bail!("Frame on line {} is too large", number + 1);
        }
        frames.push(frame);
    }
    Ok(frames)
}

/// Stable colour for a label
pub fn label_colour(label: &str) -> Rgb<u8> {
    let hash = label
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    let [a, b, c, _] = hash.to_le_bytes();
    // Keep clear of the grey background
    Rgb([a | 0x20, b ^ 0x55, c & 0xf0])
}

/// Paint every detection box on a grey canvas
pub fn render(frame: &ScriptFrame) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(
        frame.width,
        frame.height,
        Rgb([CANVAS_GREY, CANVAS_GREY, CANVAS_GREY]),
    );
    for detection in &frame.detections {
        let Some((x, y, w, h)) = detection.bbox.clamp_to(frame.width, frame.height) else {
            continue;
        };
        let colour = label_colour(&detection.label);
        for py in y..y + h {
            for px in x..x + w {
                canvas.put_pixel(px, py, colour);
            }
        }
    }
    canvas
}

#[derive(Debug, Default)]
struct Cursor {
    next: usize,
    /// Script line of the last captured frame
    current_index: Option<usize>,
    current: Vec<Detection>,
}

/// Serves the script as both the camera and the detector. Each captured
/// frame advances the script; detection returns that frame's boxes.
pub struct ScriptSource {
    frames: Vec<ScriptFrame>,
    cursor: Mutex<Cursor>,
    frames_out: Option<PathBuf>,
}

impl ScriptSource {
    pub fn new(frames: Vec<ScriptFrame>, frames_out: Option<PathBuf>) -> Self {
        Self {
            frames,
            cursor: Mutex::new(Cursor::default()),
            frames_out,
        }
    }

    /// Script line behind the most recent capture
    pub fn current_index(&self) -> Option<usize> {
        self.cursor.lock().current_index
    }

    fn save(&self, dir: &Path, index: usize, image: &RgbImage) -> Result<(), VisionError> {
        let path = dir.join(format!("frame_{:05}.png", index + 1));
        image.save(&path)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

impl FrameSource for ScriptSource {
    fn capture_frame(&self) -> Result<RgbImage, VisionError> {
        let mut cursor = self.cursor.lock();
        let index = cursor.next;
        let frame = self
            .frames
            .get(index)
            .ok_or_else(|| VisionError::Camera("Script exhausted".to_string()))?;

        let image = render(frame);
        if let Some(dir) = &self.frames_out {
            self.save(dir, index, &image)?;
        }
        cursor.next += 1;
        cursor.current_index = Some(index);
        cursor.current = frame.detections.clone();
        Ok(image)
    }
}

#[async_trait]
impl DetectionSource for ScriptSource {
    async fn detect(
        &self,
        _frame: &RgbImage,
        max_results: usize,
    ) -> Result<Vec<Detection>, VisionError> {
        let current: Vec<Detection> = {
            let cursor = self.cursor.lock();
            cursor.current.iter().take(max_results).cloned().collect()
        };
        Ok(current)
    }
}

/// A delivered frame together with the sense decision for it
#[derive(Debug, Serialize)]
pub struct ReplayLine {
    pub frame: PerceptionFrame,
    pub sense: lookout_eye::SenseOutcome,
}

/// Run `frames` through a real perception loop, printing one JSON line per
/// delivered frame
pub async fn run(
    frames: Vec<ScriptFrame>,
    config: EyeConfig,
    store: Arc<dyn KeyValueStore>,
    frames_out: Option<PathBuf>,
) -> anyhow::Result<Vec<ReplayLine>> {
    if let Some(dir) = &frames_out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }

    let total = frames.len();
    let sense_config = config.sense.clone();
    let patience = config.fusion.frame_interval() * 4 + config.fusion.detect_timeout();
    let source = Arc::new(ScriptSource::new(frames.clone(), frames_out));

    let engine = PerceptionEngine::new(config, source.clone(), source.clone(), store)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    // Delivery happens right after the cycle that captured the frame
    let perception = PerceptionLoop::start(engine, move |frame| {
        let _ = tx.send((source.current_index(), frame));
    });
    info!("Replaying {} frames", total);

    let mut lines = Vec::with_capacity(total);
    while lines.len() < total {
        let next = tokio::time::timeout(patience + Duration::from_secs(1), rx.recv()).await;
        let (index, frame) = match next {
            Ok(Some(delivered)) => delivered,
            Ok(None) => break,
            Err(_) => {
                perception.stop();
                bail!("Replay stalled after {} of {} frames", lines.len(), total);
            }
        };

        let script = index
            .and_then(|i| frames.get(i))
            .cloned()
            .unwrap_or_default();
        let sense = integrate(
            &SenseInput {
                detections: frame.detections.clone(),
                ocr_text: script.ocr,
                user_context: script.context,
            },
            &sense_config,
        );

        let line = ReplayLine { frame, sense };
        println!("{}", serde_json::to_string(&line)?);
        lines.push(line);
        if index.map_or(false, |i| i + 1 == total) {
            break;
        }
    }

    if let Some(mut engine) = perception.shutdown().await {
        let memory = engine.ledger().snapshot()?;
        info!(
            "Replay finished: {} frames, {} labels remembered",
            engine.frame_index(),
            memory.counts.len()
        );
    }
    Ok(lines)
}
