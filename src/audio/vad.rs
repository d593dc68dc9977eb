//! Voice activity detection strategies
//!
//! Two strategies behind one trait: the default RMS energy detector,
//! and the Silero ONNX model. The model is acquired once per process,
//! asynchronously; any failure along the way (download, extraction,
//! checksum, session load) logs a warning and the pipeline stays on the
//! energy detector for the rest of the process lifetime. Callers never
//! see which strategy served them.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc::Sender;

use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use sha2::{Digest, Sha256};

use crate::config::VadConfig;
use crate::{Error, Result};

/// Frame size the VAD consumes: 512 samples = 32 ms at 16 kHz, the
/// largest chunk the Silero model accepts at that rate
pub const VAD_FRAME_SAMPLES: usize = 512;

/// RMS threshold for the energy detector
const ENERGY_THRESHOLD: f32 = 0.03;

/// Frames of ambient calibration at startup (~1.4 s)
const CALIBRATION_FRAMES: u32 = 45;

/// Silero probability above which a frame counts as speech
const SPEECH_PROBABILITY: f32 = 0.5;

/// Decides whether one audio frame contains speech
pub trait VadStrategy: Send {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Classify one frame of [`VAD_FRAME_SAMPLES`] mono samples
    ///
    /// # Errors
    ///
    /// Returns error if inference fails; the segmenter treats an
    /// erroring frame as silence.
    fn is_speech(&mut self, frame: &[f32]) -> Result<bool>;

    /// Clear any cross-frame state after a segment ends
    fn reset(&mut self) {}
}

/// RMS energy detector with ambient-noise calibration
///
/// For the first [`CALIBRATION_FRAMES`] frames the ambient level is
/// tracked with an exponential moving average and the effective
/// threshold floats at 1.5x ambient, so a noisy room doesn't read as
/// constant speech.
pub struct EnergyVad {
    threshold: f32,
    ambient: Option<f32>,
    calibration_left: u32,
}

impl EnergyVad {
    #[must_use]
    pub fn new() -> Self {
        Self {
            threshold: ENERGY_THRESHOLD,
            ambient: None,
            calibration_left: CALIBRATION_FRAMES,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VadStrategy for EnergyVad {
    fn name(&self) -> &'static str {
        "energy"
    }

    fn is_speech(&mut self, frame: &[f32]) -> Result<bool> {
        let energy = rms(frame);

        if self.calibration_left > 0 {
            self.ambient = Some(self.ambient.map_or(energy, |a| 0.9 * a + 0.1 * energy));
            self.calibration_left -= 1;
        }

        let effective = self
            .ambient
            .map_or(self.threshold, |a| self.threshold.max(a * 1.5));

        Ok(energy > effective)
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Silero VAD over an ONNX session
///
/// Keeps the model's recurrent h/c state between frames so silence
/// right after speech is classified in context.
pub struct SileroVad {
    session: Session,
    h: ndarray::Array3<f32>,
    c: ndarray::Array3<f32>,
}

impl SileroVad {
    /// Build a session from a model file on disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::VadModel`] if the session cannot be created.
    pub fn from_model_file(path: &Path) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| Error::VadModel(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::VadModel(format!("optimization level: {e}")))?
            .with_intra_threads(1)
            .map_err(|e| Error::VadModel(format!("thread config: {e}")))?
            .commit_from_file(path)
            .map_err(|e| Error::VadModel(format!("model load: {e}")))?;

        Ok(Self {
            session,
            h: ndarray::Array3::<f32>::zeros((2, 1, 64)),
            c: ndarray::Array3::<f32>::zeros((2, 1, 64)),
        })
    }

    /// Run one frame through the model, returning the speech probability
    fn predict(&mut self, frame: &[f32]) -> Result<f32> {
        let mut input = ndarray::Array2::<f32>::zeros((1, VAD_FRAME_SAMPLES));
        for (i, &sample) in frame.iter().take(VAD_FRAME_SAMPLES).enumerate() {
            input[[0, i]] = sample;
        }

        let sample_rate =
            ndarray::arr1::<i64>(&[i64::from(crate::audio::PIPELINE_SAMPLE_RATE)]);

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| Error::VadModel(format!("input tensor: {e}")))?;
        let sr_tensor = TensorRef::from_array_view(sample_rate.view())
            .map_err(|e| Error::VadModel(format!("sample rate tensor: {e}")))?;
        let h_tensor = TensorRef::from_array_view(self.h.view())
            .map_err(|e| Error::VadModel(format!("h tensor: {e}")))?;
        let c_tensor = TensorRef::from_array_view(self.c.view())
            .map_err(|e| Error::VadModel(format!("c tensor: {e}")))?;

        let inputs = ort::inputs![
            "input" => input_tensor,
            "sr" => sr_tensor,
            "h" => h_tensor,
            "c" => c_tensor,
        ];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| Error::VadModel(e.to_string()))?;

        let hn = outputs
            .get("hn")
            .ok_or_else(|| Error::VadModel("missing 'hn' output".to_string()))?
            .try_extract_array::<f32>()
            .map_err(|e| Error::VadModel(format!("extract hn: {e}")))?
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| Error::VadModel(format!("reshape hn: {e}")))?;
        let cn = outputs
            .get("cn")
            .ok_or_else(|| Error::VadModel("missing 'cn' output".to_string()))?
            .try_extract_array::<f32>()
            .map_err(|e| Error::VadModel(format!("extract cn: {e}")))?
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| Error::VadModel(format!("reshape cn: {e}")))?;

        self.h.assign(&hn);
        self.c.assign(&cn);

        let output = outputs
            .get("output")
            .ok_or_else(|| Error::VadModel("missing 'output' output".to_string()))?
            .try_extract_array::<f32>()
            .map_err(|e| Error::VadModel(format!("extract output: {e}")))?;

        Ok(output[[0]])
    }
}

impl VadStrategy for SileroVad {
    fn name(&self) -> &'static str {
        "silero"
    }

    fn is_speech(&mut self, frame: &[f32]) -> Result<bool> {
        Ok(self.predict(frame)? > SPEECH_PROBABILITY)
    }

    fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }
}

/// Start one-time asynchronous acquisition of the enhanced VAD
///
/// On success the built strategy is sent to the segmenter thread,
/// which swaps it in between frames. On failure nothing is sent and
/// the energy detector stays active for the rest of the process.
pub fn spawn_model_acquisition(cfg: VadConfig, tx: Sender<Box<dyn VadStrategy + Send>>) {
    tokio::spawn(async move {
        let cache_dir = crate::config::model_cache_dir();
        match acquire_silero(&cfg, &cache_dir).await {
            Ok(vad) => {
                tracing::info!("enhanced VAD model ready");
                let _ = tx.send(Box::new(vad));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "enhanced VAD unavailable, continuing with energy VAD"
                );
            }
        }
    });
}

/// Download, extract, verify, and load the Silero model
///
/// # Errors
///
/// Returns [`Error::VadModel`] (or the underlying HTTP/IO error) on
/// any acquisition failure.
pub async fn acquire_silero(cfg: &VadConfig, cache_dir: &Path) -> Result<SileroVad> {
    let model_path = cache_dir.join("silero_vad.onnx");

    if !model_is_cached(&model_path, cfg.model_sha256.as_deref()) {
        download_model(&cfg.model_url, cfg.model_sha256.as_deref(), &model_path).await?;
    } else {
        tracing::debug!(path = %model_path.display(), "using cached VAD model");
    }

    // Session construction is CPU-bound; keep it off the executor
    tokio::task::spawn_blocking(move || SileroVad::from_model_file(&model_path))
        .await
        .map_err(|e| Error::VadModel(format!("model load task failed: {e}")))?
}

/// Whether a cached model exists and (when a digest is configured) verifies
fn model_is_cached(path: &Path, expected_sha256: Option<&str>) -> bool {
    if !path.is_file() {
        return false;
    }
    let Some(expected) = expected_sha256 else {
        return true;
    };
    match std::fs::read(path) {
        Ok(bytes) => digest_matches(&bytes, expected),
        Err(_) => false,
    }
}

/// Fetch the model, unpacking a zip archive when necessary, and stage
/// it into the cache atomically
async fn download_model(url: &str, expected_sha256: Option<&str>, dest: &Path) -> Result<()> {
    tracing::info!(url, "downloading VAD model");

    let response = reqwest::get(url).await?.error_for_status()?;
    let body = response.bytes().await?;

    let model_bytes = if is_zip(&body) {
        extract_onnx(&body)?
    } else {
        body.to_vec()
    };

    if let Some(expected) = expected_sha256
        && !digest_matches(&model_bytes, expected)
    {
        return Err(Error::VadModel(format!(
            "model checksum mismatch, expected {expected}"
        )));
    }

    let dir = dest
        .parent()
        .ok_or_else(|| Error::VadModel("model cache path has no parent".to_string()))?;
    std::fs::create_dir_all(dir)?;

    // Stage then rename so an interrupted download never leaves a
    // truncated model behind
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(&model_bytes)?;
    staged
        .persist(dest)
        .map_err(|e| Error::VadModel(format!("failed to store model: {e}")))?;

    tracing::info!(path = %dest.display(), bytes = model_bytes.len(), "VAD model cached");
    Ok(())
}

fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

/// Pull the first `.onnx` member out of a zip archive
fn extract_onnx(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::VadModel(format!("bad model archive: {e}")))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| Error::VadModel(format!("bad archive member: {e}")))?;
        if file.name().ends_with(".onnx") {
            let mut out = Vec::new();
            file.read_to_end(&mut out)?;
            return Ok(out);
        }
    }

    Err(Error::VadModel(
        "model archive contains no .onnx file".to_string(),
    ))
}

fn digest_matches(bytes: &[u8], expected_hex: &str) -> bool {
    let actual = hex::encode(Sha256::digest(bytes));
    actual.eq_ignore_ascii_case(expected_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_frame() -> Vec<f32> {
        vec![0.5; VAD_FRAME_SAMPLES]
    }

    fn quiet_frame() -> Vec<f32> {
        vec![0.001; VAD_FRAME_SAMPLES]
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(rms(&vec![0.0; 100]) < 1e-6);
        assert!(rms(&[]) < 1e-6);
    }

    #[test]
    fn energy_vad_detects_loud_frames() {
        let mut vad = EnergyVad::new();
        assert!(!vad.is_speech(&quiet_frame()).unwrap());
        assert!(vad.is_speech(&loud_frame()).unwrap());
    }

    #[test]
    fn calibration_raises_threshold_in_noisy_room() {
        let mut vad = EnergyVad::new();

        // Constant 0.1 RMS background during calibration
        let noise = vec![0.1; VAD_FRAME_SAMPLES];
        for _ in 0..CALIBRATION_FRAMES {
            vad.is_speech(&noise).unwrap();
        }

        // The same background level no longer reads as speech
        assert!(!vad.is_speech(&noise).unwrap());
        // Clearly louder than ambient still does
        assert!(vad.is_speech(&loud_frame()).unwrap());
    }

    #[test]
    fn digest_comparison_is_case_insensitive() {
        let digest = hex::encode(Sha256::digest(b"model"));
        assert!(digest_matches(b"model", &digest.to_uppercase()));
        assert!(!digest_matches(b"other", &digest));
    }

    #[test]
    fn extract_onnx_finds_model_member() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("readme.txt", options).unwrap();
            writer.write_all(b"not a model").unwrap();
            writer.start_file("model/silero.onnx", options).unwrap();
            writer.write_all(b"onnx-bytes").unwrap();
            writer.finish().unwrap();
        }

        let bytes = cursor.into_inner();
        assert!(is_zip(&bytes));
        assert_eq!(extract_onnx(&bytes).unwrap(), b"onnx-bytes");
    }

    #[test]
    fn extract_onnx_rejects_archive_without_model() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("readme.txt", options).unwrap();
            writer.write_all(b"empty").unwrap();
            writer.finish().unwrap();
        }

        assert!(extract_onnx(&cursor.into_inner()).is_err());
    }
}
