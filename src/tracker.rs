//! Hand tracking
//!
//! Runs MediaPipe-compatible hand landmark inference through ONNX Runtime on
//! a dedicated thread, classifies each observation, and publishes the label
//! into the shared gesture cell. The thread consumes frames from a small
//! bounded channel; when inference falls behind the camera, stale frames are
//! simply dropped at the sender.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use ndarray::Array4;
use parking_lot::Mutex;

use crate::gesture::{
    classify_openness, openness, GestureCell, GestureLabel, HandLandmark, LANDMARK_COUNT,
};

/// Model input edge length (square RGB input).
const INPUT_SIZE: u32 = 224;
/// Landmark detections scoring below this count as "no hand".
const PRESENCE_THRESHOLD: f32 = 0.6;
/// Expected landmark model file inside the models directory.
const LANDMARK_MODEL: &str = "hand_landmark.onnx";

/// One classified hand observation.
#[derive(Clone, Copy, Debug)]
pub struct HandObservation {
    pub landmarks: [HandLandmark; LANDMARK_COUNT],
    pub openness: f32,
    pub label: GestureLabel,
    /// Camera frame this observation was computed from.
    pub frame_number: u64,
}

/// Frame handed to the inference thread.
struct FrameData {
    data: Vec<u8>,
    width: u32,
    height: u32,
    frame_number: u64,
}

pub struct HandTracker {
    /// Latest observation, `None` while no hand is present.
    latest: Arc<Mutex<Option<HandObservation>>>,
    /// Channel into the inference thread.
    frame_sender: Option<Sender<FrameData>>,
    /// True once the model is loaded and inference is live.
    ready: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl HandTracker {
    /// Spawn the inference thread. The tracker owns the single writer side
    /// of `gesture`; everything else only reads the cell.
    pub fn new(gesture: Arc<GestureCell>) -> Result<Self, String> {
        let latest = Arc::new(Mutex::new(None));
        let ready = Arc::new(AtomicBool::new(false));

        let (frame_sender, frame_receiver) = crossbeam_channel::bounded::<FrameData>(2);

        let latest_clone = latest.clone();
        let ready_clone = ready.clone();

        let thread_handle = std::thread::Builder::new()
            .name("hand-tracker".to_string())
            .spawn(move || {
                Self::tracker_thread(frame_receiver, latest_clone, gesture, ready_clone);
            })
            .map_err(|e| format!("Failed to spawn tracker thread: {}", e))?;

        Ok(Self {
            latest,
            frame_sender: Some(frame_sender),
            ready,
            thread_handle: Some(thread_handle),
        })
    }

    fn tracker_thread(
        frame_receiver: Receiver<FrameData>,
        latest: Arc<Mutex<Option<HandObservation>>>,
        gesture: Arc<GestureCell>,
        ready: Arc<AtomicBool>,
    ) {
        log::info!("Hand tracker thread started");

        let mut session = match Self::init_ort() {
            Ok(s) => {
                ready.store(true, Ordering::Release);
                log::info!("ONNX Runtime initialized, hand tracking live");
                Some(s)
            }
            Err(e) => {
                log::warn!("Failed to initialize ONNX Runtime: {}. Hand tracking disabled.", e);
                None
            }
        };

        // Without a model the loop still drains the channel so senders
        // never observe it as stuck-full forever.
        while let Ok(frame) = frame_receiver.recv() {
            let Some(ref mut session) = session else {
                continue;
            };
            match Self::run_landmarks(session, &frame) {
                Ok(Some(observation)) => {
                    gesture.set(observation.label);
                    *latest.lock() = Some(observation);
                }
                Ok(None) => {
                    // No hand in frame. This is a real observation, not a
                    // failure, so it resets the gesture.
                    gesture.set(GestureLabel::Idle);
                    *latest.lock() = None;
                }
                Err(e) => {
                    // One bad frame must not disturb the current gesture.
                    log::warn!("Hand inference error: {}", e);
                }
            }
        }

        ready.store(false, Ordering::Release);
        log::info!("Hand tracker thread stopped");
    }

    /// Initialize ONNX Runtime and load the landmark model.
    fn init_ort() -> Result<ort::session::Session, String> {
        let model_dir = Self::find_model_dir()?;
        log::info!("Model directory: {:?}", model_dir);

        let model_path = model_dir.join(LANDMARK_MODEL);
        if !model_path.exists() {
            return Err(format!("Hand landmark model not found: {:?}", model_path));
        }

        ort::init()
            .with_name("GestureParticles")
            .commit()
            .map_err(|e| format!("Failed to initialize ORT: {}", e))?;

        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create session builder: {}", e))?
            .with_intra_threads(2)
            .map_err(|e| format!("Failed to set threads: {}", e))?
            .commit_from_file(&model_path)
            .map_err(|e| format!("Failed to load landmark model: {}", e))?;

        log::info!("Loaded hand landmark model from {:?}", model_path);
        Ok(session)
    }

    /// Find the models directory, next to the executable or in the working
    /// directory (covers `cargo run` from the repository root).
    fn find_model_dir() -> Result<PathBuf, String> {
        if let Ok(exe_path) = std::env::current_exe() {
            let mut dir = exe_path.parent().map(PathBuf::from);
            for _ in 0..3 {
                if let Some(parent) = dir {
                    let model_dir = parent.join("models");
                    if model_dir.exists() {
                        return Ok(model_dir);
                    }
                    dir = parent.parent().map(PathBuf::from);
                } else {
                    break;
                }
            }
        }

        let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
        let model_dir = cwd.join("models");
        if model_dir.exists() {
            return Ok(model_dir);
        }

        Err("Models directory not found. Create a 'models' directory with hand_landmark.onnx.".to_string())
    }

    /// Run the landmark model on one frame. `Ok(None)` means the frame was
    /// processed fine but no hand cleared the presence threshold.
    fn run_landmarks(
        session: &mut ort::session::Session,
        frame: &FrameData,
    ) -> Result<Option<HandObservation>, String> {
        let input = preprocess_rgba(&frame.data, frame.width, frame.height, INPUT_SIZE);

        // NHWC (1, 224, 224, 3), RGB in [0, 1].
        let input_array = Array4::from_shape_vec(
            (1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3),
            input,
        )
        .map_err(|e| format!("Failed to create input array: {}", e))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| format!("Failed to create tensor: {}", e))?;

        let inputs = ort::inputs![input_tensor]
            .map_err(|e| format!("Failed to build session inputs: {}", e))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| format!("Inference failed: {}", e))?;

        // The PINTO zoo exports name their outputs inconsistently, so go by
        // shape: 63 floats are the landmarks, a "score"-named scalar (or
        // failing that, any scalar) is the presence confidence.
        let mut raw_landmarks: Option<[f32; 63]> = None;
        let mut score: Option<f32> = None;
        let mut scalar_fallback: Option<f32> = None;
        for (name, value) in outputs.iter() {
            let Ok((_shape, data)) = value.try_extract_raw_tensor::<f32>() else {
                continue;
            };
            if data.len() >= 63 {
                if raw_landmarks.is_none() {
                    let mut array = [0.0f32; 63];
                    array.copy_from_slice(&data[..63]);
                    raw_landmarks = Some(array);
                }
            } else if data.len() == 1 {
                if name.contains("score") {
                    score = Some(data[0]);
                } else if scalar_fallback.is_none() {
                    scalar_fallback = Some(data[0]);
                }
            }
        }

        let raw = raw_landmarks.ok_or("No landmark output in model results")?;
        let presence = score.or(scalar_fallback).unwrap_or(0.0);
        if presence < PRESENCE_THRESHOLD {
            return Ok(None);
        }

        let landmarks = normalize_landmarks(&raw, INPUT_SIZE);
        let spread = openness(&landmarks);
        Ok(Some(HandObservation {
            landmarks,
            openness: spread,
            label: classify_openness(spread),
            frame_number: frame.frame_number,
        }))
    }

    /// Send a frame for inference. Never blocks; if the channel is full the
    /// frame is dropped and a later one will be classified instead.
    pub fn process_frame(&self, frame: &[u8], width: u32, height: u32, frame_number: u64) {
        if let Some(ref sender) = self.frame_sender {
            let _ = sender.try_send(FrameData {
                data: frame.to_vec(),
                width,
                height,
                frame_number,
            });
        }
    }

    pub fn latest_observation(&self) -> Option<HandObservation> {
        *self.latest.lock()
    }

    /// True once the model is loaded and classifying.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Stop the inference thread by closing its input channel, then join.
    pub fn stop(&mut self) {
        self.frame_sender = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HandTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Nearest-neighbour resize to a square model input, RGBA to RGB floats in
/// [0, 1], laid out HWC.
fn preprocess_rgba(data: &[u8], width: u32, height: u32, target: u32) -> Vec<f32> {
    let mut output = vec![0.0f32; (target * target * 3) as usize];

    let x_ratio = width as f32 / target as f32;
    let y_ratio = height as f32 / target as f32;

    for y in 0..target {
        for x in 0..target {
            let src_x = (x as f32 * x_ratio) as u32;
            let src_y = (y as f32 * y_ratio) as u32;
            let src_idx = ((src_y * width + src_x) * 4) as usize;

            if src_idx + 2 < data.len() {
                let out_idx = ((y * target + x) * 3) as usize;
                output[out_idx] = data[src_idx] as f32 / 255.0;
                output[out_idx + 1] = data[src_idx + 1] as f32 / 255.0;
                output[out_idx + 2] = data[src_idx + 2] as f32 / 255.0;
            }
        }
    }

    output
}

/// The model reports landmark coordinates in input pixels; scale them back
/// to the [0, 1] range the classifier works in.
fn normalize_landmarks(raw: &[f32; 63], input_size: u32) -> [HandLandmark; LANDMARK_COUNT] {
    let scale = input_size as f32;
    let mut landmarks = [HandLandmark::default(); LANDMARK_COUNT];
    for (i, landmark) in landmarks.iter_mut().enumerate() {
        landmark.x = raw[i * 3] / scale;
        landmark.y = raw[i * 3 + 1] / scale;
        landmark.z = raw[i * 3 + 2] / scale;
    }
    landmarks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        // 2x2 RGBA frame, one red, one green, one blue, one white pixel.
        let data = [
            255, 0, 0, 255, //
            0, 255, 0, 255, //
            0, 0, 255, 255, //
            255, 255, 255, 255,
        ];
        let out = preprocess_rgba(&data, 2, 2, 2);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[0..3], &[1.0, 0.0, 0.0]);
        assert_eq!(&out[3..6], &[0.0, 1.0, 0.0]);
        assert_eq!(&out[6..9], &[0.0, 0.0, 1.0]);
        assert_eq!(&out[9..12], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_preprocess_downsamples_nearest() {
        // 4x1 frame shrunk to 2x1 keeps pixels 0 and 2.
        let data = [
            10, 0, 0, 255, //
            20, 0, 0, 255, //
            30, 0, 0, 255, //
            40, 0, 0, 255,
        ];
        let out = preprocess_rgba(&data, 4, 1, 2);
        assert_eq!(out.len(), 12);
        assert!((out[0] - 10.0 / 255.0).abs() < 1e-6);
        assert!((out[3] - 30.0 / 255.0).abs() < 1e-6);
        // The single source row repeats for the second target row.
        assert_eq!(&out[6..9], &out[0..3]);
        assert_eq!(&out[9..12], &out[3..6]);
    }

    #[test]
    fn test_normalize_landmarks_rescales_pixels() {
        let mut raw = [0.0f32; 63];
        raw[0] = 112.0; // wrist x at frame centre
        raw[1] = 224.0; // wrist y at bottom edge
        raw[2] = -10.0;
        raw[24] = 56.0; // index tip x
        let landmarks = normalize_landmarks(&raw, 224);
        assert!((landmarks[0].x - 0.5).abs() < 1e-6);
        assert!((landmarks[0].y - 1.0).abs() < 1e-6);
        assert!(landmarks[0].z < 0.0);
        assert!((landmarks[8].x - 0.25).abs() < 1e-6);
    }
}
