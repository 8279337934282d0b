//! Camera capture
//!
//! Cross-platform webcam capture on a background thread via nokhwa. The
//! capture loop triple-buffers decoded RGBA frames so the render thread can
//! always grab the latest complete one without blocking the device. Opening
//! the device is retried a bounded number of times before the capture gives
//! up and reports failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

/// Device open attempts before giving up.
const OPEN_ATTEMPTS: u32 = 3;
/// Pause between open attempts.
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One decoded camera frame.
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic frame counter, used to skip frames already processed.
    pub frame_number: u64,
    pub timestamp: Instant,
}

/// Where the capture currently stands. Written by the capture thread, read
/// by the overlay every tick.
#[derive(Clone, Debug)]
pub enum CameraStatus {
    /// Still trying to open the device.
    Connecting,
    /// Streaming frames.
    Active {
        name: String,
        width: u32,
        height: u32,
    },
    /// All open attempts failed; the session keeps running without a hand.
    Failed(String),
}

/// Information about an available capture device.
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

pub struct CameraCapture {
    /// Latest decoded frames, triple buffered.
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    /// Slot index of the latest complete frame.
    latest_frame_idx: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<CameraStatus>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// Enumerate capture devices for startup logging and diagnostics.
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(camera_list) => camera_list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Spawn the capture thread for the given device. Returns immediately;
    /// progress is visible through `status()`.
    pub fn new(camera_index: u32, width: u32, height: u32) -> Result<Self, String> {
        let frames: [Arc<Mutex<Option<CameraFrame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(Mutex::new(CameraStatus::Connecting));
        let frame_count = Arc::new(AtomicU64::new(0));

        let frames_clone = frames.clone();
        let latest_frame_idx_clone = latest_frame_idx.clone();
        let running_clone = running.clone();
        let status_clone = status.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    camera_index,
                    width,
                    height,
                    frames_clone,
                    latest_frame_idx_clone,
                    running_clone,
                    status_clone,
                    frame_count_clone,
                );
            })
            .map_err(|e| format!("Failed to spawn capture thread: {}", e))?;

        Ok(Self {
            frames,
            latest_frame_idx,
            running,
            status,
            thread_handle: Some(thread_handle),
            frame_count,
        })
    }

    /// Try the requested resolution first, then whatever the device offers.
    fn open_camera(camera_index: u32, width: u32, height: u32) -> Result<Camera, String> {
        let index = CameraIndex::Index(camera_index);

        let preferred = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));
        let mut camera = match Camera::new(index.clone(), preferred) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to open camera at {width}x{height}: {:?}", e);

                let fallback = RequestedFormat::new::<RgbAFormat>(
                    RequestedFormatType::AbsoluteHighestResolution,
                );
                match Camera::new(index.clone(), fallback) {
                    Ok(c) => c,
                    Err(e2) => {
                        log::warn!("Failed with highest resolution: {:?}", e2);

                        // Last resort: let the backend pick everything.
                        let any = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
                        Camera::new(index, any)
                            .map_err(|e3| format!("all format attempts failed: {:?}", e3))?
                    }
                }
            }
        };

        camera
            .open_stream()
            .map_err(|e| format!("failed to open stream: {:?}", e))?;
        Ok(camera)
    }

    #[allow(clippy::too_many_arguments)]
    fn capture_thread(
        camera_index: u32,
        width: u32,
        height: u32,
        frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
        latest_frame_idx: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        status: Arc<Mutex<CameraStatus>>,
        frame_count: Arc<AtomicU64>,
    ) {
        log::info!("Starting camera capture thread (camera {})", camera_index);

        let mut camera = None;
        for attempt in 1..=OPEN_ATTEMPTS {
            if !running.load(Ordering::Acquire) {
                return;
            }
            match Self::open_camera(camera_index, width, height) {
                Ok(c) => {
                    camera = Some(c);
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "Camera open attempt {}/{} failed: {}",
                        attempt,
                        OPEN_ATTEMPTS,
                        e
                    );
                    if attempt == OPEN_ATTEMPTS {
                        *status.lock() = CameraStatus::Failed(e);
                        return;
                    }
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
        let Some(mut camera) = camera else { return };

        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );
        *status.lock() = CameraStatus::Active {
            name: camera.info().human_name().to_string(),
            width: camera.resolution().width(),
            height: camera.resolution().height(),
        };

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);

                        let camera_frame = CameraFrame {
                            data: image.into_raw(),
                            width: frame.resolution().width(),
                            height: frame.resolution().height(),
                            frame_number: frame_num,
                            timestamp: Instant::now(),
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(camera_frame);

                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        log::info!("Camera capture thread stopped");
    }

    /// Latest complete frame, if any has arrived yet.
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    pub fn status(&self) -> CameraStatus {
        self.status.lock().clone()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop the capture thread and release the device. Blocks until the
    /// thread has joined, so the device is free once this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
