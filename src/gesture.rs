//! Gesture classification
//!
//! Turns a set of hand landmarks into one of three discrete labels and holds
//! the latest label in a cell shared between the tracking thread and the
//! render loop. Classification is stateless per observation; missing hands
//! always read as idle rather than holding the previous label.

use std::sync::atomic::{AtomicU8, Ordering};

/// Discrete gesture read from the hand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum GestureLabel {
    /// No hand, or a hand that is neither open nor closed.
    #[default]
    Idle = 0,
    /// Open palm, fingers spread.
    Explode = 1,
    /// Closed fist.
    Tree = 2,
}

impl GestureLabel {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Explode,
            2 => Self::Tree,
            _ => Self::Idle,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Explode => "EXPLODE",
            Self::Tree => "TREE",
        }
    }
}

/// One hand landmark in normalized image coordinates. `x` and `y` are in
/// [0, 1] relative to the frame; `z` is model-relative depth.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Landmark indices (MediaPipe hand topology, 21 points).
pub const WRIST: usize = 0;
pub const THUMB_TIP: usize = 4;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_TIP: usize = 12;
pub const RING_TIP: usize = 16;
pub const PINKY_TIP: usize = 20;

pub const LANDMARK_COUNT: usize = 21;

const FINGERTIPS: [usize; 5] = [THUMB_TIP, INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP];

/// Openness strictly below this reads as a fist.
pub const FIST_OPENNESS: f32 = 0.12;
/// Openness strictly above this reads as an open palm.
pub const OPEN_OPENNESS: f32 = 0.28;

/// Average planar distance from the wrist to the five fingertips. Depth is
/// ignored so the measure is stable as the hand tilts toward the camera.
pub fn openness(landmarks: &[HandLandmark; LANDMARK_COUNT]) -> f32 {
    let wrist = landmarks[WRIST];
    let total: f32 = FINGERTIPS
        .iter()
        .map(|&tip| {
            let point = landmarks[tip];
            (point.x - wrist.x).hypot(point.y - wrist.y)
        })
        .sum();
    total / FINGERTIPS.len() as f32
}

/// Map an openness value to a label. Both thresholds resolve to idle when
/// hit exactly.
pub fn classify_openness(openness: f32) -> GestureLabel {
    if openness < FIST_OPENNESS {
        GestureLabel::Tree
    } else if openness > OPEN_OPENNESS {
        GestureLabel::Explode
    } else {
        GestureLabel::Idle
    }
}

/// Classify one observation. `None` means no hand cleared the presence
/// threshold this frame.
pub fn classify(landmarks: Option<&[HandLandmark; LANDMARK_COUNT]>) -> GestureLabel {
    match landmarks {
        Some(hand) => classify_openness(openness(hand)),
        None => GestureLabel::Idle,
    }
}

/// Latest classified gesture, shared across threads. The tracker replaces
/// the whole label with a single atomic store, so readers never observe a
/// partial update no matter how the two tick rates interleave.
#[derive(Debug, Default)]
pub struct GestureCell(AtomicU8);

impl GestureCell {
    pub fn new(label: GestureLabel) -> Self {
        Self(AtomicU8::new(label as u8))
    }

    pub fn set(&self, label: GestureLabel) {
        self.0.store(label as u8, Ordering::Release);
    }

    pub fn get(&self) -> GestureLabel {
        GestureLabel::from_u8(self.0.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Synthetic hand with every fingertip at the given planar distance
    /// from the wrist.
    fn hand_with_spread(spread: f32) -> [HandLandmark; LANDMARK_COUNT] {
        let mut landmarks = [HandLandmark {
            x: 0.5,
            y: 0.5,
            z: 0.0,
        }; LANDMARK_COUNT];
        for tip in [THUMB_TIP, INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP] {
            landmarks[tip].x = 0.5 + spread;
        }
        landmarks
    }

    #[test]
    fn test_openness_averages_fingertip_distances() {
        let hand = hand_with_spread(0.2);
        assert!((openness(&hand) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_openness_ignores_depth() {
        let mut hand = hand_with_spread(0.2);
        hand[INDEX_TIP].z = 5.0;
        hand[WRIST].z = -5.0;
        assert!((openness(&hand) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_classify_thresholds() {
        let cases = [
            (0.0, GestureLabel::Tree),
            (0.119, GestureLabel::Tree),
            (0.12, GestureLabel::Idle),
            (0.2, GestureLabel::Idle),
            (0.28, GestureLabel::Idle),
            (0.281, GestureLabel::Explode),
            (0.5, GestureLabel::Explode),
        ];
        for (value, expected) in cases {
            assert_eq!(classify_openness(value), expected, "openness {value}");
        }
    }

    #[test]
    fn test_no_hand_is_idle() {
        assert_eq!(classify(None), GestureLabel::Idle);
    }

    #[test]
    fn test_classify_full_hand() {
        assert_eq!(
            classify(Some(&hand_with_spread(0.05))),
            GestureLabel::Tree
        );
        assert_eq!(
            classify(Some(&hand_with_spread(0.35))),
            GestureLabel::Explode
        );
    }

    #[test]
    fn test_cell_round_trip() {
        let cell = GestureCell::default();
        assert_eq!(cell.get(), GestureLabel::Idle);
        cell.set(GestureLabel::Tree);
        assert_eq!(cell.get(), GestureLabel::Tree);
        cell.set(GestureLabel::Explode);
        assert_eq!(cell.get(), GestureLabel::Explode);
    }

    #[test]
    fn test_cell_reads_are_always_a_written_label() {
        let cell = Arc::new(GestureCell::default());
        let writer_cell = cell.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..10_000u32 {
                let label = match i % 3 {
                    0 => GestureLabel::Idle,
                    1 => GestureLabel::Explode,
                    _ => GestureLabel::Tree,
                };
                writer_cell.set(label);
            }
        });
        for _ in 0..10_000 {
            let label = cell.get();
            assert!(matches!(
                label,
                GestureLabel::Idle | GestureLabel::Explode | GestureLabel::Tree
            ));
        }
        writer.join().unwrap();
    }
}
