//! egui overlay
//!
//! Draws the intro screen before a session starts and, once running, the
//! heads-up layer: gesture indicators, the camera monitor with the tracked
//! hand skeleton, and frame statistics. The overlay never touches App
//! directly; it reads an [`OverlaySnapshot`] built for the frame and hands
//! back an [`OverlayAction`] for the caller to apply.

use crate::camera::CameraStatus;
use crate::gesture::{GestureLabel, HandLandmark, LANDMARK_COUNT};
use crate::tracker::HandObservation;

/// Frame-local copy of everything the overlay renders.
pub struct OverlaySnapshot {
    pub session_active: bool,
    pub label: GestureLabel,
    pub fps: f64,
    pub particle_count: usize,
    pub camera: Option<CameraStatus>,
    pub camera_frames: u64,
    pub tracker_ready: bool,
    pub observation: Option<HandObservation>,
}

/// What the user asked for this frame.
#[derive(Default)]
pub struct OverlayAction {
    pub start_session: bool,
    pub end_session: bool,
    pub reconnect_camera: bool,
}

const GOLD: egui::Color32 = egui::Color32::from_rgb(255, 215, 0);
const EMERALD: egui::Color32 = egui::Color32::from_rgb(80, 200, 120);
const RED: egui::Color32 = egui::Color32::from_rgb(255, 64, 64);

/// Landmark index pairs forming the hand skeleton, wrist at 0, four joints
/// per finger, plus the palm edge.
const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (0, 17),
];

pub fn draw(ctx: &egui::Context, snapshot: &OverlaySnapshot) -> OverlayAction {
    let mut action = OverlayAction::default();

    if !snapshot.session_active {
        draw_intro(ctx, &mut action);
        return action;
    }

    draw_title(ctx, snapshot);
    draw_monitor(ctx, snapshot, &mut action);
    draw_stats(ctx, snapshot);

    action
}

fn draw_intro(ctx: &egui::Context, action: &mut OverlayAction) {
    egui::CentralPanel::default()
        .frame(egui::Frame::NONE.fill(egui::Color32::from_rgb(10, 10, 18)))
        .show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(ui.available_height() * 0.28);
                ui.label(
                    egui::RichText::new("MERRY CHRISTMAS")
                        .size(56.0)
                        .strong()
                        .color(GOLD),
                );
                ui.add_space(8.0);
                ui.label(
                    egui::RichText::new("Gesture-controlled particles")
                        .size(18.0)
                        .color(egui::Color32::from_gray(180)),
                );
                ui.add_space(32.0);
                let start = ui.add_sized(
                    [220.0, 48.0],
                    egui::Button::new(egui::RichText::new("Start").size(22.0)),
                );
                if start.clicked() {
                    action.start_session = true;
                }
                ui.add_space(24.0);
                ui.label(
                    egui::RichText::new("Open hand: scatter      Fist: tree")
                        .size(15.0)
                        .color(EMERALD),
                );
                ui.add_space(4.0);
                ui.label(
                    egui::RichText::new("Space starts, Q ends, 1/2/3 override, R reopens camera")
                        .size(12.0)
                        .color(egui::Color32::from_gray(120)),
                );
            });
        });
}

fn draw_title(ctx: &egui::Context, snapshot: &OverlaySnapshot) {
    egui::Area::new(egui::Id::new("gesture_title"))
        .anchor(egui::Align2::CENTER_TOP, [0.0, 16.0])
        .show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.label(
                    egui::RichText::new("MERRY CHRISTMAS")
                        .size(30.0)
                        .strong()
                        .color(GOLD),
                );

                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    gesture_lamp(ui, "EXPLODE", snapshot.label == GestureLabel::Explode, RED);
                    ui.add_space(18.0);
                    gesture_lamp(ui, "TREE", snapshot.label == GestureLabel::Tree, EMERALD);
                });
            });
        });
}

/// One gesture indicator: a filled dot when active, a hollow ring when not.
fn gesture_lamp(ui: &mut egui::Ui, text: &str, active: bool, color: egui::Color32) {
    let (rect, _) = ui.allocate_exact_size(egui::vec2(14.0, 14.0), egui::Sense::hover());
    let center = rect.center();
    let painter = ui.painter();
    if active {
        painter.circle_filled(center, 6.0, color);
    } else {
        painter.circle_stroke(center, 6.0, egui::Stroke::new(1.5, color.gamma_multiply(0.5)));
    }
    let label_color = if active {
        color
    } else {
        egui::Color32::from_gray(130)
    };
    ui.label(egui::RichText::new(text).size(14.0).color(label_color));
}

fn draw_monitor(ctx: &egui::Context, snapshot: &OverlaySnapshot, action: &mut OverlayAction) {
    egui::Window::new("Monitor")
        .anchor(egui::Align2::LEFT_BOTTOM, [16.0, -16.0])
        .resizable(false)
        .collapsible(false)
        .title_bar(false)
        .show(ctx, |ui| {
            ui.horizontal(|ui| {
                let (color, text) = match &snapshot.camera {
                    Some(CameraStatus::Active { name, .. }) => (EMERALD, name.clone()),
                    Some(CameraStatus::Connecting) => (GOLD, "Connecting".to_string()),
                    Some(CameraStatus::Failed(_)) => (RED, "Camera failed".to_string()),
                    None => (RED, "No camera".to_string()),
                };
                let (rect, _) =
                    ui.allocate_exact_size(egui::vec2(10.0, 10.0), egui::Sense::hover());
                ui.painter().circle_filled(rect.center(), 4.0, color);
                ui.label(egui::RichText::new(text).size(12.0));
            });

            let (rect, _) =
                ui.allocate_exact_size(egui::vec2(192.0, 144.0), egui::Sense::hover());
            let painter = ui.painter_at(rect);
            painter.rect_filled(rect, 4.0, egui::Color32::from_gray(18));

            match &snapshot.camera {
                Some(CameraStatus::Active { .. }) => {
                    if let Some(obs) = &snapshot.observation {
                        paint_hand(&painter, rect, &obs.landmarks);
                        painter.text(
                            rect.left_bottom() + egui::vec2(6.0, -6.0),
                            egui::Align2::LEFT_BOTTOM,
                            format!("openness {:.2}", obs.openness),
                            egui::FontId::monospace(11.0),
                            egui::Color32::from_gray(160),
                        );
                    } else {
                        let text = if snapshot.tracker_ready {
                            "No hand"
                        } else {
                            "Loading model"
                        };
                        painter.text(
                            rect.center(),
                            egui::Align2::CENTER_CENTER,
                            text,
                            egui::FontId::proportional(13.0),
                            egui::Color32::from_gray(120),
                        );
                    }
                }
                Some(CameraStatus::Connecting) => {
                    painter.text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        "Opening camera",
                        egui::FontId::proportional(13.0),
                        egui::Color32::from_gray(120),
                    );
                }
                Some(CameraStatus::Failed(err)) => {
                    painter.text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        err,
                        egui::FontId::proportional(11.0),
                        RED,
                    );
                }
                None => {
                    painter.text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        "Camera unavailable",
                        egui::FontId::proportional(13.0),
                        egui::Color32::from_gray(120),
                    );
                }
            }

            if matches!(snapshot.camera, Some(CameraStatus::Failed(_)) | None)
                && ui.button("Retry camera").clicked()
            {
                action.reconnect_camera = true;
            }
        });
}

/// Draw the tracked hand into the monitor rect. Landmarks are normalized to
/// the capture frame; x is mirrored so the preview behaves like a mirror.
fn paint_hand(painter: &egui::Painter, rect: egui::Rect, landmarks: &[HandLandmark; LANDMARK_COUNT]) {
    let project = |lm: &HandLandmark| {
        egui::pos2(
            rect.left() + (1.0 - lm.x) * rect.width(),
            rect.top() + lm.y * rect.height(),
        )
    };

    let stroke = egui::Stroke::new(1.5, egui::Color32::WHITE);
    for (a, b) in HAND_CONNECTIONS {
        painter.line_segment([project(&landmarks[a]), project(&landmarks[b])], stroke);
    }
    for lm in landmarks {
        painter.circle_filled(project(lm), 2.0, GOLD);
    }
}

fn draw_stats(ctx: &egui::Context, snapshot: &OverlaySnapshot) {
    egui::Area::new(egui::Id::new("gesture_stats"))
        .anchor(egui::Align2::RIGHT_BOTTOM, [-16.0, -16.0])
        .show(ctx, |ui| {
            ui.label(
                egui::RichText::new(format!(
                    "{:.0} fps   {} particles   {} frames",
                    snapshot.fps, snapshot.particle_count, snapshot.camera_frames
                ))
                .size(12.0)
                .color(egui::Color32::from_gray(140)),
            );
        });
}
