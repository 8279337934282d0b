//! Gesture Particles - gesture-driven particle morphing with bloom
//!
//! Captures camera input, classifies the hand gesture with an ONNX landmark
//! model, and morphs a particle field between formations. Rendering is
//! instanced wgpu with a bloom post chain; the HUD is egui.

pub mod animator;
pub mod app;
pub mod camera;
pub mod config;
pub mod formation;
pub mod gesture;
pub mod mesh;
pub mod overlay;
pub mod tracker;

pub use app::App;
