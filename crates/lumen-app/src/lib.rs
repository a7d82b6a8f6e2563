//! Application framework for the Lumen renderer.
//!
//! This crate handles the boilerplate around a [`Renderer`]:
//! - Logging initialization
//! - Window creation and the winit event loop
//! - Device context and renderer creation
//! - Decoding window events into [`AppEvent`]
//! - Fatal error teardown
//!
//! # Example
//!
//! ```no_run
//! use lumen_app::{run_app, AppConfig, LumenApp, Renderer};
//!
//! struct MyApp;
//!
//! impl LumenApp for MyApp {
//!     fn init(renderer: &mut Renderer) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, renderer: &mut Renderer, dt: f32) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My app"))
//! }
//! ```

mod app;
mod event;
mod runner;

pub use app::LumenApp;
pub use event::{AppEvent, PIXELS_PER_SCROLL_LINE};
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use glam;
pub use lumen_core::{Transform, Vertex};
pub use lumen_render::{Camera, ObjectHandle, Renderer, RendererConfig};
pub use winit::keyboard::KeyCode;
pub use winit::event::MouseButton;
