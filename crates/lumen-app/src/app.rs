//! `LumenApp` trait definition.

use crate::event::AppEvent;
use lumen_render::Renderer;

/// Trait for Lumen applications.
///
/// The runner owns the window and the [`Renderer`]; an application only
/// registers assets, creates objects and moves them around.
pub trait LumenApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and renderer exist. Register meshes,
    /// textures, materials and pipelines here.
    fn init(renderer: &mut Renderer) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the time since the last
    /// frame in seconds.
    fn update(&mut self, renderer: &mut Renderer, dt: f32) -> anyhow::Result<()>;

    /// Handle an input or window event.
    ///
    /// Return `true` to stop the runner from handling the event itself.
    #[allow(unused_variables)]
    fn on_event(&mut self, renderer: &mut Renderer, event: &AppEvent) -> bool {
        false
    }

    /// Called before shutdown with the device idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, renderer: &mut Renderer) {}
}
