//! Window events decoded into a single tagged enum.

use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Pixels treated as one scroll line for touchpads reporting pixel deltas.
pub const PIXELS_PER_SCROLL_LINE: f32 = 20.0;

/// An event the application may care about.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AppEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
    Focused(bool),
    KeyboardInput { key: KeyCode, pressed: bool, repeat: bool },
    CursorMoved { x: f64, y: f64 },
    MouseInput { button: MouseButton, pressed: bool },
    /// Scroll amount in lines.
    MouseWheel { x: f32, y: f32 },
}

impl AppEvent {
    /// Decode a winit event. Events with no counterpart yield `None`.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::Resized(size) => Some(Self::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::CloseRequested => Some(Self::CloseRequested),
            WindowEvent::Focused(focused) => Some(Self::Focused(*focused)),
            WindowEvent::KeyboardInput { event, .. } => {
                Self::key(event.physical_key, event.state, event.repeat)
            }
            WindowEvent::CursorMoved { position, .. } => Some(Self::CursorMoved {
                x: position.x,
                y: position.y,
            }),
            WindowEvent::MouseInput { state, button, .. } => Some(Self::MouseInput {
                button: *button,
                pressed: state.is_pressed(),
            }),
            WindowEvent::MouseWheel { delta, .. } => Some(Self::wheel(*delta)),
            _ => None,
        }
    }

    /// Keyboard event for a physical key. Unidentified keys yield `None`.
    pub fn key(key: PhysicalKey, state: ElementState, repeat: bool) -> Option<Self> {
        match key {
            PhysicalKey::Code(key) => Some(Self::KeyboardInput {
                key,
                pressed: state.is_pressed(),
                repeat,
            }),
            PhysicalKey::Unidentified(_) => None,
        }
    }

    /// Scroll event normalised to lines.
    #[allow(clippy::cast_possible_truncation)]
    pub fn wheel(delta: MouseScrollDelta) -> Self {
        match delta {
            MouseScrollDelta::LineDelta(x, y) => Self::MouseWheel { x, y },
            MouseScrollDelta::PixelDelta(PhysicalPosition { x, y }) => Self::MouseWheel {
                x: x as f32 / PIXELS_PER_SCROLL_LINE,
                y: y as f32 / PIXELS_PER_SCROLL_LINE,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalSize;
    use winit::event::DeviceId;
    use winit::keyboard::NativeKeyCode;

    #[test]
    fn resize_carries_new_size() {
        let event = WindowEvent::Resized(PhysicalSize::new(800, 600));
        assert_eq!(
            AppEvent::from_window_event(&event),
            Some(AppEvent::Resized {
                width: 800,
                height: 600
            })
        );
    }

    #[test]
    fn close_and_focus() {
        assert_eq!(
            AppEvent::from_window_event(&WindowEvent::CloseRequested),
            Some(AppEvent::CloseRequested)
        );
        assert_eq!(
            AppEvent::from_window_event(&WindowEvent::Focused(false)),
            Some(AppEvent::Focused(false))
        );
    }

    #[test]
    fn cursor_and_mouse_buttons() {
        // SAFETY: Dummy ids are only compared, never passed to the platform
        let device_id = unsafe { DeviceId::dummy() };

        let moved = WindowEvent::CursorMoved {
            device_id,
            position: PhysicalPosition::new(10.5, 20.0),
        };
        assert_eq!(
            AppEvent::from_window_event(&moved),
            Some(AppEvent::CursorMoved { x: 10.5, y: 20.0 })
        );

        let click = WindowEvent::MouseInput {
            device_id,
            state: ElementState::Released,
            button: MouseButton::Left,
        };
        assert_eq!(
            AppEvent::from_window_event(&click),
            Some(AppEvent::MouseInput {
                button: MouseButton::Left,
                pressed: false
            })
        );
    }

    #[test]
    fn keys() {
        assert_eq!(
            AppEvent::key(PhysicalKey::Code(KeyCode::KeyW), ElementState::Pressed, false),
            Some(AppEvent::KeyboardInput {
                key: KeyCode::KeyW,
                pressed: true,
                repeat: false
            })
        );
        assert_eq!(
            AppEvent::key(
                PhysicalKey::Unidentified(NativeKeyCode::Unidentified),
                ElementState::Pressed,
                false
            ),
            None
        );
    }

    #[test]
    fn pixel_scroll_is_normalised_to_lines() {
        assert_eq!(
            AppEvent::wheel(MouseScrollDelta::LineDelta(0.0, -1.0)),
            AppEvent::MouseWheel { x: 0.0, y: -1.0 }
        );
        assert_eq!(
            AppEvent::wheel(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 40.0))),
            AppEvent::MouseWheel { x: 0.0, y: 2.0 }
        );
    }

    #[test]
    fn unrelated_events_are_ignored() {
        assert_eq!(AppEvent::from_window_event(&WindowEvent::RedrawRequested), None);
    }
}
