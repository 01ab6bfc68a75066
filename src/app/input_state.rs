use glam::{Vec2, Vec4};
use winit::event::{ElementState, MouseButton, WindowEvent};

/// Pointer state exposed to the toy shader.
///
/// While the left button is held the position follows the cursor, clamped to the
/// window; releasing the button clears everything.
#[derive(Debug, Default)]
pub struct PointerState {
    pub position: Vec2,
    pub click: f32,
    cursor: Vec2,
    left_down: bool,
}

impl PointerState {
    pub fn process_window_events(&mut self, event: &WindowEvent, window_size: Vec2) {
        match event {
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => self.press(window_size),
                ElementState::Released => self.release(),
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.move_to(Vec2::new(position.x as f32, position.y as f32), window_size);
            }
            WindowEvent::CursorLeft { .. } | WindowEvent::Focused(false) => {
                // A release outside the window is never delivered
                if self.left_down {
                    self.release();
                }
            }
            _ => {}
        }
    }

    fn press(&mut self, window_size: Vec2) {
        self.left_down = true;
        self.click = 1.0;
        self.position = self.cursor.clamp(Vec2::ZERO, window_size.max(Vec2::ZERO));
    }

    fn release(&mut self) {
        *self = Self {
            cursor: self.cursor,
            ..Self::default()
        };
    }

    fn move_to(&mut self, cursor: Vec2, window_size: Vec2) {
        self.cursor = cursor;
        if self.left_down {
            self.position = cursor.clamp(Vec2::ZERO, window_size.max(Vec2::ZERO));
        }
    }

    /// x, y, click, click
    pub fn as_vec4(&self) -> Vec4 {
        Vec4::new(self.position.x, self.position.y, self.click, self.click)
    }
}
