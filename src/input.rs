// Keyboard camera controller
//
// Tracks which physical keys are held and turns them into a fly-camera
// update on a `Transform`. Movement stays in the xz plane apart from the
// explicit up/down keys.

use glam::Vec3;
use std::collections::HashSet;
use std::f32::consts::TAU;
use winit::event::KeyEvent;
use winit::keyboard::{KeyCode, PhysicalKey};
use crate::scene::Transform;

const PITCH_LIMIT: f32 = 1.5;

#[derive(Debug, Clone, Copy)]
pub struct KeyMappings {
    pub move_left: KeyCode,
    pub move_right: KeyCode,
    pub move_forward: KeyCode,
    pub move_backward: KeyCode,
    pub move_up: KeyCode,
    pub move_down: KeyCode,
    pub look_left: KeyCode,
    pub look_right: KeyCode,
    pub look_up: KeyCode,
    pub look_down: KeyCode,
}

impl Default for KeyMappings {
    fn default() -> Self {
        Self {
            move_left: KeyCode::KeyA,
            move_right: KeyCode::KeyD,
            move_forward: KeyCode::KeyW,
            move_backward: KeyCode::KeyS,
            move_up: KeyCode::KeyE,
            move_down: KeyCode::KeyQ,
            look_left: KeyCode::ArrowLeft,
            look_right: KeyCode::ArrowRight,
            look_up: KeyCode::ArrowUp,
            look_down: KeyCode::ArrowDown,
        }
    }
}

#[derive(Debug)]
pub struct KeyboardMovementController {
    pub keys: KeyMappings,
    pub move_speed: f32,
    pub look_speed: f32,
    pressed: HashSet<KeyCode>,
}

impl Default for KeyboardMovementController {
    fn default() -> Self {
        Self::new(3.0, 1.5)
    }
}

impl KeyboardMovementController {
    pub fn new(move_speed: f32, look_speed: f32) -> Self {
        Self {
            keys: KeyMappings::default(),
            move_speed,
            look_speed,
            pressed: HashSet::new(),
        }
    }

    pub fn handle_key(&mut self, code: KeyCode, pressed: bool) {
        if pressed {
            self.pressed.insert(code);
        } else {
            self.pressed.remove(&code);
        }
    }

    pub fn handle_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.handle_key(code, event.state.is_pressed());
        }
    }

    /// Forget held keys, e.g. when the window loses focus
    pub fn release_all(&mut self) {
        self.pressed.clear();
    }

    pub fn is_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }

    fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        (self.is_pressed(positive) as i32 - self.is_pressed(negative) as i32) as f32
    }

    pub fn move_in_plane_xz(&self, dt: f32, transform: &mut Transform) {
        let keys = self.keys;

        let rotate = Vec3::new(
            self.axis(keys.look_up, keys.look_down),
            self.axis(keys.look_right, keys.look_left),
            0.0,
        );
        if rotate.length_squared() > f32::EPSILON {
            transform.rotation += self.look_speed * dt * rotate.normalize();
        }

        transform.rotation.x = transform.rotation.x.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        transform.rotation.y = transform.rotation.y.rem_euclid(TAU);

        let yaw = transform.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        // -y is up
        let up = Vec3::NEG_Y;

        let move_dir = forward * self.axis(keys.move_forward, keys.move_backward)
            + right * self.axis(keys.move_right, keys.move_left)
            + up * self.axis(keys.move_up, keys.move_down);

        if move_dir.length_squared() > f32::EPSILON {
            transform.translation += self.move_speed * dt * move_dir.normalize();
        }
    }
}

/// Parse a key name from config ("F11", "Escape", "KeyW", single letters or digits)
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let code = match name {
        "Escape" | "Esc" => KeyCode::Escape,
        "Space" => KeyCode::Space,
        "Enter" | "Return" => KeyCode::Enter,
        "Tab" => KeyCode::Tab,
        "Backspace" => KeyCode::Backspace,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F3" => KeyCode::F3,
        "F4" => KeyCode::F4,
        "F5" => KeyCode::F5,
        "F6" => KeyCode::F6,
        "F7" => KeyCode::F7,
        "F8" => KeyCode::F8,
        "F9" => KeyCode::F9,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        _ => {
            let letter = name.strip_prefix("Key").unwrap_or(name);
            let mut chars = letter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => return letter_or_digit(c.to_ascii_uppercase()),
                _ => {
                    let digit = name.strip_prefix("Digit")?;
                    let mut chars = digit.chars();
                    return match (chars.next(), chars.next()) {
                        (Some(c), None) if c.is_ascii_digit() => letter_or_digit(c),
                        _ => None,
                    };
                }
            }
        }
    };
    Some(code)
}

fn letter_or_digit(c: char) -> Option<KeyCode> {
    let code = match c {
        'A' => KeyCode::KeyA,
        'B' => KeyCode::KeyB,
        'C' => KeyCode::KeyC,
        'D' => KeyCode::KeyD,
        'E' => KeyCode::KeyE,
        'F' => KeyCode::KeyF,
        'G' => KeyCode::KeyG,
        'H' => KeyCode::KeyH,
        'I' => KeyCode::KeyI,
        'J' => KeyCode::KeyJ,
        'K' => KeyCode::KeyK,
        'L' => KeyCode::KeyL,
        'M' => KeyCode::KeyM,
        'N' => KeyCode::KeyN,
        'O' => KeyCode::KeyO,
        'P' => KeyCode::KeyP,
        'Q' => KeyCode::KeyQ,
        'R' => KeyCode::KeyR,
        'S' => KeyCode::KeyS,
        'T' => KeyCode::KeyT,
        'U' => KeyCode::KeyU,
        'V' => KeyCode::KeyV,
        'W' => KeyCode::KeyW,
        'X' => KeyCode::KeyX,
        'Y' => KeyCode::KeyY,
        'Z' => KeyCode::KeyZ,
        '0' => KeyCode::Digit0,
        '1' => KeyCode::Digit1,
        '2' => KeyCode::Digit2,
        '3' => KeyCode::Digit3,
        '4' => KeyCode::Digit4,
        '5' => KeyCode::Digit5,
        '6' => KeyCode::Digit6,
        '7' => KeyCode::Digit7,
        '8' => KeyCode::Digit8,
        '9' => KeyCode::Digit9,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn no_keys_leaves_transform_alone() {
        let controller = KeyboardMovementController::default();
        let mut transform = Transform::default();
        controller.move_in_plane_xz(0.016, &mut transform);
        assert_eq!(transform, Transform::default());
    }

    #[test]
    fn forward_moves_along_positive_z_at_move_speed() {
        let mut controller = KeyboardMovementController::new(2.0, 1.0);
        controller.handle_key(KeyCode::KeyW, true);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(0.5, &mut transform);
        assert!(transform.translation.abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn diagonal_movement_is_normalized() {
        let mut controller = KeyboardMovementController::new(1.0, 1.0);
        controller.handle_key(KeyCode::KeyW, true);
        controller.handle_key(KeyCode::KeyD, true);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(1.0, &mut transform);
        assert!((transform.translation.length() - 1.0).abs() < EPS);
        assert!(transform.translation.x > 0.0 && transform.translation.z > 0.0);
    }

    #[test]
    fn up_key_moves_toward_negative_y() {
        let mut controller = KeyboardMovementController::new(1.0, 1.0);
        controller.handle_key(KeyCode::KeyE, true);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(1.0, &mut transform);
        assert!(transform.translation.abs_diff_eq(Vec3::NEG_Y, EPS));
    }

    #[test]
    fn released_key_stops_movement() {
        let mut controller = KeyboardMovementController::default();
        controller.handle_key(KeyCode::KeyS, true);
        controller.handle_key(KeyCode::KeyS, false);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(1.0, &mut transform);
        assert_eq!(transform.translation, Vec3::ZERO);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut controller = KeyboardMovementController::new(1.0, 10.0);
        controller.handle_key(KeyCode::ArrowUp, true);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(1.0, &mut transform);
        assert_eq!(transform.rotation.x, PITCH_LIMIT);
    }

    #[test]
    fn yaw_wraps_into_one_turn() {
        let mut controller = KeyboardMovementController::new(1.0, 1.0);
        controller.handle_key(KeyCode::ArrowLeft, true);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(0.25, &mut transform);
        assert!(transform.rotation.y >= 0.0 && transform.rotation.y < TAU);
        assert!((transform.rotation.y - (TAU - 0.25)).abs() < 1e-4);
    }

    #[test]
    fn parses_config_key_names() {
        assert_eq!(parse_key_code("F11"), Some(KeyCode::F11));
        assert_eq!(parse_key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key_code("KeyR"), Some(KeyCode::KeyR));
        assert_eq!(parse_key_code("r"), Some(KeyCode::KeyR));
        assert_eq!(parse_key_code("Digit7"), Some(KeyCode::Digit7));
        assert_eq!(parse_key_code("Hyper"), None);
        assert_eq!(parse_key_code(""), None);
    }
}
