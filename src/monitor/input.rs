//! Mouse and keyboard injection.
//!
//! Input is fire-and-forget: drivers log failures and never report them
//! back to the pipeline.
//! - Windows: `SendInput` with absolute, normalized coordinates
//! - Elsewhere: a driver that only logs what it would have done

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

/// A key that input actions can press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
    Tab,
    Space,
    Backspace,
    Left,
    Up,
    Right,
    Down,
    /// F1 to F12.
    Function(u8),
    /// An ASCII letter or digit, stored uppercase.
    Char(char),
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown key '{0}'")]
pub struct UnknownKey(pub String);

impl FromStr for Key {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let key = match lower.as_str() {
            "esc" | "escape" => Key::Escape,
            "enter" | "return" => Key::Enter,
            "tab" => Key::Tab,
            "space" => Key::Space,
            "backspace" => Key::Backspace,
            "left" => Key::Left,
            "up" => Key::Up,
            "right" => Key::Right,
            "down" => Key::Down,
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.as_str()) {
                    (Some(c), "") if c.is_ascii_alphanumeric() => {
                        Key::Char(c.to_ascii_uppercase())
                    }
                    (Some('f'), digits) => match digits.parse::<u8>() {
                        Ok(n @ 1..=12) => Key::Function(n),
                        _ => return Err(UnknownKey(s.to_string())),
                    },
                    _ => return Err(UnknownKey(s.to_string())),
                }
            }
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Escape => write!(f, "Esc"),
            Key::Enter => write!(f, "Enter"),
            Key::Tab => write!(f, "Tab"),
            Key::Space => write!(f, "Space"),
            Key::Backspace => write!(f, "Backspace"),
            Key::Left => write!(f, "Left"),
            Key::Up => write!(f, "Up"),
            Key::Right => write!(f, "Right"),
            Key::Down => write!(f, "Down"),
            Key::Function(n) => write!(f, "F{}", n),
            Key::Char(c) => write!(f, "{}", c),
        }
    }
}

impl Key {
    /// Windows virtual-key code.
    pub fn virtual_key(&self) -> u16 {
        match *self {
            Key::Escape => 0x1B,
            Key::Enter => 0x0D,
            Key::Tab => 0x09,
            Key::Space => 0x20,
            Key::Backspace => 0x08,
            Key::Left => 0x25,
            Key::Up => 0x26,
            Key::Right => 0x27,
            Key::Down => 0x28,
            Key::Function(n) => 0x6F + n as u16,
            // VK codes for 0-9 and A-Z match their ASCII values
            Key::Char(c) => c as u16,
        }
    }
}

/// Injects input into whatever application has focus.
pub trait InputDriver: Send {
    fn move_to(&mut self, x: i32, y: i32);

    fn click(&mut self, x: i32, y: i32);

    fn press(&mut self, key: Key);
}

/// Records actions in the log and does nothing else.
#[derive(Default)]
pub struct LoggingDriver;

impl InputDriver for LoggingDriver {
    fn move_to(&mut self, x: i32, y: i32) {
        info!("input: move to ({}, {})", x, y);
    }

    fn click(&mut self, x: i32, y: i32) {
        info!("input: click at ({}, {})", x, y);
    }

    fn press(&mut self, key: Key) {
        info!("input: press {}", key);
    }
}

#[cfg(windows)]
pub use self::windows_input::SendInputDriver;

#[cfg(windows)]
mod windows_input {
    use std::time::Duration;
    use tracing::{debug, warn};

    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
        KEYEVENTF_KEYUP, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
        MOUSEEVENTF_MOVE, MOUSE_EVENT_FLAGS, MOUSEINPUT, VIRTUAL_KEY,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

    use super::{InputDriver, Key};

    /// Simulates hardware-level input with `SendInput`.
    ///
    /// Moves the real cursor.
    #[derive(Default)]
    pub struct SendInputDriver;

    /// Normalizes screen pixels to the 0-65535 range `MOUSEEVENTF_ABSOLUTE` expects.
    fn normalize(x: i32, y: i32) -> (i32, i32) {
        let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) }.max(1);
        let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) }.max(1);
        let norm_x = ((x as i64 * 65535) / screen_width as i64) as i32;
        let norm_y = ((y as i64 * 65535) / screen_height as i64) as i32;
        (norm_x, norm_y)
    }

    fn send(inputs: &[INPUT], what: &str) {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            warn!("SendInput {}: {} of {} inputs sent", what, sent, inputs.len());
        } else {
            debug!("SendInput {}: ok", what);
        }
    }

    fn mouse(x: i32, y: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        let (dx, dy) = normalize(x, y);
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    dwFlags: flags | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_MOVE,
                    ..Default::default()
                },
            },
        }
    }

    fn keyboard(key: Key, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(key.virtual_key()),
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        }
    }

    impl InputDriver for SendInputDriver {
        fn move_to(&mut self, x: i32, y: i32) {
            send(&[mouse(x, y, MOUSE_EVENT_FLAGS(0))], "move");
        }

        fn click(&mut self, x: i32, y: i32) {
            send(&[mouse(x, y, MOUSE_EVENT_FLAGS(0))], "move");
            std::thread::sleep(Duration::from_millis(30));
            send(&[mouse(x, y, MOUSEEVENTF_LEFTDOWN)], "mouse down");
            std::thread::sleep(Duration::from_millis(30));
            send(&[mouse(x, y, MOUSEEVENTF_LEFTUP)], "mouse up");
        }

        fn press(&mut self, key: Key) {
            send(
                &[
                    keyboard(key, KEYBD_EVENT_FLAGS(0)),
                    keyboard(key, KEYEVENTF_KEYUP),
                ],
                "key press",
            );
        }
    }
}

/// The platform's real input driver.
pub fn default_driver() -> Box<dyn InputDriver> {
    #[cfg(windows)]
    {
        Box::new(SendInputDriver)
    }
    #[cfg(not(windows))]
    {
        info!("No input injection on this platform; actions are only logged");
        Box::new(LoggingDriver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_keys() {
        assert_eq!("esc".parse::<Key>().unwrap(), Key::Escape);
        assert_eq!("Escape".parse::<Key>().unwrap(), Key::Escape);
        assert_eq!(" Enter ".parse::<Key>().unwrap(), Key::Enter);
        assert_eq!("F7".parse::<Key>().unwrap(), Key::Function(7));
        assert_eq!("a".parse::<Key>().unwrap(), Key::Char('A'));
        assert_eq!("5".parse::<Key>().unwrap(), Key::Char('5'));
    }

    #[test]
    fn test_parse_unknown_keys() {
        assert!("f13".parse::<Key>().is_err());
        assert!("f".parse::<Key>().is_ok()); // the letter F
        assert!("ctrl".parse::<Key>().is_err());
        assert_eq!("".parse::<Key>(), Err(UnknownKey(String::new())));
    }

    #[test]
    fn test_virtual_key_codes() {
        assert_eq!(Key::Escape.virtual_key(), 0x1B);
        assert_eq!(Key::Function(1).virtual_key(), 0x70);
        assert_eq!(Key::Function(12).virtual_key(), 0x7B);
        assert_eq!(Key::Char('A').virtual_key(), 0x41);
    }

    #[test]
    fn test_key_display_round_trips() {
        for name in ["Esc", "F7", "Q", "Down"] {
            let key: Key = name.parse().unwrap();
            assert_eq!(key.to_string(), name);
        }
    }
}
