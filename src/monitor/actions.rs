//! Input actions run around the capture step of a cycle.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::input::{InputDriver, Key};

/// One configured input action.
///
/// Coordinates follow the region convention: an `x` below 1 means both
/// values are fractions of the screen size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Press { key: String },
    Wait { ms: u64 },
    /// Clicks the center of the grid's target cell.
    ClickTarget,
}

/// Resolves a point to screen pixels.
pub fn resolve_point(x: f64, y: f64, screen: (u32, u32)) -> (i32, i32) {
    if x < 1.0 {
        (
            (x * screen.0 as f64).round() as i32,
            (y * screen.1 as f64).round() as i32,
        )
    } else {
        (x.round() as i32, y.round() as i32)
    }
}

/// Context an action list needs at run time.
#[derive(Clone, Copy, Debug)]
pub struct ActionContext {
    pub screen: Option<(u32, u32)>,
    /// Center of the target grid cell, in pixels.
    pub target: Option<(i32, i32)>,
}

fn point(x: f64, y: f64, ctx: &ActionContext) -> Option<(i32, i32)> {
    match ctx.screen {
        Some(screen) => Some(resolve_point(x, y, screen)),
        None if x >= 1.0 => Some(resolve_point(x, y, (0, 0))),
        None => None,
    }
}

/// Runs actions in order. Anything that cannot be resolved is skipped with
/// a warning; input failures never stop the cycle.
pub fn run_actions(actions: &[Action], driver: &mut dyn InputDriver, ctx: &ActionContext) {
    for action in actions {
        debug!("action: {:?}", action);
        match action {
            Action::Click { x, y } => match point(*x, *y, ctx) {
                Some((px, py)) => driver.click(px, py),
                None => warn!("Skipping click at ({}, {}): screen size unknown", x, y),
            },
            Action::Move { x, y } => match point(*x, *y, ctx) {
                Some((px, py)) => driver.move_to(px, py),
                None => warn!("Skipping move to ({}, {}): screen size unknown", x, y),
            },
            Action::Press { key } => match key.parse::<Key>() {
                Ok(key) => driver.press(key),
                Err(e) => warn!("Skipping press: {}", e),
            },
            Action::Wait { ms } => thread::sleep(Duration::from_millis(*ms)),
            Action::ClickTarget => match ctx.target {
                Some((px, py)) => driver.click(px, py),
                None => warn!("Skipping click_target: no grid target resolved"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl InputDriver for Recorder {
        fn move_to(&mut self, x: i32, y: i32) {
            self.0.push(format!("move {x},{y}"));
        }

        fn click(&mut self, x: i32, y: i32) {
            self.0.push(format!("click {x},{y}"));
        }

        fn press(&mut self, key: Key) {
            self.0.push(format!("press {key}"));
        }
    }

    #[test]
    fn test_resolve_point() {
        assert_eq!(resolve_point(440.0, 220.0, (1920, 1080)), (440, 220));
        assert_eq!(resolve_point(0.5, 0.25, (1920, 1080)), (960, 270));
    }

    #[test]
    fn test_actions_run_in_order() {
        let actions: Vec<Action> = serde_json::from_str(
            r#"[
                {"action": "click", "x": 0.5, "y": 0.5},
                {"action": "wait", "ms": 1},
                {"action": "press", "key": "esc"},
                {"action": "move", "x": 10, "y": 20},
                {"action": "click_target"}
            ]"#,
        )
        .unwrap();
        let ctx = ActionContext {
            screen: Some((200, 100)),
            target: Some((7, 8)),
        };

        let mut recorder = Recorder::default();
        run_actions(&actions, &mut recorder, &ctx);
        assert_eq!(
            recorder.0,
            ["click 100,50", "press Esc", "move 10,20", "click 7,8"]
        );
    }

    #[test]
    fn test_fractional_points_need_screen_size() {
        let actions = [
            Action::Click { x: 0.5, y: 0.5 },
            Action::Click { x: 30.0, y: 40.0 },
            Action::Press {
                key: "nonsense".to_string(),
            },
        ];
        let ctx = ActionContext {
            screen: None,
            target: None,
        };
        let mut recorder = Recorder::default();
        run_actions(&actions, &mut recorder, &ctx);
        assert_eq!(recorder.0, ["click 30,40"]);
    }
}
