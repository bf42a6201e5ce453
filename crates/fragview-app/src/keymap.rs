// SPDX-License-Identifier: CEPL-1.0
use fragview_platform::winit::keyboard::KeyCode;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Close,
    TogglePause,
    ToggleFlipY,
    Reload,
    ToggleFullscreen,
    ToggleDecorations,
    ToggleFloating,
    ResetWindow,
}

/// Key press to action. Lookups are O(1); actions are carried out by the
/// app, which owns all the state they touch.
#[derive(Clone, Debug)]
pub struct Keymap {
    bindings: HashMap<KeyCode, Action>,
}

impl Default for Keymap {
    fn default() -> Self {
        let bindings = [
            (KeyCode::Escape, Action::Close),
            (KeyCode::Space, Action::TogglePause),
            (KeyCode::KeyY, Action::ToggleFlipY),
            (KeyCode::KeyR, Action::Reload),
            (KeyCode::F11, Action::ToggleFullscreen),
            (KeyCode::KeyD, Action::ToggleDecorations),
            (KeyCode::KeyT, Action::ToggleFloating),
            (KeyCode::Backspace, Action::ResetWindow),
        ]
        .into_iter()
        .collect();
        Keymap { bindings }
    }
}

impl Keymap {
    pub fn action(&self, key: KeyCode) -> Option<Action> {
        self.bindings.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bindings() {
        let km = Keymap::default();
        assert_eq!(km.action(KeyCode::Escape), Some(Action::Close));
        assert_eq!(km.action(KeyCode::Space), Some(Action::TogglePause));
        assert_eq!(km.action(KeyCode::KeyY), Some(Action::ToggleFlipY));
        assert_eq!(km.action(KeyCode::KeyR), Some(Action::Reload));
        assert_eq!(km.action(KeyCode::F11), Some(Action::ToggleFullscreen));
        assert_eq!(km.action(KeyCode::KeyD), Some(Action::ToggleDecorations));
        assert_eq!(km.action(KeyCode::KeyT), Some(Action::ToggleFloating));
        assert_eq!(km.action(KeyCode::Backspace), Some(Action::ResetWindow));
        assert_eq!(km.action(KeyCode::KeyQ), None);
    }
}
