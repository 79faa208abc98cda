//! Parsing of the text payload sent by the KWin listener script.
//!
//! The payload is a block of `key: value` lines:
//!
//! ```text
//! pid: 4242
//! name: foot
//! class: foot
//! caption: tmux nvim
//! ```

use tracing::debug;

use crate::domain::WindowState;

/// Parse a notification payload into a window state.
///
/// Unknown keys and lines without a `key:` prefix are ignored. Missing fields
/// stay empty, so a garbage payload yields an all-empty window state.
pub fn parse_payload(text: &str) -> WindowState {
    let mut state = WindowState::default();
    let mut recognised = 0usize;

    for line in text.lines() {
        let Some((key, value)) = split_field(line) else {
            continue;
        };

        match key {
            "pid" => {
                recognised += 1;
                state.pid = value.parse().ok();
                if state.pid.is_none() && !value.is_empty() {
                    debug!("Ignoring unparseable pid: {:?}", value);
                }
            }
            "name" => {
                recognised += 1;
                state.name = value.to_string();
            }
            "class" => {
                recognised += 1;
                state.class = value.to_string();
            }
            "caption" => {
                recognised += 1;
                state.caption = value.to_string();
            }
            _ => {}
        }
    }

    if recognised == 0 {
        debug!("No recognisable fields in payload: {:?}", text);
    }

    state
}

/// Split `  key: value  ` into `("key", "value")`.
///
/// The key must be a non-empty run of word characters.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim_start();
    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value.trim()))
}
