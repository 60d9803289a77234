//! Small remembered preferences: the selected model and the color theme.

use crate::error::ChatError;
use crate::storage::{KeyValueStore, SELECTED_MODEL_KEY, THEME_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Preference accessors available on every store.
pub trait Preferences: KeyValueStore {
    fn selected_model(&self) -> Option<String> {
        self.get(SELECTED_MODEL_KEY).filter(|m| !m.is_empty())
    }

    fn remember_model(&mut self, model: &str) -> Result<(), ChatError> {
        self.set(SELECTED_MODEL_KEY, model)
    }

    /// Unknown stored values fall back to the default theme.
    fn theme(&self) -> Theme {
        self.get(THEME_KEY)
            .and_then(|t| Theme::from_str(&t))
            .unwrap_or_default()
    }

    fn set_theme(&mut self, theme: Theme) -> Result<(), ChatError> {
        self.set(THEME_KEY, theme.as_str())
    }
}

impl<S: KeyValueStore + ?Sized> Preferences for S {}
