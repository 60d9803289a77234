use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use ollama_chat::{ChatError, ChatSession, KeyValueStore, Preferences, SessionEvent, Theme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    SystemPrompt,
}

/// Single-line text field with a cursor counted in characters.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    pub text: String,
    pub cursor: usize,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl TextInput {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cursor: text.chars().count(),
        }
    }

    fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.char_count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.char_count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.char_count();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }
}

pub struct App<S> {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub theme: Theme,

    // Chat state
    pub session: ChatSession<S>,
    pub input: TextInput,
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_output: bool,
    pub notice: Option<String>,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Model picker state
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,

    // System prompt editor
    pub system_prompt_input: TextInput,

    // Chat area for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,
}

impl<S: KeyValueStore> App<S> {
    pub fn new(session: ChatSession<S>) -> Self {
        let theme = session.store().theme();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            theme,

            session,
            input: TextInput::default(),
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_output: true,
            notice: None,
            animation_frame: 0,

            show_model_picker: false,
            available_models: Vec::new(),
            model_picker_state: ListState::default(),

            system_prompt_input: TextInput::default(),

            chat_area: None,
        }
    }

    /// Fetch models from the server and select the default.
    pub async fn load_models(&mut self) {
        match self.session.refresh_models().await {
            Ok(models) => {
                if models.is_empty() {
                    self.notice = Some("No models found. Pull a model with: ollama pull llama3.2".to_string());
                } else {
                    self.notice = None;
                }
                self.available_models = models;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch models");
                self.notice = Some(format!("Error: Could not fetch models. Details: {}", e));
            }
        }
    }

    pub fn submit_input(&mut self) {
        match self.session.submit(&self.input.text) {
            Ok(_) => {
                self.input.clear();
                self.notice = None;
                self.follow_output = true;
                self.scroll_chat_to_bottom();
            }
            Err(ChatError::EmptyMessage) => {}
            Err(e) => self.notice = Some(format!("Error: {}", e)),
        }
    }

    pub fn stop_generating(&mut self) {
        self.session.cancel();
    }

    pub fn apply_chat_event(&mut self, update: SessionEvent) {
        if self.session.apply(update) && self.follow_output {
            self.scroll_chat_to_bottom();
        }
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        if let Err(e) = self.session.store_mut().set_theme(self.theme) {
            tracing::warn!(error = %e, "failed to save theme");
        }
    }

    pub fn clear_history(&mut self) {
        self.session.clear();
        self.chat_scroll = 0;
        self.follow_output = true;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_generating() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
        self.follow_output = self.chat_scroll >= max;
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_output = false;
    }

    pub fn scroll_chat_to_bottom(&mut self) {
        self.chat_scroll = self.max_scroll();
        self.follow_output = true;
    }

    fn max_scroll(&self) -> u16 {
        // Defaults until the first render has measured the chat area
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.chat_line_count().saturating_sub(visible_height)
    }

    /// Lines the chat pane needs at the current width, as rendered by `ui`.
    pub fn chat_line_count(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;
        let mut count_text = |text: &str| {
            total_lines += 1; // Role line ("You:" or "AI:")
            for line in text.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                total_lines += char_count.max(1).div_ceil(wrap_width);
            }
            total_lines += 1; // Blank line after message
        };

        for msg in self.session.conversation() {
            count_text(&msg.text);
        }
        if self.session.is_generating() {
            match self.session.streaming_text() {
                Some(text) if !text.is_empty() => count_text(text),
                _ => count_text("Thinking..."),
            }
        }

        total_lines.min(u16::MAX as usize) as u16
    }

    // Model picker methods
    pub fn open_model_picker(&mut self) {
        if self.available_models.is_empty() {
            return;
        }
        // Select current model if in list, otherwise first
        let current_idx = self
            .available_models
            .iter()
            .position(|m| Some(m.as_str()) == self.session.model())
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.show_model_picker = true;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        if let Some(model) = self
            .model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i))
            .cloned()
        {
            self.session.set_model(&model);
            self.show_model_picker = false;
        }
    }

    // System prompt editor
    pub fn open_system_prompt(&mut self) {
        self.system_prompt_input = TextInput::with_text(self.session.system_prompt());
        self.input_mode = InputMode::SystemPrompt;
    }

    pub fn save_system_prompt(&mut self) {
        let prompt = std::mem::take(&mut self.system_prompt_input.text);
        self.session.set_system_prompt(prompt);
        self.system_prompt_input.clear();
        self.input_mode = InputMode::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_input_editing_is_utf8_safe() {
        let mut input = TextInput::default();
        for c in "héllo".chars() {
            input.insert(c);
        }
        input.left();
        input.left();
        input.backspace(); // removes 'l'
        input.insert('L');
        input.home();
        input.delete(); // removes 'h'
        input.end();
        input.insert('!');

        assert_eq!(input.text, "éLlo!");
        assert_eq!(input.cursor, 5);
    }

    #[test]
    fn test_text_input_bounds() {
        let mut input = TextInput::with_text("ab");
        assert_eq!(input.cursor, 2);
        input.right();
        assert_eq!(input.cursor, 2);
        input.delete();
        assert_eq!(input.text, "ab");

        input.home();
        input.left();
        input.backspace();
        assert_eq!(input.text, "ab");
        assert_eq!(input.cursor, 0);

        input.clear();
        assert!(input.text.is_empty());
    }
}
