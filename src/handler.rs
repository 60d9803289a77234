use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use ollama_chat::KeyValueStore;
use crate::app::{App, InputMode, TextInput};
use crate::tui::AppEvent;

pub async fn handle_event<S: KeyValueStore>(app: &mut App<S>, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Chat(update) => app.apply_chat_event(update),
    }
    Ok(())
}

async fn handle_key<S: KeyValueStore>(app: &mut App<S>, key: KeyEvent) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    if app.show_model_picker {
        handle_model_picker(app, key);
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key).await?,
        InputMode::Editing => handle_editing_mode(app, key),
        InputMode::SystemPrompt => handle_system_prompt_mode(app, key),
    }

    Ok(())
}

fn handle_model_picker<S: KeyValueStore>(app: &mut App<S>, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_model_picker = false;
        }
        KeyCode::Char('j') | KeyCode::Down => {
            app.model_picker_nav_down();
        }
        KeyCode::Char('k') | KeyCode::Up => {
            app.model_picker_nav_up();
        }
        KeyCode::Enter => {
            app.select_model();
        }
        _ => {}
    }
}

async fn handle_normal_mode<S: KeyValueStore>(app: &mut App<S>, key: KeyEvent) -> Result<()> {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Back to the input box
        KeyCode::Char('i') | KeyCode::Enter | KeyCode::Tab => {
            app.input_mode = InputMode::Editing;
        }

        // Stop generation
        KeyCode::Char('s') | KeyCode::Esc => {
            if app.session.is_generating() {
                app.stop_generating();
            }
        }

        // Scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('d') | KeyCode::PageDown => app.scroll_down(app.chat_height.max(2) / 2),
        KeyCode::Char('u') | KeyCode::PageUp => app.scroll_up(app.chat_height.max(2) / 2),
        KeyCode::Char('g') => app.scroll_up(u16::MAX),
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),

        // Open model picker with a fresh list from the server
        KeyCode::Char('m') => {
            app.load_models().await;
            app.open_model_picker();
        }

        KeyCode::Char('t') => app.toggle_theme(),
        KeyCode::Char('C') => app.clear_history(),
        KeyCode::Char('p') => app.open_system_prompt(),

        _ => {}
    }
    Ok(())
}

fn handle_editing_mode<S: KeyValueStore>(app: &mut App<S>, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.submit_input();
        }
        _ => edit_text(&mut app.input, key),
    }
}

fn handle_system_prompt_mode<S: KeyValueStore>(app: &mut App<S>, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            // Discard changes
            app.system_prompt_input.clear();
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.save_system_prompt();
        }
        _ => edit_text(&mut app.system_prompt_input, key),
    }
}

fn edit_text(input: &mut TextInput, key: KeyEvent) {
    match key.code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.left(),
        KeyCode::Right => input.right(),
        KeyCode::Home => input.home(),
        KeyCode::End => input.end(),
        KeyCode::Char(c) => input.insert(c),
        _ => {}
    }
}

fn handle_mouse<S: KeyValueStore>(app: &mut App<S>, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}
