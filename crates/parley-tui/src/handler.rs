use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use parley_core::GateView;
use crate::app::App;
use crate::tui::AppEvent;

const WHEEL_LINES: u16 = 3;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize => {}
        AppEvent::Tick => app.on_tick(),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any view
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }
    if key.code == KeyCode::Esc {
        app.should_quit = true;
        return;
    }

    match app.view {
        GateView::Chat => handle_chat_key(app, key),
        GateView::Notice(_) | GateView::Preparing => handle_gated_key(app, key),
    }
}

fn handle_gated_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('r') => app.refresh_availability(),
        _ => {}
    }
}

fn handle_chat_key(app: &mut App, key: KeyEvent) {
    // Scrolling works while a request is in flight
    match key.code {
        KeyCode::PageUp => {
            let page = app.page();
            app.scroll_up(page);
            return;
        }
        KeyCode::PageDown => {
            let page = app.page();
            app.scroll_down(page);
            return;
        }
        KeyCode::Up => {
            app.scroll_up(1);
            return;
        }
        KeyCode::Down => {
            app.scroll_down(1);
            return;
        }
        _ => {}
    }

    if key.code == KeyCode::Enter {
        app.submit();
        return;
    }

    let Some(session) = app.session.as_mut() else {
        return;
    };

    // The session ignores edits while busy
    match key.code {
        KeyCode::Backspace => session.backspace(),
        KeyCode::Delete => session.delete(),
        KeyCode::Left => session.cursor_left(),
        KeyCode::Right => session.cursor_right(),
        KeyCode::Home => session.cursor_home(),
        KeyCode::End => session.cursor_end(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => session.insert_char(c),
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    if app.view != GateView::Chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(WHEEL_LINES),
        MouseEventKind::ScrollUp => app.scroll_up(WHEEL_LINES),
        _ => {}
    }
}
