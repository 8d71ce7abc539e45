use crossbeam::channel::Receiver;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use midi_session::message::NOTE_ON;
use midi_session::{note_name, EventCallback, MidiEvent, PollerEvent};
use std::collections::VecDeque;
use std::time::Instant;

const MAX_LOG_MESSAGES: usize = 100;
const MAX_OCTAVE: u8 = 9;
const VELOCITY_STEP: u8 = 20;

/// Computer keys mapped to one chromatic octave, C to C.
pub const KEYBOARD_KEYS: [char; 13] = [
    'a', 'w', 's', 'e', 'd', 'f', 't', 'g', 'z', 'h', 'u', 'j', 'k',
];

/// State of the `show` screen.
pub struct App {
    pub last_note: Option<String>,
    pub log_messages: VecDeque<String>,
    pub octave: u8,
    pub velocity: u8,
    pub use_keyboard: bool,
    pub devices: String,
    pub should_quit: bool,

    // Terminal reports key releases; otherwise a second press releases.
    release_events: bool,
    pressed: Vec<(char, u8)>,
    callback: Option<EventCallback>,
    event_rx: Receiver<MidiEvent>,
    reports_rx: Receiver<PollerEvent>,
    start: Instant,
}

impl App {
    pub fn new(
        callback: Option<EventCallback>,
        event_rx: Receiver<MidiEvent>,
        reports_rx: Receiver<PollerEvent>,
        use_keyboard: bool,
        release_events: bool,
    ) -> Self {
        Self {
            last_note: None,
            log_messages: VecDeque::new(),
            octave: 5,
            velocity: 127,
            use_keyboard,
            devices: String::new(),
            should_quit: false,
            release_events,
            pressed: Vec::new(),
            callback,
            event_rx,
            reports_rx,
            start: Instant::now(),
        }
    }

    /// Drains events delivered by the session callback and poller reports.
    pub fn process_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            if event.is_note_on() {
                self.last_note = Some(note_name(event.data1()));
            }
            self.add_log(event.to_string());
        }

        while let Ok(report) = self.reports_rx.try_recv() {
            match report {
                PollerEvent::Stopped { error: None } => {}
                report => self.add_log(format!("ERROR: {}", report)),
            }
        }
    }

    pub fn add_log(&mut self, msg: String) {
        self.log_messages.push_back(msg);
        if self.log_messages.len() > MAX_LOG_MESSAGES {
            self.log_messages.pop_front();
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.kind {
            KeyEventKind::Press => {}
            KeyEventKind::Release => {
                if let KeyCode::Char(c) = key.code {
                    self.release(c);
                }
                return;
            }
            KeyEventKind::Repeat => return,
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.quit(),
            KeyCode::Char('q') | KeyCode::Esc => self.quit(),
            KeyCode::Char(c) if self.use_keyboard => self.handle_char(c),
            _ => {}
        }
    }

    fn handle_char(&mut self, c: char) {
        match c {
            'y' => self.octave = self.octave.saturating_sub(1),
            'x' => self.octave = (self.octave + 1).min(MAX_OCTAVE),
            'c' => self.velocity = self.velocity.saturating_sub(VELOCITY_STEP),
            'v' => self.velocity = (self.velocity + VELOCITY_STEP).min(127),
            _ => {
                if let Some(offset) = KEYBOARD_KEYS.iter().position(|k| *k == c) {
                    self.press(c, offset as u8);
                }
            }
        }
    }

    fn press(&mut self, c: char, offset: u8) {
        if self.pressed.iter().any(|(key, _)| *key == c) {
            if !self.release_events {
                self.release(c);
            }
            return;
        }

        let pitch = self.octave * 12 + offset;
        self.pressed.push((c, pitch));
        self.emit(pitch, self.velocity);
    }

    fn release(&mut self, c: char) {
        if let Some(pos) = self.pressed.iter().position(|(key, _)| *key == c) {
            let (_, pitch) = self.pressed.remove(pos);
            self.emit(pitch, 0);
        }
    }

    /// Releases every held key.
    pub fn release_all(&mut self) {
        while let Some((c, _)) = self.pressed.first().copied() {
            self.release(c);
        }
    }

    /// Sends a keyboard note through the session callback, exactly as if it
    /// had arrived from an input device.
    fn emit(&mut self, pitch: u8, velocity: u8) {
        let timestamp = self.start.elapsed().as_millis() as u32;
        let event = MidiEvent::synthetic(NOTE_ON, pitch, velocity, 0, timestamp);
        let result = match &self.callback {
            Some(callback) => callback(&event),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.add_log(format!("ERROR: {:#}", e));
        }
    }

    pub fn held_notes(&self) -> Vec<u8> {
        self.pressed.iter().map(|(_, pitch)| *pitch).collect()
    }

    pub fn uses_release_events(&self) -> bool {
        self.release_events
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Sender};
    use midi_session::callback;

    fn app(release_events: bool) -> (App, Receiver<MidiEvent>, Sender<PollerEvent>) {
        let (event_tx, event_rx) = channel::unbounded();
        let (seen_tx, seen_rx) = channel::unbounded();
        let (reports_tx, reports_rx) = channel::unbounded();
        let cb = callback(move |event| {
            event_tx.send(*event)?;
            seen_tx.send(*event)?;
            Ok(())
        });
        let app = App::new(Some(cb), event_rx, reports_rx, true, release_events);
        (app, seen_rx, reports_tx)
    }

    fn press(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    fn release(c: char) -> KeyEvent {
        KeyEvent::new_with_kind(KeyCode::Char(c), KeyModifiers::NONE, KeyEventKind::Release)
    }

    #[test]
    fn test_keyboard_plays_through_callback() {
        let (mut app, seen, _reports) = app(true);
        app.handle_key(press('a'));
        app.handle_key(press('k'));
        app.handle_key(release('a'));

        let events: Vec<_> = seen.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!((events[0].data1(), events[0].data2()), (60, 127));
        assert_eq!((events[1].data1(), events[1].data2()), (72, 127));
        assert!(events[2].is_note_off());
        assert_eq!(events[2].data1(), 60);
        assert!(events.iter().all(|e| e.device().is_none()));

        app.process_events();
        assert_eq!(app.last_note.as_deref(), Some("C5"));
        assert_eq!(app.log_messages.len(), 3);
        assert_eq!(app.held_notes(), vec![72]);
    }

    #[test]
    fn test_second_press_releases_without_release_events() {
        let (mut app, seen, _reports) = app(false);
        app.handle_key(press('w'));
        app.handle_key(press('w'));

        let events: Vec<_> = seen.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_note_on());
        assert!(events[1].is_note_off());
        assert!(app.held_notes().is_empty());
    }

    #[test]
    fn test_octave_and_velocity_limits() {
        let (mut app, seen, _reports) = app(true);
        for _ in 0..12 {
            app.handle_key(press('x'));
        }
        assert_eq!(app.octave, 9);
        for _ in 0..12 {
            app.handle_key(press('y'));
        }
        assert_eq!(app.octave, 0);

        app.handle_key(press('v'));
        assert_eq!(app.velocity, 127);
        for _ in 0..8 {
            app.handle_key(press('c'));
        }
        assert_eq!(app.velocity, 0);

        app.handle_key(press('s'));
        let event = seen.try_recv().unwrap();
        assert_eq!(event.data1(), 2);
        assert_eq!(event.data2(), 0);
    }

    #[test]
    fn test_pitch_uses_octave_at_press() {
        let (mut app, seen, _reports) = app(true);
        app.handle_key(press('a'));
        app.handle_key(press('x'));
        app.handle_key(release('a'));

        let events: Vec<_> = seen.try_iter().collect();
        assert_eq!(events[1].data1(), events[0].data1());
    }

    #[test]
    fn test_release_all_and_quit() {
        let (mut app, seen, _reports) = app(true);
        app.handle_key(press('a'));
        app.handle_key(press('d'));
        app.release_all();
        assert!(app.held_notes().is_empty());
        assert_eq!(seen.try_iter().filter(|e| e.is_note_off()).count(), 2);

        app.handle_key(press('q'));
        assert!(app.should_quit);
    }

    #[test]
    fn test_reports_are_logged() {
        let (mut app, _seen, reports) = app(true);
        reports
            .send(PollerEvent::Stopped {
                error: Some(midi_session::MidiError::Transport("gone".into())),
            })
            .unwrap();
        reports.send(PollerEvent::Stopped { error: None }).unwrap();
        app.process_events();
        assert_eq!(app.log_messages.len(), 1);
        assert!(app.log_messages[0].contains("gone"));
    }
}
