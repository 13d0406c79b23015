use crate::command::{Command, EngineEvent};
use crate::seq::{CaptureEventKind, CaptureInput, EngineController, STEPS_PER_TRACK};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::time::{Duration, Instant};

/// Keyboard row mapped onto one octave of notes, tracker style.
const NOTE_KEYS: &str = "zsxdcvgbhnjm";

/// Monitor application state.
pub struct TuiApp {
    playhead: u32,
    running: bool,
    recording: bool,
    active_track: u8,
    status: String,
    /// Most recent engine feedback lines.
    event_log: Vec<String>,
    /// Base note for the keyboard row.
    octave: u8,
    clock: fn() -> u32,
}

impl TuiApp {
    pub fn new(clock: fn() -> u32) -> Self {
        Self {
            playhead: 0,
            running: false,
            recording: false,
            active_track: 0,
            status: "SPACE=play/stop  r=record  1-8=toggle step  z..m=notes  q=quit".to_string(),
            event_log: Vec::new(),
            octave: 5,
            clock,
        }
    }

    fn log_event(&mut self, line: String) {
        self.event_log.push(line);
        if self.event_log.len() > 6 {
            self.event_log.remove(0);
        }
    }

    fn note_for_key(&self, key: char) -> Option<u8> {
        NOTE_KEYS
            .find(key)
            .map(|idx| (self.octave as usize * 12 + idx).min(127) as u8)
    }
}

/// Run the monitor until the user quits.
pub fn run(mut controller: EngineController, clock: fn() -> u32) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = TuiApp::new(clock);
    let result = run_loop(&mut terminal, &mut app, &mut controller);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TuiApp,
    controller: &mut EngineController,
) -> io::Result<()> {
    let mut last_draw = Instant::now();
    loop {
        while let Some(event) = controller.poll_event() {
            match event {
                EngineEvent::Transport(running) => {
                    app.running = running;
                    app.log_event(if running { "transport: play".into() } else { "transport: stop".into() });
                }
                EngineEvent::Step(_) => {}
                EngineEvent::CaptureCommitted(step) => {
                    app.log_event(format!("captured -> step {}", step));
                }
                EngineEvent::CaptureFailed(err) => {
                    app.log_event(format!("capture failed: {}", err));
                }
            }
        }

        {
            let snapshot = controller.snapshot();
            app.playhead = snapshot.playhead;
            app.running = snapshot.running;
            app.recording = snapshot.recording;
            app.active_track = snapshot.active_track;
        }

        if last_draw.elapsed() >= Duration::from_millis(33) {
            let snapshot = controller.snapshot().clone();
            terminal.draw(|frame| draw(frame, app, &snapshot))?;
            last_draw = Instant::now();
        }

        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char(' ') => {
                        let command = if app.running { Command::Stop } else { Command::Play };
                        controller.send(command);
                    }
                    KeyCode::Char('r') => {
                        controller.send(Command::SetRecording(!app.recording));
                        app.recording = !app.recording;
                    }
                    KeyCode::Char('+') => {
                        app.octave = (app.octave + 1).min(9);
                    }
                    KeyCode::Char('-') => {
                        app.octave = app.octave.saturating_sub(1);
                    }
                    KeyCode::Char(c @ '1'..='8') => {
                        let step = c as usize - '1' as usize;
                        controller.send(Command::ToggleStep(step));
                    }
                    KeyCode::Char(c) => {
                        if let Some(note) = app.note_for_key(c) {
                            let timestamp = (app.clock)();
                            controller.send(Command::Capture(CaptureInput {
                                kind: CaptureEventKind::NoteOn,
                                note,
                                velocity: 100,
                                voice_index: 0,
                                timestamp,
                            }));
                            // Terminal input has no key-up; release right
                            // away and let the length clamp to one step.
                            controller.send(Command::Capture(CaptureInput {
                                kind: CaptureEventKind::NoteOff,
                                note,
                                velocity: 0,
                                voice_index: 0,
                                timestamp,
                            }));
                            app.log_event(format!("note {}", note));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn draw(frame: &mut Frame, app: &TuiApp, snapshot: &crate::seq::GridSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(4),
            Constraint::Length(3),
        ])
        .split(frame.size());

    // Transport line
    let transport = Line::from(vec![
        Span::styled(
            if app.running { " PLAY " } else { " STOP " },
            Style::default()
                .fg(if app.running { Color::Green } else { Color::Red })
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " step {:02}  track {:02}  ",
            app.playhead as usize % STEPS_PER_TRACK,
            app.active_track + 1
        )),
        Span::styled(
            if app.recording { "REC" } else { "   " },
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  octave {}", app.octave)),
    ]);
    frame.render_widget(
        Paragraph::new(transport).block(Block::default().borders(Borders::ALL).title("transport")),
        chunks[0],
    );

    // Step grid: four rows of sixteen.
    let playhead_step = app.playhead as usize % STEPS_PER_TRACK;
    let mut rows = Vec::new();
    for row in 0..4 {
        let mut spans = Vec::new();
        for col in 0..16 {
            let index = row * 16 + col;
            let step = &snapshot.steps[index];
            let symbol = if step.active {
                "[#]"
            } else if step.automation {
                "[a]"
            } else {
                "[ ]"
            };
            let mut style = if step.active {
                Style::default().fg(Color::Yellow)
            } else if step.automation {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            if snapshot.running && index == playhead_step {
                style = style.bg(Color::Blue).fg(Color::White);
            }
            spans.push(Span::styled(symbol, style));
            if col % 4 == 3 {
                spans.push(Span::raw(" "));
            }
        }
        rows.push(Line::from(spans));
    }
    frame.render_widget(
        Paragraph::new(rows).block(Block::default().borders(Borders::ALL).title("steps")),
        chunks[1],
    );

    // Event log
    let log_lines: Vec<Line> = app
        .event_log
        .iter()
        .map(|line| Line::from(line.as_str()))
        .collect();
    frame.render_widget(
        Paragraph::new(log_lines).block(Block::default().borders(Borders::ALL).title("events")),
        chunks[2],
    );

    frame.render_widget(
        Paragraph::new(app.status.as_str())
            .block(Block::default().borders(Borders::ALL).title("help")),
        chunks[3],
    );
}
