//! # Console Bus Monitor
//!
//! Interactive terminal view of a running machine's serial buses.
//!
//! ## Features
//! - Live effective state of every line
//! - Host baseline and per-device driven lines
//! - Recent host-visible transitions
//! - Host-side line toggling and reset pulses

use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line as TextLine, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::bus::{IecBus, Source};
use crate::line::{parse_assignment, Line, LineVector};
use crate::system_config::Machine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub refresh_rate_ms: u64,
    pub show_participants: bool,
    pub show_events: bool,
    pub max_events: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 50,
            show_participants: true,
            show_events: true,
            max_events: 32,
        }
    }
}

type EventLog = Rc<RefCell<VecDeque<String>>>;

pub struct ConsoleApp<'a> {
    machine: &'a Machine,
    config: ConsoleConfig,
    running: bool,
    command_buffer: String,
    show_help: bool,
    selected_bus: usize,
    events: EventLog,
    status: String,
}

impl<'a> ConsoleApp<'a> {
    pub fn new(machine: &'a Machine, config: ConsoleConfig) -> Self {
        let events: EventLog = Rc::new(RefCell::new(VecDeque::new()));

        for bus in machine.buses() {
            for line in Line::ALL {
                let sink = events.clone();
                let tag = bus.tag().to_string();
                let max = config.max_events.max(1);
                bus.set_host_callback(
                    line,
                    Rc::new(move |line: Line, state: bool| {
                        let mut events = sink.borrow_mut();
                        if events.len() == max {
                            events.pop_front();
                        }
                        events.push_back(format!("{}: {} -> {}", tag, line, u8::from(state)));
                    }),
                );
            }
        }

        Self {
            machine,
            config,
            running: false,
            command_buffer: String::new(),
            show_help: false,
            selected_bus: 0,
            events,
            status: String::new(),
        }
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        enable_raw_mode().map_err(|e| format!("Failed to enable raw mode: {}", e))?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(format!("Failed to enter alternate screen: {}", e).into());
        }

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = match Terminal::new(backend) {
            Ok(terminal) => terminal,
            Err(e) => {
                let _ = disable_raw_mode();
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                return Err(e.into());
            }
        };

        let result = self.event_loop(&mut terminal);

        // Restore the terminal even when the loop bailed out.
        let restored = disable_raw_mode()
            .map_err(|e| format!("Failed to disable raw mode: {}", e))
            .and_then(|_| {
                execute!(terminal.backend_mut(), LeaveAlternateScreen)
                    .map_err(|e| format!("Failed to leave alternate screen: {}", e))
            })
            .and_then(|_| {
                terminal
                    .show_cursor()
                    .map_err(|e| format!("Failed to show cursor: {}", e))
            });

        self.detach();
        result?;
        restored?;
        Ok(())
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.running = true;
        let refresh = Duration::from_millis(self.config.refresh_rate_ms.max(1));

        while self.running {
            terminal.draw(|f| self.draw_ui(f))?;

            if event::poll(refresh)? {
                if let Event::Key(key) = event::read()? {
                    self.handle_key_event(key.code);
                }
            }
        }
        Ok(())
    }

    /// Removes the host callbacks installed by [`ConsoleApp::new`].
    fn detach(&self) {
        for bus in self.machine.buses() {
            for line in Line::ALL {
                bus.clear_host_callback(line);
            }
        }
    }

    fn selected(&self) -> Option<Rc<IecBus>> {
        self.machine.buses().get(self.selected_bus).cloned()
    }

    fn toggle(&mut self, line: Line) {
        if let Some(bus) = self.selected() {
            let state = !bus.baseline().get(line);
            bus.set_signal(Source::Host, line, state);
            self.status = format!("host {} -> {}", line, u8::from(state));
        }
    }

    fn handle_key_event(&mut self, key: KeyCode) {
        if self.show_help {
            self.show_help = false;
            return;
        }

        match key {
            KeyCode::Esc => self.running = false,
            KeyCode::Char(c @ '1'..='5') if self.command_buffer.is_empty() => {
                let index = c as usize - '1' as usize;
                if let Some(line) = Line::from_index(index) {
                    self.toggle(line);
                }
            }
            KeyCode::Tab => {
                let count = self.machine.buses().len().max(1);
                self.selected_bus = (self.selected_bus + 1) % count;
            }
            KeyCode::Backspace => {
                self.command_buffer.pop();
            }
            KeyCode::Enter => {
                self.execute_command();
                self.command_buffer.clear();
            }
            KeyCode::Char(c) => {
                if c.is_ascii_alphanumeric() || c == '=' {
                    self.command_buffer.push(c);
                }
            }
            _ => {}
        }
    }

    fn execute_command(&mut self) {
        let cmd = self.command_buffer.trim().to_lowercase();
        debug!("console command '{}'", cmd);

        match cmd.as_str() {
            "quit" | "exit" | "q" => self.running = false,
            "help" | "h" => self.show_help = true,
            "reset" | "r" => {
                if let Some(bus) = self.selected() {
                    bus.reset();
                    self.status = format!("{}: reset pulsed", bus.tag());
                }
            }
            "clear" => self.events.borrow_mut().clear(),
            "" => {}
            assignment => match (parse_assignment(assignment), self.selected()) {
                (Ok((line, state)), Some(bus)) => {
                    bus.set_signal(Source::Host, line, state);
                    self.status = format!("host {} -> {}", line, u8::from(state));
                }
                (Err(e), _) => self.status = e.to_string(),
                (_, None) => self.status = "no bus configured".to_string(),
            },
        }
    }

    fn draw_ui(&self, f: &mut Frame) {
        let size = f.size();

        if self.show_help {
            self.draw_help_screen(f);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Min(8),
                Constraint::Length(3),
            ])
            .split(size);

        let info = self.machine.info();
        let bus_name = self
            .selected()
            .map(|bus| bus.tag().to_string())
            .unwrap_or_else(|| "-".to_string());
        let title_text = vec![
            TextLine::from(vec![Span::styled(
                format!("{} - bus '{}'", info.name, bus_name),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            TextLine::from(vec![
                Span::styled("1-5", Style::default().fg(Color::Yellow)),
                Span::raw("=toggle SRQ/ATN/CLK/DATA/RESET, "),
                Span::styled("Tab", Style::default().fg(Color::Yellow)),
                Span::raw("=next bus, "),
                Span::styled("Esc", Style::default().fg(Color::Yellow)),
                Span::raw("=quit, "),
                Span::styled("help", Style::default().fg(Color::Yellow)),
                Span::raw("=commands"),
            ]),
        ];
        let title = Paragraph::new(title_text)
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        f.render_widget(title, chunks[0]);

        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[1]);

        self.draw_lines(f, content_chunks[0]);
        self.draw_chain(f, content_chunks[1]);

        let command_text = if !self.command_buffer.is_empty() {
            self.command_buffer.clone()
        } else if !self.status.is_empty() {
            self.status.clone()
        } else {
            "Enter command (e.g. atn=0, reset, help)...".to_string()
        };
        let command_bar = Paragraph::new(command_text)
            .style(Style::default().fg(Color::White))
            .block(Block::default().borders(Borders::ALL).title("Command"));
        f.render_widget(command_bar, chunks[2]);
    }

    fn draw_help_screen(&self, f: &mut Frame) {
        let size = f.size();
        let entry = |keys: &'static str, text: &'static str| {
            TextLine::from(vec![
                Span::styled(keys, Style::default().fg(Color::Yellow)),
                Span::raw(text),
            ])
        };
        let help_text = vec![
            TextLine::from(vec![Span::styled(
                "IEC Bus Monitor Help",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            TextLine::from(""),
            entry("  1..5", " - Toggle host assertion of SRQ, ATN, CLK, DATA, RESET"),
            entry("  <line>=<0|1>", " - Drive a line from the host, e.g. atn=0"),
            entry("  reset, r", " - Pulse RESET"),
            entry("  clear", " - Clear the event list"),
            entry("  q, quit, Esc", " - Leave the monitor"),
            entry("  Tab", " - Switch between buses"),
            TextLine::from(""),
            TextLine::from("Press any key to return to main view..."),
        ];

        let help = Paragraph::new(help_text)
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Help"));
        f.render_widget(help, size);
    }

    fn draw_lines(&self, f: &mut Frame, area: Rect) {
        let halves = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(9), Constraint::Min(3)])
            .split(area);

        let mut text = Vec::new();
        if let Some(bus) = self.selected() {
            let effective = bus.lines();
            let baseline = bus.baseline();
            for line in Line::ALL {
                let (label, color) = if effective.get(line) {
                    ("high", Color::Green)
                } else {
                    ("LOW ", Color::Red)
                };
                text.push(TextLine::from(vec![
                    Span::raw(format!("{:<6}", line.name())),
                    Span::styled(label, Style::default().fg(color)),
                    Span::raw(if baseline.get(line) { "" } else { "  (host)" }),
                ]));
            }
            text.push(TextLine::from(format!("depth {}", bus.depth())));
        } else {
            text.push(TextLine::from("No bus configured"));
        }

        let widget = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Lines"));
        f.render_widget(widget, halves[0]);

        if self.config.show_events {
            let events: Vec<TextLine> = self
                .events
                .borrow()
                .iter()
                .rev()
                .map(|e| TextLine::from(e.clone()))
                .collect();
            let widget = Paragraph::new(events)
                .block(Block::default().borders(Borders::ALL).title("Events"));
            f.render_widget(widget, halves[1]);
        }
    }

    fn draw_chain(&self, f: &mut Frame, area: Rect) {
        let mut text = Vec::new();
        if let (true, Some(bus)) = (self.config.show_participants, self.selected()) {
            text.push(TextLine::from(vec![
                Span::styled(format!("{:<12}", "host"), Style::default().fg(Color::Yellow)),
                Span::raw(driven_text(bus.baseline())),
            ]));
            for p in bus.participants() {
                let style = if p.alive {
                    Style::default()
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                text.push(TextLine::from(vec![
                    Span::styled(format!("{:<8}{:>3} ", p.tag, p.address), style),
                    Span::raw(driven_text(p.driven)),
                ]));
            }
        }

        let widget = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Daisy chain"))
            .wrap(Wrap { trim: true });
        f.render_widget(widget, area);
    }
}

fn driven_text(v: LineVector) -> String {
    let asserted: Vec<_> = v.asserted().map(Line::name).collect();
    if asserted.is_empty() {
        "-".to_string()
    } else {
        asserted.join(" ")
    }
}

impl Drop for ConsoleApp<'_> {
    fn drop(&mut self) {
        self.detach();
    }
}

pub fn run_console(machine: &Machine, config: ConsoleConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut app = ConsoleApp::new(machine, config);
    app.run()
}
