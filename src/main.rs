#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::mem;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};

use netranger::keymap::Binding;
use netranger::remote::SyncDirection;
use netranger::{BufferId, Config, Controller, Host, JobId, JobOutput, OpenTarget, PanelKind};

const STATUS_HEIGHT: u16 = 1;
const KEY_TIMEOUT: Duration = Duration::from_millis(600);
const TICK: Duration = Duration::from_millis(200);

fn main() -> io::Result<()> {
    init_logging();
    let config = match Config::load(&Config::default_path()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("netranger: {err}; using defaults");
            Config::default()
        }
    };
    let start = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => std::env::current_dir()?,
    };

    install_panic_hook();
    let mut stdout = io::stdout();
    terminal::enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let result = run(config, &start);
    execute!(stdout, Show, LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;
    result
}

fn init_logging() {
    let Some(path) = std::env::var_os("NETRANGER_LOG") else { return };
    let Ok(file) = fs::OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();
}

fn install_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        original_hook(panic_info);
    }));
}

fn run(config: Config, start: &Path) -> io::Result<()> {
    let (width, height) = terminal::size()?;
    let mut host = TermHost::new(std::env::current_dir()?, width, height);
    let mut controller =
        Controller::new(&mut host, config).map_err(|err| io::Error::other(err.to_string()))?;
    host.open_path(start, OpenTarget::Current);

    loop {
        pump(&mut host, &mut controller);
        if host.quit {
            return Ok(());
        }
        host.draw()?;
        if !event::poll(TICK)? {
            host.flush_pending_key(&mut controller);
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                host.handle_key(&mut controller, key);
            }
            Event::Resize(width, height) => {
                host.width = width;
                host.height = height;
                controller.on_resize(&mut host);
            }
            _ => {}
        }
    }
}

// Drains queued buffer entries and finished jobs into the controller.
fn pump(host: &mut TermHost, controller: &mut Controller) {
    loop {
        while let Ok((job, output)) = host.jobs_rx.try_recv() {
            controller.on_job_finished(host, job, output);
        }
        let Some(name) = host.entered.pop_front() else { break };
        controller.on_buf_enter(host, &name);
    }
}

#[derive(Debug, Default)]
struct HostBuffer {
    name: String,
    lines: Vec<String>,
    cursor: usize,
    top: usize,
    modifiable: bool,
}

struct Panel {
    kind: PanelKind,
    lines: Vec<String>,
}

struct TermHost {
    buffers: HashMap<BufferId, HostBuffer>,
    current: BufferId,
    next_id: BufferId,
    cwd: PathBuf,
    width: u16,
    height: u16,
    status: String,
    status_error: bool,
    entered: VecDeque<PathBuf>,
    panel: Option<Panel>,
    panel_input: Vec<String>,
    jobs_tx: Sender<(JobId, JobOutput)>,
    jobs_rx: Receiver<(JobId, JobOutput)>,
    bindings: Vec<Binding>,
    pending: String,
    pending_since: Option<Instant>,
    insert_col: Option<usize>,
    quit: bool,
}

impl TermHost {
    fn new(cwd: PathBuf, width: u16, height: u16) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel();
        Self {
            buffers: HashMap::new(),
            current: 0,
            next_id: 1,
            cwd,
            width,
            height,
            status: String::new(),
            status_error: false,
            entered: VecDeque::new(),
            panel: None,
            panel_input: Vec::new(),
            jobs_tx,
            jobs_rx,
            bindings: Vec::new(),
            pending: String::new(),
            pending_since: None,
            insert_col: None,
            quit: false,
        }
    }

    fn buf(&self) -> Option<&HostBuffer> {
        self.buffers.get(&self.current)
    }

    fn buf_mut(&mut self) -> Option<&mut HostBuffer> {
        self.buffers.get_mut(&self.current)
    }

    fn list_height(&self) -> usize {
        self.height.saturating_sub(STATUS_HEIGHT) as usize
    }

    fn enter_new_buffer(&mut self, path: &Path) {
        let id = self.next_id;
        self.next_id += 1;
        let name = path.display().to_string();
        self.buffers.insert(id, HostBuffer { name, ..HostBuffer::default() });
        self.current = id;
        self.entered.push_back(path.to_path_buf());
    }

    fn reenter(&mut self) {
        if let Some(name) = self.buf().map(|buf| PathBuf::from(&buf.name)) {
            self.entered.push_back(name);
        }
    }

    fn move_cursor(&mut self, controller: &mut Controller, delta: isize) {
        let Some(buf) = self.buf_mut() else { return };
        let last = buf.lines.len().saturating_sub(1);
        buf.cursor = buf.cursor.saturating_add_signed(delta).min(last);
        if self.insert_col.is_some() {
            self.insert_col = Some(self.line_width());
            return;
        }
        controller.on_cursor_moved(self);
    }

    fn line_width(&self) -> usize {
        self.buf()
            .and_then(|buf| buf.lines.get(buf.cursor))
            .map_or(0, |line| line.chars().count())
    }

    fn handle_key(&mut self, controller: &mut Controller, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }
        if self.panel.is_some() {
            self.panel_key(key);
            return;
        }
        if self.insert_col.is_some() {
            self.insert_key(controller, key);
            return;
        }
        self.status.clear();
        match key.code {
            KeyCode::Char('j') | KeyCode::Down if self.pending.is_empty() => {
                self.move_cursor(controller, 1)
            }
            KeyCode::Char('k') | KeyCode::Up if self.pending.is_empty() => {
                self.move_cursor(controller, -1)
            }
            KeyCode::PageDown => self.move_cursor(controller, self.list_height() as isize),
            KeyCode::PageUp => self.move_cursor(controller, -(self.list_height() as isize)),
            KeyCode::Char('q') if self.pending.is_empty() => self.quit = true,
            KeyCode::Char(':') if self.pending.is_empty() => self.command_line(controller),
            _ => {
                if let Some(token) = key_token(&key) {
                    self.feed_token(controller, &token);
                }
            }
        }
    }

    fn feed_token(&mut self, controller: &mut Controller, token: &str) {
        let combined = format!("{}{}", self.pending, token);
        let longer = self
            .bindings
            .iter()
            .any(|b| b.key.len() > combined.len() && b.key.starts_with(&combined));
        if longer {
            self.pending = combined;
            self.pending_since = Some(Instant::now());
            return;
        }
        if self.bindings.iter().any(|b| b.key == combined) {
            self.pending.clear();
            self.pending_since = None;
            controller.on_key(self, &combined);
            return;
        }
        let previous = mem::take(&mut self.pending);
        self.pending_since = None;
        if !previous.is_empty() {
            controller.on_key(self, &previous);
            self.feed_token(controller, token);
        }
    }

    fn flush_pending_key(&mut self, controller: &mut Controller) {
        let expired = self.pending_since.is_some_and(|since| since.elapsed() >= KEY_TIMEOUT);
        if expired {
            let key = mem::take(&mut self.pending);
            self.pending_since = None;
            controller.on_key(self, &key);
        }
    }

    fn panel_key(&mut self, key: KeyEvent) {
        let Some(panel) = self.panel.take() else { return };
        if panel.kind != PanelKind::Help {
            if let KeyCode::Char(c) = key.code {
                self.panel_input.push(c.to_string());
            }
        }
        self.reenter();
    }

    fn insert_key(&mut self, controller: &mut Controller, key: KeyEvent) {
        let Some(col) = self.insert_col else { return };
        match key.code {
            KeyCode::Esc => {
                self.insert_col = None;
                controller.on_key(self, "<Esc>");
            }
            KeyCode::Up => self.move_cursor(controller, -1),
            KeyCode::Down | KeyCode::Enter => self.move_cursor(controller, 1),
            KeyCode::Left => self.insert_col = Some(col.saturating_sub(1)),
            KeyCode::Right => self.insert_col = Some((col + 1).min(self.line_width())),
            KeyCode::Backspace if col > 0 => {
                self.edit_line(|line| {
                    line.remove(col - 1);
                });
                self.insert_col = Some(col - 1);
            }
            KeyCode::Char(c) => {
                self.edit_line(|line| line.insert(col, c));
                self.insert_col = Some(col + 1);
            }
            _ => {}
        }
    }

    fn edit_line(&mut self, edit: impl FnOnce(&mut Vec<char>)) {
        let Some(buf) = self.buf_mut() else { return };
        if !buf.modifiable {
            return;
        }
        let Some(line) = buf.lines.get_mut(buf.cursor) else { return };
        let mut chars: Vec<char> = line.chars().collect();
        edit(&mut chars);
        *line = chars.into_iter().collect();
    }

    // `:remote` opens the mirror and `:sync up|down` transfers the current remote dir.
    fn command_line(&mut self, controller: &mut Controller) {
        let Some(command) = self.user_input(":", "") else { return };
        match command.trim() {
            "q" | "quit" => self.quit = true,
            "remote" => controller.open_remote(self),
            "help" => controller.invoke(self, netranger::Action::Help),
            "sync up" => controller.sync_remote(self, SyncDirection::Up),
            "sync down" => controller.sync_remote(self, SyncDirection::Down),
            other => self.error_msg(&format!("Unknown command: {other}")),
        }
    }

    fn draw(&mut self) -> io::Result<()> {
        let height = self.list_height();
        let width = self.width as usize;
        if let Some(buf) = self.buffers.get_mut(&self.current) {
            if buf.cursor < buf.top {
                buf.top = buf.cursor;
            } else if height > 0 && buf.cursor >= buf.top + height {
                buf.top = buf.cursor + 1 - height;
            }
        }
        let mut out = io::stdout();
        queue!(out, Clear(ClearType::All))?;
        if let Some(buf) = self.buf() {
            for (row, line) in buf.lines.iter().skip(buf.top).take(height).enumerate() {
                queue!(out, MoveTo(0, row as u16), Print(line), ResetColor)?;
            }
        }
        if let Some(panel) = &self.panel {
            let rows = panel.lines.len().min(height.saturating_sub(1));
            let start = height.saturating_sub(rows + 1);
            queue!(out, MoveTo(0, start as u16), SetForegroundColor(Color::Yellow))?;
            queue!(out, Print(format!("{:-<width$}", "")), ResetColor)?;
            for (i, line) in panel.lines.iter().take(rows).enumerate() {
                let text: String = line.chars().take(width).collect();
                queue!(
                    out,
                    MoveTo(0, (start + 1 + i) as u16),
                    Clear(ClearType::CurrentLine),
                    Print(text)
                )?;
            }
        }
        let status_row = self.height.saturating_sub(STATUS_HEIGHT);
        let status: String = if self.pending.is_empty() {
            self.status.chars().take(width).collect()
        } else {
            self.pending.clone()
        };
        queue!(out, MoveTo(0, status_row))?;
        if self.status_error {
            queue!(out, SetForegroundColor(Color::Red))?;
        }
        queue!(out, Print(status), ResetColor)?;
        match (self.insert_col, self.buf()) {
            (Some(col), Some(buf)) => {
                let row = buf.cursor.saturating_sub(buf.top) as u16;
                queue!(out, MoveTo(col as u16, row), Show)?;
            }
            _ => queue!(out, Hide)?,
        }
        out.flush()
    }

    // Leaves the alternate screen around a foreground program.
    fn run_foreground(&mut self, program: &str, path: &Path) {
        let mut stdout = io::stdout();
        let _ = terminal::disable_raw_mode();
        let _ = execute!(stdout, Show, LeaveAlternateScreen);
        let status = Command::new(program).arg(path).current_dir(&self.cwd).status();
        let _ = execute!(stdout, EnterAlternateScreen, Clear(ClearType::All), Hide);
        let _ = terminal::enable_raw_mode();
        while event::poll(Duration::from_millis(0)).unwrap_or(false) {
            let _ = event::read();
        }
        if let Err(err) = status {
            self.error_msg(&format!("{program}: {err}"));
        }
        self.reenter();
    }
}

fn key_token(key: &KeyEvent) -> Option<String> {
    let token = match key.code {
        KeyCode::Char(' ') => "<Space>".to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Left => "<Left>".to_string(),
        KeyCode::Right => "<Right>".to_string(),
        KeyCode::Enter => "l".to_string(),
        KeyCode::Backspace => "h".to_string(),
        KeyCode::Esc => "<Esc>".to_string(),
        _ => return None,
    };
    Some(token)
}

fn shell(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd);
    cmd
}

impl Host for TermHost {
    fn window_width(&self) -> usize {
        self.width as usize
    }

    fn current_buffer(&self) -> BufferId {
        self.current
    }

    fn cursor_line(&self) -> usize {
        self.buf().map_or(0, |buf| buf.cursor)
    }

    fn set_cursor(&mut self, line: usize) {
        if let Some(buf) = self.buf_mut() {
            buf.cursor = line.min(buf.lines.len().saturating_sub(1));
        }
    }

    fn buffer_lines(&self) -> Vec<String> {
        self.buf().map(|buf| buf.lines.clone()).unwrap_or_default()
    }

    fn set_buffer_lines(&mut self, lines: Vec<String>) {
        if let Some(buf) = self.buf_mut() {
            if buf.modifiable {
                buf.lines = lines;
            }
        }
    }

    fn set_line(&mut self, line: usize, text: String) {
        if let Some(slot) = self.buf_mut().filter(|buf| buf.modifiable).and_then(|buf| buf.lines.get_mut(line)) {
            *slot = text;
        }
    }

    fn set_modifiable(&mut self, modifiable: bool) {
        if let Some(buf) = self.buf_mut() {
            buf.modifiable = modifiable;
        }
    }

    fn is_modifiable(&self) -> bool {
        self.buf().is_some_and(|buf| buf.modifiable)
    }

    fn set_buffer_name(&mut self, name: &str) {
        // The path name stays the lookup key; the display name is cosmetic.
        tracing::debug!(name, "buffer name");
    }

    fn cwd(&self) -> PathBuf {
        self.cwd.clone()
    }

    fn set_cwd(&mut self, path: &Path) {
        self.cwd = path.to_path_buf();
    }

    fn error_msg(&mut self, msg: &str) {
        self.status = msg.to_string();
        self.status_error = true;
    }

    fn echo(&mut self, msg: &str) {
        self.status = msg.to_string();
        self.status_error = false;
    }

    fn user_input(&mut self, prompt: &str, default: &str) -> Option<String> {
        let mut value = default.to_string();
        loop {
            self.status = format!("{prompt}{value}");
            self.status_error = false;
            self.draw().ok()?;
            let Event::Key(key) = event::read().ok()? else { continue };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => break,
                KeyCode::Esc => {
                    self.status.clear();
                    return None;
                }
                KeyCode::Backspace => {
                    value.pop();
                }
                KeyCode::Char(c) => value.push(c),
                _ => {}
            }
        }
        self.status.clear();
        Some(value)
    }

    fn spawn(&mut self, command: &str) {
        let spawned = shell(command, &self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(err) = spawned {
            self.error_msg(&format!("Spawn failed: {err}"));
        }
    }

    fn run_shell(&mut self, command: &str) -> netranger::Result<String> {
        let output = shell(command, &self.cwd)
            .output()
            .map_err(|err| netranger::Error::io(Path::new("sh"), err))?;
        if !output.status.success() {
            return Err(netranger::Error::Shell {
                command: command.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_shell_async(&mut self, command: &str, job: JobId) {
        let mut cmd = shell(command, &self.cwd);
        let tx = self.jobs_tx.clone();
        thread::spawn(move || {
            let output = match cmd.stdin(Stdio::null()).output() {
                Ok(output) => JobOutput {
                    status: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                },
                Err(err) => JobOutput { status: -1, stdout: String::new(), stderr: err.to_string() },
            };
            let _ = tx.send((job, output));
        });
    }

    fn open_path(&mut self, path: &Path, target: OpenTarget) {
        if path.is_dir() {
            self.enter_new_buffer(path);
            return;
        }
        if target == OpenTarget::TabBackground {
            self.echo(&format!("Queued {}", path.display()));
            return;
        }
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
        self.run_foreground(&editor, path);
    }

    fn switch_buffer(&mut self, id: BufferId) {
        if self.buffers.contains_key(&id) {
            self.current = id;
            self.reenter();
        }
    }

    fn wipe_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn map_keys(&mut self, bindings: &[Binding]) {
        self.bindings = bindings.to_vec();
    }

    fn start_insert(&mut self) {
        self.insert_col = Some(self.line_width());
    }

    fn show_panel(&mut self, kind: PanelKind, lines: Vec<String>) {
        self.panel_input.clear();
        self.panel = Some(Panel { kind, lines });
    }

    fn take_panel_input(&mut self) -> Vec<String> {
        mem::take(&mut self.panel_input)
    }
}
