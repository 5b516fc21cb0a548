//! The command line interpreter.

use alloc::{collections::VecDeque, format, string::String, sync::Arc, vec};
use core::iter;

use pmm::PAGE_SIZE;
use task::{FileDescriptor, Message, Rectangle, TIMER_FREQ, TaskEntry, TaskId};

use crate::{DirectoryEntry, FileSystem, ProcessRunner, Terminal, UserEntry};

/// Longest line the editor accepts, including the terminator it used to need.
const LINE_MAX: usize = 128;
const HISTORY_LEN: usize = 8;

const KEYCODE_DOWN: u8 = 0x51;
const KEYCODE_UP: u8 = 0x52;

const BLINK_TICKS: u64 = TIMER_FREQ / 2;

/// Character cell size the compositor draws the shell with.
const CELL_WIDTH: i32 = 8;
const CELL_HEIGHT: i32 = 16;

/// A line editor and the commands it runs.
pub struct Shell<'k> {
    terminal: Arc<dyn Terminal>,
    fs: &'k dyn FileSystem,
    runner: ProcessRunner<'k>,
    stdio: Arc<dyn FileDescriptor>,
    entry: &'k dyn UserEntry,
    line: String,
    history: VecDeque<String>,
    /// Position in `history` while walking it with the arrow keys, newest first.
    history_index: Option<usize>,
    last_status: i32,
    terminal_entry: Option<TaskEntry>,
    has_window: bool,
    window_active: bool,
    cursor_visible: bool,
}

impl<'k> Shell<'k> {
    pub fn new(
        terminal: Arc<dyn Terminal>,
        fs: &'k dyn FileSystem,
        runner: ProcessRunner<'k>,
        stdio: Arc<dyn FileDescriptor>,
        entry: &'k dyn UserEntry,
    ) -> Self {
        Self {
            terminal,
            fs,
            runner,
            stdio,
            entry,
            line: String::new(),
            history: VecDeque::with_capacity(HISTORY_LEN),
            history_index: None,
            last_status: 0,
            terminal_entry: None,
            has_window: true,
            window_active: false,
            cursor_visible: false,
        }
    }

    /// Data passed to a shell task started by `noterm`, which runs without a window.
    pub const HEADLESS: i64 = 1;

    /// Lets `noterm` start new shells as tasks running `entry(id, Shell::HEADLESS)`.
    pub fn with_terminal_entry(mut self, entry: TaskEntry) -> Self {
        self.terminal_entry = Some(entry);
        self
    }

    /// Stops the shell from sending redraw notices.
    pub fn headless(mut self) -> Self {
        self.has_window = false;
        self
    }

    /// Serves the current task's mailbox forever.
    ///
    /// Unless the shell is headless, the `compositor` task is asked to redraw the shell's
    /// layer after every key, and after every cursor blink while the window is active.
    pub fn run(&mut self, compositor: TaskId) -> ! {
        let scheduler = self.runner.scheduler();
        self.terminal.print(">");
        scheduler.add_timer(scheduler.current_tick() + BLINK_TICKS);
        loop {
            let msg = scheduler.wait_message();
            self.handle_message(compositor, msg);
        }
    }

    /// Reacts to one mailbox message.
    pub fn handle_message(&mut self, compositor: TaskId, msg: Message) {
        let scheduler = self.runner.scheduler();
        let area = match msg {
            Message::TimerTimeout { timeout, .. } => {
                scheduler.add_timer(timeout + BLINK_TICKS);
                self.cursor_visible = !self.cursor_visible;
                if !self.window_active {
                    return;
                }
                self.cursor_area()
            }
            Message::WindowActive { activate } => {
                self.window_active = activate;
                return;
            }
            Message::KeyPush {
                modifier,
                keycode,
                ascii,
                press: true,
            } => {
                self.input_key(modifier, keycode, ascii);
                // An empty area stands for the whole layer.
                Rectangle::default()
            }
            _ => return,
        };
        if !self.has_window {
            return;
        }

        let redraw = Message::DrawArea {
            layer_id: scheduler.current_id().as_u64() as u32,
            area,
        };
        if let Err(err) = scheduler.send_message(compositor, redraw) {
            log::warn!("shell: cannot reach compositor {compositor}: {err}");
        }
    }

    /// The cell after the prompt and the line typed so far.
    fn cursor_area(&self) -> Rectangle {
        Rectangle {
            x: (self.line.len() as i32 + 1) * CELL_WIDTH,
            y: 0,
            width: CELL_WIDTH,
            height: CELL_HEIGHT,
        }
    }

    pub fn input_key(&mut self, _modifier: u8, keycode: u8, ascii: u8) {
        match ascii {
            b'\n' => {
                self.terminal.print("\n");
                let line = core::mem::take(&mut self.line);
                if !line.is_empty() {
                    if self.history.len() == HISTORY_LEN {
                        self.history.pop_back();
                    }
                    self.history.push_front(line.clone());
                }
                self.history_index = None;
                self.execute_line(&line);
                self.terminal.print(">");
            }
            b'\x08' => {
                if self.line.pop().is_some() {
                    self.terminal.print("\x08 \x08");
                }
            }
            0 => match keycode {
                KEYCODE_DOWN => self.walk_history(false),
                KEYCODE_UP => self.walk_history(true),
                _ => {}
            },
            _ => {
                if self.line.len() < LINE_MAX - 1 {
                    let c = char::from(ascii);
                    self.line.push(c);
                    self.terminal.print(c.encode_utf8(&mut [0; 4]));
                }
            }
        }
    }

    /// Runs one command line.
    pub fn execute_line(&mut self, line: &str) {
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, Some(arg)),
            None => (line, None),
        };
        match command {
            "" => {}
            "echo" => self.echo(arg.unwrap_or("")),
            "clear" => self.terminal.print("\x1b[2J\x1b[H"),
            "ls" => self.list(arg.unwrap_or("")),
            "cat" => self.cat(arg.unwrap_or("")),
            "memstat" => self.memstat(),
            "noterm" => self.noterm(arg.unwrap_or("")),
            _ => self.exec(command, arg.unwrap_or("")),
        }
    }

    fn echo(&self, arg: &str) {
        if arg == "$?" {
            self.terminal.print(&format!("{}\n", self.last_status));
        } else {
            self.terminal.print(&format!("{arg}\n"));
        }
    }

    fn list(&self, path: &str) {
        if path.is_empty() {
            self.print_entries(None);
            return;
        }
        match self.fs.find_file(path) {
            (None, _) => self
                .terminal
                .print(&format!("No such file or directory: {path}\n")),
            (Some(dir), _) if dir.is_directory => self.print_entries(Some(&dir)),
            (Some(file), true) => self.not_a_directory(&file),
            (Some(file), false) => self.terminal.print(&format!("{}\n", file.name)),
        }
    }

    fn print_entries(&self, dir: Option<&DirectoryEntry>) {
        for entry in self.fs.read_dir(dir) {
            self.terminal.print(&format!("{}\n", entry.name));
        }
    }

    fn cat(&self, path: &str) {
        match self.fs.find_file(path) {
            (None, _) => self.terminal.print(&format!("no such file: {path}\n")),
            (Some(file), true) if !file.is_directory => self.not_a_directory(&file),
            (Some(file), _) => {
                let mut buf = vec![0u8; file.size];
                let len = self.fs.load_file(&file, &mut buf);
                self.terminal.print(&String::from_utf8_lossy(&buf[..len]));
            }
        }
    }

    fn memstat(&self) {
        let (used, total) = {
            let frames = self.runner.frames().lock();
            (frames.allocated_frames(), frames.total_frames())
        };
        let mib = |frames: usize| frames * PAGE_SIZE / 1024 / 1024;
        self.terminal.print(&format!(
            "Phys used : {used} frames ({} MiB)\n",
            mib(used)
        ));
        self.terminal.print(&format!(
            "Phys total : {total} frames ({} MiB)\n",
            mib(total)
        ));
    }

    /// Starts a headless shell task and types `command_line` into it.
    fn noterm(&self, command_line: &str) {
        let Some(entry) = self.terminal_entry else {
            self.terminal.print("noterm: cannot start terminals here\n");
            return;
        };
        let scheduler = self.runner.scheduler();
        let id = scheduler.spawn(entry, Self::HEADLESS);
        log::debug!("noterm: task {id} runs {command_line:?}");

        let keys = command_line.bytes().chain(iter::once(b'\n'));
        for ascii in keys {
            let key = Message::KeyPush {
                modifier: 0,
                keycode: 0,
                ascii,
                press: true,
            };
            if let Err(err) = scheduler.send_message(id, key) {
                log::warn!("noterm: task {id} went away: {err}");
                return;
            }
        }
    }

    fn exec(&mut self, command: &str, args: &str) {
        let file = match self.fs.find_file(command) {
            (None, _) => {
                self.terminal
                    .print(&format!("no such command: {command}\n"));
                return;
            }
            (Some(file), true) if !file.is_directory => {
                self.not_a_directory(&file);
                return;
            }
            (Some(file), _) => file,
        };

        let result = self.runner.execute(
            self.fs,
            &file,
            command,
            args,
            self.stdio.clone(),
            self.entry,
        );
        match result {
            Ok(ret) => {
                self.last_status = ret;
                self.terminal.print(&format!("app exited. ret = {ret}\n"));
            }
            Err(err) => self
                .terminal
                .print(&format!("failed to exec file: {}\n", err.name())),
        }
    }

    fn not_a_directory(&self, file: &DirectoryEntry) {
        self.terminal
            .print(&format!("{} is not a directory\n", file.name));
    }

    fn walk_history(&mut self, older: bool) {
        self.history_index = match (older, self.history_index) {
            (true, None) if !self.history.is_empty() => Some(0),
            (true, Some(i)) if i + 1 < self.history.len() => Some(i + 1),
            (false, Some(0)) => None,
            (false, Some(i)) => Some(i - 1),
            (_, current) => current,
        };
        self.line = self
            .history_index
            .map(|i| self.history[i].clone())
            .unwrap_or_default();
        self.terminal.print(&format!("\r\x1b[2K>{}", self.line));
    }
}
