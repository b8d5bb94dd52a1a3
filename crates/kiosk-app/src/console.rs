// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Console front-end.
//
// Keypad and staff console on a terminal. A line of digits types a pickup
// code (four digits bring up the file preview), an empty line is Enter.
// Typing `////` asks for the admin password and opens the staff console.
// Phones on the remote-control page feed the same keypad through
// `RemoteKeypad`.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::human_errors::humanize_error;
use kiosk_core::types::{CODE_DIGITS, is_valid_code};
use kiosk_print::NetworkWatcher;
use kiosk_security::{ControlCodeRotator, KeypadInput};

use crate::session::{Notice, NoticeKind, PrintDesk, Screen, SessionOutcome};

/// Typed on its own line to open the admin password prompt.
pub const ADMIN_TRIGGER: &str = "////";

const ADMIN_HELP: &str =
    "1. 退出\n2. 暂停\n3. 恢复\n4. 日志\n5. 重打印 <打印码>\n6. 删除 <令牌>\n9. 关机\n0. 帮助";

/// One unit of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// A line typed on the terminal.
    Line(String),
    /// A key pressed on the remote-control page.
    Key(KeypadInput),
}

/// Keys of a terminal line: digits and `←`; an empty line is Enter.
pub fn line_keys(line: &str) -> Vec<KeypadInput> {
    let line = line.trim();
    if line.is_empty() {
        return vec![KeypadInput::Enter];
    }
    line.chars()
        .filter_map(|c| KeypadInput::parse(c.encode_utf8(&mut [0; 4])))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeypadEvent {
    Typing(String),
    /// The code is complete: show the preview.
    Complete(String),
    /// Enter on a complete code.
    Submit(String),
    /// Enter on an incomplete code.
    Idle,
}

/// The pickup-code entry field.
#[derive(Debug, Default)]
pub struct Keypad {
    buffer: String,
}

impl Keypad {
    pub fn press(&mut self, key: KeypadInput) -> KeypadEvent {
        match key {
            KeypadInput::Digit(d) => {
                if self.buffer.len() < CODE_DIGITS {
                    self.buffer.push(char::from(b'0' + d));
                }
                if self.buffer.len() == CODE_DIGITS {
                    KeypadEvent::Complete(self.buffer.clone())
                } else {
                    KeypadEvent::Typing(self.buffer.clone())
                }
            }
            KeypadInput::Backspace => {
                self.buffer.pop();
                KeypadEvent::Typing(self.buffer.clone())
            }
            KeypadInput::Enter if self.buffer.len() == CODE_DIGITS => {
                KeypadEvent::Submit(std::mem::take(&mut self.buffer))
            }
            KeypadInput::Enter => KeypadEvent::Idle,
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// A staff console command, by number or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Exit,
    Pause,
    Resume,
    Log,
    Reprint(String),
    Delete(String),
    Shutdown,
    Help,
}

impl AdminCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match head {
            "1" | "exit" => Self::Exit,
            "2" | "pause" => Self::Pause,
            "3" | "resume" => Self::Resume,
            "4" | "log" => Self::Log,
            "5" | "print" => Self::Reprint(rest.to_owned()),
            "6" | "delete" => Self::Delete(rest.to_owned()),
            "9" | "shutdown" => Self::Shutdown,
            _ => Self::Help,
        }
    }
}

/// Keypad access for phones holding a current control code.
#[derive(Clone)]
pub struct RemoteKeypad {
    rotator: Arc<ControlCodeRotator>,
    tx: mpsc::Sender<ConsoleInput>,
}

impl RemoteKeypad {
    pub fn new(rotator: Arc<ControlCodeRotator>, tx: mpsc::Sender<ConsoleInput>) -> Self {
        Self { rotator, tx }
    }

    /// Forward one key press. Returns `false` when the control code is stale
    /// or the body is not a key.
    pub async fn press(&self, control_code: &str, body: &str) -> Result<bool> {
        if !self.rotator.is_valid(control_code) {
            debug!("remote key with stale control code");
            return Ok(false);
        }
        let Some(key) = KeypadInput::parse(body) else {
            return Ok(false);
        };
        self.tx
            .send(ConsoleInput::Key(key))
            .await
            .map_err(|_| KioskError::Cancelled)?;
        Ok(true)
    }
}

/// Forward terminal lines until stdin closes.
pub fn spawn_stdin_reader(tx: mpsc::Sender<ConsoleInput>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(ConsoleInput::Line(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        debug!("stdin closed");
    })
}

/// Prints notices to stdout.
pub struct TerminalScreen;

impl Screen for TerminalScreen {
    fn show(&self, notice: Notice) {
        let marker = match notice.kind {
            NoticeKind::Error => "!",
            NoticeKind::Prompt => ">",
            NoticeKind::Admin => "#",
            NoticeKind::Progress | NoticeKind::Preview => "*",
        };
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{marker} {}", notice.title);
        for line in notice.detail.lines() {
            let _ = writeln!(out, "  {line}");
        }
        let _ = out.flush();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Keypad,
    Password,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum SessionKind {
    Print,
    Reprint,
}

/// The console loop.
pub struct Console {
    desk: Arc<PrintDesk>,
    screen: Arc<dyn Screen>,
    admin_password: Option<String>,
    watcher: Option<Arc<NetworkWatcher>>,
    rotator: Option<Arc<ControlCodeRotator>>,
    mode: Mode,
    keypad: Keypad,
}

impl Console {
    /// Without a password the staff console stays closed.
    pub fn new(desk: Arc<PrintDesk>, screen: Arc<dyn Screen>, admin_password: Option<String>) -> Self {
        Self {
            desk,
            screen,
            admin_password,
            watcher: None,
            rotator: None,
            mode: Mode::Keypad,
            keypad: Keypad::default(),
        }
    }

    pub fn with_watcher(mut self, watcher: Arc<NetworkWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn with_rotator(mut self, rotator: Arc<ControlCodeRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Serve input until it ends or staff shut the kiosk down.
    pub async fn run(&mut self, input: &mut mpsc::Receiver<ConsoleInput>) -> Result<()> {
        self.show_idle();
        while let Some(item) = input.recv().await {
            if self.handle(item, input).await? == Flow::Shutdown {
                info!("shutdown requested from staff console");
                break;
            }
        }
        Ok(())
    }

    async fn handle(
        &mut self,
        item: ConsoleInput,
        input: &mut mpsc::Receiver<ConsoleInput>,
    ) -> Result<Flow> {
        match (self.mode, item) {
            (Mode::Password, ConsoleInput::Line(line)) => {
                if self.admin_password.as_deref() == Some(line.trim()) {
                    info!("staff console opened");
                    self.mode = Mode::Admin;
                    self.reply(ADMIN_HELP);
                } else {
                    warn!("wrong admin password");
                    self.mode = Mode::Keypad;
                    self.show_idle();
                }
                Ok(Flow::Continue)
            }
            (Mode::Admin, ConsoleInput::Line(line)) => {
                self.admin(AdminCommand::parse(&line), input).await
            }
            (Mode::Password | Mode::Admin, ConsoleInput::Key(_)) => Ok(Flow::Continue),
            (Mode::Keypad, ConsoleInput::Line(line)) => {
                if line.trim() == ADMIN_TRIGGER && self.admin_password.is_some() {
                    self.mode = Mode::Password;
                    self.keypad.clear();
                    self.screen
                        .show(Notice::new(NoticeKind::Admin, "请输入管理员密码", ""));
                    return Ok(Flow::Continue);
                }
                for key in line_keys(&line) {
                    self.press(key, input).await;
                }
                Ok(Flow::Continue)
            }
            (Mode::Keypad, ConsoleInput::Key(key)) => {
                self.press(key, input).await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn press(&mut self, key: KeypadInput, input: &mut mpsc::Receiver<ConsoleInput>) {
        match self.keypad.press(key) {
            KeypadEvent::Typing(_) => {}
            KeypadEvent::Complete(code) => {
                if let Err(e) = self.desk.preview(&code) {
                    warn!(error = %e, "preview failed");
                }
            }
            KeypadEvent::Submit(code) => {
                run_session(&self.desk, SessionKind::Print, &code, input).await;
                self.keypad.clear();
            }
            KeypadEvent::Idle => self.show_idle(),
        }
    }

    async fn admin(
        &mut self,
        command: AdminCommand,
        input: &mut mpsc::Receiver<ConsoleInput>,
    ) -> Result<Flow> {
        debug!(?command, "staff command");
        match command {
            AdminCommand::Exit => {
                self.mode = Mode::Keypad;
                self.show_idle();
            }
            AdminCommand::Pause => {
                self.desk.set_paused(true);
                self.reply("已暂停");
            }
            AdminCommand::Resume => {
                self.desk.set_paused(false);
                self.reply("已恢复");
            }
            AdminCommand::Log => {
                let report = self.report();
                self.reply(&report);
            }
            AdminCommand::Reprint(code) => {
                if !is_valid_code(&code) {
                    self.reply("无效打印码");
                } else {
                    run_session(&self.desk, SessionKind::Reprint, &code, input).await;
                }
            }
            AdminCommand::Delete(token) => match self.desk.delete_job(&token).await {
                Ok(code) => self.reply(&format!("已删除 {code}")),
                Err(e) => self.reply(&humanize_error(&e).message),
            },
            AdminCommand::Shutdown => return Ok(Flow::Shutdown),
            AdminCommand::Help => self.reply(ADMIN_HELP),
        }
        Ok(Flow::Continue)
    }

    /// Printer status, address, pause state and the control code.
    fn report(&self) -> String {
        let address = self
            .watcher
            .as_ref()
            .and_then(|w| w.current())
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "未连接".into());
        let state = if self.desk.is_paused() { "已暂停" } else { "运行中" };
        let mut lines = vec![
            self.desk.registry().summary(),
            format!("IP: {address}"),
            state.to_string(),
        ];
        if let Some(rotator) = &self.rotator {
            lines.push(format!("遥控码: {}", rotator.current()));
        }
        lines.join("\n")
    }

    fn reply(&self, text: &str) {
        self.screen.show(Notice::new(NoticeKind::Admin, "管理", text));
    }

    fn show_idle(&self) {
        self.screen.show(Notice::new(
            NoticeKind::Progress,
            "请输入取件码",
            self.desk.registry().summary(),
        ));
    }
}

/// Run one session, feeding it keypad input from the console while it
/// prints. Closing the console cancels a session waiting on the operator.
async fn run_session(
    desk: &PrintDesk,
    kind: SessionKind,
    code: &str,
    input: &mut mpsc::Receiver<ConsoleInput>,
) {
    let (key_tx, mut key_rx) = mpsc::channel(16);
    let mut key_tx = Some(key_tx);
    let session = async {
        match kind {
            SessionKind::Print => desk.print(code, &mut key_rx).await,
            SessionKind::Reprint => desk.reprint(code, &mut key_rx).await,
        }
    };
    tokio::pin!(session);

    let outcome = loop {
        tokio::select! {
            outcome = &mut session => break outcome,
            item = input.recv(), if key_tx.is_some() => {
                let keys = match item {
                    Some(ConsoleInput::Line(line)) => line_keys(&line),
                    Some(ConsoleInput::Key(key)) => vec![key],
                    None => {
                        key_tx = None;
                        continue;
                    }
                };
                if let Some(tx) = &key_tx {
                    for key in keys {
                        let _ = tx.send(key).await;
                    }
                }
            }
        }
    };

    match outcome {
        Ok(SessionOutcome::Printed) => info!(code, "session finished"),
        Ok(other) => debug!(code, ?other, "session ended without printing"),
        Err(e) => warn!(code, error = %e, "session failed"),
    }
}
