//! Tecoxide entrypoint: CLI handling, batch execution and the interactive
//! terminal loop.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::{cursor, execute, terminal};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use core_runtime::cmdline::{self, CmdLine, KeyMacroStatus};
use core_runtime::edflags::EdFlags;
use core_runtime::error::ErrorKind;
use core_runtime::interface::{
    BatchInterface, CmdlineEcho, Interface, InterruptFlag, MsgLevel, PopupKind,
};
use core_runtime::{machine, Runtime};
use core_view::Codepage;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "tecoxide", version, about = "TECO-style text editor and language")]
struct Args {
    /// Execute a macro given on the command line, then exit.
    #[arg(short = 'e', long = "eval", value_name = "MACRO")]
    eval: Option<String>,

    /// Execute ("mung") the first positional argument as a script file.
    #[arg(short = 'm', long = "mung")]
    mung: bool,

    /// Do not execute the profile (`$SCITECOCONFIG/.teco_ini`).
    #[arg(long = "no-profile")]
    no_profile: bool,

    /// Default to a single-byte encoding without EOL translation.
    #[arg(short = '8', long = "8bit")]
    eight_bit: bool,

    /// Inject keystrokes in batch mode (caret notation for controls),
    /// exercising the interactive machinery without a terminal.
    #[arg(long = "fake-cmdline", value_name = "KEYS")]
    fake_cmdline: Option<String>,

    /// Restricted mode: no profile is executed.
    #[arg(long)]
    sandbox: bool,

    /// Script (with --mung) and arguments appended to the unnamed buffer,
    /// one per line.
    #[arg(trailing_var_arg = true)]
    positional: Vec<String>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("TECOXIDE_LOG").unwrap_or_else(|_| EnvFilter::new("off"));

    if let Some(path) = std::env::var_os("TECOXIDE_LOG_FILE") {
        let path = PathBuf::from(path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file = path.file_name().map(|f| f.to_string_lossy().into_owned());
        let appender = tracing_appender::rolling::never(
            dir,
            file.unwrap_or_else(|| "tecoxide.log".to_string()),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

/// Translate caret notation into raw keystrokes: `^X` becomes the control
/// key, `^^` a literal caret.
fn parse_fake_keys(spec: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chars = spec.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            match chars.next() {
                Some('^') => out.push(b'^'),
                Some(x) => out.push(core_text::ctl_key(x) as u8),
                None => out.push(b'^'),
            }
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    out
}

fn append_buffer_lines(rt: &mut Runtime, lines: &[String]) {
    let doc = rt.ring.current().view.doc;
    for line in lines {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        let _ = rt.docs.append_bytes(doc, &bytes);
    }
}

fn run_profile(rt: &mut Runtime) {
    let Some(config) = std::env::var_os("SCITECOCONFIG") else {
        return;
    };
    let profile = PathBuf::from(config).join(".teco_ini");
    if !profile.is_file() {
        return;
    }
    info!(target: "startup", profile = %profile.display(), "running_profile");
    if let Err(e) = machine::execute_file(rt, &profile) {
        warn!(target: "startup", error = %e.report(), "profile_failed");
        rt.interface.msg(MsgLevel::Error, &e.report());
    }
}

fn batch_main(args: &Args) -> Result<ExitCode> {
    let interface = BatchInterface::new_echoing();
    let undo_enabled = args.fake_cmdline.is_some();
    let codepage = if args.eight_bit {
        Codepage::SingleByte
    } else {
        Codepage::Utf8
    };
    let mut rt = Runtime::with_codepage(Box::new(interface), undo_enabled, codepage);

    if !args.no_profile && !args.sandbox && !args.mung {
        run_profile(&mut rt);
    }

    let mut positional = args.positional.as_slice();
    let script = if args.mung {
        let (first, rest) = positional
            .split_first()
            .context("--mung requires a script argument")?;
        positional = rest;
        Some(PathBuf::from(first))
    } else {
        None
    };
    append_buffer_lines(&mut rt, positional);

    let mut failed = false;

    if let Some(script) = script {
        match machine::execute_file(&mut rt, &script) {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::Quit => rt.quit_requested = true,
            Err(e) => {
                eprintln!("{}", e.report());
                failed = true;
            }
        }
    }

    if !failed && !rt.quit_requested
        && let Some(macro_text) = &args.eval
    {
        match machine::execute_macro(&mut rt, macro_text.as_bytes(), None, "") {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::Quit => rt.quit_requested = true,
            Err(e) => {
                eprintln!("{}", e.report());
                failed = true;
            }
        }
    }

    if !failed && !rt.quit_requested
        && let Some(keys) = &args.fake_cmdline
    {
        let mut cl = CmdLine::new();
        let bytes = parse_fake_keys(keys);
        for (_, chr) in core_text::chars_with_offsets(&bytes) {
            let mut buf = [0u8; 4];
            let key = chr.encode_utf8(&mut buf).as_bytes().to_vec();
            match cmdline::keypress(&mut rt, &mut cl, &key) {
                Ok(()) => {}
                Err(e) if e.kind == ErrorKind::Quit => break,
                Err(e) => {
                    eprintln!("{}", e.report());
                    failed = true;
                    break;
                }
            }
        }
    }

    rt.cleanup();
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/*
 * Interactive terminal interface.
 */

struct TermInterface {
    interrupt: InterruptFlag,
    cmdline: String,
    message: Option<(MsgLevel, String)>,
    popup: Vec<String>,
    popup_shown: bool,
}

impl TermInterface {
    fn new(interrupt: InterruptFlag) -> Self {
        Self {
            interrupt,
            cmdline: String::new(),
            message: None,
            popup: Vec::new(),
            popup_shown: false,
        }
    }

    fn redraw(&self) {
        let mut out = std::io::stdout();
        let _ = execute!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        );
        if let Some((level, text)) = &self.message {
            let prefix = match level {
                MsgLevel::Error => "? ",
                MsgLevel::Warning => "! ",
                _ => "",
            };
            let _ = write!(out, "{prefix}{}\r\n", text.replace('\n', "\r\n    "));
        }
        if self.popup_shown && !self.popup.is_empty() {
            let line = self.popup.join("  ");
            let _ = write!(out, "{line}\r\n");
        }
        let _ = write!(out, "*{}", self.cmdline);
        let _ = out.flush();
    }

    fn clipboard_command(&self, which: &str, name: &str) -> Option<std::process::Command> {
        let template = std::env::var(which).ok()?;
        let mut cmd = std::process::Command::new("/bin/sh");
        cmd.arg("-c").arg(template.replace("{}", name));
        Some(cmd)
    }
}

impl Interface for TermInterface {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn msg(&mut self, level: MsgLevel, text: &str) {
        if level == MsgLevel::Error {
            // ring the terminal bell on errors
            print!("\x07");
        }
        self.message = Some((level, text.to_string()));
        self.redraw();
    }
    fn msg_clear(&mut self) {
        self.message = None;
    }

    fn cmdline_update(&mut self, cmdline: &CmdlineEcho) {
        let effective = core_text::echo(&cmdline.str[..cmdline.effective_len]);
        self.cmdline = effective;
        self.redraw();
    }

    fn popup_add(&mut self, _kind: PopupKind, name: &[u8], highlight: bool) {
        let mut n = core_text::echo(name);
        if highlight {
            n = format!("[{n}]");
        }
        self.popup.push(n);
    }
    fn popup_show(&mut self) {
        self.popup_shown = true;
        self.redraw();
    }
    fn popup_scroll(&mut self) {}
    fn popup_clear(&mut self) {
        self.popup.clear();
        self.popup_shown = false;
    }
    fn popup_is_shown(&self) -> bool {
        self.popup_shown
    }

    fn set_clipboard(&mut self, name: &str, data: &[u8]) -> core_runtime::error::Result<()> {
        // subprocess template first, OSC-52 as the fallback
        if let Some(mut cmd) = self.clipboard_command("SCITECO_CLIPBOARD_SET", name) {
            use std::process::Stdio;
            let mut child = cmd
                .stdin(Stdio::piped())
                .spawn()
                .map_err(|e| core_runtime::error::TecoError::failed(e.to_string()))?;
            if let Some(stdin) = child.stdin.as_mut() {
                let _ = stdin.write_all(data);
            }
            let _ = child.wait();
            return Ok(());
        }
        let mut seq = String::from("\x1b]52;c;");
        seq.push_str(&base64(data));
        seq.push('\x07');
        print!("{seq}");
        let _ = std::io::stdout().flush();
        Ok(())
    }

    fn get_clipboard(&mut self, name: &str) -> core_runtime::error::Result<Vec<u8>> {
        if let Some(mut cmd) = self.clipboard_command("SCITECO_CLIPBOARD_GET", name) {
            let output = cmd
                .output()
                .map_err(|e| core_runtime::error::TecoError::failed(e.to_string()))?;
            return Ok(output.stdout);
        }
        Err(core_runtime::error::TecoError::failed(
            "No clipboard backend configured",
        ))
    }
    fn has_clipboard(&self) -> bool {
        true
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }
    fn clear_interrupted(&mut self) {
        self.interrupt.clear();
    }
}

fn base64(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in data.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]);
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

/// One keypress: either raw characters or a named function key.
enum Key {
    Chars(Vec<u8>),
    Named(&'static str),
    Ignored,
}

fn translate_key(event: &KeyEvent) -> Key {
    match event.code {
        KeyCode::Char(c) => {
            if event.modifiers.contains(KeyModifiers::CONTROL) {
                if c.is_ascii_alphabetic() || "[\\]^_@".contains(c) {
                    Key::Chars(vec![core_text::ctl_key(c) as u8])
                } else {
                    Key::Ignored
                }
            } else {
                let mut buf = [0u8; 4];
                Key::Chars(c.encode_utf8(&mut buf).as_bytes().to_vec())
            }
        }
        KeyCode::Enter => Key::Chars(vec![b'\n']),
        KeyCode::Esc => Key::Chars(vec![0x1b]),
        KeyCode::Backspace => Key::Chars(vec![0x08]),
        KeyCode::Tab => Key::Chars(vec![b'\t']),
        KeyCode::Up => Key::Named("UP"),
        KeyCode::Down => Key::Named("DOWN"),
        KeyCode::Left => Key::Named("LEFT"),
        KeyCode::Right => Key::Named("RIGHT"),
        KeyCode::Home => Key::Named("HOME"),
        KeyCode::End => Key::Named("END"),
        KeyCode::PageUp => Key::Named("PPAGE"),
        KeyCode::PageDown => Key::Named("NPAGE"),
        KeyCode::Delete => Key::Named("DC"),
        KeyCode::Insert => Key::Named("IC"),
        KeyCode::F(n) => match n {
            1 => Key::Named("F1"),
            2 => Key::Named("F2"),
            3 => Key::Named("F3"),
            4 => Key::Named("F4"),
            5 => Key::Named("F5"),
            6 => Key::Named("F6"),
            7 => Key::Named("F7"),
            8 => Key::Named("F8"),
            9 => Key::Named("F9"),
            10 => Key::Named("F10"),
            11 => Key::Named("F11"),
            _ => Key::Named("F12"),
        },
        _ => Key::Ignored,
    }
}

fn interactive_main(args: &Args) -> Result<ExitCode> {
    let interrupt = InterruptFlag::default();
    let interface = TermInterface::new(interrupt.clone());
    let codepage = if args.eight_bit {
        Codepage::SingleByte
    } else {
        Codepage::Utf8
    };
    let mut rt = Runtime::with_codepage(Box::new(interface), true, codepage);

    if !args.no_profile && !args.sandbox {
        run_profile(&mut rt);
    }
    append_buffer_lines(&mut rt, &args.positional);

    let mut cl = CmdLine::new();

    terminal::enable_raw_mode().context("enabling raw terminal mode")?;
    let result = event_loop(&mut rt, &mut cl, &interrupt);
    let _ = terminal::disable_raw_mode();
    println!();

    rt.cleanup();
    result
}

fn event_loop(rt: &mut Runtime, cl: &mut CmdLine, interrupt: &InterruptFlag) -> Result<ExitCode> {
    loop {
        let event = crossterm::event::read().context("reading terminal events")?;
        let Event::Key(key_event) = event else {
            continue;
        };
        if key_event.kind != crossterm::event::KeyEventKind::Press {
            continue;
        }

        if key_event.code == KeyCode::Char('c')
            && key_event.modifiers.contains(KeyModifiers::CONTROL)
        {
            // asynchronous interrupt; the parser polls the flag
            interrupt.raise();
        }

        let fnkeys = rt.ed.test(EdFlags::FNKEYS);
        let result = match translate_key(&key_event) {
            Key::Chars(bytes) => cmdline::keypress(rt, cl, &bytes),
            Key::Named(name) if fnkeys => match cmdline::keymacro(rt, cl, name) {
                Ok(KeyMacroStatus::Done | KeyMacroStatus::Undefined) => Ok(()),
                Err(e) => Err(e),
            },
            _ => continue,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::Quit => {
                debug!(target: "runtime", "quit");
                return Ok(ExitCode::SUCCESS);
            }
            Err(e) => {
                // keypress-level errors are already displayed
                rt.interface.msg(MsgLevel::Error, &e.report());
            }
        }
    }
}

fn main() -> ExitCode {
    let _log_guard = configure_logging();
    let args = Args::parse();
    debug!(target: "startup", ?args, "parsed_args");

    let batch = args.eval.is_some() || args.mung || args.fake_cmdline.is_some();
    let result = if batch {
        batch_main(&args)
    } else {
        interactive_main(&args)
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tecoxide: {e:#}");
            ExitCode::FAILURE
        }
    }
}
