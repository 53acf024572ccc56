//! Unix terminal console.
//!
//! Owns the terminal between `prepare` and `restore`: termios raw mode,
//! terminfo-driven control-code emission, the screen-diff refresh that
//! turns the previous physical screen into the new virtual one with the
//! least output, and SIGWINCH plumbing.

use std::env;
use std::os::unix::io::RawFd;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use log::debug;
use nix::poll::{self, PollFd, PollFlags};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, SetArg,
    SpecialCharacterIndices, Termios,
};
use nix::unistd;
use regex::bytes::Regex;
use terminfo::{Database, Value, expand};

use crate::console::Console;
use crate::errors::{Error, Result};
use crate::event::{Event, EventQueue, Key, KeyEvent, default_sequences};

/// Only one console may own the terminal at a time, process-wide.
static CONSOLE_ACTIVE: AtomicBool = AtomicBool::new(false);

static SIGWINCH_PENDING: AtomicBool = AtomicBool::new(false);
/// Previously installed SIGWINCH handler, chained from ours. Zero when the
/// prior disposition was default/ignore.
static PREV_SIGWINCH: AtomicUsize = AtomicUsize::new(0);

extern "C" fn sigwinch_handler(sig: libc::c_int) {
    SIGWINCH_PENDING.store(true, Ordering::SeqCst);
    let prev = PREV_SIGWINCH.load(Ordering::SeqCst);
    if prev != 0 {
        let handler: extern "C" fn(libc::c_int) =
            unsafe { std::mem::transmute::<usize, extern "C" fn(libc::c_int)>(prev) };
        handler(sig);
    }
}

/// tputs-style delay syntax embedded in capability strings: `$<NN>` or
/// `$<NN*>` (scaled by affected line count), with an optional `/`.
fn delay_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$<([0-9]+)((?:/|\*){0,2})>").expect("literal pattern"))
}

struct Caps {
    bel: Vec<u8>,
    clear: Vec<u8>,
    cup: Vec<u8>,
    el: Vec<u8>,
    civis: Option<Vec<u8>>,
    cnorm: Option<Vec<u8>>,
    cub: Option<Vec<u8>>,
    cub1: Option<Vec<u8>>,
    cud: Option<Vec<u8>>,
    cud1: Option<Vec<u8>>,
    cuf: Option<Vec<u8>>,
    cuf1: Option<Vec<u8>>,
    cuu: Option<Vec<u8>>,
    cuu1: Option<Vec<u8>>,
    dch: Option<Vec<u8>>,
    dch1: Option<Vec<u8>>,
    hpa: Option<Vec<u8>>,
    ich: Option<Vec<u8>>,
    ich1: Option<Vec<u8>>,
    ind: Option<Vec<u8>>,
    pad: Option<Vec<u8>>,
    ri: Option<Vec<u8>>,
    rmkx: Option<Vec<u8>>,
    smkx: Option<Vec<u8>>,
}

fn getstr(db: &Database, name: &str) -> Option<Vec<u8>> {
    match db.raw(name) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn required(db: &Database, name: &str) -> Result<Vec<u8>> {
    getstr(db, name).ok_or_else(|| {
        Error::Terminal(format!("terminal doesn't have the required `{name}' capability"))
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MoveX {
    Hpa,
    CubCuf,
    Cub1Cuf1,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MoveY {
    CuuCud,
    Cuu1Cud1,
}

/// Tunables for [`UnixConsole`].
#[derive(Debug, Clone, Default)]
pub struct ConsoleOptions {
    /// Use `hpa` for horizontal motion when the terminal has it. Off by
    /// default: some terminals advertise it but mishandle it, so relative
    /// motion is the safe route.
    pub prefer_hpa: bool,
}

pub struct UnixConsole {
    input_fd: RawFd,
    output_fd: RawFd,
    caps: Caps,
    /// Single-char delete/insert, resolved from `dch1`/`ich1` or the
    /// parameterised forms with count 1.
    dch1: Option<Vec<u8>>,
    ich1: Option<Vec<u8>>,
    move_x: MoveX,
    move_y: MoveY,
    event_queue: EventQueue,
    out_buffer: Vec<(Vec<u8>, bool)>,
    screen: Vec<String>,
    posxy: (usize, usize),
    offset: usize,
    gone_tall: bool,
    height: usize,
    width: usize,
    cursor_visible: bool,
    saved_termios: Option<Termios>,
    old_sigwinch: Option<SigAction>,
    ospeed: Option<u32>,
}

fn get_height_width(fd: RawFd) -> (usize, usize) {
    if let (Ok(lines), Ok(cols)) = (env::var("LINES"), env::var("COLUMNS"))
        && let (Ok(lines), Ok(cols)) = (lines.parse::<usize>(), cols.parse::<usize>())
    {
        return (lines, cols);
    }
    unsafe {
        let mut size: libc::winsize = std::mem::zeroed();
        if libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) == 0 && size.ws_row != 0 {
            return (size.ws_row as usize, size.ws_col as usize);
        }
    }
    (25, 80)
}

fn write_all_fd(fd: RawFd, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match unistd::write(fd, buf) {
            Ok(n) => buf = &buf[n..],
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn baud_to_bps(rate: BaudRate) -> Option<u32> {
    match rate {
        BaudRate::B0 => Some(0),
        BaudRate::B50 => Some(50),
        BaudRate::B75 => Some(75),
        BaudRate::B110 => Some(110),
        BaudRate::B134 => Some(134),
        BaudRate::B150 => Some(150),
        BaudRate::B200 => Some(200),
        BaudRate::B300 => Some(300),
        BaudRate::B600 => Some(600),
        BaudRate::B1200 => Some(1200),
        BaudRate::B1800 => Some(1800),
        BaudRate::B2400 => Some(2400),
        BaudRate::B4800 => Some(4800),
        BaudRate::B9600 => Some(9600),
        BaudRate::B19200 => Some(19200),
        BaudRate::B38400 => Some(38400),
        BaudRate::B57600 => Some(57600),
        BaudRate::B115200 => Some(115_200),
        BaudRate::B230400 => Some(230_400),
        _ => None,
    }
}

/// Python-style slice `v[a..len-from_end]`, clamped instead of panicking.
fn tail_slice(v: &[char], a: usize, from_end: usize) -> &[char] {
    let end = v.len().saturating_sub(from_end);
    if a >= end { &[] } else { &v[a..end] }
}

/// Length of the reusable common prefix of two rows. Stops at ESC: an
/// escape already on screen may be state the hardware interpreted, so the
/// cells after it cannot be trusted to line up.
fn common_prefix_no_esc(old: &[char], new: &[char]) -> usize {
    let minlen = old.len().min(new.len());
    let mut x = 0;
    while x < minlen && old[x] == new[x] && new[x] != '\x1b' {
        x += 1;
    }
    x
}

impl UnixConsole {
    /// Open a console on stdin/stdout using `$TERM`.
    pub fn new() -> Result<UnixConsole> {
        UnixConsole::with_options(libc::STDIN_FILENO, libc::STDOUT_FILENO, None, ConsoleOptions::default())
    }

    pub fn with_options(
        f_in: RawFd,
        f_out: RawFd,
        term: Option<&str>,
        options: ConsoleOptions,
    ) -> Result<UnixConsole> {
        let db = match term {
            Some(term) => Database::from_name(term)?,
            None => Database::from_env()?,
        };

        let caps = Caps {
            bel: required(&db, "bel")?,
            clear: required(&db, "clear")?,
            cup: required(&db, "cup")?,
            el: required(&db, "el")?,
            civis: getstr(&db, "civis"),
            cnorm: getstr(&db, "cnorm"),
            cub: getstr(&db, "cub"),
            cub1: getstr(&db, "cub1"),
            cud: getstr(&db, "cud"),
            cud1: getstr(&db, "cud1"),
            cuf: getstr(&db, "cuf"),
            cuf1: getstr(&db, "cuf1"),
            cuu: getstr(&db, "cuu"),
            cuu1: getstr(&db, "cuu1"),
            dch: getstr(&db, "dch"),
            dch1: getstr(&db, "dch1"),
            hpa: getstr(&db, "hpa"),
            ich: getstr(&db, "ich"),
            ich1: getstr(&db, "ich1"),
            ind: getstr(&db, "ind"),
            pad: getstr(&db, "pad"),
            ri: getstr(&db, "ri"),
            rmkx: getstr(&db, "rmkx"),
            smkx: getstr(&db, "smkx"),
        };

        // hpa doesn't survive some telnet paths, so it stays behind an
        // explicit opt-in and relative motion is the default.
        let move_x = if options.prefer_hpa && caps.hpa.is_some() {
            MoveX::Hpa
        } else if caps.cub.is_some() && caps.cuf.is_some() {
            MoveX::CubCuf
        } else if caps.cub1.is_some() && caps.cuf1.is_some() {
            MoveX::Cub1Cuf1
        } else {
            return Err(Error::Terminal("insufficient terminal (horizontal)".into()));
        };
        let move_y = if caps.cuu.is_some() && caps.cud.is_some() {
            MoveY::CuuCud
        } else if caps.cuu1.is_some() && caps.cud1.is_some() {
            MoveY::Cuu1Cud1
        } else {
            return Err(Error::Terminal("insufficient terminal (vertical)".into()));
        };

        let dch1 = match (&caps.dch1, &caps.dch) {
            (Some(dch1), _) => Some(dch1.clone()),
            (None, Some(dch)) => Some(expand!(dch.as_slice(); 1)?),
            (None, None) => None,
        };
        let ich1 = match (&caps.ich1, &caps.ich) {
            (Some(ich1), _) => Some(ich1.clone()),
            (None, Some(ich)) => Some(expand!(ich.as_slice(); 1)?),
            (None, None) => None,
        };

        let event_queue = EventQueue::new(Self::key_sequences(&db));
        let (height, width) = get_height_width(f_in);

        Ok(UnixConsole {
            input_fd: f_in,
            output_fd: f_out,
            caps,
            dch1,
            ich1,
            move_x,
            move_y,
            event_queue,
            out_buffer: Vec::new(),
            screen: Vec::new(),
            posxy: (0, 0),
            offset: 0,
            gone_tall: false,
            height,
            width,
            cursor_visible: true,
            saved_termios: None,
            old_sigwinch: None,
            ospeed: None,
        })
    }

    /// Escape sequences the terminal sends for its special keys: the common
    /// ANSI set first, then whatever terminfo claims, which wins on
    /// conflict.
    fn key_sequences(db: &Database) -> Vec<(Vec<u8>, String)> {
        let mut seqs = default_sequences();
        let caps: &[(&str, &str)] = &[
            ("kdch1", "delete"),
            ("kcud1", "down"),
            ("kend", "end"),
            ("khome", "home"),
            ("kich1", "insert"),
            ("kcub1", "left"),
            ("knp", "page down"),
            ("kpp", "page up"),
            ("kcuf1", "right"),
            ("kcuu1", "up"),
            ("kbs", "backspace"),
        ];
        for (cap, name) in caps {
            if let Some(seq) = getstr(db, cap) {
                seqs.push((seq, name.to_string()));
            }
        }
        for i in 1..=20 {
            if let Some(seq) = getstr(db, &format!("kf{i}")) {
                seqs.push((seq, format!("f{i}")));
            }
        }
        seqs
    }

    fn write_text(&mut self, text: &str) {
        self.out_buffer.push((text.as_bytes().to_vec(), false));
    }

    fn write_code(&mut self, code: &[u8]) {
        self.out_buffer.push((code.to_vec(), true));
    }

    fn cup(&self, row: usize, col: usize) -> Result<Vec<u8>> {
        Ok(expand!(self.caps.cup.as_slice(); row as i32, col as i32)?)
    }

    fn emit_move_x(&mut self, x: usize) -> Result<()> {
        let posx = self.posxy.0 as i64;
        let dx = x as i64 - posx;
        match self.move_x {
            MoveX::Hpa => {
                if dx != 0
                    && let Some(hpa) = self.caps.hpa.clone()
                {
                    let code = expand!(hpa.as_slice(); x as i32)?;
                    self.write_code(&code);
                }
            }
            MoveX::CubCuf => {
                if dx > 0 {
                    if let Some(cuf) = self.caps.cuf.clone() {
                        let code = expand!(cuf.as_slice(); dx as i32)?;
                        self.write_code(&code);
                    }
                } else if dx < 0
                    && let Some(cub) = self.caps.cub.clone()
                {
                    let code = expand!(cub.as_slice(); -dx as i32)?;
                    self.write_code(&code);
                }
            }
            MoveX::Cub1Cuf1 => {
                if dx > 0 {
                    if let Some(cuf1) = self.caps.cuf1.clone() {
                        for _ in 0..dx {
                            self.write_code(&cuf1);
                        }
                    }
                } else if dx < 0
                    && let Some(cub1) = self.caps.cub1.clone()
                {
                    for _ in 0..-dx {
                        self.write_code(&cub1);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_move_y(&mut self, y: usize) -> Result<()> {
        let posy = self.posxy.1 as i64;
        let dy = y as i64 - posy;
        match self.move_y {
            MoveY::CuuCud => {
                if dy > 0 {
                    if let Some(cud) = self.caps.cud.clone() {
                        let code = expand!(cud.as_slice(); dy as i32)?;
                        self.write_code(&code);
                    }
                } else if dy < 0
                    && let Some(cuu) = self.caps.cuu.clone()
                {
                    let code = expand!(cuu.as_slice(); -dy as i32)?;
                    self.write_code(&code);
                }
            }
            MoveY::Cuu1Cud1 => {
                if dy > 0 {
                    if let Some(cud1) = self.caps.cud1.clone() {
                        for _ in 0..dy {
                            self.write_code(&cud1);
                        }
                    }
                } else if dy < 0
                    && let Some(cuu1) = self.caps.cuu1.clone()
                {
                    for _ in 0..-dy {
                        self.write_code(&cuu1);
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit cursor motion to `(x, y)` without updating `posxy`; callers
    /// record the position they end on.
    fn emit_move(&mut self, x: usize, y: usize) -> Result<()> {
        if self.gone_tall {
            let row = y.saturating_sub(self.offset).min(self.height.saturating_sub(1));
            let code = self.cup(row, x)?;
            self.write_code(&code);
        } else {
            self.emit_move_x(x)?;
            self.emit_move_y(y)?;
        }
        Ok(())
    }

    fn hide_cursor(&mut self) {
        if self.cursor_visible {
            if let Some(civis) = self.caps.civis.clone() {
                self.write_code(&civis);
            }
            self.cursor_visible = false;
        }
    }

    fn show_cursor(&mut self) {
        if !self.cursor_visible {
            if let Some(cnorm) = self.caps.cnorm.clone() {
                self.write_code(&cnorm);
            }
            self.cursor_visible = true;
        }
    }

    fn check_sigwinch(&mut self) {
        if SIGWINCH_PENDING.swap(false, Ordering::SeqCst) {
            let (height, width) = get_height_width(self.input_fd);
            self.height = height;
            self.width = width;
            debug!("window resized to {width}x{height}");
            self.event_queue.insert(Event::Resize);
        }
    }

    fn flushoutput(&mut self) -> Result<()> {
        let buffer = std::mem::take(&mut self.out_buffer);
        for (bytes, is_code) in buffer {
            if is_code {
                self.tputs(&bytes)?;
            } else {
                write_all_fd(self.output_fd, &bytes)?;
            }
        }
        Ok(())
    }

    /// Write a capability string, honouring embedded `$<NN>` delays: pad
    /// characters when the terminal wants padding, a sleep otherwise.
    fn tputs(&mut self, code: &[u8]) -> Result<()> {
        let re = delay_regex();
        let pad = self.caps.pad.clone();
        let bps = self.ospeed;
        let height = self.height;
        let mut rest = code;
        loop {
            let caps = match re.captures(rest) {
                Some(caps) => caps,
                None => {
                    write_all_fd(self.output_fd, rest)?;
                    return Ok(());
                }
            };
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            write_all_fd(self.output_fd, &rest[..whole.0])?;
            let mut delay: u64 = caps
                .get(1)
                .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if caps.get(2).is_some_and(|m| m.as_bytes().contains(&b'*')) {
                delay *= height as u64;
            }
            match (&pad, bps) {
                (Some(pad), Some(bps)) if !pad.is_empty() => {
                    let nchars = (u64::from(bps) * delay / 1000) as usize;
                    for _ in 0..nchars {
                        write_all_fd(self.output_fd, pad)?;
                    }
                }
                _ => std::thread::sleep(Duration::from_millis(delay)),
            }
            rest = &rest[whole.1..];
        }
    }

    fn write_changed_line(
        &mut self,
        y: usize,
        oldline: &str,
        newline: &str,
        px: usize,
    ) -> Result<()> {
        let old: Vec<char> = oldline.chars().collect();
        let new: Vec<char> = newline.chars().collect();
        let minlen = old.len().min(new.len());
        let mut x = common_prefix_no_esc(&old, &new);

        let ich1 = self.ich1.clone();
        let dch1 = self.dch1.clone();

        if new.len() == old.len() + 1 && old[x..] == new[x + 1..] && ich1.is_some() {
            // One character inserted. If the cursor already sits between
            // px and x on this row and the suffix match extends leftward,
            // rewind to px and spare the motion.
            if y == self.posxy.1
                && x > self.posxy.0
                && px < x
                && tail_slice(&old, px, old.len().saturating_sub(x))
                    == tail_slice(&new, px + 1, new.len().saturating_sub(x + 1))
            {
                x = px;
            }
            self.emit_move(x, y)?;
            if let Some(ich1) = &ich1 {
                self.write_code(ich1);
            }
            self.write_text(&new[x].to_string());
            self.posxy = (x + 1, y);
        } else if x < minlen && old.len() == new.len() && old[x + 1..] == new[x + 1..] {
            // Single character differs in place.
            self.emit_move(x, y)?;
            self.write_text(&new[x].to_string());
            self.posxy = (x + 1, y);
        } else if dch1.is_some()
            && ich1.is_some()
            && new.len() == self.width
            && x + 2 < new.len()
            && tail_slice(&new, x + 1, 1) == tail_slice(&old, x, 2)
        {
            // Rotation at the right margin: delete at the edge, insert the
            // new character at x.
            self.hide_cursor();
            self.emit_move(self.width - 2, y)?;
            self.posxy = (self.width - 2, y);
            if let Some(dch1) = &dch1 {
                self.write_code(dch1);
            }
            self.emit_move(x, y)?;
            if let Some(ich1) = &ich1 {
                self.write_code(ich1);
            }
            self.write_text(&new[x].to_string());
            self.posxy = (x + 1, y);
        } else {
            // Rewrite the tail.
            self.hide_cursor();
            self.emit_move(x, y)?;
            if old.len() > new.len() {
                let el = self.caps.el.clone();
                self.write_code(&el);
            }
            let tail: String = new[x..].iter().collect();
            self.write_text(&tail);
            self.posxy = (new.len(), y);
        }

        if newline.contains('\x1b') {
            // The hardware may have absorbed the escape; the cursor
            // position is anyone's guess. Re-anchor at the left margin.
            self.move_cursor(0, y)?;
        }
        Ok(())
    }
}

impl Console for UnixConsole {
    fn prepare(&mut self) -> Result<()> {
        if CONSOLE_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(Error::ReaderBusy);
        }
        let result = (|| -> Result<()> {
            let saved = termios::tcgetattr(self.input_fd)?;
            let mut raw = saved.clone();
            raw.input_flags |= InputFlags::ICRNL;
            raw.input_flags &=
                !(InputFlags::BRKINT | InputFlags::INPCK | InputFlags::ISTRIP | InputFlags::IXON);
            raw.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
            raw.control_flags |= ControlFlags::CS8;
            raw.local_flags &= !(LocalFlags::ICANON
                | LocalFlags::ECHO
                | LocalFlags::IEXTEN
                | LocalFlags::ISIG);
            raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
            raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
            termios::tcsetattr(self.input_fd, SetArg::TCSADRAIN, &raw)?;
            self.ospeed = baud_to_bps(termios::cfgetospeed(&saved));
            self.saved_termios = Some(saved);

            let (height, width) = get_height_width(self.input_fd);
            self.height = height;
            self.width = width;
            self.screen.clear();
            self.out_buffer.clear();
            self.posxy = (0, 0);
            self.gone_tall = false;
            self.offset = 0;
            self.cursor_visible = true;

            if let Some(smkx) = self.caps.smkx.clone() {
                self.write_code(&smkx);
            }

            SIGWINCH_PENDING.store(false, Ordering::SeqCst);
            let action = SigAction::new(
                SigHandler::Handler(sigwinch_handler),
                SaFlags::empty(),
                SigSet::empty(),
            );
            let old = unsafe { signal::sigaction(Signal::SIGWINCH, &action)? };
            match old.handler() {
                SigHandler::Handler(f) => PREV_SIGWINCH.store(f as usize, Ordering::SeqCst),
                _ => PREV_SIGWINCH.store(0, Ordering::SeqCst),
            }
            self.old_sigwinch = Some(old);
            Ok(())
        })();
        if result.is_err() {
            CONSOLE_ACTIVE.store(false, Ordering::SeqCst);
        }
        result
    }

    fn restore(&mut self) -> Result<()> {
        let mut first_err = None;
        if let Some(rmkx) = self.caps.rmkx.clone() {
            self.write_code(&rmkx);
        }
        if let Err(e) = self.flushoutput() {
            first_err.get_or_insert(e);
        }
        if let Some(saved) = self.saved_termios.take()
            && let Err(e) = termios::tcsetattr(self.input_fd, SetArg::TCSADRAIN, &saved)
        {
            first_err.get_or_insert(e.into());
        }
        if let Some(old) = self.old_sigwinch.take() {
            if let Err(e) = unsafe { signal::sigaction(Signal::SIGWINCH, &old) } {
                first_err.get_or_insert(e.into());
            }
            PREV_SIGWINCH.store(0, Ordering::SeqCst);
        }
        CONSOLE_ACTIVE.store(false, Ordering::SeqCst);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn refresh(&mut self, mut screen: Vec<String>, c_xy: (usize, usize)) -> Result<()> {
        let (cx, cy) = c_xy;

        if !self.gone_tall {
            // Grow the physical screen with real newlines so the terminal
            // scrolls for us.
            while self.screen.len() < screen.len().min(self.height) {
                self.hide_cursor();
                let last = self.screen.len().saturating_sub(1);
                self.emit_move(0, last)?;
                self.write_text("\n");
                self.posxy = (0, self.screen.len());
                self.screen.push(String::new());
            }
        } else {
            while self.screen.len() < screen.len() {
                self.screen.push(String::new());
            }
        }

        if screen.len() > self.height {
            self.gone_tall = true;
        }

        let px = self.posxy.0;
        let old_offset = self.offset;
        let mut offset = self.offset;
        let height = self.height;

        // Keep the cursor row inside the window, using as much of the
        // screen as possible.
        if cy < offset {
            offset = cy;
        } else if cy >= offset + height {
            offset = cy - height + 1;
        } else if offset > 0 && screen.len() < offset + height {
            offset = screen.len().saturating_sub(height);
            screen.push(String::new());
        }

        let mut oldscr: Vec<String> = self
            .screen
            .iter()
            .skip(old_offset)
            .take(height)
            .cloned()
            .collect();
        let newscr: Vec<String> = screen.iter().skip(offset).take(height).cloned().collect();

        // Hardware scrolling when the window slid and the terminal can.
        if old_offset > offset {
            if let Some(ri) = self.caps.ri.clone() {
                self.hide_cursor();
                let code = self.cup(0, 0)?;
                self.write_code(&code);
                self.posxy = (0, old_offset);
                for _ in 0..(old_offset - offset) {
                    self.write_code(&ri);
                    oldscr.pop();
                    oldscr.insert(0, String::new());
                }
            }
        } else if old_offset < offset
            && let Some(ind) = self.caps.ind.clone()
        {
            self.hide_cursor();
            let code = self.cup(self.height - 1, 0)?;
            self.write_code(&code);
            self.posxy = (0, old_offset + self.height - 1);
            for _ in 0..(offset - old_offset) {
                self.write_code(&ind);
                oldscr.remove(0);
                oldscr.push(String::new());
            }
        }

        self.offset = offset;

        for (i, (oldline, newline)) in oldscr.iter().zip(newscr.iter()).enumerate() {
            if oldline != newline {
                let (oldline, newline) = (oldline.clone(), newline.clone());
                self.write_changed_line(offset + i, &oldline, &newline, px)?;
            }
        }

        // Rows the new screen no longer covers.
        for i in newscr.len()..oldscr.len() {
            self.hide_cursor();
            let y = offset + i;
            self.emit_move(0, y)?;
            self.posxy = (0, y);
            let el = self.caps.el.clone();
            self.write_code(&el);
        }

        self.show_cursor();
        self.screen = screen;
        self.move_cursor(cx, cy)?;
        self.flushoutput()
    }

    fn move_cursor(&mut self, x: usize, y: usize) -> Result<()> {
        if y < self.offset || y >= self.offset + self.height {
            self.event_queue.insert(Event::Scroll);
            Ok(())
        } else {
            self.emit_move(x, y)?;
            self.posxy = (x, y);
            self.flushoutput()
        }
    }

    fn get_event(&mut self, block: bool) -> Result<Option<Event>> {
        self.check_sigwinch();
        while self.event_queue.is_empty() {
            if !block && !self.wait(Some(Duration::ZERO))? {
                return Ok(None);
            }
            loop {
                let mut byte = [0u8; 1];
                match unistd::read(self.input_fd, &mut byte) {
                    Ok(0) => return Err(Error::Eof),
                    Ok(_) => {
                        self.push_char(byte[0]);
                        break;
                    }
                    Err(nix::errno::Errno::EINTR) => {
                        self.check_sigwinch();
                        if !self.event_queue.is_empty() {
                            return Ok(self.event_queue.get());
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if !block {
                break;
            }
        }
        Ok(self.event_queue.get())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !self.event_queue.is_empty() {
            return Ok(true);
        }
        let timeout_ms: libc::c_int = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        loop {
            let mut fds = [PollFd::new(self.input_fd, PollFlags::POLLIN)];
            match poll::poll(&mut fds, timeout_ms) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(nix::errno::Errno::EINTR) => {
                    self.check_sigwinch();
                    if !self.event_queue.is_empty() {
                        return Ok(true);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn push_char(&mut self, byte: u8) {
        self.event_queue.push(byte);
    }

    fn getpending(&mut self) -> Result<KeyEvent> {
        let mut ev = KeyEvent::default();
        while let Some(queued) = self.event_queue.get() {
            if let Event::Key(k) = queued {
                ev.keys.extend(k.keys);
                ev.raw.extend(k.raw);
            }
        }
        let mut amount: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.input_fd, libc::FIONREAD, &mut amount) };
        if rc == 0 && amount > 0 {
            let mut buf = vec![0u8; amount as usize];
            let got = unistd::read(self.input_fd, &mut buf)?;
            buf.truncate(got);
            ev.keys
                .extend(String::from_utf8_lossy(&buf).chars().map(Key::Char));
            ev.raw.extend(buf);
        }
        Ok(ev)
    }

    fn forgetinput(&mut self) -> Result<()> {
        termios::tcflush(self.input_fd, FlushArg::TCIFLUSH)?;
        Ok(())
    }

    fn beep(&mut self) {
        let bel = self.caps.bel.clone();
        self.write_code(&bel);
        let _ = self.flushoutput();
    }

    fn clear(&mut self) {
        let clear = self.caps.clear.clone();
        self.write_code(&clear);
        self.gone_tall = true;
        self.posxy = (0, 0);
        self.screen.clear();
    }

    fn finish(&mut self) -> Result<()> {
        let mut y = self.screen.len() as i64 - 1;
        while y >= 0 && self.screen[y as usize].is_empty() {
            y -= 1;
        }
        let y = y.max(0) as usize;
        let target = y.min(self.height + self.offset - 1).max(self.offset);
        self.emit_move(0, target)?;
        self.posxy = (0, target);
        self.write_text("\n\r");
        self.flushoutput()
    }

    fn set_cursor_vis(&mut self, visible: bool) {
        if visible {
            self.show_cursor();
        } else {
            self.hide_cursor();
        }
        let _ = self.flushoutput();
    }

    fn repaint_prep(&mut self) {
        // Fill the cached screen with garbage so every visible row differs
        // and gets rewritten.
        let garbage = "\0".repeat(self.width);
        if !self.gone_tall {
            self.posxy = (0, self.posxy.1);
            self.write_text("\r");
            let rows = self.screen.len();
            self.screen = vec![garbage; rows];
        } else {
            self.posxy = (0, self.offset);
            let _ = self.emit_move(0, self.offset);
            self.screen = vec![garbage; self.height];
        }
    }

    fn height(&self) -> usize {
        self.height
    }

    fn width(&self) -> usize {
        self.width
    }
}

impl Drop for UnixConsole {
    fn drop(&mut self) {
        if self.saved_termios.is_some() {
            let _ = self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_prefix_stops_at_esc() {
        let old: Vec<char> = "ab\x1b[mcd".chars().collect();
        let new: Vec<char> = "ab\x1b[mxd".chars().collect();
        assert_eq!(common_prefix_no_esc(&old, &new), 2);
    }

    #[test]
    fn test_common_prefix_plain() {
        let old: Vec<char> = "hello".chars().collect();
        let new: Vec<char> = "help!".chars().collect();
        assert_eq!(common_prefix_no_esc(&old, &new), 3);
        assert_eq!(common_prefix_no_esc(&old, &old), 5);
    }

    #[test]
    fn test_tail_slice_clamps() {
        let v: Vec<char> = "abcdef".chars().collect();
        assert_eq!(tail_slice(&v, 1, 2), &v[1..4]);
        assert_eq!(tail_slice(&v, 5, 2), &[] as &[char]);
        assert_eq!(tail_slice(&v, 0, 10), &[] as &[char]);
    }

    #[test]
    fn test_delay_regex() {
        let re = delay_regex();
        let caps = re.captures(b"\x1b[2J$<50*>tail").unwrap();
        assert_eq!(caps.get(1).unwrap().as_bytes(), b"50");
        assert_eq!(caps.get(2).unwrap().as_bytes(), b"*");
        assert!(re.captures(b"no delay here").is_none());
        let caps = re.captures(b"$<5>").unwrap();
        assert_eq!(caps.get(1).unwrap().as_bytes(), b"5");
        assert_eq!(caps.get(2).unwrap().as_bytes(), b"");
    }
}
