//! The reader: editable buffer, cursor, prompts, and the command loop.
//!
//! A [`Reader`] drives a [`Console`]: it pulls events, translates them
//! through the active keymap, dispatches the named command, and repaints
//! the wrapped view of the buffer after every change. Feature modules
//! (core editing, history, completion, the readline-alike layer) each
//! contribute their keymap slice, command definitions and lifecycle hooks
//! through a [`Feature`] entry walked in order at construction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use log::debug;
use unicode_width::UnicodeWidthStr;

use crate::commands;
use crate::completion::{self, CompletionState};
use crate::config::Config;
use crate::console::Console;
use crate::errors::{Error, Result};
use crate::event::{Event, Key};
use crate::history::{self, HistoryState, IsearchDirection};
use crate::keymap::{KeymapTranslator, Translated};
use crate::readline;

/// How long an ambiguous key prefix waits for its tail before the shorter
/// binding wins.
const AMBIGUITY_TIMEOUT: Duration = Duration::from_millis(300);

/// Character classes used by word motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Word,
    Whitespace,
    Symbol,
}

/// Command classes the dispatcher cares about: whether the pending numeric
/// argument survives, whether kills chain into one kill-ring entry, whether
/// yank-pop may follow, and whether the command ends the readline call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmdKind {
    #[default]
    Normal,
    KeepsArg,
    Kill,
    Yank,
    Finish,
}

/// A named command: a plain function over the reader, constructed fresh
/// for every invocation by way of being stateless.
pub struct CommandDef<C: Console> {
    pub name: &'static str,
    pub kind: CmdKind,
    pub run: fn(&mut Reader<C>, &Translated) -> Result<()>,
}

impl<C: Console> Clone for CommandDef<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Console> Copy for CommandDef<C> {}

/// One composable feature: its keymap slice, its commands, and optional
/// lifecycle hooks. Features are walked in order; later keymap entries
/// override earlier ones.
pub struct Feature<C: Console> {
    pub name: &'static str,
    pub bindings: fn() -> Vec<(String, String)>,
    pub commands: fn() -> Vec<CommandDef<C>>,
    pub after_command: Option<fn(&mut Reader<C>, &'static str)>,
    pub on_prepare: Option<fn(&mut Reader<C>)>,
    pub on_finish: Option<fn(&mut Reader<C>)>,
}

/// The default feature stack: core editing, history, completion, and the
/// readline-alike layer (`maybe-accept` and friends).
pub fn default_features<C: Console>() -> Vec<Feature<C>> {
    vec![
        commands::core_feature(),
        history::history_feature(),
        completion::completion_feature(),
        readline::readline_alike_feature(),
    ]
}

pub struct Reader<C: Console> {
    pub console: C,
    pub buffer: Vec<char>,
    pub pos: usize,
    /// First-line prompt.
    pub ps1: String,
    /// Continuation-line prompt.
    pub ps2: String,
    /// In-isearch counterparts of ps1/ps2 (the cursor line shows the
    /// search prompt itself).
    pub ps3: String,
    pub ps4: String,
    pub kill_ring: Vec<Vec<char>>,
    pub arg: Option<i64>,
    pub dirty: bool,
    pub finished: bool,
    pub msg: String,
    pub help_text: String,
    pub last_command: Option<&'static str>,
    pub(crate) last_kind: CmdKind,
    pub(crate) abort: Option<Error>,
    pub history: HistoryState,
    pub completion: CompletionState,
    /// While set, `maybe-accept` keeps asking for more lines.
    pub more_lines: Option<Box<dyn FnMut(&str) -> bool>>,
    /// Truncate the buffer to its first line after every command; the
    /// plain `input()` path wants single-line buffers no matter what
    /// history drags in.
    pub(crate) enforce_single_line: bool,
    pub(crate) config: Config,
    syntax_overrides: HashMap<char, Syntax>,
    commands: HashMap<String, CommandDef<C>>,
    input_trans: Vec<KeymapTranslator>,
    pub(crate) isearch_trans: KeymapTranslator,
    /// Keys consumed by an inner keymap that must be reinterpreted by the
    /// outer one (isearch exit on an arrow key).
    pub(crate) untranslated: VecDeque<Key>,
    screeninfo: Vec<(usize, Vec<u8>)>,
    pub(crate) cxy: (usize, usize),
    /// Cursor position in logical (column, line) coordinates, from the
    /// last screen computation.
    pub lxy: (usize, usize),
    after_hooks: Vec<fn(&mut Reader<C>, &'static str)>,
    prepare_hooks: Vec<fn(&mut Reader<C>)>,
    finish_hooks: Vec<fn(&mut Reader<C>)>,
}

impl<C: Console> Reader<C> {
    pub fn new(console: C) -> Result<Reader<C>> {
        Reader::with_features(console, default_features(), Config::default())
    }

    pub fn with_features(
        console: C,
        features: Vec<Feature<C>>,
        config: Config,
    ) -> Result<Reader<C>> {
        let mut bindings: Vec<(String, String)> = Vec::new();
        let mut command_table: HashMap<String, CommandDef<C>> = HashMap::new();
        let mut after_hooks = Vec::new();
        let mut prepare_hooks = Vec::new();
        let mut finish_hooks = Vec::new();

        for feature in &features {
            debug!("installing feature {}", feature.name);
            bindings.extend((feature.bindings)());
            for def in (feature.commands)() {
                // Both spellings resolve to the same command.
                let alt = if def.name.contains('-') {
                    def.name.replace('-', "_")
                } else {
                    def.name.replace('_', "-")
                };
                command_table.insert(def.name.to_string(), def);
                command_table.insert(alt, def);
            }
            if let Some(hook) = feature.after_command {
                after_hooks.push(hook);
            }
            if let Some(hook) = feature.on_prepare {
                prepare_hooks.push(hook);
            }
            if let Some(hook) = feature.on_finish {
                finish_hooks.push(hook);
            }
        }

        for (spec, cmd) in &config.keys.bindings {
            bindings.push((spec.clone(), cmd.clone()));
        }

        let base = KeymapTranslator::new(&bindings, "invalid-key", "self-insert")?;
        let isearch_trans = history::isearch_translator()?;
        let completion_state = CompletionState::new(&config.completion);
        let history_state = HistoryState::default();

        Ok(Reader {
            console,
            buffer: Vec::new(),
            pos: 0,
            ps1: "->> ".to_string(),
            ps2: "/>> ".to_string(),
            ps3: "|.. ".to_string(),
            ps4: "\\__ ".to_string(),
            kill_ring: Vec::new(),
            arg: None,
            dirty: true,
            finished: false,
            msg: String::new(),
            help_text: default_help_text(),
            last_command: None,
            last_kind: CmdKind::Normal,
            abort: None,
            history: history_state,
            completion: completion_state,
            more_lines: None,
            enforce_single_line: false,
            config,
            syntax_overrides: HashMap::new(),
            commands: command_table,
            input_trans: vec![base],
            isearch_trans,
            untranslated: VecDeque::new(),
            screeninfo: Vec::new(),
            cxy: (0, 0),
            lxy: (0, 0),
            after_hooks,
            prepare_hooks,
            finish_hooks,
        })
    }

    // ---- buffer primitives ----

    pub fn get_str(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn insert(&mut self, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        self.buffer.splice(self.pos..self.pos, chars);
        self.pos += n;
        self.dirty = true;
    }

    pub fn set_buffer(&mut self, text: &str) {
        self.buffer = text.chars().collect();
        self.pos = self.buffer.len();
        self.dirty = true;
    }

    /// Start of the line containing `p`.
    pub fn bol(&self, p: usize) -> usize {
        let mut i = p.min(self.buffer.len());
        while i > 0 && self.buffer[i - 1] != '\n' {
            i -= 1;
        }
        i
    }

    /// End of the line containing `p` (index of the newline, or the buffer
    /// end).
    pub fn eol(&self, p: usize) -> usize {
        let mut i = p.min(self.buffer.len());
        while i < self.buffer.len() && self.buffer[i] != '\n' {
            i += 1;
        }
        i
    }

    pub fn syntax_of(&self, c: char) -> Syntax {
        if let Some(s) = self.syntax_overrides.get(&c) {
            return *s;
        }
        if c.is_alphanumeric() {
            Syntax::Word
        } else if c == ' ' || c == '\t' {
            Syntax::Whitespace
        } else {
            Syntax::Symbol
        }
    }

    /// Reclassify a character for word motion; the language shell marks
    /// `.`, `_` and digits as word characters this way.
    pub fn set_syntax(&mut self, c: char, s: Syntax) {
        self.syntax_overrides.insert(c, s);
    }

    /// Beginning of the word at or before `p`.
    pub fn bow(&self, p: usize) -> usize {
        let mut i = p.min(self.buffer.len());
        while i > 0 && self.syntax_of(self.buffer[i - 1]) != Syntax::Word {
            i -= 1;
        }
        while i > 0 && self.syntax_of(self.buffer[i - 1]) == Syntax::Word {
            i -= 1;
        }
        i
    }

    /// End of the word at or after `p`.
    pub fn eow(&self, p: usize) -> usize {
        let mut i = p.min(self.buffer.len());
        while i < self.buffer.len() && self.syntax_of(self.buffer[i]) != Syntax::Word {
            i += 1;
        }
        while i < self.buffer.len() && self.syntax_of(self.buffer[i]) == Syntax::Word {
            i += 1;
        }
        i
    }

    /// Report a non-fatal problem: transient message plus a beep.
    pub fn error(&mut self, msg: &str) {
        self.msg = format!("! {msg} ");
        self.dirty = true;
        self.console.beep();
    }

    /// The pending numeric argument, or `default`. Consuming it does not
    /// clear it; the dispatcher clears it after any non-argument command.
    pub fn get_arg(&self, default: i64) -> i64 {
        self.arg.unwrap_or(default)
    }

    pub fn push_input_trans(&mut self, trans: KeymapTranslator) {
        self.input_trans.push(trans);
    }

    pub fn pop_input_trans(&mut self) {
        if self.input_trans.len() > 1 {
            self.input_trans.pop();
        }
    }

    // ---- screen computation ----

    fn get_prompt(&self, lineno: usize, cursor_on_line: bool) -> String {
        if cursor_on_line && let Some(arg) = self.arg {
            return format!("(arg: {arg}) ");
        }
        let searching = self.history.isearch_direction != IsearchDirection::None;
        if searching && cursor_on_line {
            let d = match self.history.isearch_direction {
                IsearchDirection::Forwards => 'f',
                _ => 'r',
            };
            return format!("({d}-search `{}') ", self.history.isearch_term);
        }
        match (searching, lineno) {
            (false, 0) => self.ps1.clone(),
            (false, _) => self.ps2.clone(),
            (true, 0) => self.ps3.clone(),
            (true, _) => self.ps4.clone(),
        }
    }

    /// Build the virtual screen: one prompt-prefixed, wrap-split row per
    /// visual line, a `\` continuation glyph in the reserved last column,
    /// then any completion menu and transient message lines.
    pub(crate) fn calc_screen(&mut self) -> Vec<String> {
        let text = self.get_str();
        let lines: Vec<&str> = text.split('\n').collect();
        let w = self.console.width().saturating_sub(1).max(1);
        let mut screen: Vec<String> = Vec::new();
        let mut screeninfo: Vec<(usize, Vec<u8>)> = Vec::new();
        let mut p = self.pos as i64;

        for (ln, line) in lines.iter().enumerate() {
            let line_chars: Vec<char> = line.chars().collect();
            let ll = line_chars.len() as i64;
            let cursor_on_line = p >= 0 && p <= ll;
            if cursor_on_line {
                self.lxy = (p as usize, ln);
            }
            let prompt = self.get_prompt(ln, cursor_on_line);
            p -= ll + 1;

            let (prompt, lp) = process_prompt(&prompt);
            let (disp, b) = disp_str(&line_chars);
            let first_cap = w.saturating_sub(lp).max(1);

            if disp.len() <= first_cap {
                let row: String = prompt.chars().chain(disp.iter().copied()).collect();
                screen.push(row);
                let mut b = b;
                b.push(1);
                screeninfo.push((lp, b));
            } else {
                let first: String = prompt
                    .chars()
                    .chain(disp[..first_cap].iter().copied())
                    .chain(['\\'])
                    .collect();
                screen.push(first);
                screeninfo.push((lp, b[..first_cap].to_vec()));
                let mut i = first_cap;
                while disp.len() - i > w {
                    let row: String = disp[i..i + w].iter().copied().chain(['\\']).collect();
                    screen.push(row);
                    screeninfo.push((0, b[i..i + w].to_vec()));
                    i += w;
                }
                let last: String = disp[i..].iter().collect();
                screen.push(last);
                let mut b = b[i..].to_vec();
                b.push(1);
                screeninfo.push((0, b));
            }
        }

        self.screeninfo = screeninfo;
        self.cxy = self.pos2xy();

        if self.completion.menu_visible {
            for mline in self.completion.menu.clone() {
                screen.push(mline);
                self.screeninfo.push((0, Vec::new()));
            }
        }
        if !self.msg.is_empty() {
            for mline in self.msg.split('\n') {
                screen.push(mline.to_string());
                self.screeninfo.push((0, Vec::new()));
            }
        }
        screen
    }

    /// Screen coordinates of the cursor. Each row's info holds its prompt
    /// width and one marker per display cell (1 where a buffer position
    /// starts, 0 for spill cells of caret-expanded characters); rows that
    /// end a logical line carry one extra slot for the newline/end
    /// position.
    fn pos2xy(&self) -> (usize, usize) {
        let mut pos = self.pos;
        for (y, (lp, b)) in self.screeninfo.iter().enumerate() {
            let ones = b.iter().filter(|&&v| v == 1).count();
            if pos < ones {
                let mut seen = 0;
                for (i, &v) in b.iter().enumerate() {
                    if v == 1 {
                        if seen == pos {
                            return (lp + i, y);
                        }
                        seen += 1;
                    }
                }
                break;
            }
            pos -= ones;
        }
        (0, self.screeninfo.len().saturating_sub(1))
    }

    pub fn refresh(&mut self) -> Result<()> {
        let screen = self.calc_screen();
        let cxy = self.cxy;
        self.console.refresh(screen, cxy)?;
        self.dirty = false;
        Ok(())
    }

    fn update_cursor(&mut self) -> Result<()> {
        self.cxy = self.pos2xy();
        self.console.move_cursor(self.cxy.0, self.cxy.1)
    }

    // ---- dispatch ----

    fn lookup_command(&self, name: &str) -> CommandDef<C> {
        match self.commands.get(name) {
            Some(def) => *def,
            None => commands::invalid_command_def(),
        }
    }

    pub fn do_cmd(&mut self, translated: &Translated) -> Result<()> {
        let def = self.lookup_command(&translated.cmd);
        debug!("command {}", def.name);
        (def.run)(self, translated)?;

        if def.kind != CmdKind::KeepsArg && self.arg.is_some() {
            self.arg = None;
            self.dirty = true;
        }

        let hooks = self.after_hooks.clone();
        for hook in hooks {
            hook(self, def.name);
        }

        if self.dirty {
            self.refresh()?;
        } else {
            self.update_cursor()?;
        }

        if def.kind == CmdKind::Finish {
            self.finished = true;
        }
        self.last_command = Some(def.name);
        self.last_kind = def.kind;
        Ok(())
    }

    /// Pull events until one translated command has been dispatched.
    /// Returns false when `block` is false and nothing was ready.
    pub fn handle1(&mut self, block: bool) -> Result<bool> {
        if !self.msg.is_empty() {
            self.msg.clear();
            self.dirty = true;
        }
        loop {
            if let Some(key) = self.untranslated.pop_front() {
                if let Some(t) = self.input_trans.last_mut() {
                    t.push_keys(&[key]);
                }
            } else {
                let event = match self.console.get_event(block)? {
                    Some(event) => event,
                    None => return Ok(false),
                };
                match event {
                    Event::Key(k) => {
                        if let Some(t) = self.input_trans.last_mut() {
                            t.push(&k);
                        }
                    }
                    Event::Scroll => {
                        self.refresh()?;
                    }
                    Event::Resize | Event::Repaint => {
                        self.console.repaint_prep();
                        self.dirty = true;
                        self.refresh()?;
                    }
                    Event::Command { name, keys } => {
                        let tr = Translated {
                            cmd: name,
                            keys,
                            from_fallback: false,
                        };
                        self.do_cmd(&tr)?;
                        return Ok(true);
                    }
                }
            }

            let mut cmd = self.input_trans.last_mut().and_then(KeymapTranslator::get);
            if cmd.is_none() && self.input_trans.last().is_some_and(KeymapTranslator::has_pending) {
                // Ambiguous prefix: give the longer sequence a moment to
                // arrive, then commit the shorter binding.
                if self.console.wait(Some(AMBIGUITY_TIMEOUT))? {
                    continue;
                }
                if let Some(t) = self.input_trans.last_mut() {
                    t.timeout_flush();
                    cmd = t.get();
                }
            }

            match cmd {
                Some(tr) => {
                    if self.input_trans.last().is_some_and(|t| t.one_shot) {
                        self.pop_input_trans();
                    }
                    self.do_cmd(&tr)?;
                    return Ok(true);
                }
                None => {
                    if block {
                        continue;
                    }
                    return Ok(false);
                }
            }
        }
    }

    // ---- lifecycle ----

    fn prepare(
        &mut self,
        startup_hook: Option<&mut (dyn FnMut(&mut Reader<C>) + 'static)>,
    ) -> Result<()> {
        self.console.prepare()?;
        self.buffer.clear();
        self.pos = 0;
        self.dirty = true;
        self.finished = false;
        self.abort = None;
        self.arg = None;
        self.msg.clear();
        self.last_command = None;
        self.last_kind = CmdKind::Normal;
        self.input_trans.truncate(1);
        self.untranslated.clear();
        let hooks = self.prepare_hooks.clone();
        for hook in hooks {
            hook(self);
        }
        if let Some(hook) = startup_hook {
            hook(self);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let hooks = self.finish_hooks.clone();
        for hook in hooks {
            hook(self);
        }
        self.console.finish()
    }

    fn read_loop(&mut self) -> Result<String> {
        self.refresh()?;
        while !self.finished {
            let progressed = self.handle1(true)?;
            if let Some(err) = self.abort.take() {
                return Err(err);
            }
            if !progressed {
                // A blocking console only returns nothing at end of input.
                return Err(Error::Eof);
            }
        }
        self.finish()?;
        Ok(self.get_str())
    }

    /// Read one input. The terminal is restored on every exit path,
    /// including errors; `Interrupted` and `Eof` surface to the caller
    /// after restoration.
    pub fn readline(
        &mut self,
        startup_hook: Option<&mut (dyn FnMut(&mut Reader<C>) + 'static)>,
    ) -> Result<String> {
        self.prepare(startup_hook)?;
        let result = self.read_loop();
        let restored = self.console.restore();
        match result {
            Ok(line) => {
                restored?;
                Ok(line)
            }
            Err(e) => Err(e),
        }
    }
}

/// Printable form of a buffer line: control characters become caret pairs
/// (`^A`, `^?`), everything else passes through. The second return value
/// marks, per display cell, whether a buffer position starts there.
pub(crate) fn disp_str(line: &[char]) -> (Vec<char>, Vec<u8>) {
    let mut disp = Vec::with_capacity(line.len());
    let mut b = Vec::with_capacity(line.len());
    for &c in line {
        if c == '\x7f' {
            disp.push('^');
            disp.push('?');
            b.push(1);
            b.push(0);
        } else if (c as u32) < 0x20 {
            disp.push('^');
            disp.push((c as u8 + 64) as char);
            b.push(1);
            b.push(0);
        } else {
            disp.push(c);
            b.push(1);
        }
    }
    (disp, b)
}

/// Strip the zero-width run markers (`\x01`..`\x02`) from a prompt and
/// compute its visible width. The runs themselves stay in the output; only
/// their width is excluded.
pub(crate) fn process_prompt(prompt: &str) -> (String, usize) {
    let mut out = String::new();
    let mut width = 0;
    let mut rest = prompt;
    while let Some(s) = rest.find('\x01') {
        let Some(e) = rest[s..].find('\x02').map(|e| s + e) else {
            break;
        };
        out.push_str(&rest[..s]);
        width += UnicodeWidthStr::width(&rest[..s]);
        out.push_str(&rest[s + 1..e]);
        rest = &rest[e + 1..];
    }
    out.push_str(rest);
    width += UnicodeWidthStr::width(rest);
    (out, width)
}

fn default_help_text() -> String {
    "C-a/C-e start/end of line, C-k kill to end, C-y yank, C-r search \
history backwards, M-b/M-f move by words, Tab complete, C-d on an empty \
line ends input."
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::console::test_console::TestConsole;

    pub(crate) fn cmd_event(name: &str) -> Event {
        Event::Command {
            name: name.to_string(),
            keys: Vec::new(),
        }
    }

    pub(crate) fn cmd_event_key(name: &str, key: char) -> Event {
        Event::Command {
            name: name.to_string(),
            keys: vec![Key::Char(key)],
        }
    }

    pub(crate) fn reader_with_events(events: Vec<Event>) -> Reader<TestConsole> {
        Reader::new(TestConsole::with_events(events)).expect("reader")
    }

    #[test]
    fn test_disp_str_expands_controls() {
        let (disp, b) = disp_str(&['\x03', 'h', 'i']);
        assert_eq!(disp.iter().collect::<String>(), "^Chi");
        assert_eq!(b, vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_disp_str_del() {
        let (disp, _) = disp_str(&['\x7f']);
        assert_eq!(disp.iter().collect::<String>(), "^?");
    }

    #[test]
    fn test_process_prompt_zero_width_runs() {
        let (out, width) = process_prompt("\x01\x1b[1m\x02> \x01\x1b[0m\x02");
        assert_eq!(out, "\x1b[1m> \x1b[0m");
        assert_eq!(width, 2);
    }

    #[test]
    fn test_process_prompt_plain() {
        let (out, width) = process_prompt(">>> ");
        assert_eq!(out, ">>> ");
        assert_eq!(width, 4);
    }

    #[test]
    fn test_accept_returns_buffer() {
        let mut r = reader_with_events(vec![
            cmd_event_key("self-insert", 'h'),
            cmd_event_key("self-insert", 'i'),
            cmd_event("accept"),
        ]);
        assert_eq!(r.readline(None).unwrap(), "hi");
        // cursor stayed on the single prompt row throughout
        assert_eq!(r.console.last_cursor().1, 0);
        assert_eq!(r.console.finished, 1);
    }

    #[test]
    fn test_startup_hook_preloads_buffer() {
        let mut r = reader_with_events(vec![cmd_event("accept")]);
        let mut hook = |r: &mut Reader<TestConsole>| r.set_buffer("preloaded");
        assert_eq!(r.readline(Some(&mut hook)).unwrap(), "preloaded");
    }

    #[test]
    fn test_self_insert_backspace_roundtrip() {
        let mut r = reader_with_events(vec![
            cmd_event_key("self-insert", 'a'),
            cmd_event_key("self-insert", 'b'),
            cmd_event("backspace"),
            cmd_event("accept"),
        ]);
        assert_eq!(r.readline(None).unwrap(), "a");
        assert!(r.pos <= r.buffer.len());
    }

    #[test]
    fn test_digit_arg_quoted_insert_scenario() {
        // digit-arg 3, quoted-insert, ESC: three literal escapes, shown in
        // caret notation.
        let mut r = reader_with_events(vec![
            cmd_event_key("digit-arg", '3'),
            cmd_event("quoted-insert"),
            Event::Key(crate::event::KeyEvent::from_char('\x1b')),
            cmd_event("accept"),
        ]);
        let line = r.readline(None).unwrap();
        assert_eq!(line, "\x1b\x1b\x1b");
        assert_eq!(r.history.history, vec!["\x1b\x1b\x1b".to_string()]);
        let rendered = r.console.last_screen().to_vec();
        assert!(rendered[0].contains("^[^[^["), "got {rendered:?}");
    }

    #[test]
    fn test_wrap_narrow_width() {
        // Width 4 wraps prompt+buffer with a continuation marker in
        // column 3 and the cursor on the last row.
        let mut r = reader_with_events(vec![]);
        r.console.width = 4;
        r.ps1 = ">".to_string();
        r.set_buffer("abcd");
        let screen = r.calc_screen();
        assert_eq!(screen, vec![">ab\\".to_string(), "cd".to_string()]);
        assert_eq!(r.cxy, (2, 1));
        assert_eq!(r.lxy, (4, 0));
    }

    #[test]
    fn test_wrap_multiline_prompts() {
        let mut r = reader_with_events(vec![]);
        r.ps1 = ">>> ".to_string();
        r.ps2 = "... ".to_string();
        r.set_buffer("if x:\n    pass");
        let screen = r.calc_screen();
        assert_eq!(
            screen,
            vec![">>> if x:".to_string(), "...     pass".to_string()]
        );
    }

    #[test]
    fn test_cursor_inside_caret_expansion() {
        let mut r = reader_with_events(vec![]);
        r.ps1 = String::new();
        r.set_buffer("\x01x");
        r.pos = 1; // on 'x', which displays after the two-cell ^A
        let _ = r.calc_screen();
        assert_eq!(r.cxy, (2, 0));
    }

    #[test]
    fn test_pos_invariant_over_commands() {
        let mut r = reader_with_events(vec![
            cmd_event_key("self-insert", 'a'),
            cmd_event("left"),
            cmd_event("left"),
            cmd_event("backspace"),
            cmd_event("delete"),
            cmd_event_key("self-insert", 'z'),
            cmd_event("accept"),
        ]);
        let _ = r.readline(None);
        assert!(r.pos <= r.buffer.len());
    }

    #[test]
    fn test_arg_prompt_shown_then_cleared() {
        let mut r = reader_with_events(vec![]);
        r.arg = Some(12);
        r.set_buffer("x");
        let screen = r.calc_screen();
        assert!(screen[0].starts_with("(arg: 12) "));
    }

    #[test]
    fn test_error_sets_msg_and_beeps() {
        let mut r = reader_with_events(vec![]);
        r.error("not found");
        assert_eq!(r.msg, "! not found ");
        assert_eq!(r.console.beeps, 1);
        let screen = r.calc_screen();
        assert!(screen.iter().any(|row| row.contains("! not found")));
    }

    #[test]
    fn test_word_motion_with_syntax_overrides() {
        let mut r = reader_with_events(vec![]);
        r.set_buffer("foo.bar baz");
        assert_eq!(r.bow(7), 4); // "bar"
        r.set_syntax('.', Syntax::Word);
        assert_eq!(r.bow(7), 0); // "foo.bar" is one word now
    }

    #[test]
    fn test_interrupt_aborts_readline() {
        let mut r = reader_with_events(vec![
            cmd_event_key("self-insert", 'x'),
            cmd_event("interrupt"),
        ]);
        match r.readline(None) {
            Err(Error::Interrupted) => {}
            other => panic!("expected Interrupted, got {other:?}"),
        }
    }

    #[test]
    fn test_eof_on_empty_ctrl_d() {
        let mut r = reader_with_events(vec![cmd_event_key("delete", '\x04')]);
        match r.readline(None) {
            Err(Error::Eof) => {}
            other => panic!("expected Eof, got {other:?}"),
        }
    }
}
