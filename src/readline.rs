//! A compatibility layer exposing the conventional readline surface on
//! top of [`Reader`]: history manipulation, completer configuration,
//! startup hooks, history files, and multi-line input.
//!
//! The readline-alike feature also supplies `maybe-accept`: Enter inserts
//! a newline while the caller's `more_lines` hook asks for more (or while
//! the cursor sits above the final line), and accepts otherwise.

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::path::Path;

use crate::console::Console;
use crate::errors::{Error, Result};
use crate::keymap::Translated;
use crate::reader::{CmdKind, CommandDef, Feature, Reader};

pub fn readline_alike_feature<C: Console>() -> Feature<C> {
    Feature {
        name: "readline-alike",
        bindings: readline_alike_bindings,
        commands: readline_alike_commands,
        after_command: Some(readline_alike_after_command),
        on_prepare: None,
        on_finish: None,
    }
}

fn readline_alike_bindings() -> Vec<(String, String)> {
    vec![("\\n".to_string(), "maybe-accept".to_string())]
}

fn readline_alike_commands<C: Console>() -> Vec<CommandDef<C>> {
    vec![CommandDef {
        name: "maybe-accept",
        kind: CmdKind::Normal,
        run: cmd_maybe_accept,
    }]
}

/// Insert a newline when the input is visibly unfinished (cursor above the
/// last line, or `more_lines` says so); accept otherwise.
fn cmd_maybe_accept<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.dirty = true; // hides the completion menu if one is up
    let text = r.get_str();
    let above_last_line = r.buffer[r.pos..].contains(&'\n');
    let wants_more = match r.more_lines.as_mut() {
        Some(more) => more(&text),
        None => false,
    };
    if above_last_line || wants_more {
        r.insert("\n");
    } else {
        r.finished = true;
    }
    Ok(())
}

/// Single-line reads stay single-line even when history navigation drags
/// a multi-line entry in.
fn readline_alike_after_command<C: Console>(r: &mut Reader<C>, _name: &'static str) {
    if r.enforce_single_line
        && r.more_lines.is_none()
        && let Some(idx) = r.buffer.iter().position(|&c| c == '\n')
    {
        r.buffer.truncate(idx);
        if r.pos > r.buffer.len() {
            r.pos = r.buffer.len();
        }
        r.dirty = true;
    }
}

// ---- history file codec ----
//
// One entry per line; the inner lines of a multi-line entry are stored
// with \r\n endings so the file stays line-per-entry for other readline
// implementations, which ignore the stray \r.

pub(crate) fn parse_history_lines(content: &str) -> Vec<String> {
    let mut history = Vec::new();
    let mut continuation: Vec<&str> = Vec::new();
    for line in content.split_inclusive('\n') {
        if line.ends_with("\r\n") {
            continuation.push(line);
        } else {
            let mut entry = line.strip_suffix('\n').unwrap_or(line).to_string();
            if !continuation.is_empty() {
                entry = continuation.concat().replace('\r', "") + &entry;
                continuation.clear();
            }
            if !entry.is_empty() {
                history.push(entry);
            }
        }
    }
    history
}

pub(crate) fn format_history(entries: &[String]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.replace('\n', "\r\n"));
        out.push('\n');
    }
    out
}

fn histline(line: &str) -> String {
    line.strip_suffix('\n').unwrap_or(line).to_string()
}

/// The stable embedder surface, bound to the unix console.
#[cfg(unix)]
pub struct Readline {
    reader: Reader<crate::unix_console::UnixConsole>,
    /// Entries written by `write_history_file`; -1 writes everything.
    history_length: i64,
    startup_hook:
        Option<Box<dyn FnMut(&mut Reader<crate::unix_console::UnixConsole>)>>,
}

#[cfg(unix)]
impl Readline {
    pub fn new() -> Result<Readline> {
        Readline::with_config(crate::config::Config::load())
    }

    pub fn with_config(config: crate::config::Config) -> Result<Readline> {
        let console = crate::unix_console::UnixConsole::new()?;
        let reader =
            Reader::with_features(console, crate::reader::default_features(), config)?;
        Ok(Readline {
            reader,
            history_length: -1,
            startup_hook: None,
        })
    }

    /// Direct access for embedders that outgrow this surface.
    pub fn reader(&mut self) -> &mut Reader<crate::unix_console::UnixConsole> {
        &mut self.reader
    }

    /// Read a single-line input under `prompt`.
    pub fn input(&mut self, prompt: &str) -> Result<String> {
        self.reader.ps1 = prompt.to_string();
        self.reader.more_lines = None;
        self.reader.enforce_single_line = true;
        let hook = match &mut self.startup_hook {
            Some(hook) => Some(&mut **hook),
            None => None,
        };
        let result = self.reader.readline(hook);
        self.reader.enforce_single_line = false;
        result
    }

    /// Read a possibly multi-line input, asking for more lines as long as
    /// `more_lines(text)` is true.
    pub fn multiline_input(
        &mut self,
        more_lines: impl FnMut(&str) -> bool + 'static,
        ps1: &str,
        ps2: &str,
    ) -> Result<String> {
        let saved = (
            self.reader.ps1.clone(),
            self.reader.ps2.clone(),
            self.reader.ps3.clone(),
            self.reader.ps4.clone(),
        );
        self.reader.more_lines = Some(Box::new(more_lines));
        self.reader.ps1 = ps1.to_string();
        self.reader.ps2 = ps2.to_string();
        self.reader.ps3 = ps1.to_string();
        self.reader.ps4 = ps2.to_string();
        let hook = match &mut self.startup_hook {
            Some(hook) => Some(&mut **hook),
            None => None,
        };
        let result = self.reader.readline(hook);
        self.reader.more_lines = None;
        (self.reader.ps1, self.reader.ps2, self.reader.ps3, self.reader.ps4) = saved;
        result
    }

    /// No-op: GNU readline init strings are not interpreted.
    pub fn parse_and_bind(&mut self, _string: &str) {}

    pub fn set_startup_hook(
        &mut self,
        hook: Option<
            Box<dyn FnMut(&mut Reader<crate::unix_console::UnixConsole>)>,
        >,
    ) {
        self.startup_hook = hook;
    }

    pub fn set_completer(
        &mut self,
        completer: impl FnMut(&str, &str) -> Vec<String> + 'static,
    ) {
        self.reader.set_completer(Box::new(completer));
    }

    pub fn get_completer(&self) -> Option<&crate::completion::Completer> {
        self.reader.completion.completer.as_ref()
    }

    pub fn set_completer_delims(&mut self, delims: &str) {
        self.reader.completion.delimiters = delims.to_string();
    }

    pub fn get_completer_delims(&self) -> String {
        let mut chars: Vec<char> = self.reader.completion.delimiters.chars().collect();
        chars.sort_unstable();
        chars.into_iter().collect()
    }

    pub fn add_history(&mut self, line: &str) {
        self.reader.history.history.push(histline(line));
    }

    pub fn clear_history(&mut self) {
        self.reader.history.history.clear();
    }

    pub fn get_current_history_length(&self) -> usize {
        self.reader.history.history.len()
    }

    pub fn get_history_length(&self) -> i64 {
        self.history_length
    }

    pub fn set_history_length(&mut self, length: i64) {
        self.history_length = length;
    }

    /// One-based, as the C readline has it.
    pub fn get_history_item(&self, index: usize) -> Option<&str> {
        if index >= 1 {
            self.reader.history.history.get(index - 1).map(String::as_str)
        } else {
            None
        }
    }

    pub fn remove_history_item(&mut self, index: usize) -> Result<()> {
        if index < self.reader.history.history.len() {
            self.reader.history.history.remove(index);
            Ok(())
        } else {
            Err(Error::HistoryIndex(index))
        }
    }

    pub fn replace_history_item(&mut self, index: usize, line: &str) -> Result<()> {
        if index < self.reader.history.history.len() {
            self.reader.history.history[index] = histline(line);
            Ok(())
        } else {
            Err(Error::HistoryIndex(index))
        }
    }

    pub fn get_line_buffer(&self) -> String {
        self.reader.get_str()
    }

    pub fn insert_text(&mut self, text: &str) {
        self.reader.insert(text);
    }

    fn idxs(&self) -> (usize, usize) {
        let cursor = self.reader.pos;
        let mut start = cursor;
        while start > 0
            && !self
                .reader
                .completion
                .delimiters
                .contains(self.reader.buffer[start - 1])
        {
            start -= 1;
        }
        (start, cursor)
    }

    pub fn get_begidx(&self) -> usize {
        self.idxs().0
    }

    pub fn get_endidx(&self) -> usize {
        self.idxs().1
    }

    pub fn read_history_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let content = fs::read_to_string(path)?;
        self.reader
            .history
            .history
            .extend(parse_history_lines(&content));
        Ok(())
    }

    pub fn write_history_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let history = &self.reader.history.history;
        let trimmed = if self.history_length >= 0 {
            let cut = history.len().saturating_sub(self.history_length as usize);
            &history[cut..]
        } else {
            &history[..]
        };
        fs::write(path, format_history(trimmed))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::reader::tests::{cmd_event, cmd_event_key, reader_with_events};

    #[test]
    fn test_history_codec_roundtrip() {
        let entries = vec![
            "print(1)".to_string(),
            "if x:\n    pass".to_string(),
            "done".to_string(),
        ];
        let text = format_history(&entries);
        assert_eq!(text, "print(1)\nif x:\r\n    pass\ndone\n");
        assert_eq!(parse_history_lines(&text), entries);
    }

    #[test]
    fn test_history_parse_skips_blank_lines() {
        assert_eq!(
            parse_history_lines("a\n\nb\n"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_history_file_via_fs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let entries = vec!["one".to_string(), "two\nthree".to_string()];
        fs::write(&path, format_history(&entries)).unwrap();
        let read = parse_history_lines(&fs::read_to_string(&path).unwrap());
        assert_eq!(read, entries);
    }

    #[test]
    fn test_multiline_input_scenario() {
        // ps1 ">>> ", ps2 "... ", more_lines = text ends with ':'
        let mut r = reader_with_events(vec![]);
        r.ps1 = ">>> ".to_string();
        r.ps2 = "... ".to_string();
        r.more_lines = Some(Box::new(|text: &str| text.ends_with(':')));
        for c in "if x:".chars() {
            r.console.events.push_back(cmd_event_key("self-insert", c));
        }
        r.console.events.push_back(cmd_event("maybe-accept"));
        for c in "    pass".chars() {
            r.console.events.push_back(cmd_event_key("self-insert", c));
        }
        r.console.events.push_back(cmd_event("maybe-accept"));
        assert_eq!(r.readline(None).unwrap(), "if x:\n    pass");
    }

    #[test]
    fn test_maybe_accept_inserts_when_cursor_above_last_line() {
        let mut r = reader_with_events(vec![]);
        r.set_buffer("a\nb");
        r.pos = 1; // on the first line
        r.do_cmd(&Translated {
            cmd: "maybe-accept".to_string(),
            keys: Vec::new(),
            from_fallback: false,
        })
        .unwrap();
        assert!(!r.finished);
        assert_eq!(r.get_str(), "a\n\nb");
    }

    #[test]
    fn test_single_line_enforcement() {
        let mut r = reader_with_events(vec![]);
        r.enforce_single_line = true;
        r.history.history = vec!["first\nsecond".to_string()];
        r.history.historyi = 1;
        r.do_cmd(&Translated {
            cmd: "previous-history".to_string(),
            keys: Vec::new(),
            from_fallback: false,
        })
        .unwrap();
        assert_eq!(r.get_str(), "first");
        assert!(r.pos <= r.buffer.len());
    }
}
