//! Programmable completion: stem extraction, the unique/common-prefix
//! policy, and the candidate menu drawn below the editing area.
//!
//! The candidate source is a caller-supplied closure over the stem (and
//! the whole line, for context-sensitive completers). Repeating the
//! complete command pages through the menu; any other command dismisses it
//! on the next refresh.

use unicode_width::UnicodeWidthStr;

use crate::config::CompletionConfig;
use crate::console::Console;
use crate::errors::Result;
use crate::keymap::Translated;
use crate::reader::{CmdKind, CommandDef, Feature, Reader};

/// Candidate source: `(stem, whole_line) -> candidates`.
pub type Completer = Box<dyn FnMut(&str, &str) -> Vec<String>>;

pub struct CompletionState {
    pub menu: Vec<String>,
    pub menu_visible: bool,
    pub menu_start: usize,
    pub choices: Vec<String>,
    /// Characters that terminate a stem, scanning backwards.
    pub delimiters: String,
    /// Column-major menu layout (row-major otherwise).
    pub sort_in_column: bool,
    /// Append a space after a unique completion.
    pub append_space: bool,
    pub completer: Option<Completer>,
}

pub const DEFAULT_DELIMITERS: &str = " \t\n`~!@#$%^&*()-=+[{]}\\|;:'\",<>/?";

impl CompletionState {
    pub fn new(config: &CompletionConfig) -> CompletionState {
        CompletionState {
            menu: Vec::new(),
            menu_visible: false,
            menu_start: 0,
            choices: Vec::new(),
            delimiters: config.delimiters.clone(),
            sort_in_column: config.sort_in_column,
            append_space: config.append_space,
            completer: None,
        }
    }
}

pub fn completion_feature<C: Console>() -> Feature<C> {
    Feature {
        name: "completion",
        bindings: completion_bindings,
        commands: completion_commands,
        after_command: Some(completion_after_command),
        on_prepare: Some(completion_reset),
        on_finish: None,
    }
}

fn completion_bindings() -> Vec<(String, String)> {
    vec![("\t".to_string(), "complete".to_string())]
}

fn completion_commands<C: Console>() -> Vec<CommandDef<C>> {
    vec![CommandDef {
        name: "complete",
        kind: CmdKind::Normal,
        run: cmd_complete,
    }]
}

/// Anything but completing or typing hides the menu and drops the cached
/// candidates.
fn completion_after_command<C: Console>(r: &mut Reader<C>, name: &'static str) {
    if name != "complete" && name != "self-insert" {
        completion_reset(r);
    }
}

fn completion_reset<C: Console>(r: &mut Reader<C>) {
    if r.completion.menu_visible {
        r.dirty = true;
    }
    r.completion.menu.clear();
    r.completion.menu_visible = false;
    r.completion.menu_start = 0;
    r.completion.choices.clear();
}

impl<C: Console> Reader<C> {
    /// The stem under the cursor: the run of non-delimiter characters
    /// ending at the cursor.
    pub fn get_stem(&self) -> String {
        let mut p = self.pos;
        while p > 0 && !self.completion.delimiters.contains(self.buffer[p - 1]) {
            p -= 1;
        }
        self.buffer[p..self.pos].iter().collect()
    }

    pub fn get_completions(&mut self, stem: &str) -> Vec<String> {
        let line = self.get_str();
        match self.completion.completer.as_mut() {
            Some(completer) => {
                let mut candidates = completer(stem, &line);
                candidates.sort();
                candidates
            }
            None => Vec::new(),
        }
    }

    pub fn set_completer(&mut self, completer: Completer) {
        self.completion.completer = Some(completer);
    }
}

fn cmd_complete<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let again = r.last_command == Some("complete");
    let stem = r.get_stem();
    if !again || r.completion.choices.is_empty() {
        r.completion.choices = r.get_completions(&stem);
        r.completion.menu_start = 0;
    }

    match r.completion.choices.len() {
        0 => r.error("no matches"),
        1 => {
            let sole = r.completion.choices[0].clone();
            let tail: String = sole.chars().skip(stem.chars().count()).collect();
            r.insert(&tail);
            if r.completion.append_space {
                r.insert(" ");
            }
        }
        _ => {
            let prefix = common_prefix(&r.completion.choices);
            let tail: String = prefix.chars().skip(stem.chars().count()).collect();
            if !tail.is_empty() {
                r.insert(&tail);
            } else if again && r.completion.menu_visible {
                page_menu(r, true);
            } else {
                page_menu(r, false);
            }
        }
    }
    Ok(())
}

/// Build (or advance) the visible menu page.
fn page_menu<C: Console>(r: &mut Reader<C>, advance: bool) {
    let width = r.console.width();
    let page_rows = (r.console.height() / 3).max(2);
    let words = r.completion.choices.clone();
    if advance {
        let capacity = page_capacity(&words, width, page_rows);
        r.completion.menu_start += capacity;
        if r.completion.menu_start >= words.len() {
            r.completion.menu_start = 0;
        }
    }
    let (menu, _) = build_menu(
        &words,
        r.completion.menu_start,
        width,
        page_rows,
        r.completion.sort_in_column,
    );
    r.completion.menu = menu;
    r.completion.menu_visible = true;
    r.dirty = true;
}

fn item_width(words: &[String]) -> usize {
    words
        .iter()
        .map(|w| UnicodeWidthStr::width(w.as_str()))
        .max()
        .unwrap_or(0)
        + 2
}

fn page_capacity(words: &[String], width: usize, page_rows: usize) -> usize {
    let cols = (width / item_width(words)).max(1);
    cols * page_rows
}

/// Lay out a page of candidates into menu lines, column-major or
/// row-major, with a trailing count when more pages remain.
fn build_menu(
    words: &[String],
    start: usize,
    width: usize,
    page_rows: usize,
    sort_in_column: bool,
) -> (Vec<String>, usize) {
    let iw = item_width(words);
    let cols = (width / iw).max(1);
    let capacity = cols * page_rows;
    let start = start.min(words.len());
    let page = &words[start..(start + capacity).min(words.len())];
    let rows = page.len().div_ceil(cols);
    let mut lines = Vec::with_capacity(rows + 1);
    for row in 0..rows {
        let mut line = String::new();
        for col in 0..cols {
            let idx = if sort_in_column {
                col * rows + row
            } else {
                row * cols + col
            };
            if let Some(word) = page.get(idx) {
                line.push_str(word);
                let pad = iw.saturating_sub(UnicodeWidthStr::width(word.as_str()));
                line.extend(std::iter::repeat_n(' ', pad));
            }
        }
        lines.push(line.trim_end().to_string());
    }
    let shown = page.len();
    let remaining = words.len() - start - shown;
    if remaining > 0 {
        lines.push(format!("[ {remaining} more ]"));
    }
    (lines, shown)
}

fn common_prefix(words: &[String]) -> String {
    let mut prefix: Vec<char> = match words.first() {
        Some(w) => w.chars().collect(),
        None => return String::new(),
    };
    for word in &words[1..] {
        let chars: Vec<char> = word.chars().collect();
        let mut keep = 0;
        while keep < prefix.len() && keep < chars.len() && prefix[keep] == chars[keep] {
            keep += 1;
        }
        prefix.truncate(keep);
        if prefix.is_empty() {
            break;
        }
    }
    prefix.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::tests::reader_with_events;

    fn tr(name: &str) -> Translated {
        Translated {
            cmd: name.to_string(),
            keys: Vec::new(),
            from_fallback: false,
        }
    }

    fn with_completer(candidates: &[&str]) -> crate::reader::Reader<crate::console::test_console::TestConsole> {
        let mut r = reader_with_events(vec![]);
        let owned: Vec<String> = candidates.iter().map(|s| s.to_string()).collect();
        r.set_completer(Box::new(move |stem, _line| {
            owned.iter().filter(|c| c.starts_with(stem)).cloned().collect()
        }));
        r
    }

    #[test]
    fn test_get_stem_stops_at_delimiter() {
        let mut r = reader_with_events(vec![]);
        r.set_buffer("print(va");
        assert_eq!(r.get_stem(), "va");
        r.set_buffer("va");
        assert_eq!(r.get_stem(), "va");
    }

    #[test]
    fn test_no_matches_beeps() {
        let mut r = with_completer(&[]);
        r.set_buffer("zz");
        r.do_cmd(&tr("complete")).unwrap();
        assert_eq!(r.console.beeps, 1);
        assert!(r.msg.contains("no matches"));
    }

    #[test]
    fn test_sole_completion_inserted() {
        let mut r = with_completer(&["variable"]);
        r.set_buffer("vari");
        r.do_cmd(&tr("complete")).unwrap();
        assert_eq!(r.get_str(), "variable");
    }

    #[test]
    fn test_sole_completion_append_space() {
        let mut r = with_completer(&["variable"]);
        r.completion.append_space = true;
        r.set_buffer("vari");
        r.do_cmd(&tr("complete")).unwrap();
        assert_eq!(r.get_str(), "variable ");
    }

    #[test]
    fn test_common_prefix_extension() {
        let mut r = with_completer(&["values", "value_of", "valuation"]);
        r.set_buffer("va");
        r.do_cmd(&tr("complete")).unwrap();
        assert_eq!(r.get_str(), "valu");
        assert!(!r.completion.menu_visible);
    }

    #[test]
    fn test_menu_on_no_progress() {
        let mut r = with_completer(&["alpha", "beta"]);
        r.set_buffer("");
        r.do_cmd(&tr("complete")).unwrap();
        assert!(r.completion.menu_visible);
        assert!(r.completion.menu.iter().any(|l| l.contains("alpha")));
        let screen = r.calc_screen();
        assert!(screen.iter().any(|row| row.contains("alpha")));
    }

    #[test]
    fn test_second_complete_scrolls() {
        let names: Vec<String> = (0..200).map(|i| format!("name{i:03}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut r = with_completer(&refs);
        r.console.height = 6; // two menu rows per page
        r.set_buffer("name");
        r.do_cmd(&tr("complete")).unwrap();
        assert!(r.completion.menu_visible);
        assert_eq!(r.completion.menu_start, 0);
        r.do_cmd(&tr("complete")).unwrap();
        assert!(r.completion.menu_start > 0);
    }

    #[test]
    fn test_other_command_dismisses_menu() {
        let mut r = with_completer(&["alpha", "beta"]);
        r.do_cmd(&tr("complete")).unwrap();
        assert!(r.completion.menu_visible);
        r.do_cmd(&tr("beginning-of-line")).unwrap();
        assert!(!r.completion.menu_visible);
        assert!(r.completion.choices.is_empty());
    }

    #[test]
    fn test_menu_layouts() {
        let words: Vec<String> = ["aa", "bb", "cc", "dd"].iter().map(|s| s.to_string()).collect();
        let (col_major, _) = build_menu(&words, 0, 10, 4, true);
        // two columns of width 4, column-major: aa cc / bb dd
        assert_eq!(col_major, vec!["aa  cc", "bb  dd"]);
        let (row_major, _) = build_menu(&words, 0, 10, 4, false);
        assert_eq!(row_major, vec!["aa  bb", "cc  dd"]);
    }

    #[test]
    fn test_menu_more_marker() {
        let words: Vec<String> = (0..50).map(|i| format!("w{i}")).collect();
        let (menu, shown) = build_menu(&words, 0, 20, 2, false);
        assert!(shown < 50);
        assert!(menu.last().unwrap().contains("more"));
    }

    #[test]
    fn test_common_prefix_fn() {
        let words: Vec<String> = ["interleave", "internal", "interim"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(common_prefix(&words), "inter");
    }
}
