//! Core editing commands and their default keymap.
//!
//! Commands are stateless functions dispatched by name through the
//! reader's registry; both hyphenated and underscored spellings resolve to
//! the same entry. Kill commands chain into the last kill-ring entry,
//! argument commands keep the pending numeric argument alive, and finish
//! commands end the readline call.

use crate::console::Console;
use crate::errors::{Error, Result};
use crate::event::Key;
use crate::keymap::{KeymapTranslator, Translated};
use crate::reader::{CmdKind, CommandDef, Feature, Reader};

pub fn core_feature<C: Console>() -> Feature<C> {
    Feature {
        name: "core",
        bindings: core_bindings,
        commands: core_commands,
        after_command: None,
        on_prepare: None,
        on_finish: None,
    }
}

fn core_bindings() -> Vec<(String, String)> {
    let mut b: Vec<(&str, &str)> = vec![
        (r"\C-a", "beginning-of-line"),
        (r"\C-b", "left"),
        (r"\C-c", "interrupt"),
        (r"\C-d", "delete"),
        (r"\C-e", "end-of-line"),
        (r"\C-f", "right"),
        (r"\C-h", "backspace"),
        (r"\C-j", "accept"),
        (r"\C-k", "kill-line"),
        (r"\C-l", "clear-screen"),
        (r"\C-m", "accept"),
        (r"\C-q", "quoted-insert"),
        (r"\C-t", "transpose-chars"),
        (r"\C-u", "unix-line-discard"),
        (r"\C-v", "quoted-insert"),
        (r"\C-w", "unix-word-rubout"),
        (r"\C-y", "yank"),
        (r"\M-b", "backward-word"),
        (r"\M-d", "kill-word"),
        (r"\M-f", "forward-word"),
        (r"\M-y", "yank-pop"),
        (r"\M-\n", "insert-nl"),
        (r"\M-\<backspace>", "backward-kill-word"),
        (r"\M--", "digit-arg"),
        (r"\<up>", "up"),
        (r"\<down>", "down"),
        (r"\<left>", "left"),
        (r"\<right>", "right"),
        (r"\<delete>", "delete"),
        (r"\<backspace>", "backspace"),
        (r"\<home>", "beginning-of-line"),
        (r"\<end>", "end-of-line"),
        (r"\<f1>", "help"),
    ];
    let digits: Vec<(String, String)> = (0..10)
        .map(|d| (format!(r"\M-{d}"), "digit-arg".to_string()))
        .collect();
    b.drain(..)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(digits)
        .collect()
}

fn core_commands<C: Console>() -> Vec<CommandDef<C>> {
    vec![
        def("self-insert", CmdKind::Normal, cmd_self_insert),
        def("insert-nl", CmdKind::Normal, cmd_insert_nl),
        def("left", CmdKind::Normal, cmd_left),
        def("right", CmdKind::Normal, cmd_right),
        def("up", CmdKind::Normal, cmd_up),
        def("down", CmdKind::Normal, cmd_down),
        def("backward-word", CmdKind::Normal, cmd_backward_word),
        def("forward-word", CmdKind::Normal, cmd_forward_word),
        def("beginning-of-line", CmdKind::Normal, cmd_beginning_of_line),
        def("end-of-line", CmdKind::Normal, cmd_end_of_line),
        def("backspace", CmdKind::Normal, cmd_backspace),
        def("delete", CmdKind::Normal, cmd_delete),
        def("kill-word", CmdKind::Kill, cmd_kill_word),
        def("backward-kill-word", CmdKind::Kill, cmd_backward_kill_word),
        def("kill-line", CmdKind::Kill, cmd_kill_line),
        def("unix-line-discard", CmdKind::Kill, cmd_unix_line_discard),
        def("unix-word-rubout", CmdKind::Kill, cmd_unix_word_rubout),
        def("yank", CmdKind::Yank, cmd_yank),
        def("yank-pop", CmdKind::Yank, cmd_yank_pop),
        def("transpose-chars", CmdKind::Normal, cmd_transpose_chars),
        def("digit-arg", CmdKind::KeepsArg, cmd_digit_arg),
        def("universal-argument", CmdKind::KeepsArg, cmd_universal_argument),
        def("accept", CmdKind::Finish, cmd_accept),
        def("quoted-insert", CmdKind::KeepsArg, cmd_quoted_insert),
        def("clear-screen", CmdKind::Normal, cmd_clear_screen),
        def("refresh", CmdKind::Normal, cmd_refresh),
        def("help", CmdKind::Normal, cmd_help),
        def("interrupt", CmdKind::Normal, cmd_interrupt),
        def("invalid-key", CmdKind::Normal, cmd_invalid_key),
        def("invalid-command", CmdKind::Normal, cmd_invalid_command),
    ]
}

fn def<C: Console>(
    name: &'static str,
    kind: CmdKind,
    run: fn(&mut Reader<C>, &Translated) -> Result<()>,
) -> CommandDef<C> {
    CommandDef { name, kind, run }
}

/// Fallback for names absent from the registry.
pub fn invalid_command_def<C: Console>() -> CommandDef<C> {
    def("invalid-command", CmdKind::Normal, cmd_invalid_command)
}

fn repeat_arg<C: Console>(r: &Reader<C>) -> usize {
    r.get_arg(1).max(0) as usize
}

fn cmd_self_insert<C: Console>(r: &mut Reader<C>, ev: &Translated) -> Result<()> {
    let text: String = ev.keys.iter().filter_map(Key::as_char).collect();
    let text = text.repeat(repeat_arg(r));
    r.insert(&text);
    Ok(())
}

fn cmd_insert_nl<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let text = "\n".repeat(repeat_arg(r));
    r.insert(&text);
    Ok(())
}

fn cmd_left<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        if r.pos == 0 {
            r.error("start of buffer");
            return Ok(());
        }
        r.pos -= 1;
    }
    Ok(())
}

fn cmd_right<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        if r.pos == r.buffer.len() {
            r.error("end of buffer");
            return Ok(());
        }
        r.pos += 1;
    }
    Ok(())
}

/// Up a logical line, keeping the column; on the first line fall through
/// to the previous history item.
fn cmd_up<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        let bol = r.bol(r.pos);
        if bol == 0 {
            if r.history.historyi > 0 {
                let i = r.history.historyi - 1;
                r.select_item(i);
                return Ok(());
            }
            r.pos = 0;
            r.error("start of buffer");
            return Ok(());
        }
        let col = r.pos - bol;
        let prev_bol = r.bol(bol - 1);
        let prev_len = bol - 1 - prev_bol;
        r.pos = prev_bol + col.min(prev_len);
    }
    Ok(())
}

/// Down a logical line; on the last line fall through to the next history
/// item.
fn cmd_down<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        let eol = r.eol(r.pos);
        if eol == r.buffer.len() {
            if r.history.historyi < r.history.history.len() {
                let i = r.history.historyi + 1;
                r.select_item(i);
                return Ok(());
            }
            r.error("end of buffer");
            return Ok(());
        }
        let col = r.pos - r.bol(r.pos);
        let next_bol = eol + 1;
        let next_len = r.eol(next_bol) - next_bol;
        r.pos = next_bol + col.min(next_len);
    }
    Ok(())
}

fn cmd_backward_word<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        r.pos = r.bow(r.pos);
    }
    Ok(())
}

fn cmd_forward_word<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        r.pos = r.eow(r.pos);
    }
    Ok(())
}

fn cmd_beginning_of_line<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.pos = r.bol(r.pos);
    Ok(())
}

fn cmd_end_of_line<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.pos = r.eol(r.pos);
    Ok(())
}

fn cmd_backspace<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    for _ in 0..repeat_arg(r) {
        if r.pos == 0 {
            r.error("can't backspace at start");
            return Ok(());
        }
        r.pos -= 1;
        r.buffer.remove(r.pos);
        r.dirty = true;
    }
    Ok(())
}

fn cmd_delete<C: Console>(r: &mut Reader<C>, ev: &Translated) -> Result<()> {
    if r.pos == 0
        && r.buffer.is_empty()
        && ev.keys.last().and_then(Key::as_char) == Some('\x04')
    {
        // C-d on an empty buffer ends the session.
        r.refresh()?;
        r.console.finish()?;
        r.abort = Some(Error::Eof);
        return Ok(());
    }
    for _ in 0..repeat_arg(r) {
        if r.pos == r.buffer.len() {
            r.error("end of buffer");
            return Ok(());
        }
        r.buffer.remove(r.pos);
        r.dirty = true;
    }
    Ok(())
}

/// Delete `start..end`, feeding the kill ring. Consecutive kills grow the
/// same ring entry, prepending when the kill ran backwards.
pub(crate) fn kill_range<C: Console>(r: &mut Reader<C>, start: usize, end: usize) {
    if start == end {
        return;
    }
    let text: Vec<char> = r.buffer.drain(start..end).collect();
    if r.last_kind == CmdKind::Kill
        && let Some(last) = r.kill_ring.last_mut()
    {
        if start < r.pos {
            let mut combined = text;
            combined.extend(last.iter());
            *last = combined;
        } else {
            last.extend(text);
        }
    } else {
        r.kill_ring.push(text);
    }
    r.pos = start;
    r.dirty = true;
}

fn cmd_kill_word<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let mut end = r.pos;
    for _ in 0..repeat_arg(r) {
        end = r.eow(end);
    }
    kill_range(r, r.pos, end);
    Ok(())
}

fn cmd_backward_kill_word<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let mut start = r.pos;
    for _ in 0..repeat_arg(r) {
        start = r.bow(start);
    }
    let pos = r.pos;
    kill_range(r, start, pos);
    Ok(())
}

fn cmd_kill_line<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let eol = r.eol(r.pos);
    // A blank tail takes the newline with it.
    let end = if r.buffer[r.pos..eol].iter().any(|c| !c.is_whitespace()) {
        eol
    } else {
        (eol + 1).min(r.buffer.len())
    };
    let pos = r.pos;
    kill_range(r, pos, end);
    Ok(())
}

fn cmd_unix_line_discard<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let start = r.bol(r.pos);
    let pos = r.pos;
    kill_range(r, start, pos);
    Ok(())
}

/// Kill back over whitespace-delimited words, the shell way.
fn cmd_unix_word_rubout<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let mut start = r.pos;
    for _ in 0..repeat_arg(r) {
        while start > 0 && r.buffer[start - 1].is_whitespace() {
            start -= 1;
        }
        while start > 0 && !r.buffer[start - 1].is_whitespace() {
            start -= 1;
        }
    }
    let pos = r.pos;
    kill_range(r, start, pos);
    Ok(())
}

fn cmd_yank<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    match r.kill_ring.last() {
        None => r.error("nothing to yank"),
        Some(text) => {
            let text: String = text.iter().collect();
            r.insert(&text);
        }
    }
    Ok(())
}

fn cmd_yank_pop<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    if r.kill_ring.is_empty() {
        r.error("nothing to yank");
        return Ok(());
    }
    if r.last_kind != CmdKind::Yank {
        r.error("previous command was not a yank");
        return Ok(());
    }
    let replaced = r.kill_ring.last().map(Vec::len).unwrap_or(0);
    if let Some(top) = r.kill_ring.pop() {
        r.kill_ring.insert(0, top);
    }
    let text = r.kill_ring.last().cloned().unwrap_or_default();
    let start = r.pos.saturating_sub(replaced);
    r.buffer.splice(start..r.pos, text.iter().copied());
    r.pos = start + text.len();
    r.dirty = true;
    Ok(())
}

fn cmd_transpose_chars<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    if r.pos == 0 || r.buffer.len() < 2 {
        r.error("cannot transpose at start of buffer");
        return Ok(());
    }
    if r.pos == r.buffer.len() {
        let n = r.buffer.len();
        r.buffer.swap(n - 2, n - 1);
    } else {
        r.buffer.swap(r.pos - 1, r.pos);
        r.pos += 1;
    }
    r.dirty = true;
    Ok(())
}

fn cmd_digit_arg<C: Console>(r: &mut Reader<C>, ev: &Translated) -> Result<()> {
    let c = ev.keys.last().and_then(Key::as_char).unwrap_or('1');
    if c == '-' {
        r.arg = Some(match r.arg {
            Some(a) => -a,
            None => -1,
        });
    } else if let Some(d) = c.to_digit(10) {
        let d = i64::from(d);
        r.arg = Some(match r.arg {
            None => d,
            Some(a) if a < 0 => 10 * a - d,
            Some(a) => 10 * a + d,
        });
    }
    r.dirty = true;
    Ok(())
}

fn cmd_universal_argument<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.arg = Some(match r.arg {
        None => 4,
        Some(a) => a.saturating_mul(4),
    });
    r.dirty = true;
    Ok(())
}

fn cmd_accept<C: Console>(_r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    Ok(())
}

/// The next key, whatever it is, self-inserts: a one-shot keymap whose
/// every road leads to self-insert, with the numeric argument kept alive.
fn cmd_quoted_insert<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    let mut t = KeymapTranslator::new(&[], "self-insert", "self-insert")?;
    t.one_shot = true;
    r.push_input_trans(t);
    Ok(())
}

fn cmd_clear_screen<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.console.clear();
    r.dirty = true;
    Ok(())
}

fn cmd_refresh<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.console.repaint_prep();
    r.dirty = true;
    Ok(())
}

fn cmd_help<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.msg = r.help_text.clone();
    r.dirty = true;
    Ok(())
}

fn cmd_interrupt<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.console.finish()?;
    r.abort = Some(Error::Interrupted);
    Ok(())
}

fn cmd_invalid_key<C: Console>(r: &mut Reader<C>, _ev: &Translated) -> Result<()> {
    r.error("invalid key");
    Ok(())
}

fn cmd_invalid_command<C: Console>(r: &mut Reader<C>, ev: &Translated) -> Result<()> {
    let msg = format!("command `{}' not known", ev.cmd);
    r.error(&msg);
    Ok(())
}
