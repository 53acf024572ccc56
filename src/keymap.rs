//! Key-spec parsing and keymap translation.
//!
//! A keymap is a list of `(key-spec, command-name)` pairs. Key specs use
//! backslash escapes: `\C-x` (control), `\M-x` (meta, i.e. ESC-prefixed),
//! `\<name>` (a symbolic key such as `\<up>` or `\<page down>`), `\NNN`
//! (octal), the usual character escapes, or literal characters. Compilation
//! produces a prefix-sharing trie; a [`KeymapTranslator`] walks the trie
//! over incoming key events and yields `(command, keys)` pairs, resolving
//! prefix ambiguity by holding the shorter binding until the next event or
//! a timeout decides.

use std::collections::{HashMap, VecDeque};

use crate::errors::{Error, Result};
use crate::event::{Key, KeyEvent};

/// Symbolic names accepted inside `\<...>`. Names mapping to a plain
/// character (enter, escape, space, tab) compile to that character.
const KEY_NAMES: &[&str] = &[
    "backspace", "delete", "down", "end", "enter", "escape", "f1", "f2", "f3", "f4", "f5", "f6",
    "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14", "f15", "f16", "f17", "f18", "f19", "f20",
    "home", "insert", "left", "page down", "page up", "right", "space", "tab", "up",
];

fn keyspec_error(spec: &str, reason: impl Into<String>) -> Error {
    Error::KeySpec {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

/// Parse a key-spec string into the key sequence it stands for.
///
/// `\M-x` contributes two keys (ESC, then `x`), matching what the event
/// queue emits for a meta keystroke.
pub fn parse_keys(spec: &str) -> Result<Vec<Key>> {
    let chars: Vec<char> = spec.chars().collect();
    let mut keys = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (key, meta, next) = parse_one(spec, &chars, i)?;
        if meta {
            keys.push(Key::Char('\x1b'));
        }
        keys.push(key);
        i = next;
    }
    Ok(keys)
}

fn parse_one(spec: &str, chars: &[char], start: usize) -> Result<(Key, bool, usize)> {
    let mut ctrl = false;
    let mut meta = false;
    let mut i = start;
    loop {
        match chars.get(i) {
            None => return Err(keyspec_error(spec, "incomplete key")),
            Some('\\') => {
                let esc = *chars
                    .get(i + 1)
                    .ok_or_else(|| keyspec_error(spec, "trailing backslash"))?;
                match esc {
                    'C' => {
                        if chars.get(i + 2) != Some(&'-') {
                            return Err(keyspec_error(spec, "\\C must be followed by `-'"));
                        }
                        if ctrl {
                            return Err(keyspec_error(spec, "doubled \\C-"));
                        }
                        ctrl = true;
                        i += 3;
                    }
                    'M' => {
                        if chars.get(i + 2) != Some(&'-') {
                            return Err(keyspec_error(spec, "\\M must be followed by `-'"));
                        }
                        if meta {
                            return Err(keyspec_error(spec, "doubled \\M-"));
                        }
                        meta = true;
                        i += 3;
                    }
                    '0'..='7' => {
                        let mut code = 0u32;
                        let mut n = 0;
                        while n < 3 {
                            match chars.get(i + 1 + n) {
                                Some(d @ '0'..='7') => {
                                    code = code * 8 + d.to_digit(8).unwrap_or(0);
                                    n += 1;
                                }
                                _ => break,
                            }
                        }
                        let c = char::from_u32(code)
                            .ok_or_else(|| keyspec_error(spec, "octal escape out of range"))?;
                        return finish_key(spec, Key::Char(c), ctrl, meta, i + 1 + n);
                    }
                    '<' => {
                        let close = chars[i + 2..]
                            .iter()
                            .position(|c| *c == '>')
                            .ok_or_else(|| keyspec_error(spec, "unterminated \\<"))?;
                        let name: String = chars[i + 2..i + 2 + close].iter().collect();
                        let name = name.to_lowercase();
                        if !KEY_NAMES.contains(&name.as_str()) {
                            return Err(keyspec_error(spec, format!("unrecognised key `{name}'")));
                        }
                        let key = match name.as_str() {
                            "enter" => Key::Char('\r'),
                            "escape" => Key::Char('\x1b'),
                            "space" => Key::Char(' '),
                            "tab" => Key::Char('\t'),
                            _ => Key::Named(name),
                        };
                        return finish_key(spec, key, ctrl, meta, i + 3 + close);
                    }
                    _ => {
                        let c = match esc {
                            '\\' => '\\',
                            '\'' => '\'',
                            '"' => '"',
                            'a' => '\x07',
                            'b' => '\x08',
                            'e' => '\x1b',
                            'f' => '\x0c',
                            'n' => '\n',
                            'r' => '\r',
                            't' => '\t',
                            'v' => '\x0b',
                            _ => {
                                return Err(keyspec_error(
                                    spec,
                                    format!("unknown backslash escape `\\{esc}'"),
                                ));
                            }
                        };
                        return finish_key(spec, Key::Char(c), ctrl, meta, i + 2);
                    }
                }
            }
            Some(c) => return finish_key(spec, Key::Char(*c), ctrl, meta, i + 1),
        }
    }
}

fn finish_key(spec: &str, key: Key, ctrl: bool, meta: bool, next: usize) -> Result<(Key, bool, usize)> {
    let key = if ctrl {
        match key {
            Key::Char(c) if c.is_ascii_lowercase() => Key::Char(((c as u8) - 96) as char),
            Key::Char(c) if c.is_ascii_uppercase() => Key::Char(((c as u8) - 64) as char),
            Key::Char('?') => Key::Char('\x7f'),
            Key::Char(c) if c.is_ascii() => Key::Char(((c as u8) & 0x1f) as char),
            _ => return Err(keyspec_error(spec, "\\C- on a non-ASCII key")),
        }
    } else {
        key
    };
    Ok((key, meta, next))
}

#[derive(Clone, Default)]
struct KeymapNode {
    cmd: Option<String>,
    children: HashMap<Key, KeymapNode>,
}

fn compile_keymap(bindings: &[(String, String)]) -> Result<KeymapNode> {
    let mut root = KeymapNode::default();
    for (spec, cmd) in bindings {
        let keys = parse_keys(spec)?;
        if keys.is_empty() {
            return Err(keyspec_error(spec, "empty key sequence"));
        }
        let mut node = &mut root;
        for key in keys {
            node = node.children.entry(key).or_default();
        }
        // Later bindings override earlier ones so feature keymaps can
        // rebind what the core set up.
        node.cmd = Some(cmd.clone());
    }
    Ok(root)
}

/// A translated command: the command name, the key sequence that produced
/// it, and whether it was reached through a fallback class rather than an
/// explicit binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub cmd: String,
    pub keys: Vec<Key>,
    pub from_fallback: bool,
}

/// Stateful consumer of key events yielding translated commands.
#[derive(Clone)]
pub struct KeymapTranslator {
    root: KeymapNode,
    stack: Vec<Key>,
    pending: Option<Translated>,
    results: VecDeque<Translated>,
    invalid_cls: String,
    character_cls: String,
    /// A one-shot translator pops itself from the reader's stack as soon as
    /// it yields its first command (used by quoted-insert).
    pub one_shot: bool,
}

impl KeymapTranslator {
    pub fn new(
        bindings: &[(String, String)],
        invalid_cls: &str,
        character_cls: &str,
    ) -> Result<KeymapTranslator> {
        Ok(KeymapTranslator {
            root: compile_keymap(bindings)?,
            stack: Vec::new(),
            pending: None,
            results: VecDeque::new(),
            invalid_cls: invalid_cls.to_string(),
            character_cls: character_cls.to_string(),
            one_shot: false,
        })
    }

    pub fn push(&mut self, event: &KeyEvent) {
        for key in event.keys.clone() {
            self.push_key(key);
        }
    }

    /// Feed keys directly, bypassing event framing. Used when a key that
    /// ended an inner keymap has to be reinterpreted by the outer one.
    pub fn push_keys(&mut self, keys: &[Key]) {
        for key in keys {
            self.push_key(key.clone());
        }
    }

    fn walk<'a>(root: &'a KeymapNode, keys: &[Key]) -> Option<&'a KeymapNode> {
        let mut node = root;
        for key in keys {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    fn push_key(&mut self, key: Key) {
        self.stack.push(key);
        let hit = Self::walk(&self.root, &self.stack).map(|n| (n.cmd.clone(), !n.children.is_empty()));
        match hit {
            Some((Some(cmd), false)) => {
                let keys = std::mem::take(&mut self.stack);
                self.pending = None;
                self.results.push_back(Translated {
                    cmd,
                    keys,
                    from_fallback: false,
                });
            }
            Some((Some(cmd), true)) => {
                // Ambiguous: a command ends here but longer bindings exist.
                // Hold it until the next event or a timeout decides.
                self.pending = Some(Translated {
                    cmd,
                    keys: self.stack.clone(),
                    from_fallback: false,
                });
            }
            Some((None, _)) => {}
            None => {
                if let Some(p) = self.pending.take() {
                    let leftover = self.stack.split_off(p.keys.len());
                    self.stack.clear();
                    self.results.push_back(p);
                    for k in leftover {
                        self.push_key(k);
                    }
                } else {
                    let keys = std::mem::take(&mut self.stack);
                    let cmd = if keys.len() == 1 && matches!(keys[0], Key::Char(_)) {
                        self.character_cls.clone()
                    } else {
                        self.invalid_cls.clone()
                    };
                    self.results.push_back(Translated {
                        cmd,
                        keys,
                        from_fallback: true,
                    });
                }
            }
        }
    }

    pub fn get(&mut self) -> Option<Translated> {
        self.results.pop_front()
    }

    /// True while an ambiguous shorter binding is waiting for the next
    /// event to decide.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Commit the held shorter binding; no extension arrived in time.
    pub fn timeout_flush(&mut self) {
        if let Some(p) = self.pending.take() {
            let leftover = if self.stack.len() > p.keys.len() {
                self.stack.split_off(p.keys.len())
            } else {
                Vec::new()
            };
            self.stack.clear();
            self.results.push_back(p);
            for k in leftover {
                self.push_key(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_keys(r"\C-a").unwrap(), vec![Key::Char('\x01')]);
        assert_eq!(parse_keys(r"\C-?").unwrap(), vec![Key::Char('\x7f')]);
    }

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_keys(r"\M-f").unwrap(),
            vec![Key::Char('\x1b'), Key::Char('f')]
        );
        assert_eq!(
            parse_keys(r"\C-\M-x").unwrap(),
            vec![Key::Char('\x1b'), Key::Char('\x18')]
        );
    }

    #[test]
    fn test_parse_octal_and_escapes() {
        assert_eq!(parse_keys(r"\033").unwrap(), vec![Key::Char('\x1b')]);
        assert_eq!(parse_keys(r"\n").unwrap(), vec![Key::Char('\n')]);
        assert_eq!(parse_keys(r"\\").unwrap(), vec![Key::Char('\\')]);
    }

    #[test]
    fn test_parse_named() {
        assert_eq!(parse_keys(r"\<up>").unwrap(), vec![Key::named("up")]);
        assert_eq!(parse_keys(r"\<page down>").unwrap(), vec![Key::named("page down")]);
        assert_eq!(parse_keys(r"\<enter>").unwrap(), vec![Key::Char('\r')]);
        assert!(parse_keys(r"\<warp>").is_err());
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(
            parse_keys(r"\C-x\C-u").unwrap(),
            vec![Key::Char('\x18'), Key::Char('\x15')]
        );
    }

    fn push_chars(t: &mut KeymapTranslator, s: &str) {
        for c in s.chars() {
            t.push(&KeyEvent::from_char(c));
        }
    }

    #[test]
    fn test_translator_simple() {
        let mut t =
            KeymapTranslator::new(&bindings(&[(r"\C-a", "beginning-of-line")]), "invalid", "insert")
                .unwrap();
        push_chars(&mut t, "\x01");
        let got = t.get().unwrap();
        assert_eq!(got.cmd, "beginning-of-line");
        assert!(!got.from_fallback);
    }

    #[test]
    fn test_translator_character_fallback() {
        let mut t = KeymapTranslator::new(&bindings(&[]), "invalid", "insert").unwrap();
        push_chars(&mut t, "q");
        let got = t.get().unwrap();
        assert_eq!(got.cmd, "insert");
        assert!(got.from_fallback);
        assert_eq!(got.keys, vec![Key::Char('q')]);
    }

    #[test]
    fn test_translator_invalid_named() {
        let mut t = KeymapTranslator::new(&bindings(&[]), "invalid", "insert").unwrap();
        t.push(&KeyEvent {
            keys: vec![Key::named("f9")],
            raw: vec![],
        });
        assert_eq!(t.get().unwrap().cmd, "invalid");
    }

    #[test]
    fn test_translator_two_key_sequence() {
        let mut t = KeymapTranslator::new(
            &bindings(&[(r"\C-x\C-u", "undo")]),
            "invalid",
            "insert",
        )
        .unwrap();
        push_chars(&mut t, "\x18");
        assert!(t.get().is_none());
        push_chars(&mut t, "\x15");
        assert_eq!(t.get().unwrap().cmd, "undo");
    }

    #[test]
    fn test_ambiguous_commits_on_timeout() {
        let mut t = KeymapTranslator::new(
            &bindings(&[(r"\C-x", "short"), (r"\C-x\C-u", "long")]),
            "invalid",
            "insert",
        )
        .unwrap();
        push_chars(&mut t, "\x18");
        assert!(t.get().is_none());
        assert!(t.has_pending());
        t.timeout_flush();
        assert_eq!(t.get().unwrap().cmd, "short");
    }

    #[test]
    fn test_ambiguous_extends_to_longer() {
        let mut t = KeymapTranslator::new(
            &bindings(&[(r"\C-x", "short"), (r"\C-x\C-u", "long")]),
            "invalid",
            "insert",
        )
        .unwrap();
        push_chars(&mut t, "\x18\x15");
        assert_eq!(t.get().unwrap().cmd, "long");
        assert!(t.get().is_none());
    }

    #[test]
    fn test_ambiguous_commits_then_rescans() {
        let mut t = KeymapTranslator::new(
            &bindings(&[(r"\C-x", "short"), (r"\C-x\C-u", "long")]),
            "invalid",
            "insert",
        )
        .unwrap();
        push_chars(&mut t, "\x18z");
        assert_eq!(t.get().unwrap().cmd, "short");
        let follow = t.get().unwrap();
        assert_eq!(follow.cmd, "insert");
        assert_eq!(follow.keys, vec![Key::Char('z')]);
    }

    #[test]
    fn test_unmatched_multi_key_sequence_is_invalid() {
        let mut t = KeymapTranslator::new(
            &bindings(&[(r"\C-x\C-u", "undo")]),
            "invalid",
            "insert",
        )
        .unwrap();
        push_chars(&mut t, "\x18z");
        let got = t.get().unwrap();
        assert_eq!(got.cmd, "invalid");
        assert_eq!(got.keys.len(), 2);
    }
}
