//! Input events and the byte-level event queue.
//!
//! The console reads the terminal one byte at a time and feeds each byte to
//! an [`EventQueue`], which reassembles multi-byte escape sequences (through
//! a trie of known sequences) and UTF-8 characters into logical key events.

use std::collections::{HashMap, VecDeque};

/// One logical key: a decoded character, or a symbolic key name
/// (`"up"`, `"page down"`, ...) recognised from a terminal escape sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Named(String),
}

impl Key {
    pub fn named(name: &str) -> Key {
        Key::Named(name.to_string())
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Key::Char(c) => Some(*c),
            Key::Named(_) => None,
        }
    }
}

/// A key event: the logical keys plus the raw bytes they were decoded from.
///
/// `keys` is usually a single entry; a meta keystroke (lone ESC followed by
/// one printable) carries two, ESC first, so the keymap sees the same shape
/// an `\M-x` spec compiles to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEvent {
    pub keys: Vec<Key>,
    pub raw: Vec<u8>,
}

impl KeyEvent {
    pub fn from_char(c: char) -> KeyEvent {
        let mut buf = [0u8; 4];
        let raw = c.encode_utf8(&mut buf).as_bytes().to_vec();
        KeyEvent { keys: vec![Key::Char(c)], raw }
    }
}

/// Events delivered to the reader loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Key(KeyEvent),
    /// The window changed size; the console has already re-read it.
    Resize,
    /// The reader asked to place the cursor outside the visible window.
    Scroll,
    /// Redraw everything from scratch.
    Repaint,
    /// A pre-translated command, bypassing the keymap. Scripted consoles
    /// use this to drive the reader directly.
    Command { name: String, keys: Vec<Key> },
}

#[derive(Default)]
struct SeqNode {
    name: Option<String>,
    children: HashMap<u8, SeqNode>,
}

enum Lookup {
    /// No known sequence starts with these bytes.
    Dead,
    /// Proper prefix of at least one known sequence.
    Prefix,
    /// Exactly one known sequence, with no longer extension.
    Leaf(String),
}

/// Reassembles a stream of raw bytes into [`Event`]s.
pub struct EventQueue {
    root: SeqNode,
    buf: Vec<u8>,
    events: VecDeque<Event>,
}

impl EventQueue {
    /// Build a queue recognising the given `(byte sequence, key name)`
    /// pairs in addition to nothing else. The unix console seeds this from
    /// the terminal's `k*` capabilities plus the common ANSI fallbacks.
    pub fn new(sequences: Vec<(Vec<u8>, String)>) -> EventQueue {
        let mut root = SeqNode::default();
        for (seq, name) in sequences {
            if seq.is_empty() {
                continue;
            }
            let mut node = &mut root;
            for b in seq {
                node = node.children.entry(b).or_default();
            }
            node.name = Some(name);
        }
        EventQueue {
            root,
            buf: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn with_default_sequences() -> EventQueue {
        EventQueue::new(default_sequences())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an already-formed event (resize from the signal path, scroll
    /// from cursor placement).
    pub fn insert(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn get(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn flush_buf(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    fn lookup(&self, bytes: &[u8]) -> Lookup {
        let mut node = &self.root;
        for b in bytes {
            match node.children.get(b) {
                Some(n) => node = n,
                None => return Lookup::Dead,
            }
        }
        match &node.name {
            Some(name) if node.children.is_empty() => Lookup::Leaf(name.clone()),
            _ => Lookup::Prefix,
        }
    }

    /// Feed one raw byte.
    pub fn push(&mut self, byte: u8) {
        self.buf.push(byte);
        match self.lookup(&self.buf) {
            Lookup::Leaf(name) => {
                let raw = self.flush_buf();
                self.events.push_back(Event::Key(KeyEvent {
                    keys: vec![Key::Named(name)],
                    raw,
                }));
            }
            Lookup::Prefix => {}
            Lookup::Dead => {
                if self.buf[0] == 0x1b {
                    self.flush_escape();
                } else {
                    self.try_decode();
                }
            }
        }
    }

    /// An escape sequence the trie does not know. A lone ESC followed by a
    /// single printable is a meta keystroke; anything else is passed on
    /// byte by byte, the tail re-scanned from scratch.
    fn flush_escape(&mut self) {
        let buf = self.flush_buf();
        if buf.len() == 2 && (0x20..0x7f).contains(&buf[1]) {
            self.events.push_back(Event::Key(KeyEvent {
                keys: vec![Key::Char('\x1b'), Key::Char(buf[1] as char)],
                raw: buf,
            }));
            return;
        }
        self.events.push_back(Event::Key(KeyEvent {
            keys: vec![Key::Char('\x1b')],
            raw: vec![0x1b],
        }));
        for b in buf.into_iter().skip(1) {
            self.push(b);
        }
    }

    /// Non-escape bytes accumulate until they decode as UTF-8. Invalid
    /// sequences decode with replacement, as the console's encoding policy
    /// demands.
    fn try_decode(&mut self) {
        match std::str::from_utf8(&self.buf) {
            Ok(s) => {
                let keys = s.chars().map(Key::Char).collect();
                let raw = self.flush_buf();
                self.events.push_back(Event::Key(KeyEvent { keys, raw }));
            }
            Err(e) => {
                if e.error_len().is_none() {
                    // Incomplete multi-byte character: wait for more input.
                    return;
                }
                let raw = self.flush_buf();
                let keys = String::from_utf8_lossy(&raw).chars().map(Key::Char).collect();
                self.events.push_back(Event::Key(KeyEvent { keys, raw }));
            }
        }
    }
}

/// The ANSI/VT escape sequences most terminals emit, used when terminfo has
/// no entry (or no terminal is involved at all).
pub fn default_sequences() -> Vec<(Vec<u8>, String)> {
    let mut seqs: Vec<(&[u8], &str)> = vec![
        (b"\x1b[A", "up"),
        (b"\x1b[B", "down"),
        (b"\x1b[C", "right"),
        (b"\x1b[D", "left"),
        (b"\x1bOA", "up"),
        (b"\x1bOB", "down"),
        (b"\x1bOC", "right"),
        (b"\x1bOD", "left"),
        (b"\x1b[H", "home"),
        (b"\x1b[F", "end"),
        (b"\x1bOH", "home"),
        (b"\x1bOF", "end"),
        (b"\x1b[1~", "home"),
        (b"\x1b[4~", "end"),
        (b"\x1b[2~", "insert"),
        (b"\x1b[3~", "delete"),
        (b"\x1b[5~", "page up"),
        (b"\x1b[6~", "page down"),
        (b"\x7f", "backspace"),
        (b"\x1bOP", "f1"),
        (b"\x1bOQ", "f2"),
        (b"\x1bOR", "f3"),
        (b"\x1bOS", "f4"),
        (b"\x1b[15~", "f5"),
        (b"\x1b[17~", "f6"),
        (b"\x1b[18~", "f7"),
        (b"\x1b[19~", "f8"),
        (b"\x1b[20~", "f9"),
        (b"\x1b[21~", "f10"),
        (b"\x1b[23~", "f11"),
        (b"\x1b[24~", "f12"),
    ];
    seqs.drain(..)
        .map(|(seq, name)| (seq.to_vec(), name.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(q: &mut EventQueue) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(e) = q.get() {
            out.push(e);
        }
        out
    }

    #[test]
    fn test_plain_char() {
        let mut q = EventQueue::with_default_sequences();
        q.push(b'a');
        assert_eq!(
            drain(&mut q),
            vec![Event::Key(KeyEvent {
                keys: vec![Key::Char('a')],
                raw: vec![b'a'],
            })]
        );
    }

    #[test]
    fn test_named_sequence() {
        let mut q = EventQueue::with_default_sequences();
        for b in b"\x1b[A" {
            q.push(*b);
        }
        assert_eq!(
            drain(&mut q),
            vec![Event::Key(KeyEvent {
                keys: vec![Key::named("up")],
                raw: b"\x1b[A".to_vec(),
            })]
        );
    }

    #[test]
    fn test_no_event_while_prefix_pending() {
        let mut q = EventQueue::with_default_sequences();
        q.push(0x1b);
        q.push(b'[');
        assert!(q.is_empty());
        q.push(b'A');
        assert!(!q.is_empty());
    }

    #[test]
    fn test_meta_key() {
        let mut q = EventQueue::with_default_sequences();
        q.push(0x1b);
        q.push(b'f');
        assert_eq!(
            drain(&mut q),
            vec![Event::Key(KeyEvent {
                keys: vec![Key::Char('\x1b'), Key::Char('f')],
                raw: b"\x1bf".to_vec(),
            })]
        );
    }

    #[test]
    fn test_unknown_escape_run_flushes_char_by_char() {
        let mut q = EventQueue::with_default_sequences();
        for b in b"\x1b[Z" {
            q.push(*b);
        }
        let events = drain(&mut q);
        let chars: Vec<Option<char>> = events
            .iter()
            .map(|e| match e {
                Event::Key(k) if k.keys.len() == 1 => k.keys[0].as_char(),
                _ => None,
            })
            .collect();
        assert_eq!(chars, vec![Some('\x1b'), Some('['), Some('Z')]);
    }

    #[test]
    fn test_utf8_reassembly() {
        let mut q = EventQueue::with_default_sequences();
        let bytes = "é".as_bytes();
        q.push(bytes[0]);
        assert!(q.is_empty());
        q.push(bytes[1]);
        assert_eq!(
            drain(&mut q),
            vec![Event::Key(KeyEvent {
                keys: vec![Key::Char('é')],
                raw: bytes.to_vec(),
            })]
        );
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut q = EventQueue::with_default_sequences();
        q.push(0xff);
        match drain(&mut q).as_slice() {
            [Event::Key(k)] => assert_eq!(k.keys, vec![Key::Char('\u{fffd}')]),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_del_is_backspace() {
        let mut q = EventQueue::with_default_sequences();
        q.push(0x7f);
        match drain(&mut q).as_slice() {
            [Event::Key(k)] => assert_eq!(k.keys, vec![Key::named("backspace")]),
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
