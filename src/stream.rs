//! Incremental, byte-driven keystroke parser.
//!
//! Resolves a raw, arbitrarily-chunked byte stream into keystroke events —
//! plain characters, single-byte ESC sequences, multi-byte CSI (ANSI)
//! sequences, and Telnet IAC commands — buffering completed events in a
//! byte FIFO and supporting "stealing" the next well-formed keystroke into
//! a caller-supplied slot instead of enqueuing it.
//!
//! The parser only delimits: it does not interpret CSI parameters, does not
//! answer Telnet option negotiation, and passes bytes through untranslated.

use std::collections::VecDeque;

use bitflags::bitflags;

pub const IAC: u8 = 0xFF;
pub const SE: u8 = 240;
pub const SB: u8 = 250;
pub const WILL: u8 = 251;
pub const WONT: u8 = 252;
pub const DO: u8 = 253;
pub const DONT: u8 = 254;
pub const ESC: u8 = 0x1B;

/// CSI parameter/intermediate byte range.
const CSI_PARAM_LO: u8 = 0x20;
const CSI_PARAM_HI: u8 = 0x3F;
/// CSI terminator byte range.
const CSI_FINAL_LO: u8 = 0x40;
const CSI_FINAL_HI: u8 = 0x7F;

/// Capacity of an in-progress sequence buffer and of a FIFO record payload.
pub const KMAX: usize = 6;

bitflags! {
    /// Recoverable-failure bits carried on a keystroke event.
    pub struct KeystrokeFlags: u8 {
        const BROKEN = 0b0010_0000;
        const TRUNCATED = 0b0001_0000;
    }
}

impl KeystrokeFlags {
    fn of(broken: bool, truncated: bool) -> Self {
        let mut f = Self::empty();
        if broken {
            f |= Self::BROKEN;
        }
        if truncated {
            f |= Self::TRUNCATED;
        }
        f
    }
}

/// Event type tag. `Null` never reaches the FIFO — it is only ever the
/// value of an event returned directly by [`KeystrokeStream::fetch`] when
/// the FIFO is empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Null,
    Char,
    Esc,
    Csi,
    Iac,
}

impl EventType {
    fn fifo_tag(self) -> u8 {
        match self {
            EventType::Char => 1,
            EventType::Esc => 2,
            EventType::Csi => 3,
            EventType::Iac => 4,
            EventType::Null => {
                crate::debug_log!("keystroke: fatal invariant violation, attempted to encode null in the FIFO");
                unreachable!("null must never be encoded in the FIFO")
            }
        }
    }

    fn from_fifo_tag(tag: u8) -> Self {
        match tag {
            1 => EventType::Char,
            2 => EventType::Esc,
            3 => EventType::Csi,
            4 => EventType::Iac,
            other => {
                crate::debug_log!("keystroke: fatal invariant violation, FIFO type tag {other}");
                panic!("fatal invariant violation: unknown FIFO type tag {other}")
            }
        }
    }
}

fn trace_enabled() -> bool {
    std::env::var_os("KEYSTROKE_TRACE").is_some()
}

/// Sub-value carried by a `Null`-typed event, distinguishing "no data yet"
/// from "end of input reached and stream fully drained".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullKind {
    NotEof,
    Eof,
}

/// A completed keystroke, or the absence of one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeystrokeEvent {
    pub kind: EventType,
    pub value: u32,
    pub flags: KeystrokeFlags,
    pub len: usize,
    pub buf: [u8; KMAX],
}

impl KeystrokeEvent {
    fn null(kind: NullKind) -> Self {
        Self {
            kind: EventType::Null,
            value: matches!(kind, NullKind::Eof) as u32,
            flags: KeystrokeFlags::empty(),
            len: 0,
            buf: [0; KMAX],
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, EventType::Null)
    }

    pub fn null_kind(&self) -> Option<NullKind> {
        match self.kind {
            EventType::Null if self.value == 0 => Some(NullKind::NotEof),
            EventType::Null => Some(NullKind::Eof),
            _ => None,
        }
    }
}

impl Default for KeystrokeEvent {
    /// A caller-supplied steal slot should start out as a not-eof null
    /// event, matching what it would read back if stealing never fires.
    fn default() -> Self {
        Self::null(NullKind::NotEof)
    }
}

/// State of an in-progress (not yet complete) sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SeqState {
    Idle,
    /// Reserved in the source protocol this parser is modeled on; never
    /// reached by any dispatch path in this revision.
    CharMulti,
    Esc,
    Csi,
    IacOption,
    IacSub,
}

/// Bytes accumulated for a sequence that has not yet completed. `len` may
/// exceed `KMAX`; only the first `KMAX` bytes are ever written into `raw`,
/// detected and flagged as `truncated` at emission time.
#[derive(Clone, Copy, Debug)]
struct InProgress {
    state: SeqState,
    len: usize,
    raw: [u8; KMAX],
}

impl InProgress {
    fn new() -> Self {
        Self {
            state: SeqState::Idle,
            len: 0,
            raw: [0; KMAX],
        }
    }

    fn add_raw(&mut self, b: u8) {
        if self.len < KMAX {
            self.raw[self.len] = b;
        }
        self.len += 1;
    }

    fn reset(&mut self) {
        self.state = SeqState::Idle;
        self.len = 0;
    }
}

/// An incremental keystroke parser bound to one byte-level session.
///
/// Single-threaded cooperative: [`input`](Self::input) and
/// [`fetch`](Self::fetch) must not run concurrently on the same stream, and
/// no call suspends — every byte handed to `input` is consumed before it
/// returns.
pub struct KeystrokeStream {
    csi_byte: u8,
    eof_met: bool,
    iac_pending: bool,
    in_seq: InProgress,
    pushed_in: InProgress,
    steal_this: bool,
    fifo: VecDeque<u8>,
}

impl KeystrokeStream {
    /// Creates a stream. `csi_byte == 0` and `csi_byte == ESC` both mean
    /// "no distinct CSI byte" — ESC is always checked first regardless, so
    /// a configured CSI byte only matters when it differs from ESC.
    pub fn new(csi_byte: u8) -> Self {
        Self {
            csi_byte: if csi_byte == 0 { ESC } else { csi_byte },
            eof_met: false,
            iac_pending: false,
            in_seq: InProgress::new(),
            pushed_in: InProgress::new(),
            steal_this: false,
            fifo: VecDeque::new(),
        }
    }

    /// Feeds a chunk of bytes; advances the state machine and deposits
    /// completed events into the FIFO (or the `steal` slot, see below).
    ///
    /// `bytes = None` is the EOF signal: it flushes any in-progress
    /// sequence as broken/truncated and marks the stream as having reached
    /// end of input. Once EOF has been signaled, further chunks are
    /// ignored (but `steal` is still resolved, per call).
    ///
    /// If `steal` is `Some`, and the stream is idle (no partial sequence in
    /// flight) when this call begins, the next complete, well-formed,
    /// non-IAC keystroke is written there instead of the FIFO. If no such
    /// keystroke completes during this call, `steal` is set to a null
    /// event (EOF sub-value iff the stream is at EOF).
    pub fn input(&mut self, bytes: Option<&[u8]>, steal: Option<&mut KeystrokeEvent>) {
        let mut steal = steal;
        self.steal_this = steal.is_some() && self.in_seq.state == SeqState::Idle;

        match bytes {
            None => self.process_eof(&mut steal),
            Some(chunk) if !self.eof_met => {
                for &b in chunk {
                    self.process_byte(b, &mut steal);
                }
            }
            Some(_) => {}
        }

        if let Some(slot) = steal {
            *slot = KeystrokeEvent::null(if self.eof_met {
                NullKind::Eof
            } else {
                NullKind::NotEof
            });
        }
    }

    /// Pops the next completed event from the FIFO. Returns a `Null` event
    /// (EOF sub-value iff the stream has reached end of input) when empty.
    pub fn fetch(&mut self) -> KeystrokeEvent {
        let header = match self.fifo.pop_front() {
            Some(b) => b,
            None => {
                return KeystrokeEvent::null(if self.eof_met {
                    NullKind::Eof
                } else {
                    NullKind::NotEof
                })
            }
        };

        if header & 0x80 == 0 {
            let mut buf = [0u8; KMAX];
            buf[0] = header;
            return KeystrokeEvent {
                kind: EventType::Char,
                value: header as u32,
                flags: KeystrokeFlags::empty(),
                len: 1,
                buf,
            };
        }

        let broken = header & KeystrokeFlags::BROKEN.bits() != 0;
        let truncated = header & KeystrokeFlags::TRUNCATED.bits() != 0;
        let kind = EventType::from_fifo_tag(header & 0x0F);
        let mut len = self.fifo.pop_front().unwrap_or_else(|| {
            crate::debug_log!("keystroke: fatal invariant violation, FIFO underflow reading record length");
            panic!("fatal invariant violation: FIFO underflow reading record length");
        }) as usize;
        if len > KMAX {
            crate::debug_log!("keystroke: fatal invariant violation, FIFO record length {len} exceeds KMAX {KMAX}");
        }
        assert!(len <= KMAX, "fatal invariant violation: FIFO record length {len} exceeds KMAX");
        let mut buf = [0u8; KMAX];
        for slot in buf.iter_mut().take(len) {
            *slot = self.fifo.pop_front().unwrap_or_else(|| {
                crate::debug_log!("keystroke: fatal invariant violation, FIFO underflow reading record payload");
                panic!("fatal invariant violation: FIFO underflow reading record payload");
            });
        }

        let mut value = 0u32;
        match kind {
            EventType::Char => {
                if !broken && !truncated {
                    value = be_combine(&buf[..len]);
                }
            }
            EventType::Esc => {
                if len == 1 {
                    value = buf[0] as u32;
                }
            }
            EventType::Csi => {
                if len > 0 {
                    value = buf[len - 1] as u32;
                    len -= 1;
                    buf[len] = 0;
                }
            }
            EventType::Iac => {
                if len > 0 {
                    value = buf[0] as u32;
                }
            }
            EventType::Null => {
                crate::debug_log!("keystroke: fatal invariant violation, null in the FIFO");
                unreachable!("fatal invariant violation: null in the FIFO")
            }
        }

        KeystrokeEvent {
            kind,
            value,
            flags: KeystrokeFlags::of(broken, truncated),
            len,
            buf,
        }
    }

    /// True iff the FIFO has no completed events buffered. A partial
    /// in-progress sequence does not count as non-empty.
    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// True iff EOF has been reached and the FIFO has been fully drained.
    pub fn eof_reached(&self) -> bool {
        self.eof_met && self.fifo.is_empty()
    }

    /// Forces EOF, discarding the FIFO and any in-progress sequence. Unlike
    /// signaling EOF through `input`, this does not flush partial state
    /// into the FIFO first — it throws it away.
    pub fn set_eof(&mut self) {
        self.fifo.clear();
        self.eof_met = true;
        self.steal_this = false;
        self.iac_pending = false;
        self.in_seq.reset();
        self.pushed_in.reset();
    }

    // -- EOF flushing -----------------------------------------------------

    fn process_eof(&mut self, steal: &mut Option<&mut KeystrokeEvent>) {
        self.eof_met = true;
        self.steal_this = false;

        if self.iac_pending && self.in_seq.state == SeqState::Idle {
            self.iac_pending = false;
            self.emit_iac_short(steal, &[]);
        }

        loop {
            match self.in_seq.state {
                SeqState::Idle => break,
                SeqState::Esc => {
                    self.in_seq.reset();
                    self.emit_esc(steal, &[]);
                }
                SeqState::Csi => self.finish_csi(steal, 0),
                SeqState::IacOption | SeqState::IacSub => self.finish_iac_long(steal, true),
                SeqState::CharMulti => {
                    crate::debug_log!("keystroke: fatal invariant violation, char_multi reached in EOF flush");
                    unreachable!("fatal invariant violation: char_multi is undefined in this revision")
                }
            }
        }
    }

    // -- per-byte dispatch --------------------------------------------------

    fn process_byte(&mut self, u: u8, steal: &mut Option<&mut KeystrokeEvent>) {
        // Step 1: Telnet escape resolution.
        if u == IAC && self.in_seq.state != SeqState::IacOption {
            if self.iac_pending {
                self.iac_pending = false;
                self.dispatch_data_byte(0xFF, steal);
            } else {
                self.iac_pending = true;
            }
            return;
        }

        // Step 2: post-IAC dispatch.
        if self.iac_pending {
            self.iac_pending = false;
            match self.in_seq.state {
                SeqState::Idle | SeqState::Esc | SeqState::Csi => {
                    if u < SB {
                        self.emit_iac_short(steal, &[u]);
                    } else {
                        self.pushed_in = self.in_seq;
                        self.in_seq = InProgress {
                            state: SeqState::IacOption,
                            len: 1,
                            raw: {
                                let mut r = [0u8; KMAX];
                                r[0] = u;
                                r
                            },
                        };
                    }
                }
                SeqState::IacSub => {
                    if u == SE {
                        self.finish_iac_long(steal, false);
                    } else {
                        // Unexpected command byte where SE was expected: close the
                        // subnegotiation as broken, then replay `u` as the first
                        // byte of a brand new IAC command against the restored
                        // (popped) state. `u` cannot itself be IAC here — step 1
                        // would already have intercepted a literal IAC IAC escape
                        // before this arm is ever reached.
                        self.finish_iac_long(steal, true);
                        self.iac_pending = true;
                        self.process_byte(u, steal);
                    }
                }
                SeqState::IacOption | SeqState::CharMulti => {
                    crate::debug_log!(
                        "keystroke: fatal invariant violation, post-IAC dispatch reached {:?}",
                        self.in_seq.state
                    );
                    unreachable!(
                        "fatal invariant violation: post-IAC dispatch reached {:?}",
                        self.in_seq.state
                    )
                }
            }
            return;
        }

        // Step 3: normal dispatch.
        self.dispatch_data_byte(u, steal);
    }

    fn dispatch_data_byte(&mut self, u: u8, steal: &mut Option<&mut KeystrokeEvent>) {
        match self.in_seq.state {
            SeqState::Idle => {
                if u == ESC {
                    self.in_seq.state = SeqState::Esc;
                } else if u == self.csi_byte && self.csi_byte != ESC {
                    self.in_seq.len = 0;
                    self.in_seq.state = SeqState::Csi;
                } else {
                    self.put(steal, EventType::Char, false, &[u], false);
                }
            }
            SeqState::Esc => {
                if u == b'[' {
                    self.in_seq.len = 0;
                    self.in_seq.state = SeqState::Csi;
                } else {
                    self.in_seq.state = SeqState::Idle;
                    self.emit_esc(steal, &[u]);
                }
            }
            SeqState::Csi => {
                if (CSI_PARAM_LO..=CSI_PARAM_HI).contains(&u) {
                    self.in_seq.add_raw(u);
                } else if (CSI_FINAL_LO..=CSI_FINAL_HI).contains(&u) {
                    self.finish_csi(steal, u);
                } else {
                    // Malformed: byte outside the legal CSI range. Close out the
                    // sequence as broken, then reprocess `u` from idle — step 1
                    // will re-arm `iac_pending` on its own if `u == IAC`.
                    self.finish_csi(steal, 0);
                    self.process_byte(u, steal);
                }
            }
            SeqState::IacOption => {
                self.in_seq.add_raw(u);
                if self.in_seq.raw[0] == SB {
                    self.in_seq.state = SeqState::IacSub;
                } else {
                    self.finish_iac_long(steal, false);
                }
            }
            SeqState::IacSub => {
                self.in_seq.add_raw(u);
            }
            SeqState::CharMulti => {
                crate::debug_log!("keystroke: fatal invariant violation, char_multi reached in dispatch");
                unreachable!("fatal invariant violation: char_multi is undefined in this revision")
            }
        }
    }

    // -- emission -----------------------------------------------------------

    fn emit_esc(&mut self, steal: &mut Option<&mut KeystrokeEvent>, payload: &[u8]) {
        let broken = payload.is_empty();
        self.put(steal, EventType::Esc, broken, payload, false);
    }

    fn emit_iac_short(&mut self, steal: &mut Option<&mut KeystrokeEvent>, payload: &[u8]) {
        let broken = payload.is_empty();
        self.put(steal, EventType::Iac, broken, payload, false);
    }

    fn finish_iac_long(&mut self, steal: &mut Option<&mut KeystrokeEvent>, broken: bool) {
        let truncated = self.in_seq.len > KMAX;
        let len = self.in_seq.len.min(KMAX);
        let payload = self.in_seq.raw;
        self.put(steal, EventType::Iac, broken, &payload[..len], truncated);
        self.in_seq = self.pushed_in;
        self.pushed_in.reset();
    }

    /// Appends `terminator` (a real 0x40..0x7F byte, or the synthetic `\0`
    /// used for broken/EOF closures) and emits the completed CSI sequence.
    fn finish_csi(&mut self, steal: &mut Option<&mut KeystrokeEvent>, terminator: u8) {
        self.in_seq.add_raw(terminator);
        let total_len = self.in_seq.len;
        let truncated = total_len > KMAX;
        let mut payload = self.in_seq.raw;
        if truncated {
            payload[KMAX - 1] = terminator;
        }
        let clamped_len = total_len.min(KMAX);
        self.in_seq.reset();

        let broken = terminator == 0;
        if !broken && !truncated && self.steal_this {
            if let Some(slot) = steal.take() {
                // Source convention: a stolen CSI is tagged `esc`, not `csi`.
                let param_len = clamped_len - 1;
                let mut buf = [0u8; KMAX];
                buf[..param_len].copy_from_slice(&payload[..param_len]);
                *slot = KeystrokeEvent {
                    kind: EventType::Esc,
                    value: terminator as u32,
                    flags: KeystrokeFlags::empty(),
                    len: param_len,
                    buf,
                };
                self.steal_this = false;
                return;
            }
        }
        self.put(steal, EventType::Csi, broken, &payload[..clamped_len], truncated);
    }

    /// Produces the FIFO encoding for an event, or diverts it into `steal`
    /// when stealing is armed, the event is well-formed, and its type is
    /// eligible (`char`/`esc`; IAC is never stolen, and CSI stealing is
    /// handled specially in [`finish_csi`](Self::finish_csi)).
    fn put(
        &mut self,
        steal: &mut Option<&mut KeystrokeEvent>,
        kind: EventType,
        broken: bool,
        payload: &[u8],
        truncated: bool,
    ) {
        if !broken
            && !truncated
            && self.steal_this
            && matches!(kind, EventType::Char | EventType::Esc)
        {
            if let Some(slot) = steal.take() {
                let mut buf = [0u8; KMAX];
                let n = payload.len().min(KMAX);
                buf[..n].copy_from_slice(&payload[..n]);
                let value = match kind {
                    EventType::Char => be_combine(&payload[..n]),
                    EventType::Esc => payload.first().copied().unwrap_or(0) as u32,
                    _ => unreachable!(),
                };
                *slot = KeystrokeEvent {
                    kind,
                    value,
                    flags: KeystrokeFlags::empty(),
                    len: n,
                    buf,
                };
                self.steal_this = false;
                return;
            }
        }
        self.fifo_enqueue(kind, KeystrokeFlags::of(broken, truncated), payload);
    }

    fn fifo_enqueue(&mut self, kind: EventType, flags: KeystrokeFlags, payload: &[u8]) {
        let n = payload.len().min(KMAX);
        if kind == EventType::Char && flags.is_empty() && n == 1 && payload[0] < 0x80 {
            self.fifo.push_back(payload[0]);
            return;
        }
        if !flags.is_empty() && trace_enabled() {
            crate::debug_log!("keystroke: emitting {kind:?} broken={} truncated={}", flags.contains(KeystrokeFlags::BROKEN), flags.contains(KeystrokeFlags::TRUNCATED));
        }
        let header = 0x80 | flags.bits() | kind.fifo_tag();
        self.fifo.push_back(header);
        self.fifo.push_back(n as u8);
        self.fifo.extend(payload[..n].iter().copied());
    }
}

fn be_combine(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_all(s: &mut KeystrokeStream) -> Vec<KeystrokeEvent> {
        let mut out = Vec::new();
        loop {
            let e = s.fetch();
            if e.is_null() {
                break;
            }
            out.push(e);
        }
        out
    }

    #[test]
    fn plain_chars() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(b"ABC"), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 3);
        for (e, b) in ev.iter().zip(b"ABC") {
            assert_eq!(e.kind, EventType::Char);
            assert_eq!(e.value, *b as u32);
            assert!(e.flags.is_empty());
            assert_eq!(e.len, 1);
            assert_eq!(e.buf[0], *b);
        }
    }

    #[test]
    fn csi_with_parameter() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[0x1B, b'[', b'3', b'~']), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].kind, EventType::Csi);
        assert_eq!(ev[0].value, b'~' as u32);
        assert!(ev[0].flags.is_empty());
        assert_eq!(ev[0].len, 1);
        assert_eq!(ev[0].buf[0], b'3');
    }

    #[test]
    fn esc_o() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[0x1B, b'O']), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].kind, EventType::Esc);
        assert_eq!(ev[0].value, b'O' as u32);
        assert!(ev[0].flags.is_empty());
        assert_eq!(ev[0].len, 1);
    }

    #[test]
    fn iac_will_echo() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[IAC, WILL, 1]), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].kind, EventType::Iac);
        assert_eq!(ev[0].value, WILL as u32);
        assert!(ev[0].flags.is_empty());
        assert_eq!(ev[0].len, 2);
        assert_eq!(&ev[0].buf[..2], &[WILL, 1]);
    }

    #[test]
    fn iac_iac_is_literal_0xff() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[b'A', IAC, IAC, b'B']), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 3);
        assert_eq!(ev[0].value, b'A' as u32);
        assert_eq!(ev[1].kind, EventType::Char);
        assert_eq!(ev[1].value, 0xFF);
        assert_eq!(ev[1].len, 1);
        assert_eq!(ev[2].value, b'B' as u32);
    }

    #[test]
    fn iac_interleaved_inside_csi() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[0x1B, b'[', IAC, WILL, 1, b'3', b'~']), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 2);
        assert_eq!(ev[0].kind, EventType::Iac);
        assert_eq!(ev[0].value, WILL as u32);
        assert_eq!(ev[1].kind, EventType::Csi);
        assert_eq!(ev[1].value, b'~' as u32);
        assert_eq!(ev[1].buf[0], b'3');
    }

    #[test]
    fn eof_mid_csi_is_broken() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[0x1B, b'[', b'3']), None);
        s.input(None, None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].kind, EventType::Csi);
        assert_eq!(ev[0].value, 0);
        assert!(ev[0].flags.contains(KeystrokeFlags::BROKEN));
        assert_eq!(ev[0].len, 1);
        assert_eq!(ev[0].buf[0], b'3');
        assert!(s.eof_reached());
    }

    #[test]
    fn steal_diverts_next_well_formed_keystroke() {
        let mut s = KeystrokeStream::new(ESC);
        let mut stolen = KeystrokeEvent::null(NullKind::NotEof);
        s.input(Some(b"AB"), Some(&mut stolen));
        assert_eq!(stolen.kind, EventType::Char);
        assert_eq!(stolen.value, b'A' as u32);
        let ev = s.fetch();
        assert_eq!(ev.kind, EventType::Char);
        assert_eq!(ev.value, b'B' as u32);
    }

    #[test]
    fn steal_never_takes_iac_or_broken_events() {
        let mut s = KeystrokeStream::new(ESC);
        let mut stolen = KeystrokeEvent::null(NullKind::NotEof);
        s.input(Some(&[IAC, WILL, 1, b'Z']), Some(&mut stolen));
        // IAC events are never stealable, so the steal slot should divert to
        // the next eligible keystroke instead: the plain char 'Z'.
        assert_eq!(stolen.kind, EventType::Char);
        assert_eq!(stolen.value, b'Z' as u32);
        let mut fifo = fetch_all(&mut s);
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo.remove(0).kind, EventType::Iac);
    }

    #[test]
    fn steal_skips_broken_csi_but_takes_the_reprocessed_byte() {
        let mut s = KeystrokeStream::new(ESC);
        let mut stolen = KeystrokeEvent::null(NullKind::NotEof);
        // 0x01 is outside the legal CSI byte ranges: malformed/broken. It
        // closes the CSI (never stealable, broken events never touch
        // `steal_this`) and is then reprocessed from idle — at that point
        // the stream is "between keystrokes" again, so 0x01 itself is an
        // ordinary, well-formed `Char` and is the one actually stolen, not
        // the following 'Z'.
        s.input(Some(&[0x1B, b'[', 0x01, b'Z']), Some(&mut stolen));
        assert_eq!(stolen.kind, EventType::Char);
        assert_eq!(stolen.value, 0x01);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 2);
        assert_eq!(ev[0].kind, EventType::Csi);
        assert!(ev[0].flags.contains(KeystrokeFlags::BROKEN));
        assert_eq!(ev[1].kind, EventType::Char);
        assert_eq!(ev[1].value, b'Z' as u32);
    }

    #[test]
    fn steal_only_armed_between_keystrokes() {
        let mut s = KeystrokeStream::new(ESC);
        // Begin a CSI sequence without a steal slot so it's left in-flight.
        s.input(Some(&[0x1B, b'[']), None);
        let mut stolen = KeystrokeEvent::null(NullKind::NotEof);
        // A steal requested while a sequence is mid-flight must not fire
        // until that sequence completes and enqueues normally.
        s.input(Some(&[b'3', b'~']), Some(&mut stolen));
        assert!(stolen.is_null());
        let ev = s.fetch();
        assert_eq!(ev.kind, EventType::Csi);
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_event_sequence() {
        let input: &[u8] = &[b'h', 0x1B, b'[', b'3', b'1', b'm', IAC, WILL, 1, b'!', 0x1B, b'O'];
        let whole = {
            let mut s = KeystrokeStream::new(ESC);
            s.input(Some(input), None);
            s.input(None, None);
            fetch_all(&mut s)
        };
        for split in 1..input.len() {
            let mut s = KeystrokeStream::new(ESC);
            s.input(Some(&input[..split]), None);
            s.input(Some(&input[split..]), None);
            s.input(None, None);
            let chunked = fetch_all(&mut s);
            assert_eq!(chunked, whole, "split at {split} produced a different event sequence");
        }
    }

    #[test]
    fn truncated_csi_preserves_terminator_and_never_overflows_buf() {
        let mut s = KeystrokeStream::new(ESC);
        let mut seq = vec![0x1B, b'['];
        seq.extend(std::iter::repeat(b'1').take(KMAX + 4));
        seq.push(b'm');
        s.input(Some(&seq), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].kind, EventType::Csi);
        assert!(ev[0].flags.contains(KeystrokeFlags::TRUNCATED));
        assert_eq!(ev[0].value, b'm' as u32);
        assert!(ev[0].len <= KMAX);
    }

    #[test]
    fn csi_byte_alternate_0x9b() {
        let mut s = KeystrokeStream::new(0x9B);
        s.input(Some(&[0x9B, b'3', b'~']), None);
        let ev = fetch_all(&mut s);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].kind, EventType::Csi);
        assert_eq!(ev[0].value, b'~' as u32);
    }

    #[test]
    fn csi_byte_zero_and_esc_both_disable_distinct_csi_byte() {
        for ctor in [KeystrokeStream::new(0), KeystrokeStream::new(ESC)] {
            let mut s = ctor;
            // 0x9B would be the "distinct CSI byte" in a conflicting config,
            // but with it disabled it is simply an ordinary high-bit char.
            s.input(Some(&[0x9B]), None);
            let ev = s.fetch();
            assert_eq!(ev.kind, EventType::Char);
            assert_eq!(ev.value, 0x9B);
        }
    }

    #[test]
    fn set_eof_discards_partial_state_without_flushing() {
        let mut s = KeystrokeStream::new(ESC);
        s.input(Some(&[0x1B, b'[', b'3']), None);
        s.set_eof();
        assert!(s.is_empty());
        assert!(s.eof_reached());
        let ev = s.fetch();
        assert!(ev.is_null());
        assert_eq!(ev.null_kind(), Some(NullKind::Eof));
    }

    #[test]
    fn empty_fifo_returns_not_eof_before_eof_and_eof_after() {
        let mut s = KeystrokeStream::new(ESC);
        let ev = s.fetch();
        assert_eq!(ev.null_kind(), Some(NullKind::NotEof));
        s.input(None, None);
        let ev = s.fetch();
        assert_eq!(ev.null_kind(), Some(NullKind::Eof));
    }
}
