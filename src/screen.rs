//! Fixed-size virtual screen fed by raw PTY bytes.
//!
//! Interprets the VT subset that interactive agent REPLs actually emit:
//! cursor positioning, erase-in-line/display, CR/LF/BS/TAB, and SGR (parsed
//! and discarded). Everything else is consumed without effect. The grid never
//! resizes on its own; `resize` atomically replaces it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Ground,
    Escape,
    Csi,
    Osc,
    OscEsc,
    Charset,
}

/// Immutable view of the screen at a single instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub text: String,
    pub cursor_row: u16,
    pub cursor_col: u16,
}

pub struct Screen {
    rows: usize,
    cols: usize,
    grid: Vec<Vec<char>>,
    cursor_row: usize,
    cursor_col: usize,
    // Deferred wrap: printing in the last column leaves the cursor there and
    // wraps on the next printable, so full-width rows followed by CR/LF do
    // not produce a phantom blank line.
    pending_wrap: bool,
    state: ParseState,
    csi_params: Vec<u16>,
    csi_current: Option<u16>,
    utf8_pending: Vec<u8>,
}

const TAB_STOP: usize = 8;
const MAX_CSI_PARAMS: usize = 16;

impl Screen {
    pub fn new(rows: u16, cols: u16) -> Self {
        let rows = rows.max(1) as usize;
        let cols = cols.max(1) as usize;
        Self {
            rows,
            cols,
            grid: vec![vec![' '; cols]; rows],
            cursor_row: 0,
            cursor_col: 0,
            pending_wrap: false,
            state: ParseState::Ground,
            csi_params: Vec::new(),
            csi_current: None,
            utf8_pending: Vec::new(),
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.rows as u16, self.cols as u16)
    }

    /// Replace the grid with a blank one of the new dimensions.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        *self = Screen::new(rows, cols);
    }

    /// Feed a batch of raw PTY bytes through the parser.
    pub fn process(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.process_byte(byte);
        }
    }

    /// Current visible text plus cursor position. Bytes of an unfinished
    /// escape sequence or UTF-8 character live in parser state, never in
    /// cells, so a mid-sequence snapshot only shows complete frames.
    pub fn snapshot(&self) -> ScreenSnapshot {
        let mut text = String::with_capacity(self.rows * (self.cols + 1));
        for (i, row) in self.grid.iter().enumerate() {
            let line: String = row.iter().collect();
            text.push_str(line.trim_end());
            if i + 1 < self.rows {
                text.push('\n');
            }
        }
        ScreenSnapshot {
            text,
            cursor_row: self.cursor_row as u16,
            cursor_col: self.cursor_col as u16,
        }
    }

    fn process_byte(&mut self, byte: u8) {
        match self.state {
            ParseState::Ground => self.ground_byte(byte),
            ParseState::Escape => self.escape_byte(byte),
            ParseState::Csi => self.csi_byte(byte),
            ParseState::Osc => {
                if byte == 0x07 {
                    self.state = ParseState::Ground;
                } else if byte == 0x1b {
                    self.state = ParseState::OscEsc;
                }
            }
            ParseState::OscEsc => {
                // ST terminator is ESC \; anything else stays inside the OSC.
                self.state = if byte == b'\\' {
                    ParseState::Ground
                } else {
                    ParseState::Osc
                };
            }
            ParseState::Charset => self.state = ParseState::Ground,
        }
    }

    fn ground_byte(&mut self, byte: u8) {
        match byte {
            0x1b => {
                self.utf8_pending.clear();
                self.state = ParseState::Escape;
            }
            b'\r' => {
                self.cursor_col = 0;
                self.pending_wrap = false;
            }
            b'\n' => self.line_feed(),
            0x08 => {
                self.cursor_col = self.cursor_col.saturating_sub(1);
                self.pending_wrap = false;
            }
            b'\t' => {
                let next = (self.cursor_col / TAB_STOP + 1) * TAB_STOP;
                self.cursor_col = next.min(self.cols - 1);
                self.pending_wrap = false;
            }
            0x00..=0x1f | 0x7f => {} // BEL, VT, SO/SI, DEL: no effect
            _ => self.input_byte(byte),
        }
    }

    /// Accumulate UTF-8; print each completed scalar value.
    fn input_byte(&mut self, byte: u8) {
        if self.utf8_pending.is_empty() && byte < 0x80 {
            self.put_char(byte as char);
            return;
        }
        self.utf8_pending.push(byte);
        match std::str::from_utf8(&self.utf8_pending) {
            Ok(s) => {
                if let Some(ch) = s.chars().next() {
                    self.put_char(ch);
                }
                self.utf8_pending.clear();
            }
            Err(e) => {
                // Incomplete tail: keep waiting. Anything else is malformed.
                if e.error_len().is_some() || self.utf8_pending.len() >= 4 {
                    self.utf8_pending.clear();
                    self.put_char(char::REPLACEMENT_CHARACTER);
                }
            }
        }
    }

    fn put_char(&mut self, ch: char) {
        if self.pending_wrap {
            self.cursor_col = 0;
            self.line_feed();
        }
        self.grid[self.cursor_row][self.cursor_col] = ch;
        if self.cursor_col + 1 < self.cols {
            self.cursor_col += 1;
        } else {
            self.pending_wrap = true;
        }
    }

    fn line_feed(&mut self) {
        self.pending_wrap = false;
        if self.cursor_row + 1 < self.rows {
            self.cursor_row += 1;
        } else {
            self.grid.remove(0);
            self.grid.push(vec![' '; self.cols]);
        }
    }

    fn escape_byte(&mut self, byte: u8) {
        match byte {
            b'[' => {
                self.csi_params.clear();
                self.csi_current = None;
                self.state = ParseState::Csi;
            }
            b']' => self.state = ParseState::Osc,
            // Charset designation: exactly one more byte follows.
            b'(' | b')' | b'*' | b'+' => self.state = ParseState::Charset,
            _ => self.state = ParseState::Ground, // ESC =, ESC >, RIS, ...
        }
    }

    fn csi_byte(&mut self, byte: u8) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.csi_current =
                    Some(self.csi_current.unwrap_or(0).saturating_mul(10).saturating_add(digit));
            }
            b';' => {
                if self.csi_params.len() < MAX_CSI_PARAMS {
                    self.csi_params.push(self.csi_current.take().unwrap_or(0));
                } else {
                    self.csi_current = None;
                }
            }
            // Private markers and intermediates: accepted, sequence still
            // terminates on its final byte.
            b'?' | b'>' | b'<' | b'=' | b' '..=b'/' | b':' => {}
            0x40..=0x7e => {
                if let Some(p) = self.csi_current.take() {
                    if self.csi_params.len() < MAX_CSI_PARAMS {
                        self.csi_params.push(p);
                    }
                }
                self.dispatch_csi(byte);
                self.state = ParseState::Ground;
            }
            _ => self.state = ParseState::Ground,
        }
    }

    fn param(&self, idx: usize, default: u16) -> u16 {
        match self.csi_params.get(idx) {
            Some(0) | None => default,
            Some(&v) => v,
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8) {
        // SGR between a last-column print and the following text must not
        // cancel the deferred wrap.
        if final_byte != b'm' {
            self.pending_wrap = false;
        }
        match final_byte {
            b'A' => {
                let n = self.param(0, 1) as usize;
                self.cursor_row = self.cursor_row.saturating_sub(n);
            }
            b'B' => {
                let n = self.param(0, 1) as usize;
                self.cursor_row = (self.cursor_row + n).min(self.rows - 1);
            }
            b'C' => {
                let n = self.param(0, 1) as usize;
                self.cursor_col = (self.cursor_col + n).min(self.cols - 1);
            }
            b'D' => {
                let n = self.param(0, 1) as usize;
                self.cursor_col = self.cursor_col.saturating_sub(n);
            }
            b'E' => {
                let n = self.param(0, 1) as usize;
                self.cursor_row = (self.cursor_row + n).min(self.rows - 1);
                self.cursor_col = 0;
            }
            b'F' => {
                let n = self.param(0, 1) as usize;
                self.cursor_row = self.cursor_row.saturating_sub(n);
                self.cursor_col = 0;
            }
            b'G' => {
                let col = self.param(0, 1) as usize;
                self.cursor_col = col.saturating_sub(1).min(self.cols - 1);
            }
            b'H' | b'f' => {
                let row = self.param(0, 1) as usize;
                let col = self.param(1, 1) as usize;
                self.cursor_row = row.saturating_sub(1).min(self.rows - 1);
                self.cursor_col = col.saturating_sub(1).min(self.cols - 1);
            }
            b'J' => self.erase_display(self.csi_params.first().copied().unwrap_or(0)),
            b'K' => self.erase_line(self.csi_params.first().copied().unwrap_or(0)),
            b'm' => {} // SGR: attributes are not tracked
            _ => {}    // unknown finals consumed without effect
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let row = &mut self.grid[self.cursor_row];
        match mode {
            0 => row[self.cursor_col..].fill(' '),
            1 => row[..=self.cursor_col].fill(' '),
            2 => row.fill(' '),
            _ => {}
        }
    }

    fn erase_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.grid[self.cursor_row][self.cursor_col..].fill(' ');
                for row in self.grid[self.cursor_row + 1..].iter_mut() {
                    row.fill(' ');
                }
            }
            1 => {
                for row in self.grid[..self.cursor_row].iter_mut() {
                    row.fill(' ');
                }
                self.grid[self.cursor_row][..=self.cursor_col].fill(' ');
            }
            2 | 3 => {
                for row in self.grid.iter_mut() {
                    row.fill(' ');
                }
            }
            _ => {}
        }
    }
}
