//! Byte-level SQL scanner shared by the statement splitter and the
//! cursor lookup. It only knows enough SQL lexing to tell whether a `;`
//! is a real statement separator.

/*──── finite-state machine states ────────────────────────────────*/
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ParseState {
    Normal,
    InSingle,   // inside '…'
    InDouble,   // inside "…"
    InBacktick, // inside `…`
    InBlock,    // inside /* … */
    InLine,     // inside -- … to end-of-line
}

/*──── one-byte scanner result codes ──────────────────────────────*/
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step { Semi, Advance, Eof }

/// Advance the scanner by one token unit starting at `i`.
///
/// Returns the next offset and what was crossed. `Step::Semi` is only
/// reported from `ParseState::Normal`, and the returned offset points just
/// past the `;`. All delimiters are ASCII, so every offset handed back lies
/// on a UTF-8 character boundary.
pub fn step(bytes: &[u8], mut i: usize, state: &mut ParseState) -> (usize, Step) {
    if i >= bytes.len() {
        return (i, Step::Eof);
    }
    macro_rules! next { () => { i += 1 } }

    match *state {
        /*── Normal ───────────────────────────────*/
        ParseState::Normal => match bytes[i] {
            b'\''                                 => { *state = ParseState::InSingle;   next!(); }
            b'"'                                  => { *state = ParseState::InDouble;   next!(); }
            b'`'                                  => { *state = ParseState::InBacktick; next!(); }
            b'/' if bytes.get(i+1) == Some(&b'*') => { *state = ParseState::InBlock;    i += 2; }
            b'-' if bytes.get(i+1) == Some(&b'-') => { *state = ParseState::InLine;     i += 2; }
            b';'                                  => { next!(); return (i, Step::Semi); }
            _                                     => { next!(); }
        },

        /*── inside '…' / "…" / `…` ──────────────────*/
        ParseState::InSingle   => i = quoted(bytes, i, b'\'', state),
        ParseState::InDouble   => i = quoted(bytes, i, b'"', state),
        ParseState::InBacktick => i = quoted(bytes, i, b'`', state),

        /*── inside /* … */ ──────────────────────*/
        ParseState::InBlock => {
            next!();
            if bytes[i - 1] == b'*' && bytes.get(i) == Some(&b'/') {
                *state = ParseState::Normal; next!();
            }
        }

        /*── inside -- … \n ─────────────────────────*/
        ParseState::InLine => {
            next!();
            if bytes[i - 1] == b'\n' { *state = ParseState::Normal; }
        }
    }
    (i, Step::Advance)
}

/// One byte inside a quoted run. Handles both doubled quotes (`''`) and
/// backslash escapes (`\'`).
fn quoted(bytes: &[u8], mut i: usize, quote: u8, state: &mut ParseState) -> usize {
    i += 1;
    match bytes[i - 1] {
        b if b == quote => {
            if bytes.get(i) == Some(&quote) { i += 1; }   // doubled
            else { *state = ParseState::Normal; }
        }
        b'\\' if i < bytes.len() => { i += 1; }          // skip escaped byte
        _ => {}
    }
    i
}
