// Command-line splitting and quoting, following the Microsoft C runtime rules
//
// We don't use CommandLineToArgvW: its program-name handling differs from
// what the C runtime hands to main(), and the interpreter we launch was
// built against the C runtime.

use std::fmt;

/// A character unit of an OS string: `u16` on Windows, `u8` elsewhere.
pub trait CodeUnit: Copy + Eq + Default + From<u8> + fmt::Debug {}

impl<T: Copy + Eq + Default + From<u8> + fmt::Debug> CodeUnit for T {}

#[cfg(any(windows, test))]
const NUL: u8 = 0;
const SPACE: u8 = b' ';
const TAB: u8 = b'\t';
const QUOTE: u8 = b'"';
const BACKSLASH: u8 = b'\\';

fn is<T: CodeUnit>(c: T, ascii: u8) -> bool {
    c == T::from(ascii)
}

fn is_blank<T: CodeUnit>(c: T) -> bool {
    is(c, SPACE) || is(c, TAB)
}

/// Totals computed by a parse.
///
/// `slots` counts argv entries including the trailing null slot, so it is
/// always at least 2. `units` counts characters including one terminator per
/// argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgvSize {
    pub slots: usize,
    pub units: usize,
}

impl ArgvSize {
    /// Number of real arguments (the null slot excluded).
    pub fn argc(&self) -> usize {
        self.slots - 1
    }
}

/// Destination of the copy pass. `starts` receives the offset of each
/// argument inside `units`; both must be sized from a prior sizing pass.
#[cfg(any(windows, test))]
pub struct ArgvOut<'a, T> {
    pub starts: &'a mut [usize],
    pub units: &'a mut [T],
}

// Counts always; writes only when a destination is attached.
#[cfg(any(windows, test))]
struct Sink<'a, T> {
    out: Option<ArgvOut<'a, T>>,
    slots: usize,
    units: usize,
}

#[cfg(any(windows, test))]
impl<T: CodeUnit> Sink<'_, T> {
    fn start_arg(&mut self) {
        if let Some(out) = self.out.as_mut() {
            out.starts[self.slots] = self.units;
        }
        self.slots += 1;
    }

    fn push(&mut self, c: T) {
        if let Some(out) = self.out.as_mut() {
            out.units[self.units] = c;
        }
        self.units += 1;
    }

    fn push_backslashes(&mut self, n: usize) {
        for _ in 0..n {
            self.push(T::from(BACKSLASH));
        }
    }
}

/// Split `cmdline` into arguments.
///
/// Called with `out = None` this is the sizing pass; called again with
/// buffers sized from its result it performs the copy. Both passes return
/// the same [`ArgvSize`] for the same input. The end of the slice, or an
/// embedded NUL, terminates the command line.
#[cfg(any(windows, test))]
pub fn parse_cmdline<T: CodeUnit>(cmdline: &[T], out: Option<ArgvOut<'_, T>>) -> ArgvSize {
    let at = |i: usize| cmdline.get(i).copied().unwrap_or_else(|| T::from(NUL));
    let mut sink = Sink {
        out,
        slots: 0,
        units: 0,
    };
    let mut pos = 0usize;

    // Program name: quotes toggle but are never copied, backslashes are
    // ordinary characters.
    sink.start_arg();
    let mut in_quotes = false;
    loop {
        let c = at(pos);
        if is(c, NUL) {
            break;
        }
        if !in_quotes && is_blank(c) {
            pos += 1;
            break;
        }
        if is(c, QUOTE) {
            in_quotes = !in_quotes;
        } else {
            sink.push(c);
        }
        pos += 1;
    }
    sink.push(T::from(NUL));

    in_quotes = false;
    loop {
        while is_blank(at(pos)) {
            pos += 1;
        }
        if is(at(pos), NUL) {
            break;
        }

        sink.start_arg();
        loop {
            let mut copy = true;
            let mut slashes = 0usize;
            while is(at(pos), BACKSLASH) {
                pos += 1;
                slashes += 1;
            }

            if is(at(pos), QUOTE) {
                if slashes % 2 == 0 {
                    if in_quotes && is(at(pos + 1), QUOTE) {
                        // "" inside quotes is a literal quote
                        pos += 1;
                    } else {
                        copy = false;
                        in_quotes = !in_quotes;
                    }
                }
                slashes /= 2;
            }
            sink.push_backslashes(slashes);

            let c = at(pos);
            if is(c, NUL) || (!in_quotes && is_blank(c)) {
                break;
            }
            if copy {
                sink.push(c);
            }
            pos += 1;
        }
        sink.push(T::from(NUL));
    }

    // trailing null slot
    sink.slots += 1;

    ArgvSize {
        slots: sink.slots,
        units: sink.units,
    }
}

/// Append `arg` so that [`parse_cmdline`] reads it back unchanged when it is
/// not in program-name position.
pub fn append_arg<T: CodeUnit>(cmd: &mut Vec<T>, arg: &[T]) {
    let quote = arg.is_empty() || arg.iter().any(|&c| is_blank(c));
    if quote {
        cmd.push(T::from(QUOTE));
    }

    let mut backslashes = 0usize;
    for &c in arg {
        if is(c, BACKSLASH) {
            backslashes += 1;
        } else {
            if is(c, QUOTE) {
                // escape the run and the quote itself
                cmd.extend(std::iter::repeat(T::from(BACKSLASH)).take(backslashes + 1));
            }
            backslashes = 0;
        }
        cmd.push(c);
    }

    if quote {
        cmd.extend(std::iter::repeat(T::from(BACKSLASH)).take(backslashes));
        cmd.push(T::from(QUOTE));
    }
}

/// Append a program name. It is always quoted since the program-name rule
/// ends at the next quote and never interprets backslashes.
pub fn append_program<T: CodeUnit>(cmd: &mut Vec<T>, program: &[T]) {
    cmd.push(T::from(QUOTE));
    cmd.extend_from_slice(program);
    cmd.push(T::from(QUOTE));
}

/// Render `program` followed by `args` as a single command line.
pub fn render_command_line<'a, T, I>(program: &[T], args: I) -> Vec<T>
where
    T: CodeUnit + 'a,
    I: IntoIterator<Item = &'a [T]>,
{
    let mut cmd = Vec::new();
    append_program(&mut cmd, program);
    for arg in args {
        cmd.push(T::from(SPACE));
        append_arg(&mut cmd, arg);
    }
    cmd
}

/// Render only the arguments, space separated, for APIs that supply the
/// program name themselves.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn render_args<'a, T, I>(args: I) -> Vec<T>
where
    T: CodeUnit + 'a,
    I: IntoIterator<Item = &'a [T]>,
{
    let mut cmd = Vec::new();
    for (i, arg) in args.into_iter().enumerate() {
        if i > 0 {
            cmd.push(T::from(SPACE));
        }
        append_arg(&mut cmd, arg);
    }
    cmd
}
