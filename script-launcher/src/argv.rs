// Packed argument vectors and argument injection

use crate::cmdline::{ArgvSize, CodeUnit};
#[cfg(any(windows, test))]
use crate::cmdline::{parse_cmdline, ArgvOut};

/// An argument vector stored as one packed, NUL-separated unit buffer plus
/// the start offset of each argument.
///
/// Always holds at least one argument (the program name). Buffers are sized
/// by a counting pass before anything is copied, so each is allocated once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArgv<T> {
    starts: Vec<usize>,
    units: Vec<T>,
}

impl<T: CodeUnit> PackedArgv<T> {
    fn allocate(size: ArgvSize) -> Self {
        Self {
            starts: vec![0; size.argc()],
            units: vec![T::default(); size.units],
        }
    }

    /// Split a raw command line with the C runtime rules.
    #[cfg(any(windows, test))]
    pub fn from_command_line(cmdline: &[T]) -> Self {
        let size = parse_cmdline(cmdline, None);
        let mut argv = Self::allocate(size);
        let copied = parse_cmdline(
            cmdline,
            Some(ArgvOut {
                starts: &mut argv.starts,
                units: &mut argv.units,
            }),
        );
        debug_assert_eq!(size, copied);
        argv
    }

    /// Pack already-split arguments, e.g. the platform's argv. An empty
    /// sequence yields a single empty program name.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[T]>,
    {
        let args: Vec<A> = args.into_iter().collect();
        let mut size = ArgvSize {
            slots: args.len().max(1) + 1,
            units: args.iter().map(|a| a.as_ref().len() + 1).sum(),
        };
        if args.is_empty() {
            size.units = 1;
        }

        let mut argv = Self::allocate(size);
        let mut packer = Packer::new(&mut argv);
        if args.is_empty() {
            packer.push(&[]);
        }
        for arg in &args {
            packer.push(arg.as_ref());
        }
        packer.finish(size);
        argv
    }

    /// Build the interpreter's argv: the original program name, `flag`,
    /// `script`, then the original arguments from index 1 on.
    pub fn inject(&self, flag: &[T], script: &[T]) -> Self {
        let size = ArgvSize {
            slots: self.starts.len() + 3,
            units: self.units.len() + flag.len() + 1 + script.len() + 1,
        };

        let mut argv = Self::allocate(size);
        let mut packer = Packer::new(&mut argv);
        packer.push(self.program());
        packer.push(flag);
        packer.push(script);
        for arg in self.iter().skip(1) {
            packer.push(arg);
        }
        packer.finish(size);
        argv
    }

    /// Number of arguments; never zero.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn program(&self) -> &[T] {
        self.arg(0)
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&[T]> {
        (index < self.starts.len()).then(|| self.arg(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.starts.len()).map(move |i| self.arg(i))
    }

    /// Argument at `index`, terminator excluded.
    fn arg(&self, index: usize) -> &[T] {
        let start = self.starts[index];
        let nul = T::default();
        let len = self.units[start..]
            .iter()
            .position(|&c| c == nul)
            .unwrap_or(self.units.len() - start);
        &self.units[start..start + len]
    }

    /// NUL-terminated pointers into the packed buffer followed by a null
    /// slot, the layout C entry points expect for argv.
    ///
    /// The pointers borrow `self` and are valid while it is neither moved
    /// nor dropped.
    pub fn c_argv(&mut self) -> Vec<*mut T> {
        let base = self.units.as_mut_ptr();
        self.starts
            .iter()
            // SAFETY: every start offset lies inside `units`
            .map(|&start| unsafe { base.add(start) })
            .chain(std::iter::once(std::ptr::null_mut()))
            .collect()
    }
}

// Copies arguments into a vector allocated from a precomputed size.
struct Packer<'a, T> {
    argv: &'a mut PackedArgv<T>,
    slot: usize,
    unit: usize,
}

impl<'a, T: CodeUnit> Packer<'a, T> {
    fn new(argv: &'a mut PackedArgv<T>) -> Self {
        Self {
            argv,
            slot: 0,
            unit: 0,
        }
    }

    fn push(&mut self, arg: &[T]) {
        self.argv.starts[self.slot] = self.unit;
        self.argv.units[self.unit..self.unit + arg.len()].copy_from_slice(arg);
        self.argv.units[self.unit + arg.len()] = T::default();
        self.slot += 1;
        self.unit += arg.len() + 1;
    }

    fn finish(self, size: ArgvSize) {
        debug_assert_eq!(self.slot, size.argc());
        debug_assert_eq!(self.unit, size.units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(argv: &PackedArgv<u8>) -> Vec<String> {
        argv.iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    #[test]
    fn inject_places_flag_and_script_after_program() {
        let original = PackedArgv::from_args(["prog", "x", "y"].map(str::as_bytes));
        let injected = original.inject(b"-E", b"S");
        assert_eq!(strings(&injected), vec!["prog", "-E", "S", "x", "y"]);
        assert_eq!(injected.len(), 5);
    }

    #[test]
    fn inject_into_program_only() {
        let original = PackedArgv::from_args([b"C:\\sdk\\emcc.exe".as_slice()]);
        let injected = original.inject(b"-E", b"C:\\sdk\\emcc.py");
        assert_eq!(strings(&injected), vec!["C:\\sdk\\emcc.exe", "-E", "C:\\sdk\\emcc.py"]);
    }

    #[test]
    fn inject_keeps_empty_arguments() {
        let original = PackedArgv::from_args(["prog", "", "z"].map(str::as_bytes));
        let injected = original.inject(b"-E", b"s.py");
        assert_eq!(strings(&injected), vec!["prog", "-E", "s.py", "", "z"]);
    }

    #[test]
    fn tokenized_then_injected() {
        let cmdline: Vec<u16> = r"C:\sdk\emcc.exe --version".encode_utf16().collect();
        let flag: Vec<u16> = "-E".encode_utf16().collect();
        let script: Vec<u16> = r"C:\sdk\emcc.py".encode_utf16().collect();

        let argv = PackedArgv::from_command_line(&cmdline).inject(&flag, &script);
        let args: Vec<String> = argv.iter().map(String::from_utf16_lossy).collect();
        assert_eq!(args, vec![r"C:\sdk\emcc.exe", "-E", r"C:\sdk\emcc.py", "--version"]);
    }

    #[test]
    fn empty_args_still_have_program_slot() {
        let argv = PackedArgv::<u8>::from_args(Vec::<Vec<u8>>::new());
        assert_eq!(argv.len(), 1);
        assert_eq!(argv.program(), b"");
    }

    #[test]
    fn get_out_of_range() {
        let argv = PackedArgv::from_args([b"a".as_slice()]);
        assert_eq!(argv.get(0), Some(b"a".as_slice()));
        assert_eq!(argv.get(1), None);
    }

    #[test]
    fn c_argv_is_null_terminated() {
        let mut argv = PackedArgv::from_args(["prog", "arg"].map(str::as_bytes));
        let ptrs = argv.c_argv();
        assert_eq!(ptrs.len(), 3);
        assert!(ptrs[2].is_null());
        unsafe {
            assert_eq!(*ptrs[1], b'a');
            assert_eq!(*ptrs[1].add(3), 0);
        }
    }
}
