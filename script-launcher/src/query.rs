// Buffer-growing protocol for OS calls that return strings of unknown length
//
// Two conventions exist. Length-known calls (GetFullPathNameW,
// GetEnvironmentVariableW, _NSGetExecutablePath) answer a too-small buffer
// with the size they need. Length-unknown calls (GetModuleFileNameW,
// readlink) only say that the result was truncated. `query` hides the
// difference from its callers.

use std::io;

use crate::error::QueryError;

/// Starting capacity when the OS cannot report a size up front (MAX_PATH).
pub const BASELINE_CAPACITY: usize = 260;

/// Outcome of a single fetch into a caller-supplied buffer.
#[derive(Debug)]
pub enum Fetch {
    /// The value fit. The count excludes any terminator.
    Filled(usize),
    /// The buffer was too small. Carries the required length, excluding the
    /// terminator, when the call reports one.
    TooSmall(Option<usize>),
    Failed(io::Error),
}

/// Owned buffer plus the number of units actually in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedBuffer<T> {
    data: Vec<T>,
    len: usize,
}

impl<T: Copy + Default> SizedBuffer<T> {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            len: 0,
        }
    }

    fn with_capacity(capacity: usize) -> Result<Self, QueryError> {
        let mut buf = Self::empty();
        buf.grow_to(capacity)?;
        Ok(buf)
    }

    fn grow_to(&mut self, capacity: usize) -> Result<(), QueryError> {
        if capacity <= self.data.len() {
            return Ok(());
        }
        self.data
            .try_reserve_exact(capacity - self.data.len())
            .map_err(|_| QueryError::OutOfMemory(capacity))?;
        self.data.resize(capacity, T::default());
        Ok(())
    }

    fn finish(mut self, len: usize) -> Self {
        self.data.truncate(len);
        self.data.shrink_to_fit();
        self.len = len;
        self
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Units allocated for the value. Never less than `len()`.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[cfg(any(windows, test))]
    pub fn into_vec(mut self) -> Vec<T> {
        self.data.truncate(self.len);
        self.data
    }
}

/// Run `fetch` until it produces the whole value.
///
/// A zero-capacity probe comes first. If it reports the required size, one
/// exact-size fetch follows and must agree with the probe. Otherwise the
/// buffer starts at [`BASELINE_CAPACITY`] and doubles on every truncation.
pub fn query<T, F>(mut fetch: F) -> Result<SizedBuffer<T>, QueryError>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> Fetch,
{
    match fetch(&mut []) {
        Fetch::Filled(0) => Ok(SizedBuffer::empty()),
        Fetch::Filled(actual) => Err(QueryError::SizeMismatch {
            expected: 0,
            actual,
        }),
        Fetch::TooSmall(Some(required)) => fetch_exact(&mut fetch, required),
        Fetch::TooSmall(None) => fetch_growing(&mut fetch),
        Fetch::Failed(e) => Err(QueryError::Os(e)),
    }
}

fn fetch_exact<T, F>(fetch: &mut F, required: usize) -> Result<SizedBuffer<T>, QueryError>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> Fetch,
{
    // +1 for the terminator the OS writes
    let capacity = required
        .checked_add(1)
        .ok_or(QueryError::CapacityOverflow(required))?;
    let mut buf = SizedBuffer::with_capacity(capacity)?;

    match fetch(&mut buf.data) {
        Fetch::Filled(actual) if actual == required => Ok(buf.finish(actual)),
        Fetch::Filled(actual) | Fetch::TooSmall(Some(actual)) => Err(QueryError::SizeMismatch {
            expected: required,
            actual,
        }),
        Fetch::TooSmall(None) => Err(QueryError::SizeMismatch {
            expected: required,
            actual: capacity,
        }),
        Fetch::Failed(e) => Err(QueryError::Os(e)),
    }
}

fn fetch_growing<T, F>(fetch: &mut F) -> Result<SizedBuffer<T>, QueryError>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> Fetch,
{
    let mut buf = SizedBuffer::with_capacity(BASELINE_CAPACITY)?;

    loop {
        let capacity = buf.capacity();
        match fetch(&mut buf.data) {
            Fetch::Filled(len) if len <= capacity => return Ok(buf.finish(len)),
            Fetch::Filled(len) => {
                return Err(QueryError::SizeMismatch {
                    expected: capacity,
                    actual: len,
                })
            }
            Fetch::TooSmall(hint) => {
                let doubled = capacity
                    .checked_mul(2)
                    .ok_or(QueryError::CapacityOverflow(capacity))?;
                let next = match hint.and_then(|n| n.checked_add(1)) {
                    Some(needed) => needed.max(doubled),
                    None => doubled,
                };
                log::trace!("query buffer of {} units too small, growing to {}", capacity, next);
                buf.grow_to(next)?;
            }
            Fetch::Failed(e) => return Err(QueryError::Os(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    /// Behaves like GetFullPathNameW: too-small buffers get the required size.
    fn length_known(value: &[u16]) -> impl FnMut(&mut [u16]) -> Fetch + '_ {
        move |buf| {
            if buf.len() < value.len() + 1 {
                return Fetch::TooSmall(Some(value.len()));
            }
            buf[..value.len()].copy_from_slice(value);
            buf[value.len()] = 0;
            Fetch::Filled(value.len())
        }
    }

    /// Behaves like GetModuleFileNameW: truncates and reports a full buffer.
    fn length_unknown<'a>(value: &'a [u16], calls: &'a Cell<usize>) -> impl FnMut(&mut [u16]) -> Fetch + 'a {
        move |buf| {
            calls.set(calls.get() + 1);
            if buf.len() <= value.len() {
                let n = buf.len();
                buf.copy_from_slice(&value[..n]);
                return Fetch::TooSmall(None);
            }
            buf[..value.len()].copy_from_slice(value);
            buf[value.len()] = 0;
            Fetch::Filled(value.len())
        }
    }

    #[test]
    fn length_known_fetches_once_after_probe() {
        let value = wide(r"C:\sdk\emcc.exe");
        let calls = Cell::new(0);
        let mut inner = length_known(&value);
        let result = query(|buf: &mut [u16]| {
            calls.set(calls.get() + 1);
            inner(buf)
        })
        .unwrap();

        assert_eq!(result.as_slice(), &value[..]);
        assert_eq!(calls.get(), 2);
        assert_eq!(result.capacity(), result.len());
    }

    #[test]
    fn length_unknown_doubles_from_baseline() {
        let value: Vec<u16> = std::iter::repeat(b'a' as u16).take(1000).collect();
        let calls = Cell::new(0);
        let result = query(length_unknown(&value, &calls)).unwrap();

        assert_eq!(result.as_slice(), &value[..]);
        // probe, 260, 520, 1040
        assert_eq!(calls.get(), 4);
        assert!(result.len() <= result.capacity());
    }

    #[test]
    fn length_unknown_short_value_fits_baseline() {
        let value = wide(r"C:\sdk\emcc.exe");
        let calls = Cell::new(0);
        let result = query(length_unknown(&value, &calls)).unwrap();
        assert_eq!(result.as_slice(), &value[..]);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn empty_value() {
        let result = query(length_known(&[])).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.into_vec(), Vec::<u16>::new());
    }

    #[test]
    fn value_changing_between_probe_and_fetch_fails() {
        let calls = Cell::new(0);
        let result = query(|buf: &mut [u16]| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Fetch::TooSmall(Some(4))
            } else {
                buf[..2].copy_from_slice(&[1, 2]);
                Fetch::Filled(2)
            }
        });
        assert!(matches!(
            result,
            Err(QueryError::SizeMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn value_growing_between_probe_and_fetch_fails() {
        let calls = Cell::new(0);
        let result = query(|_buf: &mut [u16]| {
            calls.set(calls.get() + 1);
            Fetch::TooSmall(Some(calls.get() * 10))
        });
        assert!(matches!(
            result,
            Err(QueryError::SizeMismatch {
                expected: 10,
                actual: 20
            })
        ));
    }

    #[test]
    fn os_error_is_terminal() {
        let calls = Cell::new(0);
        let result = query(|buf: &mut [u8]| {
            calls.set(calls.get() + 1);
            if buf.is_empty() {
                Fetch::TooSmall(None)
            } else {
                Fetch::Failed(io::Error::from(io::ErrorKind::PermissionDenied))
            }
        });
        assert!(matches!(result, Err(QueryError::Os(_))));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn growth_honours_size_hint() {
        let value = vec![7u8; 5000];
        let result = query(|buf: &mut [u8]| {
            if buf.len() <= value.len() {
                Fetch::TooSmall(if buf.is_empty() { None } else { Some(value.len()) })
            } else {
                buf[..value.len()].copy_from_slice(&value);
                Fetch::Filled(value.len())
            }
        })
        .unwrap();
        assert_eq!(result.len(), 5000);
    }
}
