//! Fixed-width handler arguments.
//!
//! Every message carries up to [`MAX_ARGS`] 32-bit values in addition
//! to its payload. The values travel inline in the packet header, so
//! the container is a plain copyable array rather than a heap
//! allocation.

use std::ops::Index;

/// Most arguments a single message can carry.
pub const MAX_ARGS: usize = 16;

/// Argument list attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Args {
    vals: [u32; MAX_ARGS],
    len: u8,
}

impl Args {
    /// Builds an argument list from a slice.
    ///
    /// # Panics
    ///
    /// Panics if `vals` holds more than [`MAX_ARGS`] values.
    pub fn new(vals: &[u32]) -> Self {
        assert!(
            vals.len() <= MAX_ARGS,
            "{} handler arguments exceed the maximum of {}",
            vals.len(),
            MAX_ARGS
        );
        let mut args = Args::empty();
        args.vals[..vals.len()].copy_from_slice(vals);
        args.len = vals.len() as u8;
        args
    }

    /// An argument list carrying nothing.
    pub const fn empty() -> Self {
        Args {
            vals: [0; MAX_ARGS],
            len: 0,
        }
    }

    /// Number of arguments present.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether no arguments are present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The arguments as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.vals[..self.len as usize]
    }

    /// Iterates over the arguments in order.
    pub fn iter(&self) -> std::slice::Iter<'_, u32> {
        self.as_slice().iter()
    }
}

impl Index<usize> for Args {
    type Output = u32;

    #[inline]
    fn index(&self, index: usize) -> &u32 {
        &self.as_slice()[index]
    }
}

impl From<&[u32]> for Args {
    fn from(vals: &[u32]) -> Self {
        Args::new(vals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_roundtrip() {
        let args = Args::new(&[10, 20, 30]);
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], 10);
        assert_eq!(args[1], 20);
        assert_eq!(args[2], 30);
        assert_eq!(args.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn test_empty_args() {
        let args = Args::empty();
        assert!(args.is_empty());
        assert_eq!(args.as_slice(), &[] as &[u32]);
    }

    #[test]
    fn test_full_args() {
        let vals: Vec<u32> = (0..MAX_ARGS as u32).collect();
        let args = Args::new(&vals);
        assert_eq!(args.len(), MAX_ARGS);
        assert_eq!(args.as_slice(), vals.as_slice());
    }

    #[test]
    #[should_panic(expected = "exceed the maximum")]
    fn test_too_many_args_panics() {
        let vals = [0u32; MAX_ARGS + 1];
        let _ = Args::new(&vals);
    }
}
