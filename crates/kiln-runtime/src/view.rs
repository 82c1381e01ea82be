//! Bounded windows over the variable arena.
//!
//! A view is `offset + len + shared backing`, bounds-checked at
//! construction. Input views are writable, output views read-only.
//! Views are created lazily by the runner, cached, and reused for the
//! runner's lifetime.

use crate::arena::HostMirror;
use crate::error::{Result, RunnerError};
use std::rc::Rc;

/// Writable window over a graph input region.
///
/// Writes become visible to the next `run()` without any explicit
/// transfer call.
#[derive(Debug, Clone)]
pub struct InputView {
    name: String,
    backing: HostMirror,
    offset: usize,
    len: usize,
}

impl InputView {
    pub(crate) fn new(name: &str, backing: &HostMirror, offset: usize, len: usize) -> Result<Self> {
        check_bounds(name, backing, offset, len)?;
        Ok(Self {
            name: name.to_string(),
            backing: Rc::clone(backing),
            offset,
            len,
        })
    }

    /// Copy `src` into the window.
    ///
    /// # Panics
    /// Panics if `src.len()` differs from the view length.
    pub fn copy_from(&self, src: &[f32]) {
        assert_eq!(
            src.len(),
            self.len,
            "input '{}' expects {} elements, got {}",
            self.name,
            self.len,
            src.len()
        );
        let mut backing = self.backing.borrow_mut();
        backing[self.offset..self.offset + self.len].copy_from_slice(src);
    }

    /// Write a single element.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn set(&self, index: usize, value: f32) {
        assert!(index < self.len, "index {index} out of bounds for input '{}'", self.name);
        self.backing.borrow_mut()[self.offset + index] = value;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Read-only window over a graph output region.
///
/// Reads observe the arena's state as of the last completed run.
#[derive(Debug, Clone)]
pub struct OutputView {
    name: String,
    backing: HostMirror,
    offset: usize,
    len: usize,
}

impl OutputView {
    pub(crate) fn new(name: &str, backing: &HostMirror, offset: usize, len: usize) -> Result<Self> {
        check_bounds(name, backing, offset, len)?;
        Ok(Self {
            name: name.to_string(),
            backing: Rc::clone(backing),
            offset,
            len,
        })
    }

    /// Copy the window's contents out.
    pub fn to_vec(&self) -> Vec<f32> {
        let backing = self.backing.borrow();
        backing[self.offset..self.offset + self.len].to_vec()
    }

    /// Read a single element.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn get(&self, index: usize) -> f32 {
        assert!(index < self.len, "index {index} out of bounds for output '{}'", self.name);
        self.backing.borrow()[self.offset + index]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn check_bounds(name: &str, backing: &HostMirror, offset: usize, len: usize) -> Result<()> {
    let arena_len = backing.borrow().len();
    let fits = offset
        .checked_add(len)
        .is_some_and(|end| end <= arena_len);
    if !fits {
        return Err(RunnerError::ViewOutOfBounds {
            name: name.to_string(),
            offset,
            len,
            arena_len,
        });
    }
    Ok(())
}
