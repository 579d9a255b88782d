//! Abstract frames: local variable slots followed by operand stack slots.

use jf_bytecode::instrs::StackOp;
use std::fmt;
use thiserror::Error;

pub type FrameResult<T> = Result<T, FrameError>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("out of bounds slot: {0}")]
    OutOfBoundsSlot(usize),

    #[error("accessing a frame which is not valid")]
    NotValid,

    #[error("merging frames with different number of slots ({0} and {1})")]
    SizeMismatch(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Top,
    Valid,
    Bottom,
}

/// Analysis state at one program point, over slots holding abstract
/// values of type `T`.
///
/// A frame is either TOP (nothing known yet), BOTTOM (unreachable,
/// absorbing), or valid, in which case it holds `num_locals` local slots
/// followed by the operand stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<T> {
    state: FrameState,
    num_locals: usize,
    slots: Vec<T>,
}

impl<T: Clone> Frame<T> {
    /// A TOP frame for a method with the given number of locals.
    #[must_use]
    pub fn new(num_locals: usize) -> Self {
        Self {
            state: FrameState::Top,
            num_locals,
            slots: Vec::new(),
        }
    }

    /// A valid frame whose locals hold the given values and whose stack
    /// is empty.
    #[must_use]
    pub fn with_locals(locals: Vec<T>) -> Self {
        Self {
            state: FrameState::Valid,
            num_locals: locals.len(),
            slots: locals,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_top(&self) -> bool {
        self.state == FrameState::Top
    }

    #[inline]
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        self.state == FrameState::Bottom
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state == FrameState::Valid
    }

    pub fn set_top(&mut self) {
        self.state = FrameState::Top;
        self.slots.clear();
    }

    pub fn set_bottom(&mut self) {
        self.state = FrameState::Bottom;
        self.slots.clear();
    }

    /// Replaces the content of the frame with the locals of a valid frame
    /// and an empty stack.
    pub fn set_valid(&mut self, locals: Vec<T>) {
        self.state = FrameState::Valid;
        self.num_locals = locals.len();
        self.slots = locals;
    }

    #[inline]
    #[must_use]
    pub const fn num_locals(&self) -> usize {
        self.num_locals
    }

    #[inline]
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.slots.len().saturating_sub(self.num_locals)
    }

    pub fn slots(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }

    pub fn value(&self, slot: usize) -> FrameResult<&T> {
        self.slots.get(slot).ok_or(FrameError::OutOfBoundsSlot(slot))
    }

    pub fn set_value(&mut self, slot: usize, value: T) -> FrameResult<()> {
        let s = self
            .slots
            .get_mut(slot)
            .ok_or(FrameError::OutOfBoundsSlot(slot))?;
        *s = value;
        Ok(())
    }

    pub fn push(&mut self, value: T) {
        self.slots.push(value);
    }

    pub fn pop(&mut self) -> FrameResult<T> {
        if self.stack_depth() == 0 {
            return Err(FrameError::StackUnderflow);
        }
        self.slots.pop().ok_or(FrameError::StackUnderflow)
    }

    /// Pops `n` words, returned bottom-most first.
    pub fn pop_words(&mut self, n: usize) -> FrameResult<Vec<T>> {
        if self.stack_depth() < n {
            return Err(FrameError::StackUnderflow);
        }
        let at = self.slots.len() - n;
        Ok(self.slots.split_off(at))
    }

    pub fn top(&self) -> FrameResult<&T> {
        self.stack_value(0)
    }

    /// Value `n` words below the top of the stack.
    pub fn stack_value(&self, n: usize) -> FrameResult<&T> {
        if n >= self.stack_depth() {
            return Err(FrameError::StackUnderflow);
        }
        Ok(&self.slots[self.slots.len() - 1 - n])
    }

    /// Slot index of the value `n` words below the top of the stack.
    pub fn stack_location(&self, n: usize) -> FrameResult<usize> {
        if n >= self.stack_depth() {
            return Err(FrameError::StackUnderflow);
        }
        Ok(self.slots.len() - 1 - n)
    }

    /// Top `n` words of the stack, bottom-most first, without popping.
    pub fn top_words(&self, n: usize) -> FrameResult<&[T]> {
        if self.stack_depth() < n {
            return Err(FrameError::StackUnderflow);
        }
        Ok(&self.slots[self.slots.len() - n..])
    }

    pub fn clear_stack(&mut self) {
        self.slots.truncate(self.num_locals);
    }

    /// Pushes the `width` words of local `index`.
    pub fn load_local(&mut self, index: usize, width: usize) -> FrameResult<()> {
        for i in index..index + width {
            let value = self.value(i)?.clone();
            self.push(value);
        }
        Ok(())
    }

    /// Pops `width` words into local `index`.
    pub fn store_local(&mut self, index: usize, width: usize) -> FrameResult<()> {
        if index + width > self.num_locals {
            return Err(FrameError::OutOfBoundsSlot(index + width - 1));
        }
        let words = self.pop_words(width)?;
        for (i, word) in words.into_iter().enumerate() {
            self.set_value(index + i, word)?;
        }
        Ok(())
    }

    /// Applies an untyped stack manipulation.
    pub fn apply_stack_op(&mut self, op: StackOp) -> FrameResult<()> {
        let (consumed, _) = op.effect();
        let words = self.pop_words(consumed)?;
        for i in op.permutation() {
            self.push(words[*i].clone());
        }
        Ok(())
    }

    /// Makes this frame an exact copy of `other`.
    pub fn copy_from(&mut self, other: &Self) {
        self.state = other.state;
        self.num_locals = other.num_locals;
        self.slots.clone_from(&other.slots);
    }

    /// Merges `other` into this frame: TOP is the identity, BOTTOM is
    /// absorbing, and valid frames are merged slot by slot with `merge`
    /// (called with the slot index, this frame value and the other value).
    pub fn merge_with<F>(&mut self, other: &Self, mut merge: F) -> FrameResult<()>
    where
        F: FnMut(usize, &T, &T) -> T,
    {
        if other.is_top() || self.is_bottom() {
            return Ok(());
        }
        if other.is_bottom() {
            self.set_bottom();
            return Ok(());
        }
        if self.is_top() {
            self.copy_from(other);
            return Ok(());
        }
        self.check_same_shape(other)?;
        for (slot, value) in self.slots.iter_mut().enumerate() {
            let merged = merge(slot, value, &other.slots[slot]);
            *value = merged;
        }
        Ok(())
    }

    /// Checks whether two valid frames can be merged slot by slot.
    pub fn check_same_shape(&self, other: &Self) -> FrameResult<()> {
        if self.num_slots() == other.num_slots() {
            Ok(())
        } else {
            Err(FrameError::SizeMismatch(self.num_slots(), other.num_slots()))
        }
    }
}

impl<T: fmt::Display> fmt::Display for Frame<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.state {
            FrameState::Top => write!(f, "[TOP]"),
            FrameState::Bottom => write!(f, "[BOTTOM]"),
            FrameState::Valid => {
                write!(f, "[")?;
                for (i, value) in self.slots.iter().enumerate() {
                    if i == self.num_locals {
                        write!(f, " |")?;
                    }
                    write!(f, " {value}")?;
                }
                write!(f, " ]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_operations() {
        let mut frame = Frame::with_locals(vec![1, 2]);
        assert!(frame.pop().is_err());
        frame.load_local(0, 2).unwrap();
        assert_eq!(frame.stack_depth(), 2);
        frame.push(3);
        frame.apply_stack_op(StackOp::DupX1).unwrap();
        assert_eq!(frame.top_words(4).unwrap(), &[1, 3, 2, 3]);
        frame.apply_stack_op(StackOp::Pop2).unwrap();
        frame.store_local(1, 1).unwrap();
        assert_eq!(frame.value(1).unwrap(), &3);
        assert_eq!(frame.stack_value(0).unwrap(), &1);
        frame.clear_stack();
        assert_eq!(frame.num_slots(), 2);
        assert!(frame.store_local(0, 1).is_err());
        assert_eq!(format!("{frame}"), "[ 1 3 ]");
    }

    #[test]
    fn frame_states() {
        let mut frame: Frame<u32> = Frame::new(3);
        assert!(frame.is_top());
        frame.set_bottom();
        assert!(frame.is_bottom());
        let other = Frame::with_locals(vec![1, 2, 3]);
        frame.copy_from(&other);
        assert!(frame.is_valid());
        assert_eq!(frame, other);
        assert!(frame.check_same_shape(&Frame::with_locals(vec![1])).is_err());
    }

    #[test]
    fn merge() {
        let mut frame: Frame<u32> = Frame::new(2);
        frame.merge_with(&Frame::new(2), |_, a, b| a + b).unwrap();
        assert!(frame.is_top());
        frame.merge_with(&Frame::with_locals(vec![1, 2]), |_, a, b| a + b).unwrap();
        assert_eq!(format!("{frame}"), "[ 1 2 ]");
        frame.merge_with(&Frame::with_locals(vec![10, 20]), |_, a, b| a + b).unwrap();
        assert_eq!(format!("{frame}"), "[ 11 22 ]");
        assert!(frame.merge_with(&Frame::with_locals(vec![1]), |_, a, _| *a).is_err());
        let mut bottom = Frame::new(2);
        bottom.set_bottom();
        frame.merge_with(&bottom, |_, a, _| *a).unwrap();
        assert!(frame.is_bottom());
    }
}
