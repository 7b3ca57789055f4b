//! This module contains the implementation of the symbolic virtual machine's
//! stack.

use std::rc::Rc;

use crate::{
    constant::MAXIMUM_STACK_DEPTH,
    error::execution::Error,
    vm::value::Value,
};

/// The result type for stack operations, whose errors get their location from
/// the instruction performing the operation.
pub type Result<T> = std::result::Result<T, Error>;

/// The representation of the symbolic virtual machine's stack.
///
/// # Indexing
///
/// Indexing into this stack is zero-based, where frame 0 is the top stack
/// frame.
///
/// # Sharing
///
/// The frames are shared between forks of a path until one of them writes, at
/// which point the writer gets its own copy. Cloning a stack is therefore
/// constant-time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stack<'ctx> {
    data: Rc<Vec<Value<'ctx>>>,
}

impl<'ctx> Stack<'ctx> {
    /// Creates a new stack without any items on it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the provided value onto the top of the stack.
    ///
    /// # Errors
    ///
    /// If the stack cannot grow to accommodate the requested `value`.
    pub fn push(&mut self, value: impl Into<Value<'ctx>>) -> Result<()> {
        if self.data.len() + 1 > MAXIMUM_STACK_DEPTH {
            return Err(Error::StackDepthExceeded {
                requested: self.data.len() + 1,
            });
        }
        Rc::make_mut(&mut self.data).push(value.into());
        Ok(())
    }

    /// Pops the top value from the stack.
    ///
    /// # Errors
    ///
    /// If the stack has no item to pop.
    pub fn pop(&mut self) -> Result<Value<'ctx>> {
        self.require(1)?;
        Rc::make_mut(&mut self.data).pop().ok_or(Error::StackUnderflow {
            required:  1,
            available: 0,
        })
    }

    /// Pops `N` values from the stack, with the top of the stack first.
    ///
    /// # Errors
    ///
    /// If the stack has fewer than `N` items, in which case nothing is popped.
    pub fn pop_n<const N: usize>(&mut self) -> Result<[Value<'ctx>; N]> {
        self.require(N)?;
        let data = Rc::make_mut(&mut self.data);
        let split = data.len() - N;
        let mut popped = data.split_off(split);
        popped.reverse();

        popped.try_into().map_err(|_| Error::StackUnderflow {
            required:  N,
            available: 0,
        })
    }

    /// Reads from the stack frame at the provided `depth`.
    #[must_use]
    pub fn read(&self, depth: usize) -> Option<&Value<'ctx>> {
        let index = self.data.len().checked_sub(depth + 1)?;
        self.data.get(index)
    }

    /// Duplicates the stack item at `frame` onto the top of the stack.
    ///
    /// # Errors
    ///
    /// If `frame` doesn't exist or if the stack is full.
    pub fn dup(&mut self, frame: usize) -> Result<()> {
        self.require(frame + 1)?;
        let value = self.read(frame).cloned().ok_or(Error::StackUnderflow {
            required:  frame + 1,
            available: self.size(),
        })?;

        self.push(value)
    }

    /// Swaps the top stack item with the item in `frame`.
    ///
    /// This swaps with the indicated frame directly, rather than the `n+1`th
    /// frame as for the `SWAP` opcodes.
    ///
    /// # Errors
    ///
    /// If the target stack frame does not exist.
    pub fn swap(&mut self, frame: usize) -> Result<()> {
        self.require(frame + 1)?;
        let data = Rc::make_mut(&mut self.data);
        let top = data.len() - 1;
        data.swap(top, top - frame);

        Ok(())
    }

    /// Checks that at least `count` items are present on the stack.
    ///
    /// # Errors
    ///
    /// If there are fewer than `count` items.
    pub fn require(&self, count: usize) -> Result<()> {
        let available = self.size();
        if available < count {
            return Err(Error::StackUnderflow {
                required: count,
                available,
            });
        }

        Ok(())
    }

    /// Gets the current size of the stack.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Checks if the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[cfg(test)]
mod test {
    use crate::{
        constant::MAXIMUM_STACK_DEPTH,
        error::execution::Error,
        vm::{state::stack::Stack, value::Value},
    };

    /// Constructs a new stack holding `0..item_count`, with the last pushed on
    /// top.
    fn new_stack_with_items(item_count: u64) -> anyhow::Result<Stack<'static>> {
        let mut stack = Stack::new();
        for i in 0..item_count {
            stack.push(Value::from_u64(i))?;
        }

        Ok(stack)
    }

    #[test]
    fn can_construct_new_stack() {
        let stack = Stack::new();
        assert_eq!(stack.size(), 0);
        assert!(stack.is_empty());
    }

    #[test]
    fn cannot_push_outside_of_capacity() -> anyhow::Result<()> {
        let mut stack = new_stack_with_items(MAXIMUM_STACK_DEPTH as u64)?;
        let result = stack.push(Value::from_u64(0));
        assert_eq!(
            result,
            Err(Error::StackDepthExceeded {
                requested: MAXIMUM_STACK_DEPTH + 1,
            })
        );

        Ok(())
    }

    #[test]
    fn pops_in_top_first_order() -> anyhow::Result<()> {
        let mut stack = new_stack_with_items(3)?;
        let [a, b] = stack.pop_n::<2>()?;
        assert_eq!(a, Value::from_u64(2));
        assert_eq!(b, Value::from_u64(1));
        assert_eq!(stack.size(), 1);

        Ok(())
    }

    #[test]
    fn underflow_leaves_the_stack_untouched() -> anyhow::Result<()> {
        let mut stack = new_stack_with_items(1)?;
        let result = stack.pop_n::<2>();
        assert_eq!(
            result.err(),
            Some(Error::StackUnderflow {
                required:  2,
                available: 1,
            })
        );
        assert_eq!(stack.size(), 1);

        Ok(())
    }

    #[test]
    fn can_dup_and_swap_frames() -> anyhow::Result<()> {
        let mut stack = new_stack_with_items(3)?;
        stack.dup(2)?;
        assert_eq!(stack.read(0), Some(&Value::from_u64(0)));

        stack.swap(1)?;
        assert_eq!(stack.read(0), Some(&Value::from_u64(2)));
        assert_eq!(stack.read(1), Some(&Value::from_u64(0)));

        Ok(())
    }

    #[test]
    fn forks_do_not_observe_each_other() -> anyhow::Result<()> {
        let mut original = new_stack_with_items(2)?;
        let mut fork = original.clone();

        fork.push(Value::from_u64(9))?;
        original.pop()?;

        assert_eq!(original.size(), 1);
        assert_eq!(fork.size(), 3);
        assert_eq!(fork.read(0), Some(&Value::from_u64(9)));

        Ok(())
    }
}
