//! Opcodes that interact with the external environment on the EVM.
//!
//! Most of these read a variable of the transaction environment, which is
//! bound on every path from the start. The rest produce fresh variables, as
//! the analysis knows nothing about the world outside the contract.

use sha3::{Digest, Keccak256};
use z3::ast::BV;

use crate::vm::{state::environment::Environment, value::Value, Machine, Step};

/// The `SHA3` opcode computes the keccak256 hash of the input.
///
/// The hash is computed on the data in memory at `offset` over a `size` in
/// bytes.
///
/// # Semantics
///
/// | Stack Index | Input    | Output                                 |
/// | :---------: | :------: | :------------------------------------: |
/// | 1           | `offset` | `keccak256(mem\[offset:offset+size\])` |
/// | 2           | `size`   |                                        |
///
/// The hash is never computed. When both operands are concrete, the content
/// of the range is used to look up a variable that earlier hashes of the same
/// content produced, so that hashing identical data twice yields the same
/// value. Otherwise the result is a fresh variable.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn sha3(m: &mut Machine<'_, '_>) -> Step<()> {
    let [offset, size] = m.pop()?;
    let digest = concrete_range(&offset, &size)
        .map(|(offset, size)| content_digest(size, &m.state.memory.content_of(offset, size)));

    let result = match digest {
        Some(digest) => match m.state.cached_hash(&digest) {
            Some(known) => known.clone(),
            None => {
                let result = m.fresh();
                m.state.cache_hash(digest, result.clone());
                result
            }
        },
        None => m.fresh(),
    };

    m.state.features.on_sha3(&result);
    m.push(result)
}

/// Gets a concrete memory range as machine integers, if it is one.
fn concrete_range(offset: &Value<'_>, size: &Value<'_>) -> Option<(usize, usize)> {
    let offset = usize::try_from(u64::try_from(offset.as_concrete()?).ok()?).ok()?;
    let size = usize::try_from(u64::try_from(size.as_concrete()?).ok()?).ok()?;
    Some((offset, size))
}

/// Computes the key under which hashes of `content` are cached.
///
/// The content is clamped to written memory, so the requested `size` is part
/// of the key to keep ranges that run past the end apart.
fn content_digest(size: usize, content: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(size.to_be_bytes());
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

/// Pushes a variable of the transaction environment.
fn push_env<'ctx>(
    m: &mut Machine<'_, 'ctx>,
    select: impl FnOnce(&Environment<'ctx>) -> &BV<'ctx>,
) -> Step<()> {
    let var = select(&m.ctx.env).clone();
    m.push(Value::Symbolic(var))
}

/// The `ADDRESS` opcode gets the address of the currently executing account.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn address(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.receiver)
}

/// The `BALANCE` opcode gets the balance of the specified account.
///
/// # Semantics
///
/// | Stack Index | Input     | Output                 |
/// | :---------: | :-------: | :--------------------: |
/// | 1           | `address` | `address.balance`      |
///
/// Every query yields a fresh variable, which becomes the recorded balance of
/// the account.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn balance(m: &mut Machine<'_, '_>) -> Step<()> {
    let [address] = m.pop()?;
    let name = m.ctx.names.balance();
    let balance = m.bind(&name);
    m.state.set_balance(account_key(&address), balance.clone());
    m.push(balance)
}

/// Gets the key under which the balance of the account at `address` is kept.
pub(crate) fn account_key(address: &Value<'_>) -> String {
    match address {
        Value::Concrete(word) => format!("concrete_address_{word}"),
        Value::Symbolic(expression) => expression.to_string(),
    }
}

/// The `ORIGIN` opcode gets the address that originated the transaction.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn origin(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.origin)
}

/// The `CALLER` opcode gets the address of the account that is directly
/// responsible for this execution.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn caller(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.sender)
}

/// The `CALLVALUE` opcode gets the value deposited by the instruction or
/// transaction responsible for this execution.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn call_value(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.value)
}

/// The `GASPRICE` opcode gets the gas price of the transaction.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn gas_price(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.gas_price)
}

/// The `EXTCODEHASH` opcode gets the hash of the code of another account,
/// which is always a fresh variable.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn ext_code_hash(m: &mut Machine<'_, '_>) -> Step<()> {
    let [_address] = m.pop()?;
    let hash = m.fresh();
    m.push(hash)
}

/// The `BLOCKHASH` opcode gets the hash of one of the 256 most recent
/// complete blocks.
///
/// Every block number yields the same variable.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn block_hash(m: &mut Machine<'_, '_>) -> Step<()> {
    let [_number] = m.pop()?;
    let name = m.ctx.names.block_hash();
    let hash = m.bind(&name);
    m.push(hash)
}

/// The `COINBASE` opcode gets the block's beneficiary address.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn coinbase(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.coinbase)
}

/// The `TIMESTAMP` opcode gets the block's timestamp.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn timestamp(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.timestamp)
}

/// The `NUMBER` opcode gets the block's number.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn number(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.number)
}

/// The `DIFFICULTY` opcode gets the block's difficulty.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn difficulty(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.difficulty)
}

/// The `GASLIMIT` opcode gets the block's gas limit.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn gas_limit(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.gas_limit)
}

/// The `CHAINID` opcode gets the chain identifier.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn chain_id(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.chain_id)
}

/// The `SELFBALANCE` opcode gets the balance of the currently executing
/// account.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn self_balance(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.self_balance)
}

/// The `BASEFEE` opcode gets the base fee of the block.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn base_fee(m: &mut Machine<'_, '_>) -> Step<()> {
    push_env(m, |env| &env.base_fee)
}

/// The `GAS` opcode gets the amount of gas remaining, which the approximate
/// gas accounting cannot know, so it is always a fresh variable.
///
/// # Errors
///
/// Returns [`Err`] if the stack is full.
pub fn gas(m: &mut Machine<'_, '_>) -> Step<()> {
    let name = m.ctx.names.gas();
    let ctx = m.z3();
    let gas = Value::Symbolic(m.state.bind_fresh(ctx, &name));
    m.push(gas)
}

/// The `LOGn` opcodes append a log record with `topics` topics.
///
/// # Semantics
///
/// | Stack Index | Input     | Output |
/// | :---------: | :-------: | :----: |
/// | 1           | `offset`  |        |
/// | 2           | `size`    |        |
/// | 3..         | `topic_n` |        |
///
/// Logs are not recorded. The `Transfer` events that matter to the defect
/// signals are observed before the instruction executes.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn log(m: &mut Machine<'_, '_>, topics: u8) -> Step<()> {
    let count = 2 + usize::from(topics);
    m.state.stack.require(count)?;
    for _ in 0..count {
        m.state.stack.pop()?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use ethnum::U256;
    use z3::{Config, Context};

    use crate::{
        error::execution::Error,
        opcode::{environment, memory, test_util::TestVm},
        vm::state::environment::Environment,
    };

    #[test]
    fn hashing_identical_content_yields_the_same_variable() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.words(&[0, 0x2a])?;
        vm.run(memory::mstore)?;
        vm.words(&[0, 32])?;
        vm.run(environment::sha3)?;
        let first = vm.top().cloned();

        vm.words(&[0, 32])?;
        vm.run(environment::sha3)?;
        assert_eq!(vm.top().cloned(), first);

        vm.words(&[0, 16])?;
        vm.run(environment::sha3)?;
        assert_ne!(vm.top().cloned(), first);

        Ok(())
    }

    #[test]
    fn hashing_past_written_memory_depends_on_the_size() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.words(&[0, 0x2a])?;
        vm.run(memory::mstore)?;
        vm.words(&[0, 32])?;
        vm.run(environment::sha3)?;
        let word = vm.top().cloned();

        // Both ranges read the same written bytes, but cover different memory
        vm.words(&[0, 64])?;
        vm.run(environment::sha3)?;
        let two_words = vm.top().cloned();
        assert_ne!(two_words, word);

        vm.words(&[0, 96])?;
        vm.run(environment::sha3)?;
        assert_ne!(vm.top().cloned(), two_words);
        assert_ne!(vm.top().cloned(), word);

        vm.words(&[0, 64])?;
        vm.run(environment::sha3)?;
        assert_eq!(vm.top().cloned(), two_words);

        Ok(())
    }

    #[test]
    fn hashing_symbolic_ranges_yields_fresh_variables() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);
        let size = vm.symbol("size");

        vm.stack(&[U256::ZERO.into(), size.clone()])?;
        vm.run(environment::sha3)?;
        let first = vm.top().cloned();

        vm.stack(&[U256::ZERO.into(), size])?;
        vm.run(environment::sha3)?;
        assert_ne!(vm.top().cloned(), first);

        Ok(())
    }

    #[test]
    fn caller_is_the_sender_variable() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.run(environment::caller)?;
        assert_eq!(vm.top().map(ToString::to_string).as_deref(), Some(Environment::SENDER));

        Ok(())
    }

    #[test]
    fn balances_are_recorded_per_account() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.words(&[7])?;
        vm.run(environment::balance)?;
        let balance = vm.top().cloned();
        assert!(balance.as_ref().is_some_and(|b| b.is_symbolic()));
        assert_eq!(vm.state.balance("concrete_address_7").cloned(), balance);

        Ok(())
    }

    #[test]
    fn logs_consume_their_topics() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.words(&[0, 0, 1, 2, 3])?;
        vm.run(|m| environment::log(m, 3))?;
        assert_eq!(vm.state.stack.size(), 0);

        vm.words(&[0])?;
        assert_eq!(
            vm.run(|m| environment::log(m, 1)),
            Err(Error::StackUnderflow {
                required:  3,
                available: 1,
            })
        );

        Ok(())
    }
}
