//! Opcodes that call into, create and destroy accounts on the EVM.
//!
//! Calls are not followed into the callee. What they return is unknown, except
//! that a call moving more value than the contract can hold must fail, and
//! value moved by a successful call is reflected in the tracked balances.

use ethnum::U256;
use z3::ast::{Ast, Bool, BV};

use crate::{
    constant::ADDRESS_WIDTH_BITS,
    opcode::environment::account_key,
    vm::{
        state::{RECEIVER_BALANCE, SENDER_BALANCE},
        value::Value,
        Machine,
        Step,
    },
};

/// The `CALL` opcode performs a message call into an account.
///
/// # Semantics
///
/// | Stack Index | Input        | Output    |
/// | :---------: | :----------: | :-------: |
/// | 1           | `gas`        | `success` |
/// | 2           | `address`    |           |
/// | 3           | `value`      |           |
/// | 4           | `argsOffset` |           |
/// | 5           | `argsSize`   |           |
/// | 6           | `retOffset`  |           |
/// | 7           | `retSize`    |           |
///
/// A call that moves no value succeeds. Otherwise it fails if the contract
/// cannot afford the value on this path, and succeeds by moving the value
/// from the contract to the recipient if it can. The recipient is the sender
/// when nothing else is possible, and a fresh account otherwise.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn call(m: &mut Machine<'_, '_>) -> Step<()> {
    m.state.features.on_call(m.pc);
    let [_gas, recipient, amount, _, _, _, _] = m.pop()?;
    if !withdraw(m, &amount)? {
        return Ok(());
    }

    let sender_mask = m.word((U256::ONE << ADDRESS_WIDTH_BITS) - U256::ONE);
    let sender = m.ctx.env.sender.bvand(&sender_mask);
    let elsewhere = m.lift(&recipient)._eq(&sender).not();
    if m.feasible(&elsewhere) {
        let name = match &recipient {
            Value::Concrete(_) => account_key(&recipient),
            Value::Symbolic(_) => m.ctx.names.arbitrary_address(),
        };
        let amount = m.lift(&amount);
        credit_fresh_account(m, name, &amount);
    } else {
        credit(m, SENDER_BALANCE, &amount);
    }
    Ok(())
}

/// The `CALLCODE` opcode performs a message call into this account with the
/// code of another.
///
/// The value never leaves the contract, so only the affordability of the
/// value is checked.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn call_code(m: &mut Machine<'_, '_>) -> Step<()> {
    m.state.features.on_call(m.pc);
    let [_gas, _address, amount, _, _, _, _] = m.pop()?;
    withdraw(m, &amount)?;
    Ok(())
}

/// Checks whether the contract can afford to send `amount`, pushing the
/// success flag of the call.
///
/// When it can, affordability becomes part of the path, the amount is deducted
/// from the contract's balance, and `true` is returned.
fn withdraw<'ctx>(m: &mut Machine<'_, 'ctx>, amount: &Value<'ctx>) -> Step<bool> {
    if amount.as_concrete() == Some(U256::ZERO) {
        m.push(Value::from_flag(true))?;
        return Ok(false);
    }

    let balance = m
        .state
        .balance(RECEIVER_BALANCE)
        .cloned()
        .unwrap_or_else(|| Value::Symbolic(m.ctx.env.self_balance.clone()));
    let (amount, balance) = (m.lift(amount), m.lift(&balance));
    let affordable = amount.bvule(&balance);
    if !m.feasible(&affordable) {
        m.push(Value::from_flag(false))?;
        return Ok(false);
    }

    m.push(Value::from_flag(true))?;
    constrain(m, affordable);
    m.state
        .set_balance(RECEIVER_BALANCE, Value::from_bv(&balance.bvsub(&amount)));
    Ok(true)
}

/// Adds `amount` to the tracked balance of the account `name`.
fn credit<'ctx>(m: &mut Machine<'_, 'ctx>, name: &str, amount: &Value<'ctx>) {
    let current = m
        .state
        .balance(name)
        .cloned()
        .unwrap_or(Value::Concrete(U256::ZERO));
    let credited = Value::from_bv(&m.lift(&current).bvadd(&m.lift(amount)));
    m.state.set_balance(name, credited);
}

/// Credits `amount` to the account `name`, whose prior balance is unknown.
fn credit_fresh_account<'ctx>(m: &mut Machine<'_, 'ctx>, name: String, amount: &BV<'ctx>) {
    let prior = m.fresh();
    let prior = m.lift(&prior);
    let non_negative = prior.bvuge(&m.word(U256::ZERO));
    constrain(m, non_negative);
    m.state.set_balance(name, Value::from_bv(&prior.bvadd(amount)));
}

/// Makes `condition` hold for the rest of the path.
fn constrain<'ctx>(m: &mut Machine<'_, 'ctx>, condition: Bool<'ctx>) {
    m.ctx.solver.assert(&condition);
    m.state.add_condition(condition);
}

/// The `DELEGATECALL` opcode performs a message call into this account with
/// the code of another, keeping the current sender and value.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn delegate_call(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<6>()?;
    let success = m.fresh();
    m.push(success)
}

/// The `STATICCALL` opcode performs a message call that may not modify state.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn static_call(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<6>()?;
    let success = m.fresh();
    m.push(success)
}

/// The `CREATE` opcode creates a new account with associated code.
///
/// # Semantics
///
/// | Stack Index | Input    | Output    |
/// | :---------: | :------: | :-------: |
/// | 1           | `value`  | `address` |
/// | 2           | `offset` |           |
/// | 3           | `size`   |           |
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn create(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<3>()?;
    let address = m.fresh();
    m.push(address)
}

/// The `CREATE2` opcode creates a new account at an address derived from a
/// salt, which it takes as a fourth operand.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn create2(m: &mut Machine<'_, '_>) -> Step<()> {
    m.pop::<4>()?;
    let address = m.fresh();
    m.push(address)
}

/// The `SELFDESTRUCT` opcode halts execution and registers the account for
/// later deletion, sending its whole balance to the beneficiary.
///
/// # Errors
///
/// Returns [`Err`] if there are not enough operands on the stack.
pub fn self_destruct(m: &mut Machine<'_, '_>) -> Step<()> {
    let [beneficiary] = m.pop()?;
    let balance = m
        .state
        .balance(RECEIVER_BALANCE)
        .cloned()
        .unwrap_or_else(|| Value::Symbolic(m.ctx.env.self_balance.clone()));
    m.state.set_balance(RECEIVER_BALANCE, Value::Concrete(U256::ZERO));

    let name = match &beneficiary {
        Value::Concrete(_) => account_key(&beneficiary),
        Value::Symbolic(_) => m.ctx.names.arbitrary_address(),
    };
    let balance = m.lift(&balance);
    credit_fresh_account(m, name, &balance);
    Ok(())
}

#[cfg(test)]
mod test {
    use ethnum::U256;
    use z3::{Config, Context};

    use crate::{
        opcode::{system, test_util::TestVm},
        vm::{state::RECEIVER_BALANCE, value::Value},
    };

    #[test]
    fn calls_without_value_succeed() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);
        let balance = vm.state.balance(RECEIVER_BALANCE).cloned();

        vm.words(&[0, 0x1234, 0, 0, 0, 0, 0])?;
        vm.run(system::call)?;
        assert_eq!(vm.top_word(), Some(U256::ONE));
        assert_eq!(vm.state.balance(RECEIVER_BALANCE).cloned(), balance);
        assert_eq!(vm.state.features.erc721_reentrancy.calls, vec![0]);

        Ok(())
    }

    #[test]
    fn unaffordable_calls_fail() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);
        vm.state.set_balance(RECEIVER_BALANCE, Value::from_u64(5));

        vm.words(&[0, 0x1234, 6, 0, 0, 0, 0])?;
        vm.run(system::call)?;
        assert_eq!(vm.top_word(), Some(U256::ZERO));

        Ok(())
    }

    #[test]
    fn affordable_calls_move_value() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);
        vm.state.set_balance(RECEIVER_BALANCE, Value::from_u64(10));
        let conditions = vm.state.path_conditions.len();

        vm.words(&[0, 0x1234, 4, 0, 0, 0, 0])?;
        vm.run(system::call)?;
        assert_eq!(vm.top_word(), Some(U256::ONE));
        assert_eq!(vm.state.balance(RECEIVER_BALANCE), Some(&Value::from_u64(6)));
        assert!(vm.state.balance("concrete_address_4660").is_some());
        assert_eq!(vm.state.path_conditions.len(), conditions + 2);

        Ok(())
    }

    #[test]
    fn create2_takes_a_salt() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.words(&[0, 0, 0, 0])?;
        vm.run(system::create2)?;
        assert_eq!(vm.state.stack.size(), 1);
        assert!(vm.top().is_some_and(|v| v.is_symbolic()));

        Ok(())
    }

    #[test]
    fn self_destruct_empties_the_contract() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut vm = TestVm::new(&z3);

        vm.words(&[0x1234])?;
        vm.run(system::self_destruct)?;
        assert_eq!(vm.state.balance(RECEIVER_BALANCE), Some(&Value::from_u64(0)));
        assert!(vm.state.balance("concrete_address_4660").is_some());

        Ok(())
    }
}
