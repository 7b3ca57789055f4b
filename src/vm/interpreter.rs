//! This module contains the interpreter, which executes a single instruction on
//! the state of a path.
//!
//! The interpreter is also where the defect tracker sees the instruction
//! stream: before an instruction executes, so that an event is judged against
//! the stack that emits it, and after, so that source-level patterns see the
//! value that the instruction produced.

use crate::{
    disassembly::Instruction,
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    opcode::{arithmetic, control, environment, logic, memory, system, Opcode},
    vm::{Flow, Machine, Step},
};

/// Executes `instruction`, advancing the program counter past it and charging
/// its base cost.
///
/// # Errors
///
/// Returns [`Err`] located at the instruction if it cannot be executed on the
/// current state.
pub fn execute<'ctx>(m: &mut Machine<'_, 'ctx>, instruction: &Instruction) -> Result<Flow<'ctx>> {
    m.ctx
        .tracker
        .observe(&m.ctx.solver, &instruction.opcode, &m.state.stack);

    let flow = dispatch(m, instruction).locate(instruction.address)?;
    m.state.pc = instruction.next_address();
    m.state.gas_used = m.state.gas_used.saturating_add(instruction.opcode.min_gas_cost());

    if let Some(snippet) = m.source_code() {
        let top = m.state.stack.read(0);
        m.ctx.tracker.after_instruction(&snippet, top, m.ctx.patterns.as_ref());
    }

    Ok(flow)
}

/// Runs the handler for the opcode of `instruction`.
fn dispatch<'ctx>(m: &mut Machine<'_, 'ctx>, instruction: &Instruction) -> Step<Flow<'ctx>> {
    let step = match &instruction.opcode {
        Opcode::Jump => return control::jump(m),
        Opcode::JumpI => return control::jumpi(m),

        Opcode::Stop => control::stop(m),
        Opcode::JumpDest => control::jump_dest(m),
        Opcode::Pc => control::pc(m),
        Opcode::Return => control::return_(m),
        Opcode::Revert => control::revert(m),
        Opcode::Invalid | Opcode::AssertFail => control::invalid(m),

        Opcode::Add => arithmetic::add(m),
        Opcode::Mul => arithmetic::mul(m),
        Opcode::Sub => arithmetic::sub(m),
        Opcode::Div => arithmetic::div(m),
        Opcode::SDiv => arithmetic::sdiv(m),
        Opcode::Mod => arithmetic::modulo(m),
        Opcode::SMod => arithmetic::smod(m),
        Opcode::AddMod => arithmetic::add_mod(m),
        Opcode::MulMod => arithmetic::mul_mod(m),
        Opcode::Exp => arithmetic::exp(m),
        Opcode::SignExtend => arithmetic::sign_extend(m),

        Opcode::Lt => logic::lt(m),
        Opcode::Gt => logic::gt(m),
        Opcode::SLt => logic::slt(m),
        Opcode::SGt => logic::sgt(m),
        Opcode::Eq => logic::eq(m),
        Opcode::IsZero => logic::is_zero(m),
        Opcode::And => logic::and(m),
        Opcode::Or => logic::or(m),
        Opcode::Xor => logic::xor(m),
        Opcode::Not => logic::not(m),
        Opcode::Byte => logic::byte(m),
        Opcode::Shl => logic::shl(m),
        Opcode::Shr => logic::shr(m),
        Opcode::Sar => logic::sar(m),

        Opcode::Sha3 => environment::sha3(m),
        Opcode::Address => environment::address(m),
        Opcode::Balance => environment::balance(m),
        Opcode::Origin => environment::origin(m),
        Opcode::Caller => environment::caller(m),
        Opcode::CallValue => environment::call_value(m),
        Opcode::GasPrice => environment::gas_price(m),
        Opcode::ExtCodeHash => environment::ext_code_hash(m),
        Opcode::BlockHash => environment::block_hash(m),
        Opcode::Coinbase => environment::coinbase(m),
        Opcode::Timestamp => environment::timestamp(m),
        Opcode::Number => environment::number(m),
        Opcode::Difficulty => environment::difficulty(m),
        Opcode::GasLimit => environment::gas_limit(m),
        Opcode::ChainId => environment::chain_id(m),
        Opcode::SelfBalance => environment::self_balance(m),
        Opcode::BaseFee => environment::base_fee(m),
        Opcode::Gas => environment::gas(m),
        Opcode::Log(topics) => environment::log(m, *topics),

        Opcode::CallDataLoad => memory::call_data_load(m),
        Opcode::CallDataSize => memory::call_data_size(m),
        Opcode::CallDataCopy => memory::call_data_copy(m),
        Opcode::CodeSize => memory::code_size(m),
        Opcode::CodeCopy => memory::code_copy(m),
        Opcode::ExtCodeSize => memory::ext_code_size(m),
        Opcode::ExtCodeCopy => memory::ext_code_copy(m),
        Opcode::ReturnDataSize => memory::return_data_size(m),
        Opcode::ReturnDataCopy => memory::return_data_copy(m),
        Opcode::Pop => memory::pop(m),
        Opcode::MLoad => memory::mload(m),
        Opcode::MStore => memory::mstore(m),
        Opcode::MStore8 => memory::mstore8(m),
        Opcode::SLoad => memory::sload(m),
        Opcode::SStore => memory::sstore(m),
        Opcode::MSize => memory::msize(m),
        Opcode::Push(_) => memory::push(m, instruction.immediate),
        Opcode::Dup(n) => memory::dup(m, *n),
        Opcode::Swap(n) => memory::swap(m, *n),

        Opcode::Call => system::call(m),
        Opcode::CallCode => system::call_code(m),
        Opcode::DelegateCall => system::delegate_call(m),
        Opcode::StaticCall => system::static_call(m),
        Opcode::Create => system::create(m),
        Opcode::Create2 => system::create2(m),
        Opcode::SelfDestruct => system::self_destruct(m),

        Opcode::Unknown(mnemonic) => Err(Error::UnknownInstruction {
            mnemonic: mnemonic.clone(),
        }),
    };

    step.map(|()| Flow::Continue)
}

#[cfg(test)]
mod test {
    use ethnum::U256;
    use z3::{Config, Context};

    use crate::{
        constant::TRANSFER_EVENT_TOPIC,
        disassembly::{cfg::Cfg, Instruction},
        error::execution::Error,
        opcode::Opcode,
        vm::{
            interpreter::execute,
            solver::SolverSession,
            value::Value,
            AnalysisContext,
            Config as VmConfig,
            Flow,
            Machine,
        },
        watchdog::LazyWatchdog,
    };

    fn context(z3: &Context) -> AnalysisContext<'_> {
        let solver = SolverSession::new(z3, 1_000);
        AnalysisContext::new(solver, Cfg::default(), VmConfig::default(), LazyWatchdog.in_rc())
    }

    #[test]
    fn instructions_advance_the_program_counter() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut ctx = context(&z3);
        let mut state = ctx.initial_state();
        let program = [
            Instruction::new(0, Opcode::Push(1), Some(U256::new(2))),
            Instruction::new(2, Opcode::Push(2), Some(U256::new(3))),
            Instruction::new(5, Opcode::Add, None),
        ];

        for instruction in &program {
            let mut m = Machine::new(&mut ctx, &mut state, 0, instruction.address);
            assert_eq!(execute(&mut m, instruction)?, Flow::Continue);
        }

        assert_eq!(state.pc, 6);
        assert_eq!(state.gas_used, 9);
        assert_eq!(state.stack.read(0), Some(&Value::from_u64(5)));

        Ok(())
    }

    #[test]
    fn errors_are_located_at_the_instruction() {
        let z3 = Context::new(&Config::new());
        let mut ctx = context(&z3);
        let mut state = ctx.initial_state();

        let unknown = Instruction::new(7, Opcode::Unknown("BOGUS".into()), None);
        let mut m = Machine::new(&mut ctx, &mut state, 0, 7);
        let error = execute(&mut m, &unknown).map(|_| ()).err();
        assert_eq!(error.as_ref().map(|e| e.location), Some(7));
        assert_eq!(
            error.map(|e| e.payload),
            Some(Error::UnknownInstruction {
                mnemonic: "BOGUS".into(),
            })
        );
        assert_eq!(state.pc, 0);
    }

    #[test]
    fn transfer_events_without_writes_are_flagged() -> anyhow::Result<()> {
        let z3 = Context::new(&Config::new());
        let mut ctx = context(&z3);
        ctx.tracker.enter_function("transfer", "transfer(address,uint256)");
        let mut state = ctx.initial_state();
        let operands = [
            U256::ONE,
            U256::ONE,
            U256::ONE,
            TRANSFER_EVENT_TOPIC,
            U256::ZERO,
            U256::ZERO,
        ];
        for word in operands {
            state.stack.push(word)?;
        }

        let log = Instruction::new(0, Opcode::Log(4), None);
        let mut m = Machine::new(&mut ctx, &mut state, 0, 0);
        execute(&mut m, &log)?;

        assert_eq!(
            ctx.tracker.findings().empty_transfer_event.entries,
            vec!["transfer(address,uint256):standard1".to_string()]
        );

        Ok(())
    }
}
