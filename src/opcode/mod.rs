//! This module contains the [`Opcode`] enumeration, the closed set of
//! instructions that the interpreter understands, along with the concrete
//! semantics of each of the EVM's
//! [opcodes](https://ethereum.org/en/developers/docs/evm/opcodes/).
//!
//! # Terminology
//!
//! When referring to stack slots, we treat index 1 as being the top of the
//! stack.

pub mod arithmetic;
pub mod control;
pub mod environment;
pub mod logic;
pub mod memory;
pub mod system;

#[cfg(test)]
mod test_util;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::constant::{DUP_SWAP_MAX_DEPTH, LOG_MAX_TOPICS, PUSH_OPCODE_MAX_BYTES};

/// The instructions known to the interpreter.
///
/// Mnemonics that are not recognised are kept as [`Opcode::Unknown`] so that
/// the listing can still be partitioned into blocks. Whether interpreting one
/// ends the path or the whole run is decided by the explorer.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Opcode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    SDiv,
    Mod,
    SMod,
    AddMod,
    MulMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    IsZero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,
    Sha3,
    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CallDataCopy,
    CodeSize,
    CodeCopy,
    GasPrice,
    ExtCodeSize,
    ExtCodeCopy,
    ReturnDataSize,
    ReturnDataCopy,
    ExtCodeHash,
    BlockHash,
    Coinbase,
    Timestamp,
    Number,
    Difficulty,
    GasLimit,
    ChainId,
    SelfBalance,
    BaseFee,
    Pop,
    MLoad,
    MStore,
    MStore8,
    SLoad,
    SStore,
    Jump,
    JumpI,
    Pc,
    MSize,
    Gas,
    JumpDest,
    /// `PUSH0` through `PUSH32`, carrying the number of immediate bytes.
    Push(u8),
    /// `DUP1` through `DUP16`, carrying the (one-based) depth duplicated.
    Dup(u8),
    /// `SWAP1` through `SWAP16`, carrying the depth exchanged with the top.
    Swap(u8),
    /// `LOG0` through `LOG4`, carrying the number of topics.
    Log(u8),
    Create,
    Call,
    CallCode,
    Return,
    DelegateCall,
    Create2,
    StaticCall,
    Revert,
    Invalid,
    AssertFail,
    SelfDestruct,
    Unknown(String),
}

impl Opcode {
    /// Parses the provided `mnemonic` into an opcode.
    ///
    /// Alternative spellings used by different disassemblers map onto the same
    /// opcode, and anything unrecognised becomes [`Opcode::Unknown`].
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Self {
        if let Some(op) = Self::parse_sized(mnemonic) {
            return op;
        }

        match mnemonic {
            "STOP" => Self::Stop,
            "ADD" => Self::Add,
            "MUL" => Self::Mul,
            "SUB" => Self::Sub,
            "DIV" => Self::Div,
            "SDIV" => Self::SDiv,
            "MOD" => Self::Mod,
            "SMOD" => Self::SMod,
            "ADDMOD" => Self::AddMod,
            "MULMOD" => Self::MulMod,
            "EXP" => Self::Exp,
            "SIGNEXTEND" => Self::SignExtend,
            "LT" => Self::Lt,
            "GT" => Self::Gt,
            "SLT" => Self::SLt,
            "SGT" => Self::SGt,
            "EQ" => Self::Eq,
            "ISZERO" => Self::IsZero,
            "AND" => Self::And,
            "OR" => Self::Or,
            "XOR" => Self::Xor,
            "NOT" => Self::Not,
            "BYTE" => Self::Byte,
            "SHL" => Self::Shl,
            "SHR" => Self::Shr,
            "SAR" => Self::Sar,
            "SHA3" | "KECCAK256" => Self::Sha3,
            "ADDRESS" => Self::Address,
            "BALANCE" => Self::Balance,
            "ORIGIN" => Self::Origin,
            "CALLER" => Self::Caller,
            "CALLVALUE" => Self::CallValue,
            "CALLDATALOAD" => Self::CallDataLoad,
            "CALLDATASIZE" => Self::CallDataSize,
            "CALLDATACOPY" => Self::CallDataCopy,
            "CODESIZE" => Self::CodeSize,
            "CODECOPY" => Self::CodeCopy,
            "GASPRICE" => Self::GasPrice,
            "EXTCODESIZE" => Self::ExtCodeSize,
            "EXTCODECOPY" => Self::ExtCodeCopy,
            "RETURNDATASIZE" => Self::ReturnDataSize,
            "RETURNDATACOPY" => Self::ReturnDataCopy,
            "EXTCODEHASH" => Self::ExtCodeHash,
            "BLOCKHASH" => Self::BlockHash,
            "COINBASE" => Self::Coinbase,
            "TIMESTAMP" => Self::Timestamp,
            "NUMBER" => Self::Number,
            "DIFFICULTY" | "PREVRANDAO" => Self::Difficulty,
            "GASLIMIT" => Self::GasLimit,
            "CHAINID" => Self::ChainId,
            "SELFBALANCE" => Self::SelfBalance,
            "BASEFEE" => Self::BaseFee,
            "POP" => Self::Pop,
            "MLOAD" => Self::MLoad,
            "MSTORE" => Self::MStore,
            "MSTORE8" => Self::MStore8,
            "SLOAD" => Self::SLoad,
            "SSTORE" => Self::SStore,
            "JUMP" => Self::Jump,
            "JUMPI" => Self::JumpI,
            "PC" => Self::Pc,
            "MSIZE" => Self::MSize,
            "GAS" => Self::Gas,
            "JUMPDEST" => Self::JumpDest,
            "CREATE" => Self::Create,
            "CALL" => Self::Call,
            "CALLCODE" => Self::CallCode,
            "RETURN" => Self::Return,
            "DELEGATECALL" => Self::DelegateCall,
            "CREATE2" => Self::Create2,
            "STATICCALL" => Self::StaticCall,
            "REVERT" => Self::Revert,
            "INVALID" => Self::Invalid,
            "ASSERTFAIL" => Self::AssertFail,
            "SELFDESTRUCT" | "SUICIDE" => Self::SelfDestruct,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Parses the families of opcodes that carry a size in their mnemonic.
    fn parse_sized(mnemonic: &str) -> Option<Self> {
        let families: [(&str, u8, u8, fn(u8) -> Self); 4] = [
            ("PUSH", 0, PUSH_OPCODE_MAX_BYTES, Self::Push),
            ("DUP", 1, DUP_SWAP_MAX_DEPTH, Self::Dup),
            ("SWAP", 1, DUP_SWAP_MAX_DEPTH, Self::Swap),
            ("LOG", 0, LOG_MAX_TOPICS, Self::Log),
        ];

        families.iter().find_map(|(prefix, min, max, make)| {
            let size = mnemonic.strip_prefix(prefix)?.parse::<u8>().ok()?;
            (*min..=*max).contains(&size).then(|| make(size))
        })
    }

    /// Gets a textual representation of the opcode, using the canonical
    /// mnemonic for aliased instructions.
    #[must_use]
    pub fn as_text_code(&self) -> String {
        match self {
            Self::Push(n) => format!("PUSH{n}"),
            Self::Dup(n) => format!("DUP{n}"),
            Self::Swap(n) => format!("SWAP{n}"),
            Self::Log(n) => format!("LOG{n}"),
            Self::Unknown(name) => name.clone(),
            fixed => fixed.fixed_text_code().to_string(),
        }
    }

    fn fixed_text_code(&self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Add => "ADD",
            Self::Mul => "MUL",
            Self::Sub => "SUB",
            Self::Div => "DIV",
            Self::SDiv => "SDIV",
            Self::Mod => "MOD",
            Self::SMod => "SMOD",
            Self::AddMod => "ADDMOD",
            Self::MulMod => "MULMOD",
            Self::Exp => "EXP",
            Self::SignExtend => "SIGNEXTEND",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::SLt => "SLT",
            Self::SGt => "SGT",
            Self::Eq => "EQ",
            Self::IsZero => "ISZERO",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
            Self::Byte => "BYTE",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Sar => "SAR",
            Self::Sha3 => "SHA3",
            Self::Address => "ADDRESS",
            Self::Balance => "BALANCE",
            Self::Origin => "ORIGIN",
            Self::Caller => "CALLER",
            Self::CallValue => "CALLVALUE",
            Self::CallDataLoad => "CALLDATALOAD",
            Self::CallDataSize => "CALLDATASIZE",
            Self::CallDataCopy => "CALLDATACOPY",
            Self::CodeSize => "CODESIZE",
            Self::CodeCopy => "CODECOPY",
            Self::GasPrice => "GASPRICE",
            Self::ExtCodeSize => "EXTCODESIZE",
            Self::ExtCodeCopy => "EXTCODECOPY",
            Self::ReturnDataSize => "RETURNDATASIZE",
            Self::ReturnDataCopy => "RETURNDATACOPY",
            Self::ExtCodeHash => "EXTCODEHASH",
            Self::BlockHash => "BLOCKHASH",
            Self::Coinbase => "COINBASE",
            Self::Timestamp => "TIMESTAMP",
            Self::Number => "NUMBER",
            Self::Difficulty => "DIFFICULTY",
            Self::GasLimit => "GASLIMIT",
            Self::ChainId => "CHAINID",
            Self::SelfBalance => "SELFBALANCE",
            Self::BaseFee => "BASEFEE",
            Self::Pop => "POP",
            Self::MLoad => "MLOAD",
            Self::MStore => "MSTORE",
            Self::MStore8 => "MSTORE8",
            Self::SLoad => "SLOAD",
            Self::SStore => "SSTORE",
            Self::Jump => "JUMP",
            Self::JumpI => "JUMPI",
            Self::Pc => "PC",
            Self::MSize => "MSIZE",
            Self::Gas => "GAS",
            Self::JumpDest => "JUMPDEST",
            Self::Create => "CREATE",
            Self::Call => "CALL",
            Self::CallCode => "CALLCODE",
            Self::Return => "RETURN",
            Self::DelegateCall => "DELEGATECALL",
            Self::Create2 => "CREATE2",
            Self::StaticCall => "STATICCALL",
            Self::Revert => "REVERT",
            Self::Invalid => "INVALID",
            Self::AssertFail => "ASSERTFAIL",
            Self::SelfDestruct => "SELFDESTRUCT",
            Self::Push(_) | Self::Dup(_) | Self::Swap(_) | Self::Log(_) | Self::Unknown(_) => "",
        }
    }

    /// Gets the number of bytes that the instruction occupies in the bytecode.
    #[must_use]
    pub fn width(&self) -> u64 {
        match self {
            Self::Push(n) => 1 + u64::from(*n),
            _ => 1,
        }
    }

    /// Gets the number of arguments that the opcode accepts from the stack.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        match self {
            Self::Stop
            | Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::Difficulty
            | Self::GasLimit
            | Self::ChainId
            | Self::SelfBalance
            | Self::BaseFee
            | Self::Pc
            | Self::MSize
            | Self::Gas
            | Self::JumpDest
            | Self::Push(_)
            | Self::Invalid
            | Self::AssertFail
            | Self::Unknown(_) => 0,
            Self::IsZero
            | Self::Not
            | Self::Balance
            | Self::CallDataLoad
            | Self::ExtCodeSize
            | Self::ExtCodeHash
            | Self::BlockHash
            | Self::Pop
            | Self::MLoad
            | Self::SLoad
            | Self::Jump
            | Self::SelfDestruct => 1,
            Self::Add
            | Self::Mul
            | Self::Sub
            | Self::Div
            | Self::SDiv
            | Self::Mod
            | Self::SMod
            | Self::Exp
            | Self::SignExtend
            | Self::Lt
            | Self::Gt
            | Self::SLt
            | Self::SGt
            | Self::Eq
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Byte
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::Sha3
            | Self::MStore
            | Self::MStore8
            | Self::SStore
            | Self::JumpI
            | Self::Return
            | Self::Revert => 2,
            Self::AddMod
            | Self::MulMod
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ReturnDataCopy
            | Self::Create => 3,
            Self::ExtCodeCopy | Self::Create2 => 4,
            Self::DelegateCall | Self::StaticCall => 6,
            Self::Call | Self::CallCode => 7,
            Self::Dup(n) => usize::from(*n),
            Self::Swap(n) => usize::from(*n) + 1,
            Self::Log(n) => 2 + usize::from(*n),
        }
    }

    /// Gets the static base cost of the opcode in gas.
    ///
    /// Dynamic components (memory expansion, cold access, copied words) are
    /// not modelled, so this is a lower bound on what the instruction costs.
    #[must_use]
    pub fn min_gas_cost(&self) -> u64 {
        match self {
            Self::Stop
            | Self::Return
            | Self::Revert
            | Self::Invalid
            | Self::AssertFail
            | Self::Unknown(_) => 0,
            Self::JumpDest => 1,
            Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::Difficulty
            | Self::GasLimit
            | Self::ChainId
            | Self::BaseFee
            | Self::Pop
            | Self::Pc
            | Self::MSize
            | Self::Gas
            | Self::Push(0) => 2,
            Self::Add
            | Self::Sub
            | Self::Lt
            | Self::Gt
            | Self::SLt
            | Self::SGt
            | Self::Eq
            | Self::IsZero
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Not
            | Self::Byte
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::CallDataLoad
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ReturnDataCopy
            | Self::MLoad
            | Self::MStore
            | Self::MStore8
            | Self::Push(_)
            | Self::Dup(_)
            | Self::Swap(_) => 3,
            Self::Mul
            | Self::Div
            | Self::SDiv
            | Self::Mod
            | Self::SMod
            | Self::SignExtend
            | Self::SelfBalance => 5,
            Self::AddMod | Self::MulMod | Self::Jump => 8,
            Self::Exp | Self::JumpI => 10,
            Self::BlockHash => 20,
            Self::Sha3 => 30,
            Self::Balance
            | Self::ExtCodeSize
            | Self::ExtCodeCopy
            | Self::ExtCodeHash
            | Self::SLoad => 100,
            Self::Log(n) => 375 + 375 * u64::from(*n),
            Self::Call | Self::CallCode | Self::DelegateCall | Self::StaticCall => 100,
            Self::SStore => 2_900,
            Self::SelfDestruct => 5_000,
            Self::Create | Self::Create2 => 32_000,
        }
    }

    /// Checks whether the opcode ends its basic block without a successor.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stop | Self::Return | Self::SelfDestruct | Self::Revert | Self::AssertFail
        )
    }

    /// Checks whether the opcode is one of the `PUSH` family.
    #[must_use]
    pub fn is_push(&self) -> bool {
        matches!(self, Self::Push(_))
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_text_code())
    }
}

#[cfg(test)]
mod test {
    use crate::opcode::Opcode;

    #[test]
    fn parses_sized_families() {
        assert_eq!(Opcode::from_mnemonic("PUSH0"), Opcode::Push(0));
        assert_eq!(Opcode::from_mnemonic("PUSH32"), Opcode::Push(32));
        assert_eq!(Opcode::from_mnemonic("DUP16"), Opcode::Dup(16));
        assert_eq!(Opcode::from_mnemonic("SWAP1"), Opcode::Swap(1));
        assert_eq!(Opcode::from_mnemonic("LOG4"), Opcode::Log(4));
    }

    #[test]
    fn out_of_range_sizes_are_unknown() {
        assert_eq!(
            Opcode::from_mnemonic("PUSH33"),
            Opcode::Unknown("PUSH33".into())
        );
        assert_eq!(Opcode::from_mnemonic("DUP0"), Opcode::Unknown("DUP0".into()));
        assert_eq!(Opcode::from_mnemonic("LOG5"), Opcode::Unknown("LOG5".into()));
    }

    #[test]
    fn aliases_share_an_opcode() {
        assert_eq!(Opcode::from_mnemonic("KECCAK256"), Opcode::Sha3);
        assert_eq!(Opcode::from_mnemonic("SUICIDE"), Opcode::SelfDestruct);
        assert_eq!(Opcode::from_mnemonic("PREVRANDAO"), Opcode::Difficulty);
        assert_ne!(Opcode::from_mnemonic("INVALID"), Opcode::AssertFail);
    }

    #[test]
    fn widths_account_for_immediates() {
        assert_eq!(Opcode::Push(4).width(), 5);
        assert_eq!(Opcode::Push(0).width(), 1);
        assert_eq!(Opcode::Add.width(), 1);
    }

    #[test]
    fn arities_match_the_evm() {
        assert_eq!(Opcode::Call.arg_count(), 7);
        assert_eq!(Opcode::Create2.arg_count(), 4);
        assert_eq!(Opcode::Swap(2).arg_count(), 3);
        assert_eq!(Opcode::Log(4).arg_count(), 6);
    }

    #[test]
    fn text_codes_are_canonical() {
        assert_eq!(Opcode::from_mnemonic("KECCAK256").as_text_code(), "SHA3");
        assert_eq!(Opcode::Push(2).to_string(), "PUSH2");
        assert_eq!(Opcode::Unknown("TLOAD".into()).to_string(), "TLOAD");
    }

    #[test]
    fn terminal_instructions_close_blocks() {
        assert!(Opcode::Stop.is_terminal());
        assert!(Opcode::AssertFail.is_terminal());
        assert!(!Opcode::Invalid.is_terminal());
        assert!(!Opcode::JumpI.is_terminal());
    }
}
