//! This module contains constants that are needed throughout the codebase.

use std::time::Duration;

use ethnum::U256;

/// The maximum stack depth for the EVM.
pub const MAXIMUM_STACK_DEPTH: usize = 1024;

/// The width of word on the EVM in bits.
pub const WORD_SIZE_BITS: u32 = 256;

/// The width of a byte on the EVM (and most other places) in bits.
pub const BYTE_SIZE_BITS: u32 = 8;

/// The width of a word on the EVM in bytes.
pub const WORD_SIZE_BYTES: usize = (WORD_SIZE_BITS / BYTE_SIZE_BITS) as usize;

/// The bit-width of an address type.
pub const ADDRESS_WIDTH_BITS: u32 = 160;

/// The maximum number of bytes that can be pushed at once using the `PUSH`
/// opcode.
pub const PUSH_OPCODE_MAX_BYTES: u8 = 32;

/// The maximum number of stack items that a `DUP` or `SWAP` can reach.
pub const DUP_SWAP_MAX_DEPTH: u8 = 16;

/// The maximum number of topics that a `LOG` opcode can emit.
pub const LOG_MAX_TOPICS: u8 = 4;

/// The maximum number of bytes that will be copied from the contract code into
/// the memory byte buffer by a single `CODECOPY`.
pub const CODE_COPY_MAX_BYTES: usize = 4096;

/// The highest memory offset up to which concrete stores are mirrored into the
/// byte buffer used to key hashes.
pub const BYTE_BUFFER_MAX_OFFSET: usize = 1 << 20;

/// The first topic of the ERC-20/ERC-721 `Transfer(address,address,uint256)`
/// event.
pub const TRANSFER_EVENT_TOPIC: U256 = U256::from_words(
    0xddf2_52ad_1be2_c89b_69c2_b068_fc37_8daa,
    0x952b_a7f1_63c4_a116_28f5_5a4d_f523_b3ef,
);

/// The selector of `transferFrom(address,address,uint256)`, which is always
/// explored first when present.
pub const TRANSFER_FROM_SELECTOR: &str = "23b872dd";

/// The argument shape that marks a function as a three-argument transfer.
pub const TRANSFER_SHAPES: [&str; 2] = ["(address,address,uint256)", "(address, address, uint256)"];

/// The detail tag attached to functions that emit a transfer event without a
/// preceding storage write.
pub const EMPTY_TRANSFER_TAG: &str = "standard1";

/// The name that exploration uses for code executed outside any known
/// function.
pub const FALLBACK_FUNCTION_NAME: &str = "fallback";

/// The owner-returning expression assumed when the caller does not supply one.
pub const DEFAULT_OWNER_RETURN_EXPRESSION: &str = "return owner";

/// The default maximum number of times that a single CFG edge may be taken on
/// one path.
pub const DEFAULT_LOOP_LIMIT: usize = 10;

/// The default amount of gas that a path may consume before it is pruned.
pub const DEFAULT_GAS_LIMIT: u64 = 4_000_000;

/// The default maximum number of blocks that a single path may visit.
pub const DEFAULT_DEPTH_LIMIT: usize = 50;

/// The default time that the solver may spend on a single query, in
/// milliseconds.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u32 = 1_000;

/// The default wall-clock budget for a whole analysis run.
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(50);

/// The default value for whether test vectors are generated for terminated
/// paths.
pub const DEFAULT_GENERATE_TEST_CASES: bool = false;

/// The default value for whether per-path errors are surfaced loudly.
pub const DEFAULT_DEBUG_MODE: bool = false;

/// The default value for whether an unknown instruction aborts the whole run
/// rather than just the current path.
pub const DEFAULT_STRICT_INSTRUCTIONS: bool = false;

/// The default number of loop iterations the explorer will wait before polling
/// the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;
