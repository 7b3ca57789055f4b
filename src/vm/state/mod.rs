//! The state representation for the symbolic virtual machine, and utilities for
//! dealing with said representation.
//!
//! Each explored path exclusively owns one [`ExecutionState`]. Forking the
//! path at a branch is a clone, and every container in the state is shared
//! copy-on-write with its parent, so the fork costs nothing until either side
//! writes.

pub mod environment;
pub mod memory;
pub mod stack;
pub mod storage;

use std::{
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use z3::{
    ast::{Bool, BV},
    Context,
};

use crate::{
    constant::WORD_SIZE_BITS,
    defect::features::Features,
    vm::{
        state::{environment::Environment, memory::Memory, stack::Stack, storage::Storage},
        value::Value,
    },
};

/// The balance entry of the transaction sender.
pub const SENDER_BALANCE: &str = "Is";

/// The balance entry of the contract under analysis.
pub const RECEIVER_BALANCE: &str = "Ia";

/// The state of a single explored path.
#[derive(Clone, Debug)]
pub struct ExecutionState<'ctx> {
    pub stack: Stack<'ctx>,
    pub memory: Memory<'ctx>,
    pub storage: Storage<'ctx>,

    /// The constraints required to reach the current point on the path.
    pub path_conditions: Rc<Vec<Bool<'ctx>>>,

    /// The variables that have been bound on this path, by name.
    pub variables: Rc<BTreeMap<String, BV<'ctx>>>,

    /// The results of hashing concrete memory content, keyed by a digest of
    /// that content.
    pub hashes: Rc<HashMap<[u8; 32], Value<'ctx>>>,

    /// The balances of the accounts touched on this path.
    pub balances: Rc<HashMap<String, Value<'ctx>>>,

    pub features: Features<'ctx>,

    /// The program counter of the next instruction.
    pub pc: u64,

    /// The approximate gas consumed so far.
    pub gas_used: u64,
}

impl<'ctx> ExecutionState<'ctx> {
    /// Creates the state at the start of a transaction in the provided
    /// environment.
    ///
    /// The sender has already paid the transferred value to the contract, so
    /// the initial constraints require that the sender could afford it.
    #[must_use]
    pub fn new(ctx: &'ctx Context, env: &Environment<'ctx>) -> Self {
        let zero = BV::from_u64(ctx, 0, WORD_SIZE_BITS);
        let path_conditions = vec![
            env.value.bvuge(&zero),
            env.initial_sender_balance.bvuge(&env.value),
            env.initial_receiver_balance.bvuge(&zero),
        ];

        let variables = env
            .bindings()
            .into_iter()
            .map(|(name, var)| (name.to_string(), var))
            .collect();

        let mut balances = HashMap::new();
        balances.insert(
            SENDER_BALANCE.to_string(),
            Value::from_bv(&env.initial_sender_balance.bvsub(&env.value)),
        );
        balances.insert(
            RECEIVER_BALANCE.to_string(),
            Value::from_bv(&env.initial_receiver_balance.bvadd(&env.value)),
        );

        Self {
            stack: Stack::new(),
            memory: Memory::new(),
            storage: Storage::new(),
            path_conditions: Rc::new(path_conditions),
            variables: Rc::new(variables),
            hashes: Rc::default(),
            balances: Rc::new(balances),
            features: Features::default(),
            pc: 0,
            gas_used: 0,
        }
    }

    /// Gets the variable called `name`, binding it on this path if it is not
    /// bound yet.
    pub fn bind(&mut self, ctx: &'ctx Context, name: &str) -> BV<'ctx> {
        if let Some(var) = self.variables.get(name) {
            return var.clone();
        }
        let var = BV::new_const(ctx, name, WORD_SIZE_BITS);
        Rc::make_mut(&mut self.variables).insert(name.to_string(), var.clone());
        var
    }

    /// Binds a variable that is known to be fresh.
    pub fn bind_fresh(&mut self, ctx: &'ctx Context, name: &str) -> BV<'ctx> {
        let var = BV::new_const(ctx, name, WORD_SIZE_BITS);
        Rc::make_mut(&mut self.variables).insert(name.to_string(), var.clone());
        var
    }

    /// Appends `condition` to the path conditions.
    pub fn add_condition(&mut self, condition: Bool<'ctx>) {
        Rc::make_mut(&mut self.path_conditions).push(condition);
    }

    /// Gets the balance of the account `name`.
    #[must_use]
    pub fn balance(&self, name: &str) -> Option<&Value<'ctx>> {
        self.balances.get(name)
    }

    /// Sets the balance of the account `name`.
    pub fn set_balance(&mut self, name: impl Into<String>, value: Value<'ctx>) {
        Rc::make_mut(&mut self.balances).insert(name.into(), value);
    }

    /// Looks up a previous hash of content with the provided `digest`.
    #[must_use]
    pub fn cached_hash(&self, digest: &[u8; 32]) -> Option<&Value<'ctx>> {
        self.hashes.get(digest)
    }

    /// Records the result of hashing content with the provided `digest`.
    pub fn cache_hash(&mut self, digest: [u8; 32], result: Value<'ctx>) {
        Rc::make_mut(&mut self.hashes).insert(digest, result);
    }

    /// Forks the state for a successor starting at `pc`.
    #[must_use]
    pub fn fork_at(&self, pc: u64) -> Self {
        let mut fork = self.clone();
        fork.pc = pc;
        fork
    }
}

#[cfg(test)]
mod test {
    use z3::{Config, Context};

    use crate::vm::state::{environment::Environment, ExecutionState, RECEIVER_BALANCE};

    #[test]
    fn initial_state_binds_the_environment() {
        let ctx = Context::new(&Config::new());
        let env = Environment::new(&ctx);
        let state = ExecutionState::new(&ctx, &env);

        assert_eq!(state.path_conditions.len(), 3);
        assert!(state.variables.contains_key("Is"));
        assert!(state.variables.contains_key("IH_cid"));
        assert!(!state.variables.contains_key("init_Is"));
        assert!(state.balance(RECEIVER_BALANCE).is_some_and(|b| b.is_symbolic()));
    }

    #[test]
    fn binding_reuses_existing_variables() {
        let ctx = Context::new(&Config::new());
        let env = Environment::new(&ctx);
        let mut state = ExecutionState::new(&ctx, &env);

        let first = state.bind(&ctx, "Id_size");
        let second = state.bind(&ctx, "Id_size");
        assert_eq!(first, second);
        assert_eq!(state.variables.len(), 14);
    }

    #[test]
    fn forks_are_isolated() {
        let ctx = Context::new(&Config::new());
        let env = Environment::new(&ctx);
        let parent = ExecutionState::new(&ctx, &env);

        let mut child = parent.fork_at(10);
        child.bind(&ctx, "Id_1");
        child.add_condition(z3::ast::Bool::from_bool(&ctx, true));

        assert_eq!(child.pc, 10);
        assert_eq!(parent.pc, 0);
        assert!(!parent.variables.contains_key("Id_1"));
        assert_eq!(parent.path_conditions.len(), 3);
    }
}
