//! This module contains the transaction and block environment that every path
//! starts from.

use z3::{ast::BV, Context};

use crate::constant::WORD_SIZE_BITS;

/// The unconstrained inputs describing the transaction and the block it is
/// included in.
///
/// The names of these variables are fixed, so two environments built in the
/// same solver context refer to the same terms.
#[derive(Clone, Debug)]
pub struct Environment<'ctx> {
    pub sender:                   BV<'ctx>,
    pub receiver:                 BV<'ctx>,
    pub value:                    BV<'ctx>,
    pub gas_price:                BV<'ctx>,
    pub origin:                   BV<'ctx>,
    pub coinbase:                 BV<'ctx>,
    pub timestamp:                BV<'ctx>,
    pub number:                   BV<'ctx>,
    pub difficulty:               BV<'ctx>,
    pub gas_limit:                BV<'ctx>,
    pub chain_id:                 BV<'ctx>,
    pub self_balance:             BV<'ctx>,
    pub base_fee:                 BV<'ctx>,
    pub initial_sender_balance:   BV<'ctx>,
    pub initial_receiver_balance: BV<'ctx>,
}

impl<'ctx> Environment<'ctx> {
    /// The name of the variable holding the transaction sender.
    pub const SENDER: &'static str = "Is";

    /// The name of the variable holding the address of the contract.
    pub const RECEIVER: &'static str = "Ia";

    /// Creates the environment variables in `ctx`.
    #[must_use]
    pub fn new(ctx: &'ctx Context) -> Self {
        let var = |name: &str| BV::new_const(ctx, name, WORD_SIZE_BITS);
        Self {
            sender:                   var(Self::SENDER),
            receiver:                 var(Self::RECEIVER),
            value:                    var("Iv"),
            gas_price:                var("Ip"),
            origin:                   var("Io"),
            coinbase:                 var("IH_c"),
            timestamp:                var("IH_s"),
            number:                   var("IH_i"),
            difficulty:               var("IH_d"),
            gas_limit:                var("IH_l"),
            chain_id:                 var("IH_cid"),
            self_balance:             var("IH_b"),
            base_fee:                 var("IH_f"),
            initial_sender_balance:   var("init_Is"),
            initial_receiver_balance: var("init_Ia"),
        }
    }

    /// Gets the variables that are considered bound on every path, by name.
    #[must_use]
    pub fn bindings(&self) -> Vec<(&'static str, BV<'ctx>)> {
        vec![
            (Self::SENDER, self.sender.clone()),
            (Self::RECEIVER, self.receiver.clone()),
            ("Iv", self.value.clone()),
            ("Ip", self.gas_price.clone()),
            ("Io", self.origin.clone()),
            ("IH_c", self.coinbase.clone()),
            ("IH_s", self.timestamp.clone()),
            ("IH_i", self.number.clone()),
            ("IH_d", self.difficulty.clone()),
            ("IH_l", self.gas_limit.clone()),
            ("IH_cid", self.chain_id.clone()),
            ("IH_b", self.self_balance.clone()),
            ("IH_f", self.base_fee.clone()),
        ]
    }
}
