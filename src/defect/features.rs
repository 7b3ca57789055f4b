//! This module contains the feature-state records: small per-path state
//! machines that follow the instruction sequences by which token contracts
//! compute the storage slots for minting, approval, transfer, burning and
//! operator approval.
//!
//! A record is triggered when a function whose name names the feature is
//! entered. Storing to scratch memory at offset `0` and then `0x20` arms the
//! record, and the `SHA3` that follows completes it with the hashed slot.

use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::vm::value::Value;

/// The token features that are tracked.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Feature {
    Mint,
    Approve,
    Transfer,
    Burn,
    SetApprovalForAll,
}

impl Feature {
    /// Gets the feature implemented by the function called `name`, if any.
    #[must_use]
    pub fn for_function(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        [
            ("setapprovalforall", Self::SetApprovalForAll),
            ("approve", Self::Approve),
            ("mint", Self::Mint),
            ("burn", Self::Burn),
            ("transfer", Self::Transfer),
        ]
        .into_iter()
        .find_map(|(needle, feature)| name.contains(needle).then_some(feature))
    }

    /// Gets the number of scratch stores after which the next hash completes
    /// the record.
    #[must_use]
    pub fn stores_before_hash(self) -> u8 {
        match self {
            Self::SetApprovalForAll => 3,
            _ => 2,
        }
    }

    /// Checks whether the feature first hashes the slot of the token owner
    /// before hashing its own slot.
    #[must_use]
    pub fn hashes_owner_first(self) -> bool {
        matches!(self, Self::Approve | Self::Transfer)
    }
}

/// The progress of a single feature.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FeatureRecord<'ctx> {
    pub trigger: bool,

    /// How many scratch stores have been seen since the last hash.
    pub stores: u8,

    /// The hash of the owner's slot, for features that load the owner first.
    pub owner_hash: Option<Value<'ctx>>,

    pub hash: Option<Value<'ctx>>,

    /// The value loaded from the hashed slot, used by burning.
    pub sload: Option<Value<'ctx>>,

    pub valid: bool,
}

impl<'ctx> FeatureRecord<'ctx> {
    /// Checks whether the next hash will complete this record.
    #[must_use]
    pub fn is_armed(&self, feature: Feature) -> bool {
        self.trigger && self.stores >= feature.stores_before_hash()
    }
}

/// The reentrancy bookkeeping for external calls made on a path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReentrancyRecord {
    /// The program counters of the external calls made so far.
    pub calls: Vec<u64>,

    /// The calls after which a storage write was observed.
    pub affected: Vec<u64>,
}

/// The feature-state of one path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Features<'ctx> {
    pub mint:                 FeatureRecord<'ctx>,
    pub approve:              FeatureRecord<'ctx>,
    pub transfer:             FeatureRecord<'ctx>,
    pub burn:                 FeatureRecord<'ctx>,
    pub set_approval_for_all: FeatureRecord<'ctx>,
    pub erc721_reentrancy:    ReentrancyRecord,
}

impl<'ctx> Features<'ctx> {
    /// Gets the record for `feature`.
    #[must_use]
    pub fn record(&self, feature: Feature) -> &FeatureRecord<'ctx> {
        match feature {
            Feature::Mint => &self.mint,
            Feature::Approve => &self.approve,
            Feature::Transfer => &self.transfer,
            Feature::Burn => &self.burn,
            Feature::SetApprovalForAll => &self.set_approval_for_all,
        }
    }

    fn record_mut(&mut self, feature: Feature) -> &mut FeatureRecord<'ctx> {
        match feature {
            Feature::Mint => &mut self.mint,
            Feature::Approve => &mut self.approve,
            Feature::Transfer => &mut self.transfer,
            Feature::Burn => &mut self.burn,
            Feature::SetApprovalForAll => &mut self.set_approval_for_all,
        }
    }

    /// Gets the feature whose record is currently triggered, if any.
    #[must_use]
    pub fn active(&self) -> Option<Feature> {
        [
            Feature::Mint,
            Feature::Approve,
            Feature::Transfer,
            Feature::Burn,
            Feature::SetApprovalForAll,
        ]
        .into_iter()
        .find(|f| self.record(*f).trigger)
    }

    /// Resets the feature records for entry into the function called `name`,
    /// triggering the feature that it implements.
    pub fn enter_function(&mut self, name: &str) {
        let reentrancy = std::mem::take(&mut self.erc721_reentrancy);
        *self = Self {
            erc721_reentrancy: reentrancy,
            ..Self::default()
        };
        if let Some(feature) = Feature::for_function(name) {
            self.record_mut(feature).trigger = true;
        }
    }

    /// Observes a word store to memory at `offset`.
    pub fn on_mstore(&mut self, offset: Option<U256>) {
        let Some(feature) = self.active() else { return };
        let record = self.record_mut(feature);
        match offset {
            Some(o) if o == U256::ZERO && record.stores % 2 == 0 => record.stores += 1,
            Some(o) if o == U256::new(0x20) && record.stores % 2 == 1 => record.stores += 1,
            _ => {}
        }
    }

    /// Observes the result of a hash.
    pub fn on_sha3(&mut self, result: &Value<'ctx>) {
        let Some(feature) = self.active() else { return };
        let record = self.record_mut(feature);
        if record.stores == 2 && feature.hashes_owner_first() && record.owner_hash.is_none() {
            record.owner_hash = Some(result.clone());
            record.stores = 0;
        } else if record.is_armed(feature) {
            record.hash = Some(result.clone());
            record.stores = 0;
            if feature != Feature::Burn {
                record.valid = true;
            }
        }
    }

    /// Observes the result of a storage load.
    pub fn on_sload(&mut self, result: &Value<'ctx>) {
        if self.burn.hash.is_some() {
            self.burn.sload = Some(result.clone());
        }
    }

    /// Observes a swap that exposed `exposed` just below the top of the stack.
    pub fn on_swap(&mut self, exposed: Option<&Value<'ctx>>) {
        if exposed.is_some() && self.burn.sload.as_ref() == exposed {
            self.burn.valid = true;
            self.burn.trigger = false;
        }
    }

    /// Observes an external call made at `pc`.
    pub fn on_call(&mut self, pc: u64) {
        self.erc721_reentrancy.calls.push(pc);
    }

    /// Observes a storage write, marking every outstanding call as having
    /// been followed by a change of state.
    pub fn on_sstore(&mut self) {
        let record = &mut self.erc721_reentrancy;
        for pc in &record.calls {
            if !record.affected.contains(pc) {
                record.affected.push(*pc);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        defect::features::{Feature, Features},
        vm::value::Value,
    };

    #[test]
    fn functions_map_to_features() {
        assert_eq!(Feature::for_function("_safeMint"), Some(Feature::Mint));
        assert_eq!(
            Feature::for_function("setApprovalForAll"),
            Some(Feature::SetApprovalForAll)
        );
        assert_eq!(Feature::for_function("transferFrom"), Some(Feature::Transfer));
        assert_eq!(Feature::for_function("balanceOf"), None);
    }

    #[test]
    fn mint_hash_completes_after_two_scratch_stores() {
        let mut features = Features::default();
        features.enter_function("mint");
        features.on_mstore(Some(U256::ZERO));
        features.on_sha3(&Value::from_u64(1));
        assert_eq!(features.mint.hash, None);

        features.on_mstore(Some(U256::new(0x20)));
        features.on_sha3(&Value::from_u64(2));
        assert_eq!(features.mint.hash, Some(Value::from_u64(2)));
        assert!(features.mint.valid);
    }

    #[test]
    fn approve_hashes_the_owner_slot_first() {
        let mut features = Features::default();
        features.enter_function("approve");
        for hash in [7, 8] {
            features.on_mstore(Some(U256::ZERO));
            features.on_mstore(Some(U256::new(0x20)));
            features.on_sha3(&Value::from_u64(hash));
        }

        assert_eq!(features.approve.owner_hash, Some(Value::from_u64(7)));
        assert_eq!(features.approve.hash, Some(Value::from_u64(8)));
    }

    #[test]
    fn burn_is_valid_once_its_load_is_swapped_into_place() {
        let mut features = Features::default();
        features.enter_function("burn");
        features.on_mstore(Some(U256::ZERO));
        features.on_mstore(Some(U256::new(0x20)));
        features.on_sha3(&Value::from_u64(3));
        features.on_sload(&Value::from_u64(4));
        features.on_swap(Some(&Value::from_u64(5)));
        assert!(!features.burn.valid);

        features.on_swap(Some(&Value::from_u64(4)));
        assert!(features.burn.valid);
        assert!(!features.burn.trigger);
    }

    #[test]
    fn storage_writes_mark_outstanding_calls() {
        let mut features = Features::default();
        features.on_sstore();
        features.on_call(12);
        features.on_call(40);
        features.on_sstore();

        assert_eq!(features.erc721_reentrancy.affected, vec![12, 40]);
    }
}
