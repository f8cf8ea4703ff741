// Path: crates/host/src/contexts/metering.rs
//! The metering context: the gas ledger of the current call.
//!
//! Gas lives in two places over a frame's lifetime. Before an instance
//! exists, initial deductions (compilation, deployment) accumulate locally;
//! once the executor creates the instance's [`GasPoints`] ledger, every
//! charge — opcode gas burned by the engine and EEI gas charged here — flows
//! through that shared counter. `gas_left` is therefore authoritative at any
//! point of the call.

use std::collections::BTreeMap;
use std::sync::Arc;

use crucible_api::engine::GasPoints;
use crucible_types::error::HostError;
use crucible_types::gas::GasCostConfig;

/// Per-contract, per-API gas usage collected when tracing is enabled.
pub type GasTraceMap = BTreeMap<Vec<u8>, BTreeMap<String, Vec<u64>>>;

#[derive(Default)]
struct MeteringFrame {
    gas_provided: u64,
    gas_locked: u64,
    initial_gas_deducted: u64,
    points: Option<Arc<GasPoints>>,
}

/// The gas ledger for the current call, with snapshots for nested frames.
pub struct MeteringContext {
    gas_config: Arc<GasCostConfig>,
    block_gas_limit: u64,
    frame: MeteringFrame,
    gas_refund: u64,
    gas_tracing: bool,
    trace_address: Vec<u8>,
    gas_trace: GasTraceMap,
    state_stack: Vec<MeteringFrame>,
}

impl MeteringContext {
    /// A metering context bound to a compiled cost table.
    pub fn new(gas_config: Arc<GasCostConfig>, block_gas_limit: u64) -> Self {
        Self {
            gas_config,
            block_gas_limit,
            frame: MeteringFrame::default(),
            gas_refund: 0,
            gas_tracing: false,
            trace_address: Vec::new(),
            gas_trace: GasTraceMap::new(),
            state_stack: Vec::new(),
        }
    }

    /// Resets per-call state. Called once before every top-level execution.
    pub fn init_state(&mut self) {
        self.frame = MeteringFrame::default();
        self.gas_refund = 0;
        self.trace_address.clear();
        self.gas_trace.clear();
        self.state_stack.clear();
    }

    /// Snapshots the current frame for a nested execution.
    pub fn push_state(&mut self) {
        self.state_stack.push(std::mem::take(&mut self.frame));
    }

    /// Restores the parent frame after a successful nested execution. Gas
    /// actually consumed by the child stays charged on the parent's points
    /// ledger; unused forwarded gas is returned via [`Self::restore_gas`].
    pub fn pop_set_active(&mut self) {
        if let Some(frame) = self.state_stack.pop() {
            self.frame = frame;
        }
    }

    /// Restores the parent frame after a failed nested execution.
    pub fn pop_discard(&mut self) {
        self.pop_set_active();
    }

    /// Drops every stacked frame.
    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    /// Current state-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    /// The compiled cost tables in force for this call.
    pub fn gas_config(&self) -> &GasCostConfig {
        &self.gas_config
    }

    /// Programs the frame for an incoming call, enforcing the block gas
    /// limit on top-level invocations.
    pub fn set_up_for_call(
        &mut self,
        gas_provided: u64,
        gas_locked: u64,
        top_level: bool,
    ) -> Result<(), HostError> {
        if top_level && gas_provided > self.block_gas_limit {
            return Err(HostError::BlockGasLimitExceeded);
        }
        self.frame = MeteringFrame {
            gas_provided,
            gas_locked,
            initial_gas_deducted: 0,
            points: None,
        };
        Ok(())
    }

    /// Gas provided to the current frame.
    pub fn gas_provided(&self) -> u64 {
        self.frame.gas_provided
    }

    /// Gas locked for the callback of the current frame.
    pub fn gas_locked(&self) -> u64 {
        self.frame.gas_locked
    }

    /// Charges the one-time instance preparation cost: per byte of code,
    /// cheaper when the module comes out of the warm cache.
    pub fn deduct_gas_for_preparation(
        &mut self,
        code_len: u64,
        warm: bool,
    ) -> Result<(), HostError> {
        let per_byte = if warm {
            self.gas_config.base_ops.aot_prepare_per_byte
        } else {
            self.gas_config.base_ops.compile_per_byte
        };
        self.use_gas(code_len.saturating_mul(per_byte))
    }

    /// Charges the deployment cost of new code: a flat creation cost plus a
    /// per-byte persistence cost.
    pub fn deduct_gas_for_deployment(&mut self, code_len: u64) -> Result<(), HostError> {
        let cost = self
            .gas_config
            .host_api
            .create_contract
            .saturating_add(code_len.saturating_mul(self.gas_config.base_ops.persist_per_byte));
        self.use_gas(cost)
    }

    /// Hands the frame the instance's shared points ledger. The ledger must
    /// have been created with `gas_left()` as its limit.
    pub fn bind_points(&mut self, points: Arc<GasPoints>) {
        self.frame.points = Some(points);
    }

    /// Creates the points ledger for a new instance out of the gas still
    /// available, binds it, and returns it for the engine.
    pub fn fork_points_for_instance(&mut self) -> Arc<GasPoints> {
        let points = Arc::new(GasPoints::new(self.gas_left()));
        self.frame.initial_gas_deducted = 0;
        self.frame.gas_provided = points.limit();
        self.bind_points(points.clone());
        points
    }

    /// Gas still available to the current frame.
    pub fn gas_left(&self) -> u64 {
        match &self.frame.points {
            Some(points) => points.remaining(),
            None => self
                .frame
                .gas_provided
                .saturating_sub(self.frame.initial_gas_deducted),
        }
    }

    /// Gas consumed by the current frame so far.
    pub fn gas_used(&self) -> u64 {
        match &self.frame.points {
            Some(points) => points.used(),
            None => self.frame.initial_gas_deducted,
        }
    }

    /// Consumes gas, failing the call when the frame is exhausted.
    pub fn use_gas(&mut self, gas: u64) -> Result<(), HostError> {
        match &self.frame.points {
            Some(points) => {
                if !points.use_points(gas) {
                    return Err(HostError::NotEnoughGas);
                }
            }
            None => {
                let deducted = self.frame.initial_gas_deducted.saturating_add(gas);
                if deducted > self.frame.gas_provided {
                    return Err(HostError::NotEnoughGas);
                }
                self.frame.initial_gas_deducted = deducted;
            }
        }
        Ok(())
    }

    /// Consumes gas and records it under the named API when tracing.
    pub fn use_gas_traced(&mut self, gas: u64, api_name: &str) -> Result<(), HostError> {
        if self.gas_tracing {
            self.gas_trace
                .entry(self.trace_address.clone())
                .or_default()
                .entry(api_name.to_string())
                .or_default()
                .push(gas);
        }
        self.use_gas(gas)
    }

    /// Charges the per-byte cost of copying data across the WASM boundary.
    pub fn use_gas_for_data_copy(&mut self, length: u64) -> Result<(), HostError> {
        self.use_gas(length.saturating_mul(self.gas_config.base_ops.data_copy_per_byte))
    }

    /// Returns unconsumed gas to the frame (unused forwarded gas of a
    /// successful sub-call).
    pub fn restore_gas(&mut self, gas: u64) {
        match &self.frame.points {
            Some(points) => points.free_points(gas),
            None => {
                self.frame.initial_gas_deducted =
                    self.frame.initial_gas_deducted.saturating_sub(gas);
            }
        }
    }

    /// Accumulates a storage-release refund.
    pub fn free_gas(&mut self, gas: u64) {
        self.gas_refund = self.gas_refund.saturating_add(gas);
    }

    /// The accumulated refund for the call.
    pub fn gas_refund(&self) -> u64 {
        self.gas_refund
    }

    /// The gas to lock for an async callback, per the schedule.
    pub fn gas_to_lock_for_callback(&self) -> u64 {
        self.gas_config.host_api.async_callback_gas_lock
    }

    /// Enables or disables per-API gas tracing.
    pub fn set_gas_tracing(&mut self, enabled: bool) {
        self.gas_tracing = enabled;
    }

    /// True when tracing is enabled.
    pub fn is_gas_tracing(&self) -> bool {
        self.gas_tracing
    }

    /// Attributes subsequent traced charges to the given contract address.
    pub fn set_trace_address(&mut self, address: &[u8]) {
        self.trace_address = address.to_vec();
    }

    /// The trace collected so far.
    pub fn gas_trace(&self) -> &GasTraceMap {
        &self.gas_trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_types::gas::GasSchedule;

    fn metering() -> MeteringContext {
        let config = GasCostConfig::from_schedule(&GasSchedule::default()).unwrap();
        MeteringContext::new(Arc::new(config), 1_000_000_000)
    }

    #[test]
    fn initial_deductions_then_points_ledger() {
        let mut m = metering();
        m.set_up_for_call(10_000, 0, true).unwrap();
        m.deduct_gas_for_preparation(3_000, false).unwrap();
        assert_eq!(m.gas_left(), 7_000);

        let points = m.fork_points_for_instance();
        assert_eq!(points.limit(), 7_000);
        m.use_gas(500).unwrap();
        assert_eq!(m.gas_left(), 6_500);
        assert!(points.use_points(6_500));
        assert_eq!(m.gas_left(), 0);
        assert!(m.use_gas(1).is_err());
    }

    #[test]
    fn block_gas_limit_is_enforced_on_top_level_calls() {
        let config = GasCostConfig::from_schedule(&GasSchedule::default()).unwrap();
        let mut m = MeteringContext::new(Arc::new(config), 1_000);
        assert!(matches!(
            m.set_up_for_call(2_000, 0, true),
            Err(HostError::BlockGasLimitExceeded)
        ));
        assert!(m.set_up_for_call(2_000, 0, false).is_ok());
    }

    #[test]
    fn push_pop_restores_parent_ledger() {
        let mut m = metering();
        m.set_up_for_call(10_000, 0, true).unwrap();
        let parent_points = m.fork_points_for_instance();
        m.use_gas(1_000).unwrap();

        m.push_state();
        m.set_up_for_call(3_000, 0, false).unwrap();
        let _child_points = m.fork_points_for_instance();
        m.use_gas(3_000).unwrap();
        assert_eq!(m.gas_left(), 0);
        m.pop_discard();

        assert_eq!(m.gas_left(), 9_000);
        assert!(Arc::ptr_eq(
            &parent_points,
            &m.frame.points.clone().unwrap()
        ));
    }

    #[test]
    fn gas_trace_records_per_api_usage() {
        let mut m = metering();
        m.set_up_for_call(10_000, 0, true).unwrap();
        m.set_gas_tracing(true);
        m.set_trace_address(b"contract");
        m.use_gas_traced(10, "finish").unwrap();
        m.use_gas_traced(20, "finish").unwrap();
        let trace = m.gas_trace();
        assert_eq!(trace[b"contract".as_slice()]["finish"], vec![10, 20]);
    }

    #[test]
    fn restore_gas_undoes_forwarded_charge() {
        let mut m = metering();
        m.set_up_for_call(10_000, 0, true).unwrap();
        let _ = m.fork_points_for_instance();
        m.use_gas(4_000).unwrap();
        m.restore_gas(1_500);
        assert_eq!(m.gas_left(), 7_500);
    }
}
