// Path: crates/host/src/host/call_host.rs
//! The per-call context bundle.
//!
//! One `CallHost` is built per top-level execution and owns the six contexts
//! for its duration; the only state it shares with concurrent calls is the
//! warm instance cache. Contexts never reference each other — everything
//! that needs a sibling receives it as a parameter from here or from the
//! EEI layer.

use std::sync::Arc;

use crucible_api::blockchain::BlockchainHook;
use crucible_api::builtin::{BuiltinFunctionContainer, TokenTransferParser};
use crucible_api::crypto::VMCrypto;
use crucible_api::engine::WasmEngine;
use crucible_api::epochs::EnableEpochsHandler;
use crucible_types::breakpoint::{Breakpoint, BreakpointCell};
use crucible_types::config::HostConfig;
use crucible_types::error::HostError;
use crucible_types::gas::GasCostConfig;
use crucible_types::output::{ReturnCode, VMOutput};

use crate::cache::WarmInstanceCache;
use crate::contexts::{
    BlockchainContext, InstanceEnv, ManagedTypesContext, MeteringContext, OutputContext,
    ReservedFunctions, RuntimeContext, StorageContext,
};

/// The host-wide collaborators a call borrows for its duration.
#[derive(Clone)]
pub struct CallShared {
    /// The blockchain hook.
    pub hook: Arc<dyn BlockchainHook>,
    /// The WASM engine.
    pub engine: Arc<dyn WasmEngine>,
    /// The crypto hook.
    pub crypto: Arc<dyn VMCrypto>,
    /// Feature-flag queries.
    pub epochs: Arc<dyn EnableEpochsHandler>,
    /// Built-in function names.
    pub builtins: Arc<dyn BuiltinFunctionContainer>,
    /// Token-transfer argument parsing.
    pub transfer_parser: Arc<dyn TokenTransferParser>,
    /// The reserved-function set.
    pub reserved: Arc<ReservedFunctions>,
    /// The shared warm cache.
    pub warm_cache: Arc<WarmInstanceCache>,
    /// Host construction parameters.
    pub config: Arc<HostConfig>,
    /// The compiled gas cost tables in force for this call.
    pub gas_config: Arc<GasCostConfig>,
}

impl CallShared {
    /// The bundle `start_instance` needs. Lives on the shared half so the
    /// runtime context can be borrowed mutably alongside it.
    pub fn instance_env(&self) -> InstanceEnv<'_> {
        InstanceEnv {
            engine: self.engine.as_ref(),
            warm_cache: self.warm_cache.as_ref(),
            hook: self.hook.as_ref(),
            schedule_hash: self.gas_config.schedule_hash,
            max_memory_pages: self.config.max_memory_pages,
        }
    }
}

/// The full per-call state: the six contexts plus shared collaborators.
pub struct CallHost {
    /// Host-wide collaborators.
    pub shared: CallShared,
    /// Instance lifecycle, breakpoints, errors, async bookkeeping.
    pub runtime: RuntimeContext,
    /// The gas ledger.
    pub metering: MeteringContext,
    /// The accumulating output.
    pub output: OutputContext,
    /// Storage policy.
    pub storage: StorageContext,
    /// The managed-types arena.
    pub managed: ManagedTypesContext,
    /// The window onto chain state.
    pub blockchain: BlockchainContext,
}

impl CallHost {
    /// Builds the contexts for one call.
    pub fn new(shared: CallShared) -> Self {
        let blockchain = BlockchainContext::new(shared.hook.clone(), shared.config.vm_type);
        let metering = MeteringContext::new(shared.gas_config.clone(), shared.config.block_gas_limit);
        let storage = StorageContext::new(shared.config.protected_key_prefix.clone());
        Self {
            runtime: RuntimeContext::new(shared.config.max_warm_instances as u64 * 2),
            metering,
            output: OutputContext::new(),
            storage,
            managed: ManagedTypesContext::new(),
            blockchain,
            shared,
        }
    }

    /// Resets every context and installs the supervisor's breakpoint cell.
    /// Context state stacks are empty afterwards — the pre-call checkpoint.
    pub fn init_state(&mut self, breakpoints: Arc<BreakpointCell>) {
        breakpoints.set(Breakpoint::None);
        self.runtime.init_state(breakpoints);
        self.metering.init_state();
        self.output.init_state();
        self.storage.init_state();
        self.managed.init_state();
    }

    /// Re-initializes every context for a fresh top-level execution, keeping
    /// the supervisor's breakpoint cell.
    pub(crate) fn reset_for_call(&mut self) {
        let breakpoints = self.runtime.breakpoint_cell();
        self.init_state(breakpoints);
    }

    /// True when every context's state stack is empty — asserted at the
    /// pre-call and post-call checkpoints.
    pub fn state_stacks_balanced(&self) -> bool {
        self.runtime.stack_depth() == 0
            && self.metering.stack_depth() == 0
            && self.output.stack_depth() == 0
            && self.storage.stack_depth() == 0
            && self.managed.stack_depth() == 0
    }

    /// Pushes every context's state for a nested execution.
    pub fn push_all_states(&mut self) {
        self.runtime.push_state();
        self.metering.push_state();
        self.output.push_state();
        self.storage.push_state();
        self.managed.push_state();
    }

    /// Commits a successful nested execution: the child's output merges into
    /// the parent, child managed handles stay live, everything else restores
    /// the parent frame.
    pub fn pop_all_commit(&mut self) {
        self.runtime.pop_set_active();
        self.metering.pop_set_active();
        self.output.pop_merge_active();
        self.storage.pop_set_active();
        self.managed.pop_set_active();
    }

    /// Rolls back a failed nested execution wholesale.
    pub fn pop_all_discard(&mut self) {
        self.runtime.pop_discard();
        self.metering.pop_discard();
        self.output.pop_discard();
        self.storage.pop_discard();
        self.managed.pop_discard();
    }

    /// Clears every context's state stack.
    pub fn clear_state_stacks(&mut self) {
        self.runtime.clear_state_stack();
        self.metering.clear_state_stack();
        self.output.clear_state_stack();
        self.storage.clear_state_stack();
        self.managed.clear_state_stack();
    }

    /// Applies the EEI error policy: gas exhaustion arms `OutOfGas`,
    /// user-class errors arm `SignalError` (unless the
    /// fail-on-every-API-error flag upgrades them), everything else arms
    /// `ExecutionFailed`. A breakpoint already armed by the handler wins.
    pub fn on_eei_error(&mut self, api_name: &str, error: &HostError) {
        if self.runtime.breakpoint() != Breakpoint::None {
            self.runtime.add_error(error.clone(), "");
            return;
        }
        match error {
            HostError::NotEnoughGas => self.runtime.fail_execution(HostError::NotEnoughGas),
            err if err.return_code(true) == ReturnCode::UserError => {
                if self.shared.epochs.fail_execution_on_every_api_error() {
                    self.runtime.fail_execution(err.clone());
                } else {
                    self.runtime.signal_user_error(&err.to_string());
                }
                log::trace!(target: "vm", "EEI {api_name} rejected: {err}");
            }
            err => self.runtime.fail_execution(err.clone()),
        }
    }

    /// Materializes the success-path output of the call.
    pub fn collect_output(&self) -> VMOutput {
        self.output.get_vm_output(
            self.metering.gas_left(),
            self.metering.gas_refund(),
            self.shared.epochs.remove_non_updated_storage(),
        )
    }

    /// Materializes the failure-path output: no effects survive, all gas is
    /// consumed, and the return code follows the error taxonomy.
    pub fn output_from_error(&mut self, error: &HostError) -> VMOutput {
        let return_code = error.return_code(self.shared.epochs.fix_oog_return_code());
        let message = match error {
            HostError::SignalError(msg) => msg.clone(),
            other => other.to_string(),
        };
        self.runtime.add_error(error.clone(), "");
        self.output.set_from_failure(return_code, &message);
        VMOutput::from_failure(return_code, &message)
    }
}
