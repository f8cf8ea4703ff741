// Path: crates/host/src/host/mod.rs
//! The host entry points and the per-call executor.
//!
//! [`Host`] is created once per process and serves concurrent `run_create` /
//! `run_call` invocations, each on its own blocking worker with its own
//! [`CallHost`]. The host-wide read/write lock admits executions in shared
//! mode; `close`, `reset` and `gas_schedule_change` take it exclusively, so
//! no execution ever observes a torn schedule or a closing host.

mod call_host;
mod execution;

pub use call_host::{CallHost, CallShared};
pub use execution::NestedMode;

use std::collections::HashSet;
use std::sync::Arc;

use crucible_api::blockchain::BlockchainHook;
use crucible_api::builtin::{
    BuiltinFunctionContainer, EmptyBuiltinContainer, NoTokenTransfers, TokenTransferParser,
};
use crucible_api::crypto::VMCrypto;
use crucible_api::engine::WasmEngine;
use crucible_api::epochs::{EnableEpochsHandler, EpochNotifier, EpochSubscriber};
use crucible_types::address::Address;
use crucible_types::breakpoint::{Breakpoint, BreakpointCell};
use crucible_types::config::{EnableEpochs, HostConfig};
use crucible_types::error::{GasScheduleError, HostError};
use crucible_types::gas::{GasCostConfig, GasSchedule};
use crucible_types::input::{ContractCallInput, ContractCreateInput};
use crucible_types::output::{LogEntry, VMOutput};
use crucible_types::INTERNAL_VM_ERRORS_LOG_ID;

use crate::cache::WarmInstanceCache;
use crate::contexts::ReservedFunctions;
use crate::crypto::DefaultCrypto;
use crate::eei::EEI_FUNCTION_NAMES;

/// Construction parameters for [`Host::new`].
pub struct HostParams {
    /// Host configuration (vm type, limits, protected prefix, timeout).
    pub config: HostConfig,
    /// The initial gas schedule.
    pub gas_schedule: GasSchedule,
    /// Feature-activation epochs, for cache invalidation.
    pub enable_epochs: EnableEpochs,
    /// Built-in function names; defaults to the empty container.
    pub builtins: Option<Arc<dyn BuiltinFunctionContainer>>,
    /// Token-transfer parsing; defaults to recognizing none.
    pub transfer_parser: Option<Arc<dyn TokenTransferParser>>,
    /// Crypto hook; defaults to [`DefaultCrypto`].
    pub crypto: Option<Arc<dyn VMCrypto>>,
}

struct HostGuarded {
    closing: bool,
    gas_schedule: GasSchedule,
    gas_config: Arc<GasCostConfig>,
}

/// The execution host.
pub struct Host {
    hook: Arc<dyn BlockchainHook>,
    engine: Arc<dyn WasmEngine>,
    crypto: Arc<dyn VMCrypto>,
    epochs: Arc<dyn EnableEpochsHandler>,
    builtins: Arc<dyn BuiltinFunctionContainer>,
    transfer_parser: Arc<dyn TokenTransferParser>,
    reserved: Arc<ReservedFunctions>,
    warm_cache: Arc<WarmInstanceCache>,
    config: Arc<HostConfig>,
    guarded: Arc<tokio::sync::RwLock<HostGuarded>>,
    activation_epochs: HashSet<u32>,
}

impl Host {
    /// Builds a host, compiles the gas schedule, programs the engine's
    /// opcode costs and registers for epoch notifications.
    pub fn new(
        hook: Arc<dyn BlockchainHook>,
        engine: Arc<dyn WasmEngine>,
        epochs_handler: Arc<dyn EnableEpochsHandler>,
        epoch_notifier: &dyn EpochNotifier,
        params: HostParams,
    ) -> Result<Arc<Self>, HostError> {
        let gas_config = GasCostConfig::from_schedule(&params.gas_schedule)
            .map_err(|e| HostError::ExecutionFailed(e.to_string()))?;
        engine.set_opcode_costs(&gas_config.opcodes);

        let host = Arc::new(Self {
            hook,
            engine,
            crypto: params.crypto.unwrap_or_else(|| Arc::new(DefaultCrypto::new())),
            epochs: epochs_handler,
            builtins: params
                .builtins
                .unwrap_or_else(|| Arc::new(EmptyBuiltinContainer)),
            transfer_parser: params
                .transfer_parser
                .unwrap_or_else(|| Arc::new(NoTokenTransfers)),
            reserved: Arc::new(ReservedFunctions::new(EEI_FUNCTION_NAMES)),
            warm_cache: Arc::new(WarmInstanceCache::new(params.config.max_warm_instances)),
            config: Arc::new(params.config),
            guarded: Arc::new(tokio::sync::RwLock::new(HostGuarded {
                closing: false,
                gas_schedule: params.gas_schedule,
                gas_config: Arc::new(gas_config),
            })),
            activation_epochs: params.enable_epochs.activation_epochs().into_iter().collect(),
        });

        epoch_notifier.register_handler(host.clone());
        Ok(host)
    }

    /// The host's version string.
    pub fn version(&self) -> &'static str {
        concat!("crucible/", env!("CARGO_PKG_VERSION"))
    }

    /// True when both addresses map to the same shard.
    pub fn are_in_same_shard(&self, left: &Address, right: &Address) -> bool {
        self.hook.shard_of_address(left) == self.hook.shard_of_address(right)
    }

    /// The gas schedule currently in force.
    pub async fn gas_schedule(&self) -> GasSchedule {
        self.guarded.read().await.gas_schedule.clone()
    }

    /// Deploys a new contract under supervision.
    pub async fn run_create(&self, input: ContractCreateInput) -> Result<VMOutput, HostError> {
        log::trace!(
            target: "vm",
            "run_create begin: code_len={} gas_provided={} gas_locked={}",
            input.contract_code.len(),
            input.vm_input.gas_provided,
            input.vm_input.gas_locked
        );
        let caller = input.vm_input.caller;
        self.supervise(move |call_host| {
            let output = call_host.run_create(&input);
            (output, caller, caller, "_init".to_string())
        })
        .await
    }

    /// Invokes a contract function under supervision.
    pub async fn run_call(&self, input: ContractCallInput) -> Result<VMOutput, HostError> {
        log::trace!(
            target: "vm",
            "run_call begin: function={} gas_provided={} gas_locked={}",
            input.function,
            input.vm_input.gas_provided,
            input.vm_input.gas_locked
        );
        let caller = input.vm_input.caller;
        let recipient = input.recipient;
        let function = input.function.clone();
        self.supervise(move |call_host| {
            let output = call_host.run_call(&input);
            (output, caller, recipient, function)
        })
        .await
    }

    /// Runs one execution on a supervised worker: shared lock, timeout with
    /// cooperative cancellation, panic barrier, error-log synthesis.
    async fn supervise<F>(&self, work: F) -> Result<VMOutput, HostError>
    where
        F: FnOnce(&mut CallHost) -> (VMOutput, Address, Address, String) + Send + 'static,
    {
        let guard = self.guarded.clone().read_owned().await;
        if guard.closing {
            return Err(HostError::VMIsClosing);
        }

        let shared = CallShared {
            hook: self.hook.clone(),
            engine: self.engine.clone(),
            crypto: self.crypto.clone(),
            epochs: self.epochs.clone(),
            builtins: self.builtins.clone(),
            transfer_parser: self.transfer_parser.clone(),
            reserved: self.reserved.clone(),
            warm_cache: self.warm_cache.clone(),
            config: self.config.clone(),
            gas_config: guard.gas_config.clone(),
        };

        let breakpoints = Arc::new(BreakpointCell::new());
        let cell = breakpoints.clone();
        let interrupt = self.engine.interrupt_handle();
        let timeout = self.config.execution_timeout();

        let mut handle = tokio::task::spawn_blocking(move || {
            // The read guard rides with the worker so an exclusive close
            // waits for in-flight executions even past a supervisor timeout.
            let _lock = guard;
            let mut call_host = CallHost::new(shared);
            call_host.init_state(breakpoints);
            debug_assert!(call_host.state_stacks_balanced());

            if log::log_enabled!(target: "gas_trace", log::Level::Trace) {
                call_host.metering.set_gas_tracing(true);
            }

            let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work(&mut call_host)));
            let (mut output, log_sender, log_receiver, function) = match run {
                Ok(result) => result,
                Err(payload) => {
                    call_host.runtime.clean_instance();
                    std::panic::resume_unwind(payload);
                }
            };

            debug_assert!(call_host.state_stacks_balanced());
            if let Some(errors) = call_host.runtime.formatted_errors() {
                output.logs.push(LogEntry {
                    identifier: INTERNAL_VM_ERRORS_LOG_ID.as_bytes().to_vec(),
                    address: log_sender,
                    topics: vec![log_receiver.as_bytes().to_vec(), function.clone().into_bytes()],
                    data: errors.into_bytes(),
                });
            }

            log_gas_trace(&call_host, &function);
            call_host.runtime.clean_instance();

            log::trace!(
                target: "vm",
                "execution end: return_code={:?} gas_remaining={}",
                output.return_code,
                output.gas_remaining
            );
            output
        });

        let supervised = tokio::time::timeout(timeout, &mut handle).await;
        match supervised {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(join_error)) => {
                log::error!(
                    target: "vm",
                    "VM execution panicked: {join_error}\n{}",
                    std::backtrace::Backtrace::force_capture()
                );
                Err(HostError::ExecutionPanicked)
            }
            Err(_elapsed) => {
                // Cancellation is cooperative: arm the breakpoint, kick the
                // engine, then drain the worker. The engine cannot be killed
                // mid-instruction without poisoning its linear memory.
                cell.set(Breakpoint::ExecutionFailed);
                interrupt.interrupt();
                let _ = handle.await;
                Err(HostError::ExecutionFailedWithTimeout)
            }
        }
    }

    /// Closes the host: subsequent executions fail with `VMIsClosing`;
    /// in-flight executions complete first.
    pub async fn close(&self) {
        let mut guard = self.guarded.write().await;
        guard.closing = true;
        self.warm_cache.clear();
    }

    /// Restores the host to its post-construction state.
    pub async fn reset(&self) {
        let mut guard = self.guarded.write().await;
        guard.closing = false;
        self.warm_cache.clear();
    }

    /// Applies a new gas schedule: recompiles the cost tables, reprograms
    /// the engine and purges the warm cache under the exclusive lock.
    pub async fn gas_schedule_change(&self, schedule: GasSchedule) -> Result<(), GasScheduleError> {
        let gas_config = GasCostConfig::from_schedule(&schedule)?;
        let mut guard = self.guarded.write().await;
        self.engine.set_opcode_costs(&gas_config.opcodes);
        guard.gas_schedule = schedule;
        guard.gas_config = Arc::new(gas_config);
        self.warm_cache.clear();
        Ok(())
    }

    /// Number of modules currently in the warm cache. Test observability.
    pub fn warm_cache_len(&self) -> usize {
        self.warm_cache.len()
    }
}

impl EpochSubscriber for Host {
    fn epoch_confirmed(&self, epoch: u32, _timestamp: u64) {
        if self.activation_epochs.contains(&epoch) {
            log::debug!(target: "vm", "activation epoch {epoch}: purging caches");
            self.warm_cache.clear();
            self.hook.clear_compiled_codes();
        }
    }
}

fn log_gas_trace(call_host: &CallHost, function: &str) {
    if !call_host.metering.is_gas_tracing() {
        return;
    }
    for (sc_address, trace) in call_host.metering.gas_trace() {
        let mut total_for_apis = 0u64;
        for (api_name, values) in trace {
            let total: u64 = values.iter().sum();
            total_for_apis += total;
            log::trace!(
                target: "gas_trace",
                "address={} function={} api={} total_gas={} calls={}",
                hex::encode(sc_address),
                function,
                api_name,
                total,
                values.len()
            );
        }
        log::trace!(
            target: "gas_trace",
            "address={} function={} total_gas_by_apis={}",
            hex::encode(sc_address),
            function,
            total_for_apis
        );
    }
}

/// Builders shared by this crate's tests and the integration suite.
pub mod testing {
    use super::*;
    use crucible_api::test_utils::{MockEngine, MockWorld, StubEnableEpochs};

    /// A [`CallHost`] wired to mocks, with contexts initialized.
    pub fn call_host_for_tests(
        world: Arc<MockWorld>,
        engine: Arc<MockEngine>,
        epochs: Arc<StubEnableEpochs>,
    ) -> CallHost {
        call_host_with_config(world, engine, epochs, HostConfig::default(), GasSchedule::default())
    }

    /// A [`CallHost`] wired to mocks with explicit configuration.
    pub fn call_host_with_config(
        world: Arc<MockWorld>,
        engine: Arc<MockEngine>,
        epochs: Arc<StubEnableEpochs>,
        config: HostConfig,
        gas_schedule: GasSchedule,
    ) -> CallHost {
        let gas_config =
            GasCostConfig::from_schedule(&gas_schedule).unwrap_or_else(|_| {
                GasCostConfig::from_schedule(&GasSchedule::default())
                    .unwrap_or_else(|_| unreachable!("default schedule compiles"))
            });
        let shared = CallShared {
            hook: world,
            engine,
            crypto: Arc::new(DefaultCrypto::new()),
            epochs,
            builtins: Arc::new(EmptyBuiltinContainer),
            transfer_parser: Arc::new(NoTokenTransfers),
            reserved: Arc::new(ReservedFunctions::new(EEI_FUNCTION_NAMES)),
            warm_cache: Arc::new(WarmInstanceCache::new(config.max_warm_instances)),
            config: Arc::new(config),
            gas_config: Arc::new(gas_config),
        };
        let mut call_host = CallHost::new(shared);
        call_host.init_state(Arc::new(BreakpointCell::new()));
        call_host
    }
}
