// Path: crates/host/src/host/execution.rs
//! The per-call executor: create/call/upgrade/built-in dispatch, nested
//! execution, and async-call processing.
//!
//! Everything here runs synchronously on the worker thread. The instance is
//! moved out of the runtime context while one of its exports runs, so a
//! nested execution can occupy the instance slot without aliasing the
//! suspended parent.

use num_bigint::BigUint;

use crucible_types::address::Address;
use crucible_types::async_call::{AsyncCall, AsyncCallStatus};
use crucible_types::breakpoint::Breakpoint;
use crucible_types::codec;
use crucible_types::error::{EngineError, HostError};
use crucible_types::input::{CallType, ContractCallInput, ContractCreateInput, VMInput};
use crucible_types::output::{ReturnCode, VMOutput};
use crucible_types::{
    CALLBACK_FUNCTION_NAME, INIT_FUNCTION_NAME, MAX_EXECUTION_DEPTH, UPGRADE_FUNCTION_NAME,
};

use crate::eei::{Eei, EEI_FUNCTION_NAMES};
use super::call_host::CallHost;

/// Suffix of the protected storage key the async context is persisted under.
const ASYNC_CONTEXT_KEY_SUFFIX: &[u8] = b"asyncContext";

/// How a nested execution binds to its caller's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedMode {
    /// The child runs under its own context (its storage, its account).
    DestContext,
    /// The child code runs under the caller's context.
    SameContext,
    /// Destination context with state mutation forbidden.
    ReadOnly,
}

impl CallHost {
    // --- top-level pipelines -------------------------------------------

    /// Deploys a new contract. The returned output carries either the full
    /// effects of `init` or a failure code with no effects.
    pub fn run_create(&mut self, input: &ContractCreateInput) -> VMOutput {
        self.reset_for_call();
        match self.do_run_create(input) {
            Ok(()) => self.collect_output(),
            Err(error) => self.output_from_error(&error),
        }
    }

    fn do_run_create(&mut self, input: &ContractCreateInput) -> Result<(), HostError> {
        self.metering
            .set_up_for_call(input.vm_input.gas_provided, input.vm_input.gas_locked, true)?;

        let address = self.blockchain.new_address(&input.vm_input.caller, &self.output)?;
        if let Some(existing) = self.shared.hook.get_account(&address)? {
            if !existing.code.is_empty() {
                return Err(HostError::AccountCollision);
            }
        }

        self.install_frame(
            input.vm_input.clone(),
            address,
            INIT_FUNCTION_NAME,
            false,
        );

        self.output.transfer_value(
            input.vm_input.caller,
            address,
            &input.vm_input.call_value,
            self.shared.hook.as_ref(),
        )?;

        self.deploy_and_run_init(address, &input.contract_code, &input.contract_code_metadata)?;
        self.process_async_context_calls()?;
        Ok(())
    }

    /// Invokes a function on an existing contract, routing upgrades and
    /// built-in functions to their own pipelines.
    pub fn run_call(&mut self, input: &ContractCallInput) -> VMOutput {
        self.reset_for_call();
        let result = if input.function == UPGRADE_FUNCTION_NAME {
            self.do_run_upgrade(input)
        } else if self.shared.builtins.contains(&input.function) {
            self.do_run_builtin(input)
        } else {
            self.do_run_call(input)
        };
        match result {
            Ok(()) => self.collect_output(),
            Err(error) => self.output_from_error(&error),
        }
    }

    fn do_run_call(&mut self, input: &ContractCallInput) -> Result<(), HostError> {
        self.metering
            .set_up_for_call(input.vm_input.gas_provided, input.vm_input.gas_locked, true)?;

        let code = self.blockchain.get_code(&input.recipient)?;
        self.install_frame(input.vm_input.clone(), input.recipient, &input.function, false);

        self.output.transfer_value(
            input.vm_input.caller,
            input.recipient,
            &input.vm_input.call_value,
            self.shared.hook.as_ref(),
        )?;

        if input.vm_input.call_type == CallType::AsyncCallback {
            self.reload_async_context(&input.recipient)?;
        }

        let warm = self.runtime.is_warm(&code, &self.shared.instance_env());
        self.metering
            .deduct_gas_for_preparation(code.len() as u64, warm)?;
        let points = self.metering.fork_points_for_instance();
        self.runtime
            .start_instance(&code, &self.shared.instance_env(), points, false)?;

        let is_callback = input.vm_input.call_type == CallType::AsyncCallback;
        let function = self
            .runtime
            .function_to_call(&self.shared.reserved, is_callback)?;
        self.call_sc_method(&function)?;
        self.process_async_context_calls()?;
        Ok(())
    }

    fn do_run_upgrade(&mut self, input: &ContractCallInput) -> Result<(), HostError> {
        self.metering
            .set_up_for_call(input.vm_input.gas_provided, input.vm_input.gas_locked, true)?;

        let [new_code, code_metadata] = match input.vm_input.arguments.as_slice() {
            [code, metadata, ..] => [code.clone(), metadata.clone()],
            _ => return Err(HostError::InvalidUpgradeArguments),
        };

        let owner = self.blockchain.get_owner(&input.recipient)?;
        if owner != input.vm_input.caller {
            return Err(HostError::UpgradeFailed);
        }

        self.install_frame(input.vm_input.clone(), input.recipient, INIT_FUNCTION_NAME, false);
        self.output.transfer_value(
            input.vm_input.caller,
            input.recipient,
            &input.vm_input.call_value,
            self.shared.hook.as_ref(),
        )?;

        self.deploy_and_run_init(input.recipient, &new_code, &code_metadata)
            .map_err(|error| match error {
                HostError::ContractInvalid(m) => HostError::ContractInvalid(m),
                HostError::NotEnoughGas => HostError::NotEnoughGas,
                _ => HostError::UpgradeFailed,
            })?;
        Ok(())
    }

    fn do_run_builtin(&mut self, input: &ContractCallInput) -> Result<(), HostError> {
        self.metering
            .set_up_for_call(input.vm_input.gas_provided, input.vm_input.gas_locked, true)?;
        self.install_frame(input.vm_input.clone(), input.recipient, &input.function, false);

        let fragment = self.shared.hook.process_built_in_function(input)?;
        if fragment.return_code != ReturnCode::Ok {
            return Err(HostError::ExecutionFailed(fragment.return_message));
        }
        let gas_used = input
            .vm_input
            .gas_provided
            .saturating_sub(fragment.gas_remaining);
        self.metering.use_gas(gas_used)?;
        self.output.merge_vm_output(&fragment);

        // A transfer-and-execute built-in continues into a contract call on
        // the destination.
        let parsed = self.shared.transfer_parser.parse_token_transfers(
            &input.vm_input.caller,
            &input.recipient,
            &input.function,
            &input.vm_input.arguments,
        )?;
        if let Some(parsed) = parsed {
            if !parsed.call_function.is_empty()
                && self.blockchain.is_smart_contract(&parsed.destination)
            {
                let nested = ContractCallInput {
                    vm_input: VMInput {
                        caller: parsed.sender,
                        arguments: parsed.call_args.clone(),
                        token_transfers: parsed.transfers.clone(),
                        gas_provided: self.metering.gas_left(),
                        call_type: CallType::ExecOnDestCtx,
                        current_tx_hash: input.vm_input.current_tx_hash.clone(),
                        original_tx_hash: input.vm_input.original_tx_hash.clone(),
                        prev_tx_hash: input.vm_input.prev_tx_hash.clone(),
                        ..VMInput::default()
                    },
                    recipient: parsed.destination,
                    function: parsed.call_function.clone(),
                };
                let child_code = self.execute_nested(&nested, NestedMode::DestContext);
                if child_code != ReturnCode::Ok {
                    return Err(HostError::ExecutionFailed(format!(
                        "built-in forwarded call failed with {child_code:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    // --- shared pipeline pieces ----------------------------------------

    fn install_frame(
        &mut self,
        vm_input: VMInput,
        sc_address: Address,
        function: &str,
        read_only: bool,
    ) {
        self.runtime.set_vm_input(vm_input);
        self.runtime.set_sc_address(sc_address);
        self.runtime.set_function(function);
        self.runtime.set_read_only(read_only);
        self.storage.set_address(sc_address);
        self.metering.set_trace_address(sc_address.as_bytes());
    }

    fn deploy_and_run_init(
        &mut self,
        address: Address,
        code: &[u8],
        code_metadata: &[u8],
    ) -> Result<(), HostError> {
        if code.is_empty() {
            return Err(HostError::ContractInvalid("empty code".to_string()));
        }
        self.metering.deduct_gas_for_deployment(code.len() as u64)?;
        self.metering
            .deduct_gas_for_preparation(code.len() as u64, false)?;
        let points = self.metering.fork_points_for_instance();
        self.runtime
            .start_instance(code, &self.shared.instance_env(), points, true)?;
        self.runtime.verify_contract_code(
            EEI_FUNCTION_NAMES,
            &self.shared.reserved,
            self.shared.config.max_memory_pages,
        )?;

        self.call_sc_method(INIT_FUNCTION_NAME)?;
        self.output.deploy_code(
            address,
            code.to_vec(),
            code_metadata.to_vec(),
            self.runtime.vm_input().caller,
        );
        Ok(())
    }

    /// Drives one exported function of the current instance and interprets
    /// the breakpoint the engine stopped on.
    pub(crate) fn call_sc_method(&mut self, function: &str) -> Result<(), HostError> {
        let mut instance = self.runtime.take_instance()?;
        if !instance.has_export(function) {
            self.runtime.put_instance(instance);
            return Err(HostError::FunctionNotFound);
        }

        let trap = {
            let mut eei = Eei::new(self);
            instance.call_export(function, &mut eei)
        };
        self.runtime.put_instance(instance);

        match self.runtime.breakpoint() {
            Breakpoint::None => trap.map_err(|e| match e {
                EngineError::ExportNotFound(_) => HostError::FunctionNotFound,
                EngineError::Trap(message) => HostError::ExecutionFailed(message),
                other => HostError::ExecutionFailed(other.to_string()),
            }),
            Breakpoint::AsyncCall => {
                self.runtime.set_breakpoint(Breakpoint::None);
                self.process_async_call()
            }
            Breakpoint::OutOfGas => Err(HostError::NotEnoughGas),
            Breakpoint::SignalError | Breakpoint::ExecutionFailed => {
                Err(self.take_fail_reason())
            }
        }
    }

    fn take_fail_reason(&mut self) -> HostError {
        self.runtime
            .fail_reason()
            .cloned()
            .unwrap_or_else(|| HostError::ExecutionFailed("breakpoint without reason".to_string()))
    }

    // --- nested execution ----------------------------------------------

    /// Runs a nested contract call, committing on success and rolling the
    /// child's effects back on failure. The caller observes the child's
    /// return code and proceeds either way.
    pub(crate) fn execute_nested(
        &mut self,
        input: &ContractCallInput,
        mode: NestedMode,
    ) -> ReturnCode {
        match self.do_execute_nested(input, mode) {
            Ok(()) => ReturnCode::Ok,
            Err(error) => {
                let code = error.return_code(self.shared.epochs.fix_oog_return_code());
                self.runtime.add_error(error, "");
                code
            }
        }
    }

    fn do_execute_nested(
        &mut self,
        input: &ContractCallInput,
        mode: NestedMode,
    ) -> Result<(), HostError> {
        if self.runtime.stack_depth() >= MAX_EXECUTION_DEPTH {
            return Err(HostError::CallStackOverflow);
        }

        // The transfer to the callee belongs to the caller's frame: it
        // survives a failed child execution.
        if mode != NestedMode::ReadOnly {
            self.output.transfer_value(
                input.vm_input.caller,
                input.recipient,
                &input.vm_input.call_value,
                self.shared.hook.as_ref(),
            )?;
        }

        // Forwarded gas leaves the caller up front; the unused remainder
        // returns only on success.
        self.metering.use_gas(input.vm_input.gas_provided)?;

        self.push_all_states();
        let result = self.run_nested_frame(input, mode);
        match result {
            Ok(()) => {
                let child_gas_left = self.metering.gas_left();
                self.pop_all_commit();
                self.metering.restore_gas(child_gas_left);
                Ok(())
            }
            Err(error) => {
                self.pop_all_discard();
                self.runtime.set_breakpoint(Breakpoint::None);
                Err(error)
            }
        }
    }

    fn run_nested_frame(
        &mut self,
        input: &ContractCallInput,
        mode: NestedMode,
    ) -> Result<(), HostError> {
        self.metering
            .set_up_for_call(input.vm_input.gas_provided, input.vm_input.gas_locked, false)?;

        if input.function == UPGRADE_FUNCTION_NAME {
            return self.run_nested_upgrade(input);
        }

        let code = self.blockchain.get_code(&input.recipient)?;
        let context_address = match mode {
            // Same-context children run the callee's code against the
            // caller's account and storage.
            NestedMode::SameContext => self.runtime.sc_address(),
            NestedMode::DestContext | NestedMode::ReadOnly => input.recipient,
        };
        self.install_frame(
            input.vm_input.clone(),
            context_address,
            &input.function,
            mode == NestedMode::ReadOnly,
        );

        let warm = self.runtime.is_warm(&code, &self.shared.instance_env());
        self.metering
            .deduct_gas_for_preparation(code.len() as u64, warm)?;
        let points = self.metering.fork_points_for_instance();
        self.runtime
            .start_instance(&code, &self.shared.instance_env(), points, false)?;

        let is_callback = input.vm_input.call_type == CallType::AsyncCallback;
        let function = self
            .runtime
            .function_to_call(&self.shared.reserved, is_callback)?;
        self.call_sc_method(&function)?;
        self.process_async_context_calls()?;
        Ok(())
    }

    fn run_nested_upgrade(&mut self, input: &ContractCallInput) -> Result<(), HostError> {
        let [new_code, code_metadata] = match input.vm_input.arguments.as_slice() {
            [code, metadata, ..] => [code.clone(), metadata.clone()],
            _ => return Err(HostError::InvalidUpgradeArguments),
        };
        let owner = self.blockchain.get_owner(&input.recipient)?;
        if owner != input.vm_input.caller {
            return Err(HostError::UpgradeFailed);
        }
        self.install_frame(input.vm_input.clone(), input.recipient, INIT_FUNCTION_NAME, false);
        self.deploy_and_run_init(input.recipient, &new_code, &code_metadata)
            .map_err(|error| match error {
                HostError::ContractInvalid(m) => HostError::ContractInvalid(m),
                HostError::NotEnoughGas => HostError::NotEnoughGas,
                _ => HostError::UpgradeFailed,
            })
    }

    /// Deploys a new contract from within an execution
    /// (`deployFromSourceContract`). Returns the new contract's address.
    pub(crate) fn execute_nested_create(
        &mut self,
        input: &ContractCreateInput,
    ) -> Result<Address, HostError> {
        if self.runtime.stack_depth() >= MAX_EXECUTION_DEPTH {
            return Err(HostError::CallStackOverflow);
        }
        let address = self.blockchain.new_address(&input.vm_input.caller, &self.output)?;

        self.metering.use_gas(input.vm_input.gas_provided)?;
        self.push_all_states();
        let result = (|| -> Result<(), HostError> {
            self.metering
                .set_up_for_call(input.vm_input.gas_provided, 0, false)?;
            self.install_frame(input.vm_input.clone(), address, INIT_FUNCTION_NAME, false);
            self.output.transfer_value(
                input.vm_input.caller,
                address,
                &input.vm_input.call_value,
                self.shared.hook.as_ref(),
            )?;
            self.deploy_and_run_init(address, &input.contract_code, &input.contract_code_metadata)
        })();

        match result {
            Ok(()) => {
                let child_gas_left = self.metering.gas_left();
                self.pop_all_commit();
                self.metering.restore_gas(child_gas_left);
                Ok(address)
            }
            Err(error) => {
                self.pop_all_discard();
                self.runtime.set_breakpoint(Breakpoint::None);
                Err(error)
            }
        }
    }

    // --- async calls ---------------------------------------------------

    /// Handles the `AsyncCall` breakpoint: the single call armed by
    /// `asyncCall` is executed locally when the destination shares the
    /// caller's shard, otherwise the context is persisted and the transfer
    /// recorded for the protocol to route.
    fn process_async_call(&mut self) -> Result<(), HostError> {
        let call = match self.runtime.take_async_call_info() {
            Some(call) => call,
            None => return Ok(()),
        };
        self.dispatch_async_call(&call)
    }

    /// Dispatches every pending call registered in the async context tree
    /// after the contract's own execution finished.
    fn process_async_context_calls(&mut self) -> Result<(), HostError> {
        if self.runtime.async_context().is_empty() {
            return Ok(());
        }
        let calls: Vec<AsyncCall> = self
            .runtime
            .async_context()
            .call_groups
            .iter()
            .flat_map(|group| group.calls.iter())
            .filter(|call| call.status == AsyncCallStatus::Pending)
            .cloned()
            .collect();
        for call in calls {
            self.dispatch_async_call(&call)?;
        }
        for group in &mut self.runtime.async_context_mut().call_groups {
            for call in &mut group.calls {
                if call.status == AsyncCallStatus::Pending {
                    call.status = AsyncCallStatus::Resolved;
                }
            }
        }
        Ok(())
    }

    fn dispatch_async_call(&mut self, call: &AsyncCall) -> Result<(), HostError> {
        let sc_address = self.runtime.sc_address();
        let value = BigUint::from_bytes_be(&call.value_bytes);
        let same_shard = self.blockchain.in_same_shard(&sc_address, &call.destination);

        if same_shard && self.blockchain.is_smart_contract(&call.destination) {
            let (function, arguments) = parse_call_data(&call.data)?;
            let input = ContractCallInput {
                vm_input: VMInput {
                    caller: sc_address,
                    arguments,
                    call_value: value,
                    gas_provided: call.gas_limit,
                    call_type: CallType::Async,
                    current_tx_hash: self.runtime.vm_input().current_tx_hash.clone(),
                    original_tx_hash: self.runtime.vm_input().original_tx_hash.clone(),
                    prev_tx_hash: self.runtime.vm_input().prev_tx_hash.clone(),
                    ..VMInput::default()
                },
                recipient: call.destination,
                function,
            };
            let destination_code = self.execute_nested(&input, NestedMode::DestContext);
            // The callback always runs, with the gas locked for it.
            self.execute_callback(call, destination_code)
        } else {
            // Suspension: the call must appear in the persisted context so
            // the callback shard can locate its callbacks and locked gas.
            let registered = self
                .runtime
                .async_context()
                .call_groups
                .iter()
                .any(|group| group.calls.iter().any(|c| c == call));
            if !registered {
                self.runtime.add_async_context_call(b"legacy", call.clone());
            }
            self.persist_async_context()?;
            self.output.transfer(
                call.destination,
                sc_address,
                call.gas_limit,
                call.gas_locked,
                &value,
                &call.data,
                CallType::Async,
                self.shared.hook.as_ref(),
            )
        }
    }

    fn execute_callback(
        &mut self,
        call: &AsyncCall,
        destination_code: ReturnCode,
    ) -> Result<(), HostError> {
        let callback_bytes = if destination_code == ReturnCode::Ok {
            &call.success_callback
        } else {
            &call.error_callback
        };
        let callback = if callback_bytes.is_empty() {
            CALLBACK_FUNCTION_NAME.to_string()
        } else {
            String::from_utf8(callback_bytes.clone())
                .map_err(|_| HostError::ArgumentDecode("callback name".to_string()))?
        };

        let sc_address = self.runtime.sc_address();
        let input = ContractCallInput {
            vm_input: VMInput {
                caller: call.destination,
                arguments: vec![vec![destination_code as u8]],
                gas_provided: call.gas_locked,
                call_type: CallType::AsyncCallback,
                current_tx_hash: self.runtime.vm_input().current_tx_hash.clone(),
                original_tx_hash: self.runtime.vm_input().original_tx_hash.clone(),
                prev_tx_hash: self.runtime.vm_input().prev_tx_hash.clone(),
                ..VMInput::default()
            },
            recipient: sc_address,
            function: callback,
        };
        let callback_code = self.execute_nested(&input, NestedMode::DestContext);
        if callback_code != ReturnCode::Ok {
            log::debug!(target: "vm", "async callback failed with {callback_code:?}");
        }
        Ok(())
    }

    /// Serializes the async context tree into the protected storage region
    /// of the calling contract.
    fn persist_async_context(&mut self) -> Result<(), HostError> {
        if self.runtime.async_context().is_empty() {
            return Ok(());
        }
        let key = self.async_context_key();
        let value = codec::to_bytes_canonical(self.runtime.async_context())
            .map_err(HostError::ArgumentDecode)?;
        self.storage
            .set_protected_storage(&key, &value, &mut self.output, self.shared.hook.as_ref())
    }

    /// Reloads a persisted async context when its callback arrives, and
    /// clears the stored entry.
    fn reload_async_context(&mut self, sc_address: &Address) -> Result<(), HostError> {
        let key = self.async_context_key();
        let stored = self.shared.hook.get_storage_data(sc_address, &key)?;
        if stored.is_empty() {
            return Ok(());
        }
        let context = codec::from_bytes_canonical(&stored).map_err(HostError::ArgumentDecode)?;
        *self.runtime.async_context_mut() = context;
        self.storage
            .set_protected_storage(&key, &[], &mut self.output, self.shared.hook.as_ref())
    }

    fn async_context_key(&self) -> Vec<u8> {
        let mut key = self.shared.config.protected_key_prefix.clone();
        key.extend_from_slice(ASYNC_CONTEXT_KEY_SUFFIX);
        key.extend_from_slice(&self.runtime.vm_input().original_tx_hash);
        key
    }
}

/// Parses standard call data: `function@hexArg1@hexArg2@…`.
pub(crate) fn parse_call_data(data: &[u8]) -> Result<(String, Vec<Vec<u8>>), HostError> {
    let mut parts = data.split(|&b| b == b'@');
    let function = parts
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| HostError::ArgumentDecode("empty call data".to_string()))?;
    let function = String::from_utf8(function.to_vec())
        .map_err(|_| HostError::ArgumentDecode("function name is not UTF-8".to_string()))?;
    let arguments = parts
        .map(|part| {
            hex::decode(part)
                .map_err(|_| HostError::ArgumentDecode("argument is not hex".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((function, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_data_parses_function_and_hex_args() {
        let (function, args) = parse_call_data(b"doSomething@2a@beef").unwrap();
        assert_eq!(function, "doSomething");
        assert_eq!(args, vec![vec![0x2a], vec![0xbe, 0xef]]);
    }

    #[test]
    fn call_data_without_args_is_just_a_function() {
        let (function, args) = parse_call_data(b"transfer").unwrap();
        assert_eq!(function, "transfer");
        assert!(args.is_empty());
    }

    #[test]
    fn bad_hex_is_a_decode_error() {
        assert!(parse_call_data(b"f@zz").is_err());
        assert!(parse_call_data(b"").is_err());
    }
}
