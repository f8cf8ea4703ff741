// Path: crates/host/tests/executor_tests.rs
//! Executor behavior: deployment, failure taxonomy, reserved names,
//! read-only enforcement, async dispatch and state-stack balance.

use num_bigint::BigInt;
use std::sync::Arc;

use crucible_api::engine::WasmValue;
use crucible_api::test_utils::{
    mock_code, MockAccount, MockContract, MockEngine, MockWorld, ScriptEnv, StubEnableEpochs,
};
use crucible_host::host::testing::{call_host_for_tests, call_host_with_config};
use crucible_host::CallHost;
use crucible_types::address::Address;
use crucible_types::config::HostConfig;
use crucible_types::gas::GasSchedule;
use crucible_types::input::{CallType, ContractCallInput, ContractCreateInput};
use crucible_types::output::ReturnCode;

fn caller() -> Address {
    Address::from_tag("caller")
}

fn contract() -> Address {
    Address::from_tag("contract")
}

struct Fixture {
    host: CallHost,
    world: Arc<MockWorld>,
    engine: Arc<MockEngine>,
}

fn fixture(epochs: StubEnableEpochs) -> Fixture {
    let world = Arc::new(MockWorld::new());
    let engine = Arc::new(MockEngine::new());
    world.put_account(MockAccount::with_balance(caller(), 1_000_000));
    let host = call_host_for_tests(world.clone(), engine.clone(), Arc::new(epochs));
    Fixture { host, world, engine }
}

fn install_contract(
    fixture: &Fixture,
    address: Address,
    function: &str,
    script: impl for<'a> Fn(&mut ScriptEnv<'a>) -> Result<(), String> + Send + Sync + 'static,
) -> Vec<u8> {
    let code = mock_code("fixture-contract", 256);
    fixture
        .world
        .put_account(MockAccount::with_code(address, code.clone()));
    fixture
        .engine
        .register_contract(&code, MockContract::new().with_export(function, script));
    code
}

fn env_finish(env: &mut ScriptEnv<'_>, data: &[u8]) -> Result<(), String> {
    let (offset, length) = env.write(data);
    env.call("finish", &[WasmValue::I32(offset), WasmValue::I32(length)])?;
    Ok(())
}

#[test]
fn create_deploys_code_and_runs_init() {
    let fixture = fixture(StubEnableEpochs::default());
    let code = mock_code("deployable", 512);
    fixture.engine.register_contract(
        &code,
        MockContract::new().with_export("init", |env| env_finish(env, b"deployed")),
    );

    let mut host = fixture.host;
    let input = ContractCreateInput::new(caller(), code.clone(), 1_000_000);
    let output = host.run_create(&input);

    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(output.return_data, vec![b"deployed".to_vec()]);
    let deployed = output
        .output_accounts
        .values()
        .find(|account| account.code.is_some())
        .unwrap();
    assert_eq!(deployed.code.as_deref(), Some(code.as_slice()));
    assert_eq!(deployed.code_deployer, Some(caller()));
    assert!(host.state_stacks_balanced());
}

#[test]
fn create_rejects_code_verification_failures() {
    let fixture = fixture(StubEnableEpochs::default());
    let code = mock_code("floaty", 128);
    fixture.engine.register_contract(
        &code,
        MockContract::new().with_floats().with_export("init", |_| Ok(())),
    );

    let mut host = fixture.host;
    let output = host.run_create(&ContractCreateInput::new(caller(), code, 1_000_000));
    assert_eq!(output.return_code, ReturnCode::ContractInvalid);
}

#[test]
fn call_to_account_without_code_is_contract_not_found() {
    let fixture = fixture(StubEnableEpochs::default());
    fixture
        .world
        .put_account(MockAccount::with_balance(contract(), 0));

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(caller(), contract(), "anything", 100_000));
    assert_eq!(output.return_code, ReturnCode::ContractNotFound);
    assert_eq!(output.gas_remaining, 0);
}

#[test]
fn missing_export_is_function_not_found() {
    let fixture = fixture(StubEnableEpochs::default());
    install_contract(&fixture, contract(), "existingFunction", |_| Ok(()));

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(caller(), contract(), "missing", 100_000));
    assert_eq!(output.return_code, ReturnCode::FunctionNotFound);
}

#[test]
fn reserved_names_cannot_be_called() {
    let fixture = fixture(StubEnableEpochs::default());
    install_contract(&fixture, contract(), "whatever", |_| Ok(()));

    let mut host = fixture.host;
    for reserved in ["init", "callBack", "claimDeveloperRewards", "storageStore"] {
        let output = host.run_call(&ContractCallInput::new(caller(), contract(), reserved, 100_000));
        assert_eq!(
            output.return_code,
            ReturnCode::UserError,
            "{reserved} must be rejected"
        );
    }
}

#[test]
fn signal_error_surfaces_as_user_error_with_message() {
    let fixture = fixture(StubEnableEpochs::default());
    install_contract(&fixture, contract(), "failing", |env| {
        let (offset, length) = env.write(b"contract says no");
        env.call(
            "signalError",
            &[WasmValue::I32(offset), WasmValue::I32(length)],
        )?;
        Ok(())
    });

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(caller(), contract(), "failing", 100_000));
    assert_eq!(output.return_code, ReturnCode::UserError);
    assert_eq!(output.return_message, "contract says no");
    assert!(output.output_accounts.is_empty());
    assert!(host.state_stacks_balanced());
}

#[test]
fn out_of_gas_return_code_follows_epoch_flag() {
    for (flag, expected) in [(false, ReturnCode::ExecutionFailed), (true, ReturnCode::OutOfGas)] {
        let fixture = fixture(StubEnableEpochs {
            fix_oog_return_code: flag,
            ..StubEnableEpochs::default()
        });
        install_contract(&fixture, contract(), "burnAll", |env| env.burn(u64::MAX / 2));

        let mut host = fixture.host;
        let output = host.run_call(&ContractCallInput::new(caller(), contract(), "burnAll", 50_000));
        assert_eq!(output.return_code, expected);
        assert_eq!(output.gas_remaining, 0);
    }
}

#[test]
fn protected_keys_are_rejected_for_contract_code() {
    let fixture = fixture(StubEnableEpochs::default());
    install_contract(&fixture, contract(), "writeProtected", |env| {
        // HostConfig::default() reserves the "CRUCIBLE" prefix.
        let (key_offset, key_len) = env.write(b"CRUCIBLEsecret");
        let (val_offset, val_len) = env.write(b"value");
        env.call(
            "storageStore",
            &[
                WasmValue::I32(key_offset),
                WasmValue::I32(key_len),
                WasmValue::I32(val_offset),
                WasmValue::I32(val_len),
            ],
        )?;
        Ok(())
    });

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(
        caller(),
        contract(),
        "writeProtected",
        100_000,
    ));
    assert_eq!(output.return_code, ReturnCode::UserError);
    // No protected-prefix key may appear among the storage updates.
    for account in output.output_accounts.values() {
        for key in account.storage_updates.keys() {
            assert!(!key.starts_with(b"CRUCIBLE"));
        }
    }
}

#[test]
fn read_only_execution_produces_no_storage_updates() {
    let fixture = fixture(StubEnableEpochs::default());
    let reader = Address::from_tag("reader");
    install_contract(&fixture, contract(), "caller", move |env| {
        let (dest_offset, _) = env.write(reader.as_bytes());
        let (fn_offset, fn_len) = env.write(b"readSomething");
        let result = env.call(
            "executeReadOnly",
            &[
                WasmValue::I64(50_000),
                WasmValue::I32(dest_offset),
                WasmValue::I32(fn_offset),
                WasmValue::I32(fn_len),
                WasmValue::I32(0),
                WasmValue::I32(0),
                WasmValue::I32(0),
            ],
        )?;
        assert_eq!(result[0].as_i32(), 1, "a writing read-only child must fail");
        Ok(())
    });
    let reader_code = mock_code("reader-contract", 300);
    fixture
        .world
        .put_account(MockAccount::with_code(reader, reader_code.clone()));
    fixture.engine.register_contract(
        &reader_code,
        MockContract::new().with_export("readSomething", |env| {
            let (key_offset, key_len) = env.write(b"k");
            let (val_offset, val_len) = env.write(b"v");
            env.call(
                "storageStore",
                &[
                    WasmValue::I32(key_offset),
                    WasmValue::I32(key_len),
                    WasmValue::I32(val_offset),
                    WasmValue::I32(val_len),
                ],
            )?;
            Ok(())
        }),
    );

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(caller(), contract(), "caller", 500_000));
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    for account in output.output_accounts.values() {
        assert!(account.storage_updates.is_empty());
    }
}

#[test]
fn repeated_read_only_calls_are_idempotent() {
    let fixture = fixture(StubEnableEpochs::default());
    install_contract(&fixture, contract(), "readBlock", |env| {
        let nonce = env.call("getBlockNonce", &[])?;
        env_finish(env, &nonce[0].as_i64().to_be_bytes())
    });

    let mut host = fixture.host;
    let input = ContractCallInput::new(caller(), contract(), "readBlock", 100_000);
    let first = host.run_call(&input);
    let second = host.run_call(&input);
    assert_eq!(first, second);
    assert!(first
        .output_accounts
        .values()
        .all(|account| account.storage_updates.is_empty()));
}

#[test]
fn same_shard_async_call_runs_destination_and_callback() {
    let fixture = fixture(StubEnableEpochs::default());
    let dest = Address::from_tag("asyncDest");

    // The calling contract arms the async call and exports the default
    // callback.
    let code = mock_code("fixture-contract", 256);
    fixture
        .world
        .put_account(MockAccount::with_code(contract(), code.clone()));
    fixture.engine.register_contract(
        &code,
        MockContract::new()
            .with_export("startAsync", move |env| {
                let (dest_offset, _) = env.write(dest.as_bytes());
                let (value_offset, _) = env.write(&[0u8; 32]);
                let (data_offset, data_len) = env.write(b"answer");
                env.call(
                    "asyncCall",
                    &[
                        WasmValue::I32(dest_offset),
                        WasmValue::I32(value_offset),
                        WasmValue::I32(data_offset),
                        WasmValue::I32(data_len),
                    ],
                )?;
                Ok(())
            })
            .with_export("callBack", |env| env_finish(env, b"callback ran")),
    );

    let dest_code = mock_code("async-dest", 400);
    fixture
        .world
        .put_account(MockAccount::with_code(dest, dest_code.clone()));
    fixture.engine.register_contract(
        &dest_code,
        MockContract::new().with_export("answer", |env| env_finish(env, b"42")),
    );

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(
        caller(),
        contract(),
        "startAsync",
        1_000_000,
    ));
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(
        output.return_data,
        vec![b"42".to_vec(), b"callback ran".to_vec()]
    );
    assert!(host.state_stacks_balanced());
}

#[test]
fn cross_shard_async_call_persists_context_and_transfer() {
    let fixture = fixture(StubEnableEpochs::default());
    let remote = Address::from_tag("remoteContract");
    // Different shard than the calling contract.
    fixture
        .world
        .put_account(MockAccount::with_code(remote, b"remote-code".to_vec()).in_shard(2));

    install_contract(&fixture, contract(), "startAsync", move |env| {
        let (dest_offset, _) = env.write(remote.as_bytes());
        let (value_offset, _) = env.write(&[0u8; 32]);
        let (data_offset, data_len) = env.write(b"ping");
        env.call(
            "asyncCall",
            &[
                WasmValue::I32(dest_offset),
                WasmValue::I32(value_offset),
                WasmValue::I32(data_offset),
                WasmValue::I32(data_len),
            ],
        )?;
        Ok(())
    });

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(
        caller(),
        contract(),
        "startAsync",
        1_000_000,
    ));
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);

    let remote_account = &output.output_accounts[&remote];
    assert_eq!(remote_account.output_transfers.len(), 1);
    let transfer = &remote_account.output_transfers[0];
    assert_eq!(transfer.call_type, CallType::Async);
    assert_eq!(transfer.data, b"ping");
    assert!(transfer.gas_locked > 0);
}

#[test]
fn upgrade_requires_owner_and_replaces_code() {
    let fixture = fixture(StubEnableEpochs::default());
    let old_code = mock_code("old-version", 256);
    let new_code = mock_code("new-version", 300);
    fixture.world.put_account({
        let mut account = MockAccount::with_code(contract(), old_code.clone());
        account.owner = caller();
        account
    });
    fixture
        .engine
        .register_contract(&old_code, MockContract::new().with_export("doWork", |_| Ok(())));
    fixture.engine.register_contract(
        &new_code,
        MockContract::new().with_export("init", |env| env_finish(env, b"upgraded")),
    );

    let mut host = fixture.host;
    let input = ContractCallInput::new(caller(), contract(), "upgradeContract", 1_000_000)
        .with_argument(new_code.clone())
        .with_argument(vec![1, 0]);
    let output = host.run_call(&input);
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(output.return_data, vec![b"upgraded".to_vec()]);
    assert_eq!(
        output.output_accounts[&contract()].code.as_deref(),
        Some(new_code.as_slice())
    );

    // A non-owner cannot upgrade.
    let stranger = Address::from_tag("stranger");
    fixture
        .world
        .put_account(MockAccount::with_balance(stranger, 1_000));
    let input = ContractCallInput::new(stranger, contract(), "upgradeContract", 1_000_000)
        .with_argument(new_code)
        .with_argument(vec![1, 0]);
    let output = host.run_call(&input);
    assert_eq!(output.return_code, ReturnCode::ExecutionFailed);
}

#[test]
fn managed_type_handles_are_isolated_per_call() {
    let fixture = fixture(StubEnableEpochs::default());
    install_contract(&fixture, contract(), "useBigInts", |env| {
        let a = env.call("bigIntNew", &[WasmValue::I64(1000)])?[0].as_i32();
        let b = env.call("bigIntNew", &[WasmValue::I64(337)])?[0].as_i32();
        let sum = env.call("bigIntNew", &[WasmValue::I64(0)])?[0].as_i32();
        env.call(
            "bigIntAdd",
            &[WasmValue::I32(sum), WasmValue::I32(a), WasmValue::I32(b)],
        )?;
        env.call("bigIntFinishUnsigned", &[WasmValue::I32(sum)])?;
        // Handles start fresh every call.
        assert_eq!(a, 0);
        Ok(())
    });

    let mut host = fixture.host;
    let input = ContractCallInput::new(caller(), contract(), "useBigInts", 200_000);
    let first = host.run_call(&input);
    assert_eq!(first.return_code, ReturnCode::Ok, "{}", first.return_message);
    assert_eq!(first.return_data, vec![1337u16.to_be_bytes().to_vec()]);
    let second = host.run_call(&input);
    assert_eq!(first, second);
}

#[test]
fn block_gas_limit_bounds_top_level_calls() {
    let world = Arc::new(MockWorld::new());
    let engine = Arc::new(MockEngine::new());
    world.put_account(MockAccount::with_balance(caller(), 1_000));
    let config = HostConfig {
        block_gas_limit: 10_000,
        ..HostConfig::default()
    };
    let mut host = call_host_with_config(
        world,
        engine,
        Arc::new(StubEnableEpochs::default()),
        config,
        GasSchedule::default(),
    );

    let output = host.run_call(&ContractCallInput::new(caller(), contract(), "f", 20_000));
    assert_eq!(output.return_code, ReturnCode::ExecutionFailed);
}

#[test]
fn internal_errors_are_aggregated_across_failed_sub_calls() {
    let fixture = fixture(StubEnableEpochs::default());
    let missing = Address::from_tag("missingSC");
    install_contract(&fixture, contract(), "callMissing", move |env| {
        let (dest_offset, _) = env.write(missing.as_bytes());
        let (value_offset, _) = env.write(&[0u8; 32]);
        let (fn_offset, fn_len) = env.write(b"nope");
        let result = env.call(
            "executeOnDestContext",
            &[
                WasmValue::I64(10_000),
                WasmValue::I32(dest_offset),
                WasmValue::I32(value_offset),
                WasmValue::I32(fn_offset),
                WasmValue::I32(fn_len),
                WasmValue::I32(0),
                WasmValue::I32(0),
                WasmValue::I32(0),
            ],
        )?;
        assert_eq!(result[0].as_i32(), 1);
        Ok(())
    });

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(
        caller(),
        contract(),
        "callMissing",
        500_000,
    ));
    // The parent proceeds despite the child's failure...
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    // ...but the failure is retained for the internalVMErrors log entry.
    assert!(host.runtime.formatted_errors().is_some());
}

#[test]
fn balance_deltas_sum_to_zero_for_internal_transfers() {
    let fixture = fixture(StubEnableEpochs::default());
    let receiver = Address::from_tag("receiver");
    fixture.world.put_account({
        let mut account = MockAccount::with_code(contract(), mock_code("fixture-contract", 256));
        account.balance = 500u32.into();
        account
    });
    fixture.engine.register_contract(
        &mock_code("fixture-contract", 256),
        MockContract::new().with_export("pay", move |env| {
            let (dest_offset, _) = env.write(receiver.as_bytes());
            let mut value = [0u8; 32];
            value[31] = 77;
            let (value_offset, _) = env.write(&value);
            env.call(
                "transferValue",
                &[
                    WasmValue::I32(dest_offset),
                    WasmValue::I32(value_offset),
                    WasmValue::I32(0),
                    WasmValue::I32(0),
                ],
            )?;
            Ok(())
        }),
    );

    let mut host = fixture.host;
    let output = host.run_call(&ContractCallInput::new(caller(), contract(), "pay", 200_000));
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);

    let total: BigInt = output
        .output_accounts
        .values()
        .map(|account| account.balance_delta.clone())
        .sum();
    assert_eq!(total, BigInt::from(0));
}
