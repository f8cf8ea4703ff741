// Path: crates/host/tests/scenario_tests.rs
//! Parent/child execution scenarios with pinned gas arithmetic.
//!
//! Each scenario scripts a parent contract (and sometimes a child) against a
//! schedule where every EEI cost is zero and compilation costs one gas per
//! code byte, so the expected `gas_remaining` comes out to exact, hand-
//! checkable sums: compilation costs equal the mock code lengths, execution
//! costs equal the points the scripts burn.

use num_bigint::BigInt;
use std::sync::Arc;

use crucible_api::engine::WasmValue;
use crucible_api::test_utils::{mock_code, MockAccount, MockContract, MockEngine, MockWorld, ScriptEnv, StubEnableEpochs};
use crucible_host::host::testing::call_host_with_config;
use crucible_host::CallHost;
use crucible_types::address::Address;
use crucible_types::config::HostConfig;
use crucible_types::gas::{GasSchedule, BASE_OPERATION_COST, HOST_API_COST};
use crucible_types::input::ContractCallInput;
use crucible_types::output::{ReturnCode, VMOutput};

const GAS_PROVIDED: u64 = 1_000_000;

const PARENT_COMPILATION_COST_SAME_CTX: usize = 3577;
const CHILD_COMPILATION_COST_SAME_CTX: usize = 3285;
const PARENT_COMPILATION_COST_DEST_CTX: usize = 3267;
const CHILD_COMPILATION_COST_DEST_CTX: usize = 1827;

fn parent_address() -> Address {
    Address::from_tag("parentSC")
}

fn child_address() -> Address {
    Address::from_tag("childSC")
}

fn user_address() -> Address {
    Address::from_tag("user")
}

fn key32(tag: &str) -> Vec<u8> {
    let mut key = tag.as_bytes().to_vec();
    key.resize(32, b'.');
    key
}

/// A schedule where only compilation costs gas.
fn scenario_schedule() -> GasSchedule {
    let mut schedule = GasSchedule::default();
    for name in ["StorePerByte", "ReleasePerByte", "DataCopyPerByte", "PersistPerByte"] {
        schedule.set(BASE_OPERATION_COST, name, 0);
    }
    schedule.set(BASE_OPERATION_COST, "CompilePerByte", 1);
    schedule.set(BASE_OPERATION_COST, "AoTPreparePerByte", 1);
    for name in [
        "GetContext",
        "GetArgument",
        "Finish",
        "SignalError",
        "Log",
        "GetBlockInfo",
        "StorageLoad",
        "StorageStore",
        "TransferValue",
        "CreateContract",
        "ExecuteOnContext",
        "AsyncCallStep",
        "AsyncCallbackGasLock",
        "CreateAsyncCall",
    ] {
        schedule.set(HOST_API_COST, name, 0);
    }
    schedule
}

// --- script-side EEI helpers ---

fn store(env: &mut ScriptEnv<'_>, key: &[u8], value: &[u8]) -> Result<(), String> {
    let (key_offset, key_len) = env.write(key);
    let (val_offset, val_len) = env.write(value);
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
}

fn load(env: &mut ScriptEnv<'_>, key: &[u8]) -> Result<Vec<u8>, String> {
    let (key_offset, key_len) = env.write(key);
    let (dest_offset, _) = env.write(&[0u8; 64]);
    let result = env.call(
        "storageLoad",
        &[
            WasmValue::I32(key_offset),
            WasmValue::I32(key_len),
            WasmValue::I32(dest_offset),
        ],
    )?;
    let length = result[0].as_i32();
    Ok(env.read(dest_offset, length))
}

fn finish(env: &mut ScriptEnv<'_>, data: &[u8]) -> Result<(), String> {
    let (offset, length) = env.write(data);
    env.call("finish", &[WasmValue::I32(offset), WasmValue::I32(length)])?;
    Ok(())
}

fn transfer(env: &mut ScriptEnv<'_>, dest: &Address, value: u64, data: &[u8]) -> Result<(), String> {
    let (dest_offset, _) = env.write(dest.as_bytes());
    let mut value_bytes = [0u8; 32];
    value_bytes[24..].copy_from_slice(&value.to_be_bytes());
    let (value_offset, _) = env.write(&value_bytes);
    let (data_offset, data_len) = env.write(data);
    env.call(
        "transferValue",
        &[
            WasmValue::I32(dest_offset),
            WasmValue::I32(value_offset),
            WasmValue::I32(data_offset),
            WasmValue::I32(data_len),
        ],
    )?;
    Ok(())
}

fn execute_on(
    env: &mut ScriptEnv<'_>,
    api: &str,
    gas: u64,
    dest: &Address,
    value: u64,
    function: &str,
) -> Result<i32, String> {
    let (dest_offset, _) = env.write(dest.as_bytes());
    let mut value_bytes = [0u8; 32];
    value_bytes[24..].copy_from_slice(&value.to_be_bytes());
    let (value_offset, _) = env.write(&value_bytes);
    let (function_offset, function_len) = env.write(function.as_bytes());
    let result = env.call(
        api,
        &[
            WasmValue::I64(gas as i64),
            WasmValue::I32(dest_offset),
            WasmValue::I32(value_offset),
            WasmValue::I32(function_offset),
            WasmValue::I32(function_len),
            WasmValue::I32(0),
            WasmValue::I32(0),
            WasmValue::I32(0),
        ],
    )?;
    Ok(result[0].as_i32())
}

/// The common "prepare" behavior every parent scenario starts with: two
/// storage writes, two finishes, one 42-unit transfer, one "succ" marker.
fn parent_prepare(env: &mut ScriptEnv<'_>) -> Result<(), String> {
    store(env, &key32("parentKeyA"), b"parentDataA")?;
    store(env, &key32("parentKeyB"), b"parentDataB")?;
    finish(env, b"parentFinishA")?;
    finish(env, b"parentFinishB")?;
    transfer(env, &Address::from_tag("parentTransferReceiver"), 42, b"parentTransferData")?;
    finish(env, b"succ")?;
    Ok(())
}

struct Scenario {
    host: CallHost,
    world: Arc<MockWorld>,
}

fn scenario(
    parent_code_len: usize,
    parent_script: impl for<'a> Fn(&mut ScriptEnv<'a>) -> Result<(), String> + Send + Sync + 'static,
    child: Option<(
        usize,
        Box<dyn for<'a> Fn(&mut ScriptEnv<'a>) -> Result<(), String> + Send + Sync>,
    )>,
) -> Scenario {
    let world = Arc::new(MockWorld::new());
    let engine = Arc::new(MockEngine::new());

    let parent_code = mock_code("parent-contract", parent_code_len);
    world.put_account({
        let mut account = MockAccount::with_code(parent_address(), parent_code.clone());
        account.balance = 1000u32.into();
        account
            .storage
            .insert(key32("parentKeyA"), b"parentDataA".to_vec());
        account
            .storage
            .insert(key32("parentKeyB"), b"parentDataB".to_vec());
        account
    });
    world.put_account(MockAccount::with_balance(user_address(), 1_000_000));
    engine.register_contract(
        &parent_code,
        MockContract::new().with_export("parentFunction", parent_script),
    );

    if let Some((child_code_len, child_script)) = child {
        let child_code = mock_code("child-contract", child_code_len);
        world.put_account(MockAccount::with_code(child_address(), child_code.clone()));
        engine.register_contract(
            &child_code,
            MockContract::new().with_export("childFunction", move |env| child_script(env)),
        );
    }

    let host = call_host_with_config(
        world.clone(),
        engine,
        Arc::new(StubEnableEpochs::default()),
        HostConfig::default(),
        scenario_schedule(),
    );
    Scenario { host, world }
}

fn run_parent(scenario: &mut Scenario) -> VMOutput {
    let input = ContractCallInput::new(
        user_address(),
        parent_address(),
        "parentFunction",
        GAS_PROVIDED,
    );
    scenario.host.run_call(&input)
}

fn finish_data(output: &VMOutput) -> Vec<&[u8]> {
    output.return_data.iter().map(|d| d.as_slice()).collect()
}

// --- the scenarios ---

#[test]
fn same_ctx_prepare() {
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_SAME_CTX,
        |env| {
            parent_prepare(env)?;
            env.burn(135)
        },
        None,
    );
    let output = run_parent(&mut scenario);

    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(
        output.gas_remaining,
        GAS_PROVIDED - PARENT_COMPILATION_COST_SAME_CTX as u64 - 135
    );

    let parent = &output.output_accounts[&parent_address()];
    assert_eq!(parent.balance_delta, BigInt::from(-42));
    assert_eq!(parent.balance, Some(1000u32.into()));
    assert_eq!(parent.storage_updates[&key32("parentKeyA")].new_value, b"parentDataA");
    assert_eq!(parent.storage_updates[&key32("parentKeyB")].new_value, b"parentDataB");

    let receiver = &output.output_accounts[&Address::from_tag("parentTransferReceiver")];
    assert_eq!(receiver.balance_delta, BigInt::from(42));
    assert_eq!(receiver.output_transfers.len(), 1);
    assert_eq!(receiver.output_transfers[0].data, b"parentTransferData");

    assert_eq!(
        finish_data(&output),
        vec![b"parentFinishA" as &[u8], b"parentFinishB", b"succ"]
    );
}

#[test]
fn same_ctx_child_out_of_gas() {
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_SAME_CTX,
        |env| {
            store(env, &key32("parentKeyA"), b"parentDataA")?;
            finish(env, b"parentFinishA")?;
            env.burn(124)?;
            env.burn(1)?; // the execute API's own cost
            let status = execute_on(
                env,
                "executeOnSameContext",
                3500,
                &child_address(),
                0,
                "childFunction",
            )?;
            assert_eq!(status, 1, "child must fail with out-of-gas");
            finish(env, b"fail")?;
            env.burn(36)
        },
        Some((
            CHILD_COMPILATION_COST_SAME_CTX,
            Box::new(|env| {
                // Exceed whatever was forwarded.
                env.burn(u64::MAX / 2)
            }),
        )),
    );
    let output = run_parent(&mut scenario);

    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(
        output.gas_remaining,
        GAS_PROVIDED - PARENT_COMPILATION_COST_SAME_CTX as u64 - 124 - 1 - 3500 - 36
    );

    // The failed child's effects were rolled back wholesale.
    let parent = &output.output_accounts[&parent_address()];
    assert_eq!(parent.balance_delta, BigInt::from(0));
    assert!(parent.storage_updates.contains_key(&key32("parentKeyA")));
    assert!(!parent.storage_updates.contains_key(&key32("childKey")));
    assert!(!output.output_accounts.contains_key(&child_address()));

    assert_eq!(finish_data(&output), vec![b"parentFinishA" as &[u8], b"fail"]);
}

#[test]
fn same_ctx_successful_child() {
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_SAME_CTX,
        |env| {
            parent_prepare(env)?;
            env.burn(188)?;
            env.burn(39)?; // the execute API's own cost
            let status = execute_on(
                env,
                "executeOnSameContext",
                10_000,
                &child_address(),
                3,
                "childFunction",
            )?;
            assert_eq!(status, 0, "child must succeed");
            finish(env, b"succ")?;
            env.burn(139)
        },
        Some((
            CHILD_COMPILATION_COST_SAME_CTX,
            Box::new(|env| {
                finish(env, b"childFinish")?;
                for key in ["parentKeyA", "parentKeyB"] {
                    let data = load(env, &key32(key))?;
                    finish(env, &data)?;
                    for byte in data {
                        finish(env, &[byte])?;
                    }
                }
                store(env, &key32("childKey"), b"childData")?;
                transfer(env, &Address::from_tag("childTransferReceiver"), 96, b"qwerty")?;
                finish(env, b"child ok")?;
                finish(env, b"succ")?;
                env.burn(431)
            }),
        )),
    );
    let output = run_parent(&mut scenario);

    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(
        output.gas_remaining,
        GAS_PROVIDED
            - PARENT_COMPILATION_COST_SAME_CTX as u64
            - 188
            - 39
            - CHILD_COMPILATION_COST_SAME_CTX as u64
            - 431
            - 139
    );

    let parent = &output.output_accounts[&parent_address()];
    assert_eq!(parent.balance_delta, BigInt::from(-141));
    // Same-context: the child stored onto the parent's storage.
    assert_eq!(parent.storage_updates[&key32("childKey")].new_value, b"childData");

    let child = &output.output_accounts[&child_address()];
    assert_eq!(child.balance_delta, BigInt::from(3));

    let receiver = &output.output_accounts[&Address::from_tag("childTransferReceiver")];
    assert_eq!(receiver.balance_delta, BigInt::from(96));
    assert_eq!(receiver.output_transfers[0].data, b"qwerty");

    let mut expected: Vec<Vec<u8>> = vec![
        b"parentFinishA".to_vec(),
        b"parentFinishB".to_vec(),
        b"succ".to_vec(),
        b"childFinish".to_vec(),
    ];
    for data in [b"parentDataA" as &[u8], b"parentDataB"] {
        expected.push(data.to_vec());
        for &byte in data {
            expected.push(vec![byte]);
        }
    }
    expected.push(b"child ok".to_vec());
    expected.push(b"succ".to_vec());
    expected.push(b"succ".to_vec());
    assert_eq!(output.return_data, expected);
}

#[test]
fn dest_ctx_prepare() {
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_DEST_CTX,
        |env| {
            parent_prepare(env)?;
            env.burn(135)
        },
        None,
    );
    let output = run_parent(&mut scenario);

    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(
        output.gas_remaining,
        GAS_PROVIDED - PARENT_COMPILATION_COST_DEST_CTX as u64 - 135
    );
    assert_eq!(
        finish_data(&output),
        vec![b"parentFinishA" as &[u8], b"parentFinishB", b"succ"]
    );
}

#[test]
fn dest_ctx_wrong_contract_called() {
    let wrong_sc = Address::from_tag("wrongSC");
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_DEST_CTX,
        move |env| {
            parent_prepare(env)?;
            env.burn(180)?;
            env.burn(42)?; // the execute API's own cost
            let status = execute_on(
                env,
                "executeOnDestContext",
                10_000,
                &wrong_sc,
                99,
                "someFunction",
            )?;
            assert_eq!(status, 1, "calling a code-less account must fail");
            finish(env, b"fail")?;
            env.burn(44)
        },
        None,
    );
    let output = run_parent(&mut scenario);

    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(
        output.gas_remaining,
        GAS_PROVIDED - PARENT_COMPILATION_COST_DEST_CTX as u64 - 180 - 42 - 10_000 - 44
    );

    // The transfer to the callee belongs to the caller's frame and survives
    // the failed execution; the forwarded gas is lost.
    let parent = &output.output_accounts[&parent_address()];
    assert_eq!(parent.balance_delta, BigInt::from(-141));
    let wrong = &output.output_accounts[&Address::from_tag("wrongSC")];
    assert_eq!(wrong.balance_delta, BigInt::from(99));

    assert_eq!(
        finish_data(&output),
        vec![b"parentFinishA" as &[u8], b"parentFinishB", b"succ", b"fail"]
    );
}

#[test]
fn dest_ctx_successful_child() {
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_DEST_CTX,
        |env| {
            parent_prepare(env)?;
            env.burn(188)?;
            env.burn(42)?; // the execute API's own cost
            let status = execute_on(
                env,
                "executeOnDestContext",
                10_000,
                &child_address(),
                99,
                "childFunction",
            )?;
            assert_eq!(status, 0, "child must succeed");
            finish(env, b"succ")?;
            env.burn(65)
        },
        Some((
            CHILD_COMPILATION_COST_DEST_CTX,
            Box::new(|env| {
                store(env, &key32("childKey"), b"childData")?;
                transfer(
                    env,
                    &Address::from_tag("childTransferReceiver"),
                    12,
                    b"Second sentence.",
                )?;
                finish(env, b"childFinish")?;
                finish(env, b"succ")?;
                env.burn(91)
            }),
        )),
    );
    let output = run_parent(&mut scenario);

    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(
        output.gas_remaining,
        GAS_PROVIDED
            - PARENT_COMPILATION_COST_DEST_CTX as u64
            - 188
            - 42
            - CHILD_COMPILATION_COST_DEST_CTX as u64
            - 91
            - 65
    );

    let parent = &output.output_accounts[&parent_address()];
    assert_eq!(parent.balance_delta, BigInt::from(-141));
    // Destination-context: the child stored onto its own storage and paid
    // the onward transfer from its own account.
    assert!(!parent.storage_updates.contains_key(&key32("childKey")));
    let child = &output.output_accounts[&child_address()];
    assert_eq!(child.balance_delta, BigInt::from(99 - 12));
    assert_eq!(child.storage_updates[&key32("childKey")].new_value, b"childData");

    let receiver = &output.output_accounts[&Address::from_tag("childTransferReceiver")];
    assert_eq!(receiver.balance_delta, BigInt::from(12));
    assert_eq!(receiver.output_transfers[0].data, b"Second sentence.");

    assert_eq!(
        finish_data(&output),
        vec![
            b"parentFinishA" as &[u8],
            b"parentFinishB",
            b"succ",
            b"childFinish",
            b"succ",
            b"succ"
        ]
    );
}

// --- cross-cutting properties over the scenarios ---

#[test]
fn determinism_two_runs_are_byte_identical() {
    // Two hosts, identical world and scripts: outputs must match exactly.
    let build = || {
        scenario(
            PARENT_COMPILATION_COST_SAME_CTX,
            |env| {
                parent_prepare(env)?;
                env.burn(135)
            },
            None,
        )
    };
    let output_a = run_parent(&mut build());
    let output_b = run_parent(&mut build());
    assert_eq!(output_a, output_b);
}

#[test]
fn warm_cache_run_matches_cold_run() {
    // Same host, same call twice: the second run instantiates from the warm
    // cache and must produce the same VMOutput (the schedule prices warm
    // preparation identically to cold compilation here).
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_SAME_CTX,
        |env| {
            parent_prepare(env)?;
            env.burn(135)
        },
        None,
    );
    let cold = run_parent(&mut scenario);
    let warm = run_parent(&mut scenario);
    assert_eq!(cold, warm);
    let _ = &scenario.world;
}

#[test]
fn gas_is_conserved_across_nested_calls() {
    let mut scenario = scenario(
        PARENT_COMPILATION_COST_SAME_CTX,
        |env| {
            parent_prepare(env)?;
            env.burn(188)?;
            env.burn(39)?;
            execute_on(
                env,
                "executeOnSameContext",
                10_000,
                &child_address(),
                3,
                "childFunction",
            )?;
            finish(env, b"succ")?;
            env.burn(139)
        },
        Some((
            CHILD_COMPILATION_COST_SAME_CTX,
            Box::new(|env| {
                finish(env, b"childFinish")?;
                env.burn(431)
            }),
        )),
    );
    let output = run_parent(&mut scenario);
    assert_eq!(output.return_code, ReturnCode::Ok);

    let gas_used = PARENT_COMPILATION_COST_SAME_CTX as u64
        + 188
        + 39
        + CHILD_COMPILATION_COST_SAME_CTX as u64
        + 431
        + 139;
    assert_eq!(
        GAS_PROVIDED,
        gas_used + output.gas_remaining + output.gas_refund
    );
}
