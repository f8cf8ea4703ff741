// Path: crates/host/tests/host_lifecycle_tests.rs
//! Supervised entry points: timeout, panic containment, close/reset and
//! cache invalidation.

use std::sync::Arc;
use std::time::Duration;

use crucible_api::engine::WasmValue;
use crucible_api::test_utils::{
    mock_code, MockAccount, MockContract, MockEngine, MockWorld, StubEnableEpochs,
    StubEpochNotifier,
};
use crucible_host::host::{Host, HostParams};
use crucible_types::address::Address;
use crucible_types::config::{EnableEpochs, HostConfig};
use crucible_types::error::HostError;
use crucible_types::gas::GasSchedule;
use crucible_types::input::ContractCallInput;
use crucible_types::output::ReturnCode;
use crucible_types::INTERNAL_VM_ERRORS_LOG_ID;

fn caller() -> Address {
    Address::from_tag("caller")
}

fn contract() -> Address {
    Address::from_tag("contract")
}

struct Fixture {
    host: Arc<Host>,
    world: Arc<MockWorld>,
    engine: Arc<MockEngine>,
    notifier: Arc<StubEpochNotifier>,
}

fn fixture() -> Fixture {
    let world = Arc::new(MockWorld::new());
    let engine = Arc::new(MockEngine::new());
    let notifier = Arc::new(StubEpochNotifier::new());
    world.put_account(MockAccount::with_balance(caller(), 1_000_000));

    let host = Host::new(
        world.clone(),
        engine.clone(),
        Arc::new(StubEnableEpochs::default()),
        notifier.as_ref(),
        HostParams {
            config: HostConfig::default(),
            gas_schedule: GasSchedule::default(),
            enable_epochs: EnableEpochs {
                fix_oog_return_code_epoch: 7,
                ..EnableEpochs::default()
            },
            builtins: None,
            transfer_parser: None,
            crypto: None,
        },
    )
    .unwrap();

    Fixture {
        host,
        world,
        engine,
        notifier,
    }
}

fn install_contract(
    fixture: &Fixture,
    function: &str,
    script: impl for<'a> Fn(
            &mut crucible_api::test_utils::ScriptEnv<'a>,
        ) -> Result<(), String>
        + Send
        + Sync
        + 'static,
) {
    let code = mock_code("lifecycle-contract", 256);
    fixture
        .world
        .put_account(MockAccount::with_code(contract(), code.clone()));
    fixture
        .engine
        .register_contract(&code, MockContract::new().with_export(function, script));
}

#[tokio::test]
async fn run_call_produces_output_through_supervision() {
    let fixture = fixture();
    install_contract(&fixture, "greet", |env| {
        let (offset, length) = env.write(b"hello");
        env.call("finish", &[WasmValue::I32(offset), WasmValue::I32(length)])?;
        Ok(())
    });

    let output = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "greet", 100_000))
        .await
        .unwrap();
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(output.return_data, vec![b"hello".to_vec()]);
    // A clean run synthesizes no internalVMErrors entry.
    assert!(output
        .logs
        .iter()
        .all(|log| log.identifier != INTERNAL_VM_ERRORS_LOG_ID.as_bytes()));
}

#[tokio::test]
async fn failed_calls_carry_an_internal_errors_log() {
    let fixture = fixture();
    install_contract(&fixture, "boom", |env| {
        let (offset, length) = env.write(b"exploded");
        env.call(
            "signalError",
            &[WasmValue::I32(offset), WasmValue::I32(length)],
        )?;
        Ok(())
    });

    let output = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "boom", 100_000))
        .await
        .unwrap();
    assert_eq!(output.return_code, ReturnCode::UserError);
    let log = output
        .logs
        .iter()
        .find(|log| log.identifier == INTERNAL_VM_ERRORS_LOG_ID.as_bytes())
        .unwrap();
    assert!(String::from_utf8_lossy(&log.data).contains("exploded"));
    assert_eq!(log.topics[1], b"boom".to_vec());
}

#[tokio::test]
async fn close_rejects_new_calls_and_reset_recovers() {
    let fixture = fixture();
    install_contract(&fixture, "greet", |_| Ok(()));

    fixture.host.close().await;
    let result = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "greet", 100_000))
        .await;
    assert!(matches!(result, Err(HostError::VMIsClosing)));

    fixture.host.reset().await;
    assert_eq!(fixture.host.warm_cache_len(), 0);
    let result = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "greet", 100_000))
        .await;
    assert!(result.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_cancels_cooperatively_without_partial_output() {
    let fixture = fixture();
    install_contract(&fixture, "hang", |env| {
        let (offset, length) = env.write(b"before-hang");
        env.call("finish", &[WasmValue::I32(offset), WasmValue::I32(length)])?;
        // Past the supervision timeout; the worker is drained, not killed.
        std::thread::sleep(Duration::from_millis(1600));
        Ok(())
    });

    let result = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "hang", 100_000))
        .await;
    assert!(matches!(result, Err(HostError::ExecutionFailedWithTimeout)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panics_are_contained_and_the_host_stays_usable() {
    let fixture = fixture();
    install_contract(&fixture, "panicky", |_| panic!("deliberate test panic"));

    let result = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "panicky", 100_000))
        .await;
    assert!(matches!(result, Err(HostError::ExecutionPanicked)));

    // The host survives and serves the next call.
    install_contract(&fixture, "fine", |_| Ok(()));
    let output = fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "fine", 100_000))
        .await
        .unwrap();
    assert_eq!(output.return_code, ReturnCode::Ok);
}

#[tokio::test]
async fn gas_schedule_change_purges_the_warm_cache() {
    let fixture = fixture();
    install_contract(&fixture, "greet", |_| Ok(()));

    fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "greet", 100_000))
        .await
        .unwrap();
    assert_eq!(fixture.host.warm_cache_len(), 1);

    let mut schedule = GasSchedule::default();
    schedule.set("HostAPICost", "Finish", 20);
    fixture.host.gas_schedule_change(schedule).await.unwrap();
    assert_eq!(fixture.host.warm_cache_len(), 0);
}

#[tokio::test]
async fn activation_epochs_purge_caches() {
    let fixture = fixture();
    install_contract(&fixture, "greet", |_| Ok(()));

    fixture
        .host
        .run_call(ContractCallInput::new(caller(), contract(), "greet", 100_000))
        .await
        .unwrap();
    assert_eq!(fixture.host.warm_cache_len(), 1);
    assert!(fixture.world.compiled_code_count() > 0);

    // Epoch 6 activates nothing; epoch 7 is the configured activation epoch.
    fixture.notifier.confirm_epoch(6, 0);
    assert_eq!(fixture.host.warm_cache_len(), 1);
    fixture.notifier.confirm_epoch(7, 0);
    assert_eq!(fixture.host.warm_cache_len(), 0);
    assert_eq!(fixture.world.compiled_code_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_are_served_independently() {
    let fixture = fixture();
    install_contract(&fixture, "greet", |env| {
        let (offset, length) = env.write(b"hi");
        env.call("finish", &[WasmValue::I32(offset), WasmValue::I32(length)])?;
        Ok(())
    });

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let host = fixture.host.clone();
        tasks.push(tokio::spawn(async move {
            host.run_call(ContractCallInput::new(caller(), contract(), "greet", 100_000))
                .await
        }));
    }
    for task in tasks {
        let output = task.await.unwrap().unwrap();
        assert_eq!(output.return_code, ReturnCode::Ok);
        assert_eq!(output.return_data, vec![b"hi".to_vec()]);
    }
}
