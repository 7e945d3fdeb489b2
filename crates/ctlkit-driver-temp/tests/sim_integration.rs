//! Temperature controller against the simulated device over real TCP.

use ctlkit_core::{IpConnectionSettings, Mapping, Value};
use ctlkit_driver_temp::{SimSettings, TempController, TempControllerSettings, TempControllerSim};
use ctlkit_runtime::{Runner, RunnerSettings};
use std::time::Duration;

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn controller_for(port: u16) -> std::sync::Arc<TempController> {
    TempController::new(TempControllerSettings {
        num_ramp_controllers: 2,
        ip_settings: IpConnectionSettings::new("127.0.0.1", port),
    })
    .unwrap()
}

#[tokio::test]
async fn ramp_reaches_end_and_reports_disabled() {
    let sim = TempControllerSim::new(SimSettings {
        num_ramp_controllers: 2,
        ramp_rate: 20.0,
        tick_ms: 20,
        ..SimSettings::default()
    })
    .bind("127.0.0.1:0")
    .await
    .unwrap();

    let controller = controller_for(sim.local_addr().port());
    let mapping = Mapping::build(controller.clone()).unwrap();
    let running = Runner::new(RunnerSettings::default())
        .start(&mapping)
        .await
        .unwrap();

    let ramp = controller.ramps()[0].clone();
    ramp.start().unwrap().process(2).await.unwrap();
    ramp.end().unwrap().process(8.0).await.unwrap();
    ramp.enabled().unwrap().process(true).await.unwrap();

    let current = ramp.current().unwrap();
    eventually("current to reach the end value", || {
        current.get().unwrap_or_default() >= 8.0
    })
    .await;

    let enabled = ramp.enabled().unwrap();
    eventually("the ramp to disable itself", || !enabled.get().unwrap_or(true)).await;

    let other = &controller.ramps()[1];
    assert!(!other.enabled().unwrap().get().unwrap());
    assert!(!sim.state().enabled(2).unwrap());
    assert_eq!(sim.state().current(1), Some(8.0));

    running.shutdown().await.unwrap();
    let err = controller.ramp_rate().unwrap().process(1.0).await.unwrap_err();
    assert!(err.is_disconnected());
}

#[tokio::test]
async fn cancel_all_disables_every_channel() {
    let sim = TempControllerSim::new(SimSettings {
        num_ramp_controllers: 2,
        default_end: 1000.0,
        ..SimSettings::default()
    })
    .bind("127.0.0.1:0")
    .await
    .unwrap();

    let controller = controller_for(sim.local_addr().port());
    let mapping = Mapping::build(controller.clone()).unwrap();
    let running = Runner::default().start(&mapping).await.unwrap();

    for sub in mapping.sub_mappings() {
        sub.attribute("enabled")
            .unwrap()
            .process_value(Value::Bool(true))
            .await
            .unwrap();
    }
    eventually("both channels to ramp", || {
        let state = sim.state();
        state.enabled(1) == Some(true) && state.enabled(2) == Some(true)
    })
    .await;

    mapping
        .root()
        .method("cancel_all")
        .unwrap()
        .call()
        .await
        .unwrap();

    eventually("both channels to stop", || {
        let state = sim.state();
        state.enabled(1) == Some(false) && state.enabled(2) == Some(false)
    })
    .await;

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn connect_failure_is_reported() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let controller = controller_for(port);
    let mapping = Mapping::build(controller).unwrap();

    let err = Runner::default().start(&mapping).await.unwrap_err();
    assert!(matches!(err, ctlkit_core::CtlError::Io(_)));
}
