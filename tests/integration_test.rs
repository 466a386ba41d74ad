use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_modbus::{
    prelude::*,
    server::{
        tcp::{accept_tcp_connection, Server},
        Service,
    },
};

use janitza_bridge::{
    BridgeError, Catalog, Collector, Counters, HomeAssistantSink, JanitzaReader, MemoryPublisher,
    MetricCache, VenusGridSink, VenusMode,
};

const GRID_TOPIC: &str = "janitza-ruby/dbus-grid";

/// Mock Janitza UMG serving the measurement block from register 19000
#[derive(Clone)]
struct MockJanitzaServer {
    values: Arc<Mutex<Vec<f32>>>,
    read_count: Arc<AtomicU32>,
    fail_after: Arc<AtomicU32>,
}

impl MockJanitzaServer {
    fn new(values: Vec<f32>) -> Self {
        Self {
            values: Arc::new(Mutex::new(values)),
            read_count: Arc::new(AtomicU32::new(0)),
            fail_after: Arc::new(AtomicU32::new(u32::MAX)),
        }
    }

    fn set_value(&self, index: usize, value: f32) {
        self.values.lock().unwrap()[index] = value;
    }

    /// Answers `reads` more requests, then reports a device failure
    fn fail_after(&self, reads: u32) {
        let current = self.read_count.load(Ordering::Relaxed);
        self.fail_after.store(current + reads, Ordering::Relaxed);
    }

    fn get_read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

impl Service for MockJanitzaServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Exception>> + Send>,
    >;

    fn call(&self, req: Self::Request) -> Self::Future {
        let values = self.values.clone();
        let read_count = self.read_count.clone();
        let fail_after = self.fail_after.clone();

        Box::pin(async move {
            let reads = read_count.fetch_add(1, Ordering::Relaxed);
            if reads >= fail_after.load(Ordering::Relaxed) {
                return Err(ExceptionCode::ServerDeviceFailure);
            }

            match req {
                Request::ReadHoldingRegisters(19000, cnt) => {
                    let values = values.lock().unwrap();
                    if usize::from(cnt) != values.len() * 2 {
                        return Err(ExceptionCode::IllegalDataAddress);
                    }
                    // Big-endian floats, high word first
                    let words = values
                        .iter()
                        .flat_map(|value| {
                            let bits = value.to_bits();
                            [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
                        })
                        .collect();
                    Ok(Response::ReadHoldingRegisters(words))
                }
                _ => Err(ExceptionCode::IllegalFunction),
            }
        })
    }
}

/// Start mock Janitza Modbus server
async fn start_mock_janitza_server(
    values: Vec<f32>,
) -> (MockJanitzaServer, SocketAddr, oneshot::Sender<()>) {
    let mock_server = MockJanitzaServer::new(values);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_clone = mock_server.clone();

    tokio::spawn(async move {
        let server = Server::new(listener);
        let new_service = |_socket_addr| Ok(Some(server_clone.clone()));
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| {
            eprintln!("Mock Janitza server error: {}", err);
        };

        tokio::select! {
            _ = server.serve(&on_connected, on_process_error) => {},
            _ = shutdown_rx => {
                println!("Mock Janitza server shutting down");
            }
        }
    });

    (mock_server, addr, shutdown_tx)
}

/// A plausible register block for a three phase house connection
fn register_block() -> Vec<f32> {
    let mut values = vec![
        230.5, 231.0, 229.5, // L-N voltages
        399.0, 400.5, 398.0, // L-L voltages
        4.5, 2.0, 1.5, 8.0, // currents
        1000.0, 400.0, 300.0, 1700.0, // real power
        1050.0, 420.0, 320.0, 1790.0, // apparent power
        100.0, 50.0, 40.0, 190.0, // reactive power
        0.95, 0.96, 0.94, // power factor
        50.0, // frequency
        1.0, // rotation field
    ];
    values.extend([1000.0, 2000.0, 3000.0, 6000.0]); // real energy
    values.extend([500.0, 600.0, 700.0, 1800.0]); // consumed
    values.extend([1500.0, 2600.0, 3700.0, 7800.0]); // delivered
    values
}

struct Bridge {
    collector: Collector<JanitzaReader>,
    counters: Arc<Counters>,
    home_assistant: Arc<MemoryPublisher>,
    venus: Arc<MemoryPublisher>,
}

async fn connect_bridge(addr: SocketAddr) -> Bridge {
    let reader = timeout(Duration::from_secs(5), JanitzaReader::connect(addr, 1))
        .await
        .expect("Timeout connecting to mock meter")
        .expect("Failed to connect to mock meter");
    let counters = Arc::new(Counters::new());
    let home_assistant = Arc::new(MemoryPublisher::new());
    let venus = Arc::new(MemoryPublisher::new());

    let collector = Collector::new(
        reader,
        Arc::new(Catalog::janitza().unwrap()),
        Arc::new(MetricCache::new()),
        counters.clone(),
    )
    .unwrap()
    .with_home_assistant(Arc::new(HomeAssistantSink::new(
        home_assistant.clone(),
        "janitza-ruby/",
    )))
    .with_venus(Arc::new(VenusGridSink::new(
        venus.clone(),
        VenusMode::DbusGrid,
        GRID_TOPIC,
    )));

    Bridge {
        collector,
        counters,
        home_assistant,
        venus,
    }
}

#[tokio::test]
async fn test_full_integration() {
    let (mock_meter, meter_addr, _meter_shutdown) =
        start_mock_janitza_server(register_block()).await;
    let mut bridge = connect_bridge(meter_addr).await;

    // Test 1: one cycle reaches both sinks
    let report = timeout(Duration::from_secs(5), bridge.collector.run_cycle())
        .await
        .expect("Timeout waiting for cycle")
        .expect("Cycle failed");
    assert_eq!(report.metrics, 39);

    let voltage = bridge
        .home_assistant
        .messages_for("janitza-ruby/Ac/L1/Voltage")
        .await;
    assert_eq!(voltage.len(), 1);
    assert_eq!(voltage[0].payload, "230.5");

    let apparent = bridge
        .home_assistant
        .messages_for("janitza-ruby/Ac/ApparentPower")
        .await;
    assert_eq!(apparent[0].payload, "1790.0");

    let grid = bridge.venus.messages_for(GRID_TOPIC).await;
    assert_eq!(grid.len(), 1);
    let document: serde_json::Value = serde_json::from_str(&grid[0].payload).unwrap();
    assert_eq!(document["grid"]["voltage"], 230.5);
    assert_eq!(document["grid"]["L2"]["current"], 2.0);
    assert_eq!(document["grid"]["power"], 1700.0);
    assert_eq!(document["grid"]["L1"]["frequency"], 50.0);
    assert_eq!(document["grid"]["energy_forward"], 7.8);
    assert_eq!(document["grid"]["L3"]["energy_reverse"], 0.7);

    println!("✅ Test 1 passed: Register block published to both sinks");

    // Test 2: updated registers show up in the next cycle
    mock_meter.set_value(13, -2500.0);
    timeout(Duration::from_secs(5), bridge.collector.run_cycle())
        .await
        .expect("Timeout waiting for cycle")
        .expect("Cycle failed");

    let power = bridge
        .home_assistant
        .messages_for("janitza-ruby/Ac/Power")
        .await;
    assert_eq!(power.len(), 2);
    assert_eq!(power[1].payload, "-2500.0");

    let grid = bridge.venus.messages_for(GRID_TOPIC).await;
    let document: serde_json::Value = serde_json::from_str(&grid[1].payload).unwrap();
    assert_eq!(document["grid"]["power"], -2500.0);

    println!("✅ Test 2 passed: Value updates propagate");

    // Test 3: operational counters follow the cycles
    assert_eq!(
        bridge
            .counters
            .total("collecting_registers_count_total")
            .await,
        Some(2.0)
    );
    let seconds = bridge
        .counters
        .total("collecting_registers_seconds_total")
        .await
        .unwrap();
    assert!(seconds > 0.0);
    assert_eq!(mock_meter.get_read_count(), 2);

    println!("✅ Test 3 passed: Counters track {} cycles", 2);
}

#[tokio::test]
async fn test_device_failure_terminates_collector() {
    let (mock_meter, meter_addr, _meter_shutdown) =
        start_mock_janitza_server(register_block()).await;
    let bridge = connect_bridge(meter_addr).await;
    mock_meter.fail_after(3);

    let result = timeout(Duration::from_secs(5), bridge.collector.run())
        .await
        .expect("Collector should stop on device failure");

    assert!(matches!(result, Err(BridgeError::ModbusException(_))));
    assert_eq!(
        bridge
            .counters
            .total("collecting_registers_count_total")
            .await,
        Some(3.0)
    );
    // The failed cycle published nothing
    assert_eq!(bridge.venus.messages_for(GRID_TOPIC).await.len(), 3);
    assert_eq!(
        bridge
            .home_assistant
            .messages_for("janitza-ruby/Ac/Frequency")
            .await
            .len(),
        3
    );
}

#[tokio::test]
async fn test_unreachable_meter() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = JanitzaReader::connect(addr, 1).await;
    assert!(matches!(result, Err(BridgeError::Transport(_))));
}
