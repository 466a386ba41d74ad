use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use janitza_bridge::{
    mqtt_publisher::MqttPublisher, BridgeConfig, Catalog, Collector, Counters, HomeAssistantSink,
    JanitzaReader, MetricCache, Publisher, VenusGridSink,
};
use tokio::net::lookup_host;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Janitza bridge");
    let config = BridgeConfig::from_env()?;
    let catalog = Arc::new(Catalog::janitza()?);

    let (hass_publisher, venus_publisher) = connect_sinks(&config);
    let hass = hass_publisher.map(|publisher| {
        let sink = HomeAssistantSink::new(publisher, config.hass_prefix.clone());
        let sink = match &config.hass_discovery_prefix {
            Some(prefix) => sink.with_discovery(prefix.clone()),
            None => sink,
        };
        Arc::new(sink)
    });
    let venus = venus_publisher.map(|publisher| {
        Arc::new(
            VenusGridSink::new(publisher, config.venus_mode, config.venus_grid_topic.clone())
                .with_prefix(config.venus_prefix.clone()),
        )
    });
    if hass.is_none() && venus.is_none() {
        info!("No MQTT sink configured, readings are only cached");
    }

    let meter_address = resolve(&config.modbus_address()).await?;
    let reader = JanitzaReader::connect(meter_address, config.modbus_unit).await?;

    let mut collector = Collector::new(
        reader,
        catalog,
        Arc::new(MetricCache::new()),
        Arc::new(Counters::new()),
    )?;
    if let Some(hass) = hass {
        collector = collector.with_home_assistant(hass);
    }
    if let Some(venus) = venus {
        collector = collector.with_venus(venus);
    }

    if let Err(err) = collector.run().await {
        error!("Terminating collector loop!");
        return Err(err.into());
    }
    Ok(())
}

/// One MQTT client per distinct broker; both sinks share it when they match.
fn connect_sinks(
    config: &BridgeConfig,
) -> (Option<Arc<dyn Publisher>>, Option<Arc<dyn Publisher>>) {
    let hass: Option<Arc<dyn Publisher>> = config.hass_mqtt.as_ref().map(|endpoint| {
        Arc::new(MqttPublisher::connect(endpoint, &client_id("hass"))) as Arc<dyn Publisher>
    });
    let venus = match (&config.venus_mqtt, &hass) {
        (Some(endpoint), Some(shared)) if Some(endpoint) == config.hass_mqtt.as_ref() => {
            Some(shared.clone())
        }
        (Some(endpoint), _) => {
            Some(Arc::new(MqttPublisher::connect(endpoint, &client_id("venus"))) as Arc<dyn Publisher>)
        }
        (None, _) => None,
    };
    (hass, venus)
}

fn client_id(sink: &str) -> String {
    format!("janitza-bridge-{sink}-{}", std::process::id())
}

async fn resolve(address: &str) -> anyhow::Result<SocketAddr> {
    lookup_host(address)
        .await
        .with_context(|| format!("resolving Modbus address {address}"))?
        .next()
        .with_context(|| format!("no address found for {address}"))
}
