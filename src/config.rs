use std::{env, fmt};

use url::{Host, Url};

use crate::error::BridgeError;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker address of an MQTT sink.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MqttEndpoint {
    /// Accepts `mqtt://[user[:password]@]host[:port]`, the same with `tcp://`,
    /// or a bare `host[:port]`.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| {
            BridgeError::Configuration(format!("invalid MQTT endpoint {raw:?}: {reason}"))
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("mqtt://{trimmed}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(invalid("scheme must be mqtt or tcp"));
        }
        if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("unexpected path"));
        }
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host")),
        };

        let username = match url.username() {
            "" => None,
            user => Some(decode_userinfo(user).map_err(|e| invalid(&e))?),
        };
        let password = url
            .password()
            .map(decode_userinfo)
            .transpose()
            .map_err(|e| invalid(&e))?;
        if username.is_none() && password.is_some() {
            return Err(invalid("password without user"));
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
            username,
            password,
        })
    }
}

fn decode_userinfo(raw: &str) -> Result<String, String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| e.to_string())
}

impl fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.username {
            write!(f, "{user}@")?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for MqttEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// How the grid-data sink receives values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenusMode {
    /// One nested document per cycle.
    DbusGrid,
    /// One message per metric.
    DbusMqtt,
}

impl VenusMode {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        match raw {
            "dbus-grid" => Ok(Self::DbusGrid),
            "dbus-mqtt" => Ok(Self::DbusMqtt),
            other => Err(BridgeError::Configuration(format!(
                "JANITZA_VENUS_MQTT_MODE must be dbus-grid or dbus-mqtt, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub modbus_host: String,
    pub modbus_port: u16,
    pub modbus_unit: u8,
    pub hass_mqtt: Option<MqttEndpoint>,
    pub hass_prefix: String,
    pub hass_discovery_prefix: Option<String>,
    pub venus_mqtt: Option<MqttEndpoint>,
    pub venus_mode: VenusMode,
    pub venus_grid_topic: String,
    pub venus_prefix: String,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, BridgeError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| BridgeError::Configuration(format!("{key} is required")))
        };

        let modbus_host = required("JANITZA_MODBUS_HOST")?;
        let modbus_port = parse_number(&required("JANITZA_MODBUS_PORT")?, "JANITZA_MODBUS_PORT")?;
        let modbus_unit = parse_number(&required("JANITZA_MODBUS_UNIT")?, "JANITZA_MODBUS_UNIT")?;

        let hass_mqtt = get("JANITZA_HASS_MQTT")
            .map(|raw| MqttEndpoint::parse(&raw))
            .transpose()?;
        let venus_mqtt = get("JANITZA_VENUS_MQTT")
            .map(|raw| MqttEndpoint::parse(&raw))
            .transpose()?;
        let venus_mode = get("JANITZA_VENUS_MQTT_MODE")
            .map(|raw| VenusMode::parse(&raw))
            .transpose()?
            .unwrap_or(VenusMode::DbusGrid);

        Ok(Self {
            modbus_host,
            modbus_port,
            modbus_unit,
            hass_mqtt,
            hass_prefix: get("JANITZA_HASS_MQTT_PREFIX")
                .unwrap_or_else(|| "janitza-ruby/".to_string()),
            hass_discovery_prefix: get("JANITZA_HASS_DISCOVERY_PREFIX"),
            venus_mqtt,
            venus_mode,
            venus_grid_topic: get("JANITZA_VENUS_MQTT_GRID_TOPIC")
                .unwrap_or_else(|| "janitza-ruby/dbus-grid".to_string()),
            venus_prefix: get("JANITZA_VENUS_MQTT_PREFIX").unwrap_or_default(),
        })
    }

    pub fn modbus_address(&self) -> String {
        format!("{}:{}", self.modbus_host, self.modbus_port)
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, BridgeError> {
    raw.trim()
        .parse()
        .map_err(|_| BridgeError::Configuration(format!("{key} is not a valid number: {raw:?}")))
}
