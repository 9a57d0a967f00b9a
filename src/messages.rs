use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message type tag of this game's traffic on a shared bus.
pub const HOT_POTATO_TYPE: &str = "hotpotato";

/// Instance identifier handed out by the service directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        InstanceId(id.into())
    }

    /// A fresh id made of 16 random bytes.
    pub fn random() -> Self {
        InstanceId(random_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_hex() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Message route, written `id@service:/` for a single instance or
/// `service:/` for every instance of a service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    Instance { id: InstanceId, service: String },
    Service(String),
}

impl Address {
    pub fn instance<S: Into<String>>(id: InstanceId, service: S) -> Self {
        Address::Instance { id, service: service.into() }
    }

    pub fn service<S: Into<String>>(service: S) -> Self {
        Address::Service(service.into())
    }

    pub fn service_name(&self) -> &str {
        match self {
            Address::Instance { service, .. } => service,
            Address::Service(service) => service,
        }
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        match self {
            Address::Instance { id, .. } => Some(id),
            Address::Service(_) => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Instance { id, service } => write!(f, "{}@{}:/", id, service),
            Address::Service(service) => write!(f, "{}:/", service),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed address {0:?}")]
pub struct AddressError(String);

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let route = s.strip_suffix(":/")
            .ok_or_else(|| AddressError(s.to_string()))?;
        match route.split_once('@') {
            Some((id, service)) if !id.is_empty() && !service.is_empty() => {
                Ok(Address::instance(InstanceId::new(id), service))
            }
            None if !route.is_empty() => Ok(Address::service(route)),
            _ => Err(AddressError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> String {
        address.to_string()
    }
}

/// A message as carried by the service directory. The body stays opaque
/// JSON until the receiver knows the message is one of its own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub mid: String,
    pub timestamp: DateTime<Utc>,
    pub to: Address,
    pub from: Address,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn new<B>(to: Address, from: Address, kind: &str, body: &B) -> Self
        where B: Serialize
    {
        Envelope {
            mid: random_hex(),
            timestamp: Utc::now(),
            to,
            from,
            kind: kind.to_string(),
            // a derived Serialize into a Value cannot fail
            body: serde_json::to_value(body).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Wraps a game body in a hot potato envelope.
    pub fn hot_potato(to: Address, from: Address, body: &Body) -> Self {
        Envelope::new(to, from, HOT_POTATO_TYPE, body)
    }

    pub fn is_hot_potato(&self) -> bool {
        self.kind == HOT_POTATO_TYPE
    }

    /// The `expiration` carried by the body, whatever its `command`.
    pub fn expiration(&self) -> Option<i64> {
        self.body.get("expiration").and_then(serde_json::Value::as_i64)
    }

    pub fn decode_body<T>(&self) -> Result<T, serde_json::Error>
        where T: DeserializeOwned
    {
        T::deserialize(&self.body)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Body {
    /// The live token; `expiration` is in unix seconds.
    HotPotato { expiration: i64 },
    GameOver { result: String },
}
