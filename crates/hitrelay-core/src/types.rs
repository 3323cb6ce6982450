use std::fmt;

use serde::{Deserialize, Serialize};

/// Abstract time unit used by throttles, retries and teardown timers.
pub type Step = u64;

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_key!(
    /// Destination identifier of a shared channel (the endpoint URL).
    DestinationKey
);
string_key!(
    /// Opaque id of one sender, stable for the sender's lifetime.
    SenderId
);
string_key!(
    /// Per-channel token authenticating traffic between host and endpoint.
    Sentinel
);

/// One queued hit bound for a shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: SenderId,
    pub payload: String,
}

impl Message {
    pub fn new(sender_id: SenderId, payload: impl Into<String>) -> Self {
        Self {
            sender_id,
            payload: payload.into(),
        }
    }
}

/// Delivery strategies a sender permits for its hits.
///
/// Presence of `channel` routes every hit through the shared channel for that
/// destination; the boolean flags enable the direct strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    #[serde(alias = "iframe")]
    pub channel: Option<DestinationKey>,
    pub beacon: bool,
    #[serde(alias = "xhrpost", alias = "xhrPost")]
    pub xhr_post: bool,
    pub image: bool,
    /// Auxiliary payload delivered once per channel acquisition.
    #[serde(alias = "extraData")]
    pub extra_data: Option<String>,
}

impl TransportOptions {
    /// Options routing through the shared channel for `destination`.
    pub fn channel(destination: impl Into<DestinationKey>) -> Self {
        Self {
            channel: Some(destination.into()),
            ..Self::default()
        }
    }

    /// Returns true when no strategy at all is requested.
    pub fn requests_nothing(&self) -> bool {
        self.channel.is_none() && !self.beacon && !self.xhr_post && !self.image
    }
}

#[cfg(test)]
mod tests {
    use super::{DestinationKey, TransportOptions};

    #[test]
    fn options_accept_legacy_key_spellings() {
        let parsed: TransportOptions = serde_json::from_str(
            r#"{"iframe":"https://vendor/x","xhrpost":true,"extraData":"abc"}"#,
        )
        .expect("legacy keys should parse");
        assert_eq!(parsed.channel, Some(DestinationKey::new("https://vendor/x")));
        assert!(parsed.xhr_post);
        assert!(!parsed.beacon);
        assert_eq!(parsed.extra_data.as_deref(), Some("abc"));
    }

    #[test]
    fn empty_options_request_nothing() {
        assert!(TransportOptions::default().requests_nothing());
        assert!(!TransportOptions::channel("https://vendor/x").requests_nothing());
        let image_only = TransportOptions {
            image: true,
            ..TransportOptions::default()
        };
        assert!(!image_only.requests_nothing());
    }
}
