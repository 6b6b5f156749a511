//! Topic encoding and decoding.
//!
//! Every cloud topic has the shape
//! `[<controlPrefix>/]<account>/<deviceId>/<appId>[/<appTopic>]`.
//! For request traffic the first app-topic segment is the method token and
//! the remaining segments name the resources the request addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Envelope;

/// Suffix segment that marks a reply topic
pub const REPLY_SEGMENT: &str = "REPLY";

/// Whether a topic lives under the control prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Data,
    Control,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Data => write!(f, "data"),
            MessageType::Control => write!(f, "control"),
        }
    }
}

/// Request method token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Del,
    Exec,
    /// Any token outside the known set; carried verbatim for error reporting
    Unknown(String),
}

impl Method {
    /// Parse a method token. Never fails; unknown tokens yield [`Method::Unknown`].
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            "POST" => Method::Post,
            "DEL" => Method::Del,
            "EXEC" => Method::Exec,
            other => Method::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Del => "DEL",
            Method::Exec => "EXEC",
            Method::Unknown(token) => token,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Method::Unknown(_))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic layout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicOptions {
    /// Prefix prepended to control topics
    #[serde(default = "default_control_prefix")]
    pub control_prefix: String,
    /// Segment separator
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Account token used for locally produced topics
    #[serde(default = "default_account_name")]
    pub account_name: String,
    /// Device (client) id used for locally produced topics
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_control_prefix() -> String {
    "$EDC".to_string()
}

fn default_separator() -> String {
    "/".to_string()
}

fn default_account_name() -> String {
    "account-name".to_string()
}

fn default_client_id() -> String {
    "kura-gateway".to_string()
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            control_prefix: default_control_prefix(),
            separator: default_separator(),
            account_name: default_account_name(),
            client_id: default_client_id(),
        }
    }
}

/// A full topic split into its fixed parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub message_type: MessageType,
    pub account: String,
    pub device_id: String,
    pub app_id: String,
    /// Everything after the app id; empty when absent
    pub app_topic: String,
}

/// Encodes and decodes cloud topics
#[derive(Debug, Clone, Default)]
pub struct TopicCodec {
    options: TopicOptions,
}

impl TopicCodec {
    pub fn new(options: TopicOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TopicOptions {
        &self.options
    }

    /// Compose a full topic. An empty suffix adds no trailing separator.
    ///
    /// ```
    /// # use kura_core::topic::{MessageType, TopicCodec};
    /// let codec = TopicCodec::default();
    /// assert_eq!(
    ///     codec.encode(MessageType::Control, "acme", "gw-1", "heater", "GET/config"),
    ///     "$EDC/acme/gw-1/heater/GET/config"
    /// );
    /// assert_eq!(codec.encode(MessageType::Data, "acme", "gw-1", "heater", ""), "acme/gw-1/heater");
    /// ```
    pub fn encode(
        &self,
        kind: MessageType,
        account: &str,
        device_id: &str,
        app_id: &str,
        suffix: &str,
    ) -> String {
        let sep = self.options.separator.as_str();
        let mut topic = String::new();
        if kind == MessageType::Control {
            topic.push_str(&self.options.control_prefix);
            topic.push_str(sep);
        }
        topic.push_str(account);
        topic.push_str(sep);
        topic.push_str(device_id);
        topic.push_str(sep);
        topic.push_str(app_id);
        if !suffix.is_empty() {
            topic.push_str(sep);
            topic.push_str(suffix);
        }
        topic
    }

    /// [`encode`](Self::encode) with the configured account and client id
    pub fn encode_local(&self, kind: MessageType, app_id: &str, suffix: &str) -> String {
        self.encode(
            kind,
            &self.options.account_name,
            &self.options.client_id,
            app_id,
            suffix,
        )
    }

    /// Topic a reply to `request_id` is published on: a control topic
    /// addressed to the requester, suffixed `REPLY/<requestId>`.
    pub fn reply_topic(&self, requester_id: &str, app_id: &str, request_id: &str) -> String {
        self.encode(
            MessageType::Control,
            &self.options.account_name,
            requester_id,
            app_id,
            &format!("{}/{}", REPLY_SEGMENT, request_id),
        )
    }

    /// Split an application topic into method and resources
    ///
    /// ```
    /// # use kura_core::topic::{Method, TopicCodec};
    /// let codec = TopicCodec::default();
    /// let (method, resources) = codec.decode("PUT/config/mode");
    /// assert_eq!(method, Method::Put);
    /// assert_eq!(resources, vec!["config", "mode"]);
    /// ```
    pub fn decode(&self, app_topic: &str) -> (Method, Vec<String>) {
        let mut segments = app_topic.split(self.options.separator.as_str());
        let method = Method::parse(segments.next().unwrap_or_default());
        let resources = segments
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (method, resources)
    }

    /// Whether `topic` matches the wildcard `filter` under this codec's separator
    pub fn matches(&self, filter: &str, topic: &str) -> bool {
        topic_matches_with(filter, topic, &self.options.separator)
    }

    /// Split a full topic into prefix kind, account, device, app and app topic
    pub fn parse(&self, topic: &str) -> Option<ParsedTopic> {
        let sep = self.options.separator.as_str();
        let control_head = format!("{}{}", self.options.control_prefix, sep);
        let (message_type, rest) = match topic.strip_prefix(control_head.as_str()) {
            Some(rest) => (MessageType::Control, rest),
            None => (MessageType::Data, topic),
        };

        let mut parts = rest.splitn(4, sep);
        let account = parts.next()?;
        let device_id = parts.next()?;
        let app_id = parts.next()?;
        if account.is_empty() || device_id.is_empty() || app_id.is_empty() {
            return None;
        }

        Some(ParsedTopic {
            message_type,
            account: account.to_string(),
            device_id: device_id.to_string(),
            app_id: app_id.to_string(),
            app_topic: parts.next().unwrap_or_default().to_string(),
        })
    }
}

/// Replace `$name` placeholders with the matching metric values.
///
/// A name runs until whitespace or `/`. Placeholders with no matching
/// metric are left as written.
///
/// ```
/// # use kura_core::{models::Envelope, topic::expand_placeholders};
/// let env = Envelope::new().with_metric("room", "kitchen");
/// assert_eq!(expand_placeholders("rooms/$room/$floor", &env), "rooms/kitchen/$floor");
/// ```
pub fn expand_placeholders(template: &str, envelope: &Envelope) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(after.len());
        let name = &after[..end];

        match envelope.metric(name) {
            Some(value) if !name.is_empty() => out.push_str(&value.to_string()),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[end..];
    }

    out.push_str(rest);
    out
}

/// MQTT-style filter match (`+` one level, `#` the rest) on `/`-separated topics
///
/// ```
/// # use kura_core::topic::topic_matches;
/// assert!(topic_matches("sensors/+/temp", "sensors/kitchen/temp"));
/// assert!(topic_matches("sensors/#", "sensors/kitchen/temp"));
/// assert!(!topic_matches("sensors/+", "sensors/kitchen/temp"));
/// ```
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    topic_matches_with(filter, topic, "/")
}

/// [`topic_matches`] with levels split on `separator`
pub fn topic_matches_with(filter: &str, topic: &str, separator: &str) -> bool {
    let mut filter_levels = filter.split(separator);
    let mut topic_levels = topic.split(separator);
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
