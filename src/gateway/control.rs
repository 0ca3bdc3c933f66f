//! Inbound client control messages (§6): single-frame JSON objects tagged
//! by `type`, with an optional `channels` list from the fixed vocabulary.

use serde::Deserialize;

use crate::models::Channel;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Wire {
    Subscribe { #[serde(default)] channels: Vec<String> },
    Unsubscribe { #[serde(default)] channels: Vec<String> },
    Refresh,
    Ping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Subscribe(Vec<Channel>),
    Unsubscribe(Vec<Channel>),
    Refresh,
    Ping,
}

/// Parses one control frame. Unknown channel names inside a valid message
/// are dropped with a warning at the call site, not treated as a parse
/// error (§4.4): only a malformed frame is a parse error.
pub fn parse(text: &str) -> Result<ControlMessage, serde_json::Error> {
    let wire: Wire = serde_json::from_str(text)?;
    Ok(match wire {
        Wire::Subscribe { channels } => ControlMessage::Subscribe(parse_channels(&channels)),
        Wire::Unsubscribe { channels } => ControlMessage::Unsubscribe(parse_channels(&channels)),
        Wire::Refresh => ControlMessage::Refresh,
        Wire::Ping => ControlMessage::Ping,
    })
}

fn parse_channels(names: &[String]) -> Vec<Channel> {
    names.iter().filter_map(|n| Channel::parse(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe() {
        let msg = parse(r#"{"type":"subscribe","channels":["market_data","orders"]}"#).unwrap();
        assert_eq!(msg, ControlMessage::Subscribe(vec![Channel::MarketData, Channel::Orders]));
    }

    #[test]
    fn unknown_channel_is_silently_dropped_not_a_parse_error() {
        let msg = parse(r#"{"type":"subscribe","channels":["market_data","bogus"]}"#).unwrap();
        assert_eq!(msg, ControlMessage::Subscribe(vec![Channel::MarketData]));
    }

    #[test]
    fn refresh_and_ping_need_no_channels() {
        assert_eq!(parse(r#"{"type":"refresh"}"#).unwrap(), ControlMessage::Refresh);
        assert_eq!(parse(r#"{"type":"ping"}"#).unwrap(), ControlMessage::Ping);
    }

    #[test]
    fn malformed_frame_is_a_parse_error() {
        assert!(parse("not json").is_err());
    }
}
