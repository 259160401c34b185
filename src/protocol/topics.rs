//! Topic conventions for panel telemetry
//!
//! Sensor readings arrive on `solar/panel/<panel_id>/data`, commands leave on
//! `solar/commands/<device_id>`, and the auxiliary device topics all follow
//! `prefix/<id>/suffix` with the id as the third segment.

/// Wildcard filter covering every sensor topic
pub const SENSOR_SUBSCRIPTION: &str = "solar/panel/#";

/// Generic panel data, stored without inference
pub const PANEL_DATA_SUBSCRIPTION: &str = "solar/panels/+/data";

/// Cleaning-device status updates
pub const CLEANING_STATUS_SUBSCRIPTION: &str = "solar/cleaning/+/status";

/// Alerts raised by devices
pub const ALERT_SUBSCRIPTION: &str = "solar/alerts/+/message";

/// Sentinel for topics that carry no usable identifier
pub const UNKNOWN_ID: &str = "unknown";

const SENSOR_PREFIX: [&str; 2] = ["solar", "panel"];
const COMMAND_PREFIX: &str = "solar/commands";

/// Trailing segments that name a message kind rather than a device
const RESERVED_SUFFIXES: [&str; 3] = ["data", "status", "command"];

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build sensor topic: `solar/panel/{panel_id}/data`
    pub fn build_sensor_topic(panel_id: &str) -> String {
        format!("{}/{}/{panel_id}/data", SENSOR_PREFIX[0], SENSOR_PREFIX[1])
    }

    /// Build device command topic: `solar/commands/{device_id}`
    pub fn build_command_topic(device_id: &str) -> String {
        format!("{COMMAND_PREFIX}/{device_id}")
    }
}

/// Derive the panel identifier of a sensor topic
///
/// Rules, applied in order:
/// 1. `solar/panel/<id>/...` yields the third segment.
/// 2. Otherwise, with at least two segments, the last segment is used unless
///    it is a reserved suffix (`data`, `status`, `command`), in which case the
///    second-to-last segment is used, provided there are at least three.
/// 3. Anything else, or an empty identifier, yields [`UNKNOWN_ID`].
pub fn panel_id_from_topic(topic: &str) -> String {
    let parts: Vec<&str> = topic.split('/').collect();

    let candidate = if parts.len() >= 3
        && parts[0] == SENSOR_PREFIX[0]
        && parts[1] == SENSOR_PREFIX[1]
    {
        Some(parts[2])
    } else if parts.len() >= 2 {
        let last = parts[parts.len() - 1];
        if !RESERVED_SUFFIXES.contains(&last) {
            Some(last)
        } else if parts.len() >= 3 {
            Some(parts[parts.len() - 2])
        } else {
            None
        }
    } else {
        None
    };

    match candidate {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => UNKNOWN_ID.to_string(),
    }
}

/// Identifier of an auxiliary device topic (`prefix/<id>/suffix`)
pub fn source_id_from_topic(topic: &str) -> String {
    match topic.split('/').nth(2) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => UNKNOWN_ID.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_topic_construction() {
        assert_eq!(
            TopicBuilder::build_sensor_topic("panel1"),
            "solar/panel/panel1/data"
        );
        assert_eq!(
            TopicBuilder::build_command_topic("cleaner-7"),
            "solar/commands/cleaner-7"
        );
    }

    #[test]
    fn test_panel_id_from_sensor_prefix() {
        assert_eq!(panel_id_from_topic("solar/panel/panel1/data"), "panel1");
        assert_eq!(panel_id_from_topic("solar/panel/panel1"), "panel1");
        assert_eq!(panel_id_from_topic("solar/panel/p9/data/extra"), "p9");
    }

    #[test]
    fn test_panel_id_from_last_segment() {
        assert_eq!(panel_id_from_topic("site/roof/west-array"), "west-array");
        assert_eq!(panel_id_from_topic("devices/p42"), "p42");
    }

    #[test]
    fn test_panel_id_skips_reserved_suffix() {
        assert_eq!(panel_id_from_topic("site/p42/data"), "p42");
        assert_eq!(panel_id_from_topic("site/p42/status"), "p42");
        assert_eq!(panel_id_from_topic("site/p42/command"), "p42");
    }

    #[test]
    fn test_panel_id_unknown_fallbacks() {
        assert_eq!(panel_id_from_topic("panel1"), UNKNOWN_ID);
        assert_eq!(panel_id_from_topic("x/data"), UNKNOWN_ID);
        assert_eq!(panel_id_from_topic("solar/panel/"), UNKNOWN_ID);
        assert_eq!(panel_id_from_topic(""), UNKNOWN_ID);
    }

    #[test]
    fn test_source_id_from_topic() {
        assert_eq!(source_id_from_topic("solar/cleaning/device1/status"), "device1");
        assert_eq!(source_id_from_topic("solar/alerts/a-17/message"), "a-17");
        assert_eq!(source_id_from_topic("solar/alerts"), UNKNOWN_ID);
        assert_eq!(source_id_from_topic("solar/alerts//message"), UNKNOWN_ID);
    }

    proptest! {
        #[test]
        fn sensor_topic_round_trips_panel_id(panel_id in "[a-zA-Z0-9_-]{1,16}") {
            let topic = TopicBuilder::build_sensor_topic(&panel_id);
            prop_assert_eq!(panel_id_from_topic(&topic), panel_id);
        }

        #[test]
        fn panel_id_is_never_empty(topic in "[a-z/]{0,24}") {
            prop_assert!(!panel_id_from_topic(&topic).is_empty());
        }
    }
}
