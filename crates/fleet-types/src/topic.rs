/// 遥测主题前缀，后接设备标识
pub const STATUS_TOPIC_PREFIX: &str = "status-";

/// 指令主题前缀，后接设备标识
pub const COMMAND_TOPIC_PREFIX: &str = "command-";

/// 从遥测主题提取设备标识；无前缀的主题按原样作为标识
pub fn device_id_from_topic(topic: &str) -> &str {
    topic.strip_prefix(STATUS_TOPIC_PREFIX).unwrap_or(topic)
}

/// 构造某设备的指令主题
pub fn command_topic(device_id: &str) -> String {
    format!("{}{}", COMMAND_TOPIC_PREFIX, device_id)
}

/// 指令回显主题（编排器自己发出的消息），入站时须丢弃
pub fn is_command_echo(topic: &str) -> bool {
    topic.starts_with(COMMAND_TOPIC_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_status_prefix() {
        assert_eq!(device_id_from_topic("status-X22_0C_A6_D2"), "X22_0C_A6_D2");
        assert_eq!(device_id_from_topic("X22_0C_A6_D2"), "X22_0C_A6_D2");
    }

    #[test]
    fn command_topics_are_echoes() {
        assert!(is_command_echo(&command_topic("X22_0C_A6_D2")));
        assert!(!is_command_echo("status-X22_0C_A6_D2"));
    }
}
