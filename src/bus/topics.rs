/// MQTT topic filter matching.
///
/// - `+` matches exactly one level
/// - `#` matches the remaining levels, including none, when it is the last
///   level of the filter
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();

    while let Some(filter_level) = filter_levels.next() {
        if filter_level == "#" && filter_levels.peek().is_none() {
            return true;
        }
        match topic_levels.next() {
            Some(_) if filter_level == "+" => {}
            Some(topic_level) if topic_level == filter_level => {}
            _ => return false,
        }
    }
    topic_levels.next().is_none()
}
