//! Bot detection and visitor identity helpers

const BOT_MARKERS: [&str; 3] = ["bot", "crawl", "spider"];

/// Whether a user agent looks like an automated client
pub fn is_bot(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent else {
        return false;
    };
    let ua = ua.to_lowercase();
    BOT_MARKERS.iter().any(|marker| ua.contains(marker))
}

/// Resolve the visitor id, falling back to `ip + "-" + user_agent`
pub fn resolve_visitor_id(
    visitor_id: Option<&str>,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> String {
    match visitor_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{}-{}", ip.unwrap_or_default(), user_agent.unwrap_or_default()),
    }
}
