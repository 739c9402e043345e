use once_cell::sync::Lazy;
use regex::Regex;

static MEETING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^webrtc-(.+)$").unwrap());

/// Channel name shared by all participants of one meeting.
pub fn meeting_channel(meeting_id: &str) -> String {
    format!("webrtc-{}", meeting_id)
}

pub fn split_meeting_channel(channel: &str) -> Option<String> {
    MEETING_RE.captures(channel).and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}
