use adaptcast_core::ClientRecord;

/// A receiver output line that carries telemetry. Everything else the
/// receiver prints is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryLine {
    Buffering,
    Cache(u64),
    Dropped(u64),
    Playing,
    InputBitrate(u64),
    LostPictures(u64),
}

impl TelemetryLine {
    pub fn apply(self, record: &mut ClientRecord) {
        match self {
            TelemetryLine::Buffering => record.set_buffering(true),
            TelemetryLine::Playing => record.set_buffering(false),
            TelemetryLine::Cache(percent) => {
                record.set_cache_percent(i64::try_from(percent).unwrap_or(i64::MAX));
            }
            TelemetryLine::Dropped(count) | TelemetryLine::LostPictures(count) => {
                record.set_dropped_frames(count);
            }
            // No input flowing into the player means it is starved.
            TelemetryLine::InputBitrate(0) => {
                record.set_buffering(true);
                record.set_cache_percent(0);
            }
            TelemetryLine::InputBitrate(_) => {
                record.set_buffering(false);
                record.set_cache_percent(100);
            }
        }
    }
}

/// Classifies one line. Unsolicited status lines win over `stats` reply rows.
pub fn parse_line(line: &str) -> Option<TelemetryLine> {
    let line = strip_decorations(line);
    if line.is_empty() {
        return None;
    }
    parse_passive(line).or_else(|| parse_stats_reply(line))
}

fn parse_passive(line: &str) -> Option<TelemetryLine> {
    if line.contains("buffering") {
        return Some(TelemetryLine::Buffering);
    }
    if line.starts_with("cache:") {
        return Some(TelemetryLine::Cache(extract_number(line)));
    }
    if line.starts_with("drop:") {
        return Some(TelemetryLine::Dropped(extract_number(line)));
    }
    if line.contains("playing") {
        return Some(TelemetryLine::Playing);
    }
    None
}

fn parse_stats_reply(line: &str) -> Option<TelemetryLine> {
    if line.starts_with("input bitrate") {
        return Some(TelemetryLine::InputBitrate(extract_number(line)));
    }
    if line.starts_with("lost pictures") {
        return Some(TelemetryLine::LostPictures(extract_number(line)));
    }
    None
}

// The stats table prefixes rows with "| " and the console may echo a "> " prompt.
fn strip_decorations(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['|', '>'])
        .trim_start()
}

/// Keeps only the ASCII digits of `line` and parses them. No digits, or a
/// value that does not fit, reads as 0.
pub fn extract_number(line: &str) -> u64 {
    let digits: String = line.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}
