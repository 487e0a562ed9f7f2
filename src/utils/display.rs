use chrono::{DateTime, Duration, Utc};

/// Display a u32 as dotted (E.g. large ASNs "65000.100")
/// Values under 16-bits are displayed as a single number
pub fn u32_to_dotted(value: u32, sep: char) -> String {
    if value < u32::from(u16::MAX) {
        format!("{}", value)
    } else {
        format!("{}{}{}", value >> 16, sep, value & 0xffff)
    }
}

pub fn get_elapsed_time(time: DateTime<Utc>) -> Duration {
    Utc::now().signed_duration_since(time)
}

pub fn format_time_as_elapsed(time: DateTime<Utc>) -> String {
    format_elapsed_time(get_elapsed_time(time))
}

pub fn format_elapsed_time(elapsed: Duration) -> String {
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() - (days * 24);
    let mins = elapsed.num_minutes() - (days * 1440) - (hours * 60);
    let secs = elapsed.num_seconds() - (mins * 60) - (days * 86400) - (hours * 3600);
    if days > 0 {
        format!("{}d{:02}h{:02}m", days, hours, mins)
    } else if hours > 0 {
        format!("{:02}h{:02}m{:02}s", hours, mins, secs)
    } else {
        format!("{:02}m{:02}s", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed_time() {
        assert_eq!(format_elapsed_time(Duration::seconds(30)), "00m30s");
        assert_eq!(format_elapsed_time(Duration::seconds(90)), "01m30s");
        assert_eq!(format_elapsed_time(Duration::seconds(3700)), "01h01m40s");
        assert_eq!(format_elapsed_time(Duration::seconds(90060)), "1d01h01m");
    }
}
