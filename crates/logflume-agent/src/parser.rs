//! Line parser for the three recognized log formats.
//!
//! Formats are tried in order; each is a `(regex, extractor)` pair and
//! adding a format is adding a variant. A line that matches no format, or
//! whose timestamp does not parse under the format's layout, is dropped
//! (the caller counts it). The entry timestamp always comes from the line.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime};
use logflume_proto::LogEntry;
use regex::Regex;

/// Recognized line shapes, in match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `[<iso-timestamp>] [<LEVEL>] [<service>] <message>`
    Application,
    /// `<dd-MMM-yyyy HH:mm:ss.SSS> <WORD> [<module>] <message>`
    ServerApplication,
    /// Combined access-log shape with an explicit status code.
    HttpAccess,
}

const LEVELS: [&str; 4] = ["ERROR", "WARN", "INFO", "DEBUG"];

/// Parsed pieces of one line before entry assembly.
struct Parsed {
    timestamp_ns: i64,
    level: String,
    service: String,
    message: String,
}

pub struct LogParser {
    agent_id: String,
    application: Regex,
    server_application: Regex,
    http_access: Regex,
}

impl LogParser {
    // The shapes are fixed; compilation cannot fail.
    #[allow(clippy::expect_used)]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            application: Regex::new(r#"^\[([^\]]+)\]\s+\[(\S+)\]\s+\[([^\]]+)\]\s+(.*)"#)
                .expect("application log regex"),
            server_application: Regex::new(
                r#"^(\d{2}-[A-Za-z]{3}-\d{4}\s+\d{2}:\d{2}:\d{2}\.\d{3})\s+(\S+)\s+\[([^\]]+)\]\s+(.*)"#,
            )
            .expect("server application log regex"),
            http_access: Regex::new(
                r#"^(\S+)\s+-\s+-\s+\[([^\]]+)\]\s+"(\S+)\s+(\S+)\s+(\S+)"\s+(\d+)\s+(\d+)\s+"([^"]*)"\s+"([^"]*)""#,
            )
            .expect("http access log regex"),
        }
    }

    /// Parses one line into an entry, or `None` when the line matches no
    /// format or its timestamp is unparseable.
    pub fn parse(&self, line: &str, source: &str) -> Option<LogEntry> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let parsed = self
            .parse_application(line)
            .or_else(|| self.parse_server_application(line))
            .or_else(|| self.parse_http_access(line))?;

        let trace_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| format!("trace-{}", d.as_nanos()))
            .unwrap_or_default();

        Some(LogEntry {
            timestamp_ns: parsed.timestamp_ns,
            level: parsed.level,
            message: parsed.message,
            source: source.to_string(),
            agent_id: self.agent_id.clone(),
            fields: HashMap::from([
                ("service".to_string(), parsed.service),
                ("trace_id".to_string(), trace_id),
            ]),
        })
    }

    fn parse_application(&self, line: &str) -> Option<Parsed> {
        let captures = self.application.captures(line)?;
        let raw_ts = &captures[1];
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw_ts, "%Y-%m-%dT%H:%M:%S"))
            .ok()?;

        let token = captures[2].to_uppercase();
        let level = if LEVELS.contains(&token.as_str()) {
            token
        } else {
            "UNKNOWN".to_string()
        };

        Some(Parsed {
            timestamp_ns: timestamp.and_utc().timestamp_nanos_opt()?,
            level,
            service: captures[3].to_string(),
            message: captures[4].to_string(),
        })
    }

    fn parse_server_application(&self, line: &str) -> Option<Parsed> {
        let captures = self.server_application.captures(line)?;
        let timestamp =
            NaiveDateTime::parse_from_str(&captures[1], "%d-%b-%Y %H:%M:%S%.3f").ok()?;

        let level = match &captures[2] {
            "SEVERE" => "ERROR",
            "WARNING" => "WARN",
            _ => "INFO",
        };

        Some(Parsed {
            timestamp_ns: timestamp.and_utc().timestamp_nanos_opt()?,
            level: level.to_string(),
            service: "tomcat".to_string(),
            message: captures[4].to_string(),
        })
    }

    fn parse_http_access(&self, line: &str) -> Option<Parsed> {
        let captures = self.http_access.captures(line)?;
        let timestamp =
            DateTime::parse_from_str(&captures[2], "%d/%b/%Y:%H:%M:%S %z").ok()?;

        let status: u16 = captures[6].parse().ok()?;
        let level = if status >= 500 {
            "ERROR"
        } else if status >= 400 {
            "WARN"
        } else {
            "INFO"
        };

        let message = format!(
            "{} {} {} - Status: {}",
            &captures[3], &captures[4], &captures[5], status
        );

        Some(Parsed {
            timestamp_ns: timestamp.timestamp_nanos_opt()?,
            level: level.to_string(),
            service: "nginx".to_string(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LogParser {
        LogParser::new("agent-test")
    }

    #[test]
    fn parses_application_format() {
        let entry = parser()
            .parse(
                "[2025-11-02T07:10:29.920971] [ERROR] [checkout] payment gateway timed out",
                "/logs/application.log",
            )
            .unwrap();

        assert_eq!(entry.level, "ERROR");
        assert_eq!(entry.message, "payment gateway timed out");
        assert_eq!(entry.fields["service"], "checkout");
        assert_eq!(entry.source, "/logs/application.log");
        assert_eq!(entry.agent_id, "agent-test");
        assert!(entry.fields["trace_id"].starts_with("trace-"));
        // 2025-11-02T07:10:29.920971 UTC in nanoseconds.
        assert_eq!(entry.timestamp_ns, 1_762_067_429_920_971_000);
    }

    #[test]
    fn application_timestamp_without_fraction_still_parses() {
        let entry = parser()
            .parse(
                "[2025-11-02T07:10:29] [INFO] [api] request served",
                "app.log",
            )
            .unwrap();
        assert_eq!(entry.timestamp_ns, 1_762_067_429_000_000_000);
    }

    #[test]
    fn application_unrecognized_level_maps_to_unknown() {
        let entry = parser()
            .parse("[2025-11-02T07:10:29] [TRACE] [api] noisy detail", "app.log")
            .unwrap();
        assert_eq!(entry.level, "UNKNOWN");
    }

    #[test]
    fn parses_server_application_format_with_level_mapping() {
        let p = parser();

        let severe = p
            .parse(
                "02-Nov-2025 07:10:29.920 SEVERE [http-nio-8080-exec-1] servlet blew up",
                "tomcat.log",
            )
            .unwrap();
        assert_eq!(severe.level, "ERROR");
        assert_eq!(severe.fields["service"], "tomcat");
        assert_eq!(severe.message, "servlet blew up");

        let warning = p
            .parse(
                "02-Nov-2025 07:10:29.920 WARNING [main] deprecated connector",
                "tomcat.log",
            )
            .unwrap();
        assert_eq!(warning.level, "WARN");

        let fine = p
            .parse(
                "02-Nov-2025 07:10:29.920 FINE [main] verbose detail",
                "tomcat.log",
            )
            .unwrap();
        assert_eq!(fine.level, "INFO");
    }

    #[test]
    fn parses_http_access_format_with_status_levels() {
        let p = parser();
        let line = |status: u16| {
            format!(
                "192.168.1.10 - - [02/Nov/2025:07:10:29 +0000] \"GET /api/cart HTTP/1.1\" {status} 512 \"-\" \"curl/8.0\""
            )
        };

        let ok = p.parse(&line(200), "nginx.log").unwrap();
        assert_eq!(ok.level, "INFO");
        assert_eq!(ok.message, "GET /api/cart HTTP/1.1 - Status: 200");
        assert_eq!(ok.fields["service"], "nginx");

        let client_err = p.parse(&line(404), "nginx.log").unwrap();
        assert_eq!(client_err.level, "WARN");

        let server_err = p.parse(&line(503), "nginx.log").unwrap();
        assert_eq!(server_err.level, "ERROR");
    }

    #[test]
    fn http_access_timestamp_honours_the_offset() {
        let entry = parser()
            .parse(
                "10.0.0.1 - - [02/Nov/2025:09:10:29 +0200] \"GET / HTTP/1.1\" 200 5 \"-\" \"-\"",
                "nginx.log",
            )
            .unwrap();
        // 09:10:29+02:00 is 07:10:29 UTC.
        assert_eq!(entry.timestamp_ns, 1_762_067_429_000_000_000);
    }

    #[test]
    fn unmatched_lines_are_dropped() {
        let p = parser();
        assert!(p.parse("free-form text without structure", "app.log").is_none());
        assert!(p.parse("", "app.log").is_none());
        assert!(p.parse("   ", "app.log").is_none());
    }

    #[test]
    fn bad_timestamp_drops_the_line() {
        // Matches the application shape but the timestamp is nonsense.
        assert!(parser()
            .parse("[not-a-timestamp] [INFO] [api] hello", "app.log")
            .is_none());
        // Month token the server-application layout cannot digest.
        assert!(parser()
            .parse("02-Nvm-2025 07:10:29.920 SEVERE [main] boom", "tomcat.log")
            .is_none());
    }

    #[test]
    fn formats_are_tried_in_order() {
        // A line that superficially resembles several shapes resolves to
        // the application format first.
        let entry = parser()
            .parse("[2025-11-02T07:10:29] [WARN] [edge] GET /x", "mixed.log")
            .unwrap();
        assert_eq!(entry.fields["service"], "edge");
    }
}
