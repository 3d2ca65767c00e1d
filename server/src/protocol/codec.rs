//! Record codec for the push protocol
//!
//! Commands go to the device as one `ID={id}\tCMD={verb} {payload}` line
//! each. Replies come back as `&`-delimited `key=value` lines. Field
//! values pass through unescaped; payload substructure (attendance
//! punches, user records) belongs to the data-processing layer, not here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::command::Command;

/// Decoding error for a single reply line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

/// One decoded reply line
///
/// `ID` and `CMD` are required; `Return` and everything else is
/// optional. Unrecognized fields are kept verbatim in `extra` for
/// downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub id: String,
    pub return_code: Option<i64>,
    pub cmd: String,
    pub extra: BTreeMap<String, String>,
}

/// Encode commands for a poll response body
///
/// One line per command, linefeed-terminated. An empty batch encodes to
/// an empty body (the "no pending commands" response).
pub fn encode_commands(commands: &[Command]) -> String {
    let mut body = String::new();
    for cmd in commands {
        body.push_str("ID=");
        body.push_str(&cmd.id.to_string());
        body.push_str("\tCMD=");
        body.push_str(cmd.cmd_type.as_str());
        if !cmd.payload.is_empty() {
            body.push(' ');
            body.push_str(&cmd.payload);
        }
        body.push('\n');
    }
    body
}

/// Decode a reply submission body into per-line results
///
/// Blank lines are skipped. A line missing `ID` or `CMD` yields an
/// error entry for that line only; the rest of the batch still parses.
pub fn decode_replies(body: &str) -> Vec<Result<ReplyRecord, RecordError>> {
    let mut records = Vec::new();

    for raw_line in body.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let mut id = None;
        let mut cmd = None;
        let mut return_code = None;
        let mut extra = BTreeMap::new();

        for field in line.split('&') {
            let Some((key, value)) = field.split_once('=') else {
                // Bare token without '='; devices occasionally pad
                // lines, so tolerate rather than reject.
                continue;
            };
            match key {
                "ID" => id = Some(value.to_string()),
                "CMD" => cmd = Some(value.to_string()),
                "Return" => return_code = value.parse::<i64>().ok(),
                _ => {
                    extra.insert(key.to_string(), value.to_string());
                }
            }
        }

        match (id, cmd) {
            (Some(id), Some(cmd)) => records.push(Ok(ReplyRecord {
                id,
                return_code,
                cmd,
                extra,
            })),
            _ => records.push(Err(RecordError::MalformedRecord(line.to_string()))),
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::CmdType;
    use chrono::{Duration, Utc};

    fn command(id: u64, cmd_type: CmdType, payload: &str) -> Command {
        let now = Utc::now();
        Command::new(id, cmd_type, payload.to_string(), now, now + Duration::seconds(60))
    }

    #[test]
    fn test_encode_with_payload() {
        let cmds = vec![command(3, CmdType::Data, "QUERY ATTLOG")];
        assert_eq!(encode_commands(&cmds), "ID=3\tCMD=DATA QUERY ATTLOG\n");
    }

    #[test]
    fn test_encode_bare_verb() {
        let cmds = vec![command(7, CmdType::Reboot, "")];
        assert_eq!(encode_commands(&cmds), "ID=7\tCMD=REBOOT\n");
    }

    #[test]
    fn test_encode_empty_batch() {
        assert_eq!(encode_commands(&[]), "");
    }

    #[test]
    fn test_encode_preserves_fifo_order() {
        let cmds = vec![
            command(1, CmdType::Check, ""),
            command(2, CmdType::Info, ""),
        ];
        let body = encode_commands(&cmds);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines, vec!["ID=1\tCMD=CHECK", "ID=2\tCMD=INFO"]);
    }

    #[test]
    fn test_decode_single_record() {
        let records = decode_replies("ID=12&Return=0&CMD=DATA\n");
        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.id, "12");
        assert_eq!(record.return_code, Some(0));
        assert_eq!(record.cmd, "DATA");
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_decode_extra_fields_kept() {
        let records = decode_replies("ID=4&Return=-1021&CMD=DATA&Reason=full\n");
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.return_code, Some(-1021));
        assert_eq!(record.extra.get("Reason").map(String::as_str), Some("full"));
    }

    #[test]
    fn test_decode_missing_return_is_tolerated() {
        let records = decode_replies("ID=9&CMD=CHECK");
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.return_code, None);
    }

    #[test]
    fn test_decode_malformed_line_does_not_abort_batch() {
        let body = "ID=1&Return=0&CMD=DATA\nGarbage line\nID=2&Return=0&CMD=CHECK\n";
        let records = decode_replies(body);
        assert_eq!(records.len(), 3);
        assert!(records[0].is_ok());
        assert!(records[1].is_err());
        assert!(records[2].is_ok());
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let records = decode_replies("\n\nID=1&Return=0&CMD=DATA\n\n");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_ok());
    }

    #[test]
    fn test_decode_crlf_line_endings() {
        let records = decode_replies("ID=1&Return=0&CMD=DATA\r\nID=2&Return=0&CMD=DATA\r\n");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_ok()));
    }
}
