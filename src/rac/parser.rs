//! Parser for the block-structured text output of the rac utility.
//!
//! rac prints zero or more records separated by blank lines, each record
//! being a sequence of `key : value` lines. Depending on platform locale
//! the output may arrive as Windows-1251 instead of UTF-8.

use ahash::AHashMap as HashMap;
use encoding_rs::WINDOWS_1251;

/// One parsed record: field name to string value.
pub type Record = HashMap<String, String>;

/// Decodes raw rac output into the working string encoding.
///
/// Valid UTF-8 passes through untouched; anything else is treated as
/// Windows-1251, which covers the legacy Cyrillic console locale.
fn decode_output(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = WINDOWS_1251.decode(raw);
            decoded.into_owned()
        }
    }
}

/// Parses raw rac output bytes into a list of records.
///
/// Total over arbitrary input: malformed bytes or garbage lines degrade to
/// fewer fields, worst case an empty list. Lines without a colon are
/// ignored; values keep any colons after the first one; duplicate keys
/// within a record keep the last occurrence. Empty blocks are dropped.
pub fn parse_records(raw: &[u8]) -> Vec<Record> {
    parse_text(&decode_output(raw))
}

/// Parses already-decoded rac output into a list of records.
pub fn parse_text(text: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current = Record::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');

        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        // Split on the first colon only; timestamps and addresses keep
        // their embedded colons in the value.
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            current.insert(key.to_string(), value.trim().to_string());
        }
    }

    if !current.is_empty() {
        records.push(current);
    }

    records
}

/// Reads a field as f64, returning 0.0 for absent or non-numeric values.
pub fn numeric_field(record: &Record, key: &str) -> f64 {
    record
        .get(key)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_blocks() {
        let input = b"session-id : 1\nuser-name : ivanov\n\nsession-id : 2\nuser-name : petrov\n";
        let records = parse_records(input);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["session-id"], "1");
        assert_eq!(records[1]["user-name"], "petrov");
    }

    #[test]
    fn keeps_colons_after_the_first() {
        let records = parse_text("started-at : 2024-05-17T10:32:01\n");
        assert_eq!(records[0]["started-at"], "2024-05-17T10:32:01");
    }

    #[test]
    fn trims_whitespace_and_carriage_returns() {
        let records = parse_text("  name  :  accounting  \r\n");
        assert_eq!(records[0]["name"], "accounting");
    }

    #[test]
    fn drops_empty_blocks_and_garbage_lines() {
        let input = "\n\nno colon here\n\nkey : value\n\n\n";
        let records = parse_text(input);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["key"], "value");
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let records = parse_text("state : old\nstate : new\n");
        assert_eq!(records[0]["state"], "new");
    }

    #[test]
    fn decodes_windows_1251_output() {
        // "имя : база" in Windows-1251
        let raw: &[u8] = &[
            0xE8, 0xEC, 0xFF, b' ', b':', b' ', 0xE1, 0xE0, 0xE7, 0xE0, b'\n',
        ];
        let records = parse_records(raw);
        assert_eq!(records[0]["имя"], "база");
    }

    #[test]
    fn never_panics_on_arbitrary_bytes() {
        let inputs: [&[u8]; 4] = [
            &[0xFF, 0xFE, 0x00, 0x3A, 0x0A],
            &[0x3A, 0x3A, 0x3A],
            b"::::\n\n::\n",
            &[],
        ];
        for raw in inputs {
            let _ = parse_records(raw);
        }
        assert!(parse_records(&[]).is_empty());
    }

    #[test]
    fn empty_key_lines_are_ignored() {
        let records = parse_text(" : orphan value\nname : x\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0]["name"], "x");
    }

    #[test]
    fn numeric_field_defaults_to_zero() {
        let records = parse_text("memory-current : 1024\nuser-name : ivanov\n");
        assert_eq!(numeric_field(&records[0], "memory-current"), 1024.0);
        assert_eq!(numeric_field(&records[0], "user-name"), 0.0);
        assert_eq!(numeric_field(&records[0], "missing"), 0.0);
    }
}
