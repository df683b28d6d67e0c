//! Minimal CSV codec for access logs.
//!
//! Every field is written quoted, with embedded quotes doubled (RFC 4180),
//! so anything [`encode_record`] produces is read back verbatim by
//! [`decode`] and by any standard CSV reader.

use indexmap::IndexMap;
use thiserror::Error;

/// One decoded data row, keyed by the header's column names in order.
pub type CsvRecord = IndexMap<String, String>;

/// Errors from [`decode`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsvError {
    /// A quoted field was still open at end of input.
    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote {
        /// 1-based line where the quoted field began.
        line: usize,
    },
}

/// Encode one record as a quoted, comma-separated, newline-terminated line.
pub fn encode_record<I, S>(fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push('"');
        line.push_str(&field.as_ref().replace('"', "\"\""));
        line.push('"');
    }
    line.push('\n');
    line.into_bytes()
}

/// Decode CSV text into records, using the first row as column names.
///
/// Blank lines are skipped. A row shorter than the header lacks the
/// trailing columns; extra fields beyond the header are dropped.
pub fn decode(text: &str) -> Result<Vec<CsvRecord>, CsvError> {
    let mut rows = parse_rows(text)?.into_iter();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };

    Ok(rows
        .map(|fields| header.iter().cloned().zip(fields).collect())
        .collect())
}

fn parse_rows(text: &str) -> Result<Vec<Vec<String>>, CsvError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut row_has_content = false;
    let mut in_quotes = false;
    let mut line = 1;
    let mut quote_line = 1;

    let mut end_row = |row: &mut Vec<String>, field: &mut String, has_content: &mut bool| {
        if *has_content {
            row.push(std::mem::take(field));
            rows.push(std::mem::take(row));
        }
        field.clear();
        *has_content = false;
    };

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                quote_line = line;
                row_has_content = true;
            }
            ',' => {
                row.push(std::mem::take(&mut field));
                row_has_content = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\r' | '\n' => {
                line += 1;
                end_row(&mut row, &mut field, &mut row_has_content);
            }
            _ => {
                field.push(c);
                row_has_content = true;
            }
        }
    }

    if in_quotes {
        return Err(CsvError::UnterminatedQuote { line: quote_line });
    }
    end_row(&mut row, &mut field, &mut row_has_content);

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_quotes_every_field() {
        let bytes = encode_record(["Time", "Offset", ""]);
        assert_eq!(bytes, b"\"Time\",\"Offset\",\"\"\n");
    }

    #[test]
    fn test_round_trip_plain_fields() {
        let mut text = String::from_utf8(encode_record(["Offset", "Length", "ProcessName"])).unwrap();
        text.push_str(std::str::from_utf8(&encode_record(["0", "512", "cat"])).unwrap());

        let records = decode(&text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["Offset"], "0");
        assert_eq!(records[0]["Length"], "512");
        assert_eq!(records[0]["ProcessName"], "cat");
        let columns: Vec<_> = records[0].keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["Offset", "Length", "ProcessName"]);
    }

    #[test]
    fn test_round_trip_embedded_quotes_and_commas() {
        let name = r#"my "quoted", proc"#;
        let mut bytes = encode_record(["ProcessName"]);
        bytes.extend(encode_record([name]));

        let records = decode(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(records[0]["ProcessName"], name);
    }

    #[test]
    fn test_decode_header_only() {
        let records = decode("\"a\",\"b\"\n").unwrap();
        assert!(records.is_empty());
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_unquoted_crlf_and_blank_lines() {
        let records = decode("a,b\r\n\r\n1,2\r\n3,4").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], "3");
        assert_eq!(records[1]["b"], "4");
    }

    #[test]
    fn test_decode_short_row_lacks_columns() {
        let records = decode("a,b,c\n1,2\n").unwrap();
        assert_eq!(records[0].get("b").map(String::as_str), Some("2"));
        assert!(records[0].get("c").is_none());
    }

    #[test]
    fn test_decode_newline_inside_quotes() {
        let records = decode("a\n\"line1\nline2\"\n").unwrap();
        assert_eq!(records[0]["a"], "line1\nline2");
    }

    #[test]
    fn test_decode_unterminated_quote() {
        let err = decode("a\n1\n\"oops").unwrap_err();
        assert_eq!(err, CsvError::UnterminatedQuote { line: 3 });
    }
}
