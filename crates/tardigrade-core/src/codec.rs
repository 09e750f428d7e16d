//! Row codec for the store file
//!
//! A store file is a comma-separated table, one row per [`Record`], fields in
//! this fixed order:
//!
//! ```text
//! hash,timestamp,latitude,longitude,medical_need,shelter,water,people_count,notes,hop_count
//! ```
//!
//! Every field is text. Booleans are written as `true`/`false`. Fields that
//! contain a comma, a double quote, CR or LF are wrapped in double quotes with
//! inner quotes doubled. Rows end with `\n`; blank lines are skipped on read.
//!
//! The same bytes are what a device ships to a peer, so the codec is the
//! compatibility boundary between devices.

use crate::error::CodecError;
use crate::types::{Record, RecordHash};

/// Number of fields in one row
pub const FIELD_COUNT: usize = 10;

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "hash",
    "timestamp",
    "latitude",
    "longitude",
    "medical_need",
    "shelter",
    "water",
    "people_count",
    "notes",
    "hop_count",
];

/// Converts records to rows of text fields and whole files of rows
pub trait RecordCodec: Send + Sync {
    /// Record to ordered text fields
    fn encode_row(&self, record: &Record) -> Vec<String>;

    /// Ordered text fields back to a record; `row` is only used in errors
    fn decode_row(&self, row: usize, fields: &[String]) -> Result<Record, CodecError>;

    /// Serialize a whole table
    fn encode_file(&self, records: &[Record]) -> Vec<u8>;

    /// Parse a whole table
    fn decode_file(&self, data: &[u8]) -> Result<Vec<Record>, CodecError>;
}

/// The comma-separated codec used by the store file and the wire
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

impl RecordCodec for CsvCodec {
    fn encode_row(&self, record: &Record) -> Vec<String> {
        vec![
            record.hash.0.clone(),
            record.timestamp.to_string(),
            format!("{:?}", record.latitude),
            format!("{:?}", record.longitude),
            record.medical_need.to_string(),
            record.shelter.to_string(),
            record.water.to_string(),
            record.people_count.to_string(),
            record.notes.clone(),
            record.hop_count.to_string(),
        ]
    }

    fn decode_row(&self, row: usize, fields: &[String]) -> Result<Record, CodecError> {
        if fields.len() != FIELD_COUNT {
            return Err(CodecError::FieldCount {
                row,
                expected: FIELD_COUNT,
                found: fields.len(),
            });
        }

        Ok(Record {
            hash: RecordHash(fields[0].clone()),
            timestamp: parse_field(row, 1, &fields[1])?,
            latitude: parse_field(row, 2, &fields[2])?,
            longitude: parse_field(row, 3, &fields[3])?,
            medical_need: parse_field(row, 4, &fields[4])?,
            shelter: parse_field(row, 5, &fields[5])?,
            water: parse_field(row, 6, &fields[6])?,
            people_count: parse_field(row, 7, &fields[7])?,
            notes: fields[8].clone(),
            hop_count: parse_field(row, 9, &fields[9])?,
        })
    }

    fn encode_file(&self, records: &[Record]) -> Vec<u8> {
        let mut out = String::new();
        for record in records {
            let fields = self.encode_row(record);
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_field(&mut out, field);
            }
            out.push('\n');
        }
        out.into_bytes()
    }

    fn decode_file(&self, data: &[u8]) -> Result<Vec<Record>, CodecError> {
        let text = std::str::from_utf8(data).map_err(|_| CodecError::InvalidUtf8)?;
        split_rows(text)?
            .into_iter()
            .enumerate()
            .map(|(row, fields)| self.decode_row(row, &fields))
            .collect()
    }
}

fn parse_field<T: std::str::FromStr>(row: usize, index: usize, text: &str) -> Result<T, CodecError> {
    text.trim().parse().map_err(|_| CodecError::InvalidField {
        row,
        field: FIELD_NAMES[index],
        value: text.to_string(),
    })
}

fn write_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Split text into rows of unquoted fields, skipping blank lines
fn split_rows(text: &str) -> Result<Vec<Vec<String>>, CodecError> {
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // Distinguishes `""` (one empty quoted field) from a blank line.
    let mut row_has_content = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                row_has_content = true;
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                row_has_content = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                if row_has_content || !field.is_empty() {
                    fields.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut fields));
                }
                row_has_content = false;
            }
            _ => {
                field.push(c);
                row_has_content = true;
            }
        }
    }

    if in_quotes {
        return Err(CodecError::UnterminatedQuote { row: rows.len() });
    }
    if row_has_content || !field.is_empty() {
        fields.push(field);
        rows.push(fields);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, notes: &str) -> Record {
        Record {
            hash: RecordHash::from(hash),
            timestamp: 1_524_300_000,
            latitude: 45.5231,
            longitude: -122.6765,
            medical_need: 1,
            shelter: true,
            water: false,
            people_count: 3,
            notes: notes.to_string(),
            hop_count: 2,
        }
    }

    #[test]
    fn test_encode_row_field_order() {
        let fields = CsvCodec.encode_row(&record("abc", "hi"));
        assert_eq!(
            fields,
            vec![
                "abc",
                "1524300000",
                "45.5231",
                "-122.6765",
                "1",
                "true",
                "false",
                "3",
                "hi",
                "2"
            ]
        );
    }

    #[test]
    fn test_encode_file_plain_row() {
        let bytes = CsvCodec.encode_file(&[record("abc", "hi")]);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "abc,1524300000,45.5231,-122.6765,1,true,false,3,hi,2\n"
        );
    }

    #[test]
    fn test_notes_with_separators_survive() {
        let records = vec![
            record("a", "needs food, water"),
            record("b", "said \"hello\"\nthen left"),
            record("c", ""),
        ];
        let bytes = CsvCodec.encode_file(&records);
        let decoded = CsvCodec.decode_file(&bytes).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_zero_coordinates_written_as_floats() {
        let mut r = record("a", "");
        r.latitude = 0.0;
        r.longitude = 0.0;
        let fields = CsvCodec.encode_row(&r);
        assert_eq!(fields[2], "0.0");
        assert_eq!(fields[3], "0.0");
    }

    #[test]
    fn test_decode_empty_input() {
        assert!(CsvCodec.decode_file(b"").unwrap().is_empty());
        assert!(CsvCodec.decode_file(b"\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_accepts_crlf_and_missing_trailing_newline() {
        let data = b"a,1,0,0,0,false,false,1,x,0\r\nb,2,0,0,0,true,true,2,y,5";
        let decoded = CsvCodec.decode_file(data).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].hash.as_str(), "b");
        assert_eq!(decoded[1].hop_count, 5);
        assert!(decoded[1].water);
    }

    #[test]
    fn test_decode_wrong_field_count() {
        let err = CsvCodec.decode_file(b"a,1,2\n").unwrap_err();
        assert_eq!(
            err,
            CodecError::FieldCount {
                row: 0,
                expected: 10,
                found: 3
            }
        );
    }

    #[test]
    fn test_decode_bad_boolean() {
        let err = CsvCodec
            .decode_file(b"a,1,0,0,0,yes,false,1,x,0\n")
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidField {
                field: "shelter",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_bad_timestamp_reports_row() {
        let data = b"a,1,0,0,0,false,false,1,x,0\nb,soon,0,0,0,false,false,1,x,0\n";
        let err = CsvCodec.decode_file(data).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidField {
                row: 1,
                field: "timestamp",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_unterminated_quote() {
        let err = CsvCodec
            .decode_file(b"a,1,0,0,0,false,false,1,\"open,0\n")
            .unwrap_err();
        assert!(matches!(err, CodecError::UnterminatedQuote { .. }));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = CsvCodec.decode_file(&[0xff, 0xfe, b'\n']).unwrap_err();
        assert_eq!(err, CodecError::InvalidUtf8);
    }
}
