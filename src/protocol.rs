use core::fmt::Write;

use heapless::String;

/// Largest radio packet the relay will drain in one reception.
/// Matches the RX packet params configured on the radio.
pub const MAX_PACKET_LEN: usize = 255;

/// Largest outbound line: the packet text with its two commas replaced by
/// semicolons, plus `;0;\n` after the third field.
pub const MAX_LINE_LEN: usize = MAX_PACKET_LEN + 6;

/// One parsed radio packet: three comma-separated fields borrowed from the
/// received text. Fields may be empty; their content is never validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub data1: &'a str,
    pub data2: &'a str,
    pub data3: &'a str,
}

impl<'a> Record<'a> {
    /// Splits a packet on its first two commas.
    ///
    /// `data3` is everything after the second comma, further commas included.
    /// Returns `None` when fewer than two commas are present; the caller
    /// drops such packets without producing output.
    pub fn parse(text: &'a str) -> Option<Self> {
        let sep1 = text.find(',')?;
        let rest = &text[sep1 + 1..];
        let sep2 = rest.find(',')?;

        Some(Self {
            data1: &text[..sep1],
            data2: &rest[..sep2],
            data3: &rest[sep2 + 1..],
        })
    }

    /// Composes the outbound serial line `<data1>;<data2>;<data3>;0;\n`.
    ///
    /// The fourth field is always the literal `0`. Embedded semicolons in
    /// the fields are not escaped.
    pub fn to_line(&self) -> Result<String<MAX_LINE_LEN>, &'static str> {
        let mut line = String::new();
        write!(line, "{};{};{};0;\n", self.data1, self.data2, self.data3)
            .map_err(|_| "Line buffer too small")?;
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_three_fields() {
        let record = Record::parse("12.34,56.78,true").unwrap();
        assert_eq!(record.data1, "12.34");
        assert_eq!(record.data2, "56.78");
        assert_eq!(record.data3, "true");
    }

    #[test]
    fn test_parse_reconstructs_input() {
        let inputs = ["12.34,56.78,true", "a,b,c", ",,", "x,,", "1,2,3,4,5"];
        for input in inputs {
            let record = Record::parse(input).unwrap();
            let mut rebuilt = std::string::String::new();
            rebuilt.push_str(record.data1);
            rebuilt.push(',');
            rebuilt.push_str(record.data2);
            rebuilt.push(',');
            rebuilt.push_str(record.data3);
            assert_eq!(rebuilt, input);
        }
    }

    #[test]
    fn test_parse_no_commas() {
        assert_eq!(Record::parse("no-commas-here"), None);
    }

    #[test]
    fn test_parse_single_comma() {
        assert_eq!(Record::parse("a,b"), None);
    }

    #[test]
    fn test_parse_empty_input() {
        assert_eq!(Record::parse(""), None);
    }

    #[test]
    fn test_parse_third_field_keeps_extra_commas() {
        let record = Record::parse("1,2,3,4").unwrap();
        assert_eq!(record.data3, "3,4");
    }

    #[test]
    fn test_line_format() {
        let record = Record::parse("12.34,56.78,true").unwrap();
        let line = record.to_line().unwrap();
        assert_eq!(line.as_str(), "12.34;56.78;true;0;\n");
    }

    #[test]
    fn test_line_empty_fields_forwarded_as_is() {
        let record = Record::parse(",,").unwrap();
        assert_eq!(record, Record { data1: "", data2: "", data3: "" });
        assert_eq!(record.to_line().unwrap().as_str(), ";;;0;\n");
    }

    #[test]
    fn test_line_fourth_field_always_zero() {
        let inputs = ["a,b,c", "0,0,0", ",,x", "9,9,"];
        for input in inputs {
            let line = Record::parse(input).unwrap().to_line().unwrap();
            assert!(line.ends_with(";0;\n"), "line {:?} must end in ;0;\\n", line);
        }
    }

    #[test]
    fn test_line_embedded_semicolons_not_escaped() {
        let record = Record::parse("a;b,c,d").unwrap();
        assert_eq!(record.to_line().unwrap().as_str(), "a;b;c;d;0;\n");
    }

    #[test]
    fn test_line_fits_max_packet() {
        // Worst case: a packet of MAX_PACKET_LEN bytes with exactly two commas.
        let mut input = std::string::String::from(",,");
        input.push_str(&"x".repeat(MAX_PACKET_LEN - 2));
        assert_eq!(input.len(), MAX_PACKET_LEN);

        let line = Record::parse(&input).unwrap().to_line().unwrap();
        assert_eq!(line.len(), input.len() + 4);
    }
}
