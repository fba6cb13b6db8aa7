//! Tag address parsing and continuous-run grouping (SPEC_FULL.md §4.1).
//!
//! Grounded on `examples/original_source/backend/src/plc/utils.py`, with
//! the parser strengthened to the spec's grammar: `utils.py`'s
//! `^([A-Z]+)(\d+)$` does not recognize the bit-addressed shapes
//! (`W327C`, `W327C.6`) the spec requires, so the regex here is the
//! stricter `^([A-Z]+)(\d+)([A-Z])?(?:\.([0-9A-Z]))?$`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ADDRESS_RE: Regex =
        Regex::new(r"^([A-Z]+)(\d+)([A-Z])?(?:\.([0-9A-Z]))?$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedAddress {
    pub device_family: String,
    pub device_number: u32,
    pub ext_char: Option<char>,
    pub bit_offset: Option<char>,
    pub raw: String,
}

impl ParsedAddress {
    /// Bit-addressed tags (an extChar or bitOffset suffix) require a
    /// different wire command and must never be coalesced with neighbors.
    pub fn is_bit_addressed(&self) -> bool {
        self.ext_char.is_some() || self.bit_offset.is_some()
    }

    /// Reverse-formats the parsed address; round-trips to the upper-cased
    /// original string (SPEC_FULL.md §8, "Address parse then format yields
    /// the original string, case-normalized to upper").
    pub fn format(&self) -> String {
        let mut s = format!("{}{}", self.device_family, self.device_number);
        if let Some(ext) = self.ext_char {
            s.push(ext);
        }
        if let Some(bit) = self.bit_offset {
            s.push('.');
            s.push(bit);
        }
        s
    }
}

/// Parses a tag address string. Returns `None` on grammar mismatch; callers
/// must log and skip rather than treat this as fatal (§4.1).
pub fn parse_address(addr: &str) -> Option<ParsedAddress> {
    let upper = addr.to_uppercase();
    let caps = ADDRESS_RE.captures(&upper)?;
    let device_family = caps.get(1)?.as_str().to_string();
    let device_number: u32 = caps.get(2)?.as_str().parse().ok()?;
    let ext_char = caps.get(3).and_then(|m| m.as_str().chars().next());
    let bit_offset = caps.get(4).and_then(|m| m.as_str().chars().next());

    Some(ParsedAddress {
        device_family,
        device_number,
        ext_char,
        bit_offset,
        raw: upper,
    })
}

/// A contiguous run of addresses suitable for a single word-unit batch
/// read, or a singleton bit-addressed tag that must be read alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRun {
    pub device_family: String,
    pub head_device: u32,
    pub count: u32,
    pub addresses: Vec<String>,
}

/// Partitions addresses by family, sorts by device number, and emits runs
/// of strictly consecutive numbers — but only when neither neighbor has an
/// extChar or bitOffset. Bit-addressed tags are emitted as singleton runs.
/// Addresses that fail to parse are skipped (logged by the caller).
pub fn group_continuous_addresses(addrs: &[String]) -> Vec<AddressRun> {
    use std::collections::BTreeMap;

    let mut by_family: BTreeMap<String, Vec<ParsedAddress>> = BTreeMap::new();
    for addr in addrs {
        if let Some(parsed) = parse_address(addr) {
            by_family.entry(parsed.device_family.clone()).or_default().push(parsed);
        }
    }

    let mut runs = Vec::new();
    for (family, mut parsed) in by_family {
        parsed.sort_by_key(|p| p.device_number);

        let mut i = 0;
        while i < parsed.len() {
            if parsed[i].is_bit_addressed() {
                runs.push(AddressRun {
                    device_family: family.clone(),
                    head_device: parsed[i].device_number,
                    count: 1,
                    addresses: vec![parsed[i].format()],
                });
                i += 1;
                continue;
            }

            let mut j = i;
            while j + 1 < parsed.len()
                && !parsed[j + 1].is_bit_addressed()
                && parsed[j + 1].device_number == parsed[j].device_number + 1
            {
                j += 1;
            }

            let addresses: Vec<String> = parsed[i..=j].iter().map(|p| p.format()).collect();
            runs.push(AddressRun {
                device_family: family.clone(),
                head_device: parsed[i].device_number,
                count: (j - i + 1) as u32,
                addresses,
            });
            i = j + 1;
        }
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_word_address() {
        let p = parse_address("D100").unwrap();
        assert_eq!(p.device_family, "D");
        assert_eq!(p.device_number, 100);
        assert_eq!(p.ext_char, None);
        assert_eq!(p.bit_offset, None);
        assert!(!p.is_bit_addressed());
    }

    #[test]
    fn parses_ext_char_address() {
        let p = parse_address("W327C").unwrap();
        assert_eq!(p.device_family, "W");
        assert_eq!(p.device_number, 327);
        assert_eq!(p.ext_char, Some('C'));
        assert!(p.is_bit_addressed());
    }

    #[test]
    fn parses_bit_offset_address() {
        let p = parse_address("W327C.6").unwrap();
        assert_eq!(p.bit_offset, Some('6'));
        let p2 = parse_address("W327C.A").unwrap();
        assert_eq!(p2.bit_offset, Some('A'));
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(parse_address("100D").is_none());
        assert!(parse_address("").is_none());
        assert!(parse_address("D").is_none());
    }

    #[test]
    fn round_trip_format_is_upper_cased_original() {
        for addr in ["d100", "W327C", "w327c.6"] {
            let p = parse_address(addr).unwrap();
            assert_eq!(p.format(), addr.to_uppercase());
        }
    }

    #[test]
    fn groups_continuous_run() {
        let addrs: Vec<String> = vec!["D100", "D101", "D102"].into_iter().map(String::from).collect();
        let runs = group_continuous_addresses(&addrs);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].head_device, 100);
        assert_eq!(runs[0].count, 3);
    }

    #[test]
    fn bit_addressed_tag_never_coalesced() {
        let addrs: Vec<String> = vec!["W100", "W101", "W102", "W103.6", "W104"]
            .into_iter()
            .map(String::from)
            .collect();
        let runs = group_continuous_addresses(&addrs);
        // One run of W100-102, one singleton W103.6, one singleton W104
        // (W104 is not contiguous with the singleton bit tag before it).
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].count, 3);
        assert_eq!(runs[0].addresses, vec!["W100", "W101", "W102"]);
        assert_eq!(runs[1].count, 1);
        assert_eq!(runs[1].addresses, vec!["W103.6"]);
        assert_eq!(runs[2].count, 1);
        assert_eq!(runs[2].addresses, vec!["W104"]);
    }

    #[test]
    fn unparseable_addresses_are_skipped() {
        let addrs: Vec<String> = vec!["D100", "not-an-address", "D101"]
            .into_iter()
            .map(String::from)
            .collect();
        let runs = group_continuous_addresses(&addrs);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].count, 2);
    }

    #[test]
    fn different_families_never_grouped() {
        let addrs: Vec<String> = vec!["D100", "W100"].into_iter().map(String::from).collect();
        let runs = group_continuous_addresses(&addrs);
        assert_eq!(runs.len(), 2);
    }
}
