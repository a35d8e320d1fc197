//! Unit normalization for stats-tool text fields
//!
//! Every parser here is fail-soft: an unparsable number becomes `0.0` and the
//! record is still produced. A genuine zero reading and a malformed field are
//! therefore indistinguishable downstream.

use crate::models::{BlockIoMetric, ContainerMetric, MemoryMetric, NetworkMetric, RawContainerSample};
use chrono::{DateTime, Utc};

/// Separator between the two sides of a compound field ("used / limit")
const COMPOUND_SEPARATOR: &str = " / ";

/// Suffix characters stripped from memory quantities (binary prefixes)
const MEMORY_SUFFIX: &[char] = &['K', 'k', 'M', 'G', 'T', 'i', 'B'];

/// Suffix characters stripped from network and block I/O quantities
const BYTE_SUFFIX: &[char] = &['k', 'M', 'G', 'T', 'B'];

/// Characters that make up the numeric prefix of a quantity
const NUMERIC_PREFIX: &[char] = &['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.'];

/// Which suffix table and unit aliasing applies to a compound field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    /// Memory usage: binary suffixes, `MiB`/`GiB` relabelled as `MB`/`GB`
    Memory,
    /// Network and block I/O: decimal suffixes, units kept verbatim
    Bytes,
}

/// Both sides of a compound field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundValue {
    pub first: f64,
    pub second: f64,
    pub first_unit: String,
    pub second_unit: String,
}

/// Parse `"<number>%"` into its number
///
/// Anything without a trailing `%`, or with an unparsable number, yields `0.0`.
pub fn parse_percentage(raw: &str) -> f64 {
    raw.trim()
        .strip_suffix('%')
        .and_then(|number| number.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Parse `"<num><unit> / <num><unit>"`
///
/// When the separator does not split the input into exactly two parts every
/// value is zero and every unit empty.
pub fn parse_compound(raw: &str, kind: QuantityKind) -> CompoundValue {
    let parts: Vec<&str> = raw.split(COMPOUND_SEPARATOR).collect();
    if parts.len() != 2 {
        return CompoundValue::default();
    }

    let (first, first_unit) = parse_quantity(parts[0], kind);
    let (second, second_unit) = parse_quantity(parts[1], kind);

    CompoundValue {
        first,
        second,
        first_unit,
        second_unit,
    }
}

/// Parse one side of a compound field into (value, unit)
fn parse_quantity(side: &str, kind: QuantityKind) -> (f64, String) {
    let Some(token) = side.split_whitespace().next() else {
        return (0.0, String::new());
    };

    let suffix = match kind {
        QuantityKind::Memory => MEMORY_SUFFIX,
        QuantityKind::Bytes => BYTE_SUFFIX,
    };

    let value = token
        .trim_end_matches(suffix)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0);
    let unit = token.trim_start_matches(NUMERIC_PREFIX);

    let unit = match kind {
        QuantityKind::Memory => alias_memory_unit(unit),
        QuantityKind::Bytes => unit,
    };

    (value, unit.to_string())
}

/// Relabel binary memory units for display; the value is not rescaled
fn alias_memory_unit(unit: &str) -> &str {
    match unit {
        "MiB" => "MB",
        "GiB" => "GB",
        other => other,
    }
}

/// Turn a raw stats record into a typed metric stamped with `timestamp`
pub fn normalize(sample: &RawContainerSample, timestamp: DateTime<Utc>) -> ContainerMetric {
    let memory = parse_compound(&sample.mem_usage, QuantityKind::Memory);
    let network = parse_compound(&sample.net_io, QuantityKind::Bytes);
    let block = parse_compound(&sample.block_io, QuantityKind::Bytes);

    ContainerMetric {
        timestamp,
        container_id: sample.id.clone(),
        container_name: sample.name.clone(),
        cpu: parse_percentage(&sample.cpu_perc),
        memory: MemoryMetric {
            percentage: parse_percentage(&sample.mem_perc),
            used: memory.first,
            total: memory.second,
            used_unit: memory.first_unit,
            total_unit: memory.second_unit,
        },
        network: NetworkMetric {
            input: network.first,
            output: network.second,
            input_unit: network.first_unit,
            output_unit: network.second_unit,
        },
        block_io: BlockIoMetric {
            read: block.first,
            write: block.second,
            read_unit: block.first_unit,
            write_unit: block.second_unit,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage("12.5%"), 12.5);
        assert_eq!(parse_percentage("0.00%"), 0.0);
        assert_eq!(parse_percentage("250%"), 250.0);
        assert_eq!(parse_percentage(" 3.25% "), 3.25);
    }

    #[test]
    fn test_parse_percentage_fails_soft() {
        assert_eq!(parse_percentage("12.5"), 0.0);
        assert_eq!(parse_percentage("--%"), 0.0);
        assert_eq!(parse_percentage(""), 0.0);
        assert_eq!(parse_percentage("%"), 0.0);
        assert_eq!(parse_percentage("NaN%"), 0.0);
    }

    #[test]
    fn test_memory_units_are_aliased() {
        let value = parse_compound("25.5MiB / 1.944GiB", QuantityKind::Memory);
        assert_eq!(value.first, 25.5);
        assert_eq!(value.first_unit, "MB");
        assert_eq!(value.second, 1.944);
        assert_eq!(value.second_unit, "GB");
    }

    #[test]
    fn test_memory_other_units_kept() {
        let value = parse_compound("512KiB / 2TiB", QuantityKind::Memory);
        assert_eq!(value.first, 512.0);
        assert_eq!(value.first_unit, "KiB");
        assert_eq!(value.second, 2.0);
        assert_eq!(value.second_unit, "TiB");
    }

    #[test]
    fn test_byte_units_not_aliased() {
        let value = parse_compound("1.1kB / 648B", QuantityKind::Bytes);
        assert_eq!(value.first, 1.1);
        assert_eq!(value.first_unit, "kB");
        assert_eq!(value.second, 648.0);
        assert_eq!(value.second_unit, "B");

        // A binary unit on an I/O field is preserved as-is
        let value = parse_compound("3MB / 1.5GB", QuantityKind::Bytes);
        assert_eq!(value.first_unit, "MB");
        assert_eq!(value.second_unit, "GB");
    }

    #[test]
    fn test_compound_without_single_separator() {
        for raw in ["", "25MiB", "25MiB/1GiB", "1B / 2B / 3B", "--"] {
            assert_eq!(
                parse_compound(raw, QuantityKind::Memory),
                CompoundValue::default(),
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn test_compound_with_unparsable_side() {
        let value = parse_compound("abc / 2GB", QuantityKind::Bytes);
        assert_eq!(value.first, 0.0);
        assert_eq!(value.second, 2.0);
        assert_eq!(value.second_unit, "GB");
    }

    #[test]
    fn test_normalize_full_record() {
        let sample = RawContainerSample {
            block_io: "4.1MB / 0B".into(),
            cpu_perc: "1.75%".into(),
            id: "f00d".into(),
            mem_perc: "2.50%".into(),
            mem_usage: "50MiB / 2GiB".into(),
            name: "web-app-1".into(),
            net_io: "10kB / 5kB".into(),
        };
        let now = Utc::now();

        let metric = normalize(&sample, now);

        assert_eq!(metric.timestamp, now);
        assert_eq!(metric.container_id, "f00d");
        assert_eq!(metric.cpu, 1.75);
        assert_eq!(metric.memory.percentage, 2.5);
        assert_eq!(metric.memory.used, 50.0);
        assert_eq!(metric.memory.total_unit, "GB");
        assert_eq!(metric.network.input, 10.0);
        assert_eq!(metric.network.output_unit, "kB");
        assert_eq!(metric.block_io.read, 4.1);
        assert_eq!(metric.block_io.write_unit, "B");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let sample = RawContainerSample {
            mem_usage: "50MiB / 2GiB".into(),
            id: "a".into(),
            name: "a".into(),
            ..Default::default()
        };
        let now = Utc::now();
        assert_eq!(normalize(&sample, now), normalize(&sample, now));
    }
}
