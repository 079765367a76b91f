//! Parsing of the external sampler's text report
//!
//! Expects `perf script` default output, one sample per line:
//!
//! ```text
//!   java 12345 [002] 81234.567890:  250000 cycles:  7f3a2b1c4d5e Interpreter+0x1a0 (/usr/lib/jvm/libjvm.so)
//! ```
//!
//! Lines that do not match are skipped.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

const SAMPLE_PATTERN: &str = r"^\s*(?P<prog>\S.*?)\s+(?P<pid>\d+)(?:/(?P<tid>\d+))?\s+(?:\[(?P<cpu>\d+)\]\s+)?(?P<time>\d+\.\d+):\s+(?P<cycles>\d+)\s+cycles(?::[A-Za-z]+)?:\s+(?P<ip>[0-9a-fA-F]+)\s+(?P<symbol>.+?)\s+\((?P<dso>[^()]*)\)\s*$";

fn sample_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SAMPLE_PATTERN).expect("sample pattern is valid"))
}

/// One parsed sampler line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerfSample {
    pub id: usize,
    pub prog: String,
    pub pid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    pub time: String,
    pub cycles: String,
    pub ip: String,
    #[serde(rename = "symbol+offset")]
    pub symbol: String,
    pub dso: String,
    /// The unparsed line
    pub record: String,
}

impl PerfSample {
    /// Telemetry record broadcast for this sample
    #[must_use]
    pub fn to_record(&self) -> Value {
        json!({ "perfSample": self })
    }
}

/// Parse a single line; `id` is assigned by the caller
#[must_use]
pub fn parse_line(line: &str, id: usize) -> Option<PerfSample> {
    let caps = sample_regex().captures(line)?;
    let field = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
    Some(PerfSample {
        id,
        prog: field("prog")?,
        pid: field("pid")?,
        tid: field("tid"),
        cpu: field("cpu"),
        time: field("time")?,
        cycles: field("cycles")?,
        ip: field("ip")?,
        symbol: field("symbol")?,
        dso: field("dso")?,
        record: line.to_string(),
    })
}

/// Parse a whole report, numbering matched samples from zero
#[must_use]
pub fn parse_report(report: &str) -> Vec<PerfSample> {
    report
        .lines()
        .filter_map(|line| parse_line(line, 0))
        .enumerate()
        .map(|(id, sample)| PerfSample { id, ..sample })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
            java 12345 [002] 81234.567890:     250000 cycles:  7f3a2b1c4d5e Interpreter+0x1a0 (/usr/lib/jvm/libjvm.so)
some header line that perf prints
     perf-exec 4242/4243 123.000001:          1 cycles:u:  ffffffff8105a2b4 native_write_msr+0x4 ([kernel.kallsyms])
C2 CompilerThre 777 [000] 5.5:  10 cycles:  401000 std::vector<int, std::allocator<int> >::push_back+0x10 (/tmp/a.out)
";

    #[test]
    fn test_parse_line_with_cpu() {
        let sample = parse_line(REPORT.lines().next().unwrap(), 7).unwrap();
        assert_eq!(sample.id, 7);
        assert_eq!(sample.prog, "java");
        assert_eq!(sample.pid, "12345");
        assert_eq!(sample.cpu.as_deref(), Some("002"));
        assert_eq!(sample.time, "81234.567890");
        assert_eq!(sample.cycles, "250000");
        assert_eq!(sample.ip, "7f3a2b1c4d5e");
        assert_eq!(sample.symbol, "Interpreter+0x1a0");
        assert_eq!(sample.dso, "/usr/lib/jvm/libjvm.so");
    }

    #[test]
    fn test_parse_line_with_tid_and_modifier() {
        let line = REPORT.lines().nth(2).unwrap();
        let sample = parse_line(line, 0).unwrap();
        assert_eq!(sample.prog, "perf-exec");
        assert_eq!(sample.tid.as_deref(), Some("4243"));
        assert_eq!(sample.cpu, None);
        assert_eq!(sample.dso, "[kernel.kallsyms]");
    }

    #[test]
    fn test_parse_report_skips_noise_and_numbers_samples() {
        let samples = parse_report(REPORT);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(samples[2].prog, "C2 CompilerThre");
        assert_eq!(samples[2].symbol, "std::vector<int, std::allocator<int> >::push_back+0x10");
    }

    #[test]
    fn test_record_shape() {
        let sample = parse_line(REPORT.lines().next().unwrap(), 0).unwrap();
        let record = sample.to_record();
        assert_eq!(record["perfSample"]["symbol+offset"], "Interpreter+0x1a0");
        assert_eq!(record["perfSample"]["id"], 0);
        assert!(record["perfSample"].get("tid").is_none());
    }
}
