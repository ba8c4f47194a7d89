use perfring::output::{write_record, ReadStats};
use perfring::reader::decoder::decode;
use perfring::{CpuId, Record};
use perfring_common::{PerfEventHeader, PERF_RECORD_LOST, PERF_RECORD_SAMPLE};

fn decode_raw(cpu: u32, kind: u32, body: &[u8]) -> Record {
    let size = (8 + body.len()).next_multiple_of(8);
    let header = PerfEventHeader { kind, misc: 0, size: u16::try_from(size).unwrap() };
    let mut bytes = header.to_ne_bytes().to_vec();
    bytes.extend_from_slice(body);
    bytes.resize(size, 0);
    decode(CpuId(cpu), &bytes).expect("record should decode")
}

fn sample(cpu: u32, data: &[u8]) -> Record {
    let mut body = u32::try_from(data.len()).unwrap().to_ne_bytes().to_vec();
    body.extend_from_slice(data);
    decode_raw(cpu, PERF_RECORD_SAMPLE, &body)
}

fn lost(cpu: u32, count: u64) -> Record {
    let mut body = 0u64.to_ne_bytes().to_vec();
    body.extend_from_slice(&count.to_ne_bytes());
    decode_raw(cpu, PERF_RECORD_LOST, &body)
}

#[test]
fn test_json_lines_are_valid_json() {
    let mut buffer = Vec::new();
    write_record(&mut buffer, &sample(1, &[0xde, 0xad]), true).unwrap();
    write_record(&mut buffer, &lost(3, 9), true).unwrap();

    let text = String::from_utf8(buffer).expect("Invalid UTF-8");
    let lines: Vec<serde_json::Value> =
        text.lines().map(|l| serde_json::from_str(l).expect("Invalid JSON")).collect();
    assert_eq!(lines.len(), 2);

    assert_eq!(lines[0]["type"], "sample");
    assert_eq!(lines[0]["cpu"], 1);
    assert_eq!(lines[0]["len"], 2);
    assert_eq!(lines[0]["data"], "dead");

    assert_eq!(lines[1]["type"], "lost");
    assert_eq!(lines[1]["cpu"], 3);
    assert_eq!(lines[1]["count"], 9);
}

#[test]
fn test_stats_serialize_with_totals() {
    let mut stats = ReadStats::default();
    for record in [sample(0, b"abcd"), sample(1, b"ef"), lost(0, 5), lost(1, 2)] {
        stats.record(&record);
    }
    stats.unknown += 1;

    let value = serde_json::to_value(stats).unwrap();
    assert_eq!(value["samples"], 2);
    assert_eq!(value["sample_bytes"], 6);
    assert_eq!(value["lost"], 7);
    assert_eq!(value["unknown"], 1);
}
