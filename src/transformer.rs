//! Streaming transform from a raw range-query response to tab-separated rows
//! (spec §4.C).
//!
//! Walks only `data.result[*].metric` and `data.result[*].values`; every
//! other key in the response (`status`, `resultType`, ...) is structurally
//! skipped without being materialized. Each sample is written to the output
//! file as soon as it is parsed, so memory use stays bounded by one series'
//! label set rather than the whole response.

use crate::error::TransformError;
use crate::json_stream::{JsonError, JsonReader};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Outcome of one transform pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformStats {
    pub rows: u64,
    pub series: u64,
    pub skipped: u64,
}

pub fn stream_transform(in_path: &Path, out_path: &Path) -> Result<TransformStats, TransformError> {
    let in_file = File::open(in_path).map_err(|source| TransformError::Read {
        path: in_path.to_path_buf(),
        source,
    })?;
    let out_file = File::create(out_path).map_err(|source| TransformError::Write {
        path: out_path.to_path_buf(),
        source,
    })?;

    let mut reader = JsonReader::new(BufReader::new(in_file));
    let mut writer = BufWriter::new(out_file);
    let mut stats = TransformStats::default();

    walk_top_level(&mut reader, &mut writer, &mut stats, in_path, out_path)?;

    writer.flush().map_err(|source| TransformError::Write {
        path: out_path.to_path_buf(),
        source,
    })?;

    Ok(stats)
}

fn malformed(path: &Path, e: impl std::fmt::Display) -> TransformError {
    TransformError::Malformed { path: path.to_path_buf(), detail: e.to_string() }
}

fn walk_top_level<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    writer: &mut impl Write,
    stats: &mut TransformStats,
    in_path: &Path,
    out_path: &Path,
) -> Result<(), TransformError> {
    reader.expect_byte(b'{').map_err(|e| malformed(in_path, e))?;
    loop {
        if reader.peek_non_ws().map_err(|e| malformed(in_path, e))? == Some(b'}') {
            reader.expect_byte(b'}').map_err(|e| malformed(in_path, e))?;
            break;
        }
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        let key = reader.parse_string().map_err(|e| malformed(in_path, e))?;
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        if key == "data" {
            walk_data(reader, writer, stats, in_path, out_path)?;
        } else {
            reader.skip_value().map_err(|e| malformed(in_path, e))?;
        }
        if next_is_comma_or_close(reader, b'}', in_path)? {
            break;
        }
    }
    Ok(())
}

fn walk_data<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    writer: &mut impl Write,
    stats: &mut TransformStats,
    in_path: &Path,
    out_path: &Path,
) -> Result<(), TransformError> {
    reader.expect_byte(b'{').map_err(|e| malformed(in_path, e))?;
    loop {
        if reader.peek_non_ws().map_err(|e| malformed(in_path, e))? == Some(b'}') {
            reader.expect_byte(b'}').map_err(|e| malformed(in_path, e))?;
            break;
        }
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        let key = reader.parse_string().map_err(|e| malformed(in_path, e))?;
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        if key == "result" {
            walk_result_array(reader, writer, stats, in_path, out_path)?;
        } else {
            reader.skip_value().map_err(|e| malformed(in_path, e))?;
        }
        if next_is_comma_or_close(reader, b'}', in_path)? {
            break;
        }
    }
    Ok(())
}

fn walk_result_array<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    writer: &mut impl Write,
    stats: &mut TransformStats,
    in_path: &Path,
    out_path: &Path,
) -> Result<(), TransformError> {
    reader.expect_byte(b'[').map_err(|e| malformed(in_path, e))?;
    if reader.peek_non_ws().map_err(|e| malformed(in_path, e))? == Some(b']') {
        reader.expect_byte(b']').map_err(|e| malformed(in_path, e))?;
        return Ok(());
    }
    loop {
        walk_series(reader, writer, stats, in_path, out_path)?;
        if next_is_comma_or_close(reader, b']', in_path)? {
            break;
        }
    }
    Ok(())
}

fn walk_series<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    writer: &mut impl Write,
    stats: &mut TransformStats,
    in_path: &Path,
    out_path: &Path,
) -> Result<(), TransformError> {
    reader.expect_byte(b'{').map_err(|e| malformed(in_path, e))?;
    let mut metric_name = String::new();
    let mut labels: Vec<(String, String)> = Vec::new();
    let mut series_rows: u64 = 0;

    loop {
        if reader.peek_non_ws().map_err(|e| malformed(in_path, e))? == Some(b'}') {
            reader.expect_byte(b'}').map_err(|e| malformed(in_path, e))?;
            break;
        }
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        let key = reader.parse_string().map_err(|e| malformed(in_path, e))?;
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        match key.as_str() {
            "metric" => {
                let (name, lbls) = parse_metric_labels(reader, in_path)?;
                metric_name = name;
                labels = lbls;
            }
            "values" => {
                series_rows = write_values(reader, writer, &metric_name, &labels, stats, in_path, out_path)?;
            }
            _ => {
                reader.skip_value().map_err(|e| malformed(in_path, e))?;
            }
        }
        if next_is_comma_or_close(reader, b'}', in_path)? {
            break;
        }
    }

    if series_rows > 0 {
        stats.series += 1;
    }
    Ok(())
}

fn parse_metric_labels<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    in_path: &Path,
) -> Result<(String, Vec<(String, String)>), TransformError> {
    reader.expect_byte(b'{').map_err(|e| malformed(in_path, e))?;
    let mut name = String::new();
    let mut labels = Vec::new();
    loop {
        if reader.peek_non_ws().map_err(|e| malformed(in_path, e))? == Some(b'}') {
            reader.expect_byte(b'}').map_err(|e| malformed(in_path, e))?;
            break;
        }
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        let key = reader.parse_string().map_err(|e| malformed(in_path, e))?;
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        let value = reader.parse_string().map_err(|e| malformed(in_path, e))?;
        if key == "__name__" {
            name = value;
        } else {
            labels.push((key, value));
        }
        if next_is_comma_or_close(reader, b'}', in_path)? {
            break;
        }
    }
    labels.sort_by(|a, b| a.0.cmp(&b.0));
    Ok((name, labels))
}

#[allow(clippy::too_many_arguments)]
fn write_values<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    writer: &mut impl Write,
    metric_name: &str,
    labels: &[(String, String)],
    stats: &mut TransformStats,
    in_path: &Path,
    out_path: &Path,
) -> Result<u64, TransformError> {
    reader.expect_byte(b'[').map_err(|e| malformed(in_path, e))?;
    let mut rows = 0u64;
    if reader.peek_non_ws().map_err(|e| malformed(in_path, e))? == Some(b']') {
        reader.expect_byte(b']').map_err(|e| malformed(in_path, e))?;
        return Ok(rows);
    }
    let name_field = escape_tsv_field(metric_name);
    let keys_field = format_array(labels.iter().map(|(k, _)| k.as_str()));
    let values_field = format_array(labels.iter().map(|(_, v)| v.as_str()));
    loop {
        reader.expect_byte(b'[').map_err(|e| malformed(in_path, e))?;
        let ts_raw = reader.parse_number().map_err(|e| malformed(in_path, e))?;
        reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
        let value_raw = reader.parse_string().map_err(|e| malformed(in_path, e))?;
        reader.expect_byte(b']').map_err(|e| malformed(in_path, e))?;

        match format_sample_value(&value_raw) {
            Some(value_field) => {
                let line = format!(
                    "{}\t{}\t{}\t{}\t{}\n",
                    format_timestamp(&ts_raw),
                    name_field,
                    keys_field,
                    values_field,
                    value_field,
                );
                writer.write_all(line.as_bytes()).map_err(|source| TransformError::Write {
                    path: out_path.to_path_buf(),
                    source,
                })?;
                rows += 1;
                stats.rows += 1;
            }
            None => {
                stats.skipped += 1;
            }
        }

        if next_is_comma_or_close(reader, b']', in_path)? {
            break;
        }
    }
    Ok(rows)
}

fn next_is_comma_or_close<R: std::io::Read>(
    reader: &mut JsonReader<R>,
    close: u8,
    in_path: &Path,
) -> Result<bool, TransformError> {
    match reader.peek_non_ws().map_err(|e| malformed(in_path, e))? {
        Some(b',') => {
            reader.skip_ws_and_punct().map_err(|e| malformed(in_path, e))?;
            Ok(false)
        }
        Some(b) if b == close => {
            reader.expect_byte(close).map_err(|e| malformed(in_path, e))?;
            Ok(true)
        }
        other => Err(malformed(
            in_path,
            JsonError::Unexpected { expected: "`,` or closing delimiter", found: format!("{other:?}") },
        )),
    }
}

/// Renders a sample value per the numeric-formatting rule: up to 15
/// significant digits, no exponent notation, trailing zeros trimmed, with
/// `nan`/`inf`/`-inf` passed through lowercase. Returns `None` if the raw
/// text isn't a parseable float, signaling the caller to skip the sample.
fn format_sample_value(raw: &str) -> Option<String> {
    let v: f64 = raw.parse().ok()?;
    Some(format_float(v))
}

pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let mut s = format!("{v:.15}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

fn format_timestamp(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(v) => format_float(v),
        Err(_) => raw.to_string(),
    }
}

/// Escapes a scalar TSV field: backslash, tab, and newline per ClickHouse's
/// `TabSeparated` input format.
pub fn escape_tsv_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders a string array as ClickHouse's `['a','b']` array literal, with
/// each element additionally escaping `'`.
fn format_array<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let rendered: Vec<String> = items
        .map(|item| format!("'{}'", escape_tsv_field(item).replace('\'', "\\'")))
        .collect();
    if rendered.is_empty() {
        "[]".to_string()
    } else {
        format!("[{}]", rendered.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn run(json: &str) -> (String, TransformStats) {
        let in_dir = tempfile::tempdir().unwrap();
        let in_path = in_dir.path().join("raw.json");
        let out_path = in_dir.path().join("out.tsv");
        std::fs::write(&in_path, json).unwrap();
        let stats = stream_transform(&in_path, &out_path).unwrap();
        let mut out = String::new();
        File::open(&out_path).unwrap().read_to_string(&mut out).unwrap();
        (out, stats)
    }

    #[test]
    fn transforms_single_series_with_two_samples() {
        let json = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {
                        "metric": {"__name__": "up", "job": "node", "instance": "a"},
                        "values": [[1700000000, "1"], [1700000015, "0.5"]]
                    }
                ]
            }
        }"#;
        let (out, stats) = run(json);
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.series, 1);
        assert_eq!(stats.skipped, 0);
        let mut lines = out.lines();
        assert_eq!(
            lines.next().unwrap(),
            "1700000000\tup\t['instance','job']\t['a','node']\t1"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1700000015\tup\t['instance','job']\t['a','node']\t0.5"
        );
    }

    #[test]
    fn empty_result_yields_no_rows() {
        let json = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        let (out, stats) = run(json);
        assert!(out.is_empty());
        assert_eq!(stats.rows, 0);
        assert_eq!(stats.series, 0);
    }

    #[test]
    fn skips_unparseable_sample_values_without_failing() {
        let json = r#"{"data":{"result":[
            {"metric":{"__name__":"x"},"values":[[1,"NaN-ish-garbage-that-wont-parse-as-float"],[2,"3"]]}
        ]}}"#;
        let (out, stats) = run(json);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.rows, 1);
        assert_eq!(out.trim_end(), "2\tx\t[]\t[]\t3");
    }

    #[test]
    fn escapes_backslash_tab_newline_in_metric_name() {
        assert_eq!(escape_tsv_field("a\\b\tc\nd"), "a\\\\b\\tc\\nd");
    }

    #[test]
    fn formats_floats_without_exponent_and_trims_zeros() {
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn label_array_escapes_single_quotes() {
        assert_eq!(format_array(["it's fine"].into_iter()), "['it\\'s fine']");
        assert_eq!(format_array(std::iter::empty()), "[]");
    }

    #[test]
    fn labels_key_and_value_arrays_stay_parallel_and_sorted() {
        let json = r#"{"data":{"result":[
            {"metric":{"__name__":"m","z":"1","a":"2"},"values":[[1,"7"]]}
        ]}}"#;
        let (out, _) = run(json);
        assert_eq!(out.trim_end(), "1\tm\t['a','z']\t['2','1']\t7");
    }
}
