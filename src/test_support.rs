//! Helpers shared by unit tests.

use async_compression::tokio::write::GzipEncoder;
use tokio::io::AsyncWriteExt;

/// Gzip-compresses `bytes` the way Meteostat serves its bulk files.
pub(crate) async fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(bytes).await.expect("gzip write");
    encoder.shutdown().await.expect("gzip finish");
    encoder.into_inner()
}

/// A small sensor log in the logger's export format: seven preamble lines,
/// a header with 17+ columns and `;`-separated, quoted fields.
pub(crate) fn sensor_file(rows: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut text = String::new();
    for i in 0..7 {
        text.push_str(&format!("\"Preamble line {}\"\r\n", i + 1));
    }
    let mut header: Vec<String> = vec!["\"Datum\"".to_string(), "\"Uhrzeit\"".to_string()];
    for i in 2..16 {
        header.push(format!("\"Kanal {}\"", i));
    }
    header.push("\"IR20-E-korrigiert\"".to_string());
    header.push("\"Temperatur\"".to_string());
    text.push_str(&header.join(";"));
    text.push_str("\r\n");
    for (date, time, value) in rows {
        let mut fields: Vec<String> = vec![format!("\"{}\"", date), format!("\"{}\"", time)];
        for _ in 2..16 {
            fields.push("0".to_string());
        }
        fields.push(value.to_string());
        fields.push("21,5".to_string());
        text.push_str(&fields.join(";"));
        text.push_str("\r\n");
    }
    // ISO-8859-1: every char used above is ASCII apart from what callers pass in.
    text.chars().map(|c| c as u32 as u8).collect()
}
