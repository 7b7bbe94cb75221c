use anyhow::Result;
use serde_json::json;
use sparkify_lake::io::glob::expand_location;
use sparkify_lake::io::records::{ReadOptions, RecordReader, read_records};
use sparkify_lake::testing::{catalog_record, event_record, write_jsonl_fixture, write_lines_fixture};
use sparkify_lake::{CatalogRecord, EtlError, EventRecord};
use std::fs;

fn options(max_drop_rate: f64) -> ReadOptions {
    ReadOptions { max_drop_rate, error_samples: 10 }
}

#[test]
fn reads_files_in_sorted_order_with_sequence_numbers() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("song_data");
    write_jsonl_fixture(&root.join("B/b.json"), &[catalog_record("S3", "c", "A3", "Z", 1.0)])?;
    write_jsonl_fixture(
        &root.join("A/a.json"),
        &[catalog_record("S1", "a", "A1", "X", 1.0), catalog_record("S2", "b", "A2", "Y", 1.0)],
    )?;

    let (rows, stats) =
        read_records::<CatalogRecord>("song_data", root.to_str().unwrap(), options(0.0))?;

    let ids: Vec<(u64, &str)> = rows.iter().map(|r| (r.seq, r.record.song_id.as_str())).collect();
    assert_eq!(ids, vec![(0, "S1"), (1, "S2"), (2, "S3")]);
    assert_eq!(stats.files, 2);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.accepted(), 3);
    Ok(())
}

#[test]
fn lazy_reader_yields_rows_before_finish() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("events.json");
    write_jsonl_fixture(
        &file,
        &[event_record("1", "free", 10, "Home"), event_record("2", "paid", 20, "NextSong")],
    )?;

    let mut reader = RecordReader::<EventRecord>::open("log_data", file.to_str().unwrap(), options(0.0))?;
    let first = reader.next().unwrap()?;
    assert_eq!(first.seq, 0);
    assert_eq!(first.record.user_id.as_deref(), Some("1"));
    let rest: Vec<_> = reader.by_ref().collect::<Result<_>>()?;
    assert_eq!(rest.len(), 1);

    let stats = reader.finish()?;
    assert_eq!(stats.total, 2);
    Ok(())
}

#[test]
fn malformed_records_are_dropped_and_sampled() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("events.json");
    let good = serde_json::to_string(&event_record("7", "free", 1_000, "NextSong"))?;
    write_lines_fixture(
        &file,
        &[
            good.clone(),
            "{\"ts\": 5, \"page\": \"Home\"".to_string(),
            String::new(),
            json!({"ts": 9, "sessionId": 1}).to_string(),
            good,
        ],
    )?;

    let (rows, stats) = read_records::<EventRecord>("log_data", file.to_str().unwrap(), options(0.5))?;

    assert_eq!(rows.len(), 2);
    assert_eq!(stats.total, 4);
    assert_eq!(stats.dropped, 2);
    let lines: Vec<u64> = stats.error_samples.iter().map(|e| e.line).collect();
    assert_eq!(lines, vec![2, 4]);
    Ok(())
}

#[test]
fn drop_rate_above_limit_is_data_corruption() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("songs.json");
    let good = serde_json::to_string(&catalog_record("S1", "t", "A1", "n", 1.0))?;
    write_lines_fixture(&file, &[good, "not json".to_string()])?;

    let err = read_records::<CatalogRecord>("song_data", file.to_str().unwrap(), options(0.25))
        .unwrap_err();

    match err.downcast_ref::<EtlError>() {
        Some(EtlError::DataCorruption { source_name, dropped, total, .. }) => {
            assert_eq!(source_name, "song_data");
            assert_eq!((*dropped, *total), (1, 2));
        }
        other => panic!("expected DataCorruption, got {other:?}"),
    }
    Ok(())
}

#[test]
fn failed_validation_drops_record() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("songs.json");
    write_jsonl_fixture(
        &file,
        &[catalog_record("", "t", "A1", "n", 1.0), catalog_record("S2", "t", "A1", "n", 1.0)],
    )?;

    let (rows, stats) = read_records::<CatalogRecord>("song_data", file.to_str().unwrap(), options(0.5))?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.song_id, "S2");
    assert!(stats.error_samples[0].reason.contains("song_id"));
    Ok(())
}

#[test]
fn pretty_printed_document_is_one_record() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("TRAAAAW128F429D538.json");
    let pretty = serde_json::to_string_pretty(&catalog_record("S1", "Title", "A1", "Name", 218.93))?;
    fs::write(&file, pretty)?;

    let (rows, stats) = read_records::<CatalogRecord>("song_data", file.to_str().unwrap(), options(0.0))?;
    assert_eq!(stats.total, 1);
    assert_eq!(rows[0].record.duration, 218.93);
    Ok(())
}

#[test]
fn numeric_and_blank_user_ids() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("events.json");
    write_lines_fixture(
        &file,
        &[
            json!({"ts": 1, "userId": 42, "sessionId": 3, "page": "Home"}).to_string(),
            json!({"ts": 2, "userId": "", "sessionId": 3, "page": "Home"}).to_string(),
            json!({"ts": 3, "sessionId": 3, "page": "Home", "extra": true}).to_string(),
        ],
    )?;

    let (rows, _) = read_records::<EventRecord>("log_data", file.to_str().unwrap(), options(0.0))?;
    let ids: Vec<Option<&str>> = rows.iter().map(|r| r.record.user_id.as_deref()).collect();
    assert_eq!(ids, vec![Some("42"), None, None]);
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_input_is_decoded() -> Result<()> {
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("events.json.gz");
    let mut enc = GzEncoder::new(fs::File::create(&file)?, Compression::default());
    for e in [event_record("1", "free", 1, "Home"), event_record("2", "free", 2, "Home")] {
        writeln!(enc, "{}", serde_json::to_string(&e)?)?;
    }
    enc.finish()?;

    let (rows, _) = read_records::<EventRecord>("log_data", tmp.path().to_str().unwrap(), options(0.0))?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

#[test]
fn location_forms() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_lines_fixture(&root.join("2018/11/a.json"), &["{}"])?;
    write_lines_fixture(&root.join("2018/11/b.jsonl"), &["{}"])?;
    write_lines_fixture(&root.join("2018/11/notes.txt"), &["skip me"])?;

    let dir = expand_location(root.to_str().unwrap())?;
    assert_eq!(dir.len(), 2);

    let pattern = format!("{}/*/*/*.json", root.display());
    assert_eq!(expand_location(&pattern)?, vec![root.join("2018/11/a.json")]);

    let single = root.join("2018/11/notes.txt");
    assert_eq!(expand_location(single.to_str().unwrap())?, vec![single.clone()]);

    assert!(expand_location(root.join("missing").to_str().unwrap()).is_err());
    assert!(expand_location(&format!("{}/nothing/*.json", root.display()))?.is_empty());
    Ok(())
}

#[cfg(feature = "parallel-io")]
#[test]
fn parallel_read_matches_sequential() -> Result<()> {
    use sparkify_lake::read_records_par;

    let tmp = tempfile::tempdir()?;
    for i in 0..8 {
        let rows: Vec<_> = (0..5)
            .map(|j| event_record(&format!("{i}"), "free", i * 100 + j, "NextSong"))
            .collect();
        write_jsonl_fixture(&tmp.path().join(format!("part-{i}.json")), &rows)?;
    }
    let location = tmp.path().to_str().unwrap();

    let (seq_rows, seq_stats) = read_records::<EventRecord>("log_data", location, options(0.0))?;
    let (par_rows, par_stats) = read_records_par::<EventRecord>("log_data", location, options(0.0))?;
    assert_eq!(seq_rows, par_rows);
    assert_eq!(seq_stats.total, par_stats.total);
    Ok(())
}

#[test]
fn timestamp_without_calendar_date_is_dropped() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("events.json");
    write_jsonl_fixture(
        &file,
        &[
            event_record("U1", "free", 1_541_000_000_000, "NextSong"),
            event_record("U9", "free", 9_000_000_000_000_000_000, "NextSong"),
        ],
    )?;

    let (rows, stats) = read_records::<EventRecord>("log_data", file.to_str().unwrap(), options(0.5))?;

    assert_eq!((stats.total, stats.dropped), (2, 1));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.user_id.as_deref(), Some("U1"));
    assert!(stats.error_samples[0].reason.contains("ts"));
    Ok(())
}
