use anyhow::Result;
use sparkify_lake::io::parquet::{read_batches, read_parquet_vec};
use sparkify_lake::writer::{NULL_PARTITION, escape_partition_value, read_table_with_spec, unescape_partition_value};
use sparkify_lake::{
    ArtistRow, EtlError, PartitionSpec, SongRow, SongplayRow, Table, TableWriter, TimeRow, UserRow, read_table,
};
use std::collections::HashSet;
use std::fs;

fn song(id: &str, artist: &str, year: i32) -> SongRow {
    SongRow { song_id: id.into(), title: format!("title {id}"), artist_id: artist.into(), year, duration: 200.5 }
}

fn play(id: i64, ts: i64, year: i32, month: i32, song_id: Option<&str>) -> SongplayRow {
    SongplayRow {
        songplay_id: id,
        start_time: ts,
        user_id: Some("U1".into()),
        level: Some("free".into()),
        song_id: song_id.map(Into::into),
        artist_id: song_id.map(|_| "A1".into()),
        session_id: 7,
        location: None,
        user_agent: Some("agent".into()),
        year,
        month,
    }
}

fn sorted<T: Clone, K: Ord>(rows: &[T], key: impl Fn(&T) -> K) -> Vec<T> {
    let mut v = rows.to_vec();
    v.sort_by_key(key);
    v
}

#[test]
fn partitioned_songs_round_trip() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let writer = TableWriter::new(tmp.path(), 1_000);
    let rows = vec![song("S1", "A1", 2018), song("S2", "A1", 2018), song("S3", "A2", 0), song("S4", "A/B", 2018)];

    let stats = writer.write(&rows)?;
    assert_eq!(stats.table, "songs");
    assert_eq!(stats.rows, 4);
    assert_eq!(stats.partitions, 3);
    assert_eq!(stats.files, 3);

    assert!(tmp.path().join("songs/year=2018/artist_id=A1/part-00000.parquet").is_file());
    assert!(tmp.path().join("songs/year=0/artist_id=A2").is_dir());
    assert!(tmp.path().join("songs/year=2018/artist_id=A%2FB").is_dir());

    let back: Vec<SongRow> = read_table(tmp.path())?;
    let key = |s: &SongRow| s.song_id.clone();
    assert_eq!(sorted(&back, key), sorted(&rows, key));
    Ok(())
}

#[test]
fn partition_columns_are_not_stored_in_files() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    TableWriter::new(tmp.path(), 1_000).write(&[song("S1", "A1", 2018)])?;

    let batches = read_batches(&tmp.path().join("songs/year=2018/artist_id=A1/part-00000.parquet"))?;
    let schema = batches[0].schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["song_id", "title", "duration"]);
    Ok(())
}

#[test]
fn songplays_layout_and_timestamp_type() -> Result<()> {
    use arrow::datatypes::{DataType, TimeUnit};

    let tmp = tempfile::tempdir()?;
    let writer = TableWriter::new(tmp.path(), 1_000);
    let rows = vec![
        play(0, 1_541_000_000_000, 2018, 10, Some("S1")),
        play(1, 1_541_000_500_000, 2018, 10, None),
        play(1 << 33, 1_541_500_000_000, 2018, 11, None),
    ];
    writer.write(&rows)?;

    let oct = tmp.path().join("songplays/year=2018/month=10/part-00000.parquet");
    assert!(oct.is_file());
    let batches = read_batches(&oct)?;
    let field = batches[0].schema().field_with_name("start_time")?.clone();
    assert_eq!(field.data_type(), &DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())));

    let back: Vec<SongplayRow> = read_table(tmp.path())?;
    let key = |r: &SongplayRow| r.songplay_id;
    assert_eq!(sorted(&back, key), sorted(&rows, key));
    Ok(())
}

#[test]
fn unpartitioned_tables_and_empty_tables() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let writer = TableWriter::new(tmp.path(), 1_000);

    let users = vec![UserRow {
        user_id: "U1".into(),
        first_name: Some("Ada".into()),
        last_name: None,
        gender: Some("F".into()),
        level: Some("paid".into()),
    }];
    let stats = writer.write(&users)?;
    assert_eq!(stats.partitions, 0);
    assert_eq!(read_parquet_vec::<UserRow>(tmp.path().join("users/part-00000.parquet"))?, users);

    let artists: Vec<ArtistRow> = Vec::new();
    let stats = writer.write(&artists)?;
    assert_eq!(stats.rows, 0);
    assert!(read_table::<ArtistRow>(tmp.path())?.is_empty());

    let time: Vec<TimeRow> = Vec::new();
    let stats = writer.write(&time)?;
    assert_eq!((stats.partitions, stats.files), (0, 0));
    assert!(tmp.path().join("time").is_dir());
    assert!(read_table::<TimeRow>(tmp.path())?.is_empty());
    Ok(())
}

#[test]
fn large_partitions_are_split_into_files() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let rows: Vec<SongRow> = (0..25).map(|i| song(&format!("S{i:02}"), "A1", 2018)).collect();

    let stats = TableWriter::new(tmp.path(), 10).write(&rows)?;
    assert_eq!(stats.files, 3);
    assert!(tmp.path().join("songs/year=2018/artist_id=A1/part-00002.parquet").is_file());
    assert_eq!(read_table::<SongRow>(tmp.path())?.len(), 25);
    Ok(())
}

#[test]
fn rewrite_replaces_previous_table() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let writer = TableWriter::new(tmp.path(), 1_000);

    writer.write(&[song("S1", "A1", 2018), song("S2", "A9", 2017)])?;
    writer.write(&[song("S1", "A1", 2018)])?;

    let back: Vec<SongRow> = read_table(tmp.path())?;
    assert_eq!(back, vec![song("S1", "A1", 2018)]);
    assert!(!tmp.path().join("songs/year=2017").exists());

    let leftovers: Vec<String> = fs::read_dir(tmp.path())?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    assert_eq!(leftovers, vec!["songs".to_string()]);
    Ok(())
}

#[test]
fn failed_write_keeps_previous_table() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let writer = TableWriter::new(tmp.path(), 1_000);
    let original = vec![song("S1", "A1", 2018)];
    writer.write(&original)?;

    let bad_spec = PartitionSpec::by(&["no_such_column"]);
    let err = writer
        .write_with_spec(SongRow::NAME, &[song("S2", "A2", 2018)], &bad_spec, &[])
        .unwrap_err();

    match err.downcast_ref::<EtlError>() {
        Some(e @ EtlError::WriteFailure { .. }) => assert_eq!(e.failed_table(), Some("songs")),
        other => panic!("expected WriteFailure, got {other:?}"),
    }
    assert_eq!(read_table::<SongRow>(tmp.path())?, original);
    Ok(())
}

#[test]
fn unwritable_root_is_write_failure() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("not-a-dir");
    fs::write(&root, b"occupied")?;

    let err = TableWriter::new(&root, 1_000).write(&[song("S1", "A1", 2018)]).unwrap_err();
    assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::WriteFailure { .. })));
    Ok(())
}

#[test]
fn null_partition_value_round_trips() -> Result<()> {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Tagged {
        id: i64,
        tag: Option<String>,
    }

    let tmp = tempfile::tempdir()?;
    let spec = PartitionSpec::by(&["tag"]);
    let rows = vec![Tagged { id: 1, tag: None }, Tagged { id: 2, tag: Some("a=b".into()) }];
    TableWriter::new(tmp.path(), 1_000).write_with_spec("tagged", &rows, &spec, &[])?;

    assert!(tmp.path().join(format!("tagged/tag={NULL_PARTITION}")).is_dir());
    assert!(tmp.path().join("tagged/tag=a%3Db").is_dir());

    let back: Vec<Tagged> = read_table_with_spec(&tmp.path().join("tagged"), &spec, &[])?;
    let ids: HashSet<(i64, Option<String>)> = back.into_iter().map(|t| (t.id, t.tag)).collect();
    assert_eq!(ids, rows.into_iter().map(|t| (t.id, t.tag)).collect());
    Ok(())
}

#[test]
fn partition_value_escaping() -> Result<()> {
    assert_eq!(escape_partition_value("AR5KOSW1187FB35FF4"), "AR5KOSW1187FB35FF4");
    assert_eq!(escape_partition_value("a/b=c%"), "a%2Fb%3Dc%25");
    assert_eq!(escape_partition_value("Motörhead"), "Motörhead");
    for v in ["a/b=c%", "x:y?z", "plain", "new\nline"] {
        assert_eq!(unescape_partition_value(&escape_partition_value(v))?, v);
    }
    assert!(unescape_partition_value("bad%4").is_err());
    assert_ne!(escape_partition_value(NULL_PARTITION), NULL_PARTITION);
    assert_eq!(unescape_partition_value(&escape_partition_value(NULL_PARTITION))?, NULL_PARTITION);
    Ok(())
}

#[test]
fn literal_null_marker_value_reads_back_as_text() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let rows = vec![song("S1", NULL_PARTITION, 2018)];
    TableWriter::new(tmp.path(), 1_000).write(&rows)?;

    let back: Vec<SongRow> = read_table(tmp.path())?;
    assert_eq!(back, rows);
    Ok(())
}

#[test]
fn failing_partition_keeps_previous_table() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let writer = TableWriter::new(tmp.path(), 1_000);
    let original = vec![song("S0", "A0", 2018)];
    writer.write(&original)?;

    // Directory name longer than the filesystem allows.
    let too_long = "A".repeat(400);
    let err = writer.write(&[song("S1", "A1", 2018), song("S2", &too_long, 2018)]).unwrap_err();

    match err.downcast_ref::<EtlError>() {
        Some(EtlError::WriteFailure { table, partition, .. }) => {
            assert_eq!(table, "songs");
            assert!(partition.contains(&too_long));
        }
        other => panic!("expected WriteFailure, got {other:?}"),
    }
    assert_eq!(read_table::<SongRow>(tmp.path())?, original);

    let entries: Vec<String> = fs::read_dir(tmp.path())?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    assert_eq!(entries, vec!["songs".to_string()]);
    Ok(())
}
