mod common;

use anyhow::Result;
use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use common::*;
use lake_database::engine::{TableEngine, META_RUN_ID, META_SCHEMA_VERSION, META_TABLE_NAME};
use lake_database::parquet::ParquetEngine;
use lake_database::paths::{bucket_dir, table_dir};
use lake_database::{AppendOptions, Dataset, IoSettings, PartitionState, RunId, TickRange};
use lake_types::DType;
use std::sync::Arc;

fn parquet_files(dir: &std::path::Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

#[test]
fn append_creates_parts_and_manifest() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "20250101-000000");
    let contract = identity_edges_contract();

    let summary = ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(0..150))?;
    assert_eq!(summary.table, IDENTITY_EDGES);
    assert_eq!(summary.run_id, "20250101-000000");
    assert_eq!(summary.rows_written, 150);
    assert_eq!(summary.buckets, vec![0, 1]);
    assert_eq!(summary.parts.len(), 2);
    assert_eq!(
        summary.parts.iter().map(|p| (p.bucket_id, p.rows, p.tick_min, p.tick_max)).collect::<Vec<_>>(),
        vec![(0, 100, 0, 99), (1, 50, 100, 149)]
    );

    for b in &summary.buckets {
        let dir = bucket_dir(ds.settings(), ds.run_id(), IDENTITY_EDGES, *b)?;
        let files = parquet_files(&dir)?;
        assert_eq!(files.len(), 1, "one part per bucket in {}", dir.display());
        assert!(files[0].starts_with("part-") && files[0].ends_with(".parquet"));
    }

    let m = ds.manifest(IDENTITY_EDGES)?.expect("manifest written");
    assert_eq!(m.partitions.keys().cloned().collect::<Vec<_>>(), vec!["000000", "000001"]);
    assert_eq!(m.total_rows(), 150);
    for p in m.partitions.values() {
        assert_eq!(p.state, PartitionState::Ready);
        assert!(p.tick_min <= p.tick_max);
        assert!(p.byte_size > 0);
        assert_eq!(p.byte_size, p.parts.iter().map(|x| x.bytes).sum::<u64>());
    }

    let all = ds.read(IDENTITY_EDGES, TickRange::all(), None)?;
    assert_eq!(total_rows(&all), 150);
    assert_eq!(ticks_of(&all), (0..150).collect::<Vec<_>>());

    let input = identity_edges_frame(0..150);
    let back = concat_batches(&all[0].schema(), &all)?;
    for column in ["tick", "observer_agent_id", "edge_kind", "edge_weight"] {
        assert_eq!(
            back.column_by_name(column).expect("column read back"),
            input.column_by_name(column).expect("column written"),
            "{column} differs after round trip"
        );
    }
    Ok(())
}

#[test]
fn second_append_adds_parts_without_touching_existing_ones() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-append-twice");
    let contract = identity_edges_contract();

    let first = ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(0..50))?;
    let first_bytes = std::fs::read(&first.parts[0].path)?;
    ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(60..80))?;

    assert_eq!(std::fs::read(&first.parts[0].path)?, first_bytes);
    let m = ds.manifest(IDENTITY_EDGES)?.expect("manifest");
    let p = &m.partitions["000000"];
    assert_eq!(p.parts.len(), 2);
    assert_eq!((p.row_count, p.tick_min, p.tick_max), (70, 0, 79));
    Ok(())
}

#[test]
fn scan_prunes_and_filters_rows() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "20250102-000000");
    let contract = identity_edges_contract();
    ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(0..100))?;
    ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(100..200))?;
    ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(300..320))?;

    let scan = ds.scan(IDENTITY_EDGES, TickRange::between(50, 120))?;
    assert_eq!(scan.paths().len(), 2, "bucket 3 is pruned");
    let batches = scan.collect::<lake_database::Result<Vec<_>>>()?;
    assert_eq!(ticks_of(&batches), (50..=120).collect::<Vec<_>>());

    let open_ended = ds.read(
        IDENTITY_EDGES,
        TickRange {
            min: Some(190),
            max: None,
        },
        None,
    )?;
    assert_eq!(total_rows(&open_ended), 10 + 20);

    let none = ds.read(IDENTITY_EDGES, TickRange::between(250, 260), None)?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn read_honours_limit() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-limit");
    ds.append(IDENTITY_EDGES, &identity_edges_contract(), &identity_edges_frame(0..250))?;
    assert_eq!(total_rows(&ds.read(IDENTITY_EDGES, TickRange::all(), Some(120))?), 120);
    assert_eq!(total_rows(&ds.read(IDENTITY_EDGES, TickRange::all(), Some(0))?), 0);
    Ok(())
}

#[test]
fn empty_frame_is_a_no_op() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-empty");
    let summary = ds.append(IDENTITY_EDGES, &identity_edges_contract(), &identity_edges_frame(std::iter::empty()))?;
    assert_eq!(summary.rows_written, 0);
    assert!(summary.parts.is_empty() && summary.buckets.is_empty());
    assert!(!ds.table_dir(IDENTITY_EDGES).exists());
    Ok(())
}

#[test]
fn missing_tick_fails_before_any_io() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-no-tick");
    let frame = identity_edges_frame(0..10);
    let without_tick = frame.project(&[1, 2, 3])?;
    let err = ds.append(IDENTITY_EDGES, &identity_edges_contract(), &without_tick).unwrap_err();
    assert!(err.is_schema());
    assert!(!ds.table_dir(IDENTITY_EDGES).exists());
    Ok(())
}

#[test]
fn strict_mode_rejects_extra_column_and_lenient_mode_keeps_it() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let frame = identity_edges_frame(0..5);
    let schema = frame.schema();
    let mut cols: Vec<(&str, ArrayRef)> = schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .zip(frame.columns().iter().cloned())
        .collect();
    cols.push(("debug_note", Arc::new(StringArray::from(vec!["x"; 5]))));
    let with_extra = RecordBatch::try_from_iter(cols)?;

    let strict = dataset(tmp.path(), "run-strict");
    let err = strict.append(IDENTITY_EDGES, &identity_edges_contract(), &with_extra).unwrap_err();
    assert!(err.is_schema());
    assert!(err.to_string().contains("debug_note"));
    assert!(!strict.table_dir(IDENTITY_EDGES).exists());

    let mut settings = IoSettings::with_root(tmp.path());
    settings.strict_schema = false;
    let lenient = Dataset::new(settings, RunId::parse("run-lenient")?)?;
    lenient.append(IDENTITY_EDGES, &identity_edges_contract(), &with_extra)?;
    let back = lenient.read(IDENTITY_EDGES, TickRange::all(), None)?;
    let notes = back[0]
        .column_by_name("debug_note")
        .expect("extra column survives")
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("utf8");
    assert_eq!(notes.value(0), "x");
    Ok(())
}

#[test]
fn missing_required_column_fails_in_both_modes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let frame = identity_edges_frame(0..5);
    let idx = frame.schema().index_of("edge_kind")?;
    let keep: Vec<usize> = (0..frame.num_columns()).filter(|i| *i != idx).collect();
    let missing = frame.project(&keep)?;

    for strict in [true, false] {
        let mut settings = IoSettings::with_root(tmp.path());
        settings.strict_schema = strict;
        let ds = Dataset::new(settings, RunId::parse(&format!("run-strict-{strict}"))?)?;
        let err = ds.append(IDENTITY_EDGES, &identity_edges_contract(), &missing).unwrap_err();
        assert!(err.is_schema(), "strict={strict}: {err}");
        assert!(err.to_string().contains("edge_kind"));
    }
    Ok(())
}

#[test]
fn narrow_numeric_columns_are_cast_on_write() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-cast");
    let frame = RecordBatch::try_from_iter(vec![
        ("tick", Arc::new(Int32Array::from(vec![7, 8])) as ArrayRef),
        ("observer_agent_id", Arc::new(StringArray::from(vec!["A0", "A1"])) as ArrayRef),
        ("edge_kind", Arc::new(StringArray::from(vec!["k", "k"])) as ArrayRef),
        ("edge_weight", Arc::new(Int64Array::from(vec![2, 3])) as ArrayRef),
    ])?;
    ds.append(IDENTITY_EDGES, &identity_edges_contract(), &frame)?;

    let back = ds.read(IDENTITY_EDGES, TickRange::all(), None)?;
    let schema = back[0].schema();
    assert_eq!(schema.field_with_name("tick")?.data_type(), &DataType::Int64);
    assert_eq!(schema.field_with_name("bucket")?.data_type(), &DataType::Int64);
    let w = back[0]
        .column_by_name("edge_weight")
        .expect("weight")
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("f64");
    assert_eq!(w.values(), &[2.0, 3.0]);
    Ok(())
}

#[test]
fn uncastable_value_writes_nothing() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-bad-cast");
    let frame = RecordBatch::try_from_iter(vec![
        ("tick", Arc::new(Int64Array::from(vec![1, 150])) as ArrayRef),
        ("observer_agent_id", Arc::new(StringArray::from(vec!["A0", "A1"])) as ArrayRef),
        ("edge_kind", Arc::new(StringArray::from(vec!["k", "k"])) as ArrayRef),
        ("edge_weight", Arc::new(StringArray::from(vec!["0.5", "heavy"])) as ArrayRef),
    ])?;
    let err = ds.append(IDENTITY_EDGES, &identity_edges_contract(), &frame).unwrap_err();
    assert!(err.is_schema());
    assert!(!ds.table_dir(IDENTITY_EDGES).exists());
    Ok(())
}

#[test]
fn negative_tick_is_a_config_error() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-negative");
    let err = ds
        .append(IDENTITY_EDGES, &identity_edges_contract(), &identity_edges_frame([5, -3]))
        .unwrap_err();
    assert!(err.is_config());
    assert!(!ds.table_dir(IDENTITY_EDGES).exists());
    Ok(())
}

#[test]
fn skipping_validation_still_derives_buckets() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-skip-validation");
    let frame = identity_edges_frame(0..3).project(&[0])?;
    let summary = ds.append_with(
        IDENTITY_EDGES,
        &identity_edges_contract(),
        &frame,
        AppendOptions {
            validate_schema: false,
        },
    )?;
    assert_eq!(summary.buckets, vec![0]);
    Ok(())
}

#[test]
fn parts_carry_forensic_metadata() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-meta");
    let summary = ds.append(IDENTITY_EDGES, &identity_edges_contract(), &identity_edges_frame(0..12))?;

    let meta = ParquetEngine.read_metadata(&summary.parts[0].path)?;
    assert_eq!(meta.schema_version.as_deref(), Some("0.1@2025-09-20"));
    assert_eq!(meta.table_name.as_deref(), Some(IDENTITY_EDGES));
    assert_eq!(meta.run_id.as_deref(), Some("run-meta"));
    assert_eq!(meta.num_rows, 12);
    // keys are stable strings readers can rely on
    assert_eq!(
        [META_SCHEMA_VERSION, META_TABLE_NAME, META_RUN_ID],
        ["runlake.schema_version", "runlake.table_name", "runlake.run_id"]
    );
    Ok(())
}

#[test]
fn contract_for_another_table_is_rejected() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-wrong-contract");
    let err = ds
        .append("decisions", &identity_edges_contract(), &identity_edges_frame(0..3))
        .unwrap_err();
    assert!(err.is_schema());
    assert!(!table_dir(ds.settings(), ds.run_id(), "decisions").exists());
    Ok(())
}

#[test]
fn contract_with_non_integer_tick_writes_nothing() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), "run-float-tick");
    let mut contract = identity_edges_contract();
    contract.columns.insert("tick".to_string(), DType::F64);

    let err = ds.append(IDENTITY_EDGES, &contract, &identity_edges_frame(0..10)).unwrap_err();
    assert!(err.is_schema(), "got {err}");
    assert!(!ds.table_dir(IDENTITY_EDGES).exists());
    assert!(ds.manifest(IDENTITY_EDGES)?.is_none());
    Ok(())
}
