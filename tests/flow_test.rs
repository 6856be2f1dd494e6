use anyhow::Result;
use pipe_flow::config::FlowConfig;
use pipe_flow::pipeline::ops::{aggregate_op, element_op};
use pipe_flow::pipeline::{Junction, Orchestrator, Stage, TableSink, TableSource};
use pipe_flow::{FlowError, Table};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[tokio::test]
async fn test_increments_three_column_file() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("results.csv");

    let config = FlowConfig::load(fixture("increment.toml"))?;
    let flow = config.build(fixture("three_columns.csv"), Some(output.clone()))?;
    let outcome = flow.run().await;
    assert!(!outcome.elapsed_display().is_empty());
    let summary = outcome.into_result()?;

    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.stages.len(), 3);
    assert!(summary.stages.iter().all(|t| t.elapsed_ms >= 0.0));
    assert_eq!(
        fs::read_to_string(&output)?,
        "a,2.000,3.000,4.000\nb,5.000,6.000,7.000\nc,8.000,9.000,10.000\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_row_counts_follow_stage_mode() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.csv");
    fs::write(&input, "x,y\n1,2\n3,4\n5,6\n7,8\n")?;

    let x = Arc::new(Stage::elementwise("x_sq", vec![element_op("pow:2")?]));
    let y = Arc::new(Stage::aggregate("y_mean", aggregate_op("mean")?));
    let bindings = BTreeMap::from([
        ("x".to_string(), Arc::clone(&x)),
        ("y".to_string(), Arc::clone(&y)),
    ]);

    let mut flow = Orchestrator::new("modes");
    flow.register(Arc::clone(&x))?;
    flow.register(Arc::clone(&y))?;
    flow.register(TableSource::open("modes", &input, bindings)?)?;
    flow.register(TableSink::new(Some(dir.path().join("out.csv")), vec![x, y])?)?;

    let summary = flow.run().await.into_result()?;
    assert_eq!(summary.output.get("x"), Some(&[1.0, 9.0, 25.0, 49.0][..]));
    assert_eq!(summary.output.get("y"), Some(&[5.0][..]));
    Ok(())
}

#[tokio::test]
async fn test_failed_stage_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.csv");
    let output = dir.path().join("out.csv");
    fs::write(&input, "a\n4\n0\n")?;

    let stage = Arc::new(Stage::elementwise("a_recip", vec![element_op("recip")?]));
    let mut flow = Orchestrator::new("recip");
    flow.register_stage(Arc::clone(&stage));
    flow.register_source(TableSource::open(
        "recip",
        &input,
        BTreeMap::from([("a".to_string(), Arc::clone(&stage))]),
    )?)?;
    flow.register_sink(TableSink::new(Some(output.clone()), vec![Arc::clone(&stage)])?)?;

    let err = flow.run().await.into_result().unwrap_err();
    match err {
        FlowError::ElementOperation { column, row, value, .. } => {
            assert_eq!(column, "a");
            assert_eq!(row, 1);
            assert_eq!(value, 0.0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(stage.output().is_none());
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_multi_phase_flow_through_junctions() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.csv");
    let output = dir.path().join("out.csv");
    fs::write(&input, "a,b\n-1,10\n-2,20\n-3,30\n")?;

    let config: FlowConfig = r#"
        description = "abs then max, scale b"

        [[stages]]
        name = "a_abs"
        column = "a"
        ops = ["abs"]

        [[stages]]
        name = "a_max"
        aggregate = "max"

        [[stages]]
        name = "b_scale"
        column = "b"
        ops = ["div:10"]

        [[junctions]]
        name = "abs_to_max"
        from = "a_abs"
        to = "a_max"
    "#
    .parse()?;

    let summary = config.build(&input, Some(output.clone()))?.run().await.into_result()?;
    assert_eq!(summary.junctions_continued, 1);
    assert_eq!(fs::read_to_string(&output)?, "a,3.000\nb,1.000,2.000,3.000\n");
    Ok(())
}

#[test]
fn test_unbound_columns_report_missing_count() {
    let raw: Table = [("a", vec![1.0]), ("b", vec![2.0])].into_iter().collect();
    let stage = Arc::new(Stage::elementwise("a_inc", vec![element_op("add:1").unwrap()]));
    let err = TableSource::from_table("", "mem", raw, BTreeMap::from([("a".to_string(), stage)]))
        .unwrap_err();
    assert!(matches!(err, FlowError::UnboundColumns { missing: 1, .. }));
    assert!(err.to_string().contains("(1 unbound)"));
}

#[tokio::test]
async fn test_junction_can_be_driven_directly() -> Result<()> {
    let up = Arc::new(
        Stage::builder("scale")
            .then_fn(|v| Ok(v * 3.0))
            .then_fn(|v| Ok(v - 1.0))
            .build()?,
    );
    let down = Arc::new(Stage::aggregate("product", aggregate_op("product")?));
    up.set_input(Table::single("c", vec![1.0, 2.0]));
    up.run().await?;

    let result = Junction::new("scale_to_product", up, down).continue_flow().await?;
    // (1*3-1) * (2*3-1)
    assert_eq!(result.output.get("c"), Some(&[10.0][..]));
    Ok(())
}
