//! Integration tests for SalesForge

use salesforge::forecast::ForecastOutcome;
use salesforge::schema::RejectReason;
use salesforge::source::read_csv_rows;
use salesforge::{
    aggregate_sales, normalize_transactions, run_pipeline, Artifact, MemorySink, Period,
    PipelineConfig, PipelineError, StrategyKind,
};
use std::io::Write;
use tempfile::NamedTempFile;

/// Ten transactions; order 8 has no user_id and must be rejected
fn create_transactions_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "order_id,user_id,product_id,quantity,price,timestamp,category").unwrap();
    writeln!(file, "1,1,101,2,10.00,2024-01-05 10:00:00,Electronics").unwrap();
    writeln!(file, "2,1,102,1,5.50,2024-01-20 11:30:00,Books").unwrap();
    writeln!(file, "3,2,101,1,10.00,2024-01-25 09:00:00,Electronics").unwrap();
    writeln!(file, "4,2,103,3,2.25,2024-02-02 14:00:00,Books").unwrap();
    writeln!(file, "5,3,104,4,1.50,2024-02-14 08:45:00,Clothing").unwrap();
    writeln!(file, "6,3,101,1,10.00,2024-02-28 19:10:00,Electronics").unwrap();
    writeln!(file, "7,4,102,2,5.50,2024-03-03 12:00:00,Books").unwrap();
    writeln!(file, "8,,105,1,99.00,2024-03-04 12:00:00,Clothing").unwrap();
    writeln!(file, "9,4,104,5,1.50,2024-03-15 16:20:00,Clothing").unwrap();
    writeln!(file, "10,5,103,0,2.25,2024-03-31 23:59:59,Books").unwrap();
    file
}

/// Users 1-4 also purchase; user 9 only browses
fn create_interactions_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "user_id,page_id,session_duration,device_type,timestamp").unwrap();
    writeln!(file, "1,home,30.0,desktop,2024-01-05 09:55:00").unwrap();
    writeln!(file, "1,product_101,120.0,desktop,2024-01-05 09:58:00").unwrap();
    writeln!(file, "2,home,15.0,mobile,2024-01-25 08:50:00").unwrap();
    writeln!(file, "3,search,45.0,tablet,2024-02-14 08:30:00").unwrap();
    writeln!(file, "3,product_104,60.0,tablet,2024-02-14 08:40:00").unwrap();
    writeln!(file, "3,cart,20.0,tablet,2024-02-14 08:44:00").unwrap();
    writeln!(file, "4,home,300.0,mobile,2024-03-03 11:00:00").unwrap();
    writeln!(file, "9,home,5.0,mobile,2024-03-05 10:00:00").unwrap();
    file
}

fn moving_average_config() -> PipelineConfig {
    PipelineConfig {
        strategy: StrategyKind::MovingAverage,
        ..Default::default()
    }
}

#[test]
fn test_fixture_reproduces_hand_computed_buckets() {
    let transactions = create_transactions_csv();
    let rows = read_csv_rows(transactions.path()).unwrap();

    let normalized = normalize_transactions(&rows);
    assert_eq!(normalized.report.total_rows, 10);
    assert_eq!(normalized.report.accepted, 9);
    assert_eq!(normalized.report.rejected_count(), 1);

    let buckets = aggregate_sales(&normalized.records).buckets();
    let actual: Vec<(Period, &str, f64, u64)> = buckets
        .iter()
        .map(|b| (b.period, b.category.as_str(), b.total_sales, b.order_count))
        .collect();
    let expected = vec![
        (Period::new(2024, 1), "Books", 5.5, 1),
        (Period::new(2024, 1), "Electronics", 30.0, 2),
        (Period::new(2024, 2), "Books", 6.75, 1),
        (Period::new(2024, 2), "Clothing", 6.0, 1),
        (Period::new(2024, 2), "Electronics", 10.0, 1),
        (Period::new(2024, 3), "Books", 11.0, 2),
        (Period::new(2024, 3), "Clothing", 7.5, 1),
    ];
    assert_eq!(actual, expected);

    let bucket_total: f64 = buckets.iter().map(|b| b.total_sales).sum();
    let line_total: f64 = normalized.records.iter().map(|r| r.line_total()).sum();
    assert!((bucket_total - line_total).abs() < 1e-9);
    assert!((bucket_total - 76.75).abs() < 1e-9);
}

#[test]
fn test_end_to_end_pipeline() {
    let transactions = create_transactions_csv();
    let interactions = create_interactions_csv();
    let transaction_rows = read_csv_rows(transactions.path()).unwrap();
    let interaction_rows = read_csv_rows(interactions.path()).unwrap();

    let report = run_pipeline(&moving_average_config(), &transaction_rows, &interaction_rows).unwrap();

    // Join: users 1-4 in both, user 9 browse-only, user 5 purchase-only
    assert_eq!(report.features.user_ids(), vec![1, 2, 3, 4]);
    assert_eq!(report.features.join.interaction_only, 1);
    assert_eq!(report.features.join.transaction_only, 1);

    let segmentation = report.segmentation.as_ref().unwrap();
    assert_eq!(segmentation.assignments.len(), 4);
    assert!(segmentation.assignments.iter().all(|a| a.cluster_id < 4));

    let forecasts = report.forecasts.as_ref().unwrap();
    let books = forecasts.iter().find(|f| f.category == "Books").unwrap();
    let ForecastOutcome::Forecast(points) = &books.outcome else {
        panic!("Books should have a forecast");
    };
    assert!((points[0].predicted_value - (5.5 + 6.75 + 11.0) / 3.0).abs() < 1e-9);
    assert_eq!(points[0].period, Period::new(2024, 4));

    let ranked = report.recommendations.ranked();
    assert_eq!(ranked.len(), 4);
    assert!(ranked.iter().all(|p| p.product_a < p.product_b && p.count == 1));

    // Joined users viewed 2, 1, 3 and 1 pages
    assert_eq!(report.features.avg_page_views_before_purchase(), Some(1.75));

    let mut sink = MemorySink::default();
    report.publish(&mut sink).unwrap();
    assert_eq!(sink.tables.len(), 9);
    assert_eq!(sink.tables[&Artifact::Sales].height(), 7);
    assert_eq!(sink.tables[&Artifact::Segments].height(), 4);
    assert_eq!(sink.tables[&Artifact::Recommendations].height(), 4);
    assert_eq!(sink.tables[&Artifact::SessionStats].height(), 5);
    assert_eq!(sink.tables[&Artifact::TopPages].height(), 5);
    assert_eq!(sink.tables[&Artifact::TopProducts].height(), 3);

    let top_page = &report.top_pages[0];
    assert_eq!((top_page.page_id.as_str(), top_page.views), ("home", 4));
    // Books tie between 102 and 103 goes to the smaller id
    assert_eq!(report.top_products["Books"], (102, 2));
    assert_eq!(report.top_products["Electronics"], (101, 3));
}

#[test]
fn test_malformed_cells_are_rejected_not_fatal() {
    let mut transactions = NamedTempFile::new().unwrap();
    writeln!(transactions, "order_id,user_id,product_id,quantity,price,timestamp,category").unwrap();
    for i in 0..150 {
        let user = i % 6 + 1;
        let product = 100 + i % 5;
        let month = i % 3 + 1;
        writeln!(transactions, "{},{},{},1,4.00,2024-0{}-10 12:00:00,Books", i + 1, user, product, month).unwrap();
    }
    writeln!(transactions, "900,1,101,abc,4.00,2024-03-10 12:00:00,Books").unwrap();
    writeln!(transactions, "901,1,101,1,cheap,2024-03-10 12:00:00,Books").unwrap();
    writeln!(transactions, "902,1,101,-2,4.00,2024-03-10 12:00:00,Books").unwrap();
    writeln!(transactions, "903,1,101,1,4.00,not-a-date,Books").unwrap();
    writeln!(transactions, "904,x7,101,1,4.00,2024-03-10 12:00:00,Books").unwrap();
    writeln!(transactions, "1,2,101,1,4.00,2024-03-10 12:00:00,Books").unwrap();

    let mut interactions = NamedTempFile::new().unwrap();
    writeln!(interactions, "user_id,page_id,session_duration,device_type,timestamp").unwrap();
    for i in 0..120 {
        writeln!(interactions, "{},page_{},{}.5,mobile,2024-01-0{} 09:00:00", i % 6 + 1, i % 4, 10 + i, i % 9 + 1).unwrap();
    }
    writeln!(interactions, "2,home,long,mobile,2024-02-01 09:00:00").unwrap();
    writeln!(interactions, "3,home,-5.0,desktop,2024-02-01 09:00:00").unwrap();

    let transaction_rows = read_csv_rows(transactions.path()).unwrap();
    let interaction_rows = read_csv_rows(interactions.path()).unwrap();
    assert_eq!(transaction_rows.len(), 156);
    assert_eq!(interaction_rows.len(), 122);

    let report = run_pipeline(&moving_average_config(), &transaction_rows, &interaction_rows).unwrap();

    assert_eq!(report.transactions.accepted, 150);
    assert_eq!(report.transactions.rejected_count(), 6);
    let rejected = &report.transactions.rejected;
    assert_eq!(rejected[&RejectReason::InvalidField("quantity")], 1);
    assert_eq!(rejected[&RejectReason::InvalidField("price")], 1);
    assert_eq!(rejected[&RejectReason::NegativeValue("quantity")], 1);
    assert_eq!(rejected[&RejectReason::InvalidTimestamp], 1);
    assert_eq!(rejected[&RejectReason::InvalidField("user_id")], 1);
    assert_eq!(rejected[&RejectReason::DuplicateOrderId], 1);

    assert_eq!(report.interactions.accepted, 120);
    assert_eq!(report.interactions.rejected[&RejectReason::InvalidField("session_duration")], 1);
    assert_eq!(report.interactions.rejected[&RejectReason::NegativeValue("session_duration")], 1);

    // Every terminal stage still runs on the surviving rows
    assert_eq!(report.features.user_ids(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(report.segmentation.as_ref().unwrap().assignments.len(), 6);
    assert!((report.sales.grand_total() - 600.0).abs() < 1e-9);
    assert!(report.forecasts.is_ok());
    assert!(!report.recommendations.is_empty());
    assert_eq!(report.tiers.len(), 6);
}

#[test]
fn test_segmentation_failure_is_stage_local() {
    let transactions = create_transactions_csv();
    let interactions = create_interactions_csv();
    let transaction_rows = read_csv_rows(transactions.path()).unwrap();
    let interaction_rows = read_csv_rows(interactions.path()).unwrap();

    let config = PipelineConfig {
        clusters: 5,
        ..moving_average_config()
    };
    let report = run_pipeline(&config, &transaction_rows, &interaction_rows).unwrap();

    assert!(matches!(
        report.segmentation,
        Err(PipelineError::InsufficientData {
            required: 5,
            available: 4,
            ..
        })
    ));
    assert!(report.forecasts.is_ok());

    let mut sink = MemorySink::default();
    report.publish(&mut sink).unwrap();
    assert!(!sink.tables.contains_key(&Artifact::Segments));
    assert!(sink.tables.contains_key(&Artifact::Sales));
}

#[test]
fn test_invalid_config_fails_before_computation() {
    let config = PipelineConfig {
        window: 0,
        ..Default::default()
    };
    let err = run_pipeline(&config, &[], &[]).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
}

#[test]
fn test_model_based_forecast_is_reproducible() {
    let transactions = create_transactions_csv();
    let interactions = create_interactions_csv();
    let transaction_rows = read_csv_rows(transactions.path()).unwrap();
    let interaction_rows = read_csv_rows(interactions.path()).unwrap();

    let config = PipelineConfig::default();
    let first = run_pipeline(&config, &transaction_rows, &interaction_rows).unwrap();
    let second = run_pipeline(&config, &transaction_rows, &interaction_rows).unwrap();

    assert_eq!(first.forecaster, "model-based");
    assert_eq!(first.forecasts.unwrap(), second.forecasts.unwrap());
    assert_eq!(
        first.segmentation.unwrap().assignments,
        second.segmentation.unwrap().assignments
    );
}
