use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use domd_guardian::{
    ClassificationOptions, ColumnSpec, ColumnType, Dataset, HandlerContext, RowClassifier, Schema,
};

const ROWS: usize = 50_000;

fn stock_schema() -> Schema {
    Schema::new(
        vec![
            ColumnSpec::new("date", ColumnType::Date),
            ColumnSpec::new("site", ColumnType::String).with_length(4),
            ColumnSpec::new("article", ColumnType::String).with_length(8),
            ColumnSpec::new("stock_units", ColumnType::Integer).nullable(),
            ColumnSpec::new("currency", ColumnType::String).with_allowed(["GBP"]),
        ],
        vec!["date".to_string(), "site".to_string(), "article".to_string()],
    )
    .expect("benchmark schema should be valid")
}

fn generate_dataset(rows: usize) -> Dataset {
    let headers = ["date", "site", "article", "stock_units", "currency"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows = (0..rows)
        .map(|i| {
            let date = if i % 3 == 0 {
                format!("{:02}/01/2024", i % 28 + 1)
            } else {
                format!("2024-02-{:02}", i % 28 + 1)
            };
            let units = if i % 17 == 0 { None } else { Some((i % 500).to_string()) };
            vec![
                Some(date),
                Some((i % 900).to_string()),
                Some(i.to_string()),
                units,
                Some(if i % 5 == 0 { "usd" } else { "GBP" }.to_string()),
            ]
        })
        .collect();
    Dataset::new(headers, rows)
}

fn benchmark_classification(c: &mut Criterion) {
    let context = HandlerContext::new(
        NaiveDate::from_ymd_opt(2024, 6, 30).expect("valid reference date"),
        "GBP",
    );
    let classifier = RowClassifier::new(stock_schema(), context);
    let data = generate_dataset(ROWS);

    let mut group = c.benchmark_group("classify");
    group.sample_size(20);

    for parallel in [false, true] {
        let options = ClassificationOptions { parallel };
        let name = if parallel { "parallel" } else { "sequential" };
        group.bench_function(name, |b| {
            b.iter(|| classifier.classify(black_box(data.records()), &options))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_classification);
criterion_main!(benches);
