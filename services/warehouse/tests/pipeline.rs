//! End-to-end warehouse runs over small fixture files

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use warehouse::{
    dates::{date_key_of, parse_rating_date},
    file_sha256, DateRow, FactRow, Manifest, MovieRow, PipelineConfig, Stage, UserRow,
};

const TWO_MOVIES: &str = "1:\n10,4,2004-01-01\n11,3,2004-01-02\n2:\n10,5,2004-01-01\n";
const TITLES: &str = "1,2003,Dinosaur Planet\n2,2004,Isle of Man TT 2004 Review\n";

struct Fixture {
    dir: TempDir,
    config: PipelineConfig,
}

fn fixture(ratings: &[&str], titles: &str, cap: Option<u64>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let ratings_files: Vec<PathBuf> = ratings
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let path = dir.path().join(format!("combined_data_{}.txt", i + 1));
            fs::write(&path, content).unwrap();
            path
        })
        .collect();
    let titles_file = dir.path().join("movie_titles.csv");
    fs::write(&titles_file, titles).unwrap();

    let mut config = PipelineConfig::new(ratings_files, titles_file, dir.path().join("out"));
    config.row_cap = cap;
    config.chunk_size = 2;
    Fixture { dir, config }
}

fn read_table<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Vec<T> {
    let mut reader = csv::Reader::from_path(dir.join(file)).unwrap();
    reader.deserialize().map(|r| r.unwrap()).collect()
}

// -------------------------------------------------------------------------
// SCENARIOS
// -------------------------------------------------------------------------

#[test]
fn test_two_movie_scenario() {
    let fx = fixture(&[TWO_MOVIES], TITLES, Some(100));
    let summary = warehouse::run(&fx.config).unwrap();
    let out = &fx.config.output_dir;

    let facts: Vec<FactRow> = read_table(out, "fact_rating.csv");
    let dates: Vec<DateRow> = read_table(out, "dim_date.csv");
    let users: Vec<UserRow> = read_table(out, "dim_user.csv");

    assert_eq!(facts.len(), 3);
    assert_eq!(
        dates.iter().map(|d| d.date_key).collect::<Vec<_>>(),
        vec![20040101, 20040102]
    );
    assert_eq!(
        users.iter().map(|u| u.customer_id).collect::<Vec<_>>(),
        vec![10, 11]
    );
    assert!(!summary.cap_reached);
    assert_eq!(summary.manifest.table("fact_rating").unwrap().rows, 3);
}

#[test]
fn test_cap_scenario_takes_source_order_prefix() {
    let fx = fixture(&[TWO_MOVIES], TITLES, Some(2));
    let summary = warehouse::run(&fx.config).unwrap();

    let facts: Vec<FactRow> = read_table(&fx.config.output_dir, "fact_rating.csv");
    assert_eq!(facts.len(), 2);
    assert_eq!((facts[0].customer_id, facts[0].movie_id), (10, 1));
    assert_eq!((facts[1].customer_id, facts[1].movie_id), (11, 1));
    assert!(summary.cap_reached);
    assert!(summary.manifest.cap_reached);
}

#[test]
fn test_title_scenarios() {
    let fx = fixture(
        &[TWO_MOVIES],
        "700,1999,My, Title, With Commas\n701,NULL,Unknown Film\n",
        None,
    );
    warehouse::run(&fx.config).unwrap();
    let movies: Vec<MovieRow> = read_table(&fx.config.output_dir, "dim_movie.csv");
    assert_eq!(
        movies,
        vec![
            MovieRow {
                movie_id: 700,
                year_of_release: 1999,
                title: "My, Title, With Commas".to_string(),
            },
            MovieRow {
                movie_id: 701,
                year_of_release: 1800,
                title: "Unknown Film".to_string(),
            },
        ]
    );
}

#[test]
fn test_unparseable_date_drops_fact_row() {
    let source = "1:\n10,4,2004-01-01\n11,3,2004-13-45\n12,2,2004-01-03\n";
    let fx = fixture(&[source], TITLES, None);
    let summary = warehouse::run(&fx.config).unwrap();

    let facts: Vec<FactRow> = read_table(&fx.config.output_dir, "fact_rating.csv");
    let dates: Vec<DateRow> = read_table(&fx.config.output_dir, "dim_date.csv");
    assert_eq!(summary.records_extracted, 3);
    assert_eq!(facts.len(), 2);
    assert_eq!(dates.len(), 2);
    assert_eq!(summary.dropped_unresolved, 1);
    assert_eq!(summary.unparseable_dates, 1);
    assert!(facts.iter().all(|f| f.customer_id != 11));
}

#[test]
fn test_out_of_range_years_drop_fact_rows() {
    let source = "1:\n10,4,+214749-01-01\n11,3,0999-01-01\n12,2,-0001-01-01\n13,5,2004-01-03\n";
    let fx = fixture(&[source], TITLES, None);
    let summary = warehouse::run(&fx.config).unwrap();

    let facts: Vec<FactRow> = read_table(&fx.config.output_dir, "fact_rating.csv");
    let dates: Vec<DateRow> = read_table(&fx.config.output_dir, "dim_date.csv");
    assert_eq!(dates.iter().map(|d| d.date_key).collect::<Vec<_>>(), vec![20040103]);
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].customer_id, 13);
    assert_eq!(summary.unparseable_dates, 3);
    assert_eq!(summary.dropped_unresolved, 3);
}

// -------------------------------------------------------------------------
// PROPERTIES
// -------------------------------------------------------------------------

#[test]
fn test_referential_integrity_and_round_trip() {
    let source = "5:\n1,1,2005-12-31\n2,2,2005-01-01\n3,3,2004-02-29\n6:\n1,5,2005-12-31\n4,4,2003-07-14\n";
    let fx = fixture(&[source], TITLES, None);
    let summary = warehouse::run(&fx.config).unwrap();
    let out = &fx.config.output_dir;

    let facts: Vec<FactRow> = read_table(out, "fact_rating.csv");
    let dates: Vec<DateRow> = read_table(out, "dim_date.csv");
    let users: Vec<UserRow> = read_table(out, "dim_user.csv");

    let date_keys: HashSet<i32> = dates.iter().map(|d| d.date_key).collect();
    let user_ids: HashSet<i64> = users.iter().map(|u| u.customer_id).collect();
    assert!(facts.iter().all(|f| date_keys.contains(&f.date_key)));
    assert!(facts.iter().all(|f| user_ids.contains(&f.customer_id)));

    for row in &dates {
        let reparsed = parse_rating_date(&row.full_date.to_string()).unwrap();
        assert_eq!(date_key_of(reparsed), row.date_key);
    }
    assert!(dates.windows(2).all(|w| w[0].full_date < w[1].full_date));
    assert!(users.windows(2).all(|w| w[0].customer_id < w[1].customer_id));

    // movies 5 and 6 are not in the title file
    assert_eq!(summary.orphan_movies, 5);
}

#[test]
fn test_cap_equality_when_enough_records() {
    let mut source = String::from("1:\n");
    for customer in 0..50 {
        source.push_str(&format!("{},3,2005-03-{:02}\n", customer, customer % 28 + 1));
    }
    for cap in [1u64, 2, 7, 49, 50] {
        let fx = fixture(&[&source], TITLES, Some(cap));
        warehouse::run(&fx.config).unwrap();
        let facts: Vec<FactRow> = read_table(&fx.config.output_dir, "fact_rating.csv");
        assert_eq!(facts.len() as u64, cap);
    }
    let fx = fixture(&[&source], TITLES, Some(80));
    let summary = warehouse::run(&fx.config).unwrap();
    assert_eq!(summary.manifest.table("fact_rating").unwrap().rows, 50);
    assert!(!summary.cap_reached);
}

#[test]
fn test_cap_equality_with_unusable_dates_in_prefix() {
    let source = "1:\n10,4,garbage\n11,3,2004-01-02\n12,3,2004-01-03\n13,1,2004-01-04\n";
    let fx = fixture(&[source], TITLES, Some(2));
    let summary = warehouse::run(&fx.config).unwrap();

    let facts: Vec<FactRow> = read_table(&fx.config.output_dir, "fact_rating.csv");
    assert_eq!(
        facts.iter().map(|f| f.customer_id).collect::<Vec<_>>(),
        vec![11, 12]
    );
    assert_eq!(summary.dropped_unresolved, 1);
    assert!(summary.cap_reached);
}

#[test]
fn test_rerun_is_byte_identical() {
    let fx = fixture(&[TWO_MOVIES, "3:\n12,1,2005-05-05\n"], TITLES, Some(3));
    let first = warehouse::run(&fx.config).unwrap();
    let snapshot: Vec<Vec<u8>> = first
        .manifest
        .tables
        .iter()
        .map(|t| fs::read(fx.config.output_dir.join(&t.file)).unwrap())
        .collect();
    let manifest_bytes = fs::read(&first.manifest_path).unwrap();

    let second = warehouse::run(&fx.config).unwrap();
    for (table, bytes) in second.manifest.tables.iter().zip(&snapshot) {
        assert_eq!(&fs::read(fx.config.output_dir.join(&table.file)).unwrap(), bytes);
    }
    assert_eq!(fs::read(&second.manifest_path).unwrap(), manifest_bytes);
}

#[test]
fn test_manifest_hashes_match_files() {
    let fx = fixture(&[TWO_MOVIES], TITLES, None);
    warehouse::run(&fx.config).unwrap();
    let manifest = Manifest::read(&fx.config.manifest_path()).unwrap();
    let names: Vec<&str> = manifest.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["dim_movie", "dim_user", "dim_date", "fact_rating"]);
    for table in &manifest.tables {
        let on_disk = file_sha256(&fx.config.output_dir.join(&table.file)).unwrap();
        assert_eq!(on_disk, table.sha256);
    }
}

#[test]
fn test_intermediate_store_removed() {
    let fx = fixture(&[TWO_MOVIES], TITLES, None);
    warehouse::run(&fx.config).unwrap();
    let leftovers: Vec<_> = fs::read_dir(&fx.config.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.contains("intermediate") || name.ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);
}

// -------------------------------------------------------------------------
// FAILURES AND VERIFY
// -------------------------------------------------------------------------

#[test]
fn test_malformed_rating_aborts_with_stage() {
    let fx = fixture(&["1:\n10,4\n"], TITLES, None);
    let err = warehouse::run(&fx.config).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ExtractRatings));
    assert!(err.to_string().contains("combined_data_1.txt:2"));
    assert!(!fx.config.manifest_path().exists());
}

#[test]
fn test_missing_titles_file_aborts_in_title_stage() {
    let mut fx = fixture(&[TWO_MOVIES], TITLES, None);
    fx.config.titles_file = fx.dir.path().join("missing_titles.csv");
    let err = warehouse::run(&fx.config).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ReadTitles));
    assert!(!fx.config.scratch_dir.join(warehouse::store::STORE_FILE).exists());
}

#[test]
fn test_failed_rerun_retires_previous_manifest() {
    let fx = fixture(&[TWO_MOVIES], TITLES, None);
    warehouse::run(&fx.config).unwrap();
    assert!(fx.config.manifest_path().exists());

    fs::write(&fx.config.ratings_files[0], "1:\n10,4\n").unwrap();
    let err = warehouse::run(&fx.config).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ExtractRatings));
    assert!(!fx.config.manifest_path().exists());
    let partials: Vec<_> = fs::read_dir(&fx.config.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".partial"))
        .collect();
    assert!(partials.is_empty(), "partial files: {:?}", partials);
}

#[test]
fn test_duplicate_title_ids_keep_first() {
    let fx = fixture(&[TWO_MOVIES], "1,2003,Dinosaur Planet\n1,2010,Dinosaur Planet 2\n", None);
    warehouse::run(&fx.config).unwrap();
    let movies: Vec<MovieRow> = read_table(&fx.config.output_dir, "dim_movie.csv");
    assert_eq!(movies.len(), 1);
    assert_eq!(movies[0].year_of_release, 2003);
}

#[test]
fn test_verify_passes_then_detects_tampering() {
    let fx = fixture(&[TWO_MOVIES], TITLES, None);
    warehouse::run(&fx.config).unwrap();
    assert!(warehouse::verify(&fx.config).unwrap().is_empty());
    assert!(!fx.config.output_dir.join(warehouse::pipeline::VERIFY_DIR).exists());

    let mut manifest = Manifest::read(&fx.config.manifest_path()).unwrap();
    manifest.tables[0].sha256 = "sha256:tampered".to_string();
    manifest.write(&fx.config.output_dir).unwrap();
    let mismatches = warehouse::verify(&fx.config).unwrap();
    assert_eq!(mismatches.len(), 1);
    assert!(mismatches[0].starts_with("dim_movie"));
}
