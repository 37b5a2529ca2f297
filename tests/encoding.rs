use race_trainer::config::SeasonRoster;
use race_trainer::encoder::{FeatureEncoder, UNKNOWN_CODE};
use race_trainer::sample_gen::{SampleGenerator, label_summary};

#[test]
fn labels_follow_race_groups() {
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    for (n, seed) in [(3000, 42), (1010, 1), (20, 99)] {
        let records = generator.generate(n, Some(seed)).unwrap();
        let summary = label_summary(&records);
        assert_eq!(summary.records, n);
        assert_eq!(summary.winners, summary.races, "n={n} seed={seed}");
        assert!(summary.max_podiums_per_race <= 3);
    }
}

#[test]
fn base_rates_match_a_full_grid() {
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    let records = generator.generate(3000, Some(42)).unwrap();
    let summary = label_summary(&records);
    let win_rate = summary.winners as f64 / summary.records as f64;
    let podium_rate = summary.podiums as f64 / summary.records as f64;
    assert!((win_rate - 0.05).abs() < 1e-9);
    assert!((podium_rate - 0.15).abs() < 1e-9);
}

#[test]
fn unseen_categories_get_the_unknown_code() {
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    let records = generator.generate(200, Some(8)).unwrap();
    let encoded = FeatureEncoder::default().fit(&records).unwrap();
    let names = encoded.state.feature_names();
    let col = |name: &str| names.iter().position(|n| n == name).unwrap();

    let mut rookie = records[0].clone();
    rookie.driver = "Rookie Driver".to_string();
    rookie.team = "New Team".to_string();
    rookie.circuit = "Street Circuit Nowhere".to_string();

    let raw = encoded.state.raw_row(&rookie);
    assert_eq!(raw[col("driver_encoded")], UNKNOWN_CODE);
    assert_eq!(raw[col("team_encoded")], UNKNOWN_CODE);
    assert_eq!(raw[col("circuit_encoded")], UNKNOWN_CODE);

    let row = encoded.state.transform_record(&rookie).unwrap();
    assert_eq!(row.len(), encoded.matrix.n_cols());
    assert!(row.iter().all(|v| v.is_finite()));

    let known = encoded.state.transform_record(&records[0]).unwrap();
    assert_eq!(known, encoded.matrix.rows[0]);
}
