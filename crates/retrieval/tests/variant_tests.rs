//! Behaviour of each retriever variant over the in-memory backend.

use chrono::Duration;
use std::sync::Arc;

use hydro_common::{
    DataType, DatasetOrientation, Event, MonthDay, ReferenceTimeType, TimeSeries,
    TimeSeriesMetadata, TimeWindowFilter,
};
use retrieval::{
    AnalysisOptions, AnalysisRetriever, AnyRetriever, DuplicatePolicy, EnsembleOptions,
    EnsembleRetriever, GriddedOptions, GriddedRetriever, Predicate, RetrievalError,
    RetrieverFactory, Retriever, SingleValuedKind, SingleValuedRetriever, Variant,
};
use test_utils::{
    analysis_rows, assert_approx_eq, assert_missing, at, drrc2, ensemble_rows, fixture_request,
    fixture_services, forecast_rows, ids, observation_rows, MockBackend, MockGriddedReader,
    RowBuilder, VARIABLE,
};

mod single_valued {
    use super::*;

    #[tokio::test]
    async fn test_forecast_window_is_left_open() {
        let mut rows = forecast_rows(1, 0, &[1, 2, 3]);
        rows.extend(forecast_rows(2, 6, &(1..10).collect::<Vec<_>>()));
        rows.extend(forecast_rows(3, 12, &[1, 2, 3]));
        let backend = Arc::new(MockBackend::new(rows));

        let window = TimeWindowFilter::unbounded()
            .with_reference_times(Some(at(0)), Some(at(12)))
            .with_lead_durations(None, Some(Duration::hours(6)));
        let request = fixture_request(DatasetOrientation::Right).with_time_window(window);
        let retriever = SingleValuedRetriever::new(
            &request,
            fixture_services(backend.clone()),
            SingleValuedKind::Forecast,
        )
        .unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].reference_time(ReferenceTimeType::T0), Some(at(6)));
        assert_eq!(series[0].len(), 6);
        assert_eq!(series[1].len(), 3);

        let query = &backend.queries()[0];
        let predicates = query.constraints.predicates();
        assert_eq!(predicates.len(), 3);
        assert!(matches!(predicates[2], Predicate::ValidTime(v) if v.is_inferred()));
    }

    #[tokio::test]
    async fn test_observations_ignore_reference_and_lead_bounds() {
        let backend = Arc::new(MockBackend::new(observation_rows(1, 0..24)));
        let window = TimeWindowFilter::unbounded()
            .with_reference_times(Some(at(0)), Some(at(6)))
            .with_lead_durations(Some(Duration::hours(0)), Some(Duration::hours(6)));
        let request = fixture_request(DatasetOrientation::Left).with_time_window(window);
        let retriever = SingleValuedRetriever::new(
            &request,
            fixture_services(backend.clone()),
            SingleValuedKind::Observation,
        )
        .unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        // Valid times in (R0 + L0, R1 + L1] are hours 1 through 12
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].len(), 12);
        assert_eq!(series[0].events()[0].time, at(1));
        assert!(series[0].metadata().reference_times.is_empty());
    }

    #[tokio::test]
    async fn test_season_wrapping_the_year_end() {
        let rows = vec![
            RowBuilder::new(1, 0).build(),
            RowBuilder::new(1, 24 * 40).build(),
            RowBuilder::new(1, 24 * 100).build(),
        ];
        let backend = Arc::new(MockBackend::new(rows));
        let request = fixture_request(DatasetOrientation::Left)
            .with_season(MonthDay::new(12, 1).unwrap(), MonthDay::new(2, 1).unwrap());
        let retriever = SingleValuedRetriever::new(
            &request,
            fixture_services(backend),
            SingleValuedKind::Simulation,
        )
        .unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        // 10 February and 11 April fall outside the season
        let times: Vec<_> = series[0].events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![at(0)]);
    }

    #[tokio::test]
    async fn test_sentinel_and_null_values_are_missing() {
        let rows = vec![
            RowBuilder::new(1, 0).value(Some(-999.0)).build(),
            RowBuilder::new(1, 1).value(None).build(),
            RowBuilder::new(1, 2).value(Some(4.5)).build(),
        ];
        let backend = Arc::new(MockBackend::new(rows));
        let retriever = SingleValuedRetriever::new(
            &fixture_request(DatasetOrientation::Left),
            fixture_services(backend),
            SingleValuedKind::Observation,
        )
        .unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        let events = series[0].events();
        assert_missing!(events[0].value);
        assert_missing!(events[1].value);
        assert_approx_eq!(events[2].value, 4.5);
    }

    #[tokio::test]
    async fn test_identifier_operations() {
        let mut rows = forecast_rows(1, 0, &[1, 2]);
        rows.extend(forecast_rows(2, 6, &[1, 2]));
        rows.extend(forecast_rows(3, 12, &[1]));
        let backend = Arc::new(MockBackend::new(rows));
        let retriever = SingleValuedRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend),
            SingleValuedKind::Forecast,
        )
        .unwrap();

        assert!(retriever.supports_identifiers());
        assert_eq!(retriever.list_ids().await.unwrap(), vec![1, 2, 3]);

        let series = retriever
            .get_by_ids(&[2])
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].reference_time(ReferenceTimeType::T0), Some(at(6)));
    }

    #[test]
    fn test_unknown_feature_is_an_access_error() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let request = fixture_request(DatasetOrientation::Baseline)
            .with_features(vec![hydro_common::Feature::new("NOWHERE")]);
        let services = fixture_services(backend);
        let err = SingleValuedRetriever::new(&request, services, SingleValuedKind::Simulation)
            .err()
            .unwrap();
        assert!(err.is_access());
    }
}

mod ensemble {
    use super::*;

    #[tokio::test]
    async fn test_members_are_labelled_and_sorted() {
        let backend = Arc::new(MockBackend::new(ensemble_rows(1, 0, &[1, 2])));
        let retriever = EnsembleRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend.clone()),
            &EnsembleOptions::default(),
        )
        .unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        assert_eq!(series.len(), 1);
        let first = &series[0].events()[0].value;
        assert_eq!(first.labels(), &["1985", "1986", "1987"]);
        assert_approx_eq!(first.member("1986").unwrap(), 321.0);
        assert!(backend.counters().balanced());
    }

    #[tokio::test]
    async fn test_member_filters_reach_the_query() {
        let backend = Arc::new(MockBackend::new(ensemble_rows(1, 0, &[1])));
        let options = EnsembleOptions {
            include_members: Vec::new(),
            exclude_members: vec!["1986".to_string()],
        };
        let retriever = EnsembleRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend.clone()),
            &options,
        )
        .unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        assert_eq!(series[0].events()[0].value.labels(), &["1985", "1987"]);
        assert_eq!(backend.queries()[0].members.exclude, vec![ids::MEMBER_1986]);
    }

    #[test]
    fn test_unknown_member_is_rejected() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let options = EnsembleOptions {
            include_members: vec!["2050".to_string()],
            exclude_members: Vec::new(),
        };
        let result = EnsembleRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend),
            &options,
        );
        assert!(result.err().unwrap().is_access());
    }

    #[tokio::test]
    async fn test_identifier_operations_are_unsupported() {
        let backend = Arc::new(MockBackend::new(ensemble_rows(1, 0, &[1])));
        let retriever = EnsembleRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend.clone()),
            &EnsembleOptions::default(),
        )
        .unwrap();

        assert!(!retriever.supports_identifiers());
        assert!(retriever.get_by_ids(&[1]).await.err().unwrap().is_unsupported());
        assert!(retriever.list_ids().await.unwrap_err().is_unsupported());
        assert!(backend.queries().is_empty());
    }
}

mod analysis {
    use super::*;

    fn retriever(backend: Arc<MockBackend>, options: AnalysisOptions) -> AnalysisRetriever {
        AnalysisRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend),
            options,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_keep_latest_reference_time() {
        let backend = Arc::new(MockBackend::new(analysis_rows(100, &[0, 6], 12)));
        let options = AnalysisOptions {
            duplicate_policy: DuplicatePolicy::KeepLatestReferenceTime,
            ..AnalysisOptions::default()
        };

        let series = retriever(backend.clone(), options)
            .get()
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(
            series[0].reference_time(ReferenceTimeType::AnalysisStartTime),
            Some(at(6))
        );
        assert_eq!(series[0].len(), 12);
        assert_eq!(series[1].len(), 6);
        assert_eq!(series[1].events().last().map(|e| e.time), Some(at(5)));
        assert!(backend.counters().balanced());
    }

    #[tokio::test]
    async fn test_keep_all_returns_every_issuance() {
        let backend = Arc::new(MockBackend::new(analysis_rows(100, &[0, 6], 12)));
        let series = retriever(backend, AnalysisOptions::default())
            .get()
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(series.iter().map(|s| s.len()).sum::<usize>(), 24);
    }

    #[tokio::test]
    async fn test_one_series_per_analysis_duration() {
        let backend = Arc::new(MockBackend::new(analysis_rows(100, &[0, 6, 12], 12)));
        let options = AnalysisOptions {
            earliest_analysis_duration: Some(Duration::zero()),
            latest_analysis_duration: Some(Duration::zero()),
            ..AnalysisOptions::default()
        };

        let series = retriever(backend.clone(), options)
            .get()
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();

        assert_eq!(series.len(), 3);
        assert!(series.iter().all(|s| s.len() == 1));
        let times: Vec<_> = series.iter().map(|s| s.events()[0].time).collect();
        assert_eq!(times, vec![at(0), at(6), at(12)]);

        let query = &backend.queries()[0];
        assert!(query.constraints.reference_time.is_none());
        assert!(query.constraints.lead_duration.is_some());
        assert!(query.constraints.season.is_none());
    }

    #[test]
    fn test_inverted_durations_are_rejected() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let result = AnalysisRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend),
            AnalysisOptions {
                earliest_analysis_duration: Some(Duration::hours(6)),
                latest_analysis_duration: Some(Duration::hours(1)),
                ..AnalysisOptions::default()
            },
        );
        assert!(matches!(result, Err(RetrievalError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_identifier_operations_fail_loudly() {
        let backend = Arc::new(MockBackend::new(analysis_rows(100, &[0], 2)));
        let retriever = retriever(backend, AnalysisOptions::default());

        let err = retriever.get_by_ids(&[100]).await.err().unwrap();
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("composed on demand"));
        assert!(retriever.list_ids().await.unwrap_err().is_unsupported());
    }
}

mod gridded {
    use super::*;

    fn gridded_series(value: f64) -> TimeSeries<f64> {
        let metadata = TimeSeriesMetadata::new(VARIABLE, drrc2(), "CMS");
        TimeSeries::of(metadata, vec![Event::new(at(1), value)]).unwrap()
    }

    #[tokio::test]
    async fn test_reads_variable_and_aliases() {
        let backend = Arc::new(
            MockBackend::new(Vec::new()).with_paths(vec!["/data/nwm/channel_rt.nc".to_string()]),
        );
        let reader = Arc::new(
            MockGriddedReader::new()
                .with_series(VARIABLE, vec![gridded_series(1.0)])
                .with_series("QINE", vec![gridded_series(2.0)]),
        );
        let services = fixture_services(backend).with_gridded_reader(reader.clone());
        let options = GriddedOptions {
            aliases: vec!["QINE".to_string()],
            is_forecast: true,
        };
        let request = fixture_request(DatasetOrientation::Right);
        let retriever = GriddedRetriever::new(&request, services, options).unwrap();

        let series = retriever.get().await.unwrap().collect_all().await.unwrap();
        assert_eq!(series.len(), 2);
        assert_approx_eq!(series[1].events()[0].value, 2.0);

        let requests = reader.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].variable_name, "QINE");
        assert!(requests.iter().all(|r| r.is_forecast && r.paths.len() == 1));
    }

    #[tokio::test]
    async fn test_no_sources_is_an_empty_stream() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let reader = Arc::new(MockGriddedReader::new());
        let services = fixture_services(backend).with_gridded_reader(reader.clone());
        let retriever = GriddedRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            services,
            GriddedOptions::default(),
        )
        .unwrap();

        assert!(retriever.get().await.unwrap().collect_all().await.unwrap().is_empty());
        assert!(reader.requests().is_empty());
    }

    #[tokio::test]
    async fn test_reader_failure_is_an_access_error() {
        let backend = Arc::new(MockBackend::new(Vec::new()).with_paths(vec!["a.nc".to_string()]));
        let services = fixture_services(backend)
            .with_gridded_reader(Arc::new(MockGriddedReader::new().failing()));
        let retriever = GriddedRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            services,
            GriddedOptions::default(),
        )
        .unwrap();

        assert!(retriever.get().await.err().unwrap().is_access());
    }

    #[tokio::test]
    async fn test_requires_a_reader_and_rejects_identifiers() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let missing = GriddedRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            fixture_services(backend.clone()),
            GriddedOptions::default(),
        );
        assert!(matches!(missing, Err(RetrievalError::Configuration(_))));

        let services =
            fixture_services(backend).with_gridded_reader(Arc::new(MockGriddedReader::new()));
        let retriever = GriddedRetriever::new(
            &fixture_request(DatasetOrientation::Right),
            services,
            GriddedOptions::default(),
        )
        .unwrap();
        assert!(retriever.list_ids().await.unwrap_err().is_unsupported());
        assert!(!retriever.supports_identifiers());
    }
}

mod factory {
    use super::*;

    #[test]
    fn test_selects_variant_by_data_type() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let factory = RetrieverFactory::new(fixture_services(backend));
        let request = fixture_request(DatasetOrientation::Right);

        assert!(matches!(
            factory.for_data_type(&request, DataType::Observations).unwrap(),
            AnyRetriever::Scalar(_)
        ));
        assert!(matches!(
            factory.for_data_type(&request, DataType::EnsembleForecasts).unwrap(),
            AnyRetriever::Ensemble(_)
        ));

        let analysis = factory.for_data_type(&request, DataType::Analyses).unwrap();
        assert!(analysis.describe().starts_with("analysis"));
    }

    #[test]
    fn test_ensemble_is_not_scalar() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let factory = RetrieverFactory::new(fixture_services(backend));
        let result = factory.scalar(
            &fixture_request(DatasetOrientation::Right),
            &Variant::Ensemble(EnsembleOptions::default()),
        );
        assert!(matches!(result, Err(RetrievalError::Configuration(_))));
    }

    #[test]
    fn test_invalid_request_fails_at_construction() {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let factory = RetrieverFactory::new(fixture_services(backend));
        let request = fixture_request(DatasetOrientation::Right).with_features(Vec::new());
        let result = factory.build(&request, &Variant::SingleValuedForecast);
        assert!(matches!(result, Err(RetrievalError::Configuration(_))));
    }
}
