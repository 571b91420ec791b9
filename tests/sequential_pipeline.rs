//! End-to-end runs of the DAA → IDA → IDC pipeline on the default backend.

#![cfg(feature = "microlp")]

use bess_market_optimizer::{
    BatteryModel, BatteryParams, CouplingPolicy, EngineConfig, Error, Exclusivity,
    InMemoryMarketData, MarketPrices, MarketStage, PriceSeries, RunState, Schedule,
    SequentialOrchestrator, SolveStatus, StageOptimizer, StageRequest, TerminalSoc,
};
use chrono::NaiveDate;
use rstest::rstest;

const TOLERANCE: f64 = 1e-6;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn unit_battery(max_cycles_per_day: Option<f64>) -> BatteryModel {
    BatteryModel::new(BatteryParams {
        capacity_mwh: 1.0,
        max_charge_mw: 1.0,
        max_discharge_mw: 1.0,
        charge_efficiency: 1.0,
        discharge_efficiency: 1.0,
        soc_min_mwh: 0.0,
        soc_max_mwh: 1.0,
        soc_init_mwh: 0.5,
        max_cycles_per_day,
    })
    .unwrap()
}

fn lossy_battery() -> BatteryModel {
    BatteryModel::new(BatteryParams {
        capacity_mwh: 4.0,
        max_charge_mw: 1.0,
        max_discharge_mw: 1.0,
        charge_efficiency: 0.95,
        discharge_efficiency: 0.92,
        soc_min_mwh: 0.4,
        soc_max_mwh: 3.6,
        soc_init_mwh: 2.0,
        max_cycles_per_day: Some(1.5),
    })
    .unwrap()
}

fn hourly_config(horizon: usize) -> EngineConfig {
    EngineConfig {
        horizon,
        interval_hours: 1.0,
        ..EngineConfig::default()
    }
}

/// Daily price shape with a morning and an evening peak, shifted by `offset`
fn profile(horizon: usize, offset: f64) -> Vec<f64> {
    (0..horizon)
        .map(|q| {
            let hour = q as f64 * 24.0 / horizon as f64;
            let morning = 18.0 * (-((hour - 8.0) / 2.0).powi(2)).exp();
            let evening = 30.0 * (-((hour - 19.0) / 2.5).powi(2)).exp();
            let night_dip = -12.0 * (-((hour - 3.0) / 2.0).powi(2)).exp();
            45.0 + morning + evening + night_dip + offset * (hour / 24.0 - 0.5)
        })
        .collect()
}

fn prices(daa: Vec<f64>, ida: Vec<f64>, idc: Vec<f64>) -> MarketPrices {
    MarketPrices::new(
        day(),
        PriceSeries::new(daa).unwrap(),
        PriceSeries::new(ida).unwrap(),
        PriceSeries::new(idc).unwrap(),
    )
}

fn assert_physically_valid(schedule: &Schedule, battery: &BatteryModel) {
    let mut soc = battery.soc_init_mwh();
    for q in 0..schedule.horizon() {
        let (cha, dis) = (schedule.charge_mw[q], schedule.discharge_mw[q]);
        assert!(cha == 0.0 || dis == 0.0, "quarter {q} charges and discharges");
        assert!(cha <= battery.max_charge_mw() + TOLERANCE);
        assert!(dis <= battery.max_discharge_mw() + TOLERANCE);
        soc = battery.soc_after(soc, cha, dis, schedule.interval_hours);
        assert!((schedule.soc_mwh[q] - soc).abs() < 1e-9, "recursion broken at {q}");
        assert!(soc >= battery.soc_min_mwh() - TOLERANCE);
        assert!(soc <= battery.soc_max_mwh() + TOLERANCE);
    }
}

fn assert_revenue_identity(schedule: &Schedule) {
    let objectives: f64 = schedule.stages.iter().map(|s| s.objective).sum();
    assert!((schedule.total_revenue - objectives).abs() < TOLERANCE);
    assert!((schedule.total_revenue - schedule.replayed_revenue()).abs() < TOLERANCE);
}

#[test]
fn two_cycle_day_ahead_scenario() {
    let battery = unit_battery(Some(1.0));
    let config = hourly_config(4);
    let prices = prices(
        vec![10.0, 50.0, 10.0, 50.0],
        vec![30.0; 4],
        vec![30.0; 4],
    );

    let mut run = SequentialOrchestrator::new(battery.clone(), prices, config).unwrap();
    let schedule = run.run().unwrap();

    assert_eq!(run.state(), RunState::Aggregated);
    assert_eq!(schedule.status, SolveStatus::Optimal);
    assert!((schedule.total_revenue - 40.0).abs() < TOLERANCE);
    assert!((schedule.soc_mwh[3] - 0.5).abs() < TOLERANCE);
    assert!((schedule.stage(MarketStage::Daa).unwrap().objective - 40.0).abs() < TOLERANCE);
    assert!(schedule.stage(MarketStage::Ida).unwrap().objective.abs() < TOLERANCE);
    assert!(schedule.stage(MarketStage::Idc).unwrap().objective.abs() < TOLERANCE);
    assert_physically_valid(&schedule, &battery);
    assert_revenue_identity(&schedule);
}

#[test]
fn flat_prices_leave_battery_idle() {
    let battery = lossy_battery();
    let config = EngineConfig::default();
    let flat = vec![42.0; config.horizon];
    let prices = prices(flat.clone(), flat.clone(), flat);

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    assert!(schedule.charge_mw.iter().all(|&c| c == 0.0));
    assert!(schedule.discharge_mw.iter().all(|&d| d == 0.0));
    for stage in &schedule.stages {
        assert!(stage.charge_mw.iter().all(|&c| c == 0.0));
        assert!(stage.discharge_mw.iter().all(|&d| d == 0.0));
    }
    assert_eq!(schedule.total_revenue, 0.0);
    assert!(schedule
        .soc_mwh
        .iter()
        .all(|&soc| (soc - battery.soc_init_mwh()).abs() < TOLERANCE));
}

#[test]
fn later_stage_captures_intraday_spread() {
    let battery = unit_battery(Some(1.0));
    let config = hourly_config(4);
    let prices = prices(
        vec![30.0; 4],
        vec![10.0, 50.0, 10.0, 50.0],
        vec![30.0; 4],
    );

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    assert!(schedule.stage(MarketStage::Daa).unwrap().objective.abs() < TOLERANCE);
    assert!((schedule.stage(MarketStage::Ida).unwrap().objective - 40.0).abs() < TOLERANCE);
    assert!((schedule.total_revenue - 40.0).abs() < TOLERANCE);
    assert_physically_valid(&schedule, &battery);
}

#[test]
fn equality_coupling_freezes_day_ahead_position() {
    let battery = unit_battery(Some(1.0));
    let mut config = hourly_config(4);
    config.coupling = CouplingPolicy::Equality;
    let prices = prices(
        vec![10.0, 50.0, 10.0, 50.0],
        vec![50.0, 10.0, 50.0, 10.0],
        vec![5.0, 90.0, 5.0, 90.0],
    );

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    let daa = schedule.stage(MarketStage::Daa).unwrap();
    for stage in [MarketStage::Ida, MarketStage::Idc] {
        let later = schedule.stage(stage).unwrap();
        assert!(later.charge_mw.iter().all(|&c| c.abs() < TOLERANCE));
        assert!(later.discharge_mw.iter().all(|&d| d.abs() < TOLERANCE));
        assert_eq!(later.net_position_mw, daa.net_position_mw);
    }
    assert!((schedule.total_revenue - 40.0).abs() < TOLERANCE);
}

#[rstest]
#[case(0.0)]
#[case(0.1)]
#[case(0.35)]
fn band_coupling_bounds_every_adjustment(#[case] band: f64) {
    let battery = lossy_battery();
    let mut config = EngineConfig::default();
    config.coupling = CouplingPolicy::Band {
        max_deviation_mw: band,
    };
    let h = config.horizon;
    let prices = prices(profile(h, 0.0), profile(h, 15.0), profile(h, -20.0));

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    for stage in [MarketStage::Ida, MarketStage::Idc] {
        let adjustment = schedule.stage(stage).unwrap();
        for net in adjustment.signed_dispatch_mw() {
            assert!(net.abs() <= band + TOLERANCE, "{stage} moved {net} MW");
        }
    }
    assert_physically_valid(&schedule, &battery);
    assert_revenue_identity(&schedule);
}

#[test]
fn full_day_revenue_matches_replay() {
    let battery = lossy_battery();
    let config = EngineConfig::default();
    let h = config.horizon;
    let prices = prices(profile(h, 0.0), profile(h, 12.0), profile(h, -8.0));

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(schedule.horizon(), 96);
    assert!(schedule.total_revenue > 0.0);
    assert_physically_valid(&schedule, &battery);
    assert_revenue_identity(&schedule);
    assert!((schedule.soc_mwh[95] - battery.soc_init_mwh()).abs() < TOLERANCE);
    assert_eq!(
        schedule.quarter_start(95).unwrap().format("%H:%M").to_string(),
        "23:45"
    );
}

#[test]
fn binary_exclusivity_matches_final_stage_trajectory() {
    let battery = lossy_battery();
    let mut config = hourly_config(24);
    config.solver.exclusivity = Exclusivity::Binary;
    config.solver.time_limit_seconds = 60.0;
    let prices = prices(profile(24, 0.0), profile(24, 10.0), profile(24, -10.0));

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    let idc = schedule.stage(MarketStage::Idc).unwrap();
    for (combined, planned) in schedule.soc_mwh.iter().zip(&idc.soc_mwh) {
        assert!((combined - planned).abs() < TOLERANCE);
    }
    assert_physically_valid(&schedule, &battery);
}

#[test]
fn day_ahead_hourly_blocks() {
    let battery = lossy_battery();
    let mut config = EngineConfig::default();
    config.products.daa.block_quarters = 4;
    let h = config.horizon;
    let prices = prices(profile(h, 0.0), profile(h, 6.0), profile(h, -6.0));

    let schedule = SequentialOrchestrator::new(battery, prices, config)
        .unwrap()
        .run()
        .unwrap();

    let daa = schedule.stage(MarketStage::Daa).unwrap();
    for (buys, sells) in daa.charge_mw.chunks(4).zip(daa.discharge_mw.chunks(4)) {
        assert!(buys.iter().all(|b| (b - buys[0]).abs() < TOLERANCE));
        assert!(sells.iter().all(|s| (s - sells[0]).abs() < TOLERANCE));
    }
}

#[test]
fn free_terminal_soc_can_end_empty() {
    let battery = unit_battery(None);
    let mut config = hourly_config(2);
    config.terminal_soc = TerminalSoc::Free;
    let prices = PriceSeries::new(vec![40.0, 60.0]).unwrap();

    let daa = StageOptimizer::new(&battery, &config)
        .optimize(StageRequest {
            stage: MarketStage::Daa,
            prices: &prices,
            commitment: None,
            boundary_soc_mwh: battery.soc_init_mwh(),
        })
        .unwrap();

    // Top up to full at 40, then empty the battery at 60.
    assert!((daa.charge_mw[0] - 0.5).abs() < TOLERANCE);
    assert!((daa.discharge_mw[1] - 1.0).abs() < TOLERANCE);
    assert!(daa.terminal_soc_mwh().abs() < TOLERANCE);
    assert!((daa.objective - 40.0).abs() < TOLERANCE);
    assert_eq!(daa.commitment().terminal_soc_mwh(), daa.terminal_soc_mwh());
}

#[test]
fn free_terminal_pipeline_keeps_day_ahead_plan() {
    let battery = unit_battery(None);
    let mut config = hourly_config(2);
    config.terminal_soc = TerminalSoc::Free;
    let prices = prices(vec![40.0, 60.0], vec![30.0; 2], vec![30.0; 2]);

    let schedule = SequentialOrchestrator::new(battery.clone(), prices, config)
        .unwrap()
        .run()
        .unwrap();

    assert!((schedule.total_revenue - 40.0).abs() < TOLERANCE);
    assert!((schedule.soc_mwh[0] - 1.0).abs() < TOLERANCE);
    assert!(schedule.soc_mwh[1].abs() < TOLERANCE);
    for stage in [MarketStage::Ida, MarketStage::Idc] {
        let later = schedule.stage(stage).unwrap();
        assert_eq!(later.boundary_soc_mwh, battery.soc_init_mwh());
        assert!(later.objective.abs() < TOLERANCE, "{stage} traded");
        assert!(later.signed_dispatch_mw().all(|net| net.abs() < TOLERANCE));
        for (planned, combined) in later.soc_mwh.iter().zip(&schedule.soc_mwh) {
            assert!((planned - combined).abs() < TOLERANCE);
        }
    }
    assert_physically_valid(&schedule, &battery);
    assert_revenue_identity(&schedule);
}

fn lossy_unit_battery() -> BatteryModel {
    BatteryModel::new(BatteryParams {
        charge_efficiency: 0.9,
        discharge_efficiency: 0.9,
        ..unit_battery(None).params().clone()
    })
    .unwrap()
}

#[test]
fn negative_prices_are_rejected_with_relaxed_exclusivity() {
    let negative = vec![-50.0; 4];
    let err = SequentialOrchestrator::new(
        lossy_unit_battery(),
        prices(negative.clone(), negative.clone(), negative),
        hourly_config(4),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn negative_prices_run_with_binary_exclusivity() {
    let battery = lossy_unit_battery();
    let mut config = hourly_config(4);
    config.solver.exclusivity = Exclusivity::Binary;
    let negative = vec![-50.0; 4];
    let prices = prices(negative.clone(), negative.clone(), negative);

    let mut run = SequentialOrchestrator::new(battery.clone(), prices, config).unwrap();
    let schedule = run.run().unwrap();

    assert_eq!(run.state(), RunState::Aggregated);
    assert!(schedule.stage(MarketStage::Daa).unwrap().objective > 0.0);
    for stage in &schedule.stages {
        // Each stage's trajectory follows from its net position alone, so no
        // energy was burnt by charging and discharging at once.
        let mut soc = battery.soc_init_mwh();
        for (q, net) in stage.net_position_mw.iter().enumerate() {
            soc = battery.soc_after(soc, net.max(0.0), (-net).max(0.0), 1.0);
            assert!((stage.soc_mwh[q] - soc).abs() < TOLERANCE, "{} quarter {q}", stage.stage);
        }
        assert!(stage.objective > -TOLERANCE, "{} lost money", stage.stage);
    }
    assert!((schedule.soc_mwh[3] - battery.soc_init_mwh()).abs() < TOLERANCE);
    assert_physically_valid(&schedule, &battery);
    assert_revenue_identity(&schedule);
}

#[test]
fn out_of_order_stage_is_rejected() {
    let config = hourly_config(4);
    let flat = vec![30.0; 4];
    let mut run = SequentialOrchestrator::new(
        unit_battery(None),
        prices(flat.clone(), flat.clone(), flat),
        config,
    )
    .unwrap();

    assert!(matches!(
        run.advance(MarketStage::Idc),
        Err(Error::StageOrder {
            requested: MarketStage::Idc,
            expected: Some(MarketStage::Daa)
        })
    ));
    run.advance(MarketStage::Daa).unwrap();
    assert!(matches!(
        run.advance(MarketStage::Daa),
        Err(Error::StageOrder {
            expected: Some(MarketStage::Ida),
            ..
        })
    ));
    assert_eq!(run.state(), RunState::Completed(MarketStage::Daa));
}

#[test]
fn missing_or_misaligned_prices_fail_before_solving() {
    let config = hourly_config(4);
    let provider = InMemoryMarketData::new()
        .with(day(), MarketStage::Daa, vec![30.0; 4])
        .with(day(), MarketStage::Ida, vec![30.0; 4]);
    let err =
        SequentialOrchestrator::from_provider(unit_battery(None), &provider, day(), config.clone())
            .unwrap_err();
    assert!(matches!(err, Error::Data(_)));

    let provider = provider.with(day(), MarketStage::Idc, vec![30.0; 5]);
    let err = SequentialOrchestrator::from_provider(unit_battery(None), &provider, day(), config)
        .unwrap_err();
    assert!(matches!(err, Error::Data(_)));
}

#[test]
fn unreachable_soc_floor_is_infeasible() {
    let battery = BatteryModel::new(BatteryParams {
        capacity_mwh: 1.0,
        max_charge_mw: 0.1,
        max_discharge_mw: 0.1,
        charge_efficiency: 1.0,
        discharge_efficiency: 1.0,
        soc_min_mwh: 0.9,
        soc_max_mwh: 1.0,
        soc_init_mwh: 0.95,
        max_cycles_per_day: None,
    })
    .unwrap();
    let config = hourly_config(4);
    let prices = PriceSeries::new(vec![10.0, 20.0, 30.0, 40.0]).unwrap();

    let err = StageOptimizer::new(&battery, &config)
        .optimize(StageRequest {
            stage: MarketStage::Daa,
            prices: &prices,
            commitment: None,
            boundary_soc_mwh: 0.0,
        })
        .unwrap_err();

    assert_eq!(err.stage(), Some(MarketStage::Daa));
    assert_eq!(err.status(), Some(SolveStatus::Infeasible));
}

#[test]
fn toml_configuration_drives_a_run() {
    let config = EngineConfig::from_toml_str(
        r#"
        horizon = 4
        interval_hours = 1.0

        [coupling]
        mode = "equality"
        "#,
    )
    .unwrap();
    let prices = prices(
        vec![10.0, 50.0, 10.0, 50.0],
        vec![50.0, 10.0, 50.0, 10.0],
        vec![30.0; 4],
    );

    let schedule = SequentialOrchestrator::new(unit_battery(Some(1.0)), prices, config)
        .unwrap()
        .run()
        .unwrap();
    assert!((schedule.total_revenue - 40.0).abs() < TOLERANCE);

    let json = serde_json::to_value(&schedule).unwrap();
    assert_eq!(json["status"], "optimal");
    assert_eq!(json["stages"].as_array().unwrap().len(), 3);
}
