// readout-core/tests/end_to_end.rs

use approx::assert_abs_diff_eq;
use readout_core::config::{CalibrationParams, DelayParams, SimulationConfig, SweepParams};
use readout_core::{ReadoutError, Scanner, SimulatedDevice, ToneSet};

fn delay_params() -> DelayParams {
    DelayParams {
        nf: 20,
        bandwidth: Some(4.0),
        i_begin: 100,
        n_samples: 2000,
        ..Default::default()
    }
}

fn calibration_params() -> CalibrationParams {
    CalibrationParams {
        nf: 20,
        nt: 1,
        i_begin: 50,
        n_samples: 500,
        ..Default::default()
    }
}

#[test]
fn recovers_simulated_delay() {
    let mut device = SimulatedDevice::with_delay(0.05);
    let mut scanner = Scanner::new(&mut device);
    let fit = scanner.measure_nominal_delay(25, &delay_params()).unwrap();

    assert_abs_diff_eq!(fit.delay, 0.05, epsilon = 1e-3);
    let scan = scanner.delay_scan().unwrap();
    assert_eq!(scan.tone_frequencies, vec![100.0]);
    assert_eq!(scan.offset_count(), 20);
}

#[test]
fn recovers_delay_with_noise() {
    let mut device = SimulatedDevice::new(SimulationConfig {
        delay: -0.03,
        noise: 20.0,
        ..Default::default()
    });
    let fit = Scanner::new(&mut device)
        .measure_nominal_delay(-10, &delay_params())
        .unwrap();
    assert_abs_diff_eq!(fit.delay, -0.03, epsilon = 1e-3);
}

#[test]
fn boundary_list_covers_range() {
    let mut device = SimulatedDevice::with_delay(0.0);
    let boundaries = Scanner::new(&mut device)
        .make_boundary_list(0.0, 100.0, 110.0)
        .unwrap();

    assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
    assert!(boundaries[0] <= 100.0);
    assert!(*boundaries.last().unwrap() >= 110.0);
}

#[test]
fn calibration_flattens_its_own_sweep() {
    let mut device = SimulatedDevice::new(SimulationConfig {
        delay: 0.05,
        ripple: 0.1,
        ..Default::default()
    });
    let calibration = Scanner::new(&mut device)
        .make_calibration(0.0, 100.0, 110.0, &calibration_params())
        .unwrap();
    assert_eq!(calibration.interpolants.len(), calibration.boundary_frequencies.len() - 1);

    let corrected = calibration.apply(&calibration.source_sweep, 30000.0).unwrap();
    let mut checked = 0;
    for row in 0..corrected.offset_count() {
        for tone in 0..corrected.tone_count() {
            let f = corrected.frequency_at(row, tone);
            if !(99.0..=110.0).contains(&f) {
                continue;
            }
            let x = corrected.samples[row][tone];
            assert_abs_diff_eq!(x.norm(), 30000.0, epsilon = 1e-6);
            assert_abs_diff_eq!(x.arg(), 0.0, epsilon = 1e-9);
            checked += 1;
        }
    }
    assert!(checked > 40);
}

#[test]
fn delay_then_calibration_corrects_fresh_sweep() {
    let mut device = SimulatedDevice::with_delay(0.05);
    let mut scanner = Scanner::new(&mut device);

    let fit = scanner.measure_nominal_delay(25, &delay_params()).unwrap();
    let params = CalibrationParams {
        nominal_delay: Some(fit.delay),
        ..calibration_params()
    };
    let calibration = scanner.make_calibration(0.0, 100.0, 110.0, &params).unwrap();
    assert_eq!(calibration.source_sweep.delay_applied, Some(fit.delay));

    let tones = ToneSet::new(vec![101.0, 105.0], vec![0.09, 0.09], vec![0.3, -1.2]).unwrap();
    let sweep_params = SweepParams {
        bandwidth: 0.5,
        nf: 5,
        i_begin: 50,
        n_samples: 500,
        ..Default::default()
    };
    let sweep = scanner.fscan(&tones, &sweep_params).unwrap();
    let corrected = calibration.apply(&sweep, 30000.0).unwrap();

    // Calibration tones shared 0.9 over five tones, so 0.09 reads as half scale
    for row in &corrected.samples {
        for x in row {
            assert_abs_diff_eq!(x.norm() / 15000.0, 1.0, epsilon = 1e-2);
            assert_abs_diff_eq!(x.arg(), 0.0, epsilon = 1e-2);
        }
    }
    assert_eq!(corrected.delay_applied, Some(fit.delay));
    assert_eq!(sweep.delay_applied, None);

    // Second application would remove the delay twice
    let err = calibration.apply(&corrected, 30000.0).unwrap_err();
    assert!(err.is_delay_conflict());
}

#[test]
fn calibration_is_reproducible() {
    let build = || {
        let mut device = SimulatedDevice::with_delay(0.02);
        Scanner::new(&mut device)
            .make_calibration(0.0, 100.0, 110.0, &calibration_params())
            .unwrap()
    };
    let (a, b) = (build(), build());
    assert_eq!(a, b);

    let sweep = a.source_sweep.clone();
    assert_eq!(a.apply(&sweep, 30000.0).unwrap(), b.apply(&sweep, 30000.0).unwrap());
}

#[test]
fn device_failure_aborts_calibration() {
    let mut device = SimulatedDevice::with_delay(0.0).fail_after(3);
    let err = Scanner::new(&mut device)
        .make_calibration(0.0, 100.0, 110.0, &calibration_params())
        .unwrap_err();

    assert!(err.is_device_error());
    assert_eq!(device.transfers_done(), 3);
    assert_eq!(device.program_calls(), 4);
}

#[test]
fn colliding_tones_never_reach_device() {
    let mut device = SimulatedDevice::with_delay(0.0);
    let tones = ToneSet::new(vec![100.0, 101.0], vec![0.1, 0.1], vec![0.0, 0.0]).unwrap();
    let err = Scanner::new(&mut device)
        .fscan(&tones, &SweepParams::default())
        .unwrap_err();

    assert!(matches!(err, ReadoutError::Configuration(_)));
    assert_eq!(device.program_calls(), 0);
}
