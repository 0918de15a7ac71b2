use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use tilewatch::react::{Deterrent, DeterrentOutcome, LogDeterrent};
use tilewatch::thermal::ScriptedTemperature;
use tilewatch::{
    AcquisitionSettings, CancelToken, Camera, Classifier, DetectionLoop, DetectionResult, Frame,
    FrameTiler, FsEvidenceStore, LoopSettings, Phase, ReactionPipeline, SkipReason,
    ThermalGovernor, TickOutcome, TilingGeometry,
};

const WIDTH: u32 = 120;
const HEIGHT: u32 = 80;
const ZONES: u64 = 6;

#[derive(Clone, Default)]
struct CameraCounters {
    captures: Arc<AtomicU64>,
    configured: Arc<Mutex<Vec<AcquisitionSettings>>>,
}

struct TestCamera {
    counters: CameraCounters,
    not_ready_polls: u32,
    fail_on_capture: Option<u64>,
}

impl TestCamera {
    fn new(counters: &CameraCounters) -> Self {
        Self {
            counters: counters.clone(),
            not_ready_polls: 0,
            fail_on_capture: None,
        }
    }
}

impl Camera for TestCamera {
    fn name(&self) -> &str {
        "test"
    }

    fn ready(&mut self, _timeout: Duration) -> bool {
        if self.not_ready_polls > 0 {
            self.not_ready_polls -= 1;
            return false;
        }
        true
    }

    fn capture(&mut self) -> Result<Frame> {
        let n = self.counters.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_capture == Some(n) {
            return Err(anyhow!("sensor disconnected"));
        }
        Ok(Frame::new(
            RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([30, 60, 30])),
            n,
        ))
    }

    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<()> {
        self.counters.configured.lock().unwrap().push(*settings);
        Ok(())
    }
}

/// Returns scripted results in order, repeating the last one. `None` is a backend error.
struct ScriptedClassifier {
    results: Vec<Option<DetectionResult>>,
    calls: Arc<AtomicU64>,
    cancel_on_call: Option<(u64, CancelToken)>,
}

impl ScriptedClassifier {
    fn repeating(result: DetectionResult) -> Self {
        Self {
            results: vec![Some(result)],
            calls: Arc::new(AtomicU64::new(0)),
            cancel_on_call: None,
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    fn classify(&mut self, _tile: &RgbImage) -> Result<DetectionResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = &self.cancel_on_call {
            if call == *at {
                token.cancel();
            }
        }
        let index = (call as usize - 1).min(self.results.len() - 1);
        self.results[index]
            .clone()
            .ok_or_else(|| anyhow!("inference server unavailable"))
    }
}

struct BrokenSprinkler {
    attempts: Arc<AtomicU64>,
}

impl Deterrent for BrokenSprinkler {
    fn name(&self) -> &str {
        "broken"
    }

    fn activate(&mut self, _seconds: u32, _reason: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("valve did not open"))
    }
}

fn settings() -> LoopSettings {
    LoopSettings {
        warm_up_frames: 0,
        frame_budget: 0,
        ready_timeout: Duration::from_millis(1),
        idle_delay: Duration::from_millis(250),
        auto_detect: true,
        target_label: "Pigeon".to_string(),
        confidence_threshold: 0.95,
        inactive_zones: Vec::new(),
    }
}

fn build(
    evidence: &std::path::Path,
    camera: TestCamera,
    classifier: Box<dyn Classifier>,
    deterrent: Box<dyn Deterrent>,
    settings: LoopSettings,
) -> DetectionLoop {
    let geometry = TilingGeometry::new(WIDTH, HEIGHT, 3, 2, 1.2).expect("geometry");
    let tiler = FrameTiler::new(geometry, 32, 32).expect("tiler");
    let pipeline = ReactionPipeline::new(
        Box::new(FsEvidenceStore::new(evidence).expect("store")),
        deterrent,
    )
    .expect("pipeline")
    .with_deter(true)
    .with_deter_secs(1, 3);
    let governor = ThermalGovernor::new(
        Box::new(ScriptedTemperature::fixed(45.0)),
        80.0,
        Duration::from_secs(5),
    )
    .with_sleeper(|_| {});
    DetectionLoop::new(
        Box::new(camera),
        tiler,
        classifier,
        pipeline,
        governor,
        settings,
    )
    .expect("detection loop")
    .with_sleeper(|_| {})
}

#[test]
fn one_capture_per_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Sparrow", 0.4))),
        Box::new(LogDeterrent::new()),
        LoopSettings {
            frame_budget: 3 * ZONES,
            ..settings()
        },
    );

    let mut zones = Vec::new();
    loop {
        let outcome = scan.tick().expect("tick");
        if outcome.is_terminal() {
            break;
        }
        if let TickOutcome::Classified { zone, .. } = outcome {
            zones.push(zone);
        }
    }

    assert_eq!(zones, [0, 1, 2, 3, 4, 5].repeat(3));
    assert_eq!(counters.captures.load(Ordering::SeqCst), 3);
    assert_eq!(scan.stats().frames_captured, 3);
    assert_eq!(scan.stats().ticks, 3 * ZONES);
}

#[test]
fn only_target_label_above_threshold_triggers() {
    let cases = [
        (DetectionResult::new("Pigeon", 0.97), true),
        (DetectionResult::new("Pigeon", 0.90), false),
        (DetectionResult::new("Sparrow", 0.99), false),
    ];
    for (result, triggers) in cases {
        let dir = tempfile::tempdir().unwrap();
        let counters = CameraCounters::default();
        let mut scan = build(
            dir.path(),
            TestCamera::new(&counters),
            Box::new(ScriptedClassifier::repeating(result.clone())),
            Box::new(LogDeterrent::new()),
            settings(),
        );
        match scan.tick().expect("tick") {
            TickOutcome::Classified {
                zone,
                result: seen,
                reaction,
            } => {
                assert_eq!(zone, 0);
                assert_eq!(seen, result);
                assert_eq!(reaction.is_some(), triggers, "{:?}", result);
                if let Some(report) = reaction {
                    let invocation = report.deterrent.expect("deterrent invoked");
                    assert_eq!(invocation.requested_secs, 1);
                    assert_eq!(invocation.issued_secs, 3);
                    assert!(report.evidence_path.expect("evidence saved").is_file());
                }
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(scan.stats().detections, u64::from(triggers));
    }
}

#[test]
fn failing_deterrent_never_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let attempts = Arc::new(AtomicU64::new(0));
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Pigeon", 0.99))),
        Box::new(BrokenSprinkler {
            attempts: attempts.clone(),
        }),
        LoopSettings {
            frame_budget: 2 * ZONES,
            ..settings()
        },
    );

    let stats = scan.run().expect("run survives deterrent failures");
    assert_eq!(stats.ticks, 2 * ZONES);
    assert_eq!(stats.detections, 2 * ZONES);
    assert_eq!(stats.reactions, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 2 * ZONES);
}

#[test]
fn failed_deterrent_is_reported_in_tick_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Pigeon", 0.99))),
        Box::new(BrokenSprinkler {
            attempts: Arc::new(AtomicU64::new(0)),
        }),
        settings(),
    );
    let TickOutcome::Classified { reaction, .. } = scan.tick().unwrap() else {
        panic!("expected a classification");
    };
    let outcome = reaction.and_then(|r| r.deterrent).map(|d| d.outcome);
    assert!(matches!(outcome, Some(DeterrentOutcome::Failed(_))));
}

#[test]
fn warm_up_discards_frames_before_first_zone() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let classifier = ScriptedClassifier::repeating(DetectionResult::new("Sparrow", 0.1));
    let calls = classifier.calls.clone();
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(classifier),
        Box::new(LogDeterrent::new()),
        LoopSettings {
            warm_up_frames: 3,
            ..settings()
        },
    );

    assert_eq!(scan.phase(), Phase::Warmup { remaining: 3 });
    for remaining in [2, 1, 0] {
        assert_eq!(scan.tick().unwrap(), TickOutcome::WarmingUp { remaining });
    }
    assert_eq!(scan.phase(), Phase::Scanning);
    assert_eq!(counters.captures.load(Ordering::SeqCst), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(scan.cursor().position(), -1);

    assert!(matches!(
        scan.tick().unwrap(),
        TickOutcome::Classified { zone: 0, .. }
    ));
    assert_eq!(counters.captures.load(Ordering::SeqCst), 4);
    assert_eq!(scan.stats().warmup_discarded, 3);
    assert_eq!(scan.stats().frames_captured, 1);
}

#[test]
fn cancellation_stops_run_at_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let cancel = CancelToken::new();
    let classifier = ScriptedClassifier {
        results: vec![Some(DetectionResult::new("Sparrow", 0.5))],
        calls: Arc::new(AtomicU64::new(0)),
        cancel_on_call: Some((5, cancel.clone())),
    };
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(classifier),
        Box::new(LogDeterrent::new()),
        settings(),
    )
    .with_cancel_token(cancel);

    let stats = scan.run().expect("run");
    assert_eq!(stats.ticks, 5);
    assert_eq!(stats.classifications, 5);
}

#[test]
fn inactive_zones_are_not_classified() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let classifier = ScriptedClassifier::repeating(DetectionResult::new("Pigeon", 0.99));
    let calls = classifier.calls.clone();
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(classifier),
        Box::new(LogDeterrent::new()),
        LoopSettings {
            inactive_zones: vec![1, 4],
            ..settings()
        },
    );

    let mut skipped = Vec::new();
    for _ in 0..ZONES {
        if let TickOutcome::Skipped { zone, reason } = scan.tick().unwrap() {
            assert_eq!(reason, SkipReason::InactiveZone);
            skipped.push(zone);
        }
    }
    assert_eq!(skipped, vec![1, 4]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // Inactive zones still get their crop recorded.
    assert!(scan.zones().get(4).and_then(|z| z.last_crop).is_some());
}

#[test]
fn classifier_errors_skip_the_zone_and_continue() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let classifier = ScriptedClassifier {
        results: vec![None, Some(DetectionResult::new("Pigeon", 0.99))],
        calls: Arc::new(AtomicU64::new(0)),
        cancel_on_call: None,
    };
    let idle = Arc::new(Mutex::new(Vec::new()));
    let idle_log = idle.clone();
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(classifier),
        Box::new(LogDeterrent::new()),
        settings(),
    )
    .with_sleeper(move |d| idle_log.lock().unwrap().push(d));

    assert_eq!(
        scan.tick().unwrap(),
        TickOutcome::Skipped {
            zone: 0,
            reason: SkipReason::Unclassified
        }
    );
    assert!(matches!(
        scan.tick().unwrap(),
        TickOutcome::Classified { zone: 1, reaction: Some(_), .. }
    ));
    assert_eq!(scan.stats().classifier_failures, 1);
    assert_eq!(idle.lock().unwrap().as_slice(), &[Duration::from_millis(250)]);
}

#[test]
fn camera_not_ready_is_a_no_op_tick() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let mut camera = TestCamera::new(&counters);
    camera.not_ready_polls = 2;
    let mut scan = build(
        dir.path(),
        camera,
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Sparrow", 0.2))),
        Box::new(LogDeterrent::new()),
        settings(),
    );

    assert_eq!(scan.tick().unwrap(), TickOutcome::CameraNotReady);
    assert_eq!(scan.tick().unwrap(), TickOutcome::CameraNotReady);
    assert_eq!(scan.cursor().position(), -1);
    assert_eq!(counters.captures.load(Ordering::SeqCst), 0);
    assert!(matches!(
        scan.tick().unwrap(),
        TickOutcome::Classified { zone: 0, .. }
    ));
    assert_eq!(scan.stats().not_ready, 2);
}

#[test]
fn acquisition_change_forces_recapture() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let mut scan = build(
        dir.path(),
        TestCamera::new(&counters),
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Sparrow", 0.2))),
        Box::new(LogDeterrent::new()),
        settings(),
    );

    scan.tick().unwrap();
    scan.tick().unwrap();
    assert_eq!(scan.cursor().position(), 1);
    assert_eq!(counters.captures.load(Ordering::SeqCst), 1);

    let settings = AcquisitionSettings {
        shutter_us: Some(4000),
        contrast: 20,
    };
    scan.apply_acquisition(&settings).unwrap();
    assert_eq!(scan.cursor().position(), -1);
    assert!(!scan.tiler().has_frame());
    assert_eq!(counters.configured.lock().unwrap().as_slice(), &[settings]);

    assert!(matches!(
        scan.tick().unwrap(),
        TickOutcome::Classified { zone: 0, .. }
    ));
    assert_eq!(counters.captures.load(Ordering::SeqCst), 2);
}

#[test]
fn camera_failure_ends_run_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let mut camera = TestCamera::new(&counters);
    camera.fail_on_capture = Some(2);
    let mut scan = build(
        dir.path(),
        camera,
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Sparrow", 0.2))),
        Box::new(LogDeterrent::new()),
        settings(),
    );

    let err = scan.run().expect_err("acquisition failure is fatal");
    assert!(format!("{:#}", err).contains("sensor disconnected"));
    assert_eq!(scan.stats().ticks, ZONES + 1);
}

#[test]
fn hot_device_throttles_before_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let counters = CameraCounters::default();
    let geometry = TilingGeometry::new(WIDTH, HEIGHT, 3, 2, 1.2).unwrap();
    let sleeps = Arc::new(AtomicU64::new(0));
    let counter = sleeps.clone();
    let governor = ThermalGovernor::new(
        Box::new(ScriptedTemperature::new(vec![85.0, 82.0, 79.0, 75.0])),
        80.0,
        Duration::from_secs(5),
    )
    .with_sleeper(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let monitor = governor.monitor();
    let pipeline = ReactionPipeline::new(
        Box::new(FsEvidenceStore::new(dir.path()).unwrap()),
        Box::new(LogDeterrent::new()),
    )
    .unwrap();
    let mut scan = DetectionLoop::new(
        Box::new(TestCamera::new(&counters)),
        FrameTiler::new(geometry, 32, 32).unwrap(),
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Sparrow", 0.2))),
        pipeline,
        governor,
        LoopSettings {
            frame_budget: 2 * ZONES,
            ..settings()
        },
    )
    .unwrap()
    .with_sleeper(|_| {});

    scan.run().unwrap();
    // Two sleeps on the first capture, none on the second.
    assert_eq!(sleeps.load(Ordering::SeqCst), 2);
    let status = monitor.snapshot();
    assert_eq!(status.throttle_sleeps, 2);
    assert!(!status.throttling);
    assert_eq!(status.celsius, 75.0);
}

/// Square camera whose single zone covers the whole frame, so every tick recaptures.
struct SquareCamera {
    sequence: u64,
}

impl Camera for SquareCamera {
    fn name(&self) -> &str {
        "square"
    }

    fn ready(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn capture(&mut self) -> Result<Frame> {
        self.sequence += 1;
        Ok(Frame::new(
            RgbImage::from_pixel(80, 80, Rgb([90, 90, 90])),
            self.sequence,
        ))
    }

    fn configure(&mut self, _settings: &AcquisitionSettings) -> Result<()> {
        Ok(())
    }
}

#[test]
fn reactions_within_one_second_keep_separate_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = TilingGeometry::new(80, 80, 1, 1, 1.0).expect("geometry");
    let tiler = FrameTiler::new(geometry, 32, 32).expect("tiler");
    let pipeline = ReactionPipeline::new(
        Box::new(FsEvidenceStore::new(dir.path()).expect("store")),
        Box::new(LogDeterrent::new()),
    )
    .expect("pipeline");
    let governor = ThermalGovernor::new(
        Box::new(ScriptedTemperature::fixed(45.0)),
        80.0,
        Duration::from_secs(5),
    )
    .with_sleeper(|_| {});
    let mut scan = DetectionLoop::new(
        Box::new(SquareCamera { sequence: 0 }),
        tiler,
        Box::new(ScriptedClassifier::repeating(DetectionResult::new("Pigeon", 0.99))),
        pipeline,
        governor,
        LoopSettings {
            frame_budget: 5,
            ..settings()
        },
    )
    .expect("detection loop")
    .with_sleeper(|_| {});

    let mut evidence = HashSet::new();
    loop {
        let outcome = scan.tick().expect("tick");
        if outcome.is_terminal() {
            break;
        }
        if let TickOutcome::Classified {
            reaction: Some(report),
            ..
        } = outcome
        {
            let path = report.evidence_path.expect("evidence saved");
            assert!(path.is_file(), "{}", path.display());
            evidence.insert(path);
        }
    }

    assert_eq!(scan.stats().detections, 5);
    assert_eq!(evidence.len(), 5);
}
