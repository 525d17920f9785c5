//! Propagation controller scenarios with scripted collaborators

mod common;

use annotrack_core::{BBox, LabelMap};
use annotrack_storage::AnnotationStore;
use annotrack_tracker::{
    PropagationController, RunRequest, StopMessage, StopReason, StopSignal, TrackingConfig, TrackingError,
};
use common::*;
use std::collections::BTreeMap;
use std::path::Path;

fn labels() -> BTreeMap<String, u16> {
    let mut labels = BTreeMap::new();
    labels.insert("_background_".to_string(), 0);
    labels.insert("A".to_string(), 1);
    labels.insert("B".to_string(), 2);
    labels
}

fn two_instances_until(last_b: usize, frames: usize) -> Vec<LabelMap> {
    (0..frames)
        .map(|i| {
            let a = (1, square(10, 10, 20));
            if i <= last_b {
                label_map(&[a, (2, square(60, 60, 15))])
            } else {
                label_map(&[a])
            }
        })
        .collect()
}

fn summary_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_occluded_instance_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("clip.mp4");

    // B is a 2x2 speck until frame 3, too small to cache, then clearly visible
    let frames: Vec<LabelMap> = (0..10)
        .map(|i| {
            let a = (1, square(10, 10, 20));
            match i {
                0..=3 => label_map(&[a, (2, square(60, 60, 2))]),
                4..=5 => label_map(&[a, (2, square(60, 60, 15))]),
                _ => label_map(&[a]),
            }
        })
        .collect();
    let initial = frames[0].clone();
    let recovery = ScriptedRecovery::new(square(60, 60, 15), 0.5);
    let prompts = recovery.prompts.clone();

    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames)))
        .unwrap()
        .with_recovery(Box::new(recovery));
    let report = controller
        .run(
            &mut blank_video(10),
            None,
            RunRequest::new(&video, 0, initial).with_labels(labels()),
        )
        .unwrap();

    assert_eq!(report.reason, StopReason::EndOfVideo);
    assert_eq!(report.stop.to_string(), "Stop at frame:\n#9");
    assert_eq!(report.frames_processed, 10);
    assert!(report.final_state.has_occlusion);
    assert_eq!(report.final_state.expected_instance_count, 1);

    // Only frame 6 was short; the prompt is the box cached at frame 5
    let prompts = prompts.lock().clone();
    assert_eq!(prompts, vec![(6, BBox::new(60.0, 60.0, 74.0, 74.0))]);

    let store = AnnotationStore::open(dir.path().join("clip")).unwrap();
    assert_eq!(store.frames(), (0..10).collect::<Vec<_>>());
    for frame in 0..=5 {
        assert_eq!(store.get(frame).unwrap().labels(), vec!["A", "B"], "frame {}", frame);
    }
    for frame in 6..=9 {
        assert_eq!(store.get(frame).unwrap().labels(), vec!["A"], "frame {}", frame);
    }

    let summary_path = report.summary_path.unwrap();
    assert_eq!(summary_path, dir.path().join("clip_tracked.csv"));
    let lines = summary_lines(&summary_path);
    assert_eq!(lines.len(), 1 + 10 + 6);
    assert_eq!(lines[1], "0,A,19,19,-1,0");
    assert_eq!(lines.iter().filter(|l| l.contains(",B,")).count(), 6);
}

#[test]
fn test_fatal_stop_when_most_instances_vanish() {
    let dir = tempfile::tempdir().unwrap();
    let full: Vec<(u16, _)> = (0..10u16)
        .map(|i| (i + 1, square(5 + 9 * u32::from(i), 40, 6)))
        .collect();
    let frames: Vec<LabelMap> = (0..6)
        .map(|i| if i < 3 { label_map(&full) } else { label_map(&full[..4]) })
        .collect();
    let initial = frames[0].clone();

    let mut controller =
        PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames))).unwrap();
    let report = controller
        .run(&mut blank_video(6), None, RunRequest::new(dir.path().join("grid.mp4"), 0, initial))
        .unwrap();

    match &report.reason {
        StopReason::Fatal { missing } => assert_eq!(missing.len(), 6),
        other => panic!("Expected fatal stop, got {:?}", other),
    }
    let parsed = StopMessage::parse(&report.stop.to_string()).unwrap();
    assert_eq!(parsed.frame, 3);
    assert!(parsed.text.contains("6 missing instance(s)"));
    assert_eq!(report.frames_processed, 3);
    assert_eq!(report.final_state.expected_instance_count, 10);

    // Frame 3 is not persisted, earlier frames and their rows are
    let store = AnnotationStore::open(dir.path().join("grid")).unwrap();
    assert_eq!(store.frames(), vec![0, 1, 2]);
    assert_eq!(summary_lines(&dir.path().join("grid_tracked.csv")).len(), 1 + 30);
}

#[test]
fn test_periodic_reseed_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(11, 12);
    let engine = ScriptedEngine::new(frames.clone());
    let calls = engine.calls.clone();

    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(engine)).unwrap();
    let report = controller
        .run(
            &mut blank_video(12),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()).with_labels(labels()),
        )
        .unwrap();

    assert_eq!(report.reseeded_frames, vec![0, 5, 10]);
    let seeded: Vec<u64> = calls.lock().iter().filter(|c| c.seed.is_some()).map(|c| c.frame).collect();
    assert_eq!(seeded, vec![0, 5, 10]);
    let first_seed = calls.lock()[0].seed.clone().unwrap();
    assert_eq!(first_seed.len(), 2);
    assert_eq!(first_seed[1], square(60, 60, 15));
}

#[test]
fn test_recovery_forces_reseed_next_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut frames = two_instances_until(11, 12);
    frames[7] = label_map(&[(1, square(10, 10, 20))]);
    let engine = ScriptedEngine::new(frames.clone());
    let calls = engine.calls.clone();
    let recovered_mask = square(62, 62, 15);

    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(engine))
        .unwrap()
        .with_recovery(Box::new(ScriptedRecovery::new(recovered_mask.clone(), 0.95)));
    let report = controller
        .run(
            &mut blank_video(12),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()).with_labels(labels()),
        )
        .unwrap();

    assert_eq!(report.reseeded_frames, vec![0, 5, 8, 10]);
    assert!(!report.final_state.has_occlusion);
    assert_eq!(report.final_state.expected_instance_count, 2);

    // The frame 8 seed carries the recovered mask for B
    let calls = calls.lock();
    let seed = calls.iter().find(|c| c.frame == 8).and_then(|c| c.seed.clone()).unwrap();
    assert_eq!(seed[1], recovered_mask);

    let store = AnnotationStore::open(dir.path().join("clip")).unwrap();
    let record = store.get(7).unwrap();
    assert_eq!(record.labels(), vec!["A", "B"]);
    assert_eq!(record.shape("B").unwrap().description, "recovered");
}

#[test]
fn test_horizon_limits_run() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(20, 20);
    let config = TrackingConfig {
        frames_to_propagate: 4,
        ..Default::default()
    };
    let mut controller = PropagationController::new(config, Box::new(ScriptedEngine::new(frames.clone()))).unwrap();
    let report = controller
        .run(
            &mut blank_video(20),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 2, frames[2].clone()).with_labels(labels()),
        )
        .unwrap();

    assert_eq!(report.reason, StopReason::EndOfRange);
    assert_eq!(report.frames_processed, 5);
    assert_eq!(report.stop.frame, 6);
    assert_eq!(report.reseeded_frames, vec![2, 5]);
}

#[test]
fn test_cancel_before_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(5, 5);
    let signal = StopSignal::new();
    signal.stop();
    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames.clone())))
        .unwrap()
        .with_stop_signal(signal);
    let report = controller
        .run(
            &mut blank_video(5),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 1, frames[1].clone()),
        )
        .unwrap();

    assert_eq!(report.reason, StopReason::Cancelled);
    assert_eq!(report.frames_processed, 0);
    assert_eq!(report.stop.frame, 1);
    assert_eq!(summary_lines(&dir.path().join("clip_tracked.csv")).len(), 1);
}

#[test]
fn test_cancel_takes_effect_between_frames() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(9, 10);
    let signal = StopSignal::new();
    let mut engine = ScriptedEngine::new(frames.clone());
    engine.stop_at = Some((2, signal.clone()));
    let calls = engine.calls.clone();

    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(engine))
        .unwrap()
        .with_stop_signal(signal);
    let report = controller
        .run(
            &mut blank_video(10),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()),
        )
        .unwrap();

    assert_eq!(report.reason, StopReason::Cancelled);
    assert_eq!(report.stop.to_string(), "Stop at frame:\n#2");
    assert_eq!(report.frames_processed, 3);
    assert_eq!(calls.lock().len(), 3);
    let store = AnnotationStore::open(dir.path().join("clip")).unwrap();
    assert_eq!(store.last_frame(), Some(2));
}

#[test]
fn test_last_frame_already_complete() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(5, 5);
    let mut sink = CollectingSink::default();
    let mut controller =
        PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames.clone()))).unwrap();
    let report = controller
        .run(
            &mut blank_video(5),
            Some(&mut sink),
            RunRequest::new(dir.path().join("clip.mp4"), 4, frames[4].clone()),
        )
        .unwrap();

    assert_eq!(report.reason, StopReason::AlreadyComplete);
    assert_eq!(
        report.stop.to_string(),
        "Please edit a frame and restart. The last frame prediction already exists:#4"
    );
    assert!(report.summary_path.is_none());
    assert!(!dir.path().join("clip_tracked.csv").exists());
    assert_eq!(sink.finished, 1);
}

#[test]
fn test_engine_failure_still_finalizes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(9, 10);
    let mut engine = ScriptedEngine::new(frames.clone());
    engine.fail_at = Some(3);
    let mut sink = CollectingSink::default();
    let config = TrackingConfig {
        recording: true,
        ..Default::default()
    };

    let mut controller = PropagationController::new(config, Box::new(engine)).unwrap();
    let result = controller.run(
        &mut blank_video(10),
        Some(&mut sink),
        RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()),
    );

    let err = result.unwrap_err();
    match &err {
        TrackingError::Interrupted { source, resume } => {
            assert!(matches!(**source, TrackingError::Engine(_)));
            assert_eq!(resume.frame, 2);
        }
        other => panic!("Expected interrupted run, got {:?}", other),
    }
    let parsed = StopMessage::parse(&err.to_string()).unwrap();
    assert_eq!(parsed.frame, 2);
    assert_eq!(sink.frames, vec![0, 1, 2]);
    assert_eq!(sink.finished, 1);
    assert_eq!(summary_lines(&dir.path().join("clip_tracked.csv")).len(), 1 + 6);
}

#[test]
fn test_motion_index_from_flow() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(2, 3);
    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames.clone())))
        .unwrap()
        .with_flow(Box::new(UniformFlow { dx: 3.0, dy: 4.0 }));
    let report = controller
        .run(
            &mut blank_video(3),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()).with_labels(labels()),
        )
        .unwrap();

    let lines = summary_lines(&report.summary_path.unwrap());
    assert_eq!(lines[1], "0,A,19,19,-1,0");
    assert_eq!(lines[3], "1,A,19,19,5,0.1");
}

#[test]
fn test_empty_initial_mask_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(2, 3);
    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames))).unwrap();
    let result = controller.run(
        &mut blank_video(3),
        None,
        RunRequest::new(dir.path().join("clip.mp4"), 0, LabelMap::new(WIDTH, HEIGHT)),
    );
    assert!(matches!(result, Err(TrackingError::Config(_))));
}

#[test]
fn test_unknown_instance_does_not_mask_a_loss() {
    let dir = tempfile::tempdir().unwrap();
    // From frame 2 the engine reports an id nobody seeded in place of B
    let frames: Vec<LabelMap> = (0..4)
        .map(|i| {
            let a = (1, square(10, 10, 20));
            if i < 2 {
                label_map(&[a, (2, square(60, 60, 15))])
            } else {
                label_map(&[a, (3, square(60, 60, 15))])
            }
        })
        .collect();
    let recovery = ScriptedRecovery::new(square(60, 60, 15), 0.99);
    let prompts = recovery.prompts.clone();

    let mut controller = PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames.clone())))
        .unwrap()
        .with_recovery(Box::new(recovery));
    let report = controller
        .run(
            &mut blank_video(4),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()).with_labels(labels()),
        )
        .unwrap();

    assert_eq!(report.reason, StopReason::EndOfVideo);
    assert!(!report.final_state.has_occlusion);
    assert_eq!(report.reseeded_frames, vec![0, 3]);
    let prompts = prompts.lock().clone();
    assert_eq!(
        prompts,
        vec![(2, BBox::new(60.0, 60.0, 74.0, 74.0)), (3, BBox::new(60.0, 60.0, 74.0, 74.0))]
    );

    let store = AnnotationStore::open(dir.path().join("clip")).unwrap();
    for frame in 2..=3 {
        let record = store.get(frame).unwrap();
        assert_eq!(record.labels(), vec!["A", "B"], "frame {}", frame);
        assert_eq!(record.shape("B").unwrap().description, "recovered");
    }
}

#[test]
fn test_missing_message_ignores_dropped_instances() {
    let dir = tempfile::tempdir().unwrap();
    let all: Vec<(u16, _)> = (0..5u16)
        .map(|i| (i + 1, square(5 + 9 * u32::from(i), 40, 6)))
        .collect();
    // 5 leaves at frame 2 and is dropped; 2, 3 and 4 vanish at frame 4
    let frames: Vec<LabelMap> = (0..6)
        .map(|i| match i {
            0..=1 => label_map(&all),
            2..=3 => label_map(&all[..4]),
            _ => label_map(&all[..1]),
        })
        .collect();
    let initial = frames[0].clone();

    let mut controller =
        PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames))).unwrap();
    let report = controller
        .run(&mut blank_video(6), None, RunRequest::new(dir.path().join("grid.mp4"), 0, initial))
        .unwrap();

    assert_eq!(
        report.reason,
        StopReason::Fatal {
            missing: vec!["2".to_string(), "3".to_string(), "4".to_string()]
        }
    );
    assert_eq!(report.stop.frame, 4);
    assert!(report.stop.text.contains("3 missing instance(s)"));
    assert!(report.stop.text.ends_with("2, 3, 4"));
    assert_eq!(report.final_state.expected_instance_count, 4);
    assert!(!report.final_state.instance_labels.contains("5"));
}

#[test]
fn test_masks_persisted_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(2, 3);
    let config = TrackingConfig {
        persist_masks: true,
        ..Default::default()
    };
    let mut controller = PropagationController::new(config, Box::new(ScriptedEngine::new(frames.clone()))).unwrap();
    controller
        .run(
            &mut blank_video(3),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()).with_labels(labels()),
        )
        .unwrap();

    let store = AnnotationStore::open(dir.path().join("clip")).unwrap();
    let record = store.get(1).unwrap();
    assert_eq!(record.shape("A").unwrap().mask, Some(square(10, 10, 20)));
    assert_eq!(record.shape("B").unwrap().mask, Some(square(60, 60, 15)));
}

#[test]
fn test_masks_not_persisted_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let frames = two_instances_until(1, 2);
    let mut controller =
        PropagationController::new(TrackingConfig::default(), Box::new(ScriptedEngine::new(frames.clone()))).unwrap();
    controller
        .run(
            &mut blank_video(2),
            None,
            RunRequest::new(dir.path().join("clip.mp4"), 0, frames[0].clone()).with_labels(labels()),
        )
        .unwrap();

    let store = AnnotationStore::open(dir.path().join("clip")).unwrap();
    assert!(store.get(0).unwrap().shape("A").unwrap().mask.is_none());
}
