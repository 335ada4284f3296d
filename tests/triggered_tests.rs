//! Triggered recording: pretrigger history, window length and retriggers

use acquisition_pool::{
    Consumer, Mode, Next, Pipeline, PipelineError, PoolLayout, RecordingSettings, TriggerState,
};

/// 10 buffers per second with two-sample buffers
const SAMPLE_RATE: u32 = 20;

fn pipeline(pool_size: usize, settings: RecordingSettings) -> Pipeline {
    let mut pipeline = Pipeline::new(PoolLayout::new(pool_size, 2), settings).unwrap();
    pipeline.reset(Mode::Triggered, SAMPLE_RATE);
    pipeline
}

fn settings(pretrigger_seconds: f32, min_recording_seconds: f32) -> RecordingSettings {
    RecordingSettings {
        pretrigger_seconds,
        min_recording_seconds,
        // Never defer, so reads below see the queue as it is
        max_read_lead: 64,
        ..Default::default()
    }
}

fn complete_buffers(pipeline: &mut Pipeline, count: usize) {
    pipeline.append(&vec![0; count * 2]).unwrap();
}

/// Buffers up to the next idle or close, and whether it was a close
fn drain(pipeline: &mut Pipeline) -> (Vec<u32>, bool) {
    let mut out = Vec::new();
    loop {
        match pipeline.get_next() {
            Next::Buffer(buffer) => out.push(buffer.index()),
            Next::CloseFile => return (out, true),
            Next::Idle => return (out, false),
        }
    }
}

#[test]
fn test_pretrigger_limited_by_history() {
    // 0.5 s = 5 buffers wanted, only 3 completed so far
    let mut pipeline = pipeline(16, settings(0.5, 2.0));
    complete_buffers(&mut pipeline, 3);
    pipeline.on_trigger_event(0).unwrap();

    assert_eq!(pipeline.consumer().pending(), 4);
    assert_eq!(drain(&mut pipeline), (vec![0, 1, 2], false));
}

#[test]
fn test_pretrigger_limited_by_duration() {
    let mut pipeline = pipeline(16, settings(0.5, 2.0));
    complete_buffers(&mut pipeline, 8);
    pipeline.on_trigger_event(0).unwrap();

    assert_eq!(drain(&mut pipeline), (vec![3, 4, 5, 6, 7], false));
}

#[test]
fn test_pretrigger_limited_by_pool() {
    // 1 s = 10 buffers wanted, but only P - delta = 4 are safe to hand out
    let mut pipeline = pipeline(6, settings(1.0, 2.0));
    complete_buffers(&mut pipeline, 20);
    pipeline.on_trigger_event(0).unwrap();

    assert_eq!(drain(&mut pipeline), (vec![16, 17, 18, 19], false));
    assert_eq!(pipeline.stats().expired_discarded, 0);
}

#[test]
fn test_window_contents() {
    let mut pipeline = pipeline(16, settings(0.2, 0.3));
    complete_buffers(&mut pipeline, 4);
    // Pretrigger 2, 3; window through end_target 4 + 3 = 7
    pipeline.on_trigger_event(0).unwrap();
    complete_buffers(&mut pipeline, 6);

    assert_eq!(pipeline.producer().trigger_state(), TriggerState::Idle);
    assert_eq!(drain(&mut pipeline), (vec![2, 3, 4, 5, 6, 7], true));
    assert!(matches!(pipeline.get_next(), Next::Idle));
}

#[test]
fn test_retrigger_extends_window() {
    let mut pipeline = pipeline(16, settings(0.1, 0.2));
    complete_buffers(&mut pipeline, 2);
    pipeline.on_trigger_event(0).unwrap();
    assert_eq!(
        pipeline.producer().trigger_state(),
        TriggerState::Triggered { start: 2, end_target: 4 }
    );

    complete_buffers(&mut pipeline, 2);
    let pending = pipeline.consumer().pending();
    pipeline.on_trigger_event(1).unwrap();

    // Window moved, no second start token or pretrigger block
    assert_eq!(
        pipeline.producer().trigger_state(),
        TriggerState::Triggered { start: 2, end_target: 6 }
    );
    assert_eq!(pipeline.consumer().pending(), pending);
    assert_eq!(pipeline.stats().triggers_accepted, 2);

    complete_buffers(&mut pipeline, 4);
    assert_eq!(drain(&mut pipeline), (vec![1, 2, 3, 4, 5, 6], true));
}

#[test]
fn test_consecutive_windows() {
    let mut pipeline = pipeline(16, settings(0.0, 0.1));
    pipeline.on_trigger_event(0).unwrap();
    complete_buffers(&mut pipeline, 3);
    pipeline.on_trigger_event(5).unwrap();
    complete_buffers(&mut pipeline, 3);

    assert_eq!(drain(&mut pipeline), (vec![0, 1], true));
    assert_eq!(drain(&mut pipeline), (vec![3, 4], true));
}

#[test]
fn test_deferred_read_waits_for_writer() {
    let settings = RecordingSettings {
        max_read_lead: 2,
        ..settings(0.0, 10.0)
    };
    let mut pipeline = pipeline(6, settings);
    pipeline.on_trigger_event(0).unwrap();

    let mut yielded_after = None;
    for completed in 1..=5 {
        complete_buffers(&mut pipeline, 1);
        if let Next::Buffer(buffer) = pipeline.get_next() {
            assert_eq!(buffer.index(), 0);
            yielded_after = Some(completed);
            break;
        }
    }
    // Buffer 0 sits in slot 0; it is released once the writer reaches
    // slot 5, one slot behind it
    assert_eq!(yielded_after, Some(5));
}

#[test]
fn test_fifo_overflow_surfaces() {
    let layout = PoolLayout::new(8, 2).with_fifo_capacity(9);
    let mut pipeline = Pipeline::new(layout, settings(0.0, 10.0)).unwrap();
    pipeline.reset(Mode::Triggered, SAMPLE_RATE);
    pipeline.on_trigger_event(0).unwrap();

    // Start token plus 8 buffers fills the FIFO, the 9th buffer is dropped
    complete_buffers(&mut pipeline, 8);
    let err = pipeline.append(&[0; 2]).unwrap_err();
    assert_eq!(err, PipelineError::SequenceOverflow { dropped: 1 });
    assert_eq!(pipeline.stats().tokens_dropped, 1);
}

#[test]
fn test_settings_change_between_windows() {
    fn drain(consumer: &mut Consumer) -> Vec<u32> {
        let mut out = Vec::new();
        while let Next::Buffer(buffer) = consumer.get_next() {
            out.push(buffer.index());
        }
        out
    }

    let (mut producer, mut consumer) = pipeline(16, settings(0.1, 0.1)).into_split();

    // One pretrigger buffer: 3, then the window through 5
    producer.append(&[0; 8]).unwrap();
    producer.on_trigger_event(0).unwrap();
    producer.append(&[0; 6]).unwrap();
    assert_eq!(drain(&mut consumer), vec![3, 4, 5]);

    // The split producer can still change the pretrigger length, and the
    // next trigger uses it
    producer.set_settings(settings(0.3, 0.1)).unwrap();
    producer.append(&[0; 8]).unwrap();
    producer.on_trigger_event(10).unwrap();
    assert_eq!(drain(&mut consumer), vec![8, 9, 10]);
}
