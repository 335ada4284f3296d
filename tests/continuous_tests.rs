//! Continuous recording without gating: every buffer reaches storage

use acquisition_pool::{Mode, Next, Pipeline, PoolLayout, RecordingSettings, Sample};
use proptest::prelude::*;

fn pipeline(pool_size: usize, capacity: usize) -> Pipeline {
    let mut pipeline = Pipeline::new(
        PoolLayout::new(pool_size, capacity),
        RecordingSettings::default(),
    )
    .unwrap();
    pipeline.reset(Mode::Continuous, 48_000);
    pipeline
}

/// Drain everything currently available, returning (index, samples) pairs
fn drain(pipeline: &mut Pipeline) -> Vec<(u32, Vec<Sample>)> {
    let mut out = Vec::new();
    loop {
        match pipeline.get_next() {
            Next::Buffer(buffer) => out.push((buffer.index(), buffer.to_vec().unwrap())),
            Next::CloseFile => panic!("continuous recording never closes"),
            Next::Idle => return out,
        }
    }
}

/// Four buffers of four samples, filled in four calls
#[test]
fn test_four_by_four_scenario() {
    let mut pipeline = pipeline(4, 4);
    let mut yielded = Vec::new();

    for call in 0..4 {
        let base = call * 4;
        let chunk: Vec<Sample> = (base..base + 4).collect();
        pipeline.append(&chunk).unwrap();
        yielded.extend(drain(&mut pipeline));
    }

    assert_eq!(
        yielded,
        vec![
            (0, vec![0, 1, 2, 3]),
            (1, vec![4, 5, 6, 7]),
            (2, vec![8, 9, 10, 11]),
            (3, vec![12, 13, 14, 15]),
        ]
    );
    assert_eq!(pipeline.producer().active_slot(), 0);
    assert_eq!(pipeline.stats().buffers_completed, 4);
}

#[test]
fn test_no_control_tokens_in_continuous_mode() {
    let mut pipeline = pipeline(4, 4);
    pipeline.append(&[0; 8]).unwrap();
    // Two data tokens and nothing else
    assert_eq!(pipeline.consumer().pending(), 2);
    assert_eq!(drain(&mut pipeline).len(), 2);
}

#[test]
fn test_slow_consumer_loses_oldest_buffers() {
    let mut pipeline = pipeline(4, 2);
    pipeline.append(&(0..12).collect::<Vec<Sample>>()).unwrap();

    // Six buffers complete, slot of buffer 2 is being written: 3, 4, 5 remain
    let indices: Vec<u32> = drain(&mut pipeline).into_iter().map(|(i, _)| i).collect();
    assert_eq!(indices, vec![3, 4, 5]);
    assert_eq!(pipeline.stats().expired_discarded, 3);
}

#[test]
fn test_large_append_spans_many_buffers() {
    let mut pipeline = pipeline(8, 3);
    // One call, several splits, ending mid-buffer
    pipeline.append(&(0..17).collect::<Vec<Sample>>()).unwrap();

    assert_eq!(pipeline.producer().unwrapped_count(), 5);
    assert_eq!(pipeline.producer().entries_written(), 2);

    let yielded = drain(&mut pipeline);
    assert_eq!(yielded.len(), 5);
    assert_eq!(yielded[4], (4, vec![12, 13, 14]));
}

proptest! {
    /// Whatever the chunking, the consumer sees the stream back unchanged
    #[test]
    fn test_round_trip(chunks in prop::collection::vec(1usize..=64, 1..40)) {
        const POOL: usize = 8;
        const CAPACITY: usize = 16;
        let mut pipeline = pipeline(POOL, CAPACITY);

        let mut next: Sample = 0;
        let mut appended = Vec::new();
        let mut yielded = Vec::new();

        for len in chunks {
            let chunk: Vec<Sample> = (0..len)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();
            pipeline.append(&chunk).unwrap();
            appended.extend_from_slice(&chunk);

            for (index, samples) in drain(&mut pipeline) {
                prop_assert_eq!(index as usize, yielded.len() / CAPACITY);
                yielded.extend(samples);
            }
        }

        let completed = pipeline.producer().unwrapped_count() as usize;
        prop_assert_eq!(yielded.len(), completed * CAPACITY);
        prop_assert_eq!(&yielded[..], &appended[..completed * CAPACITY]);
        prop_assert_eq!(pipeline.stats().expired_discarded, 0);
    }
}
